//! Per-packet event trace and end-of-run statistics.
//!
//! Every send and receive produces one line on standard output:
//!
//! ```text
//! snd 0.103 S - - - 0 0 0
//! rcv 0.105 S - A - 0 0 1
//! snd 0.107 - - A D 1 512 1
//! ```
//!
//! Columns: direction, seconds since the connection origin, one column per
//! flag (`S`yn, `F`in, `A`ck, `D`ata — `-` when clear; `D` means the packet
//! carries a payload), sequence, payload length, acknowledgement.
//!
//! These lines are protocol output, not diagnostics — they go to stdout
//! unconditionally, while `log` carries the debug chatter.

use std::fmt;

use crate::packet::Packet;
use crate::timer::Clock;

/// Direction of a traced packet event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Send => "snd",
            Direction::Receive => "rcv",
        }
    }
}

/// Formats packet events relative to a connection-start origin.
#[derive(Debug, Clone, Copy)]
pub struct Trace {
    clock: Clock,
}

impl Trace {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    /// Render one event line (without trailing newline).
    pub fn line(&self, dir: Direction, pkt: &Packet) -> String {
        Self::line_at(dir, self.clock.elapsed_secs(), pkt)
    }

    /// Print one event line to stdout.
    pub fn record(&self, dir: Direction, pkt: &Packet) {
        println!("{}", self.line(dir, pkt));
    }

    fn line_at(dir: Direction, secs: f64, pkt: &Packet) -> String {
        let h = &pkt.header;
        let flag = |set: bool, c: char| if set { c } else { '-' };
        format!(
            "{} {:.3} {} {} {} {} {} {} {}",
            dir.tag(),
            secs,
            flag(h.syn, 'S'),
            flag(h.fin, 'F'),
            flag(h.ack_flag, 'A'),
            flag(!pkt.payload.is_empty(), 'D'),
            h.seq,
            pkt.len(),
            h.ack,
        )
    }
}

/// Counters accumulated by the sender engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub duplicate_acks: u64,
}

impl fmt::Display for SenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transfer statistics:")?;
        writeln!(f, "  total bytes sent:             {}", self.bytes_sent)?;
        writeln!(f, "  total packets sent:           {}", self.packets_sent)?;
        writeln!(f, "  total retransmissions:        {}", self.retransmissions)?;
        write!(f, "  total duplicate ACKs:         {}", self.duplicate_acks)
    }
}

/// Counters accumulated by the receiver engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverStats {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub out_of_order: u64,
    pub checksum_errors: u64,
}

impl fmt::Display for ReceiverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transfer statistics:")?;
        writeln!(f, "  total bytes received:         {}", self.bytes_received)?;
        writeln!(f, "  total packets received:       {}", self.packets_received)?;
        writeln!(f, "  total out-of-order packets:   {}", self.out_of_order)?;
        write!(f, "  total checksum errors:        {}", self.checksum_errors)
    }
}
