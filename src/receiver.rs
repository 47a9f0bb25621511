//! Receiver engine: passive open, in-order file writing, teardown.
//!
//! The receiver is a single loop over the socket — the reassembly buffer and
//! the `expected_seq` cursor are touched by nobody else, so no locking is
//! needed.  Lifecycle:
//!
//! - **Listen** — accept only a SYN (ACK clear).  Bind to that peer, answer
//!   SYN-ACK, start expecting byte 1.
//! - **Established** — decode, filter by peer, drop oversize payloads,
//!   dispatch data through [`Reassembly`], append in-order bytes to the file
//!   *before* the ACK leaves (an acknowledged byte is durable in the output
//!   stream), answer FIN with FIN+ACK.
//! - **Closed** — linger briefly re-answering duplicate FINs until the
//!   sender's final ACK, then drop everything.
//!
//! Every ACK the receiver emits echoes the triggering packet's timestamp
//! verbatim; the sender derives its RTT samples from the echo.

use std::net::SocketAddr;
use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout_at, Duration, Instant};

use crate::packet::Packet;
use crate::reassembly::{Reassembly, SegmentDisposition};
use crate::socket::{Socket, SocketError};
use crate::state::ReceiverState;
use crate::timer::Clock;
use crate::trace::{Direction, ReceiverStats, Trace};
use crate::TransferError;

/// How long to keep answering duplicate FINs after the FIN+ACK went out.
const FIN_LINGER: Duration = Duration::from_millis(500);

/// Receives one file from a sending peer.
pub struct Receiver {
    socket: Socket,
    mtu: usize,
    window: usize,
    clock: Clock,
    trace: Trace,
    state: ReceiverState,
    stats: ReceiverStats,
}

impl Receiver {
    /// `window` is the peer's in-flight packet budget; together with `mtu`
    /// it bounds the byte range the reassembly buffer will accept.
    pub fn new(socket: Socket, mtu: usize, window: usize) -> Self {
        let clock = Clock::start();
        Self {
            socket,
            mtu,
            window,
            clock,
            trace: Trace::new(clock),
            state: ReceiverState::Listen,
            stats: ReceiverStats::default(),
        }
    }

    /// Run the whole connection and write the received stream to `path`.
    pub async fn receive(mut self, path: &Path) -> Result<ReceiverStats, TransferError> {
        let mut file = File::create(path).await?;
        let result = self.receive_into(&mut file).await;
        // Socket and file are released on every exit path, including failure.
        file.flush().await.ok();
        result?;
        Ok(self.stats)
    }

    async fn receive_into(&mut self, file: &mut File) -> Result<(), TransferError> {
        let (peer, mut reassembly) = self.listen().await?;

        // Receiver's own sequence counter: the SYN-ACK consumed 0.
        let mut send_seq: u32 = 1;

        loop {
            let Some(pkt) = self.recv_from_peer(peer).await? else {
                continue;
            };
            let h = pkt.header;

            // Duplicate SYN: our SYN-ACK (or the completing ACK) was lost
            // while no data has arrived yet.  Re-answer with the original ISN
            // so the sender can finish its handshake.
            if h.syn && !h.ack_flag && reassembly.ack_number() == 1 {
                let syn_ack =
                    Packet::control(0, h.seq.wrapping_add(1), h.timestamp, true, false, true);
                self.send(&syn_ack, peer).await?;
                continue;
            }

            if pkt.len() > self.mtu {
                log::debug!("[rcv] dropping oversize payload ({} > {})", pkt.len(), self.mtu);
                continue;
            }

            if h.fin {
                // Acknowledged bytes must already be durable; flush before
                // the FIN+ACK promises anything.
                file.flush().await?;
                let fin_ack = Packet::control(
                    send_seq,
                    h.seq.wrapping_add(1),
                    h.timestamp,
                    false,
                    true,
                    true,
                );
                self.send(&fin_ack, peer).await?;
                send_seq = send_seq.wrapping_add(1);
                self.set_state(ReceiverState::Closed);
                self.linger(peer, &fin_ack).await?;
                return Ok(());
            }

            if pkt.payload.is_empty() {
                // Pure ACK (e.g. the handshake-completing one): no response.
                continue;
            }

            // In-order bytes are durable in the file before the ACK leaves;
            // a buffered or discarded segment re-ACKs the unchanged cursor
            // (the sender's duplicate-ACK detector keys on that).
            match reassembly.on_segment(h.seq, &pkt.payload) {
                SegmentDisposition::Deliver(bytes) => {
                    file.write_all(&bytes).await?;
                    self.stats.bytes_received += bytes.len() as u64;
                }
                SegmentDisposition::Buffered => {
                    self.stats.out_of_order += 1;
                    log::debug!(
                        "[rcv] out-of-order seq={} ({} buffered)",
                        h.seq,
                        reassembly.buffered_len()
                    );
                }
                SegmentDisposition::Discard => {
                    log::debug!("[rcv] dropping out-of-window seq={}", h.seq);
                }
            }
            let ack = Packet::control(0, reassembly.ack_number(), h.timestamp, false, false, true);
            self.send(&ack, peer).await?;
        }
    }

    /// Passive open: wait for a SYN (ACK clear), bind to its source, answer
    /// SYN-ACK.  Everything else is ignored while listening.
    async fn listen(&mut self) -> Result<(SocketAddr, Reassembly), TransferError> {
        loop {
            let (pkt, addr) = match self.socket.recv_from().await {
                Ok(v) => v,
                Err(SocketError::Packet(e)) => {
                    self.stats.checksum_errors += 1;
                    log::debug!("[rcv] undecodable datagram while listening: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.stats.packets_received += 1;
            self.trace.record(Direction::Receive, &pkt);

            if !(pkt.header.syn && !pkt.header.ack_flag) {
                continue;
            }

            log::info!("[rcv] SYN from {addr}");
            let syn_ack = Packet::control(
                0,
                pkt.header.seq.wrapping_add(1),
                pkt.header.timestamp,
                true,
                false,
                true,
            );
            self.send(&syn_ack, addr).await?;
            self.set_state(ReceiverState::Established);

            let window_bytes =
                u32::try_from(self.window.saturating_mul(self.mtu)).unwrap_or(u32::MAX);
            return Ok((addr, Reassembly::new(1, window_bytes)));
        }
    }

    /// Keep answering duplicate FINs until the sender's final ACK (or a
    /// timeout): a lost FIN+ACK would otherwise strand the sender in its
    /// retry loop.
    async fn linger(&mut self, peer: SocketAddr, fin_ack: &Packet) -> Result<(), TransferError> {
        let deadline = Instant::now() + FIN_LINGER;
        loop {
            let received = match timeout_at(deadline, self.socket.recv_from()).await {
                Err(_expired) => return Ok(()),
                Ok(v) => v,
            };
            match received {
                Ok((pkt, addr)) if addr == peer => {
                    self.stats.packets_received += 1;
                    self.trace.record(Direction::Receive, &pkt);
                    if pkt.header.fin {
                        self.send(fin_ack, peer).await?;
                    } else if pkt.header.ack_flag && pkt.payload.is_empty() {
                        return Ok(()); // the final ACK: teardown complete
                    }
                }
                Ok(_) => {}
                Err(SocketError::Packet(_)) => {
                    self.stats.checksum_errors += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Receive one datagram, counting and tracing packets from the bound
    /// peer.  Corrupted datagrams bump the checksum counter; foreign sources
    /// are ignored.
    async fn recv_from_peer(&mut self, peer: SocketAddr) -> Result<Option<Packet>, TransferError> {
        match self.socket.recv_from().await {
            Ok((pkt, addr)) if addr == peer => {
                self.stats.packets_received += 1;
                self.trace.record(Direction::Receive, &pkt);
                Ok(Some(pkt))
            }
            Ok((_, addr)) => {
                log::debug!("[rcv] ignoring datagram from foreign source {addr}");
                Ok(None)
            }
            Err(SocketError::Packet(e)) => {
                self.stats.checksum_errors += 1;
                log::debug!("[rcv] checksum/decode failure: {e}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn send(&mut self, pkt: &Packet, dest: SocketAddr) -> Result<(), TransferError> {
        self.socket.send_to(pkt, dest).await?;
        self.trace.record(Direction::Send, pkt);
        Ok(())
    }

    fn set_state(&mut self, next: ReceiverState) {
        log::debug!("[rcv] {} -> {next}", self.state);
        self.state = next;
    }
}
