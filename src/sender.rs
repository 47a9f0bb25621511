//! Sender engine: handshake, windowed data transfer, teardown.
//!
//! # Architecture
//!
//! ```text
//!  file ──▶ reader task ──chunks──▶ ┌───────────────────────────┐
//!                                   │        event loop         │
//!          deadline heap ──fires──▶ │  (owns all sender state)  │ ──▶ socket
//!          socket ──ACKs──────────▶ └───────────────────────────┘
//! ```
//!
//! All protocol state — the [`SendWindow`], the RTT estimator, the duplicate
//! ACK detector — is owned by a single `tokio::select!` event loop, so no
//! locking is needed.  A reader task streams the file into a bounded channel;
//! the loop admits a chunk only when the window has room.  Retransmission
//! deadlines live in a min-heap keyed by `(deadline, seq)`: one `sleep_until`
//! arm drains every due entry, and entries whose sequence has already been
//! retired are simply skipped.
//!
//! The handshake (SYN) and teardown (FIN) are bounded send/await-reply retry
//! loops sharing the same 16-attempt budget as data retransmission.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Duration, Instant};

use crate::packet::Packet;
use crate::socket::{Socket, SocketError};
use crate::state::SenderState;
use crate::timer::{Clock, RttEstimator};
use crate::trace::{Direction, SenderStats, Trace};
use crate::window::{AckOutcome, SendWindow};
use crate::TransferError;

/// Give up on a segment (or the SYN/FIN) after this many retransmissions.
pub const MAX_RETRIES: u32 = 16;

/// Fast retransmit fires on the third duplicate ACK.
const DUP_ACK_THRESHOLD: u32 = 3;

/// Placeholder deadline for an empty heap; the select arm is guarded off.
const FAR_FUTURE: Duration = Duration::from_secs(3600);

/// Sends one file to a receiving peer.
pub struct Sender {
    socket: Socket,
    peer: SocketAddr,
    mtu: usize,
    clock: Clock,
    trace: Trace,
    estimator: RttEstimator,
    state: SenderState,
    window: SendWindow,
    /// Next sequence expected from the peer, learned from the SYN-ACK.
    peer_next_seq: u32,
    stats: SenderStats,
}

impl Sender {
    /// `window` is the maximum number of in-flight data packets; `mtu` the
    /// maximum payload bytes per packet.
    pub fn new(socket: Socket, peer: SocketAddr, mtu: usize, window: usize) -> Self {
        let clock = Clock::start();
        Self {
            socket,
            peer,
            mtu,
            clock,
            trace: Trace::new(clock),
            estimator: RttEstimator::new(),
            state: SenderState::Init,
            window: SendWindow::new(1, window),
            peer_next_seq: 0,
            stats: SenderStats::default(),
        }
    }

    /// Run the whole connection: handshake, transfer `path`, teardown.
    ///
    /// Returns the accumulated counters on success.  On a hard failure the
    /// socket and reader are released and the error is propagated.
    pub async fn transfer(mut self, path: &Path) -> Result<SenderStats, TransferError> {
        self.connect().await?;
        self.stream_file(path).await?;
        self.shutdown().await?;
        Ok(self.stats)
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: SYN, await SYN-ACK, complete with an empty ACK.
    async fn connect(&mut self) -> Result<(), TransferError> {
        let syn = Packet::control(0, 0, self.clock.now_nanos(), true, false, false);
        self.set_state(SenderState::SynSent);

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                self.stats.retransmissions += 1;
            }
            self.send(&syn).await?;

            match timeout(self.estimator.rto(), self.await_syn_ack()).await {
                Ok(result) => {
                    let echoed = result?;
                    // The SYN-ACK echo is the first RTT sample, warming the
                    // estimator before the first data packet is at risk.  A
                    // retransmitted SYN taints the echo (Karn), so skip it.
                    if attempt == 0 {
                        let rto = self.estimator.observe(self.clock.since(echoed));
                        log::debug!("[snd] handshake rtt sample, rto={rto:?}");
                    }
                    // Complete the handshake; data bytes start at sequence 1.
                    let ack = Packet::control(
                        1,
                        self.peer_next_seq,
                        self.clock.now_nanos(),
                        false,
                        false,
                        true,
                    );
                    self.send(&ack).await?;
                    self.set_state(SenderState::Established);
                    return Ok(());
                }
                Err(_elapsed) => {
                    log::warn!("[snd] SYN unanswered (attempt {})", attempt + 1);
                }
            }
        }
        Err(TransferError::HandshakeFailed(MAX_RETRIES))
    }

    /// Block until a SYN-ACK arrives from the peer; returns its echoed
    /// timestamp.
    async fn await_syn_ack(&mut self) -> Result<u64, TransferError> {
        loop {
            let Some(pkt) = self.recv().await? else {
                continue;
            };
            if pkt.header.syn && pkt.header.ack_flag {
                self.peer_next_seq = pkt.header.seq.wrapping_add(1);
                log::debug!("[snd] SYN-ACK: peer_next_seq={}", self.peer_next_seq);
                return Ok(pkt.header.timestamp);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Stream the file through the sliding window until every byte is
    /// acknowledged.
    async fn stream_file(&mut self, path: &Path) -> Result<(), TransferError> {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(self.window.limit());
        let reader = tokio::spawn(read_chunks(path.to_owned(), self.mtu, chunk_tx));

        // Min-heap of (deadline, seq); stale entries are skipped when fired.
        let mut deadlines: BinaryHeap<Reverse<(Instant, u32)>> = BinaryHeap::new();
        let mut drained = false;

        let result = loop {
            if drained && !self.window.has_unacked() {
                break Ok(());
            }

            let next_deadline = deadlines.peek().map(|Reverse((at, _))| *at);

            tokio::select! {
                maybe_chunk = chunk_rx.recv(), if !drained && self.window.can_admit() => {
                    match maybe_chunk {
                        None => drained = true,
                        Some(chunk) => {
                            if let Err(e) = self.send_chunk(chunk, &mut deadlines).await {
                                break Err(e);
                            }
                        }
                    }
                }

                received = self.socket.recv_from() => {
                    match received {
                        Ok((pkt, addr)) if addr == self.peer => {
                            self.trace.record(Direction::Receive, &pkt);
                            if let Err(e) = self.on_packet(pkt, &mut deadlines).await {
                                break Err(e);
                            }
                        }
                        Ok(_) => {} // foreign source: ignore
                        Err(SocketError::Packet(e)) => {
                            log::debug!("[snd] dropping undecodable datagram: {e}");
                        }
                        Err(e) => break Err(e.into()),
                    }
                }

                _ = sleep_until(next_deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE)),
                    if next_deadline.is_some() =>
                {
                    if let Err(e) = self.fire_deadlines(&mut deadlines).await {
                        break Err(e);
                    }
                }
            }
        };

        // Closing the channel unblocks a reader stuck on a full queue (the
        // hard-failure path); it then ends on its own.  Surface any file
        // I/O error it hit.
        drop(chunk_rx);
        match reader.await {
            Ok(read_result) => read_result?,
            Err(join_err) => return Err(std::io::Error::other(join_err).into()),
        }
        result
    }

    /// Admit one chunk into the window and put it on the wire.
    ///
    /// The unacked entry is installed *before* the datagram leaves, so ACK
    /// processing for this sequence always observes the send.
    async fn send_chunk(
        &mut self,
        chunk: Vec<u8>,
        deadlines: &mut BinaryHeap<Reverse<(Instant, u32)>>,
    ) -> Result<(), TransferError> {
        let ts = self.clock.now_nanos();
        let seq = self.window.admit(chunk.clone(), ts);
        let pkt = Packet::data(seq, self.peer_next_seq, ts, chunk);
        self.send(&pkt).await?;
        deadlines.push(Reverse((Instant::now() + self.estimator.rto(), seq)));
        log::debug!(
            "[snd] DATA seq={seq} len={} in_flight={}",
            pkt.len(),
            self.window.in_flight()
        );
        Ok(())
    }

    /// Dispatch one inbound packet during the data phase.
    async fn on_packet(
        &mut self,
        pkt: Packet,
        deadlines: &mut BinaryHeap<Reverse<(Instant, u32)>>,
    ) -> Result<(), TransferError> {
        let h = pkt.header;

        // A retransmitted SYN-ACK means our completing ACK was lost; the
        // receiver is established regardless, and the stale ack value must
        // not feed the duplicate detector.
        if h.syn {
            return Ok(());
        }
        // A FIN+ACK belongs to teardown; nothing to do mid-transfer.
        if h.fin {
            return Ok(());
        }
        if !h.ack_flag {
            return Ok(());
        }

        match self.window.on_ack(h.ack) {
            AckOutcome::Duplicate { count } => {
                self.stats.duplicate_acks += 1;
                log::debug!("[snd] dup ACK {} (#{count})", h.ack);
                if count >= DUP_ACK_THRESHOLD {
                    self.fast_retransmit(h.ack, deadlines).await?;
                    self.window.reset_duplicates();
                }
            }
            AckOutcome::Advanced { segments, tainted } => {
                log::debug!(
                    "[snd] ACK {} retired {segments} segment(s), base={}",
                    h.ack,
                    self.window.base()
                );
                // Karn: a sample covering any retransmitted segment lies.
                if !tainted {
                    self.estimator.observe(self.clock.since(h.timestamp));
                }
            }
            AckOutcome::Stale => {}
        }
        Ok(())
    }

    /// Resend the segment the peer keeps asking for, without waiting for its
    /// timer.  The RTO is left untouched.
    async fn fast_retransmit(
        &mut self,
        seq: u32,
        deadlines: &mut BinaryHeap<Reverse<(Instant, u32)>>,
    ) -> Result<(), TransferError> {
        let Some((payload, ts)) = self.window.prepare_retransmit(seq) else {
            return Ok(()); // already retired by a cumulative ACK in flight
        };
        log::debug!("[snd] fast retransmit seq={seq}");
        let pkt = Packet::data(seq, self.peer_next_seq, ts, payload);
        self.send(&pkt).await?;
        self.stats.retransmissions += 1;
        deadlines.push(Reverse((Instant::now() + self.estimator.rto(), seq)));
        Ok(())
    }

    /// Drain every due deadline: skip retired sequences, fail the connection
    /// on retry exhaustion, otherwise retransmit and rearm.
    async fn fire_deadlines(
        &mut self,
        deadlines: &mut BinaryHeap<Reverse<(Instant, u32)>>,
    ) -> Result<(), TransferError> {
        let now = Instant::now();
        while let Some(&Reverse((at, seq))) = deadlines.peek() {
            if at > now {
                break;
            }
            deadlines.pop();

            let Some(retries) = self.window.segment(seq).map(|s| s.retries) else {
                continue; // retired since this deadline was armed
            };
            if retries >= MAX_RETRIES {
                log::error!(
                    "[snd] seq {seq} unacknowledged after {retries} retransmissions; giving up"
                );
                self.set_state(SenderState::Closed);
                return Err(TransferError::RetriesExhausted { seq, retries });
            }

            if let Some((payload, ts)) = self.window.prepare_retransmit(seq) {
                log::debug!("[snd] timeout, retransmit seq={seq}");
                let pkt = Packet::data(seq, self.peer_next_seq, ts, payload);
                self.send(&pkt).await?;
                self.stats.retransmissions += 1;
                deadlines.push(Reverse((now + self.estimator.rto(), seq)));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// All data is acknowledged: send FIN, await FIN+ACK, answer with the
    /// final ACK.
    async fn shutdown(&mut self) -> Result<(), TransferError> {
        let fin_seq = self.window.next_seq();
        let fin = Packet::control(
            fin_seq,
            self.peer_next_seq,
            self.clock.now_nanos(),
            false,
            true,
            false,
        );
        self.set_state(SenderState::FinSent);

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                self.stats.retransmissions += 1;
            }
            self.send(&fin).await?;

            match timeout(self.estimator.rto(), self.await_fin_ack()).await {
                Ok(result) => {
                    let peer_fin_seq = result?;
                    let last = Packet::control(
                        fin_seq.wrapping_add(1),
                        peer_fin_seq.wrapping_add(1),
                        self.clock.now_nanos(),
                        false,
                        false,
                        true,
                    );
                    self.send(&last).await?;
                    self.set_state(SenderState::Closed);
                    return Ok(());
                }
                Err(_elapsed) => {
                    log::warn!("[snd] FIN unanswered (attempt {})", attempt + 1);
                }
            }
        }
        self.set_state(SenderState::Closed);
        Err(TransferError::RetriesExhausted {
            seq: fin_seq,
            retries: MAX_RETRIES,
        })
    }

    /// Block until the peer's FIN+ACK arrives; returns the peer's FIN
    /// sequence number.
    async fn await_fin_ack(&mut self) -> Result<u32, TransferError> {
        loop {
            let Some(pkt) = self.recv().await? else {
                continue;
            };
            if pkt.header.fin && pkt.header.ack_flag {
                return Ok(pkt.header.seq);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    /// Send one packet to the peer, tracing it and bumping the counters.
    async fn send(&mut self, pkt: &Packet) -> Result<(), TransferError> {
        self.socket.send_to(pkt, self.peer).await?;
        self.trace.record(Direction::Send, pkt);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += pkt.len() as u64;
        Ok(())
    }

    /// Receive one datagram from the peer.  Corrupted datagrams and foreign
    /// sources yield `Ok(None)`; transport errors propagate.
    async fn recv(&mut self) -> Result<Option<Packet>, TransferError> {
        match self.socket.recv_from().await {
            Ok((pkt, addr)) if addr == self.peer => {
                self.trace.record(Direction::Receive, &pkt);
                Ok(Some(pkt))
            }
            Ok(_) => Ok(None),
            Err(SocketError::Packet(e)) => {
                log::debug!("[snd] dropping undecodable datagram: {e}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_state(&mut self, next: SenderState) {
        log::debug!("[snd] {} -> {next}", self.state);
        self.state = next;
    }
}

/// Reader task: stream the file into the chunk channel in `mtu`-byte slices.
async fn read_chunks(
    path: PathBuf,
    mtu: usize,
    chunks: mpsc::Sender<Vec<u8>>,
) -> std::io::Result<()> {
    let mut file = File::open(&path).await?;
    let mut buf = vec![0u8; mtu];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if chunks.send(buf[..n].to_vec()).await.is_err() {
            // Engine bailed out; stop reading.
            return Ok(());
        }
    }
}
