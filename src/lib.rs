//! `udp-file-transfer` — reliable, in-order file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  DATA segments   ┌──────────┐
//!  │  Sender  │─────────────────▶│ Receiver │──▶ output file
//!  └────┬─────┘                  └─────┬────┘
//!       │        cumulative ACKs       │
//!       │◀──────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │            Socket                 │  (thin async wrapper around
//!  └────┬──────────────────────────────┘   tokio UdpSocket)
//!       │ raw UDP datagrams
//! ```
//!
//! One endpoint sends a single file, the other writes it out byte-exact.  A
//! three-way handshake opens the connection, a sliding window of in-flight
//! packets with adaptive retransmission timeouts and fast retransmit keeps
//! data flowing over loss and reordering, and a FIN exchange tears the
//! connection down symmetrically.
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (24-byte header, checksum)
//! - [`timer`]      — monotonic clock and RTT/RTO estimation
//! - [`socket`]     — async UDP socket abstraction
//! - [`window`]     — sender-side sliding window and unacked store
//! - [`reassembly`] — receiver-side out-of-order buffer
//! - [`sender`]     — sending engine (handshake, event loop, teardown)
//! - [`receiver`]   — receiving engine (reassembly, file writer)
//! - [`state`]      — finite-state-machine types
//! - [`trace`]      — per-packet event lines and statistics
//! - [`simulator`]  — lossy/reordering relay for testing

use thiserror::Error;

pub mod packet;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod trace;
pub mod window;

pub use receiver::Receiver;
pub use sender::Sender;
pub use socket::Socket;
pub use trace::{ReceiverStats, SenderStats};

/// Errors that can terminate a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Transport I/O failure (bind, send, or receive).
    #[error("transport error: {0}")]
    Socket(#[from] socket::SocketError),
    /// File I/O failure; fatal after the socket is released.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No SYN-ACK after the full retry budget.
    #[error("handshake failed: no SYN-ACK after {0} attempts")]
    HandshakeFailed(u32),
    /// One sequence number exhausted its retransmission budget.
    #[error("sequence {seq} unacknowledged after {retries} retransmissions")]
    RetriesExhausted { seq: u32, retries: u32 },
}
