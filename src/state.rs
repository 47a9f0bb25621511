//! Connection finite-state machine (FSM) types.
//!
//! This protocol is asymmetric — one endpoint only sends a file, the other
//! only receives it — so each side gets its own, much smaller, state
//! diagram instead of the full TCP one.  Transitions are driven by the
//! engines in [`crate::sender`] and [`crate::receiver`]; the types live here
//! so log lines and tests can name states without pulling in an engine.

use std::fmt;

/// States of the sending endpoint.
///
/// ```text
/// INIT ──SYN sent──▶ SYN_SENT ──SYN-ACK──▶ ESTABLISHED
///                                               │ all data ACKed, FIN sent
///                                               ▼
///                       CLOSED ◀──FIN+ACK── FIN_SENT
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Nothing sent yet; initial state.
    Init,
    /// SYN is on the wire; waiting for SYN-ACK.
    SynSent,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN is on the wire; waiting for FIN+ACK.
    FinSent,
    /// Final ACK sent, or the connection failed hard.
    Closed,
}

/// States of the receiving endpoint.
///
/// ```text
/// LISTEN ──SYN──▶ ESTABLISHED ──FIN──▶ CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Waiting for a SYN; everything else is ignored.
    Listen,
    /// Bound to one peer; writing the byte stream to the file.
    Established,
    /// FIN+ACK sent; the loop drains duplicate FINs and terminates.
    Closed,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
