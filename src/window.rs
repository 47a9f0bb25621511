//! Send-side sliding-window state machine.
//!
//! [`SendWindow`] maintains the unacknowledged-segment store and the window
//! cursors for one connection.
//!
//! # Protocol contract
//!
//! - At most `limit` segments may be in flight at once (the window is
//!   counted in packets; sequence numbers advance in payload bytes).
//! - ACKs are **cumulative**: `ack = K` means the peer has accepted all bytes
//!   up to (but not including) sequence number `K`, so one ACK may retire
//!   several segments.
//! - An ACK equal to the previous one is a **duplicate**; the third
//!   consecutive duplicate triggers fast retransmit in the engine.
//! - Sequence numbers are u32 and wrap around; comparisons use the
//!   convention that two values are "close" when their difference is less
//!   than `u32::MAX / 2`.
//!
//! This module only manages state; all socket I/O and timer scheduling is
//! the engine's responsibility.

use std::collections::BTreeMap;

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
///
/// The comparison works correctly as long as the two values are less than
/// `u32::MAX / 2` apart, which is always the case for a reasonable window.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// Strict `a < b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

/// A single in-flight segment occupying one slot in the window.
#[derive(Debug, Clone)]
pub struct InflightSegment {
    /// Payload bytes, kept for retransmission.
    pub payload: Vec<u8>,
    /// Monotonic nanoseconds of the first transmission; retransmissions
    /// carry this same value on the wire.
    pub timestamp: u64,
    /// Number of retransmissions so far (0 after the first send).
    pub retries: u32,
    /// Set once the segment has been retransmitted; RTT samples covering a
    /// retransmitted segment are discarded.
    pub retransmitted: bool,
}

/// What an incoming acknowledgement did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Equal to the previous ACK value; `count` is the running duplicate
    /// total since the last new ACK.
    Duplicate { count: u32 },
    /// A new cumulative ACK that retired `segments` segments.  `tainted` is
    /// set when any retired segment had been retransmitted, in which case
    /// the echoed timestamp must not produce an RTT sample.
    Advanced { segments: usize, tainted: bool },
    /// Behind the window or beyond anything sent; ignored.
    Stale,
}

/// Send-side window state for one connection.
///
/// ```text
///    base               next_seq
///      │                   │
///  ────┼───────────────────┼──────────────────▶ seq space (bytes)
///      │ ◀── in flight ──▶ │ ◀── sendable ──▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// Oldest unacknowledged byte index (left window edge).
    base: u32,
    /// Byte index to assign to the next new segment.
    next_seq: u32,
    /// Maximum number of segments in flight simultaneously.
    limit: usize,
    /// Last acknowledgement value received; seeded with the post-handshake
    /// `peer_next_seq` so the first real ACK is never counted as a duplicate.
    last_ack: u32,
    /// Consecutive duplicates of `last_ack`.
    dup_acks: u32,
    /// In-flight segments keyed by sequence number.
    unacked: BTreeMap<u32, InflightSegment>,
}

impl SendWindow {
    /// Create a window whose first data byte is `seq_start` (1 after the
    /// handshake: the SYN consumed sequence number 0).
    pub fn new(seq_start: u32, limit: usize) -> Self {
        assert!(limit >= 1, "window must admit at least one segment");
        Self {
            base: seq_start,
            next_seq: seq_start,
            limit,
            last_ack: seq_start,
            dup_acks: 0,
            unacked: BTreeMap::new(),
        }
    }

    /// `true` when there is room for at least one more in-flight segment.
    pub fn can_admit(&self) -> bool {
        self.unacked.len() < self.limit
    }

    /// Number of segments currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    /// Maximum number of segments in flight simultaneously.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// `true` when at least one segment is awaiting acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.unacked.is_empty()
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Install a segment in the unacked store and advance `next_seq` past
    /// its payload.  Returns the sequence number assigned to it.
    ///
    /// The entry must be installed before the datagram leaves, so an ACK
    /// racing the send always observes it.  Check [`can_admit`] first.
    ///
    /// [`can_admit`]: Self::can_admit
    pub fn admit(&mut self, payload: Vec<u8>, timestamp: u64) -> u32 {
        debug_assert!(
            self.can_admit(),
            "admit called on a full window ({} / {})",
            self.unacked.len(),
            self.limit
        );
        let seq = self.next_seq;
        let len = payload.len() as u32;
        self.unacked.insert(
            seq,
            InflightSegment {
                payload,
                timestamp,
                retries: 0,
                retransmitted: false,
            },
        );
        self.next_seq = self.next_seq.wrapping_add(len);
        seq
    }

    /// Process an incoming acknowledgement value.
    pub fn on_ack(&mut self, ack: u32) -> AckOutcome {
        if ack == self.last_ack {
            self.dup_acks += 1;
            return AckOutcome::Duplicate {
                count: self.dup_acks,
            };
        }
        if !seq_lt(self.last_ack, ack) || !seq_le(ack, self.next_seq) {
            return AckOutcome::Stale;
        }

        self.dup_acks = 0;
        self.last_ack = ack;

        let mut segments = 0usize;
        let mut tainted = false;
        while seq_lt(self.base, ack) {
            // Length-lookup first, then remove: the base advances by the
            // retired segment's payload length.
            let Some(entry) = self.unacked.get(&self.base) else {
                break;
            };
            let len = entry.payload.len() as u32;
            tainted |= entry.retransmitted;
            self.unacked.remove(&self.base);
            self.base = self.base.wrapping_add(len);
            segments += 1;
        }
        AckOutcome::Advanced { segments, tainted }
    }

    /// Clear the duplicate counter (after a fast retransmit has fired).
    pub fn reset_duplicates(&mut self) {
        self.dup_acks = 0;
    }

    /// Look up an in-flight segment by sequence number.
    pub fn segment(&self, seq: u32) -> Option<&InflightSegment> {
        self.unacked.get(&seq)
    }

    /// Mark a segment as retransmitted, bump its retry counter, and return a
    /// clone of its payload and its original timestamp for re-encoding.
    ///
    /// Returns `None` when the sequence has already been retired — the
    /// deadline that fired for it is stale and must be ignored.
    pub fn prepare_retransmit(&mut self, seq: u32) -> Option<(Vec<u8>, u64)> {
        let entry = self.unacked.get_mut(&seq)?;
        entry.retries += 1;
        entry.retransmitted = true;
        Some((entry.payload.clone(), entry.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let w = SendWindow::new(1, 4);
        assert_eq!(w.base(), 1);
        assert_eq!(w.next_seq(), 1);
        assert!(w.can_admit());
        assert!(!w.has_unacked());
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn admit_advances_next_seq() {
        let mut w = SendWindow::new(1, 4);
        let seq = w.admit(vec![0u8; 3], 0);
        assert_eq!(seq, 1);
        assert_eq!(w.next_seq(), 4);
        assert_eq!(w.base(), 1); // not acked yet
        assert!(w.has_unacked());
    }

    #[test]
    fn window_full_blocks_admission() {
        let mut w = SendWindow::new(1, 2);
        w.admit(vec![0u8; 5], 0);
        w.admit(vec![0u8; 5], 0);
        assert!(!w.can_admit());
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    fn ack_slides_window_by_one() {
        let mut w = SendWindow::new(1, 4);
        w.admit(vec![0u8; 10], 0);

        let outcome = w.on_ack(11);
        assert_eq!(
            outcome,
            AckOutcome::Advanced {
                segments: 1,
                tainted: false
            }
        );
        assert_eq!(w.base(), 11);
        assert!(!w.has_unacked());
    }

    #[test]
    fn cumulative_ack_retires_multiple_segments() {
        let mut w = SendWindow::new(1, 4);
        for _ in 0..3 {
            w.admit(vec![0u8; 5], 0);
        }
        assert_eq!(w.next_seq(), 16);

        let outcome = w.on_ack(16);
        assert_eq!(
            outcome,
            AckOutcome::Advanced {
                segments: 3,
                tainted: false
            }
        );
        assert_eq!(w.base(), 16);
        assert!(!w.has_unacked());
    }

    #[test]
    fn partial_cumulative_ack() {
        let mut w = SendWindow::new(1, 4);
        for _ in 0..3 {
            w.admit(vec![0u8; 5], 0);
        }
        let outcome = w.on_ack(11); // first two segments only
        assert_eq!(
            outcome,
            AckOutcome::Advanced {
                segments: 2,
                tainted: false
            }
        );
        assert_eq!(w.base(), 11);
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn duplicate_acks_count_up_to_fast_retransmit() {
        let mut w = SendWindow::new(1, 4);
        w.admit(vec![0u8; 5], 0);
        w.admit(vec![0u8; 5], 0);

        // The receiver keeps asking for seq 1: three duplicates.
        assert_eq!(w.on_ack(1), AckOutcome::Duplicate { count: 1 });
        assert_eq!(w.on_ack(1), AckOutcome::Duplicate { count: 2 });
        assert_eq!(w.on_ack(1), AckOutcome::Duplicate { count: 3 });
        w.reset_duplicates();
        assert_eq!(w.on_ack(1), AckOutcome::Duplicate { count: 1 });
    }

    #[test]
    fn new_ack_resets_duplicate_count() {
        let mut w = SendWindow::new(1, 4);
        w.admit(vec![0u8; 5], 0);
        w.admit(vec![0u8; 5], 0);

        w.on_ack(1);
        w.on_ack(1);
        let outcome = w.on_ack(6);
        assert!(matches!(outcome, AckOutcome::Advanced { segments: 1, .. }));
        // Counter starts over relative to the new value.
        assert_eq!(w.on_ack(6), AckOutcome::Duplicate { count: 1 });
    }

    #[test]
    fn spurious_ack_beyond_next_seq_ignored() {
        let mut w = SendWindow::new(1, 4);
        w.admit(vec![0u8; 5], 0);
        assert_eq!(w.on_ack(1000), AckOutcome::Stale);
        assert_eq!(w.base(), 1);
    }

    #[test]
    fn old_ack_behind_window_ignored() {
        let mut w = SendWindow::new(1, 4);
        w.admit(vec![0u8; 5], 0);
        w.on_ack(6);
        w.admit(vec![0u8; 5], 0);
        w.on_ack(11);
        // A reordered stale ACK for the old edge.
        assert_eq!(w.on_ack(6), AckOutcome::Stale);
        assert_eq!(w.base(), 11);
    }

    #[test]
    fn retransmit_marks_taint_and_counts_retries() {
        let mut w = SendWindow::new(1, 4);
        w.admit(vec![1, 2, 3], 77);

        let (payload, ts) = w.prepare_retransmit(1).expect("segment in flight");
        assert_eq!(payload, vec![1, 2, 3]);
        assert_eq!(ts, 77);
        assert_eq!(w.segment(1).unwrap().retries, 1);
        assert!(w.segment(1).unwrap().retransmitted);

        // The ACK covering a retransmitted segment is tainted (no RTT sample).
        assert_eq!(
            w.on_ack(4),
            AckOutcome::Advanced {
                segments: 1,
                tainted: true
            }
        );
    }

    #[test]
    fn stale_retransmit_after_retirement_is_none() {
        let mut w = SendWindow::new(1, 4);
        w.admit(vec![0u8; 8], 0);
        w.on_ack(9);
        assert!(w.prepare_retransmit(1).is_none());
    }

    #[test]
    fn sequence_wrap_around() {
        let start = u32::MAX - 5;
        let mut w = SendWindow::new(start, 4);
        w.admit(vec![0u8; 10], 0); // wraps past u32::MAX

        let ack = start.wrapping_add(10);
        assert!(matches!(w.on_ack(ack), AckOutcome::Advanced { segments: 1, .. }));
        assert_eq!(w.base(), ack);
    }
}
