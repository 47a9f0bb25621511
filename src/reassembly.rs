//! Receive-side reassembly state machine.
//!
//! [`Reassembly`] tracks the next in-order byte index (`expected_seq`) and a
//! buffer of out-of-order segments waiting for the gap in front of them to
//! fill:
//!
//! - An **in-order** segment (seq == `expected_seq`) is delivered at once,
//!   together with any buffered segments it unblocks; the caller answers
//!   with a **cumulative ACK** for the new `expected_seq`.
//! - An **in-window but ahead** segment is buffered, and the caller answers
//!   with a **duplicate ACK** for the unchanged `expected_seq`.
//! - Anything behind the cursor or at/past the window's far edge is
//!   discarded, again answered with a cumulative ACK.
//!
//! The acceptance window spans `window · mtu` bytes ahead of the cursor.
//! This module only manages state; socket and file I/O belong to the engine.

use std::collections::BTreeMap;

/// What to do with an inbound segment, and which ACK flavour to answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentDisposition {
    /// In-order: these bytes (the segment plus any drained buffer entries)
    /// go to the output file, then a cumulative ACK is emitted.
    Deliver(Vec<u8>),
    /// In-window but ahead of the cursor: buffered; answer with a duplicate
    /// ACK for the current `expected_seq`.
    Buffered,
    /// Behind the cursor or outside the window: payload dropped; answer with
    /// a cumulative ACK for the current `expected_seq`.
    Discard,
}

/// Receive-side reassembly state for one connection.
#[derive(Debug)]
pub struct Reassembly {
    /// Next in-order byte index (the cumulative ACK value).
    expected_seq: u32,
    /// Acceptance window in bytes ahead of `expected_seq`.
    window_bytes: u32,
    /// Out-of-order segments keyed by sequence number.
    buffered: BTreeMap<u32, Vec<u8>>,
}

impl Reassembly {
    /// `expected_seq` starts at 1 after the handshake (the SYN consumed
    /// sequence number 0).  `window_bytes` is `window · mtu`.
    pub fn new(expected_seq: u32, window_bytes: u32) -> Self {
        Self {
            expected_seq,
            window_bytes,
            buffered: BTreeMap::new(),
        }
    }

    /// Cumulative ACK value to place in the next outbound packet.
    pub fn ack_number(&self) -> u32 {
        self.expected_seq
    }

    /// Number of out-of-order segments currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Process an inbound data segment.
    ///
    /// A duplicate copy of an already-consumed head-of-line segment lands in
    /// the discard arm: its sequence is behind the cursor by the time the
    /// copy arrives, so it is out-of-window by definition.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> SegmentDisposition {
        // Wrapping distance from the cursor; anything behind the cursor
        // wraps around to a huge offset and fails the same bound.
        let offset = seq.wrapping_sub(self.expected_seq);
        if offset >= self.window_bytes {
            return SegmentDisposition::Discard;
        }

        if offset != 0 {
            self.buffered.insert(seq, payload.to_vec());
            return SegmentDisposition::Buffered;
        }

        // Head of line: deliver it and drain every buffered segment that is
        // now contiguous with the advancing cursor.
        let mut out = payload.to_vec();
        self.expected_seq = self.expected_seq.wrapping_add(payload.len() as u32);
        while let Some(chunk) = self.buffered.remove(&self.expected_seq) {
            self.expected_seq = self.expected_seq.wrapping_add(chunk.len() as u32);
            out.extend_from_slice(&chunk);
        }
        SegmentDisposition::Deliver(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembly() -> Reassembly {
        // window 16 × mtu 64 = 1 KiB acceptance window.
        Reassembly::new(1, 16 * 64)
    }

    #[test]
    fn initial_state() {
        let r = reassembly();
        assert_eq!(r.ack_number(), 1);
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn in_order_segment_delivered() {
        let mut r = reassembly();
        let d = r.on_segment(1, b"hello");
        assert_eq!(d, SegmentDisposition::Deliver(b"hello".to_vec()));
        assert_eq!(r.ack_number(), 6);
    }

    #[test]
    fn ahead_segment_buffered_until_gap_fills() {
        let mut r = reassembly();
        // seq 6 arrives first: bytes 1..=5 are missing.
        assert_eq!(r.on_segment(6, b"world"), SegmentDisposition::Buffered);
        assert_eq!(r.ack_number(), 1, "cursor must not advance past a gap");
        assert_eq!(r.buffered_len(), 1);

        // The gap fills: both segments come out in one delivery.
        let d = r.on_segment(1, b"hello");
        assert_eq!(d, SegmentDisposition::Deliver(b"helloworld".to_vec()));
        assert_eq!(r.ack_number(), 11);
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn drain_consumes_a_run_of_buffered_segments() {
        let mut r = reassembly();
        assert_eq!(r.on_segment(4, b"def"), SegmentDisposition::Buffered);
        assert_eq!(r.on_segment(7, b"ghi"), SegmentDisposition::Buffered);
        assert_eq!(r.on_segment(10, b"jk"), SegmentDisposition::Buffered);

        let d = r.on_segment(1, b"abc");
        assert_eq!(d, SegmentDisposition::Deliver(b"abcdefghijk".to_vec()));
        assert_eq!(r.ack_number(), 12);
    }

    #[test]
    fn duplicate_of_consumed_segment_discarded() {
        let mut r = reassembly();
        r.on_segment(1, b"hello");
        // The retransmitted copy arrives after the original was consumed.
        assert_eq!(r.on_segment(1, b"hello"), SegmentDisposition::Discard);
        assert_eq!(r.ack_number(), 6);
    }

    #[test]
    fn segment_at_window_edge_discarded() {
        let mut r = Reassembly::new(1, 128);
        assert_eq!(r.on_segment(129, b"far"), SegmentDisposition::Discard);
        assert_eq!(r.on_segment(128, b"edge"), SegmentDisposition::Buffered);
    }

    #[test]
    fn behind_cursor_discarded() {
        let mut r = reassembly();
        r.on_segment(1, b"0123456789");
        assert_eq!(r.on_segment(5, b"456"), SegmentDisposition::Discard);
        assert_eq!(r.ack_number(), 11);
    }

    #[test]
    fn duplicate_buffered_segment_overwrites_in_place() {
        let mut r = reassembly();
        assert_eq!(r.on_segment(6, b"world"), SegmentDisposition::Buffered);
        assert_eq!(r.on_segment(6, b"world"), SegmentDisposition::Buffered);
        assert_eq!(r.buffered_len(), 1);

        let d = r.on_segment(1, b"hello");
        assert_eq!(d, SegmentDisposition::Deliver(b"helloworld".to_vec()));
    }

    #[test]
    fn sequence_wrap_around() {
        let start = u32::MAX - 2;
        let mut r = Reassembly::new(start, 1024);
        // A 5-byte payload carries the cursor past u32::MAX.
        let d = r.on_segment(start, b"abcde");
        assert_eq!(d, SegmentDisposition::Deliver(b"abcde".to_vec()));
        assert_eq!(r.ack_number(), start.wrapping_add(5));
    }
}
