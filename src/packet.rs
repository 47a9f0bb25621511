//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed, truncated, or corrupted input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # On-wire layout (all fields big-endian)
//!
//! ```text
//!  0        4        8                16           20      22      24
//!  ├─ seq ──┼─ ack ──┼── timestamp ───┼─ len+flags ┼─ rsvd ┼─ cksum ┼─ payload…
//!  │  u32   │  u32   │      u64       │    u32     │  u16  │  u16   │
//! ```
//!
//! The upper 29 bits of `len+flags` hold the payload length; bits 2, 1, 0
//! are SYN, FIN, ACK.  The checksum is the 16-bit one's-complement sum over
//! the entire datagram with the checksum field zeroed.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 24;

/// Byte offset of the checksum field within the header.
const CHECKSUM_OFFSET: usize = 22;

/// Bit positions within the low three bits of the `len+flags` word.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u32 = 0b100;
    /// Finish — sender has no more data to send.
    pub const FIN: u32 = 0b010;
    /// Acknowledgement field is valid.
    pub const ACK: u32 = 0b001;
}

/// Fixed-size protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Byte index of the first payload byte, or the connection-control
    /// sequence for SYN/FIN.
    pub seq: u32,
    /// Next byte the sender of this packet expects to receive.
    pub ack: u32,
    /// Monotonic nanoseconds sampled when the original sender first emitted
    /// this packet; echoed unchanged by the ACK.
    pub timestamp: u64,
    pub syn: bool,
    pub fin: bool,
    pub ack_flag: bool,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a payload-bearing data segment.  Data segments always piggyback
    /// the current cumulative ACK, so the ACK flag is set.
    pub fn data(seq: u32, ack: u32, timestamp: u64, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                timestamp,
                syn: false,
                fin: false,
                ack_flag: true,
            },
            payload,
        }
    }

    /// Build an empty control segment with the given flag bits.
    pub fn control(seq: u32, ack: u32, timestamp: u64, syn: bool, fin: bool, ack_flag: bool) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                timestamp,
                syn,
                fin,
                ack_flag,
            },
            payload: Vec::new(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The checksum field is written as zero first, then patched with the
    /// one's-complement sum over the whole buffer.
    pub fn encode(&self) -> Vec<u8> {
        let h = &self.header;
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());

        buf.put_u32(h.seq);
        buf.put_u32(h.ack);
        buf.put_u64(h.timestamp);

        let len_and_flags = ((self.payload.len() as u32) << 3)
            | if h.syn { flags::SYN } else { 0 }
            | if h.fin { flags::FIN } else { 0 }
            | if h.ack_flag { flags::ACK } else { 0 };
        buf.put_u32(len_and_flags);

        buf.put_u16(0); // reserved
        buf.put_u16(0); // checksum placeholder
        buf.extend_from_slice(&self.payload);

        let sum = checksum(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice, verifying the checksum.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let mut rd = buf;
        let seq = rd.get_u32();
        let ack = rd.get_u32();
        let timestamp = rd.get_u64();
        let len_and_flags = rd.get_u32();
        let _reserved = rd.get_u16();
        let wire_checksum = rd.get_u16();

        let payload_len = (len_and_flags >> 3) as usize;
        let syn = len_and_flags & flags::SYN != 0;
        let fin = len_and_flags & flags::FIN != 0;
        let ack_flag = len_and_flags & flags::ACK != 0;

        if rd.remaining() < payload_len {
            return Err(PacketError::LengthMismatch {
                declared: payload_len,
                actual: rd.remaining(),
            });
        }
        let payload = rd[..payload_len].to_vec();

        // Recompute over a copy with the checksum field zeroed.
        let mut verify = buf[..HEADER_LEN + payload_len].to_vec();
        verify[CHECKSUM_OFFSET] = 0;
        verify[CHECKSUM_OFFSET + 1] = 0;
        let computed = checksum(&verify);
        if computed != wire_checksum {
            return Err(PacketError::ChecksumMismatch {
                expected: wire_checksum,
                computed,
            });
        }

        Ok(Self {
            header: Header {
                seq,
                ack,
                timestamp,
                syn,
                fin,
                ack_flag,
            },
            payload,
        })
    }
}

/// 16-bit one's-complement sum with end-around carry.
///
/// Bytes are consumed as big-endian 16-bit words; an odd trailing byte is
/// treated as the high half of a final word.  Returns the bitwise complement
/// of the low 16 bits.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
        if sum & 0xFFFF_0000 != 0 {
            sum = (sum & 0xFFFF) + 1;
        }
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
        if sum & 0xFFFF_0000 != 0 {
            sum = (sum & 0xFFFF) + 1;
        }
    }
    !(sum as u16)
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    BufferTooShort(usize),
    /// The length field does not match the actual remaining bytes.
    #[error("header declares {declared} payload bytes but {actual} are present")]
    LengthMismatch { declared: usize, actual: usize },
    /// Checksum did not match the recomputed value.
    #[error("checksum mismatch: wire {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { expected: u16, computed: u16 },
}
