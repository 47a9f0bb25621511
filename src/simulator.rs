//! Fault-injecting network relay for deterministic testing.
//!
//! Real networks drop, reorder, and corrupt packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides a [`Relay`] that sits between the two endpoints and
//! forwards raw datagrams, applying a configurable fault model:
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`       |
//! |                  | (both directions).                                 |
//! | Reordering       | Swap every adjacent pair of data packets headed    |
//! |                  | for the receiver.                                  |
//! | Corruption       | Flip one payload bit in the Nth data packet.       |
//! | Targeted drop    | Drop copies of one specific sequence number.       |
//!
//! The sender is pointed at the relay's local address instead of the
//! receiver; the relay learns the sender's address from the first datagram
//! it sees and shuttles replies back.  All randomness comes from a seeded
//! RNG so failures are reproducible.

use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::packet::{Packet, HEADER_LEN};

/// How many copies of [`RelayConfig::drop_seq`] to swallow.
#[derive(Debug, Clone, Copy)]
pub enum DropCopies {
    /// Drop only the first `n` copies; retransmissions get through.
    First(u32),
    /// Drop every copy, forever.
    All,
}

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.  The default is a
/// transparent pass-through.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Swap every adjacent pair of payload-bearing packets headed to the
    /// receiver.  Control packets flush a held packet first, so a FIN can
    /// never overtake data.
    pub swap_adjacent_data: bool,
    /// Flip one payload bit in the Nth (1-based) data packet.
    pub corrupt_nth_data: Option<u64>,
    /// Drop data packets carrying this sequence number.
    pub drop_seq: Option<(u32, DropCopies)>,
    /// Seed for the relay's RNG.
    pub seed: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            swap_adjacent_data: false,
            corrupt_nth_data: None,
            drop_seq: None,
            seed: 0,
        }
    }
}

/// A fault-injecting datagram relay between one sender and one receiver.
pub struct Relay {
    socket: UdpSocket,
    upstream: SocketAddr,
    config: RelayConfig,
}

impl Relay {
    /// Bind a relay on an ephemeral loopback port, forwarding to `upstream`
    /// (the receiver's address).
    pub async fn bind(upstream: SocketAddr, config: RelayConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        Ok(Self {
            socket,
            upstream,
            config,
        })
    }

    /// The address the sender should treat as its peer.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the relay on a background task until it is aborted or its socket
    /// errors out.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut downstream: Option<SocketAddr> = None;
        // One data packet held back while pair-swapping.
        let mut held: Option<Vec<u8>> = None;
        let mut data_seen: u64 = 0;
        let mut corrupted = false;
        let mut dropped_copies: u32 = 0;
        let mut buf = vec![0u8; 65_535];

        loop {
            let (n, from) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => return,
            };
            let mut datagram = buf[..n].to_vec();

            // Receiver → sender: only uniform loss applies.
            if from == self.upstream {
                if rng.random::<f64>() < self.config.loss_rate {
                    log::trace!("[relay] dropping {n}-byte reply");
                    continue;
                }
                if let Some(down) = downstream {
                    let _ = self.socket.send_to(&datagram, down).await;
                }
                continue;
            }

            // Sender → receiver.
            downstream = Some(from);
            if rng.random::<f64>() < self.config.loss_rate {
                log::trace!("[relay] dropping {n}-byte datagram");
                continue;
            }

            let is_data = matches!(Packet::decode(&datagram), Ok(p) if !p.payload.is_empty());
            if !is_data {
                // Control (or undecodable) packet: release any held data
                // first so ordering faults never leak past a FIN.
                if let Some(first) = held.take() {
                    let _ = self.socket.send_to(&first, self.upstream).await;
                }
                let _ = self.socket.send_to(&datagram, self.upstream).await;
                continue;
            }

            data_seen += 1;

            if let Some((seq, copies)) = self.config.drop_seq {
                if wire_seq(&datagram) == seq {
                    let drop = match copies {
                        DropCopies::All => true,
                        DropCopies::First(k) => dropped_copies < k,
                    };
                    if drop {
                        dropped_copies += 1;
                        log::trace!("[relay] swallowing copy {dropped_copies} of seq {seq}");
                        continue;
                    }
                }
            }

            if !corrupted && self.config.corrupt_nth_data == Some(data_seen) {
                datagram[HEADER_LEN] ^= 0x01;
                corrupted = true;
                log::trace!("[relay] corrupting data packet #{data_seen}");
            }

            if self.config.swap_adjacent_data {
                match held.take() {
                    None => held = Some(datagram),
                    Some(first) => {
                        // Deliver the pair in reverse order.
                        let _ = self.socket.send_to(&datagram, self.upstream).await;
                        let _ = self.socket.send_to(&first, self.upstream).await;
                    }
                }
                continue;
            }

            let _ = self.socket.send_to(&datagram, self.upstream).await;
        }
    }
}

/// Sequence field straight off the wire, without a full decode.
fn wire_seq(datagram: &[u8]) -> u32 {
    u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_passthrough() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.loss_rate, 0.0);
        assert!(!cfg.swap_adjacent_data);
        assert!(cfg.corrupt_nth_data.is_none());
        assert!(cfg.drop_seq.is_none());
    }

    #[test]
    fn wire_seq_reads_header_prefix() {
        let pkt = Packet::data(0x0102_0304, 0, 0, vec![9]);
        assert_eq!(wire_seq(&pkt.encode()), 0x0102_0304);
    }
}
