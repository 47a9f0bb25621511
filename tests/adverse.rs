//! End-to-end transfers through the fault-injecting relay.
//!
//! The sender is pointed at a [`Relay`] instead of the receiver, so loss,
//! reordering, corruption, and targeted drops can be injected between the
//! endpoints while both run as ordinary tokio tasks on loopback.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rand::RngCore;
use tokio::time::timeout;
use udp_file_transfer::simulator::{DropCopies, Relay, RelayConfig};
use udp_file_transfer::{Receiver, ReceiverStats, Sender, SenderStats, Socket, TransferError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

fn scratch(tag: &str, suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("uft-adv-{tag}-{}.{suffix}", std::process::id()))
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill_bytes(&mut data);
    data
}

/// Run a transfer with the given relay fault model in the path.
async fn run_through_relay(
    tag: &str,
    payload: &[u8],
    mtu: usize,
    window: usize,
    config: RelayConfig,
) -> (SenderStats, ReceiverStats, Vec<u8>) {
    let input = scratch(tag, "in");
    let output = scratch(tag, "out");
    std::fs::write(&input, payload).expect("write input file");

    let recv_socket = ephemeral().await;
    let recv_addr = recv_socket.local_addr;
    let out = output.clone();
    let receiver =
        tokio::spawn(async move { Receiver::new(recv_socket, mtu, window).receive(&out).await });

    let relay = Relay::bind(recv_addr, config).await.expect("bind relay");
    let relay_addr = relay.local_addr().expect("relay addr");
    let relay_task = relay.spawn();

    let send_socket = ephemeral().await;
    let inp = input.clone();
    let sender = tokio::spawn(async move {
        Sender::new(send_socket, relay_addr, mtu, window)
            .transfer(&inp)
            .await
    });

    let (recv_res, send_res) = timeout(Duration::from_secs(120), async {
        tokio::join!(receiver, sender)
    })
    .await
    .expect("transfer timed out");
    relay_task.abort();

    let receiver_stats = recv_res.expect("receiver panicked").expect("receiver failed");
    let sender_stats = send_res.expect("sender panicked").expect("sender failed");
    let written = std::fs::read(&output).expect("read output file");

    std::fs::remove_file(&input).ok();
    std::fs::remove_file(&output).ok();
    (sender_stats, receiver_stats, written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// 10% uniform loss in both directions: the transfer completes byte-exact,
/// with retransmissions doing the repair work.
#[tokio::test]
async fn uniform_loss_recovers() {
    let payload = random_bytes(100 * 1024);
    let config = RelayConfig {
        loss_rate: 0.1,
        seed: 7,
        ..RelayConfig::default()
    };

    let (snd, rcv, written) = run_through_relay("loss", &payload, 1500, 8, config).await;

    assert_eq!(written, payload, "output differs from input");
    assert!(snd.retransmissions > 0, "loss must force retransmissions");
    assert_eq!(rcv.bytes_received, payload.len() as u64);
}

/// Every adjacent pair of data packets swapped in transit: the reassembly
/// buffer reorders them, one out-of-order packet and one duplicate ACK per
/// pair, and nothing ever needs to be retransmitted.
#[tokio::test]
async fn adjacent_reordering_is_reassembled() {
    const SIZE: usize = 20 * 1024; // exactly 40 packets of 512
    let payload = random_bytes(SIZE);
    let config = RelayConfig {
        swap_adjacent_data: true,
        ..RelayConfig::default()
    };

    let (snd, rcv, written) = run_through_relay("swap", &payload, 512, 16, config).await;

    assert_eq!(written, payload);
    assert_eq!(rcv.out_of_order, 20, "one buffered packet per swapped pair");
    assert_eq!(snd.duplicate_acks, 20, "one duplicate ACK per swapped pair");
    assert_eq!(snd.retransmissions, 0);
}

/// Dropping a single data packet while the following four get through makes
/// the sender repair via fast retransmit (third duplicate ACK), well before
/// the retransmission timer would fire.
#[tokio::test]
async fn fast_retransmit_on_third_duplicate_ack() {
    let payload = random_bytes(8 * 512);
    // The third data packet starts at byte 1 + 2·512.
    let dropped_seq = 1 + 2 * 512;
    let config = RelayConfig {
        drop_seq: Some((dropped_seq, DropCopies::First(1))),
        ..RelayConfig::default()
    };

    let (snd, rcv, written) = run_through_relay("fastrtx", &payload, 512, 8, config).await;

    assert_eq!(written, payload);
    assert!(snd.duplicate_acks >= 3, "expected a duplicate-ACK burst");
    assert_eq!(snd.retransmissions, 1, "exactly one repair, via fast retransmit");
    assert_eq!(rcv.out_of_order, 5, "the five packets behind the hole");
}

/// One flipped payload bit: the receiver counts a checksum error and stays
/// silent, and the sender repairs on timeout.
#[tokio::test]
async fn corruption_is_dropped_and_repaired() {
    let payload = random_bytes(6 * 512);
    let config = RelayConfig {
        corrupt_nth_data: Some(4),
        ..RelayConfig::default()
    };

    let (snd, rcv, written) = run_through_relay("corrupt", &payload, 512, 4, config).await;

    assert_eq!(written, payload);
    assert_eq!(rcv.checksum_errors, 1);
    assert!(snd.retransmissions >= 1);
}

/// Every copy of one sequence is swallowed: after 16 retransmissions the
/// sender reports a hard failure instead of spinning forever.
#[tokio::test]
async fn retry_exhaustion_fails_the_connection() {
    let payload = random_bytes(4 * 512);
    let input = scratch("exhaust", "in");
    let output = scratch("exhaust", "out");
    std::fs::write(&input, &payload).expect("write input file");

    let recv_socket = ephemeral().await;
    let recv_addr = recv_socket.local_addr;
    let out = output.clone();
    let receiver =
        tokio::spawn(async move { Receiver::new(recv_socket, 512, 4).receive(&out).await });

    let config = RelayConfig {
        drop_seq: Some((513, DropCopies::All)),
        ..RelayConfig::default()
    };
    let relay = Relay::bind(recv_addr, config).await.expect("bind relay");
    let relay_addr = relay.local_addr().expect("relay addr");
    let relay_task = relay.spawn();

    let send_socket = ephemeral().await;
    let result = timeout(
        Duration::from_secs(60),
        Sender::new(send_socket, relay_addr, 512, 4).transfer(&input),
    )
    .await
    .expect("sender did not give up in time");

    match result {
        Err(TransferError::RetriesExhausted { seq, retries }) => {
            assert_eq!(seq, 513);
            // Timer retransmissions plus duplicate-ACK-driven fast
            // retransmits both count against the budget.
            assert!(retries >= 16, "budget was {retries}");
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }

    // The receiver never sees a FIN; it is still waiting and gets torn down.
    receiver.abort();
    relay_task.abort();
    std::fs::remove_file(&input).ok();
    std::fs::remove_file(&output).ok();
}
