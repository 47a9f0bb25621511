//! Entry point for `udp-file-transfer`.
//!
//! Parses CLI flags and dispatches into either **sender** or **receiver**
//! mode; the mode is selected by the presence of `-s <remote_host>`.  All
//! actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, exit codes).
//!
//! ```text
//! sender:    -p <port> -s <host> -a <remote_port> -f <file> -m <mtu> -c <window>
//! receiver:  -p <port> -f <output_file> -m <mtu> -c <window>
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use udp_file_transfer::{Receiver, Sender, Socket};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local UDP port to bind.
    #[arg(short = 'p')]
    port: u16,

    /// Remote host to send to; selects sender mode.
    #[arg(short = 's', requires = "remote_port")]
    remote_host: Option<String>,

    /// Remote UDP port (required in sender mode).
    #[arg(short = 'a')]
    remote_port: Option<u16>,

    /// File to send, or path to write the received file to.
    #[arg(short = 'f')]
    file: PathBuf,

    /// Maximum payload bytes per packet (excluding the 24-byte header).
    #[arg(short = 'm')]
    mtu: usize,

    /// Window size in packets.
    #[arg(short = 'c')]
    window: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control diagnostic verbosity; the per-packet trace
    // lines go to stdout regardless.
    env_logger::init();

    let cli = Cli::parse();
    if cli.mtu == 0 || cli.window == 0 {
        bail!("mtu (-m) and window (-c) must be positive");
    }

    let local: SocketAddr = (IpAddr::from([0u8, 0, 0, 0]), cli.port).into();
    let socket = Socket::bind(local)
        .await
        .with_context(|| format!("binding UDP port {}", cli.port))?;

    match cli.remote_host {
        Some(host) => {
            let Some(remote_port) = cli.remote_port else {
                bail!("sender mode requires a remote port (-a)");
            };
            let peer: SocketAddr = tokio::net::lookup_host((host.as_str(), remote_port))
                .await
                .with_context(|| format!("resolving {host}:{remote_port}"))?
                .next()
                .with_context(|| format!("no address found for {host}"))?;

            log::info!("sending {} to {peer}", cli.file.display());
            let stats = Sender::new(socket, peer, cli.mtu, cli.window)
                .transfer(&cli.file)
                .await?;
            println!("\n{stats}");
        }
        None => {
            log::info!("listening on port {} for {}", cli.port, cli.file.display());
            let stats = Receiver::new(socket, cli.mtu, cli.window)
                .receive(&cli.file)
                .await?;
            println!("\n{stats}");
        }
    }
    Ok(())
}
