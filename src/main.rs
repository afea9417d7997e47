//! Entry point for `slow-peripheral`.
//!
//! Parses CLI arguments, selects the payload, and dispatches into either a
//! fresh connection or a revive of a persisted session.  All actual protocol
//! work is delegated to library modules; `main.rs` owns only process setup
//! (logging, argument parsing, exit codes).

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use slow_peripheral::driver::{Driver, DriverConfig};
use slow_peripheral::socket::PeerSocket;

/// Default central endpoint.
const DEFAULT_HOST: &str = "slow.gmelodie.com";
const DEFAULT_PORT: u16 = 7033;

/// SLOW peripheral: send a message reliably over UDP, with resumable sessions.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// File holding the payload to send (default: the literal "Hello\n").
    #[arg(short, long)]
    msg: Option<PathBuf>,

    /// Revive a previously saved session from this file instead of connecting.
    #[arg(short, long)]
    revive: Option<PathBuf>,

    /// Save the session to this file on clean disconnect.
    #[arg(short, long)]
    save: Option<PathBuf>,

    /// Retransmission timeout in milliseconds.
    #[arg(short = 't', long, default_value_t = 800)]
    rto: u64,

    /// Setup receive timeout in milliseconds.
    #[arg(short = 'T', long, default_value_t = 1500)]
    recvto: u64,

    /// Central hostname.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Central UDP port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let payload: Vec<u8> = match &cli.msg {
        Some(path) => fs::read(path)
            .with_context(|| format!("could not read message file {}", path.display()))?,
        None if cli.revive.is_none() => b"Hello\n".to_vec(),
        None => Vec::new(),
    };

    let config = DriverConfig {
        rto: Duration::from_millis(cli.rto),
        setup_timeout: Duration::from_millis(cli.recvto),
        save_path: cli.save.clone(),
    };

    let socket = PeerSocket::connect(&cli.host, cli.port)
        .await
        .with_context(|| format!("could not reach {}:{}", cli.host, cli.port))?;
    log::info!(
        "[slow] talking to {} from {}",
        socket.peer_addr,
        socket.local_addr()?
    );

    let mut driver = Driver::new(socket, config, std::io::stdout());

    let outcome = match &cli.revive {
        Some(path) => match driver.revive(path, &payload) {
            Ok(()) => driver.run().await,
            Err(e) => Err(e),
        },
        None => match driver.connect(&payload).await {
            Ok(()) => driver.run().await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    Ok(())
}
