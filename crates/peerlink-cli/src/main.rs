//! peerlink CLI
//!
//! Point-to-point packet exchange between two peers

mod config;
mod session;

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use peerlink_core::{ConnectionError, ErrorCategory, PeerConnection};
use std::io::{self, BufRead};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use config::Config;
use session::Outcome;

/// peerlink - exchange packets with exactly one peer
#[derive(Parser)]
#[command(name = "peerlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a peer to connect
    Server {
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect to a waiting peer
    Client {
        /// Remote endpoint (host:port)
        #[arg(short, long)]
        remote: Option<String>,

        /// Connect attempts before giving up
        #[arg(long)]
        retries: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Validate configuration
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    match cli.command {
        Commands::Server { port } => {
            run_server(port.unwrap_or(config.network.port), &config)?;
        }
        Commands::Client { remote, retries } => {
            let remote = remote.unwrap_or_else(|| config.network.remote.clone());
            config::validate_host_port(&remote, "Remote endpoint")?;
            run_client(&remote, retries.unwrap_or(config.network.retries), &config)?;
        }
    }

    Ok(())
}

/// Channel receiving every error reported by a connection
fn error_channel() -> (
    impl Fn(ConnectionError) + Send + Sync + 'static,
    Receiver<ConnectionError>,
) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let handler = move |err: ConnectionError| {
        let _ = tx.send(err);
    };
    (handler, rx)
}

/// Read stdin lines on a helper thread
fn spawn_stdin_reader() -> anyhow::Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();

    thread::Builder::new()
        .name("peerlink-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    Ok(rx)
}

/// Serve one peer at a time until the user quits
fn run_server(port: u16, config: &Config) -> anyhow::Result<()> {
    let peer_config = config.to_peer_config()?;
    let poll = peer_config.poll_interval;
    let (handler, errors) = error_channel();
    let conn = PeerConnection::server(peer_config)?.with_error_handler(handler);
    let input = spawn_stdin_reader()?;

    loop {
        drain(&errors);
        conn.start_server(port)?;
        println!("Waiting for a peer on port {}...", port);

        match session::wait_for_peer(&conn, &errors, &input, None, poll) {
            Outcome::Connected => {}
            Outcome::Failed(err) if err.category == ErrorCategory::Start => {
                return Err(err.into());
            }
            Outcome::Failed(err) => {
                println!("Accept failed: {}", err);
                conn.close();
                continue;
            }
            Outcome::Quit | Outcome::TimedOut => break,
        }

        if !exchange(&conn, &errors, &input, poll)? {
            break;
        }
    }

    conn.close();
    println!("Server closed");
    Ok(())
}

/// Connect to `remote` and exchange packets, reconnecting after failures
fn run_client(remote: &str, retries: u32, config: &Config) -> anyhow::Result<()> {
    let peer_config = config.to_peer_config()?;
    let poll = peer_config.poll_interval;
    // Slack so the socket's own timeout normally fires first.
    let timeout = peer_config
        .transport
        .connect_timeout
        .map(|t| t + Duration::from_secs(1));
    let (handler, errors) = error_channel();
    let conn = PeerConnection::client(peer_config)?.with_error_handler(handler);
    let input = spawn_stdin_reader()?;

    let mut failures = 0;
    loop {
        drain(&errors);
        let endpoint = resolve(remote)?;
        conn.connect_async(endpoint)?;
        println!("Connecting to {}...", endpoint);

        match session::wait_for_peer(&conn, &errors, &input, timeout, poll) {
            Outcome::Connected => failures = 0,
            Outcome::Failed(err) => {
                failures += 1;
                println!("Connect failed ({}/{}): {}", failures, retries, err);
                conn.close();
                if failures >= retries {
                    return Err(err.into());
                }
                thread::sleep(Duration::from_secs(1));
                continue;
            }
            Outcome::TimedOut => {
                failures += 1;
                println!("Connect timed out ({}/{})", failures, retries);
                conn.close();
                if failures >= retries {
                    anyhow::bail!("Could not connect to {} after {} attempts", remote, retries);
                }
                continue;
            }
            Outcome::Quit => break,
        }

        if !exchange(&conn, &errors, &input, poll)? {
            break;
        }
    }

    conn.close();
    println!("Client closed");
    Ok(())
}

/// Run the dispatch loop and the interactive session.
///
/// Returns `false` when the user quit, `true` to go back to setup.
fn exchange(
    conn: &PeerConnection,
    errors: &Receiver<ConnectionError>,
    input: &Receiver<String>,
    poll: Duration,
) -> anyhow::Result<bool> {
    conn.run_work_async()?;

    match session::run(conn, errors, input, poll) {
        Outcome::Failed(err) => {
            println!("Connection lost: {}", err);
            conn.close();
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Discard errors left over from a previous attempt
fn drain(errors: &Receiver<ConnectionError>) {
    while errors.try_recv().is_ok() {}
}

fn resolve(remote: &str) -> anyhow::Result<SocketAddr> {
    remote
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Remote endpoint '{}' did not resolve", remote))
}
