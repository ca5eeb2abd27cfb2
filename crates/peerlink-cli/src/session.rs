//! Interactive exchange over an established connection.

use crossbeam_channel::{Receiver, RecvTimeoutError, select};
use peerlink_core::{ConnectionError, ErrorCategory, PeerConnection};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How a wait or session ended
#[derive(Debug)]
pub enum Outcome {
    /// Peer attached
    Connected,
    /// User asked to quit
    Quit,
    /// Setup or dispatch failed
    Failed(ConnectionError),
    /// Connect timeout elapsed
    TimedOut,
}

/// One line of user input, interpreted
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Send the text as a packet
    Text(String),
    /// Send a random little-endian `i32`
    Random,
    /// Close and exit
    Quit,
    /// Nothing to do
    Empty,
}

impl Command {
    /// Interpret one input line
    pub fn parse(line: &str) -> Self {
        match line.trim_end_matches(['\r', '\n']) {
            "" => Self::Empty,
            "/quit" => Self::Quit,
            "/rand" => Self::Random,
            text => Self::Text(text.to_string()),
        }
    }
}

/// Render a received packet for display
pub fn describe_packet(packet: &[u8]) -> String {
    let text = String::from_utf8_lossy(packet);
    match <[u8; 4]>::try_from(packet) {
        Ok(bytes) => format!("<< {} (i32 {})", text, i32::from_le_bytes(bytes)),
        Err(_) => format!("<< {}", text),
    }
}

/// Wait until `conn` is connected, an error arrives, the user quits or
/// `timeout` elapses.
pub fn wait_for_peer(
    conn: &PeerConnection,
    errors: &Receiver<ConnectionError>,
    input: &Receiver<String>,
    timeout: Option<Duration>,
    poll: Duration,
) -> Outcome {
    let started = Instant::now();

    loop {
        if conn.is_connected() {
            return Outcome::Connected;
        }
        if let Some(timeout) = timeout {
            if started.elapsed() >= timeout {
                return Outcome::TimedOut;
            }
        }

        select! {
            recv(errors) -> err => {
                if let Ok(err) = err {
                    return Outcome::Failed(err);
                }
            }
            recv(input) -> line => match line {
                Ok(line) if Command::parse(&line) == Command::Quit => return Outcome::Quit,
                Ok(_) => println!("Not connected yet"),
                Err(_) => return Outcome::Quit,
            },
            default(poll) => {}
        }
    }
}

fn print_received(conn: &PeerConnection) {
    loop {
        match conn.receive() {
            Ok(Some(packet)) => println!("{}", describe_packet(&packet)),
            Ok(None) => break,
            Err(e) => {
                debug!("Receive stopped: {}", e);
                break;
            }
        }
    }
}

/// Exchange packets until the user quits or the dispatch loop fails.
pub fn run(
    conn: &PeerConnection,
    errors: &Receiver<ConnectionError>,
    input: &Receiver<String>,
    poll: Duration,
) -> Outcome {
    let peer = conn
        .peer_addr()
        .map_or_else(|| "peer".to_string(), |addr| addr.to_string());
    println!("Connected to {}. Type a line to send it, /rand or /quit.", peer);

    loop {
        match errors.try_recv() {
            Ok(err) if err.category == ErrorCategory::Dispatch => {
                // Show what arrived before the peer went away.
                print_received(conn);
                return Outcome::Failed(err);
            }
            Ok(err) => debug!("Ignoring stale {}", err),
            Err(_) => {}
        }

        print_received(conn);

        let line = match input.recv_timeout(poll) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Outcome::Quit,
        };

        let result = match Command::parse(&line) {
            Command::Quit => return Outcome::Quit,
            Command::Empty => continue,
            Command::Random => {
                let value = rand::random::<i32>();
                println!(">> {}", value);
                conn.send(&value.to_le_bytes())
            }
            Command::Text(text) => conn.send(text.as_bytes()),
        };

        if let Err(e) = result {
            warn!("Send failed: {}", e);
        }
    }
}
