//! Integration tests for connection hardening
//!
//! Tests for:
//! - Concurrent senders sharing one connection
//! - Close semantics (joins dispatch, idempotent, interrupts setup)
//! - Error delivery for each background activity
//! - Peer disconnect handling and packets left behind by it
//! - Write timeouts against a peer that stops reading

use peerlink_core::{
    ConnectionState, Error, ErrorCategory, ErrorKind, PeerConfig, PeerConnection, ReconnectPolicy,
};
use peerlink_integration_tests::test_helpers::{
    ErrorCollector, connected_pair, init_tracing, loopback, receive_within, running_pair,
    wait_until,
};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_concurrent_senders_lose_nothing() {
    init_tracing();
    const SENDERS: u32 = 4;
    const PER_SENDER: u32 = 250;

    let (server, client) = running_pair(PeerConfig::default().with_packet_size(8));

    thread::scope(|s| {
        for sender in 0..SENDERS {
            let client = &client;
            s.spawn(move || {
                for seq in 0..PER_SENDER {
                    let mut packet = [0u8; 8];
                    packet[..4].copy_from_slice(&sender.to_be_bytes());
                    packet[4..].copy_from_slice(&seq.to_be_bytes());
                    client.send(&packet).unwrap();
                }
            });
        }
    });

    let total = (SENDERS * PER_SENDER) as usize;
    let mut received = Vec::with_capacity(total);
    assert!(wait_until(Duration::from_secs(10), || {
        while let Some(packet) = server.receive().unwrap() {
            received.push(packet);
        }
        received.len() >= total
    }));
    assert_eq!(received.len(), total);

    // Each sender's packets arrive exactly once and in its own order.
    let mut next: HashMap<u32, u32> = HashMap::new();
    for packet in received {
        assert_eq!(packet.len(), 8);
        let sender = u32::from_be_bytes(packet[..4].try_into().unwrap());
        let seq = u32::from_be_bytes(packet[4..].try_into().unwrap());
        let expected = next.entry(sender).or_insert(0);
        assert_eq!(seq, *expected, "sender {} out of order", sender);
        *expected += 1;
    }
    assert!(next.values().all(|&n| n == PER_SENDER));
}

#[test]
fn test_close_halts_dispatch() {
    let (server, client) = running_pair(PeerConfig::default());

    client.send(b"before close").unwrap();
    assert_eq!(receive_within(&server, TIMEOUT).unwrap(), b"before close");

    server.close();
    assert!(!server.is_running());
    assert_eq!(server.state(), ConnectionState::Disconnected);
    assert!(server.peer_addr().is_none());

    // Nothing reaches the closed side's queue any more.
    let _ = client.send(b"after close");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.pending_receive(), 0);
    assert!(matches!(server.receive(), Err(Error::InvalidState { .. })));

    // Second close is a no-op.
    server.close();
    assert_eq!(server.state(), ConnectionState::Disconnected);
}

#[test]
fn test_close_while_waiting_for_peer() {
    let errors = ErrorCollector::new();
    let server = PeerConnection::server(PeerConfig::default())
        .unwrap()
        .with_error_handler(errors.handler());

    server.start_server_on(loopback()).unwrap();
    let addr = server.local_addr().unwrap();
    assert_eq!(server.state(), ConnectionState::Connecting);

    server.close();
    assert_eq!(server.state(), ConnectionState::Disconnected);
    assert!(server.local_addr().is_none());

    // A late connect attempt must never install a peer.
    let _ = std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.state(), ConnectionState::Disconnected);

    // The same connection can wait again.
    server.start_server_on(loopback()).unwrap();
    assert_eq!(server.state(), ConnectionState::Connecting);
    server.close();
}

#[cfg(target_os = "linux")]
#[test]
fn test_client_close_while_connecting() {
    use peerlink_core::ConnectionState::{Connected, Connecting, Disconnected};
    use peerlink_core::TransportConfig;
    use peerlink_transport::TcpAcceptor;

    init_tracing();
    let transport = TransportConfig {
        listen_backlog: 1,
        ..Default::default()
    };
    // Never accepts, so the accept queue stays full once filled.
    let acceptor = TcpAcceptor::bind(loopback(), &transport).unwrap();
    let addr = acceptor.local_addr();

    let mut fillers = Vec::new();
    let mut stalled = false;
    for _ in 0..16 {
        match std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(300)) {
            Ok(stream) => fillers.push(stream),
            Err(_) => {
                stalled = true;
                break;
            }
        }
    }
    assert!(stalled, "listener accepted {} connections", fillers.len());

    let config = PeerConfig::default().with_connect_timeout(Duration::from_secs(10));
    let errors = ErrorCollector::new();
    let client = PeerConnection::client(config)
        .unwrap()
        .with_error_handler(errors.handler());

    client.connect_async(addr).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(client.state(), Connecting);

    client.close();
    assert_eq!(client.state(), Disconnected);
    assert!(client.peer_addr().is_none());

    // The interrupted attempt must never install a stream.
    thread::sleep(Duration::from_millis(300));
    assert_ne!(client.state(), Connected);
    assert_eq!(client.state(), Disconnected);
    assert!(client.send(b"x").is_err());

    drop(fillers);
    acceptor.shutdown();
}

#[test]
fn test_terminal_policy_rejects_setup() {
    let config = PeerConfig::default().with_reconnect(ReconnectPolicy::Terminal);
    let (server, client) = running_pair(config);

    server.close();
    assert_eq!(server.state(), ConnectionState::Closed);

    let err = server.start_server_on(loopback()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(server.send(b"x").is_err());

    client.close();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[test]
fn test_bind_conflict_reports_start_error() {
    let holder = TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = holder.local_addr().unwrap();

    let errors = ErrorCollector::new();
    let server = PeerConnection::server(PeerConfig::default())
        .unwrap()
        .with_error_handler(errors.handler());

    server.start_server_on(taken).unwrap();
    assert!(errors.wait_for(ErrorCategory::Start, TIMEOUT));
    assert_eq!(server.state(), ConnectionState::Disconnected);

    // Retry on a free port succeeds.
    server.start_server_on(loopback()).unwrap();
    assert_eq!(server.state(), ConnectionState::Connecting);
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_refused_connect_reports_and_allows_retry() {
    let refused = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let errors = ErrorCollector::new();
    let client = PeerConnection::client(PeerConfig::default())
        .unwrap()
        .with_error_handler(errors.handler());

    client.connect_async(refused).unwrap();
    assert!(errors.wait_for(ErrorCategory::Connect, TIMEOUT));
    assert!(wait_until(TIMEOUT, || client.state()
        == ConnectionState::Disconnected));

    let server = PeerConnection::server(PeerConfig::default()).unwrap();
    server.start_server_on(loopback()).unwrap();
    client.connect_async(server.local_addr().unwrap()).unwrap();
    assert!(wait_until(TIMEOUT, || client.is_connected()));
    assert_eq!(errors.categories(), vec![ErrorCategory::Connect]);
}

#[test]
fn test_peer_close_is_dispatch_error_when_enabled() {
    let config = PeerConfig::default().with_eof_is_disconnect(true);
    let errors = ErrorCollector::new();
    let (server, client) = running_pair(config);
    server.set_error_handler(errors.handler());

    client.close();

    assert!(errors.wait_for(ErrorCategory::Dispatch, TIMEOUT));
    assert!(wait_until(TIMEOUT, || !server.is_running()));
    assert_eq!(server.state(), ConnectionState::Disconnected);
    assert!(matches!(
        server.send(b"late"),
        Err(Error::InvalidState {
            state: ConnectionState::Disconnected,
            ..
        })
    ));
}

#[test]
fn test_received_packets_survive_peer_disconnect() {
    let config = PeerConfig::default().with_eof_is_disconnect(true);
    let errors = ErrorCollector::new();
    let (server, client) = running_pair(config);
    server.set_error_handler(errors.handler());

    client.send(b"last words").unwrap();
    assert!(wait_until(TIMEOUT, || client.pending_send() == 0));
    client.close();

    assert!(errors.wait_for(ErrorCategory::Dispatch, TIMEOUT));
    assert!(wait_until(TIMEOUT, || !server.is_running()));
    assert_eq!(server.state(), ConnectionState::Disconnected);

    // Sending is refused, but what already arrived can still be read.
    assert!(server.send(b"reply").is_err());
    assert_eq!(server.pending_receive(), 1);
    assert_eq!(server.receive().unwrap().unwrap(), b"last words");

    // Once drained, receive reports the state again.
    assert!(matches!(
        server.receive(),
        Err(Error::InvalidState {
            state: ConnectionState::Disconnected,
            ..
        })
    ));

    // A new setup starts with an empty receive queue.
    server.start_server_on(loopback()).unwrap();
    assert_eq!(server.pending_receive(), 0);
    server.close();
}

#[test]
fn test_write_to_stalled_peer_fails_dispatch() {
    let mut config = PeerConfig::default()
        .with_packet_size(64 * 1024)
        .with_write_timeout(Some(Duration::from_millis(200)));
    config.transport.send_buffer_size = Some(4096);
    config.transport.recv_buffer_size = Some(4096);

    // The server never runs dispatch, so nothing drains its socket.
    let (server, client) = connected_pair(config);
    let errors = ErrorCollector::new();
    client.set_error_handler(errors.handler());
    client.run_work_async().unwrap();

    let packet = vec![0x5Au8; 64 * 1024];
    for _ in 0..64 {
        client.send(&packet).unwrap();
    }

    assert!(errors.wait_for(ErrorCategory::Dispatch, TIMEOUT));
    assert!(wait_until(TIMEOUT, || !client.is_running()));

    let started = Instant::now();
    client.close();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    server.close();
}

#[test]
fn test_peer_close_ignored_by_default() {
    let errors = ErrorCollector::new();
    let (server, client) = running_pair(PeerConfig::default());
    server.set_error_handler(errors.handler());

    client.close();
    thread::sleep(Duration::from_millis(200));

    assert!(server.is_connected());
    assert!(server.is_running());
    assert!(errors.is_empty());
}

#[test]
fn test_handler_may_close_connection() {
    let config = PeerConfig::default().with_eof_is_disconnect(true);
    let server = Arc::new(PeerConnection::server(config.clone()).unwrap());
    let handled = Arc::new(AtomicBool::new(false));

    let weak = Arc::downgrade(&server);
    let flag = handled.clone();
    server.set_error_handler(move |err| {
        if err.category == ErrorCategory::Dispatch {
            if let Some(server) = weak.upgrade() {
                server.close();
            }
            flag.store(true, Ordering::SeqCst);
        }
    });

    server.start_server_on(loopback()).unwrap();
    let client = PeerConnection::client(config).unwrap();
    client.connect_async(server.local_addr().unwrap()).unwrap();
    assert!(wait_until(TIMEOUT, || server.is_connected()
        && client.is_connected()));
    server.run_work_async().unwrap();

    drop(client);

    assert!(wait_until(TIMEOUT, || handled.load(Ordering::SeqCst)));
    assert_eq!(server.state(), ConnectionState::Disconnected);
    assert!(!server.is_running());
    server.close();
}
