//! Dispatch loop moving packets between the queues and the socket.
//!
//! One cycle:
//! 1. If the socket is writable, drain the send queue onto the wire.
//! 2. While the socket is readable, read chunks and enqueue received packets.
//! 3. Sleep for the poll interval.
//!
//! Readiness is polled with a zero timeout, so the loop never blocks on the
//! socket and observes `running == false` within one cycle. Any I/O error ends
//! the loop and tears the connection down through [`Shared::fail_dispatch`].

use crate::config::PeerConfig;
use crate::connection::{Shared, lock};
use crate::error::{Error, Result};
use crate::framing::{FrameCodec, Framing};
use bytes::BytesMut;
use peerlink_transport::{poll_readable, poll_writable};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, trace, warn};

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    stream: Arc<TcpStream>,
    generation: u64,
    poll_interval: Duration,
    framing: Framing,
    eof_is_disconnect: bool,
    packet_size: usize,
    /// Staging buffer for one dequeued packet or one socket read
    scratch: Vec<u8>,
    /// Encoded frame awaiting write (length-prefixed mode)
    write_buf: BytesMut,
    /// Received bytes not yet split into packets (length-prefixed mode)
    read_buf: BytesMut,
    codec: FrameCodec,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        stream: Arc<TcpStream>,
        generation: u64,
        config: &PeerConfig,
        poll_interval: Duration,
    ) -> Self {
        let scratch_len = config.packet_size + config.framing.overhead();
        Self {
            shared,
            stream,
            generation,
            poll_interval,
            framing: config.framing,
            eof_is_disconnect: config.eof_is_disconnect,
            packet_size: config.packet_size,
            scratch: vec![0u8; scratch_len],
            write_buf: BytesMut::with_capacity(scratch_len),
            read_buf: BytesMut::with_capacity(scratch_len),
            codec: FrameCodec::new(config.packet_size),
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Run until stopped or until an I/O error ends the connection.
    pub(crate) fn run(mut self) {
        info!(
            "Dispatch loop started ({:?} framing, poll every {:?})",
            self.framing, self.poll_interval
        );

        let mut cycles: u64 = 0;
        while self.is_running() {
            if let Err(e) = self.run_cycle() {
                error!("Dispatch loop failed after {} cycles: {}", cycles, e);
                self.shared.fail_dispatch(self.generation, e);
                return;
            }
            cycles += 1;
            thread::sleep(self.poll_interval);
        }

        info!("Dispatch loop stopped after {} cycles", cycles);
    }

    fn run_cycle(&mut self) -> Result<()> {
        self.send_dispatch()?;
        self.receive_dispatch()
    }

    fn send_dispatch(&mut self) -> Result<()> {
        if !poll_writable(&self.stream)? {
            return Ok(());
        }

        loop {
            let size = {
                let mut queue = lock(&self.shared.send_queue);
                match queue.dequeue(&mut self.scratch) {
                    Ok(Some(size)) => size,
                    Ok(None) => return Ok(()),
                    Err(e) => return Err(e),
                }
            };

            if let Err(e) = self.write_packet(size) {
                self.shared.stats.record_send_error();
                self.scratch[..size].fill(0);
                return Err(e);
            }

            trace!("Sent packet of {} bytes", size);
            self.shared.stats.record_send(size);
            self.scratch[..size].fill(0);
        }
    }

    fn write_packet(&mut self, size: usize) -> Result<()> {
        let mut stream = &*self.stream;
        let result = match self.framing {
            Framing::Raw => stream.write_all(&self.scratch[..size]),
            Framing::LengthPrefixed => {
                self.codec.encode(&self.scratch[..size], &mut self.write_buf)?;
                let result = stream.write_all(&self.write_buf);
                self.write_buf.fill(0);
                self.write_buf.clear();
                result
            }
        };

        result.map_err(|e| {
            // A blocking write only returns these once the write timeout expires.
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ) {
                warn!("Write of {} bytes timed out; peer is not reading", size);
            }
            Error::Io(e)
        })
    }

    fn receive_dispatch(&mut self) -> Result<()> {
        let read_len = match self.framing {
            Framing::Raw => self.packet_size,
            Framing::LengthPrefixed => self.scratch.len(),
        };

        while self.is_running() && poll_readable(&self.stream)? {
            let mut stream = &*self.stream;
            let n = match stream.read(&mut self.scratch[..read_len]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.shared.stats.record_recv_error();
                    return Err(Error::Io(e));
                }
            };

            if n == 0 {
                if self.eof_is_disconnect {
                    return Err(Error::PeerClosed);
                }
                // Peer closed; without eof_is_disconnect this reads as "no data".
                break;
            }

            let result = self.accept_chunk(n);
            self.scratch[..n].fill(0);
            result?;
        }

        Ok(())
    }

    fn accept_chunk(&mut self, n: usize) -> Result<()> {
        match self.framing {
            Framing::Raw => {
                lock(&self.shared.recv_queue).enqueue(&self.scratch[..n]);
                self.shared.stats.record_recv(n);
                debug!("Received raw chunk of {} bytes", n);
            }
            Framing::LengthPrefixed => {
                self.read_buf.extend_from_slice(&self.scratch[..n]);
                while let Some(packet) = self.codec.decode(&mut self.read_buf)? {
                    lock(&self.shared.recv_queue).enqueue(&packet);
                    self.shared.stats.record_recv(packet.len());
                    trace!("Received packet of {} bytes", packet.len());
                }
            }
        }
        Ok(())
    }
}
