//! Append-only packet queue.
//!
//! Packets are written back to back into one growable byte buffer and
//! located through a FIFO of `(offset, size)` descriptors, so dequeuing never
//! shifts buffer contents. The buffer is only reclaimed when the last packet
//! has been taken out.
//!
//! Memory therefore grows for as long as the queue never fully drains. The
//! dispatch loop drains the send queue completely every cycle, and the
//! receive queue empties whenever the application keeps up, so in practice
//! the buffer is reset often.

use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Location of one packet in the backing buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketInfo {
    offset: usize,
    size: usize,
}

/// FIFO of discrete packets over a shared byte buffer
///
/// # Example
///
/// ```
/// use peerlink_core::PacketQueue;
///
/// let mut queue = PacketQueue::new();
/// queue.enqueue(b"first");
/// queue.enqueue(b"second!");
///
/// let mut buf = vec![0u8; queue.peek_size().unwrap()];
/// assert_eq!(queue.dequeue(&mut buf).unwrap(), Some(5));
/// assert_eq!(&buf, b"first");
/// assert_eq!(queue.dequeue_vec().unwrap(), b"second!");
/// assert!(queue.dequeue_vec().is_none());
/// ```
#[derive(Debug, Default)]
pub struct PacketQueue {
    buffer: Vec<u8>,
    packets: VecDeque<PacketInfo>,
    /// End of the last stored packet (next write position)
    tail: usize,
}

impl PacketQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` as one packet, returning the number of bytes stored.
    pub fn enqueue(&mut self, data: &[u8]) -> usize {
        let offset = self.tail;
        let end = offset + data.len();

        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[offset..end].copy_from_slice(data);

        self.packets.push_back(PacketInfo {
            offset,
            size: data.len(),
        });
        self.tail = end;

        data.len()
    }

    /// Copy the head packet into `buf` and remove it.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    ///
    /// # Errors
    /// Returns `Error::BufferTooSmall` if `buf` is shorter than the head
    /// packet; the queue is left unchanged.
    pub fn dequeue(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let Some(&info) = self.packets.front() else {
            return Ok(None);
        };

        if buf.len() < info.size {
            return Err(Error::BufferTooSmall {
                needed: info.size,
                available: buf.len(),
            });
        }

        buf[..info.size].copy_from_slice(&self.buffer[info.offset..info.offset + info.size]);
        self.pop_head();

        Ok(Some(info.size))
    }

    /// Remove the head packet into a buffer of exactly its size.
    pub fn dequeue_vec(&mut self) -> Option<Vec<u8>> {
        let info = *self.packets.front()?;
        let packet = self.buffer[info.offset..info.offset + info.size].to_vec();
        self.pop_head();
        Some(packet)
    }

    /// Size of the head packet, or `None` if the queue is empty.
    pub fn peek_size(&self) -> Option<usize> {
        self.packets.front().map(|info| info.size)
    }

    /// Zero the backing buffer and drop every queued packet.
    pub fn clear(&mut self) {
        self.buffer.fill(0);
        self.buffer.clear();
        self.packets.clear();
        self.tail = 0;
    }

    /// Number of queued packets
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Returns `true` if no packet is queued
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Bytes held in the backing buffer, including already-dequeued packets
    /// that have not been reclaimed yet.
    pub fn buffered_bytes(&self) -> usize {
        self.tail
    }

    fn pop_head(&mut self) {
        self.packets.pop_front();
        if self.packets.is_empty() {
            self.clear();
        }
    }
}
