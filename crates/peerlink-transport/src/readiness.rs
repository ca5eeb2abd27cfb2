//! Zero-timeout readiness polling.
//!
//! The dispatch loop interleaves both directions on one thread, so it must
//! never block on a socket that has nothing to read or no room to write. Each
//! check here returns immediately.
//!
//! Error and hang-up conditions count as "ready": the following read or write
//! is what surfaces the failure (or the end of stream) to the caller.

use std::io;
use std::net::TcpStream;

/// Returns `true` if a read on `stream` would not block.
///
/// # Errors
/// Returns the system error if the descriptor cannot be polled.
pub fn poll_readable(stream: &TcpStream) -> io::Result<bool> {
    imp::poll_readable(stream)
}

/// Returns `true` if a write on `stream` would not block.
///
/// # Errors
/// Returns the system error if the descriptor cannot be polled.
pub fn poll_writable(stream: &TcpStream) -> io::Result<bool> {
    imp::poll_writable(stream)
}

#[cfg(unix)]
mod imp {
    use std::io;
    use std::net::TcpStream;
    use std::os::fd::AsRawFd;

    pub(super) fn poll_readable(stream: &TcpStream) -> io::Result<bool> {
        poll_once(stream, libc::POLLIN)
    }

    pub(super) fn poll_writable(stream: &TcpStream) -> io::Result<bool> {
        poll_once(stream, libc::POLLOUT)
    }

    fn poll_once(stream: &TcpStream, events: libc::c_short) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: stream.as_raw_fd(),
            events,
            revents: 0,
        };

        // SAFETY: `pfd` is a valid, exclusively borrowed pollfd and nfds is 1.
        // A zero timeout makes the call return immediately.
        let ret = unsafe { libc::poll(&mut pfd, 1, 0) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }

        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        Ok(ret > 0 && pfd.revents & (events | libc::POLLERR | libc::POLLHUP) != 0)
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;
    use std::net::TcpStream;

    pub(super) fn poll_readable(stream: &TcpStream) -> io::Result<bool> {
        stream.set_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let result = stream.peek(&mut byte);
        stream.set_nonblocking(false)?;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    // Blocking writes only stall when the kernel send buffer is full.
    pub(super) fn poll_writable(_stream: &TcpStream) -> io::Result<bool> {
        Ok(true)
    }
}
