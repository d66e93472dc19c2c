//! Netlink socket management
//!
//! Safe wrapper around the `AF_NETLINK` / `NETLINK_NETFILTER` socket
//! lifecycle. The socket is closed when the wrapper is dropped, so every
//! exit path releases it.
//!
//! # Platform Support
//!
//! **Linux only:** nf_tables is reached through a Linux-specific netlink
//! family. The `Transport` trait is cross-platform so the rest of the crate
//! can be driven by an in-memory control plane in tests.

use std::io;
#[cfg(target_os = "linux")]
use std::os::unix::io::{AsRawFd, RawFd};
#[cfg(target_os = "linux")]
use std::time::Duration;

use thiserror::Error;

#[cfg(target_os = "linux")]
use crate::netlink::structures::NETLINK_NETFILTER;

/// Errors that can occur during socket operations
///
/// Carries the syscall context ("sendto() failed: …") and the
/// `io::ErrorKind` so callers can tell a timeout from a hard failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SocketError {
    message: String,
    kind: io::ErrorKind,
}

impl SocketError {
    pub fn new(message: impl Into<String>, kind: io::ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn from_io_error(context: &str, err: io::Error) -> Self {
        Self {
            message: format!("{}: {}", context, err),
            kind: err.kind(),
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    /// `SO_RCVTIMEO` expired (`EAGAIN` on Linux)
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    }
}

/// Datagram transport to the control plane
///
/// `NetlinkSocket` is the real implementation. Every call blocks until the
/// transport delivers or fails.
pub trait Transport {
    /// Send one complete datagram (one or more netlink messages)
    fn send(&mut self, data: &[u8]) -> Result<(), SocketError>;

    /// Receive one datagram into `buffer`, returning its length
    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, SocketError>;
}

/// Netlink socket bound to the netfilter family
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use nftsync::netlink::socket::NetlinkSocket;
///
/// let socket = NetlinkSocket::new(65536, Some(Duration::from_secs(5)))?;
/// // socket is closed when it goes out of scope
/// # Ok::<(), nftsync::netlink::socket::SocketError>(())
/// ```
#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct NetlinkSocket {
    fd: RawFd,
}

#[cfg(target_os = "linux")]
impl NetlinkSocket {
    /// Create, bind and configure a `NETLINK_NETFILTER` socket
    ///
    /// # Parameters
    ///
    /// * `rcvbuf` - `SO_RCVBUF` size in bytes. Object sizes (large rule
    ///   sets especially) are not known in advance, so this should be
    ///   generous; an undersized buffer truncates dumps.
    /// * `recv_timeout` - `SO_RCVTIMEO`; `None` blocks indefinitely.
    ///
    /// # Errors
    ///
    /// Returns `SocketError` if `socket()`, `bind()` or `setsockopt()`
    /// fails. Needs `CAP_NET_ADMIN` for anything beyond reads.
    pub fn new(rcvbuf: usize, recv_timeout: Option<Duration>) -> Result<Self, SocketError> {
        // SAFETY: plain syscall, return value checked below.
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_NETFILTER,
            )
        };
        if fd < 0 {
            return Err(SocketError::from_io_error(
                "socket() failed",
                io::Error::last_os_error(),
            ));
        }

        // From here on `socket` owns the fd, so early returns close it.
        let socket = Self { fd };

        // SAFETY: sockaddr_nl is POD, all-zeroes is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;
        addr.nl_pid = 0; // kernel assigns the port id
        addr.nl_groups = 0;

        // SAFETY: addr lives for the duration of the call and the length
        // matches its type.
        let ret = unsafe {
            libc::bind(
                socket.fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(SocketError::from_io_error(
                "bind() failed",
                io::Error::last_os_error(),
            ));
        }

        let rcvbuf = libc::c_int::try_from(rcvbuf).unwrap_or(libc::c_int::MAX);
        socket.set_option(libc::SO_RCVBUF, &rcvbuf, "setsockopt(SO_RCVBUF) failed")?;

        if let Some(timeout) = recv_timeout {
            let tv = libc::timeval {
                tv_sec: timeout.as_secs() as libc::time_t,
                tv_usec: timeout.subsec_micros() as libc::suseconds_t,
            };
            socket.set_option(libc::SO_RCVTIMEO, &tv, "setsockopt(SO_RCVTIMEO) failed")?;
        }

        Ok(socket)
    }

    fn set_option<T>(&self, option: libc::c_int, value: &T, context: &str) -> Result<(), SocketError> {
        // SAFETY: value points to a live T and the length is size_of::<T>().
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                option,
                value as *const T as *const libc::c_void,
                std::mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(SocketError::from_io_error(context, io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl Transport for NetlinkSocket {
    fn send(&mut self, data: &[u8]) -> Result<(), SocketError> {
        // SAFETY: sockaddr_nl is POD, all-zeroes is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;

        // SAFETY: data is valid for data.len() bytes, addr outlives the call.
        let ret = unsafe {
            libc::sendto(
                self.fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                0,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(SocketError::from_io_error(
                "sendto() failed",
                io::Error::last_os_error(),
            ));
        }
        if ret as usize != data.len() {
            return Err(SocketError::new(
                format!("short send: sent {} of {} bytes", ret, data.len()),
                io::ErrorKind::WriteZero,
            ));
        }
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, SocketError> {
        // SAFETY: buffer is valid for writes of buffer.len() bytes.
        let ret = unsafe {
            libc::recv(
                self.fd,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
                0,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ) {
                return Err(SocketError::new("recv() timeout", err.kind()));
            }
            return Err(SocketError::from_io_error("recv() failed", err));
        }
        Ok(ret as usize)
    }
}

#[cfg(target_os = "linux")]
impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

#[cfg(target_os = "linux")]
impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this struct and closed exactly once here.
        unsafe {
            libc::close(self.fd);
        }
    }
}
