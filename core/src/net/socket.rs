//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License

use core::ffi::{c_int, c_void};
use core::mem::size_of;
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::common::io::{Read, Write};
use crate::libc;
use crate::{Error, ErrorCode, RtlsResult};

const CONNECT_TIMEOUT_MS: c_int = 5_000;

/// Raw TCP socket (IPv4 or IPv6). `create` only allocates the descriptor;
/// `open` performs the three-way handshake with a 5 second timeout.
pub struct TcpSocket {
    fd: i32,
    ip: IpAddr,
    port: u16,
}

impl TcpSocket {
    pub fn create(ip: IpAddr, port: u16) -> RtlsResult<Self> {
        let family = match ip {
            IpAddr::V4(_) => libc::AF_INET,
            IpAddr::V6(_) => libc::AF_INET6,
        };
        let fd = unsafe { libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
        if fd == -1 {
            return Err(Error::posix(ErrorCode::SocketCreateFailed, libc::errno()));
        }
        Ok(TcpSocket { fd, ip, port })
    }

    pub fn is_valid(&self) -> bool {
        self.fd >= 0
    }

    /// Non-blocking connect, then poll for writability within the timeout.
    /// The descriptor is returned to blocking mode afterwards.
    pub fn open(&mut self) -> RtlsResult<()> {
        self.set_nonblocking(true);

        let connected = match self.ip {
            IpAddr::V4(ip) => self.connect_v4(ip),
            IpAddr::V6(ip) => self.connect_v6(ip),
        };
        if connected == -1 && libc::errno() != libc::EINPROGRESS as u32 {
            return Err(Error::posix(
                ErrorCode::SocketOpenFailedConnect,
                libc::errno(),
            ));
        }

        if connected == -1 {
            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLOUT,
                revents: 0,
            };
            let ready = unsafe { libc::poll(&mut pfd, 1, CONNECT_TIMEOUT_MS) };
            if ready <= 0 {
                return Err(Error::posix(
                    ErrorCode::SocketOpenFailedConnect,
                    libc::errno(),
                ));
            }

            let mut so_error: c_int = 0;
            let mut len = size_of::<c_int>() as libc::socklen_t;
            unsafe {
                libc::getsockopt(
                    self.fd,
                    libc::SOL_SOCKET,
                    libc::SO_ERROR,
                    &mut so_error as *mut _ as *mut c_void,
                    &mut len,
                )
            };
            if so_error != 0 {
                return Err(Error::posix(
                    ErrorCode::SocketOpenFailedConnect,
                    so_error as u32,
                ));
            }
        }

        self.set_nonblocking(false);
        Ok(())
    }

    pub fn close(&mut self) -> RtlsResult<()> {
        if self.fd < 0 {
            return Ok(());
        }
        let result = unsafe { libc::close(self.fd) };
        self.fd = -1;
        if result == -1 {
            return Err(Error::posix(ErrorCode::SocketCloseFailed, libc::errno()));
        }
        Ok(())
    }

    fn connect_v4(&self, ip: Ipv4Addr) -> c_int {
        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: self.port.to_be(),
            // Kept big-endian on every host, so no swap here
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(ip.octets()),
            },
            sin_zero: [0; 8],
        };
        unsafe {
            libc::connect(
                self.fd,
                &addr as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
    }

    fn connect_v6(&self, ip: Ipv6Addr) -> c_int {
        let addr = libc::sockaddr_in6 {
            sin6_family: libc::AF_INET6 as libc::sa_family_t,
            sin6_port: self.port.to_be(),
            sin6_flowinfo: 0,
            sin6_addr: ip.octets(),
            sin6_scope_id: 0,
        };
        unsafe {
            libc::connect(
                self.fd,
                &addr as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) {
        unsafe {
            let flags = libc::fcntl(self.fd, libc::F_GETFL);
            let flags = if nonblocking {
                flags | libc::O_NONBLOCK
            } else {
                flags & !libc::O_NONBLOCK
            };
            libc::fcntl(self.fd, libc::F_SETFL, flags);
        }
    }
}

impl Read for TcpSocket {
    fn read(&mut self, buf: &mut [u8]) -> RtlsResult<usize> {
        let count = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        if count < 0 {
            Err(Error::posix(ErrorCode::SocketReadFailedRecv, libc::errno()))
        } else {
            Ok(count as usize)
        }
    }
}

impl Write for TcpSocket {
    /// Loops over partial writes; a success always covers the whole buffer.
    fn write(&mut self, buf: &[u8]) -> RtlsResult<usize> {
        let mut written = 0;
        while written < buf.len() {
            let count = unsafe {
                libc::write(
                    self.fd,
                    buf[written..].as_ptr() as *const c_void,
                    buf.len() - written,
                )
            };
            if count <= 0 {
                return Err(Error::posix(ErrorCode::SocketWriteFailedSend, libc::errno()));
            }
            written += count as usize;
        }
        Ok(buf.len())
    }
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_close() {
        let mut socket =
            TcpSocket::create(IpAddr::V4(Ipv4Addr::LOCALHOST), 80).unwrap();
        assert!(socket.is_valid());
        socket.close().unwrap();
        assert!(!socket.is_valid());
        // Closing again is a no-op
        socket.close().unwrap();
    }

    #[test]
    fn create_v6() {
        let socket = TcpSocket::create(IpAddr::V6(Ipv6Addr::LOCALHOST), 443).unwrap();
        assert!(socket.is_valid());
    }
}
