//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License

use crate::{ErrorCode, RtlsResult, rtls_err};

pub trait Read {
    fn read(&mut self, buf: &mut [u8]) -> RtlsResult<usize>;

    fn read_exact(&mut self, mut buf: &mut [u8]) -> RtlsResult<()> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(n) => {
                    buf = &mut buf[n..];
                }
                Err(e) => return Err(e),
            }
        }

        if !buf.is_empty() {
            rtls_err(ErrorCode::UnexpectedEof)
        } else {
            Ok(())
        }
    }
}

pub trait Write {
    fn write(&mut self, buf: &[u8]) -> RtlsResult<usize>;

    fn write_all(&mut self, mut buf: &[u8]) -> RtlsResult<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return rtls_err(ErrorCode::UnexpectedEof),
                Ok(n) => buf = &buf[n..],
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}
