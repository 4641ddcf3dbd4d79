//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License

#![no_std]

mod common;
mod net;

pub mod libc;

pub use common::alloc::LibcAlloc;
pub use common::error::{
    Error, ErrorCode, Origin, Platform, RtlsResult, rtls_err, rtls_error,
};
pub use common::io::{Read, Write};
pub use common::log;
pub use common::random::Random;

pub use net::dns;
pub use net::socket::TcpSocket;
pub use net::tls::TlsClient;
pub use net::tls::{buffer, chacha20, cipher, ecdh, hkdf, hmac, sha2};
