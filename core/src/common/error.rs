//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License

use core::fmt;

/// Runtime failure points — one unique value per failure site.
///
/// The discriminants are part of the error surface and stay stable; gaps
/// belong to failure sites of retired code paths.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCode {
    None = 0,

    // Socket
    SocketCreateFailed = 1,
    SocketOpenFailedConnect = 6,
    SocketCloseFailed = 7,
    SocketReadFailedTimeout = 10,
    SocketReadFailedRecv = 11,
    SocketWriteFailedSend = 15,

    // TLS surface
    TlsOpenFailedSocket = 16,
    TlsOpenFailedHandshake = 17,
    TlsCloseFailedSocket = 18,
    TlsReadFailedNotReady = 19,
    TlsReadFailedReceive = 20,
    TlsWriteFailedNotReady = 21,
    TlsWriteFailedSend = 22,

    // DNS
    DnsConnectFailed = 33,
    DnsQueryFailed = 34,
    DnsSendFailed = 35,
    DnsResponseFailed = 36,
    DnsParseFailed = 37,
    DnsResolveFailed = 38,

    // Crypto
    EccInitFailed = 60,
    EccExportKeyFailed = 61,
    EccSharedSecretFailed = 62,
    ChaCha20DecodeFailed = 63,
    ChaCha20GenerateKeyFailed = 64,

    // TlsCipher
    TlsCipherComputePublicKeyFailed = 70,
    TlsCipherComputePreKeyFailed = 71,
    TlsCipherComputeKeyFailed = 72,
    TlsCipherDecodeFailed = 73,

    // TLS internals
    TlsSendPacketFailed = 74,
    TlsClientHelloFailed = 75,
    TlsServerHelloFailed = 76,
    TlsServerHelloDoneFailed = 77,
    TlsServerFinishedFailed = 78,
    TlsVerifyFinishedFailed = 79,
    TlsClientExchangeFailed = 80,
    TlsClientFinishedFailed = 81,
    TlsChangeCipherSpecFailed = 82,
    TlsProcessReceiveFailed = 83,
    TlsOnPacketFailed = 84,
    TlsReadFailedChannel = 85,

    // Factory creation
    TlsCreateFailed = 102,

    // Generic I/O
    UnexpectedEof = 110,
}

/// OS layer that produced an error, carrying the raw OS value when present.
///
/// The payload drives formatting: hex for Windows/UEFI status words, decimal
/// for POSIX errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Runtime,
    Windows(u32),
    Posix(u32),
    Uefi(u32),
}

/// A single failure identity: the runtime failure site plus its OS origin.
///
/// There is no chain — when a lower layer fails, the caller picks the most
/// useful outer code and keeps the platform tag (see [`Origin`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    pub code: ErrorCode,
    pub platform: Platform,
}

pub type RtlsResult<T> = Result<T, Error>;

pub const fn rtls_error(code: ErrorCode) -> Error {
    Error {
        code,
        platform: Platform::Runtime,
    }
}

pub fn rtls_err<T>(code: ErrorCode) -> RtlsResult<T> {
    Err(rtls_error(code))
}

impl Error {
    pub const fn windows(code: ErrorCode, ntstatus: u32) -> Error {
        Error {
            code,
            platform: Platform::Windows(ntstatus),
        }
    }

    pub const fn posix(code: ErrorCode, errno: u32) -> Error {
        Error {
            code,
            platform: Platform::Posix(errno),
        }
    }

    pub const fn uefi(code: ErrorCode, status: u32) -> Error {
        Error {
            code,
            platform: Platform::Uefi(status),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.platform {
            Platform::Runtime => write!(f, "{:?}", self.code),
            Platform::Windows(status) => write!(f, "{:?}: {:#x} [W]", self.code, status),
            Platform::Posix(errno) => write!(f, "{:?}: {} [P]", self.code, errno),
            Platform::Uefi(status) => write!(f, "{:?}: {:#x} [U]", self.code, status),
        }
    }
}

impl core::error::Error for Error {}

/// Replace the failure site of an error while keeping its platform origin.
pub trait Origin<T> {
    fn origin(self, code: ErrorCode) -> RtlsResult<T>;
}

impl<T> Origin<T> for RtlsResult<T> {
    fn origin(self, code: ErrorCode) -> RtlsResult<T> {
        self.map_err(|err| Error {
            code,
            platform: err.platform,
        })
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn display_runtime() {
        let err = rtls_error(ErrorCode::TlsOnPacketFailed);
        assert_eq!(err.to_string(), "TlsOnPacketFailed");
    }

    #[test]
    fn display_posix_decimal() {
        let err = Error::posix(ErrorCode::SocketOpenFailedConnect, 111);
        assert_eq!(err.to_string(), "SocketOpenFailedConnect: 111 [P]");
    }

    #[test]
    fn display_windows_hex() {
        let err = Error::windows(ErrorCode::SocketReadFailedRecv, 0xC000_0005);
        assert_eq!(err.to_string(), "SocketReadFailedRecv: 0xc0000005 [W]");
    }

    #[test]
    fn origin_replaces_site_keeps_platform() {
        let inner: RtlsResult<()> = Err(Error::posix(ErrorCode::SocketReadFailedRecv, 104));
        let outer = inner.origin(ErrorCode::TlsReadFailedReceive).unwrap_err();
        assert_eq!(outer.code, ErrorCode::TlsReadFailedReceive);
        assert_eq!(outer.platform, Platform::Posix(104));
    }
}
