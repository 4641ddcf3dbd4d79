//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License

use core::ffi::c_void;
use core::fmt;

use crate::libc;

/// Flip to true for a hex-level trace of the handshake and DNS exchanges.
pub const DEBUG_LOG: bool = false;

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::log::DEBUG_LOG {
            $crate::log::write_fmt(::core::format_args!($($arg)*));
        }
    };
}

struct Stderr;

impl fmt::Write for Stderr {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        unsafe { libc::write(2, s.as_ptr() as *const c_void, s.len()) };
        Ok(())
    }
}

pub fn write_fmt(args: fmt::Arguments) {
    let _ = fmt::Write::write_fmt(&mut Stderr, args);
    let _ = fmt::Write::write_str(&mut Stderr, "\n");
}

/// Hex dump of a named byte buffer.
pub fn debug_hex(name: &str, value: &[u8]) {
    if !DEBUG_LOG {
        return;
    }
    write_fmt(format_args!("{name} ({} bytes):", value.len()));
    let mut out = Stderr;
    for b in value {
        let _ = fmt::Write::write_fmt(&mut out, format_args!("{b:02x}"));
    }
    let _ = fmt::Write::write_str(&mut out, "\n");
}
