//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License

#![no_std]
#![no_main]

use core::ffi::{CStr, c_char, c_int, c_void};

extern crate alloc;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use rtls_core::{LibcAlloc, RtlsResult, TlsClient, dns, libc};

mod args;
use args::Cmd;

#[global_allocator]
static GLOBAL: LibcAlloc = LibcAlloc;

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { libc::abort() }
}

#[unsafe(no_mangle)]
extern "C" fn rust_eh_personality() {}

fn out(text: &str) {
    unsafe { libc::write(1, text.as_ptr() as *const c_void, text.len()) };
}

fn err_out(text: &str) {
    unsafe { libc::write(2, text.as_ptr() as *const c_void, text.len()) };
}

/// # Safety
/// Called by the C runtime with a valid argv.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn main(argc: c_int, argv: *const *const c_char) -> c_int {
    let mut args = Vec::with_capacity(argc as usize);
    for idx in 0..argc {
        let cstr = unsafe { CStr::from_ptr(*argv.add(idx as usize)) };
        args.push(String::from_utf8_lossy(cstr.to_bytes()).into_owned());
    }

    let cmd = match args::parse(&args) {
        Ok(cmd) => cmd,
        Err(message) => {
            err_out(&format!("ERROR: {message}\n"));
            return 2;
        }
    };

    let result = match cmd {
        Cmd::Help => {
            out(args::USAGE);
            Ok(())
        }
        Cmd::Resolve { host } => cmd_resolve(host),
        Cmd::Get {
            host,
            path,
            port,
            secure,
        } => cmd_get(host, path, port, secure),
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            err_out(&format!("ERROR: {err}\n"));
            1
        }
    }
}

fn cmd_resolve(host: &str) -> RtlsResult<()> {
    let ip = dns::resolve(host)?;
    out(&format!("{ip}\n"));
    Ok(())
}

fn cmd_get(host: &str, path: &str, port: u16, secure: bool) -> RtlsResult<()> {
    let ip = dns::resolve(host)?;

    let mut client = TlsClient::create(host, ip, port, secure)?;
    client.open()?;

    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n"
    );
    client.write(request.as_bytes())?;

    let mut buffer = [0u8; 4096];
    loop {
        match client.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => {
                unsafe { libc::write(1, buffer.as_ptr() as *const c_void, count) };
            }
            // Peer closed the stream; anything buffered has been printed
            Err(_) => break,
        }
    }

    let _ = client.close();
    Ok(())
}
