//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License

extern crate alloc;
use alloc::string::String;

pub enum Cmd<'a> {
    Resolve {
        host: &'a str,
    },
    Get {
        host: &'a str,
        path: &'a str,
        port: u16,
        secure: bool,
    },
    Help,
}

pub fn parse(args: &[String]) -> Result<Cmd<'_>, &'static str> {
    let mut words = args.iter().skip(1).map(String::as_str);

    match words.next() {
        Some("resolve") => {
            let host = words.next().ok_or("resolve needs a host")?;
            Ok(Cmd::Resolve { host })
        }
        Some("get") => {
            let mut secure = true;
            let mut port: Option<u16> = None;
            let mut host = None;
            let mut path = "/";

            while let Some(word) = words.next() {
                match word {
                    "--plain" => secure = false,
                    "--port" => {
                        let value = words.next().ok_or("--port needs a value")?;
                        port = Some(value.parse().map_err(|_| "invalid port")?);
                    }
                    _ if host.is_none() => host = Some(word),
                    _ => path = word,
                }
            }

            let host = host.ok_or("get needs a host")?;
            let port = port.unwrap_or(if secure { 443 } else { 80 });
            Ok(Cmd::Get {
                host,
                path,
                port,
                secure,
            })
        }
        Some("help") | None => Ok(Cmd::Help),
        Some(_) => Err("unknown command, try: rtls help"),
    }
}

pub const USAGE: &str = "rtls - raw TLS 1.3 client and DNS resolver\n\
\n\
USAGE:\n\
    rtls resolve <host>                         resolve via DoH/DoT\n\
    rtls get [--plain] [--port <p>] <host> [path]\n\
                                                HTTP GET over TLS (or plain TCP)\n";
