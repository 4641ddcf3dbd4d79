//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License
//
//! ---------------------- DNS-over-TLS / DNS-over-HTTPS client ----------------

extern crate alloc;
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use core::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::common::io::Read;
use crate::log_debug;
use crate::net::tls::TlsClient;
use crate::net::tls::buffer::{TlsBuffer, TlsReader};
use crate::{ErrorCode, Origin, RtlsResult, rtls_err, rtls_error};

/// DNS query types this resolver asks for (RFC 1035 §3.2.2, RFC 3596).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    A = 1,
    Aaaa = 28,
}

const DNS_ID: u16 = 0x24a1;
const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const MAX_ANSWERS: u16 = 20;
const MAX_LABEL: usize = 63;

const DOT_PORT: u16 = 853;
const DOH_PORT: u16 = 443;

const CLOUDFLARE_NAME: &str = "one.one.one.one";
const CLOUDFLARE_PRIMARY: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
const CLOUDFLARE_SECONDARY: Ipv4Addr = Ipv4Addr::new(1, 0, 0, 1);
const GOOGLE_NAME: &str = "dns.google";
const GOOGLE_PRIMARY: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
const GOOGLE_SECONDARY: Ipv4Addr = Ipv4Addr::new(8, 8, 4, 4);

const MAX_HEADER_BYTES: usize = 4096;
const MAX_MESSAGE_BYTES: usize = 0xffff;

fn need<T>(value: Option<T>) -> RtlsResult<T> {
    value.ok_or(rtls_error(ErrorCode::DnsParseFailed))
}

// ---------------------- Wire format ----------------------

/// Builds one question in DNS wire format: 12-byte header, the QNAME as
/// length-prefixed labels, QTYPE and QCLASS IN. `length_prefix` prepends the
/// 2-byte message length used by DNS over TCP (DoT); DoH POST bodies omit it.
fn generate_query(host: &str, rtype: RequestType, length_prefix: bool) -> RtlsResult<TlsBuffer> {
    let mut buf = TlsBuffer::with_capacity(host.len() + 20);
    let prefix_at = if length_prefix {
        Some(buf.append_size(2))
    } else {
        None
    };
    let start = buf.len();

    buf.append_u16_be(DNS_ID);
    buf.append_u16_be(FLAG_RECURSION_DESIRED);
    buf.append_u16_be(1); // one question
    buf.append_u16_be(0); // no answers
    buf.append_u16_be(0); // no authority records
    buf.append_u16_be(0); // no additional records

    for label in host.split('.') {
        if label.is_empty() {
            continue;
        }
        if label.len() > MAX_LABEL {
            return rtls_err(ErrorCode::DnsQueryFailed);
        }
        buf.append_u8(label.len() as u8);
        buf.append(label.as_bytes());
    }
    buf.append_u8(0);

    buf.append_u16_be(rtype as u16);
    buf.append_u16_be(1); // class IN

    if let Some(at) = prefix_at {
        buf.patch_u16_be(at, (buf.len() - start) as u16);
    }
    Ok(buf)
}

/// Walks past a possibly compressed name: labels until the zero terminator,
/// or a 2-byte pointer which ends the name (RFC 1035 §4.1.4).
fn skip_name(reader: &mut TlsReader) -> Option<()> {
    loop {
        let len = reader.u8()?;
        if len == 0 {
            return Some(());
        }
        if len >= 0xc0 {
            reader.skip(1)?;
            return Some(());
        }
        reader.skip(len as usize)?;
    }
}

/// Extracts the first A or AAAA answer from a DNS response message.
fn parse_response(message: &[u8]) -> RtlsResult<IpAddr> {
    let mut reader = TlsReader::new(message);

    need(reader.u16_be())?; // id
    let flags = need(reader.u16_be())?;
    let questions = need(reader.u16_be())?;
    let answers = need(reader.u16_be())?;
    need(reader.u16_be())?; // authority count
    need(reader.u16_be())?; // additional count

    if flags & FLAG_RESPONSE == 0 {
        log_debug!("dns: message is not a response");
        return rtls_err(ErrorCode::DnsParseFailed);
    }
    if answers == 0 || answers > MAX_ANSWERS {
        log_debug!("dns: implausible answer count {answers}");
        return rtls_err(ErrorCode::DnsParseFailed);
    }

    for _ in 0..questions {
        need(skip_name(&mut reader))?;
        need(reader.skip(4))?; // qtype + qclass
    }

    for _ in 0..answers {
        need(skip_name(&mut reader))?;
        let rtype = need(reader.u16_be())?;
        need(reader.u16_be())?; // class
        need(reader.u32_be())?; // ttl
        let rdlen = need(reader.u16_be())? as usize;

        if rtype == RequestType::A as u16 && rdlen == 4 {
            let data = need(reader.take(4))?;
            return Ok(IpAddr::V4(Ipv4Addr::new(data[0], data[1], data[2], data[3])));
        }
        if rtype == RequestType::Aaaa as u16 && rdlen == 16 {
            let data = need(reader.take(16))?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(data);
            return Ok(IpAddr::V6(Ipv6Addr::from(octets)));
        }
        need(reader.skip(rdlen))?;
    }

    rtls_err(ErrorCode::DnsParseFailed)
}

// ---------------------- HTTP plumbing for DoH ----------------------

/// Reads one byte at a time until the blank line ending the response head.
fn read_http_headers(tls: &mut TlsClient) -> RtlsResult<Vec<u8>> {
    let mut headers = Vec::with_capacity(512);
    loop {
        if headers.len() >= MAX_HEADER_BYTES {
            return rtls_err(ErrorCode::DnsResponseFailed);
        }
        let mut byte = [0u8; 1];
        let count = tls.read(&mut byte).origin(ErrorCode::DnsResponseFailed)?;
        if count == 0 {
            return rtls_err(ErrorCode::DnsResponseFailed);
        }
        headers.push(byte[0]);
        if headers.ends_with(b"\r\n\r\n") {
            return Ok(headers);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Checks the 200 status and returns the Content-Length value.
fn content_length(headers: &[u8]) -> RtlsResult<usize> {
    if headers.len() < 12 || &headers[9..12] != b"200" {
        return rtls_err(ErrorCode::DnsResponseFailed);
    }

    const NEEDLE: &[u8] = b"Content-Length: ";
    let at = find(headers, NEEDLE).ok_or(rtls_error(ErrorCode::DnsResponseFailed))?;
    let digits = &headers[at + NEEDLE.len()..];

    let mut value: usize = 0;
    let mut seen = false;
    for &b in digits {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + (b - b'0') as usize;
        seen = true;
    }
    if !seen {
        return rtls_err(ErrorCode::DnsResponseFailed);
    }
    Ok(value)
}

/// First string value of the `"data":` field in a dns-json body.
fn json_data_field(body: &str) -> Option<&str> {
    let at = body.find("\"data\":")?;
    let rest = &body[at + 7..];
    let rest = rest.trim_start_matches([' ', '"']);
    let end = rest.find('"')?;
    Some(&rest[..end])
}

// ---------------------- Resolvers ----------------------

/// DNS over TLS (RFC 7858): length-prefixed query to Cloudflare on 853.
pub fn resolve_over_tls(host: &str, rtype: RequestType) -> RtlsResult<IpAddr> {
    if host == "localhost" {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    let mut tls = TlsClient::create(
        CLOUDFLARE_NAME,
        IpAddr::V4(CLOUDFLARE_PRIMARY),
        DOT_PORT,
        true,
    )
    .origin(ErrorCode::DnsConnectFailed)?;
    tls.open().origin(ErrorCode::DnsConnectFailed)?;

    let query = generate_query(host, rtype, true)?;
    tls.write(query.as_slice())
        .origin(ErrorCode::DnsSendFailed)?;

    let mut length = [0u8; 2];
    tls.read_exact(&mut length)
        .origin(ErrorCode::DnsResponseFailed)?;
    let length = u16::from_be_bytes(length) as usize;

    let mut response = vec![0u8; length];
    tls.read_exact(&mut response)
        .origin(ErrorCode::DnsResponseFailed)?;

    let ip = parse_response(&response)?;
    let _ = tls.close();
    Ok(ip)
}

/// DNS over HTTPS, JSON flavor: GET /dns-query with application/dns-json.
pub fn resolve_over_https(host: &str, rtype: RequestType) -> RtlsResult<IpAddr> {
    if host == "localhost" {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    let mut tls = TlsClient::create(
        CLOUDFLARE_NAME,
        IpAddr::V4(CLOUDFLARE_PRIMARY),
        DOH_PORT,
        true,
    )
    .origin(ErrorCode::DnsConnectFailed)?;
    tls.open().origin(ErrorCode::DnsConnectFailed)?;

    let request = format!(
        "GET /dns-query?name={host}&type={} HTTP/1.1\r\n\
         Host: {CLOUDFLARE_NAME}\r\n\
         accept: application/dns-json\r\n\r\n",
        rtype as u16
    );
    tls.write(request.as_bytes())
        .origin(ErrorCode::DnsSendFailed)?;

    let headers = read_http_headers(&mut tls)?;
    let length = content_length(&headers)?;
    if length > MAX_MESSAGE_BYTES {
        return rtls_err(ErrorCode::DnsResponseFailed);
    }

    let mut body = vec![0u8; length];
    tls.read_exact(&mut body)
        .origin(ErrorCode::DnsResponseFailed)?;
    let _ = tls.close();

    let body = core::str::from_utf8(&body).map_err(|_| rtls_error(ErrorCode::DnsParseFailed))?;
    let data = json_data_field(body).ok_or(rtls_error(ErrorCode::DnsParseFailed))?;
    log_debug!("dns: {host} resolved to {data}");
    data.parse::<IpAddr>()
        .map_err(|_| rtls_error(ErrorCode::DnsParseFailed))
}

/// DNS over HTTPS, binary flavor: POST application/dns-message.
pub fn resolve_over_https_post(
    host: &str,
    server_ip: IpAddr,
    server_name: &str,
    rtype: RequestType,
) -> RtlsResult<IpAddr> {
    if host == "localhost" {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    let mut tls = TlsClient::create(server_name, server_ip, DOH_PORT, true)
        .origin(ErrorCode::DnsConnectFailed)?;
    tls.open().origin(ErrorCode::DnsConnectFailed)?;

    let query = generate_query(host, rtype, false)?;
    let request = format!(
        "POST /dns-query HTTP/1.1\r\n\
         Host: {server_name}\r\n\
         Content-Type: application/dns-message\r\n\
         Accept: application/dns-message\r\n\
         Content-Length: {}\r\n\r\n",
        query.len()
    );
    tls.write(request.as_bytes())
        .origin(ErrorCode::DnsSendFailed)?;
    tls.write(query.as_slice())
        .origin(ErrorCode::DnsSendFailed)?;

    let headers = read_http_headers(&mut tls)?;
    let length = content_length(&headers)?;
    if length > MAX_MESSAGE_BYTES {
        return rtls_err(ErrorCode::DnsResponseFailed);
    }

    let mut response = vec![0u8; length];
    tls.read_exact(&mut response)
        .origin(ErrorCode::DnsResponseFailed)?;
    let _ = tls.close();

    parse_response(&response)
}

/// Cloudflare DoH with anycast fallback.
pub fn cloudflare_resolve(host: &str, rtype: RequestType) -> RtlsResult<IpAddr> {
    resolve_over_https_post(host, IpAddr::V4(CLOUDFLARE_PRIMARY), CLOUDFLARE_NAME, rtype).or_else(
        |_| {
            resolve_over_https_post(host, IpAddr::V4(CLOUDFLARE_SECONDARY), CLOUDFLARE_NAME, rtype)
        },
    )
}

/// Google DoH with anycast fallback.
pub fn google_resolve(host: &str, rtype: RequestType) -> RtlsResult<IpAddr> {
    resolve_over_https_post(host, IpAddr::V4(GOOGLE_PRIMARY), GOOGLE_NAME, rtype)
        .or_else(|_| resolve_over_https_post(host, IpAddr::V4(GOOGLE_SECONDARY), GOOGLE_NAME, rtype))
}

/// Resolves a hostname, preferring IPv6: every provider is tried for AAAA
/// before falling back to A records.
pub fn resolve(host: &str) -> RtlsResult<IpAddr> {
    if host == "localhost" {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    for rtype in [RequestType::Aaaa, RequestType::A] {
        if let Ok(ip) = cloudflare_resolve(host, rtype) {
            return Ok(ip);
        }
        if let Ok(ip) = google_resolve(host, rtype) {
            return Ok(ip);
        }
        if let Ok(ip) = resolve_over_https(host, rtype) {
            return Ok(ip);
        }
        if let Ok(ip) = resolve_over_tls(host, rtype) {
            return Ok(ip);
        }
    }

    rtls_err(ErrorCode::DnsResolveFailed)
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use alloc::string::ToString;

    use super::*;
    use crate::net::tls::tests::hex_to_vec;

    #[test]
    fn query_wire_format() {
        let query = generate_query("example.com", RequestType::A, true).unwrap();
        assert_eq!(
            query.as_slice().to_vec(),
            hex_to_vec(
                "001d\
                 24a1 0100 0001 0000 0000 0000\
                 076578616d706c6503636f6d00\
                 0001 0001"
                    .replace(' ', "")
                    .as_str()
            )
        );
    }

    #[test]
    fn query_without_length_prefix() {
        let query = generate_query("dns.google", RequestType::Aaaa, false).unwrap();
        let bytes = query.as_slice();
        assert_eq!(&bytes[..2], &DNS_ID.to_be_bytes());
        // qtype AAAA sits last but one
        assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x1c, 0x00, 0x01]);
    }

    #[test]
    fn trailing_dot_host() {
        let plain = generate_query("example.com", RequestType::A, false).unwrap();
        let dotted = generate_query("example.com.", RequestType::A, false).unwrap();
        assert_eq!(plain.as_slice(), dotted.as_slice());
    }

    #[test]
    fn oversized_label_rejected() {
        let label = "x".repeat(64);
        let err = generate_query(&label, RequestType::A, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::DnsQueryFailed);
    }

    fn response_with_answers(answers: &[u8], count: u16) -> alloc::vec::Vec<u8> {
        let mut buf = TlsBuffer::new();
        buf.append_u16_be(DNS_ID);
        buf.append_u16_be(0x8180); // response, recursion available
        buf.append_u16_be(1);
        buf.append_u16_be(count);
        buf.append_u16_be(0);
        buf.append_u16_be(0);
        // question: example.com A IN
        buf.append(&hex_to_vec("076578616d706c6503636f6d00"));
        buf.append_u16_be(1);
        buf.append_u16_be(1);
        buf.append(answers);
        buf.as_slice().to_vec()
    }

    #[test]
    fn parse_a_record() {
        // compressed name pointer to offset 12, A IN, ttl 300, 93.184.216.34
        let answer = hex_to_vec("c00c00010001 0000012c 0004 5db8d822".replace(' ', "").as_str());
        let message = response_with_answers(&answer, 1);
        assert_eq!(
            parse_response(&message).unwrap(),
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))
        );
    }

    #[test]
    fn parse_aaaa_record() {
        let answer = hex_to_vec(
            "c00c001c0001 0000012c 0010 20010db8000000000000000000000001"
                .replace(' ', "")
                .as_str(),
        );
        let message = response_with_answers(&answer, 1);
        assert_eq!(
            parse_response(&message).unwrap(),
            IpAddr::V6("2001:db8::1".parse().unwrap())
        );
    }

    #[test]
    fn skips_cname_before_a() {
        // CNAME with a 2-byte compressed target, then the A record
        let mut answers = hex_to_vec("c00c00050001 00000e10 0002 c00c".replace(' ', "").as_str());
        answers.extend(hex_to_vec(
            "c00c00010001 0000012c 0004 01020304".replace(' ', "").as_str(),
        ));
        let message = response_with_answers(&answers, 2);
        assert_eq!(
            parse_response(&message).unwrap(),
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))
        );
    }

    #[test]
    fn rejects_non_response() {
        let mut message = response_with_answers(&hex_to_vec("c00c000100010000012c00045db8d822"), 1);
        message[2] = 0; // clear the response flag
        message[3] = 0;
        assert_eq!(
            parse_response(&message).unwrap_err().code,
            ErrorCode::DnsParseFailed
        );
    }

    #[test]
    fn rejects_empty_answer_section() {
        let message = response_with_answers(&[], 0);
        assert!(parse_response(&message).is_err());
    }

    #[test]
    fn content_length_parsing() {
        let headers = b"HTTP/1.1 200 OK\r\nServer: x\r\nContent-Length: 45\r\n\r\n";
        assert_eq!(content_length(headers).unwrap(), 45);

        let missing = b"HTTP/1.1 200 OK\r\n\r\n";
        assert!(content_length(missing).is_err());

        let not_found = b"HTTP/1.1 404 Not Found\r\nContent-Length: 5\r\n\r\n";
        assert_eq!(
            content_length(not_found).unwrap_err().code,
            ErrorCode::DnsResponseFailed
        );
    }

    #[test]
    fn json_data_extraction() {
        let body = r#"{"Status":0,"Answer":[{"name":"example.com","type":1,"TTL":600,"data":"93.184.216.34"}]}"#;
        assert_eq!(json_data_field(body), Some("93.184.216.34"));

        let spaced = r#"{"Answer":[{"data": "2606:2800:220:1::1"}]}"#;
        assert_eq!(json_data_field(spaced), Some("2606:2800:220:1::1"));

        assert_eq!(json_data_field(r#"{"Status":3}"#), None);
    }

    #[test]
    fn localhost_short_circuits() {
        assert_eq!(
            resolve_over_tls("localhost", RequestType::A).unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            resolve("localhost").unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn request_type_values() {
        assert_eq!(RequestType::A as u16, 1);
        assert_eq!(RequestType::Aaaa as u16, 28);
        // keeps the query's decimal type parameter stable
        assert_eq!((RequestType::Aaaa as u16).to_string(), "28");
    }
}
