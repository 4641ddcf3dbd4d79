//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License
//
//! ---------------------- HKDF (RFC 5869 + RFC 8446 §7.1) ---------------------

extern crate alloc;
use alloc::vec::Vec;

use crate::net::tls::hmac::HmacSha256;

const HASH_LEN: usize = 32;

/// HKDF-Extract: PRK = HMAC-Hash(salt, IKM). An empty salt means a string of
/// HashLen zero bytes, which is also what the TLS 1.3 key schedule feeds the
/// very first Extract.
pub fn extract(salt: &[u8], ikm: &[u8]) -> [u8; HASH_LEN] {
    let zero_salt = [0u8; HASH_LEN];
    let key = if salt.is_empty() { &zero_salt[..] } else { salt };
    HmacSha256::compute(key, ikm)
}

/// HKDF-Expand: iterative HMAC with a counter byte, truncated to `out.len()`.
pub fn expand(out: &mut [u8], prk: &[u8], info: &[u8]) {
    debug_assert!(out.len() <= 255 * HASH_LEN);

    let mut previous = [0u8; HASH_LEN];
    let mut counter: u8 = 0;
    let mut written = 0;

    while written < out.len() {
        counter += 1;
        let mut mac = HmacSha256::init(prk);
        if counter > 1 {
            mac.update(&previous);
        }
        mac.update(info);
        mac.update(&[counter]);
        mac.finalize_into(&mut previous);

        let take = (out.len() - written).min(HASH_LEN);
        out[written..written + take].copy_from_slice(&previous[..take]);
        written += take;
    }
}

/// HKDF-Expand-Label with the TLS 1.3 `HkdfLabel` structure:
/// u16 output length, one prefixed-length byte, `"tls13 " + label`, one
/// context-length byte, the context bytes.
pub fn expand_label(out: &mut [u8], secret: &[u8], label: &[u8], context: &[u8]) {
    let info = hkdf_label(label, context, out.len() as u16);
    expand(out, secret, &info);
}

fn hkdf_label(label: &[u8], context: &[u8], length: u16) -> Vec<u8> {
    const PREFIX: &[u8] = b"tls13 ";

    let mut info = Vec::with_capacity(2 + 1 + PREFIX.len() + label.len() + 1 + context.len());
    info.extend_from_slice(&length.to_be_bytes());
    info.push((PREFIX.len() + label.len()) as u8);
    info.extend_from_slice(PREFIX);
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    info
}
