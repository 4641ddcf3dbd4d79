//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License
//
//! ---------------------- HMAC (RFC 2104) -------------------------------------

use crate::net::tls::sha2::{Digest, Sha256, Sha384};

const MAX_BLOCK_SIZE: usize = 128;
const MAX_DIGEST_SIZE: usize = 64;

/// Keyed MAC over any [`Digest`]. The keyed inner/outer states are kept so a
/// context can be reset and reused without rehashing the key.
#[derive(Clone)]
pub struct Hmac<D: Digest> {
    inner_init: D,
    outer_init: D,
    inner: D,
}

pub type HmacSha256 = Hmac<Sha256>;
pub type HmacSha384 = Hmac<Sha384>;

impl<D: Digest> Hmac<D> {
    pub fn init(key: &[u8]) -> Self {
        // Keys longer than a block are shortened with the digest first
        let mut key_block = [0u8; MAX_BLOCK_SIZE];
        if key.len() > D::BLOCK_SIZE {
            let mut ctx = D::new();
            ctx.update(key);
            ctx.finalize_into(&mut key_block[..D::DIGEST_SIZE]);
        } else {
            key_block[..key.len()].copy_from_slice(key);
        }

        let mut inner_pad = [0u8; MAX_BLOCK_SIZE];
        let mut outer_pad = [0u8; MAX_BLOCK_SIZE];
        for i in 0..D::BLOCK_SIZE {
            inner_pad[i] = key_block[i] ^ 0x36;
            outer_pad[i] = key_block[i] ^ 0x5c;
        }

        let mut inner_init = D::new();
        inner_init.update(&inner_pad[..D::BLOCK_SIZE]);
        let mut outer_init = D::new();
        outer_init.update(&outer_pad[..D::BLOCK_SIZE]);

        let inner = inner_init.clone();
        Hmac {
            inner_init,
            outer_init,
            inner,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Writes the MAC, truncated to `out.len()` when shorter than the digest.
    pub fn finalize_into(self, out: &mut [u8]) {
        let mut digest = [0u8; MAX_DIGEST_SIZE];
        self.inner.finalize_into(&mut digest[..D::DIGEST_SIZE]);

        let mut outer = self.outer_init;
        outer.update(&digest[..D::DIGEST_SIZE]);
        outer.finalize_into(&mut digest[..D::DIGEST_SIZE]);

        let n = out.len().min(D::DIGEST_SIZE);
        out[..n].copy_from_slice(&digest[..n]);
    }

    /// Rewinds the context to its keyed state for another message.
    pub fn reset(&mut self) {
        self.inner = self.inner_init.clone();
    }
}

impl Hmac<Sha256> {
    /// One-call MAC.
    pub fn compute(key: &[u8], data: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::init(key);
        mac.update(data);
        let mut out = [0u8; 32];
        mac.finalize_into(&mut out);
        out
    }
}

impl Hmac<Sha384> {
    pub fn compute(key: &[u8], data: &[u8]) -> [u8; 48] {
        let mut mac = HmacSha384::init(key);
        mac.update(data);
        let mut out = [0u8; 48];
        mac.finalize_into(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tls::tests::hex_to_vec;

    #[test]
    fn hmac_sha256_short() {
        assert_eq!(
            HmacSha256::compute(b"secret", b"Hello").to_vec(),
            hex_to_vec("0cc692f2177b42b6e5cd82488ee6c5d526a007c571e7de1fec07c1e2b1dfa2e2")
        );
    }

    #[test]
    fn hmac_sha256_long() {
        let data = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. Ut enim ad minim veniam, quis nostrud exercitation ullamco laboris nisi ut aliquip ex ea commodo consequat.";
        assert_eq!(
            HmacSha256::compute(b"secret", data.as_bytes()).to_vec(),
            hex_to_vec("602a9c4d44feea742c6775c21d686ccd899ee4c8363d7c03535b949c16a6b6d8")
        );
    }

    /// RFC 4231 test case 2 ("what do ya want for nothing?")
    #[test]
    fn hmac_rfc4231_case2() {
        let key = b"Jefe";
        let data = b"what do ya want for nothing?";
        assert_eq!(
            HmacSha256::compute(key, data).to_vec(),
            hex_to_vec("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
        assert_eq!(
            HmacSha384::compute(key, data).to_vec(),
            hex_to_vec(
                "af45d2e376484031617f78d2b58a6b1b9c7ef464f5a01b47e42ec3736322445e8e2240ca5e69e2c78b3239ecfab21649"
            )
        );
    }

    /// RFC 4231 test case 3 (key longer than processed data, 0xaa/0xdd fill)
    #[test]
    fn hmac_rfc4231_case3() {
        let key = [0xaau8; 20];
        let data = [0xddu8; 50];
        assert_eq!(
            HmacSha256::compute(&key, &data).to_vec(),
            hex_to_vec("773ea91e36800e46854db8ebd09181a72959098b3ef8c122d9635514ced565fe")
        );
    }

    #[test]
    fn reset_reuses_keyed_state() {
        let mut mac = HmacSha256::init(b"secret");
        mac.update(b"first message");
        mac.reset();
        mac.update(b"Hello");
        let mut out = [0u8; 32];
        mac.finalize_into(&mut out);
        assert_eq!(out, HmacSha256::compute(b"secret", b"Hello"));
    }

    #[test]
    fn truncated_output() {
        let full = HmacSha256::compute(b"k", b"m");
        let mut mac = HmacSha256::init(b"k");
        mac.update(b"m");
        let mut short = [0u8; 12];
        mac.finalize_into(&mut short);
        assert_eq!(short, full[..12]);
    }
}
