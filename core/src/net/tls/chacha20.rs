//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License
//
//! ---------------------- ChaCha20-Poly1305 AEAD (RFC 8439) -------------------

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;

use crate::{ErrorCode, RtlsResult, rtls_err};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const BLOCK_LEN: usize = 64;
const POLY1305_BLOCK_SIZE: usize = 16;

// "expand 32-byte k" as little-endian words
const SIGMA: [u32; 4] = [0x61707865, 0x3320646e, 0x79622d32, 0x6b206574];

/// Sealed size of a record payload: ciphertext plus the 16-byte tag.
pub const fn sealed_len(plaintext_len: usize) -> usize {
    plaintext_len + TAG_LEN
}

/// Encrypts and authenticates. Returns `ciphertext || tag`.
pub fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let poly_key = poly1305_key_gen(key, nonce);

    let mut out = vec![0u8; sealed_len(plaintext.len())];
    // Counter 0 produced the one-time Poly1305 key, the stream starts at 1
    let mut ctx = ChaCha20::new(key, nonce, 1);
    ctx.xor_stream(plaintext, &mut out[..plaintext.len()]);

    let mut poly = Poly1305::new(&poly_key);
    poly_aad_and_ciphertext(&mut poly, aad, &out[..plaintext.len()]);
    let tag = poly.finalize();
    out[plaintext.len()..].copy_from_slice(&tag);
    out
}

/// Authenticates, then decrypts. The tag is recomputed and compared in
/// constant time before any plaintext byte is produced; on mismatch nothing
/// is emitted.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    sealed: &[u8],
) -> RtlsResult<Vec<u8>> {
    if sealed.len() < TAG_LEN {
        return rtls_err(ErrorCode::ChaCha20DecodeFailed);
    }
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let poly_key = poly1305_key_gen(key, nonce);
    let mut poly = Poly1305::new(&poly_key);
    poly_aad_and_ciphertext(&mut poly, aad, ciphertext);
    let expected = poly.finalize();

    if !constant_time_eq(&expected, tag) {
        return rtls_err(ErrorCode::ChaCha20DecodeFailed);
    }

    let mut out = vec![0u8; ciphertext.len()];
    let mut ctx = ChaCha20::new(key, nonce, 1);
    ctx.xor_stream(ciphertext, &mut out);
    Ok(out)
}

/// One ChaCha20 keystream block for the given counter.
pub fn chacha20_block(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], counter: u32) -> [u8; BLOCK_LEN] {
    ChaCha20::new(key, nonce, counter).block()
}

/// Raw stream encryption with an explicit initial counter.
pub fn chacha20_encrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    counter: u32,
    data: &[u8],
) -> Vec<u8> {
    let mut out = vec![0u8; data.len()];
    ChaCha20::new(key, nonce, counter).xor_stream(data, &mut out);
    out
}

/// One-time Poly1305 key: the first half of ChaCha20 block 0.
pub fn poly1305_key_gen(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN]) -> [u8; 32] {
    let block = chacha20_block(key, nonce, 0);
    let mut poly_key = [0u8; 32];
    poly_key.copy_from_slice(&block[..32]);
    poly_key
}

/// One-shot Poly1305 MAC.
pub fn poly1305_mac(key: &[u8; 32], data: &[u8]) -> [u8; TAG_LEN] {
    let mut poly = Poly1305::new(key);
    poly.update(data);
    poly.finalize()
}

/// Branch-free tag comparison: any early exit on a matching prefix would
/// reopen the timing oracle.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for i in 0..a.len() {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

// ================= ChaCha20 core ================= //

struct ChaCha20 {
    state: [u32; 16],
}

#[inline(always)]
fn quarter_round(s: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    s[a] = s[a].wrapping_add(s[b]);
    s[d] = (s[d] ^ s[a]).rotate_left(16);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] = (s[b] ^ s[c]).rotate_left(12);
    s[a] = s[a].wrapping_add(s[b]);
    s[d] = (s[d] ^ s[a]).rotate_left(8);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] = (s[b] ^ s[c]).rotate_left(7);
}

impl ChaCha20 {
    fn new(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], counter: u32) -> Self {
        let mut state = [0u32; 16];
        state[..4].copy_from_slice(&SIGMA);
        for (i, word) in key.chunks_exact(4).enumerate() {
            state[4 + i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }
        state[12] = counter;
        for (i, word) in nonce.chunks_exact(4).enumerate() {
            state[13 + i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }
        ChaCha20 { state }
    }

    /// Produces the next keystream block and advances the counter.
    fn block(&mut self) -> [u8; BLOCK_LEN] {
        let mut working = self.state;
        // 10 column rounds interleaved with 10 diagonal rounds
        for _ in 0..10 {
            quarter_round(&mut working, 0, 4, 8, 12);
            quarter_round(&mut working, 1, 5, 9, 13);
            quarter_round(&mut working, 2, 6, 10, 14);
            quarter_round(&mut working, 3, 7, 11, 15);
            quarter_round(&mut working, 0, 5, 10, 15);
            quarter_round(&mut working, 1, 6, 11, 12);
            quarter_round(&mut working, 2, 7, 8, 13);
            quarter_round(&mut working, 3, 4, 9, 14);
        }
        for (w, s) in working.iter_mut().zip(self.state.iter()) {
            *w = w.wrapping_add(*s);
        }

        let mut out = [0u8; BLOCK_LEN];
        for (chunk, word) in out.chunks_exact_mut(4).zip(working.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        self.state[12] = self.state[12].wrapping_add(1);
        out
    }

    fn xor_stream(&mut self, src: &[u8], dst: &mut [u8]) {
        for (src_chunk, dst_chunk) in src.chunks(BLOCK_LEN).zip(dst.chunks_mut(BLOCK_LEN)) {
            let keystream = self.block();
            for i in 0..src_chunk.len() {
                dst_chunk[i] = src_chunk[i] ^ keystream[i];
            }
        }
    }
}

impl Drop for ChaCha20 {
    fn drop(&mut self) {
        for word in self.state.iter_mut() {
            unsafe { core::ptr::write_volatile(word, 0) };
        }
    }
}

// ================= Poly1305 ================= //

// Donna-style 26-bit limbs over 2^130 - 5.
struct Poly1305 {
    r: [u32; 5],
    h: [u32; 5],
    pad: [u32; 4],
    buffer: [u8; POLY1305_BLOCK_SIZE],
    leftover: usize,
    finished: bool,
}

#[inline(always)]
fn le32(p: &[u8]) -> u32 {
    u32::from_le_bytes([p[0], p[1], p[2], p[3]])
}

impl Poly1305 {
    fn new(key: &[u8; 32]) -> Self {
        // r &= 0xffffffc0ffffffc0ffffffc0fffffff
        let r = [
            le32(&key[0..]) & 0x3ffffff,
            (le32(&key[3..]) >> 2) & 0x3ffff03,
            (le32(&key[6..]) >> 4) & 0x3ffc0ff,
            (le32(&key[9..]) >> 6) & 0x3f03fff,
            (le32(&key[12..]) >> 8) & 0x00fffff,
        ];
        let pad = [
            le32(&key[16..]),
            le32(&key[20..]),
            le32(&key[24..]),
            le32(&key[28..]),
        ];
        Poly1305 {
            r,
            h: [0; 5],
            pad,
            buffer: [0; POLY1305_BLOCK_SIZE],
            leftover: 0,
            finished: false,
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        if self.leftover > 0 {
            let want = (POLY1305_BLOCK_SIZE - self.leftover).min(data.len());
            self.buffer[self.leftover..self.leftover + want].copy_from_slice(&data[..want]);
            self.leftover += want;
            data = &data[want..];
            if self.leftover < POLY1305_BLOCK_SIZE {
                return;
            }
            let block = self.buffer;
            self.process_blocks(&block);
            self.leftover = 0;
        }

        let full = data.len() & !(POLY1305_BLOCK_SIZE - 1);
        if full > 0 {
            let (blocks, rest) = data.split_at(full);
            self.process_blocks(blocks);
            data = rest;
        }

        if !data.is_empty() {
            self.buffer[..data.len()].copy_from_slice(data);
            self.leftover = data.len();
        }
    }

    fn process_blocks(&mut self, data: &[u8]) {
        let hibit: u32 = if self.finished { 0 } else { 1 << 24 };

        let [r0, r1, r2, r3, r4] = self.r;
        let s1 = r1 * 5;
        let s2 = r2 * 5;
        let s3 = r3 * 5;
        let s4 = r4 * 5;

        let [mut h0, mut h1, mut h2, mut h3, mut h4] = self.h;

        for block in data.chunks_exact(POLY1305_BLOCK_SIZE) {
            // h += m[i]
            h0 += le32(&block[0..]) & 0x3ffffff;
            h1 += (le32(&block[3..]) >> 2) & 0x3ffffff;
            h2 += (le32(&block[6..]) >> 4) & 0x3ffffff;
            h3 += (le32(&block[9..]) >> 6) & 0x3ffffff;
            h4 += (le32(&block[12..]) >> 8) | hibit;

            // h *= r
            let d0 = (h0 as u64) * (r0 as u64)
                + (h1 as u64) * (s4 as u64)
                + (h2 as u64) * (s3 as u64)
                + (h3 as u64) * (s2 as u64)
                + (h4 as u64) * (s1 as u64);
            let mut d1 = (h0 as u64) * (r1 as u64)
                + (h1 as u64) * (r0 as u64)
                + (h2 as u64) * (s4 as u64)
                + (h3 as u64) * (s3 as u64)
                + (h4 as u64) * (s2 as u64);
            let mut d2 = (h0 as u64) * (r2 as u64)
                + (h1 as u64) * (r1 as u64)
                + (h2 as u64) * (r0 as u64)
                + (h3 as u64) * (s4 as u64)
                + (h4 as u64) * (s3 as u64);
            let mut d3 = (h0 as u64) * (r3 as u64)
                + (h1 as u64) * (r2 as u64)
                + (h2 as u64) * (r1 as u64)
                + (h3 as u64) * (r0 as u64)
                + (h4 as u64) * (s4 as u64);
            let mut d4 = (h0 as u64) * (r4 as u64)
                + (h1 as u64) * (r3 as u64)
                + (h2 as u64) * (r2 as u64)
                + (h3 as u64) * (r1 as u64)
                + (h4 as u64) * (r0 as u64);

            // (partial) h %= p
            let mut c = (d0 >> 26) as u32;
            h0 = (d0 as u32) & 0x3ffffff;
            d1 += c as u64;
            c = (d1 >> 26) as u32;
            h1 = (d1 as u32) & 0x3ffffff;
            d2 += c as u64;
            c = (d2 >> 26) as u32;
            h2 = (d2 as u32) & 0x3ffffff;
            d3 += c as u64;
            c = (d3 >> 26) as u32;
            h3 = (d3 as u32) & 0x3ffffff;
            d4 += c as u64;
            c = (d4 >> 26) as u32;
            h4 = (d4 as u32) & 0x3ffffff;
            h0 += c * 5;
            c = h0 >> 26;
            h0 &= 0x3ffffff;
            h1 += c;
        }

        self.h = [h0, h1, h2, h3, h4];
    }

    fn finalize(mut self) -> [u8; TAG_LEN] {
        if self.leftover > 0 {
            let mut i = self.leftover;
            self.buffer[i] = 1;
            i += 1;
            while i < POLY1305_BLOCK_SIZE {
                self.buffer[i] = 0;
                i += 1;
            }
            self.finished = true;
            let block = self.buffer;
            self.process_blocks(&block);
        }

        // fully carry h
        let [mut h0, mut h1, mut h2, mut h3, mut h4] = self.h;
        let mut c;
        c = h1 >> 26;
        h1 &= 0x3ffffff;
        h2 += c;
        c = h2 >> 26;
        h2 &= 0x3ffffff;
        h3 += c;
        c = h3 >> 26;
        h3 &= 0x3ffffff;
        h4 += c;
        c = h4 >> 26;
        h4 &= 0x3ffffff;
        h0 += c * 5;
        c = h0 >> 26;
        h0 &= 0x3ffffff;
        h1 += c;

        // compute h + -p
        let mut g0 = h0.wrapping_add(5);
        c = g0 >> 26;
        g0 &= 0x3ffffff;
        let mut g1 = h1.wrapping_add(c);
        c = g1 >> 26;
        g1 &= 0x3ffffff;
        let mut g2 = h2.wrapping_add(c);
        c = g2 >> 26;
        g2 &= 0x3ffffff;
        let mut g3 = h3.wrapping_add(c);
        c = g3 >> 26;
        g3 &= 0x3ffffff;
        let g4 = h4.wrapping_add(c).wrapping_sub(1 << 26);

        // select h if h < p, or h + -p if h >= p
        let mut mask = (g4 >> 31).wrapping_sub(1);
        g0 &= mask;
        g1 &= mask;
        g2 &= mask;
        g3 &= mask;
        let g4 = g4 & mask;
        mask = !mask;
        h0 = (h0 & mask) | g0;
        h1 = (h1 & mask) | g1;
        h2 = (h2 & mask) | g2;
        h3 = (h3 & mask) | g3;
        h4 = (h4 & mask) | g4;

        // h = h % 2^128
        h0 |= h1 << 26;
        h1 = (h1 >> 6) | (h2 << 20);
        h2 = (h2 >> 12) | (h3 << 14);
        h3 = (h3 >> 18) | (h4 << 8);

        // mac = (h + pad) % 2^128
        let mut f = (h0 as u64) + (self.pad[0] as u64);
        h0 = f as u32;
        f = (h1 as u64) + (self.pad[1] as u64) + (f >> 32);
        h1 = f as u32;
        f = (h2 as u64) + (self.pad[2] as u64) + (f >> 32);
        h2 = f as u32;
        f = (h3 as u64) + (self.pad[3] as u64) + (f >> 32);
        h3 = f as u32;

        let mut mac = [0u8; TAG_LEN];
        mac[0..4].copy_from_slice(&h0.to_le_bytes());
        mac[4..8].copy_from_slice(&h1.to_le_bytes());
        mac[8..12].copy_from_slice(&h2.to_le_bytes());
        mac[12..16].copy_from_slice(&h3.to_le_bytes());
        mac
    }
}

impl Drop for Poly1305 {
    fn drop(&mut self) {
        for word in self.r.iter_mut().chain(self.h.iter_mut()).chain(self.pad.iter_mut()) {
            unsafe { core::ptr::write_volatile(word, 0) };
        }
        for byte in self.buffer.iter_mut() {
            unsafe { core::ptr::write_volatile(byte, 0) };
        }
    }
}

/// Authenticates `aad || pad16(aad) || ct || pad16(ct) || le64(|aad|) || le64(|ct|)`.
fn poly_aad_and_ciphertext(poly: &mut Poly1305, aad: &[u8], ciphertext: &[u8]) {
    const ZEROPAD: [u8; POLY1305_BLOCK_SIZE] = [0; POLY1305_BLOCK_SIZE];

    poly.update(aad);
    let rem = aad.len() % POLY1305_BLOCK_SIZE;
    if rem != 0 {
        poly.update(&ZEROPAD[..POLY1305_BLOCK_SIZE - rem]);
    }
    poly.update(ciphertext);
    let rem = ciphertext.len() % POLY1305_BLOCK_SIZE;
    if rem != 0 {
        poly.update(&ZEROPAD[..POLY1305_BLOCK_SIZE - rem]);
    }

    let mut trail = [0u8; 16];
    trail[..8].copy_from_slice(&(aad.len() as u64).to_le_bytes());
    trail[8..].copy_from_slice(&(ciphertext.len() as u64).to_le_bytes());
    poly.update(&trail);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tls::tests::hex_to_vec;

    const SUNSCREEN: &[u8] = b"Ladies and Gentlemen of the class of '99: If I could offer you only one tip for the future, sunscreen would be it.";

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    fn aead_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = 0x80 + i as u8;
        }
        key
    }

    /// RFC 8439 §2.3.2 block function test vector
    #[test]
    fn block_rfc8439() {
        let nonce: [u8; 12] = hex_to_vec("000000090000004a00000000").try_into().unwrap();
        let block = chacha20_block(&test_key(), &nonce, 1);
        assert_eq!(
            block.to_vec(),
            hex_to_vec(
                "10f1e7e4d13b5915500fdd1fa32071c4c7d1f4c733c068030422aa9ac3d46c4e\
                 d2826446079faa0914c2d705d98b02a2b5129cd1de164eb9cbd083e8a2503c4e"
            )
        );
    }

    /// RFC 8439 §2.4.2 encryption test vector
    #[test]
    fn encrypt_rfc8439() {
        let nonce: [u8; 12] = hex_to_vec("000000000000004a00000000").try_into().unwrap();
        let ct = chacha20_encrypt(&test_key(), &nonce, 1, SUNSCREEN);
        assert_eq!(
            ct,
            hex_to_vec(
                "6e2e359a2568f98041ba0728dd0d6981e97e7aec1d4360c20a27afccfd9fae0b\
                 f91b65c5524733ab8f593dabcd62b3571639d624e65152ab8f530c359f0861d8\
                 07ca0dbf500d6a6156a38e088a22b65e52bc514d16ccf806818ce91ab7793736\
                 5af90bbf74a35be6b40b8eedf2785e42874d"
            )
        );
    }

    /// RFC 8439 §2.5.2 Poly1305 test vector
    #[test]
    fn poly1305_rfc8439() {
        let key: [u8; 32] =
            hex_to_vec("85d6be7857556d337f4452fe42d506a80103808afb0db2fd4abff6af4149f51b")
                .try_into()
                .unwrap();
        let tag = poly1305_mac(&key, b"Cryptographic Forum Research Group");
        assert_eq!(tag.to_vec(), hex_to_vec("a8061dc1305136c6c22b8baf0c0127a9"));
    }

    /// RFC 8439 §2.6.2 one-time key generation test vector
    #[test]
    fn poly1305_key_gen_rfc8439() {
        let nonce: [u8; 12] = hex_to_vec("000000000001020304050607").try_into().unwrap();
        let poly_key = poly1305_key_gen(&aead_key(), &nonce);
        assert_eq!(
            poly_key.to_vec(),
            hex_to_vec("8ad5a08b905f81cc815040274ab29471a833b637e3fd0da508dbb8e2fdd1a646")
        );
    }

    /// RFC 8439 §2.8.2 AEAD test vector, ciphertext and tag verbatim
    #[test]
    fn seal_rfc8439() {
        let nonce: [u8; 12] = hex_to_vec("070000004041424344454647").try_into().unwrap();
        let aad = hex_to_vec("50515253c0c1c2c3c4c5c6c7");

        let sealed = seal(&aead_key(), &nonce, &aad, SUNSCREEN);
        assert_eq!(
            sealed,
            hex_to_vec(
                "d31a8d34648e60db7b86afbc53ef7ec2a4aded51296e08fea9e2b5a736ee62d6\
                 3dbea45e8ca9671282fafb69da92728b1a71de0a9e060b2905d6a5b67ecd3b36\
                 92ddbd7f2d778b8c9803aee328091b58fab324e4fad675945585808b4831d7bc\
                 3ff4def08e4b7a9de576d26586cec64b6116\
                 1ae10b594f09e26a7e902ecbd0600691"
            )
        );
    }

    #[test]
    fn open_round_trips() {
        let key = aead_key();
        let nonce: [u8; 12] = hex_to_vec("070000004041424344454647").try_into().unwrap();
        let aad = b"record header";

        let sealed = seal(&key, &nonce, aad, SUNSCREEN);
        let opened = open(&key, &nonce, aad, &sealed).unwrap();
        assert_eq!(opened, SUNSCREEN);
    }

    #[test]
    fn open_empty_plaintext() {
        let key = aead_key();
        let nonce = [7u8; 12];
        let sealed = seal(&key, &nonce, b"aad", b"");
        assert_eq!(sealed.len(), TAG_LEN);
        assert_eq!(open(&key, &nonce, b"aad", &sealed).unwrap(), b"");
    }

    /// Any single corrupted bit must fail authentication and yield nothing.
    #[test]
    fn open_rejects_tampering() {
        let key = aead_key();
        let nonce: [u8; 12] = hex_to_vec("070000004041424344454647").try_into().unwrap();
        let aad = hex_to_vec("50515253c0c1c2c3c4c5c6c7");
        let sealed = seal(&key, &nonce, &aad, SUNSCREEN);

        // ciphertext bit
        let mut bad = sealed.clone();
        bad[0] ^= 0x01;
        assert_eq!(
            open(&key, &nonce, &aad, &bad).unwrap_err().code,
            ErrorCode::ChaCha20DecodeFailed
        );

        // tag bit
        let mut bad = sealed.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x80;
        assert!(open(&key, &nonce, &aad, &bad).is_err());

        // aad bit
        let mut bad_aad = aad.clone();
        bad_aad[3] ^= 0x10;
        assert!(open(&key, &nonce, &bad_aad, &sealed).is_err());

        // key bit
        let mut bad_key = key;
        bad_key[31] ^= 0x04;
        assert!(open(&bad_key, &nonce, &aad, &sealed).is_err());

        // nonce bit
        let mut bad_nonce = nonce;
        bad_nonce[0] ^= 0x02;
        assert!(open(&key, &bad_nonce, &aad, &sealed).is_err());
    }

    #[test]
    fn short_input_rejected() {
        let key = aead_key();
        let nonce = [0u8; 12];
        assert!(open(&key, &nonce, b"", &[0u8; 15]).is_err());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"diff"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
