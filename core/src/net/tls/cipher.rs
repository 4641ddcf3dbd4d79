//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License
//
//! ---------------------- TLS 1.3 key schedule and record protection ----------

extern crate alloc;
use alloc::vec::Vec;

use crate::common::random::Random;
use crate::net::tls::buffer::TlsBuffer;
use crate::net::tls::chacha20;
use crate::net::tls::ecdh::{EccKey, P256_FIELD_SIZE, P384_FIELD_SIZE};
use crate::net::tls::hkdf;
use crate::net::tls::hmac::HmacSha256;
use crate::net::tls::sha2::Sha256;
use crate::{ErrorCode, Origin, RtlsResult, rtls_err};

/// Number of supported ECC curves.
pub const ECC_COUNT: usize = 2;
/// Client/server random size (RFC 8446 §4.1.2).
pub const RAND_SIZE: usize = 32;
/// Largest hash output the secret slots must hold.
pub const MAX_HASH_LEN: usize = 64;
/// ChaCha20-Poly1305 key size.
pub const CIPHER_KEY_SIZE: usize = 32;
/// Negotiated-suite hash size (SHA-256).
pub const CIPHER_HASH_SIZE: usize = 32;
/// Per-record nonce size (RFC 8446 §5.3).
pub const IV_SIZE: usize = 12;
/// Record content type carried by every protected record.
pub const CONTENT_APPLICATION_DATA: u8 = 0x17;

const ECC_FIELD_SIZES: [usize; ECC_COUNT] = [P256_FIELD_SIZE, P384_FIELD_SIZE];
/// IANA group ids in ClientHello preference order.
pub const ECC_IANA_LIST: [u16; ECC_COUNT] = [0x0017, 0x0018];

/// Elliptic curve groups negotiable in the key_share extension
/// (RFC 8422 §5.1.1). `None` selects the application-key derivation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccGroup {
    None,
    Secp256r1,
    Secp384r1,
}

impl EccGroup {
    pub fn from_iana(value: u16) -> EccGroup {
        match value {
            0x0017 => EccGroup::Secp256r1,
            0x0018 => EccGroup::Secp384r1,
            _ => EccGroup::None,
        }
    }
}

/// Fixed-size secret bytes, zeroed on drop and on explicit wipe.
struct Secret<const N: usize>([u8; N]);

impl<const N: usize> Secret<N> {
    const fn zero() -> Self {
        Secret([0; N])
    }

    fn from_bytes(bytes: [u8; N]) -> Self {
        Secret(bytes)
    }

    fn bytes(&self) -> [u8; N] {
        self.0
    }

    fn wipe(&mut self) {
        for byte in self.0.iter_mut() {
            unsafe { core::ptr::write_volatile(byte, 0) };
        }
    }
}

impl<const N: usize> Drop for Secret<N> {
    fn drop(&mut self) {
        self.wipe();
    }
}

struct RecordKeys {
    client_key: Secret<CIPHER_KEY_SIZE>,
    client_iv: Secret<IV_SIZE>,
    server_key: Secret<CIPHER_KEY_SIZE>,
    server_iv: Secret<IV_SIZE>,
}

/// Cipher-suite state for one connection: transcript hash, ephemeral ECDH
/// keys, the RFC 8446 §7.1 key schedule, and AEAD record protection with
/// per-direction sequence numbers.
pub struct TlsCipher {
    cipher_count: i32,
    client_seq: u64,
    server_seq: u64,
    ecc_keys: [Option<EccKey>; ECC_COUNT],
    public_key: TlsBuffer,
    transcript: Sha256,
    client_random: [u8; RAND_SIZE],
    server_random: [u8; RAND_SIZE],
    // The running Extract output: early secret, then handshake secret, then
    // master secret as the schedule advances.
    extract_secret: Secret<MAX_HASH_LEN>,
    client_traffic: Secret<MAX_HASH_LEN>,
    server_traffic: Secret<MAX_HASH_LEN>,
    keys: Option<RecordKeys>,
    cipher_index: i32,
    is_encoding: bool,
}

impl TlsCipher {
    pub fn new() -> Self {
        TlsCipher {
            cipher_count: 0,
            client_seq: 0,
            server_seq: 0,
            ecc_keys: [None, None],
            public_key: TlsBuffer::new(),
            transcript: Sha256::new(),
            client_random: [0; RAND_SIZE],
            server_random: [0; RAND_SIZE],
            extract_secret: Secret::zero(),
            client_traffic: Secret::zero(),
            server_traffic: Secret::zero(),
            keys: None,
            cipher_index: -1,
            is_encoding: false,
        }
    }

    /// Rewinds to the initial state: ECC keys freed, every secret zeroed,
    /// sequence numbers and the transcript hash restarted.
    pub fn reset(&mut self) {
        self.ecc_keys = [None, None];
        self.public_key.clear();
        self.extract_secret.wipe();
        self.client_traffic.wipe();
        self.server_traffic.wipe();
        self.keys = None;
        self.client_random = [0; RAND_SIZE];
        self.server_random = [0; RAND_SIZE];
        self.cipher_count = 1;
        self.client_seq = 0;
        self.server_seq = 0;
        self.transcript = Sha256::new();
        self.cipher_index = -1;
        self.is_encoding = false;
    }

    /// Fills and returns the ClientHello random.
    pub fn create_client_random(&mut self) -> &[u8; RAND_SIZE] {
        Random::fill(&mut self.client_random);
        &self.client_random
    }

    /// Records the ServerHello parameters and selects the cipher suite.
    pub fn update_server_info(&mut self, server_random: &[u8; RAND_SIZE]) -> RtlsResult<()> {
        self.server_random = *server_random;
        self.cipher_index = 0;
        Ok(())
    }

    pub fn server_random(&self) -> &[u8; RAND_SIZE] {
        &self.server_random
    }

    pub fn update_hash(&mut self, data: &[u8]) {
        self.transcript.update(data);
    }

    /// Snapshot of the running transcript hash.
    pub fn transcript_hash(&self) -> [u8; CIPHER_HASH_SIZE] {
        self.transcript.clone().finalize()
    }

    /// Lazily creates the ephemeral key for the curve at `ecc_index` and
    /// appends its SEC1 point to `out`.
    pub fn compute_public_key(&mut self, ecc_index: usize, out: &mut TlsBuffer) -> RtlsResult<()> {
        if self.ecc_keys[ecc_index].is_none() {
            let key = EccKey::initialize(ECC_FIELD_SIZES[ecc_index])
                .origin(ErrorCode::TlsCipherComputePublicKeyFailed)?;
            self.ecc_keys[ecc_index] = Some(key);
        }
        let Some(key) = &self.ecc_keys[ecc_index] else {
            return rtls_err(ErrorCode::TlsCipherComputePublicKeyFailed);
        };
        key.export_public_key(out)
            .origin(ErrorCode::TlsCipherComputePublicKeyFailed)?;
        Ok(())
    }

    /// ECDH shared secret for the negotiated group.
    pub fn compute_pre_key(
        &mut self,
        group: EccGroup,
        server_key: &[u8],
        premaster: &mut TlsBuffer,
    ) -> RtlsResult<()> {
        let (ecc_index, ecc_size) = match group {
            EccGroup::Secp256r1 => (0, P256_FIELD_SIZE),
            EccGroup::Secp384r1 => (1, P384_FIELD_SIZE),
            EccGroup::None => return rtls_err(ErrorCode::TlsCipherComputePreKeyFailed),
        };

        let mut pubkey = core::mem::take(&mut self.public_key);
        let exported = self.compute_public_key(ecc_index, &mut pubkey);
        self.public_key = pubkey;
        exported.origin(ErrorCode::TlsCipherComputePreKeyFailed)?;

        premaster.resize(ecc_size);
        match &self.ecc_keys[ecc_index] {
            Some(key) => {
                key.compute_shared_secret(server_key, premaster.as_mut_slice())
                    .origin(ErrorCode::TlsCipherComputePreKeyFailed)?;
                Ok(())
            }
            None => rtls_err(ErrorCode::TlsCipherComputePreKeyFailed),
        }
    }

    /// The TLS 1.3 key schedule (RFC 8446 §7.1).
    ///
    /// With a real group this runs the handshake pass: Extract over a
    /// HashLen zero salt, "derived", Extract over the (EC)DHE secret, then
    /// the `c hs traffic` / `s hs traffic` secrets against the current
    /// transcript. With `EccGroup::None` it advances the same secret to the
    /// master secret and derives `c ap traffic` / `s ap traffic` against
    /// `finished_hash`. Both passes install fresh record keys and IVs.
    pub fn compute_key(
        &mut self,
        group: EccGroup,
        server_key: &[u8],
        finished_hash: &[u8],
    ) -> RtlsResult<()> {
        if self.cipher_index == -1 {
            return rtls_err(ErrorCode::TlsCipherComputeKeyFailed);
        }

        let (client_label, server_label): (&[u8], &[u8]) = if group == EccGroup::None {
            (b"c ap traffic", b"s ap traffic")
        } else {
            (b"c hs traffic", b"s hs traffic")
        };

        let zero_ikm = [0u8; CIPHER_HASH_SIZE];
        // A fresh context hashes nothing: H(""), the "derived" label context
        let mut hash = Sha256::new().finalize();
        let mut salt = [0u8; CIPHER_HASH_SIZE];

        if group == EccGroup::None {
            hkdf::expand_label(&mut salt, self.extract_slice(), b"derived", &hash);
            self.store_extract(hkdf::extract(&salt, &zero_ikm));
            if !finished_hash.is_empty() {
                hash.copy_from_slice(&finished_hash[..CIPHER_HASH_SIZE]);
            }
        } else {
            let mut premaster = TlsBuffer::new();
            self.compute_pre_key(group, server_key, &mut premaster)
                .origin(ErrorCode::TlsCipherComputeKeyFailed)?;

            // RFC 8446 §7.1: the initial Extract salt is HashLen zero bytes
            let zero_salt = [0u8; CIPHER_HASH_SIZE];
            self.store_extract(hkdf::extract(&zero_salt, &zero_ikm));
            hkdf::expand_label(&mut salt, self.extract_slice(), b"derived", &hash);
            self.store_extract(hkdf::extract(&salt, premaster.as_slice()));

            hash = self.transcript_hash();
        }

        let mut traffic = [0u8; CIPHER_HASH_SIZE];
        let mut client_key = [0u8; CIPHER_KEY_SIZE];
        let mut client_iv = [0u8; IV_SIZE];
        let mut server_key_bytes = [0u8; CIPHER_KEY_SIZE];
        let mut server_iv = [0u8; IV_SIZE];

        hkdf::expand_label(&mut traffic, self.extract_slice(), client_label, &hash);
        hkdf::expand_label(&mut client_key, &traffic, b"key", b"");
        hkdf::expand_label(&mut client_iv, &traffic, b"iv", b"");
        self.client_traffic.wipe();
        self.client_traffic.0[..CIPHER_HASH_SIZE].copy_from_slice(&traffic);

        hkdf::expand_label(&mut traffic, self.extract_slice(), server_label, &hash);
        hkdf::expand_label(&mut server_key_bytes, &traffic, b"key", b"");
        hkdf::expand_label(&mut server_iv, &traffic, b"iv", b"");
        self.server_traffic.wipe();
        self.server_traffic.0[..CIPHER_HASH_SIZE].copy_from_slice(&traffic);

        self.keys = Some(RecordKeys {
            client_key: Secret::from_bytes(client_key),
            client_iv: Secret::from_bytes(client_iv),
            server_key: Secret::from_bytes(server_key_bytes),
            server_iv: Secret::from_bytes(server_iv),
        });
        Ok(())
    }

    /// Finished verify data: HMAC(finished_key, transcript hash), truncated
    /// to `verify_size`. `remote` selects the server's finished key.
    pub fn compute_verify(
        &self,
        out: &mut TlsBuffer,
        verify_size: usize,
        remote: bool,
    ) -> RtlsResult<()> {
        if self.cipher_index == -1 {
            return rtls_err(ErrorCode::TlsCipherComputeKeyFailed);
        }
        let hash = self.transcript_hash();

        let secret = if remote {
            &self.server_traffic
        } else {
            &self.client_traffic
        };
        let mut finished_key = [0u8; CIPHER_HASH_SIZE];
        hkdf::expand_label(
            &mut finished_key,
            &secret.0[..CIPHER_HASH_SIZE],
            b"finished",
            b"",
        );

        out.resize(verify_size);
        let mut mac = HmacSha256::init(&finished_key);
        mac.update(&hash);
        mac.finalize_into(out.as_mut_slice());
        Ok(())
    }

    /// Protects `packet` into `sendbuf`, which must already hold the 5-byte
    /// record header. With `keep_original` (ChangeCipherSpec, plaintext
    /// alerts) or before keys exist, the packet passes through unchanged.
    /// Otherwise the inner content type is appended, the record sealed with
    /// the per-record nonce `iv XOR seq`, and the client sequence advanced.
    pub fn encode(
        &mut self,
        sendbuf: &mut TlsBuffer,
        packet: &[u8],
        keep_original: bool,
        inner_content_type: u8,
    ) {
        let (key, iv) = match &self.keys {
            Some(keys) if self.is_encoding && !keep_original => {
                (keys.client_key.bytes(), keys.client_iv.bytes())
            }
            _ => {
                sendbuf.append(packet);
                return;
            }
        };

        let seq = self.client_seq;
        self.client_seq = self.client_seq.wrapping_add(1);

        let sealed_size = chacha20::sealed_len(packet.len() + 1) as u16;
        let mut aad = [0u8; 13];
        aad[0] = CONTENT_APPLICATION_DATA;
        aad[1] = sendbuf.as_slice()[1];
        aad[2] = sendbuf.as_slice()[2];
        aad[3..5].copy_from_slice(&sealed_size.to_be_bytes());
        aad[5..13].copy_from_slice(&seq.to_be_bytes());

        let mut plaintext = Vec::with_capacity(packet.len() + 1);
        plaintext.extend_from_slice(packet);
        plaintext.push(inner_content_type);

        let nonce = record_nonce(&iv, seq);
        let sealed = chacha20::seal(&key, &nonce, &aad, &plaintext);
        sendbuf.append(&sealed);
    }

    /// Unprotects one record body. Returns `None` while encryption is not
    /// active (plaintext handshake records pass through). The tag is
    /// verified before any plaintext exists; the inner content type byte is
    /// still attached and stripped by the caller.
    pub fn decode(&mut self, record: &[u8], version: u16) -> RtlsResult<Option<Vec<u8>>> {
        let (key, iv) = match &self.keys {
            Some(keys) if self.is_encoding => (keys.server_key.bytes(), keys.server_iv.bytes()),
            _ => return Ok(None),
        };

        let seq = self.server_seq;
        self.server_seq = self.server_seq.wrapping_add(1);

        let mut aad = [0u8; 13];
        aad[0] = CONTENT_APPLICATION_DATA;
        aad[1..3].copy_from_slice(&version.to_be_bytes());
        aad[3..5].copy_from_slice(&(record.len() as u16).to_be_bytes());
        aad[5..13].copy_from_slice(&seq.to_be_bytes());

        let nonce = record_nonce(&iv, seq);
        let plaintext =
            chacha20::open(&key, &nonce, &aad, record).origin(ErrorCode::TlsCipherDecodeFailed)?;
        Ok(Some(plaintext))
    }

    /// Both directions restart at zero when application keys come online.
    pub fn reset_sequence_numbers(&mut self) {
        self.client_seq = 0;
        self.server_seq = 0;
    }

    pub fn set_encoding(&mut self, encoding: bool) {
        self.is_encoding = encoding;
    }

    pub fn is_encoding(&self) -> bool {
        self.is_encoding
    }

    pub fn is_valid(&self) -> bool {
        self.cipher_count > 0
    }

    pub fn cipher_count(&self) -> i32 {
        self.cipher_count
    }

    fn extract_slice(&self) -> &[u8] {
        &self.extract_secret.0[..CIPHER_HASH_SIZE]
    }

    fn store_extract(&mut self, value: [u8; CIPHER_HASH_SIZE]) {
        self.extract_secret.wipe();
        self.extract_secret.0[..CIPHER_HASH_SIZE].copy_from_slice(&value);
    }
}

impl Default for TlsCipher {
    fn default() -> Self {
        TlsCipher::new()
    }
}

/// Per-record nonce: the write IV XOR the sequence number left-padded to
/// 12 bytes (RFC 8446 §5.3).
fn record_nonce(iv: &[u8; IV_SIZE], seq: u64) -> [u8; IV_SIZE] {
    let mut nonce = [0u8; IV_SIZE];
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    for (n, iv_byte) in nonce.iter_mut().zip(iv.iter()) {
        *n ^= iv_byte;
    }
    nonce
}
