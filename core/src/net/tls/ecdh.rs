//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License
//
//! ---------------------- Ephemeral ECDH keys (secp256r1/secp384r1) -----------
//
//! The big-integer point arithmetic is not part of this crate. Embedders
//! install a [`CurveMath`] table per curve at startup; until then every key
//! operation fails with `EccInitFailed`.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::common::random::Random;
use crate::net::tls::buffer::TlsBuffer;
use crate::{ErrorCode, RtlsResult, rtls_err};

/// secp256r1 scalar / coordinate width in bytes.
pub const P256_FIELD_SIZE: usize = 32;
/// secp384r1 scalar / coordinate width in bytes.
pub const P384_FIELD_SIZE: usize = 48;

const MAX_FIELD_SIZE: usize = P384_FIELD_SIZE;

/// Uncompressed SEC1 point marker.
const SEC1_UNCOMPRESSED: u8 = 0x04;

/// Scalar-point multiplication for one curve, provided by the embedder.
///
/// `public_key` derives the affine public point `X || Y` (2 × field size)
/// from a scalar; `shared_secret` multiplies the peer point `X || Y` by the
/// scalar and writes the X coordinate. Both return false on invalid input
/// (scalar out of range, point not on the curve, point at infinity).
pub struct CurveMath {
    pub public_key: fn(scalar: &[u8], out: &mut [u8]) -> bool,
    pub shared_secret: fn(scalar: &[u8], peer: &[u8], out: &mut [u8]) -> bool,
}

static P256_MATH: AtomicPtr<CurveMath> = AtomicPtr::new(ptr::null_mut());
static P384_MATH: AtomicPtr<CurveMath> = AtomicPtr::new(ptr::null_mut());

/// Installs the curve backends. Call once before the first handshake.
pub fn install(p256: &'static CurveMath, p384: &'static CurveMath) {
    P256_MATH.store(p256 as *const CurveMath as *mut CurveMath, Ordering::Release);
    P384_MATH.store(p384 as *const CurveMath as *mut CurveMath, Ordering::Release);
}

fn math_for(field_size: usize) -> Option<&'static CurveMath> {
    let slot = match field_size {
        P256_FIELD_SIZE => &P256_MATH,
        P384_FIELD_SIZE => &P384_MATH,
        _ => return None,
    };
    let ptr = slot.load(Ordering::Acquire);
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*ptr })
    }
}

/// One ephemeral private key. The scalar is zeroed on drop.
#[derive(Debug)]
pub struct EccKey {
    scalar: [u8; MAX_FIELD_SIZE],
    field_size: usize,
}

impl EccKey {
    /// Generates a fresh private scalar for the curve with the given field
    /// size (32 = secp256r1, 48 = secp384r1).
    pub fn initialize(field_size: usize) -> RtlsResult<Self> {
        if math_for(field_size).is_none() {
            return rtls_err(ErrorCode::EccInitFailed);
        }
        let mut key = EccKey {
            scalar: [0; MAX_FIELD_SIZE],
            field_size,
        };
        Random::fill(&mut key.scalar[..field_size]);
        Ok(key)
    }

    pub fn field_size(&self) -> usize {
        self.field_size
    }

    /// Appends the uncompressed SEC1 public point (`0x04 || X || Y`) and
    /// returns the number of bytes written.
    pub fn export_public_key(&self, out: &mut TlsBuffer) -> RtlsResult<usize> {
        let math = match math_for(self.field_size) {
            Some(m) => m,
            None => return rtls_err(ErrorCode::EccExportKeyFailed),
        };

        let mut point = [0u8; 2 * MAX_FIELD_SIZE];
        let point = &mut point[..2 * self.field_size];
        if !(math.public_key)(&self.scalar[..self.field_size], point) {
            return rtls_err(ErrorCode::EccExportKeyFailed);
        }

        out.append_u8(SEC1_UNCOMPRESSED);
        out.append(point);
        Ok(1 + point.len())
    }

    /// ECDH: writes the big-endian X coordinate of `scalar × peer_point`.
    /// Accepts the peer point with or without the SEC1 0x04 prefix.
    pub fn compute_shared_secret(&self, peer: &[u8], out: &mut [u8]) -> RtlsResult<usize> {
        let math = match math_for(self.field_size) {
            Some(m) => m,
            None => return rtls_err(ErrorCode::EccSharedSecretFailed),
        };

        let coords = 2 * self.field_size;
        let point = if peer.len() == coords + 1 && peer[0] == SEC1_UNCOMPRESSED {
            &peer[1..]
        } else if peer.len() == coords {
            peer
        } else {
            return rtls_err(ErrorCode::EccSharedSecretFailed);
        };

        if out.len() < self.field_size {
            return rtls_err(ErrorCode::EccSharedSecretFailed);
        }
        if !(math.shared_secret)(
            &self.scalar[..self.field_size],
            point,
            &mut out[..self.field_size],
        ) {
            return rtls_err(ErrorCode::EccSharedSecretFailed);
        }
        Ok(self.field_size)
    }
}

impl Drop for EccKey {
    fn drop(&mut self) {
        for byte in self.scalar.iter_mut() {
            unsafe { ptr::write_volatile(byte, 0) };
        }
    }
}
