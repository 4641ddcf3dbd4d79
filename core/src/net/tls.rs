//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License
//
//! ---------------------- TLS 1.3 client (ChaCha20-Poly1305 + P-256/P-384) ----

extern crate alloc;
use alloc::vec::Vec;

use core::net::IpAddr;

use crate::common::io::{Read, Write};
use crate::log_debug;
use crate::net::socket::TcpSocket;
use crate::net::tls::buffer::{TlsBuffer, TlsReader};
use crate::net::tls::cipher::{
    CONTENT_APPLICATION_DATA, ECC_IANA_LIST, EccGroup, RAND_SIZE, TlsCipher,
};
use crate::{Error, ErrorCode, Origin, RtlsResult, rtls_err, rtls_error};

pub mod buffer;
pub mod chacha20;
pub mod cipher;
pub mod ecdh;
pub mod hkdf;
pub mod hmac;
pub mod sha2;

const TLS_CHACHA20_POLY1305_SHA256: u16 = 0x1303;
const LEGACY_VERSION: u16 = 0x0303;
const TLS13: u16 = 0x0304;

// Record content types (RFC 8446 §5.1)
const CONTENT_CHANGE_CIPHER_SPEC: u8 = 0x14;
const CONTENT_ALERT: u8 = 0x15;
const CONTENT_HANDSHAKE: u8 = 0x16;

// Handshake message types (RFC 8446 §4)
const MSG_CLIENT_HELLO: u8 = 0x01;
const MSG_SERVER_HELLO: u8 = 0x02;
const MSG_ENCRYPTED_EXTENSIONS: u8 = 0x08;
const MSG_CERTIFICATE: u8 = 0x0b;
const MSG_CERTIFICATE_VERIFY: u8 = 0x0f;
const MSG_FINISHED: u8 = 0x14;
// Only used inside CONTENT_CHANGE_CIPHER_SPEC records
const MSG_CHANGE_CIPHER_SPEC: u8 = 0x01;

// https://www.iana.org/assignments/tls-extensiontype-values/tls-extensiontype-values.xhtml
const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
const EXT_KEY_SHARE: u16 = 0x0033;

const SIGNATURE_ALGORITHM_LIST: [u16; 11] = [
    0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203, 0x0201,
];

/// Expected (content type, handshake type) per handshake step.
const STATE_SEQ: [(u8, u8); 6] = [
    (CONTENT_HANDSHAKE, MSG_SERVER_HELLO),
    (CONTENT_CHANGE_CIPHER_SPEC, MSG_CHANGE_CIPHER_SPEC),
    (CONTENT_HANDSHAKE, MSG_ENCRYPTED_EXTENSIONS),
    (CONTENT_HANDSHAKE, MSG_CERTIFICATE),
    (CONTENT_HANDSHAKE, MSG_CERTIFICATE_VERIFY),
    (CONTENT_HANDSHAKE, MSG_FINISHED),
];
const HANDSHAKE_DONE: usize = STATE_SEQ.len();

/// Receive chunk reserved per socket read.
const RECV_CHUNK: usize = 16 * 1024;
/// Largest plaintext fragment per application record (RFC 8446 §5.1).
const MAX_FRAGMENT: usize = 16 * 1024;
/// Channel compaction thresholds: drained past 3/4 of a >1 MiB buffer.
const CHANNEL_COMPACT_SIZE: usize = 1024 * 1024;

fn need<T>(value: Option<T>, code: ErrorCode) -> RtlsResult<T> {
    value.ok_or(rtls_error(code))
}

/// TLS 1.3 client over a raw TCP socket, or a transparent byte pipe when
/// created with `secure = false`.
///
/// The handshake negotiates `TLS_CHACHA20_POLY1305_SHA256` with an ECDHE
/// key share on secp256r1 or secp384r1. Certificate and CertificateVerify
/// messages are accepted but NOT validated: the channel is private against
/// passive observers, while the peer's identity is not proven. Callers that
/// need authentication must layer their own trust check.
pub struct TlsClient<'a> {
    host: &'a str,
    ip: IpAddr,
    socket: TcpSocket,
    crypto: TlsCipher,
    secure: bool,
    state_index: usize,
    recv_buffer: TlsBuffer,
    channel_buffer: TlsBuffer,
    channel_bytes_read: usize,
}

impl<'a> TlsClient<'a> {
    /// Creates the client and its socket without connecting. `host` is the
    /// SNI name and must outlive the client.
    pub fn create(host: &'a str, ip: IpAddr, port: u16, secure: bool) -> RtlsResult<Self> {
        let socket = TcpSocket::create(ip, port).origin(ErrorCode::TlsCreateFailed)?;
        Ok(TlsClient {
            host,
            ip,
            socket,
            crypto: TlsCipher::new(),
            secure,
            state_index: 0,
            recv_buffer: TlsBuffer::new(),
            channel_buffer: TlsBuffer::new(),
            channel_bytes_read: 0,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.socket.is_valid()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Connects and, in secure mode, drives the handshake to completion.
    pub fn open(&mut self) -> RtlsResult<()> {
        log_debug!("connecting to {} secure: {}", self.host, self.secure);
        self.crypto.reset();

        self.socket.open().origin(ErrorCode::TlsOpenFailedSocket)?;
        if !self.secure {
            return Ok(());
        }

        self.send_client_hello()
            .origin(ErrorCode::TlsOpenFailedHandshake)?;
        while self.state_index < HANDSHAKE_DONE {
            self.process_receive()
                .origin(ErrorCode::TlsOpenFailedHandshake)?;
        }
        Ok(())
    }

    /// Zeroes cipher state, drops buffered data and closes the socket.
    pub fn close(&mut self) -> RtlsResult<()> {
        self.state_index = 0;
        self.channel_bytes_read = 0;

        if self.secure {
            self.recv_buffer.clear();
            self.channel_buffer.clear();
            self.crypto.reset();
        }

        self.socket.close().origin(ErrorCode::TlsCloseFailedSocket)
    }

    /// Reads decrypted application data, blocking on the socket while the
    /// channel is empty. Plaintext mode forwards straight to the socket.
    pub fn read(&mut self, buffer: &mut [u8]) -> RtlsResult<usize> {
        if !self.secure {
            return self
                .socket
                .read(buffer)
                .origin(ErrorCode::TlsReadFailedReceive);
        }

        if self.state_index < HANDSHAKE_DONE {
            return rtls_err(ErrorCode::TlsReadFailedNotReady);
        }

        while self.channel_buffer.len() <= self.channel_bytes_read {
            self.process_receive()
                .origin(ErrorCode::TlsReadFailedReceive)?;
        }

        self.read_channel(buffer)
    }

    /// Writes application data, fragmenting into records of at most 16 KiB.
    /// Returns the number of caller bytes accepted, which on success is all
    /// of them.
    pub fn write(&mut self, buffer: &[u8]) -> RtlsResult<u32> {
        if !self.secure {
            return self
                .socket
                .write(buffer)
                .origin(ErrorCode::TlsWriteFailedSend)
                .map(|n| n as u32);
        }

        if self.state_index < HANDSHAKE_DONE {
            return rtls_err(ErrorCode::TlsWriteFailedNotReady);
        }

        let mut sent = 0;
        while sent < buffer.len() {
            let chunk = (buffer.len() - sent).min(MAX_FRAGMENT);
            self.send_packet(
                CONTENT_APPLICATION_DATA,
                LEGACY_VERSION,
                &buffer[sent..sent + chunk],
            )
            .origin(ErrorCode::TlsWriteFailedSend)?;
            sent += chunk;
        }
        Ok(buffer.len() as u32)
    }

    // ---------------------- Sending ----------------------

    /// Frames `body` into one record, protecting it once encryption is
    /// active. Handshake payloads enter the transcript here.
    fn send_packet(&mut self, packet_type: u8, version: u16, body: &[u8]) -> RtlsResult<()> {
        if packet_type == CONTENT_HANDSHAKE && !body.is_empty() {
            self.crypto.update_hash(body);
        }

        let mut record = TlsBuffer::with_capacity(body.len() + 32);
        record.append_u8(packet_type);
        record.append_u16_be(version);
        let size_at = record.append_size(2);

        let keep_original =
            packet_type == CONTENT_CHANGE_CIPHER_SPEC || packet_type == CONTENT_ALERT;
        if !keep_original && self.crypto.is_encoding() {
            record.as_mut_slice()[0] = CONTENT_APPLICATION_DATA;
        }
        self.crypto.encode(&mut record, body, keep_original, packet_type);

        record.patch_u16_be(size_at, (record.len() - size_at - 2) as u16);
        self.socket
            .write(record.as_slice())
            .origin(ErrorCode::TlsSendPacketFailed)?;
        Ok(())
    }

    fn send_client_hello(&mut self) -> RtlsResult<()> {
        let body = build_client_hello(&mut self.crypto, self.host)
            .origin(ErrorCode::TlsClientHelloFailed)?;
        self.send_packet(CONTENT_HANDSHAKE, LEGACY_VERSION, body.as_slice())
            .origin(ErrorCode::TlsClientHelloFailed)
    }

    fn send_change_cipher_spec(&mut self) -> RtlsResult<()> {
        self.send_packet(CONTENT_CHANGE_CIPHER_SPEC, LEGACY_VERSION, &[0x01])
            .origin(ErrorCode::TlsChangeCipherSpecFailed)
    }

    fn send_client_finished(&mut self) -> RtlsResult<()> {
        let mut verify = TlsBuffer::new();
        self.crypto
            .compute_verify(&mut verify, cipher::CIPHER_HASH_SIZE, false)
            .origin(ErrorCode::TlsClientFinishedFailed)?;

        let mut body = TlsBuffer::with_capacity(4 + verify.len());
        body.append_u8(MSG_FINISHED);
        body.append_u24_be(verify.len() as u32);
        body.append(verify.as_slice());

        self.send_packet(CONTENT_HANDSHAKE, LEGACY_VERSION, body.as_slice())
            .origin(ErrorCode::TlsClientFinishedFailed)
    }

    // ---------------------- Receiving ----------------------

    /// Reads from the socket and walks every complete record in the buffer.
    /// A partial record at the tail stays queued for the next read.
    fn process_receive(&mut self) -> RtlsResult<()> {
        let start = self.recv_buffer.len();
        self.recv_buffer.resize(start + RECV_CHUNK);
        let got = self
            .socket
            .read(&mut self.recv_buffer.as_mut_slice()[start..]);
        let count = match got {
            Ok(n) if n > 0 => n,
            Ok(_) => {
                self.recv_buffer.truncate(start);
                let _ = self.close();
                return rtls_err(ErrorCode::TlsProcessReceiveFailed);
            }
            Err(err) => {
                self.recv_buffer.truncate(start);
                let _ = self.close();
                return Err(err).origin(ErrorCode::TlsProcessReceiveFailed);
            }
        };
        self.recv_buffer.truncate(start + count);

        let mut consumed = 0;
        loop {
            let available = self.recv_buffer.len() - consumed;
            if available < 5 {
                break;
            }
            let (content_type, version, size) = {
                let header = &self.recv_buffer.as_slice()[consumed..];
                (
                    header[0],
                    u16::from_be_bytes([header[1], header[2]]),
                    u16::from_be_bytes([header[3], header[4]]) as usize,
                )
            };
            if available - 5 < size {
                break;
            }

            let record = self.recv_buffer.as_slice()[consumed + 5..consumed + 5 + size].to_vec();
            if let Err(err) = self.on_packet(content_type, version, &record) {
                let _ = self.close();
                return Err(err).origin(ErrorCode::TlsProcessReceiveFailed);
            }
            consumed += 5 + size;
        }

        self.recv_buffer.drain_front(consumed);
        Ok(())
    }

    /// Dispatches one record: decrypt when protected, gate each handshake
    /// message against the expected sequence, advance the state machine.
    fn on_packet(&mut self, packet_type: u8, version: u16, record: &[u8]) -> RtlsResult<()> {
        let mut packet_type = packet_type;
        let decoded;
        let mut body: &[u8] = record;

        if packet_type != CONTENT_CHANGE_CIPHER_SPEC && packet_type != CONTENT_ALERT {
            if let Some(mut plaintext) = self
                .crypto
                .decode(record, version)
                .origin(ErrorCode::TlsOnPacketFailed)?
            {
                // TLSInnerPlaintext: the true content type is the last byte
                if let Some(&inner_type) = plaintext.last() {
                    packet_type = inner_type;
                    plaintext.truncate(plaintext.len() - 1);
                }
                decoded = plaintext;
                body = &decoded;
            }
        }

        let mut pos = 0;
        while pos < body.len() {
            let seg_size = if packet_type == CONTENT_HANDSHAKE {
                let remaining = body.len() - pos;
                if remaining < 4 {
                    return rtls_err(ErrorCode::TlsOnPacketFailed);
                }
                let size = 4
                    + (((body[pos + 1] as usize) << 16)
                        | ((body[pos + 2] as usize) << 8)
                        | body[pos + 3] as usize);
                if size > remaining {
                    return rtls_err(ErrorCode::TlsOnPacketFailed);
                }
                size
            } else {
                body.len() - pos
            };
            let seg = &body[pos..pos + seg_size];

            if self.state_index < HANDSHAKE_DONE && packet_type != CONTENT_ALERT {
                let (expect_content, expect_handshake) = STATE_SEQ[self.state_index];
                if expect_content != packet_type
                    || seg.is_empty()
                    || expect_handshake != seg[0]
                {
                    log_debug!(
                        "state mismatch at {}: got type {packet_type}",
                        self.state_index
                    );
                    return rtls_err(ErrorCode::TlsOnPacketFailed);
                }
                self.state_index += 1;
            }

            // Finished enters the transcript only after its verify check
            if packet_type == CONTENT_HANDSHAKE && !seg.is_empty() && seg[0] != MSG_FINISHED {
                self.crypto.update_hash(seg);
            }

            if packet_type == CONTENT_HANDSHAKE {
                let mut reader = TlsReader::new(seg);
                let handshake_type = need(reader.u8(), ErrorCode::TlsOnPacketFailed)?;
                match handshake_type {
                    MSG_SERVER_HELLO => {
                        if let Err(err) = self.on_server_hello(&mut reader) {
                            let _ = self.close();
                            return Err::<(), Error>(err).origin(ErrorCode::TlsOnPacketFailed);
                        }
                    }
                    MSG_CERTIFICATE | MSG_CERTIFICATE_VERIFY => {
                        // Accepted, not validated
                    }
                    MSG_FINISHED => {
                        self.verify_finished(&mut reader)
                            .origin(ErrorCode::TlsOnPacketFailed)?;
                        self.crypto.update_hash(seg);
                        self.on_server_finished()
                            .origin(ErrorCode::TlsOnPacketFailed)?;
                    }
                    _ => {}
                }
            } else if packet_type == CONTENT_CHANGE_CIPHER_SPEC {
                // Middlebox-compat no-op, already gated by STATE_SEQ
            } else if packet_type == CONTENT_ALERT {
                if seg.len() >= 2 {
                    log_debug!("tls alert, level: {}, code: {}", seg[0], seg[1]);
                    return rtls_err(ErrorCode::TlsOnPacketFailed);
                }
            } else if packet_type == CONTENT_APPLICATION_DATA {
                self.channel_buffer.append(seg);
            }

            pos += seg_size;
        }

        Ok(())
    }

    fn on_server_hello(&mut self, reader: &mut TlsReader) -> RtlsResult<()> {
        const FAIL: ErrorCode = ErrorCode::TlsServerHelloFailed;

        need(reader.u24_be(), FAIL)?; // body size, bounded by the record
        need(reader.u16_be(), FAIL)?; // legacy version
        let mut server_random = [0u8; RAND_SIZE];
        need(reader.read_into(&mut server_random), FAIL)?;
        let session_len = need(reader.u8(), FAIL)? as usize;
        need(reader.skip(session_len), FAIL)?;
        need(reader.u16_be(), FAIL)?; // selected cipher
        need(reader.u8(), FAIL)?; // compression
        self.crypto
            .update_server_info(&server_random)
            .origin(FAIL)?;

        if reader.remaining() == 0 {
            return Ok(());
        }

        let ext_size = need(reader.u16_be(), FAIL)? as usize;
        let ext_end = reader.pos() + ext_size;
        let mut tls_version = 0u16;
        let mut group = EccGroup::None;
        let mut server_pub: Vec<u8> = Vec::new();

        while reader.pos() < ext_end {
            let ext_type = need(reader.u16_be(), FAIL)?;
            match ext_type {
                EXT_SUPPORTED_VERSIONS => {
                    need(reader.u16_be(), FAIL)?;
                    tls_version = need(reader.u16_be(), FAIL)?;
                }
                EXT_KEY_SHARE => {
                    let size = need(reader.u16_be(), FAIL)? as usize;
                    group = EccGroup::from_iana(need(reader.u16_be(), FAIL)?);
                    if size > 4 {
                        let key_len = need(reader.u16_be(), FAIL)? as usize;
                        server_pub = need(reader.take(key_len), FAIL)?.to_vec();
                    }
                }
                _ => {
                    let ext_len = need(reader.u16_be(), FAIL)? as usize;
                    need(reader.skip(ext_len), FAIL)?;
                }
            }
        }

        if tls_version != 0 {
            if tls_version != TLS13 || server_pub.is_empty() || group == EccGroup::None {
                return rtls_err(FAIL);
            }
            crate::log::debug_hex("server public key", &server_pub);
            self.crypto
                .compute_key(group, &server_pub, &[])
                .origin(FAIL)?;
            self.crypto.set_encoding(true);
        }
        Ok(())
    }

    fn verify_finished(&mut self, reader: &mut TlsReader) -> RtlsResult<()> {
        let size = need(reader.u24_be(), ErrorCode::TlsVerifyFinishedFailed)? as usize;
        if size > reader.remaining() {
            return rtls_err(ErrorCode::TlsVerifyFinishedFailed);
        }

        let mut verify = TlsBuffer::new();
        self.crypto
            .compute_verify(&mut verify, size, true)
            .origin(ErrorCode::TlsVerifyFinishedFailed)?;

        let received = need(reader.take(size), ErrorCode::TlsVerifyFinishedFailed)?;
        if verify.as_slice() != received {
            return rtls_err(ErrorCode::TlsVerifyFinishedFailed);
        }
        Ok(())
    }

    /// The server flight checked out: answer with ChangeCipherSpec and the
    /// client Finished, then install application traffic keys.
    fn on_server_finished(&mut self) -> RtlsResult<()> {
        let finished_hash = self.crypto.transcript_hash();

        self.send_change_cipher_spec()
            .origin(ErrorCode::TlsServerFinishedFailed)?;
        self.send_client_finished()
            .origin(ErrorCode::TlsServerFinishedFailed)?;
        self.crypto.reset_sequence_numbers();
        self.crypto
            .compute_key(EccGroup::None, &[], &finished_hash)
            .origin(ErrorCode::TlsServerFinishedFailed)
    }

    /// Drains the channel buffer, compacting once most of a large buffer has
    /// been consumed or everything was delivered.
    fn read_channel(&mut self, output: &mut [u8]) -> RtlsResult<usize> {
        let available = self.channel_buffer.len() - self.channel_bytes_read;
        let count = output.len().min(available);
        output[..count].copy_from_slice(
            &self.channel_buffer.as_slice()
                [self.channel_bytes_read..self.channel_bytes_read + count],
        );
        self.channel_bytes_read += count;

        let size = self.channel_buffer.len();
        if (self.channel_bytes_read > (size >> 2) * 3 && size > CHANNEL_COMPACT_SIZE)
            || self.channel_bytes_read >= size
        {
            self.channel_buffer.drain_front(self.channel_bytes_read);
            self.channel_bytes_read = 0;
        }

        if count == 0 {
            return rtls_err(ErrorCode::TlsReadFailedChannel);
        }
        Ok(count)
    }
}

impl Drop for TlsClient<'_> {
    fn drop(&mut self) {
        if self.is_valid() {
            let _ = self.close();
        }
    }
}

impl Read for TlsClient<'_> {
    fn read(&mut self, buf: &mut [u8]) -> RtlsResult<usize> {
        TlsClient::read(self, buf)
    }
}

impl Write for TlsClient<'_> {
    fn write(&mut self, buf: &[u8]) -> RtlsResult<usize> {
        TlsClient::write(self, buf).map(|n| n as usize)
    }
}

/// Builds the ClientHello handshake message: TLS 1.2 compatibility framing,
/// one cipher suite, and the server_name / supported_groups /
/// supported_versions / signature_algorithms / key_share extensions, with
/// every length prefix back-patched.
fn build_client_hello(crypto: &mut TlsCipher, host: &str) -> RtlsResult<TlsBuffer> {
    let mut body = TlsBuffer::with_capacity(512);
    let mut has_tls13 = false;

    body.append_u8(MSG_CLIENT_HELLO);
    let handshake_size_at = body.append_size(3);

    body.append_u16_be(LEGACY_VERSION);
    body.append(crypto.create_client_random());
    body.append_u8(0); // empty legacy session id

    let cipher_list_at = body.append_size(2);
    for _ in 0..crypto.cipher_count() {
        body.append_u16_be(TLS_CHACHA20_POLY1305_SHA256);
        has_tls13 = true;
    }
    body.patch_u16_be(cipher_list_at, (body.len() - cipher_list_at - 2) as u16);
    body.append_u8(1); // one compression method:
    body.append_u8(0); // null

    let ext_size_at = body.append_size(2);

    body.append_u16_be(EXT_SERVER_NAME);
    let host_len = host.len() as u16;
    body.append_u16_be(host_len + 5);
    body.append_u16_be(host_len + 3);
    body.append_u8(0); // name type: host_name
    body.append_u16_be(host_len);
    body.append(host.as_bytes());

    body.append_u16_be(EXT_SUPPORTED_GROUPS);
    body.append_u16_be((ECC_IANA_LIST.len() * 2 + 2) as u16);
    body.append_u16_be((ECC_IANA_LIST.len() * 2) as u16);
    for iana in ECC_IANA_LIST {
        body.append_u16_be(iana);
    }

    if has_tls13 {
        body.append_u16_be(EXT_SUPPORTED_VERSIONS);
        body.append_u16_be(3);
        body.append_u8(2);
        body.append_u16_be(TLS13);

        body.append_u16_be(EXT_SIGNATURE_ALGORITHMS);
        body.append_u16_be((SIGNATURE_ALGORITHM_LIST.len() * 2 + 2) as u16);
        body.append_u16_be((SIGNATURE_ALGORITHM_LIST.len() * 2) as u16);
        for algorithm in SIGNATURE_ALGORITHM_LIST {
            body.append_u16_be(algorithm);
        }

        body.append_u16_be(EXT_KEY_SHARE);
        let share_size_at = body.append_size(2);
        body.append_size(2); // client_shares vector length
        for (ecc_index, iana) in ECC_IANA_LIST.iter().enumerate() {
            body.append_u16_be(*iana);
            let entry_size_at = body.append_size(2);
            crypto.compute_public_key(ecc_index, &mut body)?;
            body.patch_u16_be(entry_size_at, (body.len() - entry_size_at - 2) as u16);
        }
        body.patch_u16_be(share_size_at, (body.len() - share_size_at - 2) as u16);
        body.patch_u16_be(share_size_at + 2, (body.len() - share_size_at - 4) as u16);
    }

    body.patch_u16_be(ext_size_at, (body.len() - ext_size_at - 2) as u16);
    body.as_mut_slice()[handshake_size_at] = 0;
    let handshake_len = (body.len() - handshake_size_at - 3) as u16;
    body.patch_u16_be(handshake_size_at + 1, handshake_len);

    Ok(body)
}

#[cfg(test)]
pub mod tests {
    extern crate alloc;
    use alloc::vec::Vec;

    use core::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::net::tls::ecdh::tests::install_stub_math;

    pub fn string_to_bytes(s: &str) -> [u8; 32] {
        let mut bytes = s.as_bytes();
        if bytes.len() >= 2 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
            bytes = &bytes[2..];
        }
        assert!(
            bytes.len() == 64,
            "hex string must be exactly 64 hex chars (32 bytes)"
        );

        let mut out = [0u8; 32];
        for i in 0..32 {
            let hi = hex_val(bytes[2 * i]);
            let lo = hex_val(bytes[2 * i + 1]);
            out[i] = (hi << 4) | lo;
        }
        out
    }

    pub fn hex_to_vec(s: &str) -> Vec<u8> {
        let mut bytes = s.as_bytes();
        if bytes.len() >= 2 && bytes[0] == b'0' && (bytes[1] == b'X' || bytes[1] == b'x') {
            bytes = &bytes[2..];
        }
        assert_eq!(bytes.len() % 2, 0, "hex string must have even length");
        let mut out = Vec::with_capacity(bytes.len() / 2);
        for chunk in bytes.chunks_exact(2) {
            let hi = hex_val(chunk[0]);
            let lo = hex_val(chunk[1]);
            out.push((hi << 4) | lo);
        }
        out
    }

    fn hex_val(b: u8) -> u8 {
        match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => panic!("invalid hex character"),
        }
    }

    fn test_client(secure: bool) -> TlsClient<'static> {
        TlsClient::create(
            "example.com",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            443,
            secure,
        )
        .unwrap()
    }

    /// Minimal ServerHello with no extensions: random + empty session id +
    /// our cipher suite + null compression.
    fn server_hello_record() -> Vec<u8> {
        let mut body = TlsBuffer::new();
        body.append_u16_be(LEGACY_VERSION);
        body.append(&[0xabu8; 32]);
        body.append_u8(0);
        body.append_u16_be(TLS_CHACHA20_POLY1305_SHA256);
        body.append_u8(0);

        let mut record = TlsBuffer::new();
        record.append_u8(MSG_SERVER_HELLO);
        record.append_u24_be(body.len() as u32);
        record.append(body.as_slice());
        record.as_slice().to_vec()
    }

    fn handshake_record(msg_type: u8, body: &[u8]) -> Vec<u8> {
        let mut record = TlsBuffer::new();
        record.append_u8(msg_type);
        record.append_u24_be(body.len() as u32);
        record.append(body);
        record.as_slice().to_vec()
    }

    #[test]
    fn client_hello_framing_consistent() {
        install_stub_math();
        let mut crypto = TlsCipher::new();
        crypto.reset();
        let body = build_client_hello(&mut crypto, "example.com").unwrap();
        let bytes = body.as_slice();

        // Handshake header: ClientHello with a correct 24-bit length
        assert_eq!(bytes[0], MSG_CLIENT_HELLO);
        let mut rd = TlsReader::new(&bytes[1..]);
        let handshake_len = rd.u24_be().unwrap() as usize;
        assert_eq!(handshake_len, bytes.len() - 4);

        // Fixed fields
        assert_eq!(rd.u16_be().unwrap(), LEGACY_VERSION);
        rd.skip(32).unwrap(); // client random
        assert_eq!(rd.u8().unwrap(), 0); // empty session id
        let cipher_len = rd.u16_be().unwrap() as usize;
        assert_eq!(cipher_len, 2);
        assert_eq!(rd.u16_be().unwrap(), TLS_CHACHA20_POLY1305_SHA256);
        assert_eq!(rd.u8().unwrap(), 1);
        assert_eq!(rd.u8().unwrap(), 0);

        // The extension block exactly fills the rest of the message
        let ext_len = rd.u16_be().unwrap() as usize;
        assert_eq!(ext_len, rd.remaining());

        let mut seen = Vec::new();
        while rd.remaining() > 0 {
            let ext_type = rd.u16_be().unwrap();
            let len = rd.u16_be().unwrap() as usize;
            let data = rd.take(len).unwrap();
            if ext_type == EXT_SERVER_NAME {
                assert_eq!(&data[5..], b"example.com");
            }
            if ext_type == EXT_KEY_SHARE {
                // client_shares: list length, then one entry per curve with
                // a 65- and a 97-byte SEC1 point
                let mut ks = TlsReader::new(data);
                let list_len = ks.u16_be().unwrap() as usize;
                assert_eq!(list_len, data.len() - 2);
                for expected_point in [65usize, 97] {
                    let group = ks.u16_be().unwrap();
                    assert!(group == 0x0017 || group == 0x0018);
                    let entry_len = ks.u16_be().unwrap() as usize;
                    assert_eq!(entry_len, expected_point);
                    ks.skip(entry_len).unwrap();
                }
                assert_eq!(ks.remaining(), 0);
            }
            seen.push(ext_type);
        }
        assert_eq!(
            seen,
            [
                EXT_SERVER_NAME,
                EXT_SUPPORTED_GROUPS,
                EXT_SUPPORTED_VERSIONS,
                EXT_SIGNATURE_ALGORITHMS,
                EXT_KEY_SHARE
            ]
        );
    }

    #[test]
    fn record_out_of_order_rejected() {
        install_stub_math();
        let mut client = test_client(true);
        // ChangeCipherSpec before ServerHello violates the state table
        let err = client
            .on_packet(CONTENT_CHANGE_CIPHER_SPEC, LEGACY_VERSION, &[0x01])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TlsOnPacketFailed);
    }

    #[test]
    fn handshake_sequence_advances_in_order() {
        install_stub_math();
        let mut client = test_client(true);

        client
            .on_packet(CONTENT_HANDSHAKE, LEGACY_VERSION, &server_hello_record())
            .unwrap();
        assert_eq!(client.state_index, 1);

        client
            .on_packet(CONTENT_CHANGE_CIPHER_SPEC, LEGACY_VERSION, &[0x01])
            .unwrap();
        assert_eq!(client.state_index, 2);

        client
            .on_packet(
                CONTENT_HANDSHAKE,
                LEGACY_VERSION,
                &handshake_record(MSG_ENCRYPTED_EXTENSIONS, &[0, 0]),
            )
            .unwrap();
        assert_eq!(client.state_index, 3);

        client
            .on_packet(
                CONTENT_HANDSHAKE,
                LEGACY_VERSION,
                &handshake_record(MSG_CERTIFICATE, &[]),
            )
            .unwrap();
        assert_eq!(client.state_index, 4);

        client
            .on_packet(
                CONTENT_HANDSHAKE,
                LEGACY_VERSION,
                &handshake_record(MSG_CERTIFICATE_VERIFY, &[]),
            )
            .unwrap();
        assert_eq!(client.state_index, 5);
    }

    #[test]
    fn swapped_records_rejected() {
        install_stub_math();
        let mut client = test_client(true);

        client
            .on_packet(CONTENT_HANDSHAKE, LEGACY_VERSION, &server_hello_record())
            .unwrap();
        client
            .on_packet(CONTENT_CHANGE_CIPHER_SPEC, LEGACY_VERSION, &[0x01])
            .unwrap();

        // Certificate must not arrive before EncryptedExtensions
        let err = client
            .on_packet(
                CONTENT_HANDSHAKE,
                LEGACY_VERSION,
                &handshake_record(MSG_CERTIFICATE, &[]),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TlsOnPacketFailed);
    }

    #[test]
    fn alert_fails_the_connection() {
        install_stub_math();
        let mut client = test_client(true);
        // fatal (2) handshake_failure (40), accepted at any state
        let err = client
            .on_packet(CONTENT_ALERT, LEGACY_VERSION, &[2, 40])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TlsOnPacketFailed);
    }

    #[test]
    fn truncated_handshake_header_rejected() {
        install_stub_math();
        let mut client = test_client(true);
        let err = client
            .on_packet(CONTENT_HANDSHAKE, LEGACY_VERSION, &[MSG_SERVER_HELLO, 0])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TlsOnPacketFailed);
    }

    #[test]
    fn not_ready_before_handshake() {
        install_stub_math();
        let mut client = test_client(true);
        let mut buf = [0u8; 8];
        assert_eq!(
            client.read(&mut buf).unwrap_err().code,
            ErrorCode::TlsReadFailedNotReady
        );
        assert_eq!(
            client.write(b"data").unwrap_err().code,
            ErrorCode::TlsWriteFailedNotReady
        );
    }

    #[test]
    fn read_channel_drains_and_compacts() {
        install_stub_math();
        let mut client = test_client(true);
        client.channel_buffer.append(b"0123456789");

        let mut out = [0u8; 4];
        assert_eq!(client.read_channel(&mut out).unwrap(), 4);
        assert_eq!(&out, b"0123");
        assert_eq!(client.channel_bytes_read, 4);

        let mut rest = [0u8; 16];
        assert_eq!(client.read_channel(&mut rest).unwrap(), 6);
        assert_eq!(&rest[..6], b"456789");
        // Fully drained: compacted and rewound
        assert_eq!(client.channel_bytes_read, 0);
        assert!(client.channel_buffer.is_empty());

        assert_eq!(
            client.read_channel(&mut rest).unwrap_err().code,
            ErrorCode::TlsReadFailedChannel
        );
    }
}
