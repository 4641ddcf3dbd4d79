//! rtls: Raw TLS
//! TLS 1.3, DNS-over-TLS and DNS-over-HTTPS from raw sockets
//!
//! MIT License
//
//! ---------------------- TLS wire-format buffers ------------------------------

extern crate alloc;
use alloc::vec::Vec;

/// Growable byte buffer for building and holding TLS wire data.
///
/// Length prefixes in TLS framing are back-patched: [`TlsBuffer::append_size`]
/// reserves the bytes and returns their offset, [`TlsBuffer::patch_u16_be`]
/// fills them in once the enclosed data has been written.
#[derive(Default, Debug)]
pub struct TlsBuffer {
    data: Vec<u8>,
}

impl TlsBuffer {
    pub const fn new() -> Self {
        TlsBuffer { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        TlsBuffer {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Appends bytes, returning the offset they were written at.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let at = self.data.len();
        self.data.extend_from_slice(bytes);
        at
    }

    pub fn append_u8(&mut self, value: u8) -> usize {
        let at = self.data.len();
        self.data.push(value);
        at
    }

    pub fn append_u16_be(&mut self, value: u16) -> usize {
        self.append(&value.to_be_bytes())
    }

    pub fn append_u24_be(&mut self, value: u32) -> usize {
        self.append(&[(value >> 16) as u8, (value >> 8) as u8, value as u8])
    }

    /// Reserves `size` zeroed bytes and returns their offset for later
    /// back-patching.
    pub fn append_size(&mut self, size: usize) -> usize {
        let at = self.data.len();
        self.data.resize(at + size, 0);
        at
    }

    pub fn patch_u16_be(&mut self, at: usize, value: u16) {
        self.data[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn resize(&mut self, size: usize) {
        self.data.resize(size, 0);
    }

    pub fn truncate(&mut self, size: usize) {
        self.data.truncate(size);
    }

    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    /// Drops the first `count` bytes, shifting the remainder to the front.
    pub fn drain_front(&mut self, count: usize) {
        let len = self.data.len();
        let count = count.min(len);
        self.data.copy_within(count.., 0);
        self.data.truncate(len - count);
    }

    /// Zeroes the length; capacity is retained for the connection lifetime.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Borrowed read cursor over wire data. All reads are bounds-checked and
/// return `None` past the end; framing code maps that to its own error.
pub struct TlsReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TlsReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        TlsReader { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn u16_be(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn u24_be(&mut self) -> Option<u32> {
        let bytes = self.take(3)?;
        Some(((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32)
    }

    pub fn u32_be(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_into(&mut self, out: &mut [u8]) -> Option<()> {
        let bytes = self.take(out.len())?;
        out.copy_from_slice(bytes);
        Some(())
    }

    pub fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        if self.remaining() < count {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Some(bytes)
    }

    pub fn skip(&mut self, count: usize) -> Option<()> {
        if self.remaining() < count {
            return None;
        }
        self.pos += count;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_round_trips() {
        let mut buf = TlsBuffer::new();
        buf.append_u8(0x16);
        buf.append_u16_be(0x0303);
        buf.append_u24_be(0x01_02_03);
        buf.append(b"body");

        let mut rd = TlsReader::new(buf.as_slice());
        assert_eq!(rd.u8(), Some(0x16));
        assert_eq!(rd.u16_be(), Some(0x0303));
        assert_eq!(rd.u24_be(), Some(0x01_02_03));
        assert_eq!(rd.take(4), Some(&b"body"[..]));
        assert_eq!(rd.u8(), None);
    }

    #[test]
    fn u24_is_inverse_of_three_be_bytes() {
        let mut buf = TlsBuffer::new();
        buf.append(&[0xab, 0xcd, 0xef]);
        let mut rd = TlsReader::new(buf.as_slice());
        assert_eq!(rd.u24_be(), Some(0xabcdef));
    }

    #[test]
    fn append_size_back_patching() {
        let mut buf = TlsBuffer::new();
        buf.append_u8(1);
        let at = buf.append_size(2);
        buf.append(b"hello");
        buf.patch_u16_be(at, (buf.len() - at - 2) as u16);
        assert_eq!(buf.as_slice(), &[1, 0, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn drain_front_shifts_remainder() {
        let mut buf = TlsBuffer::new();
        buf.append(b"abcdef");
        buf.drain_front(4);
        assert_eq!(buf.as_slice(), b"ef");
        buf.drain_front(10);
        assert!(buf.is_empty());
    }

    #[test]
    fn reads_past_end_return_none() {
        let mut rd = TlsReader::new(&[1, 2]);
        assert_eq!(rd.u24_be(), None);
        assert_eq!(rd.pos(), 0);
        assert_eq!(rd.u16_be(), Some(0x0102));
        assert_eq!(rd.u8(), None);
    }

    #[test]
    fn clear_retains_capacity() {
        let mut buf = TlsBuffer::with_capacity(64);
        buf.append(&[0u8; 40]);
        buf.clear();
        assert!(buf.is_empty());
    }
}
