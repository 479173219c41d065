//! Byte buffers for the wire format
//!
//! Scalars are fixed-width little-endian; lengths and counts are LEB128
//! varints.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use rd_core::{RdError, RdId, RdResult};

/// Longest valid encoding of a u64 varint
pub const MAX_VARINT_LEN: usize = 10;

/// Append `value` as a LEB128 varint
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Number of bytes `value` occupies as a varint
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Decode a varint from the start of `buf`.
///
/// Returns `Ok(None)` if `buf` ends before the varint does, and the value
/// plus its encoded length otherwise.
pub fn decode_varint(buf: &[u8]) -> RdResult<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN || (i == MAX_VARINT_LEN - 1 && byte > 0x01) {
            return Err(RdError::ProtocolViolation("varint overflow".into()));
        }
        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Outgoing byte stream
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        WireWriter {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    #[inline]
    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn write_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    #[inline]
    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    #[inline]
    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    #[inline]
    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    #[inline]
    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    #[inline]
    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    #[inline]
    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    #[inline]
    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    #[inline]
    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    #[inline]
    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    #[inline]
    pub fn write_varint(&mut self, v: u64) {
        put_varint(&mut self.buf, v);
    }

    #[inline]
    pub fn write_rd_id(&mut self, id: RdId) {
        self.buf.put_u64_le(id.0);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_varint(s.len() as u64);
        self.buf.put_slice(s.as_bytes());
    }

    /// Raw bytes, no length prefix
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }
}

/// Incoming byte stream. Reading past the end is a serialization mismatch.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    pub fn new(buf: Bytes) -> Self {
        WireReader { buf }
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        WireReader {
            buf: Bytes::copy_from_slice(slice),
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    fn need(&self, n: usize) -> RdResult<()> {
        if self.buf.remaining() < n {
            return Err(RdError::SerializationMismatch(format!(
                "read past end: need {}, have {}",
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Fail unless every byte has been consumed
    pub fn expect_end(&self) -> RdResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(RdError::SerializationMismatch(format!(
                "{} trailing bytes",
                self.buf.len()
            )))
        }
    }

    pub fn read_u8(&mut self) -> RdResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> RdResult<i8> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_bool(&mut self) -> RdResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(RdError::SerializationMismatch(format!("invalid bool byte {}", b))),
        }
    }

    pub fn read_u16(&mut self) -> RdResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_i16(&mut self) -> RdResult<i16> {
        self.need(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_u32(&mut self) -> RdResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32(&mut self) -> RdResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64(&mut self) -> RdResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_i64(&mut self) -> RdResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_f32(&mut self) -> RdResult<f32> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_f64(&mut self) -> RdResult<f64> {
        self.need(8)?;
        Ok(self.buf.get_f64_le())
    }

    pub fn read_rd_id(&mut self) -> RdResult<RdId> {
        Ok(RdId(self.read_u64()?))
    }

    pub fn read_varint(&mut self) -> RdResult<u64> {
        match decode_varint(&self.buf)? {
            Some((value, len)) => {
                self.buf.advance(len);
                Ok(value)
            }
            None => Err(RdError::SerializationMismatch(
                "read past end inside varint".into(),
            )),
        }
    }

    /// A varint used as a length or count, checked against what is left
    pub fn read_len(&mut self) -> RdResult<usize> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(RdError::SerializationMismatch(format!(
                "length {} exceeds remaining {}",
                len,
                self.remaining()
            )));
        }
        Ok(len as usize)
    }

    pub fn read_string(&mut self) -> RdResult<String> {
        let len = self.read_len()?;
        let bytes = self.buf.split_to(len);
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RdError::SerializationMismatch(format!("invalid utf-8: {}", e)))
    }

    /// Raw bytes, no length prefix
    pub fn read_raw(&mut self, n: usize) -> RdResult<Bytes> {
        self.need(n)?;
        Ok(self.buf.split_to(n))
    }
}
