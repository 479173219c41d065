//! Frame structure for the wire protocol
//!
//! Frame = `[entity id: varint][payload length: varint][payload]`

use bytes::{Buf, BufMut, Bytes, BytesMut};

use rd_core::{RdError, RdId, RdResult};

use crate::{decode_varint, put_varint, varint_len, WireWriter};

/// A single addressed message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Target entity
    pub id: RdId,
    /// Primitive specific payload
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: RdId, payload: Bytes) -> Self {
        Frame { id, payload }
    }

    pub fn from_writer(id: RdId, writer: WireWriter) -> Self {
        Frame {
            id,
            payload: writer.freeze(),
        }
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        varint_len(self.id.0) + varint_len(self.payload.len() as u64) + self.payload.len()
    }

    /// Append the encoded frame to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.size());
        put_varint(buf, self.id.0);
        put_varint(buf, self.payload.len() as u64);
        buf.put_slice(&self.payload);
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse exactly one frame occupying all of `buf`
    pub fn parse(buf: &[u8]) -> RdResult<Self> {
        let mut decoder = FrameDecoder::new(usize::MAX);
        decoder.push(buf);
        let frame = decoder.next_frame()?.ok_or(RdError::BufferTooShort {
            expected: buf.len() + 1,
            actual: buf.len(),
        })?;
        if decoder.buffered() != 0 {
            return Err(RdError::ProtocolViolation(format!(
                "{} bytes after frame",
                decoder.buffered()
            )));
        }
        Ok(frame)
    }
}

/// Incremental frame decoder for a byte stream.
///
/// Chunks may split frames at any byte; frames come out in stream order.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        FrameDecoder {
            buf: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Bytes received but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete frame, if any
    pub fn next_frame(&mut self) -> RdResult<Option<Frame>> {
        let Some((id, id_len)) = decode_varint(&self.buf)? else {
            return Ok(None);
        };
        let Some((len, len_len)) = decode_varint(&self.buf[id_len..])? else {
            return Ok(None);
        };
        if len > self.max_frame_len as u64 {
            return Err(RdError::FrameTooLarge {
                len: len as usize,
                max: self.max_frame_len,
            });
        }
        let header = id_len + len_len;
        let total = (len as usize)
            .checked_add(header)
            .ok_or(RdError::FrameTooLarge {
                len: len as usize,
                max: self.max_frame_len,
            })?;
        if self.buf.len() < total {
            return Ok(None);
        }
        self.buf.advance(header);
        let payload = self.buf.split_to(len as usize).freeze();
        Ok(Some(Frame::new(RdId(id), payload)))
    }

    /// Push a chunk and collect every frame it completes
    pub fn decode(&mut self, chunk: &[u8]) -> RdResult<Vec<Frame>> {
        self.push(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
