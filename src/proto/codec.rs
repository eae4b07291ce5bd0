//! Incremental framing over a byte stream.
//!
//! Frames carry no length prefix: each one is a single self-delimiting
//! MessagePack value. The decoder buffers raw bytes and only releases a frame
//! once a complete value has arrived, so chunk boundaries may fall anywhere.
//!
//! Scanning is resumable. Only markers and length headers are read, payloads
//! are skipped by length, and a partial frame is never rescanned from its
//! start, so a frame costs time linear in its size however it is chunked.

use crate::error::{ConnectionError, Result};
use rmp::Marker;
use serde::Serialize;

use super::messages::Reply;

/// Default upper bound on a single buffered frame (16MB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Nesting limit for arrays and maps within one frame.
const MAX_DEPTH: usize = 1024;

/// Splits an append-only byte stream into complete MessagePack frames.
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_bytes: usize,
    /// Bytes of the current frame already scanned.
    scanned: usize,
    /// Values still expected at each open nesting level; the bottom entry is
    /// the frame's top-level value.
    pending: Vec<u64>,
}

/// Size of one value's header and how many nested values follow it.
struct Item {
    len: usize,
    children: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
            scanned: 0,
            pending: vec![1],
        }
    }

    /// Append bytes received from the transport.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet released as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed; nothing is discarded in
    /// that case. Invalid MessagePack is fatal for the connection.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        while let Some(&expected) = self.pending.last() {
            if expected == 0 {
                self.pending.pop();
                continue;
            }

            let Some(item) = self.scan_item()? else {
                if self.buf.len() > self.max_frame_bytes {
                    return Err(self.too_large());
                }
                return Ok(None);
            };

            self.scanned += item.len;
            if let Some(top) = self.pending.last_mut() {
                *top -= 1;
            }
            if item.children > 0 {
                if self.pending.len() > MAX_DEPTH {
                    return Err(ConnectionError::MalformedFrame(format!(
                        "nesting deeper than {}",
                        MAX_DEPTH
                    )));
                }
                self.pending.push(item.children);
            }
        }

        let frame: Vec<u8> = self.buf.drain(..self.scanned).collect();
        self.scanned = 0;
        self.pending.push(1);
        Ok(Some(frame))
    }

    /// Measure the value starting at `scanned`. `None` if its header or a
    /// scalar payload has not fully arrived.
    fn scan_item(&self) -> Result<Option<Item>> {
        let rest = &self.buf[self.scanned..];
        let Some(&first) = rest.first() else {
            return Ok(None);
        };

        let (header, body, children): (usize, usize, u64) = match Marker::from_u8(first) {
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
                (1, 0, 0)
            }
            Marker::U8 | Marker::I8 => (1, 1, 0),
            Marker::U16 | Marker::I16 => (1, 2, 0),
            Marker::U32 | Marker::I32 | Marker::F32 => (1, 4, 0),
            Marker::U64 | Marker::I64 | Marker::F64 => (1, 8, 0),
            Marker::FixStr(n) => (1, n as usize, 0),
            Marker::Str8 | Marker::Bin8 => match read_len(rest, 1) {
                Some(n) => (2, n, 0),
                None => return Ok(None),
            },
            Marker::Str16 | Marker::Bin16 => match read_len(rest, 2) {
                Some(n) => (3, n, 0),
                None => return Ok(None),
            },
            Marker::Str32 | Marker::Bin32 => match read_len(rest, 4) {
                Some(n) => (5, n, 0),
                None => return Ok(None),
            },
            Marker::FixExt1 => (2, 1, 0),
            Marker::FixExt2 => (2, 2, 0),
            Marker::FixExt4 => (2, 4, 0),
            Marker::FixExt8 => (2, 8, 0),
            Marker::FixExt16 => (2, 16, 0),
            Marker::Ext8 => match read_len(rest, 1) {
                Some(n) => (3, n, 0),
                None => return Ok(None),
            },
            Marker::Ext16 => match read_len(rest, 2) {
                Some(n) => (4, n, 0),
                None => return Ok(None),
            },
            Marker::Ext32 => match read_len(rest, 4) {
                Some(n) => (6, n, 0),
                None => return Ok(None),
            },
            Marker::FixArray(n) => (1, 0, n as u64),
            Marker::FixMap(n) => (1, 0, 2 * n as u64),
            Marker::Array16 => match read_len(rest, 2) {
                Some(n) => (3, 0, n as u64),
                None => return Ok(None),
            },
            Marker::Array32 => match read_len(rest, 4) {
                Some(n) => (5, 0, n as u64),
                None => return Ok(None),
            },
            Marker::Map16 => match read_len(rest, 2) {
                Some(n) => (3, 0, 2 * n as u64),
                None => return Ok(None),
            },
            Marker::Map32 => match read_len(rest, 4) {
                Some(n) => (5, 0, 2 * n as u64),
                None => return Ok(None),
            },
            Marker::Reserved => {
                return Err(ConnectionError::MalformedFrame(format!(
                    "invalid marker 0x{:02x}",
                    first
                )));
            }
        };

        // Every nested value takes at least one byte, so a declared size or
        // element count past the limit can be rejected before it arrives.
        let len = header + body;
        let children_floor = usize::try_from(children).unwrap_or(usize::MAX);
        if self
            .scanned
            .saturating_add(len)
            .saturating_add(children_floor)
            > self.max_frame_bytes
        {
            return Err(self.too_large());
        }
        if rest.len() < len {
            return Ok(None);
        }
        Ok(Some(Item { len, children }))
    }

    fn too_large(&self) -> ConnectionError {
        ConnectionError::FrameTooLarge {
            limit: self.max_frame_bytes,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Big-endian length of `width` bytes following the marker.
fn read_len(rest: &[u8], width: usize) -> Option<usize> {
    let bytes = rest.get(1..1 + width)?;
    Some(bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

/// Encode one value as a frame, using named map fields.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Encode a reply as a frame.
pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>> {
    encode(reply)
}
