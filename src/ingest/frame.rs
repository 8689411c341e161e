//! Fixed-layout frames produced by the sampling front end.
//!
//! Layout, all fields little-endian `i32`, no padding:
//!
//! | offset | field              |
//! |-------:|--------------------|
//! |      0 | `id`               |
//! |      4 | `protocol_version` |
//! |      8 | `fs`               |
//! |     12 | `fs_nr`            |
//! |     16 | `samples`          |
//! |     20 | `sample_error`     |
//! |     24 | `bitstream[0..192]`|

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HEADER_FIELDS: usize = 6;
pub const BITSTREAM_LEN: usize = 192;
pub const FRAME_LEN: usize = (HEADER_FIELDS + BITSTREAM_LEN) * size_of::<i32>();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i32,
    pub protocol_version: i32,
    /// Sampling rate.
    pub fs: i32,
    /// Sample number.
    pub fs_nr: i32,
    pub samples: i32,
    pub sample_error: i32,
    pub bitstream: [i32; BITSTREAM_LEN],
}

impl Frame {
    /// Decodes exactly one frame. Any other length is rejected, a short
    /// buffer never yields a partial frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FRAME_LEN {
            return Err(Error::MalformedFrame {
                expected: FRAME_LEN,
                actual: bytes.len(),
            });
        }
        let mut buf = bytes;
        let id = buf.get_i32_le();
        let protocol_version = buf.get_i32_le();
        let fs = buf.get_i32_le();
        let fs_nr = buf.get_i32_le();
        let samples = buf.get_i32_le();
        let sample_error = buf.get_i32_le();
        let mut bitstream = [0i32; BITSTREAM_LEN];
        for word in bitstream.iter_mut() {
            *word = buf.get_i32_le();
        }
        debug_assert!(!buf.has_remaining());
        Ok(Self {
            id,
            protocol_version,
            fs,
            fs_nr,
            samples,
            sample_error,
            bitstream,
        })
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_LEN);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.protocol_version);
        buf.put_i32_le(self.fs);
        buf.put_i32_le(self.fs_nr);
        buf.put_i32_le(self.samples);
        buf.put_i32_le(self.sample_error);
        for word in &self.bitstream {
            buf.put_i32_le(*word);
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_LEN);
        self.encode_into(&mut buf);
        buf.freeze()
    }
}
