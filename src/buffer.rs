//! Owned byte buffers for crossing the I/O boundary.
//!
//! A `BufferHandle` is a fixed-capacity region with an explicit valid length,
//! allocated by the caller (or returned by a read) and owned by exactly one
//! party at a time: handing it to an I/O call moves it, and the receiver is
//! the one that releases or returns it. Inside the crate block payloads travel
//! as `bytes::Bytes`, which carries the same single-transfer ownership without
//! copying; `BufferHandle` is the caller-facing edge of that contract.

use crate::error::{Result, TfsError};
use bytes::{Bytes, BytesMut};

#[derive(Debug)]
pub struct BufferHandle {
    /// Backing region; its length is the capacity and never changes.
    data: BytesMut,
    /// Valid prefix, `<= capacity`.
    len: usize,
}

impl BufferHandle {
    /// Allocate a zeroed buffer of the given capacity with no valid bytes.
    pub fn with_capacity(capacity: usize) -> BufferHandle {
        BufferHandle {
            data: BytesMut::zeroed(capacity),
            len: 0,
        }
    }

    /// Wrap fetched bytes; capacity and valid length both equal the input
    /// length. This is the single marshaling copy on the read path.
    pub fn from_bytes(src: Bytes) -> BufferHandle {
        let mut data = BytesMut::with_capacity(src.len());
        data.extend_from_slice(&src);
        let len = data.len();
        BufferHandle { data, len }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole capacity region, for fills followed by `set_len`.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Declare how much of the region is valid after a direct fill.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.capacity() {
            return Err(TfsError::invalid_argument(format!(
                "valid length {len} exceeds capacity {}",
                self.capacity()
            )));
        }
        self.len = len;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Copy `src` in from offset zero, replacing the valid bytes.
    pub fn put(&mut self, src: &[u8]) -> Result<usize> {
        if src.len() > self.capacity() {
            return Err(TfsError::BufferTooSmall {
                need: src.len(),
                capacity: self.capacity(),
            });
        }
        self.data[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(self.len)
    }

    /// Give up ownership of the valid bytes without copying.
    pub fn into_bytes(mut self) -> Bytes {
        self.data.truncate(self.len);
        self.data.freeze()
    }
}
