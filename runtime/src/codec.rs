// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Little-endian wire primitives used by the serialization collaborators.
//!
//! The writer grows; the reader is strictly bounds-checked and never reads
//! past the slice it was given. `f64` travels as its IEEE-754 bit pattern
//! in an `i64`; strings as a `u32` length prefix plus raw UTF-8 bytes.

use onlyerror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Not enough bytes left to decode the requested value.
    UnexpectedEof,
    /// A string payload was longer than the u32 length prefix can carry.
    TooLong,
    /// A string payload was not valid UTF-8.
    InvalidUtf8,
}

/// Growable little-endian encoder.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn put_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// IEEE-754 bits, serialised as an `i64`.
    pub fn put_f64(&mut self, value: f64) {
        #[expect(clippy::cast_possible_wrap, reason = "bit-pattern transport, not arithmetic")]
        let bits = value.to_bits() as i64;
        self.put_i64(bits);
    }

    /// Length-prefixed UTF-8.
    ///
    /// # Errors
    ///
    /// [`CodecError::TooLong`] when the string exceeds `u32::MAX` bytes.
    pub fn put_str(&mut self, value: &str) -> Result<(), CodecError> {
        let length = u32::try_from(value.len()).map_err(|_| CodecError::TooLong)?;
        self.put_u32(length);
        self.bytes.extend_from_slice(value.as_bytes());
        Ok(())
    }
}

/// Bounds-checked little-endian decoder over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        if count > self.remaining() {
            return Err(CodecError::UnexpectedEof);
        }

        let slice = &self.bytes[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// # Errors
    ///
    /// [`CodecError::UnexpectedEof`] when the buffer is exhausted.
    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// # Errors
    ///
    /// [`CodecError::UnexpectedEof`] on a short buffer.
    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    /// # Errors
    ///
    /// [`CodecError::UnexpectedEof`] on a short buffer.
    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// # Errors
    ///
    /// [`CodecError::UnexpectedEof`] on a short buffer.
    pub fn get_f64(&mut self) -> Result<f64, CodecError> {
        #[expect(clippy::cast_sign_loss, reason = "bit-pattern transport, not arithmetic")]
        let bits = self.get_i64()? as u64;
        Ok(f64::from_bits(bits))
    }

    /// # Errors
    ///
    /// [`CodecError::UnexpectedEof`] on a short buffer,
    /// [`CodecError::InvalidUtf8`] for a malformed payload.
    pub fn get_str(&mut self) -> Result<&'a str, CodecError> {
        let length = self.get_u32()? as usize;
        let bytes = self.take(length)?;
        core::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }
}
