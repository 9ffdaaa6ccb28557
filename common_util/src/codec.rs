// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Encode/decode abstraction

use crate::bytes::{Buf, BufMut};

/// Encoder encodes value into the buffer
pub trait Encoder<T: ?Sized> {
    type Error;

    /// Encode value into buf
    fn encode<B: BufMut>(&self, buf: &mut B, value: &T) -> Result<(), Self::Error>;

    /// Estimate the value size after encoded
    fn estimate_encoded_size(&self, value: &T) -> usize;
}

/// Decoder decodes value from the buffer
pub trait Decoder<T> {
    type Error;

    /// Decode value from the buf
    fn decode<B: Buf>(&self, buf: &mut B) -> Result<T, Self::Error>;
}
