// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Checked accessors over byte buffers.

use snafu::{ensure, Backtrace, Snafu};

pub use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::define_result;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Try to read out of bound, remaining:{}, required:{}.\nBacktrace:\n{}",
        remaining,
        required,
        backtrace
    ))]
    UnexpectedEof {
        remaining: usize,
        required: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Try to write out of bound, remaining:{}, required:{}.\nBacktrace:\n{}",
        remaining,
        required,
        backtrace
    ))]
    WouldOverflow {
        remaining: usize,
        required: usize,
        backtrace: Backtrace,
    },
}

define_result!(Error);

/// [Buf] with accessors that fail instead of panicking when the buffer is
/// exhausted.
pub trait SafeBuf: Buf {
    fn try_get_u8(&mut self) -> Result<u8> {
        ensure!(
            self.remaining() >= 1,
            UnexpectedEof {
                remaining: self.remaining(),
                required: 1usize,
            }
        );
        Ok(self.get_u8())
    }

    fn try_get_u32(&mut self) -> Result<u32> {
        ensure!(
            self.remaining() >= 4,
            UnexpectedEof {
                remaining: self.remaining(),
                required: 4usize,
            }
        );
        Ok(self.get_u32())
    }

    fn try_get_u64(&mut self) -> Result<u64> {
        ensure!(
            self.remaining() >= 8,
            UnexpectedEof {
                remaining: self.remaining(),
                required: 8usize,
            }
        );
        Ok(self.get_u64())
    }

    fn try_copy_to_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        ensure!(
            self.remaining() >= dst.len(),
            UnexpectedEof {
                remaining: self.remaining(),
                required: dst.len(),
            }
        );
        self.copy_to_slice(dst);
        Ok(())
    }
}

impl<T: Buf> SafeBuf for T {}

/// [BufMut] with writers that fail instead of panicking when the buffer has
/// no room left.
pub trait SafeBufMut: BufMut {
    fn try_put_u8(&mut self, v: u8) -> Result<()> {
        ensure!(
            self.remaining_mut() >= 1,
            WouldOverflow {
                remaining: self.remaining_mut(),
                required: 1usize,
            }
        );
        self.put_u8(v);
        Ok(())
    }

    fn try_put_u32(&mut self, v: u32) -> Result<()> {
        ensure!(
            self.remaining_mut() >= 4,
            WouldOverflow {
                remaining: self.remaining_mut(),
                required: 4usize,
            }
        );
        self.put_u32(v);
        Ok(())
    }

    fn try_put_u64(&mut self, v: u64) -> Result<()> {
        ensure!(
            self.remaining_mut() >= 8,
            WouldOverflow {
                remaining: self.remaining_mut(),
                required: 8usize,
            }
        );
        self.put_u64(v);
        Ok(())
    }

    fn try_put(&mut self, src: &[u8]) -> Result<()> {
        ensure!(
            self.remaining_mut() >= src.len(),
            WouldOverflow {
                remaining: self.remaining_mut(),
                required: src.len(),
            }
        );
        self.put_slice(src);
        Ok(())
    }
}

impl<T: BufMut> SafeBufMut for T {}
