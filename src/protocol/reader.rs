//! Bounds-checked little-endian reader over a byte slice.

use bytes::Buf;

use crate::error::FrameError;
use crate::protocol::address::{NetworkAddress16, NetworkAddress64};

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    fn ensure(&self, n: usize) -> Result<(), FrameError> {
        FrameError::need(self.what, n, self.buf.remaining())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub(crate) fn u8(&mut self) -> Result<u8, FrameError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self) -> Result<u16, FrameError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn uint(&mut self, n: usize) -> Result<u64, FrameError> {
        self.ensure(n)?;
        Ok(self.buf.get_uint_le(n))
    }

    pub(crate) fn int(&mut self, n: usize) -> Result<i64, FrameError> {
        self.ensure(n)?;
        Ok(self.buf.get_int_le(n))
    }

    pub(crate) fn f32(&mut self) -> Result<f32, FrameError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub(crate) fn addr64(&mut self) -> Result<NetworkAddress64, FrameError> {
        let mut bytes = [0u8; 8];
        self.ensure(8)?;
        self.buf.copy_to_slice(&mut bytes);
        Ok(NetworkAddress64::from_wire(bytes))
    }

    pub(crate) fn addr16(&mut self) -> Result<NetworkAddress16, FrameError> {
        let mut bytes = [0u8; 2];
        self.ensure(2)?;
        self.buf.copy_to_slice(&mut bytes);
        Ok(NetworkAddress16::from_wire(bytes))
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}
