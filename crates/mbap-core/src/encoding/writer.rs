use crate::encoding::bits;
use crate::EncodeError;

/// A big-endian byte writer over a caller-owned buffer.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub const fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn as_written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.write_all(&[value])
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if self.remaining() < data.len() {
            return Err(EncodeError::BufferTooSmall);
        }
        let end = self.pos + data.len();
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    pub fn write_be_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.write_all(&value.to_be_bytes())
    }

    /// Writes each register as a big-endian word.
    pub fn write_registers(&mut self, values: &[u16]) -> Result<(), EncodeError> {
        if self.remaining() < values.len() * 2 {
            return Err(EncodeError::BufferTooSmall);
        }
        for value in values {
            self.write_be_u16(*value)?;
        }
        Ok(())
    }

    /// Writes `values` packed LSB-first, zero-padding the final byte.
    pub fn write_packed_bits(&mut self, values: &[bool]) -> Result<(), EncodeError> {
        let len = bits::packed_len(values.len());
        if self.remaining() < len {
            return Err(EncodeError::BufferTooSmall);
        }
        let end = self.pos + len;
        bits::pack_bits(values, &mut self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}
