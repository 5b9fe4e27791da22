//! Sequential little endian readers and writers over in-memory buffers.
//!
//! [`ByteReader`] bounds checks every read so that short input surfaces as
//! [`CodecError::TruncatedInput`] with the offset where the data ran out.
//! [`ByteWriter`] only grows at its end; fields whose values are known later
//! (LZSS flag bytes, chunk offset tables) are reserved first and then patched
//! through a [`PatchSite`].

use crate::errors::CodecError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    csr: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            csr: Cursor::new(bytes),
        }
    }

    /// current absolute offset into the buffer
    #[inline]
    pub fn position(&self) -> usize {
        self.csr.position() as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.csr.get_ref().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.remaining() < needed {
            Err(CodecError::TruncatedInput {
                offset: self.position(),
                needed: needed - self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.csr.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.csr.read_u16::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.csr.read_u32::<LittleEndian>()?)
    }

    /// Borrow the next `n` bytes from the underlying buffer
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(n)?;
        let start = self.position();
        let bytes: &'a [u8] = *self.csr.get_ref();
        self.csr.set_position((start + n) as u64);

        Ok(&bytes[start..start + n])
    }

    /// Move to the absolute offset `to`, which may be at most the end of the buffer
    pub fn jump(&mut self, to: usize) -> Result<(), CodecError> {
        if to > self.len() {
            return Err(CodecError::TruncatedInput {
                offset: self.len(),
                needed: to - self.len(),
            });
        }
        self.csr.set_position(to as u64);
        Ok(())
    }

    /// Skip ahead to the next multiple of four, if there is one
    pub fn align4(&mut self) {
        let aligned = align4(self.position()).min(self.len());
        self.csr.set_position(aligned as u64);
    }
}

/// Location of bytes reserved by [`ByteWriter`] to be filled in later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a reserved field should be patched"]
pub struct PatchSite {
    offset: usize,
    width: usize,
}

impl PatchSite {
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, val: u8) -> Result<(), CodecError> {
        self.buf.write_u8(val).map_err(Into::into)
    }

    pub fn write_u16(&mut self, val: u16) -> Result<(), CodecError> {
        self.buf.write_u16::<LittleEndian>(val).map_err(Into::into)
    }

    pub fn write_u32(&mut self, val: u32) -> Result<(), CodecError> {
        self.buf.write_u32::<LittleEndian>(val).map_err(Into::into)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.buf.write_all(bytes).map_err(Into::into)
    }

    /// Fill with `filler` up to the absolute offset `to`
    pub fn jump(&mut self, to: usize, filler: u8) -> Result<(), CodecError> {
        let from = self.position();
        if to < from {
            return Err(CodecError::SeekBackwards { from, to });
        }
        self.buf.resize(to, filler);
        Ok(())
    }

    /// Fill with `filler` up to the next multiple of four
    pub fn align4(&mut self, filler: u8) -> Result<(), CodecError> {
        self.jump(align4(self.position()), filler)
    }

    pub fn reserve_u8(&mut self) -> Result<PatchSite, CodecError> {
        self.reserve(1)
    }

    pub fn reserve_u32(&mut self) -> Result<PatchSite, CodecError> {
        self.reserve(4)
    }

    fn reserve(&mut self, width: usize) -> Result<PatchSite, CodecError> {
        let offset = self.position();
        self.jump(offset + width, 0)?;
        Ok(PatchSite { offset, width })
    }

    pub fn patch_u8(&mut self, site: PatchSite, val: u8) {
        self.patch(site, &[val]);
    }

    pub fn patch_u32(&mut self, site: PatchSite, val: u32) {
        self.patch(site, &val.to_le_bytes());
    }

    fn patch(&mut self, site: PatchSite, bytes: &[u8]) {
        debug_assert_eq!(site.width, bytes.len(), "patch width does not match reservation");
        self.buf[site.offset..site.offset + site.width].copy_from_slice(bytes);
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// round `n` up to a multiple of four
pub(crate) const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_little_endian() -> Result<(), CodecError> {
        let data = [0x10, 0x09, 0x00, 0x00, 0x34, 0x12, 0xFF];
        let mut rdr = ByteReader::new(&data);

        assert_eq!(rdr.read_u32()?, 0x0910);
        assert_eq!(rdr.read_u16()?, 0x1234);
        assert_eq!(rdr.read_u8()?, 0xFF);
        assert_eq!(rdr.remaining(), 0);

        Ok(())
    }

    #[test]
    fn short_read_is_truncated_input() {
        let data = [0x01, 0x02, 0x03];
        let mut rdr = ByteReader::new(&data);
        rdr.read_u8().unwrap();

        match rdr.read_u32() {
            Err(CodecError::TruncatedInput { offset, needed }) => {
                assert_eq!(offset, 1);
                assert_eq!(needed, 2);
            }
            other => panic!("expected truncated input, got {:?}", other),
        }
        // a failed read does not move the cursor
        assert_eq!(rdr.position(), 1);
    }

    #[test]
    fn reader_jump_and_align() -> Result<(), CodecError> {
        let data = [0u8, 1, 2, 3, 4, 5];
        let mut rdr = ByteReader::new(&data);
        rdr.read_u8()?;
        rdr.align4();
        assert_eq!(rdr.read_u8()?, 4);
        rdr.align4();
        assert_eq!(rdr.position(), data.len());

        rdr.jump(2)?;
        assert_eq!(rdr.read_bytes(2)?, &[2, 3]);
        assert!(rdr.jump(7).is_err());

        Ok(())
    }

    #[test]
    fn writer_jump_align_and_patch() -> Result<(), CodecError> {
        let mut wtr = ByteWriter::new();
        let flag = wtr.reserve_u8()?;
        wtr.write_u16(0xBEEF)?;
        wtr.align4(0xFF)?;
        assert_eq!(wtr.position(), 4);

        let word = wtr.reserve_u32()?;
        wtr.jump(10, 0xAA)?;
        wtr.patch_u8(flag, 0x80);
        wtr.patch_u32(word, 0x0403_0201);

        assert_eq!(
            wtr.as_slice(),
            &[0x80, 0xEF, 0xBE, 0xFF, 0x01, 0x02, 0x03, 0x04, 0xAA, 0xAA]
        );
        assert!(matches!(
            wtr.jump(2, 0),
            Err(CodecError::SeekBackwards { from: 10, to: 2 })
        ));

        Ok(())
    }
}
