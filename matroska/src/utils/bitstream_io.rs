//! Bitstream I/O utilities for block payload parsing.
//!
//! Block headers and lace headers are parsed from an in-memory payload that
//! has already been pulled through the engine's input stream. The reader here
//! provides EBML variable-length integers on top of `bitstream-io`.

use std::io;

use bitstream_io::{BigEndian, BitRead, BitReader, SignedInteger, UnsignedInteger};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        match self.bs.read_unsigned_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_n({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            )),
            Err(e) => Err(e),
        }
    }

    #[inline(always)]
    pub fn get_s<S: SignedInteger>(&mut self, n: u32) -> io::Result<S> {
        match self.bs.read_signed_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_s({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            )),
            Err(e) => Err(e),
        }
    }

    /// Reads an EBML variable-length unsigned integer with the length marker
    /// removed. Returns the value and its encoded length in bytes.
    pub fn get_vint(&mut self) -> io::Result<(u64, u32)> {
        let mut length = 1;
        while !self.get()? {
            length += 1;
            if length > 8 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "get_vint: length marker beyond 8 bytes",
                ));
            }
        }

        let value = self.get_n::<u64>(length * 7)?;
        Ok((value, length))
    }

    /// Reads an EBML signed VINT as used by EBML lacing size deltas.
    pub fn get_svint(&mut self) -> io::Result<i64> {
        let (value, length) = self.get_vint()?;
        let bias = (1i64 << (7 * length - 1)) - 1;
        Ok(value as i64 - bias)
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits().map(|pos| self.len - pos)
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }

    /// Current position in whole bytes. Only meaningful when byte aligned.
    pub fn byte_position(&mut self) -> io::Result<usize> {
        Ok((self.position()? >> 3) as usize)
    }

    pub fn bytes_available(&mut self) -> io::Result<usize> {
        Ok((self.available()? >> 3) as usize)
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vint_lengths() -> io::Result<()> {
        let data = [0x81, 0x40, 0x81, 0x20, 0x40, 0x00];
        let mut reader = BsIoSliceReader::from_slice(&data);
        assert_eq!(reader.get_vint()?, (1, 1));
        assert_eq!(reader.get_vint()?, (129, 2));
        assert_eq!(reader.get_vint()?, (16384, 3));
        assert_eq!(reader.available()?, 0);
        Ok(())
    }

    #[test]
    fn signed_vint_bias() -> io::Result<()> {
        // 1-byte signed VINTs are biased by 63.
        let data = [0xBF, 0x80, 0xC0];
        let mut reader = BsIoSliceReader::from_slice(&data);
        assert_eq!(reader.get_svint()?, 0);
        assert_eq!(reader.get_svint()?, -63);
        assert_eq!(reader.get_svint()?, 1);
        Ok(())
    }

    #[test]
    fn zero_byte_is_not_a_vint() {
        let data = [0x00, 0x00];
        let mut reader = BsIoSliceReader::from_slice(&data);
        assert!(reader.get_vint().is_err());
    }

    #[test]
    fn block_header_fields() -> io::Result<()> {
        // track 1, relative timecode -2, keyframe flag
        let data = [0x81, 0xFF, 0xFE, 0x80, 0xAA];
        let mut reader = BsIoSliceReader::from_slice(&data);
        assert_eq!(reader.get_vint()?.0, 1);
        assert_eq!(reader.get_s::<i16>(16)?, -2);
        assert_eq!(reader.get_n::<u8>(8)?, 0x80);
        assert_eq!(reader.byte_position()?, 4);
        assert_eq!(reader.bytes_available()?, 1);
        assert_eq!(reader.get_n::<u8>(8)?, 0xAA);
        assert!(reader.get_n::<u8>(8).is_err());
        Ok(())
    }
}
