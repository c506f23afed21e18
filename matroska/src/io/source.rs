//! Host byte sources.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use uuid::Uuid;

/// Opaque per-session key under which a [`ByteSource`] is registered.
///
/// The engine only ever sees this key, never a reference to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceKey(Uuid);

impl SourceKey {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The capability a host provides to the demuxer.
///
/// Every `Read + Seek + Send` type is a byte source. Inputs that can only be
/// read front to back are wrapped in [`Sequential`], which fails every seek.
pub trait ByteSource: Send {
    /// Reads up to `buf.len()` bytes. `Ok(0)` signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Seeks to an absolute position from the start of the source.
    fn seek(&mut self, pos: u64) -> io::Result<u64>;

    /// Current read position.
    fn position(&mut self) -> io::Result<u64>;

    /// Moves to the end of the source and returns its length.
    fn seek_end(&mut self) -> io::Result<u64>;

    fn is_seekable(&self) -> bool {
        true
    }
}

impl<T: Read + Seek + Send> ByteSource for T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn seek(&mut self, pos: u64) -> io::Result<u64> {
        Seek::seek(self, SeekFrom::Start(pos))
    }

    fn position(&mut self) -> io::Result<u64> {
        Seek::stream_position(self)
    }

    fn seek_end(&mut self) -> io::Result<u64> {
        Seek::seek(self, SeekFrom::End(0))
    }
}

/// Adapts a forward-only reader into a [`ByteSource`] whose seeks always fail.
#[derive(Debug)]
pub struct Sequential<R> {
    inner: R,
    pos: u64,
}

impl<R: Read + Send> Sequential<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "source cannot seek")
    }
}

impl<R: Read + Send> ByteSource for Sequential<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, _pos: u64) -> io::Result<u64> {
        Err(Self::unsupported())
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }

    fn seek_end(&mut self) -> io::Result<u64> {
        Err(Self::unsupported())
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cursor_is_a_seekable_source() -> io::Result<()> {
        let mut src = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        assert_eq!(ByteSource::read(&mut src, &mut buf)?, 2);
        assert_eq!(ByteSource::position(&mut src)?, 2);
        assert_eq!(src.seek_end()?, 5);
        assert_eq!(ByteSource::seek(&mut src, 1)?, 1);
        assert_eq!(ByteSource::read(&mut src, &mut buf)?, 2);
        assert_eq!(buf, [2, 3]);
        assert!(ByteSource::is_seekable(&src));
        Ok(())
    }

    #[test]
    fn sequential_source_never_seeks() -> io::Result<()> {
        let mut src = Sequential::new(&b"abcdef"[..]);
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf)?, 4);
        assert_eq!(src.position()?, 4);
        assert!(src.seek(0).is_err());
        assert!(src.seek_end().is_err());
        // A failed seek must not disturb the read position.
        assert_eq!(src.read(&mut buf)?, 2);
        assert_eq!(&buf[..2], b"ef");
        assert!(!src.is_seekable());
        Ok(())
    }
}
