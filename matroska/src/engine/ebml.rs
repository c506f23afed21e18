//! EBML element framing.
//!
//! Two layers: [`Reader`] pulls bytes through an [`InputStream`] with a
//! read-ahead window, and [`Children`] walks the children of a master element
//! whose payload has already been buffered.

use crate::engine::InputStream;
use crate::engine::elements as id;
use crate::utils::crc::CRC_EBML;
use crate::utils::errors::EbmlError;

/// Maximum nesting depth accepted for master elements.
pub const MAX_DEPTH: usize = 64;

/// Longest possible element header: a 4-byte ID and an 8-byte size.
pub const MAX_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    /// `None` for the reserved unknown size.
    pub size: Option<u64>,
    /// Absolute position of the first byte of the ID.
    pub pos: u64,
    pub header_len: u8,
}

impl ElementHeader {
    pub fn data_pos(&self) -> u64 {
        self.pos + self.header_len as u64
    }

    pub fn end(&self) -> Option<u64> {
        self.size.map(|size| self.data_pos() + size)
    }
}

/// Decodes an element ID, keeping its length marker. IDs are at most 4 bytes.
pub fn parse_id(data: &[u8]) -> Option<(u32, usize)> {
    let first = *data.first()?;
    let len = first.leading_zeros() as usize + 1;
    if len > 4 || data.len() < len {
        return None;
    }
    let value = data[..len]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32);
    Some((value, len))
}

/// Decodes a variable-length integer with the marker removed.
pub fn parse_vint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    let len = first.leading_zeros() as usize + 1;
    if len > 8 || data.len() < len {
        return None;
    }
    let value = data[1..len]
        .iter()
        .fold(first as u64 & (0xFF >> len), |acc, &b| (acc << 8) | b as u64);
    Some((value, len))
}

/// Decodes an element size. The all-ones value of any width means unknown.
pub fn parse_size(data: &[u8]) -> Option<(Option<u64>, usize)> {
    let (value, len) = parse_vint(data)?;
    let unknown = (1u64 << (7 * len)) - 1;
    Some((if value == unknown { None } else { Some(value) }, len))
}

pub fn read_uint(data: &[u8]) -> Result<u64, EbmlError> {
    if data.len() > 8 {
        return Err(EbmlError::IntegerWidth(data.len() as u64));
    }
    Ok(data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

pub fn read_sint(data: &[u8]) -> Result<i64, EbmlError> {
    if data.len() > 8 {
        return Err(EbmlError::IntegerWidth(data.len() as u64));
    }
    let Some(&first) = data.first() else {
        return Ok(0);
    };
    let init = if first & 0x80 != 0 { -1i64 } else { 0 };
    Ok(data.iter().fold(init, |acc, &b| (acc << 8) | b as i64))
}

pub fn read_float(data: &[u8]) -> Result<f64, EbmlError> {
    match *data {
        [] => Ok(0.0),
        [a, b, c, d] => Ok(f32::from_be_bytes([a, b, c, d]) as f64),
        [a, b, c, d, e, f, g, h] => Ok(f64::from_be_bytes([a, b, c, d, e, f, g, h])),
        _ => Err(EbmlError::FloatWidth(data.len() as u64)),
    }
}

/// Strings are zero-padded in the file; anything after the first NUL is
/// padding.
pub fn read_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// If a master payload starts with a CRC-32 element, verifies it against the
/// rest of the payload.
pub fn verify_crc(master: u32, payload: &[u8]) -> Result<(), EbmlError> {
    let Some(Ok((header, value))) = Children::new(payload, 0).next() else {
        return Ok(());
    };
    if header.id != id::CRC32 || value.len() != 4 {
        return Ok(());
    }

    let read = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
    let covered = &payload[header.data_pos() as usize + 4..];
    let calculated = CRC_EBML.checksum(covered);
    if calculated != read {
        return Err(EbmlError::CrcMismatch {
            id: master,
            calculated,
            read,
        });
    }
    Ok(())
}

/// Iterates the children of a buffered master element.
///
/// `base` is the absolute position of `data[0]`, so yielded headers carry
/// absolute positions. A child of unknown size extends to the end of the
/// parent.
#[derive(Debug, Clone)]
pub struct Children<'a> {
    data: &'a [u8],
    offset: usize,
    base: u64,
}

impl<'a> Children<'a> {
    pub fn new(data: &'a [u8], base: u64) -> Self {
        Self {
            data,
            offset: 0,
            base,
        }
    }

    fn next_child(&mut self) -> Result<(ElementHeader, &'a [u8]), EbmlError> {
        let rest = &self.data[self.offset..];
        let pos = self.base + self.offset as u64;
        let (id, id_len) = parse_id(rest).ok_or(EbmlError::InvalidElementId(pos))?;
        let (size, size_len) =
            parse_size(&rest[id_len..]).ok_or(EbmlError::InvalidVint(pos + id_len as u64))?;

        let header_len = id_len + size_len;
        let available = (rest.len() - header_len) as u64;
        let size = match size {
            Some(size) if size > available => return Err(EbmlError::Overflow { id, size }),
            Some(size) => size,
            None => available,
        };

        let payload = &rest[header_len..header_len + size as usize];
        self.offset += header_len + size as usize;
        Ok((
            ElementHeader {
                id,
                size: Some(size),
                pos,
                header_len: header_len as u8,
            },
            payload,
        ))
    }
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<(ElementHeader, &'a [u8]), EbmlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let child = self.next_child();
        if child.is_err() {
            // Framing is lost; nothing after this point can be trusted.
            self.offset = self.data.len();
        }
        Some(child)
    }
}

/// Positioned byte access over the engine input.
///
/// Reads go through a window of [`InputStream::cache_size`] bytes. With
/// `avoid_seeks` set, a read ahead of the underlying position is satisfied
/// by reading and discarding the gap, and a read behind the window fails.
pub struct Reader {
    input: Box<dyn InputStream>,
    avoid_seeks: bool,
    /// Position the underlying stream will deliver next.
    stream_pos: u64,
    window: Vec<u8>,
    window_pos: u64,
    file_size: Option<u64>,
}

impl Reader {
    pub fn new(mut input: Box<dyn InputStream>, avoid_seeks: bool) -> Self {
        let file_size = if avoid_seeks {
            None
        } else {
            u64::try_from(input.file_size()).ok()
        };
        let capacity = input.cache_size().max(MAX_HEADER_LEN);
        Self {
            input,
            avoid_seeks,
            stream_pos: 0,
            window: Vec::with_capacity(capacity),
            window_pos: 0,
            file_size,
        }
    }

    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    pub fn avoids_seeks(&self) -> bool {
        self.avoid_seeks
    }

    pub fn input_mut(&mut self) -> &mut dyn InputStream {
        self.input.as_mut()
    }

    fn raw_read(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize, EbmlError> {
        if self.avoid_seeks && pos != self.stream_pos {
            if pos < self.stream_pos {
                return Err(EbmlError::NonSequential {
                    from: self.stream_pos,
                    to: pos,
                });
            }
            self.discard_until(pos)?;
        }

        let n = self.input.read(pos, buf);
        if n < 0 {
            return Err(EbmlError::Io(pos));
        }
        self.stream_pos = pos + n as u64;
        Ok(n as usize)
    }

    fn discard_until(&mut self, target: u64) -> Result<(), EbmlError> {
        let mut scratch = [0u8; 4096];
        while self.stream_pos < target {
            let want = ((target - self.stream_pos) as usize).min(scratch.len());
            let pos = self.stream_pos;
            let n = self.input.read(pos, &mut scratch[..want]);
            if n < 0 {
                return Err(EbmlError::Io(pos));
            }
            if n == 0 {
                return Err(EbmlError::UnexpectedEof(pos));
            }
            self.stream_pos += n as u64;
        }
        Ok(())
    }

    fn refill(&mut self, pos: u64) -> Result<(), EbmlError> {
        let capacity = self.window.capacity();
        self.window.resize(capacity, 0);
        let mut filled = 0;
        while filled < capacity {
            let mut chunk = std::mem::take(&mut self.window);
            let n = self.raw_read(pos + filled as u64, &mut chunk[filled..]);
            self.window = chunk;
            match n? {
                0 => break,
                n => filled += n,
            }
        }
        self.window.truncate(filled);
        self.window_pos = pos;
        Ok(())
    }

    /// Reads as much of `buf` as the input holds from `pos` on. Returns the
    /// number of bytes copied, short only at end of input.
    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize, EbmlError> {
        let mut done = 0;
        while done < buf.len() {
            let at = pos + done as u64;
            let window_end = self.window_pos + self.window.len() as u64;
            if at >= self.window_pos && at < window_end {
                let start = (at - self.window_pos) as usize;
                let n = (self.window.len() - start).min(buf.len() - done);
                buf[done..done + n].copy_from_slice(&self.window[start..start + n]);
                done += n;
                continue;
            }

            let remaining = buf.len() - done;
            if remaining >= self.window.capacity() {
                let n = self.raw_read(at, &mut buf[done..])?;
                if n == 0 {
                    break;
                }
                done += n;
            } else {
                self.refill(at)?;
                if self.window.is_empty() {
                    break;
                }
            }
        }
        Ok(done)
    }

    pub fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), EbmlError> {
        let n = self.read_at(pos, buf)?;
        if n < buf.len() {
            return Err(EbmlError::UnexpectedEof(pos + n as u64));
        }
        Ok(())
    }

    /// Reads the element header at `pos`. Returns `None` at end of input.
    pub fn read_header(&mut self, pos: u64) -> Result<Option<ElementHeader>, EbmlError> {
        if self.file_size.is_some_and(|size| pos >= size) {
            return Ok(None);
        }

        let mut buf = [0u8; MAX_HEADER_LEN];
        let n = self.read_at(pos, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        let buf = &buf[..n];

        let (id, id_len) = match parse_id(buf) {
            Some(parsed) => parsed,
            None if buf[0] == 0 || buf[0].leading_zeros() >= 4 => {
                return Err(EbmlError::InvalidElementId(pos));
            }
            None => return Err(EbmlError::UnexpectedEof(pos)),
        };
        let (size, size_len) = match parse_size(&buf[id_len..]) {
            Some(parsed) => parsed,
            None if buf.len() > id_len && buf[id_len] == 0 => {
                return Err(EbmlError::InvalidVint(pos + id_len as u64));
            }
            None => return Err(EbmlError::UnexpectedEof(pos + id_len as u64)),
        };

        Ok(Some(ElementHeader {
            id,
            size,
            pos,
            header_len: (id_len + size_len) as u8,
        }))
    }

    /// Buffers the payload of an element of known size up to `limit` bytes.
    pub fn read_payload(&mut self, header: &ElementHeader, limit: u64) -> Result<Vec<u8>, EbmlError> {
        let size = match header.size {
            Some(size) if size <= limit => size,
            size => {
                return Err(EbmlError::TooLarge {
                    id: header.id,
                    size: size.unwrap_or(u64::MAX),
                });
            }
        };
        let mut payload = vec![0u8; size as usize];
        self.read_exact_at(header.data_pos(), &mut payload)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixture::{MemoryInput, element, uint};

    #[test]
    fn ids_keep_their_marker() {
        assert_eq!(parse_id(&[0xEC]), Some((0xEC, 1)));
        assert_eq!(parse_id(&[0x1A, 0x45, 0xDF, 0xA3]), Some((id::EBML, 4)));
        assert_eq!(parse_id(&[0x1A, 0x45]), None);
        assert_eq!(parse_id(&[0x08, 0, 0, 0, 0]), None);
    }

    #[test]
    fn unknown_sizes() {
        assert_eq!(parse_size(&[0xFF]), Some((None, 1)));
        assert_eq!(parse_size(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]), Some((None, 8)));
        assert_eq!(parse_size(&[0x40, 0x7F]), Some((Some(0x7F), 2)));
        assert_eq!(parse_size(&[0xFE]), Some((Some(0x7E), 1)));
    }

    #[test]
    fn scalar_values() -> Result<(), EbmlError> {
        assert_eq!(read_uint(&[])?, 0);
        assert_eq!(read_uint(&[0x01, 0x00])?, 256);
        assert!(read_uint(&[0; 9]).is_err());
        assert_eq!(read_sint(&[0xFF, 0x7F])?, -129);
        assert_eq!(read_float(&1.5f32.to_be_bytes())?, 1.5);
        assert_eq!(read_float(&(-2.25f64).to_be_bytes())?, -2.25);
        assert!(read_float(&[0; 3]).is_err());
        assert_eq!(read_string(b"eng\0\0"), "eng");
        Ok(())
    }

    #[test]
    fn children_carry_absolute_positions() -> anyhow::Result<()> {
        let mut data = element(id::TRACK_NUMBER, &uint(1));
        data.extend(element(id::CODEC_ID, b"V_VP9"));
        let mut children = Children::new(&data, 100);

        let (first, payload) = children.next().transpose()?.expect("first child");
        assert_eq!((first.id, first.pos, payload), (id::TRACK_NUMBER, 100, &[1u8][..]));
        let (second, payload) = children.next().transpose()?.expect("second child");
        assert_eq!(second.pos, 103);
        assert_eq!(payload, b"V_VP9");
        assert!(children.next().is_none());
        Ok(())
    }

    #[test]
    fn oversized_child_stops_iteration() {
        let data = [0xD7, 0x85, 0x01];
        let mut children = Children::new(&data, 0);
        assert!(matches!(
            children.next(),
            Some(Err(EbmlError::Overflow { id: id::TRACK_NUMBER, size: 5 }))
        ));
        assert!(children.next().is_none());
    }

    #[test]
    fn crc_is_checked_over_the_remaining_payload() {
        let body = element(id::TIMECODE_SCALE, &uint(1_000_000));
        let crc = CRC_EBML.checksum(&body).to_le_bytes();
        let mut payload = element(id::CRC32, &crc);
        payload.extend_from_slice(&body);
        assert!(verify_crc(id::INFO, &payload).is_ok());

        let last = payload.len() - 1;
        payload[last] ^= 0xFF;
        assert!(matches!(
            verify_crc(id::INFO, &payload),
            Err(EbmlError::CrcMismatch { id: id::INFO, .. })
        ));

        // No CRC element, nothing to check.
        assert!(verify_crc(id::INFO, &body).is_ok());
    }

    #[test]
    fn reader_serves_headers_and_payloads() -> Result<(), EbmlError> {
        let mut data = element(id::VOID, &[0u8; 3]);
        data.extend(element(id::TITLE, b"hello"));
        let mut reader = Reader::new(Box::new(MemoryInput::new(data.clone())), false);
        assert_eq!(reader.file_size(), Some(data.len() as u64));

        let void = reader.read_header(0)?.expect("void header");
        assert_eq!((void.id, void.size, void.end()), (id::VOID, Some(3), Some(5)));
        let title = reader.read_header(5)?.expect("title header");
        assert_eq!(reader.read_payload(&title, 16)?, b"hello");
        assert!(reader.read_payload(&title, 4).is_err());
        assert_eq!(reader.read_header(data.len() as u64)?, None);
        Ok(())
    }

    #[test]
    fn streaming_reader_only_moves_forward() -> Result<(), EbmlError> {
        let data: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
        let mut reader = Reader::new(Box::new(MemoryInput::sequential(data)), true);
        assert_eq!(reader.file_size(), None);

        let mut buf = [0u8; 4];
        reader.read_exact_at(10, &mut buf)?;
        assert_eq!(buf, [10, 11, 12, 13]);
        // Past the window: the gap is read and dropped.
        reader.read_exact_at(150_000, &mut buf)?;
        assert_eq!(buf[0], (150_000 % 256) as u8);
        assert!(matches!(
            reader.read_exact_at(5, &mut buf),
            Err(EbmlError::NonSequential { .. })
        ));
        Ok(())
    }
}
