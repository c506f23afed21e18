//! Cluster walking, block unlacing and the frame queue.

use std::collections::VecDeque;
use std::ops::Range;

use anyhow::{Result, bail};
use log::{Level, trace, warn};

use crate::engine::ebml::{Children, ElementHeader, Reader, read_sint, read_uint};
use crate::engine::elements::{self as id, is_level1};
use crate::engine::metadata::Metadata;
use crate::log_or_err;
use crate::model::frame_flags::{DISCARDABLE, KEYFRAME, UNKNOWN_END, UNKNOWN_START};
use crate::model::CompMethod;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::errors::{BlockError, EbmlError};

const MAX_BLOCK_SIZE: u64 = 256 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Skip {
    None,
    UntilKeyframe,
    /// Drop frames starting before this time.
    Before(u64),
}

#[derive(Debug)]
pub(super) struct QueuedFrame {
    pub track: usize,
    pub start: u64,
    pub end: u64,
    pub file_pos: u64,
    pub flags: u32,
    pub discard: i64,
    pub data: Vec<u8>,
}

impl QueuedFrame {
    pub fn is_keyframe(&self) -> bool {
        self.flags & KEYFRAME != 0
    }
}

#[derive(Debug, Clone, Copy)]
struct ClusterCursor {
    end: Option<u64>,
    timecode: Option<u64>,
}

/// What a BlockGroup adds to its Block.
#[derive(Debug, Clone, Copy, Default)]
struct GroupInfo {
    duration: Option<u64>,
    referenced: bool,
    discard_padding: i64,
}

#[derive(Debug)]
pub(super) struct Demux {
    pub fail_level: Level,
    next_pos: u64,
    cluster: Option<ClusterCursor>,
    eos: bool,
    queue: VecDeque<QueuedFrame>,
    mask: u64,
    skip: Vec<Skip>,
    pool: BufferPool,
}

impl Demux {
    pub fn new(first_cluster: Option<u64>, tracks: usize, fail_level: Level) -> Self {
        Self {
            fail_level,
            next_pos: first_cluster.unwrap_or(0),
            cluster: None,
            eos: first_cluster.is_none(),
            queue: VecDeque::new(),
            mask: 0,
            skip: vec![Skip::None; tracks],
            pool: BufferPool::default(),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn set_mask(&mut self, mask: u64) {
        self.mask = mask;
        self.flush();
    }

    pub fn flush(&mut self) {
        for frame in self.queue.drain(..) {
            self.pool.release(frame.data);
        }
    }

    /// Continues reading at `pos`, which must be the start of a cluster or
    /// another level-1 element.
    pub fn reposition(&mut self, pos: u64) {
        self.flush();
        self.cluster = None;
        self.next_pos = pos;
        self.eos = false;
    }

    pub fn set_skip(&mut self, skip: Skip) {
        self.skip.fill(skip);
    }

    /// Drops queued frames up to each track's next keyframe and keeps
    /// dropping for tracks that have none queued yet.
    pub fn skip_to_keyframe(&mut self) {
        self.skip.fill(Skip::UntilKeyframe);
        let queued = std::mem::take(&mut self.queue);
        for frame in queued {
            match self.skip.get(frame.track).copied() {
                Some(Skip::UntilKeyframe) if !frame.is_keyframe() => self.pool.release(frame.data),
                _ => {
                    self.skip[frame.track] = Skip::None;
                    self.queue.push_back(frame);
                }
            }
        }
    }

    pub fn lowest_queued(&self) -> Option<u64> {
        self.queue.iter().map(|frame| frame.start).min()
    }

    pub fn pop(&mut self) -> Option<QueuedFrame> {
        self.queue.pop_front()
    }

    pub fn at_end(&self) -> bool {
        self.eos && self.queue.is_empty()
    }

    /// Reads elements until at least one frame is queued or the segment
    /// ends.
    pub fn fill(&mut self, reader: &mut Reader, meta: &Metadata) -> Result<()> {
        let queued = self.queue.len();
        while self.queue.len() == queued && !self.eos {
            self.step(reader, meta)?;
        }
        Ok(())
    }

    fn step(&mut self, reader: &mut Reader, meta: &Metadata) -> Result<()> {
        let Some(cluster) = self.cluster else {
            return self.next_cluster(reader, meta);
        };
        if cluster.end.is_some_and(|end| self.next_pos >= end) {
            self.cluster = None;
            return Ok(());
        }

        let Some(header) = reader.read_header(self.next_pos)? else {
            self.eos = true;
            return Ok(());
        };
        if cluster.end.is_none() && is_level1(header.id) {
            // An unknown-sized cluster ends where the next level-1 element
            // begins.
            self.cluster = None;
            return Ok(());
        }
        let end = match (header.end(), cluster.end) {
            (Some(end), Some(limit)) if end > limit => bail!(EbmlError::Overflow {
                id: header.id,
                size: header.size.unwrap_or(u64::MAX),
            }),
            (Some(end), _) => end,
            (None, _) => bail!(EbmlError::TooLarge {
                id: header.id,
                size: u64::MAX,
            }),
        };

        // A defective element is reported once and then stepped over.
        self.next_pos = end;
        match header.id {
            id::TIMESTAMP => {
                let payload = reader.read_payload(&header, 8)?;
                let timecode = read_uint(&payload)?;
                if let Some(cluster) = self.cluster.as_mut() {
                    cluster.timecode = Some(timecode);
                }
            }
            id::SIMPLE_BLOCK => {
                let block = self.read_block(reader, &header)?;
                let result = self.queue_block(meta, header.pos, &block, None);
                self.pool.release(block);
                result?;
            }
            id::BLOCK_GROUP => {
                let group = reader.read_payload(&header, MAX_BLOCK_SIZE)?;
                self.queue_group(meta, &header, &group)?;
            }
            other => trace!("Skipping cluster child 0x{other:X}"),
        }
        Ok(())
    }

    fn next_cluster(&mut self, reader: &mut Reader, meta: &Metadata) -> Result<()> {
        if self.next_pos >= meta.segment_top {
            self.eos = true;
            return Ok(());
        }
        let Some(header) = reader.read_header(self.next_pos)? else {
            self.eos = true;
            return Ok(());
        };

        if header.id == id::CLUSTER {
            trace!("Cluster at {}", header.pos);
            self.cluster = Some(ClusterCursor {
                end: header.end(),
                timecode: None,
            });
            self.next_pos = header.data_pos();
            return Ok(());
        }

        match header.end() {
            Some(end) => self.next_pos = end,
            None => {
                warn!(
                    "Element 0x{:X} of unknown size at {} ends the stream",
                    header.id, header.pos
                );
                self.eos = true;
            }
        }
        Ok(())
    }

    fn read_block(&mut self, reader: &mut Reader, header: &ElementHeader) -> Result<Vec<u8>> {
        let size = header.size.unwrap_or(u64::MAX);
        if size > MAX_BLOCK_SIZE {
            bail!(EbmlError::TooLarge {
                id: header.id,
                size,
            });
        }

        let mut block = self.pool.acquire();
        block.resize(size as usize, 0);
        if let Err(e) = reader.read_exact_at(header.data_pos(), &mut block) {
            self.pool.release(block);
            bail!(e);
        }
        Ok(block)
    }

    fn queue_group(&mut self, meta: &Metadata, header: &ElementHeader, group: &[u8]) -> Result<()> {
        let mut info = GroupInfo::default();
        let mut block = None;
        for child in Children::new(group, header.data_pos()) {
            let (child, data) = child?;
            match child.id {
                id::BLOCK => block = Some(data),
                id::BLOCK_DURATION => info.duration = Some(read_uint(data)?),
                id::REFERENCE_BLOCK => info.referenced = true,
                id::DISCARD_PADDING => info.discard_padding = read_sint(data)?,
                _ => {}
            }
        }

        match block {
            Some(block) => self.queue_block(meta, header.pos, block, Some(info)),
            None => {
                warn!("BlockGroup at {} without a Block", header.pos);
                Ok(())
            }
        }
    }

    /// Unlaces one block into the queue, applying the mask and any pending
    /// seek skip for its track.
    fn queue_block(
        &mut self,
        meta: &Metadata,
        pos: u64,
        block: &[u8],
        group: Option<GroupInfo>,
    ) -> Result<()> {
        if block.len() < 4 {
            bail!(BlockError::TooShort(block.len()));
        }

        let mut bs = BsIoSliceReader::from_slice(block);
        let (number, _) = bs.get_vint()?;
        let relative = bs.get_s::<i16>(16)?;
        let flags = bs.get_n::<u8>(8)?;

        let Some(index) = meta.index_of(number) else {
            log_or_err!(self, Level::Warn, BlockError::UnknownTrack(number));
            return Ok(());
        };
        if index < 64 && self.mask & (1 << index) != 0 {
            return Ok(());
        }
        let track = &meta.tracks[index];

        let cluster_timecode = match self.cluster.and_then(|c| c.timecode) {
            Some(timecode) => timecode,
            None => {
                log_or_err!(self, Level::Warn, BlockError::MissingClusterTimestamp(pos));
                0
            }
        };

        let frames = unlace(&mut bs, (flags >> 1) & 0x03)?;
        let header_len = bs.byte_position()?;
        let payload = &block[header_len..];

        let keyframe = match group {
            Some(group) => !group.referenced,
            None => flags & 0x80 != 0,
        };
        let discardable = group.is_none() && flags & 0x01 != 0;
        let group = group.unwrap_or_default();

        let scale = meta.info.timecode_scale;
        let timecode = i64::try_from(cluster_timecode)
            .unwrap_or(i64::MAX)
            .saturating_add(relative as i64)
            .max(0) as u64;
        let start = to_ns(timecode, scale, track.timecode_scale);
        let block_duration = group
            .duration
            .map(|duration| to_ns(duration, scale, track.timecode_scale));
        let default_duration = track.default_duration;

        let count = frames.len();
        for (i, range) in frames.into_iter().enumerate() {
            let mut frame_flags = if keyframe { KEYFRAME } else { 0 };
            if discardable {
                frame_flags |= DISCARDABLE;
            }

            let frame_start = match i {
                0 => start,
                _ if default_duration > 0 => {
                    start.saturating_add((i as u64).saturating_mul(default_duration))
                }
                _ => {
                    frame_flags |= UNKNOWN_START;
                    start
                }
            };
            let last = i + 1 == count;
            let frame_end = match block_duration {
                Some(duration) if last => start.saturating_add(duration),
                _ if default_duration > 0 => frame_start.saturating_add(default_duration),
                _ => {
                    frame_flags |= UNKNOWN_END;
                    frame_start
                }
            };

            if !self.admit(index, frame_start, frame_flags & KEYFRAME != 0) {
                continue;
            }

            let mut data = self.pool.acquire();
            if track.comp_enabled && track.comp_method == CompMethod::Prepend {
                data.extend_from_slice(&track.comp_method_private);
            }
            data.extend_from_slice(&payload[range]);

            self.queue.push_back(QueuedFrame {
                track: index,
                start: frame_start,
                end: frame_end,
                file_pos: pos,
                flags: frame_flags,
                discard: if last { group.discard_padding } else { 0 },
                data,
            });
        }
        Ok(())
    }

    /// Applies the track's seek skip state to a new frame.
    fn admit(&mut self, track: usize, start: u64, keyframe: bool) -> bool {
        let Some(skip) = self.skip.get_mut(track) else {
            return true;
        };
        let admitted = match *skip {
            Skip::None => true,
            Skip::UntilKeyframe => keyframe,
            Skip::Before(target) => start >= target,
        };
        if admitted {
            *skip = Skip::None;
        }
        admitted
    }
}

fn to_ns(timecode: u64, scale: u64, track_scale: f64) -> u64 {
    if track_scale == 1.0 {
        timecode.saturating_mul(scale)
    } else {
        (timecode as f64 * scale as f64 * track_scale) as u64
    }
}

/// Splits a block payload into frame ranges. `bs` is positioned after the
/// block header and is left after the lace header.
fn unlace(bs: &mut BsIoSliceReader, lacing: u8) -> Result<Vec<Range<usize>>> {
    if lacing == 0 {
        let len = bs.bytes_available()?;
        return Ok(vec![0..len]);
    }

    let count = bs.get_n::<u8>(8)? as usize + 1;
    let mut sizes = Vec::with_capacity(count);
    let kind = match lacing {
        1 => {
            for _ in 1..count {
                let mut size = 0u64;
                loop {
                    let byte = bs.get_n::<u8>(8)?;
                    size += byte as u64;
                    if byte != 0xFF {
                        break;
                    }
                }
                sizes.push(size);
            }
            "Xiph"
        }
        3 => {
            let (first, _) = bs.get_vint()?;
            sizes.push(first);
            let mut previous = first as i64;
            for _ in 2..count {
                let size = previous + bs.get_svint()?;
                if size < 0 {
                    bail!(BlockError::InvalidLacing {
                        kind: "EBML",
                        reason: "negative frame size",
                    });
                }
                sizes.push(size as u64);
                previous = size;
            }
            "EBML"
        }
        _ => {
            let available = bs.bytes_available()?;
            if available % count != 0 {
                bail!(BlockError::InvalidLacing {
                    kind: "fixed",
                    reason: "payload does not divide into equal frames",
                });
            }
            sizes.resize(count - 1, (available / count) as u64);
            "fixed"
        }
    };

    let available = bs.bytes_available()?;
    let total = sizes
        .iter()
        .try_fold(0u64, |acc, &size| acc.checked_add(size))
        .unwrap_or(u64::MAX);
    if total > available as u64 {
        bail!(BlockError::LaceOverflow { total, available });
    }
    sizes.push(available as u64 - total);
    trace!("{kind} lacing: {count} frames in {available} bytes");

    let mut offset = 0;
    Ok(sizes
        .into_iter()
        .map(|size| {
            let range = offset..offset + size as usize;
            offset = range.end;
            range
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixture::vint;

    fn lace(kind: u8, header: &[u8], payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut data = header.to_vec();
        data.extend_from_slice(payload);
        let mut bs = BsIoSliceReader::from_slice(&data);
        let ranges = unlace(&mut bs, kind)?;
        let start = bs.byte_position()?;
        Ok(ranges
            .into_iter()
            .map(|r| data[start + r.start..start + r.end].to_vec())
            .collect())
    }

    #[test]
    fn xiph_lacing() -> Result<()> {
        let payload: Vec<u8> = (0..300u16).map(|i| i as u8).chain([7, 8, 9]).collect();
        // Three frames: 300, 2 and the remaining 1 byte.
        let frames = lace(1, &[2, 0xFF, 45, 2], &payload)?;
        assert_eq!(frames.iter().map(Vec::len).collect::<Vec<_>>(), [300, 2, 1]);
        assert_eq!(frames[2], [9]);
        Ok(())
    }

    #[test]
    fn ebml_lacing() -> Result<()> {
        // Sizes 10, 12 (delta +2, biased by 63), rest 5.
        let mut header = vec![2];
        header.extend(vint(10));
        header.push(0x80 | (63 + 2));
        let frames = lace(3, &header, &[0u8; 27])?;
        assert_eq!(frames.iter().map(Vec::len).collect::<Vec<_>>(), [10, 12, 5]);
        Ok(())
    }

    #[test]
    fn fixed_lacing() -> Result<()> {
        let frames = lace(2, &[3], &[1, 1, 2, 2, 3, 3, 4, 4])?;
        assert_eq!(frames, [vec![1u8, 1], vec![2, 2], vec![3, 3], vec![4, 4]]);
        assert!(lace(2, &[2], &[0; 8]).is_err());
        Ok(())
    }

    #[test]
    fn lace_sizes_beyond_payload_are_rejected() {
        assert!(lace(1, &[1, 40], &[0; 10]).is_err());
        let mut header = vec![2];
        header.extend(vint(2));
        header.push(0x80 | (63 - 5));
        assert!(lace(3, &header, &[0; 10]).is_err());
    }

    #[test]
    fn timecodes_scale_to_nanoseconds() {
        assert_eq!(to_ns(40, 1_000_000, 1.0), 40_000_000);
        assert_eq!(to_ns(40, 1_000_000, 0.5), 20_000_000);
    }
}
