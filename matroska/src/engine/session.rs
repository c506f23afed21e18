use std::cmp::Reverse;

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::engine::cluster::{Demux, Skip};
use crate::engine::ebml::{ElementHeader, Reader, read_uint};
use crate::engine::elements as id;
use crate::engine::metadata::{Metadata, MetadataParser};
use crate::engine::native::{ChapterTable, TagTable};
use crate::engine::{
    Engine, ErrorBuffer, Frame, FrameStatus, InputStream, OpenFlags, SeekMode, Session,
};
use crate::model::{Attachment, Cue, SegmentInfo, TrackInfo};
use crate::utils::errors::SeekError;

/// The native Matroska/WebM engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatroskaEngine;

impl Engine for MatroskaEngine {
    type Session = MatroskaSession;

    fn open(&self, input: Box<dyn InputStream>, flags: OpenFlags) -> Result<MatroskaSession, String> {
        let mut reader = Reader::new(input, flags.avoid_seeks);
        let meta = match MetadataParser::new(&mut reader, flags.fail_level).parse() {
            Ok(meta) => meta,
            Err(e) => {
                let mut error = ErrorBuffer::new();
                error.set(format_args!("{e:#}"));
                return Err(error.as_str().to_owned());
            }
        };

        let demux = Demux::new(meta.first_cluster, meta.tracks.len(), flags.fail_level);
        Ok(MatroskaSession {
            reader: Some(reader),
            meta,
            demux,
            error: ErrorBuffer::new(),
            current: Vec::new(),
        })
    }
}

pub struct MatroskaSession {
    /// `None` once closed.
    reader: Option<Reader>,
    meta: Metadata,
    demux: Demux,
    error: ErrorBuffer,
    /// Payload of the frame most recently returned.
    current: Vec<u8>,
}

impl MatroskaSession {
    fn seek_to(&mut self, timecode: u64, mode: SeekMode, fuzzy: bool) -> Result<()> {
        let Some(reader) = self.reader.as_mut() else {
            bail!("session is closed");
        };
        if reader.avoids_seeks() {
            bail!(SeekError::Streaming);
        }
        let Some(first) = self.meta.first_cluster else {
            self.demux.reposition(self.meta.segment_top);
            return Ok(());
        };

        let pos = match cue_position(&self.meta, self.demux.mask(), timecode, mode) {
            Some(pos) => pos,
            None => scan_clusters(reader, &self.meta, first, timecode)?,
        };
        debug!("Seek to {timecode} ns ({mode:?}) resumes at {pos}");

        self.demux.reposition(pos);
        self.demux.set_skip(match mode {
            _ if fuzzy => Skip::None,
            SeekMode::Exact => Skip::Before(timecode),
            SeekMode::PrevKeyframe | SeekMode::PrevKeyframeStrict => Skip::UntilKeyframe,
        });
        Ok(())
    }
}

/// Picks the cluster of the latest cue at or before `timecode`. Strict mode
/// only considers cues for unmasked tracks.
fn cue_position(meta: &Metadata, mask: u64, timecode: u64, mode: SeekMode) -> Option<u64> {
    let usable = |cue: &&Cue| {
        mode != SeekMode::PrevKeyframeStrict
            || meta
                .index_of(cue.track)
                .is_some_and(|index| index >= 64 || mask & (1 << index) == 0)
    };
    let mut candidates = meta.cues.iter().filter(usable).peekable();
    candidates.peek()?;

    candidates
        .filter(|cue| cue.time <= timecode)
        .max_by_key(|cue| (cue.time, Reverse(cue.position)))
        .map(|cue| cue.position)
        .or(meta.first_cluster)
}

/// Walks cluster headers from the first cluster and returns the last one
/// whose timestamp is at or before `timecode`.
fn scan_clusters(reader: &mut Reader, meta: &Metadata, first: u64, timecode: u64) -> Result<u64> {
    let total = reader.file_size().unwrap_or(meta.segment_top);
    let mut best = first;
    let mut pos = first;
    while pos < meta.segment_top {
        if !reader.input_mut().progress(pos, total) {
            debug!("Cluster scan aborted at {pos}");
            break;
        }
        let Some(header) = reader.read_header(pos)? else {
            break;
        };

        if header.id == id::CLUSTER {
            if let Some(cluster_timecode) = cluster_timecode(reader, &header)? {
                if cluster_timecode.saturating_mul(meta.info.timecode_scale) > timecode {
                    break;
                }
                best = pos;
            }
        }
        match header.end() {
            Some(end) => pos = end,
            None => break,
        }
    }
    Ok(best)
}

/// The Timestamp is expected among the first few children of a cluster.
fn cluster_timecode(reader: &mut Reader, cluster: &ElementHeader) -> Result<Option<u64>> {
    let mut pos = cluster.data_pos();
    for _ in 0..4 {
        if cluster.end().is_some_and(|end| pos >= end) {
            break;
        }
        let Some(child) = reader.read_header(pos)? else {
            break;
        };
        if child.id == id::TIMESTAMP {
            let payload = reader.read_payload(&child, 8)?;
            return Ok(Some(read_uint(&payload)?));
        }
        match child.end() {
            Some(end) => pos = end,
            None => break,
        }
    }
    Ok(None)
}

impl Session for MatroskaSession {
    fn close(&mut self) {
        if self.reader.take().is_some() {
            trace!("Closing session");
        }
        self.demux.flush();
        let current = std::mem::take(&mut self.current);
        self.demux.pool().release(current);
    }

    fn last_error(&self) -> &str {
        self.error.as_str()
    }

    fn track_count(&self) -> usize {
        self.meta.tracks.len()
    }

    fn track_info(&mut self, index: usize) -> Option<&TrackInfo> {
        if index >= self.meta.tracks.len() {
            self.error.set(format_args!(
                "track index {index} out of range ({} tracks)",
                self.meta.tracks.len()
            ));
            return None;
        }
        self.meta.tracks.get(index)
    }

    fn file_info(&mut self) -> Option<&SegmentInfo> {
        Some(&self.meta.info)
    }

    fn attachments(&self) -> &[Attachment] {
        &self.meta.attachments
    }

    fn chapters(&self) -> &ChapterTable {
        &self.meta.chapters
    }

    fn tags(&self) -> &TagTable {
        &self.meta.tags
    }

    fn cues(&self) -> &[Cue] {
        &self.meta.cues
    }

    fn segment_pos(&self) -> u64 {
        self.meta.segment_pos
    }

    fn segment_top(&self) -> u64 {
        self.meta.segment_top
    }

    fn cues_pos(&self) -> u64 {
        self.meta.cues_pos
    }

    fn cues_top_pos(&self) -> u64 {
        self.meta.cues_top
    }

    fn seek(&mut self, timecode: u64, mode: SeekMode) {
        self.error.clear();
        if let Err(e) = self.seek_to(timecode, mode, false) {
            self.error.set(format_args!("{e:#}"));
        }
    }

    fn seek_cue_aware(&mut self, timecode: u64, mode: SeekMode, fuzzy: bool) {
        self.error.clear();
        let fuzzy = fuzzy && !self.meta.cues.is_empty();
        if let Err(e) = self.seek_to(timecode, mode, fuzzy) {
            self.error.set(format_args!("{e:#}"));
        }
    }

    fn skip_to_keyframe(&mut self) {
        self.demux.skip_to_keyframe();
    }

    fn lowest_queued_timecode(&self) -> Option<u64> {
        self.demux.lowest_queued()
    }

    fn set_track_mask(&mut self, mask: u64) {
        self.demux.set_mask(mask);
    }

    fn read_frame(&mut self, mask: u64) -> FrameStatus<'_> {
        let Some(reader) = self.reader.as_mut() else {
            self.error.set("session is closed");
            return FrameStatus::Error;
        };

        let frame = loop {
            if let Some(frame) = self.demux.pop() {
                if frame.track < 64 && mask & (1 << frame.track) != 0 {
                    self.demux.pool().release(frame.data);
                    continue;
                }
                break frame;
            }
            if self.demux.at_end() {
                return FrameStatus::EndOfStream;
            }
            if let Err(e) = self.demux.fill(reader, &self.meta) {
                self.error.set(format_args!("{e:#}"));
                return FrameStatus::Error;
            }
        };

        let previous = std::mem::replace(&mut self.current, frame.data);
        self.demux.pool().release(previous);
        FrameStatus::Frame(Frame {
            track: frame.track as u32,
            start_time: frame.start,
            end_time: frame.end,
            file_pos: frame.file_pos,
            data: &self.current,
            flags: frame.flags,
            discard: frame.discard,
        })
    }
}
