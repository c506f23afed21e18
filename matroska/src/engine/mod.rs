//! The parsing engine boundary.
//!
//! The demuxer drives an engine through two traits: [`Engine`] opens a
//! [`Session`] over an [`InputStream`], and the session answers metadata
//! queries and produces frames. Status values at this boundary follow the
//! engine's own conventions (negative I/O sentinels, three-way frame status,
//! a diagnostic buffer), and are translated into typed results by
//! [`Demuxer`](crate::demuxer::Demuxer).
//!
//! [`MatroskaEngine`] is the native implementation shipped with the crate.

use std::fmt::{self, Write};

use crate::model::{Attachment, Cue, SegmentInfo, TrackInfo};

pub mod ebml;
pub mod elements;
pub mod native;

mod cluster;
mod metadata;
mod session;

#[cfg(test)]
pub(crate) mod fixture;

pub use native::{ChapterTable, TagTable};
pub use session::{MatroskaEngine, MatroskaSession};

/// Returned by [`InputStream::read`] and [`InputStream::file_size`] on failure.
pub const IO_ERROR: i64 = -1;

/// Capacity of the per-session diagnostic buffer, in bytes.
pub const ERROR_BUFFER_SIZE: usize = 1024;

/// Byte access as seen from inside the engine.
pub trait InputStream: Send {
    /// Reads up to `buf.len()` bytes starting at absolute position `pos`.
    ///
    /// Returns the number of bytes read, `0` at end of stream, or a negative
    /// value on error.
    fn read(&mut self, pos: u64, buf: &mut [u8]) -> i64;

    /// Total length of the input, or a negative value if unknown.
    fn file_size(&mut self) -> i64;

    /// Preferred read-ahead granularity.
    fn cache_size(&self) -> usize {
        64 * 1024
    }

    /// Short description of the last failed operation.
    fn error_text(&self) -> &str {
        "I/O error"
    }

    /// Reports progress of long scans. Returning `false` aborts the scan.
    fn progress(&mut self, _current: u64, _max: u64) -> bool {
        true
    }
}

/// Options passed to [`Engine::open`].
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    /// Never read out of order. Required for inputs that cannot seek.
    pub avoid_seeks: bool,
    /// Recoverable stream defects at or above this level fail the operation.
    pub fail_level: log::Level,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            avoid_seeks: false,
            fail_level: log::Level::Error,
        }
    }
}

/// How a seek settles on its final position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum SeekMode {
    /// Drop frames that start before the target.
    #[default]
    Exact,
    /// Start each track at a keyframe at or before the target.
    PrevKeyframe,
    /// As [`SeekMode::PrevKeyframe`], but only cue points for unmasked tracks
    /// are considered when choosing where to start.
    PrevKeyframeStrict,
}

impl SeekMode {
    pub const SEEK_TO_PREV_KEYFRAME: u32 = 1;
    pub const SEEK_TO_PREV_KEYFRAME_STRICT: u32 = 2;

    pub fn from_raw(flags: u32) -> Self {
        if flags & Self::SEEK_TO_PREV_KEYFRAME_STRICT != 0 {
            SeekMode::PrevKeyframeStrict
        } else if flags & Self::SEEK_TO_PREV_KEYFRAME != 0 {
            SeekMode::PrevKeyframe
        } else {
            SeekMode::Exact
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            SeekMode::Exact => 0,
            SeekMode::PrevKeyframe => Self::SEEK_TO_PREV_KEYFRAME,
            SeekMode::PrevKeyframeStrict => Self::SEEK_TO_PREV_KEYFRAME_STRICT,
        }
    }
}

/// A frame as held by the engine. `data` is only valid until the next call
/// into the session.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub track: u32,
    pub start_time: u64,
    pub end_time: u64,
    pub file_pos: u64,
    pub data: &'a [u8],
    pub flags: u32,
    pub discard: i64,
}

#[derive(Debug)]
pub enum FrameStatus<'a> {
    Frame(Frame<'a>),
    EndOfStream,
    /// Details are in [`Session::last_error`].
    Error,
}

/// Fixed-capacity diagnostic text, overwritten by every failing operation.
#[derive(Debug, Clone, Default)]
pub struct ErrorBuffer {
    text: String,
}

impl ErrorBuffer {
    pub fn new() -> Self {
        Self {
            text: String::with_capacity(ERROR_BUFFER_SIZE),
        }
    }

    pub fn set(&mut self, message: impl fmt::Display) {
        self.text.clear();
        let _ = write!(self.text, "{message}");
        if self.text.len() >= ERROR_BUFFER_SIZE {
            let mut end = ERROR_BUFFER_SIZE - 1;
            while !self.text.is_char_boundary(end) {
                end -= 1;
            }
            self.text.truncate(end);
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Opens engine sessions.
pub trait Engine {
    type Session: Session;

    /// Starts a session reading from `input`. On failure returns the
    /// engine's diagnostic text.
    fn open(&self, input: Box<dyn InputStream>, flags: OpenFlags) -> Result<Self::Session, String>;
}

/// One open container. Calls must be serialized by the owner.
pub trait Session: Send {
    /// Releases everything the session holds, including its input. Further
    /// calls other than `close` are not meaningful.
    fn close(&mut self);

    fn last_error(&self) -> &str;

    fn track_count(&self) -> usize;
    fn track_info(&mut self, index: usize) -> Option<&TrackInfo>;
    fn file_info(&mut self) -> Option<&SegmentInfo>;
    fn attachments(&self) -> &[Attachment];
    fn chapters(&self) -> &ChapterTable;
    fn tags(&self) -> &TagTable;
    fn cues(&self) -> &[Cue];

    fn segment_pos(&self) -> u64;
    fn segment_top(&self) -> u64;
    fn cues_pos(&self) -> u64;
    fn cues_top_pos(&self) -> u64;

    fn seek(&mut self, timecode: u64, mode: SeekMode);
    fn seek_cue_aware(&mut self, timecode: u64, mode: SeekMode, fuzzy: bool);
    fn skip_to_keyframe(&mut self);
    fn lowest_queued_timecode(&self) -> Option<u64>;

    /// Sets the persistent mask and discards every queued frame.
    fn set_track_mask(&mut self, mask: u64);

    /// Returns the next frame whose track bit is clear in both the persistent
    /// mask and `mask`.
    fn read_frame(&mut self, mask: u64) -> FrameStatus<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_buffer_is_bounded() {
        let mut buf = ErrorBuffer::new();
        buf.set("x".repeat(4 * ERROR_BUFFER_SIZE));
        assert!(buf.as_str().len() < ERROR_BUFFER_SIZE);

        // Multi-byte characters are never split.
        buf.set("é".repeat(ERROR_BUFFER_SIZE));
        assert!(buf.as_str().len() < ERROR_BUFFER_SIZE);
        assert!(buf.as_str().chars().all(|c| c == 'é'));

        buf.set(format_args!("track {} missing", 3));
        assert_eq!(buf.as_str(), "track 3 missing");
    }

    #[test]
    fn seek_mode_raw_flags() {
        assert_eq!(SeekMode::from_raw(0), SeekMode::Exact);
        assert_eq!(SeekMode::from_raw(1), SeekMode::PrevKeyframe);
        assert_eq!(SeekMode::from_raw(2), SeekMode::PrevKeyframeStrict);
        assert_eq!(SeekMode::from_raw(3), SeekMode::PrevKeyframeStrict);
        for mode in [SeekMode::Exact, SeekMode::PrevKeyframe, SeekMode::PrevKeyframeStrict] {
            assert_eq!(SeekMode::from_raw(mode.as_raw()), mode);
        }
    }
}
