//! The host-facing demuxer.
//!
//! A [`Demuxer`] owns one engine session and one registry key. Opening
//! registers the byte source, closing (or dropping) closes the session and
//! only then removes the key, so the engine can never call back into a
//! source that is gone.

use std::io::Read;

use log::{Level, debug, trace};

use crate::engine::{Engine, FrameStatus, MatroskaEngine, MatroskaSession, OpenFlags, SeekMode, Session};
use crate::io::{BridgeInput, ByteSource, CallbackBridge, Sequential, SourceKey, SourceRegistry};
use crate::model::convert;
use crate::model::{Attachment, Chapter, Cue, Packet, SegmentInfo, Tag, TrackInfo};
use crate::utils::errors::DemuxError;

/// How the engine may move through the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenMode {
    /// Streaming when the source reports that it cannot seek.
    #[default]
    Auto,
    Seekable,
    /// Never seek backwards. Elements past the first cluster that are only
    /// reachable through the SeekHead (typically Cues) are not read.
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub mode: OpenMode,
    /// Stream defects at or above this level fail instead of being logged.
    pub fail_level: Level,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            mode: OpenMode::Auto,
            fail_level: Level::Error,
        }
    }
}

impl From<OpenMode> for OpenOptions {
    fn from(mode: OpenMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}

pub struct Demuxer<S: Session = MatroskaSession> {
    session: S,
    /// Taken exactly once, when the session is released.
    key: Option<SourceKey>,
    registry: &'static SourceRegistry,
}

impl Demuxer {
    /// Opens `source` with the built-in engine and the global registry.
    pub fn open<B: ByteSource + 'static>(source: B, mode: OpenMode) -> Result<Self, DemuxError> {
        Self::open_with(source, mode.into())
    }

    pub fn open_with<B: ByteSource + 'static>(
        source: B,
        options: OpenOptions,
    ) -> Result<Self, DemuxError> {
        Self::open_engine(&MatroskaEngine, CallbackBridge::global(), source, options)
    }

    /// Opens a forward-only reader, such as a pipe.
    pub fn open_streaming<R: Read + Send + 'static>(reader: R) -> Result<Self, DemuxError> {
        Self::open(Sequential::new(reader), OpenMode::Streaming)
    }
}

impl<S: Session> Demuxer<S> {
    pub fn open_engine<E, B>(
        engine: &E,
        bridge: CallbackBridge,
        source: B,
        options: OpenOptions,
    ) -> Result<Self, DemuxError>
    where
        E: Engine<Session = S>,
        B: ByteSource + 'static,
    {
        let streaming = match options.mode {
            OpenMode::Auto => !source.is_seekable(),
            OpenMode::Seekable => false,
            OpenMode::Streaming => true,
        };
        let registry = bridge.registry();
        let key = registry.register(source);
        let flags = OpenFlags {
            avoid_seeks: streaming,
            fail_level: options.fail_level,
        };

        match engine.open(Box::new(BridgeInput::new(bridge, key)), flags) {
            Ok(session) => {
                debug!(
                    "Opened source {key} ({} tracks{})",
                    session.track_count(),
                    if streaming { ", streaming" } else { "" }
                );
                Ok(Self {
                    session,
                    key: Some(key),
                    registry,
                })
            }
            Err(reason) => {
                registry.unregister(&key);
                Err(DemuxError::Open(reason))
            }
        }
    }

    /// Releases the engine session and the registry entry.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.session.close();
            self.registry.unregister(&key);
            trace!("Closed source {key}");
        }
    }

    pub fn key(&self) -> Option<SourceKey> {
        self.key
    }

    /// Diagnostic text of the last failed engine operation.
    pub fn last_error(&self) -> &str {
        self.session.last_error()
    }

    fn query_error(&self, fallback: &str) -> DemuxError {
        let reason = self.session.last_error();
        DemuxError::Query(if reason.is_empty() {
            fallback.to_owned()
        } else {
            reason.to_owned()
        })
    }

    /// A file without tracks is an error, not an empty success.
    pub fn num_tracks(&self) -> Result<usize, DemuxError> {
        match self.session.track_count() {
            0 => Err(self.query_error("file has no tracks")),
            count => Ok(count),
        }
    }

    pub fn track_info(&mut self, index: usize) -> Result<TrackInfo, DemuxError> {
        let info = self.session.track_info(index).cloned();
        info.ok_or_else(|| self.query_error("track info unavailable"))
    }

    pub fn file_info(&mut self) -> Result<SegmentInfo, DemuxError> {
        let info = self.session.file_info().cloned();
        info.ok_or_else(|| self.query_error("segment info unavailable"))
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.session.attachments().to_vec()
    }

    /// Editions are the roots of the returned forest.
    pub fn chapters(&self) -> Vec<Chapter> {
        convert::chapters(self.session.chapters())
    }

    pub fn tags(&self) -> Vec<Tag> {
        convert::tags(self.session.tags())
    }

    pub fn cues(&self) -> Vec<Cue> {
        self.session.cues().to_vec()
    }

    /// Offset of the segment payload.
    pub fn segment(&self) -> u64 {
        self.session.segment_pos()
    }

    pub fn segment_top(&self) -> u64 {
        self.session.segment_top()
    }

    pub fn cues_pos(&self) -> u64 {
        self.session.cues_pos()
    }

    pub fn cues_top_pos(&self) -> u64 {
        self.session.cues_top_pos()
    }

    /// Repositions the packet stream. Failures, such as seeking a
    /// streaming source, leave the position unchanged and are reported
    /// through [`last_error`](Self::last_error).
    pub fn seek(&mut self, timecode: u64, mode: SeekMode) {
        self.session.seek(timecode, mode);
    }

    pub fn seek_cue_aware(&mut self, timecode: u64, mode: SeekMode, fuzzy: bool) {
        self.session.seek_cue_aware(timecode, mode, fuzzy);
    }

    pub fn skip_to_keyframe(&mut self) {
        self.session.skip_to_keyframe();
    }

    pub fn lowest_queued_timecode(&self) -> Option<u64> {
        self.session.lowest_queued_timecode()
    }

    /// Excludes tracks by index bit from every later read and drops frames
    /// already queued.
    pub fn set_track_mask(&mut self, mask: u64) {
        self.session.set_track_mask(mask);
    }

    /// Next packet, or `None` at end of stream.
    pub fn read_packet(&mut self) -> Result<Option<Packet>, DemuxError> {
        self.read_packet_masked(0)
    }

    /// Like [`read_packet`](Self::read_packet), additionally excluding the
    /// tracks in `mask` for this call. Frames skipped that way are gone.
    pub fn read_packet_masked(&mut self, mask: u64) -> Result<Option<Packet>, DemuxError> {
        match self.session.read_frame(mask) {
            FrameStatus::Frame(frame) => Ok(Some(convert::packet(&frame))),
            FrameStatus::EndOfStream => Ok(None),
            FrameStatus::Error => Err(DemuxError::Read(self.session.last_error().to_owned())),
        }
    }

    pub fn packets(&mut self) -> Packets<'_, S> {
        Packets {
            demuxer: self,
            done: false,
        }
    }
}

impl<S: Session> Drop for Demuxer<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Iterator over the remaining packets. Stops after the first error.
pub struct Packets<'a, S: Session> {
    demuxer: &'a mut Demuxer<S>,
    done: bool,
}

impl<S: Session> Iterator for Packets<'_, S> {
    type Item = Result<Packet, DemuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.demuxer.read_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use anyhow::Result;
    use parking_lot::Mutex;

    use crate::engine::fixture::{CLUSTER_MS, standard_file};
    use crate::engine::native::{ChapterTable, TagTable};
    use crate::engine::{Frame, InputStream};
    use crate::model::TrackType;

    const MS: u64 = 1_000_000;

    fn leak() -> &'static SourceRegistry {
        Box::leak(Box::new(SourceRegistry::new()))
    }

    /// What the scripted session observed.
    #[derive(Default)]
    struct Journal {
        closes: usize,
        entries_at_close: Vec<usize>,
        masks: Vec<u64>,
    }

    struct ScriptedEngine {
        registry: &'static SourceRegistry,
        tracks: Vec<TrackInfo>,
        frames: Vec<(u32, u64)>,
        fail_open: Option<&'static str>,
        fail_read_at: Option<usize>,
        journal: Arc<Mutex<Journal>>,
    }

    impl ScriptedEngine {
        fn new(registry: &'static SourceRegistry, tracks: usize) -> Self {
            Self {
                registry,
                tracks: (0..tracks)
                    .map(|i| TrackInfo {
                        number: i as u64 + 1,
                        ..Default::default()
                    })
                    .collect(),
                frames: (0..4).map(|i| (i % 2, i as u64 * 10)).collect(),
                fail_open: None,
                fail_read_at: None,
                journal: Arc::default(),
            }
        }
    }

    struct ScriptedSession {
        registry: &'static SourceRegistry,
        input: Box<dyn InputStream>,
        tracks: Vec<TrackInfo>,
        info: SegmentInfo,
        frames: Vec<(u32, u64)>,
        next: usize,
        fail_read_at: Option<usize>,
        error: String,
        payload: Vec<u8>,
        chapters: ChapterTable,
        tags: TagTable,
        journal: Arc<Mutex<Journal>>,
    }

    impl Engine for ScriptedEngine {
        type Session = ScriptedSession;

        fn open(&self, mut input: Box<dyn InputStream>, _flags: OpenFlags) -> Result<ScriptedSession, String> {
            // The source must already be reachable while the engine opens.
            let mut probe = [0u8; 4];
            if input.read(0, &mut probe) < 0 {
                return Err(input.error_text().to_owned());
            }
            if let Some(reason) = self.fail_open {
                return Err(reason.to_owned());
            }
            Ok(ScriptedSession {
                registry: self.registry,
                input,
                tracks: self.tracks.clone(),
                info: SegmentInfo {
                    title: "scripted".into(),
                    ..Default::default()
                },
                frames: self.frames.clone(),
                next: 0,
                fail_read_at: self.fail_read_at,
                error: String::new(),
                payload: Vec::new(),
                chapters: ChapterTable::default(),
                tags: TagTable::default(),
                journal: Arc::clone(&self.journal),
            })
        }
    }

    impl Session for ScriptedSession {
        fn close(&mut self) {
            let mut journal = self.journal.lock();
            journal.closes += 1;
            journal.entries_at_close.push(self.registry.len());
        }

        fn last_error(&self) -> &str {
            &self.error
        }

        fn track_count(&self) -> usize {
            self.tracks.len()
        }

        fn track_info(&mut self, index: usize) -> Option<&TrackInfo> {
            if index >= self.tracks.len() {
                self.error = format!("no track {index}");
            }
            self.tracks.get(index)
        }

        fn file_info(&mut self) -> Option<&SegmentInfo> {
            Some(&self.info)
        }

        fn attachments(&self) -> &[Attachment] {
            &[]
        }

        fn chapters(&self) -> &ChapterTable {
            &self.chapters
        }

        fn tags(&self) -> &TagTable {
            &self.tags
        }

        fn cues(&self) -> &[Cue] {
            &[]
        }

        fn segment_pos(&self) -> u64 {
            0
        }

        fn segment_top(&self) -> u64 {
            0
        }

        fn cues_pos(&self) -> u64 {
            0
        }

        fn cues_top_pos(&self) -> u64 {
            0
        }

        fn seek(&mut self, _timecode: u64, _mode: SeekMode) {
            self.next = 0;
        }

        fn seek_cue_aware(&mut self, timecode: u64, mode: SeekMode, _fuzzy: bool) {
            self.seek(timecode, mode);
        }

        fn skip_to_keyframe(&mut self) {}

        fn lowest_queued_timecode(&self) -> Option<u64> {
            None
        }

        fn set_track_mask(&mut self, mask: u64) {
            self.journal.lock().masks.push(mask);
        }

        fn read_frame(&mut self, mask: u64) -> FrameStatus<'_> {
            loop {
                if self.fail_read_at == Some(self.next) {
                    self.error = "scripted read failure".into();
                    return FrameStatus::Error;
                }
                let Some(&(track, start)) = self.frames.get(self.next) else {
                    return FrameStatus::EndOfStream;
                };
                self.next += 1;
                if mask & (1 << track) != 0 {
                    continue;
                }

                self.payload = vec![track as u8; 3];
                // Reads through the bridge keep working while the session is open.
                let mut byte = [0u8; 1];
                if self.input.read(0, &mut byte) < 0 {
                    self.error = self.input.error_text().to_owned();
                    return FrameStatus::Error;
                }
                return FrameStatus::Frame(Frame {
                    track,
                    start_time: start,
                    end_time: start + 10,
                    file_pos: 0,
                    data: &self.payload,
                    flags: 0,
                    discard: 0,
                });
            }
        }
    }

    fn open_scripted(engine: &ScriptedEngine) -> Result<Demuxer<ScriptedSession>, DemuxError> {
        Demuxer::open_engine(
            engine,
            CallbackBridge::new(engine.registry),
            Cursor::new(vec![0u8; 16]),
            OpenOptions::default(),
        )
    }

    #[test]
    fn zero_tracks_is_a_query_error() -> Result<()> {
        let engine = ScriptedEngine::new(leak(), 0);
        let demuxer = open_scripted(&engine)?;
        assert_eq!(
            demuxer.num_tracks(),
            Err(DemuxError::Query("file has no tracks".into()))
        );
        Ok(())
    }

    #[test]
    fn track_info_index_is_bounded_by_num_tracks() -> Result<()> {
        let engine = ScriptedEngine::new(leak(), 3);
        let mut demuxer = open_scripted(&engine)?;
        let count = demuxer.num_tracks()?;
        assert_eq!(count, 3);
        for index in 0..count {
            assert_eq!(demuxer.track_info(index)?.number, index as u64 + 1);
        }
        assert_eq!(
            demuxer.track_info(count),
            Err(DemuxError::Query("no track 3".into()))
        );
        Ok(())
    }

    #[test]
    fn failed_open_leaves_no_registration() {
        let registry = leak();
        let mut engine = ScriptedEngine::new(registry, 1);
        engine.fail_open = Some("not a matroska file");

        let error = open_scripted(&engine).err();
        assert_eq!(error, Some(DemuxError::Open("not a matroska file".into())));
        assert!(registry.is_empty());
        assert_eq!(engine.journal.lock().closes, 0);
    }

    #[test]
    fn session_closes_before_key_is_removed() -> Result<()> {
        let registry = leak();
        let engine = ScriptedEngine::new(registry, 1);

        let demuxer = open_scripted(&engine)?;
        let key = demuxer.key().expect("open demuxer has a key");
        assert!(registry.contains(&key));
        demuxer.close();
        assert!(!registry.contains(&key));

        {
            let _dropped = open_scripted(&engine)?;
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());

        let journal = engine.journal.lock();
        assert_eq!(journal.closes, 2);
        // Each session still saw its own registration while closing.
        assert_eq!(journal.entries_at_close, [1, 1]);
        Ok(())
    }

    #[test]
    fn read_failures_carry_engine_text() -> Result<()> {
        let mut engine = ScriptedEngine::new(leak(), 2);
        engine.fail_read_at = Some(1);
        let mut demuxer = open_scripted(&engine)?;

        assert!(demuxer.read_packet()?.is_some());
        assert_eq!(
            demuxer.read_packet(),
            Err(DemuxError::Read("scripted read failure".into()))
        );
        Ok(())
    }

    #[test]
    fn packet_iterator_stops_at_end_and_on_error() -> Result<()> {
        let engine = ScriptedEngine::new(leak(), 2);
        let mut demuxer = open_scripted(&engine)?;
        let starts = demuxer
            .packets()
            .map(|packet| packet.map(|p| p.start_time))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(starts, [0, 10, 20, 30]);

        let mut engine = ScriptedEngine::new(leak(), 2);
        engine.fail_read_at = Some(2);
        let mut demuxer = open_scripted(&engine)?;
        let results: Vec<_> = demuxer.packets().collect();
        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
        Ok(())
    }

    #[test]
    fn track_mask_reaches_the_session() -> Result<()> {
        let engine = ScriptedEngine::new(leak(), 2);
        let mut demuxer = open_scripted(&engine)?;
        demuxer.set_track_mask(0b10);
        demuxer.set_track_mask(0);
        assert_eq!(engine.journal.lock().masks, [0b10, 0]);

        let packet = demuxer.read_packet_masked(0b01)?.expect("audio packet");
        assert_eq!((packet.track, packet.data.as_slice()), (1, &[1u8, 1, 1][..]));
        Ok(())
    }

    #[test]
    fn per_call_mask_adds_to_the_persistent_mask() -> Result<()> {
        let mut demuxer = Demuxer::open(Cursor::new(standard_file(2, true)), OpenMode::Auto)?;
        demuxer.set_track_mask(0b10);
        assert_eq!(demuxer.read_packet_masked(0b01)?, None);
        Ok(())
    }

    #[test]
    fn two_track_file() -> Result<()> {
        let mut demuxer = Demuxer::open(Cursor::new(standard_file(1, true)), OpenMode::Auto)?;
        assert_eq!(demuxer.num_tracks()?, 2);
        assert_eq!(demuxer.track_info(0)?.track_type, TrackType::Video);
        assert_eq!(demuxer.track_info(1)?.track_type, TrackType::Audio);

        let mut packets = Vec::new();
        while let Some(packet) = demuxer.read_packet()? {
            packets.push(packet);
        }
        assert_eq!(packets.len(), 10);
        assert!(packets.windows(2).all(|w| w[0].start_time <= w[1].start_time));
        assert!(packets[0].is_keyframe());
        assert_eq!(packets[0].data, [b'v', 0, 0]);

        for _ in 0..3 {
            assert_eq!(demuxer.read_packet()?, None);
        }
        demuxer.close();
        Ok(())
    }

    #[test]
    fn queries_return_independent_copies() -> Result<()> {
        let mut demuxer = Demuxer::open(Cursor::new(standard_file(2, true)), OpenMode::Seekable)?;
        let mut first = demuxer.file_info()?;
        let second = demuxer.file_info()?;
        assert_eq!(first, second);
        first.title.push_str(" edited");
        assert_eq!(demuxer.file_info()?.title, "fixture");

        let mut chapters = demuxer.chapters();
        assert_eq!(chapters[0].children.len(), 2);
        assert_eq!(chapters[0].children[0].children[0].uid, 11);
        chapters.clear();
        assert_eq!(demuxer.chapters().len(), 1);

        assert_eq!(demuxer.tags()[0].simple_tags[0].name, "TITLE");
        assert_eq!(demuxer.cues().len(), 2);
        assert_eq!(demuxer.attachments()[0].mime_type, "image/png");
        assert!(demuxer.segment() < demuxer.cues_pos());
        assert!(demuxer.cues_top_pos() <= demuxer.segment_top());
        Ok(())
    }

    #[test]
    fn mask_holds_over_many_reads() -> Result<()> {
        let mut demuxer = Demuxer::open(Cursor::new(standard_file(12, true)), OpenMode::Auto)?;
        demuxer.set_track_mask(0b01);
        for _ in 0..50 {
            let packet = demuxer.read_packet()?.expect("audio packet");
            assert_eq!(packet.track, 1);
        }
        let remaining: Vec<_> = demuxer.packets().collect::<Result<_, _>>()?;
        assert_eq!(remaining.len(), 10);
        assert!(remaining.iter().all(|p| p.track == 1));
        Ok(())
    }

    #[test]
    fn mask_set_mid_stream_applies_to_the_next_read() -> Result<()> {
        let mut demuxer = Demuxer::open(Cursor::new(standard_file(12, true)), OpenMode::Auto)?;
        for _ in 0..7 {
            demuxer.read_packet()?.expect("packet before the mask");
        }

        demuxer.set_track_mask(0b10);
        let mut video = 0;
        while let Some(packet) = demuxer.read_packet()? {
            assert_eq!(packet.track, 0);
            video += 1;
        }
        assert!(video >= 50, "only {video} video packets");
        Ok(())
    }

    #[test]
    fn seek_then_read() -> Result<()> {
        let mut demuxer = Demuxer::open(Cursor::new(standard_file(5, true)), OpenMode::Auto)?;
        demuxer.seek(3 * CLUSTER_MS * MS + 10 * MS, SeekMode::PrevKeyframe);
        let packet = demuxer.read_packet()?.expect("packet after seek");
        assert_eq!(packet.start_time, 3 * CLUSTER_MS * MS);
        assert!(packet.is_keyframe());
        Ok(())
    }

    #[test]
    fn streaming_reader_plays_through() -> Result<()> {
        let mut demuxer = Demuxer::open_streaming(Cursor::new(standard_file(2, true)))?;
        assert_eq!(demuxer.num_tracks()?, 2);
        demuxer.seek(0, SeekMode::Exact);
        assert!(!demuxer.last_error().is_empty());

        let count = demuxer.packets().collect::<Result<Vec<_>, _>>()?.len();
        assert_eq!(count, 20);
        Ok(())
    }

    #[test]
    fn garbage_fails_to_open() {
        let result = Demuxer::open(Cursor::new(vec![0u8; 64]), OpenMode::Auto);
        assert!(matches!(result, Err(DemuxError::Open(_))));
    }
}
