//! Everything the session reads before the first cluster: the EBML header,
//! the segment's level-1 elements and whatever the SeekHead points at.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};
use log::{Level, debug, trace, warn};

use crate::engine::ebml::{
    self, Children, ElementHeader, MAX_DEPTH, Reader, read_float, read_sint, read_string,
    read_uint,
};
use crate::engine::elements as id;
use crate::engine::native::{ChapterRecord, ChapterTable, CommandRecord, ProcessRecord, TagTable};
use crate::log_or_err;
use crate::model::{
    Attachment, AudioInfo, ChapterDisplay, CompMethod, Cue, SegmentInfo, SimpleTag, Target,
    TargetType, TrackInfo, TrackType, VideoInfo,
};
use crate::utils::errors::EbmlError;

/// Upper bound for a buffered metadata element.
const MAX_METADATA_SIZE: u64 = 64 << 20;
const MAX_SMALL_ELEMENT: u64 = 1 << 20;
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

#[derive(Debug, Default)]
pub(super) struct Metadata {
    pub tracks: Vec<TrackInfo>,
    pub info: SegmentInfo,
    pub attachments: Vec<Attachment>,
    pub chapters: ChapterTable,
    pub tags: TagTable,
    pub cues: Vec<Cue>,
    pub segment_pos: u64,
    pub segment_top: u64,
    pub cues_pos: u64,
    pub cues_top: u64,
    pub first_cluster: Option<u64>,
    /// Track number to track index.
    pub track_index: HashMap<u64, usize>,
}

impl Metadata {
    pub fn index_of(&self, number: u64) -> Option<usize> {
        self.track_index.get(&number).copied()
    }
}

pub(super) struct MetadataParser<'r> {
    reader: &'r mut Reader,
    pub fail_level: Level,
    meta: Metadata,
    parsed: HashSet<u64>,
    seek_entries: Vec<(u32, u64)>,
    /// Cue and duration values are in segment timecode units until the
    /// whole header has been read.
    raw_duration: f64,
}

impl<'r> MetadataParser<'r> {
    pub fn new(reader: &'r mut Reader, fail_level: Level) -> Self {
        Self {
            reader,
            fail_level,
            meta: Metadata::default(),
            parsed: HashSet::new(),
            seek_entries: Vec::new(),
            raw_duration: 0.0,
        }
    }

    pub fn parse(mut self) -> Result<Metadata> {
        let segment_start = self.parse_ebml_header()?;
        let segment = self.find_segment(segment_start)?;
        self.meta.segment_pos = segment.data_pos();
        self.meta.segment_top = segment
            .end()
            .or(self.reader.file_size())
            .unwrap_or(u64::MAX);
        self.meta.info.timecode_scale = DEFAULT_TIMECODE_SCALE;

        let mut pos = self.meta.segment_pos;
        while pos < self.meta.segment_top {
            let Some(header) = self.reader.read_header(pos)? else {
                break;
            };
            if header.id == id::CLUSTER {
                self.meta.first_cluster = Some(pos);
                break;
            }
            self.parse_level1(&header)?;
            match header.end() {
                Some(end) => pos = end,
                None => {
                    warn!("Level-1 element 0x{:X} of unknown size, stopping header scan", header.id);
                    break;
                }
            }
        }

        if !self.reader.avoids_seeks() {
            self.follow_seek_head()?;
        }

        self.finish();
        Ok(self.meta)
    }

    fn parse_ebml_header(&mut self) -> Result<u64> {
        let header = match self.reader.read_header(0)? {
            Some(header) if header.id == id::EBML => header,
            _ => bail!(EbmlError::MissingHeader),
        };
        let payload = self.reader.read_payload(&header, MAX_SMALL_ELEMENT)?;

        let mut doc_type = String::from("matroska");
        for child in Children::new(&payload, header.data_pos()) {
            let (child, data) = child?;
            match child.id {
                id::EBML_READ_VERSION => {
                    let version = read_uint(data)?;
                    if version > 1 {
                        bail!(EbmlError::UnsupportedReadVersion(version));
                    }
                }
                id::EBML_MAX_ID_LENGTH if read_uint(data)? > 4 => {
                    bail!("EBMLMaxIDLength above 4 is not supported");
                }
                id::EBML_MAX_SIZE_LENGTH if read_uint(data)? > 8 => {
                    bail!("EBMLMaxSizeLength above 8 is not supported");
                }
                id::DOC_TYPE => doc_type = read_string(data),
                id::DOC_TYPE_READ_VERSION => {
                    let version = read_uint(data)?;
                    if version > 4 {
                        log_or_err!(
                            self,
                            Level::Warn,
                            anyhow::anyhow!("DocTypeReadVersion {version} is newer than supported")
                        );
                    }
                }
                _ => {}
            }
        }

        if doc_type != "matroska" && doc_type != "webm" {
            bail!(EbmlError::UnsupportedDocType(doc_type));
        }
        debug!("EBML header: DocType {doc_type}");

        header
            .end()
            .ok_or_else(|| EbmlError::MissingHeader.into())
    }

    fn find_segment(&mut self, mut pos: u64) -> Result<ElementHeader> {
        loop {
            let Some(header) = self.reader.read_header(pos)? else {
                bail!(EbmlError::MissingSegment);
            };
            if header.id == id::SEGMENT {
                return Ok(header);
            }
            trace!("Skipping 0x{:X} before the segment", header.id);
            match header.end() {
                Some(end) => pos = end,
                None => bail!(EbmlError::MissingSegment),
            }
        }
    }

    /// Buffers a master element and checks its CRC-32, if it has one.
    fn buffered(&mut self, header: &ElementHeader, limit: u64) -> Result<Vec<u8>> {
        let payload = self.reader.read_payload(header, limit)?;
        if let Err(e) = ebml::verify_crc(header.id, &payload) {
            log_or_err!(self, Level::Warn, e);
        }
        Ok(payload)
    }

    fn parse_level1(&mut self, header: &ElementHeader) -> Result<()> {
        if !self.parsed.insert(header.pos) {
            return Ok(());
        }

        match header.id {
            id::SEEK_HEAD => {
                let payload = self.buffered(header, MAX_SMALL_ELEMENT)?;
                self.parse_seek_head(&payload, header.data_pos())?;
            }
            id::INFO => {
                let payload = self.buffered(header, MAX_SMALL_ELEMENT)?;
                self.parse_info(&payload, header.data_pos())?;
            }
            id::TRACKS => {
                let payload = self.buffered(header, MAX_METADATA_SIZE)?;
                self.parse_tracks(&payload, header.data_pos())?;
            }
            id::CUES => {
                let payload = self.buffered(header, MAX_METADATA_SIZE)?;
                self.parse_cues(&payload, header.data_pos())?;
                self.meta.cues_pos = header.pos;
                self.meta.cues_top = header.end().unwrap_or(self.meta.segment_top);
            }
            id::CHAPTERS => {
                let payload = self.buffered(header, MAX_METADATA_SIZE)?;
                self.parse_chapters(&payload, header.data_pos())?;
            }
            id::TAGS => {
                let payload = self.buffered(header, MAX_METADATA_SIZE)?;
                self.parse_tags(&payload, header.data_pos())?;
            }
            id::ATTACHMENTS => self.parse_attachments(header)?,
            other => trace!("Skipping level-1 element 0x{other:X} at {}", header.pos),
        }
        Ok(())
    }

    fn follow_seek_head(&mut self) -> Result<()> {
        let mut next = 0;
        while next < self.seek_entries.len() {
            let (element, pos) = self.seek_entries[next];
            next += 1;

            let wanted = matches!(
                element,
                id::SEEK_HEAD | id::INFO | id::TRACKS | id::CUES | id::CHAPTERS | id::TAGS | id::ATTACHMENTS
            );
            if !wanted || self.parsed.contains(&pos) || pos >= self.meta.segment_top {
                continue;
            }

            let header = match self.reader.read_header(pos) {
                Ok(Some(header)) => header,
                Ok(None) => {
                    log_or_err!(
                        self,
                        Level::Warn,
                        anyhow::anyhow!("SeekHead entry for 0x{element:X} points past the end of the file")
                    );
                    continue;
                }
                Err(e) => {
                    log_or_err!(self, Level::Warn, e);
                    continue;
                }
            };
            if header.id != element {
                log_or_err!(
                    self,
                    Level::Warn,
                    anyhow::anyhow!(
                        "SeekHead entry for 0x{element:X} points at 0x{:X} (offset {pos})",
                        header.id
                    )
                );
                continue;
            }

            debug!("Following SeekHead to 0x{element:X} at {pos}");
            if let Err(e) = self.parse_level1(&header) {
                log_or_err!(self, Level::Warn, e);
            }
        }
        Ok(())
    }

    fn parse_seek_head(&mut self, payload: &[u8], base: u64) -> Result<()> {
        for seek in Children::new(payload, base) {
            let (seek, data) = seek?;
            if seek.id != id::SEEK {
                continue;
            }

            let mut element = None;
            let mut position = None;
            for child in Children::new(data, seek.data_pos()) {
                let (child, value) = child?;
                match child.id {
                    id::SEEK_ID => element = Some(read_uint(value)? as u32),
                    id::SEEK_POSITION => position = Some(read_uint(value)?),
                    _ => {}
                }
            }
            if let (Some(element), Some(position)) = (element, position) {
                let absolute = self.meta.segment_pos.saturating_add(position);
                self.seek_entries.push((element, absolute));
            }
        }
        Ok(())
    }

    fn parse_info(&mut self, payload: &[u8], base: u64) -> Result<()> {
        let info = &mut self.meta.info;
        for child in Children::new(payload, base) {
            let (child, data) = child?;
            match child.id {
                id::SEGMENT_UID => copy_uid(&mut info.uid, data),
                id::PREV_UID => copy_uid(&mut info.prev_uid, data),
                id::NEXT_UID => copy_uid(&mut info.next_uid, data),
                id::SEGMENT_FILENAME => info.filename = read_string(data),
                id::PREV_FILENAME => info.prev_filename = read_string(data),
                id::NEXT_FILENAME => info.next_filename = read_string(data),
                id::TITLE => info.title = read_string(data),
                id::MUXING_APP => info.muxing_app = read_string(data),
                id::WRITING_APP => info.writing_app = read_string(data),
                id::TIMECODE_SCALE => match read_uint(data)? {
                    0 => warn!("TimecodeScale of 0 ignored"),
                    scale => info.timecode_scale = scale,
                },
                id::DURATION => self.raw_duration = read_float(data)?,
                id::DATE_UTC => {
                    info.date_utc = read_sint(data)?;
                    info.date_utc_valid = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_tracks(&mut self, payload: &[u8], base: u64) -> Result<()> {
        for entry in Children::new(payload, base) {
            let (entry, data) = entry?;
            if entry.id != id::TRACK_ENTRY {
                continue;
            }

            let track = parse_track(data, entry.data_pos())?;
            if track.number == 0 {
                log_or_err!(
                    self,
                    Level::Warn,
                    anyhow::anyhow!("Track entry at {} has no track number", entry.pos)
                );
                continue;
            }
            if self.meta.track_index.contains_key(&track.number) {
                log_or_err!(
                    self,
                    Level::Warn,
                    anyhow::anyhow!("Duplicate track number {}", track.number)
                );
                continue;
            }

            debug!(
                "Track {}: {} {} \"{}\"",
                track.number, track.track_type, track.codec_id, track.name
            );
            self.meta
                .track_index
                .insert(track.number, self.meta.tracks.len());
            self.meta.tracks.push(track);
        }
        Ok(())
    }

    fn parse_cues(&mut self, payload: &[u8], base: u64) -> Result<()> {
        for point in Children::new(payload, base) {
            let (point, data) = point?;
            if point.id != id::CUE_POINT {
                continue;
            }

            let mut time = 0;
            let mut positions = Vec::new();
            for child in Children::new(data, point.data_pos()) {
                let (child, value) = child?;
                match child.id {
                    id::CUE_TIME => time = read_uint(value)?,
                    id::CUE_TRACK_POSITIONS => positions.push((child, value)),
                    _ => {}
                }
            }

            for (header, value) in positions {
                let mut cue = Cue {
                    time,
                    block: 1,
                    ..Default::default()
                };
                for child in Children::new(value, header.data_pos()) {
                    let (child, value) = child?;
                    match child.id {
                        id::CUE_TRACK => cue.track = read_uint(value)?,
                        id::CUE_CLUSTER_POSITION => cue.position = read_uint(value)?,
                        id::CUE_RELATIVE_POSITION => cue.relative_position = read_uint(value)?,
                        id::CUE_DURATION => cue.duration = read_uint(value)?,
                        id::CUE_BLOCK_NUMBER => cue.block = read_uint(value)?,
                        _ => {}
                    }
                }
                cue.position = self.meta.segment_pos.saturating_add(cue.position);
                self.meta.cues.push(cue);
            }
        }
        Ok(())
    }

    fn parse_chapters(&mut self, payload: &[u8], base: u64) -> Result<()> {
        let mut table = std::mem::take(&mut self.meta.chapters);
        let mut editions = Vec::new();
        for edition in Children::new(payload, base) {
            let (edition, data) = edition?;
            if edition.id != id::EDITION_ENTRY {
                continue;
            }

            let mut record = ChapterRecord {
                enabled: true,
                ..Default::default()
            };
            let mut atoms = Vec::new();
            for child in Children::new(data, edition.data_pos()) {
                let (child, value) = child?;
                match child.id {
                    id::EDITION_UID => record.uid = read_uint(value)?,
                    id::EDITION_FLAG_HIDDEN => record.hidden = read_uint(value)? != 0,
                    id::EDITION_FLAG_DEFAULT => record.default = read_uint(value)? != 0,
                    id::EDITION_FLAG_ORDERED => record.ordered = read_uint(value)? != 0,
                    id::CHAPTER_ATOM => {
                        if let Some(atom) = self.parse_atom(&mut table, value, child.data_pos(), 1)? {
                            atoms.push(atom);
                        }
                    }
                    _ => {}
                }
            }
            record.children = table.push_chapters(atoms);
            editions.push(record);
        }

        // Editions from several Chapters elements are merged.
        let mut roots: Vec<ChapterRecord> = table.roots().to_vec();
        roots.extend(editions);
        let roots = table.push_chapters(roots);
        table.set_roots(roots);
        self.meta.chapters = table;
        Ok(())
    }

    fn parse_tags(&mut self, payload: &[u8], base: u64) -> Result<()> {
        for tag in Children::new(payload, base) {
            let (tag, data) = tag?;
            if tag.id != id::TAG {
                continue;
            }

            let mut targets = Vec::new();
            let mut simple_tags = Vec::new();
            for child in Children::new(data, tag.data_pos()) {
                let (child, value) = child?;
                match child.id {
                    id::TARGETS => parse_targets(value, child.data_pos(), &mut targets)?,
                    id::SIMPLE_TAG => {
                        self.parse_simple_tag(value, child.data_pos(), 1, &mut simple_tags)?
                    }
                    _ => {}
                }
            }
            self.meta.tags.push_tag(targets, simple_tags);
        }
        Ok(())
    }

    /// Attachments are walked in place: file data is recorded by position
    /// and never read.
    fn parse_attachments(&mut self, header: &ElementHeader) -> Result<()> {
        let Some(end) = header.end() else {
            log_or_err!(
                self,
                Level::Warn,
                anyhow::anyhow!("Attachments element of unknown size skipped")
            );
            return Ok(());
        };

        let mut pos = header.data_pos();
        while pos < end {
            let Some(file) = self.reader.read_header(pos)? else {
                bail!(EbmlError::UnexpectedEof(pos));
            };
            let Some(file_end) = file.end().filter(|&e| e <= end) else {
                bail!(EbmlError::Overflow {
                    id: file.id,
                    size: file.size.unwrap_or(u64::MAX),
                });
            };

            if file.id == id::ATTACHED_FILE {
                let attachment = self.parse_attached_file(&file, file_end)?;
                self.meta.attachments.push(attachment);
            }
            pos = file_end;
        }
        Ok(())
    }

    fn parse_attached_file(&mut self, file: &ElementHeader, end: u64) -> Result<Attachment> {
        let mut attachment = Attachment::default();
        let mut pos = file.data_pos();
        while pos < end {
            let Some(child) = self.reader.read_header(pos)? else {
                bail!(EbmlError::UnexpectedEof(pos));
            };
            let Some(child_end) = child.end().filter(|&e| e <= end) else {
                bail!(EbmlError::Overflow {
                    id: child.id,
                    size: child.size.unwrap_or(u64::MAX),
                });
            };

            match child.id {
                id::FILE_DATA => {
                    attachment.position = child.data_pos();
                    attachment.length = child_end - child.data_pos();
                }
                id::FILE_NAME | id::FILE_DESCRIPTION | id::FILE_MIME_TYPE | id::FILE_UID => {
                    let value = self.reader.read_payload(&child, MAX_SMALL_ELEMENT)?;
                    match child.id {
                        id::FILE_NAME => attachment.name = read_string(&value),
                        id::FILE_DESCRIPTION => attachment.description = read_string(&value),
                        id::FILE_MIME_TYPE => attachment.mime_type = read_string(&value),
                        _ => attachment.uid = read_uint(&value)?,
                    }
                }
                _ => {}
            }
            pos = child_end;
        }
        Ok(attachment)
    }

    fn finish(&mut self) {
        let scale = self.meta.info.timecode_scale;
        self.meta.info.duration = (self.raw_duration * scale as f64) as u64;
        for cue in &mut self.meta.cues {
            cue.time = cue.time.saturating_mul(scale);
            cue.duration = cue.duration.saturating_mul(scale);
        }
        self.meta.cues.sort_by_key(|cue| cue.time);

        debug!(
            "Segment at {}: {} tracks, {} cues, {} chapters, {} attachments",
            self.meta.segment_pos,
            self.meta.tracks.len(),
            self.meta.cues.len(),
            self.meta.chapters.total(),
            self.meta.attachments.len()
        );
    }
}

/// Nested chapter atoms and simple tags.
impl MetadataParser<'_> {
    /// Returns `None` for an atom nested too deeply, which is dropped along
    /// with its subtree unless the fail level makes that fatal.
    fn parse_atom(
        &self,
        table: &mut ChapterTable,
        payload: &[u8],
        base: u64,
        depth: usize,
    ) -> Result<Option<ChapterRecord>> {
        if depth > MAX_DEPTH {
            log_or_err!(self, Level::Warn, EbmlError::TooDeep(MAX_DEPTH));
            return Ok(None);
        }

        let mut record = ChapterRecord {
            enabled: true,
            ..Default::default()
        };
        let mut children = Vec::new();
        let mut tracks = Vec::new();
        let mut displays = Vec::new();
        let mut processes = Vec::new();

        for child in Children::new(payload, base) {
            let (child, data) = child?;
            match child.id {
                id::CHAPTER_UID => record.uid = read_uint(data)?,
                id::CHAPTER_TIME_START => record.start = read_uint(data)?,
                id::CHAPTER_TIME_END => record.end = read_uint(data)?,
                id::CHAPTER_FLAG_HIDDEN => record.hidden = read_uint(data)? != 0,
                id::CHAPTER_FLAG_ENABLED => record.enabled = read_uint(data)? != 0,
                id::CHAPTER_SEGMENT_UID => copy_uid(&mut record.segment_uid, data),
                id::CHAPTER_TRACK => {
                    for track in Children::new(data, child.data_pos()) {
                        let (track, value) = track?;
                        if track.id == id::CHAPTER_TRACK_UID {
                            tracks.push(read_uint(value)?);
                        }
                    }
                }
                id::CHAPTER_DISPLAY => {
                    let mut display = ChapterDisplay::default();
                    for item in Children::new(data, child.data_pos()) {
                        let (item, value) = item?;
                        match item.id {
                            id::CHAP_STRING => display.string = read_string(value),
                            id::CHAP_LANGUAGE if display.language.is_empty() => {
                                display.language = read_string(value)
                            }
                            id::CHAP_COUNTRY if display.country.is_empty() => {
                                display.country = read_string(value)
                            }
                            _ => {}
                        }
                    }
                    if display.language.is_empty() {
                        display.language = String::from("eng");
                    }
                    displays.push(display);
                }
                id::CHAP_PROCESS => processes.push(parse_process(table, data, child.data_pos())?),
                id::CHAPTER_ATOM => {
                    if let Some(atom) = self.parse_atom(table, data, child.data_pos(), depth + 1)? {
                        children.push(atom);
                    }
                }
                _ => {}
            }
        }

        record.children = table.push_chapters(children);
        record.tracks = table.push_tracks(tracks);
        record.displays = table.push_displays(displays);
        record.processes = table.push_processes(processes);
        Ok(Some(record))
    }

    /// Nested simple tags are appended after their parent.
    fn parse_simple_tag(
        &self,
        payload: &[u8],
        base: u64,
        depth: usize,
        tags: &mut Vec<SimpleTag>,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            log_or_err!(self, Level::Warn, EbmlError::TooDeep(MAX_DEPTH));
            return Ok(());
        }

        let slot = tags.len();
        tags.push(SimpleTag {
            language: String::from("und"),
            default: true,
            ..Default::default()
        });
        for child in Children::new(payload, base) {
            let (child, data) = child?;
            match child.id {
                id::TAG_NAME => tags[slot].name = read_string(data),
                id::TAG_STRING => tags[slot].value = read_string(data),
                id::TAG_LANGUAGE => tags[slot].language = read_string(data),
                id::TAG_DEFAULT => tags[slot].default = read_uint(data)? != 0,
                id::SIMPLE_TAG => self.parse_simple_tag(data, child.data_pos(), depth + 1, tags)?,
                _ => {}
            }
        }
        Ok(())
    }
}

fn copy_uid(uid: &mut [u8; 16], data: &[u8]) {
    let n = data.len().min(16);
    uid[..n].copy_from_slice(&data[..n]);
}

fn parse_track(payload: &[u8], base: u64) -> Result<TrackInfo> {
    let mut track = TrackInfo {
        enabled: true,
        default: true,
        lacing: true,
        decode_all: true,
        timecode_scale: 1.0,
        language: String::from("eng"),
        audio: AudioInfo {
            sampling_freq: 8000.0,
            channels: 1,
            ..Default::default()
        },
        ..Default::default()
    };

    for child in Children::new(payload, base) {
        let (child, data) = child?;
        match child.id {
            id::TRACK_NUMBER => track.number = read_uint(data)?,
            id::TRACK_UID => track.uid = read_uint(data)?,
            id::TRACK_TYPE => track.track_type = TrackType::from_raw(read_uint(data)?),
            id::FLAG_ENABLED => track.enabled = read_uint(data)? != 0,
            id::FLAG_DEFAULT => track.default = read_uint(data)? != 0,
            id::FLAG_FORCED => track.forced = read_uint(data)? != 0,
            id::FLAG_LACING => track.lacing = read_uint(data)? != 0,
            id::MIN_CACHE => track.min_cache = read_uint(data)?,
            id::MAX_CACHE => track.max_cache = read_uint(data)?,
            id::DEFAULT_DURATION => track.default_duration = read_uint(data)?,
            id::TRACK_TIMESTAMP_SCALE => track.timecode_scale = read_float(data)?,
            id::MAX_BLOCK_ADDITION_ID => track.max_block_addition_id = read_uint(data)? as u32,
            id::NAME => track.name = read_string(data),
            id::LANGUAGE => track.language = read_string(data),
            id::CODEC_ID => track.codec_id = read_string(data),
            id::CODEC_PRIVATE => track.codec_private = data.to_vec(),
            id::CODEC_DECODE_ALL => track.decode_all = read_uint(data)? != 0,
            id::TRACK_OVERLAY => track.track_overlay = read_uint(data)?,
            id::CODEC_DELAY => track.codec_delay = read_uint(data)?,
            id::SEEK_PRE_ROLL => track.seek_pre_roll = read_uint(data)?,
            id::VIDEO => parse_video(data, child.data_pos(), &mut track.video)?,
            id::AUDIO => parse_audio(data, child.data_pos(), &mut track.audio)?,
            id::CONTENT_ENCODINGS => parse_encodings(data, child.data_pos(), &mut track)?,
            _ => {}
        }
    }

    if track.audio.output_sampling_freq == 0.0 {
        track.audio.output_sampling_freq = track.audio.sampling_freq;
    }
    if track.video.display_width == 0 {
        track.video.display_width = track.video.pixel_width;
    }
    if track.video.display_height == 0 {
        track.video.display_height = track.video.pixel_height;
    }
    if track.timecode_scale <= 0.0 || !track.timecode_scale.is_finite() {
        track.timecode_scale = 1.0;
    }
    Ok(track)
}

fn parse_video(payload: &[u8], base: u64, video: &mut VideoInfo) -> Result<()> {
    for child in Children::new(payload, base) {
        let (child, data) = child?;
        match child.id {
            id::FLAG_INTERLACED => video.interlaced = read_uint(data)? == 1,
            id::STEREO_MODE => video.stereo_mode = read_uint(data)? as u8,
            id::PIXEL_WIDTH => video.pixel_width = read_uint(data)? as u32,
            id::PIXEL_HEIGHT => video.pixel_height = read_uint(data)? as u32,
            id::PIXEL_CROP_BOTTOM => video.crop_bottom = read_uint(data)? as u32,
            id::PIXEL_CROP_TOP => video.crop_top = read_uint(data)? as u32,
            id::PIXEL_CROP_LEFT => video.crop_left = read_uint(data)? as u32,
            id::PIXEL_CROP_RIGHT => video.crop_right = read_uint(data)? as u32,
            id::DISPLAY_WIDTH => video.display_width = read_uint(data)? as u32,
            id::DISPLAY_HEIGHT => video.display_height = read_uint(data)? as u32,
            id::DISPLAY_UNIT => video.display_unit = read_uint(data)? as u8,
            id::ASPECT_RATIO_TYPE => video.aspect_ratio_type = read_uint(data)? as u8,
            id::COLOUR_SPACE => video.colour_space = read_uint(data)? as u32,
            id::GAMMA_VALUE => video.gamma_value = read_float(data)?,
            id::COLOUR => parse_colour(data, child.data_pos(), video)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_colour(payload: &[u8], base: u64, video: &mut VideoInfo) -> Result<()> {
    let colour = &mut video.colour;
    for child in Children::new(payload, base) {
        let (child, data) = child?;
        let field = match child.id {
            id::MATRIX_COEFFICIENTS => &mut colour.matrix_coefficients,
            id::BITS_PER_CHANNEL => &mut colour.bits_per_channel,
            id::CHROMA_SUBSAMPLING_HORZ => &mut colour.chroma_subsampling_horz,
            id::CHROMA_SUBSAMPLING_VERT => &mut colour.chroma_subsampling_vert,
            id::CB_SUBSAMPLING_HORZ => &mut colour.cb_subsampling_horz,
            id::CB_SUBSAMPLING_VERT => &mut colour.cb_subsampling_vert,
            id::CHROMA_SITING_HORZ => &mut colour.chroma_siting_horz,
            id::CHROMA_SITING_VERT => &mut colour.chroma_siting_vert,
            id::RANGE => &mut colour.range,
            id::TRANSFER_CHARACTERISTICS => &mut colour.transfer_characteristics,
            id::PRIMARIES => &mut colour.primaries,
            id::MAX_CLL => &mut colour.max_cll,
            id::MAX_FALL => &mut colour.max_fall,
            id::MASTERING_METADATA => {
                let mastering = &mut colour.mastering_metadata;
                for item in Children::new(data, child.data_pos()) {
                    let (item, value) = item?;
                    let field = match item.id {
                        id::PRIMARY_R_CHROMATICITY_X => &mut mastering.primary_r_chromaticity_x,
                        id::PRIMARY_R_CHROMATICITY_Y => &mut mastering.primary_r_chromaticity_y,
                        id::PRIMARY_G_CHROMATICITY_X => &mut mastering.primary_g_chromaticity_x,
                        id::PRIMARY_G_CHROMATICITY_Y => &mut mastering.primary_g_chromaticity_y,
                        id::PRIMARY_B_CHROMATICITY_X => &mut mastering.primary_b_chromaticity_x,
                        id::PRIMARY_B_CHROMATICITY_Y => &mut mastering.primary_b_chromaticity_y,
                        id::WHITE_POINT_CHROMATICITY_X => &mut mastering.white_point_chromaticity_x,
                        id::WHITE_POINT_CHROMATICITY_Y => &mut mastering.white_point_chromaticity_y,
                        id::LUMINANCE_MAX => &mut mastering.luminance_max,
                        id::LUMINANCE_MIN => &mut mastering.luminance_min,
                        _ => continue,
                    };
                    *field = read_float(value)? as f32;
                }
                continue;
            }
            _ => continue,
        };
        *field = read_uint(data)? as u32;
    }
    Ok(())
}

fn parse_audio(payload: &[u8], base: u64, audio: &mut AudioInfo) -> Result<()> {
    for child in Children::new(payload, base) {
        let (child, data) = child?;
        match child.id {
            id::SAMPLING_FREQUENCY => audio.sampling_freq = read_float(data)?,
            id::OUTPUT_SAMPLING_FREQUENCY => audio.output_sampling_freq = read_float(data)?,
            id::CHANNELS => audio.channels = read_uint(data)? as u8,
            id::BIT_DEPTH => audio.bit_depth = read_uint(data)? as u8,
            _ => {}
        }
    }
    Ok(())
}

fn parse_encodings(payload: &[u8], base: u64, track: &mut TrackInfo) -> Result<()> {
    for encoding in Children::new(payload, base) {
        let (encoding, data) = encoding?;
        if encoding.id != id::CONTENT_ENCODING {
            continue;
        }
        for child in Children::new(data, encoding.data_pos()) {
            let (child, value) = child?;
            if child.id != id::CONTENT_COMPRESSION {
                continue;
            }
            track.comp_enabled = true;
            track.comp_method = CompMethod::Zlib;
            for setting in Children::new(value, child.data_pos()) {
                let (setting, value) = setting?;
                match setting.id {
                    id::CONTENT_COMP_ALGO => track.comp_method = CompMethod::from_raw(read_uint(value)?),
                    id::CONTENT_COMP_SETTINGS => track.comp_method_private = value.to_vec(),
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

fn parse_process(table: &mut ChapterTable, payload: &[u8], base: u64) -> Result<ProcessRecord> {
    let mut process = ProcessRecord::default();
    let mut commands = Vec::new();
    for child in Children::new(payload, base) {
        let (child, data) = child?;
        match child.id {
            id::CHAP_PROCESS_CODEC_ID => process.codec_id = read_uint(data)? as u32,
            id::CHAP_PROCESS_PRIVATE => process.codec_private = data.to_vec(),
            id::CHAP_PROCESS_COMMAND => {
                let mut command = CommandRecord::default();
                for item in Children::new(data, child.data_pos()) {
                    let (item, value) = item?;
                    match item.id {
                        id::CHAP_PROCESS_TIME => command.time = read_uint(value)? as u32,
                        id::CHAP_PROCESS_DATA => command.command = value.to_vec(),
                        _ => {}
                    }
                }
                commands.push(command);
            }
            _ => {}
        }
    }
    process.commands = table.push_commands(commands);
    Ok(process)
}

fn parse_targets(payload: &[u8], base: u64, targets: &mut Vec<Target>) -> Result<()> {
    for child in Children::new(payload, base) {
        let (child, data) = child?;
        let target_type = match child.id {
            id::TAG_TRACK_UID => TargetType::Track,
            id::TAG_CHAPTER_UID => TargetType::Chapter,
            id::TAG_ATTACHMENT_UID => TargetType::Attachment,
            id::TAG_EDITION_UID => TargetType::Edition,
            _ => continue,
        };
        targets.push(Target {
            uid: read_uint(data)?,
            target_type,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixture::*;

    fn parse(input: MemoryInput, avoid_seeks: bool) -> Result<Metadata> {
        parse_at(input, avoid_seeks, Level::Error)
    }

    fn parse_at(input: MemoryInput, avoid_seeks: bool, fail_level: Level) -> Result<Metadata> {
        let mut reader = Reader::new(Box::new(input), avoid_seeks);
        MetadataParser::new(&mut reader, fail_level).parse()
    }

    #[test]
    fn cues_behind_the_clusters_are_found_through_the_seek_head() -> Result<()> {
        let file = standard_file(3, true);

        let meta = parse(MemoryInput::new(file.clone()), false)?;
        let first_cluster = meta.first_cluster.unwrap_or_default();
        assert!(first_cluster > meta.segment_pos);
        assert_eq!(meta.cues.len(), 3);
        assert!(meta.cues_pos > first_cluster);
        assert_eq!(
            meta.cues.iter().map(|c| c.time).collect::<Vec<_>>(),
            [0, 200 * SCALE, 400 * SCALE]
        );
        assert_eq!(meta.cues[0].position, first_cluster);

        let streamed = parse(MemoryInput::sequential(file), true)?;
        assert!(streamed.cues.is_empty());
        assert_eq!(streamed.first_cluster, meta.first_cluster);
        assert_eq!(streamed.tracks.len(), 2);
        Ok(())
    }

    #[test]
    fn track_numbers_map_to_indices() -> Result<()> {
        let meta = parse(MemoryInput::new(standard_file(1, false)), false)?;
        assert_eq!(meta.index_of(1), Some(0));
        assert_eq!(meta.index_of(2), Some(1));
        assert_eq!(meta.index_of(7), None);
        assert_eq!(meta.info.duration, 200 * SCALE);
        Ok(())
    }

    #[test]
    fn hdr_colour_is_read() -> Result<()> {
        let track = master(
            id::TRACK_ENTRY,
            &[
                element(id::TRACK_NUMBER, &uint(1)),
                element(id::TRACK_TYPE, &uint(1)),
                element(id::CODEC_ID, b"V_AV1"),
                master(
                    id::VIDEO,
                    &[
                        element(id::PIXEL_WIDTH, &uint(3840)),
                        element(id::PIXEL_HEIGHT, &uint(2160)),
                        master(
                            id::COLOUR,
                            &[
                                element(id::TRANSFER_CHARACTERISTICS, &uint(16)),
                                element(id::MAX_CLL, &uint(1000)),
                                master(
                                    id::MASTERING_METADATA,
                                    &[element(id::LUMINANCE_MAX, &float(4000.0))],
                                ),
                            ],
                        ),
                    ],
                ),
            ],
        );
        let head = vec![info(0.0), master(id::TRACKS, &[track])];
        let meta = parse(MemoryInput::new(build_file(&head, &[], false)), false)?;

        let video = &meta.tracks[0].video;
        assert_eq!((video.pixel_width, video.pixel_height), (3840, 2160));
        assert_eq!(video.colour.transfer_characteristics, 16);
        assert_eq!(video.colour.max_cll, 1000);
        assert_eq!(video.colour.mastering_metadata.luminance_max, 4000.0);
        assert_eq!(meta.first_cluster, None);
        Ok(())
    }

    #[test]
    fn overly_deep_chapters_are_cut_unless_strict() -> Result<()> {
        let mut atom = master(id::CHAPTER_ATOM, &[element(id::CHAPTER_UID, &uint(100))]);
        for uid in (1..100u64).rev() {
            atom = master(id::CHAPTER_ATOM, &[element(id::CHAPTER_UID, &uint(uid)), atom]);
        }
        let edition = master(id::EDITION_ENTRY, &[element(id::EDITION_UID, &uint(9)), atom]);
        let head = vec![info(0.0), master(id::CHAPTERS, &[edition])];
        let file = build_file(&head, &[], false);

        let meta = parse(MemoryInput::new(file.clone()), false)?;
        let table = &meta.chapters;
        let mut depth = 0;
        let mut level = table.children(&table.roots()[0]);
        while let Some(atom) = level.first() {
            depth += 1;
            assert_eq!(atom.uid, depth as u64);
            level = table.children(atom);
        }
        assert_eq!(depth, MAX_DEPTH);

        assert!(parse_at(MemoryInput::new(file), false, Level::Warn).is_err());
        Ok(())
    }

    #[test]
    fn foreign_doc_types_are_rejected() {
        let mut file = ebml_header("mp4");
        file.extend(element(id::SEGMENT, &info(0.0)));
        let err = parse(MemoryInput::new(file), false)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("mp4"), "{err}");
    }
}
