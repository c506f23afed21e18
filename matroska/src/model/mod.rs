//! Owned metadata and packet values returned by the demuxer.
//!
//! Nothing here borrows from an engine session: every value stays valid
//! after the demuxer that produced it is closed.

use std::fmt;

use serde::{Serialize, Serializer};

pub mod convert;

/// Bits of [`Packet::flags`].
pub mod frame_flags {
    pub const UNKNOWN_START: u32 = 0x0000_0001;
    pub const UNKNOWN_END: u32 = 0x0000_0002;
    pub const KEYFRAME: u32 = 0x0000_0004;
    pub const DISCARDABLE: u32 = 0x0000_0100;
    pub const GAP: u32 = 0x0080_0000;
    pub const STREAM_MASK: u32 = 0xFF00_0000;
    pub const STREAM_SHIFT: u32 = 24;
}

pub(crate) fn hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    struct Hex<'a>(&'a [u8]);

    impl fmt::Display for Hex<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
        }
    }

    serializer.collect_str(&Hex(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Video,
    Audio,
    Complex,
    Logo,
    Subtitle,
    Buttons,
    Control,
    Metadata,
    #[default]
    Unknown,
}

impl TrackType {
    pub fn from_raw(value: u64) -> Self {
        match value {
            1 => TrackType::Video,
            2 => TrackType::Audio,
            3 => TrackType::Complex,
            0x10 => TrackType::Logo,
            0x11 => TrackType::Subtitle,
            0x12 => TrackType::Buttons,
            0x20 => TrackType::Control,
            0x21 => TrackType::Metadata,
            _ => TrackType::Unknown,
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            TrackType::Video => 1,
            TrackType::Audio => 2,
            TrackType::Complex => 3,
            TrackType::Logo => 0x10,
            TrackType::Subtitle => 0x11,
            TrackType::Buttons => 0x12,
            TrackType::Control => 0x20,
            TrackType::Metadata => 0x21,
            TrackType::Unknown => 0,
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackType::Video => "video",
            TrackType::Audio => "audio",
            TrackType::Complex => "complex",
            TrackType::Logo => "logo",
            TrackType::Subtitle => "subtitle",
            TrackType::Buttons => "buttons",
            TrackType::Control => "control",
            TrackType::Metadata => "metadata",
            TrackType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Content compression applied to a track's frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompMethod {
    #[default]
    Zlib,
    Bzip,
    Lzo1x,
    /// Header stripping: a fixed prefix removed from every frame.
    Prepend,
    Other(u64),
}

impl CompMethod {
    pub const ZLIB: u64 = 0;
    pub const BZIP: u64 = 1;
    pub const LZO1X: u64 = 2;
    pub const PREPEND: u64 = 3;

    pub fn from_raw(value: u64) -> Self {
        match value {
            Self::ZLIB => CompMethod::Zlib,
            Self::BZIP => CompMethod::Bzip,
            Self::LZO1X => CompMethod::Lzo1x,
            Self::PREPEND => CompMethod::Prepend,
            other => CompMethod::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    #[default]
    Track,
    Chapter,
    Attachment,
    Edition,
}

impl TargetType {
    pub fn as_raw(self) -> u32 {
        match self {
            TargetType::Track => 0,
            TargetType::Chapter => 1,
            TargetType::Attachment => 2,
            TargetType::Edition => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MasteringMetadata {
    pub primary_r_chromaticity_x: f32,
    pub primary_r_chromaticity_y: f32,
    pub primary_g_chromaticity_x: f32,
    pub primary_g_chromaticity_y: f32,
    pub primary_b_chromaticity_x: f32,
    pub primary_b_chromaticity_y: f32,
    pub white_point_chromaticity_x: f32,
    pub white_point_chromaticity_y: f32,
    pub luminance_max: f32,
    pub luminance_min: f32,
}

/// Colour description, codes as in ITU-T H.273.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Colour {
    pub matrix_coefficients: u32,
    pub bits_per_channel: u32,
    pub chroma_subsampling_horz: u32,
    pub chroma_subsampling_vert: u32,
    pub cb_subsampling_horz: u32,
    pub cb_subsampling_vert: u32,
    pub chroma_siting_horz: u32,
    pub chroma_siting_vert: u32,
    pub range: u32,
    pub transfer_characteristics: u32,
    pub primaries: u32,
    pub max_cll: u32,
    pub max_fall: u32,
    pub mastering_metadata: MasteringMetadata,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct VideoInfo {
    pub stereo_mode: u8,
    pub display_unit: u8,
    /// 0 free resizing, 1 keep aspect ratio, 2 fixed.
    pub aspect_ratio_type: u8,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub crop_left: u32,
    pub crop_top: u32,
    pub crop_right: u32,
    pub crop_bottom: u32,
    pub colour_space: u32,
    pub gamma_value: f64,
    pub colour: Colour,
    pub interlaced: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AudioInfo {
    pub sampling_freq: f64,
    pub output_sampling_freq: f64,
    pub channels: u8,
    pub bit_depth: u8,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrackInfo {
    pub number: u64,
    #[serde(rename = "type")]
    pub track_type: TrackType,
    pub track_overlay: u64,
    pub uid: u64,
    pub min_cache: u64,
    pub max_cache: u64,
    /// Nanoseconds, 0 if not set.
    pub default_duration: u64,
    pub codec_delay: u64,
    pub seek_pre_roll: u64,
    pub timecode_scale: f64,
    #[serde(serialize_with = "hex")]
    pub codec_private: Vec<u8>,
    pub comp_method: CompMethod,
    #[serde(serialize_with = "hex")]
    pub comp_method_private: Vec<u8>,
    pub max_block_addition_id: u32,

    pub enabled: bool,
    pub default: bool,
    pub forced: bool,
    pub lacing: bool,
    pub decode_all: bool,
    pub comp_enabled: bool,

    /// Meaningful only for [`TrackType::Video`].
    pub video: VideoInfo,
    /// Meaningful only for [`TrackType::Audio`].
    pub audio: AudioInfo,

    pub name: String,
    pub language: String,
    pub codec_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SegmentInfo {
    #[serde(serialize_with = "hex")]
    pub uid: [u8; 16],
    #[serde(serialize_with = "hex")]
    pub prev_uid: [u8; 16],
    #[serde(serialize_with = "hex")]
    pub next_uid: [u8; 16],
    pub filename: String,
    pub prev_filename: String,
    pub next_filename: String,
    pub title: String,
    pub muxing_app: String,
    pub writing_app: String,
    /// Nanoseconds per timecode unit.
    pub timecode_scale: u64,
    /// Nanoseconds, 0 if unknown.
    pub duration: u64,
    /// Nanoseconds since 2001-01-01T00:00:00 UTC.
    pub date_utc: i64,
    pub date_utc_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Attachment {
    /// Absolute position of the attachment data.
    pub position: u64,
    pub length: u64,
    pub uid: u64,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChapterDisplay {
    pub string: String,
    pub language: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChapterCommand {
    pub time: u32,
    #[serde(serialize_with = "hex")]
    pub command: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChapterProcess {
    pub codec_id: u32,
    #[serde(serialize_with = "hex")]
    pub codec_private: Vec<u8>,
    pub commands: Vec<ChapterCommand>,
}

/// A chapter or, at the top level, an edition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Chapter {
    pub uid: u64,
    /// Nanoseconds.
    pub start: u64,
    pub end: u64,

    pub tracks: Vec<u64>,
    pub display: Vec<ChapterDisplay>,
    pub children: Vec<Chapter>,
    pub process: Vec<ChapterProcess>,

    #[serde(serialize_with = "hex")]
    pub segment_uid: [u8; 16],

    pub hidden: bool,
    pub enabled: bool,

    /// Edition flags.
    pub default: bool,
    pub ordered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Cue {
    /// Nanoseconds.
    pub time: u64,
    pub duration: u64,
    /// Absolute position of the cluster.
    pub position: u64,
    /// Position of the block relative to the cluster data.
    pub relative_position: u64,
    pub block: u64,
    /// Track number, as stored in the file.
    pub track: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Target {
    pub uid: u64,
    #[serde(rename = "type")]
    pub target_type: TargetType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SimpleTag {
    pub name: String,
    pub value: String,
    pub language: String,
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Tag {
    pub targets: Vec<Target>,
    pub simple_tags: Vec<SimpleTag>,
}

/// One demuxed frame, owning its payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Packet {
    /// Zero-based track index, as used by track masks.
    pub track: u32,
    /// Nanoseconds.
    pub start_time: u64,
    pub end_time: u64,
    pub file_pos: u64,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub flags: u32,
    pub discard: i64,
}

impl Packet {
    pub fn is_keyframe(&self) -> bool {
        self.flags & frame_flags::KEYFRAME != 0
    }

    pub fn is_discardable(&self) -> bool {
        self.flags & frame_flags::DISCARDABLE != 0
    }

    pub fn is_gap(&self) -> bool {
        self.flags & frame_flags::GAP != 0
    }

    pub fn has_unknown_start(&self) -> bool {
        self.flags & frame_flags::UNKNOWN_START != 0
    }

    pub fn has_unknown_end(&self) -> bool {
        self.flags & frame_flags::UNKNOWN_END != 0
    }

    pub fn stream(&self) -> u8 {
        ((self.flags & frame_flags::STREAM_MASK) >> frame_flags::STREAM_SHIFT) as u8
    }
}
