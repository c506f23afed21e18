#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Demuxer for Matroska and WebM files, the EBML-based containers.
//!
//! ### Byte Access
//!
//! The engine never holds a reference to the host's source. Each demuxer
//! registers its source in a [`io::SourceRegistry`] under an opaque key, and
//! the engine reads through an [`engine::InputStream`] that resolves the key
//! on every call. Sources that cannot seek are read strictly front to back.
//!
//! ### Metadata
//!
//! - Tracks with video, colour and audio sub-records
//! - Segment info, cues and attachments
//! - Chapters (editions as roots, arbitrarily nested atoms)
//! - Tags with targets and simple tags
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::fs::File;
//! use matroska::demuxer::{Demuxer, OpenMode};
//!
//! let mut demuxer = Demuxer::open(File::open("movie.mkv")?, OpenMode::Auto)?;
//!
//! for index in 0..demuxer.num_tracks()? {
//!     let track = demuxer.track_info(index)?;
//!     println!("{index}: {} {}", track.track_type, track.codec_id);
//! }
//!
//! while let Some(packet) = demuxer.read_packet()? {
//!     println!("track {} at {} ns, {} bytes", packet.track, packet.start_time, packet.data.len());
//! }
//!
//! demuxer.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Demuxer lifecycle, metadata queries, seeking and packet reads.
pub mod demuxer;

/// The parsing engine interface and the native Matroska engine.
///
/// - **EBML** ([`engine::ebml`]): Element headers, integers, floats, CRC-32
/// - **Element IDs** ([`engine::elements`]): Matroska element identifiers
/// - **Native Records** ([`engine::native`]): Flat chapter and tag tables
pub mod engine;

/// Byte sources, the key registry and the engine callbacks.
pub mod io;

/// Owned metadata and packet types.
pub mod model;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Block header and lacing reads
/// - **CRC Validation** ([`utils::crc`]): EBML CRC-32
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Buffer Management** ([`utils::buffer_pool`]): Frame payload reuse
pub mod utils;
