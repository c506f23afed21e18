//! Utility functions and supporting infrastructure.
//!
//! Provides payload bit reading, CRC-32 validation, error types and
//! buffer management for the engine and the demuxer.

pub mod bitstream_io;
pub mod buffer_pool;
pub mod crc;
pub mod errors;
