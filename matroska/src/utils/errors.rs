use crate::io::source::SourceKey;

#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

/// Errors surfaced by [`Demuxer`](crate::demuxer::Demuxer).
///
/// Every variant carries the diagnostic text reported by the engine.
/// End of stream is not an error; packet reads return `Ok(None)` for it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxError {
    #[error("couldn't open matroska file: {0}")]
    Open(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("could not read packet: {0}")]
    Read(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid reader key {0}")]
    NotFound(SourceKey),
}

#[derive(thiserror::Error, Debug)]
pub enum EbmlError {
    #[error("Invalid VINT at offset {0}")]
    InvalidVint(u64),

    #[error("Invalid element ID at offset {0}")]
    InvalidElementId(u64),

    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEof(u64),

    #[error("I/O error while reading at offset {0}")]
    Io(u64),

    #[error("Cannot go back from offset {from} to {to} without seeking")]
    NonSequential { from: u64, to: u64 },

    #[error("Element 0x{id:X} with {size} bytes exceeds its parent")]
    Overflow { id: u32, size: u64 },

    #[error("Element 0x{id:X} of {size} bytes is too large to buffer")]
    TooLarge { id: u32, size: u64 },

    #[error("Nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("Integer element of {0} bytes")]
    IntegerWidth(u64),

    #[error("Float element of {0} bytes")]
    FloatWidth(u64),

    #[error("No EBML header")]
    MissingHeader,

    #[error("Unsupported DocType \"{0}\"")]
    UnsupportedDocType(String),

    #[error("Unsupported EBML read version {0}")]
    UnsupportedReadVersion(u64),

    #[error("No segment found")]
    MissingSegment,

    #[error("CRC-32 mismatch in element 0x{id:X}: calculated {calculated:#010X}, read {read:#010X}")]
    CrcMismatch { id: u32, calculated: u32, read: u32 },
}

#[derive(thiserror::Error, Debug)]
pub enum BlockError {
    #[error("Block of {0} bytes is too short")]
    TooShort(usize),

    #[error("Block references unknown track number {0}")]
    UnknownTrack(u64),

    #[error("Invalid {kind} lacing: {reason}")]
    InvalidLacing { kind: &'static str, reason: &'static str },

    #[error("Laced frame sizes exceed block payload ({total} > {available})")]
    LaceOverflow { total: u64, available: usize },

    #[error("Cluster without timestamp at offset {0}")]
    MissingClusterTimestamp(u64),
}

#[derive(thiserror::Error, Debug)]
pub enum SeekError {
    #[error("Seeking is disabled for streaming input")]
    Streaming,
}
