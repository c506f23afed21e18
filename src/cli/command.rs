use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use log::Level;

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (matroska ", env!("MATROSKA_VERSION"),
        ", built ", env!("BUILD_TIMESTAMP"), ")"
    ),
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Tools for inspecting and demuxing Matroska/WebM files",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat container warnings (CRC mismatches, unknown tracks) as fatal errors.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Level at which stream defects stop the demuxer.
    pub fn fail_level(&self) -> Level {
        if self.strict { Level::Warn } else { Level::Error }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print segment, track, chapter, tag, cue and attachment information.
    Info(InfoArgs),

    /// List packets in file order.
    Packets(PacketsArgs),

    /// Write the raw payloads of one track to a file.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input Matroska/WebM file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = InfoFormat::Text)]
    pub format: InfoFormat,
}

#[derive(Debug, Args)]
pub struct PacketsArgs {
    /// Input Matroska/WebM file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Bit mask of track indices to skip (bit 0 is the first track).
    #[arg(long, value_name = "MASK", default_value_t = 0)]
    pub mask: u64,

    /// Seek to this time in nanoseconds before listing.
    #[arg(long, value_name = "NS")]
    pub seek: Option<u64>,

    /// Start at the keyframe before the seek target instead of the exact time.
    #[arg(long, requires = "seek")]
    pub keyframe: bool,

    /// Stop after this many packets.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Input Matroska/WebM file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Track index (0-based, as listed by `info`).
    #[arg(long, value_name = "INDEX")]
    pub track: usize,

    /// Output file for the track payloads.
    #[arg(long, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum InfoFormat {
    /// Aligned human-readable report.
    Text,
    /// YAML document.
    Yaml,
    /// JSON document.
    Json,
}
