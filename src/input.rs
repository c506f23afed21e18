use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use matroska::demuxer::{Demuxer, OpenMode, OpenOptions};
use log::Level;

/// Opens a file, or stdin for "-", as a demuxer.
///
/// Stdin is read strictly front to back, so elements that are only reachable
/// by seeking (usually the cues at the end of the file) are not available.
pub fn open_demuxer<P: AsRef<Path>>(input_path: P, fail_level: Level) -> Result<Demuxer> {
    let path = input_path.as_ref();
    if is_pipe(path) {
        log::debug!("Reading from stdin without seeking");
        return Ok(Demuxer::open_streaming(io::stdin())?);
    }

    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let options = OpenOptions {
        mode: OpenMode::Seekable,
        fail_level,
    };
    Demuxer::open_with(BufReader::new(file), options)
        .with_context(|| format!("cannot demux {}", path.display()))
}

pub fn is_pipe(path: &Path) -> bool {
    path.as_os_str() == "-"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_means_stdin() {
        assert!(is_pipe(Path::new("-")));
        assert!(!is_pipe(Path::new("./-")));
        assert!(!is_pipe(Path::new("movie.mkv")));
    }

    #[test]
    fn missing_file_names_the_path() {
        let error = open_demuxer("does/not/exist.mkv", Level::Error)
            .err()
            .expect("missing file");
        assert!(error.to_string().contains("does/not/exist.mkv"));
    }
}
