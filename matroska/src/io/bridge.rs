//! Callbacks the engine uses to reach host byte sources.
//!
//! Every entry point resolves a [`SourceKey`] through the registry before
//! touching the source, and reports failure with the engine's integer
//! conventions rather than `Result`. Nothing here panics across the boundary.

use std::io::ErrorKind;

use log::{debug, trace};

use crate::engine::{IO_ERROR, InputStream};
use crate::io::registry::SourceRegistry;
use crate::io::source::SourceKey;

/// Status returned by [`CallbackBridge::seek`].
pub const SEEK_OK: i32 = 0;
pub const SEEK_FAILED: i32 = -1;

#[derive(Debug, Clone, Copy)]
pub struct CallbackBridge {
    registry: &'static SourceRegistry,
}

impl CallbackBridge {
    pub fn new(registry: &'static SourceRegistry) -> Self {
        Self { registry }
    }

    pub fn global() -> Self {
        Self::new(SourceRegistry::global())
    }

    pub fn registry(&self) -> &'static SourceRegistry {
        self.registry
    }

    /// Fills as much of `buf` as one read of the source yields.
    ///
    /// Returns the number of bytes read (`0` at end of stream), or
    /// [`IO_ERROR`] when the key is unknown or the source fails.
    pub fn read(&self, key: &SourceKey, buf: &mut [u8]) -> i64 {
        let source = match self.registry.lookup(key) {
            Ok(source) => source,
            Err(e) => {
                debug!("read: {e}");
                return IO_ERROR;
            }
        };

        let mut source = source.lock();
        loop {
            match source.read(buf) {
                Ok(n) => return n as i64,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("read from {key} failed: {e}");
                    return IO_ERROR;
                }
            }
        }
    }

    /// Moves the source to absolute position `pos`.
    pub fn seek(&self, key: &SourceKey, pos: u64) -> i32 {
        let source = match self.registry.lookup(key) {
            Ok(source) => source,
            Err(e) => {
                debug!("seek: {e}");
                return SEEK_FAILED;
            }
        };

        match source.lock().seek(pos) {
            Ok(_) => SEEK_OK,
            Err(e) => {
                debug!("seek of {key} to {pos} failed: {e}");
                SEEK_FAILED
            }
        }
    }

    /// Total length of the source, or [`IO_ERROR`] when it can't be
    /// determined. The read position is left where it was.
    pub fn size(&self, key: &SourceKey) -> i64 {
        let source = match self.registry.lookup(key) {
            Ok(source) => source,
            Err(e) => {
                debug!("size: {e}");
                return IO_ERROR;
            }
        };

        let mut source = source.lock();
        let current = match source.position() {
            Ok(pos) => pos,
            Err(_) => return IO_ERROR,
        };
        let end = match source.seek_end() {
            Ok(end) => end,
            Err(_) => {
                // The failed seek may still have moved the cursor.
                let _ = source.seek(current);
                return IO_ERROR;
            }
        };
        if source.seek(current).is_err() {
            return IO_ERROR;
        }
        end as i64
    }
}

/// The [`InputStream`] handed to the engine for one session.
///
/// Tracks the position the source was last left at so that sequential reads
/// never issue a seek.
#[derive(Debug)]
pub struct BridgeInput {
    bridge: CallbackBridge,
    key: SourceKey,
    pos: u64,
}

impl BridgeInput {
    pub fn new(bridge: CallbackBridge, key: SourceKey) -> Self {
        Self { bridge, key, pos: 0 }
    }

    pub fn key(&self) -> &SourceKey {
        &self.key
    }
}

impl InputStream for BridgeInput {
    fn read(&mut self, pos: u64, buf: &mut [u8]) -> i64 {
        if buf.is_empty() {
            return 0;
        }
        if pos != self.pos {
            trace!("{}: seek {} -> {}", self.key, self.pos, pos);
            if self.bridge.seek(&self.key, pos) != SEEK_OK {
                return IO_ERROR;
            }
            self.pos = pos;
        }

        let n = self.bridge.read(&self.key, buf);
        if n > 0 {
            self.pos += n as u64;
        }
        n
    }

    fn file_size(&mut self) -> i64 {
        self.bridge.size(&self.key)
    }

    fn error_text(&self) -> &str {
        "I/O error reading from source"
    }
}
