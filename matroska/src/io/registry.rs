//! Process-wide table of live byte sources.
//!
//! The engine cannot hold references into the host, so every session hands
//! it an opaque [`SourceKey`] instead. Callbacks resolve the key here on each
//! read, seek and size query. Lookups share a read lock and never block one
//! another; registration and removal take the write lock.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, LazyLock};

use log::trace;
use parking_lot::{Mutex, RwLock};

use crate::io::source::{ByteSource, SourceKey};
use crate::utils::errors::RegistryError;

/// A registered source. Each source has its own lock so that sessions never
/// contend with each other once the key has been resolved.
pub type SharedSource = Arc<Mutex<dyn ByteSource>>;

static GLOBAL: LazyLock<SourceRegistry> = LazyLock::new(SourceRegistry::new);

#[derive(Default)]
pub struct SourceRegistry {
    table: RwLock<HashMap<SourceKey, SharedSource>>,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.len())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry used by demuxers opened without an explicit registry.
    pub fn global() -> &'static SourceRegistry {
        &GLOBAL
    }

    /// Stores `source` under a fresh key.
    pub fn register<S: ByteSource + 'static>(&self, source: S) -> SourceKey {
        self.register_shared(Arc::new(Mutex::new(source)))
    }

    pub fn register_shared(&self, source: SharedSource) -> SourceKey {
        let mut table = self.table.write();
        loop {
            // A v4 collision with a live key is practically impossible, but
            // a duplicate must never replace another session's source.
            if let Entry::Vacant(slot) = table.entry(SourceKey::generate()) {
                let key = *slot.key();
                slot.insert(source);
                trace!("registered source {key}");
                return key;
            }
        }
    }

    pub fn lookup(&self, key: &SourceKey) -> Result<SharedSource, RegistryError> {
        self.table
            .read()
            .get(key)
            .cloned()
            .ok_or(RegistryError::NotFound(*key))
    }

    /// Removes the mapping. Returns `false` if the key was not registered.
    pub fn unregister(&self, key: &SourceKey) -> bool {
        let removed = self.table.write().remove(key).is_some();
        if removed {
            trace!("unregistered source {key}");
        }
        removed
    }

    pub fn contains(&self, key: &SourceKey) -> bool {
        self.table.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
