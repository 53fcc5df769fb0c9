//! Process-wide, content-addressed store of previously compiled modules.
//!
//! Append-only with no eviction: a module compiled once stays reusable for
//! the process lifetime. That growth is an explicit tradeoff, not a bug.

use ahash::AHashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::backend::LoadableModule;
use crate::engine::references::ReferenceSet;

/// Fixed keying material for the cache hash. A checksum for cache keying
/// only, not a trust boundary.
const CACHE_HASH_KEY: &[u8; 32] = b"reportscript.module-cache.key.01";

/// Cache key over the reference file names and the assembled source text.
/// Reference order does not matter; any change to the source text or to the
/// set of file names produces a different key.
pub fn content_key(references: &ReferenceSet, source: &str) -> String {
    let mut hasher = blake3::Hasher::new_keyed(CACHE_HASH_KEY);
    for name in references.file_names_sorted() {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(source.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[derive(Default)]
pub struct BuildCache {
    modules: Mutex<AHashMap<String, Arc<dyn LoadableModule>>>,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by all units by default.
    pub fn global() -> Arc<BuildCache> {
        static CACHE: OnceLock<Arc<BuildCache>> = OnceLock::new();
        CACHE.get_or_init(|| Arc::new(BuildCache::new())).clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn LoadableModule>> {
        let modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        modules.get(key).cloned()
    }

    /// Inserts at most once per key; a racing insert keeps the first module.
    pub fn insert_if_absent(&self, key: &str, module: Arc<dyn LoadableModule>) {
        let mut modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        modules.entry(key.to_string()).or_insert(module);
    }

    pub fn len(&self) -> usize {
        let modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
