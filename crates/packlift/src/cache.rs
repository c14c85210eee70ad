//! Fingerprint-keyed result cache.
//!
//! Cache granularity is "entire build or nothing": a hit replays a previous
//! build's output tree without invoking any step body. The key is derived
//! from the recipe identity, the ordered declared step names and a canonical
//! serialization of the runtime variables.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::step::RuntimeVars;
use crate::tree::FileTree;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Build fingerprint (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex
/// produced by [`Fingerprint::compute`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of one build.
    ///
    /// Runtime variables live in a `BTreeMap`, so their JSON serialization
    /// is already canonical (sorted keys). The three parts are separated by
    /// NUL bytes so adjacent fields cannot collide.
    pub fn compute(recipe_id: &str, step_names: &[String], runtime: &RuntimeVars) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(recipe_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(step_names.join(",").as_bytes());
        hasher.update([0u8]);
        let vars = serde_json::to_string(runtime).unwrap_or_default();
        hasher.update(vars.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars), for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One cached build result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The output tree of the cached build.
    pub built_files: FileTree,
}

/// Backend-agnostic build cache.
///
/// Contract:
/// - `get` returns the entry previously stored under the fingerprint, or
///   `None` when absent.
/// - `set` stores an entry; overwriting an existing one is allowed.
/// - No expiry policy is mandated here; backends may evict at will.
#[async_trait]
pub trait BuildCache: Send + Sync {
    /// Look up a cached build by fingerprint.
    async fn get(&self, key: &Fingerprint) -> CacheResult<Option<CacheEntry>>;

    /// Store a completed build under its fingerprint.
    async fn set(&self, key: &Fingerprint, entry: CacheEntry) -> CacheResult<()>;
}

/// In-memory build cache backed by a `HashMap<fingerprint, entry>`.
#[derive(Debug, Default)]
pub struct MemoryBuildCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryBuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached builds.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BuildCache for MemoryBuildCache {
    async fn get(&self, key: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key.as_str()).cloned())
    }

    async fn set(&self, key: &Fingerprint, entry: CacheEntry) -> CacheResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.as_str().to_string(), entry);
        Ok(())
    }
}
