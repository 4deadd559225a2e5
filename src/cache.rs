//! Render cache for incremental builds.
//!
//! Converting content to HTML is the part of a build that scales with the
//! amount of text. This module lets converters skip that work when a source
//! file has not changed since the last build.
//!
//! # Design
//!
//! A cache maps a key (the source path relative to the content root) to a
//! [`CachedEntry`]: the source modification time, the rendered output, and
//! every internal link the converter resolved as `(written, resolved)`
//! pairs.
//!
//! A cache hit requires:
//! 1. The stored modification time equals the source's current one
//! 2. Every recorded link still resolves to the same target
//!
//! The second check catches pages that moved: the source did not change,
//! but a link inside it now points somewhere else.
//!
//! ## Storage
//!
//! Each named cache is a directory under `<project>/.sitegraph-cache/`
//! holding one JSON file per key, named by the SHA-256 of the key. Writes
//! go through a temporary file and a rename, so concurrent renders of
//! distinct pages never see partial entries.
//!
//! ## Disabling
//!
//! `--no-cache`, `cache_rebuilds = false`, or a project root that is not
//! writable all select [`DisabledCache`], which stores nothing. Callers do
//! not need to know which implementation they got.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Name of the cache directory within the project root.
pub const CACHE_DIR: &str = ".sitegraph-cache";

/// Version of the entry format. Bump this to invalidate all existing
/// caches when the format changes.
const CACHE_VERSION: u32 = 1;

/// A previously rendered source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub mtime: i64,
    pub rendered: String,
    /// `(url as written, url as rewritten)` for every internal link.
    pub links: Vec<(String, String)>,
}

impl CachedEntry {
    /// Check the entry against the current source mtime and link targets.
    pub fn is_valid(&self, mtime: i64, resolve: impl Fn(&str) -> String) -> bool {
        self.mtime == mtime
            && self
                .links
                .iter()
                .all(|(written, resolved)| resolve(written) == *resolved)
    }
}

pub trait RenderCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedEntry>;
    fn put(&self, key: &str, entry: &CachedEntry);
}

/// Cache that never stores anything.
#[derive(Debug, Default)]
pub struct DisabledCache;

impl RenderCache for DisabledCache {
    fn get(&self, _key: &str) -> Option<CachedEntry> {
        None
    }

    fn put(&self, _key: &str, _entry: &CachedEntry) {}
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    version: u32,
    key: String,
    entry: CachedEntry,
}

/// One JSON file per key.
#[derive(Debug)]
pub struct FsCache {
    dir: PathBuf,
}

impl FsCache {
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hash_key(key)))
    }
}

impl RenderCache for FsCache {
    /// Unreadable, corrupt or mismatched entries count as misses.
    fn get(&self, key: &str) -> Option<CachedEntry> {
        let content = fs::read_to_string(self.entry_path(key)).ok()?;
        let stored: StoredEntry = serde_json::from_str(&content).ok()?;
        if stored.version != CACHE_VERSION || stored.key != key {
            return None;
        }
        Some(stored.entry)
    }

    fn put(&self, key: &str, entry: &CachedEntry) {
        let stored = StoredEntry {
            version: CACHE_VERSION,
            key: key.to_string(),
            entry: entry.clone(),
        };
        let path = self.entry_path(key);
        let tmp = path.with_extension("json.tmp");
        let result = serde_json::to_vec(&stored)
            .map_err(io::Error::from)
            .and_then(|json| fs::write(&tmp, json))
            .and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = result {
            tracing::warn!("{}: cannot write cache entry: {}", path.display(), e);
        }
    }
}

/// SHA-256 of a cache key, as a hex string.
pub fn hash_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Named caches of a project, opened on first use.
pub struct Caches {
    root: Option<PathBuf>,
    open: Mutex<HashMap<String, Arc<dyn RenderCache>>>,
}

impl fmt::Debug for Caches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caches").field("root", &self.root).finish()
    }
}

impl Caches {
    /// Caches under `<project_root>/.sitegraph-cache`, or disabled caches if
    /// `enabled` is false or the directory cannot be written.
    pub fn new(project_root: &Path, enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }
        let root = project_root.join(CACHE_DIR);
        match probe_writable(&root) {
            Ok(()) => Self {
                root: Some(root),
                open: Mutex::new(HashMap::new()),
            },
            Err(e) => {
                tracing::warn!(
                    "{}: not writable, render cache disabled: {}",
                    root.display(),
                    e
                );
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            root: None,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// The cache called `name`.
    pub fn get(&self, name: &str) -> Arc<dyn RenderCache> {
        let mut open = self.open.lock();
        if let Some(cache) = open.get(name) {
            return Arc::clone(cache);
        }
        let cache: Arc<dyn RenderCache> = match &self.root {
            Some(root) => match FsCache::open(&root.join(name)) {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    tracing::warn!("cache '{}' disabled: {}", name, e);
                    Arc::new(DisabledCache)
                }
            },
            None => Arc::new(DisabledCache),
        };
        open.insert(name.to_string(), Arc::clone(&cache));
        cache
    }
}

fn probe_writable(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(".probe");
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)
}

/// Summary of cache performance for a build run.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU32,
    misses: AtomicU32,
}

impl CacheStats {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u32 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u32 {
        self.hits() + self.misses()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits() > 0 {
            write!(
                f,
                "{} cached, {} rendered ({} total)",
                self.hits(),
                self.misses(),
                self.total()
            )
        } else {
            write!(f, "{} rendered", self.misses())
        }
    }
}
