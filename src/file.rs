//! Filesystem entities as seen by the scanner.
//!
//! A [`File`] is an immutable value: where an entry lives relative to the
//! tree it was scanned from, its absolute path, and a snapshot of its stat
//! information. `stat: None` means the entity does not currently exist on
//! disk, which is how purely synthetic sources and deletion bookkeeping are
//! represented.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Snapshot of the stat fields the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub size: u64,
    pub is_dir: bool,
    pub is_file: bool,
}

impl FileStat {
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            mtime,
            size: meta.len(),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
        }
    }
}

/// A filesystem entity relative to a scanned root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Path relative to `root`, `/`-separated; empty for the root itself.
    pub relpath: String,
    /// Root of the tree this entry was scanned from.
    pub root: PathBuf,
    pub abspath: PathBuf,
    pub stat: Option<FileStat>,
}

impl File {
    /// Stat `abspath` (following symlinks) and build the root entry of a tree.
    pub fn root(abspath: &Path) -> io::Result<Self> {
        let stat = FileStat::from_metadata(&fs::metadata(abspath)?);
        Ok(Self {
            relpath: String::new(),
            root: abspath.to_path_buf(),
            abspath: abspath.to_path_buf(),
            stat: Some(stat),
        })
    }

    /// Build the entry for `name` inside this directory.
    pub fn child(&self, name: &str, stat: Option<FileStat>) -> Self {
        let relpath = if self.relpath.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.relpath, name)
        };
        Self {
            relpath,
            root: self.root.clone(),
            abspath: self.abspath.join(name),
            stat,
        }
    }

    /// Basename of the entry, or the root directory's own name.
    pub fn name(&self) -> &str {
        match self.relpath.rsplit_once('/') {
            Some((_, name)) => name,
            None if !self.relpath.is_empty() => &self.relpath,
            None => self
                .abspath
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default(),
        }
    }

    pub fn exists(&self) -> bool {
        self.stat.is_some()
    }

    pub fn is_regular_file(&self) -> bool {
        self.stat.is_some_and(|s| s.is_file)
    }

    pub fn mtime(&self) -> Option<i64> {
        self.stat.map(|s| s.mtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn root_has_empty_relpath() {
        let tmp = TempDir::new().unwrap();
        let root = File::root(tmp.path()).unwrap();
        assert_eq!(root.relpath, "");
        assert!(root.stat.unwrap().is_dir);
    }

    #[test]
    fn child_paths_join_with_slash() {
        let tmp = TempDir::new().unwrap();
        let root = File::root(tmp.path()).unwrap();
        let blog = root.child("blog", None);
        let post = blog.child("post.md", None);
        assert_eq!(post.relpath, "blog/post.md");
        assert_eq!(post.abspath, tmp.path().join("blog").join("post.md"));
        assert_eq!(post.name(), "post.md");
        assert!(!post.exists());
    }

    #[test]
    fn stat_reports_regular_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        let meta = fs::metadata(tmp.path().join("a.txt")).unwrap();
        let stat = FileStat::from_metadata(&meta);
        assert!(stat.is_file);
        assert_eq!(stat.size, 5);
        assert!(stat.mtime > 0);
    }
}
