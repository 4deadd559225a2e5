//! Source tree scanning.
//!
//! Walks the content directory into a [`SourceDir`] tree that mirrors it,
//! attaching metadata to every directory and file. Loading pages from that
//! tree is the job of [`crate::load`]; nothing here touches the graph.
//!
//! ## Directory config
//!
//! A directory may hold a `.sitegraph` file, in any front matter format
//! (JSON object, `---` YAML, `+++` TOML):
//!
//! ```yaml
//! ---
//! author: Ann             # any metadata, inherited by everything below
//! skip: yes               # ignore this directory and everything below
//! ignore: ["*.tmp", "^_"]
//! files:
//!   "*.jpg": {asset: yes}
//! dirs:
//!   "static": {asset: yes}
//! ```
//!
//! Patterns are globs, or regular expressions when they start with `^` or
//! end with `$` (see [`crate::pattern`]).
//!
//! ## Metadata sources
//!
//! For a directory, in increasing priority: what the parent derives to it,
//! the parent's `dirs:` rules, its own config file, then what features
//! contribute through `Feature::load_dir_meta`. Feature contributions only
//! keep inherited fields; `on_dir_meta` hooks then see the full contribution.
//! A file gets the derived directory metadata plus its matching `files:`
//! rules. Within a rule list the first rule to set a key wins.
//!
//! Hidden entries are skipped. Broken symlinks are skipped with a warning.

use crate::features::{FeatureError, Features};
use crate::fields::truthy;
use crate::file::{File, FileStat};
use crate::front_matter::{FrontMatterError, MetaMap, read_whole};
use crate::metadata::{DirMetaContext, MetadataRegistry};
use crate::pattern::{PageMatch, PatternError};
use crate::site_path::join_site_path;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the per-directory config file.
pub const DIR_CONFIG: &str = ".sitegraph";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("{path}: cannot read directory: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{path}: invalid directory config: {source}")]
    DirConfig {
        path: PathBuf,
        source: FrontMatterError,
    },
    #[error("{path}: {source}")]
    Pattern { path: PathBuf, source: PatternError },
    #[error("{path}: '{key}' must be {expected}")]
    BadRule {
        path: PathBuf,
        key: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// A scanned file and the metadata that applies to it.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file: File,
    pub meta: MetaMap,
}

/// A scanned directory.
#[derive(Debug, Clone)]
pub struct SourceDir {
    pub src: File,
    /// Aggregate metadata of the directory itself.
    pub meta: MetaMap,
    pub files: BTreeMap<String, SourceFile>,
    pub subdirs: BTreeMap<String, SourceDir>,
    /// Everything in this subtree is a static asset.
    pub asset: bool,
}

impl SourceDir {
    fn empty(src: File, meta: MetaMap) -> Self {
        Self {
            src,
            meta,
            files: BTreeMap::new(),
            subdirs: BTreeMap::new(),
            asset: false,
        }
    }

    /// Number of files in the subtree.
    pub fn file_count(&self) -> usize {
        self.files.len() + self.subdirs.values().map(SourceDir::file_count).sum::<usize>()
    }
}

/// What a feature sees of a directory while its metadata is computed.
pub struct DirView<'a> {
    pub src: &'a File,
    pub files: &'a BTreeMap<String, File>,
    pub is_root: bool,
}

impl DirView<'_> {
    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.get(name)
    }
}

// ============================================================================
// Directory handles
// ============================================================================

struct Entry {
    name: String,
    stat: FileStat,
}

/// An open directory. Entries are read in one go and the handle closed
/// before any recursion.
///
/// Entry metadata comes from the directory stream, so plain files and
/// subdirectories are not looked up again by path. Only symlinks are
/// followed through their full path.
struct DirHandle {
    path: PathBuf,
    iter: fs::ReadDir,
}

impl DirHandle {
    fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            iter: fs::read_dir(path)?,
        })
    }

    /// Entries sorted by name, hidden ones excluded except the config file.
    fn entries(self) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for entry in self.iter {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(
                    "{}: skipping non UTF-8 name {:?}",
                    self.path.display(),
                    entry.file_name()
                );
                continue;
            };
            if name.starts_with('.') && name != DIR_CONFIG {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_symlink() => match fs::metadata(entry.path()) {
                    Ok(target) => target,
                    Err(e) => {
                        tracing::warn!(
                            "{}: skipping broken symlink: {}",
                            entry.path().display(),
                            e
                        );
                        continue;
                    }
                },
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("{}: skipping: {}", entry.path().display(), e);
                    continue;
                }
            };
            entries.push(Entry {
                name,
                stat: FileStat::from_metadata(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

// ============================================================================
// Rules
// ============================================================================

type Rule = (PageMatch, MetaMap);

#[derive(Default)]
struct DirRules {
    dirs: Vec<Rule>,
    files: Vec<Rule>,
    ignore: Vec<PageMatch>,
}

impl DirRules {
    /// Move `dirs:`, `files:` and `ignore:` out of `meta` into the rules.
    fn take_from(&mut self, meta: &mut MetaMap, origin: &Path) -> Result<(), ScanError> {
        if let Some(value) = meta.remove("dirs") {
            self.dirs.extend(parse_rules(value, "dirs", origin)?);
        }
        if let Some(value) = meta.remove("files") {
            self.files.extend(parse_rules(value, "files", origin)?);
        }
        if let Some(value) = meta.remove("ignore") {
            let patterns = match value {
                Value::String(s) => vec![s],
                Value::Array(items) => items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s),
                        _ => Err(bad_rule(origin, "ignore", "a list of patterns")),
                    })
                    .collect::<Result<_, _>>()?,
                _ => return Err(bad_rule(origin, "ignore", "a list of patterns")),
            };
            for pattern in patterns {
                self.ignore.push(compile(&pattern, origin)?);
            }
        }
        Ok(())
    }

    fn ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|p| p.matches(name))
    }
}

fn bad_rule(origin: &Path, key: &'static str, expected: &'static str) -> ScanError {
    ScanError::BadRule {
        path: origin.to_path_buf(),
        key,
        expected,
    }
}

fn compile(pattern: &str, origin: &Path) -> Result<PageMatch, ScanError> {
    PageMatch::compile(pattern).map_err(|source| ScanError::Pattern {
        path: origin.to_path_buf(),
        source,
    })
}

/// Rules are a mapping of pattern to metadata, or a list of such mappings
/// when the order needs to be spelled out.
fn parse_rules(value: Value, key: &'static str, origin: &Path) -> Result<Vec<Rule>, ScanError> {
    const EXPECTED: &str = "a mapping of pattern to metadata";
    let maps = match value {
        Value::Object(map) => vec![map],
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => Ok(map),
                _ => Err(bad_rule(origin, key, EXPECTED)),
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(bad_rule(origin, key, EXPECTED)),
    };
    let mut rules = Vec::new();
    for map in maps {
        for (pattern, meta) in map {
            let Value::Object(meta) = meta else {
                return Err(bad_rule(origin, key, EXPECTED));
            };
            rules.push((compile(&pattern, origin)?, meta));
        }
    }
    Ok(rules)
}

/// Add keys from matching rules. The first rule to set a key wins.
fn apply_rules(rules: &[Rule], name: &str, meta: &mut MetaMap) {
    let mut set = HashSet::new();
    for (pattern, values) in rules {
        if !pattern.matches(name) {
            continue;
        }
        for (key, value) in values {
            if set.insert(key.as_str()) {
                meta.insert(key.clone(), value.clone());
            }
        }
    }
}

// ============================================================================
// Scanner
// ============================================================================

pub struct Scanner<'a> {
    features: &'a mut Features,
    registry: &'a MetadataRegistry,
}

impl<'a> Scanner<'a> {
    pub fn new(features: &'a mut Features, registry: &'a MetadataRegistry) -> Self {
        Self { features, registry }
    }

    /// Scan the tree at `root`, starting from the given root metadata.
    pub fn scan_tree(&mut self, root: &File, meta: MetaMap) -> Result<SourceDir, ScanError> {
        let tree = if meta.get("asset").is_some_and(truthy) {
            self.scan_assets(root.clone(), meta, true)?
        } else {
            self.scan_dir(root.clone(), meta, true)?
        };
        let tree = tree.unwrap_or_else(|| SourceDir::empty(root.clone(), MetaMap::new()));
        tracing::debug!("scanned {} files", tree.file_count());
        Ok(tree)
    }

    fn list(&self, dir: &File, is_root: bool) -> Result<Option<Vec<Entry>>, ScanError> {
        match DirHandle::open(&dir.abspath).and_then(DirHandle::entries) {
            Ok(entries) => Ok(Some(entries)),
            Err(source) if is_root => Err(ScanError::Io {
                path: dir.abspath.clone(),
                source,
            }),
            Err(e) => {
                tracing::warn!("{}: skipping unreadable directory: {}", dir.abspath.display(), e);
                Ok(None)
            }
        }
    }

    /// `Ok(None)` when the directory is skipped.
    fn scan_dir(
        &mut self,
        src: File,
        mut meta: MetaMap,
        is_root: bool,
    ) -> Result<Option<SourceDir>, ScanError> {
        let Some(entries) = self.list(&src, is_root)? else {
            return Ok(None);
        };
        let mut rules = DirRules::default();

        if let Some(config) = entries.iter().find(|e| e.name == DIR_CONFIG && e.stat.is_file) {
            let path = src.abspath.join(&config.name);
            let text = fs::read_to_string(&path).map_err(|source| ScanError::Io {
                path: path.clone(),
                source,
            })?;
            let (_, mut config) = read_whole(&text).map_err(|source| ScanError::DirConfig {
                path: path.clone(),
                source,
            })?;
            if config.remove("skip").is_some_and(|v| truthy(&v)) {
                tracing::debug!("{}: skipped by directory config", src.abspath.display());
                return Ok(None);
            }
            rules.take_from(&mut config, &path)?;
            meta.extend(config);
        }

        let mut files = BTreeMap::new();
        let mut dirs = BTreeMap::new();
        for entry in entries {
            if entry.name == DIR_CONFIG {
                continue;
            }
            let file = src.child(&entry.name, Some(entry.stat));
            if entry.stat.is_dir {
                dirs.insert(entry.name, file);
            } else {
                files.insert(entry.name, file);
            }
        }

        let mut contributed = MetaMap::new();
        let view = DirView {
            src: &src,
            files: &files,
            is_root,
        };
        for feature in self.features.ordered_mut() {
            if let Some(mut extra) = feature.load_dir_meta(&view)? {
                rules.take_from(&mut extra, &src.abspath)?;
                contributed.extend(extra);
            }
        }
        let fields = self.registry.fields();
        meta.extend(
            contributed
                .iter()
                .filter(|(k, _)| fields.is_inherited(k))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.registry
            .on_dir_meta(&DirMetaContext { is_root }, &contributed, &mut meta);

        files.retain(|name, _| !rules.ignored(name));
        dirs.retain(|name, _| !rules.ignored(name));

        let derived = self.registry.derive(&meta);
        let files = files
            .into_iter()
            .map(|(name, file)| {
                let mut file_meta = derived.clone();
                apply_rules(&rules.files, &name, &mut file_meta);
                (name, SourceFile { file, meta: file_meta })
            })
            .collect();

        let mut subdirs = BTreeMap::new();
        for (name, dir) in dirs {
            let child_meta = self.child_meta(&meta, &name, &rules.dirs);
            let scanned = if child_meta.get("asset").is_some_and(truthy) {
                self.scan_assets(dir, child_meta, false)?
            } else {
                self.scan_dir(dir, child_meta, false)?
            };
            if let Some(scanned) = scanned {
                subdirs.insert(name, scanned);
            }
        }

        Ok(Some(SourceDir {
            src,
            meta,
            files,
            subdirs,
            asset: false,
        }))
    }

    fn child_meta(&self, parent: &MetaMap, name: &str, dir_rules: &[Rule]) -> MetaMap {
        let mut meta = self.registry.derive(parent);
        let base = parent.get("site_path").and_then(Value::as_str).unwrap_or("/");
        meta.insert("site_path".into(), Value::String(join_site_path(base, name)));
        apply_rules(dir_rules, name, &mut meta);
        meta
    }

    /// Take every regular file below `src`, without consulting configs or
    /// features.
    fn scan_assets(
        &mut self,
        src: File,
        meta: MetaMap,
        is_root: bool,
    ) -> Result<Option<SourceDir>, ScanError> {
        let Some(entries) = self.list(&src, is_root)? else {
            return Ok(None);
        };
        let derived = self.registry.derive(&meta);
        let mut dir = SourceDir::empty(src, meta);
        dir.asset = true;
        for entry in entries {
            if entry.name == DIR_CONFIG {
                continue;
            }
            let file = dir.src.child(&entry.name, Some(entry.stat));
            if entry.stat.is_dir {
                let child_meta = self.child_meta(&dir.meta, &entry.name, &[]);
                if let Some(sub) = self.scan_assets(file, child_meta, false)? {
                    dir.subdirs.insert(entry.name, sub);
                }
            } else if entry.stat.is_file {
                dir.files.insert(
                    entry.name,
                    SourceFile {
                        file,
                        meta: derived.clone(),
                    },
                );
            }
        }
        Ok(Some(dir))
    }
}
