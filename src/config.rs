//! Project settings.
//!
//! Loads `sitegraph.toml` from the project root. Stock defaults are the base
//! layer; the user file only needs the keys it wants to change. Unknown keys
//! are rejected.
//!
//! ## Project Layout
//!
//! ```text
//! project/
//! ├── sitegraph.toml        # Settings (optional)
//! ├── content/              # Source tree, scanned recursively
//! │   ├── .sitegraph        # Directory config (see `scan`)
//! │   ├── index.md
//! │   └── blog/
//! ├── web/                  # Generated output
//! └── .sitegraph-cache/     # Render cache
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! content = "content"       # Source directory, relative to the project
//! output = "web"            # Output directory, relative to the project
//! site_name = "My Site"     # Defaults to the root index title
//! site_url = "https://example.com"
//! site_root = "/"           # URL prefix the site is served under
//! author = "Ann"
//! draft = false             # Publish pages dated in the future
//! cache_rebuilds = true     # Use the render cache
//!
//! [taxonomy]
//! path = "tags"             # Where tag pages are published
//!
//! [render]
//! max_threads = 4           # Omit to use every core
//! ```
//!
//! Settings that describe the site (`site_name`, `site_url`, `author`) seed
//! the metadata of the content root, so directory configs and front matter
//! can still override them per subtree.

use crate::front_matter::MetaMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Name of the settings file in the project root.
pub const CONFIG_FILE: &str = "sitegraph.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings loaded from `sitegraph.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Source directory, relative to the project root.
    pub content: String,
    /// Output directory, relative to the project root.
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    /// URL prefix of the site, starting with `/`.
    pub site_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Keep pages dated after the build started.
    pub draft: bool,
    /// Reuse rendered output of unchanged sources.
    pub cache_rebuilds: bool,
    pub taxonomy: TaxonomyConfig,
    pub render: RenderConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            content: "content".to_string(),
            output: "web".to_string(),
            site_name: None,
            site_url: None,
            site_root: "/".to_string(),
            author: None,
            draft: false,
            cache_rebuilds: true,
            taxonomy: TaxonomyConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Settings {
    /// Validate values that the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content.trim().is_empty() {
            return Err(ConfigError::Validation("content must not be empty".into()));
        }
        if self.output.trim().is_empty() {
            return Err(ConfigError::Validation("output must not be empty".into()));
        }
        let output = normalize(Path::new(&self.output));
        if normalize(Path::new(&self.content)).starts_with(&output) {
            return Err(ConfigError::Validation(
                "output must not contain the content directory".into(),
            ));
        }
        if !self.site_root.starts_with('/') {
            return Err(ConfigError::Validation(
                "site_root must start with '/'".into(),
            ));
        }
        if self.taxonomy.path.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "taxonomy.path must not be empty".into(),
            ));
        }
        if self.render.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "render.max_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn content_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.content)
    }

    pub fn output_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.output)
    }

    /// Metadata of the content root: site path plus whatever site-wide
    /// values are configured.
    pub fn root_meta(&self) -> MetaMap {
        let mut meta = MetaMap::new();
        meta.insert("site_path".into(), Value::String(self.site_root.clone()));
        let optional = [
            ("site_name", &self.site_name),
            ("site_url", &self.site_url),
            ("author", &self.author),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                meta.insert(key.into(), Value::String(value.clone()));
            }
        }
        meta
    }
}

/// Tag taxonomy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaxonomyConfig {
    /// Site path of the tag index, relative to the site root.
    pub path: String,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            path: "tags".to_string(),
        }
    }
}

/// Parallel rendering settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Maximum number of render threads.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
/// Drop `.` components and fold `..` into its parent, without touching the
/// filesystem. An empty result stands for the project root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Refuse to write into `output` when it is `content` or one of its
/// ancestors. Both paths are resolved on disk, so the output directory is
/// created first.
pub fn check_output_dir(content: &Path, output: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(output)?;
    let output = output.canonicalize()?;
    let content = content.canonicalize()?;
    if content.starts_with(&output) {
        return Err(ConfigError::Validation(format!(
            "output {} must not contain the content directory {}",
            output.display(),
            content.display()
        )));
    }
    Ok(())
}

pub fn effective_threads(config: &RenderConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default settings as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Settings::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `sitegraph.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Settings, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let settings: Settings = merged.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings for the project at `root`.
pub fn load_config(root: &Path) -> Result<Settings, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `sitegraph.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# sitegraph settings
# ==================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Source directory, relative to this file.
content = "content"

# Output directory, relative to this file. Files in it that the build does
# not produce are deleted.
output = "web"

# Name of the site. Defaults to the title of the root index page, then to
# the name of the content directory.
# site_name = "My Site"

# Public URL of the site.
# site_url = "https://example.com"

# URL prefix the site is served under.
site_root = "/"

# Default author of every page.
# author = "Ann"

# Publish pages whose date lies in the future.
draft = false

# Reuse rendered output of unchanged sources across builds.
cache_rebuilds = true

# ---------------------------------------------------------------------------
# Tags
# ---------------------------------------------------------------------------
[taxonomy]
# Tag pages are published at <path>/ and <path>/<tag>/.
path = "tags"

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[render]
# Maximum number of parallel render threads.
# Omit to use every core. Values above the core count are clamped down.
# max_threads = 4
"##
}
