//! Paths inside the site, split into components.

use std::fmt;

/// An explicit, ordered sequence of path components.
///
/// `.` and `..` are kept as components: they are interpreted by the lookup
/// functions of the graph, not normalized away here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SitePath {
    parts: Vec<String>,
}

impl SitePath {
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    /// Split a `/`-separated string, dropping empty components.
    pub fn from_string(path: &str) -> Self {
        Self {
            parts: path
                .split('/')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn components(&self) -> &[String] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Every component is a plain name: no `.`, `..` or empty parts.
    pub fn is_plain(&self) -> bool {
        self.parts
            .iter()
            .all(|p| !p.is_empty() && p != "." && p != "..")
    }

    pub fn join(&self, name: &str) -> Self {
        let mut parts = self.parts.clone();
        parts.push(name.to_string());
        Self { parts }
    }
}

impl fmt::Display for SitePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("/"))
    }
}

/// Join a site path prefix (always absolute) with a relative path.
pub fn join_site_path(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{}/{}", base, rel)
    }
}
