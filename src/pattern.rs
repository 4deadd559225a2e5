//! File and directory name matching for `dirs:`, `files:` and `ignore:` rules.
//!
//! Patterns are glob expressions by default. A pattern that starts with `^`
//! or ends with `$` is a regular expression instead, anchored at the start
//! of the name.

use glob::Pattern;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("invalid glob pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("invalid regular expression {pattern:?}: {source}")]
    Regex {
        pattern: String,
        source: regex::Error,
    },
}

/// A compiled name pattern.
#[derive(Debug, Clone)]
pub enum PageMatch {
    Glob(Pattern),
    Regex(Regex),
}

impl PageMatch {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.starts_with('^') || pattern.ends_with('$') {
            let anchored = if pattern.starts_with('^') {
                pattern.to_string()
            } else {
                format!("^(?:{})", pattern)
            };
            Regex::new(&anchored)
                .map(Self::Regex)
                .map_err(|source| PatternError::Regex {
                    pattern: pattern.to_string(),
                    source,
                })
        } else {
            Pattern::new(pattern)
                .map(Self::Glob)
                .map_err(|source| PatternError::Glob {
                    pattern: pattern.to_string(),
                    source,
                })
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Glob(p) => p.matches(name),
            Self::Regex(r) => r.is_match(name),
        }
    }
}
