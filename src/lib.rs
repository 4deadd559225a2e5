//! # sitegraph
//!
//! A static site generator built around a cross-referenced content graph.
//! A directory of sources becomes a tree of nodes and pages; features claim
//! files, synthesize derived pages, and the builder reconciles the output
//! directory with what the graph produces.
//!
//! # Architecture: Phased Pipeline
//!
//! Every phase runs over the whole tree before the next one starts:
//!
//! ```text
//! 1. Scan       content/  →  SourceDir tree    (config files, rules, metadata)
//! 2. Load       SourceDir →  Graph             (features claim files, rest are assets)
//! 3. Organize   Graph     →  Graph             (synthetic pages: aliases, tags, feeds)
//! 4. Analyze    Graph     →  Graph             (metadata hooks, feed entries, listings)
//! 5. Finalize   Graph     →  Graph             (last adjustments)
//! 6. Render     Graph     →  web/              (parallel render, reconciliation)
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`site`] | Owns settings, features and graph; drives the phases |
//! | [`scan`] | Walks the content directory, applies `.sitegraph` configs and rules |
//! | [`load`] | Offers scanned files to features, creates assets and directory pages |
//! | [`node`] | The node/page graph: creation, single-writer slots, lookup, inheritance |
//! | [`fields`] | Typed field declarations and the per-page metadata container |
//! | [`metadata`] | Well-known fields and their `on_load` / `on_dir_meta` / `on_analyze` hooks |
//! | [`features`] | Feature trait, dependency ordering, and the default features |
//! | [`render`] | Page types, renderers, and shared Maud components |
//! | [`cache`] | Render cache keyed by source path, validated by mtime and links |
//! | [`builder`] | Writes output, deletes stale files, removes empty directories |
//! | [`config`] | `sitegraph.toml` loading, merging, and validation |
//! | [`front_matter`] | JSON / YAML / TOML front matter and directory config parsing |
//! | [`pattern`] | Glob and regex patterns for `dirs:` / `files:` / `ignore:` rules |
//! | [`file`] | Filesystem entries relative to a scanned root |
//! | [`site_path`] | `/`-separated site paths |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Arena Graph
//!
//! Nodes and pages live in two vectors owned by [`node::Graph`] and refer to
//! each other by index. Ownership flows only from a node to its children;
//! `parent`, `created_from` and the source-path index are plain ids.
//!
//! ## One Feature Order
//!
//! Features declare `run_before` / `run_after` constraints by name. The
//! order is computed once when a site is created and used for every pass,
//! so a feature always sees the complete output of the ones it depends on.
//! A cycle is reported before anything is scanned.
//!
//! ## Maud Over Template Engines
//!
//! HTML is generated with [Maud](https://maud.lambda.xyz/): malformed markup
//! is a compile error and every interpolation is escaped.
//! Feeds are XML, written with the `rss` crate and `quick-xml`.

pub mod builder;
pub mod cache;
pub mod config;
pub mod features;
pub mod fields;
pub mod file;
pub mod front_matter;
pub mod load;
pub mod metadata;
pub mod node;
pub mod output;
pub mod pattern;
pub mod render;
pub mod scan;
pub mod site;
pub mod site_path;

#[cfg(test)]
pub(crate) mod test_helpers;
