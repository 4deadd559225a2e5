//! Shared test utilities for the sitegraph test suite.
//!
//! Provides fixture builders for content trees and graphs, plus lookup
//! helpers that panic with the available alternatives on a miss.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_tree(tmp.path(), &[("index.md", "# Home\n"), ("blog/post.md", "# Post\n")]);
//!
//! let mut graph = test_graph();
//! graph.set_phase(Phase::Load);
//! // ... load pages ...
//! let post = find_page(&graph, "blog/post/index.html");
//! ```

use crate::fields::parse_date;
use crate::file::{File, FileStat};
use crate::front_matter::MetaMap;
use crate::metadata::MetadataRegistry;
use crate::node::{Graph, GraphOptions, PageId};
use crate::render::{PageRenderer, PageType, RenderContext, RenderError, Rendered, html_page, page_title};
use maud::html;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Modification time given to synthetic source files: 2020-01-01T00:00:00Z.
pub const SOURCE_MTIME: i64 = 1_577_836_800 * 1_000_000_000;

// =========================================================================
// Fixture setup
// =========================================================================

/// Write `files` (relative path, content) below `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
    }
}

/// Metadata map from a JSON object literal.
pub fn meta_map(value: Value) -> MetaMap {
    match value {
        Value::Object(map) => map,
        other => panic!("meta_map expects an object, got {other}"),
    }
}

/// A source file under `/src` that exists as far as the graph can tell.
pub fn source_file(relpath: &str) -> File {
    let abspath = if relpath.is_empty() {
        PathBuf::from("/src")
    } else {
        PathBuf::from("/src").join(relpath)
    };
    File {
        relpath: relpath.to_string(),
        root: PathBuf::from("/src"),
        abspath,
        stat: Some(FileStat {
            mtime: SOURCE_MTIME,
            size: 1,
            is_dir: false,
            is_file: true,
        }),
    }
}

/// Generation time of [`test_graph`].
pub fn generation_time() -> chrono::DateTime<chrono::Utc> {
    parse_date("2024-06-01T00:00:00Z").unwrap()
}

/// An empty graph with the well-known fields, generated on 2024-06-01.
pub fn test_graph() -> Graph {
    let options = GraphOptions {
        generation_time: generation_time(),
        draft: false,
        site_root: "/".to_string(),
    };
    Graph::new(options, Arc::new(MetadataRegistry::with_well_known()))
}

struct TextRenderer;

impl PageRenderer for TextRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let graph = ctx.graph;
        let body = graph.page(page).body.clone().unwrap_or_default();
        Ok(html_page(
            graph,
            page,
            html! { h1 { (page_title(graph, page)) } pre { (body) } },
        ))
    }
}

/// A page type that renders its body as preformatted text.
pub fn text_page_type() -> Arc<PageType> {
    Arc::new(PageType::new("text", TextRenderer))
}

// =========================================================================
// Graph lookups, panicking with a clear message on miss
// =========================================================================

/// All build paths in the graph, sorted.
pub fn build_paths(graph: &Graph) -> Vec<String> {
    let mut paths: Vec<String> = graph
        .pages()
        .map(|(_, p)| p.build_path().to_string())
        .collect();
    paths.sort();
    paths
}

/// Find a page by build path. Panics if not found.
pub fn find_page(graph: &Graph, build_path: &str) -> PageId {
    graph
        .pages()
        .find(|(_, p)| p.build_path() == build_path)
        .map(|(id, _)| id)
        .unwrap_or_else(|| {
            let paths = build_paths(graph);
            panic!("page '{build_path}' not found. Available: {paths:?}")
        })
}

/// Read a file below `root` to a string. Panics with the path on failure.
pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel))
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", root.join(rel).display()))
}
