//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every page leads with what it is (output path, page type, title); the
//! source it came from is shown as an indented `Source:` context line. The
//! tree follows the node hierarchy, so the listing reads as the site's
//! table of contents.
//!
//! # Output Format
//!
//! ## Tree (`check`)
//!
//! ```text
//! / → index.html [markdown] Home
//!     Source: index.md
//!     001 logo.png [asset]
//!         Source: logo.png
//!     blog/ → blog/index.html [dir] blog
//!         first/ → blog/first/index.html [markdown] First
//!             Source: blog/first.md
//!
//! 4 pages
//! ```
//!
//! ## Build
//!
//! ```text
//! Rendered
//!     asset: 1 page in 120µs
//!     markdown: 2 pages in 3.10ms
//! Output: 2 written, 1 unchanged, 0 deleted
//! Cache: 1 cached, 1 rendered (2 total)
//! ```
//!
//! # Architecture
//!
//! Each display has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure.

use crate::builder::BuildReport;
use crate::features::Features;
use crate::node::{Graph, NodeId, PageId};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate_desc(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

/// `build_path [type] title`
fn page_label(graph: &Graph, page: PageId) -> String {
    let p = graph.page(page);
    match p.meta.str("title") {
        Some(title) if !title.is_empty() => {
            format!("{} [{}] {}", p.build_path(), p.type_name(), title)
        }
        _ => format!("{} [{}]", p.build_path(), p.type_name()),
    }
}

/// Context lines of a page, one level below `depth`.
fn page_context(graph: &Graph, page: PageId, depth: usize, lines: &mut Vec<String>) {
    let p = graph.page(page);
    if let Some(src) = &p.source
        && src.is_regular_file()
    {
        lines.push(format!("{}Source: {}", indent(depth + 1), src.relpath));
    }
    if let Some(from) = p.created_from {
        lines.push(format!(
            "{}From: {}",
            indent(depth + 1),
            graph.page(from).build_path()
        ));
    }
    if let Some(desc) = p.meta.str("description") {
        lines.push(format!(
            "{}Description: {}",
            indent(depth + 1),
            truncate_desc(desc, 60)
        ));
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Format the node/page tree of a loaded graph.
pub fn format_tree(graph: &Graph) -> Vec<String> {
    let mut lines = Vec::new();
    format_node(graph, graph.root(), 0, &mut lines);
    lines.push(String::new());
    lines.push(plural(graph.page_count(), "page"));
    lines
}

fn format_node(graph: &Graph, node: NodeId, depth: usize, lines: &mut Vec<String>) {
    let n = graph.node(node);
    let name = if n.parent.is_none() {
        "/".to_string()
    } else {
        format!("{}/", n.name)
    };
    match n.page {
        Some(page) => {
            lines.push(format!("{}{} → {}", indent(depth), name, page_label(graph, page)));
            page_context(graph, page, depth, lines);
        }
        None => lines.push(format!("{}{}", indent(depth), name)),
    }

    let leaves = n
        .build_pages
        .iter()
        .filter(|(dst, id)| dst.as_str() != "index.html" || n.page != Some(**id));
    for (pos, (dst, &page)) in leaves.enumerate() {
        let p = graph.page(page);
        lines.push(format!(
            "{}{} {} [{}]",
            indent(depth + 1),
            format_index(pos + 1),
            dst,
            p.type_name()
        ));
        page_context(graph, page, depth + 1, lines);
    }

    for child in n.sub.values() {
        format_node(graph, *child, depth + 1, lines);
    }
}

pub fn print_tree(graph: &Graph) {
    for line in format_tree(graph) {
        println!("{}", line);
    }
}

// ============================================================================
// Features
// ============================================================================

/// Format the committed feature order with the page types each provides.
pub fn format_features(features: &Features) -> Vec<String> {
    let mut lines = vec!["Features".to_string()];
    for (pos, feature) in features.ordered().enumerate() {
        let types: Vec<&str> = feature.page_types().iter().map(|t| t.name).collect();
        if types.is_empty() {
            lines.push(format!("{} {}", format_index(pos + 1), feature.name()));
        } else {
            lines.push(format!(
                "{} {} ({})",
                format_index(pos + 1),
                feature.name(),
                types.join(", ")
            ));
        }
    }
    lines
}

pub fn print_features(features: &Features) {
    for line in format_features(features) {
        println!("{}", line);
    }
}

// ============================================================================
// Build
// ============================================================================

/// Format the result of writing a site.
pub fn format_build_report(report: &BuildReport) -> Vec<String> {
    let mut lines = vec!["Rendered".to_string()];
    for timing in &report.timings {
        lines.push(format!(
            "{}{}: {} in {:.2?}",
            indent(1),
            timing.page_type,
            plural(timing.pages, "page"),
            timing.elapsed
        ));
    }
    lines.push(format!(
        "Output: {} written, {} unchanged, {} deleted",
        report.written, report.unchanged, report.deleted
    ));
    if report.failed > 0 {
        lines.push(format!("Failed: {}", plural(report.failed, "page")));
    }
    if report.cache.total() > 0 {
        lines.push(format!("Cache: {}", report.cache));
    }
    lines
}

pub fn print_build_report(report: &BuildReport) {
    for line in format_build_report(report) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TypeTiming;
    use crate::config::Settings;
    use crate::features::default_features;
    use crate::front_matter::MetaMap;
    use crate::metadata::MetadataRegistry;
    use crate::node::{NewPage, Phase};
    use crate::render::{asset_page_type, dir_page_type};
    use crate::site_path::SitePath;
    use crate::test_helpers::{meta_map, source_file, test_graph, text_page_type};
    use serde_json::json;
    use std::time::Duration;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(100), "100");
    }

    #[test]
    fn truncate_desc_short() {
        assert_eq!(truncate_desc("Short text", 40), "Short text");
    }

    #[test]
    fn truncate_desc_long() {
        let text = "a".repeat(50);
        assert_eq!(truncate_desc(&text, 40), format!("{}...", "a".repeat(40)));
    }

    #[test]
    fn truncate_desc_respects_char_boundaries() {
        assert_eq!(truncate_desc("ééé", 2), "éé...");
    }

    #[test]
    fn plural_words() {
        assert_eq!(plural(1, "page"), "1 page");
        assert_eq!(plural(3, "page"), "3 pages");
    }

    // =========================================================================
    // Tree
    // =========================================================================

    #[test]
    fn tree_lists_nodes_pages_and_sources() {
        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        let root = graph.root();
        graph
            .create_index_page(
                root,
                None,
                NewPage::new(dir_page_type(), MetaMap::new()).source(source_file("")),
            )
            .unwrap();
        graph
            .create_leaf_page(
                root,
                "logo.png",
                NewPage::new(asset_page_type(), MetaMap::new()).source(source_file("logo.png")),
            )
            .unwrap();
        let blog = graph.ensure_child(root, "blog");
        graph
            .create_index_page(
                blog,
                Some(&SitePath::from_string("first")),
                NewPage::new(
                    text_page_type(),
                    meta_map(json!({"title": "First", "description": "About things"})),
                )
                .source(source_file("blog/first.md")),
            )
            .unwrap();

        let lines = format_tree(&graph);
        assert_eq!(lines[0], "/ → index.html [dir]");
        assert!(lines.contains(&"    001 logo.png [asset]".to_string()), "{lines:?}");
        assert!(lines.contains(&"        Source: logo.png".to_string()), "{lines:?}");
        assert!(lines.contains(&"    blog/".to_string()), "{lines:?}");
        assert!(
            lines.contains(&"        first/ → blog/first/index.html [text] First".to_string()),
            "{lines:?}"
        );
        assert!(lines.contains(&"            Source: blog/first.md".to_string()));
        assert!(lines.contains(&"            Description: About things".to_string()));
        assert_eq!(lines.last().unwrap(), "3 pages");
    }

    // =========================================================================
    // Features and build report
    // =========================================================================

    #[test]
    fn features_in_order_with_page_types() {
        let mut features = Features::new();
        for feature in default_features(&Settings::default()) {
            features.register(feature);
        }
        features.commit(&mut MetadataRegistry::with_well_known()).unwrap();
        let lines = format_features(&features);
        assert_eq!(
            lines,
            vec![
                "Features",
                "001 markdown (markdown)",
                "002 aliases (alias)",
                "003 tags (tag-index, tag)",
                "004 syndication (rss, atom)",
                "005 dirs",
            ]
        );
    }

    #[test]
    fn build_report_lines() {
        let report = BuildReport {
            written: 2,
            unchanged: 1,
            timings: vec![TypeTiming {
                page_type: "asset",
                render_order: 0,
                pages: 1,
                elapsed: Duration::from_millis(3),
            }],
            ..BuildReport::default()
        };
        report.cache.miss();
        let lines = format_build_report(&report);
        assert_eq!(lines[0], "Rendered");
        assert_eq!(lines[1], "    asset: 1 page in 3.00ms");
        assert_eq!(lines[2], "Output: 2 written, 1 unchanged, 0 deleted");
        assert_eq!(lines[3], "Cache: 1 rendered");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn build_report_shows_failures() {
        let report = BuildReport {
            failed: 1,
            ..BuildReport::default()
        };
        let lines = format_build_report(&report);
        assert!(lines.contains(&"Failed: 1 page".to_string()));
    }
}
