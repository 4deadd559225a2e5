//! Output writing and reconciliation.
//!
//! Renders every page of a finished graph into the output directory and
//! removes whatever a previous run left there that this run did not
//! produce.
//!
//! ## Steps
//!
//! 1. Scan the output root (symlinks not followed, hidden entries included)
//!    into a set of existing paths.
//! 2. Render pages grouped by `(render_order, page type)`, each group in
//!    parallel on the rayon pool. Groups only shape the timing report.
//! 3. Write results one by one. Unchanged files are left alone so their
//!    modification times survive; every produced path leaves the existing
//!    set.
//! 4. Delete the paths still in the set, then remove empty directories
//!    bottom-up. The output root itself is never removed.
//!
//! A page that fails to render is logged and its previous output kept.
//! Deleting is best-effort: anything that cannot be removed stays.

use crate::cache::{CacheStats, Caches};
use crate::node::{Graph, PageId};
use crate::render::{RenderContext, RenderError, Rendered};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use walkdir::WalkDir;

/// Marker written to the output root so that an output directory inside
/// the content tree is not scanned as content.
pub const OUTPUT_MARKER: &str = ".sitegraph";
const OUTPUT_MARKER_CONTENT: &str = "skip: yes\n";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Render time of one page type.
#[derive(Debug, Clone)]
pub struct TypeTiming {
    pub page_type: &'static str,
    pub render_order: i32,
    pub pages: usize,
    pub elapsed: Duration,
}

/// What a build did to the output directory.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Files created or replaced.
    pub written: usize,
    /// Files that already had the right content.
    pub unchanged: usize,
    /// Stale files removed.
    pub deleted: usize,
    /// Pages that failed to render.
    pub failed: usize,
    pub timings: Vec<TypeTiming>,
    pub cache: CacheStats,
}

enum Outcome {
    Written,
    Unchanged,
}

/// Render `graph` into `output`.
pub fn write(graph: &Graph, output: &Path, caches: &Caches) -> Result<BuildReport, BuildError> {
    fs::create_dir_all(output).map_err(io_err(output))?;
    let mut existing = existing_paths(output);
    tracing::debug!("{} files in {}", existing.len(), output.display());

    let marker = output.join(OUTPUT_MARKER);
    write_if_changed(&marker, OUTPUT_MARKER_CONTENT.as_bytes())?;
    existing.remove(&marker);

    let mut groups: BTreeMap<(i32, &'static str), Vec<PageId>> = BTreeMap::new();
    for (id, page) in graph.pages() {
        groups
            .entry((page.page_type.render_order, page.type_name()))
            .or_default()
            .push(id);
    }

    let mut report = BuildReport::default();
    for ((render_order, page_type), ids) in groups {
        let start = Instant::now();
        let ctx = RenderContext {
            graph,
            caches,
            stats: &report.cache,
        };
        let results: Vec<(PageId, Result<Rendered, RenderError>)> = ids
            .par_iter()
            .map(|id| {
                let renderer = &graph.page(*id).page_type.renderer;
                (*id, renderer.render(&ctx, *id))
            })
            .collect();
        let elapsed = start.elapsed();
        tracing::info!(
            "rendered {} {} page(s) in {:.2?}",
            ids.len(),
            page_type,
            elapsed
        );
        report.timings.push(TypeTiming {
            page_type,
            render_order,
            pages: ids.len(),
            elapsed,
        });

        for (id, result) in results {
            let target = output.join(graph.page(id).build_path());
            existing.remove(&target);
            let rendered = match result {
                Ok(rendered) => rendered,
                Err(e) => {
                    tracing::warn!("{}: render failed, keeping old output: {}", target.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            prepare_target(output, &target)?;
            let outcome = match rendered {
                Rendered::Bytes(bytes) => write_if_changed(&target, &bytes)?,
                Rendered::Copy(src) => copy_if_changed(&src, &target)?,
            };
            match outcome {
                Outcome::Written => report.written += 1,
                Outcome::Unchanged => report.unchanged += 1,
            }
        }
    }

    report.deleted = delete_stale(existing);
    remove_empty_dirs(output);
    tracing::info!(
        "{} written, {} unchanged, {} deleted",
        report.written,
        report.unchanged,
        report.deleted
    );
    Ok(report)
}

/// Every non-directory entry below `root`.
fn existing_paths(root: &Path) -> HashSet<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("cannot scan output: {}", e);
                None
            }
        })
        .filter(|entry| !entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}

/// Make room for a file at `target`: files standing where a directory is
/// needed and a directory standing at `target` are removed.
fn prepare_target(root: &Path, target: &Path) -> Result<(), BuildError> {
    if let Some(parent) = target.parent() {
        let blockers: Vec<&Path> = parent
            .ancestors()
            .take_while(|a| *a != root)
            .filter(|a| fs::symlink_metadata(a).is_ok_and(|m| !m.is_dir()))
            .collect();
        for blocker in blockers {
            tracing::debug!("{}: removing file in the way", blocker.display());
            fs::remove_file(blocker).map_err(io_err(blocker))?;
        }
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    if fs::symlink_metadata(target).is_ok_and(|m| m.is_dir()) {
        tracing::debug!("{}: removing directory in the way", target.display());
        fs::remove_dir_all(target).map_err(io_err(target))?;
    }
    Ok(())
}

fn write_if_changed(target: &Path, bytes: &[u8]) -> Result<Outcome, BuildError> {
    if fs::read(target).is_ok_and(|current| current == bytes) {
        return Ok(Outcome::Unchanged);
    }
    fs::write(target, bytes).map_err(io_err(target))?;
    Ok(Outcome::Written)
}

/// Copy when the target is missing, differs in size, or is older than the
/// source.
fn copy_if_changed(src: &Path, target: &Path) -> Result<Outcome, BuildError> {
    let src_meta = fs::metadata(src).map_err(io_err(src))?;
    if let Ok(dst_meta) = fs::metadata(target) {
        let newer = match (src_meta.modified(), dst_meta.modified()) {
            (Ok(s), Ok(d)) => s > d,
            _ => true,
        };
        if dst_meta.len() == src_meta.len() && !newer {
            return Ok(Outcome::Unchanged);
        }
    }
    fs::copy(src, target).map_err(io_err(target))?;
    Ok(Outcome::Written)
}

fn delete_stale(paths: HashSet<PathBuf>) -> usize {
    let mut deleted = 0;
    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("{}: deleted", path.display());
                deleted += 1;
            }
            Err(e) => tracing::debug!("{}: not deleted: {}", path.display(), e),
        }
    }
    deleted
}

fn remove_empty_dirs(root: &Path) {
    for entry in WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
    {
        // Fails on non-empty directories, which is the point
        if fs::remove_dir(entry.path()).is_ok() {
            tracing::debug!("{}: removed empty directory", entry.path().display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{File, FileStat};
    use crate::front_matter::MetaMap;
    use crate::node::{NewPage, Phase};
    use crate::render::{PageRenderer, PageType, asset_page_type};
    use crate::site_path::SitePath;
    use crate::test_helpers::{meta_map, read, source_file, test_graph, text_page_type, write_tree};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn text(graph: &mut Graph, path: &str, body: &str) -> PageId {
        let root = graph.root();
        let sub = SitePath::from_string(path);
        let new = NewPage::new(text_page_type(), meta_map(json!({"title": path})))
            .source(source_file(&format!("{path}.md")))
            .body(body.to_string());
        graph.create_index_page(root, Some(&sub), new).unwrap().unwrap()
    }

    fn render_phase(graph: &mut Graph) {
        graph.set_phase(Phase::Render);
    }

    // =========================================================================
    // Writing
    // =========================================================================

    #[test]
    fn writes_pages_and_marker() {
        let tmp = TempDir::new().unwrap();
        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        text(&mut graph, "a", "hello");
        render_phase(&mut graph);

        let report = write(&graph, tmp.path(), &Caches::disabled()).unwrap();
        assert_eq!(report.written, 1);
        assert!(read(tmp.path(), "a/index.html").contains("hello"));
        assert_eq!(read(tmp.path(), OUTPUT_MARKER), "skip: yes\n");
        assert_eq!(report.timings.len(), 1);
        assert_eq!(report.timings[0].page_type, "text");
    }

    #[test]
    fn second_write_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        text(&mut graph, "a", "hello");
        text(&mut graph, "b", "world");
        render_phase(&mut graph);

        write(&graph, tmp.path(), &Caches::disabled()).unwrap();
        let before = read(tmp.path(), "b/index.html");
        let report = write(&graph, tmp.path(), &Caches::disabled()).unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.deleted, 0);
        assert_eq!(read(tmp.path(), "b/index.html"), before);
    }

    #[test]
    fn assets_are_copied_once() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_tree(src.path(), &[("logo.png", "PNG")]);
        let root_file = File::root(src.path()).unwrap();
        let stat = FileStat::from_metadata(&fs::metadata(src.path().join("logo.png")).unwrap());
        let logo = root_file.child("logo.png", Some(stat));

        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        let root = graph.root();
        graph
            .create_leaf_page(
                root,
                "logo.png",
                NewPage::new(asset_page_type(), MetaMap::new()).source(logo),
            )
            .unwrap()
            .unwrap();
        render_phase(&mut graph);

        let first = write(&graph, out.path(), &Caches::disabled()).unwrap();
        assert_eq!(first.written, 1);
        assert_eq!(read(out.path(), "logo.png"), "PNG");
        let second = write(&graph, out.path(), &Caches::disabled()).unwrap();
        assert_eq!(second.unchanged, 1);
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    #[test]
    fn stale_output_is_removed_but_root_stays() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("web");
        write_tree(
            &out,
            &[("a/index.html", "old"), ("stale/index.html", "old"), (".hidden", "x")],
        );
        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        text(&mut graph, "a", "new");
        render_phase(&mut graph);

        let report = write(&graph, &out, &Caches::disabled()).unwrap();
        assert_eq!(report.deleted, 2);
        assert!(read(&out, "a/index.html").contains("new"));
        assert!(!out.join("stale").exists());
        assert!(!out.join(".hidden").exists());

        // An empty graph leaves an output root holding only the marker
        let mut empty = test_graph();
        render_phase(&mut empty);
        write(&empty, &out, &Caches::disabled()).unwrap();
        assert!(out.is_dir());
        assert!(!out.join("a").exists());
    }

    #[test]
    fn file_in_the_way_of_a_directory_is_replaced() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a", "was a file")]);
        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        text(&mut graph, "a", "page");
        render_phase(&mut graph);

        write(&graph, tmp.path(), &Caches::disabled()).unwrap();
        assert!(read(tmp.path(), "a/index.html").contains("page"));
    }

    struct Failing;

    impl PageRenderer for Failing {
        fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
            Err(RenderError::Page {
                path: ctx.graph.page(page).build_path().to_string(),
                reason: "broken".into(),
            })
        }
    }

    #[test]
    fn failed_render_keeps_previous_output() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("bad/index.html", "previous")]);
        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        let root = graph.root();
        let failing = Arc::new(PageType::new("failing", Failing));
        graph
            .create_index_page(
                root,
                Some(&SitePath::from_string("bad")),
                NewPage::new(failing, MetaMap::new()).source(source_file("bad.md")),
            )
            .unwrap()
            .unwrap();
        render_phase(&mut graph);

        let report = write(&graph, tmp.path(), &Caches::disabled()).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(read(tmp.path(), "bad/index.html"), "previous");
    }

    #[test]
    fn timings_follow_render_order() {
        let tmp = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        write_tree(src.path(), &[("a.css", "body{}")]);
        let root_file = File::root(src.path()).unwrap();
        let stat = FileStat::from_metadata(&fs::metadata(src.path().join("a.css")).unwrap());

        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        text(&mut graph, "a", "x");
        let root = graph.root();
        graph
            .create_leaf_page(
                root,
                "a.css",
                NewPage::new(asset_page_type(), MetaMap::new())
                    .source(root_file.child("a.css", Some(stat))),
            )
            .unwrap()
            .unwrap();
        render_phase(&mut graph);

        let report = write(&graph, tmp.path(), &Caches::disabled()).unwrap();
        let types: Vec<&str> = report.timings.iter().map(|t| t.page_type).collect();
        assert_eq!(types, vec!["asset", "text"]);
    }
}
