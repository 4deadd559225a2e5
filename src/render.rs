//! Page types and rendering primitives.
//!
//! A [`PageType`] names a kind of page, declares the extra fields it
//! understands, and carries the [`PageRenderer`] that turns a page into
//! output. The graph is read-only while rendering, so renderers take a
//! shared [`RenderContext`] and may run in parallel.
//!
//! Two page types belong to the core rather than to a feature: `asset`
//! (copied through unchanged) and `dir` (the synthesized directory index).
//! HTML is produced with Maud.

use crate::cache::{CacheStats, Caches};
use crate::fields::{FieldTable, Meta};
use crate::node::{Graph, PageId};
use maud::{DOCTYPE, Markup, html};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{path}: {reason}")]
    Page { path: String, reason: String },
}

/// Output of rendering one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Bytes(Vec<u8>),
    /// Copy this file unchanged.
    Copy(PathBuf),
}

pub struct RenderContext<'a> {
    pub graph: &'a Graph,
    pub caches: &'a Caches,
    pub stats: &'a CacheStats,
}

pub trait PageRenderer: Send + Sync {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError>;
}

pub type Validator = fn(&Meta) -> Result<(), String>;

pub struct PageType {
    pub name: &'static str,
    /// Groups pages for render timing; lower renders first.
    pub render_order: i32,
    pub fields: FieldTable,
    pub validator: Option<Validator>,
    pub renderer: Arc<dyn PageRenderer>,
}

impl fmt::Debug for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageType")
            .field("name", &self.name)
            .field("render_order", &self.render_order)
            .finish()
    }
}

impl PageType {
    pub fn new(name: &'static str, renderer: impl PageRenderer + 'static) -> Self {
        Self {
            name,
            render_order: 1,
            fields: FieldTable::new(),
            validator: None,
            renderer: Arc::new(renderer),
        }
    }

    pub fn render_order(mut self, order: i32) -> Self {
        self.render_order = order;
        self
    }

    pub fn fields(mut self, fields: FieldTable) -> Self {
        self.fields = fields;
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn is_asset(&self) -> bool {
        self.name == ASSET
    }
}

pub const ASSET: &str = "asset";
pub const DIR: &str = "dir";

// ============================================================================
// Core page types
// ============================================================================

struct AssetRenderer;

impl PageRenderer for AssetRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let p = ctx.graph.page(page);
        match &p.source {
            Some(src) => Ok(Rendered::Copy(src.abspath.clone())),
            None => Err(RenderError::Page {
                path: p.build_path().to_string(),
                reason: "asset page without a source file".into(),
            }),
        }
    }
}

pub fn asset_page_type() -> Arc<PageType> {
    Arc::new(PageType::new(ASSET, AssetRenderer).render_order(0))
}

struct DirRenderer;

impl PageRenderer for DirRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let graph = ctx.graph;
        let content = html! {
            h1 { (page_title(graph, page)) }
            (listing(graph, &graph.page(page).listing))
        };
        Ok(html_page(graph, page, content))
    }
}

pub fn dir_page_type() -> Arc<PageType> {
    Arc::new(PageType::new(DIR, DirRenderer).render_order(2))
}

// ============================================================================
// HTML components
// ============================================================================

/// Title of a page, falling back to the site name.
pub fn page_title(graph: &Graph, page: PageId) -> String {
    graph
        .meta_str(page, "title")
        .or_else(|| graph.meta_str(page, "site_name"))
        .unwrap_or_default()
}

/// Renders the base HTML document structure
pub fn base_document(title: &str, site_name: Option<&str>, home: &str, content: Markup) -> Markup {
    let full_title = match site_name {
        Some(site) if !site.is_empty() && site != title => format!("{} · {}", title, site),
        _ => title.to_string(),
    };
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (full_title) }
            }
            body {
                @if let Some(site) = site_name {
                    header.site-header { a href=(home) { (site) } }
                }
                main { (content) }
            }
        }
    }
}

/// Wrap `content` in the base document for `page`.
pub fn html_page(graph: &Graph, page: PageId, content: Markup) -> Rendered {
    let title = page_title(graph, page);
    let site_name = graph.meta_str(page, "site_name");
    let home = &graph.options().site_root;
    let doc = base_document(&title, site_name.as_deref(), home, content);
    Rendered::Bytes(doc.into_string().into_bytes())
}

/// A list of links to pages, with their dates.
pub fn listing(graph: &Graph, pages: &[PageId]) -> Markup {
    html! {
        @if !pages.is_empty() {
            ul.listing {
                @for id in pages {
                    li {
                        a href=(graph.url_for(*id)) { (page_title(graph, *id)) }
                        @if let Some(date) = graph.page(*id).meta.date("date") {
                            " "
                            time datetime=(date.to_rfc3339()) { (date.format("%Y-%m-%d").to_string()) }
                        }
                    }
                }
            }
        }
    }
}
