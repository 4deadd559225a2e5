//! Markdown pages.
//!
//! Every `*.md` file becomes a page. `index.md` is the index page of its
//! directory; any other `name.md` is the index page of a child node
//! `name/`, so `blog/post.md` is published at `blog/post/`.
//!
//! Front matter (JSON, `---` YAML or `+++` TOML) is merged over the
//! metadata inherited from the directory. The front matter of `index.md`
//! also contributes to the directory's own metadata. Without a `title`,
//! the first `# ` heading is used.
//!
//! Internal links and image sources are rewritten to the URL of the page
//! they point at, resolved from the directory the file was found in:
//! `[post](post.md)` and `[post](post)` both become `/blog/post/`. Links
//! with a scheme, protocol-relative links and fragments are left alone.
//!
//! Rendered HTML goes through the `markdown` render cache, keyed by source
//! path and invalidated by mtime or by any rewritten link changing target.

use super::{Feature, FeatureError, PendingFiles};
use crate::cache::CachedEntry;
use crate::front_matter::{MetaMap, read_partial};
use crate::node::{Graph, NewPage, NodeId, PageId};
use crate::render::{PageRenderer, PageType, RenderContext, RenderError, Rendered, html_page};
use crate::scan::{DirView, SourceDir};
use crate::site_path::SitePath;
use maud::{PreEscaped, html};
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html as md_html};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

pub const MARKDOWN: &str = "markdown";
const EXTENSION: &str = ".md";
const INDEX: &str = "index.md";

static SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").expect("valid regex"));

pub struct MarkdownFeature {
    page_type: Arc<PageType>,
    /// `index.md` text read while scanning, keyed by absolute path.
    index_text: HashMap<PathBuf, String>,
}

impl Default for MarkdownFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownFeature {
    pub fn new() -> Self {
        Self {
            page_type: markdown_page_type(),
            index_text: HashMap::new(),
        }
    }
}

pub fn markdown_page_type() -> Arc<PageType> {
    Arc::new(PageType::new(MARKDOWN, MarkdownRenderer).render_order(1))
}

impl Feature for MarkdownFeature {
    fn name(&self) -> &'static str {
        MARKDOWN
    }

    fn page_types(&self) -> Vec<Arc<PageType>> {
        vec![Arc::clone(&self.page_type)]
    }

    fn load_dir_meta(&mut self, dir: &DirView<'_>) -> Result<Option<MetaMap>, FeatureError> {
        let Some(index) = dir.file(INDEX).filter(|f| f.is_regular_file()) else {
            return Ok(None);
        };
        let text = match fs::read_to_string(&index.abspath) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("{}: {}", index.abspath.display(), e);
                return Ok(None);
            }
        };
        // Parse errors are reported when the file itself is loaded
        let meta = read_partial(&text).ok().map(|(_, meta, _)| meta);
        self.index_text.insert(index.abspath.clone(), text);
        Ok(meta)
    }

    fn load_dir(
        &mut self,
        graph: &mut Graph,
        node: NodeId,
        _dir: &SourceDir,
        pending: &mut PendingFiles,
    ) -> Result<Vec<PageId>, FeatureError> {
        let names: Vec<String> = pending
            .iter()
            .filter(|(name, sf)| name.ends_with(EXTENSION) && sf.file.is_regular_file())
            .map(|(name, _)| name.clone())
            .collect();

        let mut pages = Vec::new();
        for name in names {
            let sf = &pending[&name];
            let cached = self.index_text.remove(&sf.file.abspath);
            let text = match cached.map_or_else(|| fs::read_to_string(&sf.file.abspath), Ok) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("{}: {}", sf.file.relpath, e);
                    continue;
                }
            };
            let (_, front, body) = match read_partial(&text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!("{}: cannot parse front matter: {}", sf.file.relpath, e);
                    continue;
                }
            };

            let mut meta = sf.meta.clone();
            meta.extend(front);
            if !meta.contains_key("title")
                && let Some(title) = first_heading(body)
            {
                meta.insert("title".into(), Value::String(title));
            }
            meta.entry("indexed").or_insert(Value::Bool(true));

            let new = NewPage::new(Arc::clone(&self.page_type), meta)
                .source(sf.file.clone())
                .body(body.to_string());
            let created = if name == INDEX {
                graph.create_index_page(node, None, new)?
            } else {
                let stem = SitePath::from_string(name.trim_end_matches(EXTENSION));
                graph.create_index_page(node, Some(&stem), new)?
            };
            // Claimed even when skipped as a draft or collision
            pending.remove(&name);
            pages.extend(created);
        }
        Ok(pages)
    }
}

/// Text of the first `# ` heading.
fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .find(|line| line.starts_with("# "))
        .map(|line| line.trim_start_matches("# ").trim().to_string())
        .filter(|title| !title.is_empty())
}

fn is_internal(url: &str) -> bool {
    !url.is_empty() && !url.starts_with('#') && !url.starts_with("//") && !SCHEME.is_match(url)
}

/// Rewrite an internal link written in `page`. `None` if the target does
/// not resolve.
fn resolve_link(graph: &Graph, page: PageId, url: &str) -> Option<String> {
    let split = url.find(['#', '?']).unwrap_or(url.len());
    let (path, suffix) = url.split_at(split);
    if path.is_empty() {
        return Some(url.to_string());
    }
    let target = graph.resolve_path(page, path)?;
    Some(format!("{}{}", graph.url_for(target), suffix))
}

fn rewrite(graph: &Graph, page: PageId, url: &str) -> String {
    resolve_link(graph, page, url).unwrap_or_else(|| url.to_string())
}

/// Markdown to HTML, plus `(written, rewritten)` for every internal link.
pub fn render_markdown(graph: &Graph, page: PageId, body: &str) -> (String, Vec<(String, String)>) {
    let mut links = Vec::new();
    let mut rewrite_dest = |dest: CowStr<'_>| -> String {
        if !is_internal(&dest) {
            return dest.to_string();
        }
        let rewritten = match resolve_link(graph, page, &dest) {
            Some(url) => url,
            None => {
                tracing::warn!(
                    "{}: unresolved link '{}'",
                    graph.page(page).build_path(),
                    dest
                );
                dest.to_string()
            }
        };
        links.push((dest.to_string(), rewritten.clone()));
        rewritten
    };

    let options = Options::ENABLE_TABLES | Options::ENABLE_FOOTNOTES | Options::ENABLE_STRIKETHROUGH;
    let events = Parser::new_ext(body, options).map(|event| match event {
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: rewrite_dest(dest_url).into(),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: rewrite_dest(dest_url).into(),
            title,
            id,
        }),
        other => other,
    });
    let mut html = String::new();
    md_html::push_html(&mut html, events);
    (html, links)
}

struct MarkdownRenderer;

impl PageRenderer for MarkdownRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let graph = ctx.graph;
        let p = graph.page(page);
        let body = p.body.as_deref().unwrap_or_default();
        let (key, mtime) = match &p.source {
            Some(src) => (src.relpath.clone(), src.mtime().unwrap_or(0)),
            None => (p.build_path().to_string(), 0),
        };

        let cache = ctx.caches.get(MARKDOWN);
        let cached = cache
            .get(&key)
            .filter(|entry| entry.is_valid(mtime, |url| rewrite(graph, page, url)));
        let rendered = match cached {
            Some(entry) => {
                ctx.stats.hit();
                entry.rendered
            }
            None => {
                ctx.stats.miss();
                let (rendered, links) = render_markdown(graph, page, body);
                cache.put(
                    &key,
                    &CachedEntry {
                        mtime,
                        rendered: rendered.clone(),
                        links,
                    },
                );
                rendered
            }
        };

        let content = html! {
            article.markdown { (PreEscaped(rendered)) }
        };
        Ok(html_page(graph, page, content))
    }
}
