//! Tag taxonomy.
//!
//! Pages list their tags in `tags:`. The organize pass creates one page per
//! tag at `<taxonomy>/<slug>/` and an index of all tags at `<taxonomy>/`.
//! Listings are sorted newest first in the finalize pass, once every date
//! is settled.

use super::{Feature, FeatureError};
use crate::fields::{FieldDef, FieldType, format_date};
use crate::front_matter::MetaMap;
use crate::metadata::MetadataEntry;
use crate::node::{Graph, GraphError, NewPage, Page, PageId};
use crate::render::{
    PageRenderer, PageType, RenderContext, RenderError, Rendered, html_page, listing, page_title,
};
use crate::site_path::SitePath;
use chrono::{DateTime, Utc};
use maud::html;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TAG_INDEX: &str = "tag-index";
pub const TAG: &str = "tag";

/// Maximum length of a tag slug.
const MAX_SLUG_LEN: usize = 80;

/// URL-safe form of a tag: lowercase ASCII alphanumerics separated by
/// single dashes, truncated at a dash boundary.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();

    let mut collapsed = String::with_capacity(slug.len());
    let mut prev_dash = false;
    for c in slug.chars() {
        if c == '-' {
            if !prev_dash {
                collapsed.push('-');
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }

    let trimmed = collapsed.trim_matches('-');
    if trimmed.len() <= MAX_SLUG_LEN {
        trimmed.to_string()
    } else {
        let truncated = &trimmed[..MAX_SLUG_LEN];
        match truncated.rfind('-') {
            Some(pos) => truncated[..pos].to_string(),
            None => truncated.to_string(),
        }
    }
}

pub struct TagsFeature {
    path: SitePath,
    index_type: Arc<PageType>,
    tag_type: Arc<PageType>,
    index: Option<PageId>,
    tags: Vec<PageId>,
}

impl TagsFeature {
    /// Tag pages are published under `path`, relative to the site root.
    pub fn new(path: &str) -> Self {
        Self {
            path: SitePath::from_string(path),
            index_type: Arc::new(PageType::new(TAG_INDEX, TagIndexRenderer).render_order(2)),
            tag_type: Arc::new(PageType::new(TAG, TagRenderer).render_order(2)),
            index: None,
            tags: Vec::new(),
        }
    }
}

impl Feature for TagsFeature {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn run_after(&self) -> &[&'static str] {
        &["markdown"]
    }

    fn metadata(&self) -> Vec<MetadataEntry> {
        vec![MetadataEntry::new(
            FieldDef::new("tags", FieldType::StringList)
                .structured()
                .doc("Tags of the page. A single string is a one-tag list."),
        )]
    }

    fn page_types(&self) -> Vec<Arc<PageType>> {
        vec![Arc::clone(&self.index_type), Arc::clone(&self.tag_type)]
    }

    fn organize(&mut self, graph: &mut Graph) -> Result<(), FeatureError> {
        // slug -> (name as first written, pages)
        let mut by_slug: BTreeMap<String, (String, Vec<PageId>)> = BTreeMap::new();
        for (id, page) in graph.pages() {
            for tag in page.meta.string_list("tags") {
                let slug = slugify(&tag);
                if slug.is_empty() {
                    tracing::warn!("{}: ignoring tag {:?}", page.build_path(), tag);
                    continue;
                }
                let entry = by_slug.entry(slug).or_insert_with(|| (tag, Vec::new()));
                if !entry.1.contains(&id) {
                    entry.1.push(id);
                }
            }
        }
        if by_slug.is_empty() {
            return Ok(());
        }

        let root = graph.root();
        let mut meta = MetaMap::new();
        meta.insert("title".into(), Value::String("Tags".into()));
        self.index = graph.create_index_page(
            root,
            Some(&self.path),
            NewPage::new(Arc::clone(&self.index_type), meta),
        )?;

        for (slug, (name, pages)) in by_slug {
            let mut meta = MetaMap::new();
            meta.insert("title".into(), Value::String(name));
            let path = self.path.join(&slug);
            let new = NewPage::new(Arc::clone(&self.tag_type), meta);
            if let Some(id) = graph.create_index_page(root, Some(&path), new)? {
                graph.page_mut(id).listing = pages;
                self.tags.push(id);
            }
        }
        if let Some(index) = self.index {
            graph.page_mut(index).listing = self.tags.clone();
        }
        tracing::debug!("created {} tag pages", self.tags.len());
        Ok(())
    }

    fn finalize(&mut self, graph: &mut Graph) -> Result<(), FeatureError> {
        let mut newest_overall = None;
        for &tag in &self.tags {
            let mut listing = std::mem::take(&mut graph.page_mut(tag).listing);
            listing.sort_by(|a, b| {
                let da = graph.page(*a).meta.date("date");
                let db = graph.page(*b).meta.date("date");
                db.cmp(&da).then(a.cmp(b))
            });
            let newest = listing.first().and_then(|id| graph.page(*id).meta.date("date"));
            let page = graph.page_mut(tag);
            page.listing = listing;
            if let Some(date) = newest {
                set_date(page, date)?;
                newest_overall = newest_overall.max(Some(date));
            }
        }
        if let (Some(index), Some(date)) = (self.index, newest_overall) {
            set_date(graph.page_mut(index), date)?;
        }
        Ok(())
    }
}

pub(super) fn set_date(page: &mut Page, date: DateTime<Utc>) -> Result<(), GraphError> {
    page.meta
        .set("date", Value::String(format_date(&date)))
        .map_err(|source| GraphError::Field {
            path: page.build_path().to_string(),
            source,
        })
}

struct TagIndexRenderer;

impl PageRenderer for TagIndexRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let graph = ctx.graph;
        let content = html! {
            h1 { (page_title(graph, page)) }
            ul.tags {
                @for id in &graph.page(page).listing {
                    li {
                        a href=(graph.url_for(*id)) { (page_title(graph, *id)) }
                        " (" (graph.page(*id).listing.len()) ")"
                    }
                }
            }
        };
        Ok(html_page(graph, page, content))
    }
}

struct TagRenderer;

impl PageRenderer for TagRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let graph = ctx.graph;
        let content = html! {
            h1 { "Tagged " (page_title(graph, page)) }
            (listing(graph, &graph.page(page).listing))
        };
        Ok(html_page(graph, page, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataRegistry;
    use crate::node::{GraphOptions, Phase};
    use crate::test_helpers::{meta_map, source_file, text_page_type};
    use serde_json::json;

    // =========================================================================
    // slugify
    // =========================================================================

    #[test]
    fn slugify_lowercases_and_dashes() {
        assert_eq!(slugify("Rust Lang"), "rust-lang");
        assert_eq!(slugify("C++ & Rust!"), "c-rust");
        assert_eq!(slugify("  --a---b--  "), "a-b");
    }

    #[test]
    fn slugify_drops_non_ascii() {
        assert_eq!(slugify("café"), "caf");
        assert_eq!(slugify("日本語"), "");
    }

    #[test]
    fn slugify_truncates_at_dash() {
        let long = "word-".repeat(30);
        let slug = slugify(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    // =========================================================================
    // Organize / finalize
    // =========================================================================

    fn graph_with_posts(posts: &[(&str, Value, &str)]) -> (Graph, Vec<PageId>) {
        let mut registry = MetadataRegistry::with_well_known();
        for entry in TagsFeature::new("tags").metadata() {
            registry.register(entry);
        }
        let mut graph = Graph::new(GraphOptions::default(), Arc::new(registry));
        graph.set_phase(Phase::Load);
        let root = graph.root();
        let ids = posts
            .iter()
            .map(|(name, tags, date)| {
                let new = NewPage::new(
                    text_page_type(),
                    meta_map(json!({"title": name, "tags": tags, "date": date})),
                )
                .source(source_file(&format!("{name}.md")));
                graph
                    .create_index_page(root, Some(&SitePath::from_string(name)), new)
                    .unwrap()
                    .unwrap()
            })
            .collect();
        graph.set_phase(Phase::Organize);
        (graph, ids)
    }

    fn lookup(graph: &Graph, path: &str) -> Option<PageId> {
        graph.lookup_page(graph.root(), &SitePath::from_string(path))
    }

    #[test]
    fn creates_index_and_one_page_per_tag() {
        let (mut graph, ids) = graph_with_posts(&[
            ("a", json!(["Rust", "web"]), "2024-01-01"),
            ("b", json!("rust"), "2024-02-01"),
        ]);
        let mut tags = TagsFeature::new("tags");
        tags.organize(&mut graph).unwrap();

        let index = lookup(&graph, "tags").unwrap();
        assert_eq!(graph.page(index).type_name(), TAG_INDEX);
        assert_eq!(graph.page(index).listing.len(), 2);

        let rust = lookup(&graph, "tags/rust").unwrap();
        // First spelling names the tag
        assert_eq!(graph.page(rust).meta.str("title"), Some("Rust"));
        assert_eq!(graph.page(rust).listing, vec![ids[0], ids[1]]);
        assert!(lookup(&graph, "tags/web").is_some());
    }

    #[test]
    fn finalize_sorts_newest_first_and_dates_pages() {
        let (mut graph, ids) = graph_with_posts(&[
            ("old", json!(["x"]), "2023-01-01"),
            ("new", json!(["x"]), "2024-03-01"),
        ]);
        let mut tags = TagsFeature::new("tags");
        tags.organize(&mut graph).unwrap();
        graph.set_phase(Phase::Finalize);
        tags.finalize(&mut graph).unwrap();

        let x = lookup(&graph, "tags/x").unwrap();
        assert_eq!(graph.page(x).listing, vec![ids[1], ids[0]]);
        assert_eq!(graph.page(x).meta.str("date"), Some("2024-03-01T00:00:00Z"));
        let index = lookup(&graph, "tags").unwrap();
        assert_eq!(graph.page(index).meta.str("date"), Some("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn no_tags_no_pages() {
        let (mut graph, _) = graph_with_posts(&[("a", Value::Null, "2024-01-01")]);
        TagsFeature::new("tags").organize(&mut graph).unwrap();
        assert!(graph.child(graph.root(), "tags").is_none());
    }

    #[test]
    fn nested_taxonomy_path() {
        let (mut graph, _) = graph_with_posts(&[("a", json!(["x"]), "2024-01-01")]);
        TagsFeature::new("topics/all").organize(&mut graph).unwrap();
        assert!(lookup(&graph, "topics/all/x").is_some());
    }
}
