//! Redirects from old URLs.
//!
//! A page listing `aliases: [/old/path, other]` gets one redirect page per
//! entry, created in the organize pass. Entries are paths from the site
//! root, with or without the leading `/`. Entries with `.` or `..`
//! components, and entries naming a page that already exists, are skipped
//! with a warning.

use super::{Feature, FeatureError};
use crate::fields::{FieldDef, FieldType};
use crate::front_matter::MetaMap;
use crate::metadata::MetadataEntry;
use crate::node::{Graph, NewPage, PageId};
use crate::render::{PageRenderer, PageType, RenderContext, RenderError, Rendered, base_document};
use crate::site_path::SitePath;
use maud::html;
use serde_json::Value;
use std::sync::Arc;

pub const ALIAS: &str = "alias";

pub struct AliasesFeature {
    page_type: Arc<PageType>,
}

impl Default for AliasesFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasesFeature {
    pub fn new() -> Self {
        Self {
            page_type: Arc::new(PageType::new(ALIAS, AliasRenderer).render_order(3)),
        }
    }
}

impl Feature for AliasesFeature {
    fn name(&self) -> &'static str {
        "aliases"
    }

    fn run_after(&self) -> &[&'static str] {
        &["markdown"]
    }

    fn metadata(&self) -> Vec<MetadataEntry> {
        vec![MetadataEntry::new(
            FieldDef::new("aliases", FieldType::StringList)
                .structured()
                .doc("Other paths that redirect to this page."),
        )]
    }

    fn page_types(&self) -> Vec<Arc<PageType>> {
        vec![Arc::clone(&self.page_type)]
    }

    fn organize(&mut self, graph: &mut Graph) -> Result<(), FeatureError> {
        let wanted: Vec<(PageId, Vec<String>)> = graph
            .pages()
            .map(|(id, page)| (id, page.meta.string_list("aliases")))
            .filter(|(_, aliases)| !aliases.is_empty())
            .collect();

        let root = graph.root();
        let mut created = 0;
        for (id, aliases) in wanted {
            for alias in aliases {
                let path = SitePath::from_string(&alias);
                if path.is_empty() {
                    tracing::warn!("{}: ignoring empty alias", graph.page(id).build_path());
                    continue;
                }
                match graph.lookup_page(root, &path) {
                    Some(existing) if existing == id => {
                        tracing::warn!(
                            "{}: alias '{}' points to the page itself",
                            graph.page(id).build_path(),
                            alias
                        );
                        continue;
                    }
                    Some(existing) => {
                        tracing::warn!(
                            "{}: alias '{}' points to existing page {}",
                            graph.page(id).build_path(),
                            alias,
                            graph.page(existing).build_path()
                        );
                        continue;
                    }
                    None => {}
                }
                let mut meta = MetaMap::new();
                if let Some(title) = graph.page(id).meta.str("title") {
                    meta.insert("title".into(), Value::String(title.to_string()));
                }
                let new = NewPage::new(Arc::clone(&self.page_type), meta).created_from(id);
                if graph.create_index_page(root, Some(&path), new)?.is_some() {
                    created += 1;
                }
            }
        }
        if created > 0 {
            tracing::debug!("created {} redirect pages", created);
        }
        Ok(())
    }
}

struct AliasRenderer;

impl PageRenderer for AliasRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let graph = ctx.graph;
        let p = graph.page(page);
        let Some(target) = p.created_from else {
            return Err(RenderError::Page {
                path: p.build_path().to_string(),
                reason: "redirect without a target".into(),
            });
        };
        let url = graph.url_for(target);
        let title = p.meta.str("title").unwrap_or(&url).to_string();
        let doc = base_document(
            &title,
            None,
            &graph.options().site_root,
            html! {
                meta http-equiv="refresh" content=(format!("0; url={}", url));
                link rel="canonical" href=(url);
                p { "Moved to " a href=(url) { (url) } }
            },
        );
        Ok(Rendered::Bytes(doc.into_string().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, Caches};
    use crate::metadata::MetadataRegistry;
    use crate::node::{GraphOptions, Phase};
    use crate::test_helpers::{meta_map, source_file, text_page_type};
    use serde_json::json;

    fn graph_with_page(aliases: Value) -> (Graph, PageId) {
        let mut registry = MetadataRegistry::with_well_known();
        for entry in AliasesFeature::new().metadata() {
            registry.register(entry);
        }
        let mut graph = Graph::new(GraphOptions::default(), Arc::new(registry));
        graph.set_phase(Phase::Load);
        let root = graph.root();
        let blog = graph.ensure_child(root, "blog");
        let id = graph
            .create_index_page(
                blog,
                Some(&SitePath::from_string("post")),
                NewPage::new(
                    text_page_type(),
                    meta_map(json!({"title": "Post", "aliases": aliases})),
                )
                .source(source_file("blog/post.md")),
            )
            .unwrap()
            .unwrap();
        graph.set_phase(Phase::Organize);
        (graph, id)
    }

    fn lookup(graph: &Graph, path: &str) -> Option<PageId> {
        graph.lookup_page(graph.root(), &SitePath::from_string(path))
    }

    #[test]
    fn aliases_create_redirect_pages() {
        let (mut graph, post) = graph_with_page(json!(["/old/post", "renamed"]));
        AliasesFeature::new().organize(&mut graph).unwrap();

        let old = lookup(&graph, "old/post").unwrap();
        assert_eq!(graph.page(old).type_name(), ALIAS);
        assert_eq!(graph.page(old).created_from, Some(post));
        // Entries without a leading slash are still taken from the root
        let renamed = lookup(&graph, "renamed").unwrap();
        assert_eq!(graph.page(renamed).created_from, Some(post));
        assert!(lookup(&graph, "blog/post/renamed").is_none());
    }

    #[test]
    fn dotted_aliases_are_skipped() {
        let (mut graph, _) = graph_with_page(json!(["../../moved", "/a/./b", "/ok"]));
        let pages = graph.page_count();
        AliasesFeature::new().organize(&mut graph).unwrap();

        assert_eq!(graph.page_count(), pages + 1);
        assert!(lookup(&graph, "ok").is_some());
        for node in graph.walk(graph.root()) {
            let name = &graph.node(node).name;
            assert!(name != ".." && name != ".", "node named {name:?}");
        }
        let paths: Vec<String> = graph.pages().map(|(_, p)| p.build_path().to_string()).collect();
        assert!(paths.iter().all(|p| !p.contains("..")), "{paths:?}");
    }

    #[test]
    fn single_string_alias_is_accepted() {
        let (mut graph, _) = graph_with_page(json!("/legacy"));
        AliasesFeature::new().organize(&mut graph).unwrap();
        assert!(lookup(&graph, "legacy").is_some());
    }

    #[test]
    fn alias_to_itself_is_skipped() {
        let (mut graph, post) = graph_with_page(json!(["/blog/post"]));
        let pages = graph.page_count();
        AliasesFeature::new().organize(&mut graph).unwrap();
        assert_eq!(lookup(&graph, "blog/post"), Some(post));
        assert_eq!(graph.page_count(), pages);
    }

    #[test]
    fn alias_onto_other_page_is_skipped() {
        let (mut graph, post) = graph_with_page(json!(["/blog"]));
        graph.set_phase(Phase::Load);
        let blog = graph.child(graph.root(), "blog").unwrap();
        let index = graph
            .create_index_page(
                blog,
                None,
                NewPage::new(text_page_type(), MetaMap::new()).source(source_file("blog/index.md")),
            )
            .unwrap()
            .unwrap();
        graph.set_phase(Phase::Organize);
        AliasesFeature::new().organize(&mut graph).unwrap();
        assert_eq!(lookup(&graph, "blog"), Some(index));
        assert_ne!(lookup(&graph, "blog"), Some(post));
    }

    #[test]
    fn redirect_points_at_target() {
        let (mut graph, _) = graph_with_page(json!(["/old"]));
        AliasesFeature::new().organize(&mut graph).unwrap();
        graph.set_phase(Phase::Render);
        let old = lookup(&graph, "old").unwrap();
        let caches = Caches::disabled();
        let stats = CacheStats::default();
        let ctx = RenderContext {
            graph: &graph,
            caches: &caches,
            stats: &stats,
        };
        let Rendered::Bytes(bytes) = AliasRenderer.render(&ctx, old).unwrap() else {
            panic!("redirects render to bytes");
        };
        let html = String::from_utf8(bytes).unwrap();
        assert!(html.contains(r#"content="0; url=/blog/post/""#), "{html}");
    }

    #[test]
    fn aliases_outside_organize_are_fatal() {
        let (mut graph, _) = graph_with_page(json!(["/old"]));
        graph.set_phase(Phase::Analyze);
        assert!(AliasesFeature::new().organize(&mut graph).is_err());
    }
}
