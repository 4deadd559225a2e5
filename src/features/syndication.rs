//! RSS and Atom feeds.
//!
//! An index page declaring `syndication: yes` (or a table of options) gets
//! `index.rss` and `index.atom` next to it. The feeds list the pages below
//! the index that are syndicated, newest first.
//!
//! ```yaml
//! syndication:
//!   title: Blog updates      # defaults to the index title
//!   description: All posts   # defaults to the index description
//!   limit: 10                # defaults to 20
//! ```
//!
//! `syndicated` defaults to `indexed`. `syndication_date` defaults to
//! `date`; pages syndicated after the build started are left out unless
//! building drafts.

use super::{Feature, FeatureError, tags::set_date};
use crate::fields::{FieldDef, FieldType, truthy};
use crate::front_matter::MetaMap;
use crate::metadata::MetadataEntry;
use crate::node::{Graph, NewPage, PageId};
use crate::render::{PageRenderer, PageType, RenderContext, RenderError, Rendered, page_title};
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use rss::{ChannelBuilder, GuidBuilder, ItemBuilder};
use serde_json::Value;
use std::fmt;
use std::io::{self, Cursor};
use std::sync::Arc;

pub const RSS: &str = "rss";
pub const ATOM: &str = "atom";

const RSS_FILE: &str = "index.rss";
const ATOM_FILE: &str = "index.atom";
const DEFAULT_LIMIT: usize = 20;
const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

struct Feed {
    index: PageId,
    rss: Option<PageId>,
    atom: Option<PageId>,
    limit: usize,
}

pub struct SyndicationFeature {
    rss_type: Arc<PageType>,
    atom_type: Arc<PageType>,
    feeds: Vec<Feed>,
}

impl Default for SyndicationFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl SyndicationFeature {
    pub fn new() -> Self {
        Self {
            rss_type: Arc::new(PageType::new(RSS, RssRenderer).render_order(4)),
            atom_type: Arc::new(PageType::new(ATOM, AtomRenderer).render_order(4)),
            feeds: Vec::new(),
        }
    }
}

/// Options of a `syndication` value, `None` when syndication is off.
fn options(value: &Value) -> Option<MetaMap> {
    match value {
        Value::Object(map) => Some(map.clone()),
        other if truthy(other) => Some(MetaMap::new()),
        _ => None,
    }
}

impl Feature for SyndicationFeature {
    fn name(&self) -> &'static str {
        "syndication"
    }

    fn run_after(&self) -> &[&'static str] {
        &["markdown", "tags"]
    }

    fn run_before(&self) -> &[&'static str] {
        &["dirs"]
    }

    fn metadata(&self) -> Vec<MetadataEntry> {
        vec![
            MetadataEntry::new(
                FieldDef::new("syndication", FieldType::Any)
                    .structured()
                    .doc("Publish RSS and Atom feeds of the pages below this index."),
            ),
            MetadataEntry::new(
                FieldDef::new("syndicated", FieldType::Bool)
                    .doc("Include the page in feeds. Defaults to `indexed`."),
            ),
            MetadataEntry::new(
                FieldDef::new("syndication_date", FieldType::Date)
                    .doc("Date of the page in feeds. Defaults to `date`."),
            ),
        ]
    }

    fn page_types(&self) -> Vec<Arc<PageType>> {
        vec![Arc::clone(&self.rss_type), Arc::clone(&self.atom_type)]
    }

    fn organize(&mut self, graph: &mut Graph) -> Result<(), FeatureError> {
        let wanted: Vec<(PageId, MetaMap)> = graph
            .pages()
            .filter_map(|(id, page)| {
                page.meta
                    .get("syndication")
                    .and_then(options)
                    .map(|opts| (id, opts))
            })
            .collect();

        for (index, opts) in wanted {
            let page = graph.page(index);
            let node = page.node;
            if graph.node(node).page != Some(index) {
                tracing::warn!(
                    "{}: syndication is only supported on index pages",
                    page.build_path()
                );
                continue;
            }
            let limit = match opts.get("limit") {
                None => DEFAULT_LIMIT,
                Some(v) => match v.as_u64() {
                    Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
                    None => {
                        tracing::warn!(
                            "{}: syndication.limit must be a positive integer, using {}",
                            page.build_path(),
                            DEFAULT_LIMIT
                        );
                        DEFAULT_LIMIT
                    }
                },
            };

            let mut meta = MetaMap::new();
            let title = opts
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| page_title(graph, index));
            meta.insert("title".into(), Value::String(title));
            if let Some(description) = opts
                .get("description")
                .and_then(Value::as_str)
                .or_else(|| page.meta.str("description"))
            {
                meta.insert("description".into(), Value::String(description.to_string()));
            }

            let rss = graph.create_leaf_page(
                node,
                RSS_FILE,
                NewPage::new(Arc::clone(&self.rss_type), meta.clone()).created_from(index),
            )?;
            let atom = graph.create_leaf_page(
                node,
                ATOM_FILE,
                NewPage::new(Arc::clone(&self.atom_type), meta).created_from(index),
            )?;
            tracing::debug!("{}: adding feeds", graph.page(index).build_path());
            self.feeds.push(Feed {
                index,
                rss,
                atom,
                limit,
            });
        }
        Ok(())
    }

    fn analyze(&mut self, graph: &mut Graph) -> Result<(), FeatureError> {
        let now = graph.options().generation_time;
        let draft = graph.options().draft;
        for feed in &self.feeds {
            let node = graph.page(feed.index).node;
            let mut entries: Vec<(DateTime<Utc>, PageId)> = graph
                .walk(node)
                .into_iter()
                .flat_map(|n| graph.node(n).build_pages.values().copied().collect::<Vec<_>>())
                .filter(|id| *id != feed.index && is_syndicated(graph, *id))
                .filter_map(|id| syndication_date(graph, id).map(|date| (date, id)))
                .filter(|(date, _)| draft || *date <= now)
                .collect();
            entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
            entries.truncate(feed.limit);

            // An empty feed takes the index date so rebuilds stay stable
            let date = entries
                .first()
                .map(|(date, _)| *date)
                .or_else(|| graph.page(feed.index).meta.date("date"));
            let listing: Vec<PageId> = entries.into_iter().map(|(_, id)| id).collect();
            for id in [feed.rss, feed.atom].into_iter().flatten() {
                let page = graph.page_mut(id);
                page.listing = listing.clone();
                if let Some(date) = date {
                    set_date(page, date)?;
                }
            }
        }
        Ok(())
    }
}

fn is_syndicated(graph: &Graph, page: PageId) -> bool {
    let meta = &graph.page(page).meta;
    match meta.get("syndicated") {
        Some(value) => truthy(value),
        None => meta.bool("indexed"),
    }
}

fn syndication_date(graph: &Graph, page: PageId) -> Option<DateTime<Utc>> {
    let meta = &graph.page(page).meta;
    meta.date("syndication_date").or_else(|| meta.date("date"))
}

/// URL of a page, absolute when `site_url` is known.
fn absolute_url(graph: &Graph, page: PageId) -> String {
    let url = graph.url_for(page);
    match graph.meta_str(page, "site_url") {
        Some(base) if !base.is_empty() => format!("{}{}", base.trim_end_matches('/'), url),
        _ => url,
    }
}

fn index_of(graph: &Graph, page: PageId) -> Result<PageId, RenderError> {
    graph.page(page).created_from.ok_or_else(|| RenderError::Page {
        path: graph.page(page).build_path().to_string(),
        reason: "feed page without an index page".into(),
    })
}

struct RssRenderer;

impl PageRenderer for RssRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let graph = ctx.graph;
        let index = index_of(graph, page)?;
        let p = graph.page(page);

        let items: Vec<rss::Item> = p
            .listing
            .iter()
            .map(|id| {
                let link = absolute_url(graph, *id);
                let entry = &graph.page(*id).meta;
                ItemBuilder::default()
                    .title(page_title(graph, *id))
                    .link(Some(link.clone()))
                    .guid(GuidBuilder::default().permalink(true).value(link).build())
                    .description(entry.str("description").map(str::to_string))
                    .pub_date(syndication_date(graph, *id).map(|d| d.to_rfc2822()))
                    .author(graph.meta_str(*id, "author"))
                    .build()
            })
            .collect();

        let channel = ChannelBuilder::default()
            .title(page_title(graph, page))
            .link(absolute_url(graph, index))
            .description(p.meta.str("description").unwrap_or_default().to_string())
            .last_build_date(p.meta.date("date").map(|d| d.to_rfc2822()))
            .generator(Some(format!("sitegraph {}", env!("CARGO_PKG_VERSION"))))
            .items(items)
            .build();
        Ok(Rendered::Bytes(channel.to_string().into_bytes()))
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn xml_error(e: impl fmt::Display) -> RenderError {
    RenderError::Io(io::Error::other(e.to_string()))
}

fn write_text_element(writer: &mut XmlWriter, tag: &str, text: &str) -> Result<(), RenderError> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_error)?;
    Ok(())
}

fn write_link(writer: &mut XmlWriter, rel: Option<&str>, href: &str) -> Result<(), RenderError> {
    let mut elem = BytesStart::new("link");
    if let Some(rel) = rel {
        elem.push_attribute(("rel", rel));
    }
    elem.push_attribute(("href", href));
    writer.write_event(Event::Empty(elem)).map_err(xml_error)?;
    Ok(())
}

struct AtomRenderer;

impl PageRenderer for AtomRenderer {
    fn render(&self, ctx: &RenderContext<'_>, page: PageId) -> Result<Rendered, RenderError> {
        let graph = ctx.graph;
        let index = index_of(graph, page)?;
        let p = graph.page(page);
        let updated = p
            .meta
            .date("date")
            .unwrap_or(graph.options().generation_time)
            .to_rfc3339();

        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_error)?;
        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", ATOM_NS));
        writer.write_event(Event::Start(feed)).map_err(xml_error)?;

        let home = absolute_url(graph, index);
        write_text_element(&mut writer, "title", &page_title(graph, page))?;
        if let Some(description) = p.meta.str("description") {
            write_text_element(&mut writer, "subtitle", description)?;
        }
        write_link(&mut writer, None, &home)?;
        write_link(&mut writer, Some("self"), &absolute_url(graph, page))?;
        write_text_element(&mut writer, "id", &home)?;
        write_text_element(&mut writer, "updated", &updated)?;
        if let Some(author) = graph.meta_str(index, "author") {
            writer
                .write_event(Event::Start(BytesStart::new("author")))
                .map_err(xml_error)?;
            write_text_element(&mut writer, "name", &author)?;
            writer
                .write_event(Event::End(BytesEnd::new("author")))
                .map_err(xml_error)?;
        }

        for id in &p.listing {
            let link = absolute_url(graph, *id);
            writer
                .write_event(Event::Start(BytesStart::new("entry")))
                .map_err(xml_error)?;
            write_text_element(&mut writer, "title", &page_title(graph, *id))?;
            write_link(&mut writer, None, &link)?;
            write_text_element(&mut writer, "id", &link)?;
            if let Some(date) = syndication_date(graph, *id) {
                write_text_element(&mut writer, "updated", &date.to_rfc3339())?;
            }
            if let Some(summary) = graph.page(*id).meta.str("description") {
                write_text_element(&mut writer, "summary", summary)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("entry")))
                .map_err(xml_error)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("feed")))
            .map_err(xml_error)?;
        Ok(Rendered::Bytes(writer.into_inner().into_inner()))
    }
}
