//! Directory listings.
//!
//! In the analyze pass every synthesized `dir` page lists what its node
//! holds: subdirectory pages by name, then indexed pages newest first. The
//! page's `date` becomes the newest listed date. Nodes are visited children
//! first, so a directory sees the final dates of its subdirectories.

use super::{Feature, FeatureError};
use crate::fields::format_date;
use crate::node::{Graph, GraphError, PageId};
use crate::render::DIR;
use serde_json::Value;
use std::cmp::Reverse;

#[derive(Debug, Default)]
pub struct DirsFeature;

impl DirsFeature {
    pub fn new() -> Self {
        Self
    }
}

impl Feature for DirsFeature {
    fn name(&self) -> &'static str {
        "dirs"
    }

    fn run_after(&self) -> &[&'static str] {
        &["tags"]
    }

    fn analyze(&mut self, graph: &mut Graph) -> Result<(), FeatureError> {
        let mut filled = 0;
        for node in graph.walk(graph.root()).into_iter().rev() {
            let Some(index) = graph.node(node).page else {
                continue;
            };
            if graph.page(index).type_name() != DIR {
                continue;
            }

            let n = graph.node(node);
            let mut dirs = Vec::new();
            let mut pages = Vec::new();
            for child in n.sub.values() {
                if let Some(id) = graph.node(*child).page {
                    if graph.page(id).type_name() == DIR {
                        dirs.push(id);
                    } else if graph.page(id).meta.bool("indexed") {
                        pages.push(id);
                    }
                }
            }
            pages.extend(
                n.build_pages
                    .values()
                    .copied()
                    .filter(|id| *id != index && graph.page(*id).meta.bool("indexed")),
            );
            pages.sort_by_key(|id| (Reverse(graph.page(*id).meta.date("date")), *id));

            let newest = dirs
                .iter()
                .chain(&pages)
                .filter_map(|id| graph.page(*id).meta.date("date"))
                .max();
            let listing: Vec<PageId> = dirs.into_iter().chain(pages).collect();

            let page = graph.page_mut(index);
            page.listing = listing;
            if let Some(date) = newest {
                page.meta
                    .set("date", Value::String(format_date(&date)))
                    .map_err(|source| GraphError::Field {
                        path: page.build_path().to_string(),
                        source,
                    })?;
            }
            filled += 1;
        }
        tracing::debug!("filled {} directory listings", filled);
        Ok(())
    }
}
