//! Features: the pluggable content handlers.
//!
//! A feature can contribute metadata fields, directory metadata, claim
//! files while a directory is loaded, and run whole-graph passes
//! (`organize`, `analyze`, `finalize`). Features declare soft ordering
//! constraints against each other by name; [`Features::commit`] turns them
//! into one global order that every pass uses.
//!
//! | Feature | Role |
//! |---------|------|
//! | [`markdown`] | Claims `*.md` files, renders them with link rewriting and the render cache |
//! | [`aliases`] | Synthesizes redirect pages for `aliases:` entries |
//! | [`tags`] | Synthesizes tag index and per-tag pages from `tags:` entries |
//! | [`syndication`] | Synthesizes RSS and Atom feeds for index pages declaring `syndication:` |
//! | [`dirs`] | Fills directory index listings once the graph is complete |

pub mod aliases;
pub mod dirs;
pub mod markdown;
pub mod syndication;
pub mod tags;

use crate::config::Settings;
use crate::front_matter::MetaMap;
use crate::metadata::{MetadataEntry, MetadataRegistry};
use crate::node::{Graph, GraphError, NodeId, PageId};
use crate::render::PageType;
use crate::scan::{DirView, SourceDir, SourceFile};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("feature dependency cycle: {0}")]
    Cycle(String),
    #[error("features already committed")]
    AlreadyCommitted,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Files of a directory not yet claimed by any feature, by file name.
pub type PendingFiles = BTreeMap<String, SourceFile>;

pub trait Feature: Send {
    fn name(&self) -> &'static str;

    /// Features that must run after this one.
    fn run_before(&self) -> &[&'static str] {
        &[]
    }

    /// Features that must run before this one.
    fn run_after(&self) -> &[&'static str] {
        &[]
    }

    /// Metadata fields this feature introduces.
    fn metadata(&self) -> Vec<MetadataEntry> {
        Vec::new()
    }

    /// Page types this feature creates.
    fn page_types(&self) -> Vec<Arc<PageType>> {
        Vec::new()
    }

    /// Metadata for a directory, computed while it is scanned.
    ///
    /// May contain `dirs:`, `files:` and `ignore:` rules like a directory
    /// config file.
    fn load_dir_meta(&mut self, _dir: &DirView<'_>) -> Result<Option<MetaMap>, FeatureError> {
        Ok(None)
    }

    /// Claim files of `dir` by creating pages in `node` and removing them
    /// from `pending`.
    fn load_dir(
        &mut self,
        _graph: &mut Graph,
        _node: NodeId,
        _dir: &SourceDir,
        _pending: &mut PendingFiles,
    ) -> Result<Vec<PageId>, FeatureError> {
        Ok(Vec::new())
    }

    /// Create synthetic pages. The only pass where that is allowed.
    fn organize(&mut self, _graph: &mut Graph) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Cross-page computations on the complete graph.
    fn analyze(&mut self, _graph: &mut Graph) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Last adjustments before rendering.
    fn finalize(&mut self, _graph: &mut Graph) -> Result<(), FeatureError> {
        Ok(())
    }
}

/// The registered features, in execution order once committed.
#[derive(Default)]
pub struct Features {
    features: Vec<Box<dyn Feature>>,
    committed: bool,
}

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feature. A feature with the same name replaces the earlier
    /// one, keeping its position.
    pub fn register(&mut self, feature: Box<dyn Feature>) {
        if let Some(slot) = self
            .features
            .iter_mut()
            .find(|f| f.name() == feature.name())
        {
            tracing::info!("feature '{}' replaced", feature.name());
            *slot = feature;
        } else {
            self.features.push(feature);
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Sort features by their constraints and register their metadata.
    ///
    /// Ties keep registration order. Names that match no feature are
    /// ignored with a warning; a cycle is an error naming its members.
    pub fn commit(&mut self, registry: &mut MetadataRegistry) -> Result<(), FeatureError> {
        if self.committed {
            return Err(FeatureError::AlreadyCommitted);
        }
        let order = self.sorted_indices()?;
        let mut slots: Vec<Option<Box<dyn Feature>>> =
            std::mem::take(&mut self.features).into_iter().map(Some).collect();
        self.features = order.into_iter().filter_map(|i| slots[i].take()).collect();

        for feature in &self.features {
            for entry in feature.metadata() {
                registry.register(entry);
            }
        }
        self.committed = true;
        tracing::debug!("feature order: {}", self.names().join(", "));
        Ok(())
    }

    fn sorted_indices(&self) -> Result<Vec<usize>, FeatureError> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.features.len()).map(|i| graph.add_node(i)).collect();
        let by_name: HashMap<&str, NodeIndex> = self
            .features
            .iter()
            .zip(&nodes)
            .map(|(f, n)| (f.name(), *n))
            .collect();

        for (feature, &node) in self.features.iter().zip(&nodes) {
            for name in feature.run_before() {
                match by_name.get(name) {
                    Some(&other) => {
                        graph.update_edge(node, other, ());
                    }
                    None => tracing::warn!(
                        "feature '{}': run_before names unknown feature '{}'",
                        feature.name(),
                        name
                    ),
                }
            }
            for name in feature.run_after() {
                match by_name.get(name) {
                    Some(&other) => {
                        graph.update_edge(other, node, ());
                    }
                    None => tracing::warn!(
                        "feature '{}': run_after names unknown feature '{}'",
                        feature.name(),
                        name
                    ),
                }
            }
        }

        if let Some(cycle) = find_cycle(&graph) {
            let names: Vec<&str> = cycle
                .iter()
                .map(|n| self.features[graph[*n]].name())
                .collect();
            return Err(FeatureError::Cycle(names.join(" -> ")));
        }

        // Kahn's algorithm, always taking the earliest registered ready node
        let mut in_degree: Vec<usize> = nodes
            .iter()
            .map(|n| graph.neighbors_directed(*n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for next in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
                let j = graph[next];
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }
        Ok(order)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.features.iter().map(|f| f.name()).collect()
    }

    pub fn ordered(&self) -> impl Iterator<Item = &dyn Feature> {
        self.features.iter().map(|f| f.as_ref())
    }

    pub fn ordered_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Feature>> {
        self.features.iter_mut()
    }

    /// Page types of all features, for documentation and listings.
    pub fn page_types(&self) -> Vec<Arc<PageType>> {
        self.features.iter().flat_map(|f| f.page_types()).collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// A cycle as a node path that ends where it starts.
fn find_cycle(graph: &DiGraph<usize, ()>) -> Option<Vec<NodeIndex>> {
    let mut colors = vec![Color::White; graph.node_count()];
    let mut path = Vec::new();
    for node in graph.node_indices() {
        if colors[node.index()] == Color::White
            && let Some(cycle) = visit(graph, node, &mut colors, &mut path)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    graph: &DiGraph<usize, ()>,
    node: NodeIndex,
    colors: &mut [Color],
    path: &mut Vec<NodeIndex>,
) -> Option<Vec<NodeIndex>> {
    colors[node.index()] = Color::Gray;
    path.push(node);
    for next in graph.neighbors(node) {
        match colors[next.index()] {
            Color::Gray => {
                let start = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Color::White => {
                if let Some(cycle) = visit(graph, next, colors, path) {
                    return Some(cycle);
                }
            }
            Color::Black => {}
        }
    }
    path.pop();
    colors[node.index()] = Color::Black;
    None
}

/// The features a site gets unless told otherwise.
pub fn default_features(settings: &Settings) -> Vec<Box<dyn Feature>> {
    vec![
        Box::new(markdown::MarkdownFeature::new()),
        Box::new(aliases::AliasesFeature::new()),
        Box::new(tags::TagsFeature::new(&settings.taxonomy.path)),
        Box::new(syndication::SyndicationFeature::new()),
        Box::new(dirs::DirsFeature::new()),
    ]
}
