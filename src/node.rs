//! The node/page graph.
//!
//! Nodes are locations in the output hierarchy; pages are the units of
//! output attached to them. Both live in arenas owned by [`Graph`] and
//! refer to each other by index: a node owns its children through `sub`,
//! `parent` is a plain back-index, and `created_from` / `by_src_relpath`
//! are lookup-only indices.
//!
//! ```text
//! root ""            page: index.html (dir)
//! ├── blog           page: index.html (markdown, from blog/index.md)
//! │   ├── post       page: index.html (markdown, from blog/post.md)
//! │   └── photo.jpg  build_pages["photo.jpg"] (asset)
//! └── tags           page: index.html (synthetic, organize phase)
//! ```
//!
//! Every page occupies one `(node, destination)` slot. The first writer
//! wins; a later page for the same slot is rejected with a warning, except
//! that an asset may replace an asset.

use crate::fields::{FieldError, FieldTable, Meta};
use crate::file::File;
use crate::front_matter::MetaMap;
use crate::metadata::{HookContext, MetadataRegistry};
use crate::render::PageType;
use crate::site_path::{SitePath, join_site_path};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("cannot create {kind} page '{path}' during the {phase} phase")]
    WrongPhase {
        path: String,
        kind: &'static str,
        phase: Phase,
    },
    #[error("{path}: {source}")]
    Field { path: String, source: FieldError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub usize);

/// Pipeline phase the graph is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Load,
    Organize,
    Analyze,
    Finalize,
    Render,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Load => "load",
            Phase::Organize => "organize",
            Phase::Analyze => "analyze",
            Phase::Finalize => "finalize",
            Phase::Render => "render",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub generation_time: DateTime<Utc>,
    /// Keep pages marked as drafts.
    pub draft: bool,
    /// URL prefix of the site root, always starting with `/`.
    pub site_root: String,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            generation_time: Utc::now(),
            draft: false,
            site_root: "/".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    /// Index page of this node, also present as `build_pages["index.html"]`.
    pub page: Option<PageId>,
    pub build_pages: BTreeMap<String, PageId>,
    /// Pages by basename of their source, for pages whose links resolve
    /// relative to this node.
    pub by_src_relpath: BTreeMap<String, PageId>,
    pub sub: BTreeMap<String, NodeId>,
    /// Directory metadata, as computed by the scanner.
    pub meta: MetaMap,
}

impl Node {
    fn new(name: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            page: None,
            build_pages: BTreeMap::new(),
            by_src_relpath: BTreeMap::new(),
            sub: BTreeMap::new(),
            meta: MetaMap::new(),
        }
    }

    /// No pages and no children.
    pub fn is_empty(&self) -> bool {
        self.page.is_none() && self.build_pages.is_empty() && self.sub.is_empty()
    }
}

#[derive(Debug)]
pub struct Page {
    pub page_type: Arc<PageType>,
    pub meta: Meta,
    pub source: Option<File>,
    pub node: NodeId,
    /// Node that relative links in this page resolve from.
    pub search_root: NodeId,
    /// File name inside `node`.
    pub dst: String,
    pub created_from: Option<PageId>,
    /// Source text, for page types that render from it.
    pub body: Option<String>,
    /// Pages listed by this one (directory contents, tagged pages).
    pub listing: Vec<PageId>,
    inherited: Mutex<HashMap<String, Option<Value>>>,
}

impl Page {
    pub fn type_name(&self) -> &'static str {
        self.page_type.name
    }

    pub fn build_path(&self) -> &str {
        self.meta.str("build_path").unwrap_or_default()
    }

    pub fn is_asset(&self) -> bool {
        self.page_type.is_asset()
    }
}

/// Everything needed to construct a page.
pub struct NewPage {
    pub page_type: Arc<PageType>,
    pub meta: MetaMap,
    pub source: Option<File>,
    pub created_from: Option<PageId>,
    pub body: Option<String>,
}

impl NewPage {
    pub fn new(page_type: Arc<PageType>, meta: MetaMap) -> Self {
        Self {
            page_type,
            meta,
            source: None,
            created_from: None,
            body: None,
        }
    }

    pub fn source(mut self, source: File) -> Self {
        self.source = Some(source);
        self
    }

    pub fn created_from(mut self, page: PageId) -> Self {
        self.created_from = Some(page);
        self
    }

    pub fn body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }
}

pub struct Graph {
    nodes: Vec<Node>,
    pages: Vec<Page>,
    registry: Arc<MetadataRegistry>,
    options: GraphOptions,
    phase: Phase,
    field_tables: HashMap<&'static str, Arc<FieldTable>>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("pages", &self.pages.len())
            .field("phase", &self.phase)
            .finish()
    }
}

impl Graph {
    pub fn new(options: GraphOptions, registry: Arc<MetadataRegistry>) -> Self {
        Self {
            nodes: vec![Node::new("", None)],
            pages: Vec::new(),
            registry,
            options,
            phase: Phase::Setup,
            field_tables: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to another phase. Inherited values memoized so far are dropped.
    pub fn set_phase(&mut self, phase: Phase) {
        tracing::debug!("graph phase: {} -> {}", self.phase, phase);
        self.phase = phase;
        for page in &self.pages {
            page.inherited.lock().clear();
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn page(&self, id: PageId) -> &Page {
        &self.pages[id.0]
    }

    pub fn page_mut(&mut self, id: PageId) -> &mut Page {
        &mut self.pages[id.0]
    }

    /// All pages, in creation order.
    pub fn pages(&self) -> impl Iterator<Item = (PageId, &Page)> {
        self.pages.iter().enumerate().map(|(i, p)| (PageId(i), p))
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        (0..self.pages.len()).map(PageId).collect()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn child(&self, node: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[node.0].sub.get(name).copied()
    }

    /// Get or create the child node `name`.
    pub fn ensure_child(&mut self, node: NodeId, name: &str) -> NodeId {
        if let Some(id) = self.child(node, name) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, Some(node)));
        self.nodes[node.0].sub.insert(name.to_string(), id);
        id
    }

    /// Nodes reachable from `node`, parents before children.
    pub fn walk(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].sub.values().rev().copied());
        }
        out
    }

    /// Path of the node from the root, `/`-separated, empty for the root.
    pub fn node_path(&self, node: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(node);
        while let Some(id) = cur {
            let n = &self.nodes[id.0];
            if n.parent.is_some() {
                parts.push(n.name.as_str());
            }
            cur = n.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Public URL of a page: index pages map to their directory.
    pub fn url_for(&self, page: PageId) -> String {
        let p = &self.pages[page.0];
        let node_path = self.node_path(p.node);
        let rel = if p.dst == "index.html" {
            if node_path.is_empty() {
                String::new()
            } else {
                format!("{}/", node_path)
            }
        } else if node_path.is_empty() {
            p.dst.clone()
        } else {
            format!("{}/{}", node_path, p.dst)
        };
        join_site_path(&self.options.site_root, &rel)
    }

    /// Remove `node` from its parent if it holds nothing. Never prunes the root.
    pub fn prune(&mut self, node: NodeId) -> bool {
        let n = &self.nodes[node.0];
        let Some(parent) = n.parent else {
            return false;
        };
        if !n.is_empty() || !n.by_src_relpath.is_empty() {
            return false;
        }
        let name = n.name.clone();
        self.nodes[parent.0].sub.remove(&name);
        tracing::debug!("pruned empty node {}", self.node_path(parent) + "/" + &name);
        true
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn lookup_node(&self, node: NodeId, path: &SitePath) -> Option<NodeId> {
        let mut cur = node;
        for part in path.components() {
            match part.as_str() {
                "" | "." => {}
                ".." => cur = self.nodes[cur.0].parent?,
                name => cur = self.child(cur, name)?,
            }
        }
        Some(cur)
    }

    /// Find a page following `path` from `node`.
    ///
    /// The last component matches, in order: a child node with an index
    /// page, a destination file name, the basename of a page source.
    pub fn lookup_page(&self, node: NodeId, path: &SitePath) -> Option<PageId> {
        let parts = path.components();
        let mut cur = node;
        let mut idx = 0;
        loop {
            let Some(head) = parts.get(idx) else {
                return self.nodes[cur.0].page;
            };
            match head.as_str() {
                "" | "." => {
                    idx += 1;
                    continue;
                }
                ".." => {
                    cur = self.nodes[cur.0].parent?;
                    idx += 1;
                    continue;
                }
                _ => {}
            }
            let n = &self.nodes[cur.0];
            if idx + 1 < parts.len() {
                cur = *n.sub.get(head)?;
                idx += 1;
                continue;
            }
            if let Some(sub) = n.sub.get(head)
                && let Some(page) = self.nodes[sub.0].page
            {
                return Some(page);
            }
            if let Some(page) = n.build_pages.get(head) {
                return Some(*page);
            }
            return n.by_src_relpath.get(head).copied();
        }
    }

    /// Resolve a link target as written in `page`: absolute paths start at
    /// the root, anything else at the page's search root.
    pub fn resolve_path(&self, page: PageId, target: &str) -> Option<PageId> {
        let path = SitePath::from_string(target);
        if target.starts_with('/') {
            self.lookup_page(self.root(), &path)
        } else {
            self.lookup_page(self.pages[page.0].search_root, &path)
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Index page governing `page` for inheritance.
    pub fn parent_page(&self, page: PageId) -> Option<PageId> {
        let p = &self.pages[page.0];
        let node = &self.nodes[p.node.0];
        if let Some(index) = node.page
            && index != page
        {
            return Some(index);
        }
        let mut cur = node.parent;
        while let Some(id) = cur {
            if let Some(index) = self.nodes[id.0].page {
                return Some(index);
            }
            cur = self.nodes[id.0].parent;
        }
        None
    }

    /// Value of a field for a page, resolving inheritance and defaults.
    ///
    /// Inherited values are memoized per page until the next phase change.
    pub fn meta_value(&self, page: PageId, name: &str) -> Option<Value> {
        let p = &self.pages[page.0];
        if let Some(value) = p.meta.get_own(name) {
            return Some(value.clone());
        }
        if !p.meta.fields().is_inherited(name) {
            return p.meta.get(name).cloned();
        }
        if let Some(cached) = p.inherited.lock().get(name) {
            return cached.clone();
        }
        let resolved = self
            .parent_page(page)
            .and_then(|parent| self.meta_value(parent, name))
            .or_else(|| p.meta.get(name).cloned());
        p.inherited.lock().insert(name.to_string(), resolved.clone());
        resolved
    }

    pub fn meta_str(&self, page: PageId, name: &str) -> Option<String> {
        self.meta_value(page, name)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Run the registry's `on_analyze` hooks on every page.
    ///
    /// Reassigning a write-once field is fatal; other failures are logged.
    pub fn run_analyze_hooks(&mut self) -> Result<(), GraphError> {
        let registry = Arc::clone(&self.registry);
        let generation_time = self.options.generation_time;
        for i in 0..self.pages.len() {
            let site_name = self.meta_str(PageId(i), "site_name");
            let page = &mut self.pages[i];
            let ctx = HookContext {
                source: page.source.as_ref(),
                generation_time,
                site_name: site_name.as_deref(),
            };
            match registry.on_analyze(&mut page.meta, &ctx) {
                Ok(()) => {}
                Err(source @ FieldError::ConstReassigned(_)) => {
                    return Err(GraphError::Field {
                        path: page.build_path().to_string(),
                        source,
                    });
                }
                Err(e) => tracing::warn!("{}: {}", page.build_path(), e),
            }
        }
        Ok(())
    }

    fn fields_for(&mut self, page_type: &PageType) -> Arc<FieldTable> {
        let registry = &self.registry;
        Arc::clone(
            self.field_tables
                .entry(page_type.name)
                .or_insert_with(|| Arc::new(registry.fields().composed(&page_type.fields))),
        )
    }

    // =========================================================================
    // Page creation
    // =========================================================================

    /// Create the index page of `node`, or of the node at `subpath` below it.
    ///
    /// Nodes along `subpath` are created as needed and removed again if the
    /// page is not registered. Returns `Ok(None)` for pages that are skipped:
    /// failed validation, drafts, slot collisions, and subpaths with `.`,
    /// `..` or empty components.
    pub fn create_index_page(
        &mut self,
        node: NodeId,
        subpath: Option<&SitePath>,
        new: NewPage,
    ) -> Result<Option<PageId>, GraphError> {
        if let Some(path) = subpath
            && !path.is_plain()
        {
            tracing::warn!(
                "{}: {} page path must not contain '.' or '..', skipping",
                self.join_build_path(node, &path.to_string()),
                new.page_type.name
            );
            return Ok(None);
        }
        let mark = self.nodes.len();
        let mut target = node;
        let mut created = None;
        for part in subpath.map(SitePath::components).unwrap_or_default() {
            target = match self.child(target, part) {
                Some(id) => id,
                None => {
                    let id = self.ensure_child(target, part);
                    created.get_or_insert((target, part.clone()));
                    id
                }
            };
        }
        // Directory indices resolve links from their own node, pages mapped
        // to a subnode from the directory they were found in.
        let search_root = if target == node {
            node
        } else {
            self.nodes[target.0].parent.unwrap_or(node)
        };

        let result = self.register_index(target, search_root, new);
        if !matches!(result, Ok(Some(_)))
            && let Some((parent, name)) = created
        {
            // Nodes are only ever appended: the first one created here is
            // `mark`, and everything after it belongs to this subpath.
            debug_assert_eq!(
                self.nodes[parent.0].sub.get(&name).map(|id| id.0),
                Some(mark)
            );
            self.nodes[parent.0].sub.remove(&name);
            self.nodes.truncate(mark);
        }
        result
    }

    fn register_index(
        &mut self,
        target: NodeId,
        search_root: NodeId,
        new: NewPage,
    ) -> Result<Option<PageId>, GraphError> {
        let path = self.join_build_path(target, "index.html");
        let n = &self.nodes[target.0];
        if let Some(existing) = n.page.or_else(|| n.build_pages.get("index.html").copied()) {
            tracing::warn!(
                "{}: {} page conflicts with existing {} page, skipping",
                path,
                new.page_type.name,
                self.pages[existing.0].type_name()
            );
            return Ok(None);
        }
        let Some(page) = self.build_page(target, search_root, "index.html", path, new)? else {
            return Ok(None);
        };
        let id = PageId(self.pages.len());
        self.register_source(search_root, &page, id);
        self.pages.push(page);
        let n = &mut self.nodes[target.0];
        n.page = Some(id);
        n.build_pages.insert("index.html".to_string(), id);
        Ok(Some(id))
    }

    /// Create a page stored as `dst` inside `node`.
    pub fn create_leaf_page(
        &mut self,
        node: NodeId,
        dst: &str,
        new: NewPage,
    ) -> Result<Option<PageId>, GraphError> {
        let path = self.join_build_path(node, dst);
        if dst.is_empty() || dst == "." || dst == ".." || dst.contains('/') {
            tracing::warn!("{}: invalid file name for {} page, skipping", path, new.page_type.name);
            return Ok(None);
        }
        let existing = self.nodes[node.0].build_pages.get(dst).copied();
        if let Some(existing) = existing
            && !(self.pages[existing.0].is_asset() && new.page_type.is_asset())
        {
            tracing::warn!(
                "{}: {} page conflicts with existing {} page, skipping",
                path,
                new.page_type.name,
                self.pages[existing.0].type_name()
            );
            return Ok(None);
        }
        let Some(page) = self.build_page(node, node, dst, path, new)? else {
            return Ok(None);
        };
        let id = match existing {
            Some(old) => {
                tracing::debug!("{}: asset replaced", page.build_path());
                if let Some(src) = &self.pages[old.0].source {
                    let name = src.name().to_string();
                    self.nodes[node.0].by_src_relpath.remove(&name);
                }
                self.register_source(node, &page, old);
                self.pages[old.0] = page;
                old
            }
            None => {
                let id = PageId(self.pages.len());
                self.register_source(node, &page, id);
                self.pages.push(page);
                id
            }
        };
        self.nodes[node.0].build_pages.insert(dst.to_string(), id);
        Ok(Some(id))
    }

    fn join_build_path(&self, node: NodeId, dst: &str) -> String {
        let base = self.node_path(node);
        if base.is_empty() {
            dst.to_string()
        } else {
            format!("{}/{}", base, dst)
        }
    }

    fn register_source(&mut self, search_root: NodeId, page: &Page, id: PageId) {
        if let Some(src) = &page.source {
            self.nodes[search_root.0]
                .by_src_relpath
                .insert(src.name().to_string(), id);
        }
    }

    /// Construct, load and validate a page. `Ok(None)` means skipped.
    fn build_page(
        &mut self,
        node: NodeId,
        search_root: NodeId,
        dst: &str,
        path: String,
        new: NewPage,
    ) -> Result<Option<Page>, GraphError> {
        let (kind, allowed) = if new.source.is_some() {
            ("source", Phase::Load)
        } else {
            ("synthetic", Phase::Organize)
        };
        if self.phase != allowed {
            return Err(GraphError::WrongPhase {
                path,
                kind,
                phase: self.phase,
            });
        }

        let fields = self.fields_for(&new.page_type);
        let mut meta = match Meta::from_map(fields, new.meta) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("{}: skipping page: {}", path, e);
                return Ok(None);
            }
        };
        meta.set("build_path", Value::String(path.clone()))
            .map_err(|source| GraphError::Field {
                path: path.clone(),
                source,
            })?;

        let ctx = HookContext {
            source: new.source.as_ref(),
            generation_time: self.options.generation_time,
            site_name: None,
        };
        match self.registry.on_load(&mut meta, &ctx) {
            Ok(()) => {}
            Err(source @ FieldError::ConstReassigned(_)) => {
                return Err(GraphError::Field { path, source });
            }
            Err(e) => {
                tracing::warn!("{}: skipping page: {}", path, e);
                return Ok(None);
            }
        }

        if let Some(validate) = new.page_type.validator
            && let Err(reason) = validate(&meta)
        {
            tracing::warn!("{}: skipping page: {}", path, reason);
            return Ok(None);
        }

        if meta.bool("draft") && !self.options.draft {
            tracing::debug!("{}: draft page skipped", path);
            return Ok(None);
        }

        Ok(Some(Page {
            page_type: new.page_type,
            meta,
            source: new.source,
            node,
            search_root,
            dst: dst.to_string(),
            created_from: new.created_from,
            body: new.body,
            listing: Vec::new(),
            inherited: Mutex::new(HashMap::new()),
        }))
    }
}
