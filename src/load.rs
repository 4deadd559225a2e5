//! Directory loading: scanned tree to graph.
//!
//! Each directory maps to a node. Its files are offered to features in
//! feature order until one claims them; files marked `asset`, and files no
//! feature wants, become asset pages. Subdirectories are loaded after the
//! files of their parent. A node that ends up with content but no index
//! page gets a synthesized `dir` page; a node that ends up empty is pruned.

use crate::features::{FeatureError, Features, PendingFiles};
use crate::fields::truthy;
use crate::front_matter::MetaMap;
use crate::node::{Graph, NewPage, NodeId};
use crate::render::{PageType, asset_page_type, dir_page_type};
use crate::scan::{SourceDir, SourceFile};
use serde_json::Value;
use std::sync::Arc;

pub struct Loader<'a> {
    graph: &'a mut Graph,
    features: &'a mut Features,
    asset_type: Arc<PageType>,
    dir_type: Arc<PageType>,
}

impl<'a> Loader<'a> {
    pub fn new(graph: &'a mut Graph, features: &'a mut Features) -> Self {
        Self {
            graph,
            features,
            asset_type: asset_page_type(),
            dir_type: dir_page_type(),
        }
    }

    /// Load the whole tree into the root node.
    pub fn load(&mut self, tree: &SourceDir) -> Result<(), FeatureError> {
        let root = self.graph.root();
        self.populate(root, tree)?;
        tracing::debug!("loaded {} pages", self.graph.page_count());
        Ok(())
    }

    fn populate(&mut self, node: NodeId, dir: &SourceDir) -> Result<(), FeatureError> {
        self.graph.node_mut(node).meta = dir.meta.clone();

        if dir.asset {
            for sf in dir.files.values() {
                self.add_asset(node, sf)?;
            }
        } else {
            let mut pending = PendingFiles::new();
            for (name, sf) in &dir.files {
                if sf.meta.get("asset").is_some_and(truthy) {
                    self.add_asset(node, sf)?;
                } else {
                    pending.insert(name.clone(), sf.clone());
                }
            }
            for feature in self.features.ordered_mut() {
                if pending.is_empty() {
                    break;
                }
                let pages = feature.load_dir(self.graph, node, dir, &mut pending)?;
                if !pages.is_empty() {
                    tracing::debug!(
                        "{}: {} loaded {} pages",
                        dir.src.relpath,
                        feature.name(),
                        pages.len()
                    );
                }
            }
            for sf in pending.values() {
                if sf.file.is_regular_file() {
                    self.add_asset(node, sf)?;
                }
            }
        }

        for (name, sub) in &dir.subdirs {
            let child = self.graph.ensure_child(node, name);
            self.populate(child, sub)?;
            self.graph.prune(child);
        }

        let n = self.graph.node(node);
        if n.page.is_none() && !n.is_empty() && !dir.asset {
            self.add_dir_index(node, dir)?;
        }
        Ok(())
    }

    fn add_asset(&mut self, node: NodeId, sf: &SourceFile) -> Result<(), FeatureError> {
        let new = NewPage::new(Arc::clone(&self.asset_type), sf.meta.clone()).source(sf.file.clone());
        self.graph.create_leaf_page(node, sf.file.name(), new)?;
        Ok(())
    }

    fn add_dir_index(&mut self, node: NodeId, dir: &SourceDir) -> Result<(), FeatureError> {
        let mut meta: MetaMap = self.graph.registry().derive(&dir.meta);
        meta.remove("asset");
        let title = dir
            .meta
            .get("title")
            .cloned()
            .or_else(|| {
                let name = &self.graph.node(node).name;
                (!name.is_empty()).then(|| Value::String(name.clone()))
            });
        if let Some(title) = title {
            meta.insert("title".into(), title);
        }
        let new = NewPage::new(Arc::clone(&self.dir_type), meta).source(dir.src.clone());
        self.graph.create_index_page(node, None, new)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Feature;
    use crate::file::File;
    use crate::metadata::MetadataRegistry;
    use crate::node::{PageId, Phase};
    use crate::render::{ASSET, DIR};
    use crate::scan::Scanner;
    use crate::site_path::SitePath;
    use crate::test_helpers::{test_graph, text_page_type, write_tree};
    use serde_json::json;
    use tempfile::TempDir;

    /// Claims `*.txt` files as index pages of a child node named after them.
    struct Text {
        page_type: Arc<PageType>,
    }

    impl Feature for Text {
        fn name(&self) -> &'static str {
            "text"
        }

        fn load_dir(
            &mut self,
            graph: &mut Graph,
            node: NodeId,
            _dir: &SourceDir,
            pending: &mut PendingFiles,
        ) -> Result<Vec<PageId>, FeatureError> {
            let names: Vec<String> = pending
                .keys()
                .filter(|n| n.ends_with(".txt"))
                .cloned()
                .collect();
            let mut pages = Vec::new();
            for name in names {
                let Some(sf) = pending.remove(&name) else {
                    continue;
                };
                let stem = name.trim_end_matches(".txt");
                let new = NewPage::new(Arc::clone(&self.page_type), sf.meta).source(sf.file);
                let sub = (stem != "index").then(|| SitePath::from_string(stem));
                if let Some(id) = graph.create_index_page(node, sub.as_ref(), new)? {
                    pages.push(id);
                }
            }
            Ok(pages)
        }
    }

    fn load(tmp: &TempDir) -> Graph {
        let mut features = Features::new();
        features.register(Box::new(Text {
            page_type: text_page_type(),
        }));
        features.commit(&mut MetadataRegistry::new()).unwrap();
        let registry = MetadataRegistry::with_well_known();
        let root = File::root(tmp.path()).unwrap();
        let mut meta = MetaMap::new();
        meta.insert("site_path".into(), json!("/"));
        let tree = Scanner::new(&mut features, &registry)
            .scan_tree(&root, meta)
            .unwrap();

        let mut graph = test_graph();
        graph.set_phase(Phase::Load);
        Loader::new(&mut graph, &mut features).load(&tree).unwrap();
        graph
    }

    fn page_at(graph: &Graph, path: &str) -> Option<PageId> {
        graph.lookup_page(graph.root(), &SitePath::from_string(path))
    }

    #[test]
    fn features_claim_files_and_leftovers_become_assets() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("index.txt", "home"), ("about.txt", "a"), ("logo.png", "png")]);
        let graph = load(&tmp);

        let home = page_at(&graph, "").unwrap();
        assert_eq!(graph.page(home).type_name(), "text");
        let about = page_at(&graph, "about").unwrap();
        assert_eq!(graph.page(about).build_path(), "about/index.html");
        let logo = page_at(&graph, "logo.png").unwrap();
        assert_eq!(graph.page(logo).type_name(), ASSET);
    }

    #[test]
    fn asset_rule_bypasses_features() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[(".sitegraph", "files:\n  'raw.txt': {asset: yes}\n"), ("raw.txt", "x")],
        );
        let graph = load(&tmp);
        let raw = page_at(&graph, "raw.txt").unwrap();
        assert_eq!(graph.page(raw).type_name(), ASSET);
        assert!(graph.child(graph.root(), "raw").is_none());
    }

    #[test]
    fn asset_subtree_is_copied_whole() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[(".sitegraph", "dirs:\n  static: {asset: yes}\n"), ("static/a/notes.txt", "x")],
        );
        let graph = load(&tmp);
        let notes = page_at(&graph, "static/a/notes.txt").unwrap();
        assert_eq!(graph.page(notes).type_name(), ASSET);
        // Asset directories get no index page
        let stat = graph.child(graph.root(), "static").unwrap();
        assert!(graph.node(stat).page.is_none());
    }

    #[test]
    fn directories_without_index_get_a_dir_page() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("photos/a.png", "x")]);
        let graph = load(&tmp);
        let photos = page_at(&graph, "photos").unwrap();
        let page = graph.page(photos);
        assert_eq!(page.type_name(), DIR);
        assert_eq!(page.meta.str("title"), Some("photos"));
        assert_eq!(page.build_path(), "photos/index.html");
    }

    #[test]
    fn directory_with_only_ignored_files_is_pruned() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("empty/.sitegraph", "ignore: ['*.tmp']\n"),
                ("empty/scratch.tmp", "x"),
                ("a.png", "y"),
            ],
        );
        let graph = load(&tmp);
        assert!(graph.child(graph.root(), "empty").is_none());
    }

    #[test]
    fn page_for_child_node_and_directory_merge() {
        // blog.txt creates the index of node blog/, which the directory
        // blog/ then fills
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("blog.txt", "b"), ("blog/post.txt", "p")]);
        let graph = load(&tmp);
        let blog = page_at(&graph, "blog").unwrap();
        assert_eq!(graph.page(blog).type_name(), "text");
        assert!(page_at(&graph, "blog/post").is_some());
    }

    #[test]
    fn directory_metadata_reaches_pages() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[("blog/.sitegraph", "author: Ann\n"), ("blog/post.txt", "p")],
        );
        let graph = load(&tmp);
        let post = page_at(&graph, "blog/post").unwrap();
        assert_eq!(graph.meta_str(post, "author").as_deref(), Some("Ann"));
        let blog = graph.child(graph.root(), "blog").unwrap();
        assert_eq!(graph.node(blog).meta["author"], "Ann");
    }
}
