//! Site orchestration.
//!
//! A [`Site`] owns the settings, the committed features and the graph, and
//! drives the graph through its phases:
//!
//! ```text
//! new()    commit features (order, metadata)     cycles fail here
//! load()   scan → load → organize → analyze → finalize
//! write()  render into the output directory
//! ```
//!
//! Every phase runs over the whole tree before the next one starts, with
//! features called in their committed order.

use crate::builder::{self, BuildError, BuildReport};
use crate::cache::Caches;
use crate::config::{self, ConfigError, Settings};
use crate::features::{Feature, FeatureError, Features, default_features};
use crate::file::File;
use crate::load::Loader;
use crate::metadata::MetadataRegistry;
use crate::node::{Graph, GraphError, GraphOptions, Phase};
use crate::scan::{ScanError, Scanner};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Build error: {0}")]
    Build(#[from] BuildError),
    #[error("content directory {path}: {source}")]
    Content { path: PathBuf, source: io::Error },
    #[error("site is already loaded")]
    AlreadyLoaded,
    #[error("site must be loaded before it is written")]
    NotLoaded,
}

pub struct Site {
    settings: Settings,
    project_root: PathBuf,
    features: Features,
    graph: Graph,
}

impl Site {
    /// A site generated now.
    pub fn new(
        settings: Settings,
        project_root: &Path,
        features: Vec<Box<dyn Feature>>,
    ) -> Result<Self, SiteError> {
        Self::with_generation_time(settings, project_root, features, Utc::now())
    }

    /// A site with the default features.
    pub fn with_default_features(settings: Settings, project_root: &Path) -> Result<Self, SiteError> {
        let features = default_features(&settings);
        Self::new(settings, project_root, features)
    }

    /// A site whose drafts are judged against `generation_time`.
    pub fn with_generation_time(
        settings: Settings,
        project_root: &Path,
        features: Vec<Box<dyn Feature>>,
        generation_time: DateTime<Utc>,
    ) -> Result<Self, SiteError> {
        settings.validate()?;
        let mut registered = Features::new();
        for feature in features {
            registered.register(feature);
        }
        let mut registry = MetadataRegistry::with_well_known();
        registered.commit(&mut registry)?;
        tracing::debug!("features: {}", registered.names().join(", "));

        let options = GraphOptions {
            generation_time,
            draft: settings.draft,
            site_root: settings.site_root.clone(),
        };
        Ok(Self {
            graph: Graph::new(options, Arc::new(registry)),
            project_root: project_root.to_path_buf(),
            settings,
            features: registered,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn content_dir(&self) -> PathBuf {
        self.settings.content_dir(&self.project_root)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.settings.output_dir(&self.project_root)
    }

    /// Caches for this project, honoring `cache_rebuilds`.
    pub fn caches(&self) -> Caches {
        Caches::new(&self.project_root, self.settings.cache_rebuilds)
    }

    /// Build the complete graph from the content directory.
    pub fn load(&mut self) -> Result<(), SiteError> {
        if self.graph.phase() != Phase::Setup {
            return Err(SiteError::AlreadyLoaded);
        }
        let content = self.content_dir();
        let root = File::root(&content).map_err(|source| SiteError::Content {
            path: content.clone(),
            source,
        })?;

        self.graph.set_phase(Phase::Load);
        let tree = Scanner::new(&mut self.features, self.graph.registry())
            .scan_tree(&root, self.settings.root_meta())?;
        Loader::new(&mut self.graph, &mut self.features).load(&tree)?;
        self.default_site_name(&root)?;
        tracing::info!(
            "loaded {} pages from {}",
            self.graph.page_count(),
            content.display()
        );

        self.graph.set_phase(Phase::Organize);
        for feature in self.features.ordered_mut() {
            feature.organize(&mut self.graph)?;
        }

        self.graph.set_phase(Phase::Analyze);
        self.graph.run_analyze_hooks()?;
        for feature in self.features.ordered_mut() {
            feature.analyze(&mut self.graph)?;
        }

        self.graph.set_phase(Phase::Finalize);
        for feature in self.features.ordered_mut() {
            feature.finalize(&mut self.graph)?;
        }

        self.graph.set_phase(Phase::Render);
        tracing::debug!("graph complete: {} pages", self.graph.page_count());
        Ok(())
    }

    /// Render the loaded site into `output`, which must not be the content
    /// directory or one of its ancestors.
    pub fn write(&self, output: &Path, caches: &Caches) -> Result<BuildReport, SiteError> {
        if self.graph.phase() != Phase::Render {
            return Err(SiteError::NotLoaded);
        }
        config::check_output_dir(&self.content_dir(), output)?;
        Ok(builder::write(&self.graph, output, caches)?)
    }

    /// Without a configured name, the site is named after the root index
    /// title, then after the content directory.
    fn default_site_name(&mut self, content: &File) -> Result<(), GraphError> {
        let Some(root_page) = self.graph.node(self.graph.root()).page else {
            return Ok(());
        };
        if self.graph.meta_str(root_page, "site_name").is_some() {
            return Ok(());
        }
        let page = self.graph.page_mut(root_page);
        let name = page
            .meta
            .str("title")
            .unwrap_or_else(|| content.name())
            .to_string();
        tracing::debug!("site name defaults to '{}'", name);
        page.meta
            .set("site_name", Value::String(name))
            .map_err(|source| GraphError::Field {
                path: page.build_path().to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dirs::DirsFeature;
    use crate::test_helpers::{build_paths, find_page, read, write_tree};
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        write_tree(&tmp.path().join("content"), files);
        tmp
    }

    fn loaded(tmp: &TempDir, settings: Settings) -> Site {
        let mut site = Site::with_default_features(settings, tmp.path()).unwrap();
        site.load().unwrap();
        site
    }

    // =========================================================================
    // Loading
    // =========================================================================

    #[test]
    fn load_builds_the_whole_graph() {
        let tmp = project(&[
            ("index.md", "# Home\n"),
            ("blog/first.md", "---\ntags: [rust]\naliases: [/old]\n---\n# First\n"),
            ("blog/logo.png", "PNG"),
        ]);
        let site = loaded(&tmp, Settings::default());
        let paths = build_paths(site.graph());
        for expected in [
            "index.html",
            "blog/index.html",
            "blog/first/index.html",
            "blog/logo.png",
            "tags/index.html",
            "tags/rust/index.html",
            "old/index.html",
        ] {
            assert!(paths.contains(&expected.to_string()), "{expected} missing: {paths:?}");
        }
        assert_eq!(site.graph().phase(), Phase::Render);
    }

    #[test]
    fn site_name_from_settings_wins() {
        let tmp = project(&[("index.md", "# Home\n")]);
        let settings = Settings {
            site_name: Some("Configured".into()),
            ..Settings::default()
        };
        let site = loaded(&tmp, settings);
        let home = find_page(site.graph(), "index.html");
        assert_eq!(site.graph().meta_str(home, "site_name").as_deref(), Some("Configured"));
    }

    #[test]
    fn site_name_falls_back_to_root_title_then_directory() {
        let tmp = project(&[("index.md", "# Home Page\n"), ("a/b.md", "# B\n")]);
        let site = loaded(&tmp, Settings::default());
        let b = find_page(site.graph(), "a/b/index.html");
        assert_eq!(site.graph().meta_str(b, "site_name").as_deref(), Some("Home Page"));

        let tmp = project(&[("a.md", "# A\n")]);
        let site = loaded(&tmp, Settings::default());
        let a = find_page(site.graph(), "a/index.html");
        assert_eq!(site.graph().meta_str(a, "site_name").as_deref(), Some("content"));
    }

    #[test]
    fn missing_content_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut site = Site::with_default_features(Settings::default(), tmp.path()).unwrap();
        assert!(matches!(site.load(), Err(SiteError::Content { .. })));
    }

    #[test]
    fn load_twice_is_an_error() {
        let tmp = project(&[("index.md", "# Home\n")]);
        let mut site = loaded(&tmp, Settings::default());
        assert!(matches!(site.load(), Err(SiteError::AlreadyLoaded)));
    }

    // =========================================================================
    // Features
    // =========================================================================

    struct Loop;

    impl Feature for Loop {
        fn name(&self) -> &'static str {
            "loop"
        }

        fn run_before(&self) -> &[&'static str] {
            &["markdown"]
        }

        fn run_after(&self) -> &[&'static str] {
            &["dirs"]
        }
    }

    #[test]
    fn feature_cycle_fails_before_scanning() {
        let tmp = TempDir::new().unwrap();
        let mut features = default_features(&Settings::default());
        features.push(Box::new(Loop));
        let err = Site::new(Settings::default(), tmp.path(), features)
            .err()
            .unwrap();
        let SiteError::Feature(FeatureError::Cycle(cycle)) = err else {
            panic!("expected a cycle error, got {err}");
        };
        assert!(cycle.contains("loop"), "{cycle}");
        assert!(cycle.contains("markdown"), "{cycle}");
    }

    #[test]
    fn features_run_in_committed_order() {
        let tmp = TempDir::new().unwrap();
        // Registered out of order on purpose
        let features: Vec<Box<dyn Feature>> = vec![
            Box::new(DirsFeature::new()),
            Box::new(crate::features::tags::TagsFeature::new("tags")),
            Box::new(crate::features::markdown::MarkdownFeature::new()),
        ];
        let site = Site::new(Settings::default(), tmp.path(), features).unwrap();
        assert_eq!(site.features().names(), vec!["markdown", "tags", "dirs"]);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings {
            site_root: "no-slash".into(),
            ..Settings::default()
        };
        assert!(matches!(
            Site::with_default_features(settings, tmp.path()),
            Err(SiteError::Config(_))
        ));
    }

    // =========================================================================
    // Writing
    // =========================================================================

    #[test]
    fn write_requires_load() {
        let tmp = project(&[("index.md", "# Home\n")]);
        let site = Site::with_default_features(Settings::default(), tmp.path()).unwrap();
        let out = tmp.path().join("web");
        assert!(matches!(
            site.write(&out, &Caches::disabled()),
            Err(SiteError::NotLoaded)
        ));
    }

    #[test]
    fn write_renders_every_page() {
        let tmp = project(&[
            ("index.md", "# Home\n\nSee [post](blog/post.md).\n"),
            ("blog/post.md", "# Post\n"),
        ]);
        let site = loaded(&tmp, Settings::default());
        let report = site.write(&site.output_dir(), &site.caches()).unwrap();
        assert_eq!(report.failed, 0);
        let home = read(&site.output_dir(), "index.html");
        assert!(home.contains(r#"href="/blog/post/""#), "{home}");
        assert!(site.output_dir().join("blog/index.html").is_file());
    }

    #[test]
    fn write_refuses_output_holding_the_content() {
        let tmp = project(&[("index.md", "# Home
"), ("blog/post.md", "# Post
")]);
        let site = loaded(&tmp, Settings::default());
        let content = site.content_dir();
        for output in [
            content.clone(),
            tmp.path().join("./content"),
            content.join("blog/../.."),
            tmp.path().to_path_buf(),
        ] {
            assert!(
                matches!(
                    site.write(&output, &Caches::disabled()),
                    Err(SiteError::Config(ConfigError::Validation(_)))
                ),
                "{}",
                output.display()
            );
        }
        assert_eq!(read(&content, "blog/post.md"), "# Post\n");
        assert!(!content.join("index.html").exists());
    }

    #[test]
    fn dotted_output_setting_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings {
            output: "./content".into(),
            ..Settings::default()
        };
        assert!(matches!(
            Site::with_default_features(settings, tmp.path()),
            Err(SiteError::Config(ConfigError::Validation(_)))
        ));
    }
}
