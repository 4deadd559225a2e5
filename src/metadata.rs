//! Metadata registry: well-known fields shared across features, with hooks.
//!
//! Every entry declares a field and may add up to three hooks:
//!
//! - `on_load` runs on a page right after it is constructed, before it is
//!   validated and registered in the graph. Used to normalize values and
//!   fill computed defaults (`date`, `draft`).
//! - `on_dir_meta` runs while a directory's aggregate metadata is computed
//!   from the metadata its index contributes, letting selected fields
//!   propagate upward (`site_name` from the root index title).
//! - `on_analyze` runs on every page once the graph is stable.
//!
//! Hook lists only contain entries that actually define the hook, so a
//! large page set never pays for no-op calls. Hooks run in registration
//! order, which follows feature order.

use crate::fields::{FieldDef, FieldError, FieldTable, FieldType, Meta, format_date};
use crate::file::File;
use crate::front_matter::MetaMap;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Inputs available to page hooks.
pub struct HookContext<'a> {
    pub source: Option<&'a File>,
    pub generation_time: DateTime<Utc>,
    /// Resolved site name, for fallbacks.
    pub site_name: Option<&'a str>,
}

/// Where a directory sits, for `on_dir_meta` hooks.
pub struct DirMetaContext {
    pub is_root: bool,
}

pub type PageHook = Arc<dyn Fn(&mut Meta, &HookContext<'_>) -> Result<(), FieldError> + Send + Sync>;
pub type DirMetaHook = Arc<dyn Fn(&DirMetaContext, &MetaMap, &mut MetaMap) + Send + Sync>;

/// A field declaration plus its optional lifecycle hooks.
pub struct MetadataEntry {
    pub field: FieldDef,
    pub on_load: Option<PageHook>,
    pub on_dir_meta: Option<DirMetaHook>,
    pub on_analyze: Option<PageHook>,
}

impl MetadataEntry {
    pub fn new(field: FieldDef) -> Self {
        Self {
            field,
            on_load: None,
            on_dir_meta: None,
            on_analyze: None,
        }
    }

    pub fn on_load(
        mut self,
        hook: impl Fn(&mut Meta, &HookContext<'_>) -> Result<(), FieldError> + Send + Sync + 'static,
    ) -> Self {
        self.on_load = Some(Arc::new(hook));
        self
    }

    pub fn on_dir_meta(
        mut self,
        hook: impl Fn(&DirMetaContext, &MetaMap, &mut MetaMap) + Send + Sync + 'static,
    ) -> Self {
        self.on_dir_meta = Some(Arc::new(hook));
        self
    }

    pub fn on_analyze(
        mut self,
        hook: impl Fn(&mut Meta, &HookContext<'_>) -> Result<(), FieldError> + Send + Sync + 'static,
    ) -> Self {
        self.on_analyze = Some(Arc::new(hook));
        self
    }
}

#[derive(Default)]
pub struct MetadataRegistry {
    fields: FieldTable,
    on_load: Vec<(String, PageHook)>,
    on_dir_meta: Vec<(String, DirMetaHook)>,
    on_analyze: Vec<(String, PageHook)>,
}

impl fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataRegistry")
            .field("fields", &self.fields.len())
            .field("on_load", &self.on_load.len())
            .field("on_dir_meta", &self.on_dir_meta.len())
            .field("on_analyze", &self.on_analyze.len())
            .finish()
    }
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the well-known fields.
    pub fn with_well_known() -> Self {
        let mut registry = Self::new();
        for entry in well_known() {
            registry.register(entry);
        }
        registry
    }

    /// Register an entry. A later entry with the same name replaces the
    /// earlier declaration and its hooks.
    pub fn register(&mut self, entry: MetadataEntry) {
        let name = entry.field.name.clone();
        if self.fields.get(&name).is_some() {
            tracing::debug!("metadata '{}' redefined", name);
            self.on_load.retain(|(n, _)| *n != name);
            self.on_dir_meta.retain(|(n, _)| *n != name);
            self.on_analyze.retain(|(n, _)| *n != name);
        }
        if let Some(hook) = entry.on_load {
            self.on_load.push((name.clone(), hook));
        }
        if let Some(hook) = entry.on_dir_meta {
            self.on_dir_meta.push((name.clone(), hook));
        }
        if let Some(hook) = entry.on_analyze {
            self.on_analyze.push((name.clone(), hook));
        }
        self.fields.add(entry.field);
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    /// Metadata a directory passes down to its files and subdirectories.
    ///
    /// Everything propagates except registered fields that are not
    /// inherited (`title`, `date`, ...), which describe a single page.
    pub fn derive(&self, parent: &MetaMap) -> MetaMap {
        parent
            .iter()
            .filter(|(name, _)| self.fields.get(name).is_none_or(FieldDef::is_inherited))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn on_load(&self, meta: &mut Meta, ctx: &HookContext<'_>) -> Result<(), FieldError> {
        for (_, hook) in &self.on_load {
            hook(meta, ctx)?;
        }
        Ok(())
    }

    pub fn on_dir_meta(&self, ctx: &DirMetaContext, index_meta: &MetaMap, dir_meta: &mut MetaMap) {
        for (_, hook) in &self.on_dir_meta {
            hook(ctx, index_meta, dir_meta);
        }
    }

    pub fn on_analyze(&self, meta: &mut Meta, ctx: &HookContext<'_>) -> Result<(), FieldError> {
        for (_, hook) in &self.on_analyze {
            hook(meta, ctx)?;
        }
        Ok(())
    }

    /// Number of registered `(on_load, on_dir_meta, on_analyze)` hooks.
    pub fn hook_counts(&self) -> (usize, usize, usize) {
        (
            self.on_load.len(),
            self.on_dir_meta.len(),
            self.on_analyze.len(),
        )
    }
}

/// Fields every page type understands.
pub fn well_known() -> Vec<MetadataEntry> {
    vec![
        MetadataEntry::new(
            FieldDef::new("site_name", FieldType::String)
                .inherited()
                .doc("Name of the site, shown in page titles and headers."),
        )
        .on_dir_meta(|ctx, index_meta, dir_meta| {
            if ctx.is_root
                && !dir_meta.contains_key("site_name")
                && let Some(title) = index_meta.get("title").and_then(Value::as_str)
            {
                dir_meta.insert("site_name".into(), Value::String(title.to_string()));
            }
        }),
        MetadataEntry::new(
            FieldDef::new("site_url", FieldType::String)
                .inherited()
                .doc("Base URL of the published site."),
        ),
        MetadataEntry::new(
            FieldDef::new("site_path", FieldType::String)
                .inherited()
                .doc("Path of the directory in the site, starting with `/`."),
        ),
        MetadataEntry::new(FieldDef::new("author", FieldType::String).inherited()),
        MetadataEntry::new(
            FieldDef::new("asset", FieldType::Bool)
                .inherited()
                .doc("Load matching files (or whole directories) as static assets."),
        ),
        MetadataEntry::new(FieldDef::new("title", FieldType::String)).on_analyze(|meta, ctx| {
            if meta.contains("title") {
                return Ok(());
            }
            let fallback = ctx
                .source
                .filter(|f| f.is_regular_file())
                .map(|f| f.name().to_string())
                .or_else(|| ctx.site_name.map(str::to_string));
            match fallback {
                Some(title) => meta.set("title", Value::String(title)),
                None => Ok(()),
            }
        }),
        MetadataEntry::new(FieldDef::new("description", FieldType::String)),
        MetadataEntry::new(
            FieldDef::new("date", FieldType::Date)
                .doc("Publication date. Defaults to the source modification time."),
        )
        .on_load(|meta, ctx| {
            if meta.contains("date") {
                return Ok(());
            }
            let date = ctx
                .source
                .and_then(File::mtime)
                .map(DateTime::<Utc>::from_timestamp_nanos)
                .unwrap_or(ctx.generation_time);
            meta.set("date", Value::String(format_date(&date)))
        }),
        MetadataEntry::new(
            FieldDef::new("draft", FieldType::Bool)
                .doc("Set when the page is dated after the build started."),
        )
        .on_load(|meta, ctx| {
            if meta.contains("draft") {
                return Ok(());
            }
            let future = meta.date("date").is_some_and(|d| d > ctx.generation_time);
            meta.set("draft", Value::Bool(future))
        }),
        MetadataEntry::new(
            FieldDef::new("indexed", FieldType::Bool)
                .doc("Show the page in directory listings and taxonomies."),
        )
        .on_load(|meta, _| {
            if meta.contains("indexed") {
                return Ok(());
            }
            meta.set("indexed", Value::Bool(false))
        }),
        MetadataEntry::new(
            FieldDef::new("build_path", FieldType::String)
                .constant()
                .internal()
                .doc("Output path of the page, relative to the output root."),
        ),
    ]
}
