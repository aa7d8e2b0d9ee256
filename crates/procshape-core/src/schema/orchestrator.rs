//! End-to-end generation pipeline.
//!
//! `Enumerate → Filter → per object {cache hit ? hydrate : analyze} →
//! forwarding → cache save`, strictly sequential. Only Metadata Source
//! failures and cancellation abort a run; everything else degrades.

use std::collections::HashMap;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::analyzer::{ContentAnalyzer, TypeResolver};
use crate::config::ProjectConfig;
use crate::errors::ProcShapeResult;
use crate::models::{
    CacheEntry, CacheSnapshot, ContentModel, ObjectDescriptor, ObjectKind, OutputColumn, ResultColumn,
    ResultSet,
};
use crate::schema::filter::SelectionPolicy;
use crate::schema::forwarding::ForwardingResolver;
use crate::schema::source::{CancellationToken, MetadataSource, ObjectHeader};
use crate::store::cache::{compute_fingerprint, CacheStore};
use crate::store::snapshot::{hydrate, SchemaSnapshot, SnapshotIndex, SnapshotStore};

// ---------------------------------------------------------------------------
// 1. Progress reporting
// ---------------------------------------------------------------------------

/// How one object was obtained in this run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectAction {
    Hydrated,
    Analyzed,
}

/// Observer of a run. Implementations must not influence the pipeline.
pub trait ProgressSink {
    fn stage(&self, _stage: &str) {}

    fn object(&self, _index: usize, _total: usize, _object: &ObjectHeader, _action: ObjectAction) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

// ---------------------------------------------------------------------------
// 2. Run output
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fingerprint: String,
    pub total: usize,
    pub skipped: usize,
    pub reparsed: usize,
    pub fallback_parsed: usize,
    pub unresolved_exec_targets: usize,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaOutput {
    pub schema: String,
    pub objects: Vec<ObjectDescriptor>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOutput {
    pub schemas: Vec<SchemaOutput>,
    pub summary: RunSummary,
}

impl RunOutput {
    pub fn descriptors(&self) -> impl Iterator<Item = &ObjectDescriptor> {
        self.schemas.iter().flat_map(|s| s.objects.iter())
    }

    pub fn find(&self, schema: &str, name: &str) -> Option<&ObjectDescriptor> {
        self.descriptors().find(|d| {
            d.schema.eq_ignore_ascii_case(schema) && d.name.eq_ignore_ascii_case(name)
        })
    }

    /// Snapshot fragments for every schema, as the emitter persists them.
    pub fn snapshots(&self) -> Vec<SchemaSnapshot> {
        self.schemas
            .iter()
            .map(|s| SchemaSnapshot::from_descriptors(&s.schema, &s.objects))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// 3. SchemaOrchestrator
// ---------------------------------------------------------------------------

pub struct SchemaOrchestrator<'a> {
    config: &'a ProjectConfig,
    source: &'a dyn MetadataSource,
    resolver: &'a dyn TypeResolver,
    progress: &'a dyn ProgressSink,
    cache: CacheStore,
    snapshots: SnapshotStore,
}

impl<'a> SchemaOrchestrator<'a> {
    pub fn new(
        config: &'a ProjectConfig,
        source: &'a dyn MetadataSource,
        resolver: &'a dyn TypeResolver,
    ) -> Self {
        Self {
            config,
            source,
            resolver,
            progress: &NoopProgress,
            cache: CacheStore::new(&config.cache_dir),
            snapshots: SnapshotStore::new(&config.snapshot_dir),
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn run(&self, cancel: &CancellationToken) -> ProcShapeResult<RunOutput> {
        let started = Instant::now();

        self.progress.stage("enumerate");
        cancel.check()?;
        let headers = self.source.list_objects(cancel)?;

        self.progress.stage("filter");
        let index = self.snapshots.load();
        let policy = SelectionPolicy::new(self.config, index.known_schemas());
        let selected: Vec<ObjectHeader> = headers.into_iter().filter(|h| policy.includes(h)).collect();

        let mut schemas: Vec<String> = Vec::new();
        for header in &selected {
            if !schemas.iter().any(|s| s.eq_ignore_ascii_case(&header.schema)) {
                schemas.push(header.schema.clone());
            }
        }
        let fingerprint = compute_fingerprint(self.config.identity(), &schemas, selected.len());
        let prior = if self.config.no_cache {
            debug!("Cache reads disabled");
            None
        } else {
            self.cache.load(&fingerprint)
        };
        info!(
            "Processing {} objects in {} schemas (fingerprint {fingerprint}, warm cache: {})",
            selected.len(),
            schemas.len(),
            prior.is_some()
        );

        self.progress.stage("analyze");
        let analyzer = ContentAnalyzer::new(self.resolver);
        let prior_ticks = prior.as_ref().map(CacheSnapshot::ticks_by_object);
        let mut summary = RunSummary {
            fingerprint: fingerprint.clone(),
            total: selected.len(),
            ..RunSummary::default()
        };
        let mut descriptors = Vec::with_capacity(selected.len());
        let mut entries = Vec::with_capacity(selected.len());

        for (i, header) in selected.iter().enumerate() {
            let hydrated = self.try_hydrate(header, prior_ticks.as_ref(), &index, &policy);
            let (descriptor, action) = match hydrated {
                Some(descriptor) => {
                    summary.skipped += 1;
                    (descriptor, ObjectAction::Hydrated)
                }
                None => {
                    let descriptor = self.analyze(header, &analyzer, cancel)?;
                    summary.reparsed += 1;
                    if descriptor.content.used_fallback_parser {
                        summary.fallback_parsed += 1;
                    }
                    (descriptor, ObjectAction::Analyzed)
                }
            };
            self.progress.object(i, selected.len(), header, action);
            entries.push(CacheEntry {
                schema: header.schema.clone(),
                name: header.name.clone(),
                modified_ticks: header.modified_ticks,
            });
            descriptors.push(descriptor);
        }

        self.progress.stage("forwarding");
        let report = ForwardingResolver::resolve(&mut descriptors);
        summary.unresolved_exec_targets = report.unresolved;

        cancel.check()?;
        self.progress.stage("save");
        self.cache
            .save(&fingerprint, &CacheSnapshot::new(fingerprint.clone(), entries));

        let mut grouped: IndexMap<String, SchemaOutput> = IndexMap::new();
        for descriptor in descriptors {
            grouped
                .entry(descriptor.schema.to_lowercase())
                .or_insert_with(|| SchemaOutput {
                    schema: descriptor.schema.clone(),
                    objects: Vec::new(),
                })
                .objects
                .push(descriptor);
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Run finished: {} objects, {} hydrated, {} reparsed, {} via fallback parser, {} unresolved EXEC targets in {}ms",
            summary.total,
            summary.skipped,
            summary.reparsed,
            summary.fallback_parsed,
            summary.unresolved_exec_targets,
            summary.elapsed_ms
        );
        Ok(RunOutput {
            schemas: grouped.into_values().collect(),
            summary,
        })
    }

    /// Hydrate from the prior snapshot when the cache proves the object is
    /// unchanged. A missing fragment, or one written for other ticks, means a
    /// reparse.
    fn try_hydrate(
        &self,
        header: &ObjectHeader,
        prior_ticks: Option<&HashMap<(String, String), i64>>,
        index: &SnapshotIndex,
        policy: &SelectionPolicy<'_>,
    ) -> Option<ObjectDescriptor> {
        let key = (header.schema.to_lowercase(), header.name.to_lowercase());
        let cached_ticks = *prior_ticks?.get(&key)?;
        if cached_ticks != header.modified_ticks {
            debug!("{} changed, reparsing", header.qualified_name());
            return None;
        }
        if policy.forces_reparse(header) {
            debug!("{} matches a force-reparse pattern", header.qualified_name());
            return None;
        }
        let Some(object) = index.lookup(&header.schema, &header.name) else {
            debug!("{} has no snapshot fragment, reparsing", header.qualified_name());
            return None;
        };
        if object.modified_ticks != header.modified_ticks {
            debug!(
                "{} snapshot fragment is stale ({} != {}), reparsing",
                header.qualified_name(),
                object.modified_ticks,
                header.modified_ticks
            );
            return None;
        }
        let mut descriptor = hydrate(&header.schema, object);
        descriptor.kind = header.kind;
        descriptor.name = header.name.clone();
        descriptor.modified_ticks = header.modified_ticks;
        Some(descriptor)
    }

    fn analyze(
        &self,
        header: &ObjectHeader,
        analyzer: &ContentAnalyzer<'_>,
        cancel: &CancellationToken,
    ) -> ProcShapeResult<ObjectDescriptor> {
        cancel.check()?;
        let definition = self.source.fetch_definition(header, cancel)?;
        cancel.check()?;
        let parameters = self.source.fetch_parameters(header, cancel)?;
        let output_columns = if header.kind == ObjectKind::TableFunction {
            cancel.check()?;
            self.source.fetch_output_columns(header, cancel)?
        } else {
            Vec::new()
        };

        let mut content = match definition.as_deref() {
            Some(text) if !text.trim().is_empty() => analyzer.analyze(text, header.kind),
            _ => ContentModel {
                diagnostics: vec![format!(
                    "definition of {} is not available",
                    header.qualified_name()
                )],
                ..ContentModel::default()
            },
        };
        if header.kind == ObjectKind::TableFunction
            && content.result_sets.is_empty()
            && !output_columns.is_empty()
        {
            content.result_sets.push(declared_result_set(&output_columns));
        }
        debug!(
            "Analyzed {}: {} result sets, {} EXEC calls, {} parse errors",
            header.qualified_name(),
            content.result_sets.len(),
            content.executed_procedures.len(),
            content.parse_error_count
        );

        Ok(ObjectDescriptor {
            kind: header.kind,
            schema: header.schema.clone(),
            name: header.name.clone(),
            modified_ticks: header.modified_ticks,
            definition,
            parameters,
            output_columns,
            content,
            hydrated: false,
        })
    }
}

fn declared_result_set(columns: &[OutputColumn]) -> ResultSet {
    ResultSet {
        columns: columns
            .iter()
            .map(|c| ResultColumn {
                name: c.name.clone(),
                sql_type_name: c.sql_type_name.clone(),
                max_length: c.max_length,
                is_nullable: Some(c.is_nullable),
                ..ResultColumn::default()
            })
            .collect(),
        ..ResultSet::default()
    }
}
