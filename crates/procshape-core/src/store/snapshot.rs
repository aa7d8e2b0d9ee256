//! Per-schema snapshot files and the hydration mapping.
//!
//! A snapshot file holds the analyzed shape of every object of one schema as
//! of the last generation run. Cache hits are rebuilt from these fragments
//! instead of re-fetching and re-parsing the definition.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::{ProcShapeError, ProcShapeResult};
use crate::models::{ContentModel, ObjectDescriptor, ObjectKind, OutputColumn, ParameterInfo};

// ---------------------------------------------------------------------------
// 1. File format
// ---------------------------------------------------------------------------

/// Snapshot of one object: its interface plus the flattened content model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotObject {
    pub name: String,
    #[serde(default)]
    pub kind: ObjectKind,
    #[serde(default)]
    pub modified_ticks: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ParameterInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputColumn>,
    #[serde(flatten)]
    pub content: ContentModel,
}

impl SnapshotObject {
    /// The single descriptor → fragment mapping.
    pub fn from_descriptor(descriptor: &ObjectDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            modified_ticks: descriptor.modified_ticks,
            inputs: descriptor.parameters.clone(),
            outputs: descriptor.output_columns.clone(),
            content: descriptor.content.clone(),
        }
    }
}

/// The single fragment → descriptor mapping used for cache hits.
pub fn hydrate(schema: &str, object: &SnapshotObject) -> ObjectDescriptor {
    ObjectDescriptor {
        kind: object.kind,
        schema: schema.to_string(),
        name: object.name.clone(),
        modified_ticks: object.modified_ticks,
        definition: None,
        parameters: object.inputs.clone(),
        output_columns: object.outputs.clone(),
        content: object.content.clone(),
        hydrated: true,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub schema: String,
    #[serde(default)]
    pub objects: Vec<SnapshotObject>,
}

impl SchemaSnapshot {
    pub fn from_descriptors<'a>(
        schema: &str,
        descriptors: impl IntoIterator<Item = &'a ObjectDescriptor>,
    ) -> Self {
        let mut objects: Vec<SnapshotObject> = descriptors
            .into_iter()
            .map(SnapshotObject::from_descriptor)
            .collect();
        objects.sort_by_key(|o| o.name.to_lowercase());
        Self {
            schema: schema.to_string(),
            objects,
        }
    }

    pub fn object(&self, name: &str) -> Option<&SnapshotObject> {
        self.objects
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(name))
    }
}

// ---------------------------------------------------------------------------
// 2. Index over all snapshot files
// ---------------------------------------------------------------------------

/// All snapshots found on disk, keyed by lower-cased schema name.
#[derive(Clone, Debug, Default)]
pub struct SnapshotIndex {
    schemas: IndexMap<String, SchemaSnapshot>,
}

impl SnapshotIndex {
    pub fn insert(&mut self, snapshot: SchemaSnapshot) {
        self.schemas.insert(snapshot.schema.to_lowercase(), snapshot);
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn known_schemas(&self) -> impl Iterator<Item = &str> {
        self.schemas.values().map(|s| s.schema.as_str())
    }

    pub fn is_known(&self, schema: &str) -> bool {
        self.schemas.contains_key(&schema.to_lowercase())
    }

    pub fn lookup(&self, schema: &str, name: &str) -> Option<&SnapshotObject> {
        self.schemas
            .get(&schema.to_lowercase())
            .and_then(|snapshot| snapshot.object(name))
    }
}

// ---------------------------------------------------------------------------
// 3. SnapshotStore
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the snapshot directory. Unreadable or corrupt files are skipped.
    pub fn load(&self) -> SnapshotIndex {
        let mut index = SnapshotIndex::default();
        if !self.dir.is_dir() {
            debug!("No snapshot directory at {}", self.dir.display());
            return index;
        }
        for entry in WalkDir::new(&self.dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            match read_schema_file(path) {
                Ok(snapshot) => index.insert(snapshot),
                Err(e) => warn!("Skipping snapshot file {}: {e}", path.display()),
            }
        }
        debug!(
            "Loaded {} schema snapshots from {}",
            index.schemas.len(),
            self.dir.display()
        );
        index
    }

    /// Write one schema snapshot, replacing any previous file for the schema.
    pub fn save_schema(&self, snapshot: &SchemaSnapshot) -> ProcShapeResult<PathBuf> {
        let file_stem = sanitize_file_stem(&snapshot.schema);
        if file_stem.is_empty() {
            return Err(ProcShapeError::Snapshot(
                "snapshot has an empty schema name".to_string(),
            ));
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{file_stem}.json"));
        let tmp = self.dir.join(format!("{file_stem}.json.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

fn read_schema_file(path: &Path) -> ProcShapeResult<SchemaSnapshot> {
    let raw = fs::read_to_string(path)?;
    let snapshot: SchemaSnapshot = serde_json::from_str(&raw)?;
    if snapshot.schema.trim().is_empty() {
        return Err(ProcShapeError::Snapshot("missing schema name".to_string()));
    }
    Ok(snapshot)
}

fn sanitize_file_stem(schema: &str) -> String {
    schema
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
