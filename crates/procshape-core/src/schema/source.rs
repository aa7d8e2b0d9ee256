//! Metadata Source boundary.
//!
//! The pipeline pulls everything it knows about the database through
//! `MetadataSource`. Real hosts implement it over their SQL Server connection;
//! `InMemorySource` serves fixtures and JSON dumps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{ProcShapeError, ProcShapeResult};
use crate::models::{ObjectKind, OutputColumn, ParameterInfo};

/// Enumeration record of one object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectHeader {
    #[serde(default)]
    pub kind: ObjectKind,
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub modified_ticks: i64,
}

impl ObjectHeader {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Cooperative cancellation flag shared between the host and a run.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> ProcShapeResult<()> {
        if self.is_cancelled() {
            Err(ProcShapeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Synchronous view of the database catalog.
pub trait MetadataSource {
    fn list_objects(&self, cancel: &CancellationToken) -> ProcShapeResult<Vec<ObjectHeader>>;

    fn fetch_definition(
        &self,
        object: &ObjectHeader,
        cancel: &CancellationToken,
    ) -> ProcShapeResult<Option<String>>;

    fn fetch_parameters(
        &self,
        object: &ObjectHeader,
        cancel: &CancellationToken,
    ) -> ProcShapeResult<Vec<ParameterInfo>>;

    fn fetch_output_columns(
        &self,
        object: &ObjectHeader,
        cancel: &CancellationToken,
    ) -> ProcShapeResult<Vec<OutputColumn>>;
}

// ---------------------------------------------------------------------------
// InMemorySource
// ---------------------------------------------------------------------------

/// One object of an in-memory catalog (also the JSON dump record).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceObject {
    pub kind: ObjectKind,
    pub schema: String,
    pub name: String,
    pub modified_ticks: i64,
    pub definition: Option<String>,
    pub parameters: Vec<ParameterInfo>,
    pub output_columns: Vec<OutputColumn>,
}

impl SourceObject {
    pub fn procedure(schema: &str, name: &str, ticks: i64, definition: &str) -> Self {
        Self {
            kind: ObjectKind::Procedure,
            schema: schema.to_string(),
            name: name.to_string(),
            modified_ticks: ticks,
            definition: Some(definition.to_string()),
            ..Self::default()
        }
    }

    fn header(&self) -> ObjectHeader {
        ObjectHeader {
            kind: self.kind,
            schema: self.schema.clone(),
            name: self.name.clone(),
            modified_ticks: self.modified_ticks,
        }
    }

    fn matches(&self, header: &ObjectHeader) -> bool {
        self.schema.eq_ignore_ascii_case(&header.schema)
            && self.name.eq_ignore_ascii_case(&header.name)
    }
}

/// Which `MetadataSource` call was made.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceCall {
    ListObjects,
    Definition(String),
    Parameters(String),
    OutputColumns(String),
}

/// Fixture-backed source that records every call it serves.
#[derive(Debug, Default)]
pub struct InMemorySource {
    objects: Vec<SourceObject>,
    calls: Mutex<Vec<SourceCall>>,
    fail_on: Option<String>,
}

impl InMemorySource {
    pub fn new(objects: Vec<SourceObject>) -> Self {
        Self {
            objects,
            ..Self::default()
        }
    }

    /// Load a catalog from a JSON array of `SourceObject` records.
    pub fn from_json(raw: &str) -> ProcShapeResult<Self> {
        let objects: Vec<SourceObject> = serde_json::from_str(raw)?;
        if let Some(bad) = objects
            .iter()
            .find(|o| o.schema.trim().is_empty() || o.name.trim().is_empty())
        {
            return Err(ProcShapeError::Parse(format!(
                "catalog entry without schema or name: '{}.{}'",
                bad.schema, bad.name
            )));
        }
        Ok(Self::new(objects))
    }

    /// Make every fetch for `qualified_name` fail with a metadata error.
    pub fn failing_on(mut self, qualified_name: &str) -> Self {
        self.fail_on = Some(qualified_name.to_string());
        self
    }

    pub fn objects_mut(&mut self) -> &mut Vec<SourceObject> {
        &mut self.objects
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().clone()
    }

    pub fn definition_fetch_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, SourceCall::Definition(_)))
            .count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn find(&self, header: &ObjectHeader) -> ProcShapeResult<&SourceObject> {
        let qualified = header.qualified_name();
        if self
            .fail_on
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(&qualified))
        {
            return Err(ProcShapeError::Metadata(format!(
                "failed to read metadata of {qualified}"
            )));
        }
        self.objects
            .iter()
            .find(|o| o.matches(header))
            .ok_or_else(|| ProcShapeError::Metadata(format!("unknown object {qualified}")))
    }
}

impl MetadataSource for InMemorySource {
    fn list_objects(&self, cancel: &CancellationToken) -> ProcShapeResult<Vec<ObjectHeader>> {
        cancel.check()?;
        self.calls.lock().push(SourceCall::ListObjects);
        Ok(self.objects.iter().map(SourceObject::header).collect())
    }

    fn fetch_definition(
        &self,
        object: &ObjectHeader,
        cancel: &CancellationToken,
    ) -> ProcShapeResult<Option<String>> {
        cancel.check()?;
        self.calls
            .lock()
            .push(SourceCall::Definition(object.qualified_name()));
        Ok(self.find(object)?.definition.clone())
    }

    fn fetch_parameters(
        &self,
        object: &ObjectHeader,
        cancel: &CancellationToken,
    ) -> ProcShapeResult<Vec<ParameterInfo>> {
        cancel.check()?;
        self.calls
            .lock()
            .push(SourceCall::Parameters(object.qualified_name()));
        Ok(self.find(object)?.parameters.clone())
    }

    fn fetch_output_columns(
        &self,
        object: &ObjectHeader,
        cancel: &CancellationToken,
    ) -> ProcShapeResult<Vec<OutputColumn>> {
        cancel.check()?;
        self.calls
            .lock()
            .push(SourceCall::OutputColumns(object.qualified_name()));
        Ok(self.find(object)?.output_columns.clone())
    }
}
