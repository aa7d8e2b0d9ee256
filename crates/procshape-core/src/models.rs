//! Shared typed models used across the analyzer, store and schema layers.
//!
//! Every record serializes with camelCase keys; the same shapes are written
//! to snapshot files and handed to the code emitter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default schema applied to unqualified object names.
pub const DEFAULT_SCHEMA: &str = "dbo";

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

// ---------------------------------------------------------------------------
// 1. ObjectKind
// ---------------------------------------------------------------------------

/// Kind of programmable database object being scaffolded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ObjectKind {
    #[default]
    Procedure,
    ScalarFunction,
    TableFunction,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Procedure => "procedure",
            ObjectKind::ScalarFunction => "scalarFunction",
            ObjectKind::TableFunction => "tableFunction",
        }
    }

    pub fn is_function(&self) -> bool {
        !matches!(self, ObjectKind::Procedure)
    }
}

// ---------------------------------------------------------------------------
// 2. ParameterInfo / OutputColumn
// ---------------------------------------------------------------------------

/// A declared parameter of a procedure or function.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
    pub is_nullable: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub has_default: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub is_output: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub is_table_type: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type_name: Option<String>,
}

impl ParameterInfo {
    /// Parameter name without the leading `@`.
    pub fn property_name(&self) -> &str {
        self.name.trim_start_matches('@')
    }
}

/// A declared output column, as reported by the metadata source for
/// table-valued functions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputColumn {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
    pub is_nullable: bool,
}

// ---------------------------------------------------------------------------
// 3. ColumnReference / ResultColumn
// ---------------------------------------------------------------------------

/// What a result column was resolved against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKind {
    Table,
    Function,
    UserType,
    Parameter,
}

/// Pointer from a result column to its originating object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnReference {
    pub kind: ReferenceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
}

/// One column of a result set. Recursive for nested JSON object graphs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultColumn {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_nullable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
    #[serde(skip_serializing_if = "is_false")]
    pub is_nested_json: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub returns_json: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub returns_json_array: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResultColumn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ColumnReference>,
}

impl ResultColumn {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// 4. ResultSet
// ---------------------------------------------------------------------------

/// One result set produced by an object, in execution order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultSet {
    #[serde(skip_serializing_if = "is_false")]
    pub returns_json: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub returns_json_array: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_root_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_source_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_source_name: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub has_select_star: bool,
    pub columns: Vec<ResultColumn>,
    /// Token offset of the producing statement inside the definition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl ResultSet {
    /// Placeholder marking where another procedure's output belongs.
    pub fn placeholder(schema: &str, name: &str, position: Option<usize>) -> Self {
        Self {
            exec_source_schema: Some(schema.to_string()),
            exec_source_name: Some(name.to_string()),
            position,
            ..Self::default()
        }
    }

    /// An exec source with no columns is still waiting for expansion.
    pub fn is_unresolved_placeholder(&self) -> bool {
        self.exec_source_name.is_some() && self.columns.is_empty()
    }
}

// ---------------------------------------------------------------------------
// 5. ExecutedProcedure / ContentModel
// ---------------------------------------------------------------------------

/// A statically resolvable EXEC target found in a definition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutedProcedure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// `INSERT ... EXEC` consumes the callee's rows instead of forwarding them.
    #[serde(skip_serializing_if = "is_false")]
    pub captures_output: bool,
}

/// Structured description of one object's statements and result shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentModel {
    #[serde(skip_serializing_if = "is_false")]
    pub contains_select: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub contains_insert: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub contains_update: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub contains_delete: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub contains_merge: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub contains_open_json: bool,
    pub result_sets: Vec<ResultSet>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub executed_procedures: Vec<ExecutedProcedure>,
    #[serde(skip_serializing_if = "is_false")]
    pub used_fallback_parser: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub parse_error_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_parse_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl ContentModel {
    /// Record a grammar error, keeping the first message.
    pub fn record_parse_error(&mut self, message: impl Into<String>) {
        self.parse_error_count += 1;
        if self.first_parse_error.is_none() {
            self.first_parse_error = Some(message.into());
        }
    }

    /// EXEC targets whose rows surface as this object's output.
    pub fn forwarded_procedures(&self) -> impl Iterator<Item = &ExecutedProcedure> {
        self.executed_procedures
            .iter()
            .filter(|exec| !exec.captures_output)
    }
}

// ---------------------------------------------------------------------------
// 6. ObjectDescriptor
// ---------------------------------------------------------------------------

/// Fully populated description of one procedure or function for one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectDescriptor {
    pub kind: ObjectKind,
    pub schema: String,
    pub name: String,
    pub modified_ticks: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    pub parameters: Vec<ParameterInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_columns: Vec<OutputColumn>,
    pub content: ContentModel,
    /// True when the content came from a prior snapshot instead of a parse.
    #[serde(skip_serializing_if = "is_false")]
    pub hydrated: bool,
}

impl ObjectDescriptor {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn output_parameters(&self) -> impl Iterator<Item = &ParameterInfo> {
        self.parameters.iter().filter(|p| p.is_output)
    }
}

// ---------------------------------------------------------------------------
// 7. CacheEntry / CacheSnapshot
// ---------------------------------------------------------------------------

/// Last-seen modification ticks of one object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub schema: String,
    pub name: String,
    pub modified_ticks: i64,
}

/// Persisted cache contents for one project fingerprint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub fingerprint: String,
    pub created_utc: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub entries: Vec<CacheEntry>,
}

impl CacheSnapshot {
    pub fn new(fingerprint: impl Into<String>, entries: Vec<CacheEntry>) -> Self {
        let mut snapshot = Self {
            fingerprint: fingerprint.into(),
            created_utc: chrono::Utc::now(),
            entries,
        };
        snapshot.sort_entries();
        snapshot
    }

    /// Sort entries by (schema, name) so that written files diff cleanly.
    pub fn sort_entries(&mut self) {
        self.entries.sort_by(|a, b| {
            (a.schema.to_lowercase(), a.name.to_lowercase())
                .cmp(&(b.schema.to_lowercase(), b.name.to_lowercase()))
        });
    }

    /// Recorded ticks keyed by lower-cased `(schema, name)`.
    pub fn ticks_by_object(&self) -> HashMap<(String, String), i64> {
        self.entries
            .iter()
            .map(|entry| {
                (
                    (entry.schema.to_lowercase(), entry.name.to_lowercase()),
                    entry.modified_ticks,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_unresolved_until_columns_exist() {
        let mut set = ResultSet::placeholder("sales", "GetOrders", Some(4));
        assert!(set.is_unresolved_placeholder());
        set.columns.push(ResultColumn::leaf("Id"));
        assert!(!set.is_unresolved_placeholder());
        assert!(!ResultSet::default().is_unresolved_placeholder());
    }

    #[test]
    fn cache_snapshot_sorts_and_keys_ticks_case_insensitively() {
        let snapshot = CacheSnapshot::new(
            "abc",
            vec![
                CacheEntry {
                    schema: "sales".into(),
                    name: "B".into(),
                    modified_ticks: 2,
                },
                CacheEntry {
                    schema: "dbo".into(),
                    name: "z".into(),
                    modified_ticks: 3,
                },
                CacheEntry {
                    schema: "sales".into(),
                    name: "a".into(),
                    modified_ticks: 1,
                },
            ],
        );
        let names: Vec<_> = snapshot.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "B"]);
        let ticks = snapshot.ticks_by_object();
        assert_eq!(ticks.get(&("sales".to_string(), "b".to_string())), Some(&2));
        assert_eq!(ticks.get(&("dbo".to_string(), "z".to_string())), Some(&3));
        assert!(!ticks.contains_key(&("sales".to_string(), "missing".to_string())));
    }

    #[test]
    fn result_column_serializes_camel_case_without_empty_fields() {
        let column = ResultColumn {
            name: "Id".into(),
            sql_type_name: Some("int".into()),
            is_nullable: Some(false),
            ..ResultColumn::default()
        };
        let json = serde_json::to_value(&column).unwrap();
        assert_eq!(json["sqlTypeName"], "int");
        assert_eq!(json["isNullable"], false);
        assert!(json.get("children").is_none());
        assert!(json.get("isNestedJson").is_none());
    }

    #[test]
    fn parameter_property_name_strips_at_sign() {
        let param = ParameterInfo {
            name: "@CustomerId".into(),
            ..ParameterInfo::default()
        };
        assert_eq!(param.property_name(), "CustomerId");
    }
}
