//! EXEC forwarding: turns delegated calls into placeholder result sets.
//!
//! Runs once over the complete descriptor set, after every object has been
//! analyzed or hydrated. Placeholders stay column-less; the emitter expands
//! them from the target's own result sets.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{
    ColumnReference, ExecutedProcedure, ObjectDescriptor, ReferenceKind, ResultColumn, ResultSet,
    DEFAULT_SCHEMA,
};

/// Counts reported back to the run summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwardingReport {
    pub placeholders: usize,
    pub unresolved: usize,
}

#[derive(Clone, Copy, Default)]
struct JsonHint {
    returns_json: bool,
    returns_json_array: bool,
}

struct Target {
    schema: String,
    name: String,
    hint: Option<JsonHint>,
}

pub struct ForwardingResolver {
    /// (schema, name) lower-cased → index into the descriptor slice.
    by_qualified: HashMap<(String, String), usize>,
    /// name lower-cased → every index carrying that name.
    by_name: HashMap<String, Vec<usize>>,
    names: Vec<(String, String)>,
    hints: Vec<Option<JsonHint>>,
}

impl ForwardingResolver {
    fn index(objects: &[ObjectDescriptor]) -> Self {
        let mut by_qualified = HashMap::new();
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, object) in objects.iter().enumerate() {
            by_qualified.insert((object.schema.to_lowercase(), object.name.to_lowercase()), i);
            by_name.entry(object.name.to_lowercase()).or_default().push(i);
        }
        let names = objects
            .iter()
            .map(|o| (o.schema.clone(), o.name.clone()))
            .collect();
        let hints = objects
            .iter()
            .map(|o| {
                o.content
                    .result_sets
                    .iter()
                    .find(|set| !set.is_unresolved_placeholder())
                    .map(|set| JsonHint {
                        returns_json: set.returns_json,
                        returns_json_array: set.returns_json_array,
                    })
            })
            .collect();
        Self {
            by_qualified,
            by_name,
            names,
            hints,
        }
    }

    /// Normalize forwarding for every object in place.
    pub fn resolve(objects: &mut [ObjectDescriptor]) -> ForwardingReport {
        let resolver = Self::index(objects);
        let mut report = ForwardingReport::default();

        for object in objects.iter_mut() {
            let execs: Vec<ExecutedProcedure> =
                object.content.forwarded_procedures().cloned().collect();
            if execs.is_empty() {
                continue;
            }

            let mut placeholders = Vec::with_capacity(execs.len());
            for exec in &execs {
                let placeholder = match resolver.find(&object.schema, exec) {
                    Some(target) => {
                        let mut set = ResultSet::placeholder(&target.schema, &target.name, exec.position);
                        if let Some(hint) = target.hint {
                            set.returns_json = hint.returns_json;
                            set.returns_json_array = hint.returns_json_array;
                        }
                        set
                    }
                    None => {
                        let schema = exec.schema.as_deref().unwrap_or(&object.schema);
                        warn!(
                            "Unresolved EXEC target {schema}.{} in {}",
                            exec.name,
                            object.qualified_name()
                        );
                        report.unresolved += 1;
                        ResultSet::placeholder(schema, &exec.name, exec.position)
                    }
                };
                placeholders.push(placeholder);
            }
            report.placeholders += placeholders.len();

            let mut local: Vec<ResultSet> = std::mem::take(&mut object.content.result_sets)
                .into_iter()
                .filter(|set| !set.is_unresolved_placeholder())
                .collect();
            synthesize_output_columns(object, &mut local);

            let ordered_by_position = local
                .iter()
                .chain(placeholders.iter())
                .all(|set| set.position.is_some());
            let mut merged = placeholders;
            merged.extend(local);
            if ordered_by_position {
                merged.sort_by_key(|set| set.position);
            }
            debug!(
                "Forwarding for {}: {} result sets ({})",
                object.qualified_name(),
                merged.len(),
                if ordered_by_position { "by position" } else { "placeholders first" }
            );
            object.content.result_sets = merged;
        }
        report
    }

    fn find(&self, caller_schema: &str, exec: &ExecutedProcedure) -> Option<Target> {
        let name = exec.name.to_lowercase();
        let index = match &exec.schema {
            Some(schema) => self.lookup(schema, &name),
            None => self
                .lookup(caller_schema, &name)
                .or_else(|| self.lookup(DEFAULT_SCHEMA, &name))
                .or_else(|| match self.by_name.get(&name) {
                    Some(candidates) if candidates.len() == 1 => Some(candidates[0]),
                    _ => None,
                }),
        }?;
        let (schema, name) = self.names[index].clone();
        Some(Target {
            schema,
            name,
            hint: self.hints[index],
        })
    }

    fn lookup(&self, schema: &str, name: &str) -> Option<usize> {
        self.by_qualified
            .get(&(schema.to_lowercase(), name.to_string()))
            .copied()
    }
}

/// A wrapper whose own result set has no columns exposes its output
/// parameters instead.
fn synthesize_output_columns(object: &ObjectDescriptor, local: &mut [ResultSet]) {
    let outputs: Vec<ResultColumn> = object
        .output_parameters()
        .map(|param| ResultColumn {
            name: param.property_name().to_string(),
            sql_type_name: param.sql_type_name.clone(),
            is_nullable: Some(param.is_nullable),
            max_length: param.max_length,
            user_type_schema: param.user_type_schema.clone(),
            user_type_name: param.user_type_name.clone(),
            reference: Some(ColumnReference {
                kind: ReferenceKind::Parameter,
                schema: None,
                name: param.name.clone(),
            }),
            ..ResultColumn::default()
        })
        .collect();
    if outputs.is_empty() {
        return;
    }
    for set in local
        .iter_mut()
        .filter(|set| set.columns.is_empty() && set.exec_source_name.is_none() && !set.has_select_star)
    {
        set.columns = outputs.clone();
    }
}
