//! FOR JSON detection and column-tree construction.
//!
//! A query block with a `FOR JSON` clause serializes its rows as one JSON
//! document. Scalar subqueries that carry their own `FOR JSON` clause become
//! nested object graphs; `JSON_QUERY(...)` passes already-serialized JSON
//! through unchanged and is treated as an opaque nested value.

use std::collections::HashSet;

use tracing::debug;

use crate::analyzer::ast::{Batch, Expr, ForJson, QueryExpr, QuerySpec, QuerySpecs, SelectItem};
use crate::analyzer::lexer::tokenize;
use crate::analyzer::parser::parse;
use crate::models::ResultColumn;
use crate::models::ResultSet;

/// Nesting depth beyond which nested JSON columns are no longer expanded.
pub const MAX_NESTING_DEPTH: usize = 20;

const FALLBACK_COLUMN_NAME: &str = "col";

/// JSON shape of a definition's selected FOR JSON query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonShape {
    pub returns_json: bool,
    pub returns_json_array: bool,
    pub json_root_property: Option<String>,
    pub has_select_star: bool,
    pub columns: Vec<ResultColumn>,
    pub diagnostics: Vec<String>,
}

// ---------------------------------------------------------------------------
// 1. Column naming and nesting
// ---------------------------------------------------------------------------

/// Output column name: explicit alias, then the last part of a column
/// reference, then the function name, then `col`.
pub fn column_name(item: &SelectItem) -> String {
    if let Some(alias) = &item.alias {
        return alias.clone();
    }
    match &item.expr {
        Expr::Column(parts) => parts
            .last()
            .cloned()
            .unwrap_or_else(|| FALLBACK_COLUMN_NAME.to_string()),
        Expr::Function { name, .. } => name.name().to_string(),
        _ => FALLBACK_COLUMN_NAME.to_string(),
    }
}

/// The subquery of a select item when it is itself a FOR JSON query.
pub fn nested_json_query(expr: &Expr) -> Option<&QueryExpr> {
    match expr {
        Expr::Subquery(query) if query.body.for_json.is_some() => Some(query),
        _ => None,
    }
}

pub fn is_json_query_call(expr: &Expr) -> bool {
    matches!(expr, Expr::Function { name, .. } if name.name().eq_ignore_ascii_case("JSON_QUERY"))
}

/// Column header for a nested FOR JSON subquery; children are filled by the caller.
pub fn nested_column(name: String, for_json: &ForJson) -> ResultColumn {
    ResultColumn {
        name,
        is_nested_json: true,
        returns_json: true,
        returns_json_array: !for_json.without_array_wrapper,
        ..ResultColumn::default()
    }
}

/// Opaque `JSON_QUERY(...)` column: JSON, but not expanded.
pub fn opaque_json_column(name: String) -> ResultColumn {
    ResultColumn {
        name,
        is_nested_json: true,
        returns_json: true,
        ..ResultColumn::default()
    }
}

/// Build the untyped column tree of a query block.
pub fn build_columns(spec: &QuerySpec, depth: usize) -> Vec<ResultColumn> {
    let columns = spec
        .projections()
        .map(|item| item_column(item, depth))
        .collect();
    if spec.for_json.as_ref().is_some_and(|f| f.path_mode) {
        group_path_columns(columns)
    } else {
        columns
    }
}

fn item_column(item: &SelectItem, depth: usize) -> ResultColumn {
    let name = column_name(item);
    if let Some(query) = nested_json_query(&item.expr) {
        if depth >= MAX_NESTING_DEPTH {
            return ResultColumn::leaf(name);
        }
        let for_json = query.body.for_json.clone().unwrap_or_default();
        let mut column = nested_column(name, &for_json);
        column.children = build_columns(&query.body, depth + 1);
        return column;
    }
    if is_json_query_call(&item.expr) {
        return opaque_json_column(name);
    }
    ResultColumn::leaf(name)
}

/// Group dotted FOR JSON PATH aliases (`Address.Street`) into nested
/// objects, keeping first-appearance order.
pub fn group_path_columns(columns: Vec<ResultColumn>) -> Vec<ResultColumn> {
    let mut grouped: Vec<ResultColumn> = Vec::with_capacity(columns.len());
    for mut column in columns {
        let Some((head, rest)) = column.name.split_once('.') else {
            grouped.push(column);
            continue;
        };
        if head.is_empty() || rest.is_empty() {
            grouped.push(column);
            continue;
        }
        let (head, rest) = (head.to_string(), rest.to_string());
        column.name = rest;
        let index = match grouped
            .iter()
            .position(|c| c.is_nested_json && !c.returns_json_array && c.name == head)
        {
            Some(index) => index,
            None => {
                grouped.push(ResultColumn {
                    name: head,
                    is_nested_json: true,
                    returns_json: true,
                    ..ResultColumn::default()
                });
                grouped.len() - 1
            }
        };
        grouped[index].children.push(column);
    }
    for column in grouped.iter_mut() {
        if column.is_nested_json && column.children.iter().any(|c| c.name.contains('.')) {
            let children = std::mem::take(&mut column.children);
            column.children = group_path_columns(children);
        }
    }
    grouped
}

/// Result set of a single query block, with JSON flags from its FOR clause.
pub fn build_result_set(spec: &QuerySpec) -> ResultSet {
    let mut result_set = ResultSet {
        has_select_star: spec.has_star(),
        columns: build_columns(spec, 0),
        position: Some(spec.position),
        ..ResultSet::default()
    };
    if let Some(for_json) = &spec.for_json {
        result_set.returns_json = true;
        result_set.returns_json_array = !for_json.without_array_wrapper;
        result_set.json_root_property = for_json.root.clone();
    }
    result_set
}

// ---------------------------------------------------------------------------
// 2. Candidate selection
// ---------------------------------------------------------------------------

/// Outermost FOR JSON blocks of a batch, in source order. A block nested in
/// another FOR JSON block's select list is a child column of that block.
pub fn candidates(batch: &Batch) -> impl Iterator<Item = &QuerySpec> {
    let nested: HashSet<*const QuerySpec> = batch
        .query_specs()
        .filter(|spec| spec.for_json.is_some())
        .flat_map(|spec| spec.items.iter())
        .flat_map(|item| QuerySpecs::of_expr(&item.expr))
        .map(|spec| spec as *const QuerySpec)
        .collect();
    batch
        .query_specs()
        .filter(move |spec| spec.for_json.is_some() && !nested.contains(&(*spec as *const QuerySpec)))
}

/// Prefer the first candidate whose text names WITHOUT_ARRAY_WRAPPER;
/// otherwise the one with the most top-level non-subquery projections,
/// first wins ties.
pub fn select_candidate<'a>(
    candidates: impl IntoIterator<Item = &'a QuerySpec>,
) -> Option<&'a QuerySpec> {
    let mut richest: Option<(&'a QuerySpec, usize)> = None;
    for spec in candidates {
        if spec.text.to_ascii_uppercase().contains("WITHOUT_ARRAY_WRAPPER") {
            return Some(spec);
        }
        let score = spec
            .projections()
            .filter(|item| !matches!(item.expr, Expr::Subquery(_)))
            .count();
        match richest {
            Some((_, best)) if score <= best => {}
            _ => richest = Some((spec, score)),
        }
    }
    richest.map(|(spec, _)| spec)
}

// ---------------------------------------------------------------------------
// 3. Text entry point
// ---------------------------------------------------------------------------

/// Parse `text` and describe the JSON shape of its selected FOR JSON query.
/// Any lexer or grammar error yields a non-JSON shape plus diagnostics.
pub fn extract(text: &str) -> JsonShape {
    let mut shape = JsonShape::default();
    let tokens = match tokenize(text) {
        Ok(tokens) => tokens,
        Err(message) => {
            shape.diagnostics.push(message);
            return shape;
        }
    };
    let output = parse(&tokens);
    if !output.errors.is_empty() {
        shape
            .diagnostics
            .extend(output.errors.iter().map(|e| format!("parse: {e}")));
        debug!(errors = output.errors.len(), "json shape extraction failed");
        return shape;
    }
    let Some(spec) = select_candidate(candidates(&output.batch)) else {
        return shape;
    };
    let result_set = build_result_set(spec);
    shape.returns_json = result_set.returns_json;
    shape.returns_json_array = result_set.returns_json_array;
    shape.json_root_property = result_set.json_root_property;
    shape.has_select_star = result_set.has_select_star;
    shape.columns = result_set.columns;
    shape
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(columns: &[ResultColumn]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn for_json_path_is_an_array() {
        let shape = extract("SELECT Id, Name FROM dbo.Users FOR JSON PATH");
        assert!(shape.returns_json);
        assert!(shape.returns_json_array);
        assert_eq!(names(&shape.columns), vec!["Id", "Name"]);
    }

    #[test]
    fn without_array_wrapper_is_a_single_object() {
        let shape = extract("SELECT Id, Name FROM dbo.Users FOR JSON PATH, WITHOUT_ARRAY_WRAPPER");
        assert!(shape.returns_json);
        assert!(!shape.returns_json_array);
    }

    #[test]
    fn root_property_is_captured() {
        let shape = extract("SELECT Id FROM dbo.Users FOR JSON AUTO, ROOT('users')");
        assert_eq!(shape.json_root_property.as_deref(), Some("users"));
    }

    #[test]
    fn plain_select_is_not_json() {
        let shape = extract("SELECT Id, Name FROM dbo.Users");
        assert!(!shape.returns_json);
        assert!(shape.columns.is_empty());
    }

    #[test]
    fn nested_subquery_becomes_child_columns() {
        let shape = extract(
            "SELECT u.Id,
                    (SELECT o.OrderId, o.Total FROM dbo.Orders o WHERE o.UserId = u.Id FOR JSON PATH) AS Orders
             FROM dbo.Users u
             FOR JSON PATH",
        );
        assert_eq!(names(&shape.columns), vec!["Id", "Orders"]);
        let orders = &shape.columns[1];
        assert!(orders.is_nested_json);
        assert!(orders.returns_json_array);
        assert_eq!(names(&orders.children), vec!["OrderId", "Total"]);
    }

    #[test]
    fn json_query_is_opaque() {
        let shape = extract("SELECT Id, JSON_QUERY(Payload) AS Payload FROM dbo.Events FOR JSON PATH");
        let payload = &shape.columns[1];
        assert!(payload.is_nested_json);
        assert!(payload.children.is_empty());
    }

    #[test]
    fn alias_resolution_order() {
        let shape = extract(
            "SELECT u.Id, Display = u.Name, COUNT(*), u.Email AS 'Mail', 1 + 1 FROM dbo.Users u FOR JSON AUTO",
        );
        assert_eq!(names(&shape.columns), vec!["Id", "Display", "COUNT", "Mail", "col"]);
    }

    #[test]
    fn dotted_path_aliases_are_grouped() {
        let shape = extract(
            "SELECT Id, Street AS 'Address.Street', City AS 'Address.City', Name
             FROM dbo.Users FOR JSON PATH",
        );
        assert_eq!(names(&shape.columns), vec!["Id", "Address", "Name"]);
        let address = &shape.columns[1];
        assert!(address.is_nested_json);
        assert!(!address.returns_json_array);
        assert_eq!(names(&address.children), vec!["Street", "City"]);
    }

    #[test]
    fn wrapper_candidate_wins_over_richer_projection() {
        let shape = extract(
            "SELECT a, b, c FROM t FOR JSON PATH;
             SELECT Id FROM u FOR JSON PATH, WITHOUT_ARRAY_WRAPPER",
        );
        assert_eq!(names(&shape.columns), vec!["Id"]);
        assert!(!shape.returns_json_array);
    }

    #[test]
    fn richest_projection_wins_first_on_ties() {
        let shape = extract(
            "SELECT a FROM t FOR JSON PATH;
             SELECT b, c FROM t FOR JSON PATH;
             SELECT d, e FROM t FOR JSON PATH",
        );
        assert_eq!(names(&shape.columns), vec!["b", "c"]);
    }

    #[test]
    fn nested_json_blocks_are_not_candidates() {
        let output = parse(
            &tokenize(
                "SELECT u.Id,
                        (SELECT o.OrderId, o.Total, o.Placed FROM dbo.Orders o FOR JSON PATH) AS Orders
                 FROM dbo.Users u
                 FOR JSON PATH;
                 SELECT (SELECT Id FROM dbo.Users FOR JSON PATH) AS Payload",
            )
            .unwrap(),
        );
        assert!(output.errors.is_empty());
        let found: Vec<Vec<String>> = candidates(&output.batch)
            .map(|spec| spec.projections().map(column_name).collect())
            .collect();
        assert_eq!(found, vec![vec!["Id", "Orders"], vec!["Id"]]);
    }

    #[test]
    fn star_sets_flag_without_columns() {
        let shape = extract("SELECT * FROM dbo.Users FOR JSON PATH");
        assert!(shape.has_select_star);
        assert!(shape.columns.is_empty());
    }

    #[test]
    fn parse_error_yields_empty_shape_with_diagnostics() {
        let shape = extract("SELECT FROM FOR JSON PATH");
        assert!(!shape.returns_json);
        assert!(shape.columns.is_empty());
        assert!(!shape.diagnostics.is_empty());
    }

    #[test]
    fn nesting_depth_is_capped() {
        let mut sql = String::from("SELECT 1 AS Leaf FOR JSON PATH");
        for level in 0..(MAX_NESTING_DEPTH + 5) {
            sql = format!("SELECT ({sql}) AS L{level} FOR JSON PATH");
        }
        let output = parse(&tokenize(&sql).unwrap());
        assert!(output.errors.is_empty());
        let outer = output.batch.query_specs().next().unwrap();
        let columns = build_columns(outer, 0);

        let mut depth = 0;
        let mut column = &columns[0];
        while let Some(child) = column.children.first() {
            column = child;
            depth += 1;
        }
        assert_eq!(depth, MAX_NESTING_DEPTH);
        assert!(!column.is_nested_json);
    }
}
