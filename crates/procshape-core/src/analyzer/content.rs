//! Content analysis: one object definition in, one `ContentModel` out.
//!
//! The definition is lexed and parsed once. Statement flags, EXEC targets and
//! result sets come from the syntax tree; result columns are shaped by
//! `json_shape` and typed against a scope stack of FROM sources. Grammar
//! errors never abort analysis: recovered statements still contribute, and
//! the regex fallback fills in the coarse flags.

use std::collections::HashMap;

use tracing::debug;

use crate::analyzer::ast::*;
use crate::analyzer::fallback::{self, FallbackScan};
use crate::analyzer::json_shape::{self, MAX_NESTING_DEPTH};
use crate::analyzer::lexer::tokenize;
use crate::analyzer::parser::parse;
use crate::analyzer::types::{
    is_builtin_type, normalize_name, resolve_user_type, split_qualified, TypeInfo, TypeResolver,
};
use crate::models::{
    ColumnReference, ContentModel, ExecutedProcedure, ObjectKind, ReferenceKind, ResultColumn,
    ResultSet, DEFAULT_SCHEMA,
};

/// Analyzes object definitions against an injected type resolver.
pub struct ContentAnalyzer<'r> {
    resolver: &'r dyn TypeResolver,
}

impl<'r> ContentAnalyzer<'r> {
    pub fn new(resolver: &'r dyn TypeResolver) -> Self {
        Self { resolver }
    }

    /// Build the content model of one definition. Never fails.
    pub fn analyze(&self, definition: &str, kind: ObjectKind) -> ContentModel {
        let mut model = ContentModel::default();

        let tokens = match tokenize(definition) {
            Ok(tokens) => tokens,
            Err(message) => {
                model.record_parse_error(message);
                let scan = fallback::scan(definition);
                model.executed_procedures = scan.executed_procedures.clone();
                apply_fallback(&mut model, &scan);
                debug!(kind = kind.as_str(), "tokenizer failed, using fallback parser");
                return model;
            }
        };
        model.contains_open_json = tokens.iter().any(|t| t.is_keyword("OPENJSON"));

        let output = parse(&tokens);
        for error in &output.errors {
            model.record_parse_error(error.to_string());
        }
        if !output.errors.is_empty() {
            apply_fallback(&mut model, &fallback::scan(definition));
            debug!(
                kind = kind.as_str(),
                errors = output.errors.len(),
                "grammar errors, fallback flags merged"
            );
        }

        let mut binder = Binder::new(self.resolver, &output.batch);
        for statement in &output.batch.statements {
            match statement {
                Statement::Query { position, query } => {
                    model.contains_select = true;
                    if kind == ObjectKind::Procedure && query.returns_rows() {
                        model
                            .result_sets
                            .push(binder.query_result_set(query, *position));
                    }
                }
                Statement::Dml(dml) => {
                    match dml.kind {
                        DmlKind::Insert => model.contains_insert = true,
                        DmlKind::Update => model.contains_update = true,
                        DmlKind::Delete => model.contains_delete = true,
                        DmlKind::Merge => model.contains_merge = true,
                    }
                    if !dml.output.is_empty() && !dml.output_into {
                        model.result_sets.push(binder.output_result_set(dml));
                    }
                    if let Some(exec) = &dml.source_exec {
                        record_exec(&mut model, exec, true);
                    }
                }
                Statement::Exec(exec) => record_exec(&mut model, exec, false),
                Statement::Return { position, query } => {
                    if kind == ObjectKind::TableFunction {
                        model
                            .result_sets
                            .push(binder.query_result_set(query, *position));
                    }
                }
                Statement::Declare(_) | Statement::Set { .. } => {}
            }
        }

        if kind == ObjectKind::ScalarFunction {
            if let Some(spec) = json_shape::select_candidate(json_shape::candidates(&output.batch)) {
                let result_set = binder.candidate_result_set(&output.batch, spec);
                model.result_sets.push(result_set);
            }
        }
        model
    }
}

fn record_exec(model: &mut ContentModel, exec: &ExecStatement, captures_output: bool) {
    match &exec.target {
        ExecTarget::Procedure(name) => model.executed_procedures.push(ExecutedProcedure {
            schema: name.schema().map(str::to_string),
            name: name.name().to_string(),
            position: Some(exec.position),
            captures_output,
        }),
        ExecTarget::Dynamic(text) => model
            .diagnostics
            .push(format!("dynamic SQL at token {}: {text}", exec.position)),
    }
}

fn apply_fallback(model: &mut ContentModel, scan: &FallbackScan) {
    model.used_fallback_parser = true;
    model.contains_select |= scan.contains_select;
    model.contains_insert |= scan.contains_insert;
    model.contains_update |= scan.contains_update;
    model.contains_delete |= scan.contains_delete;
    model.contains_merge |= scan.contains_merge;
    model.contains_open_json |= scan.contains_open_json;
}

// ---------------------------------------------------------------------------
// Type binding
// ---------------------------------------------------------------------------

/// Type facts plus provenance of one expression or source column.
#[derive(Clone, Debug, Default)]
struct BoundType {
    info: TypeInfo,
    reference: Option<ColumnReference>,
    user_type_schema: Option<String>,
    user_type_name: Option<String>,
}

impl BoundType {
    fn of(info: TypeInfo) -> Self {
        Self {
            info,
            ..Self::default()
        }
    }

    fn from_column(column: &ResultColumn) -> Self {
        Self {
            info: TypeInfo {
                sql_type_name: column.sql_type_name.clone(),
                max_length: column.max_length,
                precision: None,
                scale: None,
                is_nullable: column.is_nullable,
            },
            reference: column.reference.clone(),
            user_type_schema: column.user_type_schema.clone(),
            user_type_name: column.user_type_name.clone(),
        }
    }

    fn apply_to(self, column: &mut ResultColumn) {
        column.sql_type_name = self.info.sql_type_name;
        column.max_length = self.info.max_length;
        column.is_nullable = self.info.is_nullable;
        column.user_type_schema = self.user_type_schema;
        column.user_type_name = self.user_type_name;
        column.reference = self.reference;
    }

    fn not_null(mut self) -> Self {
        self.info.is_nullable = Some(false);
        self
    }

    fn nullable(mut self) -> Self {
        self.info.is_nullable = Some(true);
        self
    }

    fn without_reference(mut self) -> Self {
        self.reference = None;
        self
    }
}

#[derive(Clone, Debug)]
struct ObjectRef {
    schema: String,
    name: String,
}

impl ObjectRef {
    fn from_name(name: &ObjectName) -> Self {
        Self {
            schema: name.schema().unwrap_or(DEFAULT_SCHEMA).to_string(),
            name: name.name().to_string(),
        }
    }

    fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

type NamedColumns = Vec<(String, BoundType)>;

enum SourceColumns {
    Table(ObjectRef),
    Function(ObjectRef),
    Known(NamedColumns),
    Opaque,
}

struct Source {
    alias: Option<String>,
    name: Option<String>,
    columns: SourceColumns,
}

impl Source {
    fn answers_to(&self, qualifier: &str) -> bool {
        match &self.alias {
            Some(alias) => alias.eq_ignore_ascii_case(qualifier),
            None => self
                .name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(qualifier)),
        }
    }
}

#[derive(Default)]
struct Frame {
    ctes: Vec<(String, NamedColumns)>,
    sources: Vec<Source>,
}

struct Binder<'a> {
    resolver: &'a dyn TypeResolver,
    variables: HashMap<String, BoundType>,
    frames: Vec<Frame>,
}

impl<'a> Binder<'a> {
    fn new(resolver: &'a dyn TypeResolver, batch: &Batch) -> Self {
        let mut binder = Self {
            resolver,
            variables: HashMap::new(),
            frames: Vec::new(),
        };
        for parameter in &batch.parameters {
            let mut bound = binder.declared(&parameter.data_type);
            bound.reference = Some(ColumnReference {
                kind: ReferenceKind::Parameter,
                schema: None,
                name: parameter.name.trim_start_matches('@').to_string(),
            });
            binder
                .variables
                .insert(parameter.name.to_ascii_lowercase(), bound);
        }
        for statement in &batch.statements {
            if let Statement::Declare(decls) = statement {
                for decl in decls {
                    let bound = binder.declared(&decl.data_type);
                    binder.variables.insert(decl.name.to_ascii_lowercase(), bound);
                }
            }
        }
        binder
    }

    fn declared(&self, data_type: &DataType) -> BoundType {
        self.with_user_type(BoundType::of(TypeInfo::from_data_type(data_type)))
    }

    /// Replace a user-defined alias type by its base type, keeping the alias name.
    fn with_user_type(&self, mut bound: BoundType) -> BoundType {
        let Some(type_name) = bound.info.sql_type_name.clone() else {
            return bound;
        };
        if is_builtin_type(&type_name) {
            return bound;
        }
        let normalized = normalize_name(&type_name);
        let (schema, name) = split_qualified(&normalized);
        let resolved = resolve_user_type(self.resolver, &normalized);
        let is_nullable = if name.starts_with('_') {
            Some(false)
        } else {
            bound.info.is_nullable.or(resolved.is_nullable)
        };
        bound.user_type_schema = Some(schema.unwrap_or(DEFAULT_SCHEMA).to_string());
        bound.user_type_name = Some(name.to_string());
        if !resolved.is_empty() {
            bound.info = resolved;
        }
        bound.info.is_nullable = is_nullable;
        bound
    }

    // -- result sets ------------------------------------------------------

    fn query_result_set(&mut self, query: &QueryExpr, position: usize) -> ResultSet {
        let mut result_set = ResultSet {
            has_select_star: query.body.has_star(),
            columns: self.query_columns(query, 0),
            position: Some(position),
            ..ResultSet::default()
        };
        apply_for_json(&mut result_set, &query.body);
        result_set
    }

    fn output_result_set(&mut self, dml: &DmlStatement) -> ResultSet {
        self.frames.push(Frame::default());
        self.push_ctes(&dml.ctes);
        // OUTPUT reads the target through the inserted/deleted pseudo tables.
        let sources: Vec<Source> = match &dml.target {
            Some(target) => vec![
                Source {
                    alias: Some("inserted".to_string()),
                    name: None,
                    columns: self.target_columns(target),
                },
                Source {
                    alias: Some("deleted".to_string()),
                    name: None,
                    columns: self.target_columns(target),
                },
                Source {
                    alias: None,
                    name: Some(target.name().to_string()),
                    columns: self.target_columns(target),
                },
            ],
            None => Vec::new(),
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.sources = sources;
        }
        let spec = QuerySpec {
            position: dml.position,
            items: dml.output.clone(),
            ..QuerySpec::default()
        };
        let columns = self.spec_columns(&spec, 0);
        self.frames.pop();
        ResultSet {
            has_select_star: spec.has_star(),
            columns,
            position: Some(dml.position),
            ..ResultSet::default()
        }
    }

    fn target_columns(&self, target: &ObjectName) -> SourceColumns {
        if target.name().starts_with('@') {
            return SourceColumns::Opaque;
        }
        if target.schema().is_none() {
            if let Some(columns) = self.find_cte(target.name()) {
                return SourceColumns::Known(columns);
            }
        }
        SourceColumns::Table(ObjectRef::from_name(target))
    }

    /// Result set of a scalar function's selected FOR JSON block, bound with
    /// the CTEs of the statement that contains it.
    fn candidate_result_set(&mut self, batch: &Batch, spec: &QuerySpec) -> ResultSet {
        let enclosing = batch.statements.iter().find_map(|statement| match statement {
            Statement::Query { query, .. } | Statement::Return { query, .. }
                if QuerySpecs::of_query(query).any(|s| std::ptr::eq(s, spec)) =>
            {
                Some(query)
            }
            _ => None,
        });
        self.frames.push(Frame::default());
        if let Some(query) = enclosing {
            self.push_ctes(&query.ctes);
        }
        let mut result_set = ResultSet {
            has_select_star: spec.has_star(),
            columns: self.spec_columns(spec, 0),
            position: Some(spec.position),
            ..ResultSet::default()
        };
        self.frames.pop();
        apply_for_json(&mut result_set, spec);
        result_set
    }

    // -- columns ----------------------------------------------------------

    /// Columns of a query expression; its CTEs are bound first, in order.
    fn query_columns(&mut self, query: &QueryExpr, depth: usize) -> Vec<ResultColumn> {
        self.frames.push(Frame::default());
        self.push_ctes(&query.ctes);
        let columns = self.spec_columns(&query.body, depth);
        self.frames.pop();
        columns
    }

    /// Bind each CTE into the innermost frame; earlier CTEs are visible to later ones.
    fn push_ctes(&mut self, ctes: &[Cte]) {
        for cte in ctes {
            let columns = self.query_columns(&cte.query, 0);
            let named: NamedColumns = columns
                .iter()
                .enumerate()
                .map(|(index, column)| {
                    let name = cte
                        .column_aliases
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| column.name.clone());
                    (name, BoundType::from_column(column))
                })
                .collect();
            if let Some(frame) = self.frames.last_mut() {
                frame.ctes.push((cte.name.clone(), named));
            }
        }
    }

    fn spec_columns(&mut self, spec: &QuerySpec, depth: usize) -> Vec<ResultColumn> {
        let mut frame = Frame::default();
        for factor in &spec.from {
            let source = self.source_for(factor, depth);
            frame.sources.push(source);
        }
        self.frames.push(frame);
        let columns: Vec<ResultColumn> = spec
            .projections()
            .map(|item| self.item_column(item, depth))
            .collect();
        self.frames.pop();
        if spec.for_json.as_ref().is_some_and(|f| f.path_mode) {
            json_shape::group_path_columns(columns)
        } else {
            columns
        }
    }

    fn item_column(&mut self, item: &SelectItem, depth: usize) -> ResultColumn {
        let name = json_shape::column_name(item);
        if let Some(query) = json_shape::nested_json_query(&item.expr) {
            if depth >= MAX_NESTING_DEPTH {
                return ResultColumn::leaf(name);
            }
            let for_json = query.body.for_json.clone().unwrap_or_default();
            let mut column = json_shape::nested_column(name, &for_json);
            column.children = self.query_columns(query, depth + 1);
            column.sql_type_name = Some("nvarchar".to_string());
            column.max_length = Some(-1);
            column.is_nullable = Some(true);
            return column;
        }
        if json_shape::is_json_query_call(&item.expr) {
            let mut column = json_shape::opaque_json_column(name);
            column.sql_type_name = Some("nvarchar".to_string());
            column.max_length = Some(-1);
            column.is_nullable = Some(true);
            return column;
        }
        let mut column = ResultColumn::leaf(name);
        self.type_of(&item.expr, depth).apply_to(&mut column);
        column
    }

    // -- sources ----------------------------------------------------------

    fn source_for(&mut self, factor: &TableFactor, depth: usize) -> Source {
        let alias = factor.alias().map(str::to_string);
        match factor {
            TableFactor::Table { name, .. } => {
                let columns = if name.name().starts_with('#') {
                    SourceColumns::Table(ObjectRef {
                        schema: DEFAULT_SCHEMA.to_string(),
                        name: name.name().to_string(),
                    })
                } else {
                    self.target_columns(name)
                };
                Source {
                    alias,
                    name: Some(name.name().to_string()),
                    columns,
                }
            }
            TableFactor::TableFunction { name, .. } => Source {
                alias,
                name: Some(name.name().to_string()),
                columns: SourceColumns::Function(ObjectRef::from_name(name)),
            },
            TableFactor::OpenJson { columns, .. } => Source {
                alias,
                name: None,
                columns: SourceColumns::Known(openjson_columns(columns)),
            },
            TableFactor::Derived {
                query,
                column_aliases,
                ..
            } => {
                let columns = self.query_columns(query, depth + 1);
                let named = columns
                    .iter()
                    .enumerate()
                    .map(|(index, column)| {
                        let name = column_aliases
                            .get(index)
                            .cloned()
                            .unwrap_or_else(|| column.name.clone());
                        (name, BoundType::from_column(column))
                    })
                    .collect();
                Source {
                    alias,
                    name: None,
                    columns: SourceColumns::Known(named),
                }
            }
            TableFactor::TableVariable { name, .. } => Source {
                alias,
                name: Some(name.clone()),
                columns: SourceColumns::Opaque,
            },
        }
    }

    fn find_cte(&self, name: &str) -> Option<NamedColumns> {
        self.frames.iter().rev().find_map(|frame| {
            frame
                .ctes
                .iter()
                .find(|(cte, _)| cte.eq_ignore_ascii_case(name))
                .map(|(_, columns)| columns.clone())
        })
    }

    fn source_column(&self, source: &Source, column: &str) -> Option<BoundType> {
        match &source.columns {
            SourceColumns::Table(object) | SourceColumns::Function(object) => {
                let info = self.resolver.table_column_type(&object.qualified(), column);
                if info.is_empty() {
                    return None;
                }
                let kind = match source.columns {
                    SourceColumns::Function(_) => ReferenceKind::Function,
                    _ => ReferenceKind::Table,
                };
                let bound = BoundType {
                    info,
                    reference: Some(ColumnReference {
                        kind,
                        schema: Some(object.schema.clone()),
                        name: object.name.clone(),
                    }),
                    ..BoundType::default()
                };
                Some(self.with_user_type(bound))
            }
            SourceColumns::Known(columns) => columns
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, bound)| bound.clone()),
            SourceColumns::Opaque => None,
        }
    }

    /// Resolve a column reference, innermost scope first.
    fn lookup_column(&self, parts: &[String]) -> BoundType {
        let Some(column) = parts.last() else {
            return BoundType::default();
        };
        let qualifier = parts.len().checked_sub(2).map(|i| parts[i].as_str());
        for frame in self.frames.iter().rev() {
            for source in &frame.sources {
                if let Some(qualifier) = qualifier {
                    if !source.answers_to(qualifier) {
                        continue;
                    }
                    return self.source_column(source, column).unwrap_or_default();
                }
                if let Some(bound) = self.source_column(source, column) {
                    return bound;
                }
            }
        }
        BoundType::default()
    }

    // -- expressions ------------------------------------------------------

    fn type_of(&mut self, expr: &Expr, depth: usize) -> BoundType {
        match expr {
            Expr::Column(parts) => self.lookup_column(parts),
            Expr::Star(_) => BoundType::default(),
            Expr::Variable(name) => self
                .variables
                .get(&name.to_ascii_lowercase())
                .cloned()
                .unwrap_or_default(),
            Expr::Literal(literal) => BoundType::of(literal_type(literal)),
            Expr::Function { name, args } => self.function_type(name, args, depth),
            Expr::Cast { expr, data_type } => {
                let inner = self.type_of(expr, depth);
                let mut bound = self.declared(data_type);
                if bound.info.is_nullable.is_none() {
                    bound.info.is_nullable = inner.info.is_nullable;
                }
                bound
            }
            Expr::Case { results } => results
                .iter()
                .find(|r| !matches!(r, Expr::Literal(Literal::Null)))
                .map(|r| self.type_of(r, depth).without_reference())
                .unwrap_or_default(),
            Expr::Subquery(query) => {
                if depth >= MAX_NESTING_DEPTH {
                    return BoundType::default();
                }
                self.query_columns(query, depth + 1)
                    .first()
                    .map(|column| BoundType::from_column(column).nullable())
                    .unwrap_or_default()
            }
            Expr::Compound(operands) => operands
                .first()
                .map(|first| {
                    let mut bound = self.type_of(first, depth).without_reference();
                    bound.info.is_nullable = None;
                    bound
                })
                .unwrap_or_default(),
        }
    }

    fn first_arg(&mut self, args: &[Expr], depth: usize) -> BoundType {
        args.first()
            .map(|arg| self.type_of(arg, depth))
            .unwrap_or_default()
    }

    fn function_type(&mut self, name: &ObjectName, args: &[Expr], depth: usize) -> BoundType {
        if name.schema().is_none() {
            let upper = name.name().to_ascii_uppercase();
            let fixed = |type_name: &str| BoundType::of(TypeInfo::named(type_name));
            match upper.as_str() {
                "ISNULL" => return self.first_arg(args, depth).not_null(),
                "COALESCE" | "NULLIF" | "MIN" | "MAX" | "SUM" | "AVG" | "ABS" | "ROUND"
                | "FLOOR" | "CEILING" | "UPPER" | "LOWER" | "LTRIM" | "RTRIM" | "TRIM"
                | "REPLACE" | "STUFF" | "SUBSTRING" | "LEFT" | "RIGHT" | "REVERSE" => {
                    let bound = self.first_arg(args, depth).without_reference();
                    return if matches!(upper.as_str(), "MIN" | "MAX" | "SUM" | "AVG") {
                        bound.nullable()
                    } else {
                        bound
                    };
                }
                "COUNT" => return fixed("int").not_null(),
                "COUNT_BIG" => return fixed("bigint").not_null(),
                "ROW_NUMBER" | "RANK" | "DENSE_RANK" | "NTILE" => return fixed("bigint").not_null(),
                "LEN" | "DATALENGTH" | "DATEDIFF" | "CHARINDEX" | "DATEPART" | "YEAR"
                | "MONTH" | "DAY" => return fixed("int"),
                "DATEDIFF_BIG" => return fixed("bigint"),
                "GETDATE" | "CURRENT_TIMESTAMP" | "GETUTCDATE" => return fixed("datetime").not_null(),
                "SYSDATETIME" | "SYSUTCDATETIME" => return fixed("datetime2").not_null(),
                "SYSDATETIMEOFFSET" => return fixed("datetimeoffset").not_null(),
                "NEWID" | "NEWSEQUENTIALID" => return fixed("uniqueidentifier").not_null(),
                "EOMONTH" => return fixed("date"),
                "SCOPE_IDENTITY" | "IDENT_CURRENT" => return fixed("numeric"),
                "CONCAT" | "CONCAT_WS" | "FORMAT" | "STRING_AGG" => {
                    return BoundType::of(TypeInfo {
                        sql_type_name: Some("nvarchar".to_string()),
                        max_length: Some(-1),
                        ..TypeInfo::default()
                    })
                }
                "JSON_VALUE" => {
                    return BoundType::of(TypeInfo {
                        sql_type_name: Some("nvarchar".to_string()),
                        max_length: Some(4000),
                        is_nullable: Some(true),
                        ..TypeInfo::default()
                    })
                }
                "ISJSON" => return fixed("int"),
                "IIF" => {
                    return args
                        .get(1)
                        .map(|arg| self.type_of(arg, depth).without_reference())
                        .unwrap_or_default()
                }
                "DATEADD" => {
                    return args
                        .get(2)
                        .map(|arg| self.type_of(arg, depth).without_reference())
                        .unwrap_or_default()
                }
                "CURRENT_USER" | "SESSION_USER" | "SYSTEM_USER" | "USER_NAME" | "SUSER_SNAME" => {
                    return fixed("sysname")
                }
                _ => {}
            }
        }
        let object = ObjectRef::from_name(name);
        let info = self.resolver.scalar_function_type(&object.qualified());
        if info.is_empty() {
            return BoundType::default();
        }
        self.with_user_type(BoundType {
            info,
            reference: Some(ColumnReference {
                kind: ReferenceKind::Function,
                schema: Some(object.schema),
                name: object.name,
            }),
            ..BoundType::default()
        })
    }
}

fn apply_for_json(result_set: &mut ResultSet, spec: &QuerySpec) {
    if let Some(for_json) = &spec.for_json {
        result_set.returns_json = true;
        result_set.returns_json_array = !for_json.without_array_wrapper;
        result_set.json_root_property = for_json.root.clone();
    }
}

fn literal_type(literal: &Literal) -> TypeInfo {
    match literal {
        Literal::Number(text) => {
            let name = if text.contains(['.', 'e', 'E']) {
                "numeric"
            } else if text.parse::<i32>().is_ok() {
                "int"
            } else {
                "bigint"
            };
            TypeInfo::named(name).with_nullable(false)
        }
        Literal::String(text) => TypeInfo {
            sql_type_name: Some("varchar".to_string()),
            max_length: Some(text.chars().count().max(1) as i32),
            is_nullable: Some(false),
            ..TypeInfo::default()
        },
        Literal::NationalString(text) => TypeInfo {
            sql_type_name: Some("nvarchar".to_string()),
            max_length: Some(text.chars().count().max(1) as i32),
            is_nullable: Some(false),
            ..TypeInfo::default()
        },
        Literal::Null => TypeInfo::default(),
    }
}

/// OPENJSON columns: declared WITH columns, or the default key/value/type triple.
fn openjson_columns(columns: &[OpenJsonColumn]) -> NamedColumns {
    if columns.is_empty() {
        return vec![
            (
                "key".to_string(),
                BoundType::of(TypeInfo {
                    sql_type_name: Some("nvarchar".to_string()),
                    max_length: Some(4000),
                    is_nullable: Some(false),
                    ..TypeInfo::default()
                }),
            ),
            (
                "value".to_string(),
                BoundType::of(TypeInfo {
                    sql_type_name: Some("nvarchar".to_string()),
                    max_length: Some(-1),
                    is_nullable: Some(true),
                    ..TypeInfo::default()
                }),
            ),
            (
                "type".to_string(),
                BoundType::of(TypeInfo::named("int").with_nullable(false)),
            ),
        ];
    }
    columns
        .iter()
        .map(|column| {
            let mut info = if column.as_json {
                TypeInfo {
                    sql_type_name: Some("nvarchar".to_string()),
                    max_length: Some(-1),
                    ..TypeInfo::default()
                }
            } else {
                TypeInfo::from_data_type(&column.data_type)
            };
            info.is_nullable = Some(true);
            (column.name.clone(), BoundType::of(info))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::types::{CallbackTypeResolver, NullTypeResolver};

    fn resolver() -> CallbackTypeResolver {
        CallbackTypeResolver::new()
            .with_table_columns(|table, column| match (table, column) {
                ("dbo.Users", "Id") => TypeInfo::named("int").with_nullable(false),
                ("dbo.Users", "Name") => TypeInfo {
                    sql_type_name: Some("nvarchar".into()),
                    max_length: Some(100),
                    is_nullable: Some(true),
                    ..TypeInfo::default()
                },
                ("dbo.Users", "Email") => TypeInfo::named("dbo._Email").with_nullable(true),
                ("sales.Orders", "OrderId") => TypeInfo::named("bigint").with_nullable(false),
                ("sales.Orders", "UserId") => TypeInfo::named("int").with_nullable(false),
                _ => TypeInfo::default(),
            })
            .with_user_types(|name| match name {
                "dbo.Email" => TypeInfo {
                    sql_type_name: Some("nvarchar".into()),
                    max_length: Some(256),
                    is_nullable: Some(true),
                    ..TypeInfo::default()
                },
                _ => TypeInfo::default(),
            })
            .with_scalar_functions(|name| match name {
                "dbo.FormatName" => TypeInfo {
                    sql_type_name: Some("nvarchar".into()),
                    max_length: Some(200),
                    ..TypeInfo::default()
                },
                _ => TypeInfo::default(),
            })
    }

    fn analyze(sql: &str) -> ContentModel {
        let resolver = resolver();
        ContentAnalyzer::new(&resolver).analyze(sql, ObjectKind::Procedure)
    }

    fn names(columns: &[ResultColumn]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn plain_select_is_typed_from_tables() {
        let model = analyze("CREATE PROCEDURE dbo.GetUsers AS SELECT Id, Name FROM dbo.Users");
        assert!(model.contains_select);
        assert_eq!(model.result_sets.len(), 1);
        let set = &model.result_sets[0];
        assert!(!set.returns_json);
        assert_eq!(names(&set.columns), vec!["Id", "Name"]);
        assert_eq!(set.columns[0].sql_type_name.as_deref(), Some("int"));
        assert_eq!(set.columns[0].is_nullable, Some(false));
        assert_eq!(set.columns[1].max_length, Some(100));
        let reference = set.columns[0].reference.as_ref().unwrap();
        assert_eq!(reference.kind, ReferenceKind::Table);
        assert_eq!(reference.name, "Users");
    }

    #[test]
    fn for_json_path_flags() {
        let model = analyze("SELECT Id, Name FROM dbo.Users FOR JSON PATH");
        let set = &model.result_sets[0];
        assert!(set.returns_json);
        assert!(set.returns_json_array);
        assert_eq!(names(&set.columns), vec!["Id", "Name"]);

        let model = analyze("SELECT Id, Name FROM dbo.Users FOR JSON PATH, WITHOUT_ARRAY_WRAPPER");
        assert!(model.result_sets[0].returns_json);
        assert!(!model.result_sets[0].returns_json_array);
    }

    #[test]
    fn nested_json_children_are_typed_with_correlation() {
        let model = analyze(
            "SELECT u.Id,
                    (SELECT o.OrderId FROM sales.Orders o WHERE o.UserId = u.Id FOR JSON PATH) AS Orders
             FROM dbo.Users u FOR JSON PATH",
        );
        let orders = &model.result_sets[0].columns[1];
        assert!(orders.is_nested_json);
        assert_eq!(orders.sql_type_name.as_deref(), Some("nvarchar"));
        assert_eq!(orders.max_length, Some(-1));
        assert_eq!(names(&orders.children), vec!["OrderId"]);
        assert_eq!(orders.children[0].sql_type_name.as_deref(), Some("bigint"));
    }

    #[test]
    fn cte_types_reach_nested_json_subquery() {
        let model = analyze(
            "WITH people AS (SELECT Id, Name FROM dbo.Users)
             SELECT (SELECT p.Id, p.Name FROM people p FOR JSON PATH) AS People",
        );
        let people = &model.result_sets[0].columns[0];
        assert_eq!(names(&people.children), vec!["Id", "Name"]);
        assert_eq!(people.children[0].sql_type_name.as_deref(), Some("int"));
        let reference = people.children[1].reference.as_ref().unwrap();
        assert_eq!(reference.schema.as_deref(), Some("dbo"));
        assert_eq!(reference.name, "Users");
    }

    #[test]
    fn cte_column_aliases_rename_columns() {
        let model = analyze(
            "WITH u (UserKey) AS (SELECT Id FROM dbo.Users) SELECT UserKey FROM u",
        );
        let column = &model.result_sets[0].columns[0];
        assert_eq!(column.sql_type_name.as_deref(), Some("int"));
    }

    #[test]
    fn expression_typing_rules() {
        let model = analyze(
            "DECLARE @Limit DECIMAL(10, 2);
             SELECT CAST(Id AS NVARCHAR(20)) AS IdText,
                    ISNULL(Name, N'') AS SafeName,
                    COUNT(*) AS Total,
                    COUNT_BIG(*) AS BigTotal,
                    dbo.FormatName(Name) AS Display,
                    @Limit AS Limit,
                    'x' AS Marker,
                    CASE WHEN Id > 1 THEN Name ELSE NULL END AS Picked
             FROM dbo.Users
             GROUP BY Id, Name",
        );
        let columns = &model.result_sets[0].columns;
        assert_eq!(columns[0].sql_type_name.as_deref(), Some("nvarchar"));
        assert_eq!(columns[0].max_length, Some(20));
        assert_eq!(columns[1].sql_type_name.as_deref(), Some("nvarchar"));
        assert_eq!(columns[1].is_nullable, Some(false));
        assert_eq!(columns[2].sql_type_name.as_deref(), Some("int"));
        assert_eq!(columns[3].sql_type_name.as_deref(), Some("bigint"));
        assert_eq!(columns[4].sql_type_name.as_deref(), Some("nvarchar"));
        assert_eq!(
            columns[4].reference.as_ref().map(|r| r.kind),
            Some(ReferenceKind::Function)
        );
        assert_eq!(columns[5].sql_type_name.as_deref(), Some("decimal"));
        assert_eq!(columns[6].sql_type_name.as_deref(), Some("varchar"));
        assert_eq!(columns[7].max_length, Some(100));
    }

    #[test]
    fn underscore_user_type_is_not_null() {
        let model = analyze("SELECT Email FROM dbo.Users");
        let email = &model.result_sets[0].columns[0];
        assert_eq!(email.sql_type_name.as_deref(), Some("nvarchar"));
        assert_eq!(email.max_length, Some(256));
        assert_eq!(email.is_nullable, Some(false));
        assert_eq!(email.user_type_schema.as_deref(), Some("dbo"));
        assert_eq!(email.user_type_name.as_deref(), Some("_Email"));
    }

    #[test]
    fn openjson_with_columns_are_typed() {
        let model = analyze(
            "SELECT j.Qty, j.Meta FROM OPENJSON(@json) WITH (Qty INT '$.qty', Meta NVARCHAR(MAX) AS JSON) j",
        );
        assert!(model.contains_open_json);
        let columns = &model.result_sets[0].columns;
        assert_eq!(columns[0].sql_type_name.as_deref(), Some("int"));
        assert_eq!(columns[1].max_length, Some(-1));
    }

    #[test]
    fn exec_targets_and_diagnostics() {
        let model = analyze(
            "EXEC sales.GetOrders @Id = 1;
             INSERT INTO #t EXEC dbo.Load;
             EXEC (@sql);
             EXECUTE AS USER = 'app';",
        );
        assert_eq!(model.executed_procedures.len(), 2);
        assert_eq!(model.executed_procedures[0].schema.as_deref(), Some("sales"));
        assert!(!model.executed_procedures[0].captures_output);
        assert!(model.executed_procedures[1].captures_output);
        assert!(model.executed_procedures[0].position < model.executed_procedures[1].position);
        assert_eq!(model.diagnostics.len(), 1);
        assert!(model.result_sets.is_empty());
    }

    #[test]
    fn assignment_and_select_into_produce_no_result_set() {
        let model = analyze(
            "SELECT @Count = COUNT(*) FROM dbo.Users;
             SELECT Id INTO #ids FROM dbo.Users;",
        );
        assert!(model.contains_select);
        assert!(model.result_sets.is_empty());
    }

    #[test]
    fn output_clause_without_into_is_a_result_set() {
        let model = analyze(
            "UPDATE dbo.Users SET Name = @Name OUTPUT inserted.Id, deleted.Name AS OldName WHERE Id = @Id;
             DELETE FROM dbo.Users OUTPUT deleted.Id INTO @gone WHERE Id = 0;",
        );
        assert!(model.contains_update);
        assert!(model.contains_delete);
        assert_eq!(model.result_sets.len(), 1);
        let set = &model.result_sets[0];
        assert_eq!(names(&set.columns), vec!["Id", "OldName"]);
        assert_eq!(set.columns[0].sql_type_name.as_deref(), Some("int"));
    }

    #[test]
    fn keywords_in_comments_and_strings_do_not_set_flags() {
        let model = analyze("-- DELETE FROM x\n/* MERGE */ SELECT 'UPDATE y' AS Text");
        assert!(model.contains_select);
        assert!(!model.contains_delete);
        assert!(!model.contains_merge);
        assert!(!model.contains_update);
    }

    #[test]
    fn grammar_errors_switch_on_fallback_but_keep_recovered_statements() {
        let model = analyze(
            "SELECT FROM WHERE;
             DELETE FROM dbo.Users WHERE Id = 1;
             SELECT Id FROM dbo.Users",
        );
        assert!(model.used_fallback_parser);
        assert_eq!(model.parse_error_count, 1);
        assert!(model.first_parse_error.is_some());
        assert!(model.contains_delete);
        assert_eq!(model.result_sets.len(), 1);
    }

    #[test]
    fn tokenizer_failure_uses_fallback_exec_scan() {
        let model = analyze("EXEC dbo.Other; SELECT 'unterminated");
        assert!(model.used_fallback_parser);
        assert_eq!(model.executed_procedures.len(), 1);
        assert!(model.result_sets.is_empty());
    }

    #[test]
    fn inline_table_function_returns_its_query() {
        let resolver = NullTypeResolver;
        let model = ContentAnalyzer::new(&resolver).analyze(
            "CREATE FUNCTION dbo.ActiveUsers() RETURNS TABLE AS RETURN (SELECT Id FROM dbo.Users)",
            ObjectKind::TableFunction,
        );
        assert_eq!(model.result_sets.len(), 1);
        assert_eq!(names(&model.result_sets[0].columns), vec!["Id"]);
    }

    #[test]
    fn scalar_function_uses_json_candidate() {
        let resolver = resolver();
        let model = ContentAnalyzer::new(&resolver).analyze(
            "CREATE FUNCTION dbo.UserJson(@Id INT) RETURNS NVARCHAR(MAX) AS
             BEGIN
               RETURN (SELECT Id, Name FROM dbo.Users WHERE Id = @Id FOR JSON PATH, WITHOUT_ARRAY_WRAPPER)
             END",
            ObjectKind::ScalarFunction,
        );
        assert_eq!(model.result_sets.len(), 1);
        let set = &model.result_sets[0];
        assert!(set.returns_json);
        assert!(!set.returns_json_array);
        assert_eq!(set.columns[0].sql_type_name.as_deref(), Some("int"));
    }

    #[test]
    fn scalar_function_array_candidate_keeps_nested_orders() {
        let resolver = resolver();
        let model = ContentAnalyzer::new(&resolver).analyze(
            "CREATE FUNCTION dbo.UsersJson() RETURNS NVARCHAR(MAX) AS
             BEGIN
               RETURN (SELECT u.Id,
                              (SELECT o.OrderId, o.UserId FROM sales.Orders o WHERE o.UserId = u.Id FOR JSON PATH) AS Orders
                       FROM dbo.Users u
                       FOR JSON PATH)
             END",
            ObjectKind::ScalarFunction,
        );
        assert_eq!(model.result_sets.len(), 1);
        let set = &model.result_sets[0];
        assert!(set.returns_json);
        assert!(set.returns_json_array);
        let names: Vec<_> = set.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Orders"]);
        assert_eq!(set.columns[0].sql_type_name.as_deref(), Some("int"));
        let orders = &set.columns[1];
        assert!(orders.is_nested_json);
        let children: Vec<_> = orders.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(children, vec!["OrderId", "UserId"]);
        assert_eq!(orders.children[0].sql_type_name.as_deref(), Some("bigint"));
    }

    #[test]
    fn cursor_statement_after_from_keeps_qualified_column_types() {
        let model = analyze("SELECT Users.Id FROM dbo.Users\nCLOSE c");
        let column = &model.result_sets[0].columns[0];
        assert_eq!(column.name, "Id");
        assert_eq!(column.sql_type_name.as_deref(), Some("int"));
    }

    #[test]
    fn result_sets_record_statement_positions() {
        let model = analyze("SELECT 1 AS A; EXEC dbo.Other; SELECT 2 AS B");
        let positions: Vec<_> = model.result_sets.iter().map(|s| s.position).collect();
        assert_eq!(positions.len(), 2);
        let exec_position = model.executed_procedures[0].position;
        assert!(positions[0] < exec_position);
        assert!(exec_position < positions[1]);
    }
}
