//! Syntax tree for the T-SQL subset needed for result-shape inference.
//!
//! Only statements that produce rows, change data or delegate to other
//! procedures are modeled. Everything else is skipped by the parser.

/// Multi-part object name; the last part is the object, the one before it
/// the schema.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectName(pub Vec<String>);

impl ObjectName {
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    pub fn schema(&self) -> Option<&str> {
        if self.0.len() >= 2 {
            Some(self.0[self.0.len() - 2].as_str())
        } else {
            None
        }
    }

    /// `schema.name` or the bare name.
    pub fn qualified(&self) -> String {
        match self.schema() {
            Some(schema) => format!("{schema}.{}", self.name()),
            None => self.name().to_string(),
        }
    }
}

/// Declared SQL type, e.g. `NVARCHAR(MAX)` or `dbo.PhoneNumber`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataType {
    pub schema: Option<String>,
    pub name: String,
    /// `-1` for `MAX`.
    pub length: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Number(String),
    String(String),
    NationalString(String),
    Null,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Possibly qualified column reference; the last part is the column.
    Column(Vec<String>),
    /// `*` or `alias.*`.
    Star(Vec<String>),
    Variable(String),
    Literal(Literal),
    Function {
        name: ObjectName,
        args: Vec<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        data_type: DataType,
    },
    Case {
        results: Vec<Expr>,
    },
    Subquery(Box<QueryExpr>),
    /// Operands joined by operators; only the operands are kept.
    Compound(Vec<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
    /// `@var = expr` assignments produce no output column.
    pub assigns_variable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OpenJsonColumn {
    pub name: String,
    pub data_type: DataType,
    pub as_json: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableFactor {
    Table {
        name: ObjectName,
        alias: Option<String>,
    },
    TableFunction {
        name: ObjectName,
        args: Vec<Expr>,
        alias: Option<String>,
    },
    OpenJson {
        args: Vec<Expr>,
        columns: Vec<OpenJsonColumn>,
        alias: Option<String>,
    },
    Derived {
        query: Box<QueryExpr>,
        alias: Option<String>,
        column_aliases: Vec<String>,
    },
    TableVariable {
        name: String,
        alias: Option<String>,
    },
}

impl TableFactor {
    pub fn alias(&self) -> Option<&str> {
        match self {
            TableFactor::Table { alias, .. }
            | TableFactor::TableFunction { alias, .. }
            | TableFactor::OpenJson { alias, .. }
            | TableFactor::Derived { alias, .. }
            | TableFactor::TableVariable { alias, .. } => alias.as_deref(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForJson {
    pub path_mode: bool,
    pub root: Option<String>,
    pub without_array_wrapper: bool,
    pub include_null_values: bool,
}

/// One `SELECT ... [FROM ...] [FOR JSON ...]` block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySpec {
    /// Token offset of the `SELECT` keyword.
    pub position: usize,
    /// Normalized source text of the whole block.
    pub text: String,
    pub items: Vec<SelectItem>,
    pub into: Option<ObjectName>,
    pub from: Vec<TableFactor>,
    /// WHERE / HAVING / JOIN conditions, kept for subquery traversal.
    pub predicates: Vec<Expr>,
    pub for_json: Option<ForJson>,
}

impl QuerySpec {
    /// Items that produce an output column.
    pub fn projections(&self) -> impl Iterator<Item = &SelectItem> {
        self.items
            .iter()
            .filter(|item| !item.assigns_variable && !matches!(item.expr, Expr::Star(_)))
    }

    pub fn has_star(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item.expr, Expr::Star(_)))
    }

    /// Only variable assignments: the statement returns no rows.
    pub fn is_assignment(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|item| item.assigns_variable)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cte {
    pub name: String,
    pub column_aliases: Vec<String>,
    pub query: QueryExpr,
}

/// A query expression: optional CTEs, a body and its set-operation branches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryExpr {
    pub ctes: Vec<Cte>,
    pub body: QuerySpec,
    /// UNION / EXCEPT / INTERSECT branches after the first block.
    pub set_operands: Vec<QuerySpec>,
}

impl QueryExpr {
    /// A query produces rows unless it only assigns variables or fills a table.
    pub fn returns_rows(&self) -> bool {
        !self.body.is_assignment() && self.body.into.is_none()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
    Merge,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DmlStatement {
    pub kind: DmlKind,
    pub position: usize,
    pub ctes: Vec<Cte>,
    pub target: Option<ObjectName>,
    /// `OUTPUT` clause items and whether they go `INTO` a table.
    pub output: Vec<SelectItem>,
    pub output_into: bool,
    /// Row source of `INSERT ... SELECT` or `MERGE ... USING (SELECT ...)`.
    pub source_query: Option<Box<QueryExpr>>,
    /// Target of `INSERT ... EXEC`.
    pub source_exec: Option<ExecStatement>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExecTarget {
    Procedure(ObjectName),
    /// `EXEC (@sql)`, `EXEC @procName`, `sp_executesql`.
    Dynamic(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecStatement {
    pub position: usize,
    pub target: ExecTarget,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDecl {
    pub name: String,
    pub data_type: DataType,
    pub initializer: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Query {
        position: usize,
        query: QueryExpr,
    },
    Dml(DmlStatement),
    Exec(ExecStatement),
    /// `RETURN (SELECT ...)` of an inline or scalar function.
    Return {
        position: usize,
        query: QueryExpr,
    },
    Declare(Vec<VariableDecl>),
    /// `SET @var = expr`.
    Set {
        variable: String,
        value: Expr,
    },
}

/// A parsed definition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    /// Parameters declared in the `CREATE` header.
    pub parameters: Vec<VariableDecl>,
    pub statements: Vec<Statement>,
}

impl Batch {
    /// Lazily walk every query specification in the batch, outer blocks first.
    pub fn query_specs(&self) -> QuerySpecs<'_> {
        let mut walker = QuerySpecs { stack: Vec::new() };
        for statement in self.statements.iter().rev() {
            match statement {
                Statement::Query { query, .. } | Statement::Return { query, .. } => {
                    walker.push_query(query)
                }
                Statement::Dml(dml) => {
                    if let Some(query) = &dml.source_query {
                        walker.push_query(query);
                    }
                    for cte in dml.ctes.iter().rev() {
                        walker.push_query(&cte.query);
                    }
                }
                Statement::Declare(decls) => {
                    for decl in decls.iter().rev() {
                        if let Some(init) = &decl.initializer {
                            walker.stack.push(Pending::Expr(init));
                        }
                    }
                }
                Statement::Set { value, .. } => walker.stack.push(Pending::Expr(value)),
                Statement::Exec(_) => {}
            }
        }
        walker
    }
}

enum Pending<'a> {
    Spec(&'a QuerySpec),
    Query(&'a QueryExpr),
    Expr(&'a Expr),
}

/// Pre-order iterator over query specifications. Finite: the tree is
/// owned and acyclic.
pub struct QuerySpecs<'a> {
    stack: Vec<Pending<'a>>,
}

impl<'a> QuerySpecs<'a> {
    pub fn of_query(query: &'a QueryExpr) -> Self {
        let mut walker = QuerySpecs { stack: Vec::new() };
        walker.push_query(query);
        walker
    }

    /// Query blocks nested anywhere inside `expr`.
    pub fn of_expr(expr: &'a Expr) -> Self {
        QuerySpecs {
            stack: vec![Pending::Expr(expr)],
        }
    }

    fn push_query(&mut self, query: &'a QueryExpr) {
        self.stack.push(Pending::Query(query));
    }

    fn expand_spec(&mut self, spec: &'a QuerySpec) {
        // Pushed in reverse so select items are visited before FROM sources.
        for expr in spec.predicates.iter().rev() {
            self.stack.push(Pending::Expr(expr));
        }
        for factor in spec.from.iter().rev() {
            match factor {
                TableFactor::Derived { query, .. } => self.stack.push(Pending::Query(query)),
                TableFactor::TableFunction { args, .. } | TableFactor::OpenJson { args, .. } => {
                    for arg in args.iter().rev() {
                        self.stack.push(Pending::Expr(arg));
                    }
                }
                TableFactor::Table { .. } | TableFactor::TableVariable { .. } => {}
            }
        }
        for item in spec.items.iter().rev() {
            self.stack.push(Pending::Expr(&item.expr));
        }
    }

    fn expand_expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Subquery(query) => self.stack.push(Pending::Query(query)),
            Expr::Function { args, .. } => {
                for arg in args.iter().rev() {
                    self.stack.push(Pending::Expr(arg));
                }
            }
            Expr::Cast { expr, .. } => self.stack.push(Pending::Expr(expr)),
            Expr::Case { results } | Expr::Compound(results) => {
                for inner in results.iter().rev() {
                    self.stack.push(Pending::Expr(inner));
                }
            }
            Expr::Column(_) | Expr::Star(_) | Expr::Variable(_) | Expr::Literal(_) => {}
        }
    }
}

impl<'a> Iterator for QuerySpecs<'a> {
    type Item = &'a QuerySpec;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(pending) = self.stack.pop() {
            match pending {
                Pending::Spec(spec) => {
                    self.expand_spec(spec);
                    return Some(spec);
                }
                Pending::Query(query) => {
                    for operand in query.set_operands.iter().rev() {
                        self.stack.push(Pending::Spec(operand));
                    }
                    self.stack.push(Pending::Spec(&query.body));
                    for cte in query.ctes.iter().rev() {
                        self.stack.push(Pending::Query(&cte.query));
                    }
                }
                Pending::Expr(expr) => self.expand_expr(expr),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(position: usize, items: Vec<Expr>) -> QuerySpec {
        QuerySpec {
            position,
            items: items
                .into_iter()
                .map(|expr| SelectItem {
                    expr,
                    alias: None,
                    assigns_variable: false,
                })
                .collect(),
            ..QuerySpec::default()
        }
    }

    #[test]
    fn object_name_parts() {
        let name = ObjectName(vec!["db".into(), "sales".into(), "Orders".into()]);
        assert_eq!(name.schema(), Some("sales"));
        assert_eq!(name.name(), "Orders");
        assert_eq!(name.qualified(), "sales.Orders");
        assert_eq!(ObjectName(vec!["Orders".into()]).qualified(), "Orders");
    }

    #[test]
    fn walker_visits_outer_before_nested() {
        let inner = QueryExpr {
            body: spec(5, vec![Expr::Column(vec!["Id".into()])]),
            ..QueryExpr::default()
        };
        let outer = QueryExpr {
            body: spec(
                0,
                vec![
                    Expr::Column(vec!["Name".into()]),
                    Expr::Subquery(Box::new(inner)),
                ],
            ),
            ..QueryExpr::default()
        };
        let batch = Batch {
            parameters: vec![],
            statements: vec![Statement::Query {
                position: 0,
                query: outer,
            }],
        };
        let positions: Vec<_> = batch.query_specs().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 5]);
    }

    #[test]
    fn assignment_only_select_returns_no_rows() {
        let mut query = QueryExpr {
            body: spec(0, vec![Expr::Literal(Literal::Number("1".into()))]),
            ..QueryExpr::default()
        };
        assert!(query.returns_rows());
        query.body.items[0].assigns_variable = true;
        assert!(!query.returns_rows());
    }
}
