//! Type lookup for columns, user-defined types and scalar functions.
//!
//! The analyzer never talks to a database. Hosts inject a `TypeResolver`
//! (usually a `CallbackTypeResolver` wired to their metadata cache) and the
//! analyzer degrades to untyped columns on every miss.

use crate::analyzer::ast::DataType;

/// Resolved SQL type facts. Every field is optional; a miss is all `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeInfo {
    pub sql_type_name: Option<String>,
    pub max_length: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub is_nullable: Option<bool>,
}

impl TypeInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            sql_type_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql_type_name.is_none()
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.is_nullable = Some(nullable);
        self
    }

    /// Type facts of a parsed declaration (`NVARCHAR(MAX)` gives length -1).
    /// System type names are lower-cased; user-defined names keep their schema.
    pub fn from_data_type(data_type: &DataType) -> Self {
        let name = match &data_type.schema {
            Some(schema) => format!("{schema}.{}", data_type.name),
            None if is_builtin_type(&data_type.name) => data_type.name.to_ascii_lowercase(),
            None => data_type.name.clone(),
        };
        Self {
            sql_type_name: Some(name),
            max_length: data_type.length,
            precision: data_type.precision,
            scale: data_type.scale,
            is_nullable: None,
        }
    }
}

/// Constructor-injected type lookup. Names may be `schema.name`, bare, or
/// bracketed; implementations receive them normalized by `normalize_name`.
pub trait TypeResolver {
    /// Column type of a table or view column.
    fn table_column_type(&self, table: &str, column: &str) -> TypeInfo;

    /// Base type of a user-defined alias type.
    fn user_type(&self, name: &str) -> TypeInfo;

    /// Return type of a scalar function.
    fn scalar_function_type(&self, name: &str) -> TypeInfo;
}

type ColumnLookup = Box<dyn Fn(&str, &str) -> TypeInfo + Send + Sync>;
type NameLookup = Box<dyn Fn(&str) -> TypeInfo + Send + Sync>;

/// Resolver wired from three optional closures; unset callbacks miss.
#[derive(Default)]
pub struct CallbackTypeResolver {
    table_column: Option<ColumnLookup>,
    user_type: Option<NameLookup>,
    scalar_function: Option<NameLookup>,
}

impl CallbackTypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_columns(
        mut self,
        lookup: impl Fn(&str, &str) -> TypeInfo + Send + Sync + 'static,
    ) -> Self {
        self.table_column = Some(Box::new(lookup));
        self
    }

    pub fn with_user_types(mut self, lookup: impl Fn(&str) -> TypeInfo + Send + Sync + 'static) -> Self {
        self.user_type = Some(Box::new(lookup));
        self
    }

    pub fn with_scalar_functions(
        mut self,
        lookup: impl Fn(&str) -> TypeInfo + Send + Sync + 'static,
    ) -> Self {
        self.scalar_function = Some(Box::new(lookup));
        self
    }
}

impl TypeResolver for CallbackTypeResolver {
    fn table_column_type(&self, table: &str, column: &str) -> TypeInfo {
        self.table_column
            .as_ref()
            .map(|lookup| lookup(&normalize_name(table), &normalize_name(column)))
            .unwrap_or_default()
    }

    fn user_type(&self, name: &str) -> TypeInfo {
        self.user_type
            .as_ref()
            .map(|lookup| lookup(&normalize_name(name)))
            .unwrap_or_default()
    }

    fn scalar_function_type(&self, name: &str) -> TypeInfo {
        self.scalar_function
            .as_ref()
            .map(|lookup| lookup(&normalize_name(name)))
            .unwrap_or_default()
    }
}

/// Resolver that knows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTypeResolver;

impl TypeResolver for NullTypeResolver {
    fn table_column_type(&self, _table: &str, _column: &str) -> TypeInfo {
        TypeInfo::default()
    }

    fn user_type(&self, _name: &str) -> TypeInfo {
        TypeInfo::default()
    }

    fn scalar_function_type(&self, _name: &str) -> TypeInfo {
        TypeInfo::default()
    }
}

/// Resolve a user-defined type. An underscore-prefixed type name means the
/// column is NOT NULL whatever the declaration says; on a miss the lookup is
/// retried without the underscore.
pub fn resolve_user_type(resolver: &dyn TypeResolver, name: &str) -> TypeInfo {
    let normalized = normalize_name(name);
    let (schema, bare) = split_qualified(&normalized);
    let not_null = bare.starts_with('_');

    let mut info = resolver.user_type(&normalized);
    if info.is_empty() && not_null {
        let stripped = bare.trim_start_matches('_');
        let retry = match schema {
            Some(schema) => format!("{schema}.{stripped}"),
            None => stripped.to_string(),
        };
        info = resolver.user_type(&retry);
    }
    if not_null {
        info.is_nullable = Some(false);
    }
    info
}

/// Strip `[...]` and `"..."` quoting from every part of a dotted name.
pub fn normalize_name(name: &str) -> String {
    name.split('.')
        .map(|part| {
            part.trim()
                .trim_start_matches(['[', '"'])
                .trim_end_matches([']', '"'])
        })
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('.') {
        Some((schema, bare)) => (Some(schema), bare),
        None => (None, name),
    }
}

const BUILTIN_TYPES: &[&str] = &[
    "bigint", "binary", "bit", "char", "date", "datetime", "datetime2", "datetimeoffset",
    "decimal", "float", "geography", "geometry", "hierarchyid", "image", "int", "money",
    "nchar", "ntext", "numeric", "nvarchar", "real", "rowversion", "smalldatetime", "smallint",
    "smallmoney", "sql_variant", "sysname", "text", "time", "timestamp", "tinyint",
    "uniqueidentifier", "varbinary", "varchar", "xml", "table", "cursor",
];

/// Whether `name` is a SQL Server system type rather than a user-defined alias.
pub fn is_builtin_type(name: &str) -> bool {
    let normalized = normalize_name(name);
    let (schema, bare) = split_qualified(&normalized);
    if schema.is_some_and(|s| !s.eq_ignore_ascii_case("sys")) {
        return false;
    }
    BUILTIN_TYPES.iter().any(|t| t.eq_ignore_ascii_case(bare))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CallbackTypeResolver {
        CallbackTypeResolver::new()
            .with_table_columns(|table, column| match (table, column) {
                ("dbo.Users", "Id") => TypeInfo::named("int").with_nullable(false),
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
    }

    #[test]
    fn brackets_are_stripped_before_lookup() {
        let info = resolver().table_column_type("[dbo].[Users]", "[Id]");
        assert_eq!(info.sql_type_name.as_deref(), Some("int"));
        assert_eq!(info.is_nullable, Some(false));
    }

    #[test]
    fn unset_callbacks_miss() {
        let info = resolver().scalar_function_type("dbo.Anything");
        assert_eq!(info, TypeInfo::default());
        assert!(NullTypeResolver.user_type("x").is_empty());
    }

    #[test]
    fn underscore_user_type_is_not_null_and_retries_without_prefix() {
        let resolver = resolver();
        let plain = resolve_user_type(&resolver, "dbo.Email");
        assert_eq!(plain.is_nullable, Some(true));

        let strict = resolve_user_type(&resolver, "[dbo].[_Email]");
        assert_eq!(strict.sql_type_name.as_deref(), Some("nvarchar"));
        assert_eq!(strict.max_length, Some(256));
        assert_eq!(strict.is_nullable, Some(false));
    }

    #[test]
    fn unknown_underscore_type_still_reports_not_null() {
        let info = resolve_user_type(&NullTypeResolver, "_Missing");
        assert!(info.sql_type_name.is_none());
        assert_eq!(info.is_nullable, Some(false));
    }

    #[test]
    fn builtin_detection() {
        assert!(is_builtin_type("NVARCHAR"));
        assert!(is_builtin_type("[int]"));
        assert!(is_builtin_type("sys.sysname"));
        assert!(!is_builtin_type("dbo.int"));
        assert!(!is_builtin_type("Email"));
    }

    #[test]
    fn data_type_max_maps_to_minus_one() {
        let data_type = DataType {
            name: "NVARCHAR".into(),
            length: Some(-1),
            ..DataType::default()
        };
        let info = TypeInfo::from_data_type(&data_type);
        assert_eq!(info.sql_type_name.as_deref(), Some("nvarchar"));
        assert_eq!(info.max_length, Some(-1));
    }
}
