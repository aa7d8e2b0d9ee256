//! Project configuration consumed by the schema pipeline.
//!
//! Loading and migrating configuration files is the host's job; this module
//! only defines the shape (deserializable from the host's JSON) and the
//! environment overrides honoured by every run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default project-local directory for cache files.
pub const DEFAULT_CACHE_DIR: &str = ".procshape/cache";

/// Default project-local directory for schema snapshot files.
pub const DEFAULT_SNAPSHOT_DIR: &str = ".procshape/schema";

/// Whether objects of a schema are generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SchemaStatus {
    #[default]
    Build,
    Ignore,
}

/// Explicit status for one schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRule {
    pub name: String,
    pub status: SchemaStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    /// Output namespace of the generated code; part of the cache fingerprint.
    pub namespace: String,
    /// Optional project role; replaces the namespace in the fingerprint.
    pub role: Option<String>,
    /// Status applied to schemas without an explicit rule.
    pub default_schema_status: SchemaStatus,
    pub schemas: Vec<SchemaRule>,
    /// Glob patterns on `schema.name` that are never generated.
    pub ignored_objects: Vec<String>,
    /// When non-empty, only objects matching one of these patterns are processed.
    pub build_objects: Vec<String>,
    /// Objects matching these patterns are always reparsed.
    pub force_reparse: Vec<String>,
    /// Disable cache reads; the cache file is still written at the end.
    pub no_cache: bool,
    pub cache_dir: PathBuf,
    pub snapshot_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            role: None,
            default_schema_status: SchemaStatus::Build,
            schemas: Vec::new(),
            ignored_objects: Vec::new(),
            build_objects: Vec::new(),
            force_reparse: Vec::new(),
            no_cache: false,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
        }
    }
}

impl ProjectConfig {
    /// Identity used as the cache namespace: the role when set, else the namespace.
    pub fn identity(&self) -> &str {
        match self.role.as_deref().map(str::trim) {
            Some(role) if !role.is_empty() => role,
            _ => self.namespace.trim(),
        }
    }

    /// Explicit status for `schema`, if configured.
    pub fn schema_rule(&self, schema: &str) -> Option<SchemaStatus> {
        self.schemas
            .iter()
            .find(|rule| rule.name.eq_ignore_ascii_case(schema))
            .map(|rule| rule.status)
    }

    /// Apply `PROCSHAPE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(flag) = env_flag("PROCSHAPE_NO_CACHE") {
            self.no_cache = flag;
        }
        if let Some(dir) = env_path("PROCSHAPE_CACHE_DIR") {
            self.cache_dir = dir;
        }
        if let Some(dir) = env_path("PROCSHAPE_SNAPSHOT_DIR") {
            self.snapshot_dir = dir;
        }
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    parse_flag(&value)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    const OVERRIDE_VARS: [&str; 3] = ["PROCSHAPE_NO_CACHE", "PROCSHAPE_CACHE_DIR", "PROCSHAPE_SNAPSHOT_DIR"];

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Sets the override variables and restores the previous values on drop.
    struct TempEnv {
        prev: Vec<(&'static str, Option<String>)>,
    }

    impl TempEnv {
        fn set(values: [Option<&str>; 3]) -> Self {
            let prev = OVERRIDE_VARS.iter().map(|key| (*key, env::var(key).ok())).collect();
            for (key, value) in OVERRIDE_VARS.iter().zip(values) {
                match value {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
            Self { prev }
        }
    }

    impl Drop for TempEnv {
        fn drop(&mut self) {
            for (key, value) in &self.prev {
                match value {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn identity_prefers_role() {
        let mut config = ProjectConfig {
            namespace: "Acme.Data".into(),
            ..ProjectConfig::default()
        };
        assert_eq!(config.identity(), "Acme.Data");
        config.role = Some("  ".into());
        assert_eq!(config.identity(), "Acme.Data");
        config.role = Some("reporting".into());
        assert_eq!(config.identity(), "reporting");
    }

    #[test]
    fn schema_rule_is_case_insensitive() {
        let config = ProjectConfig {
            schemas: vec![SchemaRule {
                name: "Audit".into(),
                status: SchemaStatus::Ignore,
            }],
            ..ProjectConfig::default()
        };
        assert_eq!(config.schema_rule("audit"), Some(SchemaStatus::Ignore));
        assert_eq!(config.schema_rule("dbo"), None);
    }

    #[test]
    fn parse_flag_values() {
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let config: ProjectConfig = serde_json::from_str(
            r#"{"namespace":"Acme","defaultSchemaStatus":"ignore","forceReparse":["dbo.*"]}"#,
        )
        .unwrap();
        assert_eq!(config.default_schema_status, SchemaStatus::Ignore);
        assert_eq!(config.force_reparse, vec!["dbo.*".to_string()]);
        assert_eq!(config.cache_dir, PathBuf::from(DEFAULT_CACHE_DIR));
    }

    #[test]
    fn env_overrides_replace_cache_settings() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = TempEnv::set([Some(" yes "), Some("/tmp/procshape-cache"), Some(" out/schema ")]);
        let config = ProjectConfig::default().with_env_overrides();
        assert!(config.no_cache);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/procshape-cache"));
        assert_eq!(config.snapshot_dir, PathBuf::from("out/schema"));
    }

    #[test]
    fn blank_or_unparseable_env_values_keep_configured_settings() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = TempEnv::set([Some("maybe"), Some("   "), None]);
        let configured = ProjectConfig {
            no_cache: true,
            cache_dir: PathBuf::from("cache"),
            snapshot_dir: PathBuf::from("schema"),
            ..ProjectConfig::default()
        };
        let config = configured.clone().with_env_overrides();
        assert_eq!(config, configured);
    }
}
