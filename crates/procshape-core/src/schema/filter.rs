//! Object selection: schema status, ignore list, allow-list and force-reparse.

use std::collections::HashSet;

use crate::config::{ProjectConfig, SchemaStatus};
use crate::schema::source::ObjectHeader;

pub struct SelectionPolicy<'a> {
    config: &'a ProjectConfig,
    known_schemas: HashSet<String>,
}

impl<'a> SelectionPolicy<'a> {
    /// `known_schemas` are the schemas present in prior snapshots.
    pub fn new<'s>(config: &'a ProjectConfig, known_schemas: impl IntoIterator<Item = &'s str>) -> Self {
        Self {
            config,
            known_schemas: known_schemas.into_iter().map(str::to_lowercase).collect(),
        }
    }

    /// Effective status of `schema`. An explicit rule wins; otherwise a
    /// schema seen in an earlier snapshot keeps building and an unseen one
    /// takes the configured default.
    pub fn schema_status(&self, schema: &str) -> SchemaStatus {
        if let Some(status) = self.config.schema_rule(schema) {
            return status;
        }
        match self.config.default_schema_status {
            SchemaStatus::Build => SchemaStatus::Build,
            SchemaStatus::Ignore if self.known_schemas.contains(&schema.to_lowercase()) => {
                SchemaStatus::Build
            }
            SchemaStatus::Ignore => SchemaStatus::Ignore,
        }
    }

    pub fn is_ignored(&self, object: &ObjectHeader) -> bool {
        matches_any(&self.config.ignored_objects, object)
    }

    /// Whether the object is processed this run. A non-empty allow-list
    /// replaces the schema status check for the objects it names.
    pub fn includes(&self, object: &ObjectHeader) -> bool {
        if self.is_ignored(object) {
            return false;
        }
        if !self.config.build_objects.is_empty() {
            return matches_any(&self.config.build_objects, object);
        }
        self.schema_status(&object.schema) == SchemaStatus::Build
    }

    pub fn forces_reparse(&self, object: &ObjectHeader) -> bool {
        matches_any(&self.config.force_reparse, object)
    }
}

/// Patterns containing a `.` match `schema.name`; others match the bare name.
fn matches_any(patterns: &[String], object: &ObjectHeader) -> bool {
    let qualified = object.qualified_name().to_lowercase();
    let bare = object.name.to_lowercase();
    patterns.iter().any(|pattern| {
        let pattern = pattern.trim().to_lowercase();
        if pattern.contains('.') {
            glob_match(&qualified, &pattern)
        } else {
            glob_match(&bare, &pattern)
        }
    })
}

/// `*` matches any run of characters, `?` exactly one.
fn glob_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    // Last `*` seen and the text position it currently absorbs up to.
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    star = Some((star_p, star_t + 1));
                    p = star_p + 1;
                    t = star_t + 1;
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaRule;
    use crate::models::ObjectKind;

    fn header(schema: &str, name: &str) -> ObjectHeader {
        ObjectHeader {
            kind: ObjectKind::Procedure,
            schema: schema.into(),
            name: name.into(),
            modified_ticks: 0,
        }
    }

    #[test]
    fn glob_supports_star_and_question_mark() {
        assert!(glob_match("dbo.getusers", "dbo.get*"));
        assert!(glob_match("dbo.get1", "dbo.get?"));
        assert!(!glob_match("sales.getusers", "dbo.*"));
        assert!(glob_match("", "*"));
    }

    #[test]
    fn glob_backtracks_over_stars() {
        assert!(glob_match("dbo.usp_get_orders", "dbo.*_orders"));
        assert!(glob_match("abcbc", "a*bc"));
        assert!(glob_match("report", "**re*o?t*"));
        assert!(!glob_match("dbo.getuser", "dbo.get*s"));
        assert!(!glob_match("abc", "a?"));
        assert!(!glob_match("", "?"));
        assert!(glob_match("", ""));
        assert!(!glob_match("x", ""));
    }

    #[test]
    fn explicit_rule_beats_default_and_snapshot_history() {
        let config = ProjectConfig {
            default_schema_status: SchemaStatus::Ignore,
            schemas: vec![
                SchemaRule {
                    name: "audit".into(),
                    status: SchemaStatus::Ignore,
                },
                SchemaRule {
                    name: "Sales".into(),
                    status: SchemaStatus::Build,
                },
            ],
            ..ProjectConfig::default()
        };
        let policy = SelectionPolicy::new(&config, ["audit", "dbo"]);
        assert_eq!(policy.schema_status("AUDIT"), SchemaStatus::Ignore);
        assert_eq!(policy.schema_status("sales"), SchemaStatus::Build);
        assert_eq!(policy.schema_status("dbo"), SchemaStatus::Build);
        assert_eq!(policy.schema_status("staging"), SchemaStatus::Ignore);
    }

    #[test]
    fn default_build_includes_unknown_schemas() {
        let config = ProjectConfig::default();
        let policy = SelectionPolicy::new(&config, []);
        assert!(policy.includes(&header("anything", "P")));
    }

    #[test]
    fn ignore_list_and_allow_list() {
        let config = ProjectConfig {
            default_schema_status: SchemaStatus::Ignore,
            ignored_objects: vec!["dbo.tmp_*".into()],
            build_objects: vec!["dbo.*".into(), "ReportUsers".into()],
            ..ProjectConfig::default()
        };
        let policy = SelectionPolicy::new(&config, []);
        assert!(policy.includes(&header("dbo", "GetUsers")));
        assert!(!policy.includes(&header("dbo", "tmp_Load")));
        assert!(policy.includes(&header("reports", "ReportUsers")));
        assert!(!policy.includes(&header("reports", "Other")));
    }

    #[test]
    fn force_reparse_matches_case_insensitively() {
        let config = ProjectConfig {
            force_reparse: vec!["Sales.Get*".into()],
            ..ProjectConfig::default()
        };
        let policy = SelectionPolicy::new(&config, []);
        assert!(policy.forces_reparse(&header("sales", "getOrders")));
        assert!(!policy.forces_reparse(&header("dbo", "GetOrders")));
    }
}
