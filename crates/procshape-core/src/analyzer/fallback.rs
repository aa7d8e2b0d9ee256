//! Coarse regex classifier used when the grammar parser gives up.
//!
//! Comments and string literals are blanked first, so the keyword flags are
//! never set by text that the server would not execute.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::ExecutedProcedure;

// ---------------------------------------------------------------------------
// Regex patterns (compiled once via LazyLock)
// ---------------------------------------------------------------------------

static BLOCK_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

static LINE_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"--[^\n]*").unwrap());

static STRING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)N?'(?:[^']|'')*'").unwrap());

static SELECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").unwrap());
static INSERT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bINSERT\b").unwrap());
static UPDATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bUPDATE\b").unwrap());
static DELETE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bDELETE\b").unwrap());
static MERGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bMERGE\b").unwrap());
static OPENJSON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bOPENJSON\s*\(").unwrap());

static EXEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bEXEC(?:UTE)?\s+(?:@\w+\s*=\s*)?((?:\[[^\]]+\]|[A-Za-z_#][\w$#]*)(?:\s*\.\s*(?:\[[^\]]+\]|[A-Za-z_][\w$#]*))*)",
    )
    .unwrap()
});

static INSERT_EXEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bINSERT\s+(?:INTO\s+)?[\w\[\]\.#@]+\s*(?:\([^)]*\)\s*)?EXEC(?:UTE)?\s").unwrap()
});

/// Flags and EXEC targets recovered without a parse tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FallbackScan {
    pub contains_select: bool,
    pub contains_insert: bool,
    pub contains_update: bool,
    pub contains_delete: bool,
    pub contains_merge: bool,
    pub contains_open_json: bool,
    pub executed_procedures: Vec<ExecutedProcedure>,
}

/// Replace comments and string literals with spaces.
pub fn strip_comments_and_strings(definition: &str) -> String {
    let without_blocks = BLOCK_COMMENT_RE.replace_all(definition, " ");
    let without_lines = LINE_COMMENT_RE.replace_all(&without_blocks, " ");
    STRING_RE.replace_all(&without_lines, "''").into_owned()
}

pub fn scan(definition: &str) -> FallbackScan {
    let text = strip_comments_and_strings(definition);
    let captured: Vec<std::ops::Range<usize>> = INSERT_EXEC_RE
        .find_iter(&text)
        .map(|m| m.range())
        .collect();

    let mut executed_procedures = Vec::new();
    for captures in EXEC_RE.captures_iter(&text) {
        let Some(target) = captures.get(1) else {
            continue;
        };
        let parts: Vec<String> = target
            .as_str()
            .split('.')
            .map(|part| part.trim().trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|part| !part.is_empty())
            .collect();
        let Some(name) = parts.last().cloned() else {
            continue;
        };
        if name.eq_ignore_ascii_case("AS") || name.eq_ignore_ascii_case("sp_executesql") {
            continue;
        }
        let schema = (parts.len() >= 2).then(|| parts[parts.len() - 2].clone());
        let keyword_start = captures.get(0).map(|m| m.start()).unwrap_or_default();
        executed_procedures.push(ExecutedProcedure {
            schema,
            name,
            position: None,
            captures_output: captured.iter().any(|range| range.contains(&keyword_start)),
        });
    }

    FallbackScan {
        contains_select: SELECT_RE.is_match(&text),
        contains_insert: INSERT_RE.is_match(&text),
        contains_update: UPDATE_RE.is_match(&text),
        contains_delete: DELETE_RE.is_match(&text),
        contains_merge: MERGE_RE.is_match(&text),
        contains_open_json: OPENJSON_RE.is_match(&text),
        executed_procedures,
    }
}
