//! JSON sub-fields (`s3_paths`, `file_uuids`) stored inside CSV cells.
//!
//! Cells always hold JSON object text. Loading never fails: anything that is
//! not a JSON object yields an empty map so one bad cell cannot stop a batch.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::table::RowRef;

/// UUID → value mapping held in a JSON cell.
pub type Mapping = BTreeMap<String, String>;

static QUOTED_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)""#).expect("static regex")
});

/// Parse JSON object text into a mapping.
pub fn parse_mapping(raw: &str) -> Mapping {
    let trimmed = raw.trim();
    if matches!(trimmed, "" | "{}" | "[]" | "nan" | "None" | "null") {
        return Mapping::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
        Ok(_) | Err(_) => {
            warn!(chars = trimmed.len(), "Ignoring non-JSON mapping cell");
            Mapping::new()
        }
    }
}

/// Serialize a mapping to JSON object text (`"{}"` when empty).
pub fn format_mapping(mapping: &Mapping) -> String {
    if mapping.is_empty() {
        return "{}".to_string();
    }
    serde_json::to_string(mapping).unwrap_or_else(|_| "{}".to_string())
}

pub fn load_s3_paths(row: &RowRef<'_>) -> Mapping {
    parse_mapping(row.value("s3_paths"))
}

pub fn load_file_uuids(row: &RowRef<'_>) -> Mapping {
    parse_mapping(row.value("file_uuids"))
}

pub fn save_s3_paths(mapping: &Mapping) -> String {
    format_mapping(mapping)
}

pub fn save_file_uuids(mapping: &Mapping) -> String {
    format_mapping(mapping)
}

/// Convert a legacy single-quoted dict literal (`{'a': 'b'}`) to a mapping.
///
/// Only flat string-to-string dicts are recognised. Returns `None` for
/// anything else, including text that is already valid JSON.
pub fn parse_legacy_literal(raw: &str) -> Option<Mapping> {
    let trimmed = raw.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    if serde_json::from_str::<Value>(trimmed).is_ok() {
        return None;
    }

    let tokens: Vec<String> = QUOTED_STRING
        .captures_iter(trimmed)
        .map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map_or_else(String::new, |m| unescape_py(m.as_str()))
        })
        .collect();

    // Everything between tokens must be dict punctuation.
    let skeleton = QUOTED_STRING.replace_all(trimmed, "");
    if !skeleton.chars().all(|c| matches!(c, '{' | '}' | ':' | ',' | ' ' | '\n' | '\t')) {
        return None;
    }
    if tokens.len() % 2 != 0 {
        return None;
    }
    Some(
        tokens
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect(),
    )
}

fn unescape_py(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_forms_load_empty() {
        for raw in ["", "{}", "[]", "nan", "  "] {
            assert!(parse_mapping(raw).is_empty(), "{raw:?}");
        }
    }

    #[test]
    fn test_invalid_json_loads_empty() {
        assert!(parse_mapping("{'a': 'b'}").is_empty());
        assert!(parse_mapping("[1, 2]").is_empty());
        assert!(parse_mapping("not json").is_empty());
    }

    #[test]
    fn test_round_trip() {
        let mut m = Mapping::new();
        m.insert("3f2a".into(), "files/3f2a.mp4".into());
        m.insert("quote\"key".into(), "comma, value".into());
        assert_eq!(parse_mapping(&format_mapping(&m)), m);
        assert_eq!(format_mapping(&Mapping::new()), "{}");
        assert_eq!(parse_mapping(&format_mapping(&Mapping::new())), Mapping::new());
    }

    #[test]
    fn test_non_string_values_are_stringified() {
        let m = parse_mapping(r#"{"a": 1, "b": true}"#);
        assert_eq!(m.get("a").map(String::as_str), Some("1"));
        assert_eq!(m.get("b").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_legacy_literal_conversion() {
        let m = parse_legacy_literal("{'u1': 'files/u1.mp4', \"u2\": 'it\\'s'}").unwrap();
        assert_eq!(m.get("u1").map(String::as_str), Some("files/u1.mp4"));
        assert_eq!(m.get("u2").map(String::as_str), Some("it's"));
        assert!(parse_legacy_literal(r#"{"a": "b"}"#).is_none());
        assert!(parse_legacy_literal("{'a': 1}").is_none());
        assert_eq!(parse_legacy_literal("{}"), None);
    }
}
