//! Cleaning of externally sourced text before it reaches a CSV cell or a log line.
//!
//! Error strings from downloaders can carry whole HTML pages (Drive login and
//! virus-scan interstitials, for example). Everything here is pure string
//! processing with no I/O.

use std::sync::LazyLock;

use regex::Regex;

/// Default cap for sanitized fields.
pub const DEFAULT_MAX_FIELD_LENGTH: usize = 200;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("static regex"));
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("static regex"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static HTML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("static regex")
});
static WINDOW_GLOBAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"window\.[A-Za-z_][A-Za-z0-9_]*\s*=").expect("static regex")
});
static JSON_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}").expect("static regex"));
static MEANINGFUL_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)HTTP \d{3}|file not found|access denied|permission denied|connection refused|timed? ?out|not found|unavailable|private|requires authentication|removed|deleted",
    )
    .expect("static regex")
});

/// Characters that carry markup or script syntax and never survive sanitizing.
const STRIPPED_CHARS: &[char] = &['<', '>', '{', '}', '[', ']', '"', '\'', '`'];

/// Clean one value for storage in a CSV cell.
///
/// The result has no markup, no braces or brackets, no quotes, no control
/// characters, no commas (replaced by `;`), collapsed whitespace, at most
/// `max_len` characters, and a leading `'` when it would otherwise start
/// like a spreadsheet formula.
pub fn sanitize_csv_field(value: &str, max_len: usize) -> String {
    if value.trim().is_empty() {
        return String::new();
    }

    let decoded = decode_entities(value);
    let without_blocks = SCRIPT_BLOCK.replace_all(&decoded, " ");
    let without_blocks = STYLE_BLOCK.replace_all(&without_blocks, " ");
    let without_tags = HTML_TAG.replace_all(&without_blocks, " ");
    let without_globals = WINDOW_GLOBAL.replace_all(&without_tags, " ");

    let cleaned: String = without_globals
        .chars()
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .map(|c| match c {
            ',' => ';',
            '\n' | '\r' | '\t' => ' ',
            other => other,
        })
        .filter(|c| !c.is_control())
        .collect();

    let mut collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.starts_with(['=', '+', '-', '@']) {
        collapsed.insert(0, '\'');
    }
    truncate_with_ellipsis(&collapsed, max_len)
}

/// Reduce an error message to its meaningful fragments, then sanitize it.
///
/// Recognised fragments (HTTP codes, "not found", "private", ...) are kept,
/// up to three of them. Otherwise the first ten words are used.
pub fn sanitize_error_message(error: &str, max_len: usize) -> String {
    if error.trim().is_empty() {
        return "Unknown error".to_string();
    }

    // Markup is dropped first so fragments inside page text are not matched twice.
    let plain = HTML_TAG.replace_all(&SCRIPT_BLOCK.replace_all(error, " "), " ").into_owned();
    let fragments: Vec<&str> = MEANINGFUL_ERROR
        .find_iter(&plain)
        .map(|m| m.as_str())
        .take(3)
        .collect();

    let essence = if fragments.is_empty() {
        plain.split_whitespace().take(10).collect::<Vec<_>>().join(" ")
    } else {
        fragments.join(" ")
    };

    let sanitized = sanitize_csv_field(&essence, max_len);
    if sanitized.is_empty() {
        "Unknown error".to_string()
    } else {
        sanitized
    }
}

/// Whether a value can be written to a CSV cell as-is.
pub fn is_csv_field_safe(value: &str) -> bool {
    !(HTML_TAG.is_match(value)
        || value.contains("window.")
        || JSON_LIKE.is_match(value)
        || value.chars().any(char::is_control)
        || value.chars().count() >= 500)
}

fn truncate_with_ellipsis(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        return value.to_string();
    }
    if max_len <= 3 {
        return value.chars().take(max_len).collect();
    }
    let mut out: String = value.chars().take(max_len - 3).collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

fn decode_entities(value: &str) -> String {
    HTML_ENTITY
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            decode_entity(body).map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn decode_entity(body: &str) -> Option<char> {
    if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = body.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    match body {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => None,
    }
}
