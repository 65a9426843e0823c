//! `{{refPath}}` placeholders inside rule strings

use regex::Regex;
use serde_json::Value;
use std::ops::Range;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([\s\S]+?)\}\}").expect("hardcoded regex pattern is valid"));

/// Returns true if `s` contains at least one `{{…}}` placeholder
pub fn has_template(s: &str) -> bool {
    PLACEHOLDER.is_match(s)
}

/// Placeholders in order of appearance: byte range and inner expression
pub fn placeholders(s: &str) -> Vec<(Range<usize>, String)> {
    PLACEHOLDER
        .captures_iter(s)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(1)?;
            Some((whole.range(), inner.as_str().to_string()))
        })
        .collect()
}

/// Renders a value for splicing into a string: strings verbatim,
/// everything else as JSON
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
