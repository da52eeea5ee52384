//! Tag and metric name helpers.

use std::collections::BTreeMap;

/// Longest name [`normalize_metric_name`] will touch.
const MAX_METRIC_NAME_LEN: usize = 200;

/// Returns the tags sorted, as stored in state.
#[must_use]
pub fn sorted_tags(tags: &[String]) -> Vec<String> {
    let mut tags = tags.to_vec();
    tags.sort();
    tags
}

/// Appends `key:value` default tags whose key is not already present.
#[must_use]
pub fn merge_default_tags(tags: &[String], defaults: &BTreeMap<String, String>) -> Vec<String> {
    let mut merged = tags.to_vec();
    for (key, value) in defaults {
        let present = tags
            .iter()
            .any(|t| t.split_once(':').map_or(t.as_str(), |(k, _)| k) == key);
        if !present {
            merged.push(format!("{key}:{value}"));
        }
    }
    merged
}

/// Drops API tags that only exist because of provider default tags.
#[must_use]
pub fn strip_default_tags(
    api_tags: &[String],
    configured: &[String],
    defaults: &BTreeMap<String, String>,
) -> Vec<String> {
    api_tags
        .iter()
        .filter(|tag| {
            configured.contains(tag) || !defaults.iter().any(|(k, v)| **tag == format!("{k}:{v}"))
        })
        .cloned()
        .collect()
}

/// Normalises a metric name the way the Datadog intake does: leading
/// non-letters are dropped, other invalid characters become `_`, repeated
/// underscores collapse, and `_` before `.` or at the end is removed.
#[must_use]
pub fn normalize_metric_name(name: &str) -> String {
    if name.is_empty() || name.len() > MAX_METRIC_NAME_LEN {
        return name.to_string();
    }

    let bytes = name.as_bytes();
    let Some(start) = bytes.iter().position(u8::is_ascii_alphabetic) else {
        return String::new();
    };

    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    for &b in &bytes[start..] {
        let last = out.last().copied();
        if b.is_ascii_alphanumeric() {
            out.push(b);
        } else if b == b'.' {
            match out.last_mut() {
                Some(prev) if *prev == b'_' => *prev = b'.',
                _ => out.push(b'.'),
            }
        } else if !matches!(last, Some(b'.' | b'_')) {
            out.push(b'_');
        }
    }
    if out.last() == Some(&b'_') {
        out.pop();
    }
    String::from_utf8_lossy(&out).into_owned()
}
