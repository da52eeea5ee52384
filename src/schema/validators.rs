//! Value validators and diff suppression rules.

use chrono::DateTime;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::utils::json::json_semantic_equal;

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@]+@[^@]+\.[^@.]+$").ok());

// RFC 7230 token characters.
static HEADER_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").ok());

/// IANA areas accepted as the first component of a zone name.
const TIMEZONE_AREAS: &[&str] = &[
    "Africa",
    "America",
    "Antarctica",
    "Arctic",
    "Asia",
    "Atlantic",
    "Australia",
    "Brazil",
    "Canada",
    "Chile",
    "Etc",
    "Europe",
    "Indian",
    "Mexico",
    "Pacific",
    "US",
];

/// Single-component zone names that are valid without an area.
const TIMEZONE_SINGLES: &[&str] = &[
    "UTC", "GMT", "UCT", "Zulu", "Universal", "Greenwich", "EST", "MST", "HST", "EST5EDT",
    "CST6CDT", "MST7MDT", "PST8PDT", "CET", "EET", "MET", "WET", "Cuba", "Egypt", "Eire",
    "GB", "Hongkong", "Iceland", "Iran", "Israel", "Jamaica", "Japan", "Libya", "NZ", "Navajo",
    "PRC", "Poland", "Portugal", "ROC", "ROK", "Singapore", "Turkey", "W-SU",
];

/// A check applied to a configured value.
#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    /// The value must be one of the listed strings.
    OneOf(Vec<String>),
    /// Strings must not be empty.
    NotEmpty,
    /// The string must be a JSON document.
    Json,
    /// The string must parse as a float.
    FloatString,
    /// The string must be an RFC 3339 timestamp.
    Rfc3339,
    /// `UTC`, `local`, empty, or an IANA zone name.
    Timezone,
    /// Integers must be at least this value.
    IntAtLeast(i64),
    /// Integers must lie in the inclusive range.
    IntBetween(i64, i64),
    /// Numbers must lie in the inclusive range.
    FloatBetween(f64, f64),
    /// String length must lie in the inclusive range.
    StringLenBetween(usize, usize),
    /// The string must look like an email address.
    Email,
    /// Map keys must be valid HTTP header names.
    HttpHeaderMap,
}

impl Validator {
    /// Builds a [`Validator::OneOf`] from string slices.
    #[must_use]
    pub fn one_of(values: &[&str]) -> Self {
        Self::OneOf(values.iter().map(|v| (*v).to_string()).collect())
    }

    /// Checks a value, descending into lists for element validators.
    ///
    /// # Errors
    ///
    /// Returns the validation message when the value is rejected.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if let Value::Array(items) = value {
            if !matches!(self, Self::StringLenBetween(..)) {
                return items.iter().try_for_each(|item| self.check(item));
            }
        }

        match self {
            Self::OneOf(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => Ok(()),
                Some(s) => Err(format!("expected one of {allowed:?}, got {s}")),
                None => Err("expected a string".to_string()),
            },
            Self::NotEmpty => match value.as_str() {
                Some(s) if s.is_empty() => Err("expected a non-empty string".to_string()),
                _ => Ok(()),
            },
            Self::Json => {
                let text = value.as_str().unwrap_or_default();
                serde_json::from_str::<Value>(text)
                    .map(|_| ())
                    .map_err(|e| format!("contains an invalid JSON: {e}"))
            }
            Self::FloatString => match value {
                Value::Number(_) => Ok(()),
                Value::String(s) if s.is_empty() || s.trim().parse::<f64>().is_ok() => Ok(()),
                _ => Err(format!("{value} is not a valid float")),
            },
            Self::Rfc3339 => {
                let text = value.as_str().unwrap_or_default();
                DateTime::parse_from_rfc3339(text)
                    .map(|_| ())
                    .map_err(|_| format!("\"{text}\" is not a valid RFC 3339 time"))
            }
            Self::Timezone => {
                let text = value.as_str().unwrap_or_default();
                if is_valid_timezone(text) {
                    Ok(())
                } else {
                    Err(format!("{text} is not a valid timezone"))
                }
            }
            Self::IntAtLeast(min) => match value.as_i64() {
                Some(n) if n < *min => Err(format!("expected at least {min}, got {n}")),
                _ => Ok(()),
            },
            Self::IntBetween(min, max) => match value.as_i64() {
                Some(n) if n < *min || n > *max => {
                    Err(format!("expected to be in the range ({min} - {max}), got {n}"))
                }
                _ => Ok(()),
            },
            Self::FloatBetween(min, max) => match value.as_f64() {
                Some(n) if n < *min || n > *max => {
                    Err(format!("expected to be in the range ({min} - {max}), got {n}"))
                }
                _ => Ok(()),
            },
            Self::StringLenBetween(min, max) => {
                let len = value.as_str().map_or(0, str::len);
                if len < *min || len > *max {
                    Err(format!("expected length to be in the range ({min} - {max}), got {len}"))
                } else {
                    Ok(())
                }
            }
            Self::Email => {
                let text = value.as_str().unwrap_or_default();
                match EMAIL_RE.as_ref() {
                    Some(re) if re.is_match(text) => Ok(()),
                    _ => Err(format!("{text} is not a valid email address")),
                }
            }
            Self::HttpHeaderMap => {
                let headers = value.as_object().cloned().unwrap_or_default();
                for key in headers.keys() {
                    let valid = HEADER_NAME_RE.as_ref().is_some_and(|re| re.is_match(key));
                    if !valid {
                        return Err(format!("invalid HTTP header name {key:?}"));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Accepts `UTC`, `local`, the empty string, and `Area/Location` IANA names.
#[must_use]
pub fn is_valid_timezone(name: &str) -> bool {
    match name.to_lowercase().as_str() {
        "utc" | "" | "local" => return true,
        _ => {}
    }

    if TIMEZONE_SINGLES.contains(&name) {
        return true;
    }

    let mut parts = name.split('/');
    let Some(area) = parts.next() else {
        return false;
    };
    let rest: Vec<&str> = parts.collect();
    TIMEZONE_AREAS.contains(&area)
        && !rest.is_empty()
        && rest.iter().all(|p| {
            !p.is_empty()
                && p.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        })
}

/// Rules under which two differing values are considered equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSuppress {
    /// Ignore leading and trailing whitespace.
    TrimSpace,
    /// `"1"`, `"1.0"` and `1` are equal.
    FloatIntEquivalent,
    /// JSON strings are equal when they parse to the same document.
    JsonEquivalent,
    /// `query alert` and `metric alert` are the same monitor type.
    MonitorTypeEquivalent,
    /// Compare strings ignoring case.
    CaseInsensitive,
    /// Ignore the attribute entirely while the named sibling is set.
    WhenSiblingSet(String),
    /// Ignore the attribute unless the named boolean sibling is true.
    UnlessSiblingTrue(String),
    /// Never diff: the value only steers the provider.
    Always,
}

impl DiffSuppress {
    /// Returns true when the difference between `old` and `new` should be ignored.
    ///
    /// `config` is the object holding the attribute, for sibling lookups.
    #[must_use]
    pub fn suppresses(&self, old: &Value, new: &Value, config: &Map<String, Value>) -> bool {
        match self {
            Self::TrimSpace => match (old.as_str(), new.as_str()) {
                (Some(a), Some(b)) => a.trim() == b.trim(),
                _ => false,
            },
            Self::FloatIntEquivalent => match (as_float(old), as_float(new)) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => false,
            },
            Self::JsonEquivalent => match (old.as_str(), new.as_str()) {
                (Some(a), Some(b)) => json_semantic_equal(a, b, &[]),
                _ => false,
            },
            Self::MonitorTypeEquivalent => {
                let alias = |v: &Value| match v.as_str() {
                    Some("query alert") => Some("metric alert".to_string()),
                    other => other.map(str::to_string),
                };
                alias(old).is_some() && alias(old) == alias(new)
            }
            Self::CaseInsensitive => match (old.as_str(), new.as_str()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            },
            Self::WhenSiblingSet(sibling) => config
                .get(sibling)
                .is_some_and(|v| !super::is_zero(v)),
            Self::UnlessSiblingTrue(sibling) => {
                config.get(sibling).and_then(Value::as_bool) != Some(true)
            }
            Self::Always => true,
        }
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
