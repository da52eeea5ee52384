//! Attribute schemas for the provider, its resources and data sources.
//!
//! A [`Schema`] describes the attributes a block accepts. It is used to:
//! - validate configuration before any API call is made
//! - fill defaults and coerce scalar YAML values into their declared type
//! - compare configuration with state, honouring set semantics and
//!   diff suppression rules
//!
//! Resource CRUD functions read and write values through [`ResourceData`].

mod attribute;
mod data;
mod validators;

pub use attribute::{Attribute, AttributeType, NestedBlock, Schema};
pub use data::ResourceData;
pub use validators::{is_valid_timezone, DiffSuppress, Validator};

use crate::error::SchemaError;
use serde::Serialize;
use serde_json::{Map, Value};

/// A single attribute that differs between state and configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub name: String,
    /// Value in state.
    pub old: Value,
    /// Desired value.
    pub new: Value,
    /// Changing this attribute replaces the object.
    pub force_new: bool,
    /// Hide both values in output.
    pub sensitive: bool,
}

/// Returns true for values Terraform treats as unset: null, `""`, `0`,
/// `false` and empty collections.
#[must_use]
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

impl Schema {
    /// Validates a configuration object against this schema.
    ///
    /// `config` holds only what the user wrote (see [`Schema::coerce_config`]):
    /// a key that is present counts as set for `conflicts_with`, even when it
    /// repeats the default. Returns every problem found; an empty vector
    /// means the value is valid.
    #[must_use]
    pub fn validate(&self, config: &Value) -> Vec<SchemaError> {
        let mut errors = Vec::new();
        match config {
            Value::Object(obj) => self.validate_object(obj, "", &mut errors),
            Value::Null => self.validate_object(&Map::new(), "", &mut errors),
            other => errors.push(SchemaError::invalid(
                "",
                format!("expected a mapping, got {other}"),
            )),
        }
        errors
    }

    /// Validates and returns the first problem as an error.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found.
    pub fn validate_strict(&self, config: &Value) -> std::result::Result<(), SchemaError> {
        match self.validate(config).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn validate_object(&self, obj: &Map<String, Value>, prefix: &str, errors: &mut Vec<SchemaError>) {
        let path_of = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}.{name}")
            }
        };

        for key in obj.keys() {
            if key != "id" && !self.attributes.contains_key(key) {
                errors.push(SchemaError::UnknownAttribute { path: path_of(key) });
            }
        }

        for (name, attr) in &self.attributes {
            let path = path_of(name);

            if attr.exactly_one_of.first() == Some(name) {
                let set = attr
                    .exactly_one_of
                    .iter()
                    .filter(|n| obj.get(n.as_str()).is_some_and(|v| !v.is_null()))
                    .count();
                if set != 1 {
                    errors.push(SchemaError::invalid(
                        path.clone(),
                        format!("exactly one of {:?} must be specified", attr.exactly_one_of),
                    ));
                }
            }

            let Some(value) = obj.get(name).filter(|v| !v.is_null()) else {
                if attr.required {
                    errors.push(SchemaError::MissingRequired { path });
                }
                continue;
            };

            if !attr.is_configurable() {
                errors.push(SchemaError::invalid(path, "computed attribute cannot be set"));
                continue;
            }

            check_type(&attr.ty, value, &path, errors);

            for validator in &attr.validators {
                if let Err(message) = validator.check(value) {
                    errors.push(SchemaError::invalid(path.clone(), message));
                }
            }

            for other in &attr.conflicts_with {
                if obj.get(other).is_some_and(|v| !v.is_null()) {
                    errors.push(SchemaError::Conflict {
                        path: path.clone(),
                        other: path_of(other),
                    });
                }
            }
        }
    }

    /// Prepares raw configuration: fills defaults, wraps single objects given
    /// for blocks into one-element lists, and coerces scalars into the
    /// declared type (`90` for a string, `"123"` for an integer).
    pub fn prepare(&self, config: &mut Value) {
        self.prepare_with(config, true);
    }

    /// [`Schema::prepare`] without defaults, so only keys the user wrote are
    /// present. This is the form [`Schema::validate`] expects.
    pub fn coerce_config(&self, config: &mut Value) {
        self.prepare_with(config, false);
    }

    fn prepare_with(&self, config: &mut Value, defaults: bool) {
        if config.is_null() {
            *config = Value::Object(Map::new());
        }
        if let Value::Object(obj) = config {
            self.prepare_object(obj, defaults);
        }
    }

    fn prepare_object(&self, obj: &mut Map<String, Value>, defaults: bool) {
        for (name, attr) in &self.attributes {
            match obj.get_mut(name) {
                Some(value) if !value.is_null() => coerce(&attr.ty, value, defaults),
                _ => {
                    if let Some(default) = attr.default.as_ref().filter(|_| defaults) {
                        obj.insert(name.clone(), default.clone());
                    }
                }
            }
        }
    }

    /// Fills declared defaults, recursively inside blocks.
    pub fn apply_defaults(&self, config: &mut Value) {
        let Value::Object(obj) = config else {
            return;
        };
        for (name, attr) in &self.attributes {
            match obj.get_mut(name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &attr.default {
                        obj.insert(name.clone(), default.clone());
                    }
                }
                Some(Value::Array(items)) => {
                    if let AttributeType::Block(block) = &attr.ty {
                        items.iter_mut().for_each(|item| block.schema.apply_defaults(item));
                    }
                }
                Some(_) => {}
            }
        }
    }

    /// Rewrites `value` into the canonical form kept in state: set elements
    /// sorted and deduplicated, empty optional collections dropped.
    pub fn normalize(&self, value: &mut Value) {
        let Value::Object(obj) = value else {
            return;
        };
        obj.retain(|name, v| match self.attributes.get(name) {
            Some(attr) if !attr.required && attr.ty.is_collection() => !is_empty_collection(v),
            _ => true,
        });
        for (name, v) in obj.iter_mut() {
            let (Some(attr), Value::Array(items)) = (self.attributes.get(name), v) else {
                continue;
            };
            match &attr.ty {
                AttributeType::Set(_) => {
                    items.sort_by_key(Value::to_string);
                    items.dedup();
                }
                AttributeType::Block(block) => {
                    items.iter_mut().for_each(|item| block.schema.normalize(item));
                    if block.set {
                        items.sort_by_key(Value::to_string);
                    }
                }
                _ => {}
            }
        }
    }

    /// Lists configurable attributes whose desired value differs from state.
    ///
    /// Computed attributes omitted from configuration never differ.
    #[must_use]
    pub fn diff(&self, prior: &Value, desired: &Value) -> Vec<AttributeChange> {
        let empty = Map::new();
        let prior_obj = prior.as_object().unwrap_or(&empty);
        let desired_obj = desired.as_object().unwrap_or(&empty);

        self.attributes
            .iter()
            .filter(|(_, attr)| attr.is_configurable())
            .filter_map(|(name, attr)| {
                let old = prior_obj.get(name).unwrap_or(&Value::Null);
                let new = desired_obj.get(name).unwrap_or(&Value::Null);
                if attr.computed && is_zero(new) {
                    return None;
                }
                if values_equal(attr, old, new, desired_obj) {
                    return None;
                }
                Some(AttributeChange {
                    name: name.clone(),
                    old: old.clone(),
                    new: new.clone(),
                    force_new: attr.force_new,
                    sensitive: attr.sensitive,
                })
            })
            .collect()
    }
}

/// Compares two values of one attribute.
#[must_use]
pub fn values_equal(attr: &Attribute, old: &Value, new: &Value, siblings: &Map<String, Value>) -> bool {
    if is_zero(old) && is_zero(new) {
        return true;
    }
    if let Some(rule) = &attr.diff_suppress {
        if rule.suppresses(old, new, siblings) {
            return true;
        }
    }
    typed_equal(&attr.ty, old, new)
}

fn typed_equal(ty: &AttributeType, old: &Value, new: &Value) -> bool {
    match ty {
        AttributeType::Float => match (old.as_f64(), new.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => old == new,
        },
        AttributeType::Set(_) => {
            let mut a = canonical_elements(old);
            let mut b = canonical_elements(new);
            a.sort();
            b.sort();
            a == b
        }
        AttributeType::Block(block) => {
            let empty = Vec::new();
            let a = old.as_array().unwrap_or(&empty);
            let b = new.as_array().unwrap_or(&empty);
            if a.len() != b.len() {
                return false;
            }
            if block.set {
                let mut unmatched: Vec<&Value> = a.iter().collect();
                for item in b {
                    let Some(pos) = unmatched
                        .iter()
                        .position(|candidate| block.schema.diff(candidate, item).is_empty())
                    else {
                        return false;
                    };
                    unmatched.swap_remove(pos);
                }
                true
            } else {
                a.iter().zip(b).all(|(x, y)| block.schema.diff(x, y).is_empty())
            }
        }
        _ => old == new,
    }
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(entries) => entries.is_empty(),
        _ => false,
    }
}

fn canonical_elements(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().map(Value::to_string).collect())
        .unwrap_or_default()
}

fn check_type(ty: &AttributeType, value: &Value, path: &str, errors: &mut Vec<SchemaError>) {
    let mismatch = |errors: &mut Vec<SchemaError>| {
        errors.push(SchemaError::invalid(
            path,
            format!("expected {}, got {value}", ty.describe()),
        ));
    };

    match ty {
        AttributeType::String => {
            if !value.is_string() {
                mismatch(errors);
            }
        }
        AttributeType::Int => {
            if value.as_i64().is_none() {
                mismatch(errors);
            }
        }
        AttributeType::Float => {
            if !value.is_number() {
                mismatch(errors);
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                mismatch(errors);
            }
        }
        AttributeType::List(elem) | AttributeType::Set(elem) => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    check_type(elem, item, &format!("{path}.{i}"), errors);
                }
            }
            None => mismatch(errors),
        },
        AttributeType::Map(elem) => match value.as_object() {
            Some(entries) => {
                for (key, item) in entries {
                    check_type(elem, item, &format!("{path}.{key}"), errors);
                }
            }
            None => mismatch(errors),
        },
        AttributeType::Block(block) => {
            let Some(items) = value.as_array() else {
                mismatch(errors);
                return;
            };
            if items.len() < block.min_items {
                errors.push(SchemaError::invalid(
                    path,
                    format!("at least {} item(s) required, got {}", block.min_items, items.len()),
                ));
            }
            if let Some(max) = block.max_items {
                if items.len() > max {
                    errors.push(SchemaError::invalid(
                        path,
                        format!("no more than {max} item(s) allowed, got {}", items.len()),
                    ));
                }
            }
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}.{i}");
                match item.as_object() {
                    Some(obj) => block.schema.validate_object(obj, &item_path, errors),
                    None => errors.push(SchemaError::invalid(item_path, "expected a mapping")),
                }
            }
        }
    }
}

fn coerce(ty: &AttributeType, value: &mut Value, defaults: bool) {
    match ty {
        AttributeType::String => {
            let text = match value {
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            };
            if let Some(text) = text {
                *value = Value::String(text);
            }
        }
        AttributeType::List(elem) | AttributeType::Set(elem) => {
            if let Value::Array(items) = value {
                items.iter_mut().for_each(|item| coerce(elem, item, defaults));
            }
        }
        AttributeType::Map(elem) => {
            if let Value::Object(entries) = value {
                entries.values_mut().for_each(|item| coerce(elem, item, defaults));
            }
        }
        AttributeType::Block(block) => {
            if value.is_object() {
                *value = Value::Array(vec![value.take()]);
            }
            if let Value::Array(items) = value {
                for item in items.iter_mut() {
                    if let Value::Object(obj) = item {
                        block.schema.prepare_object(obj, defaults);
                    }
                }
            }
        }
        AttributeType::Int => {
            if let Some(n) = value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
                *value = Value::from(n);
            }
        }
        AttributeType::Float => {
            if let Some(n) = value.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
                *value = Value::from(n);
            }
        }
        AttributeType::Bool => match value.as_str() {
            Some("true") => *value = Value::Bool(true),
            Some("false") => *value = Value::Bool(false),
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn downtime_like() -> Schema {
        let recurrence = Schema::v0()
            .with_attribute("period", Attribute::required(AttributeType::Int))
            .with_attribute(
                "type",
                Attribute::required_string().validate(Validator::one_of(&["days", "weeks"])),
            )
            .with_attribute(
                "until_date",
                Attribute::optional(AttributeType::Int).conflicts_with(&["until_occurrences"]),
            )
            .with_attribute(
                "until_occurrences",
                Attribute::optional(AttributeType::Int).conflicts_with(&["until_date"]),
            );

        Schema::v0()
            .with_attribute("scope", Attribute::required(AttributeType::string_list()))
            .with_attribute(
                "timezone",
                Attribute::optional_string().with_default("UTC"),
            )
            .with_attribute(
                "message",
                Attribute::optional_string().suppress_diff(DiffSuppress::TrimSpace),
            )
            .with_attribute(
                "monitor_tags",
                Attribute::optional(AttributeType::string_set()),
            )
            .with_attribute(
                "recurrence",
                Attribute::optional(AttributeType::Block(Box::new(NestedBlock::single(recurrence)))),
            )
            .with_attribute("id_ro", Attribute::computed(AttributeType::String))
    }

    #[test]
    fn test_validate_reports_nested_paths() {
        let schema = downtime_like();
        let config = json!({
            "scope": ["*"],
            "recurrence": [{"period": 1, "type": "hours", "until_date": 1, "until_occurrences": 2}]
        });

        let errors = schema.validate(&config);
        let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
        assert!(rendered.iter().any(|e| e.starts_with("recurrence.0.type")));
        assert!(rendered.iter().any(|e| e.contains("recurrence.0.until_date: conflicts with")));
    }

    #[test]
    fn test_validate_required_and_unknown() {
        let schema = downtime_like();
        let errors = schema.validate(&json!({"bogus": 1}));
        assert!(errors.iter().any(|e| matches!(e, SchemaError::MissingRequired { path } if path == "scope")));
        assert!(errors.iter().any(|e| matches!(e, SchemaError::UnknownAttribute { path } if path == "bogus")));
    }

    #[test]
    fn test_computed_cannot_be_set() {
        let schema = downtime_like();
        let errors = schema.validate(&json!({"scope": ["*"], "id_ro": "x"}));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_prepare_defaults_and_coercion() {
        let schema = downtime_like();
        let mut config = json!({
            "scope": ["*"],
            "recurrence": {"period": 1, "type": "days"}
        });
        schema.prepare(&mut config);

        assert_eq!(config["timezone"], "UTC");
        assert!(config["recurrence"].is_array());
        assert!(schema.validate(&config).is_empty());
    }

    #[test]
    fn test_diff_honours_sets_and_suppression() {
        let schema = downtime_like();
        let prior = json!({
            "scope": ["*"],
            "timezone": "UTC",
            "message": "hello\n",
            "monitor_tags": ["b", "a"],
            "id_ro": "123"
        });
        let desired = json!({
            "scope": ["*"],
            "timezone": "UTC",
            "message": "hello",
            "monitor_tags": ["a", "b"]
        });
        assert!(schema.diff(&prior, &desired).is_empty());

        let desired = json!({"scope": ["env:prod"], "timezone": "UTC", "message": "hello"});
        let changes = schema.diff(&prior, &desired);
        let names: Vec<&str> = changes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["monitor_tags", "scope"]);
    }

    #[test]
    fn test_zero_values() {
        assert!(is_zero(&json!(null)));
        assert!(is_zero(&json!(0)));
        assert!(is_zero(&json!([])));
        assert!(!is_zero(&json!("x")));
        assert!(!is_zero(&json!(true)));
    }

    #[test]
    fn test_apply_defaults_in_blocks() {
        let schema = Schema::v0()
            .with_attribute("timezone", Attribute::optional_string().with_default("UTC"))
            .with_attribute(
                "window",
                Attribute::optional(AttributeType::Block(Box::new(NestedBlock::list(
                    Schema::v0().with_attribute("hours", Attribute::optional_int().with_default(1)),
                )))),
            );
        let mut config = json!({"window": [{}, {"hours": 4}]});
        schema.apply_defaults(&mut config);
        assert_eq!(config, json!({"timezone": "UTC", "window": [{"hours": 1}, {"hours": 4}]}));
    }

    #[test]
    fn test_normalize_sorts_sets_and_drops_empty_collections() {
        let schema = downtime_like();
        let mut value = json!({
            "scope": [],
            "monitor_tags": ["b", "a", "b"],
            "recurrence": [],
            "message": ""
        });
        schema.normalize(&mut value);
        assert_eq!(value, json!({"scope": [], "monitor_tags": ["a", "b"], "message": ""}));
    }

    #[test]
    fn test_explicit_default_value_still_conflicts() {
        let schema = Schema::v0()
            .with_attribute(
                "notify_no_data",
                Attribute::optional_bool()
                    .with_default(false)
                    .conflicts_with(&["on_missing_data"]),
            )
            .with_attribute(
                "on_missing_data",
                Attribute::optional_string().conflicts_with(&["notify_no_data"]),
            );

        let mut written = json!({"notify_no_data": "false", "on_missing_data": "resolve"});
        schema.coerce_config(&mut written);
        assert_eq!(written["notify_no_data"], false);
        let errors = schema.validate(&written);
        assert!(errors
            .iter()
            .any(|e| matches!(e, SchemaError::Conflict { path, .. } if path == "notify_no_data")));

        let mut defaulted = json!({"on_missing_data": "resolve"});
        schema.coerce_config(&mut defaulted);
        assert!(defaulted.get("notify_no_data").is_none());
        assert!(schema.validate(&defaulted).is_empty());
    }
}
