//! The value bag handed to resource CRUD functions.

use serde_json::{Map, Value};

use super::is_zero;

/// Attribute values of one resource instance during a CRUD call.
///
/// `values` holds the working copy (configuration on create/update, state
/// on read/delete). `prior` holds the last known state and drives
/// [`ResourceData::has_change`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceData {
    id: String,
    values: Map<String, Value>,
    prior: Map<String, Value>,
    new_resource: bool,
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl ResourceData {
    /// Data for a resource about to be created from configuration.
    #[must_use]
    pub fn new(config: Value) -> Self {
        Self {
            id: String::new(),
            values: into_map(config),
            prior: Map::new(),
            new_resource: true,
        }
    }

    /// Data for an update: desired configuration on top of prior state.
    #[must_use]
    pub fn with_prior(id: impl Into<String>, prior: Value, config: Value) -> Self {
        Self {
            id: id.into(),
            values: into_map(config),
            prior: into_map(prior),
            new_resource: false,
        }
    }

    /// Data for a read or delete of an object tracked in state.
    #[must_use]
    pub fn from_state(id: impl Into<String>, attributes: Value) -> Self {
        let values = into_map(attributes);
        Self {
            id: id.into(),
            prior: values.clone(),
            values,
            new_resource: false,
        }
    }

    /// Data holding only an id, as produced by an import.
    #[must_use]
    pub fn for_import(id: impl Into<String>) -> Self {
        Self::from_state(id, Value::Object(Map::new()))
    }

    /// Object id, empty when the object is gone.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sets the object id.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Marks the object as gone; the caller drops it from state.
    pub fn clear_id(&mut self) {
        self.id.clear();
    }

    /// True while the resource is being created.
    #[must_use]
    pub const fn is_new_resource(&self) -> bool {
        self.new_resource
    }

    /// Looks up a dotted path such as `recurrence.0.type`. Nulls read as absent.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.values, path)
    }

    /// Like [`ResourceData::get`] but skips zero values (`""`, `0`, `false`, empty).
    #[must_use]
    pub fn get_ok(&self, path: &str) -> Option<&Value> {
        self.get(path).filter(|v| !is_zero(v))
    }

    /// String at `path`.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// String at `path`, empty when absent.
    #[must_use]
    pub fn get_string(&self, path: &str) -> String {
        self.get_str(path).unwrap_or_default().to_string()
    }

    /// Integer at `path`.
    #[must_use]
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// Number at `path`.
    #[must_use]
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Bool at `path`.
    #[must_use]
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    /// List at `path`, empty when absent.
    #[must_use]
    pub fn get_list(&self, path: &str) -> &[Value] {
        self.get(path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// String elements of the list or set at `path`.
    #[must_use]
    pub fn get_strings(&self, path: &str) -> Vec<String> {
        self.get_list(path)
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    /// Map at `path`.
    #[must_use]
    pub fn get_map(&self, path: &str) -> Option<&Map<String, Value>> {
        self.get(path).and_then(Value::as_object)
    }

    /// Sets a top level attribute.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Sets a top level attribute when `value` is present, removes it otherwise.
    pub fn set_opt<V: Into<Value>>(&mut self, key: &str, value: Option<V>) {
        match value {
            Some(v) => self.set(key, v),
            None => {
                self.values.remove(key);
            }
        }
    }

    /// Removes a top level attribute.
    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Prior state value of a top level attribute.
    #[must_use]
    pub fn prior(&self, key: &str) -> Option<&Value> {
        self.prior.get(key).filter(|v| !v.is_null())
    }

    /// True when the attribute differs from prior state. Zero values compare equal.
    #[must_use]
    pub fn has_change(&self, key: &str) -> bool {
        let (old, new) = self.get_change(key);
        if is_zero(&old) && is_zero(&new) {
            return false;
        }
        old != new
    }

    /// True when any of the attributes changed.
    #[must_use]
    pub fn has_changes(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.has_change(k))
    }

    /// Prior and current value of a top level attribute.
    #[must_use]
    pub fn get_change(&self, key: &str) -> (Value, Value) {
        (
            self.prior.get(key).cloned().unwrap_or(Value::Null),
            self.values.get(key).cloned().unwrap_or(Value::Null),
        )
    }

    /// Current values without the id.
    #[must_use]
    pub const fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Current values with `id` included, ready to store in state.
    #[must_use]
    pub fn attributes(&self) -> Value {
        let mut map = self.values.clone();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }

    /// Consumes the data into state attributes, `id` included.
    #[must_use]
    pub fn into_attributes(self) -> Value {
        let mut map = self.values;
        map.insert("id".to_string(), Value::String(self.id));
        Value::Object(map)
    }
}

fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    if current.is_null() { None } else { Some(current) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dotted_lookup() {
        let data = ResourceData::new(json!({
            "recurrence": [{"type": "weeks", "week_days": ["Mon", "Fri"]}],
            "monitor_id": null
        }));

        assert_eq!(data.get_str("recurrence.0.type"), Some("weeks"));
        assert_eq!(data.get_strings("recurrence.0.week_days"), vec!["Mon", "Fri"]);
        assert!(data.get("recurrence.1.type").is_none());
        assert!(data.get("monitor_id").is_none());
        assert!(data.is_new_resource());
    }

    #[test]
    fn test_has_change() {
        let data = ResourceData::with_prior(
            "42",
            json!({"message": "old", "tags": [], "priority": 0}),
            json!({"message": "new", "priority": null}),
        );
        assert!(data.has_change("message"));
        assert!(!data.has_change("tags"));
        assert!(!data.has_change("priority"));
        assert!(data.has_changes(&["tags", "message"]));
    }

    #[test]
    fn test_attributes_include_id() {
        let mut data = ResourceData::new(json!({"name": "x"}));
        data.set_id("abc");
        data.set("user_count", 3);
        let attrs = data.attributes();
        assert_eq!(attrs["id"], "abc");
        assert_eq!(attrs["user_count"], 3);

        data.clear_id();
        assert!(data.id().is_empty());
    }
}
