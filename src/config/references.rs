//! `${address.attribute}` references between blocks.
//!
//! A string attribute whose whole value is `${datadog_role.ops.id}` (or
//! `${data.datadog_team.core.id}`) is replaced with that attribute of the
//! referenced object at apply time. References also order the blocks.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{ConfigError, Result};

use super::spec::{BlockKind, WorkspaceConfig};

/// A parsed `${...}` reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    /// Address of the referenced block.
    pub address: String,
    /// Attribute read from it.
    pub attribute: String,
}

impl Reference {
    /// Parses a whole-string reference.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.strip_prefix("${")?.strip_suffix('}')?.trim();
        let parts: Vec<&str> = inner.split('.').collect();
        let (address, attribute) = match parts.as_slice() {
            ["data", ty, name, attr @ ..] if !attr.is_empty() => {
                (format!("data.{ty}.{name}"), attr.join("."))
            }
            [ty, name, attr @ ..] if !attr.is_empty() && *ty != "data" => {
                (format!("{ty}.{name}"), attr.join("."))
            }
            _ => return None,
        };
        if address.split('.').any(str::is_empty) {
            return None;
        }
        Some(Self { address, attribute })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.address, self.attribute)
    }
}

/// All references found anywhere inside `value`.
#[must_use]
pub fn find_references(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    collect(value, &mut found);
    found
}

fn collect(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::String(s) => {
            if let Some(reference) = Reference::parse(s) {
                found.push(reference);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect(v, found)),
        _ => {}
    }
}

/// True when `value` still contains an unresolved reference.
#[must_use]
pub fn has_references(value: &Value) -> bool {
    !find_references(value).is_empty()
}

/// Replaces each reference using `lookup`.
///
/// # Errors
///
/// Returns the first reference `lookup` cannot answer.
pub fn resolve_references<F>(value: &mut Value, lookup: &F) -> std::result::Result<(), Reference>
where
    F: Fn(&Reference) -> Option<Value>,
{
    if let Some(reference) = value.as_str().and_then(Reference::parse) {
        let resolved = lookup(&reference).ok_or(reference)?;
        *value = resolved;
        return Ok(());
    }

    match value {
        Value::Array(items) => items.iter_mut().try_for_each(|v| resolve_references(v, lookup)),
        Value::Object(map) => map
            .values_mut()
            .try_for_each(|v| resolve_references(v, lookup)),
        _ => Ok(()),
    }
}

/// Dependency edges of every block: address to the addresses it needs.
#[must_use]
pub fn dependency_graph(config: &WorkspaceConfig) -> BTreeMap<String, BTreeSet<String>> {
    config
        .blocks()
        .map(|(kind, block)| {
            let mut deps: BTreeSet<String> = find_references(&block.attributes)
                .into_iter()
                .map(|r| r.address)
                .collect();
            deps.extend(block.depends_on.iter().cloned());
            (kind.address(&block.block_type, &block.name), deps)
        })
        .collect()
}

/// Orders addresses so every block comes after its dependencies.
///
/// Edges to addresses outside the graph are ignored here; the validator
/// reports them.
///
/// # Errors
///
/// Returns [`ConfigError::CircularDependency`] naming the cycle.
pub fn topological_order(graph: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: &str,
        graph: &BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<String, Mark>,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> std::result::Result<(), String> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].to_vec();
                cycle.push(node.to_string());
                return Err(cycle.join(" -> "));
            }
            None => {}
        }

        marks.insert(node.to_string(), Mark::Visiting);
        stack.push(node.to_string());
        if let Some(deps) = graph.get(node) {
            for dep in deps.iter().filter(|d| graph.contains_key(d.as_str())) {
                visit(dep, graph, marks, stack, order)?;
            }
        }
        stack.pop();
        marks.insert(node.to_string(), Mark::Done);
        order.push(node.to_string());
        Ok(())
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    let mut order = Vec::new();
    for node in graph.keys() {
        visit(node, graph, &mut marks, &mut stack, &mut order)
            .map_err(|cycle| ConfigError::CircularDependency { cycle })?;
    }
    Ok(order)
}

/// Kind of the block an address points at.
#[must_use]
pub fn address_kind(address: &str) -> BlockKind {
    if address.starts_with("data.") {
        BlockKind::Data
    } else {
        BlockKind::Resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_references() {
        let r = Reference::parse("${datadog_role.ops.id}").unwrap();
        assert_eq!(r.address, "datadog_role.ops");
        assert_eq!(r.attribute, "id");

        let r = Reference::parse("${data.datadog_team.core.id}").unwrap();
        assert_eq!(r.address, "data.datadog_team.core");
        assert_eq!(r.to_string(), "${data.datadog_team.core.id}");

        assert!(Reference::parse("plain").is_none());
        assert!(Reference::parse("${datadog_role}").is_none());
        assert!(Reference::parse("${data.x.y}").is_none());
    }

    #[test]
    fn test_resolve_references() {
        let mut value = json!({
            "monitor_id": "${datadog_monitor.cpu.id}",
            "scope": ["${data.datadog_team.core.handle}", "env:prod"]
        });
        let lookup = |r: &Reference| match r.address.as_str() {
            "datadog_monitor.cpu" => Some(json!(123)),
            "data.datadog_team.core" => Some(json!("team:core")),
            _ => None,
        };
        resolve_references(&mut value, &lookup).unwrap();
        assert_eq!(value["monitor_id"], 123);
        assert_eq!(value["scope"][0], "team:core");

        let mut missing = json!({"x": "${datadog_team.nope.id}"});
        let err = resolve_references(&mut missing, &lookup).unwrap_err();
        assert_eq!(err.address, "datadog_team.nope");
    }

    #[test]
    fn test_topological_order_and_cycles() {
        let mut graph = BTreeMap::new();
        graph.insert("b.x".to_string(), BTreeSet::from(["a.x".to_string()]));
        graph.insert("a.x".to_string(), BTreeSet::new());
        graph.insert("c.x".to_string(), BTreeSet::from(["b.x".to_string(), "zzz.unknown".to_string()]));
        assert_eq!(topological_order(&graph).unwrap(), vec!["a.x", "b.x", "c.x"]);

        graph.insert("a.x".to_string(), BTreeSet::from(["c.x".to_string()]));
        let err = topological_order(&graph).unwrap_err();
        assert!(err.to_string().contains("Circular dependency"));
    }
}
