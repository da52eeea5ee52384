//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of workspace blocks so the
//! planner and state can tell whether a block changed since the last apply.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::spec::{BlockConfig, WorkspaceConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole workspace.
    ///
    /// This hash changes when any block or the provider URL changes.
    #[must_use]
    pub fn hash_workspace(&self, config: &WorkspaceConfig) -> String {
        let mut hasher = Sha256::new();

        if let Some(url) = &config.provider.api_url {
            hasher.update(url.as_bytes());
        }

        // Blocks sorted by address for determinism
        let mut blocks: Vec<_> = config
            .blocks()
            .map(|(kind, block)| (kind.address(&block.block_type, &block.name), block))
            .collect();
        blocks.sort_by(|a, b| a.0.cmp(&b.0));
        for (address, block) in blocks {
            hasher.update(address.as_bytes());
            hasher.update(self.hash_block(block).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single block: its type, name, attributes and
    /// explicit dependencies.
    #[must_use]
    pub fn hash_block(&self, block: &BlockConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(block.block_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(block.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(&block.attributes).as_bytes());

        let mut deps: Vec<_> = block.depends_on.iter().collect();
        deps.sort();
        for dep in deps {
            hasher.update(dep.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Hash of the block at `address`, if the workspace has it.
    #[must_use]
    pub fn hash_address(&self, config: &WorkspaceConfig, address: &str) -> Option<String> {
        config
            .blocks()
            .find(|(kind, b)| kind.address(&b.block_type, &b.name) == address)
            .map(|(_, b)| self.hash_block(b))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        // Constant time
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Serializes `value` with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_block(name: &str, attributes: Value) -> BlockConfig {
        BlockConfig {
            block_type: String::from("datadog_team"),
            name: name.to_string(),
            attributes,
            depends_on: vec![],
        }
    }

    #[test]
    fn test_block_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let block = create_test_block("core", json!({"name": "Core", "handle": "core"}));

        let hash1 = hasher.hash_block(&block);
        let hash2 = hasher.hash_block(&block);

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_blocks_different_hash() {
        let hasher = ConfigHasher::new();
        let block1 = create_test_block("core", json!({"name": "Core"}));
        let block2 = create_test_block("core", json!({"name": "Core 2"}));

        assert_ne!(hasher.hash_block(&block1), hasher.hash_block(&block2));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        assert_eq!(
            canonical_json(&json!({"b": [1, {"z": 1, "a": null}], "a": "x"})),
            r#"{"a":"x","b":[1,{"a":null,"z":1}]}"#
        );
    }

    #[test]
    fn test_workspace_hash_ignores_block_order() {
        let hasher = ConfigHasher::new();
        let a = create_test_block("a", json!({"name": "A"}));
        let b = create_test_block("b", json!({"name": "B"}));

        let first = WorkspaceConfig {
            resources: vec![a.clone(), b.clone()],
            ..WorkspaceConfig::default()
        };
        let second = WorkspaceConfig {
            resources: vec![b, a],
            ..WorkspaceConfig::default()
        };
        assert_eq!(hasher.hash_workspace(&first), hasher.hash_workspace(&second));
        assert!(hasher.hash_address(&first, "datadog_team.a").is_some());
        assert!(hasher.hash_address(&first, "datadog_team.c").is_none());
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let full_hash = "abcdef1234567890abcdef1234567890";
        let short = hasher.short_hash(full_hash);

        assert_eq!(short, "abcdef12");
        assert_eq!(short.len(), 8);
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
