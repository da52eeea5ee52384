//! `datadog_security_monitoring_rules` data source: every rule matching a
//! name, tag and default/user filter, read page by page.

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{translate_client_error, ConfigError, Result};
use crate::provider::{DataSource, ProviderConfiguration};
use crate::resources::{rule_schema, rule_to_state, RULES_PATH};
use crate::schema::{Attribute, AttributeType, NestedBlock, ResourceData, Schema, Validator};
use crate::utils::json::get_string_slice;

const PAGE_SIZE: u64 = 100;

/// Security monitoring rules lookup.
#[derive(Debug, Default)]
pub struct SecurityMonitoringRulesDataSource;

/// Client-side rule filters.
#[derive(Debug, Default, PartialEq, Eq)]
struct RuleFilters {
    name: Option<String>,
    /// `Some(true)` keeps default rules only, `Some(false)` user rules only.
    default: Option<bool>,
    /// Sorted and deduplicated.
    tags: Option<Vec<String>>,
}

impl RuleFilters {
    fn from_config(data: &ResourceData) -> Result<Self> {
        let default_only = data.get_bool("default_only_filter") == Some(true);
        let user_only = data.get_bool("user_only_filter") == Some(true);
        if default_only && user_only {
            return Err(
                ConfigError::validation_general("cannot filter both default and user rules").into(),
            );
        }
        let tags = data.get_ok("tags_filter").map(|_| {
            let mut tags = data.get_strings("tags_filter");
            tags.sort();
            tags.dedup();
            tags
        });
        Ok(Self {
            name: data.get_str("name_filter").map(str::to_string),
            default: if default_only {
                Some(true)
            } else if user_only {
                Some(false)
            } else {
                None
            },
            tags,
        })
    }

    fn matches(&self, rule: &serde_json::Map<String, Value>) -> bool {
        if let Some(name) = &self.name {
            let rule_name = rule.get("name").and_then(Value::as_str).unwrap_or_default();
            if !rule_name.contains(name.as_str()) {
                return false;
            }
        }
        if let Some(default) = self.default {
            if rule.get("isDefault").and_then(Value::as_bool).unwrap_or(false) != default {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            let rule_tags = get_string_slice(rule, "tags");
            if !tags.iter().all(|tag| rule_tags.contains(tag)) {
                return false;
            }
        }
        true
    }

    /// Stable id derived from the filters.
    fn id(&self) -> String {
        let mut key = self.name.clone().unwrap_or_default();
        key.push('|');
        match self.default {
            Some(true) => key.push('1'),
            Some(false) => key.push('0'),
            None => {}
        }
        key.push('|');
        for tag in self.tags.iter().flatten() {
            key.push_str(tag);
            key.push(',');
        }
        hex::encode(Sha256::digest(key.as_bytes()))
    }
}

#[async_trait]
impl DataSource for SecurityMonitoringRulesDataSource {
    fn type_name(&self) -> &'static str {
        "datadog_security_monitoring_rules"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .describe("Use this data source to retrieve information about existing security monitoring rules for use in other resources.")
            .with_attribute(
                "name_filter",
                Attribute::optional_string()
                    .validate(Validator::NotEmpty)
                    .describe("A rule name to limit the search"),
            )
            .with_attribute(
                "tags_filter",
                Attribute::optional(AttributeType::string_list())
                    .describe("A list of tags to limit the search"),
            )
            .with_attribute(
                "default_only_filter",
                Attribute::optional_bool().describe("Limit the search to default rules"),
            )
            .with_attribute(
                "user_only_filter",
                Attribute::optional_bool().describe("Limit the search to user rules"),
            )
            .with_attribute(
                "rule_ids",
                Attribute::computed(AttributeType::string_list())
                    .describe("List of IDs of the matched rules."),
            )
            .with_attribute(
                "rules",
                Attribute::computed(AttributeType::Block(Box::new(NestedBlock::list(rule_schema()))))
                    .describe("List of rules."),
            )
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let filters = RuleFilters::from_config(data)?;

        let mut rule_ids = Vec::new();
        let mut rules = Vec::new();
        let mut page = 0_u64;
        loop {
            let response: Value = meta
                .client
                .get_json(&format!("{RULES_PATH}?page[size]={PAGE_SIZE}&page[number]={page}"))
                .await
                .map_err(|e| translate_client_error(e, "error listing rules"))?;

            for rule in response["data"].as_array().map(Vec::as_slice).unwrap_or_default() {
                let Some(rule) = rule.as_object() else {
                    continue;
                };
                if !filters.matches(rule) {
                    continue;
                }
                if let Some(id) = rule.get("id").and_then(Value::as_str) {
                    rule_ids.push(id.to_string());
                }
                rules.push(Value::Object(rule_to_state(rule)));
            }

            let total = response["meta"]["page"]["total_count"].as_u64().unwrap_or(0);
            if total <= (page + 1) * PAGE_SIZE {
                break;
            }
            page += 1;
        }
        debug!("Matched {} security monitoring rules", rule_ids.len());

        data.set_id(filters.id());
        data.set("rule_ids", json!(rule_ids));
        data.set("rules", Value::Array(rules));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, MockTransport};
    use std::sync::Arc;

    fn rule(id: &str, name: &str, is_default: bool, tags: &[&str]) -> Value {
        json!({
            "id": id,
            "name": name,
            "message": "m",
            "isEnabled": true,
            "isDefault": is_default,
            "type": "log_detection",
            "tags": tags,
            "cases": [{"status": "info"}],
            "queries": [{"query": "source:nginx", "aggregation": "count"}],
            "options": {"evaluationWindow": 300}
        })
    }

    fn page(rules: Vec<Value>, total: u64) -> String {
        json!({"data": rules, "meta": {"page": {"total_count": total}}}).to_string()
    }

    fn config(value: Value) -> ResourceData {
        let mut value = value;
        SecurityMonitoringRulesDataSource.schema().prepare(&mut value);
        ResourceData::new(value)
    }

    #[test]
    fn test_filters() {
        let filters = RuleFilters {
            name: Some("brute".to_string()),
            default: Some(false),
            tags: Some(vec!["env:prod".to_string()]),
        };
        let matching = rule("a", "ssh brute force", false, &["env:prod", "team:sec"]);
        assert!(filters.matches(matching.as_object().unwrap()));
        let default_rule = rule("b", "ssh brute force", true, &["env:prod"]);
        assert!(!filters.matches(default_rule.as_object().unwrap()));
        let untagged = rule("c", "ssh brute force", false, &[]);
        assert!(!filters.matches(untagged.as_object().unwrap()));
        let other = rule("d", "impossible travel", false, &["env:prod"]);
        assert!(!filters.matches(other.as_object().unwrap()));
    }

    #[test]
    fn test_id_ignores_tag_order() {
        let a = RuleFilters::from_config(&config(json!({"tags_filter": ["b", "a"]}))).unwrap();
        let b = RuleFilters::from_config(&config(json!({"tags_filter": ["a", "b", "a"]}))).unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), RuleFilters::default().id());
    }

    #[test]
    fn test_default_and_user_filters_conflict() {
        let err = RuleFilters::from_config(&config(json!({
            "default_only_filter": true,
            "user_only_filter": true
        })))
        .unwrap_err();
        assert!(err.to_string().contains("cannot filter both default and user rules"));
    }

    #[tokio::test]
    async fn test_read_walks_pages() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_send()
            .withf(|req| req.url.contains("page[number]=0"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                let mut rules: Vec<Value> = (0..99)
                    .map(|i| rule(&format!("other-{i}"), "other", false, &[]))
                    .collect();
                rules.push(rule("user-1", "custom nginx", false, &["team:web"]));
                Ok(ApiResponse::new(200, page(rules, 101)))
            });
        transport
            .expect_send()
            .withf(|req| req.url.contains("page[number]=1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(ApiResponse::new(
                    200,
                    page(vec![rule("default-1", "nginx default", true, &["team:web"])], 101),
                ))
            });
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");

        let mut data = config(json!({"name_filter": "nginx", "tags_filter": ["team:web"]}));
        SecurityMonitoringRulesDataSource.read(&meta, &mut data).await.unwrap();

        assert_eq!(data.get_strings("rule_ids"), vec!["user-1", "default-1"]);
        assert_eq!(data.get_str("rules.0.name"), Some("custom nginx"));
        assert_eq!(data.get_str("rules.1.query.0.query"), Some("source:nginx"));
        assert_eq!(data.get_i64("rules.0.options.0.evaluation_window"), Some(300));
        assert!(!data.id().is_empty());
    }
}
