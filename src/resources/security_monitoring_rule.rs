//! `datadog_security_monitoring_rule`: detection and signal correlation
//! rules through the v2 Security Monitoring API.
//!
//! Detection rules carry `query` blocks and signal correlation rules carry
//! `signal_query` blocks; setting both, or the wrong one for the rule type,
//! is rejected before any request is sent. The API speaks camelCase.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{translate_client_error, ApiError, ConfigError, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{Attribute, AttributeType, NestedBlock, ResourceData, Schema, Validator};
use crate::utils::json::{get_string_slice, remove_empty_values_in_map};
use crate::utils::tags::{merge_default_tags, sorted_tags, strip_default_tags};

pub(crate) const RULES_PATH: &str = "/api/v2/security_monitoring/rules";

const SIGNAL_CORRELATION: &str = "signal_correlation";
const LOG_DETECTION: &str = "log_detection";

const RULE_TYPES: &[&str] = &[
    "application_security",
    LOG_DETECTION,
    "workload_security",
    SIGNAL_CORRELATION,
];
const SEVERITIES: &[&str] = &["info", "low", "medium", "high", "critical"];
const CASE_ACTIONS: &[&str] = &["block_ip", "block_user", "user_behavior"];
const DETECTION_METHODS: &[&str] = &[
    "threshold",
    "new_value",
    "anomaly_detection",
    "impossible_travel",
    "hardcoded",
    "third_party",
    "anomaly_threshold",
    "sequence_detection",
];
const AGGREGATIONS: &[&str] = &[
    "count",
    "cardinality",
    "sum",
    "max",
    "new_value",
    "geo_data",
    "event_count",
    "none",
];
const DATA_SOURCES: &[&str] = &[
    "logs",
    "audit",
    "app_sec_spans",
    "spans",
    "security_runtime",
    "network",
    "events",
];
const FILTER_ACTIONS: &[&str] = &["require", "suppress"];

/// Longest window, keep alive or signal duration the API accepts, in seconds.
const MAX_WINDOW_SECONDS: i64 = 86_400;

/// Security monitoring rule.
#[derive(Debug, Default)]
pub struct SecurityMonitoringRuleResource;

fn rule_path(id: &str) -> String {
    format!("{RULES_PATH}/{id}")
}

fn list_of(schema: Schema) -> AttributeType {
    AttributeType::Block(Box::new(NestedBlock::list(schema)))
}

fn single(schema: Schema) -> AttributeType {
    AttributeType::Block(Box::new(NestedBlock::single(schema)))
}

fn case_schema() -> Schema {
    let action_options = Schema::v0().with_attribute(
        "duration",
        Attribute::optional_int()
            .validate(Validator::IntAtLeast(0))
            .describe("Duration of the action in seconds."),
    );
    let action = Schema::v0()
        .with_attribute(
            "type",
            Attribute::required_string()
                .validate(Validator::one_of(CASE_ACTIONS))
                .describe("Type of action to perform when the case triggers."),
        )
        .with_attribute(
            "options",
            Attribute::optional(single(action_options)).describe("Options for the action."),
        );

    Schema::v0()
        .with_attribute("name", Attribute::optional_string().describe("Name of the case."))
        .with_attribute(
            "condition",
            Attribute::optional_string().describe(
                "A rule case contains logical operations (`>`,`>=`, `&&`, `||`) to determine if a signal should be generated based on the event counts in the previously defined queries.",
            ),
        )
        .with_attribute(
            "notifications",
            Attribute::optional(AttributeType::string_list())
                .describe("Notification targets for each rule case."),
        )
        .with_attribute(
            "status",
            Attribute::required_string()
                .validate(Validator::one_of(SEVERITIES))
                .describe("Severity of the Security Signal."),
        )
        .with_attribute(
            "action",
            Attribute::optional(list_of(action)).describe("Action to perform when the case trigger"),
        )
}

fn options_schema() -> Schema {
    let window = || {
        Attribute::optional_int().validate(Validator::IntBetween(0, MAX_WINDOW_SECONDS))
    };
    let new_value = Schema::v0()
        .with_attribute(
            "learning_method",
            Attribute::optional_string()
                .with_default("duration")
                .validate(Validator::one_of(&["duration", "threshold"]))
                .describe("The learning method used to determine when signals should be generated for values that weren't learned."),
        )
        .with_attribute(
            "learning_duration",
            Attribute::optional_int()
                .with_default(1)
                .validate(Validator::IntBetween(0, 7))
                .describe("The duration in days during which values are learned."),
        )
        .with_attribute(
            "learning_threshold",
            Attribute::optional_int()
                .with_default(0)
                .validate(Validator::IntAtLeast(0))
                .describe("A number of occurrences after which signals are generated for values that weren't learned."),
        )
        .with_attribute(
            "forget_after",
            Attribute::required(AttributeType::Int)
                .validate(Validator::IntBetween(1, 28))
                .describe("The duration in days after which a learned value is forgotten."),
        );
    let impossible_travel = Schema::v0().with_attribute(
        "baseline_user_locations",
        Attribute::optional_bool()
            .with_default(false)
            .describe("If true, signals are suppressed for the first 24 hours while Datadog learns the user's regular access locations."),
    );

    Schema::v0()
        .with_attribute(
            "detection_method",
            Attribute::optional_string()
                .with_default("threshold")
                .force_new()
                .validate(Validator::one_of(DETECTION_METHODS))
                .describe("The detection method."),
        )
        .with_attribute(
            "evaluation_window",
            window().describe(
                "A time window is specified to match when at least one of the cases matches true. This is a sliding window and evaluates in real time.",
            ),
        )
        .with_attribute(
            "keep_alive",
            window().describe(
                "Once a signal is generated, the signal will remain open if a case is matched at least once within this keep alive window (in seconds).",
            ),
        )
        .with_attribute(
            "max_signal_duration",
            window().describe(
                "A signal will close regardless of the query being matched once the time exceeds the maximum duration (in seconds).",
            ),
        )
        .with_attribute(
            "decrease_criticality_based_on_env",
            Attribute::optional_bool().with_default(false).describe(
                "If true, signals in non-production environments have a lower severity than what is defined by the rule case. Only available when the rule type is `log_detection`.",
            ),
        )
        .with_attribute(
            "new_value_options",
            Attribute::optional(single(new_value)).describe("New value rules specific options."),
        )
        .with_attribute(
            "impossible_travel_options",
            Attribute::optional(single(impossible_travel))
                .describe("Options for rules using the impossible travel detection method."),
        )
}

fn query_schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "aggregation",
            Attribute::optional_string()
                .with_default("count")
                .validate(Validator::one_of(AGGREGATIONS))
                .describe("The aggregation type."),
        )
        .with_attribute(
            "distinct_fields",
            Attribute::optional(AttributeType::string_list())
                .describe("Field for which the cardinality is measured. Sent as an array."),
        )
        .with_attribute(
            "group_by_fields",
            Attribute::optional(AttributeType::string_list()).describe("Fields to group by."),
        )
        .with_attribute(
            "has_optional_group_by_fields",
            Attribute::optional_bool().with_default(false).describe(
                "When false, events without a group-by value are ignored by the rule.",
            ),
        )
        .with_attribute(
            "data_source",
            Attribute::optional_string()
                .with_default("logs")
                .validate(Validator::one_of(DATA_SOURCES))
                .describe("Source of events."),
        )
        .with_attribute(
            "metric",
            Attribute::optional_string()
                .deprecate("Configure `metrics` instead.")
                .describe("The target field to aggregate over when using the `sum`, `max`, or `geo_data` aggregations."),
        )
        .with_attribute(
            "metrics",
            Attribute::optional(AttributeType::string_list())
                .also_computed()
                .describe("Group of target fields to aggregate over."),
        )
        .with_attribute(
            "name",
            Attribute::optional_string().describe("Name of the query. Not compatible with `new_value` aggregations."),
        )
        .with_attribute(
            "query",
            Attribute::required_string().describe("Query to run on logs."),
        )
        .with_attribute(
            "indexes",
            Attribute::optional(AttributeType::string_list())
                .describe("List of indexes to run the query on when the data source is `logs`. Supports only one element."),
        )
}

fn signal_query_schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "aggregation",
            Attribute::optional_string()
                .with_default("event_count")
                .validate(Validator::one_of(AGGREGATIONS))
                .describe("The aggregation type. For Signal Correlation rules, it must be event_count."),
        )
        .with_attribute(
            "name",
            Attribute::optional_string().describe("Name of the query."),
        )
        .with_attribute(
            "correlated_by_fields",
            Attribute::optional(AttributeType::string_list()).describe("Fields to correlate by."),
        )
        .with_attribute(
            "correlated_query_index",
            Attribute::optional_string().with_default("").describe(
                "Index of the rule query used to retrieve the correlated field. An empty string applies correlation on the non-projected per query attributes of the rule.",
            ),
        )
        .with_attribute(
            "rule_id",
            Attribute::required_string().describe("Rule ID of the signal to correlate."),
        )
        .with_attribute(
            "default_rule_id",
            Attribute::optional_string()
                .describe("Default Rule ID of the signal to correlate. This value is READ-ONLY."),
        )
}

fn filter_schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "query",
            Attribute::required_string().describe("Query for selecting logs to apply the filtering action."),
        )
        .with_attribute(
            "action",
            Attribute::required_string()
                .validate(Validator::one_of(FILTER_ACTIONS))
                .describe("The type of filtering action."),
        )
}

/// Rule attributes shared by the resource and the `rules` list of the
/// `datadog_security_monitoring_rules` data source.
pub(crate) fn rule_schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "case",
            Attribute::optional(AttributeType::Block(Box::new(NestedBlock {
                max_items: Some(10),
                ..NestedBlock::list(case_schema())
            })))
            .describe("Cases for generating signals."),
        )
        .with_attribute(
            "enabled",
            Attribute::optional_bool()
                .with_default(true)
                .describe("Whether the rule is enabled."),
        )
        .with_attribute(
            "message",
            Attribute::required_string().describe("Message for generated signals."),
        )
        .with_attribute(
            "name",
            Attribute::required_string().describe("The name of the rule."),
        )
        .with_attribute(
            "has_extended_title",
            Attribute::optional_bool()
                .with_default(false)
                .describe("Whether the notifications include the triggering group-by values in their title."),
        )
        .with_attribute(
            "options",
            Attribute::optional(single(options_schema())).describe("Options on rules."),
        )
        .with_attribute(
            "query",
            Attribute::optional(list_of(query_schema()))
                .describe("Queries for selecting logs which are part of the rule."),
        )
        .with_attribute(
            "signal_query",
            Attribute::optional(list_of(signal_query_schema()))
                .describe("Queries for selecting signals which are part of the rule."),
        )
        .with_attribute(
            "tags",
            Attribute::optional(AttributeType::string_set())
                .also_computed()
                .describe("Tags for generated signals. Provider default tags are added to this resource."),
        )
        .with_attribute(
            "filter",
            Attribute::optional(list_of(filter_schema())).describe(
                "Additional queries to filter matched events before they are processed.",
            ),
        )
        .with_attribute(
            "type",
            Attribute::optional_string()
                .with_default(LOG_DETECTION)
                .validate(Validator::one_of(RULE_TYPES))
                .describe("The rule type."),
        )
        .with_attribute(
            "group_signals_by",
            Attribute::optional(AttributeType::string_list()).describe(
                "Additional grouping to perform on top of the existing groups in the query section.",
            ),
        )
}

fn is_signal_correlation(data: &ResourceData) -> bool {
    data.get_str("type") == Some(SIGNAL_CORRELATION)
}

fn check_query_consistency(data: &ResourceData) -> Result<()> {
    let has_queries = !data.get_list("query").is_empty();
    let has_signal_queries = !data.get_list("signal_query").is_empty();
    let message = if has_queries && has_signal_queries {
        "query list and signal query list cannot be both populated"
    } else if !is_signal_correlation(data) && has_signal_queries {
        "signal query list should not be populated for this rule type"
    } else if is_signal_correlation(data) && has_queries {
        "query list should not be populated for this rule type"
    } else {
        return Ok(());
    };
    Err(ConfigError::validation_general(message).into())
}

fn strings(value: &Value, key: &str) -> Value {
    value
        .as_object()
        .map_or_else(|| json!([]), |map| json!(get_string_slice(map, key)))
}

fn build_options(options: &Value, rule_type: &str) -> Value {
    let mut body = Map::new();
    body.insert("detectionMethod".into(), options["detection_method"].clone());
    body.insert("evaluationWindow".into(), options["evaluation_window"].clone());
    body.insert("keepAlive".into(), options["keep_alive"].clone());
    body.insert("maxSignalDuration".into(), options["max_signal_duration"].clone());
    if rule_type == LOG_DETECTION {
        body.insert(
            "decreaseCriticalityBasedOnEnv".into(),
            options["decrease_criticality_based_on_env"].clone(),
        );
    }
    if let Some(new_value) = options["new_value_options"].get(0) {
        body.insert(
            "newValueOptions".into(),
            json!({
                "learningMethod": new_value["learning_method"],
                "learningDuration": new_value["learning_duration"],
                "learningThreshold": new_value["learning_threshold"],
                "forgetAfter": new_value["forget_after"],
            }),
        );
    }
    if let Some(travel) = options["impossible_travel_options"].get(0) {
        body.insert(
            "impossibleTravelOptions".into(),
            json!({"baselineUserLocations": travel["baseline_user_locations"]}),
        );
    }
    Value::Object(body)
}

fn build_case(case: &Value) -> Value {
    let actions: Vec<Value> = case["action"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|action| {
            json!({
                "type": action["type"],
                "options": action["options"].get(0).map(|o| json!({"duration": o["duration"]})),
            })
        })
        .collect();
    json!({
        "name": case["name"],
        "condition": case["condition"],
        "notifications": strings(case, "notifications"),
        "status": case["status"],
        "actions": actions,
    })
}

fn build_query(query: &Value) -> Value {
    let mut body = json!({
        "aggregation": query["aggregation"],
        "groupByFields": strings(query, "group_by_fields"),
        "hasOptionalGroupByFields": query["has_optional_group_by_fields"],
        "distinctFields": strings(query, "distinct_fields"),
        "dataSource": query["data_source"],
        "metrics": strings(query, "metrics"),
        "name": query["name"],
        "query": query["query"],
    });
    if let Some(metric) = query["metric"].as_str().filter(|m| !m.is_empty()) {
        body["metric"] = json!(metric);
    }
    if let Some(index) = query["indexes"].get(0) {
        body["index"] = index.clone();
    }
    body
}

fn build_signal_query(query: &Value) -> Result<Value> {
    if query["default_rule_id"].as_str().is_some_and(|s| !s.is_empty()) {
        return Err(ConfigError::validation("default_rule_id cannot be set", "default_rule_id").into());
    }
    let mut body = json!({
        "aggregation": query["aggregation"],
        "correlatedByFields": strings(query, "correlated_by_fields"),
        "name": query["name"],
        "ruleId": query["rule_id"],
    });
    if let Some(index) = query["correlated_query_index"]
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
    {
        body["correlatedQueryIndex"] = json!(index);
    }
    Ok(body)
}

/// Builds the create, update and validate body.
fn build_rule_body(data: &ResourceData, default_tags: &BTreeMap<String, String>) -> Result<Value> {
    check_query_consistency(data)?;
    let rule_type = data.get_string("type");

    let mut body = Map::new();
    body.insert("name".into(), json!(data.get_string("name")));
    body.insert("message".into(), json!(data.get_string("message")));
    body.insert("isEnabled".into(), json!(data.get_bool("enabled").unwrap_or(true)));
    body.insert(
        "hasExtendedTitle".into(),
        json!(data.get_bool("has_extended_title").unwrap_or(false)),
    );
    body.insert("type".into(), json!(rule_type));
    body.insert(
        "tags".into(),
        json!(sorted_tags(&merge_default_tags(&data.get_strings("tags"), default_tags))),
    );
    if let Some(options) = data.get("options.0") {
        body.insert("options".into(), build_options(options, &rule_type));
    }
    body.insert(
        "cases".into(),
        Value::Array(data.get_list("case").iter().map(build_case).collect()),
    );
    let queries = if rule_type == SIGNAL_CORRELATION {
        data.get_list("signal_query")
            .iter()
            .map(build_signal_query)
            .collect::<Result<Vec<_>>>()?
    } else {
        data.get_list("query").iter().map(build_query).collect()
    };
    body.insert("queries".into(), Value::Array(queries));
    body.insert(
        "filters".into(),
        Value::Array(
            data.get_list("filter")
                .iter()
                .map(|f| json!({"action": f["action"], "query": f["query"]}))
                .collect(),
        ),
    );
    body.insert("groupSignalsBy".into(), json!(data.get_strings("group_signals_by")));

    remove_empty_values_in_map(&mut body);
    Ok(Value::Object(body))
}

fn options_to_state(options: &Value) -> Value {
    let mut state = Map::new();
    for (api, field) in [
        ("detectionMethod", "detection_method"),
        ("evaluationWindow", "evaluation_window"),
        ("keepAlive", "keep_alive"),
        ("maxSignalDuration", "max_signal_duration"),
        ("decreaseCriticalityBasedOnEnv", "decrease_criticality_based_on_env"),
    ] {
        if let Some(v) = options.get(api).filter(|v| !v.is_null()) {
            state.insert(field.into(), v.clone());
        }
    }
    if let Some(new_value) = options.get("newValueOptions").filter(|v| v.is_object()) {
        state.insert(
            "new_value_options".into(),
            json!([{
                "learning_method": new_value["learningMethod"],
                "learning_duration": new_value["learningDuration"],
                "learning_threshold": new_value["learningThreshold"],
                "forget_after": new_value["forgetAfter"],
            }]),
        );
    }
    if let Some(travel) = options.get("impossibleTravelOptions").filter(|v| v.is_object()) {
        state.insert(
            "impossible_travel_options".into(),
            json!([{"baseline_user_locations": travel["baselineUserLocations"]}]),
        );
    }
    Value::Object(state)
}

fn case_to_state(case: &Value) -> Value {
    let mut state = json!({
        "name": case["name"],
        "condition": case["condition"],
        "notifications": strings(case, "notifications"),
        "status": case["status"],
    });
    if let Some(actions) = case["actions"].as_array() {
        let actions: Vec<Value> = actions
            .iter()
            .map(|action| {
                let mut tf = json!({"type": action["type"]});
                if let Some(duration) = action["options"].get("duration").filter(|d| !d.is_null()) {
                    tf["options"] = json!([{"duration": duration}]);
                }
                tf
            })
            .collect();
        state["action"] = Value::Array(actions);
    }
    state
}

fn query_to_state(query: &Value) -> Value {
    let mut state = json!({
        "aggregation": query["aggregation"],
        "distinct_fields": strings(query, "distinctFields"),
        "group_by_fields": strings(query, "groupByFields"),
        "has_optional_group_by_fields": query.get("hasOptionalGroupByFields").cloned().unwrap_or(json!(false)),
        "data_source": query["dataSource"],
        "metrics": strings(query, "metrics"),
        "name": query["name"],
        "query": query["query"],
    });
    if let Some(metric) = query.get("metric").filter(|m| !m.is_null()) {
        state["metric"] = metric.clone();
    }
    if let Some(index) = query.get("index").and_then(Value::as_str) {
        state["indexes"] = json!([index]);
    }
    state
}

fn signal_query_to_state(query: &Value) -> Value {
    json!({
        "aggregation": query["aggregation"],
        "correlated_by_fields": strings(query, "correlatedByFields"),
        "correlated_query_index": query["correlatedQueryIndex"]
            .as_i64()
            .map_or_else(String::new, |i| i.to_string()),
        "name": query["name"],
        "rule_id": query["ruleId"],
        "default_rule_id": query["defaultRuleId"],
    })
}

/// Maps an API rule to its attribute values.
pub(crate) fn rule_to_state(rule: &Map<String, Value>) -> Map<String, Value> {
    let rule_type = rule
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(LOG_DETECTION);
    let list = |key: &str| rule.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();

    let mut state = Map::new();
    state.insert("name".into(), rule.get("name").cloned().unwrap_or(Value::Null));
    state.insert("message".into(), rule.get("message").cloned().unwrap_or(Value::Null));
    state.insert(
        "enabled".into(),
        rule.get("isEnabled").cloned().unwrap_or(json!(false)),
    );
    state.insert(
        "has_extended_title".into(),
        rule.get("hasExtendedTitle").cloned().unwrap_or(json!(false)),
    );
    state.insert("type".into(), json!(rule_type));
    state.insert("tags".into(), json!(get_string_slice(rule, "tags")));
    state.insert(
        "options".into(),
        json!([options_to_state(rule.get("options").unwrap_or(&Value::Null))]),
    );
    state.insert(
        "case".into(),
        Value::Array(list("cases").iter().map(case_to_state).collect()),
    );
    let (key, queries): (&str, Vec<Value>) = if rule_type == SIGNAL_CORRELATION {
        ("signal_query", list("queries").iter().map(signal_query_to_state).collect())
    } else {
        ("query", list("queries").iter().map(query_to_state).collect())
    };
    state.insert(key.into(), Value::Array(queries));
    state.insert(
        "filter".into(),
        Value::Array(
            list("filters")
                .iter()
                .map(|f| json!({"action": f["action"], "query": f["query"]}))
                .collect(),
        ),
    );
    state.insert(
        "group_signals_by".into(),
        json!(get_string_slice(rule, "groupSignalsBy")),
    );
    state
}

/// Copies a rule response into `data`, hiding provider default tags.
fn update_rule_state(
    data: &mut ResourceData,
    rule: &Value,
    default_tags: &BTreeMap<String, String>,
) -> Result<()> {
    let rule = rule
        .as_object()
        .ok_or_else(|| ApiError::invalid_response("security monitoring rule is not an object"))?;
    if let Some(id) = rule.get("id").and_then(Value::as_str) {
        data.set_id(id);
    }
    let configured = data.get_strings("tags");
    let tags = strip_default_tags(&get_string_slice(rule, "tags"), &configured, default_tags);
    for (key, value) in rule_to_state(rule) {
        data.set(&key, value);
    }
    data.set("tags", json!(sorted_tags(&tags)));
    Ok(())
}

#[async_trait]
impl Resource for SecurityMonitoringRuleResource {
    fn type_name(&self) -> &'static str {
        "datadog_security_monitoring_rule"
    }

    fn schema(&self) -> Schema {
        rule_schema()
            .describe("Provides a Datadog Security Monitoring Rule API resource. This can be used to create and manage Datadog security monitoring rules.")
            .with_attribute(
                "validate",
                Attribute::optional_bool()
                    .describe("Whether or not to validate the Rule during plan."),
            )
    }

    async fn validate_plan(&self, meta: &ProviderConfiguration, data: &ResourceData) -> Result<()> {
        if data.get_bool("validate") != Some(true) {
            debug!("Skipping security monitoring rule validation");
            return Ok(());
        }
        let body = match build_rule_body(data, &meta.settings.default_tags) {
            Ok(body) => body,
            Err(e) => {
                debug!("Skipping validation due to an error: {e}");
                return Ok(());
            }
        };
        meta.client
            .post(&format!("{RULES_PATH}/validation"), &body)
            .await
            .map(|_| ())
            .map_err(|e| translate_client_error(e, "error validating security monitoring rule"))
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let body = build_rule_body(data, &meta.settings.default_tags)?;
        let created: Value = meta
            .client
            .post_json(RULES_PATH, &body)
            .await
            .map_err(|e| translate_client_error(e, "error creating security monitoring rule"))?;
        update_rule_state(data, &created, &meta.settings.default_tags)?;
        info!("Created security monitoring rule {}", data.id());
        Ok(())
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        match meta.client.get_json::<Value>(&rule_path(data.id())).await {
            Ok(rule) => update_rule_state(data, &rule, &meta.settings.default_tags),
            Err(e) if e.is_not_found() => {
                debug!("Security monitoring rule {} is gone", data.id());
                data.clear_id();
                Ok(())
            }
            Err(e) => Err(translate_client_error(e, "error getting security monitoring rule")),
        }
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let body = build_rule_body(data, &meta.settings.default_tags)?;
        let updated: Value = meta
            .client
            .put_json(&rule_path(data.id()), &body)
            .await
            .map_err(|e| translate_client_error(e, "error updating security monitoring rule"))?;
        update_rule_state(data, &updated, &meta.settings.default_tags)
    }

    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        meta.client
            .delete(&rule_path(data.id()))
            .await
            .map_err(|e| translate_client_error(e, "error deleting security monitoring rule"))
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        Some(rule_path(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, HttpMethod, MockTransport};
    use std::sync::Arc;

    fn prepared(config: Value) -> ResourceData {
        let mut config = config;
        SecurityMonitoringRuleResource.schema().prepare(&mut config);
        ResourceData::new(config)
    }

    fn detection_rule() -> Value {
        json!({
            "name": "brute force",
            "message": "acme",
            "case": [{"name": "high", "status": "high", "condition": "errors > 3", "notifications": ["@user"]}],
            "options": [{"evaluation_window": 300, "keep_alive": 600, "max_signal_duration": 900}],
            "query": [{"name": "errors", "query": "status:error", "group_by_fields": ["host"], "indexes": ["main"]}],
            "filter": [{"action": "require", "query": "does not really match much"}],
            "tags": ["i:tomato", "u:tomato"]
        })
    }

    const RULE_RESPONSE: &str = r#"{
        "id": "abc-def-ghi",
        "name": "brute force",
        "message": "acme",
        "isEnabled": true,
        "isDefault": false,
        "hasExtendedTitle": false,
        "type": "log_detection",
        "tags": ["i:tomato", "team:core", "u:tomato"],
        "cases": [{"name": "high", "status": "high", "condition": "errors > 3", "notifications": ["@user"],
                   "actions": [{"type": "block_ip", "options": {"duration": 900}}]}],
        "options": {"detectionMethod": "threshold", "evaluationWindow": 300, "keepAlive": 600,
                    "maxSignalDuration": 900, "decreaseCriticalityBasedOnEnv": false},
        "queries": [{"name": "errors", "query": "status:error", "aggregation": "count",
                     "groupByFields": ["host"], "distinctFields": [], "dataSource": "logs", "index": "main"}],
        "filters": [{"action": "require", "query": "does not really match much"}]
    }"#;

    #[test]
    fn test_build_detection_body() {
        let body = build_rule_body(&prepared(detection_rule()), &BTreeMap::new()).unwrap();

        assert_eq!(body["isEnabled"], true);
        assert_eq!(body["type"], "log_detection");
        assert_eq!(body["tags"], json!(["i:tomato", "u:tomato"]));
        assert_eq!(body["options"]["detectionMethod"], "threshold");
        assert_eq!(body["options"]["evaluationWindow"], 300);
        assert_eq!(body["options"]["decreaseCriticalityBasedOnEnv"], false);
        assert_eq!(body["cases"][0]["status"], "high");
        assert_eq!(body["queries"][0]["aggregation"], "count");
        assert_eq!(body["queries"][0]["groupByFields"], json!(["host"]));
        assert_eq!(body["queries"][0]["index"], "main");
        assert!(body["queries"][0].get("distinctFields").is_none());
        assert_eq!(body["filters"][0]["action"], "require");
    }

    #[test]
    fn test_signal_correlation_body() {
        let data = prepared(json!({
            "name": "correlation",
            "message": "m",
            "type": "signal_correlation",
            "case": [{"status": "critical", "condition": "a > 0 && b > 0"}],
            "signal_query": [
                {"name": "a", "rule_id": "rule-1", "correlated_by_fields": ["host"]},
                {"name": "b", "rule_id": "rule-2", "correlated_query_index": "0"}
            ]
        }));
        let body = build_rule_body(&data, &BTreeMap::new()).unwrap();

        assert_eq!(body["queries"][0]["aggregation"], "event_count");
        assert_eq!(body["queries"][0]["ruleId"], "rule-1");
        assert!(body["queries"][0].get("correlatedQueryIndex").is_none());
        assert_eq!(body["queries"][1]["correlatedQueryIndex"], 0);
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_query_lists_must_match_rule_type() {
        let mut config = detection_rule();
        config["signal_query"] = json!([{"rule_id": "rule-1"}]);
        let err = build_rule_body(&prepared(config), &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("cannot be both populated"));

        let data = prepared(json!({
            "name": "n", "message": "m", "signal_query": [{"rule_id": "rule-1"}]
        }));
        let err = build_rule_body(&data, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("signal query list should not be populated"));

        let data = prepared(json!({
            "name": "n", "message": "m", "type": "signal_correlation",
            "signal_query": [{"rule_id": "rule-1", "default_rule_id": "x"}]
        }));
        let err = build_rule_body(&data, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("default_rule_id cannot be set"));
    }

    #[test]
    fn test_update_state_hides_default_tags() {
        let mut defaults = BTreeMap::new();
        defaults.insert("team".to_string(), "core".to_string());
        let mut data = prepared(detection_rule());
        let response: Value = serde_json::from_str(RULE_RESPONSE).unwrap();
        update_rule_state(&mut data, &response, &defaults).unwrap();

        assert_eq!(data.id(), "abc-def-ghi");
        assert_eq!(data.get_strings("tags"), vec!["i:tomato", "u:tomato"]);
        assert_eq!(data.get_i64("options.0.keep_alive"), Some(600));
        assert_eq!(data.get_i64("case.0.action.0.options.0.duration"), Some(900));
        assert_eq!(data.get_strings("query.0.indexes"), vec!["main"]);
        assert!(data.get_list("signal_query").is_empty());
    }

    #[tokio::test]
    async fn test_create_then_read_gone() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                req.method == HttpMethod::Post && req.url.ends_with("/api/v2/security_monitoring/rules")
            })
            .times(1)
            .returning(|_| Ok(ApiResponse::new(200, RULE_RESPONSE)));
        transport
            .expect_send()
            .withf(|req| {
                req.method == HttpMethod::Get
                    && req.url.ends_with("/api/v2/security_monitoring/rules/abc-def-ghi")
            })
            .times(1)
            .returning(|_| Ok(ApiResponse::new(404, r#"{"errors": ["Not found"]}"#)));
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");

        let mut data = prepared(detection_rule());
        SecurityMonitoringRuleResource.create(&meta, &mut data).await.unwrap();
        assert_eq!(data.id(), "abc-def-ghi");
        assert_eq!(data.get_strings("tags"), vec!["i:tomato", "team:core", "u:tomato"]);

        SecurityMonitoringRuleResource.read(&meta, &mut data).await.unwrap();
        assert_eq!(data.id(), "");
    }

    #[tokio::test]
    async fn test_validate_plan_only_when_requested() {
        let transport = MockTransport::new();
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");
        SecurityMonitoringRuleResource
            .validate_plan(&meta, &prepared(detection_rule()))
            .await
            .unwrap();

        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.url.ends_with("/api/v2/security_monitoring/rules/validation"))
            .times(1)
            .returning(|_| Ok(ApiResponse::new(400, r#"{"errors": ["invalid query"]}"#)));
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");
        let mut config = detection_rule();
        config["validate"] = json!(true);
        let err = SecurityMonitoringRuleResource
            .validate_plan(&meta, &prepared(config))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("error validating security monitoring rule"));
    }

    #[test]
    fn test_destroy_check_path() {
        assert_eq!(
            SecurityMonitoringRuleResource.destroy_check_path("abc").as_deref(),
            Some("/api/v2/security_monitoring/rules/abc")
        );
    }
}
