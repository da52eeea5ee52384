//! `datadog_monitor`: metric, log, service check and other monitors through
//! the v1 Monitors API.
//!
//! - thresholds are configured as strings and sent as floats
//! - `query alert` and `metric alert` are treated as the same type
//! - the definition is checked with the validate endpoint at plan time
//! - provider default tags are merged into `tags` and hidden again on read

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{translate_client_error, ApiError, ConfigError, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{
    Attribute, AttributeType, DiffSuppress, NestedBlock, ResourceData, Schema, Validator,
};
use crate::utils::retry::{retry_with_timeout, RetryError};
use crate::utils::tags::{merge_default_tags, sorted_tags, strip_default_tags};

pub(crate) const MONITOR_PATH: &str = "/api/v1/monitor";

/// Minutes before a no-data notification when unset.
const DEFAULT_NO_DATA_TIMEFRAME_MINUTES: i64 = 10;

/// Budget for plan-time validation and reads answering 502.
const MONITOR_RETRY_TIMEOUT: Duration = Duration::from_secs(60);
const MONITOR_RETRY_INTERVAL: Duration = Duration::from_secs(2);

const MONITOR_TYPES: &[&str] = &[
    "composite",
    "event alert",
    "log alert",
    "metric alert",
    "process alert",
    "query alert",
    "rum alert",
    "service check",
    "synthetics alert",
    "trace-analytics alert",
    "slo alert",
    "event-v2 alert",
    "audit alert",
    "ci-pipelines alert",
    "ci-tests alert",
    "error-tracking alert",
    "database-monitoring alert",
    "network-performance alert",
    "cost alert",
];

const THRESHOLD_KEYS: &[&str] = &[
    "ok",
    "warning",
    "critical",
    "unknown",
    "warning_recovery",
    "critical_recovery",
];

/// Datadog monitor.
#[derive(Debug, Default)]
pub struct MonitorResource;

fn monitor_path(id: i64) -> String {
    format!("{MONITOR_PATH}/{id}")
}

fn parse_monitor_id(id: &str) -> Result<i64> {
    id.parse::<i64>().map_err(|_| {
        ConfigError::validation(format!("monitor id must be an integer, got {id:?}"), "id").into()
    })
}

fn thresholds_schema() -> Schema {
    let threshold = |description: &str| {
        Attribute::optional_string()
            .validate(Validator::FloatString)
            .suppress_diff(DiffSuppress::FloatIntEquivalent)
            .describe(description)
    };
    Schema::v0()
        .with_attribute(
            "ok",
            threshold("The monitor `OK` threshold. Only supported in monitor type `service check`. Must be a number."),
        )
        .with_attribute("warning", threshold("The monitor `WARNING` threshold. Must be a number."))
        .with_attribute("critical", threshold("The monitor `CRITICAL` threshold. Must be a number."))
        .with_attribute(
            "unknown",
            threshold("The monitor `UNKNOWN` threshold. Only supported in monitor type `service check`. Must be a number."),
        )
        .with_attribute(
            "warning_recovery",
            threshold("The monitor `WARNING` recovery threshold. Must be a number."),
        )
        .with_attribute(
            "critical_recovery",
            threshold("The monitor `CRITICAL` recovery threshold. Must be a number."),
        )
}

fn threshold_windows_schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "recovery_window",
            Attribute::optional_string()
                .describe("Describes how long an anomalous metric must be normal before the alert recovers."),
        )
        .with_attribute(
            "trigger_window",
            Attribute::optional_string()
                .describe("Describes how long a metric must be anomalous before an alert triggers."),
        )
}

fn scheduling_options_schema() -> Schema {
    let evaluation_window = Schema::v0()
        .with_attribute(
            "day_starts",
            Attribute::optional_string().describe(
                "The time of the day at which a one day cumulative evaluation window starts. Must be defined in UTC time in `HH:mm` format.",
            ),
        )
        .with_attribute(
            "month_starts",
            Attribute::optional_int().describe(
                "The day of the month at which a one month cumulative evaluation window starts. Must be a value of 1.",
            ),
        )
        .with_attribute(
            "hour_starts",
            Attribute::optional_int()
                .validate(Validator::IntBetween(0, 59))
                .describe("The minute of the hour at which a one hour cumulative evaluation window starts. Must be between 0 and 59."),
        );

    Schema::v0().with_attribute(
        "evaluation_window",
        Attribute::required(AttributeType::Block(Box::new(NestedBlock {
            min_items: 1,
            ..NestedBlock::single(evaluation_window)
        })))
        .describe("Configuration options for the evaluation window."),
    )
}

/// Builds the monitor body shared by create, update and validate.
fn build_monitor_body(data: &ResourceData, default_tags: &BTreeMap<String, String>) -> Value {
    let monitor_type = data.get_string("type");
    let mut options = Map::new();

    let mut thresholds = Map::new();
    for key in THRESHOLD_KEYS {
        let path = format!("monitor_thresholds.0.{key}");
        if let Some(v) = data.get_str(&path).filter(|s| !s.is_empty()) {
            if let Ok(f) = v.trim().parse::<f64>() {
                thresholds.insert((*key).to_string(), json!(f));
            }
        }
    }
    options.insert("thresholds".into(), Value::Object(thresholds));
    options.insert(
        "notify_no_data".into(),
        json!(data.get_bool("notify_no_data").unwrap_or(false)),
    );
    options.insert(
        "require_full_window".into(),
        json!(data.get_bool("require_full_window").unwrap_or(true)),
    );
    options.insert(
        "include_tags".into(),
        json!(data.get_bool("include_tags").unwrap_or(true)),
    );

    let mut windows = Map::new();
    for key in ["recovery_window", "trigger_window"] {
        if let Some(v) = data.get_ok(&format!("monitor_threshold_windows.0.{key}")) {
            windows.insert(key.to_string(), v.clone());
        }
    }
    if !windows.is_empty() {
        options.insert("threshold_windows".into(), Value::Object(windows));
    }

    for key in ["group_retention_duration", "new_group_delay", "evaluation_delay"] {
        if let Some(v) = data.get_ok(key) {
            options.insert(key.to_string(), v.clone());
        }
    }
    // Sent even when zero: zero is how new_host_delay is switched off.
    options.insert(
        "new_host_delay".into(),
        json!(data.get_i64("new_host_delay").unwrap_or(300)),
    );

    let on_missing_data = data.get_ok("on_missing_data").cloned();
    if let Some(v) = &on_missing_data {
        options.insert("on_missing_data".into(), v.clone());
    }
    // no_data_timeframe cannot be combined with on_missing_data.
    if on_missing_data.is_none() {
        if let Some(v) = data.get_ok("no_data_timeframe") {
            options.insert("no_data_timeframe".into(), v.clone());
        }
    }

    for key in ["renotify_interval", "renotify_occurrences", "notify_audit", "timeout_h"] {
        if let Some(v) = data.get_ok(key) {
            options.insert(key.to_string(), v.clone());
        }
    }
    let statuses = data.get_strings("renotify_statuses");
    options.insert(
        "renotify_statuses".into(),
        if statuses.is_empty() {
            Value::Null
        } else {
            json!(sorted_tags(&statuses))
        },
    );
    if let Some(v) = data.get_str("escalation_message").filter(|s| !s.is_empty()) {
        options.insert("escalation_message".into(), json!(v.trim()));
    }

    if monitor_type == "log alert" {
        options.insert(
            "enable_logs_sample".into(),
            json!(data.get_bool("enable_logs_sample").unwrap_or(false)),
        );
        if let Some(v) = data.get_ok("groupby_simple_monitor") {
            options.insert("groupby_simple_monitor".into(), v.clone());
        }
    }

    let notify_by = data.get_strings("notify_by");
    if !notify_by.is_empty() {
        options.insert("notify_by".into(), json!(sorted_tags(&notify_by)));
    }

    if let Some(window) = data.get_map("scheduling_options.0.evaluation_window.0") {
        let mut evaluation_window = Map::new();
        let mut day_month = false;
        if let Some(day) = window.get("day_starts").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            evaluation_window.insert("day_starts".into(), json!(day));
            day_month = true;
        }
        if let Some(month) = window.get("month_starts").and_then(Value::as_i64).filter(|m| *m != 0) {
            evaluation_window.insert("month_starts".into(), json!(month));
            day_month = true;
        }
        if let Some(hour) = window.get("hour_starts").and_then(Value::as_i64) {
            if !day_month {
                evaluation_window.insert("hour_starts".into(), json!(hour));
            }
        }
        options.insert(
            "scheduling_options".into(),
            json!({ "evaluation_window": evaluation_window }),
        );
    }

    let roles = data.get_strings("restricted_roles");
    let tags = sorted_tags(&merge_default_tags(&data.get_strings("tags"), default_tags));

    let mut body = Map::new();
    body.insert("name".into(), json!(data.get_string("name")));
    body.insert("type".into(), json!(monitor_type));
    body.insert("query".into(), json!(data.get_string("query").trim()));
    body.insert("message".into(), json!(data.get_string("message").trim()));
    if let Some(priority) = data.get_ok("priority") {
        body.insert("priority".into(), priority.clone());
    }
    body.insert(
        "restricted_roles".into(),
        if roles.is_empty() {
            Value::Null
        } else {
            json!(sorted_tags(&roles))
        },
    );
    body.insert("tags".into(), json!(tags));
    body.insert("options".into(), Value::Object(options));
    Value::Object(body)
}

/// Renders a threshold the way it is written in configuration: `90`, `0.5`.
fn format_threshold(value: &Value) -> Option<String> {
    value.as_f64().map(|f| format!("{f}"))
}

/// Copies a monitor response into `data`.
pub(crate) fn update_monitor_state(
    data: &mut ResourceData,
    monitor: &Value,
    default_tags: &BTreeMap<String, String>,
) {
    if let Some(id) = monitor.get("id").and_then(Value::as_i64) {
        data.set_id(id.to_string());
    }
    let options = monitor.get("options").cloned().unwrap_or(Value::Null);
    let opt = |key: &str| options.get(key).filter(|v| !v.is_null()).cloned();

    let mut thresholds = Map::new();
    if let Some(values) = options.get("thresholds").and_then(Value::as_object) {
        for key in THRESHOLD_KEYS {
            if let Some(text) = values.get(*key).and_then(format_threshold) {
                thresholds.insert((*key).to_string(), json!(text));
            }
        }
    }
    if !thresholds.is_empty() {
        data.set("monitor_thresholds", json!([thresholds]));
    }

    let mut windows = Map::new();
    if let Some(values) = options.get("threshold_windows").and_then(Value::as_object) {
        for key in ["recovery_window", "trigger_window"] {
            if let Some(v) = values.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
                windows.insert(key.to_string(), json!(v));
            }
        }
    }
    if !windows.is_empty() {
        data.set("monitor_threshold_windows", json!([windows]));
    }

    for key in ["name", "message", "query", "type"] {
        data.set(key, monitor.get(key).cloned().unwrap_or(Value::Null));
    }
    data.set_opt("priority", monitor.get("priority").filter(|v| !v.is_null()).cloned());

    for key in [
        "new_group_delay",
        "new_host_delay",
        "evaluation_delay",
        "notify_no_data",
        "on_missing_data",
        "group_retention_duration",
        "no_data_timeframe",
        "renotify_interval",
        "renotify_occurrences",
        "notify_audit",
        "timeout_h",
        "escalation_message",
        "include_tags",
        "require_full_window",
        "notify_by",
    ] {
        data.set_opt(key, opt(key));
    }

    if let Some(statuses) = opt("renotify_statuses").filter(|v| !crate::schema::is_zero(v)) {
        data.set("renotify_statuses", statuses);
    }

    let api_tags: Vec<String> = monitor
        .get("tags")
        .and_then(Value::as_array)
        .map(|t| t.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let configured = data.get_strings("tags");
    data.set(
        "tags",
        json!(sorted_tags(&strip_default_tags(&api_tags, &configured, default_tags))),
    );

    if let Some(roles) = monitor
        .get("restricted_roles")
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
    {
        let roles: Vec<String> = roles.iter().filter_map(Value::as_str).map(str::to_string).collect();
        data.set("restricted_roles", json!(sorted_tags(&roles)));
    }

    if monitor.get("type").and_then(Value::as_str) == Some("log alert") {
        data.set_opt("enable_logs_sample", opt("enable_logs_sample"));
        data.set_opt("groupby_simple_monitor", opt("groupby_simple_monitor"));
    }

    if let Some(window) = options
        .get("scheduling_options")
        .and_then(|s| s.get("evaluation_window"))
        .and_then(Value::as_object)
        .filter(|w| !w.is_empty())
    {
        data.set(
            "scheduling_options",
            json!([{ "evaluation_window": [window] }]),
        );
    }
}

#[async_trait]
impl Resource for MonitorResource {
    fn type_name(&self) -> &'static str {
        "datadog_monitor"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .describe("Provides a Datadog monitor resource. This can be used to create and manage Datadog monitors.")
            .with_attribute("name", Attribute::required_string().describe("Name of Datadog monitor."))
            .with_attribute(
                "message",
                Attribute::required_string()
                    .suppress_diff(DiffSuppress::TrimSpace)
                    .describe("A message to include with notifications for this monitor."),
            )
            .with_attribute(
                "escalation_message",
                Attribute::optional_string()
                    .suppress_diff(DiffSuppress::TrimSpace)
                    .describe("A message to include with a re-notification."),
            )
            .with_attribute(
                "query",
                Attribute::required_string()
                    .suppress_diff(DiffSuppress::TrimSpace)
                    .describe("The monitor query to notify on. Validated at plan time unless `validate` is `false`."),
            )
            .with_attribute(
                "type",
                Attribute::required_string()
                    .force_new()
                    .validate(Validator::one_of(MONITOR_TYPES))
                    .suppress_diff(DiffSuppress::MonitorTypeEquivalent)
                    .describe("The type of the monitor. The monitor type cannot be changed after a monitor is created."),
            )
            .with_attribute(
                "priority",
                Attribute::optional_int()
                    .validate(Validator::IntBetween(1, 5))
                    .describe("Integer from 1 (high) to 5 (low) indicating alert severity."),
            )
            .with_attribute(
                "monitor_thresholds",
                Attribute::optional(AttributeType::Block(Box::new(NestedBlock::single(
                    thresholds_schema(),
                ))))
                .describe("Alert thresholds of the monitor."),
            )
            .with_attribute(
                "monitor_threshold_windows",
                Attribute::optional(AttributeType::Block(Box::new(NestedBlock::single(
                    threshold_windows_schema(),
                ))))
                .describe("A mapping containing `recovery_window` and `trigger_window` values. Only for anomaly monitors."),
            )
            .with_attribute(
                "notify_no_data",
                Attribute::optional_bool()
                    .with_default(false)
                    .conflicts_with(&["on_missing_data"])
                    .describe("Whether this monitor will notify when data stops reporting."),
            )
            .with_attribute(
                "on_missing_data",
                Attribute::optional_string()
                    .conflicts_with(&["notify_no_data", "no_data_timeframe"])
                    .validate(Validator::one_of(&[
                        "default",
                        "show_no_data",
                        "show_and_notify_no_data",
                        "resolve",
                    ]))
                    .describe("How groups are treated when an evaluation returns no data."),
            )
            .with_attribute(
                "group_retention_duration",
                Attribute::optional_string()
                    .describe("The time span after which groups with missing data are dropped from the monitor state."),
            )
            .with_attribute(
                "new_group_delay",
                Attribute::optional_int().describe("The time (in seconds) to skip evaluations for new groups."),
            )
            .with_attribute(
                "new_host_delay",
                Attribute::optional_int()
                    .with_default(300)
                    .deprecate("Use `new_group_delay` except when setting `new_host_delay` to zero.")
                    .describe("Time (in seconds) to allow a host to boot before evaluating it."),
            )
            .with_attribute(
                "evaluation_delay",
                Attribute::optional_int()
                    .also_computed()
                    .describe("(Only applies to metric alert) Time (in seconds) to delay evaluation."),
            )
            .with_attribute(
                "no_data_timeframe",
                Attribute::optional_int()
                    .with_default(DEFAULT_NO_DATA_TIMEFRAME_MINUTES)
                    .conflicts_with(&["on_missing_data"])
                    .suppress_diff(DiffSuppress::UnlessSiblingTrue("notify_no_data".into()))
                    .describe("The number of minutes before a monitor will notify when data stops reporting."),
            )
            .with_attribute(
                "renotify_interval",
                Attribute::optional_int()
                    .describe("Minutes after the last notification before the monitor re-notifies."),
            )
            .with_attribute(
                "renotify_occurrences",
                Attribute::optional_int()
                    .describe("The number of re-notification messages that should be sent on the current status."),
            )
            .with_attribute(
                "renotify_statuses",
                Attribute::optional(AttributeType::string_set())
                    .validate(Validator::one_of(&["alert", "warn", "no data"]))
                    .describe("The types of statuses for which re-notification messages should be sent."),
            )
            .with_attribute(
                "notify_audit",
                Attribute::optional_bool()
                    .describe("Whether tagged users will be notified on changes to this monitor."),
            )
            .with_attribute(
                "timeout_h",
                Attribute::optional_int()
                    .validate(Validator::IntBetween(0, 24))
                    .describe("Hours without data before the monitor resolves from a triggered state."),
            )
            .with_attribute(
                "require_full_window",
                Attribute::optional_bool()
                    .with_default(true)
                    .describe("Whether this monitor needs a full window of data before it's evaluated."),
            )
            .with_attribute(
                "restricted_roles",
                Attribute::optional(AttributeType::string_set())
                    .describe("Role identifiers allowed to edit the monitor."),
            )
            .with_attribute(
                "include_tags",
                Attribute::optional_bool()
                    .with_default(true)
                    .describe("Whether notifications insert the triggering tags into the title."),
            )
            .with_attribute(
                "tags",
                Attribute::optional(AttributeType::string_set())
                    .describe("A list of tags to associate with your monitor."),
            )
            .with_attribute(
                "groupby_simple_monitor",
                Attribute::optional_bool()
                    .describe("Whether to trigger one alert if any source breaches a threshold. Log monitors only."),
            )
            .with_attribute(
                "notify_by",
                Attribute::optional(AttributeType::string_set())
                    .describe("Controls what granularity a monitor alerts on."),
            )
            .with_attribute(
                "enable_logs_sample",
                Attribute::optional_bool()
                    .describe("Whether to include a list of log values which triggered the alert. Log monitors only."),
            )
            .with_attribute(
                "force_delete",
                Attribute::optional_bool()
                    .describe("Whether this monitor can be deleted even if it is referenced by other resources."),
            )
            .with_attribute(
                "validate",
                Attribute::optional_bool()
                    .suppress_diff(DiffSuppress::Always)
                    .describe("If set to `false`, skip the validation call done during plan."),
            )
            .with_attribute(
                "scheduling_options",
                Attribute::optional(AttributeType::Block(Box::new(NestedBlock::list(
                    scheduling_options_schema(),
                ))))
                .describe("Configuration options for scheduling."),
            )
    }

    async fn validate_plan(&self, meta: &ProviderConfiguration, data: &ResourceData) -> Result<()> {
        if data.get_ok("query").is_none() || data.get_ok("type").is_none() {
            return Ok(());
        }
        if data.get_bool("validate") == Some(false) {
            debug!("Skipping monitor validation");
            return Ok(());
        }

        let body = build_monitor_body(data, &meta.settings.default_tags);
        let path = match data.id().parse::<i64>() {
            Ok(id) => format!("{}/validate", monitor_path(id)),
            Err(_) => format!("{MONITOR_PATH}/validate"),
        };

        let path = &path;
        let body = &body;
        retry_with_timeout(
            MONITOR_RETRY_TIMEOUT,
            MONITOR_RETRY_INTERVAL,
            || async move {
                match meta.client.post_json::<_, Value>(path, body).await {
                    Ok(_) => Ok(()),
                    Err(e) if matches!(e.status(), Some(502 | 504)) => Err(RetryError::Retryable(
                        translate_client_error(e, "error validating monitor, retrying"),
                    )),
                    Err(e) => Err(RetryError::Fatal(translate_client_error(
                        e,
                        "error validating monitor",
                    ))),
                }
            },
        )
        .await
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let body = build_monitor_body(data, &meta.settings.default_tags);
        let created: Value = meta
            .client
            .post_json(MONITOR_PATH, &body)
            .await
            .map_err(|e| translate_client_error(e, "error creating monitor"))?;
        update_monitor_state(data, &created, &meta.settings.default_tags);
        info!("Created monitor {}", data.id());
        Ok(())
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let path = monitor_path(parse_monitor_id(data.id())?);
        let path = &path;
        let monitor = retry_with_timeout(
            MONITOR_RETRY_TIMEOUT,
            MONITOR_RETRY_INTERVAL,
            || async move {
                match meta.client.get_json::<Value>(path).await {
                    Ok(monitor) => Ok(Some(monitor)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) if e.status() == Some(502) => Err(RetryError::Retryable(
                        translate_client_error(e, "error getting monitor, retrying"),
                    )),
                    Err(e) => Err(RetryError::Fatal(translate_client_error(
                        e,
                        "error getting monitor",
                    ))),
                }
            },
        )
        .await?;

        match monitor {
            Some(monitor) => update_monitor_state(data, &monitor, &meta.settings.default_tags),
            None => {
                debug!("Monitor {} is gone", data.id());
                data.clear_id();
            }
        }
        Ok(())
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let id = parse_monitor_id(data.id())?;
        let mut body = build_monitor_body(data, &meta.settings.default_tags);
        body["id"] = json!(id);
        let updated: Value = meta
            .client
            .put_json(&monitor_path(id), &body)
            .await
            .map_err(|e| translate_client_error(e, "error updating monitor"))?;
        update_monitor_state(data, &updated, &meta.settings.default_tags);
        Ok(())
    }

    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let id = parse_monitor_id(data.id())?;
        let path = if data.get_bool("force_delete") == Some(true) {
            format!("{}?force=true", monitor_path(id))
        } else {
            monitor_path(id)
        };
        meta.client
            .delete(&path)
            .await
            .map_err(|e| translate_client_error(e, "error deleting monitor"))
    }

    async fn import(&self, meta: &ProviderConfiguration, id: &str) -> Result<ResourceData> {
        let path = monitor_path(parse_monitor_id(id)?);
        let mut data = ResourceData::for_import(id);
        self.read(meta, &mut data).await?;
        if data.id().is_empty() {
            return Err(ApiError::NotFound { path }.into());
        }
        Ok(data)
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        id.parse::<i64>().ok().map(monitor_path)
    }
}
