//! `datadog_downtime`: scheduled monitor silences through the v1 Downtimes API.
//!
//! Start and end boundaries can be given as Unix timestamps (`start`, `end`)
//! or RFC 3339 dates (`start_date`, `end_date`). On update a boundary is only
//! sent when it changed or drifted, so other attributes can be edited after
//! the downtime has started. Deleting a downtime cancels it; the API keeps
//! returning cancelled downtimes, which therefore count as gone.

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{translate_client_error, ApiError, ConfigError, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{
    Attribute, AttributeType, DiffSuppress, NestedBlock, ResourceData, Schema, Validator,
};
use crate::utils::tags::sorted_tags;

const DOWNTIME_PATH: &str = "/api/v1/downtime";

const WEEK_DAYS: &[&str] = &["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Datadog downtime.
#[derive(Debug, Default)]
pub struct DowntimeResource;

fn downtime_path(id: i64) -> String {
    format!("{DOWNTIME_PATH}/{id}")
}

fn parse_downtime_id(id: &str) -> Result<i64> {
    id.parse::<i64>().map_err(|_| {
        ConfigError::validation(format!("downtime id must be an integer, got {id:?}"), "id").into()
    })
}

/// A configured boundary: the timestamp and the attribute it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Boundary {
    timestamp: i64,
    source: &'static str,
}

/// Reads `start`/`start_date` or `end`/`end_date`. The date wins when both are set.
fn boundary(data: &ResourceData, date_attr: &'static str, ts_attr: &'static str) -> Option<Boundary> {
    if let Some(date) = data.get_str(date_attr).filter(|s| !s.is_empty()) {
        return DateTime::parse_from_rfc3339(date).ok().map(|t| Boundary {
            timestamp: t.timestamp(),
            source: date_attr,
        });
    }
    data.get_ok(ts_attr).and_then(Value::as_i64).map(|timestamp| Boundary {
        timestamp,
        source: ts_attr,
    })
}

/// Whether a boundary belongs in the request.
///
/// Create always sends a configured boundary. Update sends it when the API
/// value differs from configuration or the configured attribute changed.
fn boundary_needs_apply(
    data: &ResourceData,
    boundary: Option<&Boundary>,
    api_value: Option<i64>,
) -> bool {
    let Some(boundary) = boundary else {
        return false;
    };
    match api_value {
        None => true,
        Some(current) => current != boundary.timestamp || data.has_change(boundary.source),
    }
}

/// Builds the request body. `current` holds the API's start and end when updating.
fn build_downtime_body(data: &ResourceData, current: Option<(Option<i64>, Option<i64>)>) -> Value {
    let mut body = Map::new();

    if let Some(active) = data.get_ok("active") {
        body.insert("active".into(), active.clone());
    }
    if let Some(disabled) = data.get_ok("disabled") {
        body.insert("disabled".into(), disabled.clone());
    }

    let updating = current.is_some();
    let (current_start, current_end) = current.unwrap_or((None, None));
    let api_value = |v: Option<i64>| if updating { Some(v.unwrap_or(0)) } else { None };

    let end = boundary(data, "end_date", "end");
    if boundary_needs_apply(data, end.as_ref(), api_value(current_end)) {
        if let Some(end) = &end {
            body.insert("end".into(), json!(end.timestamp));
        }
    }

    if let Some(message) = data.get_str("message").filter(|s| !s.is_empty()) {
        body.insert("message".into(), json!(message.trim()));
    }
    if let Some(monitor_id) = data.get_ok("monitor_id") {
        body.insert("monitor_id".into(), monitor_id.clone());
    }

    if let Some(recurrence) = data.get_map("recurrence.0") {
        let mut rec = Map::new();
        for key in ["period", "type", "until_date", "until_occurrences"] {
            if let Some(v) = recurrence.get(key).filter(|v| !crate::schema::is_zero(v)) {
                rec.insert(key.to_string(), v.clone());
            }
        }
        if let Some(days) = recurrence
            .get("week_days")
            .and_then(Value::as_array)
            .filter(|d| !d.is_empty())
        {
            rec.insert("week_days".into(), Value::Array(days.clone()));
        }
        body.insert("recurrence".into(), Value::Object(rec));
    }

    body.insert("scope".into(), json!(data.get_strings("scope")));
    body.insert(
        "monitor_tags".into(),
        json!(sorted_tags(&data.get_strings("monitor_tags"))),
    );

    let start = boundary(data, "start_date", "start");
    if boundary_needs_apply(data, start.as_ref(), api_value(current_start)) {
        if let Some(start) = &start {
            body.insert("start".into(), json!(start.timestamp));
        }
    }

    if let Some(timezone) = data.get_str("timezone").filter(|s| !s.is_empty()) {
        body.insert("timezone".into(), json!(timezone));
    }

    Value::Object(body)
}

/// True when the API returned a cancelled downtime.
fn is_canceled(downtime: &Value) -> bool {
    downtime.get("canceled").is_some_and(|v| !v.is_null())
}

/// Copies a downtime response into `data`.
fn update_downtime_state(data: &mut ResourceData, downtime: &Value) {
    let field = |key: &str| downtime.get(key).cloned().unwrap_or(Value::Null);

    data.set("active", field("active"));
    data.set("disabled", field("disabled"));
    data.set("end", field("end"));
    data.set("message", field("message"));
    data.set("monitor_id", field("monitor_id"));
    data.set("timezone", field("timezone"));

    if let Some(recurrence) = downtime.get("recurrence").and_then(Value::as_object) {
        let mut rec = Map::new();
        for key in ["period", "type", "until_date", "until_occurrences", "week_days"] {
            if let Some(v) = recurrence.get(key).filter(|v| !v.is_null()) {
                rec.insert(key.to_string(), v.clone());
            }
        }
        data.set("recurrence", json!([rec]));
    }

    data.set("scope", field("scope"));

    // `["*"]` is what the API reports when no monitor tags were sent.
    let monitor_tags: Vec<String> = downtime
        .get("monitor_tags")
        .and_then(Value::as_array)
        .map(|t| t.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if monitor_tags != ["*"] {
        data.set("monitor_tags", json!(sorted_tags(&monitor_tags)));
    }

    data.set("start", field("start"));
}

#[async_trait]
impl Resource for DowntimeResource {
    fn type_name(&self) -> &'static str {
        "datadog_downtime"
    }

    fn schema(&self) -> Schema {
        let recurrence = Schema::v0()
            .with_attribute(
                "period",
                Attribute::required(AttributeType::Int)
                    .describe("How often to repeat as an integer. For example to repeat every 3 days, select a `type` of `days` and a `period` of `3`."),
            )
            .with_attribute(
                "type",
                Attribute::required_string()
                    .validate(Validator::one_of(&["days", "weeks", "months", "years", "rrule"]))
                    .describe("One of `days`, `weeks`, `months`, `years` or `rrule`."),
            )
            .with_attribute(
                "until_date",
                Attribute::optional_int()
                    .conflicts_with(&["until_occurrences"])
                    .describe("The date at which the recurrence should end as a POSIX timestamp."),
            )
            .with_attribute(
                "until_occurrences",
                Attribute::optional_int()
                    .conflicts_with(&["until_date"])
                    .describe("How many times the downtime will be rescheduled."),
            )
            .with_attribute(
                "week_days",
                Attribute::optional(AttributeType::string_list())
                    .validate(Validator::one_of(WEEK_DAYS))
                    .describe("A list of week days to repeat on. Only applicable when `type` is `weeks`."),
            );

        Schema::v0()
            .describe("Provides a Datadog downtime resource. This can be used to create and manage Datadog downtimes.")
            .with_attribute(
                "active",
                Attribute::optional_bool()
                    .suppress_diff(DiffSuppress::WhenSiblingSet("recurrence".into()))
                    .describe("When true indicates this downtime is being actively applied"),
            )
            .with_attribute(
                "disabled",
                Attribute::optional_bool()
                    .describe("When true indicates this downtime is not being applied"),
            )
            .with_attribute(
                "start",
                Attribute::optional_int()
                    .suppress_diff(DiffSuppress::WhenSiblingSet("start_date".into()))
                    .describe("Specify when this downtime should start"),
            )
            .with_attribute(
                "start_date",
                Attribute::optional_string()
                    .validate(Validator::Rfc3339)
                    .conflicts_with(&["start"]),
            )
            .with_attribute(
                "end",
                Attribute::optional_int()
                    .suppress_diff(DiffSuppress::WhenSiblingSet("end_date".into()))
                    .describe("Optionally specify an end date when this downtime should expire"),
            )
            .with_attribute(
                "end_date",
                Attribute::optional_string()
                    .validate(Validator::Rfc3339)
                    .conflicts_with(&["end"]),
            )
            .with_attribute(
                "timezone",
                Attribute::optional_string()
                    .with_default("UTC")
                    .validate(Validator::Timezone)
                    .describe("The timezone for the downtime, default UTC"),
            )
            .with_attribute(
                "message",
                Attribute::optional_string()
                    .suppress_diff(DiffSuppress::TrimSpace)
                    .describe("An optional message to provide when creating the downtime, can include notification handles"),
            )
            .with_attribute(
                "recurrence",
                Attribute::optional(AttributeType::Block(Box::new(NestedBlock::single(recurrence))))
                    .describe("Optional recurring schedule for this downtime"),
            )
            .with_attribute(
                "scope",
                Attribute::required(AttributeType::string_list())
                    .describe("specify the group scope to which this downtime applies. For everything use '*'"),
            )
            .with_attribute(
                "monitor_id",
                Attribute::optional_int()
                    .conflicts_with(&["monitor_tags"])
                    .describe("When specified, this downtime will only apply to this monitor"),
            )
            .with_attribute(
                "monitor_tags",
                Attribute::optional(AttributeType::string_set())
                    .conflicts_with(&["monitor_id"])
                    .describe("A list of monitor tags (up to 25), i.e. tags that are applied directly to monitors to which the downtime applies"),
            )
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let body = build_downtime_body(data, None);
        let created: Value = meta
            .client
            .post_json(DOWNTIME_PATH, &body)
            .await
            .map_err(|e| translate_client_error(e, "error creating downtime"))?;
        let id = created
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ApiError::invalid_response("downtime response has no id"))?;
        data.set_id(id.to_string());
        info!("Created downtime {id}");
        self.read(meta, data).await
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let id = parse_downtime_id(data.id())?;
        let downtime: Value = match meta.client.get_json(&downtime_path(id)).await {
            Ok(downtime) => downtime,
            Err(e) if e.is_not_found() => {
                data.clear_id();
                return Ok(());
            }
            Err(e) => return Err(translate_client_error(e, "error getting downtime")),
        };
        debug!("downtime: {downtime}");

        if is_canceled(&downtime) {
            debug!("Downtime {id} was cancelled, treating it as deleted");
            data.clear_id();
            return Ok(());
        }
        update_downtime_state(data, &downtime);
        Ok(())
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let id = parse_downtime_id(data.id())?;
        let current: Value = meta
            .client
            .get_json(&downtime_path(id))
            .await
            .map_err(|e| translate_client_error(e, "error getting downtime"))?;
        let boundaries = (
            current.get("start").and_then(Value::as_i64),
            current.get("end").and_then(Value::as_i64),
        );

        let mut body = build_downtime_body(data, Some(boundaries));
        body["id"] = json!(id);
        let updated: Value = meta
            .client
            .put_json(&downtime_path(id), &body)
            .await
            .map_err(|e| translate_client_error(e, "error updating downtime"))?;

        // The API may hand back a replacement downtime.
        if let Some(new_id) = updated.get("id").and_then(Value::as_i64) {
            data.set_id(new_id.to_string());
        }
        self.read(meta, data).await
    }

    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let id = parse_downtime_id(data.id())?;
        meta.client
            .delete(&downtime_path(id))
            .await
            .map_err(|e| translate_client_error(e, "error deleting downtime"))
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        id.parse::<i64>().ok().map(downtime_path)
    }

    fn is_gone(&self, body: &Value) -> bool {
        is_canceled(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, HttpMethod, MockTransport};
    use std::sync::Arc;

    fn prepared(config: Value) -> ResourceData {
        let mut config = config;
        DowntimeResource.schema().prepare(&mut config);
        ResourceData::new(config)
    }

    #[test]
    fn test_create_body_sends_configured_boundaries() {
        let data = prepared(json!({
            "scope": ["host:a"],
            "start_date": "2030-01-01T00:00:00Z",
            "end": 1_900_000_000,
            "message": "  maintenance  ",
            "monitor_tags": ["team:b", "team:a"],
            "recurrence": {"type": "weeks", "period": 1, "week_days": ["Mon", "Fri"]}
        }));

        let body = build_downtime_body(&data, None);
        assert_eq!(body["start"], 1_893_456_000);
        assert_eq!(body["end"], 1_900_000_000);
        assert_eq!(body["message"], "maintenance");
        assert_eq!(body["timezone"], "UTC");
        assert_eq!(body["monitor_tags"], json!(["team:a", "team:b"]));
        assert_eq!(
            body["recurrence"],
            json!({"type": "weeks", "period": 1, "week_days": ["Mon", "Fri"]})
        );
        assert!(body.get("active").is_none());
    }

    #[test]
    fn test_update_skips_unchanged_boundaries() {
        let prior = json!({"scope": ["*"], "start": 100, "end": 200, "timezone": "UTC"});
        let mut config = json!({"scope": ["*"], "start": 100, "end": 300, "message": "new"});
        DowntimeResource.schema().prepare(&mut config);
        let data = ResourceData::with_prior("5", prior, config);

        let body = build_downtime_body(&data, Some((Some(100), Some(200))));
        assert!(body.get("start").is_none());
        assert_eq!(body["end"], 300);

        // Drift in the API value forces the configured start back.
        let body = build_downtime_body(&data, Some((Some(150), Some(200))));
        assert_eq!(body["start"], 100);
    }

    #[test]
    fn test_state_hides_wildcard_monitor_tags() {
        let mut data = ResourceData::from_state("1", json!({}));
        update_downtime_state(
            &mut data,
            &json!({
                "id": 1, "active": true, "disabled": false, "start": 10, "end": null,
                "message": "m", "monitor_id": null, "timezone": "UTC",
                "scope": ["*"], "monitor_tags": ["*"],
                "recurrence": {"type": "days", "period": 2, "until_date": null}
            }),
        );
        assert!(data.get("monitor_tags").is_none());
        assert_eq!(data.get_i64("recurrence.0.period"), Some(2));
        assert!(data.get("recurrence.0.until_date").is_none());
        assert_eq!(data.get_strings("scope"), vec!["*"]);
    }

    #[test]
    fn test_schema_conflicts() {
        let schema = DowntimeResource.schema();
        let mut config = json!({
            "scope": ["*"],
            "start": 1,
            "start_date": "2030-01-01T00:00:00Z",
            "timezone": "Not/AZone"
        });
        schema.prepare(&mut config);
        let errors: Vec<String> = schema.validate(&config).iter().map(ToString::to_string).collect();
        assert!(errors.iter().any(|e| e.starts_with("start_date: conflicts with")));
        assert!(errors.iter().any(|e| e.starts_with("timezone")));
    }

    #[test]
    fn test_cancelled_downtime_is_gone() {
        assert!(DowntimeResource.is_gone(&json!({"id": 1, "canceled": 1_700_000_000})));
        assert!(!DowntimeResource.is_gone(&json!({"id": 1, "canceled": null})));
    }

    #[tokio::test]
    async fn test_read_clears_cancelled() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.url.ends_with("/api/v1/downtime/9"))
            .times(1)
            .returning(|_| Ok(ApiResponse::new(200, r#"{"id": 9, "canceled": 1700000000, "scope": ["*"]}"#)));
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");

        let mut data = ResourceData::from_state("9", json!({"scope": ["*"]}));
        DowntimeResource.read(&meta, &mut data).await.unwrap();
        assert_eq!(data.id(), "");
    }

    #[tokio::test]
    async fn test_update_after_start_keeps_past_start_out_of_body() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_send()
            .withf(|req| req.method == HttpMethod::Get && req.url.ends_with("/api/v1/downtime/5"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(ApiResponse::new(200, r#"{"id": 5, "start": 100, "end": 200, "scope": ["*"]}"#))
            });
        transport
            .expect_send()
            .withf(|req| {
                let body: Value = req
                    .body
                    .as_deref()
                    .and_then(|b| serde_json::from_str(b).ok())
                    .unwrap_or(Value::Null);
                req.method == HttpMethod::Put
                    && req.url.ends_with("/api/v1/downtime/5")
                    && body.get("start").is_none()
                    && body.get("end").is_none()
                    && body["message"] == "extended"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ApiResponse::new(200, r#"{"id": 5}"#)));
        transport
            .expect_send()
            .withf(|req| req.method == HttpMethod::Get)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(ApiResponse::new(
                    200,
                    r#"{"id": 5, "start": 100, "end": 200, "message": "extended", "scope": ["*"], "timezone": "UTC"}"#,
                ))
            });
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");

        let prior = json!({"scope": ["*"], "start": 100, "end": 200, "timezone": "UTC", "message": "m"});
        let mut config = json!({"scope": ["*"], "start": 100, "end": 200, "message": "extended"});
        DowntimeResource.schema().prepare(&mut config);
        let mut data = ResourceData::with_prior("5", prior, config);

        DowntimeResource.update(&meta, &mut data).await.unwrap();
        assert_eq!(data.id(), "5");
        assert_eq!(data.get_str("message"), Some("extended"));
        assert_eq!(data.get_i64("start"), Some(100));
    }
}
