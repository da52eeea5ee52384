//! Managed Datadog resources.
//!
//! Each resource declares its schema and maps [`crate::schema::ResourceData`]
//! to and from the Datadog API:
//! - [`MonitorResource`]: `datadog_monitor`
//! - [`DowntimeResource`]: `datadog_downtime`
//! - [`DashboardJsonResource`]: `datadog_dashboard_json`
//! - [`WebhookResource`]: `datadog_integration_webhook`
//! - [`SlackChannelResource`]: `datadog_integration_slack_channel`
//! - [`LogsCustomPipelineResource`]: `datadog_logs_custom_pipeline`
//! - [`RoleResource`]: `datadog_role`
//! - [`SecurityMonitoringRuleResource`]: `datadog_security_monitoring_rule`
//! - [`TeamResource`]: `datadog_team`

mod dashboard_json;
mod downtime;
mod integration_slack_channel;
mod integration_webhook;
mod logs_custom_pipeline;
mod monitor;
mod role;
mod security_monitoring_rule;
mod team;

pub use dashboard_json::{normalize_dashboard, normalize_dashboard_json, DashboardJsonResource};
pub use downtime::DowntimeResource;
pub use integration_slack_channel::SlackChannelResource;
pub use integration_webhook::{build_datadog_headers, parse_datadog_headers, WebhookResource};
pub use logs_custom_pipeline::LogsCustomPipelineResource;
pub use monitor::MonitorResource;
pub use role::RoleResource;
pub use security_monitoring_rule::SecurityMonitoringRuleResource;
pub use team::TeamResource;

pub(crate) use monitor::{update_monitor_state, MONITOR_PATH};
pub(crate) use security_monitoring_rule::{rule_schema, rule_to_state, RULES_PATH};
pub(crate) use team::{update_team_state, TEAM_PATH};
