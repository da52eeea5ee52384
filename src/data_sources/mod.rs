//! Read-only lookups.
//!
//! - `datadog_ip_ranges`: published Datadog IP prefixes
//! - `datadog_monitor`: one monitor by name and tag filters
//! - `datadog_security_monitoring_rules`: rules matching name, tag and origin filters
//! - `datadog_team`: one team by id or keyword

mod ip_ranges;
mod monitor;
mod security_monitoring_rules;
mod team;

pub use ip_ranges::{ip_ranges_url, IpRangesDataSource};
pub use monitor::MonitorDataSource;
pub use security_monitoring_rules::SecurityMonitoringRulesDataSource;
pub use team::TeamDataSource;
