//! Shared helpers for the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use terraform_provider_datadog::config::{ConfigParser, WorkspaceConfig};
use terraform_provider_datadog::vcr::RecordMode;

/// Directory holding the committed cassettes.
pub fn cassette_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("cassettes")
}

/// Committed cassettes are replayed unless `RECORD=true` asks for a new recording.
pub fn cassette_mode() -> RecordMode {
    match RecordMode::from_env() {
        RecordMode::Record => RecordMode::Record,
        RecordMode::Replay | RecordMode::Passthrough => RecordMode::Replay,
    }
}

/// Parses an inline workspace.
pub fn workspace(yaml: &str) -> WorkspaceConfig {
    ConfigParser::new()
        .parse_yaml(yaml, None)
        .expect("workspace should parse")
}

/// A single team workspace.
pub fn team_workspace(name: &str, description: &str) -> WorkspaceConfig {
    workspace(&format!(
        r#"
resources:
  - type: datadog_team
    name: core
    attributes:
      name: {name}
      handle: {name}
      description: {description}
"#
    ))
}

/// A v2 team response body.
pub fn team_body(id: &str, name: &str, description: &str) -> Value {
    json!({
        "data": {
            "id": id,
            "type": "team",
            "attributes": {
                "description": description,
                "handle": name,
                "link_count": 0,
                "name": name,
                "summary": description,
                "user_count": 0
            }
        }
    })
}
