//! Cassette-based HTTP record and replay for deterministic tests.
//!
//! The mode comes from the `RECORD` environment variable:
//! - `RECORD=true`: call the live API and save every interaction
//! - `RECORD=false`: answer only from the saved cassette
//! - anything else: call the live API without recording

mod cassette;
mod clock;
mod recorder;

pub use cassette::{
    filter_headers, matches, remove_url_secrets, Cassette, Interaction, RecordedRequest,
    RecordedResponse, ALLOWED_HEADERS, CASSETTE_VERSION,
};
pub use clock::{build_id, secure_path, unique_aws_account_id, unique_entity_name, TestClock};
pub use recorder::CassetteTransport;

use serde::Serialize;
use std::fmt;

use crate::client::DEFAULT_API_URL;
use crate::error::{ConfigError, Result};

/// Placeholder keys used while replaying; they never leave the process.
const REPLAY_API_KEY: &str = "00000000000000000000000000000000";
const REPLAY_APP_KEY: &str = "0000000000000000000000000000000000000000";

/// How the cassette transport behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordMode {
    /// Call the live API and save interactions.
    Record,
    /// Serve responses from the cassette only.
    Replay,
    /// Call the live API without saving.
    Passthrough,
}

impl RecordMode {
    /// Mode for a `RECORD` value.
    #[must_use]
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some("true") => Self::Record,
            Some("false") => Self::Replay,
            _ => Self::Passthrough,
        }
    }

    /// Mode from the `RECORD` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_value(std::env::var("RECORD").ok().as_deref())
    }
}

impl fmt::Display for RecordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record => write!(f, "record"),
            Self::Replay => write!(f, "replay"),
            Self::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// Credentials for acceptance tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCredentials {
    /// API key.
    pub api_key: String,
    /// Application key.
    pub app_key: String,
    /// API URL.
    pub api_url: String,
}

/// Resolves test credentials.
///
/// Tests read `DD_TEST_CLIENT_API_KEY`, `DD_TEST_CLIENT_APP_KEY` and
/// `DD_TEST_SITE_URL` only, never the regular `DD_API_KEY` family, so a
/// developer's own keys cannot leak into a recording. Replay needs no keys.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVar`] when a key is missing outside replay.
pub fn precheck(mode: RecordMode) -> Result<TestCredentials> {
    let api_url = std::env::var("DD_TEST_SITE_URL")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    if mode == RecordMode::Replay {
        return Ok(TestCredentials {
            api_key: REPLAY_API_KEY.to_string(),
            app_key: REPLAY_APP_KEY.to_string(),
            api_url,
        });
    }

    let lookup = |name: &str| {
        std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar {
                name: name.to_string(),
            })
    };

    Ok(TestCredentials {
        api_key: lookup("DD_TEST_CLIENT_API_KEY")?,
        app_key: lookup("DD_TEST_CLIENT_APP_KEY")?,
        api_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_mode_values() {
        assert_eq!(RecordMode::from_value(Some("true")), RecordMode::Record);
        assert_eq!(RecordMode::from_value(Some("false")), RecordMode::Replay);
        assert_eq!(RecordMode::from_value(Some("none")), RecordMode::Passthrough);
        assert_eq!(RecordMode::from_value(None), RecordMode::Passthrough);
    }

    #[test]
    fn test_replay_precheck_needs_no_keys() {
        let creds = precheck(RecordMode::Replay).unwrap();
        assert_eq!(creds.api_key.len(), 32);
        assert!(creds.api_url.starts_with("http"));
    }
}
