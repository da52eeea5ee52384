//! Cassette file format, request matching and redaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::client::{ApiRequest, ApiResponse, HttpMethod};
use crate::error::{CassetteError, Result};

/// Current cassette format version.
pub const CASSETTE_VERSION: u32 = 2;

/// Headers kept in cassettes; everything else is dropped before saving.
pub const ALLOWED_HEADERS: &[&str] = &["Accept", "Content-Type"];

/// Query parameters removed from recorded URLs.
const URL_SECRETS: &[&str] = &["api_key", "application_key"];

/// A recorded request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// URL with secrets removed.
    pub url: String,
    /// Allowed headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body, empty when none was sent.
    #[serde(default)]
    pub body: String,
}

/// A recorded response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Allowed headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body.
    #[serde(default)]
    pub body: String,
}

/// One request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Position in the cassette.
    pub id: usize,
    /// The request.
    pub request: RecordedRequest,
    /// The response.
    pub response: RecordedResponse,
}

/// A sequence of recorded interactions for one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cassette {
    /// Format version.
    pub version: u32,
    /// Interactions in recording order.
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

impl Default for Cassette {
    fn default() -> Self {
        Self {
            version: CASSETTE_VERSION,
            interactions: Vec::new(),
        }
    }
}

impl Cassette {
    /// Path of the cassette for a test inside `dir`.
    #[must_use]
    pub fn path_for(dir: &Path, test_name: &str) -> PathBuf {
        dir.join(format!("{test_name}.yaml"))
    }

    /// Loads a cassette file.
    ///
    /// # Errors
    ///
    /// Returns [`CassetteError::Missing`] when the file does not exist and
    /// [`CassetteError::Format`] when it cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CassetteError::Missing {
                path: path.to_path_buf(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path)?;
        let cassette: Self = serde_yaml::from_str(&content).map_err(|e| CassetteError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(
            "Loaded cassette {} with {} interactions",
            path.display(),
            cassette.interactions.len()
        );
        Ok(cassette)
    }

    /// Writes the cassette, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self).map_err(|e| CassetteError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content)?;
        debug!("Saved cassette {}", path.display());
        Ok(())
    }

    /// Appends an interaction, redacting it first.
    pub fn record(&mut self, request: &ApiRequest, response: &ApiResponse) {
        let id = self.interactions.len();
        self.interactions.push(Interaction {
            id,
            request: RecordedRequest {
                method: request.method,
                url: remove_url_secrets(&request.url),
                headers: filter_headers(&request.headers),
                body: request.body.clone().unwrap_or_default(),
            },
            response: RecordedResponse {
                status: response.status,
                headers: filter_headers(&response.headers),
                body: response.body.clone(),
            },
        });
    }

    /// Index of the first interaction not in `used` that matches `request`.
    #[must_use]
    pub fn find(&self, request: &ApiRequest, used: &[bool]) -> Option<usize> {
        self.interactions
            .iter()
            .enumerate()
            .find(|(i, interaction)| {
                !used.get(*i).copied().unwrap_or(false) && matches(request, &interaction.request)
            })
            .map(|(i, _)| i)
    }
}

/// Request matcher: method and redacted URL must be equal; a request
/// without a body matches only an empty recorded body; otherwise an empty
/// body, an identical body or an equal JSON document matches.
#[must_use]
pub fn matches(request: &ApiRequest, recorded: &RecordedRequest) -> bool {
    if request.method != recorded.method || remove_url_secrets(&request.url) != recorded.url {
        return false;
    }
    match &request.body {
        None => recorded.body.is_empty(),
        Some(body) => body.is_empty() || *body == recorded.body || same_json(body, &recorded.body),
    }
}

fn same_json(left: &str, right: &str) -> bool {
    match (
        serde_json::from_str::<serde_json::Value>(left),
        serde_json::from_str::<serde_json::Value>(right),
    ) {
        (Ok(l), Ok(r)) => l == r,
        _ => false,
    }
}

/// Removes `api_key` and `application_key` query parameters from a URL.
#[must_use]
pub fn remove_url_secrets(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.query().is_none() {
        return url.to_string();
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !URL_SECRETS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Keeps only [`ALLOWED_HEADERS`].
#[must_use]
pub fn filter_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| ALLOWED_HEADERS.iter().any(|a| a.eq_ignore_ascii_case(name)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
