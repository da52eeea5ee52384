//! Provider configuration: settings resolution and client construction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use validator::Validate;

use crate::client::{DatadogClient, RetryPolicy, Transport, DEFAULT_API_URL};
use crate::config::ProviderSettings;
use crate::error::{ApiError, ConfigError, ProviderError, Result};

/// Provider settings after applying environment variables and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    /// API key.
    pub api_key: Option<String>,
    /// Application key.
    pub app_key: Option<String>,
    /// API URL without trailing slash.
    pub api_url: String,
    /// Validate keys on configure.
    pub validate: bool,
    /// HTTP retry behaviour.
    pub retry: RetryPolicy,
    /// Tags merged into taggable resources.
    pub default_tags: BTreeMap<String, String>,
}

impl ResolvedSettings {
    /// Resolves settings, reading unset values through `env`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid values.
    pub fn resolve<F>(settings: &ProviderSettings, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        settings.validate().map_err(|e| {
            ConfigError::validation_general(format!("invalid provider settings: {e}"))
        })?;

        let first_env = |names: &[&str]| -> Option<String> {
            names.iter().find_map(|n| env(n).filter(|v| !v.is_empty()))
        };
        let parse_env = |name: &str| -> Result<Option<String>> { Ok(first_env(&[name])) };

        let api_key = settings
            .api_key
            .clone()
            .or_else(|| first_env(&["DD_API_KEY", "DATADOG_API_KEY"]));
        let app_key = settings
            .app_key
            .clone()
            .or_else(|| first_env(&["DD_APP_KEY", "DATADOG_APP_KEY"]));
        let api_url = settings
            .api_url
            .clone()
            .or_else(|| first_env(&["DD_HOST", "DATADOG_HOST"]))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        validate_api_url(&api_url)?;

        let validate = match settings.validate {
            Some(v) => v,
            None => parse_bool("DD_VALIDATE", parse_env("DD_VALIDATE")?)?.unwrap_or(true),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            enabled: match settings.http_client_retry_enabled {
                Some(v) => v,
                None => parse_bool(
                    "DD_HTTP_CLIENT_RETRY_ENABLED",
                    parse_env("DD_HTTP_CLIENT_RETRY_ENABLED")?,
                )?
                .unwrap_or(defaults.enabled),
            },
            timeout: match settings.http_client_retry_timeout {
                Some(secs) => Duration::from_secs(secs),
                None => parse_num::<u64>(
                    "DD_HTTP_CLIENT_RETRY_TIMEOUT",
                    parse_env("DD_HTTP_CLIENT_RETRY_TIMEOUT")?,
                )?
                .map_or(defaults.timeout, Duration::from_secs),
            },
            backoff_base: match settings.http_client_retry_backoff_base {
                Some(v) => v,
                None => parse_num(
                    "DD_HTTP_CLIENT_RETRY_BACKOFF_BASE",
                    parse_env("DD_HTTP_CLIENT_RETRY_BACKOFF_BASE")?,
                )?
                .unwrap_or(defaults.backoff_base),
            },
            backoff_multiplier: match settings.http_client_retry_backoff_multiplier {
                Some(v) => v,
                None => parse_num(
                    "DD_HTTP_CLIENT_RETRY_BACKOFF_MULTIPLIER",
                    parse_env("DD_HTTP_CLIENT_RETRY_BACKOFF_MULTIPLIER")?,
                )?
                .unwrap_or(defaults.backoff_multiplier),
            },
            max_retries: match settings.http_client_retry_max_retries {
                Some(v) => v,
                None => parse_num(
                    "DD_HTTP_CLIENT_RETRY_MAX_RETRIES",
                    parse_env("DD_HTTP_CLIENT_RETRY_MAX_RETRIES")?,
                )?
                .unwrap_or(defaults.max_retries),
            },
        };
        if retry.timeout.is_zero() {
            return Err(ConfigError::validation(
                "http_client_retry_timeout must be positive",
                "http_client_retry_timeout",
            )
            .into());
        }

        Ok(Self {
            api_key,
            app_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            validate,
            retry,
            default_tags: settings.default_tags.clone(),
        })
    }

    /// Resolves settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`ResolvedSettings::resolve`].
    pub fn from_env(settings: &ProviderSettings) -> Result<Self> {
        Self::resolve(settings, |name| std::env::var(name).ok())
    }
}

fn parse_bool(name: &str, raw: Option<String>) -> Result<Option<bool>> {
    raw.map(|v| {
        v.trim().parse::<bool>().map_err(|_| {
            ProviderError::from(ConfigError::validation(
                format!("{name} must be true or false, got {v:?}"),
                name,
            ))
        })
    })
    .transpose()
}

fn parse_num<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|v| {
        v.trim().parse::<T>().map_err(|_| {
            ProviderError::from(ConfigError::validation(
                format!("{name} must be a number, got {v:?}"),
                name,
            ))
        })
    })
    .transpose()
}

/// Checks an API URL: scheme and host present, no `/api/` suffix.
///
/// # Errors
///
/// Returns a validation error naming the problem.
pub fn validate_api_url(raw: &str) -> Result<()> {
    let parsed = Url::parse(raw)
        .map_err(|e| ConfigError::validation(format!("invalid API URL {raw}: {e}"), "api_url"))?;
    if parsed.scheme().is_empty() || parsed.host_str().is_none_or(str::is_empty) {
        return Err(
            ConfigError::validation(format!("missing protocol or host : {raw}"), "api_url").into(),
        );
    }
    if raw.ends_with("/api/") {
        return Err(ConfigError::validation("api_url must not end with /api/", "api_url").into());
    }
    Ok(())
}

/// Everything a CRUD function needs: the client and resolved settings.
#[derive(Debug, Clone)]
pub struct ProviderConfiguration {
    /// Datadog client.
    pub client: DatadogClient,
    /// Resolved settings.
    pub settings: ResolvedSettings,
}

impl ProviderConfiguration {
    /// Builds the client over `transport` and validates the keys when asked to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredentials`] when validation is on and a
    /// key is missing, or [`ConfigError::InvalidCredentials`] when the API
    /// rejects them.
    pub async fn configure(settings: ResolvedSettings, transport: Arc<dyn Transport>) -> Result<Self> {
        let client = DatadogClient::new(
            transport,
            &settings.api_url,
            settings.api_key.clone(),
            settings.app_key.clone(),
        )
        .with_retry(settings.retry.clone());

        if settings.validate {
            if settings.api_key.is_none() || settings.app_key.is_none() {
                return Err(ConfigError::MissingCredentials.into());
            }
            debug!("Validating Datadog API key");
            client.validate_keys().await.map_err(|e| match e {
                ProviderError::Api(ApiError::AuthenticationFailed { message }) => {
                    ProviderError::from(ConfigError::InvalidCredentials { message })
                }
                other => other,
            })?;
        }

        info!("Datadog provider configured for {}", settings.api_url);
        Ok(Self { client, settings })
    }

    /// A configuration over `transport` with no keys, no retries and no
    /// validation. Used for offline runs and mock servers.
    #[must_use]
    pub fn unvalidated(transport: Arc<dyn Transport>, api_url: &str) -> Self {
        let settings = ResolvedSettings {
            api_key: None,
            app_key: None,
            api_url: api_url.trim_end_matches('/').to_string(),
            validate: false,
            retry: RetryPolicy::disabled(),
            default_tags: BTreeMap::new(),
        };
        let client = DatadogClient::new(transport, &settings.api_url, None, None)
            .with_retry(settings.retry.clone());
        Self { client, settings }
    }

    /// Wraps an existing client without any validation.
    #[must_use]
    pub fn from_client(client: DatadogClient, settings: ResolvedSettings) -> Self {
        Self { client, settings }
    }
}
