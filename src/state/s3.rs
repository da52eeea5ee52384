//! S3-based state storage backend.
//!
//! State is the `<prefix>/state.json` object and the lock is
//! `<prefix>/state.lock`, so a team can share one workspace state.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{ProviderError, Result, StateError};

use super::lock::{ensure_lock_id, ensure_unlocked, generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::ProviderState;

const STATE_KEY: &str = "state.json";
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug, Clone)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    prefix: String,
}

/// `a/b/` for `/a/b`, empty for no prefix.
fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/"),
        _ => String::new(),
    }
}

fn corrupted(message: String) -> ProviderError {
    StateError::Corrupted { message }.into()
}

impl S3StateStore {
    /// A store using the AWS environment, optionally pinned to `region`.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = match region {
            Some(region) => {
                aws_config::from_env()
                    .region(aws_config::Region::new(region.to_string()))
                    .load()
                    .await
            }
            None => aws_config::load_from_env().await,
        };
        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// A store over an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::s3(format!("Failed to read S3 object: {e}")))?;
                let content = String::from_utf8(bytes.to_vec())
                    .map_err(|e| corrupted(format!("Invalid UTF-8 in S3 object: {e}")))?;
                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 put error: {e}")))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;
        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        self.get_object(&self.key(LOCK_KEY))
            .await?
            .map(|content| {
                serde_json::from_str(&content).map_err(|e| corrupted(format!("Failed to parse lock: {e}")))
            })
            .transpose()
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<ProviderState>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        let Some(json) = self.get_object(&key).await? else {
            debug!("No state found in S3");
            return Ok(None);
        };
        let state: ProviderState =
            serde_json::from_str(&json).map_err(|e| corrupted(format!("Failed to parse state: {e}")))?;
        info!("Loaded state serial {} ({} resources)", state.serial, state.resources.len());
        Ok(Some(state))
    }

    async fn save(&self, state: &ProviderState) -> Result<()> {
        let key = self.key(STATE_KEY);
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;
        self.put_object(&key, &content).await?;
        info!("Saved state (serial {}) to s3://{}/{key}", state.serial, self.bucket);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let state_key = self.key(STATE_KEY);
        info!("Deleting state from s3://{}/{state_key}", self.bucket);
        self.delete_object(&state_key).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(STATE_KEY))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::s3(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let existing = self.read_lock().await?;
        ensure_unlocked(existing.as_ref())?;
        if existing.is_some() {
            debug!("Expired lock found, taking over");
        }

        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock = LockInfo::new(&holder);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.put_object(&self.key(LOCK_KEY), &content).await?;

        info!(
            "Acquired state lock {} for {holder} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock().await? {
            ensure_lock_id(&existing, lock_id)?;
            self.delete_object(&self.key(LOCK_KEY)).await?;
            info!("Released state lock: {lock_id}");
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("teams/obs/")), "teams/obs/");
        assert_eq!(normalize_prefix(Some("/datadog")), "datadog/");
    }

    #[test]
    fn test_object_keys() {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        let store = S3StateStore::with_client(Client::from_conf(config), "bucket", Some("prod"));
        assert_eq!(store.key(STATE_KEY), "prod/state.json");
        assert_eq!(store.key(LOCK_KEY), "prod/state.lock");
        assert_eq!(store.backend_type(), "s3");
    }
}
