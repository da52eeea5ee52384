//! State management.
//!
//! This module persists what the provider knows about managed objects
//! between runs: ids, attributes and a short operation history. Backends
//! store it on local disk or in S3 and guard it with an expiring lock.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{HistoryEntry, Operation, ProviderState, ResourceState, MAX_HISTORY, STATE_VERSION};

use crate::config::{StateBackend, StateConfig};
use crate::error::{ConfigError, Result};
use std::path::Path;

/// Opens the backend `config` names. Local paths are relative to `workspace_dir`.
///
/// # Errors
///
/// Returns a validation error when the S3 backend has no bucket, or the
/// S3 client error.
pub async fn open_store(config: &StateConfig, workspace_dir: &Path) -> Result<Box<dyn StateStore>> {
    match config.backend {
        StateBackend::Local => {
            let dir = config
                .path
                .as_deref()
                .map_or_else(|| workspace_dir.join(STATE_DIR), |p| workspace_dir.join(p));
            Ok(Box::new(LocalStateStore::with_base_dir(dir)))
        }
        StateBackend::S3 => {
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                ConfigError::validation("bucket is required for the s3 backend", "state.bucket")
            })?;
            let store = S3StateStore::new(bucket, config.prefix.as_deref(), config.region.as_deref()).await?;
            Ok(Box::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_local_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&StateConfig::default(), dir.path()).await.unwrap();
        assert_eq!(store.backend_type(), "local");
        store.save(&ProviderState::new()).await.unwrap();
        assert!(dir.path().join(".datadog/state.json").exists());
    }

    #[tokio::test]
    async fn test_s3_requires_bucket() {
        let config = StateConfig {
            backend: StateBackend::S3,
            ..StateConfig::default()
        };
        let err = open_store(&config, Path::new(".")).await.err().unwrap();
        assert!(err.to_string().contains("bucket is required"));
    }
}
