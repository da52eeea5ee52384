//! Local file-based state storage backend.
//!
//! State lives in `.datadog/state.json` next to the workspace, the lock in
//! `.datadog/state.lock`. Saves go through a temporary file and a rename.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ProviderError, Result, StateError};

use super::lock::{ensure_lock_id, ensure_unlocked, generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::ProviderState;

/// Default state directory name.
pub const STATE_DIR: &str = ".datadog";

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    base_dir: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
}

fn corrupted(message: String) -> ProviderError {
    StateError::Corrupted { message }.into()
}

fn lock_failed(message: String) -> ProviderError {
    StateError::LockFailed { message }.into()
}

impl LocalStateStore {
    /// A store under `.datadog` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ProviderError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);
        Ok(Self::with_base_dir(base_dir))
    }

    /// A store in `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(STATE_FILE),
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
        }
    }

    /// A store writing to a custom state file; the lock sits beside it.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
            state_path,
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await?;
        }
        Ok(())
    }

    async fn write_synced(path: &Path, content: &str) -> std::io::Result<()> {
        let mut file = fs::File::create(path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.lock_path)
            .await
            .map_err(|e| corrupted(format!("Failed to read lock file: {e}")))?;
        let lock = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse lock file: {e}")))?;
        Ok(Some(lock))
    }

    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)
                .await
                .map_err(|e| lock_failed(format!("Failed to delete lock file: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<ProviderState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());
        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| corrupted(format!("Failed to read state file: {e}")))?;
        let state = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse state file: {e}")))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &ProviderState) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = self.state_path.with_extension("json.tmp");
        Self::write_synced(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.state_path).await?;

        info!(
            "Saved state (serial {}) to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path).await?;
        }
        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let existing = self.read_lock_file().await?;
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

        self.ensure_dir().await?;
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        Self::write_synced(&self.lock_path, &content)
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;

        info!(
            "Acquired state lock {} for {holder} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            ensure_lock_id(&existing, lock_id)?;
            self.delete_lock_file().await?;
            info!("Released state lock: {lock_id}");
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
