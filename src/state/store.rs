//! The state backend contract.

use async_trait::async_trait;

use crate::error::Result;

use super::lock::LockInfo;
use super::types::ProviderState;

/// A place where state and its lock live.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state. `None` when nothing was saved yet.
    async fn load(&self) -> Result<Option<ProviderState>>;

    /// Saves the state.
    async fn save(&self, state: &ProviderState) -> Result<()>;

    /// Deletes the state and its lock.
    async fn delete(&self) -> Result<()>;

    /// True when state was saved before.
    async fn exists(&self) -> Result<bool>;

    /// Takes the lock for `holder`; an empty holder gets a generated id.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// The current lock, expired or not.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// True when a live lock is held.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self.get_lock_info().await?.is_some_and(|lock| !lock.is_expired()))
    }

    /// Backend name for display.
    fn backend_type(&self) -> &'static str;

    /// Loads the state or starts a new one.
    async fn load_or_default(&self) -> Result<ProviderState> {
        Ok(self.load().await?.unwrap_or_default())
    }
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<ProviderState>> {
        (**self).load().await
    }

    async fn save(&self, state: &ProviderState) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
