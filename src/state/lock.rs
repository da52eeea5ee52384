//! State locking.
//!
//! A lock is a small JSON document stored next to the state. It names its
//! holder and expires after [`LOCK_EXPIRY_SECS`], after which another run
//! may take it over.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StateError};

/// Lock lifetime in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// A held state lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier, needed to release the lock.
    pub lock_id: String,
    /// Who holds the lock (`hostname-pid-uuid8`).
    pub holder: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
    /// When the lock stops being honoured.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// A fresh lock for `holder`.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// True once the lock may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds left before expiry, never negative.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Fails when `existing` is a live lock.
///
/// # Errors
///
/// Returns [`StateError::LockedByOther`] naming the holder.
pub fn ensure_unlocked(existing: Option<&LockInfo>) -> Result<()> {
    match existing {
        Some(lock) if !lock.is_expired() => Err(StateError::LockedByOther {
            holder: lock.holder.clone(),
            since: lock.acquired_at.to_rfc3339(),
        }
        .into()),
        _ => Ok(()),
    }
}

/// Fails when `lock_id` does not match the held lock.
///
/// # Errors
///
/// Returns [`StateError::LockFailed`] on a mismatch.
pub fn ensure_lock_id(existing: &LockInfo, lock_id: &str) -> Result<()> {
    if existing.lock_id == lock_id {
        Ok(())
    } else {
        Err(StateError::LockFailed {
            message: format!("lock ID mismatch: held by {}", existing.holder),
        }
        .into())
    }
}

/// Holder id for this process: `hostname-pid-uuid8`.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{hostname}-{}-{}", std::process::id(), &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_is_live() {
        let lock = LockInfo::new("ci-runner");
        assert_eq!(lock.holder, "ci-runner");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 5);
        assert!(ensure_unlocked(Some(&lock)).is_err());
        assert!(ensure_unlocked(None).is_ok());
    }

    #[test]
    fn test_expired_lock_can_be_taken() {
        let mut lock = LockInfo::new("old-run");
        lock.expires_at = Utc::now() - Duration::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
        assert!(ensure_unlocked(Some(&lock)).is_ok());
    }

    #[test]
    fn test_lock_id_must_match() {
        let lock = LockInfo::new("me");
        assert!(ensure_lock_id(&lock, &lock.lock_id).is_ok());
        let err = ensure_lock_id(&lock, "other").unwrap_err();
        assert!(err.to_string().contains("lock ID mismatch"));
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();
        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
        assert_eq!(id1.rsplit('-').next().map(str::len), Some(8));
    }
}
