//! Frozen test clock and unique, replay-stable entity names.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CassetteError, Result};

use super::RecordMode;

/// Characters replaced by `_` in names derived from test names.
const BAD_PATH_CHARS: &[char] = &['\\', '?', '%', '*', ':', '|', '"', '<', '>'];

/// A clock fixed at the moment a cassette was recorded.
///
/// Replayed tests see the recording time, so names built from it match
/// the recorded URLs and bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestClock {
    now: DateTime<Utc>,
}

impl TestClock {
    /// A clock stopped at `now`.
    #[must_use]
    pub const fn fixed(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Path of the freeze file for a test.
    #[must_use]
    pub fn freeze_path(dir: &Path, test_name: &str) -> PathBuf {
        dir.join(format!("{test_name}.freeze"))
    }

    /// Builds the clock for a test.
    ///
    /// Recording stores the current time in `<test>.freeze`; replaying reads
    /// it back (storing a fresh one when absent); passthrough uses the real
    /// time without touching files.
    ///
    /// # Errors
    ///
    /// Returns an error if the freeze file cannot be written or parsed.
    pub fn for_test(dir: &Path, test_name: &str, mode: RecordMode) -> Result<Self> {
        let path = Self::freeze_path(dir, test_name);
        match mode {
            RecordMode::Record => Self::set(&path),
            RecordMode::Replay => match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let now = DateTime::parse_from_rfc3339(content.trim())
                        .map_err(|e| CassetteError::Format {
                            path: path.clone(),
                            message: format!("invalid freeze time: {e}"),
                        })?
                        .with_timezone(&Utc);
                    debug!("Restored clock {now} from {}", path.display());
                    Ok(Self { now })
                }
                Err(e) => {
                    warn!("Could not load clock from {}: {e}", path.display());
                    Self::set(&path)
                }
            },
            RecordMode::Passthrough => Ok(Self { now: Utc::now() }),
        }
    }

    fn set(path: &Path) -> Result<Self> {
        let now = Utc::now();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, now.to_rfc3339_opts(SecondsFormat::Nanos, true))?;
        Ok(Self { now })
    }

    /// The frozen time.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// Replaces characters unsafe in file names with `_`.
#[must_use]
pub fn secure_path(path: &str) -> String {
    path.chars()
        .map(|c| if BAD_PATH_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Build identifier embedded in entity names.
///
/// `BUILD_BUILDID` is used only on CI (`CI=true`) and never while replaying,
/// so replayed names stay stable.
#[must_use]
pub fn build_id(mode: RecordMode) -> String {
    let is_ci = std::env::var("CI").is_ok_and(|v| v == "true");
    match std::env::var("BUILD_BUILDID") {
        Ok(id) if is_ci && mode != RecordMode::Replay => id,
        _ => "local".to_string(),
    }
}

/// `tf-<test>-<build>-<unix seconds>` with `/` replaced by `-`.
#[must_use]
pub fn unique_entity_name(clock: &TestClock, test_name: &str, build_id: &str) -> String {
    format!(
        "tf-{}-{build_id}-{}",
        secure_path(test_name),
        clock.now().timestamp()
    )
    .replace('/', "-")
}

/// A 12 digit, replay-stable account id derived from the unique entity name.
#[must_use]
pub fn unique_aws_account_id(clock: &TestClock, test_name: &str, build_id: &str) -> String {
    let unique = unique_entity_name(clock, test_name, build_id);
    let digest = hex::encode(Sha256::digest(unique.as_bytes()));
    let digits: String = digest.chars().map(|c| u32::from(c).to_string()).collect();
    digits.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> TestClock {
        TestClock::fixed(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_secure_path() {
        assert_eq!(secure_path(r#"a:b|c"d<e>f*g?h%i\j"#), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn test_unique_entity_name() {
        let name = unique_entity_name(&clock(), "TestAccDatadogTeam/Basic", "local");
        assert_eq!(name, "tf-TestAccDatadogTeam-Basic-local-1714564800");
    }

    #[test]
    fn test_unique_aws_account_id_is_numeric_and_stable() {
        let a = unique_aws_account_id(&clock(), "TestAccAws", "local");
        let b = unique_aws_account_id(&clock(), "TestAccAws", "local");
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_freeze_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let recorded = TestClock::for_test(dir.path(), "TestClock", RecordMode::Record).unwrap();
        let replayed = TestClock::for_test(dir.path(), "TestClock", RecordMode::Replay).unwrap();
        assert_eq!(recorded, replayed);
        assert!(TestClock::freeze_path(dir.path(), "TestClock").exists());
    }
}
