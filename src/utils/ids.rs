//! Parser for composite import ids.

use crate::error::{ConfigError, Result};

/// Splits `<account_name>:<channel_name>`.
///
/// # Errors
///
/// Returns an error when the id has no `:` delimiter.
pub fn account_name_and_channel_name_from_id(id: &str) -> Result<(String, String)> {
    match id.split_once(':') {
        Some((account, channel)) => Ok((account.to_string(), channel.to_string())),
        None => Err(ConfigError::validation(
            format!("error extracting account name and channel name: {id}"),
            "id",
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_and_channel() {
        assert_eq!(
            account_name_and_channel_name_from_id("test-account:#channel").unwrap(),
            ("test-account".to_string(), "#channel".to_string())
        );
        assert!(account_name_and_channel_name_from_id("test-account").is_err());
    }
}
