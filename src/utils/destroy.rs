//! Destroy checks for eventually consistent deletes.
//!
//! After a delete the API may keep answering for a short while. The check
//! polls each object until it reports 404 (or a soft-deleted body) and fails
//! naming the first object that is still there.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::client::DatadogClient;
use crate::error::{ApplyError, ProviderError, Result};

use super::retry::{retry, Deadline, RetryError};

/// Attempts made per object.
pub const DESTROY_CHECK_ATTEMPTS: u32 = 5;

/// Interval between attempts.
pub const DESTROY_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// How a destroy check recognises a deleted object.
///
/// Any `Fn(&Value) -> bool` closure is a check that accepts 404 plus the
/// bodies the closure marks as soft deleted.
pub trait GoneCheck: Sync {
    /// True when a successful read still means the object is deleted.
    fn gone_body(&self, _body: &Value) -> bool {
        false
    }

    /// True when a failed read means the object is deleted. Defaults to 404.
    fn gone_error(&self, err: &ProviderError) -> bool {
        err.is_not_found()
    }
}

impl<F> GoneCheck for F
where
    F: Fn(&Value) -> bool + Sync,
{
    fn gone_body(&self, body: &Value) -> bool {
        self(body)
    }
}

/// Polls each path until the API reports it gone.
///
/// The reconciler runs it with [`DESTROY_CHECK_ATTEMPTS`] and
/// [`DESTROY_CHECK_INTERVAL`] unless told otherwise.
///
/// # Errors
///
/// Returns [`ApplyError::StillExists`] for the first object still present
/// once the budget runs out, or any read error `gone` does not accept.
pub async fn check_destroyed<G>(
    client: &DatadogClient,
    paths: &[String],
    gone: &G,
    deadline: Deadline,
    interval: Duration,
) -> Result<()>
where
    G: GoneCheck + ?Sized,
{
    for path in paths {
        retry(deadline, interval, || async move {
            match client.get_json::<Value>(path).await {
                Err(e) if gone.gone_error(&e) => Ok(()),
                Err(e) => Err(RetryError::Fatal(e)),
                Ok(body) if gone.gone_body(&body) => Ok(()),
                Ok(_) => Err(RetryError::Retryable(ProviderError::from(
                    ApplyError::StillExists {
                        resource: resource_label(path),
                        id: path.rsplit('/').next().unwrap_or_default().to_string(),
                    },
                ))),
            }
        })
        .await?;
        debug!("Destroy check passed for {path}");
    }
    Ok(())
}

/// `/api/v1/monitor/123` becomes `monitor`.
fn resource_label(path: &str) -> String {
    let trimmed = path.split('?').next().unwrap_or(path);
    let mut parts = trimmed.rsplit('/');
    parts.next();
    parts.next().unwrap_or("resource").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, MockTransport};
    use std::sync::Arc;

    fn client_with(responses: Vec<(u16, &'static str)>) -> DatadogClient {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        for (status, body) in responses {
            transport
                .expect_send()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(ApiResponse::new(status, body)));
        }
        DatadogClient::new(
            Arc::new(transport),
            "https://api.datadoghq.com",
            None,
            None,
        )
    }

    #[test]
    fn test_resource_label() {
        assert_eq!(resource_label("/api/v1/monitor/123"), "monitor");
        assert_eq!(resource_label("/api/v2/team/abc?x=1"), "team");
    }

    #[tokio::test]
    async fn test_gone_after_polling() {
        let client = client_with(vec![(200, r#"{"id":1}"#), (404, r#"{"errors":["Not found"]}"#)]);
        let result = check_destroyed(
            &client,
            &["/api/v1/monitor/1".to_string()],
            &|_: &Value| false,
            Deadline::Attempts(3),
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_soft_deleted_counts_as_gone() {
        let client = client_with(vec![(200, r#"{"id":7,"canceled":1700000000}"#)]);
        let result = check_destroyed(
            &client,
            &["/api/v1/downtime/7".to_string()],
            &|body: &Value| body.get("canceled").is_some_and(|v| !v.is_null()),
            Deadline::Attempts(3),
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_still_exists_after_budget() {
        let client = client_with(vec![(200, r#"{"id":1}"#), (200, r#"{"id":1}"#)]);
        let err = check_destroyed(
            &client,
            &["/api/v1/monitor/1".to_string()],
            &|_: &Value| false,
            Deadline::Attempts(2),
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Apply error: monitor 1 still exists");
    }

    struct BadRequestMeansGone;

    impl GoneCheck for BadRequestMeansGone {
        fn gone_error(&self, err: &ProviderError) -> bool {
            err.is_not_found() || err.status() == Some(400)
        }
    }

    #[tokio::test]
    async fn test_custom_gone_error() {
        let client = client_with(vec![(400, r#"{"errors":["Pipeline not found"]}"#)]);
        let result = check_destroyed(
            &client,
            &["/api/v1/logs/config/pipelines/abc".to_string()],
            &BadRequestMeansGone,
            Deadline::Attempts(3),
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_ok());

        let client = client_with(vec![(400, r#"{"errors":["bad"]}"#)]);
        let result = check_destroyed(
            &client,
            &["/api/v1/monitor/1".to_string()],
            &|_: &Value| false,
            Deadline::Attempts(3),
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_err());
    }
}
