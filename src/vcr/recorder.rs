//! The cassette-backed [`Transport`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::{ApiRequest, ApiResponse, Transport};
use crate::error::{CassetteError, ProviderError, Result};

use super::RecordMode;
use super::cassette::{remove_url_secrets, Cassette};

#[derive(Debug, Default)]
struct Tape {
    cassette: Cassette,
    used: Vec<bool>,
}

/// Records, replays or forwards HTTP interactions for one test.
#[derive(Debug)]
pub struct CassetteTransport {
    mode: RecordMode,
    path: PathBuf,
    inner: Option<Arc<dyn Transport>>,
    tape: Mutex<Tape>,
}

impl CassetteTransport {
    /// Opens the cassette `<dir>/<test_name>.yaml`.
    ///
    /// `inner` is the real transport used when recording or passing through;
    /// it is never called in replay mode.
    ///
    /// # Errors
    ///
    /// In replay mode, returns an error if the cassette is missing or malformed.
    pub fn new(
        dir: &Path,
        test_name: &str,
        mode: RecordMode,
        inner: Option<Arc<dyn Transport>>,
    ) -> Result<Self> {
        let path = Cassette::path_for(dir, test_name);
        let cassette = match mode {
            RecordMode::Replay => Cassette::load(&path)?,
            RecordMode::Record | RecordMode::Passthrough => Cassette::default(),
        };
        let used = vec![false; cassette.interactions.len()];
        info!("Cassette {} opened in {mode} mode", path.display());

        Ok(Self {
            mode,
            path,
            inner,
            tape: Mutex::new(Tape { cassette, used }),
        })
    }

    /// The active mode.
    #[must_use]
    pub const fn mode(&self) -> RecordMode {
        self.mode
    }

    /// Number of recorded interactions not yet replayed.
    pub async fn remaining(&self) -> usize {
        self.tape.lock().await.used.iter().filter(|u| !**u).count()
    }

    /// Finishes the session, writing the cassette when recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the cassette cannot be written.
    pub async fn stop(&self) -> Result<()> {
        if self.mode == RecordMode::Record {
            let tape = self.tape.lock().await;
            tape.cassette.save(&self.path)?;
        }
        Ok(())
    }

    async fn forward(&self, request: ApiRequest) -> Result<ApiResponse> {
        let inner = self.inner.as_ref().ok_or_else(|| {
            ProviderError::internal(format!("no network transport for {} mode", self.mode))
        })?;
        inner.send(request).await
    }
}

#[async_trait]
impl Transport for CassetteTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        match self.mode {
            RecordMode::Replay => {
                let mut tape = self.tape.lock().await;
                let Some(index) = tape.cassette.find(&request, &tape.used) else {
                    return Err(CassetteError::NoMatch {
                        method: request.method.to_string(),
                        url: remove_url_secrets(&request.url),
                    }
                    .into());
                };
                tape.used[index] = true;
                let recorded = &tape.cassette.interactions[index].response;
                debug!("Replaying interaction {index}: {} {}", request.method, request.url);
                Ok(ApiResponse {
                    status: recorded.status,
                    headers: recorded.headers.clone(),
                    body: recorded.body.clone(),
                })
            }
            RecordMode::Record => {
                let response = self.forward(request.clone()).await?;
                let mut tape = self.tape.lock().await;
                tape.cassette.record(&request, &response);
                tape.used.push(true);
                Ok(response)
            }
            RecordMode::Passthrough => self.forward(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HttpMethod, MockTransport};

    fn monitor_get() -> ApiRequest {
        ApiRequest::new(HttpMethod::Get, "https://api.datadoghq.com/api/v1/monitor/5")
            .header("DD-API-KEY", "secret")
    }

    #[tokio::test]
    async fn test_record_then_replay() {
        let dir = tempfile::TempDir::new().unwrap();

        let mut network = MockTransport::new();
        network
            .expect_send()
            .times(1)
            .returning(|_| Ok(ApiResponse::new(200, r#"{"id":5}"#)));

        let recorder = CassetteTransport::new(
            dir.path(),
            "TestMonitor",
            RecordMode::Record,
            Some(Arc::new(network)),
        )
        .unwrap();
        let recorded = recorder.send(monitor_get()).await.unwrap();
        recorder.stop().await.unwrap();
        assert_eq!(recorded.status, 200);

        let player =
            CassetteTransport::new(dir.path(), "TestMonitor", RecordMode::Replay, None).unwrap();
        assert_eq!(player.remaining().await, 1);
        let replayed = player.send(monitor_get()).await.unwrap();
        assert_eq!(replayed.body, r#"{"id":5}"#);

        let err = player.send(monitor_get()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cassette(CassetteError::NoMatch { .. })));
    }

    #[tokio::test]
    async fn test_replay_requires_cassette() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = CassetteTransport::new(dir.path(), "Nope", RecordMode::Replay, None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_passthrough_does_not_write() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut network = MockTransport::new();
        network
            .expect_send()
            .returning(|_| Ok(ApiResponse::new(204, "")));

        let transport = CassetteTransport::new(
            dir.path(),
            "TestPassthrough",
            RecordMode::Passthrough,
            Some(Arc::new(network)),
        )
        .unwrap();
        transport.send(monitor_get()).await.unwrap();
        transport.stop().await.unwrap();

        assert!(!Cassette::path_for(dir.path(), "TestPassthrough").exists());
    }
}
