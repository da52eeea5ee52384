//! Team lifecycle replayed from a committed cassette.
//!
//! Re-record with `RECORD=true DD_TEST_CLIENT_API_KEY=... DD_TEST_CLIENT_APP_KEY=...`.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;

use terraform_provider_datadog::client::{DatadogClient, HttpTransport, RetryPolicy, Transport};
use terraform_provider_datadog::provider::{Provider, ProviderConfiguration, ResolvedSettings};
use terraform_provider_datadog::reconciler::Reconciler;
use terraform_provider_datadog::state::{LocalStateStore, StateStore};
use terraform_provider_datadog::vcr::{
    build_id, precheck, unique_entity_name, CassetteTransport, RecordMode, TestClock,
};

use common::{cassette_dir, cassette_mode, team_workspace};

const TEST_NAME: &str = "TestAccDatadogTeam_Basic";

fn provider_meta(transport: Arc<CassetteTransport>, mode: RecordMode) -> ProviderConfiguration {
    let credentials = precheck(mode).unwrap();
    let settings = ResolvedSettings {
        api_key: Some(credentials.api_key),
        app_key: Some(credentials.app_key),
        api_url: credentials.api_url,
        validate: false,
        retry: RetryPolicy::disabled(),
        default_tags: BTreeMap::new(),
    };
    let client = DatadogClient::new(
        transport,
        &settings.api_url,
        settings.api_key.clone(),
        settings.app_key.clone(),
    )
    .with_retry(settings.retry.clone());
    ProviderConfiguration::from_client(client, settings)
}

#[tokio::test]
async fn test_team_lifecycle_from_cassette() {
    let mode = cassette_mode();
    let dir = cassette_dir();
    let clock = TestClock::for_test(&dir, TEST_NAME, mode).unwrap();
    let name = unique_entity_name(&clock, TEST_NAME, &build_id(mode));
    if mode == RecordMode::Replay {
        assert_eq!(name, "tf-TestAccDatadogTeam_Basic-local-1792402200");
    }

    let network: Option<Arc<dyn Transport>> = match mode {
        RecordMode::Replay => None,
        RecordMode::Record | RecordMode::Passthrough => Some(Arc::new(HttpTransport::new().unwrap())),
    };
    let transport = Arc::new(CassetteTransport::new(&dir, TEST_NAME, mode, network).unwrap());
    let meta = provider_meta(Arc::clone(&transport), mode);

    let state_dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(state_dir.path());
    let provider = Provider::new();
    let config = team_workspace(&name, "Created by the cassette test");

    let created = Reconciler::new(&config, &provider, &meta, &store)
        .apply()
        .await
        .unwrap();
    assert_eq!(created.created, 1);

    let state = store.load_or_default().await.unwrap();
    let team = state.get("datadog_team.core").unwrap();
    assert_eq!(team.attributes["handle"], name.as_str());
    assert_eq!(team.attributes["user_count"], 0);

    // A second apply refreshes and finds nothing to do.
    let converged = Reconciler::new(&config, &provider, &meta, &store)
        .apply()
        .await
        .unwrap();
    assert_eq!(converged.created + converged.updated + converged.deleted, 0);

    let destroyed = Reconciler::new(&config, &provider, &meta, &store)
        .destroy()
        .await
        .unwrap();
    assert_eq!(destroyed.deleted, vec!["datadog_team.core".to_string()]);

    if mode == RecordMode::Replay {
        assert_eq!(transport.remaining().await, 0);
    }
    transport.stop().await.unwrap();
}
