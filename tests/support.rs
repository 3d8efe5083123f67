use std::sync::Arc;

use authrelay::test_support::{
    init_test_logging, spawn_backend, spawn_token_endpoint, MockBackend, MockTokenEndpoint,
    StubRefresher,
};
use authrelay::{AuthRelay, Credential, Dispatcher, HttpTokenRefresher, RelayConfig, RelayEvent};

/// One relay wired to a mock token endpoint plus one mock business backend.
pub struct TestStack {
    pub identity: String,
    pub relay: AuthRelay,
    pub backend: MockBackend,
    pub auth: MockTokenEndpoint,
}

impl TestStack {
    pub async fn new(identity: &str) -> Self {
        init_test_logging();

        let backend = spawn_backend(identity).await.expect("spawn mock backend");
        let auth = spawn_token_endpoint().await.expect("spawn token endpoint");
        let refresher =
            HttpTokenRefresher::new(reqwest::Client::new(), auth.token_url(), "relay-client");
        let relay =
            AuthRelay::new(Arc::new(refresher), RelayConfig::default()).expect("build relay");

        Self {
            identity: identity.to_string(),
            relay,
            backend,
            auth,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.relay
            .dispatcher(&self.identity, self.backend.base_url())
            .expect("build dispatcher")
    }

    /// Second backend served by the same relay (same store and coordinator).
    #[allow(dead_code)]
    pub async fn add_backend(&self, identity: &str) -> (MockBackend, Dispatcher) {
        let backend = spawn_backend(identity).await.expect("spawn mock backend");
        let dispatcher = self
            .relay
            .dispatcher(identity, backend.base_url())
            .expect("build dispatcher");
        (backend, dispatcher)
    }
}

/// Relay whose refresher is an in-memory stub instead of an HTTP endpoint.
#[allow(dead_code)]
pub fn stub_relay(refresher: Arc<StubRefresher>) -> AuthRelay {
    stub_relay_with_config(refresher, RelayConfig::default())
}

#[allow(dead_code)]
pub fn stub_relay_with_config(refresher: Arc<StubRefresher>, config: RelayConfig) -> AuthRelay {
    init_test_logging();
    AuthRelay::new(refresher, config).expect("build relay")
}

/// Access token carries the sentinel, so the first send draws a 401.
pub fn expired_credential() -> Credential {
    Credential::new("token-expired", "refresh-1")
}

#[allow(dead_code)]
pub fn valid_credential() -> Credential {
    Credential::new("valid-access", "refresh-1")
}

pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn response_json(resp: reqwest::Response) -> serde_json::Value {
    let body = resp.text().await.expect("read response body");
    serde_json::from_str(&body).expect("parse response json")
}
