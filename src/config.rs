//! Usage: Relay configuration and composition root (shared client, store,
//! coordinator, event channel).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::credentials::CredentialStore;
use crate::dispatch::error_code::RelayErrorCode;
use crate::dispatch::Dispatcher;
use crate::events::RelayEvent;
use crate::refresh::token_exchange::TokenRefresher;
use crate::refresh::RefreshCoordinator;

pub const DEFAULT_FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long a dispatcher waits for the first response byte.
    pub first_byte_timeout: Duration,
    /// Buffer of the failure/redirect broadcast channel; slow subscribers
    /// lag rather than block dispatch.
    pub event_capacity: usize,
    pub user_agent: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            first_byte_timeout: DEFAULT_FIRST_BYTE_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            user_agent: format!("authrelay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RelayConfig {
    pub fn with_first_byte_timeout(mut self, timeout: Duration) -> Self {
        self.first_byte_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("http client init failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

impl SetupError {
    pub fn code(&self) -> RelayErrorCode {
        match self {
            Self::HttpClientInit(_) => RelayErrorCode::HttpClientInit,
            Self::InvalidBaseUrl { .. } => RelayErrorCode::InvalidBaseUrl,
        }
    }
}

/// Composition root. Owns everything the dispatchers share and hands out
/// per-backend dispatchers bound to it.
pub struct AuthRelay {
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    events: broadcast::Sender<RelayEvent>,
    client: reqwest::Client,
    first_byte_timeout: Duration,
}

impl AuthRelay {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        config: RelayConfig,
    ) -> Result<Self, SetupError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(SetupError::HttpClientInit)?;

        let store = Arc::new(CredentialStore::new());
        let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), refresher));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            store,
            coordinator,
            events,
            client,
            first_byte_timeout: config.first_byte_timeout,
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Builds a dispatcher for one backend. The base URL is validated here so
    /// a bad configuration fails at startup instead of on every request.
    pub fn dispatcher(
        &self,
        identity: impl Into<String>,
        base_url: &str,
    ) -> Result<Dispatcher, SetupError> {
        let url = reqwest::Url::parse(base_url.trim()).map_err(|e| SetupError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(SetupError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "not a base url".to_string(),
            });
        }

        Ok(Dispatcher::new(
            identity.into(),
            url,
            self.client.clone(),
            self.first_byte_timeout,
            self.store.clone(),
            self.coordinator.clone(),
            self.events.clone(),
        ))
    }
}
