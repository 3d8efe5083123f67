//! Usage: Single-flight refresh coordination; one in-flight token refresh
//! serves every concurrent 401.

pub mod token_exchange;

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::credentials::CredentialStore;
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::mask_token;
use token_exchange::TokenRefresher;

/// Why a refresh did not produce a usable access token. Clone so one outcome
/// can fan out to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("token endpoint rejected the refresh: {0}")]
    Rejected(String),

    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    #[error("token endpoint response invalid: {0}")]
    InvalidResponse(String),

    #[error("refresh outcome channel closed")]
    OutcomeChannelClosed,
}

enum RefreshState {
    Idle,
    InFlight {
        waiters: Vec<oneshot::Sender<Result<String, RefreshError>>>,
    },
}

/// Held by the initiating caller for the whole in-flight window. If the
/// initiator unwinds or is dropped before fan-out, the guard restores `Idle`
/// and drops the queued senders, so every waiter observes a closed channel
/// instead of waiting on an outcome that will never arrive.
struct InitiatorGuard<'a> {
    state: &'a Mutex<RefreshState>,
    armed: bool,
}

impl<'a> InitiatorGuard<'a> {
    fn new(state: &'a Mutex<RefreshState>) -> Self {
        Self { state, armed: true }
    }

    /// Swaps the coordinator back to `Idle` and hands over the waiter list.
    fn take_waiters(&mut self) -> Vec<oneshot::Sender<Result<String, RefreshError>>> {
        self.armed = false;
        let mut state = self.state.lock_or_recover();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::InFlight { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }
}

impl Drop for InitiatorGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            drop(self.take_waiters());
        }
    }
}

/// Serializes credential refreshes. The first caller to find the coordinator
/// idle drives the refresh; everyone arriving while it is in flight waits for
/// the same outcome instead of issuing another token request.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Resolves once the current (or a newly started) refresh settles.
    /// On success the returned access token is already in the store.
    pub async fn request_refresh(&self) -> Result<String, RefreshError> {
        // Enqueue-and-check happens under one lock acquisition, so a caller
        // either joins the in-flight refresh or becomes the sole initiator.
        let waiter = {
            let mut state = self.state.lock_or_recover();
            match &mut *state {
                RefreshState::InFlight { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RefreshState::Idle => {
                    *state = RefreshState::InFlight {
                        waiters: Vec::new(),
                    };
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(RefreshError::OutcomeChannelClosed),
            };
        }

        let mut guard = InitiatorGuard::new(&self.state);
        let outcome = self.execute_refresh().await;

        // Back to Idle before fan-out; callers arriving from here on start a
        // fresh cycle instead of receiving this outcome.
        for waiter in guard.take_waiters() {
            let _ = waiter.send(outcome.clone());
        }

        outcome
    }

    async fn execute_refresh(&self) -> Result<String, RefreshError> {
        let Some(refresh_token) = self.store.refresh_token() else {
            // Nothing to refresh with: the stored credential is unusable.
            self.store.clear();
            tracing::warn!("credential refresh skipped: no refresh token in store");
            return Err(RefreshError::NoRefreshToken);
        };

        match self.refresher.refresh(&refresh_token).await {
            Ok(token_set) => {
                self.store
                    .apply_refresh(&token_set.access_token, token_set.refresh_token.as_deref());
                tracing::info!(
                    access_token = %mask_token(&token_set.access_token),
                    rotated_refresh_token = token_set.refresh_token.is_some(),
                    "credential refresh succeeded"
                );
                Ok(token_set.access_token)
            }
            Err(err) => {
                self.store.clear();
                tracing::warn!("credential refresh failed, clearing stored credential: {}", err);
                Err(err)
            }
        }
    }
}
