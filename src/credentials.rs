//! Usage: Process-wide credential cell shared by dispatchers and the refresh coordinator.

use std::sync::Mutex;

use crate::shared::mutex_ext::MutexExt;

/// Bearer credential pair. Either half may be absent; values are stored
/// verbatim, no validation is applied on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Holds the single current credential. Reads and writes go through one lock
/// so no caller can observe a half-updated pair.
#[derive(Debug, Default)]
pub struct CredentialStore {
    inner: Mutex<Credential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of the current pair.
    pub fn get(&self) -> Credential {
        self.inner.lock_or_recover().clone()
    }

    /// Replaces the pair wholesale. Concurrent writers race; last write wins.
    pub fn set(&self, credential: Credential) {
        *self.inner.lock_or_recover() = credential;
    }

    pub fn clear(&self) {
        *self.inner.lock_or_recover() = Credential::default();
    }

    /// Current refresh token, normalized so blank strings count as absent.
    pub(crate) fn refresh_token(&self) -> Option<String> {
        self.inner
            .lock_or_recover()
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Current access token, normalized so blank strings count as absent.
    pub(crate) fn access_token(&self) -> Option<String> {
        self.inner
            .lock_or_recover()
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Installs a refreshed access token in one lock acquisition. The stored
    /// refresh token survives unless the token endpoint rotated it.
    pub(crate) fn apply_refresh(&self, access_token: &str, rotated_refresh_token: Option<&str>) {
        let mut guard = self.inner.lock_or_recover();
        guard.access_token = Some(access_token.to_string());
        if let Some(rotated) = rotated_refresh_token
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            guard.refresh_token = Some(rotated.to_string());
        }
    }
}
