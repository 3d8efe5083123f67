//! Usage: Broadcast events surfaced to display layers (failure records and redirects).

use serde::Serialize;

/// Diagnostic record emitted for every terminal request failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub backend: String,
    /// HTTP status of the failing response, absent for transport and
    /// refresh failures.
    pub status: Option<u16>,
    /// Path plus query of the request that failed.
    pub target: String,
    pub error_code: &'static str,
}

/// Instruction for a display layer to route to its error surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectEvent {
    pub status: u16,
    pub backend: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RelayEvent {
    Failure(FailureRecord),
    Redirect(RedirectEvent),
}

impl RelayEvent {
    pub fn as_redirect(&self) -> Option<&RedirectEvent> {
        match self {
            Self::Redirect(redirect) => Some(redirect),
            Self::Failure(_) => None,
        }
    }

    pub fn as_failure(&self) -> Option<&FailureRecord> {
        match self {
            Self::Failure(record) => Some(record),
            Self::Redirect(_) => None,
        }
    }
}
