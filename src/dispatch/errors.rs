//! Usage: Dispatch error taxonomy + classification of backend responses.

use thiserror::Error;

use super::error_code::RelayErrorCode;

/// Terminal outcome of a dispatched request. Every variant names the backend
/// identity it came from so callers can report without extra context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{backend}: still unauthorized after credential refresh")]
    Unauthenticated { backend: String },

    #[error("{backend}: credential refresh failed: {reason}")]
    RefreshFailed { backend: String, reason: String },

    #[error("{backend}: {target} not found")]
    NotFound { backend: String, target: String },

    #[error("{backend}: server error {status} for {target}")]
    ServerError {
        backend: String,
        target: String,
        status: u16,
    },

    #[error("{backend}: request rejected with {status} for {target}")]
    ClientError {
        backend: String,
        target: String,
        status: u16,
    },

    #[error("{backend}: transport failure: {reason}")]
    Transport { backend: String, reason: String },
}

impl DispatchError {
    pub fn backend(&self) -> &str {
        match self {
            Self::Unauthenticated { backend }
            | Self::RefreshFailed { backend, .. }
            | Self::NotFound { backend, .. }
            | Self::ServerError { backend, .. }
            | Self::ClientError { backend, .. }
            | Self::Transport { backend, .. } => backend,
        }
    }

    /// HTTP status carried by the failing response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthenticated { .. } => Some(401),
            Self::NotFound { .. } => Some(404),
            Self::ServerError { status, .. } | Self::ClientError { status, .. } => Some(*status),
            Self::RefreshFailed { .. } | Self::Transport { .. } => None,
        }
    }

    pub fn code(&self) -> RelayErrorCode {
        match self {
            Self::Unauthenticated { .. } => RelayErrorCode::Unauthenticated,
            Self::RefreshFailed { .. } => RelayErrorCode::RefreshFailed,
            Self::NotFound { .. } => RelayErrorCode::NotFound,
            Self::ServerError { .. } => RelayErrorCode::Backend5xx,
            Self::ClientError { .. } => RelayErrorCode::Backend4xx,
            Self::Transport { .. } => RelayErrorCode::TransportError,
        }
    }
}

/// What the dispatcher does with a non-success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAction {
    RefreshAndRetry,
    Terminal,
}

pub(crate) fn classify_reqwest_error(err: &reqwest::Error) -> RelayErrorCode {
    if err.is_timeout() {
        return RelayErrorCode::Timeout;
    }
    if err.is_connect() {
        return RelayErrorCode::ConnectFailed;
    }
    RelayErrorCode::TransportError
}

pub(crate) fn classify_upstream_status(
    status: reqwest::StatusCode,
) -> (RelayErrorCode, FailureAction) {
    if status.is_server_error() {
        return (RelayErrorCode::Backend5xx, FailureAction::Terminal);
    }

    match status.as_u16() {
        // Only 401 signals a recoverable credential problem.
        401 => (
            RelayErrorCode::Unauthenticated,
            FailureAction::RefreshAndRetry,
        ),
        404 => (RelayErrorCode::NotFound, FailureAction::Terminal),
        _ => (RelayErrorCode::Backend4xx, FailureAction::Terminal),
    }
}

/// Builds the terminal error for a non-success status. A 401 lands here only
/// after the single retry was already spent.
pub(crate) fn status_failure(
    backend: &str,
    target: &str,
    status: reqwest::StatusCode,
) -> DispatchError {
    if status.is_server_error() {
        return DispatchError::ServerError {
            backend: backend.to_string(),
            target: target.to_string(),
            status: status.as_u16(),
        };
    }

    match status.as_u16() {
        401 => DispatchError::Unauthenticated {
            backend: backend.to_string(),
        },
        404 => DispatchError::NotFound {
            backend: backend.to_string(),
            target: target.to_string(),
        },
        _ => DispatchError::ClientError {
            backend: backend.to_string(),
            target: target.to_string(),
            status: status.as_u16(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_requests_refresh_and_retry() {
        let (code, action) = classify_upstream_status(reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(code, RelayErrorCode::Unauthenticated);
        assert_eq!(action, FailureAction::RefreshAndRetry);
    }

    #[test]
    fn status_404_is_terminal() {
        let (code, action) = classify_upstream_status(reqwest::StatusCode::NOT_FOUND);
        assert_eq!(code, RelayErrorCode::NotFound);
        assert_eq!(action, FailureAction::Terminal);
    }

    #[test]
    fn status_5xx_is_terminal() {
        for status in [
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            reqwest::StatusCode::BAD_GATEWAY,
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let (code, action) = classify_upstream_status(status);
            assert_eq!(code, RelayErrorCode::Backend5xx);
            assert_eq!(action, FailureAction::Terminal);
        }
    }

    #[test]
    fn other_4xx_is_terminal() {
        for status in [
            reqwest::StatusCode::BAD_REQUEST,
            reqwest::StatusCode::FORBIDDEN,
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
        ] {
            let (code, action) = classify_upstream_status(status);
            assert_eq!(code, RelayErrorCode::Backend4xx);
            assert_eq!(action, FailureAction::Terminal);
        }
    }

    #[test]
    fn status_failure_builds_matching_variant() {
        let err = status_failure("HQ", "/orders", reqwest::StatusCode::NOT_FOUND);
        assert!(matches!(err, DispatchError::NotFound { .. }));
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.code(), RelayErrorCode::NotFound);

        let err = status_failure("HQ", "/orders", reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(err, DispatchError::ServerError { status: 500, .. }));
        assert_eq!(err.code(), RelayErrorCode::Backend5xx);

        let err = status_failure("HQ", "/orders", reqwest::StatusCode::FORBIDDEN);
        assert!(matches!(err, DispatchError::ClientError { status: 403, .. }));

        let err = status_failure("HQ", "/orders", reqwest::StatusCode::UNAUTHORIZED);
        assert!(matches!(err, DispatchError::Unauthenticated { .. }));
        assert_eq!(err.backend(), "HQ");
    }

    #[test]
    fn transport_variants_carry_no_status() {
        let err = DispatchError::Transport {
            backend: "HQ".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.status(), None);
        assert_eq!(err.code(), RelayErrorCode::TransportError);

        let err = DispatchError::RefreshFailed {
            backend: "HQ".into(),
            reason: "no refresh token".into(),
        };
        assert_eq!(err.status(), None);
        assert!(err.code().is_auth_failure());
    }
}
