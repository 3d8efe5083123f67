//! Usage: Centralized relay error-code enum for stable classification/mapping.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayErrorCode {
    Unauthenticated,
    RefreshFailed,
    NotFound,
    Backend5xx,
    Backend4xx,
    Timeout,
    ConnectFailed,
    TransportError,
    InvalidBaseUrl,
    HttpClientInit,
}

impl RelayErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "RELAY_UNAUTHENTICATED",
            Self::RefreshFailed => "RELAY_REFRESH_FAILED",
            Self::NotFound => "RELAY_NOT_FOUND",
            Self::Backend5xx => "RELAY_BACKEND_5XX",
            Self::Backend4xx => "RELAY_BACKEND_4XX",
            Self::Timeout => "RELAY_TIMEOUT",
            Self::ConnectFailed => "RELAY_CONNECT_FAILED",
            Self::TransportError => "RELAY_TRANSPORT_ERROR",
            Self::InvalidBaseUrl => "RELAY_INVALID_BASE_URL",
            Self::HttpClientInit => "RELAY_HTTP_CLIENT_INIT",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "RELAY_UNAUTHENTICATED" => Self::Unauthenticated,
            "RELAY_REFRESH_FAILED" => Self::RefreshFailed,
            "RELAY_NOT_FOUND" => Self::NotFound,
            "RELAY_BACKEND_5XX" => Self::Backend5xx,
            "RELAY_BACKEND_4XX" => Self::Backend4xx,
            "RELAY_TIMEOUT" => Self::Timeout,
            "RELAY_CONNECT_FAILED" => Self::ConnectFailed,
            "RELAY_TRANSPORT_ERROR" => Self::TransportError,
            "RELAY_INVALID_BASE_URL" => Self::InvalidBaseUrl,
            "RELAY_HTTP_CLIENT_INIT" => Self::HttpClientInit,
            _ => return None,
        })
    }

    /// True when the code means the stored credential is unusable and a
    /// display layer should route to sign-in rather than an error page.
    pub const fn is_auth_failure(self) -> bool {
        matches!(self, Self::Unauthenticated | Self::RefreshFailed)
    }
}
