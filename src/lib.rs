//! Attaches bearer credentials to outbound requests, intercepts 401s, and
//! coordinates a single-flight token refresh shared by every concurrent
//! caller before resending each affected request exactly once.

mod config;
mod credentials;
mod dispatch;
mod events;
mod refresh;
mod shared;
pub mod test_support;

pub use config::{
    AuthRelay, RelayConfig, SetupError, DEFAULT_EVENT_CAPACITY, DEFAULT_FIRST_BYTE_TIMEOUT,
};
pub use credentials::{Credential, CredentialStore};
pub use dispatch::error_code::RelayErrorCode;
pub use dispatch::errors::DispatchError;
pub use dispatch::types::ApiRequest;
pub use dispatch::Dispatcher;
pub use events::{FailureRecord, RedirectEvent, RelayEvent};
pub use refresh::token_exchange::{HttpTokenRefresher, TokenRefresher, TokenSet};
pub use refresh::{RefreshCoordinator, RefreshError};
