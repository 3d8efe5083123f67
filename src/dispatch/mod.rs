//! Usage: Request dispatch loop (credential attach, 401 interception, one
//! coordinated refresh-and-resend).

pub(crate) mod error_code;
pub(crate) mod errors;
mod send;
pub(crate) mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::credentials::CredentialStore;
use crate::events::{FailureRecord, RedirectEvent, RelayEvent};
use crate::refresh::RefreshCoordinator;
use error_code::RelayErrorCode;
use errors::{
    classify_reqwest_error, classify_upstream_status, status_failure, DispatchError, FailureAction,
};
use send::{send_once, SendResult};
use types::ApiRequest;

/// Sends requests to one backend, attaching the shared bearer credential.
/// All dispatchers created by the same relay share the credential store, the
/// refresh coordinator, and the event channel.
pub struct Dispatcher {
    identity: String,
    base_url: reqwest::Url,
    client: reqwest::Client,
    first_byte_timeout: Duration,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    events: broadcast::Sender<RelayEvent>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identity: String,
        base_url: reqwest::Url,
        client: reqwest::Client,
        first_byte_timeout: Duration,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        events: broadcast::Sender<RelayEvent>,
    ) -> Self {
        Self {
            identity,
            base_url,
            client,
            first_byte_timeout,
            store,
            coordinator,
            events,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Sends the request with the stored access token attached. A 401 on an
    /// unretried request triggers one coordinated refresh and one resend; the
    /// outcome of that resend is final. Every other failure is terminal.
    pub async fn send(&self, request: ApiRequest) -> Result<reqwest::Response, DispatchError> {
        let mut request = request;
        let mut refreshed_token: Option<String> = None;

        loop {
            let target = request.target();
            let url = match build_target_url(&self.base_url, &request.path, request.query.as_deref())
            {
                Ok(url) => url,
                Err(reason) => {
                    let err = DispatchError::Transport {
                        backend: self.identity.clone(),
                        reason,
                    };
                    self.report_failure(RelayErrorCode::TransportError, None, &target, &err);
                    return Err(err);
                }
            };

            // The resend uses the token the coordinator handed back, not a
            // fresh store read; a concurrent clear cannot strip the retry.
            let bearer = match refreshed_token.as_deref() {
                Some(token) => Some(token.to_string()),
                None => self.store.access_token(),
            };

            let result = send_once(
                &self.client,
                request.method.clone(),
                url,
                bearer.as_deref(),
                request.body.clone(),
                self.first_byte_timeout,
            )
            .await;

            match result {
                SendResult::Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }

                    let (code, action) = classify_upstream_status(status);
                    if action == FailureAction::RefreshAndRetry && !request.retried() {
                        request = request.into_retried();
                        match self.coordinator.request_refresh().await {
                            Ok(token) => {
                                tracing::info!(
                                    backend = %self.identity,
                                    target = %target,
                                    "credential refreshed after 401; resending once"
                                );
                                refreshed_token = Some(token);
                                continue;
                            }
                            Err(refresh_err) => {
                                let err = DispatchError::RefreshFailed {
                                    backend: self.identity.clone(),
                                    reason: refresh_err.to_string(),
                                };
                                self.report_failure(
                                    RelayErrorCode::RefreshFailed,
                                    None,
                                    &target,
                                    &err,
                                );
                                return Err(err);
                            }
                        }
                    }

                    let err = status_failure(&self.identity, &target, status);
                    self.report_failure(code, Some(status.as_u16()), &target, &err);
                    return Err(err);
                }
                SendResult::Err(send_err) => {
                    let code = classify_reqwest_error(&send_err);
                    let err = DispatchError::Transport {
                        backend: self.identity.clone(),
                        reason: send_err.to_string(),
                    };
                    self.report_failure(code, None, &target, &err);
                    return Err(err);
                }
                SendResult::Timeout => {
                    let err = DispatchError::Transport {
                        backend: self.identity.clone(),
                        reason: format!(
                            "first-byte timeout after {}ms",
                            self.first_byte_timeout.as_millis()
                        ),
                    };
                    self.report_failure(RelayErrorCode::Timeout, None, &target, &err);
                    return Err(err);
                }
            }
        }
    }

    /// One structured log line, one failure record, and a redirect event when
    /// an error status other than 401 came back from the backend.
    fn report_failure(
        &self,
        code: RelayErrorCode,
        status: Option<u16>,
        target: &str,
        err: &DispatchError,
    ) {
        tracing::warn!(
            backend = %self.identity,
            target = %target,
            status = ?status,
            error_code = code.as_str(),
            "request failed: {}",
            err
        );

        let _ = self.events.send(RelayEvent::Failure(FailureRecord {
            backend: self.identity.clone(),
            status,
            target: target.to_string(),
            error_code: code.as_str(),
        }));

        if let Some(status) = status.filter(|s| *s >= 400 && *s != 401) {
            let _ = self.events.send(RelayEvent::Redirect(RedirectEvent {
                status,
                backend: self.identity.clone(),
            }));
        }
    }
}

/// Joins the validated base URL with a request path and optional query.
pub(crate) fn build_target_url(
    base: &reqwest::Url,
    path: &str,
    query: Option<&str>,
) -> Result<reqwest::Url, String> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut url = reqwest::Url::parse(&joined)
        .map_err(|e| format!("invalid request target {joined:?}: {e}"))?;
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.set_query(Some(query));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::build_target_url;

    fn base(url: &str) -> reqwest::Url {
        reqwest::Url::parse(url).unwrap()
    }

    #[test]
    fn build_target_url_joins_path() {
        let url = build_target_url(&base("http://127.0.0.1:4567"), "/summary", None).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:4567/summary");
    }

    #[test]
    fn build_target_url_tolerates_trailing_and_missing_slashes() {
        let url = build_target_url(&base("http://host/api/"), "v2/items", None).unwrap();
        assert_eq!(url.as_str(), "http://host/api/v2/items");
    }

    #[test]
    fn build_target_url_appends_query() {
        let url =
            build_target_url(&base("http://host"), "/orders", Some("status=404")).unwrap();
        assert_eq!(url.as_str(), "http://host/orders?status=404");
    }

    #[test]
    fn build_target_url_ignores_empty_query() {
        let url = build_target_url(&base("http://host"), "/orders", Some("")).unwrap();
        assert_eq!(url.query(), None);
    }
}
