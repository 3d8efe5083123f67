//! Usage: In-process mock backends and refresher doubles for integration tests.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::refresh::token_exchange::{TokenRefresher, TokenSet};
use crate::refresh::RefreshError;
use crate::shared::mutex_ext::MutexExt;

/// Bearer values containing this substring are rejected with 401.
pub const EXPIRED_TOKEN_SENTINEL: &str = "expired";
/// Access token every successful mock refresh hands out.
pub const REFRESHED_ACCESS_TOKEN: &str = "new-access-token";
/// Fixed latency of a successful mock refresh, long enough for concurrent
/// 401 handlers to pile onto the same in-flight refresh.
pub const REFRESH_DELAY: Duration = Duration::from_millis(25);

struct ServerHandle {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn spawn_app(app: Router) -> std::io::Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = serve.await {
            tracing::error!("mock server stopped with error: {}", err);
        }
    });

    Ok(ServerHandle {
        base_url: format!("http://{addr}"),
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

#[derive(Clone)]
struct BackendState {
    identity: String,
    requests: Arc<AtomicUsize>,
}

#[derive(Deserialize)]
struct StatusOverride {
    status: Option<u16>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Catch-all business route: rejects absent or expired bearers with 401,
/// honors a `status` query override, otherwise echoes what it saw.
async fn backend_handler(
    State(state): State<BackendState>,
    Query(params): Query<StatusOverride>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let token = bearer_token(&headers);
    let authorized = token
        .as_deref()
        .is_some_and(|t| !t.contains(EXPIRED_TOKEN_SENTINEL));
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_token"})),
        )
            .into_response();
    }

    if let Some(forced) = params
        .status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .filter(|s| s.is_client_error() || s.is_server_error())
    {
        return (
            forced,
            Json(json!({"error": "forced status", "status": forced.as_u16()})),
        )
            .into_response();
    }

    Json(json!({
        "backend": state.identity,
        "path": uri.path(),
        "token": token,
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response()
}

/// One fake business backend bound to an ephemeral localhost port.
pub struct MockBackend {
    server: ServerHandle,
    requests: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn base_url(&self) -> &str {
        &self.server.base_url
    }

    /// Total requests seen, including ones that were rejected with 401.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

pub async fn spawn_backend(identity: &str) -> std::io::Result<MockBackend> {
    let requests = Arc::new(AtomicUsize::new(0));
    let state = BackendState {
        identity: identity.to_string(),
        requests: requests.clone(),
    };
    let app = Router::new().fallback(backend_handler).with_state(state);
    let server = spawn_app(app).await?;
    Ok(MockBackend { server, requests })
}

#[derive(Clone)]
struct TokenEndpointState {
    refresh_calls: Arc<AtomicUsize>,
    last_form: Arc<Mutex<Option<TokenRequestForm>>>,
}

/// Form fields the mock token endpoint saw on a refresh request.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequestForm {
    pub grant_type: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Token endpoint stand-in: succeeds after a fixed delay when a refresh
/// token is supplied, fails immediately with invalid_grant otherwise.
async fn token_handler(
    State(state): State<TokenEndpointState>,
    Form(form): Form<TokenRequestForm>,
) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_form.lock_or_recover() = Some(form.clone());

    if form.grant_type.as_deref() != Some("refresh_token") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        )
            .into_response();
    }

    let has_refresh_token = form
        .refresh_token
        .as_deref()
        .map(str::trim)
        .is_some_and(|v| !v.is_empty());
    if !has_refresh_token {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "refresh token is required"
            })),
        )
            .into_response();
    }

    tokio::time::sleep(REFRESH_DELAY).await;
    Json(json!({
        "access_token": REFRESHED_ACCESS_TOKEN,
        "token_type": "Bearer",
        "expires_in": 3600
    }))
    .into_response()
}

/// Fake OAuth token endpoint with a call counter.
pub struct MockTokenEndpoint {
    server: ServerHandle,
    refresh_calls: Arc<AtomicUsize>,
    last_form: Arc<Mutex<Option<TokenRequestForm>>>,
}

impl MockTokenEndpoint {
    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.server.base_url)
    }

    /// Requests the endpoint received, successful or not.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Form fields of the most recent token request, if any arrived.
    pub fn last_form(&self) -> Option<TokenRequestForm> {
        self.last_form.lock_or_recover().clone()
    }

    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

pub async fn spawn_token_endpoint() -> std::io::Result<MockTokenEndpoint> {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let last_form = Arc::new(Mutex::new(None));
    let state = TokenEndpointState {
        refresh_calls: refresh_calls.clone(),
        last_form: last_form.clone(),
    };
    let app = Router::new()
        .route("/oauth/token", post(token_handler))
        .with_state(state);
    let server = spawn_app(app).await?;
    Ok(MockTokenEndpoint {
        server,
        refresh_calls,
        last_form,
    })
}

/// Scriptable in-memory refresher for coordinator and dispatcher tests.
pub struct StubRefresher {
    access_token: String,
    rotated_refresh_token: Option<String>,
    failure: Option<RefreshError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubRefresher {
    pub fn succeeding(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            rotated_refresh_token: None,
            failure: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(failure: RefreshError) -> Self {
        Self {
            access_token: String::new(),
            rotated_refresh_token: None,
            failure: Some(failure),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_rotated_refresh_token(mut self, token: &str) -> Self {
        self.rotated_refresh_token = Some(token.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for StubRefresher {
    fn refresh(
        &self,
        _refresh_token: &str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenSet, RefreshError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let outcome = match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(TokenSet {
                access_token: self.access_token.clone(),
                refresh_token: self.rotated_refresh_token.clone(),
            }),
        };
        let delay = self.delay;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }
}

/// Installs a test-writer tracing subscriber; safe to call repeatedly.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,authrelay=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
