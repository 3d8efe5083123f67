mod support;

use std::sync::Arc;
use std::time::Duration;

use authrelay::test_support::{StubRefresher, REFRESHED_ACCESS_TOKEN};
use authrelay::{ApiRequest, Credential, DispatchError, RefreshError, RelayConfig, RelayEvent};
use bytes::Bytes;
use support::{
    drain_events, expired_credential, response_json, stub_relay, stub_relay_with_config,
    valid_credential, TestStack,
};

#[tokio::test]
async fn valid_credential_passes_through_without_refresh() {
    let stack = TestStack::new("HQ").await;
    stack.relay.store().set(valid_credential());
    let dispatcher = stack.dispatcher();

    let resp = dispatcher
        .send(ApiRequest::get("/summary"))
        .await
        .expect("send");
    assert_eq!(resp.status().as_u16(), 200);

    let body = response_json(resp).await;
    assert_eq!(body["backend"], "HQ");
    assert_eq!(body["path"], "/summary");
    assert_eq!(body["token"], "valid-access");

    assert_eq!(stack.auth.refresh_calls(), 0);
    assert_eq!(stack.backend.request_count(), 1);

    stack.backend.shutdown().await;
    stack.auth.shutdown().await;
}

#[tokio::test]
async fn missing_credential_fails_fast_without_retry() {
    let stack = TestStack::new("Client").await;
    let dispatcher = stack.dispatcher();
    let mut events = stack.relay.subscribe();

    let err = dispatcher
        .send(ApiRequest::get("/inbox"))
        .await
        .unwrap_err();
    let DispatchError::RefreshFailed { backend, reason } = err else {
        panic!("expected RefreshFailed, got {err:?}");
    };
    assert_eq!(backend, "Client");
    assert!(reason.contains("no refresh token"));

    // The coordinator bailed before any token request went out, and the one
    // rejected send was never retried.
    assert_eq!(stack.auth.refresh_calls(), 0);
    assert_eq!(stack.backend.request_count(), 1);
    assert!(stack.relay.store().get().is_empty());

    let events = drain_events(&mut events);
    assert_eq!(events.len(), 1);
    let failure = events[0].as_failure().expect("failure record");
    assert_eq!(failure.error_code, "RELAY_REFRESH_FAILED");
    assert_eq!(failure.status, None);
}

#[tokio::test]
async fn not_found_override_reports_and_redirects() {
    let stack = TestStack::new("Vendor-ERP").await;
    stack.relay.store().set(valid_credential());
    let dispatcher = stack.dispatcher();
    let mut events = stack.relay.subscribe();

    let err = dispatcher
        .send(ApiRequest::get("/orders").with_query("status=404"))
        .await
        .unwrap_err();
    let DispatchError::NotFound { backend, target } = err else {
        panic!("expected NotFound, got {err:?}");
    };
    assert_eq!(backend, "Vendor-ERP");
    assert_eq!(target, "/orders?status=404");
    assert_eq!(stack.auth.refresh_calls(), 0);

    let events = drain_events(&mut events);
    let failure = events
        .iter()
        .find_map(RelayEvent::as_failure)
        .expect("failure record");
    assert_eq!(failure.status, Some(404));
    assert_eq!(failure.error_code, "RELAY_NOT_FOUND");

    let redirect = events
        .iter()
        .find_map(RelayEvent::as_redirect)
        .expect("redirect event");
    assert_eq!(redirect.status, 404);
    assert_eq!(redirect.backend, "Vendor-ERP");
}

#[tokio::test]
async fn server_error_is_terminal_without_refresh() {
    let stack = TestStack::new("HQ").await;
    stack.relay.store().set(valid_credential());
    let dispatcher = stack.dispatcher();
    let mut events = stack.relay.subscribe();

    let err = dispatcher
        .send(ApiRequest::get("/summary").with_query("status=500"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ServerError { status: 500, .. }));

    assert_eq!(stack.auth.refresh_calls(), 0);
    assert_eq!(stack.backend.request_count(), 1);

    let events = drain_events(&mut events);
    let redirect = events
        .iter()
        .find_map(RelayEvent::as_redirect)
        .expect("redirect event");
    assert_eq!(redirect.status, 500);
}

#[tokio::test]
async fn requests_after_recovery_use_the_refreshed_token() {
    let stack = TestStack::new("HQ").await;
    stack.relay.store().set(expired_credential());
    let dispatcher = stack.dispatcher();

    let first = dispatcher
        .send(ApiRequest::get("/summary"))
        .await
        .expect("recovered send");
    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(stack.auth.refresh_calls(), 1);

    let second = dispatcher
        .send(ApiRequest::get("/inbox"))
        .await
        .expect("fresh send");
    let body = response_json(second).await;
    assert_eq!(body["token"], REFRESHED_ACCESS_TOKEN);

    // The fresh request reads the refreshed store; no new refresh cycle.
    assert_eq!(stack.auth.refresh_calls(), 1);
    assert_eq!(stack.backend.request_count(), 3);
}

#[tokio::test]
async fn refresh_without_refresh_token_clears_store_without_io() {
    let stack = TestStack::new("HQ").await;
    stack.relay.store().set(Credential {
        access_token: Some("token-expired".into()),
        refresh_token: None,
    });

    let err = stack
        .relay
        .coordinator()
        .request_refresh()
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::NoRefreshToken));
    assert_eq!(stack.auth.refresh_calls(), 0);
    assert!(stack.relay.store().get().is_empty());
}

#[tokio::test]
async fn post_body_survives_the_refresh_resend() {
    let stack = TestStack::new("HQ").await;
    stack.relay.store().set(expired_credential());
    let dispatcher = stack.dispatcher();

    let resp = dispatcher
        .send(ApiRequest::post("/orders", Bytes::from_static(b"{\"sku\":1}")))
        .await
        .expect("send");
    assert_eq!(resp.status().as_u16(), 200);

    let body = response_json(resp).await;
    assert_eq!(body["token"], REFRESHED_ACCESS_TOKEN);
    assert_eq!(body["body"], "{\"sku\":1}");
    assert_eq!(stack.auth.refresh_calls(), 1);
    assert_eq!(stack.backend.request_count(), 2);
}

#[tokio::test]
async fn connection_failure_is_terminal_transport_error() {
    let relay = stub_relay(Arc::new(StubRefresher::succeeding("unused")));
    relay.store().set(valid_credential());

    // Bind then drop to get a port nothing is listening on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind throwaway port");
    let base_url = format!("http://{}", listener.local_addr().expect("throwaway addr"));
    drop(listener);

    let dispatcher = relay
        .dispatcher("HQ", &base_url)
        .expect("build dispatcher");
    let mut events = relay.subscribe();

    let err = dispatcher
        .send(ApiRequest::get("/summary"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Transport { .. }));

    let events = drain_events(&mut events);
    let failure = events
        .iter()
        .find_map(RelayEvent::as_failure)
        .expect("failure record");
    assert_eq!(failure.error_code, "RELAY_CONNECT_FAILED");
    assert_eq!(failure.status, None);
    // No HTTP status came back, so there is nothing to redirect with.
    assert!(events.iter().all(|e| e.as_redirect().is_none()));
}

#[tokio::test]
async fn first_byte_timeout_is_terminal_transport_error() {
    let refresher = Arc::new(StubRefresher::succeeding("unused"));
    let relay = stub_relay_with_config(
        refresher.clone(),
        RelayConfig::default().with_first_byte_timeout(Duration::from_millis(100)),
    );
    relay.store().set(valid_credential());

    // Accepts connections but never writes a byte back.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind silent listener");
    let base_url = format!("http://{}", listener.local_addr().expect("silent addr"));
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let dispatcher = relay
        .dispatcher("HQ", &base_url)
        .expect("build dispatcher");
    let mut events = relay.subscribe();

    let err = dispatcher
        .send(ApiRequest::get("/summary"))
        .await
        .unwrap_err();
    let DispatchError::Transport { backend, reason } = err else {
        panic!("expected Transport, got {err:?}");
    };
    assert_eq!(backend, "HQ");
    assert!(reason.contains("first-byte timeout"));

    // The stalled send is terminal: no refresh cycle, no second attempt.
    assert_eq!(refresher.calls(), 0);

    let events = drain_events(&mut events);
    let failure = events
        .iter()
        .find_map(RelayEvent::as_failure)
        .expect("failure record");
    assert_eq!(failure.error_code, "RELAY_TIMEOUT");
    assert_eq!(failure.status, None);
    assert!(events.iter().all(|e| e.as_redirect().is_none()));
}
