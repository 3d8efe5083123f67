//! Usage: Single outbound send with bearer injection and first-byte timeout.

use bytes::Bytes;
use reqwest::Method;
use std::time::Duration;

pub(super) enum SendResult {
    Ok(reqwest::Response),
    Err(reqwest::Error),
    Timeout,
}

/// Sends exactly one request. Transport errors are returned to the caller
/// untouched; retry policy lives in the dispatch loop.
pub(super) async fn send_once(
    client: &reqwest::Client,
    method: Method,
    url: reqwest::Url,
    bearer: Option<&str>,
    body: Option<Bytes>,
    first_byte_timeout: Duration,
) -> SendResult {
    let mut builder = client.request(method, url);
    if let Some(token) = bearer {
        builder = builder.bearer_auth(token);
    }
    if let Some(body) = body {
        builder = builder.body(body);
    }

    match tokio::time::timeout(first_byte_timeout, builder.send()).await {
        Ok(Ok(resp)) => SendResult::Ok(resp),
        Ok(Err(err)) => SendResult::Err(err),
        Err(_) => SendResult::Timeout,
    }
}
