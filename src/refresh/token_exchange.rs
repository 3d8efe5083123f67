//! Usage: Token endpoint client for the refresh_token grant, with response
//! parsing and sensitive-field redaction for error forensics.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::RefreshError;
use crate::shared::security::mask_token;

/// Outcome of a successful refresh. `refresh_token` is present only when the
/// endpoint rotated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for a new token set.
///
/// Object-safe so the coordinator can hold it behind `Arc<dyn TokenRefresher>`
/// and tests can substitute a double that never touches the network.
pub trait TokenRefresher: Send + Sync {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenSet, RefreshError>> + Send + '_>>;
}

/// Real token endpoint client. Posts the standard OAuth refresh_token form
/// and parses the JSON response.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl HttpTokenRefresher {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenSet, RefreshError>> + Send + '_>> {
        let client = self.client.clone();
        let token_url = self.token_url.trim().to_string();

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "refresh_token".to_string());
        form.insert("refresh_token", refresh_token.trim().to_string());
        form.insert("client_id", self.client_id.trim().to_string());
        if let Some(secret) = self.client_secret.as_deref().map(str::trim) {
            if !secret.is_empty() {
                form.insert("client_secret", secret.to_string());
            }
        }

        Box::pin(async move {
            let response = client
                .post(&token_url)
                .form(&form)
                .send()
                .await
                .map_err(|e| RefreshError::Transport(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| RefreshError::Transport(format!("response read failed: {e}")))?;

            parse_token_body(status, &body)
        })
    }
}

/// Parses a token endpoint response body. Split from the transport so the
/// status and error-payload handling is testable without a server.
pub(crate) fn parse_token_body(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<TokenSet, RefreshError> {
    if !status.is_success() {
        let (error_code, error_message) = parse_oauth_error_details(body);
        let snippet = sanitize_error_body_snippet(body);
        let mut msg = format!("status={}", status.as_u16());
        if let Some(code) = error_code {
            msg.push_str(" code=");
            msg.push_str(code.as_str());
        }
        if let Some(detail) = error_message {
            msg.push_str(" message=");
            msg.push_str(detail.chars().take(240).collect::<String>().as_str());
        }
        msg.push_str(" body=");
        msg.push_str(snippet.as_str());
        return Err(RefreshError::Rejected(msg));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| RefreshError::InvalidResponse(format!("json parse failed: {e}")))?;

    let access_token = value
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RefreshError::InvalidResponse("missing access_token".to_string()))?
        .to_string();

    let refresh_token = value
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    Ok(TokenSet {
        access_token,
        refresh_token,
    })
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token")
        || key_lc.contains("secret")
        || key_lc == "authorization"
        || key_lc == "proxy-authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

fn sanitize_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(500).collect();
        }
    }
    body.chars().take(500).collect()
}

fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };

    let mut code = value
        .get("code")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let mut message = value
        .get("error_description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    if let Some(error_value) = value.get("error") {
        if let Some(err_str) = error_value.as_str() {
            if code.is_none() {
                code = Some(err_str.trim().to_string());
            }
        } else if let Some(err_obj) = error_value.as_object() {
            if code.is_none() {
                code = err_obj
                    .get("code")
                    .and_then(Value::as_str)
                    .or_else(|| err_obj.get("type").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
            if message.is_none() {
                message = err_obj
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
        }
    }

    (code, message)
}
