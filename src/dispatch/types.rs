//! Usage: Request value handed to a dispatcher, with its one-retry marker.

use bytes::Bytes;
use reqwest::Method;

/// One outbound request. `retried` is set exactly once, when the dispatcher
/// resends after a credential refresh; there is no way to unset it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the dispatcher base URL, leading slash optional.
    pub path: String,
    pub query: Option<String>,
    pub body: Option<Bytes>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Bytes) -> Self {
        let mut request = Self::new(Method::POST, path);
        request.body = Some(body);
        request
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn into_retried(self) -> Self {
        Self {
            retried: true,
            ..self
        }
    }

    /// Path plus query, as reported in diagnostics.
    pub(crate) fn target(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        match self.query.as_deref().filter(|q| !q.is_empty()) {
            Some(query) => format!("{path}?{query}"),
            None => path,
        }
    }
}
