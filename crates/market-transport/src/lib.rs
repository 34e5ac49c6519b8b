use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Failure below the HTTP status line: the request never completed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS, TLS, or read failure.
    #[error("transport failure: {0}")]
    Network(String),
    /// The scripted transport ran out of queued responses.
    #[error("scripted transport exhausted")]
    ScriptExhausted,
}

/// HTTP method subset used by the resource endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMethod {
    Get,
    Post,
    Patch,
}

/// One fully-resolved HTTP request handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub method: WireMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Raw response surfaced by a transport; status interpretation happens above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub body: String,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes one HTTP attempt.
///
/// Returning `Ok` means the server answered, whatever the status; `Err`
/// means the request never completed. Retry and timeout policy live above
/// this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &WireRequest) -> Result<WireResponse, TransportError>;
}

/// Real transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &WireRequest) -> Result<WireResponse, TransportError> {
        let method = match request.method {
            WireMethod::Get => reqwest::Method::GET,
            WireMethod::Post => reqwest::Method::POST,
            WireMethod::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        Ok(WireResponse { status, body })
    }
}

/// Deterministic transport for tests and offline smoke runs.
///
/// Responses are served in FIFO order; every executed request is recorded so
/// callers can assert on URLs, headers, and attempt counts.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Result<WireResponse, TransportError>>>>,
    requests: Arc<Mutex<Vec<WireRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response with the given status and body.
    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        lock_unpoisoned(&self.script).push_back(Ok(WireResponse {
            status,
            body: body.into(),
        }));
    }

    /// Queue a transport-level failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        lock_unpoisoned(&self.script).push_back(Err(TransportError::Network(message.into())));
    }

    /// All requests executed so far, in order.
    pub fn requests(&self) -> Vec<WireRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    /// Number of requests executed so far.
    pub fn request_count(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &WireRequest) -> Result<WireResponse, TransportError> {
        lock_unpoisoned(&self.requests).push(request.clone());
        lock_unpoisoned(&self.script)
            .pop_front()
            .unwrap_or(Err(TransportError::ScriptExhausted))
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_request(url: &str) -> WireRequest {
        WireRequest {
            method: WireMethod::Get,
            url: url.to_owned(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn scripted_transport_serves_responses_in_order() {
        let transport = ScriptedTransport::new();
        transport.push_response(200, "[]");
        transport.push_failure("connection reset");

        let first = transport
            .execute(&get_request("https://api.example.test/a"))
            .await
            .expect("first response should be ok");
        assert_eq!(first.status, 200);
        assert!(first.is_success());

        let second = transport
            .execute(&get_request("https://api.example.test/b"))
            .await
            .expect_err("second response should fail");
        assert_eq!(
            second,
            TransportError::Network("connection reset".to_owned())
        );
    }

    #[tokio::test]
    async fn scripted_transport_records_requests_and_reports_exhaustion() {
        let transport = ScriptedTransport::new();

        let err = transport
            .execute(&get_request("https://api.example.test/x"))
            .await
            .expect_err("empty script should fail");
        assert_eq!(err, TransportError::ScriptExhausted);

        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.requests()[0].url, "https://api.example.test/x");
    }

    #[test]
    fn success_range_is_2xx_only() {
        let ok = WireResponse {
            status: 204,
            body: String::new(),
        };
        let redirect = WireResponse {
            status: 301,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!redirect.is_success());
    }
}
