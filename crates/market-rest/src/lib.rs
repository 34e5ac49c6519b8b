//! Resilient resource client for a REST-over-HTTP record store.
//!
//! A fluent chain of query operations builds one descriptor that executes
//! exactly once, on await. Transport failures (connect, DNS, per-attempt
//! timeout) are retried with a fixed delay; a reachable server returning an
//! error status is final. Every failure surfaces as a normalized
//! [`ClientError`] — no raw transport error and no panic crosses this crate's
//! boundary.

use std::{future::Future, pin::Pin, sync::Arc};

use market_core::{ClientError, ErrorCategory, RetryPolicy, classify_http_status};
use market_transport::{Transport, WireMethod, WireRequest, WireResponse};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "apikey";
const AUTHORIZATION_HEADER: &str = "Authorization";
const CONTENT_TYPE_HEADER: &str = "Content-Type";
const PREFER_HEADER: &str = "Prefer";
const CONTENT_TYPE_JSON: &str = "application/json";
const PREFER_REPRESENTATION: &str = "return=representation";
const PREFER_MINIMAL: &str = "return=minimal";
const ERROR_BODY_SNIPPET_LEN: usize = 200;

/// Connection settings for one resource endpoint.
#[derive(Debug, Clone)]
pub struct ResourceClientConfig {
    /// Endpoint root, for example `https://api.example.test/rest/v1`.
    pub base_url: String,
    /// Credential sent as both the API key header and the bearer token.
    pub credential: String,
    /// Retry/timeout policy applied to every request.
    pub retry: RetryPolicy,
}

impl ResourceClientConfig {
    pub fn new(base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credential: credential.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Client for named record collections on a REST-over-HTTP endpoint.
#[derive(Debug)]
pub struct ResourceClient<T: Transport> {
    transport: Arc<T>,
    base_url: String,
    credential: String,
    retry: RetryPolicy,
}

impl<T: Transport> Clone for ResourceClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            base_url: self.base_url.clone(),
            credential: self.credential.clone(),
            retry: self.retry,
        }
    }
}

impl<T: Transport> ResourceClient<T> {
    pub fn new(transport: T, config: ResourceClientConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            credential: config.credential,
            retry: config.retry,
        }
    }

    /// Start a read descriptor for a named resource collection.
    ///
    /// No side effect; the request fires when the builder is awaited.
    pub fn collection(&self, name: impl Into<String>) -> QueryBuilder<T> {
        QueryBuilder {
            client: self.clone(),
            collection: name.into(),
            select: None,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Insert one record. The server echoes the created row back.
    pub async fn insert<R: Serialize>(
        &self,
        collection: &str,
        record: &R,
    ) -> Result<serde_json::Value, ClientError> {
        let body = serde_json::to_string(record).map_err(|err| {
            ClientError::new(ErrorCategory::Internal, "encode_error", err.to_string())
        })?;
        let request = WireRequest {
            method: WireMethod::Post,
            url: format!("{}/{}", self.base_url, collection),
            headers: self.write_headers(PREFER_REPRESENTATION),
            body: Some(body),
        };

        let response = check_status(self.execute_with_retry(request).await?)?;
        let mut rows: Vec<serde_json::Value> = decode_rows(&response.body)?;
        if rows.is_empty() {
            return Err(ClientError::new(
                ErrorCategory::Deserialize,
                "empty_representation",
                "server returned no created row",
            ));
        }
        Ok(rows.remove(0))
    }

    /// Start a partial-update descriptor.
    ///
    /// The request fires when the builder is awaited and must carry at least
    /// one equality filter; the server is asked for no response body, so
    /// success never returns row data.
    pub fn update(&self, collection: &str, values: serde_json::Value) -> UpdateBuilder<T> {
        UpdateBuilder {
            client: self.clone(),
            collection: collection.to_owned(),
            values,
            filters: Vec::new(),
        }
    }

    async fn execute_with_retry(&self, request: WireRequest) -> Result<WireResponse, ClientError> {
        let mut attempt: u32 = 0;
        loop {
            let outcome =
                tokio::time::timeout(self.retry.attempt_timeout(), self.transport.execute(&request))
                    .await;

            let failure = match outcome {
                Ok(Ok(response)) => {
                    if attempt > 0 {
                        debug!(url = %request.url, attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!(
                    "attempt timed out after {}ms",
                    self.retry.attempt_timeout().as_millis()
                ),
            };

            if attempt >= self.retry.max_retries() {
                return Err(ClientError::new(
                    ErrorCategory::Transport,
                    "transport_error",
                    failure,
                ));
            }

            attempt += 1;
            warn!(url = %request.url, attempt, error = %failure, "transport failure, retrying");
            tokio::time::sleep(self.retry.retry_delay()).await;
        }
    }

    fn read_headers(&self) -> Vec<(String, String)> {
        vec![
            (API_KEY_HEADER.to_owned(), self.credential.clone()),
            (
                AUTHORIZATION_HEADER.to_owned(),
                format!("Bearer {}", self.credential),
            ),
        ]
    }

    fn write_headers(&self, prefer: &str) -> Vec<(String, String)> {
        let mut headers = self.read_headers();
        headers.push((CONTENT_TYPE_HEADER.to_owned(), CONTENT_TYPE_JSON.to_owned()));
        headers.push((PREFER_HEADER.to_owned(), prefer.to_owned()));
        headers
    }
}

/// Fluent, lazily-executed read descriptor for one collection.
///
/// The builder is consumed on execution, so each descriptor runs exactly
/// once by construction.
#[derive(Debug)]
pub struct QueryBuilder<T: Transport> {
    client: ResourceClient<T>,
    collection: String,
    select: Option<String>,
    filters: Vec<(String, String)>,
    order: Option<(String, bool)>,
    limit: Option<u32>,
}

impl<T: Transport> QueryBuilder<T> {
    /// Restrict the returned columns. Defaults to `*`.
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        self
    }

    /// Add one equality predicate. Repeated filters are AND-ed in call
    /// order; there is no OR and no nested grouping.
    pub fn filter(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push((column.into(), value.to_string()));
        self
    }

    /// Order by a column, descending.
    ///
    /// Descending is the historical default when a caller does not pick a
    /// direction; most call sites want [`QueryBuilder::order_by_asc`]
    /// instead.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order = Some((column.into(), false));
        self
    }

    /// Order by a column, ascending.
    pub fn order_by_asc(mut self, column: impl Into<String>) -> Self {
        self.order = Some((column.into(), true));
        self
    }

    /// Cap the number of returned rows. When unset, no limit parameter is
    /// sent and the server-side default page size applies.
    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Execute the descriptor and decode rows into `M`.
    pub async fn fetch<M: DeserializeOwned>(self) -> Result<Vec<M>, ClientError> {
        let request = WireRequest {
            method: WireMethod::Get,
            url: build_read_url(
                &self.client.base_url,
                &self.collection,
                self.select.as_deref(),
                &self.filters,
                self.order.as_ref(),
                self.limit,
            ),
            headers: self.client.read_headers(),
            body: None,
        };

        let response = check_status(self.client.execute_with_retry(request).await?)?;
        decode_rows(&response.body)
    }
}

impl<T: Transport + 'static> IntoFuture for QueryBuilder<T> {
    type Output = Result<Vec<serde_json::Value>, ClientError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.fetch::<serde_json::Value>())
    }
}

/// Fluent, lazily-executed partial-update descriptor.
#[derive(Debug)]
pub struct UpdateBuilder<T: Transport> {
    client: ResourceClient<T>,
    collection: String,
    values: serde_json::Value,
    filters: Vec<(String, String)>,
}

impl<T: Transport> UpdateBuilder<T> {
    /// Add one equality predicate scoping the update. Repeatable; AND-ed in
    /// call order.
    pub fn filter(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push((column.into(), value.to_string()));
        self
    }

    async fn execute(self) -> Result<(), ClientError> {
        if self.filters.is_empty() {
            return Err(ClientError::new(
                ErrorCategory::Input,
                "unfiltered_update",
                format!(
                    "refusing to update collection '{}' without at least one filter",
                    self.collection
                ),
            ));
        }

        let body = serde_json::to_string(&self.values).map_err(|err| {
            ClientError::new(ErrorCategory::Internal, "encode_error", err.to_string())
        })?;
        let request = WireRequest {
            method: WireMethod::Patch,
            url: format!(
                "{}/{}?{}",
                self.client.base_url,
                self.collection,
                filter_query(&self.filters)
            ),
            headers: self.client.write_headers(PREFER_MINIMAL),
            body: Some(body),
        };

        check_status(self.client.execute_with_retry(request).await?)?;
        Ok(())
    }
}

impl<T: Transport + 'static> IntoFuture for UpdateBuilder<T> {
    type Output = Result<(), ClientError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

fn check_status(response: WireResponse) -> Result<WireResponse, ClientError> {
    if response.is_success() {
        return Ok(response);
    }
    Err(ClientError::new(
        classify_http_status(response.status),
        "api_error",
        format!(
            "status {}: {}",
            response.status,
            body_snippet(&response.body)
        ),
    ))
}

fn decode_rows<M: DeserializeOwned>(body: &str) -> Result<Vec<M>, ClientError> {
    serde_json::from_str(body)
        .map_err(|err| ClientError::new(ErrorCategory::Deserialize, "decode_error", err.to_string()))
}

fn body_snippet(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_SNIPPET_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn filter_query(filters: &[(String, String)]) -> String {
    filters
        .iter()
        .map(|(column, value)| format!("{column}=eq.{}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn build_read_url(
    base_url: &str,
    collection: &str,
    select: Option<&str>,
    filters: &[(String, String)],
    order: Option<&(String, bool)>,
    limit: Option<u32>,
) -> String {
    let mut params = vec![format!("select={}", select.unwrap_or("*"))];
    if !filters.is_empty() {
        params.push(filter_query(filters));
    }
    if let Some((column, ascending)) = order {
        let direction = if *ascending { "asc" } else { "desc" };
        params.push(format!("order={column}.{direction}"));
    }
    if let Some(limit) = limit {
        params.push(format!("limit={limit}"));
    }
    format!("{base_url}/{collection}?{}", params.join("&"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use market_transport::{ScriptedTransport, TransportError};
    use serde_json::json;

    use super::*;

    const BASE: &str = "https://api.example.test/rest/v1";
    const KEY: &str = "anon-key";

    fn client(transport: ScriptedTransport, retry: RetryPolicy) -> ResourceClient<ScriptedTransport> {
        ResourceClient::new(
            transport,
            ResourceClientConfig::new(BASE, KEY).with_retry(retry),
        )
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, 50, 1_000)
    }

    #[test]
    fn filters_are_anded_in_call_order_and_escaped() {
        let url = build_read_url(
            BASE,
            "ticket_messages",
            None,
            &[
                ("a".to_owned(), "1".to_owned()),
                ("b".to_owned(), "two words".to_owned()),
            ],
            None,
            None,
        );
        assert_eq!(
            url,
            "https://api.example.test/rest/v1/ticket_messages?select=*&a=eq.1&b=eq.two%20words"
        );
    }

    #[test]
    fn order_without_direction_defaults_to_descending() {
        let url = build_read_url(
            BASE,
            "tickets",
            Some("id,subject"),
            &[],
            Some(&("created_at".to_owned(), false)),
            Some(10),
        );
        assert_eq!(
            url,
            "https://api.example.test/rest/v1/tickets?select=id,subject&order=created_at.desc&limit=10"
        );
    }

    #[test]
    fn absent_limit_sends_no_limit_parameter() {
        let url = build_read_url(BASE, "tickets", None, &[], None, None);
        assert_eq!(url, "https://api.example.test/rest/v1/tickets?select=*");
    }

    #[tokio::test]
    async fn awaited_query_sends_credential_headers() {
        let transport = ScriptedTransport::new();
        transport.push_response(200, "[]");
        let client = client(transport.clone(), fast_retry(0));

        let rows = client
            .collection("tickets")
            .filter("customer_id", "u-1")
            .order_by("created_at")
            .await
            .expect("query should succeed");
        assert!(rows.is_empty());

        let request = &transport.requests()[0];
        assert_eq!(request.method, WireMethod::Get);
        assert_eq!(
            request.url,
            "https://api.example.test/rest/v1/tickets?select=*&customer_id=eq.u-1&order=created_at.desc"
        );
        assert!(request
            .headers
            .contains(&("apikey".to_owned(), KEY.to_owned())));
        assert!(request
            .headers
            .contains(&("Authorization".to_owned(), format!("Bearer {KEY}"))));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried_until_success() {
        let transport = ScriptedTransport::new();
        transport.push_failure("connection refused");
        transport.push_failure("connection refused");
        transport.push_response(200, r#"[{"id": 1}]"#);
        let client = client(transport.clone(), fast_retry(2));

        let rows = client
            .collection("tickets")
            .await
            .expect("third attempt should succeed");
        assert_eq!(rows, vec![json!({"id": 1})]);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_a_normalized_transport_error() {
        let transport = ScriptedTransport::new();
        transport.push_failure("dns failure");
        transport.push_failure("dns failure");
        transport.push_failure("dns failure");
        let client = client(transport.clone(), fast_retry(2));

        let err = client
            .collection("tickets")
            .await
            .expect_err("all attempts should fail");
        assert_eq!(err.category, ErrorCategory::Transport);
        assert_eq!(err.code, "transport_error");
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn error_statuses_are_final_and_never_retried() {
        let transport = ScriptedTransport::new();
        transport.push_response(404, r#"{"message":"relation not found"}"#);
        let client = client(transport.clone(), fast_retry(3));

        let err = client
            .collection("missing")
            .await
            .expect_err("404 should surface");
        assert_eq!(err.category, ErrorCategory::Api);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn auth_statuses_classify_as_auth_errors() {
        let transport = ScriptedTransport::new();
        transport.push_response(401, r#"{"message":"bad jwt"}"#);
        let client = client(transport.clone(), fast_retry(0));

        let err = client.collection("tickets").await.expect_err("401");
        assert_eq!(err.category, ErrorCategory::Auth);
    }

    #[tokio::test]
    async fn malformed_success_body_is_a_deserialize_error_without_retry() {
        let transport = ScriptedTransport::new();
        transport.push_response(200, "not json");
        let client = client(transport.clone(), fast_retry(3));

        let err = client
            .collection("tickets")
            .await
            .expect_err("bad body should surface");
        assert_eq!(err.category, ErrorCategory::Deserialize);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempts_count_as_transport_failures() {
        struct StallingTransport {
            attempts: AtomicU32,
        }

        #[async_trait]
        impl Transport for StallingTransport {
            async fn execute(
                &self,
                _request: &WireRequest,
            ) -> Result<WireResponse, TransportError> {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                std::future::pending().await
            }
        }

        let client = ResourceClient::new(
            StallingTransport {
                attempts: AtomicU32::new(0),
            },
            ResourceClientConfig::new(BASE, KEY).with_retry(RetryPolicy::new(1, 10, 100)),
        );

        let attempts = Arc::clone(&client.transport);
        let err = client
            .collection("tickets")
            .await
            .expect_err("stalled attempts should time out");
        assert_eq!(err.category, ErrorCategory::Transport);
        assert!(err.message.contains("timed out"));
        assert_eq!(attempts.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn insert_posts_json_and_returns_the_created_row() {
        let transport = ScriptedTransport::new();
        transport.push_response(201, r#"[{"id": 9, "body": "hello"}]"#);
        let client = client(transport.clone(), fast_retry(0));

        let created = client
            .insert("ticket_messages", &json!({"body": "hello"}))
            .await
            .expect("insert should succeed");
        assert_eq!(created, json!({"id": 9, "body": "hello"}));

        let request = &transport.requests()[0];
        assert_eq!(request.method, WireMethod::Post);
        assert_eq!(
            request.url,
            "https://api.example.test/rest/v1/ticket_messages"
        );
        assert_eq!(request.body.as_deref(), Some(r#"{"body":"hello"}"#));
        assert!(request
            .headers
            .contains(&("Prefer".to_owned(), "return=representation".to_owned())));
    }

    #[tokio::test]
    async fn update_patches_scoped_rows_and_returns_no_data() {
        let transport = ScriptedTransport::new();
        transport.push_response(204, "");
        let client = client(transport.clone(), fast_retry(0));

        client
            .update("tickets", json!({"status": "closed"}))
            .filter("id", "t-100")
            .await
            .expect("update should succeed");

        let request = &transport.requests()[0];
        assert_eq!(request.method, WireMethod::Patch);
        assert_eq!(
            request.url,
            "https://api.example.test/rest/v1/tickets?id=eq.t-100"
        );
        assert!(request
            .headers
            .contains(&("Prefer".to_owned(), "return=minimal".to_owned())));
    }

    #[tokio::test]
    async fn unfiltered_update_is_rejected_without_a_request() {
        let transport = ScriptedTransport::new();
        let client = client(transport.clone(), fast_retry(0));

        let err = client
            .update("tickets", json!({"status": "closed"}))
            .await
            .expect_err("unfiltered update must fail");
        assert_eq!(err.category, ErrorCategory::Input);
        assert_eq!(err.code, "unfiltered_update");
        assert_eq!(transport.request_count(), 0);
    }
}
