//! Shared reqwest plumbing for the remote collaborators.

use async_trait::async_trait;
use journalflow_core::{CorrelationId, WorkflowError, WorkflowResult};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

const ERROR_BODY_LIMIT: usize = 320;

/// Supplies bearer tokens for outgoing calls, one scope per remote system.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, scope: &str) -> WorkflowResult<String>;
}

/// Fixed token, for environments where a sidecar or the operator provides it.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self, _scope: &str) -> WorkflowResult<String> {
        Ok(self.0.clone())
    }
}

/// Base URL and token scope of one remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub base_url: String,
    #[serde(default)]
    pub scope: String,
}

impl HttpEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            scope: String::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

pub fn build_http_client(timeout: Duration) -> WorkflowResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| WorkflowError::Configuration(format!("http client build failed: {e}")))
}

/// Authenticated client for one endpoint. Every request carries the
/// correlation id of the event being processed.
#[derive(Clone)]
pub struct RemoteClient {
    client: Client,
    endpoint: HttpEndpoint,
    tokens: Arc<dyn TokenSource>,
    headers: Vec<(&'static str, &'static str)>,
}

impl RemoteClient {
    pub fn new(client: Client, endpoint: HttpEndpoint, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            endpoint,
            tokens,
            headers: Vec::new(),
        }
    }

    /// Static headers added to every request.
    pub fn with_headers(
        mut self,
        headers: impl IntoIterator<Item = (&'static str, &'static str)>,
    ) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.endpoint.base_url
    }

    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        correlation_id: &CorrelationId,
        body: &B,
    ) -> WorkflowResult<Response> {
        let request = self
            .prepare(method, path, &[], correlation_id)
            .await?
            .json(body);
        send(operation, request).await
    }

    pub async fn send_empty(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Response> {
        let request = self.prepare(method, path, &[], correlation_id).await?;
        send(operation, request).await
    }

    /// Bodyless request with url-encoded query parameters.
    pub async fn send_query(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Response> {
        let request = self.prepare(method, path, query, correlation_id).await?;
        send(operation, request).await
    }

    async fn prepare(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<RequestBuilder> {
        let token = self.tokens.token(&self.endpoint.scope).await?;
        let url = format!("{}{}", self.endpoint.base_url, path);
        let request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .header(CORRELATION_HEADER, correlation_id.as_str());
        let request = if query.is_empty() {
            request
        } else {
            request.query(query)
        };
        Ok(self
            .headers
            .iter()
            .fold(request, |request, (name, value)| request.header(*name, *value)))
    }
}

async fn send(operation: &'static str, request: RequestBuilder) -> WorkflowResult<Response> {
    request
        .send()
        .await
        .map_err(|e| WorkflowError::remote(operation, format!("request failed: {e}")))
}

/// Passes any 2xx response through.
pub async fn ensure_success(operation: &'static str, response: Response) -> WorkflowResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(operation, response).await)
    }
}

/// Passes only `expected` through; other statuses, 2xx included, are failures.
pub async fn expect_status(
    operation: &'static str,
    response: Response,
    expected: StatusCode,
) -> WorkflowResult<Response> {
    if response.status() == expected {
        Ok(response)
    } else {
        Err(status_error(operation, response).await)
    }
}

pub async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> WorkflowResult<T> {
    response
        .json()
        .await
        .map_err(|e| WorkflowError::remote(operation, format!("invalid response body: {e}")))
}

async fn status_error(operation: &'static str, response: Response) -> WorkflowError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    WorkflowError::remote(
        operation,
        format!("status {}: {}", status.as_u16(), truncate(&body, ERROR_BODY_LIMIT)),
    )
}

fn truncate(body: &str, limit: usize) -> &str {
    match body.char_indices().nth(limit) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

/// GraphQL envelope shared by the archive metadata and identity services.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a, V: Serialize> {
    pub query: &'a str,
    pub variables: V,
}

impl<T> GraphQlResponse<T> {
    /// Data of an error-free response; reported errors are logged and yield `None`.
    pub fn into_data(self, service: &'static str) -> Option<T> {
        if let Some(errors) = self.errors.filter(|errors| !errors.is_empty()) {
            for error in errors {
                tracing::error!(
                    service,
                    message = error.message.as_deref().unwrap_or("unknown"),
                    "graphql error"
                );
            }
            return None;
        }
        self.data
    }
}
