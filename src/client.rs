// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! HTTP client for the VCAI backend.
//!
//! [`AnalysisClient`] creates analysis sessions, derives the channel endpoint
//! for a conversation, and exposes the backend's read-only endpoints.

use crate::error::{Result, SessionError};
use crate::session::AnalysisSession;
use crate::transport::WebSocketTransport;
use crate::types::{
    AgentInfo, AnalysisRequest, AnalysisStartResponse, ClientOptions, ConversationStatus,
    WorkflowInfo,
};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const LOG_TARGET: &str = "vcai_session::client";

/// Type alias for the boxed futures returned by [`AnalysisApi`].
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

// =============================================================================
// Analysis API
// =============================================================================

/// The backend calls a session needs.
///
/// [`AnalysisClient`] is the HTTP implementation; tests substitute their own.
pub trait AnalysisApi: Send + Sync {
    /// Create the server-side session for `request`.
    fn start_analysis<'a>(&'a self, request: &'a AnalysisRequest)
    -> ApiFuture<'a, AnalysisStartResponse>;

    /// Channel endpoint for a conversation.
    fn websocket_url(&self, conversation_id: &str) -> Result<String>;
}

// =============================================================================
// Client
// =============================================================================

/// Client for the VCAI backend.
///
/// # Example
///
/// ```no_run
/// use vcai_session::AnalysisClient;
///
/// #[tokio::main]
/// async fn main() -> vcai_session::Result<()> {
///     let client = AnalysisClient::builder()
///         .base_url("http://localhost:8000")
///         .build()?;
///
///     let health = client.health_check().await?;
///     println!("{health}");
///
///     let session = client.create_session();
///     session.start_analysis("A marketplace for used lab equipment").await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    options: ClientOptions,
    base_url: Url,
    http: reqwest::Client,
}

impl AnalysisClient {
    /// Create a new client with the given options.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let base_url = Url::parse(options.base_url.trim())?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(SessionError::invalid_config(format!(
                "base_url must use http or https: {}",
                options.base_url
            )));
        }
        if base_url.cannot_be_a_base() {
            return Err(SessionError::invalid_config(format!(
                "base_url cannot be used as a base: {}",
                options.base_url
            )));
        }

        let mut http = reqwest::Client::builder();
        if let Some(timeout) = options.request_timeout {
            http = http.timeout(timeout);
        }
        let http = http.build()?;

        Ok(Self {
            options,
            base_url,
            http,
        })
    }

    /// Create a client configured from `VCAI_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::from_env()?)
    }

    /// Create a client builder for fluent configuration.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Create an orchestrator wired to this client and a WebSocket transport.
    pub fn create_session(&self) -> AnalysisSession {
        AnalysisSession::new(
            Arc::new(self.clone()),
            WebSocketTransport::factory(self.options.reconnect),
        )
    }

    // =========================================================================
    // Session Creation
    // =========================================================================

    /// Create the server-side session.
    ///
    /// Sends the prompt, the optional conversation id and every attachment
    /// as one multipart form. A non-success HTTP status becomes
    /// [`SessionError::AnalysisStart`] carrying `HTTP error! status: <code>`.
    pub async fn start_analysis(&self, request: &AnalysisRequest) -> Result<AnalysisStartResponse> {
        let mut form = Form::new().text("prompt", request.prompt.clone());
        if let Some(conversation_id) = &request.conversation_id {
            form = form.text("conversation_id", conversation_id.clone());
        }
        for file in &request.files {
            let mut part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
            if let Some(mime_type) = &file.mime_type {
                part = part.mime_str(mime_type)?;
            }
            form = form.part("files", part);
        }

        debug!(
            target: LOG_TARGET,
            files = request.files.len(),
            "starting analysis"
        );
        let response = self
            .http
            .post(self.endpoint(&["api", "v1", "chat", "analyze-startup"]))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::analysis_start(format!(
                "HTTP error! status: {}",
                status.as_u16()
            )));
        }

        let started: AnalysisStartResponse = response
            .json()
            .await
            .map_err(|e| SessionError::analysis_start(e.to_string()))?;
        info!(
            target: LOG_TARGET,
            conversation_id = %started.conversation_id,
            "analysis started"
        );
        Ok(started)
    }

    /// Channel endpoint for a conversation.
    ///
    /// `wss` when the base URL is `https`, `ws` otherwise.
    pub fn websocket_url(&self, conversation_id: &str) -> Result<String> {
        let mut url = self.endpoint(&["api", "v1", "ws"]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| {
            SessionError::invalid_config(format!("cannot derive channel URL from {}", self.base_url))
        })?;
        url.set_fragment(None);
        url.query_pairs_mut()
            .clear()
            .append_pair("conversation_id", conversation_id);
        Ok(url.into())
    }

    // =========================================================================
    // Read-only Endpoints
    // =========================================================================

    /// Server-side status of a conversation.
    pub async fn get_conversation_status(&self, conversation_id: &str) -> Result<ConversationStatus> {
        self.get_json(self.endpoint(&[
            "api",
            "v1",
            "chat",
            "conversations",
            conversation_id,
            "status",
        ]))
        .await
    }

    /// Full stored conversation.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Value> {
        self.get_json(self.endpoint(&["api", "v1", "chat", "conversations", conversation_id]))
            .await
    }

    /// Page through stored conversations.
    pub async fn list_conversations(&self, limit: u32, offset: u32) -> Result<Value> {
        let mut url = self.endpoint(&["api", "v1", "chat", "conversations"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        self.get_json(url).await
    }

    /// Agents known to the backend.
    pub async fn get_agents(&self) -> Result<Vec<AgentInfo>> {
        self.get_json(self.endpoint(&["api", "v1", "agents", ""]))
            .await
    }

    pub async fn get_agent_info(&self, agent_id: &str) -> Result<AgentInfo> {
        self.get_json(self.endpoint(&["api", "v1", "agents", agent_id]))
            .await
    }

    /// Description of the analysis workflow.
    pub async fn get_workflow_info(&self) -> Result<WorkflowInfo> {
        self.get_json(self.endpoint(&["api", "v1", "agents", "workflow", "status"]))
            .await
    }

    pub async fn health_check(&self) -> Result<Value> {
        self.get_json(self.endpoint(&["health"])).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Base URL extended with percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(target: LOG_TARGET, %url, "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    fn request_error(&self, err: reqwest::Error) -> SessionError {
        match self.options.request_timeout {
            Some(timeout) if err.is_timeout() => SessionError::Timeout(timeout),
            _ => SessionError::Http(err),
        }
    }
}

impl AnalysisApi for AnalysisClient {
    fn start_analysis<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> ApiFuture<'a, AnalysisStartResponse> {
        Box::pin(AnalysisClient::start_analysis(self, request))
    }

    fn websocket_url(&self, conversation_id: &str) -> Result<String> {
        AnalysisClient::websocket_url(self, conversation_id)
    }
}

// =============================================================================
// Client Builder
// =============================================================================

/// Builder for creating an [`AnalysisClient`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    options: ClientOptions,
}

impl ClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing options.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the backend base URL (e.g., `https://vcai.example.com`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.options.base_url = url.into();
        self
    }

    /// Set the timeout for HTTP calls.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = Some(timeout);
        self
    }

    /// Disable the HTTP timeout.
    pub fn no_request_timeout(mut self) -> Self {
        self.options.request_timeout = None;
        self
    }

    /// Set the fixed delay between reconnect attempts.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.options.reconnect.delay = delay;
        self
    }

    /// Set how many reconnect attempts the channel makes before giving up.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.options.reconnect.max_attempts = attempts;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<AnalysisClient> {
        AnalysisClient::new(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attachment;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single HTTP response, returning the raw request text.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                let is_multipart = text.contains("multipart/form-data");
                if (is_multipart && text.ends_with("--\r\n"))
                    || (!is_multipart && text.contains("\r\n\r\n"))
                {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (base_url, handle)
    }

    #[test]
    fn test_client_builder() {
        let client = AnalysisClient::builder()
            .base_url("https://vcai.example.com")
            .request_timeout(Duration::from_secs(5))
            .reconnect_delay(Duration::from_millis(500))
            .max_reconnect_attempts(2)
            .build()
            .unwrap();

        assert_eq!(client.options().request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(client.options().reconnect.delay, Duration::from_millis(500));
        assert_eq!(client.options().reconnect.max_attempts, 2);
    }

    #[test]
    fn test_builder_rejects_bad_base_url() {
        let result = AnalysisClient::builder().base_url("ftp://example.com").build();
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));

        let result = AnalysisClient::builder().base_url("localhost").build();
        assert!(matches!(result, Err(SessionError::Url(_))));
    }

    #[test]
    fn test_websocket_url_mirrors_scheme() {
        let client = AnalysisClient::builder()
            .base_url("http://localhost:8000")
            .build()
            .unwrap();
        assert_eq!(
            client.websocket_url("abc-123").unwrap(),
            "ws://localhost:8000/api/v1/ws?conversation_id=abc-123"
        );

        let client = AnalysisClient::builder()
            .base_url("https://vcai.example.com/")
            .build()
            .unwrap();
        assert_eq!(
            client.websocket_url("abc").unwrap(),
            "wss://vcai.example.com/api/v1/ws?conversation_id=abc"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_encodes_ids() {
        let client = AnalysisClient::builder()
            .base_url("http://host:9000/backend")
            .build()
            .unwrap();
        assert_eq!(
            client
                .endpoint(&["api", "v1", "chat", "conversations", "a b", "status"])
                .as_str(),
            "http://host:9000/backend/api/v1/chat/conversations/a%20b/status"
        );
        assert_eq!(
            client.endpoint(&["api", "v1", "agents", ""]).as_str(),
            "http://host:9000/backend/api/v1/agents/"
        );
        assert_eq!(
            client.websocket_url("x").unwrap(),
            "ws://host:9000/backend/api/v1/ws?conversation_id=x"
        );
    }

    #[tokio::test]
    async fn test_start_analysis_sends_multipart_form() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 91\r\nconnection: close\r\n\r\n\
             {\"conversation_id\":\"conv-1\",\"status\":\"started\",\"message\":\"ok\",\"websocket_url\":\"/ws/conv-1\"}",
        )
        .await;
        let client = AnalysisClient::builder().base_url(base_url).build().unwrap();

        let request = AnalysisRequest::new("Drone delivery for pharmacies")
            .conversation_id("conv-1")
            .file(Attachment::new("deck.txt", b"slides".to_vec()).mime_type("text/plain"));
        let response = client.start_analysis(&request).await.unwrap();
        assert_eq!(response.conversation_id, "conv-1");
        assert_eq!(response.status, "started");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/v1/chat/analyze-startup"));
        assert!(raw.contains("name=\"prompt\""));
        assert!(raw.contains("Drone delivery for pharmacies"));
        assert!(raw.contains("name=\"conversation_id\""));
        assert!(raw.contains("filename=\"deck.txt\""));
    }

    #[tokio::test]
    async fn test_start_analysis_http_error() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let client = AnalysisClient::builder().base_url(base_url).build().unwrap();

        let err = client
            .start_analysis(&AnalysisRequest::new("idea"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to start analysis: HTTP error! status: 500"
        );
        assert!(err.is_fatal());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_health_check_reads_json() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 20\r\nconnection: close\r\n\r\n\
             {\"status\":\"healthy\"}",
        )
        .await;
        let client = AnalysisClient::builder().base_url(base_url).build().unwrap();

        let health = client.health_check().await.unwrap();
        assert_eq!(health["status"], "healthy");
        assert!(server.await.unwrap().starts_with("GET /health "));
    }

    #[tokio::test]
    async fn test_list_conversations_passes_paging() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n[]",
        )
        .await;
        let client = AnalysisClient::builder().base_url(base_url).build().unwrap();

        let page = client.list_conversations(10, 20).await.unwrap();
        assert_eq!(page, serde_json::json!([]));
        assert!(
            server
                .await
                .unwrap()
                .starts_with("GET /api/v1/chat/conversations?limit=10&offset=20 ")
        );
    }
}
