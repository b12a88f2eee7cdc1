//! Authenticated fetch adapter for the embedded chat widget.
//!
//! The widget performs its own rendering and transport framing; every
//! network call it makes goes through a [`ChatFetch`] handed to it by the
//! hosting panel. The adapter attaches the workflow identity headers and
//! the publish token, classifies 401/403/429 responses into the host's
//! event sink without throwing, and hands the response back to the widget
//! unmodified so its own failure UI can render.
//!
//! Construction never fails: a panel may build the adapter speculatively
//! before its prerequisites are known. Unusable adapters (no transport,
//! blank workflow identity) reject every call with a descriptive error
//! and never touch the network; hosts treat that as "render the
//! unavailable state", not as a retry signal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use flowdeck_client_core::context::{RequestContext, is_context_header};
use flowdeck_client_core::outcome::{FetchClassification, classify_status};
use flowdeck_client_core::token::PublishTokenStore;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Per-call request id header, for backend-side correlation.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Error)]
pub enum ChatFetchError {
    /// The adapter cannot make calls at all. Thrown per call, never at
    /// construction time.
    #[error("chat fetch unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("chat_fetch_invalid_path")]
    InvalidPath,
    #[error("chat_fetch_invalid_header:{name}")]
    InvalidHeader { name: String },
    /// Low-level transport failure (DNS, connection reset). There is no
    /// backend signal to classify, so it propagates unmodified.
    #[error("chat_transport_failed:{message}")]
    Transport { message: String },
}

/// Response handed back to the widget. Classified failures are reported
/// through [`ChatFetchEvents`] but the response is never swallowed.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ChatResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    fn retry_after(&self) -> Option<&str> {
        self.headers.get(RETRY_AFTER).and_then(|value| value.to_str().ok())
    }
}

/// One widget-originated call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub method: Method,
    pub path: String,
    /// Caller-supplied headers. Headers inside the `x-flowdeck-*`
    /// namespace are dropped — the adapter owns that namespace outright,
    /// whether or not the context emits the header. A caller-set
    /// `Authorization` header is the documented exception and is kept.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ChatRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }
}

/// Host-supplied sink for classified failures.
///
/// Both signals are non-throwing and may fire after the hosting panel has
/// closed; hosts keep them idempotent.
pub trait ChatFetchEvents: Send + Sync {
    /// 401/403 from the backend. The host's signal to prompt
    /// re-authentication.
    fn auth_rejected(&self, _status: u16) {}
    /// 429 from the backend, with the retry-after hint when the header
    /// carried delta-seconds.
    fn rate_limited(&self, _retry_after: Option<Duration>) {}
}

/// Sink that ignores every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl ChatFetchEvents for NoopEvents {}

/// Transport seam under the adapter. The reqwest implementation is the
/// production path; tests bind fakes.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<ChatResponse, ChatFetchError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: Duration::from_millis(timeout_ms.max(250)),
        }
    }
}

#[async_trait]
impl ChatTransport for ReqwestTransport {
    async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<ChatResponse, ChatFetchError> {
        let mut request = self
            .http
            .request(method, url)
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ChatFetchError::Transport {
                message: error.to_string(),
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|error| ChatFetchError::Transport {
                message: error.to_string(),
            })?
            .to_vec();

        Ok(ChatResponse {
            status,
            headers,
            body,
        })
    }
}

/// Construction parameters for [`ChatFetch`].
#[derive(Debug, Clone)]
pub struct ChatFetchConfig {
    pub base_url: String,
    pub context: RequestContext,
    pub tokens: PublishTokenStore,
    pub timeout_ms: u64,
}

impl ChatFetchConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, context: RequestContext) -> Self {
        Self {
            base_url: base_url.into(),
            context,
            tokens: PublishTokenStore::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Share an existing token store with the panel.
    #[must_use]
    pub fn with_tokens(mut self, tokens: PublishTokenStore) -> Self {
        self.tokens = tokens;
        self
    }
}

/// The fetch function handed to the chat widget.
///
/// Holds no mutable state beyond the shared token store; rebuilding the
/// adapter on every context change is cheap and leaks nothing, since each
/// instance closes over its own event sink.
pub struct ChatFetch {
    base_url: String,
    context: RequestContext,
    tokens: PublishTokenStore,
    events: Arc<dyn ChatFetchEvents>,
    transport: Option<Arc<dyn ChatTransport>>,
}

impl ChatFetch {
    /// Build an adapter over the reqwest transport.
    #[must_use]
    pub fn new(config: ChatFetchConfig, events: Arc<dyn ChatFetchEvents>) -> Self {
        let transport: Arc<dyn ChatTransport> = Arc::new(ReqwestTransport::new(config.timeout_ms));
        Self::with_transport(config, events, transport)
    }

    /// Build an adapter with an explicit transport.
    #[must_use]
    pub fn with_transport(
        config: ChatFetchConfig,
        events: Arc<dyn ChatFetchEvents>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            context: config.context,
            tokens: config.tokens,
            events,
            transport: Some(transport),
        }
    }

    /// Build an adapter for an environment with no network primitive.
    /// Every call rejects with [`ChatFetchError::Unavailable`].
    #[must_use]
    pub fn without_transport(config: ChatFetchConfig, events: Arc<dyn ChatFetchEvents>) -> Self {
        Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            context: config.context,
            tokens: config.tokens,
            events,
            transport: None,
        }
    }

    /// Join a widget-relative path onto the backend base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    /// Issue one widget call.
    ///
    /// 2xx responses come back unmodified. 401/403 and 429 fire the event
    /// sink exactly once each and the response is still returned. Other
    /// statuses pass through unclassified.
    pub async fn fetch(&self, request: ChatRequest) -> Result<ChatResponse, ChatFetchError> {
        let transport = self.require_transport()?;
        if !self.context.is_actionable() {
            return Err(ChatFetchError::Unavailable {
                reason: "workflow identity missing; chat panel should render unavailable".to_string(),
            });
        }
        if self.base_url.is_empty() {
            return Err(ChatFetchError::Unavailable {
                reason: "backend base url missing".to_string(),
            });
        }

        let url = self
            .endpoint(&request.path)
            .ok_or(ChatFetchError::InvalidPath)?;
        let request_id = format!("req_{}", Uuid::new_v4().simple());
        let headers = self.build_headers(&request.headers, &request_id)?;

        let response = transport
            .execute(request.method, &url, headers, request.body)
            .await?;

        match classify_status(response.status.as_u16(), response.retry_after()) {
            FetchClassification::AuthRejected { status } => {
                debug!(status, request_id, "chat call rejected by backend auth");
                self.events.auth_rejected(status);
            }
            FetchClassification::RateLimited { retry_after } => {
                debug!(?retry_after, request_id, "chat call rate limited");
                self.events.rate_limited(retry_after);
            }
            FetchClassification::Passthrough => {}
        }

        Ok(response)
    }

    fn require_transport(&self) -> Result<&Arc<dyn ChatTransport>, ChatFetchError> {
        self.transport
            .as_ref()
            .ok_or_else(|| ChatFetchError::Unavailable {
                reason: "no network primitive available in this environment".to_string(),
            })
    }

    /// Merge caller headers with the adapter's own.
    ///
    /// Caller headers inside the `x-flowdeck-*` namespace are dropped
    /// before anything lands, so a spoofed identity header cannot leak
    /// even when the context does not emit that header itself. The
    /// adapter then writes its context headers and the request id. The
    /// publish token is attached as a bearer credential only when the
    /// caller did not set `Authorization` explicitly.
    fn build_headers(
        &self,
        caller: &[(String, String)],
        request_id: &str,
    ) -> Result<HeaderMap, ChatFetchError> {
        let mut headers = HeaderMap::new();

        for (name, value) in caller {
            if is_context_header(name) {
                debug!(name, "dropping caller header inside the adapter namespace");
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ChatFetchError::InvalidHeader { name: name.clone() }
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| ChatFetchError::InvalidHeader {
                    name: name.clone(),
                })?;
            headers.append(header_name, header_value);
        }

        for (name, value) in self.context.headers() {
            let header_value =
                HeaderValue::from_str(&value).map_err(|_| ChatFetchError::InvalidHeader {
                    name: name.to_string(),
                })?;
            headers.insert(HeaderName::from_static(name), header_value);
        }

        let request_id_value =
            HeaderValue::from_str(request_id).map_err(|_| ChatFetchError::InvalidHeader {
                name: HEADER_REQUEST_ID.to_string(),
            })?;
        headers.insert(HeaderName::from_static(HEADER_REQUEST_ID), request_id_value);

        if !headers.contains_key(AUTHORIZATION) {
            if let Some(token) = self.tokens.get() {
                let mut bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(
                    |_| ChatFetchError::InvalidHeader {
                        name: AUTHORIZATION.to_string(),
                    },
                )?;
                bearer.set_sensitive(true);
                headers.insert(AUTHORIZATION, bearer);
            }
        }

        Ok(headers)
    }
}
