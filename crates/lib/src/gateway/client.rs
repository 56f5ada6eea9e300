//! HTTP client for the OpenClaw gateway: health check, chat (whole or streamed), tool invocation.
//!
//! A client owns at most one in-flight stream. Starting a new stream cancels the previous one,
//! whose callback still gets its terminal `on_chunk("", true)`.

use crate::config::{is_valid, GatewayConfig, DEFAULT_AGENT_ID};
use crate::error::ServiceError;
use crate::gateway::protocol::{
    ChatCompletionRequest, ChatOptions, CompletionResponse, Message, ToolRequest, ToolResponse,
};
use crate::gateway::sse::{SseDecoder, SseEvent};
use futures_util::{Stream, StreamExt};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CHAT_PATH: &str = "/v1/chat/completions";
const TOOLS_PATH: &str = "/tools/invoke";
const AGENT_HEADER: &str = "x-openclaw-agent-id";

pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(8);
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

const HEALTH_PROMPT: &str = "ping";
const HEALTH_MAX_TOKENS: u32 = 5;

/// Result of [`GatewayClient::health_check`]. Failures are data here, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub ok: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// How a stream ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
}

/// Cancels one stream. Cloneable; aborting twice or after completion is a no-op.
///
/// A handle can be created ahead of the request and passed to
/// [`GatewayClient::chat_stream_with`], so the caller can stop a stream whose headers have not
/// arrived yet.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle to a running stream.
pub struct ChatStream {
    abort: AbortHandle,
    task: JoinHandle<Result<StreamOutcome, ServiceError>>,
}

impl ChatStream {
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Wait until the reader is released and the terminal callback has run.
    pub async fn finished(self) -> Result<StreamOutcome, ServiceError> {
        match self.task.await {
            Ok(r) => r,
            Err(e) => Err(ServiceError::network(format!("stream task failed: {}", e))),
        }
    }
}

struct ActiveStream {
    id: u64,
    token: CancellationToken,
}

/// Decrements the open reader count when the response body is released.
struct ReaderGuard(Arc<AtomicUsize>);

impl ReaderGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Gateway client. Share it behind an `Arc`; config updates are last-write-wins.
pub struct GatewayClient {
    http: reqwest::Client,
    config: RwLock<GatewayConfig>,
    active: Arc<Mutex<Option<ActiveStream>>>,
    next_stream_id: AtomicU64,
    open_readers: Arc<AtomicUsize>,
    health_timeout: Duration,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: RwLock::new(config),
            active: Arc::new(Mutex::new(None)),
            next_stream_id: AtomicU64::new(1),
            open_readers: Arc::new(AtomicUsize::new(0)),
            health_timeout: HEALTH_TIMEOUT,
        }
    }

    /// Deadline for [`health_check`](Self::health_check). Defaults to [`HEALTH_TIMEOUT`].
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn config(&self) -> GatewayConfig {
        self.config
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn update_config(&self, config: GatewayConfig) {
        log::debug!("gateway client: config updated ({})", config.base_url());
        *self.config.write().unwrap_or_else(|p| p.into_inner()) = config;
    }

    /// Response bodies currently held by stream readers.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    /// Minimal chat round-trip under the health deadline (8 s unless overridden). Never fails;
    /// latency is measured either way.
    pub async fn health_check(&self) -> HealthStatus {
        let config = self.config();
        let started = Instant::now();
        let error = self.ping(&config).await.err();
        let latency_ms = started.elapsed().as_millis() as u64;
        if let Some(ref e) = error {
            log::debug!("health check failed after {}ms: {}", latency_ms, e);
        }
        HealthStatus {
            ok: error.is_none(),
            latency_ms,
            error,
        }
    }

    async fn ping(&self, config: &GatewayConfig) -> Result<(), String> {
        if !is_valid(config) {
            return Err("Gateway URL is not configured".to_string());
        }
        let messages = [Message::user(HEALTH_PROMPT)];
        let body = ChatCompletionRequest {
            model: config.model(),
            messages: &messages,
            stream: false,
            temperature: None,
            max_tokens: Some(HEALTH_MAX_TOKENS),
            user: config.session_user.clone(),
        };
        let res = self
            .post(config, CHAT_PATH, Some(self.health_timeout))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("Gateway timed out after {:?}", self.health_timeout)
                } else {
                    format!("Gateway unreachable: {}", e)
                }
            })?;
        let status = res.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err("Gateway auth failed (401 unauthorized): check the token".to_string())
        } else {
            Err(format!("Gateway returned HTTP {}", status.as_u16()))
        }
    }

    /// Non-streaming completion.
    pub async fn chat(
        &self,
        messages: &[Message],
        options: ChatOptions,
    ) -> Result<CompletionResponse, ServiceError> {
        let config = checked(self.config())?;
        let timeout = options.timeout.unwrap_or(CHAT_TIMEOUT);
        let body = completion_request(&config, messages, false, options);
        let res = self
            .post(&config, CHAT_PATH, Some(timeout))
            .json(&body)
            .send()
            .await?;
        let res = ensure_success(res).await?;
        Ok(res.json::<CompletionResponse>().await?)
    }

    /// Streamed completion. Content deltas arrive as `on_chunk(delta, false)`; exactly one
    /// `on_chunk("", true)` follows on every exit path once the response is open.
    pub async fn chat_stream<F>(
        &self,
        messages: &[Message],
        on_chunk: F,
        options: ChatOptions,
    ) -> Result<ChatStream, ServiceError>
    where
        F: FnMut(&str, bool) + Send + 'static,
    {
        self.chat_stream_with(messages, on_chunk, options, AbortHandle::new()).await
    }

    /// [`chat_stream`](Self::chat_stream) driven by a caller-owned `abort` handle. Aborting it
    /// before the response arrives drops the request, delivers the terminal callback, and
    /// resolves `Cancelled`.
    pub async fn chat_stream_with<F>(
        &self,
        messages: &[Message],
        mut on_chunk: F,
        options: ChatOptions,
        abort: AbortHandle,
    ) -> Result<ChatStream, ServiceError>
    where
        F: FnMut(&str, bool) + Send + 'static,
    {
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let token = abort.token.clone();
        let prev = self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(ActiveStream {
                id,
                token: token.clone(),
            });
        if let Some(prev) = prev {
            log::debug!("stream {}: superseded by stream {}", prev.id, id);
            prev.token.cancel();
        }
        let config = match checked(self.config()) {
            Ok(c) => c,
            Err(e) => {
                clear_active(&self.active, id);
                return Err(e);
            }
        };

        let mut req = self.post(&config, CHAT_PATH, options.timeout);
        let body = completion_request(&config, messages, true, options);
        req = req.json(&body);

        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = req.send() => Some(r),
        };
        let res = match sent {
            None => {
                log::debug!("stream {}: cancelled before the response arrived", id);
                clear_active(&self.active, id);
                on_chunk("", true);
                return Ok(ChatStream {
                    abort,
                    task: tokio::spawn(async { Ok(StreamOutcome::Cancelled) }),
                });
            }
            Some(r) => r,
        };
        let res = match res.map_err(ServiceError::from) {
            Ok(r) => ensure_success(r).await,
            Err(e) => Err(e),
        };
        let res = match res {
            Ok(r) => r,
            Err(e) => {
                clear_active(&self.active, id);
                return Err(e);
            }
        };

        log::debug!("stream {}: opened", id);
        let guard = ReaderGuard::acquire(&self.open_readers);
        let active = self.active.clone();
        let task = tokio::spawn(async move {
            let outcome = pump(res.bytes_stream(), guard, &token, &mut on_chunk).await;
            clear_active(&active, id);
            on_chunk("", true);
            match &outcome {
                Ok(o) => log::debug!("stream {}: ended ({:?})", id, o),
                Err(e) => log::warn!("stream {}: read failed: {}", id, e),
            }
            outcome
        });
        Ok(ChatStream { abort, task })
    }

    /// POST /tools/invoke under a 30 s deadline.
    pub async fn invoke_tool(&self, request: &ToolRequest) -> Result<ToolResponse, ServiceError> {
        let config = checked(self.config())?;
        let res = self
            .post(&config, TOOLS_PATH, Some(TOOL_TIMEOUT))
            .json(request)
            .send()
            .await?;
        let res = ensure_success(res).await?;
        Ok(res.json::<ToolResponse>().await?)
    }

    /// Cancel the active stream, if any.
    pub fn abort(&self) {
        let prev = self.active.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(prev) = prev {
            log::debug!("stream {}: aborting", prev.id);
            prev.token.cancel();
        }
    }

    fn post(
        &self,
        config: &GatewayConfig,
        path: &str,
        timeout: Option<Duration>,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", config.base_url(), path);
        let mut req = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(token) = config.bearer_token() {
            req = req.bearer_auth(token);
        }
        let agent = config.effective_agent_id();
        if agent != DEFAULT_AGENT_ID {
            req = req.header(AGENT_HEADER, agent);
        }
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        req
    }
}

fn checked(config: GatewayConfig) -> Result<GatewayConfig, ServiceError> {
    if is_valid(&config) {
        Ok(config)
    } else {
        Err(ServiceError::config("Gateway URL is not configured"))
    }
}

fn completion_request<'a>(
    config: &GatewayConfig,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model: config.model(),
        messages,
        stream,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        user: options.user.or_else(|| config.session_user.clone()),
    }
}

async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(ServiceError::from_status(status.as_u16(), &body))
}

fn clear_active(active: &Mutex<Option<ActiveStream>>, id: u64) {
    let mut g = active.lock().unwrap_or_else(|p| p.into_inner());
    if g.as_ref().is_some_and(|a| a.id == id) {
        *g = None;
    }
}

enum Flow {
    Continue,
    Finished,
    Cancelled,
}

/// Read the body until it ends, a terminator arrives, the token fires, or a read fails.
/// The body and its guard are dropped before returning.
async fn pump<S, B, F>(
    body: S,
    guard: ReaderGuard,
    token: &CancellationToken,
    on_chunk: &mut F,
) -> Result<StreamOutcome, ServiceError>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
    F: FnMut(&str, bool),
{
    let mut body = Box::pin(body);
    let mut decoder = SseDecoder::new();
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break Ok(StreamOutcome::Cancelled),
            next = body.next() => next,
        };
        let events = match next {
            Some(Ok(bytes)) => decoder.feed(bytes.as_ref()),
            Some(Err(e)) if e.is_timeout() => {
                break Err(ServiceError::timeout(format!("stream timed out: {}", e)))
            }
            Some(Err(e)) => break Err(ServiceError::network(format!("stream read failed: {}", e))),
            None => {
                let events = decoder.finish();
                match deliver(events, token, on_chunk) {
                    Flow::Cancelled => break Ok(StreamOutcome::Cancelled),
                    _ => break Ok(StreamOutcome::Completed),
                }
            }
        };
        match deliver(events, token, on_chunk) {
            Flow::Continue => {}
            Flow::Finished => break Ok(StreamOutcome::Completed),
            Flow::Cancelled => break Ok(StreamOutcome::Cancelled),
        }
    };
    drop(body);
    drop(guard);
    outcome
}

fn deliver<F>(events: Vec<SseEvent>, token: &CancellationToken, on_chunk: &mut F) -> Flow
where
    F: FnMut(&str, bool),
{
    for event in events {
        if token.is_cancelled() {
            return Flow::Cancelled;
        }
        match event {
            SseEvent::Delta(content) => on_chunk(&content, false),
            SseEvent::Stop | SseEvent::Done => return Flow::Finished,
        }
    }
    Flow::Continue
}
