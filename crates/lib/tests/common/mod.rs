//! Mock OpenClaw gateway served by axum on a free loopback port.
//! Replies are queued per request; an empty queue answers with a plain "pong" completion.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::Response,
    routing::post,
    Json, Router,
};
use futures_util::stream;
use lib::{GatewayClient, GatewayConfig};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type FrameSender = mpsc::Sender<Result<String, std::io::Error>>;

pub enum Reply {
    Json(u16, Value),
    Text(u16, String),
    /// SSE body cut into small reads so frames straddle chunk boundaries.
    Sse(Vec<String>),
    /// SSE body fed by the test through a channel.
    Channel(mpsc::Receiver<Result<String, std::io::Error>>),
    Delayed(Duration, Box<Reply>),
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Default)]
struct MockState {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

pub struct MockGateway {
    pub url: String,
    state: Arc<MockState>,
}

impl MockGateway {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/v1/chat/completions", post(handle))
            .route("/tools/invoke", post(handle))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock gateway");
        let addr = listener.local_addr().expect("local_addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn push(&self, reply: Reply) {
        self.state.replies.lock().unwrap().push_back(reply);
    }

    /// Queue a channel-fed SSE reply and return its sender.
    pub fn push_channel(&self) -> FrameSender {
        let (tx, rx) = mpsc::channel(16);
        self.push(Reply::Channel(rx));
        tx
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn config(&self) -> GatewayConfig {
        GatewayConfig {
            gateway_url: self.url.clone(),
            enabled: true,
            ..GatewayConfig::default()
        }
    }

    pub fn client(&self) -> Arc<GatewayClient> {
        Arc::new(GatewayClient::new(self.config()))
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.requests.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        headers,
        body,
    });
    let reply = state
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Reply::Json(200, completion("pong")));
    respond(reply).await
}

async fn respond(reply: Reply) -> Response {
    let reply = match reply {
        Reply::Delayed(d, inner) => {
            tokio::time::sleep(d).await;
            *inner
        }
        other => other,
    };
    match reply {
        Reply::Json(status, v) => response(status, "application/json", Body::from(v.to_string())),
        Reply::Text(status, s) => response(status, "text/plain", Body::from(s)),
        Reply::Sse(frames) => {
            let raw: Vec<u8> = frames
                .iter()
                .flat_map(|f| format!("{}\n\n", f).into_bytes())
                .collect();
            let pieces: Vec<Result<Vec<u8>, std::io::Error>> =
                raw.chunks(7).map(|c| Ok(c.to_vec())).collect();
            response(200, "text/event-stream", Body::from_stream(stream::iter(pieces)))
        }
        Reply::Channel(rx) => response(
            200,
            "text/event-stream",
            Body::from_stream(ReceiverStream::new(rx)),
        ),
        Reply::Delayed(..) => response(500, "text/plain", Body::from("nested delay")),
    }
}

fn response(status: u16, content_type: &str, body: Body) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header("content-type", content_type)
        .body(body)
        .unwrap()
}

pub fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1_700_000_000u64,
        "model": "openclaw:main",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5}
    })
}

pub fn delta_frame(content: &str) -> String {
    format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": content}}]})
    )
}

pub fn stop_frame() -> String {
    format!(
        "data: {}",
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})
    )
}

pub const DONE_FRAME: &str = "data: [DONE]";

/// Collects `(chunk, done)` callbacks for assertions.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<(String, bool)>>>);

impl Calls {
    pub fn callback(&self) -> impl FnMut(&str, bool) + Send + 'static {
        let calls = self.0.clone();
        move |chunk, done| calls.lock().unwrap().push((chunk.to_string(), done))
    }

    pub fn get(&self) -> Vec<(String, bool)> {
        self.0.lock().unwrap().clone()
    }

    pub fn content(&self) -> Vec<String> {
        self.get()
            .into_iter()
            .filter(|(_, done)| !done)
            .map(|(c, _)| c)
            .collect()
    }

    pub fn terminals(&self) -> usize {
        self.get().iter().filter(|(_, done)| *done).count()
    }
}

/// Poll `f` until true or fail after 5 s.
pub async fn wait_until(what: &str, mut f: impl FnMut() -> bool) {
    for _ in 0..250 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// A loopback URL with nothing listening on it.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

/// Keep writing SSE comments until the server drops the body (the client closed the connection).
pub async fn assert_body_released(tx: &FrameSender) {
    let released = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if tx.send(Ok(": keep-alive\n\n".to_string())).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "server still holds the stream body");
}

pub fn frame(line: String) -> Result<String, std::io::Error> {
    Ok(format!("{}\n\n", line))
}
