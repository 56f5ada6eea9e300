//! Chat session: an ordered, observable message log driven by the gateway client.
//!
//! `send_message` never fails. Gateway errors land in the assistant placeholder as visible text
//! and in [`ChatSession::last_error`].

use crate::error::ServiceError;
use crate::gateway::{AbortHandle, ChatOptions, GatewayClient, Message, Role};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly productivity coach inside a personal \
dashboard. Help the user plan goals, break work into tasks, and keep habits going. Keep answers \
short and actionable.";

/// One entry of the session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_streaming: bool,
}

impl SessionMessage {
    fn new(role: Role, content: impl Into<String>, is_streaming: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_streaming,
        }
    }

    fn to_wire(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

type Log = watch::Sender<Vec<SessionMessage>>;

fn with_message(log: &Log, id: &str, f: impl FnOnce(&mut SessionMessage)) {
    log.send_if_modified(|messages| match messages.iter_mut().find(|m| m.id == id) {
        Some(m) => {
            f(m);
            true
        }
        None => false,
    });
}

pub struct ChatSession {
    client: Arc<GatewayClient>,
    options: SessionOptions,
    log: Arc<Log>,
    last_error: Mutex<Option<ServiceError>>,
    abort: Mutex<Option<AbortHandle>>,
    /// Serializes turns: a second send waits for the first to finish.
    turn: tokio::sync::Mutex<()>,
}

impl ChatSession {
    pub fn new(client: Arc<GatewayClient>, options: SessionOptions) -> Self {
        Self {
            client,
            options,
            log: Arc::new(watch::channel(Vec::new()).0),
            last_error: Mutex::new(None),
            abort: Mutex::new(None),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    pub fn messages(&self) -> Vec<SessionMessage> {
        self.log.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<SessionMessage>> {
        self.log.subscribe()
    }

    pub fn last_error(&self) -> Option<ServiceError> {
        self.last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.log.borrow().iter().any(|m| m.is_streaming)
    }

    /// Run one turn: append the user message and an assistant placeholder, then fill the
    /// placeholder from the gateway (streamed or whole, per config).
    pub async fn send_message(&self, content: &str) {
        let _turn = self.turn.lock().await;
        self.set_error(None);

        let user = SessionMessage::new(Role::User, content, false);
        let placeholder = SessionMessage::new(Role::Assistant, "", true);
        let placeholder_id = placeholder.id.clone();

        let mut outbound = vec![Message::system(&self.options.system_prompt)];
        self.log.send_modify(|messages| {
            outbound.extend(
                messages
                    .iter()
                    .filter(|m| !m.content.is_empty())
                    .map(SessionMessage::to_wire),
            );
            messages.push(user);
            messages.push(placeholder);
        });
        outbound.push(Message::user(content));

        let result = if self.client.config().streaming {
            self.stream_reply(&placeholder_id, &outbound).await
        } else {
            self.complete_reply(&placeholder_id, &outbound).await
        };

        if let Err(e) = result {
            log::warn!("session: turn failed: {}", e);
            let text = format!("Error: {}", e.message);
            with_message(&self.log, &placeholder_id, |m| {
                m.content = text;
                m.is_streaming = false;
            });
            self.set_error(Some(e));
        }
    }

    async fn stream_reply(&self, id: &str, outbound: &[Message]) -> Result<(), ServiceError> {
        let log = self.log.clone();
        let target = id.to_string();
        let mut accumulated = String::new();
        let abort = AbortHandle::new();
        *self.abort.lock().unwrap_or_else(|p| p.into_inner()) = Some(abort.clone());
        let stream = self
            .client
            .chat_stream_with(
                outbound,
                move |chunk, done| {
                    if done {
                        with_message(&log, &target, |m| m.is_streaming = false);
                    } else {
                        accumulated.push_str(chunk);
                        let text = accumulated.clone();
                        with_message(&log, &target, |m| m.content = text);
                    }
                },
                ChatOptions::default(),
                abort,
            )
            .await;
        let outcome = match stream {
            Ok(stream) => stream.finished().await,
            Err(e) => Err(e),
        };
        self.abort.lock().unwrap_or_else(|p| p.into_inner()).take();
        outcome.map(|_| ())
    }

    async fn complete_reply(&self, id: &str, outbound: &[Message]) -> Result<(), ServiceError> {
        let res = self.client.chat(outbound, ChatOptions::default()).await?;
        let content = res.content().to_string();
        with_message(&self.log, id, |m| {
            m.content = content;
            m.is_streaming = false;
        });
        Ok(())
    }

    /// Abort the in-flight stream, if any, and clear every streaming flag.
    pub fn stop_streaming(&self) {
        if let Some(handle) = self.abort.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
        self.log.send_if_modified(|messages| {
            let mut changed = false;
            for m in messages.iter_mut().filter(|m| m.is_streaming) {
                m.is_streaming = false;
                changed = true;
            }
            changed
        });
    }

    /// Empty the log and forget the last error. Connection state is untouched.
    pub fn clear_messages(&self) {
        self.log.send_replace(Vec::new());
        self.set_error(None);
    }

    fn set_error(&self, error: Option<ServiceError>) {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = error;
    }
}
