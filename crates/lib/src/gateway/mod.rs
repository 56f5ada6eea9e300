//! Gateway client: OpenAI-compatible chat completions over HTTP, with SSE streaming.
//!
//! `POST {gatewayUrl}/v1/chat/completions` for chat and health checks, `POST {gatewayUrl}/tools/invoke`
//! for tools. Model is `openclaw:<agentId>`.

mod client;
mod protocol;
mod sse;

pub use client::{
    AbortHandle, ChatStream, GatewayClient, HealthStatus, StreamOutcome, CHAT_TIMEOUT,
    HEALTH_TIMEOUT, TOOL_TIMEOUT,
};
pub use protocol::{
    ChatOptions, CompletionChoice, CompletionResponse, Message, Role, StreamChoice, StreamChunk,
    StreamDelta, ToolError, ToolRequest, ToolResponse, Usage, FINISH_STOP,
};
pub use sse::{SseDecoder, SseEvent};
