//! Incremental decoder for the chat completion event stream.
//!
//! Bytes are buffered until a newline; the trailing partial line waits for the next read.
//! Newline bytes never occur inside a multi-byte UTF-8 sequence, so every complete line
//! decodes on its own even when a read splits a character.

use super::protocol::{StreamChunk, FINISH_STOP};

const DATA_PREFIX: &str = "data:";
const DONE_PAYLOAD: &str = "[DONE]";

/// What a complete line means to the stream consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A content delta.
    Delta(String),
    /// `finish_reason: "stop"` seen; no more content follows.
    Stop,
    /// `data: [DONE]` terminator.
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read from the body; returns the events of every line completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=i).collect();
            let line = String::from_utf8_lossy(&line_bytes[..i]);
            self.decode_line(&line, &mut events);
        }
        events
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.decode_line(&line, &mut events);
        }
        events
    }

    /// Number of data lines dropped because their JSON did not parse.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(':') {
            return;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            // event:, id:, retry: fields carry nothing for chat completions.
            return;
        };
        let payload = payload.strip_prefix(' ').unwrap_or(payload).trim_end();
        if payload == DONE_PAYLOAD {
            events.push(SseEvent::Done);
            return;
        }
        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                self.skipped += 1;
                log::warn!("stream: skipping malformed chunk: {} ({})", payload, e);
                return;
            }
        };
        for choice in chunk.choices {
            if let Some(content) = choice.delta.and_then(|d| d.content) {
                if !content.is_empty() {
                    events.push(SseEvent::Delta(content));
                }
            }
            if choice.finish_reason.as_deref() == Some(FINISH_STOP) {
                events.push(SseEvent::Stop);
            }
        }
    }
}
