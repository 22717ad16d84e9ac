// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Incremental server-sent-events framing.
//!
//! Bytes are buffered until a blank line closes an event. Bytes after the
//! last blank line stay buffered: an unterminated event is not an event.

use serde_json::Value;

/// One complete event. Multiple `data:` lines are joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// What a chat-completion stream event carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A JSON chunk with a `choices` array.
    Content,
    /// The `[DONE]` sentinel.
    Done,
    /// `{"error": ...}`, emitted by the router when proxying the stream fails.
    Error(String),
    /// Framed, but not a completion chunk.
    Other,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(bytes.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_blank_line(&self.buf) {
            let block: Vec<u8> = self.buf.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes received but not yet closed by a blank line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data.push(value),
            "event" => event = Some(value.to_string()),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Classify a completed event from a chat-completion stream.
pub fn classify(event: &SseEvent) -> EventKind {
    let data = event.data.trim();
    if data == "[DONE]" {
        return EventKind::Done;
    }

    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return EventKind::Other;
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return EventKind::Error(message);
    }

    if value.get("choices").is_some_and(Value::is_array) {
        EventKind::Content
    } else {
        EventKind::Other
    }
}
