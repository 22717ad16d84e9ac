// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! API conformance checks against the chat-completion endpoint.
//!
//! One synchronous and one streamed request, each bounded by its own
//! timeout. A hung service fails the check instead of hanging the run.

mod sse;

pub use sse::{classify, EventKind, SseEvent, SseParser};

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::ConformanceConfig;
use crate::error::{GateError, GateResult};
use crate::types::Endpoint;
use crate::validation::{excerpt, Stage, ValidationResult};

/// Characters of response body quoted in a failure message.
const FAILURE_EXCERPT_CHARS: usize = 200;

/// Bytes of response body kept in the result.
const MAX_CAPTURED_BYTES: usize = 16 * 1024;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const MODELS_PATH: &str = "/v1/models";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat-completion request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn from_config(config: &ConformanceConfig, stream: bool) -> Self {
        Self {
            model: config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: config.prompt.clone(),
            }],
            stream,
            max_tokens: config.max_tokens,
        }
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub ok: bool,
    /// Why the check failed; `None` when it passed.
    pub reason: Option<String>,
    /// Response body as received (possibly truncated).
    pub body: String,
}

impl CheckOutcome {
    fn pass(body: String) -> Self {
        Self {
            ok: true,
            reason: None,
            body,
        }
    }

    fn fail(reason: impl Into<String>, body: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            body,
        }
    }

    fn failure_message(&self, check: &str) -> String {
        format!(
            "{} check failed: {}; response: {:?}",
            check,
            self.reason.as_deref().unwrap_or("unknown reason"),
            excerpt(&self.body, FAILURE_EXCERPT_CHARS)
        )
    }
}

/// Conformance results for one run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConformanceResult {
    pub sync_ok: bool,
    pub stream_ok: bool,
    /// Body of the synchronous response.
    pub raw_response: String,
    /// Bytes of the streamed response received before the check settled.
    pub stream_response: String,
    /// `None` when the model listing check is disabled.
    pub models_ok: Option<bool>,
}

impl ConformanceResult {
    pub fn passed(&self) -> bool {
        self.sync_ok && self.stream_ok && self.models_ok.unwrap_or(true)
    }
}

/// Issues conformance requests against one endpoint.
pub struct ConformanceChecker {
    client: reqwest::Client,
    base_url: String,
}

impl ConformanceChecker {
    pub fn new(endpoint: &Endpoint) -> GateResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GateError::HttpClient {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: endpoint.base_url(),
        })
    }

    /// Non-streamed request. Passes iff the status is 2xx and
    /// `choices[0].message.content` is a non-empty string.
    pub async fn check_sync(&self, request: &ChatRequest, timeout: Duration) -> CheckOutcome {
        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH);
        let send = async {
            let resp = self.client.post(&url).json(request).send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout(timeout, send).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return CheckOutcome::fail(format!("request error: {}", e), String::new()),
            Err(_) => {
                return CheckOutcome::fail(
                    format!("no response within {}ms", timeout.as_millis()),
                    String::new(),
                )
            }
        };
        let body = truncate_bytes(body, MAX_CAPTURED_BYTES);

        if !status.is_success() {
            return CheckOutcome::fail(format!("HTTP status {}", status), body);
        }

        let value: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(e) => return CheckOutcome::fail(format!("response is not JSON: {}", e), body),
        };

        match value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        {
            Some(content) if !content.is_empty() => {
                tracing::debug!(chars = content.len(), "Synchronous completion received");
                CheckOutcome::pass(body)
            }
            Some(_) => CheckOutcome::fail("choices[0].message.content is empty", body),
            None => CheckOutcome::fail("missing choices[0].message.content", body),
        }
    }

    /// Streamed request. Passes as soon as one completion chunk arrives as a
    /// properly framed event. Headers and body share one deadline.
    pub async fn check_stream(&self, request: &ChatRequest, timeout: Duration) -> CheckOutcome {
        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH);
        let mut received: Vec<u8> = Vec::new();

        let read = async {
            let mut resp = self
                .client
                .post(&url)
                .json(request)
                .send()
                .await
                .map_err(|e| format!("request error: {}", e))?;

            let status = resp.status();
            let mut parser = SseParser::new();
            let mut events = 0usize;

            while let Some(chunk) = resp
                .chunk()
                .await
                .map_err(|e| format!("stream read error: {}", e))?
            {
                if received.len() < MAX_CAPTURED_BYTES {
                    received.extend_from_slice(&chunk);
                }
                if !status.is_success() {
                    continue;
                }
                for event in parser.feed(&chunk) {
                    events += 1;
                    match classify(&event) {
                        EventKind::Content => return Ok(()),
                        EventKind::Error(message) => {
                            return Err(format!("error event in stream: {}", message))
                        }
                        EventKind::Done | EventKind::Other => {}
                    }
                }
            }

            if !status.is_success() {
                return Err(format!("HTTP status {}", status));
            }
            let unframed = match parser.pending() {
                0 => String::new(),
                n => format!(" ({} trailing bytes not closed by a blank line)", n),
            };
            Err::<(), String>(format!(
                "stream ended after {} framed event(s) without a completion chunk{}",
                events, unframed
            ))
        };

        let verdict = match tokio::time::timeout(timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "no completion chunk within {}ms",
                timeout.as_millis()
            )),
        };

        let body = String::from_utf8_lossy(&received).into_owned();
        match verdict {
            Ok(()) => {
                tracing::debug!(bytes = received.len(), "Streamed completion chunk received");
                CheckOutcome::pass(body)
            }
            Err(reason) => CheckOutcome::fail(reason, body),
        }
    }

    /// `GET /v1/models` must list at least one model.
    pub async fn check_models(&self, timeout: Duration) -> CheckOutcome {
        let url = format!("{}{}", self.base_url, MODELS_PATH);
        let send = async {
            let resp = self.client.get(&url).send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout(timeout, send).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return CheckOutcome::fail(format!("request error: {}", e), String::new()),
            Err(_) => {
                return CheckOutcome::fail(
                    format!("no response within {}ms", timeout.as_millis()),
                    String::new(),
                )
            }
        };
        let body = truncate_bytes(body, MAX_CAPTURED_BYTES);

        if !status.is_success() {
            return CheckOutcome::fail(format!("HTTP status {}", status), body);
        }

        let listed = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("data").and_then(Value::as_array).map(Vec::len))
            .unwrap_or(0);

        if listed == 0 {
            CheckOutcome::fail("no models listed under data", body)
        } else {
            CheckOutcome::pass(body)
        }
    }

    /// Run every configured check. Each failing check contributes its own
    /// failure entry.
    pub async fn run(&self, config: &ConformanceConfig) -> (ConformanceResult, ValidationResult) {
        let mut validation = ValidationResult::new();

        tracing::info!(base_url = %self.base_url, model = %config.model, "Running conformance checks");

        let sync = self
            .check_sync(&ChatRequest::from_config(config, false), config.request_timeout)
            .await;
        if !sync.ok {
            let message = sync.failure_message("synchronous completion");
            tracing::error!(failure = %message, "Conformance check failed");
            validation.record(Stage::Conformance, message);
        }

        let stream = self
            .check_stream(&ChatRequest::from_config(config, true), config.stream_timeout)
            .await;
        if !stream.ok {
            let message = stream.failure_message("streaming completion");
            tracing::error!(failure = %message, "Conformance check failed");
            validation.record(Stage::Conformance, message);
        }

        let models_ok = if config.check_models {
            let models = self.check_models(config.request_timeout).await;
            if !models.ok {
                let message = models.failure_message("model listing");
                tracing::error!(failure = %message, "Conformance check failed");
                validation.record(Stage::Conformance, message);
            }
            Some(models.ok)
        } else {
            None
        };

        let result = ConformanceResult {
            sync_ok: sync.ok,
            stream_ok: stream.ok,
            raw_response: sync.body,
            stream_response: stream.body,
            models_ok,
        };

        if result.passed() {
            tracing::info!("Conformance checks passed");
        }

        (result, validation)
    }
}

fn truncate_bytes(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
