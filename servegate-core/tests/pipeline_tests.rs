// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end tests for the validation pipeline.
//!
//! A real child process stands in for the serving deployment, and an
//! in-process axum server answers the chat-completion API on an ephemeral
//! port.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use servegate_core::config::ConformanceConfig;
use servegate_core::conformance::ChatRequest;
use servegate_core::{
    Config, ConfigLoader, ConformanceChecker, Endpoint, HealthState, Pipeline,
    ProcessTreeTeardown, ServiceHandle, Stage, Teardown, TeardownReport,
};

#[derive(Debug, Clone, Copy)]
enum MockMode {
    /// Answers both request forms correctly.
    Healthy,
    /// Streams only comments, never a data event.
    SilentStream,
    /// Streams the router's error event.
    ErrorStream,
    /// Sends a completion chunk but never closes it with a blank line.
    UnterminatedStream,
}

async fn chat(mode: MockMode, body: Value) -> Response {
    let stream = body["stream"].as_bool().unwrap_or(false);

    if !stream {
        return Json(json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Paris."},
                "finish_reason": "stop"
            }]
        }))
        .into_response();
    }

    let events = match mode {
        MockMode::Healthy => concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Par\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"is.\"}}]}\n\n",
            "data: [DONE]\n\n"
        ),
        MockMode::SilentStream => ": keepalive\n\n: keepalive\n\n",
        MockMode::ErrorStream => "data: {\"error\": {\"message\": \"Stream processing error: upstream closed\"}}\n\n",
        MockMode::UnterminatedStream => {
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Par\"}}]}"
        }
    };
    ([(header::CONTENT_TYPE, "text/event-stream")], events).into_response()
}

/// Start the mock API and return its port.
async fn spawn_mock(mode: MockMode) -> u16 {
    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(move |Json(body): Json<Value>| async move { chat(mode, body).await }),
        )
        .route(
            "/v1/models",
            get(|| async { Json(json!({"object": "list", "data": [{"id": "default"}]})) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Start a server that sends response headers and then never finishes the
/// body, like a service wedged mid-request. Returns its port.
async fn spawn_stalled() -> u16 {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                while !String::from_utf8_lossy(&request).contains("\"max_tokens\"") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = if String::from_utf8_lossy(&request).contains("\"stream\":true") {
                    "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n\
                     d\r\n: keepalive\n\n\r\n"
                } else {
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 256\r\n\r\n{\"id\":"
                };
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });
    port
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Wraps the real teardown and counts invocations.
struct CountingTeardown {
    inner: ProcessTreeTeardown,
    calls: Arc<AtomicUsize>,
}

impl Teardown for CountingTeardown {
    fn teardown(&mut self, handle: Option<&ServiceHandle>) -> TeardownReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.teardown(handle)
    }
}

fn counting(config: &Config) -> (CountingTeardown, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let teardown = CountingTeardown {
        inner: ProcessTreeTeardown::new(config.teardown.clone()),
        calls: calls.clone(),
    };
    (teardown, calls)
}

struct Scenario<'a> {
    service_script: &'a str,
    port: u16,
    bench_script: &'a str,
    timeout_ms: u64,
    interval_ms: u64,
    required_path: Option<&'a Path>,
}

impl Default for Scenario<'_> {
    fn default() -> Self {
        Self {
            service_script: "exec sleep 30",
            port: 8000,
            bench_script: concat!(
                "echo 'latency: 1.0 s'; ",
                "echo 'input throughput: 30000 tok/s'; ",
                "echo 'output throughput: 1500 tok/s'"
            ),
            timeout_ms: 5_000,
            interval_ms: 100,
            required_path: None,
        }
    }
}

fn load(scenario: &Scenario<'_>) -> Config {
    let required = scenario
        .required_path
        .map(|p| format!("  required_paths: [{:?}]\n", p.display().to_string()))
        .unwrap_or_else(|| "  required_paths: []\n".to_string());

    let yaml = format!(
        r#"
service:
  command: sh
  args: ["-c", {service:?}]
endpoint:
  host: 127.0.0.1
  port: {port}
readiness:
  timeout_ms: {timeout}
  interval_ms: {interval}
  probe_timeout_ms: 100
conformance:
  request_timeout_ms: 2000
  stream_timeout_ms: 2000
benchmark:
  program: sh
  args: ["-c", {bench:?}]
  timeout_ms: 10000
thresholds:
  max_latency_seconds: 1.5
  min_input_throughput: 20000
  min_output_throughput: 1000
teardown:
  grace_period_ms: 1000
preconditions:
{required}"#,
        service = scenario.service_script,
        port = scenario.port,
        timeout = scenario.timeout_ms,
        interval = scenario.interval_ms,
        bench = scenario.bench_script,
        required = required,
    );

    ConfigLoader::load_string(&yaml).unwrap()
}

#[tokio::test]
async fn test_healthy_deployment_passes() {
    let port = spawn_mock(MockMode::Healthy).await;
    let config = load(&Scenario {
        port,
        ..Default::default()
    });
    let (teardown, calls) = counting(&config);

    let report = Pipeline::with_teardown(config, teardown).run().await.unwrap();

    assert!(report.passed, "failures: {:?}", report.failures);
    let launched = report.service_started_at.unwrap();
    assert!(launched >= report.started_at && launched <= report.finished_at);
    assert_eq!(report.readiness.unwrap().state, HealthState::Ready);
    let conformance = report.conformance.unwrap();
    assert!(conformance.sync_ok && conformance.stream_ok);
    assert!(conformance.raw_response.contains("Paris."));
    assert_eq!(report.benchmark.unwrap().exit_code, Some(0));
    assert_eq!(report.teardown.unwrap().remaining, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_two_threshold_violations_reported() {
    let port = spawn_mock(MockMode::Healthy).await;
    let config = load(&Scenario {
        port,
        bench_script: concat!(
            "echo 'latency: 2.0 s'; ",
            "echo 'input throughput: 25000'; ",
            "echo 'output throughput: 500'"
        ),
        ..Default::default()
    });
    let (teardown, calls) = counting(&config);

    let report = Pipeline::with_teardown(config, teardown).run().await.unwrap();

    assert!(!report.passed);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.stage == Stage::Benchmark));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_silent_stream_fails_and_skips_benchmark() {
    let port = spawn_mock(MockMode::SilentStream).await;
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("benchmark-ran");
    let bench_script = format!("touch {}", marker.display());
    let config = load(&Scenario {
        port,
        bench_script: &bench_script,
        ..Default::default()
    });
    let (teardown, calls) = counting(&config);

    let report = Pipeline::with_teardown(config, teardown).run().await.unwrap();

    assert!(!report.passed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, Stage::Conformance);
    assert!(report.failures[0].reason.contains("streaming completion"));
    let conformance = report.conformance.unwrap();
    assert!(conformance.sync_ok);
    assert!(!conformance.stream_ok);
    assert!(report.benchmark.is_none());
    assert!(!marker.exists());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_crashed_service_fails_fast() {
    let config = load(&Scenario {
        service_script: "sleep 0.3; exit 1",
        port: closed_port(),
        timeout_ms: 30_000,
        interval_ms: 100,
        ..Default::default()
    });
    let (teardown, calls) = counting(&config);

    let start = Instant::now();
    let report = Pipeline::with_teardown(config, teardown).run().await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(!report.passed);
    let readiness = report.readiness.unwrap();
    assert_eq!(readiness.state, HealthState::Crashed);
    assert!(!readiness.leader_alive);
    assert_eq!(report.failures[0].stage, Stage::Readiness);
    assert!(report.conformance.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_readiness_timeout_is_bounded() {
    let config = load(&Scenario {
        port: closed_port(),
        timeout_ms: 600,
        interval_ms: 200,
        ..Default::default()
    });
    let (teardown, calls) = counting(&config);

    let start = Instant::now();
    let report = Pipeline::with_teardown(config, teardown).run().await.unwrap();
    let readiness = report.readiness.unwrap();

    assert_eq!(readiness.state, HealthState::TimedOut);
    assert!(readiness.leader_alive);
    assert!(readiness.elapsed <= Duration::from_millis(600 + 200 + 500));
    assert!(report.failures[0].reason.contains("TimedOut"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Teardown of `sleep 30` must not wait out the grace period.
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_missing_precondition_never_launches() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("weights.bin");
    let config = load(&Scenario {
        required_path: Some(&missing),
        ..Default::default()
    });
    let (teardown, calls) = counting(&config);

    let report = Pipeline::with_teardown(config, teardown).run().await.unwrap();

    assert!(!report.passed);
    assert_eq!(report.failures[0].stage, Stage::Precondition);
    assert!(report.leader_pid.is_none());
    assert!(report.service_started_at.is_none());
    assert!(report.teardown.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_launch_failure_runs_defensive_teardown() {
    let mut config = load(&Scenario::default());
    config.service.command = "/nonexistent/serve".to_string();
    let (teardown, calls) = counting(&config);

    let report = Pipeline::with_teardown(config, teardown).run().await.unwrap();

    assert!(!report.passed);
    assert_eq!(report.failures[0].stage, Stage::Launch);
    assert!(report.readiness.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

fn conformance_config(check_models: bool) -> ConformanceConfig {
    ConformanceConfig {
        model: "default".to_string(),
        prompt: "What is the capital of France?".to_string(),
        max_tokens: 8,
        request_timeout: Duration::from_secs(2),
        stream_timeout: Duration::from_secs(2),
        check_models,
    }
}

#[tokio::test]
async fn test_conformance_with_model_listing() {
    let port = spawn_mock(MockMode::Healthy).await;
    let endpoint: Endpoint = format!("127.0.0.1:{}", port).parse().unwrap();
    let checker = ConformanceChecker::new(&endpoint).unwrap();

    let (result, failures) = checker.run(&conformance_config(true)).await;

    assert!(failures.passed(), "failures: {:?}", failures.failures());
    assert_eq!(result.models_ok, Some(true));
    assert!(result.stream_response.contains("data:"));
}

#[tokio::test]
async fn test_stream_error_event_fails_with_message() {
    let port = spawn_mock(MockMode::ErrorStream).await;
    let endpoint: Endpoint = format!("127.0.0.1:{}", port).parse().unwrap();
    let checker = ConformanceChecker::new(&endpoint).unwrap();

    let (result, failures) = checker.run(&conformance_config(false)).await;

    assert!(result.sync_ok);
    assert!(!result.stream_ok);
    assert_eq!(failures.failures().len(), 1);
    assert!(failures.failures()[0].reason.contains("upstream closed"));
}

#[tokio::test]
async fn test_unterminated_chunk_is_not_a_completion() {
    let port = spawn_mock(MockMode::UnterminatedStream).await;
    let endpoint: Endpoint = format!("127.0.0.1:{}", port).parse().unwrap();
    let checker = ConformanceChecker::new(&endpoint).unwrap();

    let (result, failures) = checker.run(&conformance_config(false)).await;

    assert!(result.sync_ok);
    assert!(!result.stream_ok);
    let reason = &failures.failures()[0].reason;
    assert!(reason.contains("after 0 framed event(s)"), "{}", reason);
    assert!(reason.contains("trailing bytes not closed by a blank line"), "{}", reason);
}

#[tokio::test]
async fn test_unresponsive_endpoint_fails_both_checks() {
    let endpoint: Endpoint = format!("127.0.0.1:{}", closed_port()).parse().unwrap();
    let checker = ConformanceChecker::new(&endpoint).unwrap();

    let (result, failures) = checker.run(&conformance_config(false)).await;

    assert!(!result.passed());
    assert_eq!(failures.failures().len(), 2);
    assert!(failures.failures()[0].reason.starts_with("synchronous completion"));
    assert!(failures.failures()[1].reason.starts_with("streaming completion"));
}

#[tokio::test]
async fn test_stalled_stream_fails_at_its_timeout() {
    let port = spawn_stalled().await;
    let endpoint: Endpoint = format!("127.0.0.1:{}", port).parse().unwrap();
    let checker = ConformanceChecker::new(&endpoint).unwrap();
    let request = ChatRequest::from_config(&conformance_config(false), true);

    let start = Instant::now();
    let outcome = checker.check_stream(&request, Duration::from_millis(500)).await;
    let elapsed = start.elapsed();

    assert!(!outcome.ok);
    assert_eq!(
        outcome.reason.as_deref(),
        Some("no completion chunk within 500ms")
    );
    assert!(outcome.body.contains(": keepalive"));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1_500), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_stalled_sync_response_fails_at_its_timeout() {
    let port = spawn_stalled().await;
    let endpoint: Endpoint = format!("127.0.0.1:{}", port).parse().unwrap();
    let checker = ConformanceChecker::new(&endpoint).unwrap();
    let request = ChatRequest::from_config(&conformance_config(false), false);

    let start = Instant::now();
    let outcome = checker.check_sync(&request, Duration::from_millis(500)).await;
    let elapsed = start.elapsed();

    assert!(!outcome.ok);
    assert_eq!(outcome.reason.as_deref(), Some("no response within 500ms"));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1_500), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_stalled_service_bounds_whole_conformance_run() {
    let port = spawn_stalled().await;
    let endpoint: Endpoint = format!("127.0.0.1:{}", port).parse().unwrap();
    let checker = ConformanceChecker::new(&endpoint).unwrap();
    let config = ConformanceConfig {
        request_timeout: Duration::from_millis(400),
        stream_timeout: Duration::from_millis(400),
        ..conformance_config(false)
    };

    let start = Instant::now();
    let (result, failures) = checker.run(&config).await;

    assert!(!result.passed());
    assert_eq!(failures.failures().len(), 2);
    assert!(failures.failures()[0].reason.contains("no response within 400ms"));
    assert!(failures.failures()[1].reason.contains("no completion chunk within 400ms"));
    assert!(start.elapsed() < Duration::from_secs(2));
}
