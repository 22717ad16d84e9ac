// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchmark stage: run the external harness, parse its output, validate
//! the numbers against the threshold policy.

mod metrics;
mod thresholds;

pub use metrics::{parse_metrics, BenchmarkMetrics, MetricReading};
pub use thresholds::validate;

use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use serde::Serialize;
use tokio::process::Command;

use crate::config::{BenchmarkConfig, ThresholdPolicy};
use crate::error::BenchmarkError;
use crate::validation::{Stage, ValidationResult};

/// Captured result of one harness invocation.
#[derive(Debug, Clone)]
pub struct BenchmarkRun {
    /// stdout followed by stderr.
    pub output: String,
    /// `None` when the harness was killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub elapsed: Duration,
}

/// What the benchmark stage produced, for the run report.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkOutcome {
    /// `None` when the harness could not be run at all.
    pub metrics: Option<BenchmarkMetrics>,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
}

/// Substitute `{model_path}`, `{base_url}`, `{batch_size}`, `{input_len}`
/// and `{output_len}` in the configured argument templates.
pub fn render_args(config: &BenchmarkConfig, base_url: &str) -> Vec<String> {
    let batch_size = config.batch_size.to_string();
    let input_len = config.input_len.to_string();
    let output_len = config.output_len.to_string();

    config
        .args
        .iter()
        .map(|arg| {
            arg.replace("{model_path}", &config.model_path)
                .replace("{base_url}", base_url)
                .replace("{batch_size}", &batch_size)
                .replace("{input_len}", &input_len)
                .replace("{output_len}", &output_len)
        })
        .collect()
}

/// Run the harness as a bounded subprocess and capture its output.
///
/// The harness leads its own process group. Whatever it forked is killed
/// with it once the run ends, so helpers cannot outlive the stage or hold
/// the output pipes open.
///
/// # Errors
/// Returns BenchmarkError if the harness cannot be spawned, its output
/// cannot be collected, or it outlives the stage timeout (it is killed).
pub async fn run_benchmark(
    config: &BenchmarkConfig,
    base_url: &str,
) -> Result<BenchmarkRun, BenchmarkError> {
    let args = render_args(config, base_url);

    tracing::info!(
        program = %config.program,
        args = ?args,
        timeout_ms = config.timeout.as_millis(),
        "Running benchmark harness"
    );

    let child = Command::new(&config.program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BenchmarkError::SpawnFailed {
            program: config.program.clone(),
            reason: e.to_string(),
        })?;
    let group = child.id().map(|id| nix::unistd::Pid::from_raw(id as i32));

    let start = Instant::now();
    let waited = tokio::time::timeout(config.timeout, child.wait_with_output()).await;
    if let Some(group) = group {
        kill_group(group);
    }

    let output = match waited {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(BenchmarkError::Output {
                reason: e.to_string(),
            })
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = config.timeout.as_millis(),
                "Benchmark harness timed out, process group killed"
            );
            return Err(BenchmarkError::Timeout {
                timeout_ms: config.timeout.as_millis() as u64,
            });
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(&output.stderr));
    }

    let run = BenchmarkRun {
        output: text,
        exit_code: output.status.code(),
        success: output.status.success(),
        elapsed: start.elapsed(),
    };

    tracing::info!(
        exit_code = ?run.exit_code,
        elapsed_ms = run.elapsed.as_millis(),
        output_bytes = run.output.len(),
        "Benchmark harness finished"
    );

    Ok(run)
}

/// SIGKILL everything left in the harness group. ESRCH means it is empty.
fn kill_group(group: nix::unistd::Pid) {
    match signal::killpg(group, Signal::SIGKILL) {
        Ok(()) => tracing::debug!(pgid = group.as_raw(), "Killed leftover harness processes"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid = group.as_raw(), error = %e, "Cannot kill harness process group"),
    }
}

/// Ask the router to drop its caches before measuring. Best effort.
pub async fn flush_cache(base_url: &str, timeout: Duration) -> bool {
    let url = format!("{}/flush_cache", base_url);
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot build client for cache flush");
            return false;
        }
    };

    match client.post(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!("Flushed service cache");
            true
        }
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), "Cache flush rejected");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cache flush failed");
            false
        }
    }
}

/// Full benchmark stage. Harness failures, a non-zero exit, and every
/// threshold violation each produce their own failure entry.
pub async fn run_stage(
    config: &BenchmarkConfig,
    policy: &ThresholdPolicy,
    base_url: &str,
) -> (BenchmarkOutcome, ValidationResult) {
    let mut result = ValidationResult::new();

    if config.flush_cache {
        flush_cache(base_url, Duration::from_secs(30)).await;
    }

    let run = match run_benchmark(config, base_url).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(error = %e, "Benchmark harness failed");
            result.record(Stage::Benchmark, format!("benchmark harness failed: {}", e));
            let outcome = BenchmarkOutcome {
                metrics: None,
                exit_code: None,
                elapsed_ms: 0,
            };
            return (outcome, result);
        }
    };

    if !run.success {
        let status = run
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        result.record(
            Stage::Benchmark,
            format!("benchmark harness exited with status {}", status),
        );
    }

    let metrics = parse_metrics(&run.output);
    tracing::info!(
        latency_seconds = %metrics.latency_seconds,
        input_throughput = %metrics.input_throughput,
        output_throughput = %metrics.output_throughput,
        "Parsed benchmark metrics"
    );

    result.merge(validate(&metrics, policy));

    let outcome = BenchmarkOutcome {
        metrics: Some(metrics),
        exit_code: run.exit_code,
        elapsed_ms: run.elapsed.as_millis() as u64,
    };
    (outcome, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_benchmark(script: &str, timeout_ms: u64) -> BenchmarkConfig {
        BenchmarkConfig {
            enabled: true,
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            model_path: "/models/test".to_string(),
            batch_size: 16,
            input_len: 1024,
            output_len: 32,
            timeout: Duration::from_millis(timeout_ms),
            flush_cache: false,
        }
    }

    fn policy() -> ThresholdPolicy {
        ThresholdPolicy {
            max_latency_seconds: 1.5,
            min_input_throughput: 20_000.0,
            min_output_throughput: 1_000.0,
        }
    }

    #[test]
    fn test_render_args() {
        let config = BenchmarkConfig {
            args: vec![
                "--model-path".to_string(),
                "{model_path}".to_string(),
                "--base-url={base_url}".to_string(),
                "{batch_size}/{input_len}/{output_len}".to_string(),
            ],
            ..shell_benchmark("", 1_000)
        };
        let args = render_args(&config, "http://127.0.0.1:8000");
        assert_eq!(
            args,
            vec![
                "--model-path",
                "/models/test",
                "--base-url=http://127.0.0.1:8000",
                "16/1024/32"
            ]
        );
    }

    #[tokio::test]
    async fn test_run_captures_stdout_and_stderr() {
        let config = shell_benchmark("echo 'latency: 1.0'; echo 'output throughput: 5' >&2", 5_000);
        let run = run_benchmark(&config, "http://127.0.0.1:1").await.unwrap();
        assert!(run.success);
        assert!(run.output.contains("latency: 1.0"));
        assert!(run.output.contains("output throughput: 5"));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let config = shell_benchmark("sleep 10", 200);
        let start = Instant::now();
        let err = run_benchmark(&config, "http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, BenchmarkError::Timeout { timeout_ms: 200 }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_kills_forked_helpers() {
        let marker = "servegate-bench-helper";
        let script = format!("sh -c 'sleep 30; echo done' {} & wait", marker);
        let config = shell_benchmark(&script, 300);

        let start = Instant::now();
        let err = run_benchmark(&config, "http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, BenchmarkError::Timeout { timeout_ms: 300 }));
        assert!(start.elapsed() < Duration::from_secs(5));

        let mut sys = sysinfo::System::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut leaked = helpers_running(&mut sys, marker);
        while leaked > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            leaked = helpers_running(&mut sys, marker);
        }
        assert_eq!(leaked, 0);
    }

    #[tokio::test]
    async fn test_finished_harness_leaves_no_helpers() {
        let marker = "servegate-bench-straggler";
        let script = format!(
            "sh -c 'sleep 30; echo done' {} >/dev/null 2>&1 & echo 'latency: 1.0'",
            marker
        );
        let config = shell_benchmark(&script, 5_000);

        let run = run_benchmark(&config, "http://127.0.0.1:1").await.unwrap();
        assert!(run.success);

        let mut sys = sysinfo::System::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut leaked = helpers_running(&mut sys, marker);
        while leaked > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            leaked = helpers_running(&mut sys, marker);
        }
        assert_eq!(leaked, 0);
    }

    fn helpers_running(sys: &mut sysinfo::System, marker: &str) -> usize {
        sys.refresh_processes();
        sys.processes()
            .values()
            .filter(|p| {
                !matches!(
                    p.status(),
                    sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead
                )
            })
            .filter(|p| p.cmd().iter().any(|arg| arg == marker))
            .count()
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let config = BenchmarkConfig {
            program: "/nonexistent/bench".to_string(),
            ..shell_benchmark("", 1_000)
        };
        assert!(matches!(
            run_benchmark(&config, "http://127.0.0.1:1").await,
            Err(BenchmarkError::SpawnFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_flush_cache_unreachable_is_not_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let flushed = flush_cache(&format!("http://127.0.0.1:{}", port), Duration::from_millis(500)).await;
        assert!(!flushed);
    }

    #[tokio::test]
    async fn test_stage_collects_all_violations() {
        let config = shell_benchmark(
            "echo 'latency: 2.0 s'; echo 'input throughput: 25000'; echo 'output throughput: 500'",
            5_000,
        );
        let (outcome, result) = run_stage(&config, &policy(), "http://127.0.0.1:1").await;
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(result.failures().len(), 2);
    }

    #[tokio::test]
    async fn test_stage_nonzero_exit_still_parses() {
        let config = shell_benchmark("echo 'latency: 9.0'; exit 3", 5_000);
        let (outcome, result) = run_stage(&config, &policy(), "http://127.0.0.1:1").await;
        assert_eq!(outcome.exit_code, Some(3));
        let reasons: Vec<&str> = result.failures().iter().map(|f| f.reason.as_str()).collect();
        assert!(reasons[0].contains("exited with status 3"));
        assert!(reasons.iter().any(|r| r.starts_with("latency")));
        assert!(reasons.iter().any(|r| r.starts_with("input throughput missing")));
        assert!(reasons.iter().any(|r| r.starts_with("output throughput missing")));
        assert_eq!(reasons.len(), 4);
    }
}
