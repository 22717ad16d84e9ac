// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Every value that bounds a stage (timeouts, intervals, thresholds) is
//! validated before anything is launched. Any invalid field results in a
//! HardValidationError that prevents the run from starting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult, HardValidationError};
use crate::types::{Endpoint, Port};

// =============================================================================
// Raw configuration as parsed from YAML (before validation)
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawServiceConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    environment: HashMap<String, String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for RawEndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum RawProbeKind {
    #[default]
    Tcp,
    Http,
}

#[derive(Debug, Deserialize)]
struct RawReadinessConfig {
    #[serde(default = "default_ready_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    probe_timeout_ms: u64,
    #[serde(default)]
    probe: RawProbeKind,
    #[serde(default = "default_health_path")]
    health_path: String,
}

fn default_ready_timeout_ms() -> u64 {
    300_000 // 5 minutes: model loading dominates startup
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for RawReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_ready_timeout_ms(),
            interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe: RawProbeKind::default(),
            health_path: default_health_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConformanceConfig {
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_prompt")]
    prompt: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    stream_timeout_ms: u64,
    #[serde(default)]
    check_models: bool,
}

fn default_model() -> String {
    "default".to_string()
}

fn default_prompt() -> String {
    "What is the capital of France?".to_string()
}

fn default_max_tokens() -> u32 {
    32
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

impl Default for RawConformanceConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            prompt: default_prompt(),
            max_tokens: default_max_tokens(),
            request_timeout_ms: default_request_timeout_ms(),
            stream_timeout_ms: default_request_timeout_ms(),
            check_models: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBenchmarkConfig {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_bench_program")]
    program: String,
    #[serde(default = "default_bench_args")]
    args: Vec<String>,
    #[serde(default)]
    model_path: String,
    #[serde(default = "default_batch_size")]
    batch_size: u32,
    #[serde(default = "default_input_len")]
    input_len: u32,
    #[serde(default = "default_output_len")]
    output_len: u32,
    #[serde(default = "default_bench_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    flush_cache: bool,
}

fn default_true() -> bool {
    true
}

fn default_bench_program() -> String {
    "python3".to_string()
}

fn default_bench_args() -> Vec<String> {
    [
        "-m",
        "sglang.bench_one_batch_server",
        "--model-path",
        "{model_path}",
        "--base-url",
        "{base_url}",
        "--batch-size",
        "{batch_size}",
        "--input-len",
        "{input_len}",
        "--output-len",
        "{output_len}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_batch_size() -> u32 {
    16
}

fn default_input_len() -> u32 {
    1024
}

fn default_output_len() -> u32 {
    32
}

fn default_bench_timeout_ms() -> u64 {
    1_800_000 // 30 minutes
}

impl Default for RawBenchmarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_bench_program(),
            args: default_bench_args(),
            model_path: String::new(),
            batch_size: default_batch_size(),
            input_len: default_input_len(),
            output_len: default_output_len(),
            timeout_ms: default_bench_timeout_ms(),
            flush_cache: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawThresholds {
    max_latency_seconds: f64,
    min_input_throughput: f64,
    min_output_throughput: f64,
}

#[derive(Debug, Deserialize)]
struct RawTeardownConfig {
    #[serde(default = "default_grace_period_ms")]
    grace_period_ms: u64,
    #[serde(default)]
    match_pattern: Option<String>,
}

fn default_grace_period_ms() -> u64 {
    5_000
}

impl Default for RawTeardownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            match_pattern: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawPreconditionConfig {
    #[serde(default)]
    required_paths: Vec<String>,
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    service: RawServiceConfig,
    #[serde(default)]
    endpoint: RawEndpointConfig,
    #[serde(default)]
    readiness: RawReadinessConfig,
    #[serde(default)]
    conformance: RawConformanceConfig,
    #[serde(default)]
    benchmark: RawBenchmarkConfig,
    thresholds: RawThresholds,
    #[serde(default)]
    teardown: RawTeardownConfig,
    #[serde(default)]
    preconditions: RawPreconditionConfig,
}

// =============================================================================
// Validated configuration
// =============================================================================

/// How to launch the service under test.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub command: String,
    pub args: Vec<String>,
    pub environment: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Service stdout/stderr are appended here; inherited when unset.
    pub log_file: Option<PathBuf>,
}

/// Readiness probe flavour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeKind {
    /// Connection accepted on host:port.
    Tcp,
    /// `GET <health_path>` answers with a 2xx status.
    Http { health_path: String },
}

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub probe: ProbeKind,
}

#[derive(Debug, Clone)]
pub struct ConformanceConfig {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub stream_timeout: Duration,
    pub check_models: bool,
}

#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub enabled: bool,
    pub program: String,
    /// Argument templates; see [`crate::benchmark::render_args`].
    pub args: Vec<String>,
    pub model_path: String,
    pub batch_size: u32,
    pub input_len: u32,
    pub output_len: u32,
    pub timeout: Duration,
    pub flush_cache: bool,
}

/// SLA thresholds the benchmark must meet. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub max_latency_seconds: f64,
    pub min_input_throughput: f64,
    pub min_output_throughput: f64,
}

#[derive(Debug, Clone)]
pub struct TeardownConfig {
    pub grace_period: Duration,
    /// Command-line substring identifying stray service processes.
    pub match_pattern: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PreconditionConfig {
    pub required_paths: Vec<PathBuf>,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub endpoint: Endpoint,
    pub readiness: ReadinessConfig,
    pub conformance: ConformanceConfig,
    pub benchmark: BenchmarkConfig,
    pub thresholds: ThresholdPolicy,
    pub teardown: TeardownConfig,
    pub preconditions: PreconditionConfig,
}

/// Command-line overrides layered on top of a loaded file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub endpoint: Option<Endpoint>,
    pub timeout_ms: Option<u64>,
    pub interval_ms: Option<u64>,
    pub max_latency_seconds: Option<f64>,
    pub min_input_throughput: Option<f64>,
    pub min_output_throughput: Option<f64>,
    pub skip_benchmark: bool,
}

impl Config {
    /// Apply overrides, re-checking the same invariants as file values.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> GateResult<()> {
        if let Some(endpoint) = &overrides.endpoint {
            self.endpoint = endpoint.clone();
        }

        let timeout_ms = overrides
            .timeout_ms
            .unwrap_or(self.readiness.timeout.as_millis() as u64);
        let interval_ms = overrides
            .interval_ms
            .unwrap_or(self.readiness.interval.as_millis() as u64);
        validate_poll_window(timeout_ms, interval_ms)?;
        self.readiness.timeout = Duration::from_millis(timeout_ms);
        self.readiness.interval = Duration::from_millis(interval_ms);

        let thresholds = ThresholdPolicy {
            max_latency_seconds: overrides
                .max_latency_seconds
                .unwrap_or(self.thresholds.max_latency_seconds),
            min_input_throughput: overrides
                .min_input_throughput
                .unwrap_or(self.thresholds.min_input_throughput),
            min_output_throughput: overrides
                .min_output_throughput
                .unwrap_or(self.thresholds.min_output_throughput),
        };
        self.thresholds = validate_thresholds(thresholds)?;

        if overrides.skip_benchmark {
            self.benchmark.enabled = false;
        }

        Ok(())
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> GateResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(GateError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| GateError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> GateResult<Config> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| GateError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> GateResult<Config> {
        Ok(Config {
            service: Self::validate_service(raw.service)?,
            endpoint: Endpoint::new(raw.endpoint.host, Port::new(raw.endpoint.port)?)?,
            readiness: Self::validate_readiness(raw.readiness)?,
            conformance: Self::validate_conformance(raw.conformance)?,
            benchmark: Self::validate_benchmark(raw.benchmark)?,
            thresholds: validate_thresholds(ThresholdPolicy {
                max_latency_seconds: raw.thresholds.max_latency_seconds,
                min_input_throughput: raw.thresholds.min_input_throughput,
                min_output_throughput: raw.thresholds.min_output_throughput,
            })?,
            teardown: Self::validate_teardown(raw.teardown)?,
            preconditions: PreconditionConfig {
                required_paths: raw
                    .preconditions
                    .required_paths
                    .into_iter()
                    .map(PathBuf::from)
                    .collect(),
            },
        })
    }

    fn validate_service(raw: RawServiceConfig) -> GateResult<ServiceConfig> {
        if raw.command.trim().is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "command",
                context: "service".to_string(),
            }
            .into());
        }

        if raw.environment.keys().any(|k| k.is_empty()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "environment",
                value: "empty key in service".to_string(),
                reason: "Environment variable names cannot be empty".to_string(),
            }
            .into());
        }

        Ok(ServiceConfig {
            command: raw.command,
            args: raw.args,
            environment: raw.environment,
            working_dir: raw.working_dir.map(PathBuf::from),
            log_file: raw.log_file.map(PathBuf::from),
        })
    }

    fn validate_readiness(raw: RawReadinessConfig) -> GateResult<ReadinessConfig> {
        validate_poll_window(raw.timeout_ms, raw.interval_ms)?;

        if raw.probe_timeout_ms == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "probe_timeout_ms",
                value: "0".to_string(),
                reason: "Probe timeout must be greater than 0".to_string(),
            }
            .into());
        }

        let probe = match raw.probe {
            RawProbeKind::Tcp => ProbeKind::Tcp,
            RawProbeKind::Http => {
                if !raw.health_path.starts_with('/') {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "health_path",
                        value: raw.health_path,
                        reason: "Health path must start with '/'".to_string(),
                    }
                    .into());
                }
                ProbeKind::Http {
                    health_path: raw.health_path,
                }
            }
        };

        Ok(ReadinessConfig {
            timeout: Duration::from_millis(raw.timeout_ms),
            interval: Duration::from_millis(raw.interval_ms),
            probe_timeout: Duration::from_millis(raw.probe_timeout_ms),
            probe,
        })
    }

    fn validate_conformance(raw: RawConformanceConfig) -> GateResult<ConformanceConfig> {
        if raw.model.is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "model",
                context: "conformance".to_string(),
            }
            .into());
        }

        if raw.max_tokens == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "max_tokens",
                value: "0".to_string(),
                reason: "At least one output token is required".to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("request_timeout_ms", raw.request_timeout_ms),
            ("stream_timeout_ms", raw.stream_timeout_ms),
        ] {
            if value == 0 {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: "0".to_string(),
                    reason: "Timeout must be greater than 0".to_string(),
                }
                .into());
            }
        }

        Ok(ConformanceConfig {
            model: raw.model,
            prompt: raw.prompt,
            max_tokens: raw.max_tokens,
            request_timeout: Duration::from_millis(raw.request_timeout_ms),
            stream_timeout: Duration::from_millis(raw.stream_timeout_ms),
            check_models: raw.check_models,
        })
    }

    fn validate_benchmark(raw: RawBenchmarkConfig) -> GateResult<BenchmarkConfig> {
        if raw.program.trim().is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "program",
                context: "benchmark".to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("batch_size", raw.batch_size),
            ("input_len", raw.input_len),
            ("output_len", raw.output_len),
        ] {
            if value == 0 {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: "0".to_string(),
                    reason: "Must be greater than 0".to_string(),
                }
                .into());
            }
        }

        if raw.timeout_ms == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "timeout_ms",
                value: "0".to_string(),
                reason: "Benchmark timeout must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(BenchmarkConfig {
            enabled: raw.enabled,
            program: raw.program,
            args: raw.args,
            model_path: raw.model_path,
            batch_size: raw.batch_size,
            input_len: raw.input_len,
            output_len: raw.output_len,
            timeout: Duration::from_millis(raw.timeout_ms),
            flush_cache: raw.flush_cache,
        })
    }

    fn validate_teardown(raw: RawTeardownConfig) -> GateResult<TeardownConfig> {
        if raw.grace_period_ms > 60_000 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "grace_period_ms",
                value: raw.grace_period_ms.to_string(),
                reason: "Grace period must not exceed 60000ms".to_string(),
            }
            .into());
        }

        let match_pattern = raw.match_pattern.filter(|p| !p.trim().is_empty());

        Ok(TeardownConfig {
            grace_period: Duration::from_millis(raw.grace_period_ms),
            match_pattern,
        })
    }
}

fn validate_poll_window(timeout_ms: u64, interval_ms: u64) -> Result<(), HardValidationError> {
    if timeout_ms == 0 {
        return Err(HardValidationError::InvalidFieldValue {
            field: "timeout_ms",
            value: "0".to_string(),
            reason: "Readiness timeout must be greater than 0".to_string(),
        });
    }

    if interval_ms == 0 || interval_ms >= timeout_ms {
        return Err(HardValidationError::InvalidFieldValue {
            field: "interval_ms",
            value: interval_ms.to_string(),
            reason: format!(
                "Poll interval must be greater than 0 and less than the timeout ({}ms)",
                timeout_ms
            ),
        });
    }

    Ok(())
}

fn validate_thresholds(policy: ThresholdPolicy) -> Result<ThresholdPolicy, HardValidationError> {
    if !policy.max_latency_seconds.is_finite() || policy.max_latency_seconds <= 0.0 {
        return Err(HardValidationError::InvalidFieldValue {
            field: "max_latency_seconds",
            value: policy.max_latency_seconds.to_string(),
            reason: "Must be a positive number".to_string(),
        });
    }

    for (field, value) in [
        ("min_input_throughput", policy.min_input_throughput),
        ("min_output_throughput", policy.min_output_throughput),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(HardValidationError::InvalidFieldValue {
                field,
                value: value.to_string(),
                reason: "Must be a non-negative number".to_string(),
            });
        }
    }

    Ok(policy)
}
