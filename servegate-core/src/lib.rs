// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Servegate Core Library
//!
//! Readiness and validation gate for a multi-process model-serving
//! deployment. Launches the service, waits for it to answer, checks the
//! chat-completion API in synchronous and streamed form, runs a benchmark
//! against SLA thresholds, and tears the whole process tree down on every
//! exit path.

pub mod benchmark;
pub mod config;
pub mod conformance;
pub mod error;
pub mod pipeline;
pub mod preconditions;
pub mod readiness;
pub mod report;
pub mod state;
pub mod supervisor;
pub mod teardown;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use benchmark::{parse_metrics, BenchmarkMetrics, MetricReading};
pub use config::{Config, ConfigLoader, ConfigOverrides, ThresholdPolicy};
pub use conformance::{ConformanceChecker, ConformanceResult};
pub use error::{GateError, GateResult, HardValidationError};
pub use pipeline::Pipeline;
pub use readiness::{wait_until_ready, Liveness, ReadinessOutcome};
pub use report::{JsonReporter, RunReport};
pub use state::{HealthState, HealthStateMachine};
pub use supervisor::ServiceHandle;
pub use teardown::{ProcessTreeTeardown, ServiceGuard, Teardown, TeardownReport};
pub use types::{Endpoint, Port, ProcessId};
pub use validation::{Failure, Stage, ValidationResult};
