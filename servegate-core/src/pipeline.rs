// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end validation run.
//!
//! preconditions → launch → readiness → conformance → benchmark, with the
//! process tree torn down exactly once on every path after launch.

use crate::benchmark;
use crate::config::Config;
use crate::conformance::ConformanceChecker;
use crate::error::GateResult;
use crate::preconditions;
use crate::readiness::{self, ReadinessOutcome};
use crate::report::RunReport;
use crate::state::HealthState;
use crate::supervisor;
use crate::teardown::{ProcessTreeTeardown, ServiceGuard, Teardown};
use crate::validation::{Stage, ValidationResult};

/// Runs one validation pass over a configured deployment.
pub struct Pipeline<T: Teardown> {
    config: Config,
    teardown: T,
}

impl Pipeline<ProcessTreeTeardown> {
    /// Pipeline with the default process-tree teardown.
    pub fn new(config: Config) -> Self {
        let teardown = ProcessTreeTeardown::new(config.teardown.clone());
        Self { config, teardown }
    }
}

impl<T: Teardown> Pipeline<T> {
    pub fn with_teardown(config: Config, teardown: T) -> Self {
        Self { config, teardown }
    }

    /// Execute the run. Stage failures end up in the report; only
    /// infrastructure problems (e.g. the HTTP client cannot be built) are
    /// returned as errors, after teardown.
    pub async fn run(self) -> GateResult<RunReport> {
        let Self {
            config,
            mut teardown,
        } = self;

        let mut report = RunReport::begin(config.thresholds);
        let mut validation = ValidationResult::new();

        tracing::info!(
            required_paths = config.preconditions.required_paths.len(),
            "Checking preconditions"
        );
        validation.merge(preconditions::check(&config.preconditions));
        if validation.has_stage(Stage::Precondition) {
            report.finish(&validation);
            return Ok(report);
        }

        let handle = match supervisor::launch(&config.service) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Service launch failed");
                validation.record(Stage::Launch, e.to_string());
                report.teardown = Some(teardown.teardown(None));
                report.finish(&validation);
                return Ok(report);
            }
        };
        report.leader_pid = Some(handle.leader().value());
        report.service_started_at = Some(handle.started_at_utc());

        let guard = ServiceGuard::new(handle, teardown);

        // Any early return below drops the guard, which tears down.
        let readiness =
            readiness::wait_until_ready(&config.endpoint, &guard, &config.readiness).await?;
        report.readiness = Some(readiness);

        if readiness.state == HealthState::Ready {
            let checker = ConformanceChecker::new(&config.endpoint)?;
            let (conformance, conformance_failures) = checker.run(&config.conformance).await;
            report.conformance = Some(conformance);

            if conformance_failures.passed() {
                if config.benchmark.enabled {
                    tracing::info!("Running benchmark stage");
                    let (outcome, benchmark_failures) = benchmark::run_stage(
                        &config.benchmark,
                        &config.thresholds,
                        &config.endpoint.base_url(),
                    )
                    .await;
                    report.benchmark = Some(outcome);
                    validation.merge(benchmark_failures);
                } else {
                    tracing::info!("Benchmark stage disabled");
                }
            } else {
                tracing::warn!("Skipping benchmark after conformance failure");
                validation.merge(conformance_failures);
            }
        } else {
            validation.record(Stage::Readiness, readiness_failure(&readiness));
        }

        report.teardown = Some(guard.release());
        report.finish(&validation);

        if report.passed {
            tracing::info!("Validation passed");
        } else {
            tracing::error!(failures = report.failures.len(), "Validation failed");
        }

        Ok(report)
    }
}

fn readiness_failure(outcome: &ReadinessOutcome) -> String {
    match outcome.state {
        HealthState::Crashed => format!(
            "service process exited after {}ms before becoming ready ({} probe attempts)",
            outcome.elapsed.as_millis(),
            outcome.attempts
        ),
        state => format!(
            "service not ready: {} after {}ms ({} probe attempts, leader alive: {})",
            state,
            outcome.elapsed.as_millis(),
            outcome.attempts,
            outcome.leader_alive
        ),
    }
}
