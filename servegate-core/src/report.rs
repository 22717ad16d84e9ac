// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! JSON run report.
//!
//! Saves the outcome of a validation run to a timestamped JSON file so CI
//! jobs can archive it next to the service logs.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;

use crate::benchmark::BenchmarkOutcome;
use crate::config::ThresholdPolicy;
use crate::conformance::ConformanceResult;
use crate::error::ReporterError;
use crate::readiness::ReadinessOutcome;
use crate::teardown::TeardownReport;
use crate::validation::{Failure, ValidationResult};

/// Host the run executed on.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub os_version: String,
    pub kernel_version: Option<String>,
    pub cpu_model: String,
    pub cpu_cores: usize,
    /// Total system memory in bytes
    pub memory_bytes: u64,
    pub hostname: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        Self {
            os: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version(),
            cpu_model: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            cpu_cores: sys.cpus().len(),
            memory_bytes: sys.total_memory(),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// Everything one run produced. Stages that never ran are `None`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub passed: bool,
    /// Ordered, first stage first.
    pub failures: Vec<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_pid: Option<u32>,
    /// When the service was launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conformance: Option<ConformanceResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown: Option<TeardownReport>,
    pub thresholds: ThresholdPolicy,
    pub system: SystemInfo,
}

impl RunReport {
    /// Empty report for a run starting now.
    pub fn begin(thresholds: ThresholdPolicy) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            passed: false,
            failures: Vec::new(),
            leader_pid: None,
            service_started_at: None,
            readiness: None,
            conformance: None,
            benchmark: None,
            teardown: None,
            thresholds,
            system: SystemInfo::collect(),
        }
    }

    /// Stamp the end time and copy in the final verdict.
    pub fn finish(&mut self, validation: &ValidationResult) {
        self.finished_at = Utc::now();
        self.passed = validation.passed();
        self.failures = validation.failures().to_vec();
    }
}

/// Writes run reports into one directory.
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create a reporter, creating the output directory if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// Save a report to `servegate_<timestamp>.json`.
    ///
    /// Returns the path to the created file.
    pub fn save(&self, report: &RunReport) -> Result<PathBuf, ReporterError> {
        let timestamp = report.finished_at.format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let filepath = self
            .output_dir
            .join(format!("servegate_{}.json", timestamp));

        let file = File::create(&filepath)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, report)?;

        tracing::info!(path = %filepath.display(), "Saved run report");
        Ok(filepath)
    }
}
