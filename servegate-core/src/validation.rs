// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Accumulated validation outcome.
//!
//! Failures are append-only and keep their order: a later stage never hides
//! what an earlier stage reported.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Precondition,
    Launch,
    Readiness,
    Conformance,
    Benchmark,
}

impl Stage {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::Launch => "launch",
            Self::Readiness => "readiness",
            Self::Conformance => "conformance",
            Self::Benchmark => "benchmark",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One reason the run did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub stage: Stage,
    pub reason: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.reason)
    }
}

/// Ordered list of failures. Passes iff nothing was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    failures: Vec<Failure>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn record(&mut self, stage: Stage, reason: impl Into<String>) {
        let failure = Failure {
            stage,
            reason: reason.into(),
        };
        tracing::debug!(failure = %failure, "Recorded validation failure");
        self.failures.push(failure);
    }

    /// Append another result's failures after the ones already recorded.
    pub fn merge(&mut self, other: ValidationResult) {
        self.failures.extend(other.failures);
    }

    /// Whether any failure came from the given stage.
    pub fn has_stage(&self, stage: Stage) -> bool {
        self.failures.iter().any(|f| f.stage == stage)
    }
}

/// Shorten a response body for inclusion in a failure message.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_passes() {
        let result = ValidationResult::new();
        assert!(result.passed());
        assert!(result.failures().is_empty());
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut first = ValidationResult::new();
        first.record(Stage::Conformance, "sync check failed");

        let mut second = ValidationResult::new();
        second.record(Stage::Benchmark, "latency too high");
        second.record(Stage::Benchmark, "output throughput too low");

        first.merge(second);
        assert!(!first.passed());
        let stages: Vec<Stage> = first.failures().iter().map(|f| f.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::Conformance, Stage::Benchmark, Stage::Benchmark]
        );
        assert!(first.has_stage(Stage::Benchmark));
        assert!(!first.has_stage(Stage::Readiness));
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure {
            stage: Stage::Readiness,
            reason: "timed out".to_string(),
        };
        assert_eq!(failure.to_string(), "[readiness] timed out");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("abcdef", 3), "abc…");
        assert_eq!(excerpt("ééééé", 2), "éé…");
    }
}
