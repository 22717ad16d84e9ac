// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SLA threshold validation.
//!
//! Every metric is checked; nothing short-circuits. A run that breaks two
//! thresholds reports both.

use crate::config::ThresholdPolicy;
use crate::validation::{Stage, ValidationResult};

use super::metrics::{BenchmarkMetrics, MetricReading};

#[derive(Debug, Clone, Copy)]
enum Bound {
    AtMost(f64),
    AtLeast(f64),
}

struct MetricCheck<'a> {
    name: &'static str,
    unit: &'static str,
    reading: &'a MetricReading,
    bound: Bound,
}

/// Compare metrics against the policy. One failure per violated or missing
/// metric; passes only when none were recorded.
pub fn validate(metrics: &BenchmarkMetrics, policy: &ThresholdPolicy) -> ValidationResult {
    let checks = [
        MetricCheck {
            name: "latency",
            unit: "s",
            reading: &metrics.latency_seconds,
            bound: Bound::AtMost(policy.max_latency_seconds),
        },
        MetricCheck {
            name: "input throughput",
            unit: "tok/s",
            reading: &metrics.input_throughput,
            bound: Bound::AtLeast(policy.min_input_throughput),
        },
        MetricCheck {
            name: "output throughput",
            unit: "tok/s",
            reading: &metrics.output_throughput,
            bound: Bound::AtLeast(policy.min_output_throughput),
        },
    ];

    let mut result = ValidationResult::new();
    for check in &checks {
        if let Some(reason) = check_metric(check) {
            tracing::warn!(metric = check.name, reason = %reason, "Threshold check failed");
            result.record(Stage::Benchmark, reason);
        }
    }
    result
}

fn check_metric(check: &MetricCheck<'_>) -> Option<String> {
    let value = match check.reading {
        MetricReading::Value(v) => *v,
        MetricReading::Absent => {
            return Some(format!("{} missing from benchmark output", check.name));
        }
        MetricReading::Malformed(raw) => {
            return Some(format!(
                "{} missing: unparsable value {:?} in benchmark output",
                check.name, raw
            ));
        }
    };

    match check.bound {
        Bound::AtMost(max) if value > max => Some(format!(
            "{} {:.3} {} exceeds maximum {:.3} {}",
            check.name, value, check.unit, max, check.unit
        )),
        Bound::AtLeast(min) if value < min => Some(format!(
            "{} {:.2} {} below minimum {:.2} {}",
            check.name, value, check.unit, min, check.unit
        )),
        _ => None,
    }
}
