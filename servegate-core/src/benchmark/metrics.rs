// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Metric extraction from benchmark harness output.
//!
//! The harness prints free-form text. Everything fragile about reading it
//! lives in [`parse_metrics`].

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single metric as read from the output.
///
/// `Absent` and `Malformed` are both "missing": neither is ever treated as
/// a zero value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MetricReading {
    Value(f64),
    /// No line carried the metric's label.
    Absent,
    /// The label was found but its value is not a usable number.
    Malformed(String),
}

impl MetricReading {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        !matches!(self, Self::Value(_))
    }
}

impl fmt::Display for MetricReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{}", v),
            Self::Absent => write!(f, "absent"),
            Self::Malformed(raw) => write!(f, "malformed ({:?})", raw),
        }
    }
}

/// Metrics reported by one benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    pub latency_seconds: MetricReading,
    /// Tokens per second.
    pub input_throughput: MetricReading,
    /// Tokens per second.
    pub output_throughput: MetricReading,
}

fn latency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Safety: this regex literal is guaranteed to compile
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t]*(?:e2e[ \t_-]*)?latency[ \t]*(?:\(([^)\r\n]*)\))?[ \t]*[:=][ \t]*([^\r\n]*)\r?$",
        )
        .unwrap()
    })
}

fn input_throughput_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Safety: this regex literal is guaranteed to compile
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t]*input[ \t_-]*(?:tokens?[ \t_-]*)?throughput[ \t]*(?:\(([^)\r\n]*)\))?[ \t]*[:=][ \t]*([^\r\n]*)\r?$",
        )
        .unwrap()
    })
}

fn output_throughput_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Safety: this regex literal is guaranteed to compile
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t]*output[ \t_-]*(?:tokens?[ \t_-]*)?throughput[ \t]*(?:\(([^)\r\n]*)\))?[ \t]*[:=][ \t]*([^\r\n]*)\r?$",
        )
        .unwrap()
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Safety: this regex literal is guaranteed to compile
    RE.get_or_init(|| {
        Regex::new(
            r"^([+-]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d*)?(?:[eE][+-]?\d+)?|[+-]?\.\d+(?:[eE][+-]?\d+)?)[ \t]*([A-Za-z/]*)",
        )
        .unwrap()
    })
}

/// Extract latency and throughput from harness output.
///
/// Labels are matched case-insensitively at the start of a line, with
/// spaces, underscores or hyphens between words, an optional parenthesised
/// unit, then `:` or `=`. When a label appears more than once the last
/// occurrence wins (harnesses print their summary last).
pub fn parse_metrics(output: &str) -> BenchmarkMetrics {
    BenchmarkMetrics {
        latency_seconds: read_metric(latency_re(), output, true),
        input_throughput: read_metric(input_throughput_re(), output, false),
        output_throughput: read_metric(output_throughput_re(), output, false),
    }
}

fn read_metric(re: &Regex, output: &str, is_latency: bool) -> MetricReading {
    let Some(caps) = re.captures_iter(output).last() else {
        return MetricReading::Absent;
    };

    let label_unit = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
    let raw = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

    let Some(num) = number_re().captures(raw) else {
        return MetricReading::Malformed(raw.to_string());
    };

    let digits = num[1].replace(',', "");
    let value = match digits.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => return MetricReading::Malformed(raw.to_string()),
    };

    if is_latency {
        let unit = match num.get(2).map(|m| m.as_str()) {
            Some(u) if !u.is_empty() => u,
            _ => label_unit,
        };
        if unit.eq_ignore_ascii_case("ms") {
            return MetricReading::Value(value / 1000.0);
        }
    }

    MetricReading::Value(value)
}
