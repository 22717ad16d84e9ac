// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `servegate run` command - Launch, validate, tear down.

use servegate_core::{ConfigLoader, ConfigOverrides, Endpoint, JsonReporter, Pipeline};

use crate::RunArgs;

pub async fn execute(config_path: &str, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(config = %config_path, "Starting validation run");

    // Fail fast on invalid config or overrides, before anything is launched
    let mut config = ConfigLoader::load_file(config_path)?;
    let endpoint = args
        .endpoint
        .as_deref()
        .map(str::parse::<Endpoint>)
        .transpose()?;
    config.apply_overrides(&ConfigOverrides {
        endpoint,
        timeout_ms: args.timeout_ms,
        interval_ms: args.interval_ms,
        max_latency_seconds: args.max_latency,
        min_input_throughput: args.min_input_throughput,
        min_output_throughput: args.min_output_throughput,
        skip_benchmark: args.skip_benchmark,
    })?;

    let report = Pipeline::new(config).run().await?;

    if let Some(dir) = &args.report_dir {
        match JsonReporter::new(dir).and_then(|reporter| reporter.save(&report)) {
            Ok(path) => println!("Report: {}", path.display()),
            Err(e) => tracing::warn!(error = %e, "Could not write run report"),
        }
    }

    if report.passed {
        println!("PASS");
        return Ok(());
    }

    println!("FAIL ({} failure(s))", report.failures.len());
    for failure in &report.failures {
        eprintln!("  ✗ {}", failure);
    }
    std::process::exit(1);
}
