// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `servegate parse` command - Check saved benchmark output offline.

use servegate_core::benchmark::validate;
use servegate_core::{parse_metrics, ConfigLoader};

pub async fn execute(config_path: &str, file: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let output = tokio::fs::read_to_string(file).await?;

    tracing::info!(file = %file, bytes = output.len(), "Parsing benchmark output");

    let metrics = parse_metrics(&output);
    println!("Latency:            {}", metrics.latency_seconds);
    println!("Input throughput:   {}", metrics.input_throughput);
    println!("Output throughput:  {}", metrics.output_throughput);

    let result = validate(&metrics, &config.thresholds);
    if result.passed() {
        println!("PASS");
        return Ok(());
    }

    println!("FAIL ({} failure(s))", result.failures().len());
    for failure in result.failures() {
        eprintln!("  ✗ {}", failure);
    }
    std::process::exit(1);
}
