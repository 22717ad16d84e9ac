// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `servegate check` command - Validate configuration file.

use servegate_core::config::ProbeKind;
use servegate_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Service:");
            println!(
                "  Command:            {} {}",
                config.service.command,
                config.service.args.join(" ")
            );
            println!("  Endpoint:           {}", config.endpoint);
            println!();
            println!("Readiness:");
            println!("  Timeout:            {}ms", config.readiness.timeout.as_millis());
            println!("  Interval:           {}ms", config.readiness.interval.as_millis());
            match &config.readiness.probe {
                ProbeKind::Tcp => println!("  Probe:              tcp"),
                ProbeKind::Http { health_path } => {
                    println!("  Probe:              http {}", health_path)
                }
            }
            println!();
            println!("Conformance:");
            println!("  Model:              {}", config.conformance.model);
            println!("  Max Tokens:         {}", config.conformance.max_tokens);
            println!(
                "  Check Models:       {}",
                if config.conformance.check_models { "yes" } else { "no" }
            );
            println!();
            if config.benchmark.enabled {
                println!("Benchmark:");
                println!(
                    "  Harness:            {} {}",
                    config.benchmark.program,
                    config.benchmark.args.join(" ")
                );
                println!(
                    "  Batch/In/Out:       {}/{}/{}",
                    config.benchmark.batch_size,
                    config.benchmark.input_len,
                    config.benchmark.output_len
                );
                println!("  Timeout:            {}ms", config.benchmark.timeout.as_millis());
            } else {
                println!("Benchmark:            disabled");
            }
            println!();
            println!("Thresholds:");
            println!(
                "  Max Latency:        {:.3} s",
                config.thresholds.max_latency_seconds
            );
            println!(
                "  Min Input Tput:     {:.2} tok/s",
                config.thresholds.min_input_throughput
            );
            println!(
                "  Min Output Tput:    {:.2} tok/s",
                config.thresholds.min_output_throughput
            );
            println!();
            println!(
                "Teardown grace:       {}ms",
                config.teardown.grace_period.as_millis()
            );
            if !config.preconditions.required_paths.is_empty() {
                println!(
                    "Required paths ({}):",
                    config.preconditions.required_paths.len()
                );
                for path in &config.preconditions.required_paths {
                    println!("  - {}", path.display());
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
