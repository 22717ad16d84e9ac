// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Pre-launch checks. Nothing is started if any of these fail.

use crate::config::PreconditionConfig;
use crate::validation::{Stage, ValidationResult};

/// Every required path (model artifacts, launch scripts) must exist.
pub fn check(config: &PreconditionConfig) -> ValidationResult {
    let mut result = ValidationResult::new();
    for path in &config.required_paths {
        if !path.exists() {
            tracing::error!(path = %path.display(), "Required path missing");
            result.record(
                Stage::Precondition,
                format!("required path {} does not exist", path.display()),
            );
        }
    }
    result
}
