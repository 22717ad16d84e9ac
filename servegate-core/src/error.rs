// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for servegate.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! Stage outcomes that merely fail validation are not errors: they are
//! recorded as [`crate::validation::Failure`] entries instead.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the validation gate.
#[derive(Debug, Error)]
pub enum GateError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Health State Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    // =========================================================================
    // Stage Errors
    // =========================================================================
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Benchmark error: {0}")]
    Benchmark(#[from] BenchmarkError),

    #[error("Report error: {0}")]
    Report(#[from] ReporterError),

    #[error("Failed to build HTTP client: {reason}")]
    HttpClient { reason: String },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors abort the run before anything is launched.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("Invalid endpoint '{value}': {reason}")]
    InvalidEndpoint { value: String, reason: String },
}

/// Health state transition errors.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Health check already finished in terminal state: {state}")]
    TerminalState { state: &'static str },
}

/// Process supervisor errors. Any of these is a fatal launch failure.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn service '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Failed to open service log file {path}: {reason}")]
    LogFile { path: PathBuf, reason: String },

    #[error("Spawned process reported an invalid PID: {pid}")]
    InvalidPid { pid: u32 },
}

/// Benchmark harness errors.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("Failed to spawn benchmark '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Benchmark did not finish within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Failed to collect benchmark output: {reason}")]
    Output { reason: String },
}

/// Errors that can occur while writing a run report.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Failed to create report file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using GateError.
pub type GateResult<T> = Result<T, GateError>;
