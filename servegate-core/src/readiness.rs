// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Readiness poller.
//!
//! Probes the service endpoint until it answers, the leader process dies, or
//! the timeout elapses. Liveness is checked after every failed probe so a
//! crashed deployment fails fast instead of consuming the whole timeout.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpStream;

use crate::config::{ProbeKind, ReadinessConfig};
use crate::error::{GateError, GateResult};
use crate::state::{HealthState, HealthStateMachine};
use crate::supervisor::{self, ServiceHandle};
use crate::teardown::{ServiceGuard, Teardown};
use crate::types::Endpoint;

/// Anything that can tell whether the service leader is still running.
pub trait Liveness {
    fn is_alive(&self) -> bool;
}

impl Liveness for ServiceHandle {
    fn is_alive(&self) -> bool {
        supervisor::is_alive(self)
    }
}

impl<T: Teardown> Liveness for ServiceGuard<T> {
    fn is_alive(&self) -> bool {
        self.handle().map(supervisor::is_alive).unwrap_or(false)
    }
}

impl<F> Liveness for F
where
    F: Fn() -> bool,
{
    fn is_alive(&self) -> bool {
        self()
    }
}

/// Result of one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadinessOutcome {
    pub state: HealthState,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub attempts: u32,
    /// Last observed liveness of the leader.
    pub leader_alive: bool,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Wait until the endpoint is ready, the leader crashes, or time runs out.
///
/// A successful probe is decided before liveness is consulted, so a probe
/// that succeeds while the leader is dying still yields `Ready`.
///
/// # Errors
/// Returns GateError::HttpClient if the HTTP health client cannot be built.
/// Nothing has been polled in that case.
pub async fn wait_until_ready(
    endpoint: &Endpoint,
    liveness: &impl Liveness,
    config: &ReadinessConfig,
) -> GateResult<ReadinessOutcome> {
    let client = health_client(config)?;

    let mut health = HealthStateMachine::new();
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut leader_alive = true;

    tracing::info!(
        endpoint = %endpoint,
        timeout_ms = config.timeout.as_millis(),
        interval_ms = config.interval.as_millis(),
        probe = ?config.probe,
        "Waiting for service readiness"
    );

    let terminal = loop {
        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            break HealthState::TimedOut;
        }

        attempts += 1;
        if probe(endpoint, &config.probe, config.probe_timeout, client.as_ref()).await {
            break HealthState::Ready;
        }

        leader_alive = liveness.is_alive();
        if !leader_alive {
            break HealthState::Crashed;
        }

        tracing::debug!(
            attempt = attempts,
            elapsed_ms = start.elapsed().as_millis(),
            "Endpoint not ready yet"
        );

        let remaining = config.timeout.saturating_sub(start.elapsed());
        tokio::time::sleep(config.interval.min(remaining)).await;
    };

    // Pending → terminal is always a valid transition.
    let _ = health.transition_to(terminal);

    let outcome = ReadinessOutcome {
        state: health.state(),
        elapsed: health.elapsed(),
        attempts,
        leader_alive,
    };

    match outcome.state {
        HealthState::Ready => tracing::info!(
            elapsed_ms = outcome.elapsed.as_millis(),
            attempts,
            "Service is ready"
        ),
        state => tracing::error!(
            state = %state,
            elapsed_ms = outcome.elapsed.as_millis(),
            attempts,
            leader_alive,
            "Service did not become ready"
        ),
    }

    Ok(outcome)
}

/// Client for HTTP health checks, built once per wait. `None` for TCP.
fn health_client(config: &ReadinessConfig) -> GateResult<Option<reqwest::Client>> {
    match &config.probe {
        ProbeKind::Tcp => Ok(None),
        ProbeKind::Http { .. } => reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map(Some)
            .map_err(|e| {
                tracing::error!(error = %e, "Cannot build HTTP health client");
                GateError::HttpClient {
                    reason: e.to_string(),
                }
            }),
    }
}

/// One bounded probe attempt.
async fn probe(
    endpoint: &Endpoint,
    kind: &ProbeKind,
    probe_timeout: Duration,
    client: Option<&reqwest::Client>,
) -> bool {
    match kind {
        ProbeKind::Tcp => matches!(
            tokio::time::timeout(probe_timeout, TcpStream::connect(endpoint.authority())).await,
            Ok(Ok(_))
        ),
        ProbeKind::Http { health_path } => {
            let Some(client) = client else {
                return false;
            };
            let url = format!("{}{}", endpoint.base_url(), health_path);
            match client.get(&url).send().await {
                Ok(resp) => resp.status().is_success(),
                Err(e) => {
                    tracing::trace!(url = %url, error = %e, "Health probe failed");
                    false
                }
            }
        }
    }
}
