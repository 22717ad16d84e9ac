// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Service health state machine with typed state transitions.
//!
//! Implements the readiness lifecycle: Pending → Ready | TimedOut | Crashed.
//! Invalid transitions result in StateTransitionError.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;

/// Health of the service under test as observed by the readiness poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    /// Still waiting for the endpoint to accept connections.
    Pending,

    /// Endpoint accepted a probe.
    Ready,

    /// Timeout elapsed without a successful probe.
    TimedOut,

    /// The leader process exited before the endpoint became reachable.
    Crashed,
}

impl HealthState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::TimedOut => "TimedOut",
            Self::Crashed => "Crashed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: HealthState) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Ready)
                | (Self::Pending, Self::TimedOut)
                | (Self::Pending, Self::Crashed)
        )
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tracks one readiness wait. Enforces valid transitions and records when
/// the terminal state was reached.
#[derive(Debug)]
pub struct HealthStateMachine {
    current_state: HealthState,
    started: Instant,
    settled_after: Option<Duration>,
}

impl HealthStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: HealthState::Pending,
            started: Instant::now(),
            settled_after: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.current_state
    }

    /// Time since the wait started, frozen once a terminal state is reached.
    pub fn elapsed(&self) -> Duration {
        self.settled_after.unwrap_or_else(|| self.started.elapsed())
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: HealthState) -> Result<(), StateTransitionError> {
        if self.current_state.is_terminal() {
            return Err(StateTransitionError::TerminalState {
                state: self.current_state.name(),
            });
        }

        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            from = %self.current_state,
            to = %target,
            elapsed_ms = self.started.elapsed().as_millis(),
            "Health state transition"
        );

        self.current_state = target;
        self.settled_after = Some(self.started.elapsed());
        Ok(())
    }
}

impl Default for HealthStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
