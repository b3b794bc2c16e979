//! IdP health state machine
//!
//! Two modes, driven only by probe outcomes:
//!
//! ```text
//!            failures >= failure_threshold
//!   Healthy ------------------------------> Fallback
//!      ^                                       |
//!      +---------------------------------------+
//!            successes >= success_threshold
//! ```
//!
//! A success zeroes the failure counter and a failure zeroes the success
//! counter, so at most one counter is ever non-zero. Both reset on a mode
//! change. [`IdpHealthState::apply`] is pure; the server crate decides where
//! the state lives.

use crate::event::Reason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which authentication path is primary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthMode {
    /// OAuth2 via the IdP
    #[default]
    Healthy,
    /// Local mTLS
    Fallback,
}

impl HealthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthMode::Healthy => "healthy",
            HealthMode::Fallback => "fallback",
        }
    }
}

impl fmt::Display for HealthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Consecutive failures that switch Healthy -> Fallback
    pub failure_threshold: u32,
    /// Consecutive successes that switch Fallback -> Healthy
    pub success_threshold: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        HealthThresholds {
            failure_threshold: 3,
            success_threshold: 5,
        }
    }
}

/// Why a probe counted as a failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned HTTP {0}")]
    Status(u16),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Probe task panicked or was cancelled
    #[error("probe aborted: {0}")]
    Aborted(String),
}

impl ProbeFailure {
    pub fn reason(&self) -> Reason {
        Reason::ServerError
    }
}

/// Outcome of one probe
pub type ProbeOutcome = Result<(), ProbeFailure>;

/// Published health state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdpHealthState {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub mode: HealthMode,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_check_duration: Duration,
}

/// Result of folding one probe outcome into the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: IdpHealthState,
    /// `Some((from, to))` when the mode changed
    pub changed: Option<(HealthMode, HealthMode)>,
}

impl IdpHealthState {
    /// Healthy, no probes yet
    pub fn initial() -> Self {
        IdpHealthState {
            consecutive_failures: 0,
            consecutive_successes: 0,
            mode: HealthMode::Healthy,
            last_check_at: None,
            last_check_duration: Duration::ZERO,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.mode == HealthMode::Fallback
    }

    /// Fold one probe outcome into the state
    pub fn apply(
        &self,
        outcome: &ProbeOutcome,
        thresholds: HealthThresholds,
        at: DateTime<Utc>,
        duration: Duration,
    ) -> Transition {
        let mut next = IdpHealthState {
            last_check_at: Some(at),
            last_check_duration: duration,
            ..*self
        };

        match outcome {
            Ok(()) => {
                next.consecutive_successes = next.consecutive_successes.saturating_add(1);
                next.consecutive_failures = 0;
            }
            Err(_) => {
                next.consecutive_failures = next.consecutive_failures.saturating_add(1);
                next.consecutive_successes = 0;
            }
        }

        let target = match next.mode {
            HealthMode::Healthy if next.consecutive_failures >= thresholds.failure_threshold => {
                Some(HealthMode::Fallback)
            }
            HealthMode::Fallback if next.consecutive_successes >= thresholds.success_threshold => {
                Some(HealthMode::Healthy)
            }
            _ => None,
        };

        let changed = target.map(|to| {
            let from = next.mode;
            next.mode = to;
            next.consecutive_failures = 0;
            next.consecutive_successes = 0;
            (from, to)
        });

        Transition {
            state: next,
            changed,
        }
    }
}

impl Default for IdpHealthState {
    fn default() -> Self {
        Self::initial()
    }
}
