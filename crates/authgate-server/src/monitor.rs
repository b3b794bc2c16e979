//! IdP health monitor
//!
//! Probes the provider on a fixed interval and owns the fallback flag. The
//! state is one `Copy` value behind an `ArcSwap`: request handlers load it
//! without locking and always see a whole state, never a counter from one
//! probe and a mode from another.
//!
//! Each probe runs in its own task under its own timeout, so a hanging or
//! panicking probe counts as a failure and never stalls the loop.

use crate::idp::IdpClient;
use arc_swap::ArcSwap;
use authgate_core::event::{AuthEvent, EventSink, EventType};
use authgate_core::health::{
    HealthMode, HealthThresholds, IdpHealthState, ProbeFailure, ProbeOutcome, Transition,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct IdpHealthMonitor {
    client: Arc<dyn IdpClient>,
    state: ArcSwap<IdpHealthState>,
    thresholds: HealthThresholds,
    probe_interval: Duration,
    probe_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl IdpHealthMonitor {
    pub fn new(
        client: Arc<dyn IdpClient>,
        thresholds: HealthThresholds,
        probe_interval: Duration,
        probe_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            client,
            state: ArcSwap::from_pointee(IdpHealthState::initial()),
            thresholds,
            probe_interval,
            probe_timeout,
            events,
        }
    }

    /// Whether requests should take the mTLS path
    pub fn is_fallback_active(&self) -> bool {
        self.state.load().is_fallback()
    }

    /// Current state as one consistent value
    pub fn snapshot(&self) -> IdpHealthState {
        **self.state.load()
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    /// Run one probe and fold its outcome into the state
    pub async fn probe_once(&self) -> Transition {
        let started = Instant::now();
        let client = Arc::clone(&self.client);
        let mut task = tokio::spawn(async move { client.probe().await });

        let outcome = match time::timeout(self.probe_timeout, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(ProbeFailure::Aborted(join_error.to_string())),
            Err(_) => {
                task.abort();
                Err(ProbeFailure::Timeout(self.probe_timeout))
            }
        };

        self.record(outcome, Utc::now(), started.elapsed())
    }

    fn record(&self, outcome: ProbeOutcome, at: DateTime<Utc>, duration: Duration) -> Transition {
        // rcu hands back the state its winning closure saw; apply is pure
        let previous = self.state.rcu(|state| {
            state.apply(&outcome, self.thresholds, at, duration).state
        });
        let transition = previous.apply(&outcome, self.thresholds, at, duration);
        let state = transition.state;

        match &outcome {
            Ok(()) => debug!(
                successes = state.consecutive_successes,
                duration_ms = duration.as_millis() as u64,
                "IdP probe succeeded"
            ),
            Err(e) => debug!(
                failures = state.consecutive_failures,
                duration_ms = duration.as_millis() as u64,
                "IdP probe failed: {}",
                e
            ),
        }

        if let Some((from, to)) = transition.changed {
            match to {
                HealthMode::Fallback => warn!(
                    from = %from,
                    to = %to,
                    failure_threshold = self.thresholds.failure_threshold,
                    "IdP unhealthy, switching to mTLS fallback"
                ),
                HealthMode::Healthy => info!(
                    from = %from,
                    to = %to,
                    success_threshold = self.thresholds.success_threshold,
                    "IdP recovered, leaving mTLS fallback"
                ),
            }
            self.events.emit(
                AuthEvent::success(EventType::ModeTransition, at)
                    .with_health(
                        state.consecutive_failures,
                        state.consecutive_successes,
                        state.is_fallback(),
                    )
                    .with_detail(format!("{} -> {}", from, to)),
            );
        }

        let mut event =
            AuthEvent::from_result(EventType::IdpProbe, &outcome, ProbeFailure::reason, at)
                .with_health(
                    state.consecutive_failures,
                    state.consecutive_successes,
                    state.is_fallback(),
                );
        if let Err(e) = &outcome {
            event = event.with_detail(e.to_string());
        }
        self.events.emit(event);

        transition
    }

    /// Probe on a fixed interval until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.probe_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = crate::shutdown_requested(&mut shutdown) => break,
            }
            self.probe_once().await;
        }

        debug!("IdP health monitor stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}

impl std::fmt::Debug for IdpHealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpHealthMonitor")
            .field("state", &self.snapshot())
            .field("thresholds", &self.thresholds)
            .field("probe_interval", &self.probe_interval)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}
