//! Prometheus metrics
//!
//! [`MetricsRecorder`] is an event sink that counts every classified event by
//! type, result and reason. [`collect_metrics`] combines those counters with
//! the live health, CRL and session state into Prometheus text format.

use crate::service::AuthService;
use authgate_core::event::{AuthEvent, EventSink, EventType, Outcome, Reason};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt::Display;
use std::time::Instant;

/// Prometheus metrics in text format
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetrics {
    /// Metrics content in Prometheus text format
    pub content: String,
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a gauge
    pub fn add_gauge(&mut self, name: &str, value: impl Display, help: &str) {
        self.header(name, "gauge", help);
        self.content.push_str(&format!("{} {}\n", name, value));
    }

    /// Add a counter
    pub fn add_counter(&mut self, name: &str, value: impl Display, help: &str) {
        self.header(name, "counter", help);
        self.content.push_str(&format!("{} {}\n", name, value));
    }

    /// Add a labelled counter family
    pub fn add_counter_series<V: Display>(
        &mut self,
        name: &str,
        help: &str,
        series: &[(Vec<(&str, &str)>, V)],
    ) {
        self.header(name, "counter", help);
        for (labels, value) in series {
            let label_str = labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, v))
                .collect::<Vec<_>>()
                .join(",");
            self.content
                .push_str(&format!("{}{{{}}} {}\n", name, label_str, value));
        }
    }

    fn header(&mut self, name: &str, kind: &str, help: &str) {
        self.content.push_str(&format!("# HELP {} {}\n", name, help));
        self.content.push_str(&format!("# TYPE {} {}\n", name, kind));
    }
}

type CounterKey = (EventType, Outcome, Option<Reason>);

/// Event counters
#[derive(Debug)]
pub struct MetricsRecorder {
    counters: DashMap<CounterKey, u64>,
    start_time: Instant,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Count recorded for one key
    pub fn count(&self, event_type: EventType, result: Outcome, reason: Option<Reason>) -> u64 {
        self.counters
            .get(&(event_type, result, reason))
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    /// All counters, sorted for stable output
    pub fn counters(&self) -> Vec<(CounterKey, u64)> {
        let mut counters: Vec<_> = self
            .counters
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        counters.sort();
        counters
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MetricsRecorder {
    fn emit(&self, event: AuthEvent) {
        *self
            .counters
            .entry((event.event_type, event.result, event.reason))
            .or_insert(0) += 1;
    }
}

/// Collect all metrics for the service at `now`
pub fn collect_metrics(service: &AuthService, now: DateTime<Utc>) -> PrometheusMetrics {
    let mut metrics = PrometheusMetrics::new();

    let counters = service.metrics.counters();
    let series: Vec<(Vec<(&str, &str)>, u64)> = counters
        .iter()
        .map(|((event_type, result, reason), value)| {
            (
                vec![
                    ("event_type", event_type.as_str()),
                    ("result", result.as_str()),
                    ("reason", reason.map(|r| r.as_str()).unwrap_or("")),
                ],
                *value,
            )
        })
        .collect();
    metrics.add_counter_series(
        "authgate_events_total",
        "Classified authentication events",
        &series,
    );

    if let Some(monitor) = &service.monitor {
        let state = monitor.snapshot();
        metrics.add_gauge(
            "authgate_fallback_active",
            u8::from(state.is_fallback()),
            "mTLS fallback mode (1 = active, 0 = OAuth2 primary)",
        );
        metrics.add_gauge(
            "authgate_idp_consecutive_failures",
            state.consecutive_failures,
            "Consecutive failed IdP probes",
        );
        metrics.add_gauge(
            "authgate_idp_consecutive_successes",
            state.consecutive_successes,
            "Consecutive successful IdP probes",
        );
        metrics.add_gauge(
            "authgate_idp_last_probe_duration_seconds",
            state.last_check_duration.as_secs_f64(),
            "Duration of the most recent IdP probe",
        );
    }

    let crl = service.crl.current();
    if let Some(age) = crl.age_at(now) {
        metrics.add_gauge(
            "authgate_crl_age_seconds",
            age,
            "Seconds since the last successful CRL fetch",
        );
    }
    metrics.add_gauge(
        "authgate_crl_stale",
        u8::from(crl.is_stale_at(now, service.crl_staleness_threshold)),
        "CRL too old to rely on (1 = mTLS logins fail closed)",
    );
    metrics.add_gauge(
        "authgate_crl_revoked_serials",
        crl.revoked_count(),
        "Revoked serials in the current CRL snapshot",
    );

    if let Some(age) = service.sessions.current_secret_age(now) {
        metrics.add_gauge(
            "authgate_session_secret_age_seconds",
            age,
            "Age of the current session signing secret",
        );
    }
    metrics.add_gauge(
        "authgate_session_secret_versions",
        service.sessions.retained_versions(now).len(),
        "Session secrets that still verify",
    );

    metrics.add_counter(
        "authgate_uptime_seconds",
        service.metrics.uptime_secs(),
        "Service uptime in seconds",
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_counts_by_key() {
        let recorder = MetricsRecorder::new();
        let now = Utc::now();

        recorder.emit(AuthEvent::success(EventType::AuthAttempt, now));
        recorder.emit(AuthEvent::success(EventType::AuthAttempt, now));
        recorder.emit(AuthEvent::failure(EventType::AuthAttempt, Reason::Revoked, now));

        assert_eq!(recorder.count(EventType::AuthAttempt, Outcome::Success, None), 2);
        assert_eq!(
            recorder.count(EventType::AuthAttempt, Outcome::Failure, Some(Reason::Revoked)),
            1
        );
        assert_eq!(recorder.count(EventType::IdpProbe, Outcome::Success, None), 0);
        assert_eq!(recorder.counters().len(), 2);
    }

    #[test]
    fn test_prometheus_format() {
        let mut metrics = PrometheusMetrics::new();
        metrics.add_gauge("authgate_fallback_active", 1, "Fallback");
        metrics.add_counter_series(
            "authgate_events_total",
            "Events",
            &[(vec![("event_type", "auth_attempt"), ("result", "success")], 3)],
        );

        assert!(metrics.content.contains("# TYPE authgate_fallback_active gauge\n"));
        assert!(metrics.content.contains("authgate_fallback_active 1\n"));
        assert!(metrics
            .content
            .contains("authgate_events_total{event_type=\"auth_attempt\",result=\"success\"} 3\n"));
    }
}
