//! Classified outcome events
//!
//! Every decision taken by the validator, the session manager, the health
//! monitor and the orchestrator is reported as exactly one [`AuthEvent`].
//! Events are handed to an [`EventSink`]; the sink decides whether they end up
//! in an audit file, a metrics counter or a log line.
//!
//! Events are internal observability data. They may carry counters, ages and
//! a free-form `detail`, none of which is ever returned to an authenticating
//! caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Reason codes shared by events and [`AuthError`](crate::auth::AuthError)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Certificate or session outside its validity window
    Expired,
    /// Certificate common name not on the allowlist
    CnNotAllowed,
    /// Certificate serial listed in the CRL
    Revoked,
    /// Revocation status could not be established (fail closed)
    CrlError,
    /// Bad or unknown signature, retired secret, undecodable credential
    Invalid,
    /// Credential or signature absent
    Missing,
    /// Provider rejected the client
    InvalidClient,
    /// Redirect URI not registered for the client
    RedirectUriMismatch,
    /// Provider refused the grant or token
    AccessDenied,
    /// Provider failed or could not be reached
    ServerError,
}

impl Reason {
    /// Wire name of the reason code
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Expired => "expired",
            Reason::CnNotAllowed => "cn_not_allowed",
            Reason::Revoked => "revoked",
            Reason::CrlError => "crl_error",
            Reason::Invalid => "invalid",
            Reason::Missing => "missing",
            Reason::InvalidClient => "invalid_client",
            Reason::RedirectUriMismatch => "redirect_uri_mismatch",
            Reason::AccessDenied => "access_denied",
            Reason::ServerError => "server_error",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// One run of the certificate pipeline
    CertificateValidation,
    /// One CRL refresh cycle
    CrlRefresh,
    /// One IdP health probe
    IdpProbe,
    /// Fallback mode entered or left
    ModeTransition,
    /// Session issued
    SessionIssue,
    /// Session verified (or rejected)
    SessionVerify,
    /// Session secret rotated
    SecretRotation,
    /// Session logged out
    SessionLogout,
    /// One call to the orchestrator
    AuthAttempt,
}

impl EventType {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CertificateValidation => "certificate_validation",
            EventType::CrlRefresh => "crl_refresh",
            EventType::IdpProbe => "idp_probe",
            EventType::ModeTransition => "mode_transition",
            EventType::SessionIssue => "session_issue",
            EventType::SessionVerify => "session_verify",
            EventType::SecretRotation => "secret_rotation",
            EventType::SessionLogout => "session_logout",
            EventType::AuthAttempt => "auth_attempt",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// One classified outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub event_type: EventType,
    pub result: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    pub timestamp: DateTime<Utc>,
    /// Authenticated or attempted subject (CN or IdP subject)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Authentication method (`oauth2`, `mtls`, `session`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_successes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_secret_age_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crl_age_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_days_to_expiry: Option<i64>,
    /// Internal detail, never surfaced to callers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuthEvent {
    /// Create a success event
    pub fn success(event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self::new(event_type, Outcome::Success, None, timestamp)
    }

    /// Create a failure event with its reason
    pub fn failure(event_type: EventType, reason: Reason, timestamp: DateTime<Utc>) -> Self {
        Self::new(event_type, Outcome::Failure, Some(reason), timestamp)
    }

    /// Create an event from a classified result
    pub fn from_result<T, E>(
        event_type: EventType,
        result: &Result<T, E>,
        reason: impl FnOnce(&E) -> Reason,
        timestamp: DateTime<Utc>,
    ) -> Self {
        match result {
            Ok(_) => Self::success(event_type, timestamp),
            Err(e) => Self::failure(event_type, reason(e), timestamp),
        }
    }

    fn new(
        event_type: EventType,
        result: Outcome,
        reason: Option<Reason>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        AuthEvent {
            event_type,
            result,
            reason,
            timestamp,
            subject: None,
            method: None,
            consecutive_failures: None,
            consecutive_successes: None,
            fallback_mode: None,
            session_secret_age_secs: None,
            crl_age_secs: None,
            cert_days_to_expiry: None,
            detail: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Attach the health counters and the mode flag
    pub fn with_health(mut self, failures: u32, successes: u32, fallback: bool) -> Self {
        self.consecutive_failures = Some(failures);
        self.consecutive_successes = Some(successes);
        self.fallback_mode = Some(fallback);
        self
    }

    pub fn with_secret_age(mut self, age_secs: i64) -> Self {
        self.session_secret_age_secs = Some(age_secs);
        self
    }

    pub fn with_crl_age(mut self, age_secs: Option<i64>) -> Self {
        self.crl_age_secs = age_secs;
        self
    }

    pub fn with_cert_days_to_expiry(mut self, days: i64) -> Self {
        self.cert_days_to_expiry = Some(days);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == Outcome::Success
    }
}

/// Consumer of classified outcome events
///
/// `emit` is called on the request path and must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AuthEvent);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: AuthEvent) {}
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AuthEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy of all events recorded so far
    pub fn events(&self) -> Vec<AuthEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Events of one type, in emission order
    pub fn of_type(&self, event_type: EventType) -> Vec<AuthEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: AuthEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// Sink that forwards every event to several sinks
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: AuthEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

impl fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_wire_names() {
        let json = serde_json::to_string(&Reason::CnNotAllowed).unwrap();
        assert_eq!(json, "\"cn_not_allowed\"");
        assert_eq!(Reason::RedirectUriMismatch.to_string(), "redirect_uri_mismatch");

        for reason in [
            Reason::Expired,
            Reason::Revoked,
            Reason::CrlError,
            Reason::Invalid,
            Reason::Missing,
            Reason::InvalidClient,
            Reason::AccessDenied,
            Reason::ServerError,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_event_serialization_skips_empty_fields() {
        let event = AuthEvent::failure(EventType::IdpProbe, Reason::ServerError, Utc::now())
            .with_health(2, 0, false)
            .with_detail("probe timed out");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"idp_probe\""));
        assert!(json.contains("\"result\":\"failure\""));
        assert!(json.contains("\"reason\":\"server_error\""));
        assert!(json.contains("\"consecutive_failures\":2"));
        assert!(!json.contains("crl_age_secs"));
        assert!(!json.contains("subject"));
    }

    #[test]
    fn test_from_result() {
        let ok: Result<(), Reason> = Ok(());
        let err: Result<(), Reason> = Err(Reason::Revoked);

        let event =
            AuthEvent::from_result(EventType::CertificateValidation, &ok, |r| *r, Utc::now());
        assert!(event.is_success());
        assert_eq!(event.reason, None);

        let event =
            AuthEvent::from_result(EventType::CertificateValidation, &err, |r| *r, Utc::now());
        assert!(!event.is_success());
        assert_eq!(event.reason, Some(Reason::Revoked));
    }

    #[test]
    fn test_fanout_delivers_to_every_sink() {
        let a = RecordingSink::new();
        let b = RecordingSink::new();
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());

        fanout.emit(AuthEvent::success(EventType::AuthAttempt, Utc::now()));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(b.of_type(EventType::AuthAttempt).len(), 1);
    }
}
