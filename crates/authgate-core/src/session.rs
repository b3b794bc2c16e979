//! Signed session tokens
//!
//! After either authentication path succeeds, the caller gets a [`Session`]
//! signed with HMAC-SHA256 under the current [`SessionSecret`]. Resuming with
//! the session needs no provider round trip.
//!
//! # Secret rotation
//!
//! Secrets live in a versioned ring published through an `ArcSwap`:
//!
//! - `rotate_secret` creates version `max + 1` and gives the previous current
//!   secret a `retire_at = now + grace_window`
//! - a session signed with a retired secret verifies until `retire_at`
//! - secrets past `retire_at` are dropped on the next rotation
//!
//! Verification only loads the ring; it never writes to it.
//!
//! # Example
//!
//! ```
//! use authgate_core::event::NullSink;
//! use authgate_core::session::{SessionManager, SessionPolicy};
//! use chrono::Utc;
//! use std::sync::Arc;
//!
//! let now = Utc::now();
//! let manager = SessionManager::new(SessionPolicy::default(), Arc::new(NullSink));
//! manager.rotate_secret(now);
//!
//! let session = manager.issue("trader-01", now).unwrap();
//! assert_eq!(manager.verify(&session, now).unwrap(), "trader-01");
//! ```

use crate::event::{AuthEvent, EventSink, EventType, Reason};
use arc_swap::ArcSwap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Secret length in bytes
pub const SECRET_LEN: usize = 32;

/// Session verification failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session expired")]
    Expired,

    #[error("session credential missing")]
    Missing,

    #[error("session invalid")]
    Invalid,
}

impl SessionError {
    pub fn reason(&self) -> Reason {
        match self {
            SessionError::Expired => Reason::Expired,
            SessionError::Missing => Reason::Missing,
            SessionError::Invalid => Reason::Invalid,
        }
    }
}

/// One versioned signing secret
#[derive(Clone)]
pub struct SessionSecret {
    pub version: u32,
    value: [u8; SECRET_LEN],
    pub created_at: DateTime<Utc>,
    /// `None` while this is the current secret
    pub retire_at: Option<DateTime<Utc>>,
}

impl SessionSecret {
    /// Generate a fresh random secret
    pub fn generate(version: u32, created_at: DateTime<Utc>) -> Self {
        let mut value = [0u8; SECRET_LEN];
        rand::rng().fill(&mut value);
        Self::from_bytes(version, value, created_at)
    }

    /// Secret with a known value
    pub fn from_bytes(version: u32, value: [u8; SECRET_LEN], created_at: DateTime<Utc>) -> Self {
        SessionSecret {
            version,
            value,
            created_at,
            retire_at: None,
        }
    }

    /// Whether sessions signed with this secret may still verify at `now`
    pub fn is_retained_at(&self, now: DateTime<Utc>) -> bool {
        match self.retire_at {
            Some(retire_at) => now < retire_at,
            None => true,
        }
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(&self.value).map_err(|_| SessionError::Invalid)
    }

    fn retired_at(&self, retire_at: DateTime<Utc>) -> Self {
        SessionSecret {
            retire_at: Some(retire_at),
            ..self.clone()
        }
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSecret")
            .field("version", &self.version)
            .field("value", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("retire_at", &self.retire_at)
            .finish()
    }
}

/// Signed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// 128-bit random identifier, hex
    pub id: String,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub secret_version: u32,
    /// Hex HMAC-SHA256 over the signing payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Session {
    /// Canonical bytes covered by the signature
    ///
    /// Timestamps keep nanosecond precision, matching the token encoding.
    /// The subject goes last so that a newline inside it cannot shift the
    /// other fields.
    fn signing_payload(&self) -> Vec<u8> {
        format!(
            "{}\n{}\n{}\n{}\n{}",
            self.id,
            self.issued_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.expires_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.secret_version,
            self.subject
        )
        .into_bytes()
    }

    /// Encode as an opaque bearer string
    pub fn to_token(&self) -> String {
        // Serializing plain strings and numbers cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a bearer string produced by [`Session::to_token`]
    pub fn from_token(token: &str) -> Result<Self, SessionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::Missing);
        }

        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| SessionError::Invalid)?;
        serde_json::from_slice(&json).map_err(|_| SessionError::Invalid)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Session lifetime settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub ttl: Duration,
    /// How long a superseded secret keeps verifying
    pub grace_window: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        SessionPolicy {
            ttl: Duration::hours(8),
            grace_window: Duration::hours(8),
        }
    }
}

/// Issues and verifies sessions, owns the secret ring
pub struct SessionManager {
    policy: SessionPolicy,
    /// Ascending by version; the last entry is current
    ring: ArcSwap<Vec<Arc<SessionSecret>>>,
    /// Logged out session id -> session expiry
    logged_out: DashMap<String, DateTime<Utc>>,
    events: Arc<dyn EventSink>,
}

impl SessionManager {
    /// Create a manager with an empty ring
    ///
    /// `issue` fails with `Missing` until the first `rotate_secret`.
    pub fn new(policy: SessionPolicy, events: Arc<dyn EventSink>) -> Self {
        Self {
            policy,
            ring: ArcSwap::from_pointee(Vec::new()),
            logged_out: DashMap::new(),
            events,
        }
    }

    /// Create a manager whose ring holds one known secret
    pub fn with_initial_secret(
        policy: SessionPolicy,
        secret: SessionSecret,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let manager = Self::new(policy, events);
        manager.ring.store(Arc::new(vec![Arc::new(secret)]));
        manager
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Issue a signed session for `subject`
    pub fn issue(&self, subject: &str, now: DateTime<Utc>) -> Result<Session, SessionError> {
        let ring = self.ring.load();
        let result = match ring.last() {
            Some(secret) => self.sign_new(secret, subject, now),
            None => Err(SessionError::Missing),
        };

        let mut event =
            AuthEvent::from_result(EventType::SessionIssue, &result, SessionError::reason, now)
                .with_subject(subject);
        if let Some(secret) = ring.last() {
            event = event.with_secret_age((now - secret.created_at).num_seconds());
        }
        self.events.emit(event);

        result
    }

    fn sign_new(
        &self,
        secret: &SessionSecret,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let mut id = [0u8; 16];
        rand::rng().fill(&mut id);

        let mut session = Session {
            id: hex::encode(id),
            subject: subject.to_string(),
            issued_at: now,
            expires_at: now + self.policy.ttl,
            secret_version: secret.version,
            signature: None,
        };

        let mut mac = secret.mac()?;
        mac.update(&session.signing_payload());
        session.signature = Some(hex::encode(mac.finalize().into_bytes()));

        Ok(session)
    }

    /// Verify a session, returning its subject
    pub fn verify(&self, session: &Session, now: DateTime<Utc>) -> Result<String, SessionError> {
        let result = self.check(session, now).map(|_| session.subject.clone());

        let mut event =
            AuthEvent::from_result(EventType::SessionVerify, &result, SessionError::reason, now)
                .with_subject(session.subject.clone());
        if let Some(age) = self.current_secret_age(now) {
            event = event.with_secret_age(age);
        }
        if result.is_err() {
            event = event.with_detail(format!("secret version {}", session.secret_version));
        }
        self.events.emit(event);

        result
    }

    fn check(&self, session: &Session, now: DateTime<Utc>) -> Result<(), SessionError> {
        if session.is_expired_at(now) {
            return Err(SessionError::Expired);
        }

        let signature = match session.signature.as_deref() {
            Some(sig) if !sig.is_empty() => sig,
            _ => return Err(SessionError::Missing),
        };

        let ring = self.ring.load();
        let secret = ring
            .iter()
            .find(|s| s.version == session.secret_version)
            .filter(|s| s.is_retained_at(now))
            .ok_or(SessionError::Invalid)?;

        let signature = hex::decode(signature).map_err(|_| SessionError::Invalid)?;
        let mut mac = secret.mac()?;
        mac.update(&session.signing_payload());
        mac.verify_slice(&signature).map_err(|_| SessionError::Invalid)?;

        if self.logged_out.contains_key(&session.id) {
            return Err(SessionError::Invalid);
        }

        Ok(())
    }

    /// Decode and verify a bearer token, returning the session
    pub fn verify_token(&self, token: &str, now: DateTime<Utc>) -> Result<Session, SessionError> {
        match Session::from_token(token) {
            Ok(session) => self.verify(&session, now).map(|_| session),
            Err(e) => {
                self.events.emit(
                    AuthEvent::failure(EventType::SessionVerify, e.reason(), now)
                        .with_detail("undecodable session token"),
                );
                Err(e)
            }
        }
    }

    /// Rotate the signing secret, returning the new version
    pub fn rotate_secret(&self, now: DateTime<Utc>) -> u32 {
        let fresh = SessionSecret::generate(0, now);
        let grace = self.policy.grace_window;

        let previous = self.ring.rcu(|ring| {
            let version = ring.last().map_or(1, |s| s.version.saturating_add(1));

            let mut next: Vec<Arc<SessionSecret>> = ring
                .iter()
                .map(|s| match s.retire_at {
                    None => Arc::new(s.retired_at(now + grace)),
                    Some(_) => Arc::clone(s),
                })
                .filter(|s| s.is_retained_at(now))
                .collect();

            next.push(Arc::new(SessionSecret {
                version,
                ..fresh.clone()
            }));
            next
        });

        let version = previous.last().map_or(1, |s| s.version.saturating_add(1));
        self.events.emit(
            AuthEvent::success(EventType::SecretRotation, now)
                .with_secret_age(0)
                .with_detail(format!("secret version {}", version)),
        );
        version
    }

    /// Revoke a session before its expiry
    ///
    /// Only a session that currently verifies can be logged out.
    pub fn logout(&self, session: &Session, now: DateTime<Utc>) -> Result<(), SessionError> {
        let result = self.check(session, now);
        if result.is_ok() {
            self.logged_out.insert(session.id.clone(), session.expires_at);
        }

        self.events.emit(
            AuthEvent::from_result(EventType::SessionLogout, &result, SessionError::reason, now)
                .with_subject(session.subject.clone()),
        );
        result
    }

    /// Drop logout entries for sessions that have expired anyway
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.logged_out.len();
        self.logged_out.retain(|_, expires_at| *expires_at >= now);
        before - self.logged_out.len()
    }

    pub fn current_version(&self) -> Option<u32> {
        self.ring.load().last().map(|s| s.version)
    }

    /// Versions that still verify at `now`
    pub fn retained_versions(&self, now: DateTime<Utc>) -> Vec<u32> {
        self.ring
            .load()
            .iter()
            .filter(|s| s.is_retained_at(now))
            .map(|s| s.version)
            .collect()
    }

    /// Seconds since the current secret was created
    pub fn current_secret_age(&self, now: DateTime<Utc>) -> Option<i64> {
        self.ring
            .load()
            .last()
            .map(|s| (now - s.created_at).num_seconds())
    }

    pub fn logged_out_count(&self) -> usize {
        self.logged_out.len()
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("policy", &self.policy)
            .field("secrets", &self.ring.load().len())
            .field("logged_out", &self.logged_out.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{NullSink, RecordingSink};
    use chrono::TimeZone;
    use std::thread;

    fn manager() -> SessionManager {
        SessionManager::new(SessionPolicy::default(), Arc::new(NullSink))
    }

    #[test]
    fn test_issue_verify_round_trip() {
        let now = Utc::now();
        let manager = manager();
        assert_eq!(manager.rotate_secret(now), 1);

        let session = manager.issue("trader-01", now).unwrap();
        assert_eq!(session.secret_version, 1);
        assert_eq!(session.expires_at - session.issued_at, Duration::hours(8));
        assert_eq!(session.id.len(), 32);
        assert_eq!(manager.verify(&session, now), Ok("trader-01".to_string()));
    }

    #[test]
    fn test_issue_without_secret_is_missing() {
        let manager = manager();
        assert_eq!(manager.issue("trader-01", Utc::now()), Err(SessionError::Missing));
    }

    #[test]
    fn test_expiry_boundary() {
        // Half a second past a whole second
        let t = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        let manager = manager();
        manager.rotate_secret(t);
        let session = manager.issue("trader-01", t).unwrap();

        let ttl = manager.policy().ttl;
        assert_eq!(session.issued_at, t);
        assert_eq!(session.expires_at, t + ttl);
        assert_eq!(manager.verify(&session, t + ttl), Ok("trader-01".to_string()));
        assert_eq!(
            manager.verify(&session, t + ttl + Duration::seconds(1)),
            Err(SessionError::Expired)
        );
    }

    #[test]
    fn test_sub_second_session_survives_token_encoding() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let manager = manager();
        manager.rotate_secret(t);
        let session = manager.issue("trader-01", t).unwrap();

        let decoded = manager.verify_token(&session.to_token(), t).unwrap();
        assert_eq!(decoded.expires_at, t + manager.policy().ttl);

        let mut shifted = session;
        shifted.expires_at += Duration::milliseconds(1);
        assert_eq!(manager.verify(&shifted, t), Err(SessionError::Invalid));
    }

    #[test]
    fn test_rotation_concurrent_with_verify() {
        let t0 = Utc::now();
        let policy = SessionPolicy {
            ttl: Duration::hours(8),
            grace_window: Duration::hours(8),
        };
        let manager = Arc::new(SessionManager::new(policy, Arc::new(NullSink)));
        manager.rotate_secret(t0);
        let session = manager.issue("trader-01", t0).unwrap();

        let verifiers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let session = session.clone();
                thread::spawn(move || {
                    for i in 0..2_000 {
                        let now = t0 + Duration::milliseconds(i);
                        assert_eq!(manager.verify(&session, now), Ok("trader-01".to_string()));
                    }
                })
            })
            .collect();

        let rotator = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                // Every rotation stays inside the first secret's grace window
                for i in 1..=200 {
                    manager.rotate_secret(t0 + Duration::milliseconds(i));
                }
            })
        };

        rotator.join().unwrap();
        for verifier in verifiers {
            verifier.join().unwrap();
        }
        assert_eq!(manager.current_version(), Some(201));
        assert!(manager.verify(&session, t0 + Duration::hours(1)).is_ok());
    }

    #[test]
    fn test_expired_precedes_missing_signature() {
        let now = Utc::now();
        let manager = manager();
        manager.rotate_secret(now);
        let mut session = manager.issue("trader-01", now).unwrap();
        session.signature = None;

        assert_eq!(manager.verify(&session, now), Err(SessionError::Missing));
        assert_eq!(
            manager.verify(&session, now + Duration::days(1)),
            Err(SessionError::Expired)
        );

        session.signature = Some(String::new());
        assert_eq!(manager.verify(&session, now), Err(SessionError::Missing));
    }

    #[test]
    fn test_tampered_session_is_invalid() {
        let now = Utc::now();
        let manager = manager();
        manager.rotate_secret(now);
        let session = manager.issue("trader-01", now).unwrap();

        let mut tampered = session.clone();
        tampered.subject = "trader-02".to_string();
        assert_eq!(manager.verify(&tampered, now), Err(SessionError::Invalid));

        let mut tampered = session.clone();
        tampered.expires_at += Duration::hours(1);
        assert_eq!(manager.verify(&tampered, now), Err(SessionError::Invalid));

        let mut tampered = session;
        tampered.signature = Some("zz".to_string());
        assert_eq!(manager.verify(&tampered, now), Err(SessionError::Invalid));
    }

    #[test]
    fn test_foreign_secret_is_invalid() {
        let now = Utc::now();
        let ours = SessionManager::with_initial_secret(
            SessionPolicy::default(),
            SessionSecret::from_bytes(1, [7u8; SECRET_LEN], now),
            Arc::new(NullSink),
        );
        let theirs = SessionManager::with_initial_secret(
            SessionPolicy::default(),
            SessionSecret::from_bytes(1, [9u8; SECRET_LEN], now),
            Arc::new(NullSink),
        );

        let session = theirs.issue("trader-01", now).unwrap();
        assert_eq!(ours.verify(&session, now), Err(SessionError::Invalid));
    }

    #[test]
    fn test_grace_window() {
        let t0 = Utc::now();
        let policy = SessionPolicy {
            ttl: Duration::hours(8),
            grace_window: Duration::hours(1),
        };
        let manager = SessionManager::new(policy, Arc::new(NullSink));
        manager.rotate_secret(t0);
        let old = manager.issue("trader-01", t0).unwrap();

        let rotated_at = t0 + Duration::minutes(10);
        assert_eq!(manager.rotate_secret(rotated_at), 2);
        assert_eq!(manager.retained_versions(rotated_at), vec![1, 2]);

        // Inside the grace window the old secret still verifies
        let inside = rotated_at + Duration::minutes(59);
        assert!(manager.verify(&old, inside).is_ok());

        // At retire_at it no longer does, although the session itself is unexpired
        let retire_at = rotated_at + Duration::hours(1);
        assert_eq!(manager.verify(&old, retire_at), Err(SessionError::Invalid));

        let fresh = manager.issue("trader-01", retire_at).unwrap();
        assert_eq!(fresh.secret_version, 2);
        assert!(manager.verify(&fresh, retire_at).is_ok());
    }

    #[test]
    fn test_rotation_drops_retired_secrets() {
        let t0 = Utc::now();
        let manager = manager();
        manager.rotate_secret(t0);
        manager.rotate_secret(t0 + Duration::hours(1));
        assert_eq!(manager.retained_versions(t0 + Duration::hours(1)), vec![1, 2]);

        manager.rotate_secret(t0 + Duration::hours(10));
        assert_eq!(manager.current_version(), Some(3));
        assert_eq!(manager.retained_versions(t0 + Duration::hours(10)), vec![2, 3]);
    }

    #[test]
    fn test_token_round_trip() {
        let now = Utc::now();
        let manager = manager();
        manager.rotate_secret(now);
        let session = manager.issue("trader-01", now).unwrap();

        let token = session.to_token();
        assert!(!token.contains('='));
        assert_eq!(manager.verify_token(&token, now), Ok(session));
    }

    #[test]
    fn test_bad_tokens() {
        let manager = manager();
        let now = Utc::now();
        assert_eq!(manager.verify_token("", now), Err(SessionError::Missing));
        assert_eq!(manager.verify_token("!!!", now), Err(SessionError::Invalid));
        assert_eq!(
            manager.verify_token(&URL_SAFE_NO_PAD.encode(b"{}"), now),
            Err(SessionError::Invalid)
        );
    }

    #[test]
    fn test_logout() {
        let now = Utc::now();
        let manager = manager();
        manager.rotate_secret(now);
        let session = manager.issue("trader-01", now).unwrap();

        assert!(manager.logout(&session, now).is_ok());
        assert_eq!(manager.verify(&session, now), Err(SessionError::Invalid));
        assert_eq!(manager.logged_out_count(), 1);

        assert_eq!(manager.purge_expired(now), 0);
        assert_eq!(manager.purge_expired(session.expires_at + Duration::seconds(1)), 1);
    }

    #[test]
    fn test_events_emitted() {
        let sink = RecordingSink::new();
        let manager = SessionManager::new(SessionPolicy::default(), sink.clone());
        let now = Utc::now();

        manager.rotate_secret(now);
        let session = manager.issue("trader-01", now).unwrap();
        manager.verify(&session, now + Duration::days(1)).unwrap_err();

        assert_eq!(sink.of_type(EventType::SecretRotation).len(), 1);
        assert_eq!(sink.of_type(EventType::SessionIssue).len(), 1);
        let verify = sink.of_type(EventType::SessionVerify);
        assert_eq!(verify.len(), 1);
        assert_eq!(verify[0].reason, Some(Reason::Expired));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let secret = SessionSecret::from_bytes(1, [0xAB; SECRET_LEN], created_at);
        let debug = format!("{:?}", secret);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("171"));
    }
}
