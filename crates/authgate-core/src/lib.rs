//! Authentication decision core
//!
//! This crate holds the synchronous, I/O-free logic behind authgate: deciding
//! whether a client certificate is acceptable, keeping the IdP health state
//! machine, and issuing and verifying signed sessions.
//!
//! # Features
//!
//! - Client certificate policy (validity, CN allowlist, CRL) with fail-closed staleness
//! - CRL parsing (DER, PEM, plain serial lists) into immutable snapshots
//! - HMAC-SHA256 session tokens with versioned secret rotation and a grace window
//! - Two-state IdP health machine (`Healthy` / `Fallback`)
//! - OAuth2 error classification
//! - One classified [`event::AuthEvent`] per decision
//!
//! # Example
//!
//! ```rust
//! use authgate_core::cert::{validate_certificate, CertificateRecord, CnAllowlist};
//! use authgate_core::revocation::CrlSnapshot;
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let allowlist = CnAllowlist::parse(["trader-01"]).unwrap();
//! let crl = CrlSnapshot::from_serials(["0A1B"], now);
//!
//! let (not_before, not_after) = (now - Duration::days(1), now + Duration::days(30));
//! let cert = CertificateRecord::new("trader-01", "0C", not_before, not_after);
//! assert!(validate_certificate(&cert, &crl, &allowlist, Duration::hours(24), now).is_ok());
//! ```

pub mod auth;
pub mod cert;
pub mod event;
pub mod health;
pub mod oauth;
pub mod revocation;
pub mod session;

pub use auth::{AuthError, AuthErrorKind, AuthMethod, Principal};
pub use cert::{
    validate_certificate, AllowlistError, CertificateError, CertificateRecord, CertificateValidator,
    CnAllowlist,
};
pub use event::{
    AuthEvent, EventSink, EventType, FanoutSink, NullSink, Outcome, Reason, RecordingSink,
};
pub use health::{
    HealthMode, HealthThresholds, IdpHealthState, ProbeFailure, ProbeOutcome, Transition,
};
pub use oauth::{classify_oauth_error, AuthzError, IdpIdentity, OAuthErrorBody};
pub use revocation::{CrlInfo, CrlSnapshot, RevocationError, Staleness};
pub use session::{Session, SessionError, SessionManager, SessionPolicy, SessionSecret};
