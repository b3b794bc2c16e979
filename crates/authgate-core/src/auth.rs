//! Authentication results seen by callers
//!
//! An [`AuthError`] carries a coarse kind and a reason code and nothing else.
//! Serials, secret versions, health counters and provider messages stay in the
//! component errors and events.

use crate::cert::CertificateError;
use crate::event::Reason;
use crate::oauth::AuthzError;
use crate::session::{Session, SessionError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a principal was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[serde(rename = "oauth2")]
    OAuth2,
    Mtls,
    /// Resumed from an existing session
    Session,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::OAuth2 => "oauth2",
            AuthMethod::Mtls => "mtls",
            AuthMethod::Session => "session",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub method: AuthMethod,
    /// Issued (or resumed) session
    pub session: Option<Session>,
}

/// Which stage rejected the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    Authorization,
    Certificate,
    Session,
    MissingCredentials,
}

/// Failure returned to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("authentication failed: {reason}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub reason: Reason,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, reason: Reason) -> Self {
        AuthError { kind, reason }
    }

    /// No credential of any kind was presented
    pub fn missing_credentials() -> Self {
        AuthError::new(AuthErrorKind::MissingCredentials, Reason::Missing)
    }
}

impl From<&CertificateError> for AuthError {
    fn from(err: &CertificateError) -> Self {
        AuthError::new(AuthErrorKind::Certificate, err.reason())
    }
}

impl From<CertificateError> for AuthError {
    fn from(err: CertificateError) -> Self {
        AuthError::from(&err)
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        AuthError::new(AuthErrorKind::Session, err.reason())
    }
}

impl From<&AuthzError> for AuthError {
    fn from(err: &AuthzError) -> Self {
        AuthError::new(AuthErrorKind::Authorization, err.reason())
    }
}

impl From<AuthzError> for AuthError {
    fn from(err: AuthzError) -> Self {
        AuthError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hides_detail() {
        let detail = "CRL age 90000s exceeds threshold".to_string();
        let err = AuthError::from(CertificateError::CrlError(detail));
        assert_eq!(err.kind, AuthErrorKind::Certificate);
        assert_eq!(err.to_string(), "authentication failed: crl_error");

        let detail = "connection refused to 10.0.0.5".to_string();
        let err = AuthError::from(AuthzError::ServerError(detail));
        assert_eq!(err.to_string(), "authentication failed: server_error");
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&AuthError::missing_credentials()).unwrap();
        assert_eq!(json, r#"{"kind":"missing_credentials","reason":"missing"}"#);
        assert_eq!(serde_json::to_string(&AuthMethod::OAuth2).unwrap(), "\"oauth2\"");
    }
}
