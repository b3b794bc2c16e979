//! OAuth2 / OIDC failure classification
//!
//! Whatever the provider says, a failed authorization ends up as one of four
//! codes: `invalid_client`, `redirect_uri_mismatch`, `access_denied` or
//! `server_error`. The provider's own error code and description are kept in
//! the error for logs and events only.

use crate::event::Reason;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified authorization failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    #[error("invalid client: {0}")]
    InvalidClient(String),

    #[error("redirect URI mismatch: {0}")]
    RedirectUriMismatch(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("provider error: {0}")]
    ServerError(String),
}

impl AuthzError {
    pub fn reason(&self) -> Reason {
        match self {
            AuthzError::InvalidClient(_) => Reason::InvalidClient,
            AuthzError::RedirectUriMismatch(_) => Reason::RedirectUriMismatch,
            AuthzError::AccessDenied(_) => Reason::AccessDenied,
            AuthzError::ServerError(_) => Reason::ServerError,
        }
    }
}

/// RFC 6749 §5.2 error response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Identity asserted by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpIdentity {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Classify a provider failure
///
/// `status` is the HTTP status when there was a response; `error_code` is the
/// `error` field of the body when it could be parsed. A known error code wins
/// over the status.
pub fn classify_oauth_error(
    status: Option<u16>,
    error_code: Option<&str>,
    description: Option<&str>,
) -> AuthzError {
    let detail = match (error_code, description) {
        (Some(code), Some(desc)) => format!("{} ({})", code, desc),
        (Some(code), None) => code.to_string(),
        (None, Some(desc)) => desc.to_string(),
        (None, None) => match status {
            Some(status) => format!("HTTP {}", status),
            None => "no response".to_string(),
        },
    };

    match error_code {
        Some("invalid_client") | Some("unauthorized_client") => {
            return AuthzError::InvalidClient(detail)
        }
        Some("redirect_uri_mismatch") => return AuthzError::RedirectUriMismatch(detail),
        Some("access_denied") | Some("invalid_grant") | Some("invalid_token")
        | Some("invalid_request") | Some("invalid_scope") | Some("insufficient_scope") => {
            return AuthzError::AccessDenied(detail)
        }
        Some("server_error") | Some("temporarily_unavailable") => {
            return AuthzError::ServerError(detail)
        }
        _ => {}
    }

    match status {
        Some(status) if (400..500).contains(&status) => AuthzError::AccessDenied(detail),
        _ => AuthzError::ServerError(detail),
    }
}

/// Classify a parsed error body
pub fn classify_error_body(status: u16, body: &OAuthErrorBody) -> AuthzError {
    classify_oauth_error(Some(status), Some(&body.error), body.error_description.as_deref())
}

/// Check a redirect URI against the registered ones
///
/// Comparison is exact, as RFC 6749 §3.1.2.3 requires for registered URIs.
pub fn check_redirect_uri(registered: &[String], redirect_uri: &str) -> Result<(), AuthzError> {
    if registered.iter().any(|uri| uri == redirect_uri) {
        Ok(())
    } else {
        Err(AuthzError::RedirectUriMismatch(format!(
            "{} is not registered",
            redirect_uri
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let cases = [
            ("invalid_client", Reason::InvalidClient),
            ("unauthorized_client", Reason::InvalidClient),
            ("redirect_uri_mismatch", Reason::RedirectUriMismatch),
            ("access_denied", Reason::AccessDenied),
            ("invalid_grant", Reason::AccessDenied),
            ("invalid_token", Reason::AccessDenied),
            ("insufficient_scope", Reason::AccessDenied),
            ("server_error", Reason::ServerError),
            ("temporarily_unavailable", Reason::ServerError),
        ];

        for (code, expected) in cases {
            assert_eq!(
                classify_oauth_error(Some(400), Some(code), None).reason(),
                expected,
                "{}",
                code
            );
        }
    }

    #[test]
    fn test_status_fallback() {
        assert_eq!(classify_oauth_error(Some(403), None, None).reason(), Reason::AccessDenied);
        assert_eq!(classify_oauth_error(Some(502), None, None).reason(), Reason::ServerError);
        assert_eq!(
            classify_oauth_error(None, None, Some("timed out")).reason(),
            Reason::ServerError
        );
        assert_eq!(
            classify_oauth_error(Some(400), Some("something_new"), None).reason(),
            Reason::AccessDenied
        );
    }

    #[test]
    fn test_error_code_wins_over_status() {
        let err = classify_oauth_error(Some(503), Some("invalid_client"), Some("bad secret"));
        assert_eq!(err, AuthzError::InvalidClient("invalid_client (bad secret)".to_string()));
    }

    #[test]
    fn test_error_body_parsing() {
        let json = r#"{"error":"invalid_grant","error_description":"code used"}"#;
        let body: OAuthErrorBody = serde_json::from_str(json).unwrap();
        assert_eq!(classify_error_body(400, &body).reason(), Reason::AccessDenied);
    }

    #[test]
    fn test_check_redirect_uri() {
        let registered = vec!["https://app.example.com/callback".to_string()];
        assert!(check_redirect_uri(&registered, "https://app.example.com/callback").is_ok());
        assert_eq!(
            check_redirect_uri(&registered, "https://app.example.com/callback/")
                .unwrap_err()
                .reason(),
            Reason::RedirectUriMismatch
        );
    }
}
