//! Authentication routing
//!
//! [`AuthOrchestrator::authenticate`] is the single entry point consumers use.
//! Routing, in order:
//!
//! 1. A session token resumes an existing session in either mode.
//! 2. Healthy mode with an OAuth credential and a configured IdP takes the
//!    OAuth2 path. If that fails and a client certificate is present, the
//!    mTLS path is tried as a secondary.
//! 3. Otherwise a client certificate takes the mTLS path.
//! 4. An OAuth credential that cannot be used (fallback or no IdP) and no
//!    certificate fails with `server_error`; no credentials at all fails with
//!    `missing`.
//!
//! Provider failures seen here never touch the health monitor; only probes
//! switch modes.

use crate::crl_cache::CrlCache;
use crate::idp::IdpClient;
use crate::monitor::IdpHealthMonitor;
use authgate_core::auth::{AuthError, AuthErrorKind, AuthMethod, Principal};
use authgate_core::cert::CertificateValidator;
use authgate_core::event::{AuthEvent, EventSink, EventType, Reason};
use authgate_core::oauth::AuthzError;
use authgate_core::session::SessionManager;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// OAuth2 credential presented with a request
#[derive(Clone, PartialEq, Eq)]
pub enum OAuthCredential {
    /// Access token issued by the provider
    Bearer(String),
    /// Authorization code from the redirect
    AuthorizationCode { code: String, redirect_uri: String },
}

impl fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthCredential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            OAuthCredential::AuthorizationCode { redirect_uri, .. } => f
                .debug_struct("AuthorizationCode")
                .field("code", &"<redacted>")
                .field("redirect_uri", redirect_uri)
                .finish(),
        }
    }
}

/// Credentials presented by one caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequest {
    pub session_token: Option<String>,
    pub oauth: Option<OAuthCredential>,
    /// DER client certificate forwarded by the TLS terminator
    pub client_certificate: Option<Vec<u8>>,
}

impl AuthRequest {
    pub fn with_session_token(token: impl Into<String>) -> Self {
        AuthRequest {
            session_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn with_bearer(token: impl Into<String>) -> Self {
        AuthRequest {
            oauth: Some(OAuthCredential::Bearer(token.into())),
            ..Default::default()
        }
    }

    pub fn with_authorization_code(
        code: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        AuthRequest {
            oauth: Some(OAuthCredential::AuthorizationCode {
                code: code.into(),
                redirect_uri: redirect_uri.into(),
            }),
            ..Default::default()
        }
    }

    pub fn with_client_certificate(der: Vec<u8>) -> Self {
        AuthRequest {
            client_certificate: Some(der),
            ..Default::default()
        }
    }

    /// Whether the request carries anything besides a session token
    pub fn has_login_credentials(&self) -> bool {
        self.oauth.is_some() || self.client_certificate.is_some()
    }

    /// Also present a client certificate
    pub fn and_client_certificate(mut self, der: Vec<u8>) -> Self {
        self.client_certificate = Some(der);
        self
    }
}

/// One routed attempt, before it is reported
struct Attempt {
    method: Option<AuthMethod>,
    result: Result<Principal, AuthError>,
    detail: Option<String>,
}

impl Attempt {
    fn failed(method: Option<AuthMethod>, err: AuthError, detail: impl Into<String>) -> Self {
        Attempt {
            method,
            result: Err(err),
            detail: Some(detail.into()),
        }
    }
}

pub struct AuthOrchestrator {
    monitor: Option<Arc<IdpHealthMonitor>>,
    idp: Option<Arc<dyn IdpClient>>,
    crl: Arc<CrlCache>,
    validator: CertificateValidator,
    sessions: Arc<SessionManager>,
    events: Arc<dyn EventSink>,
}

impl AuthOrchestrator {
    /// Create an orchestrator
    ///
    /// Without a monitor the service never enters fallback; without an IdP
    /// client every login takes the mTLS path.
    pub fn new(
        monitor: Option<Arc<IdpHealthMonitor>>,
        idp: Option<Arc<dyn IdpClient>>,
        crl: Arc<CrlCache>,
        validator: CertificateValidator,
        sessions: Arc<SessionManager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            monitor,
            idp,
            crl,
            validator,
            sessions,
            events,
        }
    }

    pub fn is_fallback_active(&self) -> bool {
        self.monitor
            .as_ref()
            .is_some_and(|monitor| monitor.is_fallback_active())
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Authenticate one request
    pub async fn authenticate(
        &self,
        request: &AuthRequest,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthError> {
        let fallback = self.is_fallback_active();
        let attempt = self.route(request, fallback, now).await;

        let mut event =
            AuthEvent::from_result(EventType::AuthAttempt, &attempt.result, |e| e.reason, now);
        if let Some(method) = attempt.method {
            event = event.with_method(method.as_str());
        }
        if let Ok(principal) = &attempt.result {
            event = event.with_subject(principal.subject.clone());
        }
        match &self.monitor {
            Some(monitor) => {
                let state = monitor.snapshot();
                event = event.with_health(
                    state.consecutive_failures,
                    state.consecutive_successes,
                    fallback,
                );
            }
            None => event.fallback_mode = Some(false),
        }
        if let Some(detail) = attempt.detail {
            event = event.with_detail(detail);
        }
        self.events.emit(event);

        if let Err(e) = &attempt.result {
            debug!(fallback, kind = ?e.kind, reason = %e.reason, "Authentication rejected");
        }
        attempt.result
    }

    async fn route(&self, request: &AuthRequest, fallback: bool, now: DateTime<Utc>) -> Attempt {
        let Some(token) = &request.session_token else {
            return self.login(request, fallback, now).await;
        };

        let resumed = self.resume(token, now);
        if resumed.result.is_ok() || !request.has_login_credentials() {
            return resumed;
        }

        // A dead session must not block a fresh login sent alongside it
        let mut login = self.login(request, fallback, now).await;
        if login.result.is_err() {
            let session_detail = resumed.detail.unwrap_or_default();
            login.detail = Some(match login.detail {
                Some(detail) => format!("{}; session also rejected: {}", detail, session_detail),
                None => format!("session also rejected: {}", session_detail),
            });
        }
        login
    }

    async fn login(&self, request: &AuthRequest, fallback: bool, now: DateTime<Utc>) -> Attempt {
        if !fallback {
            if let (Some(credential), Some(idp)) = (&request.oauth, &self.idp) {
                return self.oauth(idp.as_ref(), credential, request, now).await;
            }
        }

        if let Some(der) = &request.client_certificate {
            return self.mtls(der, now);
        }

        if request.oauth.is_some() {
            let why = if fallback {
                "IdP in fallback and no client certificate"
            } else {
                "no IdP configured and no client certificate"
            };
            return Attempt::failed(
                Some(AuthMethod::OAuth2),
                AuthError::new(AuthErrorKind::Authorization, Reason::ServerError),
                why,
            );
        }

        Attempt::failed(None, AuthError::missing_credentials(), "no credentials presented")
    }

    fn resume(&self, token: &str, now: DateTime<Utc>) -> Attempt {
        match self.sessions.verify_token(token, now) {
            Ok(session) => Attempt {
                method: Some(AuthMethod::Session),
                result: Ok(Principal {
                    subject: session.subject.clone(),
                    method: AuthMethod::Session,
                    session: Some(session),
                }),
                detail: None,
            },
            Err(e) => Attempt::failed(Some(AuthMethod::Session), AuthError::from(e), e.to_string()),
        }
    }

    async fn oauth(
        &self,
        idp: &dyn IdpClient,
        credential: &OAuthCredential,
        request: &AuthRequest,
        now: DateTime<Utc>,
    ) -> Attempt {
        let identity = match credential {
            OAuthCredential::Bearer(token) => idp.validate_bearer(token).await,
            OAuthCredential::AuthorizationCode { code, redirect_uri } => {
                idp.exchange_code(code, redirect_uri).await
            }
        };

        let primary: AuthzError = match identity {
            Ok(identity) => return self.issue(identity.subject, AuthMethod::OAuth2, now),
            Err(e) => e,
        };

        let Some(der) = &request.client_certificate else {
            return Attempt::failed(
                Some(AuthMethod::OAuth2),
                AuthError::from(&primary),
                primary.to_string(),
            );
        };

        // Secondary path; the caller still sees the OAuth2 reason on failure
        let secondary = self.mtls(der, now);
        match secondary.result {
            Ok(principal) => Attempt {
                method: Some(AuthMethod::Mtls),
                result: Ok(principal),
                detail: Some(format!("oauth2 failed ({}), mtls accepted", primary.reason())),
            },
            Err(cert_err) => Attempt::failed(
                Some(AuthMethod::OAuth2),
                AuthError::from(&primary),
                format!("{}; mtls also failed ({})", primary, cert_err.reason),
            ),
        }
    }

    fn mtls(&self, der: &[u8], now: DateTime<Utc>) -> Attempt {
        let crl = self.crl.current();
        match self.validator.validate_der(der, &crl, now) {
            Ok(record) => self.issue(record.common_name, AuthMethod::Mtls, now),
            Err(e) => Attempt::failed(Some(AuthMethod::Mtls), AuthError::from(&e), e.to_string()),
        }
    }

    fn issue(&self, subject: String, method: AuthMethod, now: DateTime<Utc>) -> Attempt {
        match self.sessions.issue(&subject, now) {
            Ok(session) => Attempt {
                method: Some(method),
                result: Ok(Principal {
                    subject,
                    method,
                    session: Some(session),
                }),
                detail: None,
            },
            Err(e) => {
                Attempt::failed(Some(method), AuthError::from(e), "no session secret available")
            }
        }
    }
}

impl fmt::Debug for AuthOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOrchestrator")
            .field("fallback", &self.is_fallback_active())
            .field("idp_configured", &self.idp.is_some())
            .field("validator", &self.validator)
            .finish()
    }
}
