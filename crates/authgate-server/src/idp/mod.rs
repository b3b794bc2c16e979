//! OAuth2 / OIDC provider access
//!
//! The rest of the service talks to the provider only through [`IdpClient`]:
//! a cheap health probe, bearer token validation and authorization code
//! exchange. [`HttpIdpClient`] is the reqwest implementation; tests script
//! their own.

mod http;

pub use http::HttpIdpClient;

use async_trait::async_trait;
use authgate_core::health::ProbeOutcome;
use authgate_core::oauth::{AuthzError, IdpIdentity};
use thiserror::Error;

/// Provider client errors raised while building a client
#[derive(Error, Debug)]
pub enum IdpSetupError {
    #[error("Failed to create HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid IdP configuration: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait IdpClient: Send + Sync {
    /// One health probe
    ///
    /// Must not be used for real authorizations; the outcome only feeds the
    /// health monitor.
    async fn probe(&self) -> ProbeOutcome;

    /// Resolve a bearer access token to the identity it was issued for
    async fn validate_bearer(&self, token: &str) -> Result<IdpIdentity, AuthzError>;

    /// Redeem an authorization code
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdpIdentity, AuthzError>;
}
