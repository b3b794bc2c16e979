use super::{IdpClient, IdpSetupError};
use crate::config::IdpConfig;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use authgate_core::health::{ProbeFailure, ProbeOutcome};
use authgate_core::oauth::{
    check_redirect_uri, classify_error_body, classify_oauth_error, AuthzError, IdpIdentity,
    OAuthErrorBody,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    userinfo_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
}

/// Endpoints in use, discovered or configured
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoints {
    token_endpoint: String,
    userinfo_endpoint: String,
}

/// reqwest-backed provider client
///
/// The probe fetches the discovery document and checks its issuer. A
/// successful probe also refreshes the endpoints used for authorizations.
#[derive(Debug)]
pub struct HttpIdpClient {
    config: IdpConfig,
    timeout: Duration,
    /// HTTP client (reused for connection pooling)
    http_client: reqwest::Client,
    endpoints: ArcSwapOption<Endpoints>,
}

impl HttpIdpClient {
    /// Create a new provider client
    ///
    /// # Arguments
    /// * `config` - Provider settings
    /// * `timeout` - Per-request HTTP timeout
    pub fn new(config: IdpConfig, timeout: Duration) -> Result<Self, IdpSetupError> {
        if config.client_id.is_empty() {
            return Err(IdpSetupError::Invalid("client_id cannot be empty".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("authgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let configured = match (&config.token_endpoint, &config.userinfo_endpoint) {
            (Some(token), Some(userinfo)) => Some(Arc::new(Endpoints {
                token_endpoint: token.clone(),
                userinfo_endpoint: userinfo.clone(),
            })),
            _ => None,
        };

        Ok(Self {
            config,
            timeout,
            http_client,
            endpoints: ArcSwapOption::new(configured),
        })
    }

    async fn fetch_discovery(&self) -> Result<Endpoints, ProbeFailure> {
        let url = self.config.discovery_url();
        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeFailure::Timeout(self.timeout)
            } else {
                ProbeFailure::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(ProbeFailure::Status(response.status().as_u16()));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| ProbeFailure::Malformed(format!("discovery document: {}", e)))?;

        if document.issuer.trim_end_matches('/') != self.config.issuer_url.trim_end_matches('/') {
            return Err(ProbeFailure::Malformed(format!(
                "issuer {} does not match configured {}",
                document.issuer, self.config.issuer_url
            )));
        }

        let token_endpoint = self
            .config
            .token_endpoint
            .clone()
            .or(document.token_endpoint)
            .ok_or_else(|| ProbeFailure::Malformed("no token_endpoint".to_string()))?;
        let userinfo_endpoint = self
            .config
            .userinfo_endpoint
            .clone()
            .or(document.userinfo_endpoint)
            .ok_or_else(|| ProbeFailure::Malformed("no userinfo_endpoint".to_string()))?;

        Ok(Endpoints {
            token_endpoint,
            userinfo_endpoint,
        })
    }

    async fn endpoints(&self) -> Result<Arc<Endpoints>, AuthzError> {
        if let Some(endpoints) = self.endpoints.load_full() {
            return Ok(endpoints);
        }

        let endpoints = Arc::new(
            self.fetch_discovery()
                .await
                .map_err(|e| AuthzError::ServerError(e.to_string()))?,
        );
        self.endpoints.store(Some(Arc::clone(&endpoints)));
        Ok(endpoints)
    }

    /// Classify a non-success provider response
    async fn error_from_response(response: reqwest::Response) -> AuthzError {
        let status = response.status().as_u16();
        match response.json::<OAuthErrorBody>().await {
            Ok(body) => classify_error_body(status, &body),
            Err(_) => classify_oauth_error(Some(status), None, None),
        }
    }
}

fn transport_error(e: reqwest::Error) -> AuthzError {
    classify_oauth_error(None, None, Some(&e.to_string()))
}

#[async_trait]
impl IdpClient for HttpIdpClient {
    async fn probe(&self) -> ProbeOutcome {
        let endpoints = self.fetch_discovery().await?;
        if self.endpoints.load().as_deref() != Some(&endpoints) {
            debug!(
                token_endpoint = %endpoints.token_endpoint,
                userinfo_endpoint = %endpoints.userinfo_endpoint,
                "IdP endpoints updated"
            );
            self.endpoints.store(Some(Arc::new(endpoints)));
        }
        Ok(())
    }

    async fn validate_bearer(&self, token: &str) -> Result<IdpIdentity, AuthzError> {
        if token.trim().is_empty() {
            return Err(AuthzError::AccessDenied("empty bearer token".to_string()));
        }

        let endpoints = self.endpoints().await?;
        let response = self
            .http_client
            .get(&endpoints.userinfo_endpoint)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| AuthzError::ServerError(format!("malformed userinfo response: {}", e)))?;

        if info.sub.is_empty() {
            return Err(AuthzError::ServerError("userinfo without subject".to_string()));
        }

        Ok(IdpIdentity {
            subject: info.sub,
            issuer: Some(self.config.issuer_url.clone()),
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdpIdentity, AuthzError> {
        check_redirect_uri(&self.config.redirect_uris, redirect_uri)?;

        if code.is_empty() {
            return Err(AuthzError::AccessDenied("empty authorization code".to_string()));
        }

        let endpoints = self.endpoints().await?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http_client
            .post(&endpoints.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            warn!(reason = %err.reason(), "Authorization code exchange rejected: {}", err);
            return Err(err);
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthzError::ServerError(format!("malformed token response: {}", e)))?;

        self.validate_bearer(&tokens.access_token).await
    }
}
