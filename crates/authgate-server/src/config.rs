use authgate_core::cert::CnAllowlist;
use authgate_core::health::HealthThresholds;
use authgate_core::session::SessionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for any configured duration (ten years)
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// OAuth2 / OIDC provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Issuer URL; discovery is fetched from `{issuer_url}/.well-known/openid-configuration`
    pub issuer_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Registered redirect URIs (exact match)
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Override the discovery document URL
    #[serde(default)]
    pub discovery_url: Option<String>,
    /// Override the discovered token endpoint
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// Override the discovered userinfo endpoint
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

impl IdpConfig {
    pub fn discovery_url(&self) -> String {
        match &self.discovery_url {
            Some(url) => url.clone(),
            None => format!(
                "{}/.well-known/openid-configuration",
                self.issuer_url.trim_end_matches('/')
            ),
        }
    }
}

/// Where revocation data comes from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrlSourceConfig {
    /// CRL distribution point (HTTP/HTTPS)
    #[serde(default)]
    pub url: Option<String>,
    /// Static CRL or serial-list file
    #[serde(default)]
    pub path: Option<String>,
    /// Maximum accepted CRL size in bytes (default: 10 MiB)
    #[serde(default = "default_max_crl_size_bytes")]
    pub max_crl_size_bytes: usize,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Consecutive probe failures before entering fallback (default: 3)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive probe successes before leaving fallback (default: 5)
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// CRL age beyond which mTLS logins fail closed (default: 86400)
    #[serde(default = "default_crl_staleness_threshold_secs")]
    pub crl_staleness_threshold_secs: u64,

    /// Session lifetime (default: 28800)
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// How long a superseded secret keeps verifying (default: session_ttl_secs)
    #[serde(default)]
    pub secret_grace_window_secs: Option<u64>,

    /// Certificate common names accepted on the mTLS path
    #[serde(default)]
    pub cert_allowlist: Vec<String>,

    /// IdP probe interval (default: 30)
    #[serde(default = "default_idp_probe_interval_secs")]
    pub idp_probe_interval_secs: u64,

    /// IdP probe timeout (default: 5)
    #[serde(default = "default_idp_probe_timeout_secs")]
    pub idp_probe_timeout_secs: u64,

    /// CRL refresh interval (default: 3600)
    #[serde(default = "default_crl_refresh_interval_secs")]
    pub crl_refresh_interval_secs: u64,

    /// CRL fetch timeout (default: 5)
    #[serde(default = "default_crl_fetch_timeout_secs")]
    pub crl_fetch_timeout_secs: u64,

    /// OAuth2 provider; without it every login takes the mTLS path
    #[serde(default)]
    pub idp: Option<IdpConfig>,

    #[serde(default)]
    pub crl: CrlSourceConfig,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,

    /// Audit log file path (JSON lines, optional)
    #[serde(default)]
    pub audit_log_path: Option<String>,

    /// Health and metrics HTTP listener, e.g. "127.0.0.1:9090" (optional)
    #[serde(default)]
    pub status_listen_address: Option<String>,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    5
}

fn default_crl_staleness_threshold_secs() -> u64 {
    86_400
}

fn default_session_ttl_secs() -> u64 {
    28_800
}

fn default_idp_probe_interval_secs() -> u64 {
    30
}

fn default_idp_probe_timeout_secs() -> u64 {
    5
}

fn default_crl_refresh_interval_secs() -> u64 {
    3_600
}

fn default_crl_fetch_timeout_secs() -> u64 {
    5
}

fn default_max_crl_size_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Config {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            crl_staleness_threshold_secs: default_crl_staleness_threshold_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            secret_grace_window_secs: None,
            cert_allowlist: vec![],
            idp_probe_interval_secs: default_idp_probe_interval_secs(),
            idp_probe_timeout_secs: default_idp_probe_timeout_secs(),
            crl_refresh_interval_secs: default_crl_refresh_interval_secs(),
            crl_fetch_timeout_secs: default_crl_fetch_timeout_secs(),
            idp: None,
            crl: CrlSourceConfig {
                url: None,
                path: None,
                max_crl_size_bytes: default_max_crl_size_bytes(),
            },
            log_level: None,
            audit_log_path: None,
            status_listen_address: None,
        }
    }
}

impl Config {
    /// Load and validate configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
        }
    }

    pub fn session_policy(&self) -> SessionPolicy {
        let ttl = self.session_ttl_secs;
        SessionPolicy {
            ttl: seconds(ttl),
            grace_window: seconds(self.secret_grace_window_secs.unwrap_or(ttl)),
        }
    }

    pub fn crl_staleness_threshold(&self) -> chrono::Duration {
        seconds(self.crl_staleness_threshold_secs)
    }

    pub fn idp_probe_interval(&self) -> Duration {
        Duration::from_secs(self.idp_probe_interval_secs)
    }

    pub fn idp_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.idp_probe_timeout_secs)
    }

    pub fn crl_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.crl_refresh_interval_secs)
    }

    pub fn crl_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.crl_fetch_timeout_secs)
    }

    pub fn allowlist(&self) -> Result<CnAllowlist, ConfigError> {
        CnAllowlist::parse(&self.cert_allowlist)
            .map_err(|e| ConfigError::Invalid(format!("cert_allowlist: {}", e)))
    }

    /// Status listener address, if configured
    pub fn status_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.status_listen_address
            .as_deref()
            .map(|addr| {
                addr.parse().map_err(|_| {
                    ConfigError::Invalid(format!("Invalid status listen address: {}", addr))
                })
            })
            .transpose()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "Health thresholds must be at least 1".to_string(),
            ));
        }

        let mut durations = vec![
            ("crl_staleness_threshold_secs", self.crl_staleness_threshold_secs),
            ("session_ttl_secs", self.session_ttl_secs),
            ("idp_probe_interval_secs", self.idp_probe_interval_secs),
            ("idp_probe_timeout_secs", self.idp_probe_timeout_secs),
            ("crl_refresh_interval_secs", self.crl_refresh_interval_secs),
            ("crl_fetch_timeout_secs", self.crl_fetch_timeout_secs),
        ];
        if let Some(grace) = self.secret_grace_window_secs {
            durations.push(("secret_grace_window_secs", grace));
        }
        for (name, secs) in durations {
            if secs == 0 || secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }

        if self.idp_probe_timeout_secs > self.idp_probe_interval_secs {
            return Err(ConfigError::Invalid(
                "idp_probe_timeout_secs cannot exceed idp_probe_interval_secs".to_string(),
            ));
        }

        // A CRL refreshed less often than it goes stale locks every mTLS user out
        if self.crl_refresh_interval_secs >= self.crl_staleness_threshold_secs {
            return Err(ConfigError::Invalid(
                "crl_refresh_interval_secs must be shorter than crl_staleness_threshold_secs"
                    .to_string(),
            ));
        }

        match (&self.crl.url, &self.crl.path) {
            (Some(url), None) => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid(format!("Invalid CRL URL: {}", url)));
                }
            }
            (None, Some(path)) => {
                if path.is_empty() {
                    return Err(ConfigError::Invalid("CRL path cannot be empty".to_string()));
                }
            }
            _ => {
                return Err(ConfigError::Invalid(
                    "Exactly one of crl.url and crl.path must be set".to_string(),
                ))
            }
        }

        if self.crl.max_crl_size_bytes == 0 {
            return Err(ConfigError::Invalid(
                "crl.max_crl_size_bytes cannot be 0".to_string(),
            ));
        }

        self.allowlist()?;

        if let Some(idp) = &self.idp {
            if !(idp.issuer_url.starts_with("http://") || idp.issuer_url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "Invalid IdP issuer URL: {}",
                    idp.issuer_url
                )));
            }
            if idp.client_id.is_empty() {
                return Err(ConfigError::Invalid("IdP client_id cannot be empty".to_string()));
            }
            if idp.redirect_uris.iter().any(|uri| uri.is_empty()) {
                return Err(ConfigError::Invalid(
                    "IdP redirect_uris cannot contain empty entries".to_string(),
                ));
            }
        }

        self.status_addr()?;

        Ok(())
    }

    pub fn example() -> Self {
        Config {
            cert_allowlist: vec!["trader-01".to_string(), "trader-02".to_string()],
            idp: Some(IdpConfig {
                issuer_url: "https://login.example.com".to_string(),
                client_id: "trading-desk".to_string(),
                client_secret: Some("change-me".to_string()),
                redirect_uris: vec!["https://desk.example.com/oauth/callback".to_string()],
                discovery_url: None,
                token_endpoint: None,
                userinfo_endpoint: None,
            }),
            crl: CrlSourceConfig {
                url: Some("http://pki.example.com/crl/desk-ca.crl".to_string()),
                path: None,
                max_crl_size_bytes: default_max_crl_size_bytes(),
            },
            log_level: Some("info".to_string()),
            audit_log_path: Some("/var/log/authgate/audit.log".to_string()),
            status_listen_address: Some("127.0.0.1:9090".to_string()),
            ..Config::default()
        }
    }
}

/// Validated seconds to a chrono duration
fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}
