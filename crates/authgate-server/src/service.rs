//! Service assembly
//!
//! Builds every component from a [`Config`] and wires them to one event
//! fan-out. The binary and the integration tests both start from here.

use crate::config::{Config, ConfigError};
use crate::crl_cache::{CrlCache, CrlSource, FileCrlSource, HttpCrlSource};
use crate::idp::{HttpIdpClient, IdpClient, IdpSetupError};
use crate::metrics::MetricsRecorder;
use crate::monitor::IdpHealthMonitor;
use crate::orchestrator::AuthOrchestrator;
use authgate_core::cert::CertificateValidator;
use authgate_core::event::{EventSink, FanoutSink};
use authgate_core::revocation::RevocationError;
use authgate_core::session::SessionManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Start-up errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IdP client error: {0}")]
    IdpSetup(#[from] IdpSetupError),
    #[error("CRL source error: {0}")]
    Revocation(#[from] RevocationError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// All long-lived components of one authgate instance
pub struct AuthService {
    pub orchestrator: Arc<AuthOrchestrator>,
    /// `None` when no IdP is configured
    pub monitor: Option<Arc<IdpHealthMonitor>>,
    pub crl: Arc<CrlCache>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Arc<MetricsRecorder>,
    pub crl_staleness_threshold: chrono::Duration,
    deny_list_purge_interval: Duration,
}

impl AuthService {
    /// Build the service from configuration
    ///
    /// Events go to the in-process metrics recorder and to `events`. One
    /// session secret is generated so sessions can be issued immediately.
    pub fn from_config(config: &Config, events: Arc<dyn EventSink>) -> Result<Self, ServiceError> {
        let metrics = Arc::new(MetricsRecorder::new());
        let events: Arc<dyn EventSink> = Arc::new(
            FanoutSink::new()
                .with(Arc::clone(&metrics) as Arc<dyn EventSink>)
                .with(events),
        );

        let source = crl_source(config)?;
        let crl = Arc::new(CrlCache::new(
            source,
            config.crl_refresh_interval(),
            config.crl_fetch_timeout(),
            Arc::clone(&events),
        ));

        let idp: Option<Arc<dyn IdpClient>> = match &config.idp {
            Some(idp_config) => Some(Arc::new(HttpIdpClient::new(
                idp_config.clone(),
                config.idp_probe_timeout(),
            )?)),
            None => None,
        };

        let monitor = idp.as_ref().map(|client| {
            Arc::new(IdpHealthMonitor::new(
                Arc::clone(client),
                config.thresholds(),
                config.idp_probe_interval(),
                config.idp_probe_timeout(),
                Arc::clone(&events),
            ))
        });

        let sessions = Arc::new(SessionManager::new(config.session_policy(), Arc::clone(&events)));
        let version = sessions.rotate_secret(Utc::now());
        debug!(version, "Generated initial session secret");

        let validator = CertificateValidator::new(
            config.allowlist()?,
            config.crl_staleness_threshold(),
            Arc::clone(&events),
        );

        let orchestrator = Arc::new(AuthOrchestrator::new(
            monitor.clone(),
            idp,
            Arc::clone(&crl),
            validator,
            Arc::clone(&sessions),
            events,
        ));

        Ok(Self {
            orchestrator,
            monitor,
            crl,
            sessions,
            metrics,
            crl_staleness_threshold: config.crl_staleness_threshold(),
            deny_list_purge_interval: config.crl_refresh_interval(),
        })
    }

    /// Start the monitor, CRL refresh and deny-list purge loops
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(3);

        match &self.monitor {
            Some(monitor) => tasks.push(monitor.spawn(shutdown.clone())),
            None => info!("No IdP configured, every login uses mTLS"),
        }
        tasks.push(self.crl.spawn(shutdown.clone()));
        tasks.push(tokio::spawn(purge_logged_out(
            Arc::clone(&self.sessions),
            self.deny_list_purge_interval,
            shutdown,
        )));

        tasks
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("monitor", &self.monitor)
            .field("crl_staleness_threshold", &self.crl_staleness_threshold)
            .finish_non_exhaustive()
    }
}

fn crl_source(config: &Config) -> Result<Arc<dyn CrlSource>, ServiceError> {
    let max_size = config.crl.max_crl_size_bytes;
    match (&config.crl.url, &config.crl.path) {
        (Some(url), _) => Ok(Arc::new(HttpCrlSource::new(
            url.as_str(),
            config.crl_fetch_timeout(),
            max_size,
        )?)),
        (None, Some(path)) => Ok(Arc::new(FileCrlSource::new(path.as_str(), max_size))),
        (None, None) => {
            Err(ConfigError::Invalid("crl requires either url or path".to_string()).into())
        }
    }
}

async fn purge_logged_out(
    sessions: Arc<SessionManager>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = crate::shutdown_requested(&mut shutdown) => break,
        }
        let purged = sessions.purge_expired(Utc::now());
        if purged > 0 {
            debug!(purged, "Purged expired logout entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authgate_core::event::{EventType, NullSink, Outcome};
    use authgate_core::auth::AuthErrorKind;
    use crate::orchestrator::AuthRequest;
    use std::io::Write;

    fn config_with_serials(file: &tempfile::NamedTempFile) -> Config {
        Config::from_json(&format!(
            r#"{{
                "cert_allowlist": ["ops.example.com"],
                "crl": {{ "path": "{}" }}
            }}"#,
            file.path().display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_from_config_without_idp() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0a").unwrap();
        let config = config_with_serials(&file);

        let service = AuthService::from_config(&config, Arc::new(NullSink)).unwrap();
        assert!(service.monitor.is_none());
        assert!(!service.orchestrator.is_fallback_active());
        assert_eq!(service.sessions.current_version(), Some(1));

        service.crl.refresh(Utc::now()).await.unwrap();
        assert!(service.crl.current().is_revoked("0A"));
        assert_eq!(
            service.metrics.count(EventType::CrlRefresh, Outcome::Success, None),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_counted() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = config_with_serials(&file);
        let service = AuthService::from_config(&config, Arc::new(NullSink)).unwrap();

        let err = service
            .orchestrator
            .authenticate(&AuthRequest::default(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::MissingCredentials);
        assert_eq!(
            service
                .metrics
                .counters()
                .iter()
                .filter(|((event_type, _, _), _)| *event_type == EventType::AuthAttempt)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_background_loops_stop() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = config_with_serials(&file);
        let service = AuthService::from_config(&config, Arc::new(NullSink)).unwrap();

        let (tx, rx) = crate::shutdown_channel();
        let tasks = service.spawn_background(rx);
        assert_eq!(tasks.len(), 2);

        tx.send(true).unwrap();
        for task in tasks {
            task.await.unwrap();
        }
    }
}
