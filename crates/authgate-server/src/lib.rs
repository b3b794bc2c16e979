//! authgate service
//!
//! This crate runs the asynchronous half of authgate on top of the
//! `authgate-core` decision logic.
//!
//! # Features
//!
//! - IdP health monitor with automatic mTLS fallback
//! - Background-refreshed CRL cache (HTTP or static file)
//! - Auth orchestrator routing OAuth2, mTLS and session resumption
//! - JSON configuration
//! - JSON-lines audit log, structured logging and Prometheus metrics
//! - `/health`, `/health/live`, `/health/ready` and `/metrics` endpoints (`status` feature)
//!
//! # Example
//!
//! ```rust,no_run
//! use authgate_server::{shutdown_channel, AuthRequest, AuthService, Config};
//! use authgate_core::event::NullSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("authgate.json")?;
//!     let service = AuthService::from_config(&config, Arc::new(NullSink))?;
//!
//!     let (shutdown_tx, shutdown_rx) = shutdown_channel();
//!     let _tasks = service.spawn_background(shutdown_rx);
//!
//!     let request = AuthRequest::with_client_certificate(std::fs::read("client.der")?);
//!     let principal = service.orchestrator.authenticate(&request, chrono::Utc::now()).await?;
//!     println!("authenticated {} via {}", principal.subject, principal.method);
//!
//!     shutdown_tx.send(true)?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod crl_cache;
pub mod idp;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod service;
#[cfg(feature = "status")]
pub mod status;

pub use audit::{AuditEntry, AuditLogger, TracingSink};
pub use config::{Config, ConfigError, CrlSourceConfig, IdpConfig};
pub use crl_cache::{CrlCache, CrlSource, FileCrlSource, HttpCrlSource, RefreshOutcome};
pub use idp::{HttpIdpClient, IdpClient, IdpSetupError};
pub use metrics::{MetricsRecorder, PrometheusMetrics};
pub use monitor::IdpHealthMonitor;
pub use orchestrator::{AuthOrchestrator, AuthRequest, OAuthCredential};
pub use service::{AuthService, ServiceError};

use tokio::sync::watch;

/// Create the channel used to stop background loops
///
/// Sending `true` (or dropping the sender) stops every loop holding a receiver.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // An Err means the sender is gone, which also means stop
    let _ = shutdown.wait_for(|stop| *stop).await;
}
