//! Status HTTP endpoints
//!
//! - `GET /health`: JSON view of the health mode, probe counters and CRL state
//! - `GET /health/live`: process is up
//! - `GET /health/ready`: 503 until the first CRL fetch has succeeded
//! - `GET /metrics`: Prometheus text format

use crate::metrics::collect_metrics;
use crate::service::AuthService;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Overall service status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `healthy`, `degraded` or `unavailable`
    pub status: String,
    /// `healthy` (OAuth2 primary) or `fallback` (mTLS)
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp: Option<IdpHealth>,
    pub crl: CrlHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_secret_version: Option<u32>,
}

/// Health monitor counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpHealth {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_check_duration_ms: u64,
}

/// Revocation data freshness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<i64>,
    pub stale: bool,
    /// Last refresh attempt failed
    pub source_stale: bool,
    pub revoked_serials: usize,
}

/// Shared state for the status handlers
#[derive(Clone)]
pub struct StatusState {
    service: Arc<AuthService>,
}

impl StatusState {
    pub fn new(service: Arc<AuthService>) -> Self {
        Self { service }
    }

    fn health_at(&self, now: DateTime<Utc>) -> HealthStatus {
        let service = &self.service;

        let idp = service.monitor.as_ref().map(|monitor| {
            let state = monitor.snapshot();
            IdpHealth {
                consecutive_failures: state.consecutive_failures,
                consecutive_successes: state.consecutive_successes,
                last_check_at: state.last_check_at,
                last_check_duration_ms: state.last_check_duration.as_millis() as u64,
            }
        });
        let fallback = service.orchestrator.is_fallback_active();

        let snapshot = service.crl.current();
        let crl = CrlHealth {
            fetched_at: snapshot.fetched_at,
            age_secs: snapshot.age_at(now),
            stale: snapshot.is_stale_at(now, service.crl_staleness_threshold),
            source_stale: snapshot.source_stale,
            revoked_serials: snapshot.revoked_count(),
        };

        // OAuth2 counts only when an IdP is configured and not in fallback
        let oauth_usable = idp.is_some() && !fallback;
        let mtls_usable = !crl.stale;
        let all_usable = mtls_usable && (oauth_usable || idp.is_none());
        let status = if all_usable {
            "healthy"
        } else if oauth_usable || mtls_usable {
            "degraded"
        } else {
            "unavailable"
        };

        HealthStatus {
            status: status.to_string(),
            mode: if fallback { "fallback" } else { "healthy" }.to_string(),
            idp,
            crl,
            session_secret_version: service.sessions.current_version(),
        }
    }
}

async fn health_handler(State(state): State<StatusState>) -> Response {
    let health = state.health_at(Utc::now());

    let status_code = if health.status == "unavailable" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(health)).into_response()
}

async fn ready_handler(State(state): State<StatusState>) -> Response {
    if state.service.crl.current().fetched_at.is_some() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "CRL not fetched yet").into_response()
    }
}

async fn live_handler() -> Response {
    (StatusCode::OK, "alive").into_response()
}

async fn metrics_handler(State(state): State<StatusState>) -> Response {
    let metrics = collect_metrics(&state.service, Utc::now());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.content,
    )
        .into_response()
}

/// Build the status router
pub fn create_status_router(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/ready", get(ready_handler))
        .route("/health/live", get(live_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(StatusState::new(service))
}

/// Serve the status endpoints until shutdown
pub async fn start_status_server(
    addr: SocketAddr,
    service: Arc<AuthService>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = create_status_router(service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status endpoints listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { crate::shutdown_requested(&mut shutdown).await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use authgate_core::event::NullSink;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::io::Write;
    use tower::ServiceExt;

    fn service(file: &tempfile::NamedTempFile) -> Arc<AuthService> {
        let config = Config::from_json(&format!(
            r#"{{ "cert_allowlist": ["ops.example.com"], "crl": {{ "path": "{}" }} }}"#,
            file.path().display()
        ))
        .unwrap();
        Arc::new(AuthService::from_config(&config, Arc::new(NullSink)).unwrap())
    }

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_ready_waits_for_first_crl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "01").unwrap();
        let service = service(&file);

        let (status, _) =
            get_body(create_status_router(Arc::clone(&service)), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        service.crl.refresh(Utc::now()).await.unwrap();
        let (status, body) = get_body(create_status_router(service), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }

    #[tokio::test]
    async fn test_health_without_crl_is_unavailable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (status, body) = get_body(create_status_router(service(&file)), "/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let health: HealthStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(health.status, "unavailable");
        assert_eq!(health.mode, "healthy");
        assert!(health.idp.is_none());
        assert!(health.crl.stale);
        assert_eq!(health.session_secret_version, Some(1));
    }

    #[tokio::test]
    async fn test_live_and_metrics() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "01\n02").unwrap();
        let service = service(&file);
        service.crl.refresh(Utc::now()).await.unwrap();

        let (status, body) =
            get_body(create_status_router(Arc::clone(&service)), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alive");

        let (status, body) = get_body(create_status_router(service), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("authgate_crl_revoked_serials 2\n"));
        assert!(body.contains("authgate_crl_stale 0\n"));
        assert!(body.contains("event_type=\"crl_refresh\",result=\"success\""));
    }
}
