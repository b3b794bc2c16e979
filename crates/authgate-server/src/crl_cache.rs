//! Background-refreshed CRL cache
//!
//! The cache holds one immutable [`CrlSnapshot`] behind an `ArcSwap`. Readers
//! call [`CrlCache::current`] and never wait. A refresh builds a whole new
//! snapshot and swaps the pointer; a failed refresh keeps the previous serials
//! and only flags the snapshot as coming from a stale source, so its age keeps
//! growing until the validator starts failing closed.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use authgate_core::event::{AuthEvent, EventSink, EventType, Reason};
use authgate_core::revocation::{CrlInfo, CrlSnapshot, RevocationError};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Where raw revocation data comes from
#[async_trait]
pub trait CrlSource: Send + Sync {
    /// Fetch the raw CRL (DER, PEM or serial list)
    async fn fetch(&self) -> Result<Vec<u8>, RevocationError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// CRL distribution point over HTTP(S)
#[derive(Debug)]
pub struct HttpCrlSource {
    url: String,
    max_size: usize,
    timeout: Duration,
    /// HTTP client (reused for connection pooling)
    http_client: reqwest::Client,
}

impl HttpCrlSource {
    /// Create a new HTTP CRL source
    ///
    /// # Arguments
    /// * `url` - Distribution point URL
    /// * `timeout` - HTTP request timeout
    /// * `max_size` - Maximum accepted body size in bytes
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        max_size: usize,
    ) -> Result<Self, RevocationError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RevocationError::HttpError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            url: url.into(),
            max_size,
            timeout,
            http_client,
        })
    }
}

#[async_trait]
impl CrlSource for HttpCrlSource {
    async fn fetch(&self) -> Result<Vec<u8>, RevocationError> {
        let response = self.http_client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                RevocationError::HttpTimeout(self.timeout.as_secs())
            } else {
                RevocationError::FetchError(format!("CRL HTTP request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(RevocationError::HttpError(format!(
                "CRL distribution point returned HTTP {}",
                response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_size as u64 {
                return Err(RevocationError::CrlTooLarge(length as usize, self.max_size));
            }
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                RevocationError::HttpTimeout(self.timeout.as_secs())
            } else {
                RevocationError::HttpError(format!("Failed to read CRL body: {}", e))
            }
        })?;

        if bytes.len() > self.max_size {
            return Err(RevocationError::CrlTooLarge(bytes.len(), self.max_size));
        }

        Ok(bytes.to_vec())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Static CRL file, re-read on every refresh
#[derive(Debug, Clone)]
pub struct FileCrlSource {
    path: PathBuf,
    max_size: usize,
}

impl FileCrlSource {
    pub fn new(path: impl Into<PathBuf>, max_size: usize) -> Self {
        Self {
            path: path.into(),
            max_size,
        }
    }
}

#[async_trait]
impl CrlSource for FileCrlSource {
    async fn fetch(&self) -> Result<Vec<u8>, RevocationError> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if metadata.len() > self.max_size as u64 {
            return Err(RevocationError::CrlTooLarge(metadata.len() as usize, self.max_size));
        }
        Ok(tokio::fs::read(&self.path).await?)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Result of a successful refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub revoked_count: usize,
    pub fetched_at: DateTime<Utc>,
}

/// Background-refreshed cache of revoked serials
pub struct CrlCache {
    source: Arc<dyn CrlSource>,
    snapshot: ArcSwap<CrlSnapshot>,
    refresh_interval: Duration,
    fetch_timeout: Duration,
    events: Arc<dyn EventSink>,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

impl CrlCache {
    /// Create a cache that has not fetched anything yet
    ///
    /// Until the first successful refresh every certificate fails with
    /// `crl_error`.
    pub fn new(
        source: Arc<dyn CrlSource>,
        refresh_interval: Duration,
        fetch_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            source,
            snapshot: ArcSwap::from_pointee(CrlSnapshot::empty()),
            refresh_interval,
            fetch_timeout,
            events,
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Last published snapshot
    pub fn current(&self) -> Arc<CrlSnapshot> {
        self.snapshot.load_full()
    }

    /// Fetch, parse and publish a new snapshot
    ///
    /// On failure the previous serials stay in place, flagged stale, and the
    /// error is returned.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshOutcome, RevocationError> {
        let fetched = match time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(RevocationError::HttpTimeout(self.fetch_timeout.as_secs())),
        };

        let parsed = fetched.and_then(|bytes| {
            let crl = CrlInfo::parse(&bytes)?;
            crl.validate_current(now)?;
            Ok(crl)
        });

        match parsed {
            Ok(crl) => {
                let outcome = RefreshOutcome {
                    revoked_count: crl.revoked_count(),
                    fetched_at: now,
                };
                self.snapshot.store(Arc::new(CrlSnapshot::from_crl(crl, now)));
                self.refreshes.fetch_add(1, Ordering::Relaxed);

                info!(
                    source = %self.source.describe(),
                    revoked = outcome.revoked_count,
                    "CRL refreshed"
                );
                self.events.emit(
                    AuthEvent::success(EventType::CrlRefresh, now)
                        .with_crl_age(Some(0))
                        .with_detail(format!("{} revoked serials", outcome.revoked_count)),
                );
                Ok(outcome)
            }
            Err(e) => {
                let previous = self.snapshot.rcu(|snapshot| snapshot.marked_stale());
                self.failures.fetch_add(1, Ordering::Relaxed);

                let age = previous.age_at(now);
                warn!(
                    source = %self.source.describe(),
                    crl_age_secs = age.unwrap_or(-1),
                    "CRL refresh failed, keeping previous revocation data: {}",
                    e
                );
                self.events.emit(
                    AuthEvent::failure(EventType::CrlRefresh, Reason::CrlError, now)
                        .with_crl_age(age)
                        .with_detail(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Refresh on a fixed interval until shutdown
    ///
    /// The first refresh happens immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = crate::shutdown_requested(&mut shutdown) => break,
            }
            // Failures are logged and reported inside refresh
            let _ = self.refresh(Utc::now()).await;
        }

        debug!("CRL refresh task stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }

    /// Successful refreshes so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Failed refreshes so far
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CrlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrlCache")
            .field("source", &self.source.describe())
            .field("refresh_interval", &self.refresh_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}
