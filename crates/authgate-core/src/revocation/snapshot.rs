//! Immutable CRL snapshots
//!
//! A [`CrlSnapshot`] is what the certificate validator sees. The cache builds a
//! new snapshot on every refresh attempt and swaps a pointer, so a reader holds
//! one consistent serial set for the whole of a validation.

use super::crl::CrlInfo;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Why a snapshot is too old to be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// No CRL has ever been fetched successfully
    NeverFetched,
    /// Last successful fetch is older than the threshold
    Aged { age_secs: i64 },
    /// The CRL's own nextUpdate has passed
    Expired,
}

/// Revoked serials as of the last successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlSnapshot {
    /// Normalised serial numbers, shared between snapshots of the same fetch
    pub revoked_serials: Arc<HashSet<String>>,

    /// Time of the last successful fetch (`None` = never fetched)
    pub fetched_at: Option<DateTime<Utc>>,

    /// The most recent refresh attempt failed
    pub source_stale: bool,

    pub issuer: Option<String>,
    pub next_update: Option<DateTime<Utc>>,
}

impl CrlSnapshot {
    /// Snapshot for a cache that has not fetched anything yet
    pub fn empty() -> Self {
        CrlSnapshot {
            revoked_serials: Arc::new(HashSet::new()),
            fetched_at: None,
            source_stale: false,
            issuer: None,
            next_update: None,
        }
    }

    /// Snapshot built from a freshly parsed CRL
    pub fn from_crl(crl: CrlInfo, fetched_at: DateTime<Utc>) -> Self {
        CrlSnapshot {
            revoked_serials: Arc::new(crl.revoked_serials),
            fetched_at: Some(fetched_at),
            source_stale: false,
            issuer: crl.issuer,
            next_update: crl.next_update,
        }
    }

    /// Snapshot built from already normalised serials
    pub fn from_serials<I, S>(serials: I, fetched_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let serials = serials
            .into_iter()
            .map(|s| super::crl::normalize_serial(s.as_ref()))
            .collect();

        CrlSnapshot {
            revoked_serials: Arc::new(serials),
            fetched_at: Some(fetched_at),
            source_stale: false,
            issuer: None,
            next_update: None,
        }
    }

    /// Copy of this snapshot flagged as coming from a failed refresh
    ///
    /// Serials and `fetched_at` are kept, so age keeps growing from the last
    /// good fetch.
    pub fn marked_stale(&self) -> Self {
        CrlSnapshot {
            source_stale: true,
            ..self.clone()
        }
    }

    /// Check whether a normalised serial is revoked
    pub fn is_revoked(&self, serial: &str) -> bool {
        self.revoked_serials.contains(serial)
    }

    /// Seconds since the last successful fetch
    pub fn age_at(&self, now: DateTime<Utc>) -> Option<i64> {
        self.fetched_at.map(|at| (now - at).num_seconds())
    }

    /// Evaluate staleness at `now` against `threshold`
    ///
    /// Returns `None` when the snapshot may be relied upon.
    pub fn staleness_at(&self, now: DateTime<Utc>, threshold: Duration) -> Option<Staleness> {
        let fetched_at = match self.fetched_at {
            Some(at) => at,
            None => return Some(Staleness::NeverFetched),
        };

        if now - fetched_at > threshold {
            return Some(Staleness::Aged {
                age_secs: (now - fetched_at).num_seconds(),
            });
        }

        match self.next_update {
            Some(next_update) if next_update <= now => Some(Staleness::Expired),
            _ => None,
        }
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.staleness_at(now, threshold).is_some()
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked_serials.len()
    }
}

impl Default for CrlSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
