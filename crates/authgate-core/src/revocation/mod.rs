//! Certificate revocation data
//!
//! This module turns raw revocation data into immutable snapshots the
//! certificate validator can consult without locking.
//!
//! # Features
//!
//! - **CRL Parsing & Validation**: DER/PEM parsing with `thisUpdate`/`nextUpdate` checks
//! - **Serial Lists**: plain-text serial feeds for air-gapped environments
//! - **Snapshots**: immutable serial sets with fetch time and staleness evaluation
//! - **O(1) Revocation Lookup**: HashSet-based serial number checking
//!
//! # Fail-closed staleness
//!
//! A snapshot that was never fetched, whose last successful fetch is older than
//! the configured threshold, or whose CRL `nextUpdate` has passed is *stale*.
//! The validator rejects every certificate against a stale snapshot with
//! `crl_error`, revoked or not.
//!
//! ```
//! use authgate_core::revocation::{CrlInfo, CrlSnapshot};
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let crl = CrlInfo::parse(b"# revoked\n0a:1b:2c\n").unwrap();
//! let snapshot = CrlSnapshot::from_crl(crl, now);
//!
//! assert!(snapshot.is_revoked("0A1B2C"));
//! assert!(!snapshot.is_stale_at(now, Duration::hours(24)));
//! assert!(CrlSnapshot::empty().is_stale_at(now, Duration::hours(24)));
//! ```

pub mod crl;
pub mod error;
pub mod snapshot;

pub use crl::{normalize_serial, serial_from_bytes, CrlInfo};
pub use error::RevocationError;
pub use snapshot::{CrlSnapshot, Staleness};
