//! Client certificate validation
//!
//! The mTLS path trusts the TLS terminator for the chain and proof of
//! possession. What remains is policy: validity window, common name allowlist
//! and revocation.
//!
//! [`validate_certificate`] runs the checks in a fixed order and stops at the
//! first failure:
//!
//! 1. `not_after < now` or `not_before > now` → [`CertificateError::Expired`]
//! 2. CN not on the allowlist → [`CertificateError::CnNotAllowed`]
//! 3. CRL snapshot stale → [`CertificateError::CrlError`]
//! 4. serial revoked → [`CertificateError::Revoked`]
//!
//! A stale CRL fails closed even for a certificate that is not revoked.

use crate::event::{AuthEvent, EventSink, EventType, Reason};
use crate::revocation::{serial_from_bytes, CrlSnapshot, Staleness};
use crate::revocation::crl::asn1_time_to_chrono;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use x509_parser::prelude::*;

/// Certificate validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("certificate outside its validity period")]
    Expired,

    #[error("common name not allowed")]
    CnNotAllowed,

    /// Revocation status unknown; carries the internal cause
    #[error("revocation status unavailable: {0}")]
    CrlError(String),

    #[error("certificate revoked")]
    Revoked,

    /// Presented bytes are not a usable X.509 certificate
    #[error("certificate parse error: {0}")]
    Parse(String),
}

impl CertificateError {
    pub fn reason(&self) -> Reason {
        match self {
            CertificateError::Expired => Reason::Expired,
            CertificateError::CnNotAllowed => Reason::CnNotAllowed,
            CertificateError::CrlError(_) => Reason::CrlError,
            CertificateError::Revoked => Reason::Revoked,
            CertificateError::Parse(_) => Reason::Invalid,
        }
    }
}

/// The parts of a client certificate that policy looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub common_name: String,
    /// Uppercase hex, no separators, no leading zero bytes
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateRecord {
    /// Build a record from already extracted fields
    ///
    /// The serial is normalised the same way CRL entries are.
    pub fn new(
        common_name: impl Into<String>,
        serial_number: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        CertificateRecord {
            common_name: common_name.into(),
            serial_number: crate::revocation::normalize_serial(serial_number),
            not_before,
            not_after,
        }
    }

    /// Extract a record from a DER-encoded certificate
    ///
    /// The first subject CN is used. A certificate without a CN is rejected.
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| {
                CertificateError::Parse(format!("Failed to parse certificate DER: {}", e))
            })?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .ok_or_else(|| CertificateError::Parse("Certificate has no common name".to_string()))?
            .as_str()
            .map_err(|e| CertificateError::Parse(format!("Unreadable common name: {}", e)))?
            .to_string();

        let validity = cert.validity();
        let not_before = asn1_time_to_chrono(&validity.not_before)
            .ok_or_else(|| CertificateError::Parse("Invalid notBefore time".to_string()))?;
        let not_after = asn1_time_to_chrono(&validity.not_after)
            .ok_or_else(|| CertificateError::Parse("Invalid notAfter time".to_string()))?;

        Ok(CertificateRecord {
            common_name,
            serial_number: serial_from_bytes(cert.raw_serial()),
            not_before,
            not_after,
        })
    }

    /// Extract a record from a PEM-encoded certificate
    pub fn from_pem(pem_data: &[u8]) -> Result<Self, CertificateError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem_data)
            .map_err(|e| {
                CertificateError::Parse(format!("Failed to parse certificate PEM: {}", e))
            })?;

        if pem.label != "CERTIFICATE" {
            return Err(CertificateError::Parse(format!(
                "Unexpected PEM label: {}",
                pem.label
            )));
        }

        Self::from_der(&pem.contents)
    }

    /// Whole days until `not_after` (negative once expired)
    pub fn days_to_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}

/// Allowlist configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllowlistError {
    #[error("certificate allowlist is empty")]
    Empty,

    #[error("allowlist entry {0} is blank")]
    Blank(usize),

    #[error("allowlist entry {0} has leading or trailing whitespace")]
    Whitespace(usize),

    #[error("allowlist entry {0} contains control characters")]
    ControlCharacter(usize),

    #[error("allowlist entry {0:?} is listed twice")]
    Duplicate(String),
}

/// Exact, case-sensitive set of accepted common names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CnAllowlist {
    names: HashSet<String>,
}

impl CnAllowlist {
    /// Parse configured entries
    ///
    /// Entries are not trimmed or case-folded; anything that would need that
    /// is rejected so that a typo fails at start-up instead of silently
    /// locking someone out.
    pub fn parse<I, S>(entries: I) -> Result<Self, AllowlistError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = HashSet::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let entry = entry.as_ref();
            if entry.trim().is_empty() {
                return Err(AllowlistError::Blank(index));
            }
            if entry.trim() != entry {
                return Err(AllowlistError::Whitespace(index));
            }
            if entry.chars().any(char::is_control) {
                return Err(AllowlistError::ControlCharacter(index));
            }
            if !names.insert(entry.to_string()) {
                return Err(AllowlistError::Duplicate(entry.to_string()));
            }
        }

        if names.is_empty() {
            return Err(AllowlistError::Empty);
        }

        Ok(CnAllowlist { names })
    }

    pub fn contains(&self, common_name: &str) -> bool {
        self.names.contains(common_name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Run the certificate pipeline
pub fn validate_certificate(
    cert: &CertificateRecord,
    crl: &CrlSnapshot,
    allowlist: &CnAllowlist,
    staleness_threshold: Duration,
    now: DateTime<Utc>,
) -> Result<CertificateRecord, CertificateError> {
    if cert.not_after < now || cert.not_before > now {
        return Err(CertificateError::Expired);
    }

    if !allowlist.contains(&cert.common_name) {
        return Err(CertificateError::CnNotAllowed);
    }

    if let Some(staleness) = crl.staleness_at(now, staleness_threshold) {
        let cause = match staleness {
            Staleness::NeverFetched => "CRL never fetched".to_string(),
            Staleness::Aged { age_secs } => format!("CRL age {}s exceeds threshold", age_secs),
            Staleness::Expired => "CRL past its nextUpdate".to_string(),
        };
        return Err(CertificateError::CrlError(cause));
    }

    if crl.is_revoked(&cert.serial_number) {
        return Err(CertificateError::Revoked);
    }

    Ok(cert.clone())
}

/// Certificate pipeline bound to its configuration
///
/// Every call emits exactly one `certificate_validation` event.
pub struct CertificateValidator {
    allowlist: CnAllowlist,
    staleness_threshold: Duration,
    events: Arc<dyn EventSink>,
}

impl CertificateValidator {
    pub fn new(
        allowlist: CnAllowlist,
        staleness_threshold: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            allowlist,
            staleness_threshold,
            events,
        }
    }

    pub fn allowlist(&self) -> &CnAllowlist {
        &self.allowlist
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    /// Validate an extracted certificate record
    pub fn validate(
        &self,
        cert: &CertificateRecord,
        crl: &CrlSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CertificateRecord, CertificateError> {
        let result =
            validate_certificate(cert, crl, &self.allowlist, self.staleness_threshold, now);

        let mut event = AuthEvent::from_result(
            EventType::CertificateValidation,
            &result,
            CertificateError::reason,
            now,
        )
        .with_subject(cert.common_name.clone())
        .with_cert_days_to_expiry(cert.days_to_expiry(now))
        .with_crl_age(crl.age_at(now));

        if let Err(e) = &result {
            event = event.with_detail(format!("serial {}: {}", cert.serial_number, e));
        }
        self.events.emit(event);

        result
    }

    /// Parse and validate a DER-encoded certificate
    pub fn validate_der(
        &self,
        der: &[u8],
        crl: &CrlSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CertificateRecord, CertificateError> {
        match CertificateRecord::from_der(der) {
            Ok(record) => self.validate(&record, crl, now),
            Err(e) => {
                self.events.emit(
                    AuthEvent::failure(EventType::CertificateValidation, e.reason(), now)
                        .with_crl_age(crl.age_at(now))
                        .with_detail(e.to_string()),
                );
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for CertificateValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateValidator")
            .field("allowlist", &self.allowlist)
            .field("staleness_threshold", &self.staleness_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecordingSink;

    fn allowlist() -> CnAllowlist {
        CnAllowlist::parse(["trader-01", "trader-02"]).unwrap()
    }

    fn fresh_crl(now: DateTime<Utc>, revoked: &[&str]) -> CrlSnapshot {
        CrlSnapshot::from_serials(revoked.iter().copied(), now - Duration::minutes(5))
    }

    fn cert(cn: &str, serial: &str, now: DateTime<Utc>) -> CertificateRecord {
        CertificateRecord::new(cn, serial, now - Duration::days(30), now + Duration::days(60))
    }

    fn check(
        record: &CertificateRecord,
        crl: &CrlSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CertificateRecord, CertificateError> {
        validate_certificate(record, crl, &allowlist(), Duration::hours(24), now)
    }

    #[test]
    fn test_valid_certificate() {
        let now = Utc::now();
        let record = cert("trader-01", "0A1B", now);

        let result = check(&record, &fresh_crl(now, &[]), now);
        assert_eq!(result, Ok(record));
    }

    #[test]
    fn test_expired_precedes_allowlist() {
        let now = Utc::now();
        let record = CertificateRecord::new(
            "not-listed",
            "01",
            now - Duration::days(60),
            now - Duration::seconds(1),
        );

        let result = check(&record, &fresh_crl(now, &["01"]), now);
        assert_eq!(result, Err(CertificateError::Expired));
    }

    #[test]
    fn test_not_yet_valid_is_expired() {
        let now = Utc::now();
        let record = CertificateRecord::new(
            "trader-01",
            "01",
            now + Duration::hours(1),
            now + Duration::days(60),
        );

        let result = check(&record, &fresh_crl(now, &[]), now);
        assert_eq!(result, Err(CertificateError::Expired));
    }

    #[test]
    fn test_not_after_equal_to_now_is_valid() {
        let now = Utc::now();
        let record = CertificateRecord::new("trader-01", "01", now - Duration::days(1), now);

        let result = check(&record, &fresh_crl(now, &[]), now);
        assert!(result.is_ok());
    }

    #[test]
    fn test_cn_not_allowed() {
        let now = Utc::now();
        let record = cert("Trader-01", "01", now);

        let result = check(&record, &fresh_crl(now, &[]), now);
        assert_eq!(result, Err(CertificateError::CnNotAllowed));
    }

    #[test]
    fn test_allowlist_precedes_crl() {
        let now = Utc::now();
        let record = cert("intruder", "01", now);

        let result = check(&record, &CrlSnapshot::empty(), now);
        assert_eq!(result, Err(CertificateError::CnNotAllowed));
    }

    #[test]
    fn test_stale_crl_fails_closed_for_unrevoked_cert() {
        let now = Utc::now();
        let record = cert("trader-01", "01", now);
        let crl = CrlSnapshot::from_serials(Vec::<String>::new(), now - Duration::hours(25));

        let result = check(&record, &crl, now);
        assert!(matches!(result, Err(CertificateError::CrlError(_))));
        assert_eq!(result.unwrap_err().reason(), Reason::CrlError);
    }

    #[test]
    fn test_never_fetched_crl_fails_closed() {
        let now = Utc::now();
        let record = cert("trader-01", "01", now);

        let result = check(&record, &CrlSnapshot::empty(), now);
        assert!(matches!(result, Err(CertificateError::CrlError(_))));
    }

    #[test]
    fn test_revoked_certificate() {
        let now = Utc::now();
        let record = cert("trader-01", "00:0a:1b", now);

        let result = check(&record, &fresh_crl(now, &["0A1B"]), now);
        assert_eq!(result, Err(CertificateError::Revoked));
    }

    #[test]
    fn test_allowlist_parse_rejects_bad_entries() {
        assert_eq!(CnAllowlist::parse(Vec::<String>::new()), Err(AllowlistError::Empty));
        assert_eq!(CnAllowlist::parse(["ok", "  "]), Err(AllowlistError::Blank(1)));
        assert_eq!(CnAllowlist::parse([" ok"]), Err(AllowlistError::Whitespace(0)));
        assert_eq!(CnAllowlist::parse(["o\u{7}k"]), Err(AllowlistError::ControlCharacter(0)));
        assert_eq!(
            CnAllowlist::parse(["a", "a"]),
            Err(AllowlistError::Duplicate("a".to_string()))
        );
    }

    #[test]
    fn test_allowlist_matching_is_exact() {
        let list = allowlist();
        assert!(list.contains("trader-01"));
        assert!(!list.contains("TRADER-01"));
        assert!(!list.contains("trader-0"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_validator_emits_one_event_per_call() {
        let sink = RecordingSink::new();
        let validator = CertificateValidator::new(allowlist(), Duration::hours(24), sink.clone());
        let now = Utc::now();
        let crl = fresh_crl(now, &["02"]);

        assert!(validator.validate(&cert("trader-01", "01", now), &crl, now).is_ok());
        assert_eq!(
            validator.validate(&cert("trader-02", "02", now), &crl, now),
            Err(CertificateError::Revoked)
        );

        let events = sink.of_type(EventType::CertificateValidation);
        assert_eq!(events.len(), 2);
        assert!(events[0].is_success());
        assert_eq!(events[0].subject.as_deref(), Some("trader-01"));
        assert_eq!(events[0].crl_age_secs, Some(300));
        assert_eq!(events[1].reason, Some(Reason::Revoked));
    }

    #[test]
    fn test_validate_der_rejects_garbage() {
        let sink = RecordingSink::new();
        let validator = CertificateValidator::new(allowlist(), Duration::hours(24), sink.clone());
        let now = Utc::now();

        let result = validator.validate_der(b"not a certificate", &fresh_crl(now, &[]), now);
        assert!(matches!(result, Err(CertificateError::Parse(_))));
        assert_eq!(sink.events()[0].reason, Some(Reason::Invalid));
    }
}
