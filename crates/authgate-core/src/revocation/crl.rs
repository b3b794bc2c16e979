//! CRL parsing and validation
//!
//! Revocation data arrives from an upstream source in one of three formats:
//!
//! - DER-encoded X.509 CRL (RFC 5280)
//! - PEM-encoded X.509 CRL (`-----BEGIN X509 CRL-----`)
//! - A plain serial list: one hex serial per line, `#` starts a comment.
//!   Used for static feeds in environments without a CA-published CRL.
//!
//! [`CrlInfo::parse`] detects the format. CRL signatures are not verified here;
//! the distribution point is trusted the same way the TLS terminator trusts it.
//!
//! Serial numbers are normalised with [`normalize_serial`] so that CRL entries
//! and certificate serials compare as plain strings.

use super::error::RevocationError;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use x509_parser::prelude::*;

const PEM_CRL_MARKER: &[u8] = b"-----BEGIN X509 CRL-----";
const DER_SEQUENCE_TAG: u8 = 0x30;

/// Parsed revocation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlInfo {
    /// CRL issuer distinguished name (`None` for serial lists)
    pub issuer: Option<String>,

    /// CRL thisUpdate time (when this CRL was issued)
    pub this_update: Option<DateTime<Utc>>,

    /// CRL nextUpdate time (optional per RFC 5280)
    pub next_update: Option<DateTime<Utc>>,

    /// Normalised revoked serial numbers
    pub revoked_serials: HashSet<String>,
}

impl CrlInfo {
    /// Parse revocation data in any supported format
    pub fn parse(data: &[u8]) -> Result<Self, RevocationError> {
        if contains(data, PEM_CRL_MARKER) {
            Self::parse_pem(data)
        } else if data.first() == Some(&DER_SEQUENCE_TAG) && !is_text(data) {
            Self::parse_der(data)
        } else {
            Self::parse_serial_list(data)
        }
    }

    /// Parse a CRL from DER-encoded bytes
    ///
    /// Extracts issuer, validity period and the revoked serial set. The
    /// signature is not checked.
    pub fn parse_der(crl_der: &[u8]) -> Result<Self, RevocationError> {
        let (_, crl) = parse_x509_crl(crl_der)
            .map_err(|e| RevocationError::ParseError(format!("Failed to parse CRL DER: {}", e)))?;

        let issuer = crl.issuer().to_string();

        let this_update = asn1_time_to_chrono(&crl.last_update()).ok_or_else(|| {
            RevocationError::ParseError("Invalid thisUpdate time in CRL".to_string())
        })?;

        let next_update = crl.next_update().and_then(|t| asn1_time_to_chrono(&t));

        let revoked_serials = crl
            .iter_revoked_certificates()
            .map(|revoked| serial_from_bytes(revoked.raw_serial()))
            .collect();

        Ok(CrlInfo {
            issuer: Some(issuer),
            this_update: Some(this_update),
            next_update,
            revoked_serials,
        })
    }

    /// Parse a CRL from PEM-encoded bytes
    pub fn parse_pem(pem_data: &[u8]) -> Result<Self, RevocationError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem_data)
            .map_err(|e| RevocationError::ParseError(format!("Failed to parse CRL PEM: {}", e)))?;

        if pem.label != "X509 CRL" {
            return Err(RevocationError::ParseError(format!(
                "Unexpected PEM label: {}",
                pem.label
            )));
        }

        Self::parse_der(&pem.contents)
    }

    /// Parse a plain serial list
    ///
    /// Each non-empty line that is not a `#` comment must be a hex serial;
    /// `:` separators and surrounding whitespace are accepted.
    pub fn parse_serial_list(data: &[u8]) -> Result<Self, RevocationError> {
        let text = std::str::from_utf8(data).map_err(|_| {
            let message = "Revocation data is neither a CRL nor UTF-8 text";
            RevocationError::ParseError(message.to_string())
        })?;

        let mut revoked_serials = HashSet::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            if !line.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
                return Err(RevocationError::ParseError(format!(
                    "Line {}: not a hex serial: {:?}",
                    index + 1,
                    line
                )));
            }
            revoked_serials.insert(normalize_serial(line));
        }

        Ok(CrlInfo {
            issuer: None,
            this_update: None,
            next_update: None,
            revoked_serials,
        })
    }

    /// Check if a normalised serial number is revoked
    pub fn is_revoked(&self, serial: &str) -> bool {
        self.revoked_serials.contains(serial)
    }

    /// Validate CRL is current (not expired and not future-dated)
    ///
    /// Checks `thisUpdate <= now` and, when present, `nextUpdate > now`.
    /// Serial lists carry no validity period and always pass.
    pub fn validate_current(&self, now: DateTime<Utc>) -> Result<(), RevocationError> {
        if let Some(this_update) = self.this_update {
            if this_update > now {
                return Err(RevocationError::CrlNotYetValid(this_update.to_rfc3339()));
            }
        }

        if let Some(next_update) = self.next_update {
            if next_update <= now {
                return Err(RevocationError::CrlExpired(next_update.to_rfc3339()));
            }
        }

        Ok(())
    }

    /// Get the number of revoked certificates in this CRL
    pub fn revoked_count(&self) -> usize {
        self.revoked_serials.len()
    }

    /// Check if CRL has any revoked certificates
    pub fn is_empty(&self) -> bool {
        self.revoked_serials.is_empty()
    }
}

/// Normalise a serial number given as raw big-endian bytes
///
/// Leading zero bytes (DER sign padding) are dropped; the result is uppercase
/// hex without separators.
pub fn serial_from_bytes(bytes: &[u8]) -> String {
    let first_significant = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len().saturating_sub(1));
    hex::encode_upper(&bytes[first_significant..])
}

// A serial list starting with "0" also begins with the SEQUENCE tag byte
fn is_text(data: &[u8]) -> bool {
    data.iter().all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace())
}

/// Normalise a serial number given as text
///
/// Accepts `0a:1b:2c`, `0A1B2C`, `a1b2c` and so on. Non-hex characters are
/// dropped, odd-length input is left-padded and leading zero bytes removed,
/// so `normalize_serial("00:0A:1B")` equals `serial_from_bytes(&[0x0a, 0x1b])`.
pub fn normalize_serial(serial: &str) -> String {
    let mut digits: String = serial
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if digits.len() % 2 == 1 {
        digits.insert(0, '0');
    }

    let mut start = 0;
    while digits.len() - start > 2 && &digits[start..start + 2] == "00" {
        start += 2;
    }
    digits.split_off(start)
}

/// Convert ASN.1 time to chrono DateTime
pub(crate) fn asn1_time_to_chrono(asn1_time: &ASN1Time) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(asn1_time.timestamp(), 0).single()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
