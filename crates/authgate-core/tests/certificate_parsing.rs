//! Certificate pipeline against real X.509 certificates
//!
//! These tests mint certificates with rcgen and check that:
//! - CN, serial and validity are extracted from DER and PEM
//! - serial normalisation agrees with serial-list CRL entries
//! - the validator applies expiry, allowlist, staleness and revocation in order

use authgate_core::cert::{CertificateError, CertificateRecord, CertificateValidator, CnAllowlist};
use authgate_core::event::{EventType, Reason, RecordingSink};
use authgate_core::revocation::{CrlInfo, CrlSnapshot};
use chrono::{Duration, TimeZone, Utc};
use rcgen::{CertificateParams, DnType, KeyPair, SerialNumber};

/// Mint a self-signed certificate valid from 2020 to 2040
fn mint(common_name: &str, serial: &[u8]) -> rcgen::Certificate {
    mint_with_validity(common_name, serial, (2020, 1, 1), (2040, 1, 1))
}

fn mint_with_validity(
    common_name: &str,
    serial: &[u8],
    not_before: (i32, u8, u8),
    not_after: (i32, u8, u8),
) -> rcgen::Certificate {
    let mut params = CertificateParams::new(vec![format!("{}.desk.internal", common_name)])
        .expect("Failed to create certificate params");
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.serial_number = Some(SerialNumber::from_slice(serial));
    params.not_before = rcgen::date_time_ymd(not_before.0, not_before.1, not_before.2);
    params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);

    let key = KeyPair::generate().expect("Failed to generate key pair");
    params.self_signed(&key).expect("Failed to self-sign certificate")
}

fn validator(sink: std::sync::Arc<RecordingSink>) -> CertificateValidator {
    CertificateValidator::new(
        CnAllowlist::parse(["trader-01", "trader-02"]).unwrap(),
        Duration::hours(24),
        sink,
    )
}

#[test]
fn test_record_from_der() {
    let cert = mint("trader-01", &[0x0a, 0x1b, 0x2c]);
    let record = CertificateRecord::from_der(cert.der()).unwrap();

    assert_eq!(record.common_name, "trader-01");
    assert_eq!(record.serial_number, "0A1B2C");
    assert_eq!(record.not_before, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(record.not_after, Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap());
}

#[test]
fn test_record_from_pem_matches_der() {
    let cert = mint("trader-02", &[0x42]);
    let from_pem = CertificateRecord::from_pem(cert.pem().as_bytes()).unwrap();
    let from_der = CertificateRecord::from_der(cert.der()).unwrap();

    assert_eq!(from_pem, from_der);
}

#[test]
fn test_certificate_pem_is_not_a_crl() {
    let cert = mint("trader-02", &[0x42]);
    assert!(CrlInfo::parse_pem(cert.pem().as_bytes()).is_err());
}

#[test]
fn test_valid_certificate_passes() {
    let sink = RecordingSink::new();
    let now = Utc::now();
    let cert = mint("trader-01", &[0x10, 0x01]);
    let crl = CrlSnapshot::from_serials(["0A1B2C"], now - Duration::minutes(10));

    let record = validator(sink.clone()).validate_der(cert.der(), &crl, now).unwrap();
    assert_eq!(record.serial_number, "1001");

    let events = sink.of_type(EventType::CertificateValidation);
    assert_eq!(events.len(), 1);
    assert!(events[0].is_success());
    assert!(events[0].cert_days_to_expiry.unwrap() > 0);
}

#[test]
fn test_revoked_by_serial_list() {
    let sink = RecordingSink::new();
    let now = Utc::now();
    let cert = mint("trader-01", &[0x0a, 0x1b, 0x2c]);
    let crl_info = CrlInfo::parse(b"# compromised laptop\n0a:1b:2c\n").unwrap();
    let crl = CrlSnapshot::from_crl(crl_info, now - Duration::minutes(10));

    let result = validator(sink.clone()).validate_der(cert.der(), &crl, now);
    assert_eq!(result, Err(CertificateError::Revoked));
    assert_eq!(sink.events()[0].reason, Some(Reason::Revoked));
}

#[test]
fn test_expired_certificate_checked_before_allowlist() {
    let sink = RecordingSink::new();
    let now = Utc::now();
    let cert = mint_with_validity("stranger", &[0x01], (2019, 1, 1), (2020, 1, 1));
    let crl = CrlSnapshot::from_serials(["01"], now);

    let result = validator(sink).validate_der(cert.der(), &crl, now);
    assert_eq!(result, Err(CertificateError::Expired));
}

#[test]
fn test_unlisted_common_name() {
    let sink = RecordingSink::new();
    let now = Utc::now();
    let cert = mint("TRADER-01", &[0x01]);
    let crl = CrlSnapshot::from_serials(Vec::<String>::new(), now);

    let result = validator(sink).validate_der(cert.der(), &crl, now);
    assert_eq!(result, Err(CertificateError::CnNotAllowed));
}

#[test]
fn test_stale_crl_rejects_unrevoked_certificate() {
    let sink = RecordingSink::new();
    let now = Utc::now();
    let cert = mint("trader-01", &[0x01]);
    let crl =
        CrlSnapshot::from_serials(Vec::<String>::new(), now - Duration::hours(25)).marked_stale();

    let result = validator(sink.clone()).validate_der(cert.der(), &crl, now);
    assert!(matches!(result, Err(CertificateError::CrlError(_))));

    let event = &sink.events()[0];
    assert_eq!(event.reason, Some(Reason::CrlError));
    assert_eq!(event.crl_age_secs, Some(25 * 3600));
}
