//! Binary decoder: raw DER/CMS bytes into typed certificate, CRL and master list records.
//!
//! Malformed input never panics and never aborts the caller; every failure is a
//! [`DecodeError`] the batch records against the offending input.

use chrono::{DateTime, Utc};
use der::Encode;
use thiserror::Error;
use tracing::{debug, warn};
use x509_parser::{
    certificate::X509Certificate,
    nom,
    parse_x509_certificate, parse_x509_crl,
    prelude::{ASN1Time, X509Error},
};

use crate::asn1::{TlvError, oid::ID_CSCA_MASTER_LIST, read_tlv};
use crate::domain::{
    CaConstraints, Certificate, CertificateKind, CertificateParts, CrlNumber, DistinguishedName,
    Fingerprint, MasterList, MasterListParts, RecordError, RevocationList, RevocationListParts,
    RevocationReason, RevokedEntry, SerialNumber,
};
use crate::pki::cms::{self, CmsError, SignedDataParts};

/// DER tag of a SEQUENCE, the outer element of every structure decoded here.
const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;
const SET_TAG: u8 = 0x31;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("Unsupported structure: {0}")]
    UnsupportedStructure(String),

    #[error("Truncated data: {0}")]
    TruncatedData(String),

    #[error("Invalid field value: {0}")]
    InvalidValue(#[from] RecordError),
}

impl From<TlvError> for DecodeError {
    fn from(err: TlvError) -> Self {
        match err {
            TlvError::Truncated { .. } => Self::TruncatedData(err.to_string()),
            TlvError::UnexpectedTag { .. } => Self::UnsupportedStructure(err.to_string()),
            TlvError::IndefiniteLength | TlvError::LengthTooLong(_) => {
                Self::MalformedEncoding(err.to_string())
            }
        }
    }
}

impl From<nom::Err<X509Error>> for DecodeError {
    fn from(err: nom::Err<X509Error>) -> Self {
        match err {
            nom::Err::Incomplete(needed) => Self::TruncatedData(format!("{needed:?}")),
            nom::Err::Error(e) | nom::Err::Failure(e) => Self::MalformedEncoding(e.to_string()),
        }
    }
}

impl From<CmsError> for DecodeError {
    fn from(err: CmsError) -> Self {
        match err {
            CmsError::Tlv(e) => e.into(),
            CmsError::Malformed(e) if matches!(e.kind(), der::ErrorKind::Incomplete { .. }) => {
                Self::TruncatedData(e.to_string())
            }
            CmsError::Malformed(e) => Self::MalformedEncoding(e.to_string()),
            other => Self::UnsupportedStructure(other.to_string()),
        }
    }
}

/// Checks the outer SEQUENCE header before handing the bytes to a full parser, so
/// that a cut-off download reports `TruncatedData` rather than a generic parse error.
fn precheck_sequence(data: &[u8]) -> Result<(), DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::TruncatedData("empty input".to_string()));
    }
    let (tlv, _) = read_tlv(data)?;
    tlv.expect_tag(SEQUENCE_TAG)?;
    Ok(())
}

pub(crate) fn to_utc(time: ASN1Time) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| DecodeError::MalformedEncoding(format!("time out of range: {time}")))
}

/// Decodes a DER X.509 certificate.
///
/// The fingerprint covers exactly the certificate's own encoding; trailing bytes after
/// it are ignored.
pub fn decode_certificate(data: &[u8]) -> Result<Certificate, DecodeError> {
    precheck_sequence(data)?;
    let (rest, cert) = parse_x509_certificate(data)?;
    if !rest.is_empty() {
        debug!("Ignoring {} trailing byte(s) after certificate", rest.len());
    }
    let der = &data[..data.len() - rest.len()];
    certificate_from_parsed(der, &cert)
}

fn certificate_from_parsed(
    der: &[u8],
    cert: &X509Certificate<'_>,
) -> Result<Certificate, DecodeError> {
    let validity = cert.validity();
    let constraints = extract_constraints(cert);
    let subject = DistinguishedName::from_x509_name(cert.subject());
    let issuer = DistinguishedName::from_x509_name(cert.issuer());

    let kind = if subject.matches(&issuer) || constraints.basic_ca == Some(true) {
        CertificateKind::Csca
    } else {
        CertificateKind::Dsc
    };

    let certificate = Certificate::new(CertificateParts {
        der: der.to_vec(),
        serial_number: SerialNumber::from_be_bytes(cert.raw_serial()),
        subject,
        issuer,
        not_before: to_utc(validity.not_before)?,
        not_after: to_utc(validity.not_after)?,
        kind,
        constraints,
    })?;

    debug!(
        "Decoded {} certificate {} (serial {})",
        certificate.kind().as_str(),
        certificate.subject(),
        certificate.serial_number()
    );
    Ok(certificate)
}

fn extract_constraints(cert: &X509Certificate<'_>) -> CaConstraints {
    let basic_ca = match cert.basic_constraints() {
        Ok(ext) => ext.map(|bc| bc.value.ca),
        Err(e) => {
            warn!("Unreadable BasicConstraints extension: {e}");
            None
        }
    };
    let (key_cert_sign, crl_sign) = match cert.key_usage() {
        Ok(Some(ku)) => (Some(ku.value.key_cert_sign()), Some(ku.value.crl_sign())),
        Ok(None) => (None, None),
        Err(e) => {
            warn!("Unreadable KeyUsage extension: {e}");
            (None, None)
        }
    };
    CaConstraints {
        basic_ca,
        key_cert_sign,
        crl_sign,
    }
}

/// Decodes a DER CRL, keeping every revoked entry with its date and reason code.
pub fn decode_crl(data: &[u8]) -> Result<RevocationList, DecodeError> {
    precheck_sequence(data)?;
    let (rest, crl) = parse_x509_crl(data)?;
    if !rest.is_empty() {
        debug!("Ignoring {} trailing byte(s) after CRL", rest.len());
    }
    let der = &data[..data.len() - rest.len()];

    let revoked = crl
        .iter_revoked_certificates()
        .map(|entry| {
            Ok(RevokedEntry {
                serial_number: SerialNumber::from_be_bytes(entry.raw_serial()),
                revocation_date: to_utc(entry.revocation_date)?,
                reason: entry
                    .reason_code()
                    .and_then(|(_, code)| RevocationReason::from_u8(code.0)),
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    let list = RevocationList::new(RevocationListParts {
        der: der.to_vec(),
        issuer: DistinguishedName::from_x509_name(crl.issuer()),
        crl_number: crl.crl_number().map(|n| CrlNumber::from_be_bytes(&n.to_bytes_be())),
        this_update: to_utc(crl.last_update())?,
        next_update: crl.next_update().map(to_utc).transpose()?,
        revoked,
    })?;

    debug!(
        "Decoded CRL from {} with {} revoked entries",
        list.issuer(),
        list.revoked_count()
    );
    Ok(list)
}

/// Decodes a CMS signed CSCA Master List.
///
/// Certificates are collected from the signed `CscaMasterList` content and from the
/// SignedData `certificates` field. Signer certificates are excluded and duplicates are
/// merged by fingerprint. The CMS signature is checked against the signer certificate;
/// a failed check is recorded on the list rather than rejecting it.
pub fn decode_master_list(data: &[u8]) -> Result<MasterList, DecodeError> {
    precheck_sequence(data)?;
    let parts = SignedDataParts::parse(data)?;
    parts.expect_content_type(ID_CSCA_MASTER_LIST)?;

    let (version, listed) = parse_csca_master_list(parts.content()?)?;

    let mut signer_fingerprints = Vec::new();
    let mut carried = Vec::new();
    for cert in &parts.certificates {
        let der = cert
            .to_der()
            .map_err(|e| DecodeError::MalformedEncoding(e.to_string()))?;
        if parts.is_signer_certificate(cert) {
            signer_fingerprints.push(Fingerprint::of(&der));
        } else {
            carried.push(der);
        }
    }

    let mut csca_certificates: Vec<Certificate> = Vec::new();
    for der in listed.iter().map(Vec::as_slice).chain(carried.iter().map(Vec::as_slice)) {
        match decode_certificate(der) {
            Ok(cert) => {
                let fingerprint = cert.fingerprint();
                if signer_fingerprints.contains(&fingerprint)
                    || csca_certificates.iter().any(|c| c.fingerprint() == fingerprint)
                {
                    continue;
                }
                csca_certificates.push(cert.with_kind(CertificateKind::Csca));
            }
            Err(e) => warn!("Skipping undecodable certificate in master list: {e}"),
        }
    }

    let (signer_cert, signer_info) = parts.find_signer()?;
    let signer_der = signer_cert
        .to_der()
        .map_err(|e| DecodeError::MalformedEncoding(e.to_string()))?;
    let signer = decode_certificate(&signer_der)?;

    let signature_valid = match cms::verify_signature(&parts, signer_info, &signer_der) {
        Ok(()) => true,
        Err(e) => {
            warn!("Master list signature from {} did not verify: {e}", signer.subject());
            false
        }
    };

    let list = MasterList::new(MasterListParts {
        cms: data.to_vec(),
        version,
        signer: signer.subject().clone(),
        csca_certificates,
        signature_valid,
    });
    debug!(
        "Decoded master list v{} from {} with {} CSCA certificate(s)",
        list.version(),
        list.signer(),
        list.csca_count()
    );
    Ok(list)
}

/// `CscaMasterList ::= SEQUENCE { version INTEGER, certList SET OF Certificate }`
fn parse_csca_master_list(content: &[u8]) -> Result<(u32, Vec<Vec<u8>>), DecodeError> {
    let (outer, _) = read_tlv(content)?;
    let mut children = outer.expect_tag(SEQUENCE_TAG)?.children();

    let version_tlv = children
        .next()
        .ok_or_else(|| DecodeError::UnsupportedStructure("missing master list version".into()))??
        .expect_tag(INTEGER_TAG)?;
    if version_tlv.value.len() > 4 {
        return Err(DecodeError::UnsupportedStructure(
            "master list version out of range".into(),
        ));
    }
    let version = version_tlv
        .value
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));

    let cert_list = children
        .next()
        .ok_or_else(|| DecodeError::UnsupportedStructure("missing certificate list".into()))??
        .expect_tag(SET_TAG)?;

    let certificates = cert_list
        .children()
        .map(|tlv| tlv.map(|t| t.raw.to_vec()))
        .collect::<Result<Vec<_>, TlvError>>()?;

    Ok((version, certificates))
}
