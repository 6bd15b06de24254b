use cms::{
    cert::CertificateChoices,
    content_info::ContentInfo,
    signed_data::{SignedData, SignerIdentifier, SignerInfo},
};
use der::{
    Decode, Encode, Sequence,
    asn1::{ObjectIdentifier, OctetString, PrintableString},
};
use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    pkey::{PKey, Public},
    rsa::Padding,
    sign::{RsaPssSaltlen, Verifier},
    x509::X509,
};
use thiserror::Error;
use tracing::debug;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::asn1::{
    TlvError,
    oid::{
        ANSI_X962_ARC, DigestAlgorithm, ECDSA_PLAIN_PREFIX, ID_CE_SUBJECT_KEY_IDENTIFIER,
        ID_CONTENT_TYPE, ID_MESSAGE_DIGEST, ID_SIGNED_DATA, PKCS1_ARC, RSA_PSS_OID,
    },
    read_tlv,
};

/// Application tag of the EF.SOD document wrapper.
pub const DOCUMENT_WRAPPER_TAG: u8 = 0x77;

#[derive(Debug, Error)]
pub enum CmsError {
    #[error("Malformed CMS structure: {0}")]
    Malformed(#[from] der::Error),

    #[error(transparent)]
    Tlv(#[from] TlvError),

    #[error("Expected SignedData content, found {0}")]
    NotSignedData(ObjectIdentifier),

    #[error("Unexpected encapsulated content type {0}")]
    UnexpectedContentType(ObjectIdentifier),

    #[error("Missing encapsulated content")]
    MissingContent,

    #[error("No signer information in SignedData")]
    NoSignerInfo,

    #[error("Signer certificate not found in SignedData")]
    SignerNotFound,

    #[error("Unsupported digest algorithm {0}")]
    UnsupportedDigest(ObjectIdentifier),

    #[error("Unsupported signature algorithm {0}")]
    UnsupportedSignatureAlgorithm(ObjectIdentifier),

    #[error("Missing required signed attribute {0}")]
    MissingAttribute(&'static str),

    #[error("messageDigest attribute does not match the content digest")]
    DigestMismatch,

    #[error("contentType attribute does not match eContentType")]
    ContentTypeMismatch,

    #[error("Malformed signature value")]
    MalformedSignature,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

/// Strips the `0x77` document wrapper when present. A bare `ContentInfo` is returned as is.
pub fn unwrap_document_wrapper(data: &[u8]) -> Result<&[u8], CmsError> {
    let (tlv, _) = read_tlv(data)?;
    match tlv.tag {
        DOCUMENT_WRAPPER_TAG => Ok(tlv.value),
        0x30 => Ok(tlv.raw),
        found => Err(TlvError::UnexpectedTag {
            expected: DOCUMENT_WRAPPER_TAG,
            found,
        }
        .into()),
    }
}

/// The pieces of a CMS SignedData structure that signature checks need.
#[derive(Debug, Clone)]
pub struct SignedDataParts {
    pub econtent_type: ObjectIdentifier,
    /// Encapsulated content octets, without the OCTET STRING header
    pub econtent: Option<Vec<u8>>,
    pub certificates: Vec<x509_cert::Certificate>,
    pub signer_infos: Vec<SignerInfo>,
}

impl SignedDataParts {
    /// Parses a DER `ContentInfo` that must carry `id-signedData`.
    pub fn parse(data: &[u8]) -> Result<Self, CmsError> {
        let content_info = ContentInfo::from_der(data)?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(CmsError::NotSignedData(content_info.content_type));
        }
        let signed_data = SignedData::from_der(&content_info.content.to_der()?)?;

        let econtent = signed_data
            .encap_content_info
            .econtent
            .as_ref()
            .map(|any| any.decode_as::<OctetString>())
            .transpose()?
            .map(|octets| octets.as_bytes().to_vec());

        let certificates: Vec<x509_cert::Certificate> = signed_data
            .certificates
            .as_ref()
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|choice| match choice {
                        CertificateChoices::Certificate(cert) => Some(cert.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let signer_infos: Vec<SignerInfo> = signed_data.signer_infos.0.iter().cloned().collect();

        debug!(
            "Parsed SignedData: eContentType {}, {} certificate(s), {} signer(s)",
            signed_data.encap_content_info.econtent_type,
            certificates.len(),
            signer_infos.len()
        );

        Ok(Self {
            econtent_type: signed_data.encap_content_info.econtent_type,
            econtent,
            certificates,
            signer_infos,
        })
    }

    /// Fails unless the encapsulated content type is `expected`.
    pub fn expect_content_type(&self, expected: ObjectIdentifier) -> Result<(), CmsError> {
        if self.econtent_type != expected {
            return Err(CmsError::UnexpectedContentType(self.econtent_type));
        }
        Ok(())
    }

    pub fn content(&self) -> Result<&[u8], CmsError> {
        self.econtent.as_deref().ok_or(CmsError::MissingContent)
    }

    /// Returns the first signer for which a certificate is carried in the `certificates` field.
    pub fn find_signer(&self) -> Result<(&x509_cert::Certificate, &SignerInfo), CmsError> {
        if self.signer_infos.is_empty() {
            return Err(CmsError::NoSignerInfo);
        }
        self.signer_infos
            .iter()
            .find_map(|info| {
                self.certificates
                    .iter()
                    .find(|cert| signer_matches(info, cert))
                    .map(|cert| (cert, info))
            })
            .ok_or(CmsError::SignerNotFound)
    }

    /// Whether `cert` is named by any SignerInfo.
    pub fn is_signer_certificate(&self, cert: &x509_cert::Certificate) -> bool {
        self.signer_infos
            .iter()
            .any(|info| signer_matches(info, cert))
    }
}

/// Matches a SignerInfo against a certificate by issuer and serial number or by
/// subject key identifier.
fn signer_matches(info: &SignerInfo, cert: &x509_cert::Certificate) -> bool {
    match &info.sid {
        SignerIdentifier::IssuerAndSerialNumber(issuer_and_serial) => {
            issuer_and_serial.issuer == cert.tbs_certificate.issuer
                && issuer_and_serial.serial_number == cert.tbs_certificate.serial_number
        }
        SignerIdentifier::SubjectKeyIdentifier(ski) => cert
            .tbs_certificate
            .extensions
            .as_ref()
            .and_then(|exts| {
                exts.iter()
                    .find(|ext| ext.extn_id == ID_CE_SUBJECT_KEY_IDENTIFIER)
            })
            .and_then(|ext| OctetString::from_der(ext.extn_value.as_bytes()).ok())
            .is_some_and(|value| value.as_bytes() == ski.0.as_bytes()),
    }
}

/// Verifies the SignerInfo signature with the public key of `signer_der`.
///
/// With signed attributes present, `messageDigest` must equal the digest of the
/// encapsulated content and `contentType` must equal `eContentType`; the signature then
/// covers the DER encoding of the attribute SET. Without them it covers the content.
pub fn verify_signature(
    parts: &SignedDataParts,
    signer_info: &SignerInfo,
    signer_der: &[u8],
) -> Result<(), CmsError> {
    let digest_alg = DigestAlgorithm::from_oid(&signer_info.digest_alg.oid)
        .ok_or(CmsError::UnsupportedDigest(signer_info.digest_alg.oid))?;
    let content = parts.content()?;

    let signed_input = match &signer_info.signed_attrs {
        Some(attrs) => {
            let content_digest = digest_alg.digest(content)?;
            check_signed_attributes(attrs, &content_digest, parts.econtent_type)?;
            attrs.to_der()?
        }
        None => content.to_vec(),
    };

    let public_key = X509::from_der(signer_der)?.public_key()?;
    let valid = verify_raw(
        &public_key,
        &signer_info.signature_algorithm,
        digest_alg,
        &signed_input,
        signer_info.signature.as_bytes(),
    )?;
    if !valid {
        return Err(CmsError::BadSignature);
    }
    debug!("CMS signature verified ({digest_alg:?})");
    Ok(())
}

fn check_signed_attributes(
    attrs: &cms::signed_data::SignedAttributes,
    expected_digest: &[u8],
    econtent_type: ObjectIdentifier,
) -> Result<(), CmsError> {
    let mut found_content_type = false;
    let mut found_message_digest = false;

    for attr in attrs.iter() {
        let Some(value) = attr.values.iter().next() else {
            continue;
        };
        if attr.oid == ID_CONTENT_TYPE {
            let content_type: ObjectIdentifier = value.decode_as()?;
            if content_type != econtent_type {
                return Err(CmsError::ContentTypeMismatch);
            }
            found_content_type = true;
        } else if attr.oid == ID_MESSAGE_DIGEST {
            let digest: OctetString = value.decode_as()?;
            if digest.as_bytes() != expected_digest {
                return Err(CmsError::DigestMismatch);
            }
            found_message_digest = true;
        }
    }

    if !found_content_type {
        return Err(CmsError::MissingAttribute("contentType"));
    }
    if !found_message_digest {
        return Err(CmsError::MissingAttribute("messageDigest"));
    }
    Ok(())
}

fn verify_raw(
    public_key: &PKey<Public>,
    signature_algorithm: &AlgorithmIdentifierOwned,
    digest_alg: DigestAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, CmsError> {
    let md = digest_alg.message_digest();
    let oid = signature_algorithm.oid;
    let oid_text = oid.to_string();

    if oid_text.starts_with(ECDSA_PLAIN_PREFIX) {
        let der_signature = plain_to_der_signature(signature)?;
        let mut verifier = Verifier::new(md, public_key)?;
        verifier.update(data)?;
        return Ok(verifier.verify(&der_signature).unwrap_or(false));
    }

    let mut verifier = Verifier::new(md, public_key)?;
    if oid == RSA_PSS_OID {
        verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
        verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
        verifier.set_rsa_mgf1_md(md)?;
    } else if !oid_text.starts_with(PKCS1_ARC) && !oid_text.starts_with(ANSI_X962_ARC) {
        return Err(CmsError::UnsupportedSignatureAlgorithm(oid));
    }
    verifier.update(data)?;
    // OpenSSL reports a structurally broken signature as an error; treat it as a mismatch.
    Ok(verifier.verify(signature).unwrap_or(false))
}

/// Converts a TR-03111 plain `r || s` ECDSA signature into DER `ECDSA-Sig-Value`.
fn plain_to_der_signature(signature: &[u8]) -> Result<Vec<u8>, CmsError> {
    if signature.is_empty() || signature.len() % 2 != 0 {
        return Err(CmsError::MalformedSignature);
    }
    let (r, s) = signature.split_at(signature.len() / 2);
    let sig = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
    Ok(sig.to_der()?)
}

/// ICAO 9303-10 `LDSSecurityObject`, the content signed inside EF.SOD.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct LdsSecurityObject {
    pub version: u8,
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub data_group_hash_values: Vec<DataGroupHash>,
    #[asn1(optional = "true")]
    pub lds_version_info: Option<LdsVersionInfo>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct DataGroupHash {
    pub data_group_number: u8,
    pub data_group_hash_value: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct LdsVersionInfo {
    pub lds_version: PrintableString,
    pub unicode_version: PrintableString,
}

impl LdsSecurityObject {
    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm, CmsError> {
        DigestAlgorithm::from_oid(&self.hash_algorithm.oid)
            .ok_or(CmsError::UnsupportedDigest(self.hash_algorithm.oid))
    }
}
