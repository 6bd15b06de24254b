#![allow(dead_code)]

use std::collections::BTreeMap;

use der::{Encode, asn1::ObjectIdentifier};
use openssl::{hash::MessageDigest, pkey::PKey, sign::Signer};
use pkd_engine::{
    asn1::{
        encode_tlv,
        oid::{
            ECDSA_WITH_SHA256_OID, ID_CSCA_MASTER_LIST, ID_LDS_SECURITY_OBJECT, ID_SIGNED_DATA,
            SHA256_OID,
        },
    },
    pki::cms::{DOCUMENT_WRAPPER_TAG, DataGroupHash, LdsSecurityObject},
};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason,
    RevokedCertParams, SerialNumber,
};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use x509_cert::spki::AlgorithmIdentifierOwned;

/// A CSCA able to sign certificates and CRLs.
pub struct Authority {
    pub issuer: Issuer<'static, KeyPair>,
    pub der: Vec<u8>,
}

/// An end-entity certificate with its private key.
pub struct Holder {
    pub key: KeyPair,
    pub der: Vec<u8>,
}

fn name(common_name: &str, country: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, country);
    dn.push(DnType::OrganizationName, "Test Authority");
    dn.push(DnType::CommonName, common_name);
    dn
}

fn ca_params(common_name: &str, country: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(common_name, country);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

pub fn csca(common_name: &str, country: &str) -> Authority {
    let params = ca_params(common_name, country);
    let key = KeyPair::generate().unwrap();
    let der = params.self_signed(&key).unwrap().der().to_vec();
    Authority {
        issuer: Issuer::new(params, key),
        der,
    }
}

pub fn expired_csca(common_name: &str, country: &str) -> Authority {
    let mut params = ca_params(common_name, country);
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(3650);
    params.not_after = now - Duration::days(1);
    let key = KeyPair::generate().unwrap();
    let der = params.self_signed(&key).unwrap().der().to_vec();
    Authority {
        issuer: Issuer::new(params, key),
        der,
    }
}

fn dsc_params(common_name: &str, country: &str, serial: &[u8]) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(common_name, country);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.serial_number = Some(SerialNumber::from_slice(serial));
    params
}

pub fn dsc(authority: &Authority, common_name: &str, serial: &[u8]) -> Holder {
    let params = dsc_params(common_name, "DE", serial);
    let key = KeyPair::generate().unwrap();
    let der = params.signed_by(&key, &authority.issuer).unwrap().der().to_vec();
    Holder { key, der }
}

pub fn expired_dsc(authority: &Authority, common_name: &str, serial: &[u8]) -> Holder {
    let mut params = dsc_params(common_name, "DE", serial);
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(730);
    params.not_after = now - Duration::days(1);
    let key = KeyPair::generate().unwrap();
    let der = params.signed_by(&key, &authority.issuer).unwrap().der().to_vec();
    Holder { key, der }
}

/// CRL valid from yesterday for `next_update_in`, revoking `revoked` serials.
pub fn crl(
    authority: &Authority,
    crl_number: u64,
    revoked: &[&[u8]],
    next_update_in: Duration,
) -> Vec<u8> {
    let now = OffsetDateTime::now_utc();
    let params = CertificateRevocationListParams {
        this_update: now - Duration::days(2),
        next_update: now + next_update_in,
        crl_number: SerialNumber::from(crl_number),
        issuing_distribution_point: None,
        revoked_certs: revoked
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from_slice(serial),
                revocation_time: now - Duration::days(1),
                reason_code: Some(RevocationReason::KeyCompromise),
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params.signed_by(&authority.issuer).unwrap().der().to_vec()
}

fn oid(oid: ObjectIdentifier) -> Vec<u8> {
    oid.to_der().unwrap()
}

fn algorithm(id: ObjectIdentifier) -> Vec<u8> {
    encode_tlv(0x30, &oid(id))
}

/// DER SET OF: elements in ascending order of their encodings.
fn set_of(mut elements: Vec<Vec<u8>>) -> Vec<u8> {
    elements.sort();
    encode_tlv(0x31, &elements.concat())
}

/// ContentInfo with SignedData over `content`, signed by `signer` without signed attributes.
pub fn signed_data(
    econtent_type: ObjectIdentifier,
    content: &[u8],
    signer: &Holder,
    extra_certificates: &[Vec<u8>],
) -> Vec<u8> {
    use der::Decode;

    let signer_cert = x509_cert::Certificate::from_der(&signer.der).unwrap();
    let issuer_and_serial = encode_tlv(
        0x30,
        &[
            signer_cert.tbs_certificate.issuer.to_der().unwrap(),
            signer_cert.tbs_certificate.serial_number.to_der().unwrap(),
        ]
        .concat(),
    );

    let pkey = PKey::private_key_from_pkcs8(&signer.key.serialize_der()).unwrap();
    let mut openssl_signer = Signer::new(MessageDigest::sha256(), &pkey).unwrap();
    openssl_signer.update(content).unwrap();
    let signature = openssl_signer.sign_to_vec().unwrap();

    let signer_info = encode_tlv(
        0x30,
        &[
            encode_tlv(0x02, &[0x01]),
            issuer_and_serial,
            algorithm(SHA256_OID),
            algorithm(ECDSA_WITH_SHA256_OID),
            encode_tlv(0x04, &signature),
        ]
        .concat(),
    );

    let encap_content_info = encode_tlv(
        0x30,
        &[
            oid(econtent_type),
            encode_tlv(0xA0, &encode_tlv(0x04, content)),
        ]
        .concat(),
    );

    let mut certificates = vec![signer.der.clone()];
    certificates.extend(extra_certificates.iter().cloned());
    certificates.sort();

    let signed_data = encode_tlv(
        0x30,
        &[
            encode_tlv(0x02, &[0x01]),
            set_of(vec![algorithm(SHA256_OID)]),
            encap_content_info,
            encode_tlv(0xA0, &certificates.concat()),
            set_of(vec![signer_info]),
        ]
        .concat(),
    );

    encode_tlv(
        0x30,
        &[oid(ID_SIGNED_DATA), encode_tlv(0xA0, &signed_data)].concat(),
    )
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// EF.SOD declaring SHA-256 hashes of `data_groups`.
pub fn sod(signer: &Holder, data_groups: &BTreeMap<u8, Vec<u8>>) -> Vec<u8> {
    let lds = LdsSecurityObject {
        version: 0,
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: SHA256_OID,
            parameters: None,
        },
        data_group_hash_values: data_groups
            .iter()
            .map(|(number, content)| DataGroupHash {
                data_group_number: *number,
                data_group_hash_value: der::asn1::OctetString::new(sha256(content)).unwrap(),
            })
            .collect(),
        lds_version_info: None,
    };
    let content_info = signed_data(ID_LDS_SECURITY_OBJECT, &lds.to_der().unwrap(), signer, &[]);
    encode_tlv(DOCUMENT_WRAPPER_TAG, &content_info)
}

/// CMS CSCA Master List listing `cscas`, signed by `signer`.
pub fn master_list(signer: &Holder, cscas: &[Vec<u8>], extra_certificates: &[Vec<u8>]) -> Vec<u8> {
    let content = encode_tlv(
        0x30,
        &[encode_tlv(0x02, &[0x00]), set_of(cscas.to_vec())].concat(),
    );
    signed_data(ID_CSCA_MASTER_LIST, &content, signer, extra_certificates)
}

pub fn data_groups() -> BTreeMap<u8, Vec<u8>> {
    BTreeMap::from([
        (1, b"P<DEUMUSTERMANN<<ERIKA<<<<<<<<<<<<<<<<<<<<<".to_vec()),
        (2, vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
    ])
}
