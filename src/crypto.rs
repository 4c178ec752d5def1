//! Certificate key, CSR and X.509 helpers.

use crate::api::jws::KeyType;
use crate::error::Error;
use pem::{EncodeConfig, LineEnding, Pem};
use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair, SanType,
    PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

/// `id-pe-tlsfeature`, carrying the OCSP Must-Staple request.
const OCSP_MUST_STAPLE_OID: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 24];
/// `SEQUENCE { INTEGER 5 }`: the `status_request` TLS feature.
const OCSP_MUST_STAPLE_VALUE: &[u8] = &[0x30, 0x03, 0x02, 0x01, 0x05];
/// `ub-common-name` from RFC 5280.
const MAX_COMMON_NAME_LEN: usize = 64;

/// The facts about a leaf certificate renewal and revocation care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// The common name first, then every DNS SAN, without duplicates.
    pub domains: Vec<String>,
    pub is_ca: bool,
    /// `notAfter` as a Unix timestamp.
    pub not_after: i64,
}

/// PEM encode with `\n` line endings.
#[must_use]
pub fn encode_pem(block: &Pem) -> String {
    pem::encode_config(block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

/// Generate a private key for a new certificate.
///
/// # Errors
///
/// Returns [`Error::Rcgen`] if key generation fails.
pub fn generate_private_key(key_type: KeyType) -> Result<KeyPair, Error> {
    let alg = match key_type {
        KeyType::EC256 => &PKCS_ECDSA_P256_SHA256,
        KeyType::EC384 => &PKCS_ECDSA_P384_SHA384,
    };
    Ok(KeyPair::generate_for(alg)?)
}

/// Parse a PEM private key for use in a CSR.
///
/// # Errors
///
/// Returns [`Error::Rcgen`] if the key can't be parsed.
pub fn parse_private_key(pem: &str) -> Result<KeyPair, Error> {
    Ok(KeyPair::from_pem(pem)?)
}

/// Build a DER encoded CSR for `domains`, the first one being used as the common name unless
/// it is too long for one.
///
/// # Errors
///
/// Returns [`Error::NoDomains`] for an empty list, [`Error::Rcgen`] for names that aren't valid
/// DNS names or a failed signature.
pub fn generate_csr(
    key: &KeyPair,
    domains: &[String],
    must_staple: bool,
) -> Result<Vec<u8>, Error> {
    let first = domains.first().ok_or(Error::NoDomains)?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    if first.len() <= MAX_COMMON_NAME_LEN {
        dn.push(DnType::CommonName, first.clone());
    }
    params.distinguished_name = dn;
    params.subject_alt_names = domains
        .iter()
        .map(|d| Ok(SanType::DnsName(d.clone().try_into()?)))
        .collect::<Result<_, rcgen::Error>>()?;
    if must_staple {
        params.custom_extensions.push(CustomExtension::from_oid_content(
            OCSP_MUST_STAPLE_OID,
            OCSP_MUST_STAPLE_VALUE.to_vec(),
        ));
    }

    let csr = params.serialize_request(key)?;
    Ok(csr.der().to_vec())
}

/// DER contents of the first PEM block in `data`.
///
/// # Errors
///
/// Returns [`Error::Pem`] if `data` holds no PEM block.
pub fn pem_to_der(data: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(pem::parse(data)?.into_contents())
}

/// The domains a CSR asks for: the common name first, then every DNS SAN, without duplicates.
///
/// # Errors
///
/// Returns [`Error::Certificate`] if `der` isn't a CSR.
pub fn domains_from_csr(der: &[u8]) -> Result<Vec<String>, Error> {
    let (_, csr) = X509CertificationRequest::from_der(der)
        .map_err(|e| Error::Certificate(format!("invalid CSR: {e}")))?;

    let mut domains = Vec::new();
    if let Some(cn) = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
    {
        domains.push(cn.to_string());
    }
    if let Some(extensions) = csr.requested_extensions() {
        for ext in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = ext {
                push_dns_names(&mut domains, &san.general_names);
            }
        }
    }
    Ok(domains)
}

/// The domains a certificate covers: the common name first, then every DNS SAN, without
/// duplicates.
///
/// # Errors
///
/// Returns [`Error::Certificate`] if `der` isn't an X.509 certificate.
pub fn domains_from_certificate(der: &[u8]) -> Result<Vec<String>, Error> {
    Ok(certificate_info(der)?.domains)
}

/// Parse the DER encoded certificate `der`.
///
/// # Errors
///
/// Returns [`Error::Certificate`] if `der` isn't an X.509 certificate.
pub fn certificate_info(der: &[u8]) -> Result<CertificateInfo, Error> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::Certificate(format!("invalid certificate: {e}")))?;

    let mut domains = Vec::new();
    if let Some(cn) = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
    {
        domains.push(cn.to_string());
    }
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        push_dns_names(&mut domains, &san.value.general_names);
    }
    Ok(CertificateInfo {
        domains,
        is_ca: cert.is_ca(),
        not_after: cert.validity().not_after.timestamp(),
    })
}

fn push_dns_names(domains: &mut Vec<String>, names: &[GeneralName<'_>]) {
    for name in names {
        if let GeneralName::DNSName(dns) = name {
            if !domains.iter().any(|d| d == dns) {
                domains.push((*dns).to_string());
            }
        }
    }
}
