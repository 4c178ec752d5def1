//! Certificate issuance, renewal and revocation.
//!
//! [`Certifier::obtain`] runs a whole certificate request:
//!
//! 1. create an order for the domains,
//! 2. fetch its authorizations ([`Certifier::fetch_authorizations`]),
//! 3. solve a challenge for each ([`SolverManager::solve`]),
//! 4. finalize the order with a CSR and download the certificate
//!    ([`Certifier::get_for_csr`]).
//!
//! Issuance is all-or-nothing: when any domain fails the request fails, with an
//! [`ObtainError`] naming every failed domain.

mod authorization;
mod finalize;

pub use authorization::OVERALL_REQUEST_LIMIT;
pub use finalize::{FINALIZE_POLL_INTERVAL, FINALIZE_TIMEOUT};

use crate::acme::Authorization;
use crate::api::jws::KeyType;
use crate::api::SharedCore;
use crate::challenge::targeted_domain;
use crate::crypto;
use crate::error::{Error, ObtainError};
use crate::resolver::SolverManager;
use pem::Pem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// An issued certificate and what it was issued from.
///
/// Only the URLs and the domain are serialized; keys and certificates are stored separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::module_name_repetitions)]
pub struct CertificateResource {
    pub domain: String,
    #[serde(rename = "certUrl")]
    pub cert_url: String,
    #[serde(rename = "certStableUrl")]
    pub cert_stable_url: String,
    /// PEM private key, when this client generated or was given one.
    #[serde(skip)]
    pub private_key: Option<Vec<u8>>,
    /// PEM leaf certificate, followed by the issuer chain when bundled.
    #[serde(skip)]
    pub certificate: Vec<u8>,
    #[serde(skip)]
    pub issuer_certificate: Vec<u8>,
    /// PEM CSR, when the certificate was requested with one.
    #[serde(skip)]
    pub csr: Option<Vec<u8>>,
}

/// A certificate request by domain list.
#[derive(Debug, Clone, Default)]
pub struct ObtainRequest {
    /// The first domain becomes the certificate's common name.
    pub domains: Vec<String>,
    pub bundle: bool,
    /// PEM private key to certify. A new key is generated when unset.
    pub private_key: Option<String>,
    pub must_staple: bool,
}

/// A certificate request for an existing CSR.
#[derive(Debug, Clone, Default)]
#[allow(clippy::upper_case_acronyms)]
pub struct ObtainForCSRRequest {
    /// DER encoded CSR.
    pub csr: Vec<u8>,
    pub bundle: bool,
}

/// Drives orders from creation to issued certificate.
#[derive(Debug)]
pub struct Certifier {
    core: SharedCore,
    solvers: Arc<SolverManager>,
    key_type: KeyType,
}

impl Certifier {
    /// `key_type` is used for the keys generated for certificates.
    #[must_use]
    pub fn new(core: SharedCore, solvers: Arc<SolverManager>, key_type: KeyType) -> Self {
        Certifier {
            core,
            solvers,
            key_type,
        }
    }

    /// Obtain a certificate for `req.domains`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDomains`] for an empty request, [`Error::Obtain`] naming each domain
    /// that failed authorization, validation or issuance.
    pub async fn obtain(&self, req: ObtainRequest) -> Result<CertificateResource, Error> {
        let domains = sanitize_domains(&req.domains);
        if domains.is_empty() {
            return Err(Error::NoDomains);
        }
        log_obtaining(&domains, req.bundle);

        let (order, authzs) = self.authorize(&domains).await?;

        let (private_key, key_pem) = match req.private_key {
            Some(pem) => (crypto::parse_private_key(&pem)?, pem),
            None => {
                let key = crypto::generate_private_key(self.key_type)?;
                let pem = key.serialize_pem();
                (key, pem)
            }
        };
        let csr = crypto::generate_csr(&private_key, &domains, req.must_staple)?;

        self.get_for_csr(&order, &csr, Some(key_pem.into_bytes()), req.bundle)
            .await
            .map_err(|err| attribute_to_all(&authzs, err))
    }

    /// Obtain a certificate for the domains of `req.csr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] for an unreadable CSR, [`Error::Obtain`] naming each domain
    /// that failed authorization, validation or issuance.
    pub async fn obtain_for_csr(
        &self,
        req: ObtainForCSRRequest,
    ) -> Result<CertificateResource, Error> {
        let domains = crypto::domains_from_csr(&req.csr)?;
        if domains.is_empty() {
            return Err(Error::NoDomains);
        }
        log_obtaining(&domains, req.bundle);

        let (order, authzs) = self.authorize(&domains).await?;

        let mut cert = self
            .get_for_csr(&order, &req.csr, None, req.bundle)
            .await
            .map_err(|err| attribute_to_all(&authzs, err))?;
        cert.csr = Some(crypto::encode_pem(&Pem::new("CERTIFICATE REQUEST", req.csr)).into_bytes());
        Ok(cert)
    }

    /// Obtain a fresh certificate to replace `cert`, from its CSR when it was requested with
    /// one, otherwise for the same domains and private key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] when `cert` doesn't start with a leaf certificate, and the
    /// errors of [`Certifier::obtain`].
    pub async fn renew(
        &self,
        cert: CertificateResource,
        bundle: bool,
        must_staple: bool,
    ) -> Result<CertificateResource, Error> {
        let info = crypto::certificate_info(&crypto::pem_to_der(&cert.certificate)?)?;
        if info.is_ca {
            return Err(Error::Certificate(format!(
                "[{}] Certificate bundle starts with a CA certificate",
                cert.domain
            )));
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        let hours_left = (info.not_after - now) / 3600;
        tracing::info!("[{}] acme: Trying renewal with {hours_left} hours remaining", cert.domain);

        if let Some(csr) = &cert.csr {
            return self
                .obtain_for_csr(ObtainForCSRRequest {
                    csr: crypto::pem_to_der(csr)?,
                    bundle,
                })
                .await;
        }

        let private_key = cert
            .private_key
            .map(|key| String::from_utf8(key).map_err(|e| Error::Certificate(e.to_string())))
            .transpose()?;
        self.obtain(ObtainRequest {
            domains: info.domains,
            bundle,
            private_key,
            must_staple,
        })
        .await
    }

    /// Revoke the PEM certificate `cert`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] when `cert` doesn't start with a leaf certificate,
    /// [`Error::Problem`] when the CA refuses the revocation.
    pub async fn revoke(&self, cert: &[u8]) -> Result<(), Error> {
        self.revoke_with_reason(cert, None).await
    }

    /// Revoke the PEM certificate `cert` giving an RFC 5280 `reason` code.
    ///
    /// # Errors
    ///
    /// See [`Certifier::revoke`].
    pub async fn revoke_with_reason(&self, cert: &[u8], reason: Option<u8>) -> Result<(), Error> {
        let der = crypto::pem_to_der(cert)?;
        if crypto::certificate_info(&der)?.is_ca {
            return Err(Error::Certificate(
                "certificate bundle starts with a CA certificate".to_string(),
            ));
        }
        self.core.revoke_certificate(&der, reason).await
    }

    /// Create an order and validate every authorization it needs. On failure the order's pending
    /// authorizations are deactivated.
    async fn authorize(
        &self,
        domains: &[String],
    ) -> Result<(crate::acme::OrderResource, Vec<Authorization>), Error> {
        let order = self.core.new_order(domains).await?;

        let authzs = match self.fetch_authorizations(&order).await {
            Ok(authzs) => authzs,
            Err(err) => {
                self.deactivate_authorizations(&order).await;
                return Err(err);
            }
        };

        if let Err(err) = self.solvers.solve(&authzs).await {
            self.deactivate_authorizations(&order).await;
            return Err(err);
        }

        tracing::info!(
            "[{}] acme: Validations succeeded; requesting certificates",
            domains.join(", ")
        );
        Ok((order, authzs))
    }
}

fn log_obtaining(domains: &[String], bundle: bool) {
    let kind = if bundle { "bundled SAN" } else { "SAN" };
    tracing::info!("[{}] acme: Obtaining {kind} certificate", domains.join(", "));
}

/// Record `err` against every domain of the order.
fn attribute_to_all(authzs: &[Authorization], err: Error) -> Error {
    let err = Arc::new(err);
    let mut failures = ObtainError::new();
    for authz in authzs {
        failures.insert(targeted_domain(authz), Error::Finalize(err.clone()));
    }
    match failures.into_result() {
        Err(aggregate) => aggregate,
        Ok(()) => Error::Finalize(err),
    }
}

/// Trim, lower-case and dedupe `domains`, keeping their order.
#[must_use]
pub fn sanitize_domains(domains: &[String]) -> Vec<String> {
    let mut sanitized: Vec<String> = Vec::with_capacity(domains.len());
    for domain in domains {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        if domain.is_empty() {
            tracing::info!("skip empty domain");
            continue;
        }
        if !sanitized.contains(&domain) {
            sanitized.push(domain);
        }
    }
    sanitized
}
