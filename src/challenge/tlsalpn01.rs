use crate::acme::Authorization;
use crate::api::SharedCore;
use crate::challenge::{find_challenge, provider_error, targeted_domain, ChallengeKind, DynProvider};
use crate::error::Error;
use crate::resolver::validate;
use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, KeyPair, PKCS_ECDSA_P256_SHA256,
};
use ring::digest;

/// The ALPN protocol name the CA negotiates when validating.
pub const ACME_TLS_1_PROTOCOL: &str = "acme-tls/1";

/// A self-signed certificate for `domain` carrying the critical `acmeIdentifier` extension
/// with the SHA-256 digest of `key_auth`, as `(certificate PEM, private key PEM)`.
///
/// # Errors
///
/// Returns [`Error::Rcgen`] if `domain` isn't a valid DNS name or signing fails.
pub fn challenge_certificate(domain: &str, key_auth: &str) -> Result<(String, String), Error> {
    let digest = digest::digest(&digest::SHA256, key_auth.as_bytes());

    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    params.distinguished_name = DistinguishedName::new();
    params
        .custom_extensions
        .push(CustomExtension::new_acme_identifier(digest.as_ref()));
    let cert = params.self_signed(&key)?;
    Ok((cert.pem(), key.serialize_pem()))
}

#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct TlsAlpn01Solver {
    core: SharedCore,
    provider: DynProvider,
}

impl TlsAlpn01Solver {
    #[must_use]
    pub fn new(core: SharedCore, provider: DynProvider) -> Self {
        TlsAlpn01Solver { core, provider }
    }

    #[must_use]
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Present the challenge certificate, have the CA validate it, then clean up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] when presenting fails, or the validation error.
    pub async fn solve(&self, authz: &Authorization) -> Result<(), Error> {
        let domain = targeted_domain(authz);
        tracing::info!("[{domain}] acme: Trying to solve TLS-ALPN-01");

        let chlg = find_challenge(ChallengeKind::TlsAlpn01, authz)?;
        let key_auth = self.core.key_authorization(&chlg.token)?;
        let ident = &authz.identifier.value;

        self.provider
            .present(ident, &chlg.token, &key_auth)
            .await
            .map_err(|e| provider_error(&domain, "error presenting token", e))?;

        let res = validate(&self.core, &domain, &chlg.url).await;

        if let Err(err) = self.provider.clean_up(ident, &chlg.token, &key_auth).await {
            tracing::warn!("[{domain}] acme: cleaning up failed: {err}");
        }
        res
    }
}

impl std::fmt::Debug for TlsAlpn01Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAlpn01Solver").finish_non_exhaustive()
    }
}
