use crate::acme::Authorization;
use crate::api::jws::BASE64_URL;
use crate::api::SharedCore;
use crate::challenge::{find_challenge, provider_error, targeted_domain, ChallengeKind, DynProvider};
use crate::dns::SharedResolver;
use crate::error::Error;
use crate::resolver::validate;
use base64::Engine;
use ring::digest;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// Where and what to publish for a DNS-01 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeInfo {
    /// `_acme-challenge.<domain>.`
    pub fqdn: String,
    /// [`ChallengeInfo::fqdn`] after following CNAMEs. Providers should write here.
    pub effective_fqdn: String,
    /// The TXT record value.
    pub value: String,
}

/// The TXT record value for `key_auth`: `base64url(sha256(key_auth))`.
#[must_use]
pub fn txt_value(key_auth: &str) -> String {
    BASE64_URL.encode(digest::digest(&digest::SHA256, key_auth.as_bytes()))
}

/// Record name and value for `domain`'s challenge.
pub async fn challenge_info(
    resolver: &SharedResolver,
    domain: &str,
    key_auth: &str,
) -> ChallengeInfo {
    let fqdn = format!("_acme-challenge.{}.", domain.trim_end_matches('.'));
    ChallengeInfo {
        effective_fqdn: resolver.follow_cname(&fqdn).await,
        fqdn,
        value: txt_value(key_auth),
    }
}

#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct Dns01Solver {
    core: SharedCore,
    provider: DynProvider,
    resolver: SharedResolver,
}

impl Dns01Solver {
    #[must_use]
    pub fn new(core: SharedCore, provider: DynProvider, resolver: SharedResolver) -> Self {
        Dns01Solver {
            core,
            provider,
            resolver,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Publish the TXT record ahead of validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] when the provider fails to present the record.
    pub async fn pre_solve(&self, authz: &Authorization) -> Result<(), Error> {
        let domain = targeted_domain(authz);
        tracing::info!("[{domain}] acme: Preparing to solve DNS-01");

        let chlg = find_challenge(ChallengeKind::Dns01, authz)?;
        let key_auth = self.core.key_authorization(&chlg.token)?;
        self.provider
            .present(&authz.identifier.value, &chlg.token, &key_auth)
            .await
            .map_err(|e| provider_error(&domain, "error presenting token", e))
    }

    /// Wait for the record published by [`Dns01Solver::pre_solve`] to propagate, then have the
    /// CA validate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PropagationTimeout`] when the record isn't visible in time, or the
    /// validation error.
    pub async fn solve(&self, authz: &Authorization) -> Result<(), Error> {
        let domain = targeted_domain(authz);
        tracing::info!("[{domain}] acme: Trying to solve DNS-01");

        let chlg = find_challenge(ChallengeKind::Dns01, authz)?;
        let key_auth = self.core.key_authorization(&chlg.token)?;
        let info = challenge_info(&self.resolver, &authz.identifier.value, &key_auth).await;

        let (timeout, interval) = self
            .provider
            .timeout()
            .unwrap_or((DEFAULT_PROPAGATION_TIMEOUT, DEFAULT_POLLING_INTERVAL));
        tracing::info!(
            "[{domain}] acme: Checking DNS record propagation. [nameservers={:?}]",
            self.resolver.nameservers()
        );
        tokio::time::sleep(interval).await;
        self.wait_for_propagation(&domain, &info, timeout, interval)
            .await?;

        validate(&self.core, &domain, &chlg.url).await
    }

    /// Withdraw the TXT record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] when the provider fails to clean up.
    pub async fn clean_up(&self, authz: &Authorization) -> Result<(), Error> {
        let domain = targeted_domain(authz);
        tracing::info!("[{domain}] acme: Cleaning DNS-01 challenge");

        let chlg = find_challenge(ChallengeKind::Dns01, authz)?;
        let key_auth = self.core.key_authorization(&chlg.token)?;
        self.provider
            .clean_up(&authz.identifier.value, &chlg.token, &key_auth)
            .await
            .map_err(|e| provider_error(&domain, "error cleaning up", e))
    }

    async fn wait_for_propagation(
        &self,
        domain: &str,
        info: &ChallengeInfo,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), Error> {
        tracing::info!(
            "[{domain}] Wait for propagation [timeout: {timeout:?}, interval: {interval:?}]"
        );
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .resolver
                .check_propagation(&info.effective_fqdn, &info.value)
                .await
            {
                Ok(true) => return Ok(()),
                Ok(false) => tracing::info!("[{domain}] acme: Waiting for DNS record propagation."),
                Err(err) => {
                    tracing::info!("[{domain}] acme: Waiting for DNS record propagation: {err}");
                }
            }
            if Instant::now() + interval > deadline {
                return Err(Error::PropagationTimeout {
                    domain: domain.to_string(),
                    fqdn: info.effective_fqdn.clone(),
                });
            }
            tokio::time::sleep(interval).await;
        }
    }
}

impl std::fmt::Debug for Dns01Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dns01Solver")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
