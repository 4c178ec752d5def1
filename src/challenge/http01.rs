use crate::acme::Authorization;
use crate::api::SharedCore;
use crate::challenge::{find_challenge, provider_error, targeted_domain, ChallengeKind, DynProvider};
use crate::error::Error;
use crate::resolver::validate;

/// The path the CA fetches the key authorization for `token` from.
#[must_use]
pub fn challenge_path(token: &str) -> String {
    format!("/.well-known/acme-challenge/{token}")
}

#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct Http01Solver {
    core: SharedCore,
    provider: DynProvider,
}

impl Http01Solver {
    #[must_use]
    pub fn new(core: SharedCore, provider: DynProvider) -> Self {
        Http01Solver { core, provider }
    }

    #[must_use]
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Present the key authorization, have the CA validate it, then clean up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] when presenting fails, or the validation error.
    pub async fn solve(&self, authz: &Authorization) -> Result<(), Error> {
        let domain = targeted_domain(authz);
        tracing::info!("[{domain}] acme: Trying to solve HTTP-01");

        let chlg = find_challenge(ChallengeKind::Http01, authz)?;
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

impl std::fmt::Debug for Http01Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http01Solver").finish_non_exhaustive()
    }
}
