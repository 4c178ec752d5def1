//! Solver selection and challenge validation.
//!
//! [`SolverManager`] holds at most one [`Solver`] per [`ChallengeKind`]. For each authorization
//! it picks the first challenge, in the order the CA listed them, that has a registered solver.
//! [`SolverManager::solve`] then runs every selected solver in three phases: all pre-solves,
//! then all solves, then clean up.

mod batch;

use crate::acme::{Authorization, Status};
use crate::api::{Core, SharedCore};
use crate::challenge::{
    ChallengeKind, Dns01Solver, DynProvider, Http01Solver, TlsAlpn01Solver,
};
use crate::dns::SharedResolver;
use crate::error::Error;
use std::collections::HashMap;
use std::time::Duration;

/// Wait between challenge polls when the CA doesn't send a usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// A solver for one challenge type.
#[derive(Debug, Clone)]
pub enum Solver {
    Http01(Http01Solver),
    Dns01(Dns01Solver),
    TlsAlpn01(TlsAlpn01Solver),
}

impl Solver {
    #[must_use]
    pub fn kind(&self) -> ChallengeKind {
        match self {
            Solver::Http01(_) => ChallengeKind::Http01,
            Solver::Dns01(_) => ChallengeKind::Dns01,
            Solver::TlsAlpn01(_) => ChallengeKind::TlsAlpn01,
        }
    }

    /// Whether the solver publishes its response ahead of [`Solver::solve`], and withdraws it
    /// in a separate [`Solver::clean_up`] step.
    #[must_use]
    pub fn supports_pre_solve(&self) -> bool {
        matches!(self, Solver::Dns01(_))
    }

    /// The provider's sequential interval, if it asks to be driven one domain at a time.
    #[must_use]
    pub fn sequential(&self) -> Option<Duration> {
        let provider = match self {
            Solver::Http01(s) => s.provider(),
            Solver::Dns01(s) => s.provider(),
            Solver::TlsAlpn01(s) => s.provider(),
        };
        provider.sequential()
    }

    /// # Errors
    ///
    /// Returns the provider's failure to present the challenge response.
    pub async fn pre_solve(&self, authz: &Authorization) -> Result<(), Error> {
        match self {
            Solver::Dns01(s) => s.pre_solve(authz).await,
            Solver::Http01(_) | Solver::TlsAlpn01(_) => Ok(()),
        }
    }

    /// # Errors
    ///
    /// Returns the first error out of presenting, propagation or validation.
    pub async fn solve(&self, authz: &Authorization) -> Result<(), Error> {
        match self {
            Solver::Http01(s) => s.solve(authz).await,
            Solver::Dns01(s) => s.solve(authz).await,
            Solver::TlsAlpn01(s) => s.solve(authz).await,
        }
    }

    /// # Errors
    ///
    /// Returns the provider's failure to clean up.
    pub async fn clean_up(&self, authz: &Authorization) -> Result<(), Error> {
        match self {
            Solver::Dns01(s) => s.clean_up(authz).await,
            Solver::Http01(_) | Solver::TlsAlpn01(_) => Ok(()),
        }
    }
}

/// The registry of solvers available for a certificate request.
#[derive(Debug)]
pub struct SolverManager {
    core: SharedCore,
    solvers: HashMap<ChallengeKind, Solver>,
}

impl SolverManager {
    #[must_use]
    pub fn new(core: SharedCore) -> Self {
        SolverManager {
            core,
            solvers: HashMap::new(),
        }
    }

    pub fn set_http01_provider(&mut self, provider: DynProvider) {
        let solver = Http01Solver::new(self.core.clone(), provider);
        self.solvers.insert(ChallengeKind::Http01, Solver::Http01(solver));
    }

    pub fn set_tls_alpn01_provider(&mut self, provider: DynProvider) {
        let solver = TlsAlpn01Solver::new(self.core.clone(), provider);
        self.solvers
            .insert(ChallengeKind::TlsAlpn01, Solver::TlsAlpn01(solver));
    }

    pub fn set_dns01_provider(&mut self, provider: DynProvider, resolver: SharedResolver) {
        let solver = Dns01Solver::new(self.core.clone(), provider, resolver);
        self.solvers.insert(ChallengeKind::Dns01, Solver::Dns01(solver));
    }

    /// Stop solving challenges of `kind`.
    pub fn remove(&mut self, kind: ChallengeKind) {
        self.solvers.remove(&kind);
    }

    /// The solver for the first challenge of `authz` that has one.
    #[must_use]
    pub fn choose_solver(&self, authz: &Authorization) -> Option<&Solver> {
        let domain = crate::challenge::targeted_domain(authz);
        authz.challenges.iter().find_map(|chlg| {
            let Ok(kind) = chlg.kind.parse::<ChallengeKind>() else {
                tracing::debug!("[{domain}] acme: Unknown challenge type {}", chlg.kind);
                return None;
            };
            let solver = self.solvers.get(&kind);
            match solver {
                Some(_) => tracing::debug!("[{domain}] acme: use {kind} solver"),
                None => tracing::debug!("[{domain}] acme: Could not find solver for: {kind}"),
            }
            solver
        })
    }
}

/// Trigger validation of the challenge at `chlg_url` and poll it until the CA settles on a
/// final status.
///
/// There is no overall deadline; callers wanting one wrap this in [`tokio::time::timeout`].
///
/// # Errors
///
/// Returns [`Error::ChallengeInvalid`] with the CA's error detail when the challenge fails,
/// [`Error::UnexpectedChallengeStatus`] for a status outside the challenge state machine.
pub async fn validate(core: &Core, domain: &str, chlg_url: &str) -> Result<(), Error> {
    let mut chlg = core.trigger_challenge(chlg_url).await?;
    loop {
        match chlg.challenge.status {
            Status::Valid => {
                tracing::info!("[{domain}] The server validated our request");
                return Ok(());
            }
            Status::Pending | Status::Processing => {}
            Status::Invalid => return Err(Error::ChallengeInvalid(chlg.challenge.error)),
            other => return Err(Error::UnexpectedChallengeStatus(other.to_string())),
        }

        let wait = retry_after(chlg.retry_after.as_deref());
        tracing::debug!("[{domain}] acme: challenge {chlg_url} not settled, retrying in {wait:?}");
        tokio::time::sleep(wait).await;
        chlg = core.get_challenge(chlg_url).await?;
    }
}

fn retry_after(header: Option<&str>) -> Duration {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs)
}
