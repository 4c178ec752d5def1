//! Challenge types and the [`Provider`] capability challenge plugins implement.
//!
//! A [`Provider`] publishes a key authorization through whatever channel the challenge type
//! calls for: a TXT record for [DNS-01], an HTTP resource for [HTTP-01], a TLS certificate for
//! [TLS-ALPN-01]. The solvers in this module drive a provider through present, validation and
//! clean up.
//!
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//! [HTTP-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.3
//! [TLS-ALPN-01]: https://www.rfc-editor.org/rfc/rfc8737

use crate::acme::{Authorization, Challenge};
use crate::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub mod dns01;
pub mod http01;
pub mod http01_server;
pub mod tlsalpn01;

pub use dns01::Dns01Solver;
pub use http01::Http01Solver;
pub use http01_server::Http01Server;
pub use tlsalpn01::TlsAlpn01Solver;

/// `DynProvider` is a [`Provider`] shared between the solvers and the caller that configured
/// it.
#[allow(clippy::module_name_repetitions)]
pub type DynProvider = Arc<dyn Provider + Send + Sync>;

/// An async trait for publishing and withdrawing challenge responses.
///
/// `domain` is the authorization's identifier value, without any `*.` wildcard prefix.
#[async_trait::async_trait]
pub trait Provider {
    /// Make `key_auth` available for the CA to validate.
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> anyhow::Result<()>;

    /// Withdraw whatever [`Provider::present`] published.
    async fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> anyhow::Result<()>;

    /// Propagation `(timeout, interval)` overriding the solver defaults.
    fn timeout(&self) -> Option<(Duration, Duration)> {
        None
    }

    /// When set, challenges for this provider are solved one at a time, `interval` apart.
    fn sequential(&self) -> Option<Duration> {
        None
    }
}

/// The challenge types this client can solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::module_name_repetitions)]
pub enum ChallengeKind {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
            ChallengeKind::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http-01" => Ok(ChallengeKind::Http01),
            "dns-01" => Ok(ChallengeKind::Dns01),
            "tls-alpn-01" => Ok(ChallengeKind::TlsAlpn01),
            other => Err(Error::Config(format!("unknown challenge type \"{other}\""))),
        }
    }
}

/// The domain an authorization is for, `*.` prefixed for wildcard authorizations.
#[must_use]
pub fn targeted_domain(authz: &Authorization) -> String {
    if authz.wildcard {
        format!("*.{}", authz.identifier.value)
    } else {
        authz.identifier.value.clone()
    }
}

/// The first challenge of `kind` offered by `authz`.
///
/// # Errors
///
/// Returns [`Error::NoSolver`] when the CA didn't offer a challenge of that type.
pub fn find_challenge(kind: ChallengeKind, authz: &Authorization) -> Result<&Challenge, Error> {
    authz
        .challenges
        .iter()
        .find(|c| c.kind == kind.as_str())
        .ok_or_else(|| Error::NoSolver(format!("{} ({kind})", targeted_domain(authz))))
}

pub(crate) fn provider_error(domain: &str, action: &'static str, source: anyhow::Error) -> Error {
    Error::Provider {
        domain: domain.to_string(),
        action,
        source,
    }
}
