//! Error types.

use crate::acme::ProblemDetails;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use trust_dns_client::error::ClientError;
use trust_dns_proto::error::ProtoError;
use trust_dns_proto::op::ResponseCode;

/// Error enumerates the possible certcrab error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when the CA answers a request with an [RFC-7807][RFC-7807] problem document.
    ///
    /// [RFC-7807]: https://www.rfc-editor.org/rfc/rfc7807
    #[error("{0}")]
    Problem(ProblemDetails),

    /// Returned when the CA rejected the anti-replay nonce of a signed request. The signed
    /// transport retries such a request once before surfacing this error.
    #[error("nonce error: {0}")]
    BadNonce(ProblemDetails),

    /// Returned when an HTTP exchange with the CA fails below the ACME layer.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Returned when a request body can't be serialized, or a response body can't be
    /// deserialized.
    #[error("invalid JSON: {0}")]
    InvalidJSON(#[from] serde_json::Error),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred: {0}")]
    IO(#[from] std::io::Error),

    /// Returned when the CA's directory doesn't advertise an URL the client requires.
    #[error("directory missing {0} URL")]
    MissingDirectoryURL(&'static str),

    /// Returned when an account key isn't RSA, EC P-256 or EC P-384.
    #[error("unsupported key type")]
    UnsupportedKeyType,

    /// Returned when key material can't be parsed or used.
    #[error("invalid key: {0}")]
    KeyRejected(String),

    /// Returned when the signing primitive fails.
    #[error("failed to sign request")]
    Signing,

    /// Returned when a response that must carry a `Location` header doesn't.
    #[error("server did not return a Location header for {0}")]
    MissingLocation(String),

    /// Returned when the new-nonce endpoint doesn't return a `Replay-Nonce` header.
    #[error("server did not return a Replay-Nonce header")]
    MissingNonce,

    /// Returned when a signed request is attempted before the account has been registered.
    #[error("no account registered")]
    NoAccount,

    /// Returned when a challenge reaches a status the validation loop doesn't know.
    #[error("the server returned an unexpected challenge status: {0}")]
    UnexpectedChallengeStatus(String),

    /// Returned when the CA marks a challenge `invalid`.
    #[error("invalid challenge: {}", describe(.0.as_ref()))]
    ChallengeInvalid(Option<ProblemDetails>),

    /// Returned when the CA marks an order `invalid`.
    #[error("invalid order {url}: {}", describe(.problem.as_ref()))]
    OrderInvalid {
        url: String,
        problem: Option<ProblemDetails>,
    },

    /// Returned when an order doesn't reach a terminal status before the finalize deadline.
    #[error("certificate polling timed out")]
    FinalizeTimeout,

    /// Returned when a response body is larger than the read cap for that resource.
    #[error("response from {0} exceeds {1} bytes")]
    ResponseTooLarge(String, usize),

    /// Returned when no registered solver matches any challenge of an authorization.
    #[error("[{0}] acme: could not determine solvers")]
    NoSolver(String),

    /// Returned when a challenge provider fails to present or clean up a challenge response.
    #[error("[{domain}] acme: {action}: {source}")]
    Provider {
        domain: String,
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Returned when the built-in HTTP-01 server can't bind or serve.
    #[error("HTTP-01 server error: {0}")]
    Server(#[from] hyper::Error),

    /// Returned when a DNS exchange fails at the protocol level.
    #[error("DNS error: {0}")]
    DNSError(#[from] ProtoError),

    /// Returned when a nameserver can't be reached or doesn't answer in time.
    #[error("DNS client error: {0}")]
    DNSClient(#[from] ClientError),

    /// Returned when a nameserver answers with a response code other than `NOERROR` or
    /// `NXDOMAIN`.
    #[error("unexpected response for '{fqdn}' [question='{question}', code={code}]")]
    DNSResponseCode {
        fqdn: String,
        question: String,
        code: ResponseCode,
    },

    /// Returned when no candidate suffix of a FQDN carries an SOA record.
    #[error("could not find the start of authority for '{0}'")]
    ZoneNotFound(String),

    /// Returned when a DNS-01 record isn't visible on the authoritative nameservers in time.
    #[error("[{domain}] acme: time limit exceeded waiting for DNS propagation of '{fqdn}'")]
    PropagationTimeout { domain: String, fqdn: String },

    /// Returned when certificates, CSRs or keys can't be generated or parsed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Returned when `rcgen` fails to build a key, CSR or certificate.
    #[error("certificate error: {0}")]
    Rcgen(#[from] rcgen::Error),

    /// Returned when PEM data can't be decoded.
    #[error("invalid PEM: {0}")]
    Pem(#[from] pem::PemError),

    /// Returned when an obtain request names no domains.
    #[error("no domains to obtain a certificate for")]
    NoDomains,

    /// Returned when a configuration value is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Recorded for every domain of an order when finalizing or downloading its certificate
    /// fails, since issuance is all-or-nothing.
    #[error(transparent)]
    Finalize(Arc<Error>),

    /// Returned when one or more domains of a certificate request failed.
    #[error(transparent)]
    Obtain(#[from] ObtainError),
}

fn describe(problem: Option<&ProblemDetails>) -> String {
    problem.map_or_else(|| "no error detail".to_string(), ToString::to_string)
}

/// Per-domain failures of one certificate request.
///
/// An `ObtainError` is only ever surfaced when it is non-empty: producers collect into it and
/// convert with [`ObtainError::into_result`].
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ObtainError(BTreeMap<String, Error>);

impl ObtainError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the failure for `domain`. A later failure for the same domain replaces the first.
    pub fn insert(&mut self, domain: impl Into<String>, err: Error) {
        self.0.insert(domain.into(), err);
    }

    #[must_use]
    pub fn contains(&self, domain: &str) -> bool {
        self.0.contains_key(domain)
    }

    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&Error> {
        self.0.get(domain)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.0.iter().map(|(d, e)| (d.as_str(), e))
    }

    /// `Ok(())` for an empty map, otherwise the map wrapped in [`Error::Obtain`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Obtain`] when at least one domain failed.
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Obtain(self))
        }
    }
}

impl fmt::Display for ObtainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: one or more domains had a problem:")?;
        for (domain, err) in &self.0 {
            write!(f, "\n[{domain}] {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ObtainError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_obtain_error_is_ok() {
        assert!(ObtainError::new().into_result().is_ok());
    }

    #[test]
    fn obtain_error_lists_domains_in_order() {
        let mut failures = ObtainError::new();
        failures.insert("b.example.com", Error::NoSolver("b.example.com".to_string()));
        failures.insert("a.example.com", Error::FinalizeTimeout);

        assert_eq!(
            failures.domains().collect::<Vec<_>>(),
            vec!["a.example.com", "b.example.com"]
        );
        let err = failures.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "error: one or more domains had a problem:\n\
             [a.example.com] certificate polling timed out\n\
             [b.example.com] [b.example.com] acme: could not determine solvers"
        );
    }
}
