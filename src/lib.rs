//! Certcrab
//!
//! An [RFC-8555][RFC-8555] ACME client: registers an account with a certificate authority,
//! proves control of domains through [HTTP-01], [DNS-01] or [TLS-ALPN-01] challenges, and
//! obtains, renews and revokes X509 certificates.
//!
//! Challenge responses are published through the [`challenge::Provider`] trait. The crate
//! ships an in-memory HTTP-01 server implementing it ([`challenge::Http01Server`]); DNS and
//! TLS-ALPN providers plug in the same way.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [HTTP-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.3
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//! [TLS-ALPN-01]: https://www.rfc-editor.org/rfc/rfc8737
//!
#![warn(clippy::pedantic)]

pub mod acme;
pub mod api;
pub mod certificate;
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod error;
pub mod registration;
pub mod resolver;

pub use api::jws::{AccountKey, KeyType};
pub use api::{Core, SharedCore};
pub use certificate::{CertificateResource, Certifier, ObtainForCSRRequest, ObtainRequest};
pub use config::{Config, SharedConfig};
pub use dns::{SharedResolver, ZoneResolver};
pub use error::{Error, ObtainError};
pub use registration::Registrar;
pub use resolver::SolverManager;
