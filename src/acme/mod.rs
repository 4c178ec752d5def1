//! ACME wire objects.
//!
//! Serde representations of the resources exchanged with an [RFC-8555][RFC-8555] certificate
//! authority: the directory, accounts, orders, authorizations, challenges and problem
//! documents.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555

use serde::{Deserialize, Serialize};
use std::fmt;

/// Problem type returned by the CA when a request was signed with a stale or unknown nonce.
pub const BAD_NONCE_ERR: &str = "urn:ietf:params:acme:error:badNonce";

/// Status of an ACME resource (account, order, authorization or challenge).
///
/// Unknown status strings are preserved in [`Status::Other`] so callers can report exactly what
/// the server sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Pending,
    Processing,
    Ready,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
    Other(String),
}

impl Default for Status {
    fn default() -> Self {
        Status::Other(String::new())
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => Status::Pending,
            "processing" => Status::Processing,
            "ready" => Status::Ready,
            "valid" => Status::Valid,
            "invalid" => Status::Invalid,
            "deactivated" => Status::Deactivated,
            "expired" => Status::Expired,
            "revoked" => Status::Revoked,
            _ => Status::Other(s),
        }
    }
}

impl From<Status> for String {
    fn from(s: Status) -> Self {
        s.as_str().to_string()
    }
}

impl Status {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Ready => "ready",
            Status::Valid => "valid",
            Status::Invalid => "invalid",
            Status::Deactivated => "deactivated",
            Status::Expired => "expired",
            Status::Revoked => "revoked",
            Status::Other(s) => s,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The CA's service directory.
///
/// See [RFC-8555 section 7.1.1](https://www.rfc-editor.org/rfc/rfc8555#section-7.1.1).
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Directory {
    #[serde(rename = "newNonce")]
    pub new_nonce_url: String,
    #[serde(rename = "newAccount")]
    pub new_account_url: String,
    #[serde(rename = "newOrder")]
    pub new_order_url: String,
    #[serde(rename = "newAuthz", skip_serializing_if = "Option::is_none")]
    pub new_authz_url: Option<String>,
    #[serde(rename = "revokeCert")]
    pub revoke_cert_url: String,
    #[serde(rename = "keyChange")]
    pub key_change_url: String,
    pub meta: Meta,
}

/// Directory metadata.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,
    pub external_account_required: bool,
}

/// An account object, used both as request payload and response body.
///
/// See [RFC-8555 section 7.1.2](https://www.rfc-editor.org/rfc/rfc8555#section-7.1.2).
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub terms_of_service_agreed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub orders: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub only_return_existing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_binding: Option<serde_json::Value>,
}

/// An [`Account`] along with the account URI the CA assigned to it.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExtendedAccount {
    #[serde(flatten)]
    pub account: Account,
    #[serde(skip)]
    pub location: String,
}

/// A domain identifier.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    #[must_use]
    pub fn dns(value: &str) -> Self {
        Identifier {
            kind: "dns".to_string(),
            value: value.to_string(),
        }
    }
}

/// An order object.
///
/// See [RFC-8555 section 7.1.3](https://www.rfc-editor.org/rfc/rfc8555#section-7.1.3).
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Order {
    #[serde(skip_serializing_if = "is_unset")]
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub identifiers: Vec<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProblemDetails>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorizations: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub finalize: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub certificate: String,
}

/// An [`Order`] along with its URL and the domains it was created for.
#[derive(Debug, Clone, Default)]
pub struct OrderResource {
    pub order: Order,
    pub url: String,
    pub domains: Vec<String>,
}

/// An authorization object.
///
/// See [RFC-8555 section 7.1.4](https://www.rfc-editor.org/rfc/rfc8555#section-7.1.4).
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Authorization {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub identifier: Identifier,
    pub challenges: Vec<Challenge>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub wildcard: bool,
}

/// A challenge object.
///
/// See [RFC-8555 section 7.1.5](https://www.rfc-editor.org/rfc/rfc8555#section-7.1.5).
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub token: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProblemDetails>,
}

/// A [`Challenge`] along with the response headers relevant to polling it.
#[derive(Debug, Clone, Default)]
pub struct ExtendedChallenge {
    pub challenge: Challenge,
    pub retry_after: Option<String>,
    pub authorization_url: Option<String>,
}

/// Finalize request payload.
#[derive(Serialize, Debug, Clone)]
pub struct CSRMessage {
    pub csr: String,
}

/// Revocation request payload.
#[derive(Serialize, Debug, Clone)]
pub struct RevokeCertMessage {
    pub certificate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<u8>,
}

/// An [RFC-7807](https://www.rfc-editor.org/rfc/rfc7807) problem document.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: String,
    #[serde(rename = "status", skip_serializing_if = "is_zero")]
    pub http_status: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instance: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<SubProblem>,

    #[serde(skip)]
    pub method: String,
    #[serde(skip)]
    pub url: String,
}

/// A sub-problem attached to a [`ProblemDetails`], scoped to one identifier.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SubProblem {
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: String,
    pub identifier: Identifier,
}

impl ProblemDetails {
    /// Whether the CA rejected the request because of its anti-replay nonce.
    #[must_use]
    pub fn is_bad_nonce(&self) -> bool {
        self.http_status == 400 && self.kind == BAD_NONCE_ERR
    }
}

impl fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acme: error: {}", self.http_status)?;
        if !self.method.is_empty() {
            write!(f, " :: {} :: {}", self.method, self.url)?;
        }
        write!(f, " :: {} :: {}", self.kind, self.detail)?;
        if !self.instance.is_empty() {
            write!(f, ", url: {}", self.instance)?;
        }
        for sub in &self.subproblems {
            write!(
                f,
                ", problem: {:?} :: {} :: {}",
                sub.identifier.value, sub.kind, sub.detail
            )?;
        }
        Ok(())
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &u16) -> bool {
    *v == 0
}

fn is_unset(s: &Status) -> bool {
    matches!(s, Status::Other(v) if v.is_empty())
}
