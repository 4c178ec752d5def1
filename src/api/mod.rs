//! Signed transport to an ACME CA.
//!
//! [`Core`] owns the CA's [`Directory`], the account signer ([`jws::Jws`]) and the nonce pool
//! ([`nonce::NonceManager`]). Every request goes out as an `application/jose+json` POST; a
//! response carrying a `badNonce` problem is retried once with a fresh nonce, every other
//! error is surfaced to the caller.
//!
//! The resource services ([`account`], [`order`], [`authorization`], [`challenge`],
//! [`certificate`]) are thin typed wrappers around [`Core::post`] and [`Core::post_as_get`].

pub mod account;
pub mod authorization;
pub mod certificate;
pub mod challenge;
pub mod jws;
pub mod nonce;
pub mod order;

use crate::acme::{Directory, ProblemDetails};
use crate::error::Error;
use jws::{AccountKey, Jws};
use nonce::NonceManager;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LINK, LOCATION, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

const JOSE_JSON: &str = "application/jose+json";

/// Default read cap for JSON resources.
const MAX_BODY_SIZE: usize = 1024 * 1024;

#[allow(clippy::module_name_repetitions)]
pub type SharedCore = Arc<Core>;

/// The ACME API client shared by every component of a certificate request.
#[derive(Debug)]
pub struct Core {
    http: reqwest::Client,
    directory: Directory,
    jws: Jws,
    nonces: NonceManager,
}

/// A decoded response together with its headers.
#[derive(Debug)]
pub struct Signed<R> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: R,
}

impl<R> Signed<R> {
    /// The `Location` header, if any.
    #[must_use]
    pub fn location(&self) -> Option<String> {
        header_str(&self.headers, LOCATION.as_str())
    }

    /// The raw `Retry-After` header, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<String> {
        header_str(&self.headers, RETRY_AFTER.as_str())
    }
}

impl Core {
    /// Fetch the directory at `dir_url` and build a client signing with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDirectoryURL`] when the directory lacks the new-nonce,
    /// new-account or new-order URL, [`Error::Http`] or [`Error::Problem`] if it can't be
    /// fetched.
    pub async fn new(http: reqwest::Client, dir_url: &str, key: AccountKey) -> Result<Self, Error> {
        let directory = get_directory(&http, dir_url).await?;
        let nonces = NonceManager::new(http.clone(), &directory.new_nonce_url);
        Ok(Core {
            http,
            directory,
            jws: Jws::new(key),
            nonces,
        })
    }

    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    #[must_use]
    pub fn jws(&self) -> &Jws {
        &self.jws
    }

    #[must_use]
    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The key authorization for `token`: `token + "." + thumbprint(account JWK)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJSON`] if the account JWK can't be serialized.
    pub fn key_authorization(&self, token: &str) -> Result<String, Error> {
        Ok(format!("{token}.{}", self.jws.key().thumbprint()?))
    }

    /// Sign and POST `body` as JSON, decoding the JSON response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] for CA errors, [`Error::BadNonce`] if the CA rejected the
    /// nonce twice in a row, [`Error::Http`] for transport failures.
    pub async fn post<T, R>(&self, url: &str, body: &T) -> Result<Signed<R>, Error>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let content = serde_json::to_vec(body)?;
        let (status, headers, bytes) = self
            .retrievable_post(url, &content, None, MAX_BODY_SIZE)
            .await?;
        Ok(Signed {
            status,
            body: decode(&bytes)?,
            headers,
        })
    }

    /// Like [`Core::post`], but a response with status `accepted` is decoded leniently
    /// instead of being turned into an error.
    ///
    /// # Errors
    ///
    /// See [`Core::post`].
    pub async fn post_accepting<T, R>(
        &self,
        url: &str,
        body: &T,
        accepted: StatusCode,
    ) -> Result<Signed<R>, Error>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned + Default,
    {
        let content = serde_json::to_vec(body)?;
        let (status, headers, bytes) = self
            .retrievable_post(url, &content, Some(accepted), MAX_BODY_SIZE)
            .await?;
        let body = if status == accepted {
            decode(&bytes).unwrap_or_default()
        } else {
            decode(&bytes)?
        };
        Ok(Signed {
            status,
            headers,
            body,
        })
    }

    /// POST-as-GET `url`, decoding the JSON response.
    ///
    /// # Errors
    ///
    /// See [`Core::post`].
    pub async fn post_as_get<R: DeserializeOwned>(&self, url: &str) -> Result<Signed<R>, Error> {
        let (status, headers, bytes) = self.retrievable_post(url, &[], None, MAX_BODY_SIZE).await?;
        Ok(Signed {
            status,
            body: decode(&bytes)?,
            headers,
        })
    }

    /// POST-as-GET `url`, returning the raw body read up to `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResponseTooLarge`] when the body exceeds `limit`; see also
    /// [`Core::post`].
    pub async fn post_as_get_raw(&self, url: &str, limit: usize) -> Result<Signed<Vec<u8>>, Error> {
        let (status, headers, body) = self.retrievable_post(url, &[], None, limit).await?;
        Ok(Signed {
            status,
            headers,
            body,
        })
    }

    async fn retrievable_post(
        &self,
        url: &str,
        content: &[u8],
        accepted: Option<StatusCode>,
        limit: usize,
    ) -> Result<(StatusCode, HeaderMap, Vec<u8>), Error> {
        match self.signed_post(url, content, accepted, limit).await {
            Err(Error::BadNonce(problem)) => {
                tracing::debug!("retrying {url} after nonce error: {problem}");
                self.signed_post(url, content, accepted, limit).await
            }
            other => other,
        }
    }

    async fn signed_post(
        &self,
        url: &str,
        content: &[u8],
        accepted: Option<StatusCode>,
        limit: usize,
    ) -> Result<(StatusCode, HeaderMap, Vec<u8>), Error> {
        let nonce = self.nonces.nonce().await?;
        let signed = self.jws.sign_content(url, &nonce, content)?;

        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, JOSE_JSON)
            .body(serde_json::to_vec(&signed)?)
            .send()
            .await?;

        self.nonces.push_from(resp.headers());
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = read_limited(resp, url, limit).await?;

        if (status.is_client_error() || status.is_server_error()) && Some(status) != accepted {
            return Err(problem_error(status, "POST", url, &body));
        }
        Ok((status, headers, body))
    }
}

async fn get_directory(http: &reqwest::Client, dir_url: &str) -> Result<Directory, Error> {
    let resp = http.get(dir_url).send().await?;
    let status = resp.status();
    let body = read_limited(resp, dir_url, MAX_BODY_SIZE).await?;
    if !status.is_success() {
        return Err(problem_error(status, "GET", dir_url, &body));
    }

    let directory: Directory = serde_json::from_slice(&body)?;
    if directory.new_nonce_url.is_empty() {
        return Err(Error::MissingDirectoryURL("new nonce"));
    }
    if directory.new_account_url.is_empty() {
        return Err(Error::MissingDirectoryURL("new account"));
    }
    if directory.new_order_url.is_empty() {
        return Err(Error::MissingDirectoryURL("new order"));
    }
    Ok(directory)
}

fn problem_error(status: StatusCode, method: &str, url: &str, body: &[u8]) -> Error {
    let mut problem: ProblemDetails =
        serde_json::from_slice(body).unwrap_or_else(|_| ProblemDetails {
            detail: String::from_utf8_lossy(body).into_owned(),
            ..ProblemDetails::default()
        });
    problem.http_status = status.as_u16();
    problem.method = method.to_string();
    problem.url = url.to_string();

    if problem.is_bad_nonce() {
        Error::BadNonce(problem)
    } else {
        Error::Problem(problem)
    }
}

async fn read_limited(
    mut resp: reqwest::Response,
    url: &str,
    limit: usize,
) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(Error::ResponseTooLarge(url.to_string(), limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn decode<R: DeserializeOwned>(body: &[u8]) -> Result<R, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_slice(b"{}")?);
    }
    Ok(serde_json::from_slice(body)?)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Every `Link` target with the given `rel`, resolved against `base`.
#[must_use]
pub fn links(headers: &HeaderMap, base: &str, rel: &str) -> Vec<String> {
    let wanted = format!("rel=\"{rel}\"");
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|link| {
            let mut parts = link.split(';').map(str::trim);
            let target = parts.next()?.strip_prefix('<')?.strip_suffix('>')?;
            parts
                .any(|p| p.replace(' ', "") == wanted)
                .then(|| resolve(base, target))
        })
        .collect()
}

fn resolve(base: &str, target: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(target))
        .map_or_else(|_| target.to_string(), String::from)
}
