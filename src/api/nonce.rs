use crate::error::Error;
use reqwest::header::HeaderMap;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

pub(crate) const REPLAY_NONCE: &str = "Replay-Nonce";

/// Pool of unused anti-replay nonces.
///
/// Every response the CA sends carries a fresh nonce which is pushed here; signers pop the
/// oldest one and only fall back to a `HEAD` on the new-nonce URL when the pool is empty. The
/// mutex guards pool mutation only and is never held across a network call.
#[derive(Debug)]
pub struct NonceManager {
    http: reqwest::Client,
    new_nonce_url: String,
    pool: Mutex<VecDeque<String>>,
}

impl NonceManager {
    pub(crate) fn new(http: reqwest::Client, new_nonce_url: &str) -> Self {
        NonceManager {
            http,
            new_nonce_url: new_nonce_url.to_string(),
            pool: Mutex::new(VecDeque::new()),
        }
    }

    /// Take a nonce from the pool, or fetch a new one from the CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the new-nonce request fails, or [`Error::MissingNonce`] if the
    /// response carries no `Replay-Nonce` header.
    pub async fn nonce(&self) -> Result<String, Error> {
        if let Some(nonce) = self.pop() {
            return Ok(nonce);
        }
        self.fetch().await
    }

    /// Remember the `Replay-Nonce` of a response, if it has one.
    pub fn push_from(&self, headers: &HeaderMap) {
        if let Some(nonce) = nonce_from_headers(headers) {
            self.push(nonce);
        }
    }

    pub fn push(&self, nonce: String) {
        self.lock().push_back(nonce);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch(&self) -> Result<String, Error> {
        tracing::debug!("fetching a new nonce from {}", self.new_nonce_url);
        let resp = self.http.head(&self.new_nonce_url).send().await?;
        nonce_from_headers(resp.headers()).ok_or(Error::MissingNonce)
    }
}

fn nonce_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REPLAY_NONCE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}
