use crate::acme::{Challenge, ExtendedChallenge};
use crate::api::{links, Core, Signed};
use crate::error::Error;

impl Core {
    /// Ask the CA to start validating the challenge at `chlg_url` by POSTing `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the request.
    pub async fn trigger_challenge(&self, chlg_url: &str) -> Result<ExtendedChallenge, Error> {
        let resp = self
            .post::<_, Challenge>(chlg_url, &serde_json::json!({}))
            .await?;
        Ok(extend(chlg_url, resp))
    }

    /// Fetch the current state of the challenge at `chlg_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the request.
    pub async fn get_challenge(&self, chlg_url: &str) -> Result<ExtendedChallenge, Error> {
        let resp = self.post_as_get::<Challenge>(chlg_url).await?;
        Ok(extend(chlg_url, resp))
    }
}

fn extend(url: &str, resp: Signed<Challenge>) -> ExtendedChallenge {
    ExtendedChallenge {
        retry_after: resp.retry_after(),
        authorization_url: links(&resp.headers, url, "up").into_iter().next(),
        challenge: resp.body,
    }
}
