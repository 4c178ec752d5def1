use crate::acme::{Account, ExtendedAccount, Status};
use crate::api::Core;
use crate::error::Error;
use reqwest::StatusCode;

impl Core {
    /// Create (or, on `409 Conflict`, look up) the account for the signing key. The returned
    /// `Location` becomes the signer's `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the account.
    pub async fn new_account(&self, req: &Account) -> Result<ExtendedAccount, Error> {
        let url = &self.directory().new_account_url;
        let resp = self
            .post_accepting::<_, Account>(url, req, StatusCode::CONFLICT)
            .await?;
        if resp.status == StatusCode::CONFLICT {
            tracing::debug!("account already exists at {url}");
        }

        let location = resp.location().unwrap_or_default();
        if !location.is_empty() {
            self.jws().set_kid(&location);
        }
        Ok(ExtendedAccount {
            account: resp.body,
            location,
        })
    }

    /// Fetch the account at `account_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the request.
    pub async fn get_account(&self, account_url: &str) -> Result<Account, Error> {
        Ok(self.post::<_, Account>(account_url, &Account::default()).await?.body)
    }

    /// Update the account at `account_url` with the fields set in `req`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the update.
    pub async fn update_account(&self, account_url: &str, req: &Account) -> Result<Account, Error> {
        Ok(self.post::<_, Account>(account_url, req).await?.body)
    }

    /// Deactivate the account at `account_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the deactivation.
    pub async fn deactivate_account(&self, account_url: &str) -> Result<Account, Error> {
        let req = Account {
            status: Some(Status::Deactivated),
            ..Account::default()
        };
        Ok(self.post::<_, Account>(account_url, &req).await?.body)
    }
}
