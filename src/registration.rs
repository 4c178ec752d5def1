//! Account lifecycle on top of the signed transport.

use crate::acme::{Account, ExtendedAccount};
use crate::api::SharedCore;
use crate::error::Error;
use std::sync::{PoisonError, RwLock};

/// External Account Binding credentials issued by the CA.
#[derive(Debug, Clone)]
pub struct EabOptions {
    pub kid: String,
    /// Base64url encoded MAC key.
    pub hmac_encoded: String,
}

/// Registers, resolves, queries and deactivates the account of the [`crate::api::Core`] key.
#[derive(Debug)]
pub struct Registrar {
    core: SharedCore,
    email: Option<String>,
    registration: RwLock<Option<ExtendedAccount>>,
}

impl Registrar {
    #[must_use]
    pub fn new(core: SharedCore, email: Option<String>) -> Self {
        Registrar {
            core,
            email,
            registration: RwLock::default(),
        }
    }

    /// The last account resource returned by the CA.
    #[must_use]
    pub fn registration(&self) -> Option<ExtendedAccount> {
        self.registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a new account. An existing account for the key is accepted as-is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the registration.
    pub async fn register(&self, tos_agreed: bool) -> Result<ExtendedAccount, Error> {
        self.register_account(tos_agreed, None).await
    }

    /// Register a new account bound to an external account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyRejected`] for a MAC key that isn't base64url, [`Error::Problem`]
    /// when the CA refuses the registration.
    pub async fn register_with_eab(
        &self,
        tos_agreed: bool,
        eab: &EabOptions,
    ) -> Result<ExtendedAccount, Error> {
        self.register_account(tos_agreed, Some(eab)).await
    }

    async fn register_account(
        &self,
        tos_agreed: bool,
        eab: Option<&EabOptions>,
    ) -> Result<ExtendedAccount, Error> {
        tracing::info!(
            "acme: Registering account for {}",
            self.email.as_deref().unwrap_or("<no email>")
        );

        let mut req = Account {
            contact: self.contact(),
            terms_of_service_agreed: tos_agreed,
            ..Account::default()
        };
        if let Some(eab) = eab {
            let url = &self.core.directory().new_account_url;
            let binding = self
                .core
                .jws()
                .sign_eab_content(url, &eab.kid, &eab.hmac_encoded)?;
            req.external_account_binding = Some(serde_json::to_value(binding)?);
        }

        let account = self.core.new_account(&req).await?;
        self.store(account.clone());
        Ok(account)
    }

    /// Look up the account already registered for the key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLocation`] when the CA doesn't return the account URL,
    /// [`Error::Problem`] when no account exists for the key.
    pub async fn resolve_account_by_key(&self) -> Result<ExtendedAccount, Error> {
        tracing::info!("acme: Trying to resolve account by key");

        let req = Account {
            only_return_existing: true,
            ..Account::default()
        };
        let found = self.core.new_account(&req).await?;
        if found.location.is_empty() {
            return Err(Error::MissingLocation(
                self.core.directory().new_account_url.clone(),
            ));
        }
        self.core.jws().set_kid(&found.location);

        let account = ExtendedAccount {
            account: self.core.get_account(&found.location).await?,
            location: found.location,
        };
        self.store(account.clone());
        Ok(account)
    }

    /// Refresh the account resource from the CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAccount`] before registration, [`Error::Problem`] when the CA refuses
    /// the request.
    pub async fn query_registration(&self) -> Result<ExtendedAccount, Error> {
        let location = self.location()?;
        tracing::info!("acme: Querying account for {location}");

        let account = ExtendedAccount {
            account: self.core.get_account(&location).await?,
            location,
        };
        self.store(account.clone());
        Ok(account)
    }

    /// Update the account's contact information, keeping the configured email when `email` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAccount`] before registration, [`Error::Problem`] when the CA refuses
    /// the update.
    pub async fn update_registration(&self, email: Option<&str>) -> Result<ExtendedAccount, Error> {
        let location = self.location()?;
        tracing::info!("acme: Updating account for {location}");

        let contact = match email {
            Some(email) => vec![format!("mailto:{email}")],
            None => self.contact(),
        };
        let req = Account {
            contact,
            ..Account::default()
        };
        let account = ExtendedAccount {
            account: self.core.update_account(&location, &req).await?,
            location,
        };
        self.store(account.clone());
        Ok(account)
    }

    /// Deactivate the account. The CA won't accept requests signed for it afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAccount`] before registration, [`Error::Problem`] when the CA refuses
    /// the deactivation.
    pub async fn delete_registration(&self) -> Result<(), Error> {
        let location = self.location()?;
        tracing::info!("acme: Deleting account for {location}");

        let account = self.core.deactivate_account(&location).await?;
        self.store(ExtendedAccount { account, location });
        Ok(())
    }

    fn contact(&self) -> Vec<String> {
        self.email
            .iter()
            .filter(|e| !e.is_empty())
            .map(|e| format!("mailto:{e}"))
            .collect()
    }

    fn location(&self) -> Result<String, Error> {
        self.registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.location.clone())
            .filter(|l| !l.is_empty())
            .or_else(|| self.core.jws().kid())
            .ok_or(Error::NoAccount)
    }

    fn store(&self, account: ExtendedAccount) {
        *self
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(account);
    }
}
