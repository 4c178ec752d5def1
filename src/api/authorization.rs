use crate::acme::{Authorization, Status};
use crate::api::Core;
use crate::error::Error;

impl Core {
    /// Fetch the authorization at `authz_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the request.
    pub async fn get_authorization(&self, authz_url: &str) -> Result<Authorization, Error> {
        Ok(self.post_as_get::<Authorization>(authz_url).await?.body)
    }

    /// Deactivate the authorization at `authz_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the deactivation.
    pub async fn deactivate_authorization(&self, authz_url: &str) -> Result<Authorization, Error> {
        #[derive(serde::Serialize)]
        struct Deactivate {
            status: Status,
        }

        let req = Deactivate {
            status: Status::Deactivated,
        };
        Ok(self.post::<_, Authorization>(authz_url, &req).await?.body)
    }
}
