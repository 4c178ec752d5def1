use crate::acme::{CSRMessage, Identifier, Order, OrderResource};
use crate::api::jws::BASE64_URL;
use crate::api::Core;
use crate::error::Error;
use base64::Engine;

impl Core {
    /// Create an order for `domains`. The order URL is taken from the `Location` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLocation`] if the CA doesn't say where the order lives, or
    /// [`Error::Problem`] if it refuses the order.
    pub async fn new_order(&self, domains: &[String]) -> Result<OrderResource, Error> {
        #[derive(serde::Serialize)]
        struct NewOrder {
            identifiers: Vec<Identifier>,
        }

        let url = &self.directory().new_order_url;
        let req = NewOrder {
            identifiers: domains.iter().map(|d| Identifier::dns(d)).collect(),
        };
        let resp = self.post::<_, Order>(url, &req).await?;
        let location = resp
            .location()
            .ok_or_else(|| Error::MissingLocation(url.clone()))?;
        Ok(OrderResource {
            order: resp.body,
            url: location,
            domains: domains.to_vec(),
        })
    }

    /// Fetch the current state of the order at `order_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the request.
    pub async fn get_order(&self, order_url: &str) -> Result<Order, Error> {
        Ok(self.post_as_get::<Order>(order_url).await?.body)
    }

    /// Submit the DER encoded `csr` to the order's finalize URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the CSR.
    pub async fn finalize_order(&self, finalize_url: &str, csr: &[u8]) -> Result<Order, Error> {
        let req = CSRMessage {
            csr: BASE64_URL.encode(csr),
        };
        Ok(self.post::<_, Order>(finalize_url, &req).await?.body)
    }
}
