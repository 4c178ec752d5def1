use crate::acme::{Order, OrderResource, Status};
use crate::certificate::{CertificateResource, Certifier};
use crate::error::Error;
use std::time::Duration;

/// How often a finalized order is polled.
pub const FINALIZE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// How long a finalized order may take to become valid.
pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(30);

impl Certifier {
    /// Finalize `order` with the DER encoded `csr` and download the issued certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderInvalid`] when the CA rejects the order,
    /// [`Error::FinalizeTimeout`] when it doesn't become valid in time, or the download error.
    pub async fn get_for_csr(
        &self,
        order: &OrderResource,
        csr: &[u8],
        private_key: Option<Vec<u8>>,
        bundle: bool,
    ) -> Result<CertificateResource, Error> {
        let finalized = self.core.finalize_order(&order.order.finalize, csr).await?;

        let valid = match finalized.status {
            Status::Valid => finalized,
            Status::Invalid => return Err(order_invalid(&order.url, finalized)),
            _ => self.wait_for_order(&order.url).await?,
        };

        let raw = self.core.get_certificate(&valid.certificate, bundle).await?;
        Ok(CertificateResource {
            domain: order.domains.first().cloned().unwrap_or_default(),
            cert_url: valid.certificate,
            cert_stable_url: order.url.clone(),
            private_key,
            certificate: raw.cert,
            issuer_certificate: raw.issuer,
            csr: None,
        })
    }

    /// Poll the order every [`FINALIZE_POLL_INTERVAL`] until it is valid, for at most
    /// [`FINALIZE_TIMEOUT`].
    async fn wait_for_order(&self, order_url: &str) -> Result<Order, Error> {
        tracing::info!(
            "Wait for certificate [timeout: {FINALIZE_TIMEOUT:?}, interval: {FINALIZE_POLL_INTERVAL:?}]"
        );
        let poll = async {
            let mut ticker = tokio::time::interval(FINALIZE_POLL_INTERVAL);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let order = self.core.get_order(order_url).await?;
                match order.status {
                    Status::Valid => return Ok(order),
                    Status::Invalid => return Err(order_invalid(order_url, order)),
                    _ => tracing::debug!("order {order_url} is {}", order.status),
                }
            }
        };
        tokio::time::timeout(FINALIZE_TIMEOUT, poll)
            .await
            .map_err(|_| Error::FinalizeTimeout)?
    }
}

fn order_invalid(url: &str, order: Order) -> Error {
    Error::OrderInvalid {
        url: url.to_string(),
        problem: order.error,
    }
}
