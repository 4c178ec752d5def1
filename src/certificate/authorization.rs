use crate::acme::{Authorization, OrderResource, Status};
use crate::certificate::Certifier;
use crate::error::{Error, ObtainError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Requests per second the CA accepts on the authorization endpoints.
pub const OVERALL_REQUEST_LIMIT: u32 = 18;

impl Certifier {
    /// Fetch every authorization of `order` concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Obtain`] keyed by each domain whose authorization couldn't be fetched.
    pub async fn fetch_authorizations(
        &self,
        order: &OrderResource,
    ) -> Result<Vec<Authorization>, Error> {
        let (authzs, failures) = self.collect_authorizations(order).await;
        failures.into_result()?;
        Ok(authzs)
    }

    /// Fetch every authorization of `order`, one task each, with launches spaced
    /// `1s / OVERALL_REQUEST_LIMIT` apart. Exactly one result is drained per authorization URL.
    ///
    /// A failed fetch is keyed by the identifier at the same position in the order, or by the
    /// authorization URL when there is none.
    pub async fn collect_authorizations(
        &self,
        order: &OrderResource,
    ) -> (Vec<Authorization>, ObtainError) {
        let urls = &order.order.authorizations;
        let (ok_tx, mut ok_rx) = mpsc::unbounded_channel::<Authorization>();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<(String, Error)>();
        let delay = Duration::from_secs(1) / OVERALL_REQUEST_LIMIT;

        for (i, url) in urls.iter().enumerate() {
            tokio::time::sleep(delay).await;

            let core = self.core.clone();
            let url = url.clone();
            let domain = authorization_domain(order, i, &url);
            let (ok_tx, err_tx) = (ok_tx.clone(), err_tx.clone());
            tokio::spawn(async move {
                match core.get_authorization(&url).await {
                    Ok(authz) => {
                        let _ = ok_tx.send(authz);
                    }
                    Err(err) => {
                        let _ = err_tx.send((domain, err));
                    }
                }
            });
        }
        drop((ok_tx, err_tx));

        let mut authzs = Vec::with_capacity(urls.len());
        let mut failures = ObtainError::new();
        for _ in 0..urls.len() {
            tokio::select! {
                Some(authz) = ok_rx.recv() => authzs.push(authz),
                Some((domain, err)) = err_rx.recv() => failures.insert(domain, err),
                else => break,
            }
        }

        for (i, url) in urls.iter().enumerate() {
            tracing::info!("[{}] AuthURL: {url}", authorization_domain(order, i, url));
        }
        (authzs, failures)
    }

    /// Deactivate the order's authorizations that are still pending. Failures are logged.
    pub async fn deactivate_authorizations(&self, order: &OrderResource) {
        for url in &order.order.authorizations {
            let authz = match self.core.get_authorization(url).await {
                Ok(authz) => authz,
                Err(err) => {
                    tracing::info!("Unable to get the authorization for {url}: {err}");
                    continue;
                }
            };
            if authz.status != Status::Pending {
                tracing::debug!("Skipping deactivation of {} auth: {url}", authz.status);
                continue;
            }

            tracing::info!("Deactivating auth: {url}");
            if let Err(err) = self.core.deactivate_authorization(url).await {
                tracing::warn!("Unable to deactivate the authorization {url}: {err}");
            }
        }
    }
}

/// The domain the `i`th authorization of `order` is for, used to key fetch failures before the
/// authorization itself is known.
///
/// CAs list authorizations in identifier order, but RFC 8555 doesn't require it, so a failure
/// may be reported under a sibling domain of the same order. Successful fetches carry their own
/// identifier and are unaffected. Falls back to the URL when the order lists fewer identifiers
/// than authorizations.
fn authorization_domain(order: &OrderResource, i: usize, url: &str) -> String {
    order
        .order
        .identifiers
        .get(i)
        .map(|ident| ident.value.clone())
        .or_else(|| order.domains.get(i).cloned())
        .unwrap_or_else(|| url.to_string())
}
