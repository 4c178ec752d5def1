use crate::acme::RevokeCertMessage;
use crate::api::jws::BASE64_URL;
use crate::api::{links, Core};
use crate::error::Error;
use base64::Engine;

/// Read cap for certificate resources.
pub const MAX_CERT_SIZE: usize = 1024 * 1024;

const PEM_BEGIN: &[u8] = b"-----BEGIN";

/// Certificate bytes as returned by the CA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCertificate {
    /// The leaf certificate, followed by the issuer chain when a bundle was requested.
    pub cert: Vec<u8>,
    /// The issuer certificate(s), empty when they couldn't be determined.
    pub issuer: Vec<u8>,
}

impl Core {
    /// Download the certificate at `cert_url`.
    ///
    /// The issuer is taken from the `Link: <..>; rel="up"` target when the CA sends one, and
    /// otherwise split off the downloaded PEM chain. Failing to fetch the issuer is logged and
    /// leaves [`RawCertificate::issuer`] empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the download, or
    /// [`Error::ResponseTooLarge`] when the body exceeds [`MAX_CERT_SIZE`].
    pub async fn get_certificate(
        &self,
        cert_url: &str,
        bundle: bool,
    ) -> Result<RawCertificate, Error> {
        let resp = self.post_as_get_raw(cert_url, MAX_CERT_SIZE).await?;
        let body = resp.body;
        let (leaf, chain) = split_first_pem(&body);

        if let Some(up) = links(&resp.headers, cert_url, "up").into_iter().next() {
            let issuer = match self.get_issuer(&up).await {
                Ok(issuer) => issuer,
                Err(err) => {
                    tracing::warn!("acme: could not bundle issuer certificate [{cert_url}]: {err}");
                    return Ok(RawCertificate {
                        cert: if bundle { body.clone() } else { leaf.to_vec() },
                        issuer: chain.to_vec(),
                    });
                }
            };
            let mut cert = leaf.to_vec();
            if bundle {
                if chain.is_empty() {
                    cert.extend_from_slice(&issuer);
                } else {
                    cert.extend_from_slice(chain);
                }
            }
            return Ok(RawCertificate { cert, issuer });
        }

        Ok(RawCertificate {
            cert: if bundle { body.clone() } else { leaf.to_vec() },
            issuer: chain.to_vec(),
        })
    }

    /// Revoke the DER encoded certificate `cert_der`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Problem`] when the CA refuses the revocation.
    pub async fn revoke_certificate(
        &self,
        cert_der: &[u8],
        reason: Option<u8>,
    ) -> Result<(), Error> {
        let req = RevokeCertMessage {
            certificate: BASE64_URL.encode(cert_der),
            reason,
        };
        self.post::<_, serde_json::Value>(&self.directory().revoke_cert_url, &req)
            .await?;
        Ok(())
    }

    async fn get_issuer(&self, up_url: &str) -> Result<Vec<u8>, Error> {
        let data = self.post_as_get_raw(up_url, MAX_CERT_SIZE).await?.body;
        if data.starts_with(PEM_BEGIN) {
            return Ok(data);
        }
        Ok(crate::crypto::encode_pem(&pem::Pem::new("CERTIFICATE", data)).into_bytes())
    }
}

/// Split a PEM chain after its first block.
fn split_first_pem(data: &[u8]) -> (&[u8], &[u8]) {
    let second = data
        .windows(PEM_BEGIN.len())
        .enumerate()
        .skip(1)
        .find(|(_, w)| *w == PEM_BEGIN)
        .map(|(i, _)| i);
    match second {
        Some(i) => data.split_at(i),
        None => (data, &data[data.len()..]),
    }
}
