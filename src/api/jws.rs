//! JSON Web Signatures over ACME request bodies.
//!
//! Every request to the CA is a flattened JWS whose protected header names the destination
//! `url`, an anti-replay `nonce` and the signing key. Before the account is registered the key
//! is embedded as a `jwk`; afterwards the account URI is referenced as `kid`.

use crate::error::Error;
use base64::engine::general_purpose;
use base64::{alphabet, engine, Engine};
use lazy_static::lazy_static;
use pem::Pem;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, RsaKeyPair, RsaPublicKeyComponents, ECDSA_P256_SHA256_FIXED_SIGNING,
    ECDSA_P384_SHA384_FIXED_SIGNING, RSA_PKCS1_SHA256,
};
use ring::{digest, hmac};
use serde::Serialize;
use std::sync::{PoisonError, RwLock};

lazy_static! {
    pub(crate) static ref BASE64_URL: engine::GeneralPurpose =
        engine::GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);
}

/// Key types [`AccountKey::generate`] can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum KeyType {
    EC256,
    EC384,
}

/// A private key able to sign ACME requests.
///
/// RSA keys sign with `RS256`, EC P-256 keys with `ES256` and EC P-384 keys with `ES384`.
pub struct AccountKey {
    inner: KeyInner,
    pkcs8_or_der: Pem,
    rng: SystemRandom,
}

enum KeyInner {
    Rsa(RsaKeyPair),
    P256(EcdsaKeyPair),
    P384(EcdsaKeyPair),
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey")
            .field("alg", &self.algorithm())
            .finish_non_exhaustive()
    }
}

impl AccountKey {
    /// Generate a fresh EC key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyRejected`] if the system RNG fails.
    pub fn generate(key_type: KeyType) -> Result<Self, Error> {
        let rng = SystemRandom::new();
        let alg = match key_type {
            KeyType::EC256 => &ECDSA_P256_SHA256_FIXED_SIGNING,
            KeyType::EC384 => &ECDSA_P384_SHA384_FIXED_SIGNING,
        };
        let doc = EcdsaKeyPair::generate_pkcs8(alg, &rng)
            .map_err(|_| Error::KeyRejected("key generation failed".to_string()))?;
        Self::from_pkcs8_der(doc.as_ref())
    }

    /// Load a key from PEM. Accepts PKCS#8 (`PRIVATE KEY`) RSA and EC keys, and PKCS#1
    /// (`RSA PRIVATE KEY`) RSA keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pem`] for malformed PEM and [`Error::UnsupportedKeyType`] for any other
    /// key material.
    pub fn from_pem(data: &str) -> Result<Self, Error> {
        let block = pem::parse(data)?;
        match block.tag() {
            "PRIVATE KEY" => Self::from_pkcs8_der(block.contents()),
            "RSA PRIVATE KEY" => {
                let key = RsaKeyPair::from_der(block.contents())
                    .map_err(|e| Error::KeyRejected(e.to_string()))?;
                Ok(Self {
                    inner: KeyInner::Rsa(key),
                    pkcs8_or_der: block,
                    rng: SystemRandom::new(),
                })
            }
            _ => Err(Error::UnsupportedKeyType),
        }
    }

    /// Load a PKCS#8 DER encoded key, detecting its type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedKeyType`] when the key is neither RSA, EC P-256 nor EC P-384.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, Error> {
        let rng = SystemRandom::new();
        let inner = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
            .map(KeyInner::P256)
            .or_else(|_| {
                EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, der, &rng)
                    .map(KeyInner::P384)
            })
            .or_else(|_| RsaKeyPair::from_pkcs8(der).map(KeyInner::Rsa))
            .map_err(|_| Error::UnsupportedKeyType)?;
        Ok(Self {
            inner,
            pkcs8_or_der: Pem::new("PRIVATE KEY", der.to_vec()),
            rng,
        })
    }

    /// PEM encoding of the key as it was loaded or generated.
    #[must_use]
    pub fn to_pem(&self) -> String {
        crate::crypto::encode_pem(&self.pkcs8_or_der)
    }

    /// The JWS `alg` value for this key.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match self.inner {
            KeyInner::Rsa(_) => "RS256",
            KeyInner::P256(_) => "ES256",
            KeyInner::P384(_) => "ES384",
        }
    }

    /// The public half of the key as a JWK.
    #[must_use]
    pub fn jwk(&self) -> Jwk {
        match &self.inner {
            KeyInner::Rsa(k) => {
                let components = RsaPublicKeyComponents::<Vec<u8>>::from(k.public());
                Jwk::Rsa {
                    e: BASE64_URL.encode(components.e),
                    kty: "RSA",
                    n: BASE64_URL.encode(components.n),
                }
            }
            KeyInner::P256(k) => ec_jwk("P-256", k.public_key().as_ref()),
            KeyInner::P384(k) => ec_jwk("P-384", k.public_key().as_ref()),
        }
    }

    /// The [RFC-7638](https://www.rfc-editor.org/rfc/rfc7638) SHA-256 JWK thumbprint,
    /// base64url encoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJSON`] if the JWK can't be serialized.
    pub fn thumbprint(&self) -> Result<String, Error> {
        let canonical = serde_json::to_vec(&self.jwk())?;
        Ok(BASE64_URL.encode(digest::digest(&digest::SHA256, &canonical)))
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        match &self.inner {
            KeyInner::Rsa(k) => {
                let mut signature = vec![0; k.public().modulus_len()];
                k.sign(&RSA_PKCS1_SHA256, &self.rng, message, &mut signature)
                    .map_err(|_| Error::Signing)?;
                Ok(signature)
            }
            KeyInner::P256(k) | KeyInner::P384(k) => k
                .sign(&self.rng, message)
                .map(|s| s.as_ref().to_vec())
                .map_err(|_| Error::Signing),
        }
    }
}

fn ec_jwk(crv: &'static str, point: &[u8]) -> Jwk {
    // Uncompressed SEC1 point: 0x04 || X || Y.
    let coords = &point[1..];
    let (x, y) = coords.split_at(coords.len() / 2);
    Jwk::Ec {
        crv,
        kty: "EC",
        x: BASE64_URL.encode(x),
        y: BASE64_URL.encode(y),
    }
}

/// A public JSON Web Key. Members are declared in lexicographic order so the serialized form
/// is the canonical thumbprint input.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Jwk {
    Rsa {
        e: String,
        kty: &'static str,
        n: String,
    },
    Ec {
        crv: &'static str,
        kty: &'static str,
        x: String,
        y: String,
    },
}

#[derive(Serialize)]
struct Protected<'a> {
    alg: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
    url: &'a str,
}

/// A flattened JWS, ready to be sent as an `application/jose+json` body.
#[derive(Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FlattenedJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Builds signed request bodies for one account key.
#[derive(Debug)]
pub struct Jws {
    key: AccountKey,
    kid: RwLock<Option<String>>,
}

impl Jws {
    #[must_use]
    pub fn new(key: AccountKey) -> Self {
        Jws {
            key,
            kid: RwLock::new(None),
        }
    }

    /// Use `kid` as the signer identity for every subsequent request.
    pub fn set_kid(&self, kid: &str) {
        *self.kid.write().unwrap_or_else(PoisonError::into_inner) = Some(kid.to_string());
    }

    #[must_use]
    pub fn kid(&self) -> Option<String> {
        self.kid.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    /// Sign `content` for `url`. An empty `content` yields the empty payload used by
    /// POST-as-GET requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if the key fails to sign.
    pub fn sign_content(
        &self,
        url: &str,
        nonce: &str,
        content: &[u8],
    ) -> Result<FlattenedJws, Error> {
        let kid = self.kid();
        let protected = Protected {
            alg: self.key.algorithm(),
            jwk: kid.is_none().then(|| self.key.jwk()),
            kid: kid.as_deref(),
            nonce: Some(nonce),
            url,
        };
        self.finish(&protected, content)
    }

    /// Build the External Account Binding JWS: the account JWK, signed with HS256 under the
    /// CA-issued MAC key (`hmac_encoded`, base64url) and identified by the CA-issued `eab_kid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyRejected`] if `hmac_encoded` isn't valid base64url.
    pub fn sign_eab_content(
        &self,
        url: &str,
        eab_kid: &str,
        hmac_encoded: &str,
    ) -> Result<FlattenedJws, Error> {
        let mac_key = BASE64_URL
            .decode(hmac_encoded.trim_end_matches('='))
            .map_err(|e| Error::KeyRejected(format!("invalid EAB MAC key: {e}")))?;
        let protected = BASE64_URL.encode(serde_json::to_vec(&Protected {
            alg: "HS256",
            jwk: None,
            kid: Some(eab_kid),
            nonce: None,
            url,
        })?);
        let payload = BASE64_URL.encode(serde_json::to_vec(&self.key.jwk())?);
        let key = hmac::Key::new(hmac::HMAC_SHA256, &mac_key);
        let tag = hmac::sign(&key, format!("{protected}.{payload}").as_bytes());
        Ok(FlattenedJws {
            protected,
            payload,
            signature: BASE64_URL.encode(tag.as_ref()),
        })
    }

    fn finish(&self, protected: &Protected<'_>, content: &[u8]) -> Result<FlattenedJws, Error> {
        let protected = BASE64_URL.encode(serde_json::to_vec(protected)?);
        let payload = if content.is_empty() {
            String::new()
        } else {
            BASE64_URL.encode(content)
        };
        let signature = self.key.sign(format!("{protected}.{payload}").as_bytes())?;
        Ok(FlattenedJws {
            protected,
            payload,
            signature: BASE64_URL.encode(signature),
        })
    }
}
