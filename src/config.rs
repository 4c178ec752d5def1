use crate::api::jws::KeyType;
use crate::error::Error;
use crate::registration::EabOptions;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub type SharedConfig = Arc<Config>;

pub const LETS_ENCRYPT_DIRECTORY_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub ca_dir_url: String,
    pub email: Option<String>,
    /// PEM account key. A P-256 key is generated, and written here, when the file is missing.
    pub account_key_path: Option<PathBuf>,
    /// Key type for generated certificate keys.
    pub key_type: KeyType,
    pub user_agent: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub http_timeout: Duration,
    /// Serve HTTP-01 challenges from a built-in server bound here.
    pub http01_bind_addr: Option<SocketAddr>,
    pub domains: Vec<String>,
    pub bundle: bool,
    pub must_staple: bool,
    pub eab: Option<EabConfig>,
    pub dns: DnsConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EabConfig {
    pub kid: String,
    pub hmac_encoded: String,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DnsConfig {
    /// Recursive nameservers as `ip` or `ip:port`. Read from the system resolver configuration
    /// when empty.
    pub nameservers: Vec<String>,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    /// Check DNS-01 propagation against the recursive nameservers instead of the zone's
    /// authoritative ones.
    pub disable_authoritative_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ca_dir_url: LETS_ENCRYPT_DIRECTORY_URL.to_string(),
            email: None,
            account_key_path: None,
            key_type: KeyType::EC256,
            user_agent: format!("certcrab/{}", env!("CARGO_PKG_VERSION")),
            http_timeout: Duration::from_secs(30),
            http01_bind_addr: None,
            domains: Vec::new(),
            bundle: true,
            must_staple: false,
            eab: None,
            dns: DnsConfig::default(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            nameservers: Vec::new(),
            timeout: Duration::from_secs(10),
            disable_authoritative_check: false,
        }
    }
}

impl From<&EabConfig> for EabOptions {
    fn from(eab: &EabConfig) -> Self {
        EabOptions {
            kid: eab.kid.clone(),
            hmac_encoded: eab.hmac_encoded.clone(),
        }
    }
}

impl Config {
    /// Load a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IO`] or [`Error::InvalidJSON`] for an unreadable file, [`Error::Config`]
    /// for values that don't make sense together.
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.validate()?;
        Ok(conf)
    }

    /// A `reqwest` client honouring the user agent and timeout settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the TLS backend can't be initialised.
    pub fn http_client(&self) -> Result<reqwest::Client, Error> {
        Ok(reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.http_timeout)
            .build()?)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.ca_dir_url.is_empty() {
            return Err(Error::Config("ca_dir_url must be set".to_string()));
        }
        if self.eab.as_ref().is_some_and(|eab| eab.kid.is_empty() || eab.hmac_encoded.is_empty()) {
            return Err(Error::Config(
                "eab requires both kid and hmac_encoded".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_defaults() {
        let conf: Config = serde_json::from_str(r#"{"domains": ["example.com"]}"#).unwrap();
        assert_eq!(conf.ca_dir_url, LETS_ENCRYPT_DIRECTORY_URL);
        assert_eq!(conf.http_timeout, Duration::from_secs(30));
        assert_eq!(conf.dns.timeout, Duration::from_secs(10));
        assert_eq!(conf.key_type, KeyType::EC256);
        assert!(conf.bundle);
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn durations_are_seconds() {
        let conf: Config = serde_json::from_str(
            r#"{
                "http_timeout": 5,
                "http01_bind_addr": "127.0.0.1:5002",
                "key_type": "EC384",
                "dns": {"nameservers": ["1.1.1.1"], "timeout": 2, "disable_authoritative_check": true}
            }"#,
        )
        .unwrap();
        assert_eq!(conf.http_timeout, Duration::from_secs(5));
        assert_eq!(conf.dns.timeout, Duration::from_secs(2));
        assert_eq!(conf.key_type, KeyType::EC384);
        assert!(conf.dns.disable_authoritative_check);
        assert_eq!(conf.http01_bind_addr, Some("127.0.0.1:5002".parse().unwrap()));
    }

    #[test]
    fn partial_eab_rejected() {
        let conf: Config =
            serde_json::from_str(r#"{"eab": {"kid": "kid-1", "hmac_encoded": ""}}"#).unwrap();
        assert!(matches!(conf.validate(), Err(Error::Config(_))));
    }
}
