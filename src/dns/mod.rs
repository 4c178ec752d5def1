//! Zone apex discovery and DNS-01 record lookups.
//!
//! # Finding a zone
//!
//! [`ZoneResolver::find_zone_by_fqdn`] walks the label boundaries of a FQDN from the most to the
//! least specific suffix and asks the recursive nameservers for an `SOA` record at each one:
//!
//! ```text
//! _acme-challenge.www.example.com.   NOERROR, SOA only in authority   -> next
//! www.example.com.                   NOERROR, CNAME in answer          -> next
//! example.com.                       NOERROR, SOA in answer            -> zone apex
//! ```
//!
//! `NXDOMAIN` moves on to the next candidate; any other response code aborts. A suffix whose
//! answer contains a `CNAME` is skipped since a CNAME can't live at a zone apex.
//!
//! Results are cached per FQDN for the lifetime of the resolver, see
//! [`ZoneResolver::clear_fqdn_cache`].
//!
//! # Nameservers
//!
//! Queries go to the configured recursive nameservers, each query making up to N+1 attempts
//! for N nameservers and retrying over TCP when a UDP answer is truncated.

mod query;

use crate::config::DnsConfig;
use crate::error::Error;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use trust_dns_client::op::ResponseCode;
use trust_dns_client::rr::{Name, RData, RecordType};
use trust_dns_proto::xfer::DnsResponse;
use trust_dns_resolver::system_conf::read_system_conf;

const DEFAULT_NAMESERVERS: [Ipv4Addr; 2] = [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)];
const MAX_CNAME_HOPS: usize = 50;

#[allow(clippy::module_name_repetitions)]
pub type SharedResolver = Arc<ZoneResolver>;

/// The SOA facts cached per FQDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoaEntry {
    /// Zone apex, fully qualified.
    pub zone: String,
    /// Primary nameserver from the SOA `MNAME`, fully qualified.
    pub primary_ns: String,
}

/// Recursive DNS lookups with a FQDN → zone cache.
#[derive(Debug)]
pub struct ZoneResolver {
    nameservers: Vec<SocketAddr>,
    timeout: Duration,
    disable_authoritative_check: bool,
    cache: Mutex<HashMap<String, SoaEntry>>,
}

impl ZoneResolver {
    #[must_use]
    pub fn new(nameservers: Vec<SocketAddr>, timeout: Duration) -> Self {
        ZoneResolver {
            nameservers,
            timeout,
            disable_authoritative_check: false,
            cache: Mutex::default(),
        }
    }

    /// Build a resolver from config, falling back to the system nameservers when none are
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a configured nameserver isn't an `ip` or `ip:port`.
    pub fn from_config(config: &DnsConfig) -> Result<Self, Error> {
        let nameservers = if config.nameservers.is_empty() {
            system_nameservers()
        } else {
            config
                .nameservers
                .iter()
                .map(|ns| parse_nameserver(ns))
                .collect::<Result<_, _>>()?
        };
        let mut resolver = Self::new(nameservers, config.timeout);
        resolver.disable_authoritative_check = config.disable_authoritative_check;
        Ok(resolver)
    }

    /// Check DNS-01 propagation against the recursive nameservers only.
    #[must_use]
    pub fn without_authoritative_check(mut self) -> Self {
        self.disable_authoritative_check = true;
        self
    }

    #[must_use]
    pub fn nameservers(&self) -> &[SocketAddr] {
        &self.nameservers
    }

    /// The zone apex for `fqdn`, e.g. `example.com.` for `www.example.com.`.
    ///
    /// # Errors
    ///
    /// Returns the exchange error when no nameserver answers an SOA query,
    /// [`Error::DNSResponseCode`] for a response code other than `NOERROR`/`NXDOMAIN`, and
    /// [`Error::ZoneNotFound`] when no suffix carries an SOA record.
    pub async fn find_zone_by_fqdn(&self, fqdn: &str) -> Result<String, Error> {
        Ok(self.lookup_soa_by_fqdn(fqdn).await?.zone)
    }

    /// The primary nameserver of the zone containing `fqdn`.
    ///
    /// # Errors
    ///
    /// See [`ZoneResolver::find_zone_by_fqdn`].
    pub async fn find_primary_ns_by_fqdn(&self, fqdn: &str) -> Result<String, Error> {
        Ok(self.lookup_soa_by_fqdn(fqdn).await?.primary_ns)
    }

    /// Forget every cached zone.
    pub fn clear_fqdn_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn lookup_soa_by_fqdn(&self, fqdn: &str) -> Result<SoaEntry, Error> {
        let fqdn = to_fqdn(fqdn);
        if let Some(entry) = self.cached(&fqdn) {
            return Ok(entry);
        }

        let entry = self.fetch_soa_by_fqdn(&fqdn).await?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fqdn, entry.clone());
        Ok(entry)
    }

    fn cached(&self, fqdn: &str) -> Option<SoaEntry> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fqdn)
            .cloned()
    }

    async fn fetch_soa_by_fqdn(&self, fqdn: &str) -> Result<SoaEntry, Error> {
        for domain in candidate_zones(fqdn) {
            let resp = self.query(domain, RecordType::SOA).await?;

            match resp.response_code() {
                ResponseCode::NoError => {
                    if contains_cname(&resp) {
                        continue;
                    }
                    for record in resp.answers() {
                        if let Some(RData::SOA(soa)) = record.data() {
                            return Ok(SoaEntry {
                                zone: to_fqdn(&record.name().to_ascii()),
                                primary_ns: to_fqdn(&soa.mname().to_ascii()),
                            });
                        }
                    }
                }
                ResponseCode::NXDomain => {}
                code => {
                    return Err(Error::DNSResponseCode {
                        fqdn: fqdn.to_string(),
                        question: domain.to_string(),
                        code,
                    })
                }
            }
        }
        Err(Error::ZoneNotFound(fqdn.to_string()))
    }

    /// The authoritative nameservers of the zone containing `fqdn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZoneNotFound`] when neither the zone nor its `NS` set can be determined.
    pub async fn lookup_nameservers(&self, fqdn: &str) -> Result<Vec<String>, Error> {
        let zone = self.find_zone_by_fqdn(fqdn).await?;
        let resp = self.query(&zone, RecordType::NS).await?;
        let nameservers: Vec<String> = resp
            .answers()
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::NS(ns)) => Some(to_fqdn(&ns.to_ascii()).to_lowercase()),
                _ => None,
            })
            .collect();
        if nameservers.is_empty() {
            return Err(Error::ZoneNotFound(format!(
                "{fqdn} (could not determine authoritative nameservers)"
            )));
        }
        Ok(nameservers)
    }

    /// Follow the CNAME chain starting at `fqdn`, returning the last name in the chain.
    pub async fn follow_cname(&self, fqdn: &str) -> String {
        let mut current = to_fqdn(fqdn);
        for _ in 0..MAX_CNAME_HOPS {
            let Ok(resp) = self.query(&current, RecordType::CNAME).await else {
                break;
            };
            if resp.response_code() != ResponseCode::NoError {
                break;
            }
            match cname_target(&resp, &current) {
                Some(target) if target != current => current = target,
                _ => break,
            }
        }
        current
    }

    /// Whether the TXT record at `fqdn` serves `value` everywhere it has to.
    ///
    /// The record name is first resolved through the recursive nameservers to pick up CNAMEs.
    /// Every authoritative nameserver of its zone must then serve `value`, or, when the
    /// authoritative check is disabled, the recursive nameservers must.
    ///
    /// # Errors
    ///
    /// Returns DNS errors from the zone lookup or from a nameserver that didn't answer.
    pub async fn check_propagation(&self, fqdn: &str, value: &str) -> Result<bool, Error> {
        let mut fqdn = to_fqdn(fqdn);
        let resp = self.query(&fqdn, RecordType::TXT).await?;
        if resp.response_code() == ResponseCode::NoError {
            if let Some(target) = cname_target(&resp, &fqdn) {
                fqdn = target;
            }
        }

        if self.disable_authoritative_check {
            return Ok(txt_values(&resp).iter().any(|v| v == value));
        }

        for ns in self.lookup_nameservers(&fqdn).await? {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((ns.trim_end_matches('.'), 53))
                .await?
                .collect();
            let name = Name::from_ascii(&fqdn)?;
            let resp = query::exchange(&name, RecordType::TXT, &addrs, self.timeout).await?;
            if resp.response_code() != ResponseCode::NoError {
                tracing::debug!(
                    "NS {ns} returned {} for {fqdn}",
                    resp.response_code()
                );
                return Ok(false);
            }
            if !txt_values(&resp).iter().any(|v| v == value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// TXT record values at `fqdn`, as seen by the recursive nameservers.
    ///
    /// # Errors
    ///
    /// Returns DNS errors when no nameserver answered.
    pub async fn txt_records(&self, fqdn: &str) -> Result<Vec<String>, Error> {
        let resp = self.query(&to_fqdn(fqdn), RecordType::TXT).await?;
        Ok(txt_values(&resp))
    }

    async fn query(&self, fqdn: &str, rtype: RecordType) -> Result<DnsResponse, Error> {
        let name = Name::from_ascii(fqdn)?;
        query::exchange(&name, rtype, &self.nameservers, self.timeout).await
    }
}

/// Candidate zones for `fqdn`, most specific first, excluding the root.
fn candidate_zones(fqdn: &str) -> impl Iterator<Item = &str> {
    let trimmed = fqdn.trim_end_matches('.');
    std::iter::once(0)
        .chain(trimmed.match_indices('.').map(|(i, _)| i + 1))
        .filter(move |&i| i < trimmed.len())
        .map(move |i| &fqdn[i..])
}

fn contains_cname(resp: &DnsResponse) -> bool {
    resp.answers()
        .iter()
        .any(|r| r.record_type() == RecordType::CNAME)
}

fn cname_target(resp: &DnsResponse, fqdn: &str) -> Option<String> {
    resp.answers().iter().find_map(|r| match r.data() {
        Some(RData::CNAME(target)) if to_fqdn(&r.name().to_ascii()).eq_ignore_ascii_case(fqdn) => {
            Some(to_fqdn(&target.to_ascii()))
        }
        _ => None,
    })
}

fn txt_values(resp: &DnsResponse) -> Vec<String> {
    resp.answers()
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::TXT(txt)) => Some(
                txt.txt_data()
                    .iter()
                    .map(|d| String::from_utf8_lossy(d))
                    .collect::<String>(),
            ),
            _ => None,
        })
        .collect()
}

/// `name` with a trailing dot.
#[must_use]
pub fn to_fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// `name` without its trailing dot.
#[must_use]
pub fn un_fqdn(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

fn parse_nameserver(ns: &str) -> Result<SocketAddr, Error> {
    if let Ok(addr) = SocketAddr::from_str(ns) {
        return Ok(addr);
    }
    IpAddr::from_str(ns)
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| Error::Config(format!("invalid nameserver \"{ns}\"")))
}

/// Nameservers from the system resolver configuration, deduplicated since each address is
/// listed once per protocol. Falls back to Google's public resolvers.
fn system_nameservers() -> Vec<SocketAddr> {
    let mut nameservers: Vec<SocketAddr> = Vec::new();
    match read_system_conf() {
        Ok((config, _)) => {
            for ns in config.name_servers() {
                if !nameservers.contains(&ns.socket_addr) {
                    nameservers.push(ns.socket_addr);
                }
            }
        }
        Err(err) => tracing::debug!("could not read the system DNS configuration: {err}"),
    }
    if nameservers.is_empty() {
        return DEFAULT_NAMESERVERS
            .iter()
            .map(|ip| SocketAddr::new(IpAddr::V4(*ip), 53))
            .collect();
    }
    nameservers
}
