mod common;

use certcrab::acme::Authorization;
use certcrab::challenge::dns01::txt_value;
use certcrab::challenge::{DynProvider, Provider};
use certcrab::{Error, SolverManager, ZoneResolver};
use common::dns::{self, Zone};
use common::{acme_json, authz_json, challenge_json, core, posts_to, start_ca};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::Mock;

const TIMEOUT: Duration = Duration::from_secs(2);

fn example_zone() -> Zone {
    let mut zone = Zone::default();
    zone.add_apex("example.com.");
    zone
}

fn resolver(addr: SocketAddr) -> ZoneResolver {
    ZoneResolver::new(vec![addr], TIMEOUT)
}

#[tokio::test]
async fn zone_of_subdomain_is_its_apex() {
    let (addr, _) = dns::start(example_zone()).await;
    let resolver = resolver(addr);

    assert_eq!(
        resolver.find_zone_by_fqdn("www.example.com.").await.unwrap(),
        "example.com."
    );
    assert_eq!(
        resolver.find_primary_ns_by_fqdn("www.example.com").await.unwrap(),
        "ns1.example.com."
    );
}

#[tokio::test]
async fn zones_are_cached_until_cleared() {
    let (addr, handler) = dns::start(example_zone()).await;
    let resolver = resolver(addr);

    resolver.find_zone_by_fqdn("www.example.com.").await.unwrap();
    let first = handler.soa_queries();
    // `www` has an empty answer and is asked twice, `example.com` answers at once.
    assert_eq!(first, 3);

    resolver.find_zone_by_fqdn("www.example.com.").await.unwrap();
    assert_eq!(handler.soa_queries(), first);

    resolver.clear_fqdn_cache();
    resolver.find_zone_by_fqdn("www.example.com.").await.unwrap();
    assert_eq!(handler.soa_queries(), first * 2);
}

#[tokio::test]
async fn cname_answers_are_not_zones() {
    let mut zone = example_zone();
    zone.add_cname("alias.example.com.", "target.example.net.");
    let (addr, _) = dns::start(zone).await;

    assert_eq!(
        resolver(addr)
            .find_zone_by_fqdn("alias.example.com.")
            .await
            .unwrap(),
        "example.com."
    );
}

#[tokio::test]
async fn servfail_aborts_the_walk() {
    let mut zone = example_zone();
    zone.broken.insert(dns::lower("bad.example.com."));
    let (addr, _) = dns::start(zone).await;

    let err = resolver(addr)
        .find_zone_by_fqdn("bad.example.com.")
        .await
        .unwrap_err();
    match err {
        Error::DNSResponseCode { question, .. } => assert_eq!(question, "bad.example.com."),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unknown_names_have_no_zone() {
    let (addr, _) = dns::start(example_zone()).await;

    let err = resolver(addr)
        .find_zone_by_fqdn("host.nothing.invalid.")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ZoneNotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn unreachable_nameserver_fails_the_walk() {
    let addr = std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let resolver = ZoneResolver::new(vec![addr], Duration::from_millis(200));

    let err = resolver
        .find_zone_by_fqdn("a.b.example.com.")
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::DNSClient(_) | Error::DNSError(_) | Error::IO(_)),
        "got {err:?}"
    );
}

#[tokio::test]
async fn cname_chains_are_followed() {
    let mut zone = example_zone();
    zone.add_cname("_acme-challenge.example.com.", "a.example.com.");
    zone.add_cname("a.example.com.", "b.example.com.");
    let (addr, _) = dns::start(zone).await;
    let resolver = resolver(addr);

    assert_eq!(
        resolver.follow_cname("_acme-challenge.example.com.").await,
        "b.example.com."
    );
    assert_eq!(resolver.follow_cname("www.example.com").await, "www.example.com.");
}

#[tokio::test]
async fn txt_records_and_recursive_propagation() {
    let mut zone = example_zone();
    zone.set_txt("_acme-challenge.example.com.", vec!["abc".to_string()]);
    let (addr, handler) = dns::start(zone).await;
    let resolver = resolver(addr).without_authoritative_check();

    assert_eq!(
        resolver
            .txt_records("_acme-challenge.example.com.")
            .await
            .unwrap(),
        vec!["abc".to_string()]
    );
    assert!(resolver
        .check_propagation("_acme-challenge.example.com.", "abc")
        .await
        .unwrap());

    handler
        .zone
        .write()
        .unwrap()
        .remove_txt("_acme-challenge.example.com.");
    assert!(!resolver
        .check_propagation("_acme-challenge.example.com.", "abc")
        .await
        .unwrap());
}

/// Publishes challenge records straight into the mock zone.
struct ZoneProvider {
    zone: Arc<RwLock<Zone>>,
    publish: bool,
    reject: Option<&'static str>,
}

#[async_trait::async_trait]
impl Provider for ZoneProvider {
    async fn present(&self, domain: &str, _token: &str, key_auth: &str) -> anyhow::Result<()> {
        if self.reject == Some(domain) {
            anyhow::bail!("zone for {domain} is read-only");
        }
        if self.publish {
            self.zone.write().unwrap().set_txt(
                &format!("_acme-challenge.{domain}."),
                vec![txt_value(key_auth)],
            );
        }
        Ok(())
    }

    async fn clean_up(&self, domain: &str, _token: &str, _key_auth: &str) -> anyhow::Result<()> {
        self.zone
            .write()
            .unwrap()
            .remove_txt(&format!("_acme-challenge.{domain}."));
        Ok(())
    }

    fn timeout(&self) -> Option<(Duration, Duration)> {
        Some((Duration::from_millis(500), Duration::from_millis(50)))
    }
}

#[tokio::test]
async fn dns01_waits_for_the_record_then_validates() {
    let (addr, handler) = dns::start(example_zone()).await;
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/chlg/dns-01"))
        .respond_with(acme_json(200, &challenge_json(&ca.uri(), "dns-01", "valid")))
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let mut solvers = SolverManager::new(core.clone());
    let provider = ZoneProvider {
        zone: handler.zone.clone(),
        publish: true,
        reject: None,
    };
    solvers.set_dns01_provider(
        Arc::new(provider) as DynProvider,
        Arc::new(resolver(addr).without_authoritative_check()),
    );

    let chlg = challenge_json(&ca.uri(), "dns-01", "pending");
    let authz: Authorization =
        serde_json::from_value(authz_json("example.com", "pending", &[chlg])).unwrap();
    solvers.solve(&[authz]).await.unwrap();

    assert_eq!(posts_to(&ca, "/chlg/dns-01").await.len(), 1);
    assert!(handler.zone.read().unwrap().txt.is_empty());
}

#[tokio::test]
async fn dns01_gives_up_when_the_record_never_appears() {
    let (addr, handler) = dns::start(example_zone()).await;
    let ca = start_ca().await;

    let core = core(&ca).await;
    let mut solvers = SolverManager::new(core.clone());
    let provider = ZoneProvider {
        zone: handler.zone.clone(),
        publish: false,
        reject: None,
    };
    solvers.set_dns01_provider(
        Arc::new(provider) as DynProvider,
        Arc::new(resolver(addr).without_authoritative_check()),
    );

    let chlg = challenge_json(&ca.uri(), "dns-01", "pending");
    let authz: Authorization =
        serde_json::from_value(authz_json("example.com", "pending", &[chlg])).unwrap();
    let Err(Error::Obtain(failures)) = solvers.solve(&[authz]).await else {
        panic!("expected an aggregate error");
    };

    match failures.get("example.com") {
        Some(Error::PropagationTimeout { fqdn, .. }) => {
            assert_eq!(fqdn, "_acme-challenge.example.com.");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(posts_to(&ca, "/chlg/dns-01").await.is_empty());
}

fn dns01_authz(base: &str, domain: &str) -> Authorization {
    let label = &domain[..1];
    let chlg = json!({
        "type": "dns-01",
        "url": format!("{base}/chlg/{label}"),
        "token": format!("tok-{label}"),
        "status": "pending",
    });
    serde_json::from_value(authz_json(domain, "pending", &[chlg])).unwrap()
}

#[tokio::test]
async fn one_failed_presentation_leaves_the_other_domains_alone() {
    let (addr, handler) = dns::start(example_zone()).await;
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/chlg/a"))
        .respond_with(acme_json(
            200,
            &json!({
                "type": "dns-01",
                "url": format!("{}/chlg/a", ca.uri()),
                "token": "tok-a",
                "status": "valid",
            }),
        ))
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let mut solvers = SolverManager::new(core.clone());
    let provider = ZoneProvider {
        zone: handler.zone.clone(),
        publish: true,
        reject: Some("b.example.com"),
    };
    solvers.set_dns01_provider(
        Arc::new(provider) as DynProvider,
        Arc::new(resolver(addr).without_authoritative_check()),
    );

    let authzs = [
        dns01_authz(&ca.uri(), "a.example.com"),
        dns01_authz(&ca.uri(), "b.example.com"),
    ];
    let Err(Error::Obtain(failures)) = solvers.solve(&authzs).await else {
        panic!("expected an aggregate error");
    };

    assert_eq!(failures.len(), 1);
    match failures.get("b.example.com") {
        Some(Error::Provider { domain, .. }) => assert_eq!(domain, "b.example.com"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(posts_to(&ca, "/chlg/a").await.len(), 1);
    assert!(posts_to(&ca, "/chlg/b").await.is_empty());
    assert!(handler.zone.read().unwrap().txt.is_empty());
}
