#![allow(dead_code)]

pub mod dns;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use certcrab::challenge::Provider;
use certcrab::{AccountKey, Core, KeyType, SharedCore};
use rcgen::{CertificateParams, KeyPair};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const HEAD_NONCE: &str = "nonce-from-head";
pub const RESPONSE_NONCE: &str = "nonce-from-response";

pub fn directory(base: &str) -> Value {
    json!({
        "newNonce": format!("{base}/nonce"),
        "newAccount": format!("{base}/new-acct"),
        "newOrder": format!("{base}/new-order"),
        "revokeCert": format!("{base}/revoke"),
    })
}

/// A mock CA serving the directory and new-nonce endpoints.
pub async fn start_ca() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/directory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(directory(&server.uri())))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/nonce"))
        .respond_with(ResponseTemplate::new(200).insert_header("Replay-Nonce", HEAD_NONCE))
        .mount(&server)
        .await;
    server
}

pub async fn core(server: &MockServer) -> SharedCore {
    let key = AccountKey::generate(KeyType::EC256).unwrap();
    let dir_url = format!("{}/directory", server.uri());
    Arc::new(Core::new(reqwest::Client::new(), &dir_url, key).await.unwrap())
}

/// A signed-request response carrying a fresh nonce.
pub fn acme(status: u16) -> ResponseTemplate {
    ResponseTemplate::new(status).insert_header("Replay-Nonce", RESPONSE_NONCE)
}

pub fn acme_json(status: u16, body: &Value) -> ResponseTemplate {
    acme(status).set_body_json(body)
}

pub fn bad_nonce() -> ResponseTemplate {
    acme(400).set_body_json(json!({
        "type": "urn:ietf:params:acme:error:badNonce",
        "detail": "JWS has an invalid anti-replay nonce",
        "status": 400,
    }))
}

/// Serves `responses` in order, repeating the last one.
pub struct Sequence {
    responses: Vec<ResponseTemplate>,
    next: AtomicUsize,
}

impl Sequence {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        Sequence {
            responses,
            next: AtomicUsize::new(0),
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.responses[i.min(self.responses.len() - 1)].clone()
    }
}

/// A base64url JSON segment of a JWS, `Null` when empty.
pub fn decode_segment(segment: &Value) -> Value {
    let segment = segment.as_str().unwrap();
    if segment.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
}

/// The decoded protected header of a signed request.
pub fn protected(req: &Request) -> Value {
    let body: Value = serde_json::from_slice(&req.body).unwrap();
    decode_segment(&body["protected"])
}

/// The decoded payload of a signed request, `Null` for POST-as-GET.
pub fn payload(req: &Request) -> Value {
    let body: Value = serde_json::from_slice(&req.body).unwrap();
    decode_segment(&body["payload"])
}

pub async fn posts_to(server: &MockServer, to: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.to_string() == "POST" && r.url.path() == to)
        .collect()
}

pub async fn count(server: &MockServer, verb: &str, to: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.to_string() == verb && r.url.path() == to)
        .count()
}

pub fn challenge_json(base: &str, kind: &str, status: &str) -> Value {
    json!({
        "type": kind,
        "url": format!("{base}/chlg/{kind}"),
        "token": "tok-1",
        "status": status,
    })
}

pub fn authz_json(domain: &str, status: &str, challenges: &[Value]) -> Value {
    json!({
        "status": status,
        "identifier": {"type": "dns", "value": domain},
        "challenges": challenges,
    })
}

/// A PEM leaf followed by a PEM issuer.
pub fn pem_chain() -> (String, String) {
    let key = KeyPair::generate().unwrap();
    let leaf = CertificateParams::new(vec!["example.com".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    let issuer = CertificateParams::new(vec!["issuer.example".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    (leaf.pem(), issuer.pem())
}

/// Remembers every call it receives.
#[derive(Default)]
pub struct RecordingProvider {
    pub presented: Mutex<Vec<(String, String)>>,
    pub cleaned: Mutex<Vec<String>>,
    pub timeout: Option<(Duration, Duration)>,
}

#[async_trait::async_trait]
impl Provider for RecordingProvider {
    async fn present(&self, domain: &str, _token: &str, key_auth: &str) -> anyhow::Result<()> {
        self.presented
            .lock()
            .unwrap()
            .push((domain.to_string(), key_auth.to_string()));
        Ok(())
    }

    async fn clean_up(&self, domain: &str, _token: &str, _key_auth: &str) -> anyhow::Result<()> {
        self.cleaned.lock().unwrap().push(domain.to_string());
        Ok(())
    }

    fn timeout(&self) -> Option<(Duration, Duration)> {
        self.timeout
    }
}
