mod common;

use certcrab::registration::EabOptions;
use certcrab::{Error, Registrar};
use common::{acme_json, bad_nonce, core, posts_to, protected, start_ca, Sequence};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn registration_switches_signing_to_kid() {
    let ca = start_ca().await;
    let account_url = format!("{}/acct/1", ca.uri());
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(
            acme_json(201, &json!({"status": "valid"}))
                .insert_header("Location", account_url.as_str()),
        )
        .mount(&ca)
        .await;
    Mock::given(method("POST"))
        .and(path("/acct/1"))
        .respond_with(acme_json(
            200,
            &json!({"status": "valid", "contact": ["mailto:admin@example.com"]}),
        ))
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let registrar = Registrar::new(core.clone(), Some("admin@example.com".to_string()));
    let account = registrar.register(true).await.unwrap();

    assert_eq!(account.location, account_url);
    assert_eq!(core.jws().kid().as_deref(), Some(account_url.as_str()));

    let new_acct = &posts_to(&ca, "/new-acct").await[0];
    let header = protected(new_acct);
    assert!(header.get("jwk").is_some());
    assert!(header.get("kid").is_none());
    assert_eq!(header["url"], format!("{}/new-acct", ca.uri()));
    assert_eq!(
        common::payload(new_acct),
        json!({"contact": ["mailto:admin@example.com"], "termsOfServiceAgreed": true})
    );

    registrar.query_registration().await.unwrap();
    let query = &posts_to(&ca, "/acct/1").await[0];
    let header = protected(query);
    assert_eq!(header["kid"], account_url);
    assert!(header.get("jwk").is_none());
}

#[tokio::test]
async fn response_nonce_is_used_before_fetching() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(
            acme_json(201, &json!({}))
                .insert_header("Location", format!("{}/acct/1", ca.uri()).as_str()),
        )
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let registrar = Registrar::new(core.clone(), None);
    registrar.register(true).await.unwrap();
    registrar.register(true).await.unwrap();

    let posts = posts_to(&ca, "/new-acct").await;
    assert_eq!(protected(&posts[0])["nonce"], common::HEAD_NONCE);
    assert_eq!(protected(&posts[1])["nonce"], common::RESPONSE_NONCE);
    assert_eq!(common::count(&ca, "HEAD", "/nonce").await, 1);
}

#[tokio::test]
async fn bad_nonce_is_retried_once() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(Sequence::new(vec![
            bad_nonce(),
            acme_json(201, &json!({"status": "valid"}))
                .insert_header("Location", format!("{}/acct/1", ca.uri()).as_str()),
        ]))
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let account = Registrar::new(core, None).register(true).await.unwrap();

    assert!(account.location.ends_with("/acct/1"));
    let posts = posts_to(&ca, "/new-acct").await;
    assert_eq!(posts.len(), 2);
    assert_eq!(protected(&posts[1])["nonce"], common::RESPONSE_NONCE);
}

#[tokio::test]
async fn second_bad_nonce_is_surfaced() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(bad_nonce())
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let err = Registrar::new(core, None).register(true).await.unwrap_err();

    assert!(matches!(err, Error::BadNonce(_)), "got {err:?}");
    assert_eq!(posts_to(&ca, "/new-acct").await.len(), 2);
}

#[tokio::test]
async fn other_problems_are_not_retried() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(acme_json(
            403,
            &json!({"type": "urn:ietf:params:acme:error:unauthorized", "detail": "nope"}),
        ))
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let err = Registrar::new(core, None).register(true).await.unwrap_err();

    match err {
        Error::Problem(p) => {
            assert_eq!(p.http_status, 403);
            assert_eq!(p.kind, "urn:ietf:params:acme:error:unauthorized");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(posts_to(&ca, "/new-acct").await.len(), 1);
}

#[tokio::test]
async fn existing_account_conflict_is_accepted() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(
            acme_json(
                409,
                &json!({"type": "urn:ietf:params:acme:error:malformed", "detail": "exists"}),
            )
            .insert_header("Location", format!("{}/acct/7", ca.uri()).as_str()),
        )
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let account = Registrar::new(core.clone(), None).register(true).await.unwrap();
    assert!(account.location.ends_with("/acct/7"));
    assert_eq!(core.jws().kid(), Some(account.location));
}

#[tokio::test]
async fn resolve_account_by_key() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(
            acme_json(200, &json!({}))
                .insert_header("Location", format!("{}/acct/3", ca.uri()).as_str()),
        )
        .mount(&ca)
        .await;
    Mock::given(method("POST"))
        .and(path("/acct/3"))
        .respond_with(acme_json(200, &json!({"status": "valid"})))
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let account = Registrar::new(core.clone(), None)
        .resolve_account_by_key()
        .await
        .unwrap();

    assert_eq!(account.account.status, Some(certcrab::acme::Status::Valid));
    let lookup = &posts_to(&ca, "/new-acct").await[0];
    assert_eq!(common::payload(lookup), json!({"onlyReturnExisting": true}));
    let fetch = &posts_to(&ca, "/acct/3").await[0];
    assert!(protected(fetch)["kid"].as_str().unwrap().ends_with("/acct/3"));
}

#[tokio::test]
async fn resolve_without_location_fails() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(acme_json(200, &json!({})))
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let err = Registrar::new(core, None)
        .resolve_account_by_key()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingLocation(_)), "got {err:?}");
}

#[tokio::test]
async fn delete_registration_deactivates() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(
            acme_json(201, &json!({}))
                .insert_header("Location", format!("{}/acct/1", ca.uri()).as_str()),
        )
        .mount(&ca)
        .await;
    Mock::given(method("POST"))
        .and(path("/acct/1"))
        .respond_with(acme_json(200, &json!({"status": "deactivated"})))
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let registrar = Registrar::new(core, None);
    assert!(matches!(
        registrar.delete_registration().await,
        Err(Error::NoAccount)
    ));

    registrar.register(true).await.unwrap();
    registrar.delete_registration().await.unwrap();

    let deactivate = &posts_to(&ca, "/acct/1").await[0];
    assert_eq!(common::payload(deactivate), json!({"status": "deactivated"}));
}

#[tokio::test]
async fn eab_binding_is_attached() {
    let ca = start_ca().await;
    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(
            acme_json(201, &json!({}))
                .insert_header("Location", format!("{}/acct/1", ca.uri()).as_str()),
        )
        .mount(&ca)
        .await;

    let core = core(&ca).await;
    let eab = EabOptions {
        kid: "eab-kid".to_string(),
        hmac_encoded: "c2VjcmV0LW1hYy1rZXk".to_string(),
    };
    Registrar::new(core, None)
        .register_with_eab(true, &eab)
        .await
        .unwrap();

    let req = &posts_to(&ca, "/new-acct").await[0];
    let binding = &common::payload(req)["externalAccountBinding"];
    let binding_header = common::decode_segment(&binding["protected"]);
    assert_eq!(binding_header["alg"], "HS256");
    assert_eq!(binding_header["kid"], "eab-kid");
    assert_eq!(binding_header["url"], format!("{}/new-acct", ca.uri()));
}

#[tokio::test]
async fn directory_must_name_required_urls() {
    let ca = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/directory"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"newNonce": "/nonce", "newAccount": "/new-acct"})),
        )
        .mount(&ca)
        .await;

    let key = certcrab::AccountKey::generate(certcrab::KeyType::EC256).unwrap();
    let err = certcrab::Core::new(
        reqwest::Client::new(),
        &format!("{}/directory", ca.uri()),
        key,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::MissingDirectoryURL("new order")));
}
