// [business] End-to-end enrollment through the library API: codes, tokens, certificates
mod common;

use common::*;
use eduroam_enroll::{
    auth::RequestContext,
    enroll::{AuthorizationRequest, EnrollmentState},
    ca::IssuanceLedger as _,
    error::{Credential, EnrollError},
    Backends,
};
use serde_json::json;
use std::collections::HashSet;
use time::Duration;
use x509_parser::pem::parse_x509_pem;

fn realm_ctx(realm: &str) -> RequestContext {
    RequestContext::new().with_query("realm", realm)
}

#[tokio::test]
async fn test_code_is_single_use() {
    let orchestrator = orchestrator();
    let tokens = orchestrator.tokens();

    let code = tokens
        .issue_authorization_code(REALM, "app1", "https://app1/cb", USER, &scopes(&["cert"]), None)
        .await
        .unwrap();

    let token = tokens
        .redeem_authorization_code(REALM, &code.code, "app1", "https://app1/cb", None)
        .await
        .unwrap();
    let grant = tokens.verify_access_token(REALM, &token.token).await.unwrap();
    assert_eq!(grant.user_id, USER);
    assert_eq!(grant.client_id, "app1");
    assert_eq!(grant.scopes, vec!["cert"]);

    let replay = tokens
        .redeem_authorization_code(REALM, &code.code, "app1", "https://app1/cb", None)
        .await;
    assert!(matches!(replay, Err(EnrollError::CodeAlreadyUsed)));
}

#[tokio::test]
async fn test_unknown_client_is_rejected() {
    let orchestrator = orchestrator();
    let result = orchestrator
        .tokens()
        .issue_authorization_code(REALM, "evil", "https://app1/cb", USER, &scopes(&["cert"]), None)
        .await;
    assert!(matches!(result, Err(EnrollError::InvalidClient(id)) if id == "evil"));
}

#[tokio::test]
async fn test_redirect_must_match_exactly() {
    let orchestrator = orchestrator();
    let tokens = orchestrator.tokens();
    for redirect in ["https://app1/cb/", "https://app1/cb?x=1", "https://app1/", "HTTPS://app1/cb"] {
        let result = tokens
            .issue_authorization_code(REALM, "app1", redirect, USER, &scopes(&["cert"]), None)
            .await;
        assert!(
            matches!(result, Err(EnrollError::InvalidRedirect)),
            "{} was accepted",
            redirect
        );
    }
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let mut config = config();
    config.auth_code_ttl_secs = -1;
    let orchestrator = orchestrator_with(vec![realm_record(REALM, USER)], &config);
    let tokens = orchestrator.tokens();

    let code = tokens
        .issue_authorization_code(REALM, "app1", "https://app1/cb", USER, &scopes(&["cert"]), None)
        .await
        .unwrap();
    let result = tokens
        .redeem_authorization_code(REALM, &code.code, "app1", "https://app1/cb", None)
        .await;
    assert!(matches!(
        result,
        Err(EnrollError::Expired(Credential::AuthorizationCode))
    ));
}

#[tokio::test]
async fn test_concurrent_redemption_has_one_winner() {
    const ATTEMPTS: usize = 32;
    let orchestrator = orchestrator();
    let code = orchestrator
        .tokens()
        .issue_authorization_code(REALM, "app1", "https://app1/cb", USER, &scopes(&["cert"]), None)
        .await
        .unwrap();

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let code = code.code.clone();
            tokio::spawn(async move {
                orchestrator
                    .exchange(REALM, &code, "app1", "https://app1/cb", None)
                    .await
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let mut successes = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => successes += 1,
            Err(EnrollError::CodeAlreadyUsed) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_browser_enrollment_walks_every_state() {
    let orchestrator = orchestrator();
    let enrollment = orchestrator
        .enroll(&realm_ctx(REALM), csr_for(USER).as_bytes())
        .await
        .unwrap();

    assert_eq!(
        enrollment.trail.states(),
        &[
            EnrollmentState::Started,
            EnrollmentState::RealmResolved,
            EnrollmentState::Authenticated,
            EnrollmentState::AuthorizationCodeIssued,
            EnrollmentState::TokenRedeemed,
            EnrollmentState::CertificateSigned,
        ]
    );

    let certificate = enrollment.certificate;
    assert_eq!(certificate.realm, REALM);
    assert_eq!(certificate.user_id, USER);
    assert_eq!(certificate.subject, format!("CN={},O={}", USER, REALM));
    assert!(certificate.not_after > certificate.not_before);
    assert!(certificate.not_after - certificate.not_before <= Duration::days(365));
}

#[tokio::test]
async fn test_signed_certificate_verifies_against_realm_ca() {
    let orchestrator = orchestrator();
    let certificate = orchestrator
        .enroll(&realm_ctx(REALM), csr_for(USER).as_bytes())
        .await
        .unwrap()
        .certificate;

    let (_, leaf_pem) = parse_x509_pem(certificate.certificate_pem.as_bytes()).unwrap();
    let leaf = leaf_pem.parse_x509().unwrap();
    let (_, ca_pem) = parse_x509_pem(certificate.ca_chain[0].as_bytes()).unwrap();
    let ca = ca_pem.parse_x509().unwrap();

    leaf.verify_signature(Some(ca.public_key())).unwrap();
    assert_eq!(leaf.issuer().to_string(), ca.subject().to_string());
    let serial: String = leaf.raw_serial().iter().map(|b| format!("{:02x}", b)).collect();
    assert_eq!(serial, certificate.serial);
}

#[tokio::test]
async fn test_foreign_subject_is_refused() {
    let orchestrator = orchestrator();
    for requested in [
        csr_for("bob@example.org"),
        csr_for("alice@example.com"),
        csr(Some(USER), Some("bob@example.org")),
        csr(None, None),
    ] {
        let result = orchestrator
            .enroll(&realm_ctx(REALM), requested.as_bytes())
            .await;
        assert!(
            matches!(result, Err(EnrollError::SubjectMismatch { .. })),
            "unexpected: {:?}",
            result
        );
    }
}

#[tokio::test]
async fn test_token_without_issuance_scope() {
    let orchestrator = orchestrator();
    let code = orchestrator
        .tokens()
        .issue_authorization_code(REALM, "app1", "https://app1/cb", USER, &scopes(&["cert"]), None)
        .await
        .unwrap();
    let token = orchestrator
        .exchange(REALM, &code.code, "app1", "https://app1/cb", None)
        .await
        .unwrap();

    let result = orchestrator
        .sign_with_token(REALM, &token.token, csr_for(USER).as_bytes())
        .await;
    assert!(matches!(result, Err(EnrollError::ScopeDenied(scope)) if scope == SCOPE));
}

#[tokio::test]
async fn test_realms_are_isolated() {
    let orchestrator = orchestrator_with(
        vec![
            realm_record(REALM, USER),
            realm_record("other.org", "bob@other.org"),
        ],
        &config(),
    );

    let code = orchestrator
        .tokens()
        .issue_authorization_code(REALM, "app1", "https://app1/cb", USER, &scopes(&[SCOPE]), None)
        .await
        .unwrap();
    let token = orchestrator
        .exchange(REALM, &code.code, "app1", "https://app1/cb", None)
        .await
        .unwrap();

    // [security] A token minted for one realm is worthless in another
    let result = orchestrator
        .sign_with_token("other.org", &token.token, csr_for(USER).as_bytes())
        .await;
    assert!(matches!(result, Err(EnrollError::InvalidSignature)));

    // [security] A code cannot be redeemed through another realm either
    let code = orchestrator
        .tokens()
        .issue_authorization_code(REALM, "app1", "https://app1/cb", USER, &scopes(&[SCOPE]), None)
        .await
        .unwrap();
    assert!(orchestrator
        .exchange("other.org", &code.code, "app1", "https://app1/cb", None)
        .await
        .is_err());

    let a = orchestrator
        .enroll(&realm_ctx(REALM), csr_for(USER).as_bytes())
        .await
        .unwrap()
        .certificate;
    let b = orchestrator
        .enroll(&realm_ctx("other.org"), csr_for("bob@other.org").as_bytes())
        .await
        .unwrap()
        .certificate;
    assert_ne!(a.ca_chain[0], b.ca_chain[0]);
}

#[tokio::test]
async fn test_concurrent_issuance_never_reuses_a_serial() {
    const ENROLLMENTS: usize = 24;
    let backends = backends(vec![realm_record(REALM, USER)]);
    let orchestrator = std::sync::Arc::new(backends.orchestrator(&config()));

    let handles: Vec<_> = (0..ENROLLMENTS)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .enroll(&realm_ctx(REALM), csr_for(USER).as_bytes())
                    .await
                    .map(|e| e.certificate.serial)
            })
        })
        .collect();

    let mut serials = HashSet::new();
    for handle in handles {
        let serial = handle.await.unwrap().unwrap();
        assert_eq!(serial.len(), 40);
        assert!(serials.insert(serial));
    }

    let entries = backends.ledger.entries(REALM).await.unwrap();
    assert_eq!(entries.len(), ENROLLMENTS);
    assert!(entries.iter().all(|e| serials.contains(&e.serial)));
}

#[tokio::test]
async fn test_guessed_realm_is_revalidated() {
    let mut base = realm_record(REALM, USER);
    base.auth = json!({ "service": "dev", "user_id": USER, "realm_hint": "other.org" });
    let records = vec![base, realm_record("other.org", "bob@other.org")];

    let mut config = config();
    config.base_realm = Some(REALM.to_string());
    let orchestrator = orchestrator_with(records.clone(), &config);

    let enrollment = orchestrator
        .enroll(&RequestContext::new(), csr_for("bob@other.org").as_bytes())
        .await
        .unwrap();
    assert_eq!(enrollment.certificate.realm, "other.org");
    assert_eq!(enrollment.trail.states()[1], EnrollmentState::GuessedRealm);

    // [business] A hint naming an unknown realm is no guess at all
    let mut records = records;
    records[0].auth = json!({ "service": "dev", "user_id": USER, "realm_hint": "nowhere.test" });
    let orchestrator = orchestrator_with(records, &config);
    let result = orchestrator.resolve_realm(&RequestContext::new()).await;
    assert!(matches!(result, Err(EnrollError::BadRequest(msg)) if msg == "No realm set"));
}

#[tokio::test]
async fn test_broken_realm_does_not_stop_guessing() {
    let mut base = realm_record(REALM, USER);
    base.auth = json!({ "service": "dev", "user_id": USER, "realm_hint": "other.org" });
    let mut broken = realm_record("broken.test", "carol@broken.test");
    broken.auth = json!({ "service": "ldap" });

    let mut config = config();
    config.base_realm = Some(REALM.to_string());
    let orchestrator = orchestrator_with(
        vec![base, realm_record("other.org", "bob@other.org"), broken],
        &config,
    );

    let resolved = orchestrator.resolve_realm(&RequestContext::new()).await.unwrap();
    assert_eq!(resolved.realm.name, "other.org");
    assert!(resolved.guessed);

    // [business] The broken realm itself still fails loudly when named
    let result = orchestrator.resolve_realm(&realm_ctx("broken.test")).await;
    assert!(matches!(result, Err(EnrollError::Config(_))));
}

#[tokio::test]
async fn test_authorize_redirects_with_code_and_state() {
    let orchestrator = orchestrator();
    let grant = orchestrator
        .authorize(
            &realm_ctx(REALM),
            AuthorizationRequest {
                client_id: "app1".into(),
                redirect_uri: "https://app1/cb".into(),
                scopes: scopes(&[SCOPE]),
                state: Some("s1".into()),
                pkce: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(grant.code.user_id, USER);
    assert_eq!(
        grant.redirect_location(),
        format!("https://app1/cb?code={}&state=s1", grant.code.code)
    );
}

#[tokio::test]
async fn test_missing_realm_without_base_realm() {
    let orchestrator = orchestrator();
    let result = orchestrator
        .enroll(&RequestContext::new(), csr_for(USER).as_bytes())
        .await;
    assert!(matches!(result, Err(EnrollError::BadRequest(_))));

    let result = orchestrator
        .enroll(&realm_ctx("nowhere.test"), csr_for(USER).as_bytes())
        .await;
    assert!(matches!(result, Err(EnrollError::NotFound(_))));
}

#[tokio::test]
async fn test_server_names() {
    let backends: Backends = backends(vec![
        realm_record(REALM, USER),
        realm_record("other.org", "bob@other.org"),
    ]);
    let names = backends.orchestrator(&config()).server_names().await.unwrap();
    assert_eq!(names, vec!["radius.example.org", "radius.other.org"]);
}
