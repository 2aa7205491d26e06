// [business] Shared fixtures - realms with dev authentication, CSRs and a wired orchestrator
#![allow(dead_code)]

use eduroam_enroll::{
    config::Config,
    enroll::EnrollmentOrchestrator,
    keygen,
    realm::{MemoryRealmStore, OAuthClient, RealmRecord},
    Backends,
};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use serde_json::json;
use std::sync::Arc;

pub const REALM: &str = "example.org";
pub const USER: &str = "alice@example.org";
pub const SCOPE: &str = "eap-metadata";

pub fn client(id: &str, redirect_uri: &str, scopes: &[&str]) -> OAuthClient {
    OAuthClient {
        client_id: id.to_string(),
        redirect_uris: vec![redirect_uri.to_string()],
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
    }
}

/// Realm with `app1` (https://app1/cb), the browser client, and dev auth as `user_id`.
pub fn realm_record(name: &str, user_id: &str) -> RealmRecord {
    let mut record = keygen::provision_realm(
        name,
        vec![format!("radius.{}", name)],
        vec![
            client("app1", "https://app1/cb", &["cert", SCOPE]),
            client("browser", "urn:ietf:wg:oauth:2.0:oob", &[SCOPE]),
        ],
    )
    .expect("provisioning");
    record.auth = json!({ "service": "dev", "user_id": user_id });
    record
}

pub fn config() -> Config {
    Config::default()
}

pub fn backends(records: Vec<RealmRecord>) -> Backends {
    Backends::in_memory(MemoryRealmStore::from_records(records))
}

pub fn orchestrator_with(records: Vec<RealmRecord>, config: &Config) -> Arc<EnrollmentOrchestrator> {
    Arc::new(backends(records).orchestrator(config))
}

pub fn orchestrator() -> Arc<EnrollmentOrchestrator> {
    orchestrator_with(vec![realm_record(REALM, USER)], &config())
}

pub fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// PEM CSR with an optional CN and an optional rfc822 SAN.
pub fn csr(cn: Option<&str>, email: Option<&str>) -> String {
    let key = KeyPair::generate().expect("key");
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
    params.distinguished_name = DistinguishedName::new();
    if let Some(cn) = cn {
        params.distinguished_name.push(DnType::CommonName, cn);
    }
    if let Some(email) = email {
        params
            .subject_alt_names
            .push(SanType::Rfc822Name(email.to_string().try_into().expect("ia5")));
    }
    params
        .serialize_request(&key)
        .expect("csr")
        .pem()
        .expect("pem")
}

pub fn csr_for(cn: &str) -> String {
    csr(Some(cn), None)
}
