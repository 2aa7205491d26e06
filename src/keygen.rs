// [security] Realm provisioning helpers: CA keypairs and token secrets

use crate::{
    error::Result,
    realm::{OAuthClient, RealmRecord},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use serde_json::json;
use time::{Duration, OffsetDateTime};

// [business] Realm CA lifetime; issued certificates never outlive it
pub const CA_VALIDITY_DAYS: i64 = 3650;

pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Self-signed realm CA. Returns `(certificate_pem, private_key_pem)`.
pub fn generate_realm_ca(realm: &str, validity: Duration) -> Result<(String, String)> {
    let key_pair = KeyPair::generate()?;

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, format!("{} eduroam CA", realm));
    params
        .distinguished_name
        .push(DnType::OrganizationName, realm);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    // [business] Backdated a minute so freshly provisioned realms work across small clock skew
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::minutes(1);
    params.not_after = now + validity;

    let cert = params.self_signed(&key_pair)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

// [security] 48 random bytes, base64url - comfortably above the HS512 block size
pub fn generate_signing_secret() -> String {
    let random_bytes: [u8; 48] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// A complete, valid realm record with a fresh CA and token secret.
pub fn provision_realm(
    name: &str,
    server_names: Vec<String>,
    clients: Vec<OAuthClient>,
) -> Result<RealmRecord> {
    let (ca_certificate, ca_private_key) =
        generate_realm_ca(name, Duration::days(CA_VALIDITY_DAYS))?;

    Ok(RealmRecord {
        name: name.to_string(),
        server_names,
        signing_algorithm: "HS256".to_string(),
        signing_secret: generate_signing_secret(),
        ca_certificate: Some(ca_certificate),
        ca_private_key: Some(ca_private_key),
        ca_chain: Vec::new(),
        auth: json!({ "service": "saml" }),
        clients,
        validity_days: DEFAULT_VALIDITY_DAYS,
    })
}
