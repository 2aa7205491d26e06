// [business] Certificate authority - signs user CSRs with the realm's CA key
pub mod csr;
pub mod ledger;

pub use ledger::{IssuanceLedger, MemoryLedger, PgLedger};

use crate::{
    db::IssuedCertificateRow,
    error::{EnrollError, Result},
    realm::{Realm, RealmStore},
};
use csr::ParsedCsr;
use rand::Rng;
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

// [security] Upper bound on any issued certificate, whatever the realm asks for
pub const MAX_VALIDITY_DAYS: u32 = 730;

// [security] 20 bytes with the top bit cleared: 159 random bits, positive DER INTEGER
const SERIAL_LEN: usize = 20;
const SERIAL_ATTEMPTS: usize = 4;

#[derive(Debug, Clone)]
pub struct CaPolicy {
    /// Scope an access token must carry to obtain a certificate.
    pub required_scope: String,
    pub max_validity_days: u32,
}

impl CaPolicy {
    pub fn new(required_scope: impl Into<String>, max_validity_days: u32) -> Self {
        Self {
            required_scope: required_scope.into(),
            max_validity_days: max_validity_days.min(MAX_VALIDITY_DAYS),
        }
    }
}

impl Default for CaPolicy {
    fn default() -> Self {
        Self::new("eap-metadata", 365)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedCertificate {
    /// Lowercase hex.
    pub serial: String,
    pub subject: String,
    pub realm: String,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
    pub certificate_pem: String,
    /// Realm CA first, then its issuers.
    pub ca_chain: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    realms: Arc<dyn RealmStore>,
    ledger: Arc<dyn IssuanceLedger>,
    policy: CaPolicy,
}

impl CertificateAuthority {
    pub fn new(
        realms: Arc<dyn RealmStore>,
        ledger: Arc<dyn IssuanceLedger>,
        policy: CaPolicy,
    ) -> Self {
        Self {
            realms,
            ledger,
            policy,
        }
    }

    pub fn policy(&self) -> &CaPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<dyn IssuanceLedger> {
        &self.ledger
    }

    pub async fn sign_request(
        &self,
        realm: &str,
        csr_bytes: &[u8],
        user_id: &str,
        scopes: &[String],
    ) -> Result<IssuedCertificate> {
        let realm = self.realms.resolve(realm).await?;

        // [security] Authorization first; an unauthorized caller learns nothing about CSR parsing
        if !scopes.iter().any(|s| *s == self.policy.required_scope) {
            warn!(
                target: "security",
                realm = %realm.name,
                user_id = %user_id,
                "Certificate requested without the issuance scope"
            );
            return Err(EnrollError::ScopeDenied(self.policy.required_scope.clone()));
        }

        let parsed = csr::parse(csr_bytes)?;
        let identity = expected_identity(user_id, &realm.name)?;
        check_requested_names(&parsed, &identity, &realm.name)?;

        let (not_before, not_after) = self.validity_window(&realm, OffsetDateTime::now_utc())?;
        let subject = format!("CN={},O={}", identity, realm.name);

        for attempt in 1..=SERIAL_ATTEMPTS {
            let serial = random_serial();
            let serial_hex = to_hex(&serial);
            let entry = IssuedCertificateRow {
                realm: realm.name.clone(),
                serial: serial_hex.clone(),
                subject: subject.clone(),
                user_id: user_id.to_string(),
                not_before,
                not_after,
                issued_at: OffsetDateTime::now_utc(),
            };

            if !self.ledger.claim(&entry).await? {
                warn!(realm = %realm.name, attempt, "Serial collision, drawing a new one");
                continue;
            }

            let certificate_pem =
                match build_certificate(&realm, &parsed, &identity, &serial, not_before, not_after) {
                    Ok(pem) => pem,
                    Err(e) => {
                        self.ledger.release(&realm.name, &serial_hex).await?;
                        return Err(e);
                    }
                };

            info!(
                realm = %realm.name,
                serial = %serial_hex,
                subject = %subject,
                user_id = %user_id,
                not_before = %not_before,
                not_after = %not_after,
                "Certificate issued"
            );

            return Ok(IssuedCertificate {
                serial: serial_hex,
                subject,
                realm: realm.name.clone(),
                user_id: user_id.to_string(),
                not_before,
                not_after,
                certificate_pem,
                ca_chain: realm.ca.full_chain(),
            });
        }

        Err(EnrollError::Internal(format!(
            "no unique serial after {} attempts",
            SERIAL_ATTEMPTS
        )))
    }

    /// `[now, now + min(realm, policy, hard max)]`, never past the CA's own expiry.
    pub fn validity_window(
        &self,
        realm: &Realm,
        now: OffsetDateTime,
    ) -> Result<(OffsetDateTime, OffsetDateTime)> {
        // [library] X.509 times have whole-second precision
        let not_before = now - Duration::nanoseconds(i64::from(now.nanosecond()));
        let days = realm
            .validity_days
            .min(self.policy.max_validity_days)
            .min(MAX_VALIDITY_DAYS);
        let ca_not_after = csr::ca_not_after(&realm.ca.certificate_pem)?;
        let not_after = (not_before + Duration::days(i64::from(days))).min(ca_not_after);

        if not_after <= not_before {
            return Err(EnrollError::Config(format!(
                "realm {}: CA certificate has expired",
                realm.name
            )));
        }
        Ok((not_before, not_after))
    }
}

/// The only identity a user may hold a certificate for within `realm`.
///
/// `local@domain` is kept when `domain` is the realm or one of its subdomains;
/// a bare identifier is qualified with the realm. Anything else is foreign.
pub fn expected_identity(user_id: &str, realm: &str) -> Result<String> {
    let realm = realm.to_ascii_lowercase();
    let mismatch = || EnrollError::SubjectMismatch {
        requested: user_id.to_string(),
        expected: format!("<user>@{}", realm),
    };

    // [security] Must survive as an IA5String rfc822Name and a printable CN
    if user_id.is_empty()
        || !user_id.is_ascii()
        || user_id.chars().any(|c| c.is_ascii_control() || c == ' ' || c == ',')
    {
        return Err(mismatch());
    }

    match user_id.rsplit_once('@') {
        None => Ok(format!("{}@{}", user_id, realm)),
        Some((local, domain)) => {
            let domain = domain.to_ascii_lowercase();
            let inside = domain == realm || domain.ends_with(&format!(".{}", realm));
            if local.is_empty() || local.contains('@') || !inside {
                return Err(mismatch());
            }
            Ok(format!("{}@{}", local, domain))
        }
    }
}

// [security] The CSR must ask for the caller's own identity, and nothing else
fn check_requested_names(parsed: &ParsedCsr, identity: &str, realm: &str) -> Result<()> {
    let mut requested = parsed.requested_names().peekable();
    if requested.peek().is_none() {
        return Err(EnrollError::SubjectMismatch {
            requested: String::new(),
            expected: identity.to_string(),
        });
    }

    for name in requested {
        if !name.eq_ignore_ascii_case(identity) {
            warn!(
                target: "security",
                realm = %realm,
                requested = %name,
                expected = %identity,
                "CSR subject does not match the authenticated identity"
            );
            return Err(EnrollError::SubjectMismatch {
                requested: name.to_string(),
                expected: identity.to_string(),
            });
        }
    }
    Ok(())
}

fn build_certificate(
    realm: &Realm,
    parsed: &ParsedCsr,
    identity: &str,
    serial: &[u8],
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<String> {
    let config_err =
        |what: &str, e: rcgen::Error| EnrollError::Config(format!("realm {}: {}: {}", realm.name, what, e));

    let ca_key = KeyPair::from_pem(realm.ca.private_key_pem.expose_secret())
        .map_err(|e| config_err("CA private key", e))?;
    let ca_cert = CertificateParams::from_ca_cert_pem(&realm.ca.certificate_pem)
        .map_err(|e| config_err("CA certificate", e))?
        .self_signed(&ca_key)?;

    let request = CertificateSigningRequestParams::from_pem(&parsed.pem)
        .map_err(|e| EnrollError::MalformedRequest(e.to_string()))?;

    // [security] Fresh profile; only the public key is taken from the request
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, identity);
    params
        .distinguished_name
        .push(DnType::OrganizationName, realm.name.as_str());
    params.subject_alt_names = vec![SanType::Rfc822Name(
        identity
            .to_string()
            .try_into()
            .map_err(|_| EnrollError::Internal(format!("identity {} is not IA5", identity)))?,
    )];
    params.serial_number = Some(SerialNumber::from_slice(serial));
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params.use_authority_key_identifier_extension = true;
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = CertificateSigningRequestParams {
        params,
        public_key: request.public_key,
    }
    .signed_by(&ca_cert, &ca_key)?;

    Ok(cert.pem())
}

fn random_serial() -> [u8; SERIAL_LEN] {
    let mut serial = [0u8; SERIAL_LEN];
    rand::thread_rng().fill(&mut serial[..]);
    // Non-zero leading byte keeps the encoded INTEGER at full length
    serial[0] = (serial[0] & 0x7f).max(1);
    serial
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keygen, realm::MemoryRealmStore};
    use rcgen::CertificateParams as Params;
    use x509_parser::{
        extensions::{GeneralName, ParsedExtension},
        pem::parse_x509_pem,
        prelude::{FromDer, X509Certificate},
    };

    fn realm() -> Realm {
        keygen::provision_realm("example.org", vec![], vec![])
            .unwrap()
            .into_realm()
            .unwrap()
    }

    fn ca_for(realm: &Realm) -> CertificateAuthority {
        let mut record = keygen::provision_realm(&realm.name, vec![], vec![]).unwrap();
        record.ca_certificate = Some(realm.ca.certificate_pem.clone());
        record.ca_private_key = Some(realm.ca.private_key_pem.expose_secret().clone());
        record.validity_days = realm.validity_days;
        CertificateAuthority::new(
            Arc::new(MemoryRealmStore::from_records([record])),
            Arc::new(MemoryLedger::new()),
            CaPolicy::default(),
        )
    }

    fn ca() -> CertificateAuthority {
        ca_for(&realm())
    }

    fn scopes() -> Vec<String> {
        vec!["eap-metadata".to_string()]
    }

    fn csr_for(cn: &str) -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = Params::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.serialize_request(&key).unwrap().pem().unwrap()
    }

    #[test]
    fn test_expected_identity() {
        assert_eq!(
            expected_identity("alice@example.org", "example.org").unwrap(),
            "alice@example.org"
        );
        assert_eq!(
            expected_identity("alice@Staff.Example.ORG", "example.org").unwrap(),
            "alice@staff.example.org"
        );
        assert_eq!(expected_identity("alice", "example.org").unwrap(), "alice@example.org");

        for foreign in [
            "alice@example.com",
            "alice@notexample.org",
            "@example.org",
            "a@b@example.org",
            "",
            "al ice",
            "alice,O=evil@example.org",
        ] {
            assert!(
                matches!(
                    expected_identity(foreign, "example.org"),
                    Err(EnrollError::SubjectMismatch { .. })
                ),
                "{foreign} should be rejected"
            );
        }
    }

    #[test]
    fn test_policy_is_clamped() {
        assert_eq!(CaPolicy::new("x", 10_000).max_validity_days, MAX_VALIDITY_DAYS);
        assert_eq!(CaPolicy::new("x", 30).max_validity_days, 30);
    }

    #[test]
    fn test_validity_window_bounds() {
        let mut realm = realm();
        let now = OffsetDateTime::now_utc();

        realm.validity_days = 10_000;
        let (nb, na) = ca().validity_window(&realm, now).unwrap();
        assert!(na > nb);
        assert_eq!(na - nb, Duration::days(365));

        realm.validity_days = 7;
        let (nb, na) = ca().validity_window(&realm, now).unwrap();
        assert_eq!(na - nb, Duration::days(7));
    }

    #[test]
    fn test_validity_capped_by_ca_expiry() {
        let mut realm = realm();
        let (cert, key) = keygen::generate_realm_ca("example.org", Duration::days(3)).unwrap();
        realm.ca.certificate_pem = cert;
        realm.ca.private_key_pem = secrecy::Secret::new(key);

        let now = OffsetDateTime::now_utc();
        let (_, not_after) = ca().validity_window(&realm, now).unwrap();
        assert!(not_after <= now + Duration::days(3));
    }

    #[tokio::test]
    async fn test_unknown_realm() {
        let csr = csr_for("alice@example.org");
        assert!(matches!(
            ca().sign_request("nowhere.test", csr.as_bytes(), "alice", &scopes()).await,
            Err(EnrollError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scope_checked_before_parsing() {
        let err = ca()
            .sign_request("example.org", b"garbage", "alice@example.org", &["cert".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::ScopeDenied(_)));

        let err = ca()
            .sign_request("example.org", b"garbage", "alice@example.org", &scopes())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_impersonation_is_rejected() {
        let csr = csr_for("bob@example.org");
        let err = ca()
            .sign_request("example.org", csr.as_bytes(), "alice@example.org", &scopes())
            .await
            .unwrap_err();
        match err {
            EnrollError::SubjectMismatch { requested, expected } => {
                assert_eq!(requested, "bob@example.org");
                assert_eq!(expected, "alice@example.org");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_issued_certificate_profile() {
        let realm = realm();
        let authority = ca_for(&realm);
        let csr = csr_for("alice@example.org");
        let issued = authority
            .sign_request("example.org", csr.as_bytes(), "alice@example.org", &scopes())
            .await
            .unwrap();

        assert_eq!(issued.serial.len(), SERIAL_LEN * 2);
        assert_eq!(issued.subject, "CN=alice@example.org,O=example.org");
        assert_eq!(issued.ca_chain, vec![realm.ca.certificate_pem.clone()]);
        assert!(issued.not_after > issued.not_before);

        let (_, pem) = parse_x509_pem(issued.certificate_pem.as_bytes()).unwrap();
        let (_, cert) = X509Certificate::from_der(&pem.contents).unwrap();
        assert_eq!(to_hex(cert.raw_serial()), issued.serial);
        assert!(!cert.is_ca());

        let cn: Vec<&str> = cert
            .subject()
            .iter_common_name()
            .map(|cn| cn.as_str().unwrap())
            .collect();
        assert_eq!(cn, vec!["alice@example.org"]);

        let san = cert
            .extensions()
            .iter()
            .find_map(|ext| match ext.parsed_extension() {
                ParsedExtension::SubjectAlternativeName(san) => Some(san),
                _ => None,
            })
            .unwrap();
        assert!(matches!(
            san.general_names.as_slice(),
            [GeneralName::RFC822Name("alice@example.org")]
        ));

        let entries = authority.ledger().entries("example.org").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].serial, issued.serial);
    }
}
