// [business] Realms - administrative tenants, each owning a CA, a token secret and a client registry
pub mod memory;
pub mod postgres;

pub use memory::MemoryRealmStore;
pub use postgres::PgRealmStore;

use crate::{
    auth::{AuthBackendConfig, AuthDefaults},
    error::{EnrollError, Result},
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, collections::BTreeSet, fmt::Debug, str::FromStr, sync::Arc};

// [security] Shortest acceptable HMAC secret, in bytes
pub const MIN_SECRET_LEN: usize = 32;

// [security] Token signing algorithm - pinned per realm, never negotiated per token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    HS256,
    HS384,
    HS512,
}

impl SigningAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            SigningAlgorithm::HS256 => "HS256",
            SigningAlgorithm::HS384 => "HS384",
            SigningAlgorithm::HS512 => "HS512",
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HS256" => Ok(SigningAlgorithm::HS256),
            "HS384" => Ok(SigningAlgorithm::HS384),
            "HS512" => Ok(SigningAlgorithm::HS512),
            other => Err(EnrollError::Config(format!(
                "unsupported signing algorithm {}",
                other
            ))),
        }
    }
}

// [security] Realm token key - the secret never leaves the realm that owns it
#[derive(Debug, Clone)]
pub struct TokenKey {
    pub algorithm: SigningAlgorithm,
    pub secret: Secret<String>,
}

impl TokenKey {
    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }
}

// [security] Realm CA material - certificate public, private key wrapped in Secret
#[derive(Debug, Clone)]
pub struct CaMaterial {
    pub certificate_pem: String,
    pub private_key_pem: Secret<String>,
    // [business] Issuers above the realm CA, closest first
    pub chain_pem: Vec<String>,
}

impl CaMaterial {
    // [business] Chain handed out with every certificate: realm CA, then its issuers
    pub fn full_chain(&self) -> Vec<String> {
        std::iter::once(self.certificate_pem.clone())
            .chain(self.chain_pem.iter().cloned())
            .collect()
    }
}

// [business] Registered OAuth client - owned by exactly one realm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    // [security] Exact-match only, no prefixes or wildcards
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
}

impl OAuthClient {
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Returns the first requested scope the client may not use.
    pub fn first_denied_scope<'a>(&self, requested: &'a [String]) -> Option<&'a str> {
        requested
            .iter()
            .find(|scope| !self.scopes.contains(scope))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct Realm {
    pub name: String,
    pub server_names: Vec<String>,
    pub ca: CaMaterial,
    pub token_key: TokenKey,
    pub auth: AuthBackendConfig,
    pub clients: Vec<OAuthClient>,
    pub validity_days: u32,
}

impl Realm {
    pub fn find_client(&self, client_id: &str) -> Option<&OAuthClient> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }
}

/// Serialized form of a realm, as provisioned by administrators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmRecord {
    pub name: String,
    #[serde(default)]
    pub server_names: Vec<String>,
    pub signing_algorithm: String,
    pub signing_secret: String,
    pub ca_certificate: Option<String>,
    pub ca_private_key: Option<String>,
    #[serde(default)]
    pub ca_chain: Vec<String>,
    // [business] Missing keys fall back to the deployment's auth defaults
    #[serde(default)]
    pub auth: serde_json::Value,
    #[serde(default)]
    pub clients: Vec<OAuthClient>,
    pub validity_days: u32,
}

impl RealmRecord {
    // [business] Structural validation - any failure is a ConfigError, never a request error
    pub fn into_realm(self) -> Result<Realm> {
        self.into_realm_with(&AuthDefaults::default())
    }

    pub fn into_realm_with(self, auth_defaults: &AuthDefaults) -> Result<Realm> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(EnrollError::Config("realm name is empty".into()));
        }
        let config_err = |what: &str| EnrollError::Config(format!("realm {}: {}", name, what));

        let certificate_pem = self
            .ca_certificate
            .filter(|pem| !pem.trim().is_empty())
            .ok_or_else(|| config_err("missing CA certificate"))?;
        let private_key_pem = self
            .ca_private_key
            .filter(|pem| !pem.trim().is_empty())
            .ok_or_else(|| config_err("missing CA private key"))?;
        rcgen::KeyPair::from_pem(&private_key_pem)
            .map_err(|e| config_err(&format!("unreadable CA private key: {}", e)))?;
        crate::ca::csr::ca_not_after(&certificate_pem)
            .map_err(|e| config_err(&format!("unreadable CA certificate: {}", e)))?;

        let algorithm = SigningAlgorithm::from_str(&self.signing_algorithm)
            .map_err(|_| config_err("unsupported signing algorithm"))?;
        if self.signing_secret.len() < MIN_SECRET_LEN {
            return Err(config_err("signing secret is too short"));
        }

        let auth = auth_defaults
            .resolve(&self.auth)
            .map_err(|e| config_err(&e.to_string()))?;

        let mut seen = BTreeSet::new();
        for client in &self.clients {
            if client.client_id.trim().is_empty() {
                return Err(config_err("client with empty client_id"));
            }
            if !seen.insert(client.client_id.as_str()) {
                return Err(config_err(&format!(
                    "duplicate client {}",
                    client.client_id
                )));
            }
            if client.redirect_uris.is_empty() || client.scopes.is_empty() {
                return Err(config_err(&format!(
                    "client {} needs redirect URIs and scopes",
                    client.client_id
                )));
            }
        }

        if self.validity_days == 0 {
            return Err(config_err("validity_days must be positive"));
        }

        Ok(Realm {
            name,
            server_names: self.server_names,
            ca: CaMaterial {
                certificate_pem,
                private_key_pem: Secret::new(private_key_pem),
                chain_pem: self.ca_chain,
            },
            token_key: TokenKey {
                algorithm,
                secret: Secret::new(self.signing_secret),
            },
            auth,
            clients: self.clients,
            validity_days: self.validity_days,
        })
    }
}

// [business] Realm registry - read-only during request handling
#[async_trait]
pub trait RealmStore: Send + Sync + Debug {
    /// Loads a realm by name; `NotFound` if unknown, `Config` if its record is invalid.
    async fn resolve(&self, name: &str) -> Result<Arc<Realm>>;

    /// Every server name of every realm, sorted and deduplicated.
    async fn list_server_names(&self) -> Result<Vec<String>>;

    /// Auth backend configuration of every realm, keyed by realm name.
    async fn auth_configs(&self) -> Result<BTreeMap<String, AuthBackendConfig>>;

    async fn find_client(&self, realm: &Realm, client_id: &str) -> Result<OAuthClient> {
        realm
            .find_client(client_id)
            .cloned()
            .ok_or_else(|| EnrollError::NotFound(format!("Client {}", client_id)))
    }
}
