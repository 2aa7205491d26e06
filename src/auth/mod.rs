// [business] Browser identity providers - a closed set, selected by the realm's `service` key

pub mod dev;
pub mod saml;

pub use dev::{DevAuth, DevParams};
pub use saml::{SamlAuth, SamlParams};

use crate::error::{EnrollError, Result};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Everything an operation may read from the incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    query: Vec<(String, String)>,
    headers: HeaderMap,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_request(query: Vec<(String, String)>, headers: HeaderMap) -> Self {
        Self { query, headers }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `realm` routing parameter: absent is `None`, repeated or empty is a request error.
    pub fn realm_param(&self) -> Result<Option<&str>> {
        let mut values = self.query.iter().filter(|(k, _)| k == "realm");
        let first = match values.next() {
            None => return Ok(None),
            Some((_, v)) => v.as_str(),
        };
        if values.next().is_some() || first.trim().is_empty() {
            return Err(EnrollError::BadRequest(
                "realm parameter must be a single string".into(),
            ));
        }
        Ok(Some(first))
    }
}

/// What the core needs from a browser identity backend.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stable user identifier of the authenticated principal.
    async fn require_auth(&self, ctx: &RequestContext) -> Result<String>;

    /// Advisory realm hint; callers must re-resolve it against the realm store.
    fn guess_realm(
        &self,
        ctx: &RequestContext,
        known: &BTreeMap<String, AuthBackendConfig>,
    ) -> Option<String>;
}

/// Per-realm auth backend selection, discriminated by `service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum AuthBackendConfig {
    Saml(SamlParams),
    Dev(DevParams),
}

impl AuthBackendConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| EnrollError::Config(format!("invalid auth backend: {}", e)))
    }

    pub fn provider(&self) -> IdentityBackend {
        match self {
            AuthBackendConfig::Saml(params) => IdentityBackend::Saml(SamlAuth::new(params.clone())),
            AuthBackendConfig::Dev(params) => IdentityBackend::Dev(DevAuth::new(params.clone())),
        }
    }
}

// [business] Deployment-wide auth settings; a realm's own `auth` object is laid over them key by key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthDefaults {
    params: Map<String, Value>,
}

impl AuthDefaults {
    pub fn new(service: Option<&str>, mut params: Map<String, Value>) -> Self {
        if let Some(service) = service {
            params.insert("service".to_string(), Value::String(service.to_string()));
        }
        Self { params }
    }

    pub fn merge(&self, realm_auth: &Value) -> Result<Value> {
        let mut merged = self.params.clone();
        match realm_auth {
            Value::Null => {}
            Value::Object(own) => {
                for (key, value) in own {
                    merged.insert(key.clone(), value.clone());
                }
            }
            _ => {
                return Err(EnrollError::Config(
                    "invalid auth backend: expected an object".into(),
                ))
            }
        }
        Ok(Value::Object(merged))
    }

    pub fn resolve(&self, realm_auth: &Value) -> Result<AuthBackendConfig> {
        AuthBackendConfig::from_value(self.merge(realm_auth)?)
    }
}

#[derive(Debug, Clone)]
pub enum IdentityBackend {
    Saml(SamlAuth),
    Dev(DevAuth),
}

#[async_trait]
impl IdentityProvider for IdentityBackend {
    async fn require_auth(&self, ctx: &RequestContext) -> Result<String> {
        match self {
            IdentityBackend::Saml(auth) => auth.require_auth(ctx).await,
            IdentityBackend::Dev(auth) => auth.require_auth(ctx).await,
        }
    }

    fn guess_realm(
        &self,
        ctx: &RequestContext,
        known: &BTreeMap<String, AuthBackendConfig>,
    ) -> Option<String> {
        match self {
            IdentityBackend::Saml(auth) => auth.guess_realm(ctx, known),
            IdentityBackend::Dev(auth) => auth.guess_realm(ctx, known),
        }
    }
}
