// [library] Serde for DTOs, sqlx::FromRow for row mapping
use serde::{Deserialize, Serialize};
use sqlx::types::{time::OffsetDateTime, Json};

// [business] Realm row - CA material and secret live in the same row as the realm name
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RealmRow {
    pub name: String,
    pub signing_algorithm: String,
    pub signing_secret: String, // [security] Never logged
    pub ca_certificate: Option<String>, // [business] NULL means the realm is not provisioned yet
    pub ca_private_key: Option<String>, // [security] PKCS#8 PEM
    pub ca_chain: Vec<String>,
    pub auth_backend: Json<serde_json::Value>,
    pub validity_days: i32,
}

// [business] Registered OAuth client of a realm
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClientRow {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
}

// [business] Authorization code row - consumed flips exactly once
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthCodeRow {
    pub realm: String,
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub expires_at: OffsetDateTime,
    pub consumed: bool,
}

// [business] Issuance ledger row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IssuedCertificateRow {
    pub realm: String,
    pub serial: String,
    pub subject: String,
    pub user_id: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub issued_at: OffsetDateTime,
}

// [business] Token endpoint response - RFC 6749 section 5.1
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String, // [business] Always "Bearer"
    pub expires_in: i64,
    pub scope: String,
}

// [business] OAuth2 error body - RFC 6749 section 5.2
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthError {
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthError {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            error_description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.error_description = Some(description.to_string());
        self
    }
}
