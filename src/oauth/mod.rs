// [business] OAuth2 subset for enrollment: single-use authorization codes, stateless access tokens
pub mod authorize;
pub mod codes;
pub mod token;

pub use authorize::authorize_handler;
pub use codes::{AuthCodeStore, MemoryCodeStore, PgCodeStore};
pub use token::token_handler;

use crate::{
    error::{Credential, EnrollError, Result},
    realm::RealmStore,
    security::{generate_random_token, PkceChallenge, TokenSigner},
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

/// Authorization code as issued; `consumed` flips exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub realm: String,
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub pkce: Option<PkceChallenge>,
    pub expires_at: OffsetDateTime,
    pub consumed: bool,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub realm: String,
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub expires_at: OffsetDateTime,
    pub expires_in: i64,
}

/// What a verified access token grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub user_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub code_ttl: Duration,
    pub access_ttl: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            code_ttl: Duration::minutes(5),
            access_ttl: Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenIssuer {
    realms: Arc<dyn RealmStore>,
    codes: Arc<dyn AuthCodeStore>,
    policy: TokenPolicy,
}

impl TokenIssuer {
    pub fn new(
        realms: Arc<dyn RealmStore>,
        codes: Arc<dyn AuthCodeStore>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            realms,
            codes,
            policy,
        }
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    pub async fn issue_authorization_code(
        &self,
        realm: &str,
        client_id: &str,
        redirect_uri: &str,
        user_id: &str,
        requested_scopes: &[String],
        pkce: Option<PkceChallenge>,
    ) -> Result<AuthorizationCode> {
        let realm = self.realms.resolve(realm).await?;
        let client = self
            .realms
            .find_client(&realm, client_id)
            .await
            .map_err(|e| match e {
                EnrollError::NotFound(_) => {
                    warn!(
                        target: "security",
                        realm = %realm.name,
                        client_id = %client_id,
                        "Authorization requested for unknown client"
                    );
                    EnrollError::InvalidClient(client_id.to_string())
                }
                other => other,
            })?;

        // [security] Exact string match - no prefixes, no wildcards
        if !client.allows_redirect(redirect_uri) {
            warn!(
                realm = %realm.name,
                client_id = %client_id,
                redirect_uri = %redirect_uri,
                "Unregistered redirect URI"
            );
            return Err(EnrollError::InvalidRedirect);
        }

        let mut scopes: Vec<String> = Vec::with_capacity(requested_scopes.len());
        for scope in requested_scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        if scopes.is_empty() {
            return Err(EnrollError::InvalidScope("no scope requested".into()));
        }
        if let Some(denied) = client.first_denied_scope(&scopes) {
            return Err(EnrollError::InvalidScope(denied.to_string()));
        }

        let code = AuthorizationCode {
            realm: realm.name.clone(),
            code: generate_random_token(),
            client_id: client.client_id.clone(),
            user_id: user_id.to_string(),
            scopes,
            redirect_uri: redirect_uri.to_string(),
            pkce,
            expires_at: OffsetDateTime::now_utc() + self.policy.code_ttl,
            consumed: false,
        };
        self.codes.insert(&code).await?;

        info!(
            realm = %code.realm,
            client_id = %code.client_id,
            user_id = %code.user_id,
            "Authorization code issued"
        );
        Ok(code)
    }

    /// Redeems a code for an access token. The code is burnt by the first
    /// attempt whatever its outcome, so a failed redemption cannot be retried.
    pub async fn redeem_authorization_code(
        &self,
        realm: &str,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<AccessToken> {
        let realm = self.realms.resolve(realm).await?;
        if realm.find_client(client_id).is_none() {
            return Err(EnrollError::InvalidClient(client_id.to_string()));
        }

        let stored = match self.codes.consume(&realm.name, code).await {
            Ok(stored) => stored,
            Err(EnrollError::CodeAlreadyUsed) => {
                warn!(
                    target: "security",
                    realm = %realm.name,
                    client_id = %client_id,
                    "Authorization code replayed"
                );
                return Err(EnrollError::CodeAlreadyUsed);
            }
            Err(e) => return Err(e),
        };

        let now = OffsetDateTime::now_utc();
        if stored.expires_at <= now {
            return Err(EnrollError::Expired(Credential::AuthorizationCode));
        }
        if stored.client_id != client_id {
            warn!(
                target: "security",
                realm = %realm.name,
                issued_to = %stored.client_id,
                presented_by = %client_id,
                "Authorization code presented by another client"
            );
            return Err(EnrollError::ClientMismatch);
        }
        if stored.redirect_uri != redirect_uri {
            return Err(EnrollError::RedirectMismatch);
        }
        if let Some(challenge) = &stored.pkce {
            let verifier = code_verifier.ok_or(EnrollError::PkceMismatch)?;
            challenge
                .verify(verifier)
                .map_err(|_| EnrollError::PkceMismatch)?;
        }

        let (token, claims) = TokenSigner::for_realm(&realm).issue(
            &stored.user_id,
            &stored.client_id,
            &stored.scopes,
            now,
            self.policy.access_ttl,
        )?;

        info!(
            realm = %realm.name,
            client_id = %stored.client_id,
            user_id = %stored.user_id,
            "Access token issued"
        );

        Ok(AccessToken {
            token,
            realm: realm.name.clone(),
            client_id: stored.client_id,
            user_id: stored.user_id,
            scopes: stored.scopes,
            expires_at: OffsetDateTime::from_unix_timestamp(claims.exp)
                .map_err(|e| EnrollError::Internal(e.to_string()))?,
            expires_in: self.policy.access_ttl.whole_seconds(),
        })
    }

    /// Stateless: signature, realm-pinned algorithm, issuer and expiry only.
    pub async fn verify_access_token(&self, realm: &str, token: &str) -> Result<TokenGrant> {
        let realm = self.realms.resolve(realm).await?;
        let claims = TokenSigner::for_realm(&realm)
            .verify(token, OffsetDateTime::now_utc())
            .map_err(|e| {
                if matches!(e, EnrollError::InvalidSignature) {
                    warn!(
                        target: "security",
                        realm = %realm.name,
                        "Access token failed verification"
                    );
                }
                e
            })?;

        Ok(TokenGrant {
            scopes: claims.scopes(),
            user_id: claims.sub,
            client_id: claims.aud,
            expires_at: OffsetDateTime::from_unix_timestamp(claims.exp)
                .map_err(|_| EnrollError::InvalidSignature)?,
        })
    }

    /// Removes expired authorization codes. Nothing schedules this; operators call it.
    pub async fn purge_expired(&self) -> Result<u64> {
        let removed = self.codes.purge_expired(OffsetDateTime::now_utc()).await?;
        if removed > 0 {
            info!(removed, "Purged expired authorization codes");
        }
        Ok(removed)
    }
}
