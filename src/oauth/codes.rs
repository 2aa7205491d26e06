// [business] Authorization code storage - `consume` is the one atomic check-and-set that makes codes single-use

use super::AuthorizationCode;
use crate::{
    db::{queries, AuthCodeRow, Database},
    error::{EnrollError, Result},
    security::{ChallengeMethod, PkceChallenge},
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{fmt::Debug, str::FromStr};
use time::OffsetDateTime;

fn unknown_code() -> EnrollError {
    EnrollError::NotFound("Authorization code".into())
}

#[async_trait]
pub trait AuthCodeStore: Send + Sync + Debug {
    async fn insert(&self, code: &AuthorizationCode) -> Result<()>;

    /// Marks the code consumed and returns it as it was issued.
    /// `NotFound` for unknown codes, `CodeAlreadyUsed` for every caller but the first.
    async fn consume(&self, realm: &str, code: &str) -> Result<AuthorizationCode>;

    /// Deletes codes past their expiry; returns how many were removed.
    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64>;
}

#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    codes: DashMap<(String, String), AuthorizationCode>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthCodeStore for MemoryCodeStore {
    async fn insert(&self, code: &AuthorizationCode) -> Result<()> {
        self.codes
            .insert((code.realm.clone(), code.code.clone()), code.clone());
        Ok(())
    }

    async fn consume(&self, realm: &str, code: &str) -> Result<AuthorizationCode> {
        // [rust] get_mut holds the shard write lock across the check and the flip
        let mut entry = self
            .codes
            .get_mut(&(realm.to_string(), code.to_string()))
            .ok_or_else(unknown_code)?;
        if entry.consumed {
            return Err(EnrollError::CodeAlreadyUsed);
        }
        let issued = entry.clone();
        entry.consumed = true;
        Ok(issued)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64> {
        let before = self.codes.len();
        self.codes.retain(|_, code| code.expires_at >= now);
        Ok((before - self.codes.len()) as u64)
    }
}

#[derive(Debug, Clone)]
pub struct PgCodeStore {
    db: Database,
}

impl PgCodeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl From<&AuthorizationCode> for AuthCodeRow {
    fn from(code: &AuthorizationCode) -> Self {
        AuthCodeRow {
            realm: code.realm.clone(),
            code: code.code.clone(),
            client_id: code.client_id.clone(),
            user_id: code.user_id.clone(),
            scopes: code.scopes.clone(),
            redirect_uri: code.redirect_uri.clone(),
            code_challenge: code.pkce.as_ref().map(|p| p.challenge.clone()),
            code_challenge_method: code.pkce.as_ref().map(|p| p.method.as_str().to_string()),
            expires_at: code.expires_at,
            consumed: code.consumed,
        }
    }
}

impl TryFrom<AuthCodeRow> for AuthorizationCode {
    type Error = EnrollError;

    fn try_from(row: AuthCodeRow) -> Result<Self> {
        let pkce = match (row.code_challenge, row.code_challenge_method) {
            (Some(challenge), Some(method)) => Some(PkceChallenge {
                challenge,
                method: ChallengeMethod::from_str(&method)
                    .map_err(|e| EnrollError::Storage(e.to_string()))?,
            }),
            (None, None) => None,
            _ => {
                return Err(EnrollError::Storage(
                    "authorization code with half a PKCE challenge".into(),
                ))
            }
        };
        Ok(AuthorizationCode {
            realm: row.realm,
            code: row.code,
            client_id: row.client_id,
            user_id: row.user_id,
            scopes: row.scopes,
            redirect_uri: row.redirect_uri,
            pkce,
            expires_at: row.expires_at,
            // [business] Rows come back from the consuming UPDATE; report them as issued
            consumed: false,
        })
    }
}

#[async_trait]
impl AuthCodeStore for PgCodeStore {
    async fn insert(&self, code: &AuthorizationCode) -> Result<()> {
        Ok(queries::create_auth_code(&self.db, &AuthCodeRow::from(code)).await?)
    }

    async fn consume(&self, realm: &str, code: &str) -> Result<AuthorizationCode> {
        match queries::consume_auth_code(&self.db, realm, code).await? {
            Some(row) => AuthorizationCode::try_from(row),
            None if queries::auth_code_exists(&self.db, realm, code).await? => {
                Err(EnrollError::CodeAlreadyUsed)
            }
            None => Err(unknown_code()),
        }
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64> {
        Ok(queries::delete_expired_auth_codes(&self.db, now).await?)
    }
}
