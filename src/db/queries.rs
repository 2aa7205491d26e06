use super::models::*;
use crate::db::Database;
use sqlx::{query, query_as, query_scalar};
use time::OffsetDateTime;

// Realm queries

pub async fn get_realm(db: &Database, name: &str) -> Result<Option<RealmRow>, sqlx::Error> {
    query_as::<_, RealmRow>(
        "SELECT name, signing_algorithm, signing_secret, ca_certificate, ca_private_key,
                ca_chain, auth_backend, validity_days
         FROM realms
         WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(db.as_ref())
    .await
}

pub async fn get_realm_server_names(db: &Database, realm: &str) -> Result<Vec<String>, sqlx::Error> {
    query_scalar::<_, String>(
        "SELECT server_name FROM realm_server_names WHERE realm = $1 ORDER BY server_name",
    )
    .bind(realm)
    .fetch_all(db.as_ref())
    .await
}

pub async fn get_all_server_names(db: &Database) -> Result<Vec<String>, sqlx::Error> {
    query_scalar::<_, String>(
        "SELECT DISTINCT server_name FROM realm_server_names ORDER BY server_name",
    )
    .fetch_all(db.as_ref())
    .await
}

pub async fn get_realm_clients(db: &Database, realm: &str) -> Result<Vec<ClientRow>, sqlx::Error> {
    query_as::<_, ClientRow>(
        "SELECT client_id, redirect_uris, scopes
         FROM realm_clients
         WHERE realm = $1
         ORDER BY client_id",
    )
    .bind(realm)
    .fetch_all(db.as_ref())
    .await
}

pub async fn get_auth_backends(
    db: &Database,
) -> Result<Vec<(String, sqlx::types::Json<serde_json::Value>)>, sqlx::Error> {
    query_as::<_, (String, sqlx::types::Json<serde_json::Value>)>(
        "SELECT name, auth_backend FROM realms ORDER BY name",
    )
    .fetch_all(db.as_ref())
    .await
}

// Auth code queries

pub async fn create_auth_code(db: &Database, row: &AuthCodeRow) -> Result<(), sqlx::Error> {
    query(
        "INSERT INTO auth_codes
         (realm, code, client_id, user_id, scopes, redirect_uri,
          code_challenge, code_challenge_method, expires_at, consumed)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(&row.realm)
    .bind(&row.code)
    .bind(&row.client_id)
    .bind(&row.user_id)
    .bind(&row.scopes)
    .bind(&row.redirect_uri)
    .bind(&row.code_challenge)
    .bind(&row.code_challenge_method)
    .bind(row.expires_at)
    .bind(row.consumed)
    .execute(db.as_ref())
    .await?;
    Ok(())
}

/// Check-and-set in one statement: returns the row only for the caller that flipped it.
pub async fn consume_auth_code(
    db: &Database,
    realm: &str,
    code: &str,
) -> Result<Option<AuthCodeRow>, sqlx::Error> {
    query_as::<_, AuthCodeRow>(
        "UPDATE auth_codes SET consumed = true
         WHERE realm = $1 AND code = $2 AND consumed = false
         RETURNING realm, code, client_id, user_id, scopes, redirect_uri,
                   code_challenge, code_challenge_method, expires_at, consumed",
    )
    .bind(realm)
    .bind(code)
    .fetch_optional(db.as_ref())
    .await
}

pub async fn auth_code_exists(db: &Database, realm: &str, code: &str) -> Result<bool, sqlx::Error> {
    query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM auth_codes WHERE realm = $1 AND code = $2)",
    )
    .bind(realm)
    .bind(code)
    .fetch_one(db.as_ref())
    .await
}

pub async fn delete_expired_auth_codes(db: &Database, now: OffsetDateTime) -> Result<u64, sqlx::Error> {
    let result = query("DELETE FROM auth_codes WHERE expires_at < $1")
        .bind(now)
        .execute(db.as_ref())
        .await?;
    Ok(result.rows_affected())
}

// Issuance ledger queries

/// Inserts the ledger row unless the serial is already taken in that realm.
pub async fn claim_serial(db: &Database, row: &IssuedCertificateRow) -> Result<bool, sqlx::Error> {
    let result = query(
        "INSERT INTO issued_certificates
         (realm, serial, subject, user_id, not_before, not_after, issued_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (realm, serial) DO NOTHING",
    )
    .bind(&row.realm)
    .bind(&row.serial)
    .bind(&row.subject)
    .bind(&row.user_id)
    .bind(row.not_before)
    .bind(row.not_after)
    .bind(row.issued_at)
    .execute(db.as_ref())
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn release_serial(db: &Database, realm: &str, serial: &str) -> Result<(), sqlx::Error> {
    query("DELETE FROM issued_certificates WHERE realm = $1 AND serial = $2")
        .bind(realm)
        .bind(serial)
        .execute(db.as_ref())
        .await?;
    Ok(())
}

pub async fn get_issued_certificates(
    db: &Database,
    realm: &str,
) -> Result<Vec<IssuedCertificateRow>, sqlx::Error> {
    query_as::<_, IssuedCertificateRow>(
        "SELECT realm, serial, subject, user_id, not_before, not_after, issued_at
         FROM issued_certificates
         WHERE realm = $1
         ORDER BY issued_at",
    )
    .bind(realm)
    .fetch_all(db.as_ref())
    .await
}
