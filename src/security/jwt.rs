// [business] Realm-scoped access tokens and their verification
use crate::{
    error::{Credential, EnrollError, Result},
    realm::{Realm, SigningAlgorithm, TokenKey},
};

// [library] JOSE kit - HMAC JSON Web Signatures
use josekit::{
    jws::{JwsHeader, JwsSigner, JwsVerifier, HS256, HS384, HS512},
    jwt::{self, JwtPayload},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

// [library] Base64 encoding for JWT headers and opaque random tokens
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String, // [security] Issuing realm
    pub sub: String, // [business] User identifier
    pub aud: String, // [security] Client the token was issued to
    pub scope: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String, // [security] Makes every token unique, even within one second
}

impl AccessTokenClaims {
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }
}

// [security] Signs and verifies tokens with a single realm's key
pub struct TokenSigner<'a> {
    issuer: &'a str,
    key: &'a TokenKey,
}

impl<'a> TokenSigner<'a> {
    pub fn for_realm(realm: &'a Realm) -> Self {
        Self {
            issuer: &realm.name,
            key: &realm.token_key,
        }
    }

    pub fn issue(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
        now: OffsetDateTime,
        ttl: Duration,
    ) -> Result<(String, AccessTokenClaims)> {
        let claims = AccessTokenClaims {
            iss: self.issuer.to_string(),
            sub: user_id.to_string(),
            aud: client_id.to_string(),
            scope: scopes.join(" "),
            exp: (now + ttl).unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    fn sign(&self, claims: &AccessTokenClaims) -> Result<String> {
        let mut header = JwsHeader::new();
        header.set_token_type("JWT");

        let mut payload = JwtPayload::new();
        if let Value::Object(map) = serde_json::to_value(claims).map_err(internal)? {
            for (key, value) in map {
                payload.set_claim(&key, Some(value)).map_err(internal)?;
            }
        }

        let signer = self.signer()?;
        jwt::encode_with_signer(&payload, &header, signer.as_ref()).map_err(internal)
    }

    /// Verifies signature, algorithm, issuer and expiry, in that order.
    pub fn verify(&self, token: &str, now: OffsetDateTime) -> Result<AccessTokenClaims> {
        // [security] Algorithm is pinned by the realm; whatever the header claims is checked first
        let alg = extract_alg_from_jwt(token)?;
        if alg != self.key.algorithm.name() {
            warn!(
                target: "security",
                realm = %self.issuer,
                expected = self.key.algorithm.name(),
                presented = %alg,
                "Access token algorithm mismatch"
            );
            return Err(EnrollError::InvalidSignature);
        }

        let verifier = self.verifier()?;
        let (payload, _header) = jwt::decode_with_verifier(token, verifier.as_ref())
            .map_err(|_| EnrollError::InvalidSignature)?;

        let claims: AccessTokenClaims =
            serde_json::from_value(Value::Object(payload.claims_set().clone()))
                .map_err(|_| EnrollError::InvalidSignature)?;

        // [security] A token signed with this key but minted for another realm is still foreign
        if claims.iss != self.issuer {
            return Err(EnrollError::InvalidSignature);
        }
        if claims.exp <= now.unix_timestamp() {
            return Err(EnrollError::Expired(Credential::AccessToken));
        }
        Ok(claims)
    }

    fn signer(&self) -> Result<Box<dyn JwsSigner>> {
        let secret = self.key.secret_bytes();
        let signer: Box<dyn JwsSigner> = match self.key.algorithm {
            SigningAlgorithm::HS256 => Box::new(HS256.signer_from_bytes(secret).map_err(internal)?),
            SigningAlgorithm::HS384 => Box::new(HS384.signer_from_bytes(secret).map_err(internal)?),
            SigningAlgorithm::HS512 => Box::new(HS512.signer_from_bytes(secret).map_err(internal)?),
        };
        Ok(signer)
    }

    fn verifier(&self) -> Result<Box<dyn JwsVerifier>> {
        let secret = self.key.secret_bytes();
        let verifier: Box<dyn JwsVerifier> = match self.key.algorithm {
            SigningAlgorithm::HS256 => Box::new(HS256.verifier_from_bytes(secret).map_err(internal)?),
            SigningAlgorithm::HS384 => Box::new(HS384.verifier_from_bytes(secret).map_err(internal)?),
            SigningAlgorithm::HS512 => Box::new(HS512.verifier_from_bytes(secret).map_err(internal)?),
        };
        Ok(verifier)
    }
}

fn internal(e: impl std::fmt::Display) -> EnrollError {
    EnrollError::Internal(format!("token signing: {}", e))
}

// [security] Read the header's alg without trusting anything else in the token
fn extract_alg_from_jwt(token: &str) -> Result<String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(EnrollError::InvalidSignature);
    }

    let header_json = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|_| EnrollError::InvalidSignature)?;
    let header: Value =
        serde_json::from_slice(&header_json).map_err(|_| EnrollError::InvalidSignature)?;

    header
        .get("alg")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or(EnrollError::InvalidSignature)
}

// [security] Generate cryptographically secure random token
// Used for authorization codes and other opaque bearer values
pub fn generate_random_token() -> String {
    use rand::Rng;

    // [security] 32 bytes (256 bits) from the thread-local CSPRNG
    let random_bytes: [u8; 32] = rand::thread_rng().gen();

    URL_SAFE_NO_PAD.encode(random_bytes)
}
