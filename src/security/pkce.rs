// [library] Base64 encoding for PKCE code challenges - RFC 7636 requires base64url without padding
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PkceError {
    #[error("Invalid code verifier length: {0}. Must be between 43 and 128 characters")]
    InvalidVerifierLength(usize),
    #[error("Invalid code challenge length: {0}. Must be between 43 and 128 characters")]
    InvalidChallengeLength(usize),
    #[error("Unsupported code challenge method: {0}. Only S256 is supported")]
    UnsupportedMethod(String),
    #[error("Code verifier contains invalid characters")]
    InvalidVerifierCharacters,
    #[error("PKCE verification failed")]
    VerificationFailed,
}

// [security] Only S256 - "plain" offers no protection against code interception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMethod {
    S256,
}

impl ChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMethod::S256 => "S256",
        }
    }
}

impl FromStr for ChallengeMethod {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, PkceError> {
        match s {
            "S256" => Ok(ChallengeMethod::S256),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Challenge bound to an authorization code at issue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: ChallengeMethod,
}

impl PkceChallenge {
    /// Validates a challenge as received on the authorization request.
    pub fn parse(challenge: &str, method: Option<&str>) -> Result<Self, PkceError> {
        // [security] RFC 7636 defaults to "plain" when the method is omitted, which we refuse
        let method = ChallengeMethod::from_str(method.unwrap_or("plain"))?;
        validate_code_challenge(challenge)?;
        Ok(Self {
            challenge: challenge.to_string(),
            method,
        })
    }

    pub fn from_verifier(code_verifier: &str) -> Result<Self, PkceError> {
        Ok(Self {
            challenge: create_code_challenge(code_verifier)?,
            method: ChallengeMethod::S256,
        })
    }

    pub fn verify(&self, code_verifier: &str) -> Result<(), PkceError> {
        let computed = create_code_challenge(code_verifier)?;
        if computed != self.challenge {
            return Err(PkceError::VerificationFailed);
        }
        Ok(())
    }
}

// [security] Generate cryptographically secure PKCE code verifier
pub fn generate_code_verifier() -> String {
    let random_bytes: Vec<u8> = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .collect();

    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Create a code challenge from a code verifier using S256 method
pub fn create_code_challenge(code_verifier: &str) -> Result<String, PkceError> {
    validate_code_verifier(code_verifier)?;

    let digest = Sha256::digest(code_verifier.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(digest))
}

/// Validate that a code verifier meets PKCE requirements
pub fn validate_code_verifier(code_verifier: &str) -> Result<(), PkceError> {
    let len = code_verifier.len();
    if !(43..=128).contains(&len) {
        return Err(PkceError::InvalidVerifierLength(len));
    }

    // RFC 7636: [A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"
    if !code_verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
    {
        return Err(PkceError::InvalidVerifierCharacters);
    }

    Ok(())
}

pub fn validate_code_challenge(code_challenge: &str) -> Result<(), PkceError> {
    let len = code_challenge.len();
    if !(43..=128).contains(&len) {
        return Err(PkceError::InvalidChallengeLength(len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_verifier() {
        let verifier = generate_code_verifier();
        assert!(verifier.len() >= 43);
        assert!(verifier.len() <= 128);
        validate_code_verifier(&verifier).expect("Generated verifier should be valid");
    }

    #[test]
    fn test_rfc7636_appendix_b() {
        let challenge =
            create_code_challenge("dBjftJeZ4CVP-mB92K27uhbUs6N9dgy3r8xD0sxt6BEu7I0g").unwrap();
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_challenge_round_trip() {
        let verifier = generate_code_verifier();
        let challenge = PkceChallenge::from_verifier(&verifier).unwrap();
        assert_eq!(challenge.method, ChallengeMethod::S256);
        challenge.verify(&verifier).unwrap();

        assert_eq!(
            challenge.verify(&generate_code_verifier()),
            Err(PkceError::VerificationFailed)
        );
    }

    #[test]
    fn test_parse_requires_s256() {
        let challenge = create_code_challenge(&generate_code_verifier()).unwrap();
        assert!(PkceChallenge::parse(&challenge, Some("S256")).is_ok());
        assert!(matches!(
            PkceChallenge::parse(&challenge, Some("plain")),
            Err(PkceError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            PkceChallenge::parse(&challenge, None),
            Err(PkceError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            PkceChallenge::parse("short", Some("S256")),
            Err(PkceError::InvalidChallengeLength(5))
        ));
    }

    #[test]
    fn test_invalid_verifiers() {
        assert!(matches!(
            validate_code_verifier("short"),
            Err(PkceError::InvalidVerifierLength(5))
        ));
        assert!(matches!(
            validate_code_verifier(&"a".repeat(129)),
            Err(PkceError::InvalidVerifierLength(129))
        ));
        assert!(matches!(
            validate_code_verifier(&("a".repeat(43) + "!")),
            Err(PkceError::InvalidVerifierCharacters)
        ));
    }
}
