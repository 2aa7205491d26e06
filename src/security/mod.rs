// [rust] Security module organization - token signing and proof-of-possession helpers
pub mod jwt; // [security] Realm-keyed HMAC access tokens
pub mod pkce; // [security] Proof Key for Code Exchange (RFC 7636), S256 only

pub use jwt::{generate_random_token, AccessTokenClaims, TokenSigner};
pub use pkce::{ChallengeMethod, PkceChallenge, PkceError};
