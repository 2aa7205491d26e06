// [business] Enrollment orchestration
// RealmResolved -> Authenticated -> AuthorizationCodeIssued -> TokenRedeemed -> CertificateSigned,
// optionally entered through GuessedRealm. The first failing step ends the flow; nothing is retried.

use crate::{
    auth::{IdentityProvider, RequestContext},
    ca::{CertificateAuthority, IssuedCertificate},
    error::{EnrollError, Result},
    oauth::{AccessToken, AuthorizationCode, TokenIssuer},
    realm::{Realm, RealmStore},
    security::PkceChallenge,
};
use std::{fmt, sync::Arc};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Started,
    GuessedRealm,
    RealmResolved,
    Authenticated,
    AuthorizationCodeIssued,
    TokenRedeemed,
    CertificateSigned,
}

impl EnrollmentState {
    // Legal successors; everything else is a programming error
    fn may_follow(self, previous: EnrollmentState) -> bool {
        use EnrollmentState::*;
        matches!(
            (previous, self),
            (Started, GuessedRealm)
                | (Started, RealmResolved)
                | (GuessedRealm, RealmResolved)
                | (RealmResolved, Authenticated)
                | (Authenticated, AuthorizationCodeIssued)
                | (AuthorizationCodeIssued, TokenRedeemed)
                | (TokenRedeemed, CertificateSigned)
        )
    }
}

impl fmt::Display for EnrollmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// States visited by one enrollment, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentTrail {
    states: Vec<EnrollmentState>,
}

impl EnrollmentTrail {
    fn new() -> Self {
        Self {
            states: vec![EnrollmentState::Started],
        }
    }

    pub fn current(&self) -> EnrollmentState {
        self.states
            .last()
            .copied()
            .unwrap_or(EnrollmentState::Started)
    }

    pub fn states(&self) -> &[EnrollmentState] {
        &self.states
    }

    fn advance(&mut self, next: EnrollmentState) -> Result<()> {
        let current = self.current();
        if !next.may_follow(current) {
            return Err(EnrollError::Internal(format!(
                "illegal enrollment transition {} -> {}",
                current, next
            )));
        }
        debug!(from = %current, to = %next, "Enrollment state transition");
        self.states.push(next);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Realm whose identity provider guesses the realm when a request names none.
    pub base_realm: Option<String>,
    /// Client the in-browser flow acts as; must be registered in every realm using that flow.
    pub browser_client_id: String,
    pub browser_redirect_uri: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            base_realm: None,
            browser_client_id: "browser".to_string(),
            browser_redirect_uri: "urn:ietf:wg:oauth:2.0:oob".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedRealm {
    pub realm: Arc<Realm>,
    pub guessed: bool,
}

#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub code: AuthorizationCode,
    pub state: Option<String>,
}

impl AuthorizationGrant {
    /// `redirect_uri` with `code` (and `state`, when present) appended.
    pub fn redirect_location(&self) -> String {
        let separator = if self.code.redirect_uri.contains('?') {
            '&'
        } else {
            '?'
        };
        let mut location = format!(
            "{}{}code={}",
            self.code.redirect_uri,
            separator,
            urlencoding::encode(&self.code.code)
        );
        if let Some(state) = &self.state {
            location.push_str(&format!("&state={}", urlencoding::encode(state)));
        }
        location
    }
}

/// Result of a complete in-browser enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub certificate: IssuedCertificate,
    pub trail: EnrollmentTrail,
}

/// Parameters of an authorization request, as received from the client.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub pkce: Option<PkceChallenge>,
}

#[derive(Debug, Clone)]
pub struct EnrollmentOrchestrator {
    realms: Arc<dyn RealmStore>,
    tokens: TokenIssuer,
    ca: CertificateAuthority,
    settings: OrchestratorSettings,
}

impl EnrollmentOrchestrator {
    pub fn new(
        realms: Arc<dyn RealmStore>,
        tokens: TokenIssuer,
        ca: CertificateAuthority,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            realms,
            tokens,
            ca,
            settings,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn ca(&self) -> &CertificateAuthority {
        &self.ca
    }

    /// Realm named by the request, or failing that the base realm provider's guess.
    /// A guess is only a hint: it is resolved through the store like any other name.
    pub async fn resolve_realm(&self, ctx: &RequestContext) -> Result<ResolvedRealm> {
        if let Some(name) = ctx.realm_param()? {
            let realm = self.realms.resolve(name).await?;
            return Ok(ResolvedRealm {
                realm,
                guessed: false,
            });
        }

        let base = self
            .settings
            .base_realm
            .as_deref()
            .ok_or_else(|| EnrollError::BadRequest("No realm set".into()))?;
        let base = self.realms.resolve(base).await?;
        let known = self.realms.auth_configs().await?;

        match base.auth.provider().guess_realm(ctx, &known) {
            Some(guess) => {
                debug!(guess = %guess, "Realm guessed from request");
                let realm = self.realms.resolve(&guess).await?;
                Ok(ResolvedRealm {
                    realm,
                    guessed: true,
                })
            }
            None => Err(EnrollError::BadRequest("No realm set".into())),
        }
    }

    pub async fn authenticate(&self, realm: &Realm, ctx: &RequestContext) -> Result<String> {
        realm.auth.provider().require_auth(ctx).await
    }

    /// Authorization endpoint: resolve, authenticate, then issue a code for the client.
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        request: AuthorizationRequest,
    ) -> Result<AuthorizationGrant> {
        let mut trail = EnrollmentTrail::new();
        let resolved = self.enter_realm(ctx, &mut trail).await?;
        let user_id = self.authenticate(&resolved.realm, ctx).await?;
        trail.advance(EnrollmentState::Authenticated)?;

        let code = self
            .tokens
            .issue_authorization_code(
                &resolved.realm.name,
                &request.client_id,
                &request.redirect_uri,
                &user_id,
                &request.scopes,
                request.pkce,
            )
            .await?;
        trail.advance(EnrollmentState::AuthorizationCodeIssued)?;

        Ok(AuthorizationGrant {
            code,
            state: request.state,
        })
    }

    pub async fn exchange(
        &self,
        realm: &str,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<AccessToken> {
        self.tokens
            .redeem_authorization_code(realm, code, client_id, redirect_uri, code_verifier)
            .await
    }

    /// Certificate endpoint for token holders.
    pub async fn sign_with_token(
        &self,
        realm: &str,
        bearer: &str,
        csr: &[u8],
    ) -> Result<IssuedCertificate> {
        let grant = self.tokens.verify_access_token(realm, bearer).await?;
        self.ca
            .sign_request(realm, csr, &grant.user_id, &grant.scopes)
            .await
    }

    /// The whole flow in one request, acting as the browser client.
    pub async fn enroll(&self, ctx: &RequestContext, csr: &[u8]) -> Result<Enrollment> {
        let mut trail = EnrollmentTrail::new();
        let resolved = self.enter_realm(ctx, &mut trail).await?;
        let realm = &resolved.realm.name;

        let user_id = self.authenticate(&resolved.realm, ctx).await?;
        trail.advance(EnrollmentState::Authenticated)?;

        let scopes = vec![self.ca.policy().required_scope.clone()];
        let code = self
            .tokens
            .issue_authorization_code(
                realm,
                &self.settings.browser_client_id,
                &self.settings.browser_redirect_uri,
                &user_id,
                &scopes,
                None,
            )
            .await?;
        trail.advance(EnrollmentState::AuthorizationCodeIssued)?;

        let token = self
            .exchange(
                realm,
                &code.code,
                &self.settings.browser_client_id,
                &self.settings.browser_redirect_uri,
                None,
            )
            .await?;
        trail.advance(EnrollmentState::TokenRedeemed)?;

        let certificate = self.sign_with_token(realm, &token.token, csr).await?;
        trail.advance(EnrollmentState::CertificateSigned)?;

        info!(
            realm = %realm,
            user_id = %user_id,
            serial = %certificate.serial,
            guessed_realm = resolved.guessed,
            "Enrollment completed"
        );
        Ok(Enrollment { certificate, trail })
    }

    pub async fn server_names(&self) -> Result<Vec<String>> {
        self.realms.list_server_names().await
    }

    async fn enter_realm(
        &self,
        ctx: &RequestContext,
        trail: &mut EnrollmentTrail,
    ) -> Result<ResolvedRealm> {
        let resolved = self.resolve_realm(ctx).await?;
        if resolved.guessed {
            trail.advance(EnrollmentState::GuessedRealm)?;
        }
        trail.advance(EnrollmentState::RealmResolved)?;
        Ok(resolved)
    }
}
