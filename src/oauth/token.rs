use crate::{
    auth::RequestContext,
    db::models::{OAuthError, TokenResponse},
    enroll::EnrollmentOrchestrator,
    error::EnrollError,
};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Form,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub code_verifier: Option<String>,
}

type OAuthRejection = (StatusCode, Json<OAuthError>);

/// POST /oauth/token - authorization code exchange
pub async fn token_handler(
    State(orchestrator): State<Arc<EnrollmentOrchestrator>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Result<Response, OAuthRejection> {
    info!("Token request with grant_type: {}", request.grant_type);

    if request.grant_type != "authorization_code" {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(OAuthError::new("unsupported_grant_type")),
        ));
    }

    let code = required(request.code.as_deref(), "code")?;
    let redirect_uri = required(request.redirect_uri.as_deref(), "redirect_uri")?;
    let client_id = required(request.client_id.as_deref(), "client_id")?;

    let ctx = RequestContext::from_request(query, headers);
    // [business] Resolve first, so any NotFound past this point is about the code
    let resolved = orchestrator
        .resolve_realm(&ctx)
        .await
        .map_err(|e| oauth_rejection(&e))?;

    let token = orchestrator
        .exchange(
            &resolved.realm.name,
            code,
            client_id,
            redirect_uri,
            request.code_verifier.as_deref(),
        )
        .await
        .map_err(|e| match e {
            EnrollError::NotFound(_) => {
                warn!("Unknown authorization code");
                (
                    StatusCode::BAD_REQUEST,
                    Json(OAuthError::new("invalid_grant")),
                )
            }
            other => oauth_rejection(&other),
        })?;

    let body = TokenResponse {
        access_token: token.token,
        token_type: "Bearer".to_string(),
        expires_in: token.expires_in,
        scope: token.scopes.join(" "),
    };

    // [security] RFC 6749 section 5.1: token responses must not be cached
    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(body),
    )
        .into_response())
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, OAuthRejection> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(
                OAuthError::new("invalid_request")
                    .with_description(&format!("Missing '{}' parameter", name)),
            ),
        )
    })
}

// [business] RFC 6749 section 5.2 error codes for the enrollment error taxonomy
pub fn oauth_rejection(err: &EnrollError) -> OAuthRejection {
    let (status, code) = match err {
        EnrollError::InvalidClient(_) => (StatusCode::UNAUTHORIZED, "invalid_client"),
        EnrollError::CodeAlreadyUsed
        | EnrollError::Expired(_)
        | EnrollError::ClientMismatch
        | EnrollError::RedirectMismatch
        | EnrollError::PkceMismatch => (StatusCode::BAD_REQUEST, "invalid_grant"),
        EnrollError::InvalidScope(_) => (StatusCode::BAD_REQUEST, "invalid_scope"),
        EnrollError::Config(_) | EnrollError::Storage(_) | EnrollError::Internal(_) => {
            error!(error = ?err, "Token request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
        }
        other => (other.status_kind().status_code(), "invalid_request"),
    };

    if err.is_security_event() {
        warn!(target: "security", error = %err, "Token request rejected");
    }

    let mut body = OAuthError::new(code);
    if status != StatusCode::INTERNAL_SERVER_ERROR {
        body = body.with_description(&err.public_message());
    }
    (status, Json(body))
}
