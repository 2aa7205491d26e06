use crate::{
    auth::RequestContext,
    ca::IssuedCertificate,
    enroll::EnrollmentOrchestrator,
    error::{EnrollError, Result},
};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::Json,
    Form,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CertificateRequest {
    pub csr: String,
}

// [security] Extract the bearer token; the scheme name is case-insensitive
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EnrollError::auth_required("Missing bearer token"))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(EnrollError::auth_required("Missing bearer token")),
    }
}

fn non_empty_csr(csr: &str) -> Result<&[u8]> {
    if csr.trim().is_empty() {
        return Err(EnrollError::BadRequest("Missing 'csr' field".into()));
    }
    Ok(csr.as_bytes())
}

// [business] POST /api/certificate - signs a CSR for the holder of an access token
pub async fn api_certificate_handler(
    State(orchestrator): State<Arc<EnrollmentOrchestrator>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    Json(request): Json<CertificateRequest>,
) -> Result<Json<IssuedCertificate>> {
    let token = bearer_token(&headers)?.to_string();
    let ctx = RequestContext::from_request(query, headers);

    // [security] Tokens are realm-bound, so the realm is never guessed here
    let realm = ctx
        .realm_param()?
        .ok_or_else(|| EnrollError::BadRequest("No realm set".into()))?;

    let certificate = orchestrator
        .sign_with_token(realm, &token, non_empty_csr(&request.csr)?)
        .await?;
    Ok(Json(certificate))
}

// [business] POST /credentials - the whole enrollment in one browser request
pub async fn credentials_handler(
    State(orchestrator): State<Arc<EnrollmentOrchestrator>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    Form(request): Form<CertificateRequest>,
) -> Result<Json<IssuedCertificate>> {
    let ctx = RequestContext::from_request(query, headers);
    let enrollment = orchestrator
        .enroll(&ctx, non_empty_csr(&request.csr)?)
        .await?;
    info!(
        steps = enrollment.trail.states().len(),
        serial = %enrollment.certificate.serial,
        "Browser enrollment finished"
    );
    Ok(Json(enrollment.certificate))
}
