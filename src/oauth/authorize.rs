use crate::{
    auth::RequestContext,
    enroll::{AuthorizationRequest, EnrollmentOrchestrator},
    error::{EnrollError, Result},
    security::PkceChallenge,
};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::info;

// [business] GET /oauth/authorize - authenticates the browser and redirects back with a code
pub async fn authorize_handler(
    State(orchestrator): State<Arc<EnrollmentOrchestrator>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Response> {
    let ctx = RequestContext::from_request(query, headers);
    let request = parse_authorize_params(&ctx)?;
    info!(client_id = %request.client_id, "Authorization request");

    let grant = orchestrator.authorize(&ctx, request).await?;

    // [business] Plain 302; the client's own page picks up code and state
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, grant.redirect_location())],
    )
        .into_response())
}

fn required<'a>(ctx: &'a RequestContext, name: &str) -> Result<&'a str> {
    ctx.query_value(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EnrollError::BadRequest(format!("Missing '{}' parameter", name)))
}

// [security] Validate authorization request parameters before touching the identity provider
fn parse_authorize_params(ctx: &RequestContext) -> Result<AuthorizationRequest> {
    // [business] Only the authorization code flow exists here
    if required(ctx, "response_type")? != "code" {
        return Err(EnrollError::BadRequest(
            "Unsupported response_type. Only 'code' is supported.".into(),
        ));
    }

    let pkce = match ctx.query_value("code_challenge") {
        None => None,
        Some(challenge) => Some(
            PkceChallenge::parse(challenge, ctx.query_value("code_challenge_method"))
                .map_err(|e| EnrollError::BadRequest(e.to_string()))?,
        ),
    };

    Ok(AuthorizationRequest {
        client_id: required(ctx, "client_id")?.to_string(),
        redirect_uri: required(ctx, "redirect_uri")?.to_string(),
        scopes: ctx
            .query_value("scope")
            .unwrap_or("")
            .split_whitespace()
            .map(String::from)
            .collect(),
        state: ctx.query_value("state").map(String::from),
        pkce,
    })
}
