// [library] Axum web framework routing components
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{
    enroll::EnrollmentOrchestrator,
    oauth,
    web::{api_certificate_handler, credentials_handler, server_names_handler},
};

// [business] Application state - one orchestrator shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub orchestrator: Arc<EnrollmentOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<EnrollmentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

// [library] Lets handlers extract the orchestrator directly
impl FromRef<AppState> for Arc<EnrollmentOrchestrator> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.orchestrator.clone()
    }
}

// [business] Enrollment HTTP surface; unsupported methods get 405 from the router
pub fn create_app_router(orchestrator: Arc<EnrollmentOrchestrator>) -> Router {
    Router::new()
        .route("/oauth/authorize", get(oauth::authorize_handler))
        .route("/oauth/token", post(oauth::token_handler))
        .route("/api/certificate", post(api_certificate_handler))
        .route("/credentials", post(credentials_handler))
        .route("/admin/server-names", get(server_names_handler))
        .route("/health", get(health_check))
        .with_state(AppState::new(orchestrator))
}

// [business] Health check for load balancers
async fn health_check() -> &'static str {
    "OK"
}
