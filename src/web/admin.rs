use crate::{enroll::EnrollmentOrchestrator, error::Result};
use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;

// [business] GET /admin/server-names - RADIUS server names of all realms, one per line
pub async fn server_names_handler(
    State(orchestrator): State<Arc<EnrollmentOrchestrator>>,
) -> Result<impl IntoResponse> {
    let names = orchestrator.server_names().await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        render_lines(&names),
    ))
}

fn render_lines(names: &[String]) -> String {
    names.iter().map(|name| format!("{}\n", name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lines() {
        assert_eq!(render_lines(&[]), "");
        assert_eq!(
            render_lines(&["a.example.org".into(), "b.example.org".into()]),
            "a.example.org\nb.example.org\n"
        );
    }
}
