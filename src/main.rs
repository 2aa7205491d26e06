use anyhow::Result;
use eduroam_enroll::{config::Config, web, Backends};
use std::sync::Arc;

// [library] HTTP request/response logging middleware
use tower_http::trace::TraceLayer;

// [library] Structured logging with runtime-configurable filtering
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("eduroam_enroll=info,tower_http=debug")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting eduroam certificate enrollment service");

    // [business] Fail fast on bad configuration
    let config = Config::from_env()?;
    let bind_address = config.bind_address();

    let backends = Backends::connect(&config).await?;
    let orchestrator = Arc::new(backends.orchestrator(&config));

    let app = web::create_app_router(orchestrator).layer(TraceLayer::new_for_http());

    info!("Server starting on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
