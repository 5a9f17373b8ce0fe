use api_rest::startup::{build_service, Settings};
use api_rest::{router, AppState};
use labflow_core::TestRequest;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the Labflow application.
///
/// Starts the REST server and a release feed that logs every result the gateway publishes.
///
/// # Environment Variables
/// - `LABFLOW_DATA_DIR`: directory for request storage (default: "lab_data")
/// - `LABFLOW_PANEL_DIR`: panel definitions (default: panels bundled with `labflow-core`)
/// - `LABFLOW_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `LABFLOW_API_KEY`: API key for the REST API
/// - `LABFLOW_DOCUMENT_URL`: document generation service
/// - `LABFLOW_PUBLISH_TIMEOUT_MS`, `LABFLOW_DOCUMENT_TIMEOUT_MS`
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("labflow=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    if settings.api_key.is_none() {
        tracing::warn!("LABFLOW_API_KEY is not set; the REST API is unguarded");
    }
    let service = build_service(&settings.core)?;

    let feed = tokio::spawn(log_release_feed(service.subscribe()));

    tracing::info!("++ Starting Labflow REST on {}", settings.rest_addr);
    let app = router(AppState::new(service, settings.api_key));
    let listener = tokio::net::TcpListener::bind(&settings.rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    feed.abort();
    tracing::info!("-- Labflow stopped");
    Ok(())
}

/// Logs each release until the gateway is dropped.
async fn log_release_feed(mut releases: broadcast::Receiver<Arc<TestRequest>>) {
    loop {
        match releases.recv().await {
            Ok(request) => tracing::info!(
                request_id = %request.request_id,
                patient_id = %request.patient_id,
                panel_id = %request.panel_id,
                "result released downstream"
            ),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "release feed fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
