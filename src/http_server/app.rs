use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use color_eyre::eyre::{Context, eyre};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::http_server::{routes, state::AppState};

async fn root() -> &'static str {
    "music-library-hub"
}

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/auth/{provider}/authorize", get(routes::authorize))
        .route("/auth/{provider}/callback", get(routes::callback))
        .route("/auth/{provider}", delete(routes::disconnect))
        .route("/services", get(routes::services))
        .route("/library/{provider}", get(routes::library))
        .route("/library/{provider}/sync", post(routes::sync))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}

pub async fn start(port: u16, app_state: Arc<AppState>) -> color_eyre::Result<()> {
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .wrap_err_with(|| eyre!("Failed to bind to port {}", port))?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .await
        .wrap_err("Failed to start HTTP server")?;

    Ok(())
}
