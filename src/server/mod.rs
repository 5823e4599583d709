mod handlers;
mod state;

use axum::routing::get;
use axum::Router;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::location::LocationProvider;
use crate::probe::BackendProbe;

pub use state::AppState;

pub fn build_router(provider: LocationProvider, probe: BackendProbe) -> Router {
    let state = Arc::new(AppState {
        provider: Mutex::new(provider),
        probe,
    });

    Router::new()
        .route("/api/location", get(handlers::location))
        .route("/api/location/enabled", axum::routing::put(handlers::set_enabled))
        .route("/api/backends", get(handlers::backends))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, provider: LocationProvider, probe: BackendProbe) -> anyhow::Result<()> {
    let app = build_router(provider, probe);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(%addr, error = %e, "cannot bind");
        anyhow::anyhow!("cannot bind to {}: {}", addr, e)
    })?;

    info!("Leafcast server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
