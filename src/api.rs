use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::manager::ManagerStatus;
use crate::models::health::{HealthCheckResponse, HealthStatus};

pub struct AppState {
    status: watch::Receiver<ManagerStatus>,
}

pub async fn run_api_server(
    config: Config,
    status: watch::Receiver<ManagerStatus>,
) -> Result<(), Error> {
    let state = Arc::new(AppState { status });

    let app = Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Health check server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    let health = HealthCheckResponse::from_status(&status);

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
