use std::future::IntoFuture as _;

use anyhow::Context as _;
use clap::Parser;
use image_security_operator::{
    operator::{ImageSecurityController, State},
    telemetry, Config,
};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init().await;

    // Initialize Kubernetes controller state
    let state = State::default();
    let controller = ImageSecurityController::new(state.clone(), config.clone());

    // Start web server
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("Serving metrics and diagnostics on {}", config.listen_addr);
    let server = axum::serve(listener, handlers::router().with_state(state));

    // Run both the http server and the controllers; the controllers only return on shutdown
    tokio::select! {
        c = controller.run() => c,
        s = server.into_future() => {
            s.context("server exited early")?;
            anyhow::bail!("server exited early")
        }
    }
}

/// Handlers for the web server portion of the operator
mod handlers {
    use axum::{extract::State, http::StatusCode, response::IntoResponse, routing, Json, Router};
    use prometheus::{Encoder, TextEncoder};

    use image_security_operator::operator::State as OperatorState;

    /// Construct the router for all the handlers
    pub fn router() -> Router<OperatorState> {
        Router::new()
            .route("/metrics", routing::get(metrics))
            .route("/health", routing::get(health))
            .route("/", routing::get(index))
    }

    /// Handler for exposing prometheus metrics
    async fn metrics(State(state): State<OperatorState>) -> impl IntoResponse {
        let mut buffer = vec![];
        match TextEncoder::new().encode(&state.metrics(), &mut buffer) {
            Ok(()) => (StatusCode::OK, buffer),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string().into_bytes()),
        }
    }

    /// Handler for checking the health of the server
    async fn health() -> impl IntoResponse {
        (StatusCode::OK, Json("healthy"))
    }

    /// Last reconciliation seen by either controller
    async fn index(State(state): State<OperatorState>) -> impl IntoResponse {
        (StatusCode::OK, Json(state.diagnostics().await))
    }
}
