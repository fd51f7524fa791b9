//! Agent runtime HTTP Server
//!
//! Hosts one agent behind a single invocation endpoint. Provider, credential
//! sourcing, memory and response mode are chosen from the environment.

mod handlers;
mod state;
mod tools;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::tool::Tool;
use agent_runtime::{RuntimeConfig, build_gateway};

use crate::handlers::{invocations, ping};
use crate::state::AppState;
use crate::tools::AddNumbersTool;

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ping", get(ping))
        .route("/invocations", post(invocations))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment; local keys live in .env.local
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RuntimeConfig::from_env()?;

    let local_tools: Vec<Arc<dyn Tool>> = vec![Arc::new(AddNumbersTool)];
    let gateway = build_gateway(&config, local_tools)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("Agent '{}' listening on http://{}", config.agent_name, config.bind_addr);
    tracing::info!("  GET  /ping         - Health check");
    tracing::info!("  POST /invocations  - Invoke the agent ({:?} responses)", config.response_mode);

    axum::serve(listener, app(AppState::new(gateway))).await?;

    Ok(())
}
