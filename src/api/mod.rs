//! HTTP/WebSocket transport layer.

pub mod state;
pub mod ws;

use axum::routing::get;
use axum::{Json, Router};

pub use state::AppState;

/// Build the service router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CarePipeline;
    use crate::matcher::InMemoryResponderRegistry;
    use crate::store::InMemoryAlertStore;
    use crate::CareConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_router_builds() {
        let pipeline = CarePipeline::new(
            CareConfig::default(),
            vec![],
            Arc::new(InMemoryResponderRegistry::new()),
            Arc::new(InMemoryAlertStore::new()),
        );
        let _router = create_router(AppState::new(pipeline));
    }
}
