// src/handlers/mod.rs
pub mod conversation;

use axum::{extract::Extension, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppState;

pub use conversation::conversation_routes;

pub fn status_routes() -> Router {
    Router::new().route("/api/status", get(api_status))
}

async fn api_status(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "state_store": config.state_backend.describe(),
            "ffmpeg": if state.ffmpeg_available { "available" } else { "missing" },
            "publication_webhook": if config.publication_webhook_url.is_some() { "configured" } else { "not_configured" },
            "gemini_model": config.gemini_model,
        },
        "conversations": {
            "known": state.orchestrator.store().len().await,
            "live_streams": state.progress.connected().await,
        },
        "content_language": config.content_language,
        "retention_policy": config.retention,
    }))
}
