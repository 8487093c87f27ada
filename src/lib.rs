// lib.rs - Library root: pipeline, adapters and HTTP surface
pub mod agent;
pub mod audio;
pub mod config;
pub mod core;
pub mod db;
pub mod elevenlabs_client;
pub mod export;
pub mod gemini_client;
pub mod handlers;
pub mod middleware;
pub mod openai_client;
pub mod progress;
pub mod script;
pub mod services;
pub mod timeline;
pub mod types;
pub mod utils;
pub mod visual;
pub mod workflow;

use std::sync::Arc;

pub use types::*;

/// Shared by every HTTP handler
pub struct AppState {
    pub orchestrator: Arc<workflow::orchestrator::Orchestrator>,
    /// Per-conversation event queues in front of the orchestrator
    pub dispatcher: workflow::orchestrator::EventDispatcher,
    pub progress: Arc<progress::ProgressHub>,
    pub config: config::AppConfig,
    pub ffmpeg_available: bool,
}
