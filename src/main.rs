use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use reel_producer::agent::{AcademicAgent, ScriptAgent, SocialAgent, SynthesisAgent};
use reel_producer::config::{AppConfig, StateBackendConfig};
use reel_producer::elevenlabs_client::{ElevenLabsClient, ElevenLabsNarrator};
use reel_producer::export::FfmpegRenderer;
use reel_producer::gemini_client::GeminiClient;
use reel_producer::handlers::{conversation_routes, status_routes};
use reel_producer::middleware::logging::request_logging_middleware;
use reel_producer::openai_client::OpenAiClient;
use reel_producer::progress::ProgressHub;
use reel_producer::services::{PdfIngestor, WebhookPublisher};
use reel_producer::workflow::checkpoint::{ConversationStore, JsonFileBackend, StoreBackend};
use reel_producer::workflow::executor::RunnerConfig;
use reel_producer::workflow::orchestrator::{Collaborators, EventDispatcher, Orchestrator, OrchestratorConfig};
use reel_producer::{db, utils, AppState};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    for dir in [&config.downloads_dir, &config.output_dir] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!("Failed to create directory {}: {}", dir.display(), e);
        } else {
            tracing::info!("Directory ready: {}", dir.display());
        }
    }

    let ffmpeg_available = match utils::check_ffmpeg_available() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("⚠️ {} Rendering will fail until it is installed.", e);
            false
        }
    };

    let backend: Arc<dyn StoreBackend> = match &config.state_backend {
        StateBackendConfig::Postgres(url) => match db::connect_store_backend(url).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                tracing::error!("❌ Failed to open PostgreSQL conversation store: {}", e);
                std::process::exit(1);
            }
        },
        StateBackendConfig::JsonFile(path) => Arc::new(JsonFileBackend::new(path.clone())),
    };
    let store = Arc::new(ConversationStore::open(backend).await);

    let gemini = Arc::new(GeminiClient::new(config.gemini_api_key.clone(), config.gemini_model.clone()));
    let openai = Arc::new(OpenAiClient::new(config.openai_api_key.clone(), &config.content_language));
    let narrator = ElevenLabsNarrator::new(
        ElevenLabsClient::new(config.eleven_labs_api_key.clone()),
        &config.eleven_labs_voice_id,
    );
    tracing::info!("🎙️ Narration voice: {}", narrator.voice_id());

    let progress = Arc::new(ProgressHub::new());
    let language = config.content_language.clone();

    let collaborators = Collaborators {
        ingestor: Arc::new(PdfIngestor::new(gemini.clone())),
        academic: Arc::new(AcademicAgent::new(gemini.clone(), language.clone())),
        engagement: Arc::new(SocialAgent::new(gemini.clone(), language.clone())),
        synthesis: Arc::new(SynthesisAgent::new(gemini.clone(), language.clone())),
        writer: Arc::new(ScriptAgent::new(gemini.clone(), language)),
        narrator: Arc::new(narrator),
        transcriber: openai.clone(),
        visuals: openai,
        publisher: Arc::new(WebhookPublisher::new(config.publication_webhook_url.clone())),
        renderer: Arc::new(FfmpegRenderer::new(config.caption_font_file.clone())),
        notifier: progress.clone(),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        collaborators,
        OrchestratorConfig {
            output_dir: config.output_dir.clone(),
            retention: config.retention,
            caption_chunk_size: config.caption_chunk_size,
            runner: RunnerConfig {
                stage_timeout: config.stage_timeout,
                render_timeout: config.render_timeout,
            },
        },
    ));

    let recovered = orchestrator.recover_interrupted().await;
    if recovered > 0 {
        tracing::warn!("♻️ Reset {} conversations interrupted by the last shutdown", recovered);
    }

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        dispatcher: EventDispatcher::new(orchestrator.clone()),
        orchestrator,
        progress,
        config,
        ffmpeg_available,
    });

    let app = Router::new()
        .merge(status_routes())
        .merge(conversation_routes())
        .layer(axum::middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(Extension(state));

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("❌ Failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("listening on {}", bind_addr);

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        tracing::error!("Server error: {}", e);
    }

    match store.flush().await {
        Ok(()) => tracing::info!("💾 Conversation records flushed"),
        Err(e) => tracing::error!("Failed to flush conversation records: {}", e),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("🛑 Shutdown requested");
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,reel_producer=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,reel_producer=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for log aggregation
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();

    tracing::info!("🎬 reel_producer starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);

    let configured = |key: &str| if std::env::var(key).is_ok() { "✅" } else { "❌" };
    tracing::info!(
        "Configuration - Database: {}, Gemini: {}, OpenAI: {}, Eleven Labs: {}, Webhook: {}",
        configured("DATABASE_URL"),
        configured("GEMINI_API_KEY"),
        configured("OPENAI_API_KEY"),
        configured("ELEVEN_LABS_API_KEY"),
        configured("PUBLICATION_WEBHOOK_URL")
    );

    Ok(())
}
