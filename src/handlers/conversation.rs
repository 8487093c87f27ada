// src/handlers/conversation.rs
// HTTP transport for conversations: inbound events, state inspection, live progress
use axum::{
    extract::{
        multipart::Multipart,
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Extension, Path,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::types::{ConversationId, ConversationRecord};
use crate::workflow::orchestrator::{InboundEvent, UserAction};
use crate::AppState;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn conversation_routes() -> Router {
    Router::new()
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id/document", post(upload_document))
        .route("/api/conversations/:id/voice", post(upload_voice))
        .route("/api/conversations/:id/message", post(post_message))
        .route("/api/conversations/:id/action", post(post_action))
        .route("/api/conversations/:id/events", get(events_websocket))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub action: UserAction,
}

/// A multipart file written to the downloads directory
#[derive(Debug, Clone, PartialEq)]
pub struct SavedUpload {
    pub path: String,
    pub file_name: String,
    pub content_type: Option<String>,
}

/// Public view of a conversation record
pub fn conversation_summary(id: &ConversationId, record: &ConversationRecord) -> Value {
    json!({
        "conversation_id": id,
        "state": record.state,
        "updated_at": record.updated_at.to_rfc3339(),
        "artifacts": record.data.artifact_names(),
        "script": record.data.script,
        "final_composition": record.data.final_composition,
    })
}

/// Unique on-disk name that keeps only a safe extension from the client's name
pub fn stored_file_name(original: &str, fallback_extension: &str) -> String {
    let extension = FsPath::new(original)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| fallback_extension.to_string());
    format!("{}.{}", Uuid::new_v4(), extension)
}

async fn save_upload(
    multipart: &mut Multipart,
    downloads_dir: &FsPath,
    fallback_extension: &str,
) -> Result<SavedUpload, ApiError> {
    tokio::fs::create_dir_all(downloads_dir).await.map_err(|e| {
        tracing::error!("Failed to create downloads directory {}: {}", downloads_dir.display(), e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "could not store upload")
    })?;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to parse multipart field: {}", e);
        api_error(StatusCode::BAD_REQUEST, "invalid multipart body")
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(|e| {
            tracing::error!("Failed to read upload '{}': {}", file_name, e);
            api_error(StatusCode::BAD_REQUEST, "could not read file")
        })?;
        if data.is_empty() {
            return Err(api_error(StatusCode::BAD_REQUEST, "file is empty"));
        }

        let path = downloads_dir.join(stored_file_name(&file_name, fallback_extension));
        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            tracing::error!("Failed to create {}: {}", path.display(), e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "could not store upload")
        })?;
        file.write_all(&data).await.map_err(|e| {
            tracing::error!("Failed to write {}: {}", path.display(), e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "could not store upload")
        })?;

        tracing::info!("📥 Stored upload '{}' ({} bytes) at {}", file_name, data.len(), path.display());
        return Ok(SavedUpload {
            path: path.to_string_lossy().to_string(),
            file_name,
            content_type,
        });
    }

    Err(api_error(StatusCode::BAD_REQUEST, "missing 'file' field"))
}

/// Queue the event behind earlier ones for the same conversation and acknowledge it
async fn dispatch(state: &Arc<AppState>, id: ConversationId, event: InboundEvent) -> (StatusCode, Json<Value>) {
    let current = state.orchestrator.store().state(&id).await;
    let kind = event.kind();
    state.dispatcher.submit(id.clone(), event).await;

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "accepted": true,
            "conversation_id": id,
            "event": kind,
            "state": current,
        })),
    )
}

async fn get_conversation(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Value> {
    let id = ConversationId::new(id);
    let record = state.orchestrator.store().get(&id).await;
    Json(conversation_summary(&id, &record))
}

async fn upload_document(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let upload = save_upload(&mut multipart, &state.config.downloads_dir, "pdf").await?;
    let event = InboundEvent::Document {
        path: upload.path,
        file_name: upload.file_name,
        mime_type: upload.content_type,
    };
    Ok(dispatch(&state, ConversationId::new(id), event).await)
}

async fn upload_voice(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let upload = save_upload(&mut multipart, &state.config.downloads_dir, "ogg").await?;
    Ok(dispatch(&state, ConversationId::new(id), InboundEvent::Voice { path: upload.path }).await)
}

async fn post_message(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.text.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "text must not be empty"));
    }
    Ok(dispatch(&state, ConversationId::new(id), InboundEvent::Text(body.text)).await)
}

async fn post_action(
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<ActionBody>,
) -> (StatusCode, Json<Value>) {
    dispatch(&state, ConversationId::new(id), InboundEvent::Action(body.action)).await
}

async fn events_websocket(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| progress_stream(socket, state, ConversationId::new(id)))
}

async fn progress_stream(stream: WebSocket, state: Arc<AppState>, id: ConversationId) {
    let (mut sender, mut receiver) = stream.split();

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
    state.progress.register(id.clone(), progress_tx.clone()).await;
    tracing::info!(conversation_id = %id, "🔌 Progress stream connected");

    let record = state.orchestrator.store().get(&id).await;
    let hello = json!({ "type": "state", "conversation": conversation_summary(&id, &record) });
    if sender.send(Message::Text(hello.to_string())).await.is_err() {
        state.progress.unregister(&id, &progress_tx).await;
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // Clients only listen here; events arrive over the HTTP routes
                    Some(Ok(_)) => {}
                }
            }
            Some(update) = progress_rx.recv() => {
                match serde_json::to_string(&update) {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            tracing::error!(conversation_id = %id, "Failed to send progress update to WebSocket");
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize progress update: {}", e),
                }
            }
            else => break,
        }
    }

    state.progress.unregister(&id, &progress_tx).await;
    tracing::info!(conversation_id = %id, "🔌 Progress stream closed");
}
