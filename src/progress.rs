// src/progress.rs
//! Outbound progress notifications
//! Pipeline stages report what happened; connected WebSocket clients receive it live

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::types::ConversationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// A pipeline stage finished
    StageCompleted,
    /// A script draft (or revision) is ready for review
    DraftReady,
    /// The conversation is waiting on the user
    Prompt,
    Failure,
    /// The final composition was produced
    Delivered,
    Info,
}

/// Progress update message sent to WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub conversation_id: ConversationId,
    pub timestamp: DateTime<Utc>,
    pub kind: ProgressKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ProgressUpdate {
    pub fn new(conversation_id: ConversationId, kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            conversation_id,
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Where progress updates go
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, update: ProgressUpdate);
}

/// Routes updates to the WebSocket registered for each conversation
pub struct ProgressHub {
    senders: Arc<RwLock<HashMap<ConversationId, mpsc::UnboundedSender<ProgressUpdate>>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self {
            senders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a WebSocket sender for a conversation. A newer connection replaces an older one.
    pub async fn register(&self, id: ConversationId, sender: mpsc::UnboundedSender<ProgressUpdate>) {
        let mut senders = self.senders.write().await;
        tracing::info!("📡 Registered progress sender for conversation: {}", id);
        senders.insert(id, sender);
    }

    /// Unregister progress sender when WebSocket disconnects.
    /// Only removes the entry if it still belongs to this connection.
    pub async fn unregister(&self, id: &ConversationId, sender: &mpsc::UnboundedSender<ProgressUpdate>) {
        let mut senders = self.senders.write().await;
        if senders.get(id).is_some_and(|current| current.same_channel(sender)) {
            senders.remove(id);
            tracing::info!("📡 Unregistered progress sender for conversation: {}", id);
        } else {
            tracing::debug!("Progress sender for conversation {} already replaced", id);
        }
    }

    pub async fn connected(&self) -> usize {
        self.senders.read().await.len()
    }

    pub async fn send(&self, update: ProgressUpdate) {
        let senders = self.senders.read().await;
        match senders.get(&update.conversation_id) {
            Some(sender) => {
                let id = update.conversation_id.clone();
                let message = update.message.clone();
                if let Err(e) = sender.send(update) {
                    tracing::warn!("Failed to send progress update to conversation {}: {}", id, e);
                } else {
                    tracing::debug!("📤 Sent progress to conversation {}: {}", id, message);
                }
            }
            None => {
                tracing::info!(
                    "No live listener for conversation {}, progress not delivered (message: {})",
                    update.conversation_id,
                    update.message
                );
            }
        }
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ProgressHub {
    async fn notify(&self, update: ProgressUpdate) {
        self.send(update).await;
    }
}
