// src/services/publication.rs
// Hand the finished video to an automation webhook (Zapier, Make, n8n...)
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::types::PublicationMetadata;
use crate::workflow::executor::StageError;
use crate::workflow::stages::PublicationSink;

#[derive(Debug, Serialize)]
pub struct PublicationPayload<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub hashtags: &'a str,
    pub video_path: &'a str,
    pub file_name: String,
    pub file_size: u64,
    pub published_at: String,
}

pub struct WebhookPublisher {
    client: Client,
    webhook_url: Option<String>,
}

impl WebhookPublisher {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            webhook_url: webhook_url.filter(|u| !u.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

pub fn build_payload<'a>(video_path: &'a str, metadata: &'a PublicationMetadata, file_size: u64) -> PublicationPayload<'a> {
    PublicationPayload {
        title: &metadata.title,
        description: &metadata.description,
        hashtags: &metadata.hashtags,
        video_path,
        file_name: Path::new(video_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "final_video.mp4".to_string()),
        file_size,
        published_at: Utc::now().to_rfc3339(),
    }
}

#[async_trait]
impl PublicationSink for WebhookPublisher {
    async fn publish(&self, video_path: &str, metadata: &PublicationMetadata) -> Result<(), StageError> {
        let file_size = tokio::fs::metadata(video_path)
            .await
            .map_err(|e| StageError::Failed(format!("video {} is not readable: {}", video_path, e)))?
            .len();

        let Some(url) = &self.webhook_url else {
            tracing::info!("📦 No publication webhook configured; '{}' stays local at {}", metadata.title, video_path);
            return Ok(());
        };

        let payload = build_payload(video_path, metadata, file_size);
        let response = self
            .client
            .post(url)
            .timeout(Duration::from_secs(60))
            .json(&payload)
            .send()
            .await
            .map_err(|e| StageError::Failed(format!("webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Failed(format!("webhook returned {}: {}", status, body)));
        }

        tracing::info!("🚀 Published '{}' via webhook", metadata.title);
        Ok(())
    }
}
