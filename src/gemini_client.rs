use backoff::{future::retry, ExponentialBackoff};
use base64::prelude::*;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String, // base64 encoded data
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    #[serde(rename = "topK")]
    pub top_k: u32,
    #[serde(rename = "topP")]
    pub top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    pub max_output_tokens: u32,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

impl GenerationConfig {
    fn text() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 8192,
            response_mime_type: None,
        }
    }

    fn json() -> Self {
        Self {
            temperature: 0.4,
            response_mime_type: Some("application/json".to_string()),
            ..Self::text()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptFeedback {
    #[serde(rename = "blockReason")]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate
    pub fn text(&self) -> Result<String, String> {
        if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_ref()) {
            return Err(format!("Prompt blocked by Gemini: {}", reason));
        }
        let candidate = self
            .candidates
            .first()
            .ok_or_else(|| "Gemini returned no candidates".to_string())?;
        let text: String = candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if text.trim().is_empty() {
            return Err(format!(
                "Gemini returned an empty response (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ));
        }
        Ok(text)
    }
}

/// Strip a ```json fence the model sometimes wraps around JSON output
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate_content(&self, request: &GenerateContentRequest) -> Result<GenerateContentResponse, String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let backoff_config = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(180)),
            ..Default::default()
        };

        // Retry logic for transient errors (503, 502, 429, connection errors)
        let operation = || async {
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .timeout(Duration::from_secs(180))
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("Gemini API connection error (retrying): {}", e);
                        backoff::Error::transient(format!("Connection error: {}", e))
                    } else {
                        backoff::Error::permanent(format!("Request error: {}", e))
                    }
                })?;

            let status = response.status();
            let response_text = response
                .text()
                .await
                .map_err(|e| backoff::Error::permanent(format!("Failed to read response: {}", e)))?;

            if matches!(status.as_u16(), 429 | 500 | 502 | 503) {
                tracing::warn!("Gemini API returned {} (retrying)", status);
                return Err(backoff::Error::transient(format!("Gemini API error ({}): {}", status, response_text)));
            }
            if !status.is_success() {
                tracing::error!("Gemini API permanent error ({}): {}", status, response_text);
                return Err(backoff::Error::permanent(format!("Gemini API error ({}): {}", status, response_text)));
            }

            serde_json::from_str::<GenerateContentResponse>(&response_text).map_err(|e| {
                backoff::Error::permanent(format!("Failed to parse Gemini response: {}", e))
            })
        };

        retry(backoff_config, operation).await
    }

    fn user_request(parts: Vec<Part>, config: GenerationConfig) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                parts,
                role: Some("user".to_string()),
            }],
            generation_config: Some(config),
        }
    }

    pub async fn generate_text(&self, prompt: &str) -> Result<String, String> {
        let request = Self::user_request(
            vec![Part::Text {
                text: prompt.to_string(),
            }],
            GenerationConfig::text(),
        );
        self.generate_content(&request).await?.text()
    }

    /// JSON-mode generation deserialized into `T`
    pub async fn generate_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, String> {
        let request = Self::user_request(
            vec![Part::Text {
                text: prompt.to_string(),
            }],
            GenerationConfig::json(),
        );
        let text = self.generate_content(&request).await?.text()?;
        serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| format!("Gemini returned invalid JSON: {}", e))
    }

    /// Prompt over an inline document (PDF bytes are sent base64-encoded)
    pub async fn generate_with_document(&self, prompt: &str, document: &[u8], mime_type: &str) -> Result<String, String> {
        let request = Self::user_request(
            vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.to_string(),
                        data: BASE64_STANDARD.encode(document),
                    },
                },
                Part::Text {
                    text: prompt.to_string(),
                },
            ],
            GenerationConfig::text(),
        );
        self.generate_content(&request).await?.text()
    }
}
