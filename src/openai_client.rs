// OpenAI API Client
// Whisper transcription (plain and word-timestamped) and DALL-E still generation

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::CaptionWord;
use crate::workflow::executor::StageError;
use crate::workflow::stages::{Transcriber, VisualSynthesizer};

const TRANSCRIPTION_MODEL: &str = "whisper-1";
const IMAGE_MODEL: &str = "dall-e-3";
/// Closest DALL-E 3 size to the 9:16 output frame
const IMAGE_SIZE: &str = "1024x1792";

#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    client: Client,
    base_url: String,
    /// ISO-639-1 hint passed to Whisper, derived from the content language
    language: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct TranscriptionResponse {
    pub text: String,
    #[serde(default)]
    pub words: Vec<TranscriptionWord>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TranscriptionWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Serialize, Debug)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub n: u32,
}

#[derive(Deserialize, Debug)]
pub struct ImageGenerationResponse {
    pub data: Vec<GeneratedImage>,
}

#[derive(Deserialize, Debug)]
pub struct GeneratedImage {
    pub url: Option<String>,
    pub revised_prompt: Option<String>,
}

/// Map a human-readable language name to the code Whisper expects
pub fn whisper_language_code(content_language: &str) -> Option<&'static str> {
    let lower = content_language.to_lowercase();
    let code = if lower.starts_with("portug") {
        "pt"
    } else if lower.starts_with("english") {
        "en"
    } else if lower.starts_with("spanish") || lower.starts_with("español") {
        "es"
    } else if lower.starts_with("french") {
        "fr"
    } else if lower.starts_with("german") {
        "de"
    } else if lower.starts_with("italian") {
        "it"
    } else {
        return None;
    };
    Some(code)
}

/// Vertical, text-free illustration prompt for one visual cue
pub fn image_prompt(cue: &str) -> String {
    format!(
        "Vertical 9:16 image for an educational video. Subject: {}. \
         Style: modern, clean, high quality illustration or minimalist infographic. \
         IMPORTANT: do not include any text, letters or words in the image; use icons and symbols only.",
        cue.trim()
    )
}

impl TranscriptionResponse {
    pub fn caption_words(&self) -> Vec<CaptionWord> {
        self.words
            .iter()
            .filter(|w| !w.word.trim().is_empty())
            .map(|w| CaptionWord::new(w.word.trim(), w.start, w.end))
            .collect()
    }
}

impl OpenAiClient {
    pub fn new(api_key: String, content_language: &str) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            language: whisper_language_code(content_language).map(str::to_string),
        }
    }

    async fn transcription_request(&self, audio_path: &str, word_timestamps: bool) -> Result<TranscriptionResponse, String> {
        let audio_data = tokio::fs::read(audio_path)
            .await
            .map_err(|e| format!("Failed to read audio file {}: {}", audio_path, e))?;
        let file_name = Path::new(audio_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let mut form = multipart::Form::new()
            .text("model", TRANSCRIPTION_MODEL)
            .text("response_format", "verbose_json")
            .part("file", multipart::Part::bytes(audio_data).file_name(file_name));
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        if word_timestamps {
            form = form.text("timestamp_granularities[]", "word");
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(300))
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("Whisper request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(format!("Whisper API error ({}): {}", status, error_text));
        }

        response
            .json::<TranscriptionResponse>()
            .await
            .map_err(|e| format!("Failed to parse Whisper response: {}", e))
    }

    pub async fn transcribe_text(&self, audio_path: &str) -> Result<String, String> {
        tracing::info!("🎧 Transcribing {}", audio_path);
        let response = self.transcription_request(audio_path, false).await?;
        Ok(response.text.trim().to_string())
    }

    pub async fn transcribe_words(&self, audio_path: &str) -> Result<Vec<CaptionWord>, String> {
        tracing::info!("🎧 Transcribing {} with word timestamps", audio_path);
        let words = self.transcription_request(audio_path, true).await?.caption_words();
        tracing::info!("📝 {} caption words", words.len());
        Ok(words)
    }

    /// Generate one image and return its temporary URL
    pub async fn generate_image(&self, prompt: &str) -> Result<String, String> {
        let request = ImageGenerationRequest {
            model: IMAGE_MODEL.to_string(),
            prompt: prompt.to_string(),
            size: IMAGE_SIZE.to_string(),
            quality: "standard".to_string(),
            n: 1,
        };

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(180))
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Image request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(format!("Image API error ({}): {}", status, error_text));
        }

        let body: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse image response: {}", e))?;
        body.data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| "Image API returned no image URL".to_string())
    }

    pub async fn download(&self, url: &str, output_path: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Download failed: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("Download failed with status {}", response.status()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read download: {}", e))?;

        if let Some(parent) = Path::new(output_path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        tokio::fs::write(output_path, &bytes)
            .await
            .map_err(|e| format!("Failed to write {}: {}", output_path, e))?;
        Ok(output_path.to_string())
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio_path: &str) -> Result<String, StageError> {
        Ok(self.transcribe_text(audio_path).await?)
    }

    async fn transcribe_with_timestamps(&self, audio_path: &str) -> Result<Vec<CaptionWord>, StageError> {
        Ok(self.transcribe_words(audio_path).await?)
    }
}

#[async_trait]
impl VisualSynthesizer for OpenAiClient {
    async fn synthesize(&self, prompt: &str, output_path: &str) -> Result<String, StageError> {
        let url = self.generate_image(&image_prompt(prompt)).await?;
        let path = self.download(&url, output_path).await?;
        tracing::info!("🖼️ Still saved: {}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert_eq!(whisper_language_code("Portuguese (Brazil)"), Some("pt"));
        assert_eq!(whisper_language_code("English"), Some("en"));
        assert_eq!(whisper_language_code("Klingon"), None);
    }

    #[test]
    fn test_verbose_json_words() {
        let response: TranscriptionResponse = serde_json::from_str(
            r#"{"text": "Olá mundo", "language": "portuguese", "duration": 1.2,
                "words": [{"word": " Olá", "start": 0.0, "end": 0.5}, {"word": " ", "start": 0.5, "end": 0.6},
                          {"word": "mundo", "start": 0.6, "end": 1.2}]}"#,
        )
        .unwrap();
        let words = response.caption_words();
        assert_eq!(words, vec![CaptionWord::new("Olá", 0.0, 0.5), CaptionWord::new("mundo", 0.6, 1.2)]);
    }

    #[test]
    fn test_plain_response_has_no_words() {
        let response: TranscriptionResponse = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert!(response.caption_words().is_empty());
    }

    #[test]
    fn test_image_prompt_is_text_free_and_vertical() {
        let prompt = image_prompt("  a cell dividing ");
        assert!(prompt.contains("Subject: a cell dividing."));
        assert!(prompt.contains("9:16"));
        assert!(prompt.contains("do not include any text"));
    }
}
