// Eleven Labs API Client
// Text-to-speech for AI narration

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;

use crate::workflow::executor::StageError;
use crate::workflow::stages::NarrationSynthesizer;

#[derive(Clone)]
pub struct ElevenLabsClient {
    api_key: String,
    client: Client,
    base_url: String,
}

#[derive(Serialize, Debug)]
pub struct TextToSpeechRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_settings: Option<VoiceSettings>,
}

#[derive(Serialize, Debug, Clone)]
pub struct VoiceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_speaker_boost: Option<bool>,
}

impl VoiceSettings {
    /// Steady delivery for explanatory narration
    pub fn narration() -> Self {
        Self {
            stability: Some(0.5),
            similarity_boost: Some(0.75),
            style: Some(0.0),
            use_speaker_boost: Some(true),
        }
    }
}

impl ElevenLabsClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
        }
    }

    /// Generate speech from text using a specific voice
    pub async fn text_to_speech(
        &self,
        text: &str,
        voice_id: &str,
        model_id: Option<&str>,
        voice_settings: Option<VoiceSettings>,
        output_format: Option<&str>,
    ) -> Result<Vec<u8>, String> {
        let url = format!("{}/text-to-speech/{}", self.base_url, voice_id);

        let request_body = TextToSpeechRequest {
            text: text.to_string(),
            model_id: model_id.map(|s| s.to_string()),
            voice_settings,
        };

        let mut request = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request_body);

        if let Some(format) = output_format {
            request = request.query(&[("output_format", format)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Eleven Labs request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(format!("Eleven Labs TTS API error ({}): {}", status, error_text));
        }

        let audio_bytes = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read Eleven Labs audio: {}", e))?;
        if audio_bytes.is_empty() {
            return Err("Eleven Labs returned empty audio".to_string());
        }
        Ok(audio_bytes.to_vec())
    }
}

// ============================================================================
// WELL-KNOWN VOICE IDS (Default Voices)
// ============================================================================

pub struct DefaultVoices;

impl DefaultVoices {
    pub const RACHEL: &'static str = "21m00Tcm4TlvDq8ikWAM"; // Young female, calm
    pub const BELLA: &'static str = "EXAVITQu4vr4xnSDxMaL"; // Female, soft
    pub const MATILDA: &'static str = "XrExE9yKIg1WjnnlVkGX"; // Female, warm
    pub const DREW: &'static str = "29vD33N1CtxCmqQRPOHJ"; // Male, middle-aged
    pub const ADAM: &'static str = "pNInz6obpgDQGcFmaJgB"; // Male, deep
    pub const DANIEL: &'static str = "onwK4e9ZLuTAKqWW03F9"; // Male, deep
    pub const LIAM: &'static str = "TX3LPaxmHKxFdv7VOQHJ"; // Male, articulate

    pub fn get_voice_id_by_name(name: &str) -> Option<&'static str> {
        match name.trim().to_lowercase().as_str() {
            "rachel" => Some(Self::RACHEL),
            "bella" => Some(Self::BELLA),
            "matilda" => Some(Self::MATILDA),
            "drew" => Some(Self::DREW),
            "adam" => Some(Self::ADAM),
            "daniel" => Some(Self::DANIEL),
            "liam" => Some(Self::LIAM),
            _ => None,
        }
    }

    /// Accept either a known voice name or a raw voice id
    pub fn resolve(name_or_id: &str) -> String {
        let trimmed = name_or_id.trim();
        if trimmed.is_empty() {
            return Self::RACHEL.to_string();
        }
        Self::get_voice_id_by_name(trimmed)
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string())
    }
}

pub struct ElevenLabsModels;

impl ElevenLabsModels {
    pub const MULTILINGUAL_V2: &'static str = "eleven_multilingual_v2"; // Highest quality
}

/// `NarrationSynthesizer` that writes Eleven Labs mp3 output to disk
#[derive(Clone)]
pub struct ElevenLabsNarrator {
    client: ElevenLabsClient,
    voice_id: String,
    model_id: String,
}

impl ElevenLabsNarrator {
    pub fn new(client: ElevenLabsClient, voice: &str) -> Self {
        Self {
            client,
            voice_id: DefaultVoices::resolve(voice),
            model_id: ElevenLabsModels::MULTILINGUAL_V2.to_string(),
        }
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }
}

#[async_trait]
impl NarrationSynthesizer for ElevenLabsNarrator {
    async fn synthesize(&self, text: &str, output_path: &str) -> Result<String, StageError> {
        if text.trim().is_empty() {
            return Err(StageError::Failed("nothing to narrate".to_string()));
        }
        tracing::info!("🎙️ Synthesizing narration ({} chars) with voice {}", text.len(), self.voice_id);

        let audio = self
            .client
            .text_to_speech(
                text,
                &self.voice_id,
                Some(&self.model_id),
                Some(VoiceSettings::narration()),
                Some("mp3_44100_128"),
            )
            .await?;

        if let Some(parent) = Path::new(output_path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        tokio::fs::write(output_path, &audio)
            .await
            .map_err(|e| format!("Failed to write narration to {}: {}", output_path, e))?;

        tracing::info!("✅ Narration saved: {} ({} bytes)", output_path, audio.len());
        Ok(output_path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_resolution() {
        assert_eq!(DefaultVoices::resolve("Rachel"), DefaultVoices::RACHEL);
        assert_eq!(DefaultVoices::resolve(""), DefaultVoices::RACHEL);
        assert_eq!(DefaultVoices::resolve("customVoice123"), "customVoice123");
    }

    #[test]
    fn test_request_omits_unset_fields() {
        let body = serde_json::to_value(TextToSpeechRequest {
            text: "Olá".to_string(),
            model_id: None,
            voice_settings: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"text": "Olá"}));
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected_without_a_request() {
        let narrator = ElevenLabsNarrator::new(ElevenLabsClient::new("key".to_string()), "adam");
        assert_eq!(narrator.voice_id(), DefaultVoices::ADAM);
        assert!(narrator.synthesize("   ", "/tmp/unused.mp3").await.is_err());
    }
}
