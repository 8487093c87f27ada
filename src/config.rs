// config.rs - Environment-driven application configuration
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timeline::DEFAULT_CAPTION_CHUNK_SIZE;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// What happens to a conversation's intermediate artifacts when it returns to `AwaitingInput`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep only the last final composition
    #[default]
    ClearOnReset,
    KeepAll,
}

impl FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "clear_on_reset" | "clear" => Ok(RetentionPolicy::ClearOnReset),
            "keep_all" | "keep" => Ok(RetentionPolicy::KeepAll),
            other => Err(format!("expected clear_on_reset or keep_all, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateBackendConfig {
    JsonFile(PathBuf),
    Postgres(String),
}

impl StateBackendConfig {
    /// Printable backend name; never includes connection credentials
    pub fn describe(&self) -> String {
        match self {
            StateBackendConfig::JsonFile(path) => format!("json file {}", path.display()),
            StateBackendConfig::Postgres(_) => "postgres".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub state_backend: StateBackendConfig,
    pub downloads_dir: PathBuf,
    pub output_dir: PathBuf,
    pub caption_chunk_size: usize,
    pub stage_timeout: Duration,
    pub render_timeout: Duration,
    pub retention: RetentionPolicy,
    pub content_language: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub openai_api_key: String,
    pub eleven_labs_api_key: String,
    pub eleven_labs_voice_id: String,
    pub publication_webhook_url: Option<String>,
    pub caption_font_file: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let state_backend = match get("DATABASE_URL") {
            Some(url) => StateBackendConfig::Postgres(url),
            None => StateBackendConfig::JsonFile(PathBuf::from(
                get("STATE_FILE").unwrap_or_else(|| "data/conversations.json".to_string()),
            )),
        };

        // Chunk sizes below 1 are clamped rather than rejected
        let caption_chunk_size = parse_or(get("CAPTION_CHUNK_SIZE"), "CAPTION_CHUNK_SIZE", DEFAULT_CAPTION_CHUNK_SIZE as i64)?
            .max(1) as usize;

        let stage_timeout = parse_secs(get("STAGE_TIMEOUT_SECS"), "STAGE_TIMEOUT_SECS", 300)?;
        let render_timeout = parse_secs(get("RENDER_TIMEOUT_SECS"), "RENDER_TIMEOUT_SECS", 900)?;

        let retention = match get("RETENTION_POLICY") {
            Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                key: "RETENTION_POLICY",
                value,
                reason,
            })?,
            None => RetentionPolicy::default(),
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            state_backend,
            downloads_dir: PathBuf::from(get("DOWNLOADS_DIR").unwrap_or_else(|| "downloads".to_string())),
            output_dir: PathBuf::from(get("OUTPUT_DIR").unwrap_or_else(|| "outputs".to_string())),
            caption_chunk_size,
            stage_timeout,
            render_timeout,
            retention,
            content_language: get("CONTENT_LANGUAGE").unwrap_or_else(|| "Portuguese (Brazil)".to_string()),
            gemini_api_key: require("GEMINI_API_KEY")?,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            openai_api_key: require("OPENAI_API_KEY")?,
            eleven_labs_api_key: require("ELEVEN_LABS_API_KEY")?,
            eleven_labs_voice_id: get("ELEVEN_LABS_VOICE_ID").unwrap_or_else(|| "rachel".to_string()),
            publication_webhook_url: get("PUBLICATION_WEBHOOK_URL"),
            caption_font_file: get("CAPTION_FONT_FILE"),
        })
    }
}

fn parse_or(value: Option<String>, key: &'static str, default: i64) -> Result<i64, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value.parse::<i64>().map_err(|e| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
    }
}

fn parse_secs(value: Option<String>, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs = parse_or(value.clone(), key, default as i64)?;
    if secs <= 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.unwrap_or_default(),
            reason: "must be a positive number of seconds".to_string(),
        });
    }
    Ok(Duration::from_secs(secs as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut env: HashMap<String, String> = [
            ("GEMINI_API_KEY", "g"),
            ("OPENAI_API_KEY", "o"),
            ("ELEVEN_LABS_API_KEY", "e"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            env.insert(k.to_string(), v.to_string());
        }
        move |key: &str| env.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.caption_chunk_size, 4);
        assert_eq!(config.stage_timeout, Duration::from_secs(300));
        assert_eq!(config.render_timeout, Duration::from_secs(900));
        assert_eq!(config.retention, RetentionPolicy::ClearOnReset);
        assert_eq!(
            config.state_backend,
            StateBackendConfig::JsonFile(PathBuf::from("data/conversations.json"))
        );
        assert_eq!(config.publication_webhook_url, None);
    }

    #[test]
    fn test_database_url_selects_postgres() {
        let config = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/reels")])).unwrap();
        assert_eq!(
            config.state_backend,
            StateBackendConfig::Postgres("postgres://localhost/reels".to_string())
        );
        assert_eq!(config.state_backend.describe(), "postgres");
    }

    #[test]
    fn test_chunk_size_is_clamped() {
        let config = AppConfig::from_lookup(lookup(&[("CAPTION_CHUNK_SIZE", "0")])).unwrap();
        assert_eq!(config.caption_chunk_size, 1);
        let config = AppConfig::from_lookup(lookup(&[("CAPTION_CHUNK_SIZE", "-3")])).unwrap();
        assert_eq!(config.caption_chunk_size, 1);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("STAGE_TIMEOUT_SECS", "soon")])),
            Err(ConfigError::Invalid { key: "STAGE_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("RETENTION_POLICY", "forever")])),
            Err(ConfigError::Invalid { key: "RETENTION_POLICY", .. })
        ));
        let config = AppConfig::from_lookup(lookup(&[("RETENTION_POLICY", "keep-all")])).unwrap();
        assert_eq!(config.retention, RetentionPolicy::KeepAll);
    }

    #[test]
    fn test_missing_api_key() {
        let result = AppConfig::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some("g".to_string()),
            "OPENAI_API_KEY" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(result.err(), Some(ConfigError::Missing("OPENAI_API_KEY")));
    }
}
