// Executor - runs individual pipeline stages with timeouts and the three-tier outcome policy
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

/// Every external call the pipeline makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    AcademicAnalysis,
    EngagementAnalysis,
    Synthesis,
    ScriptDrafting,
    ScriptRevision,
    FeedbackTranscription,
    NarrationSynthesis,
    AudioNormalization,
    VisualSynthesis,
    CaptionExtraction,
    DurationProbe,
    Rendering,
    Publication,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingestion => "ingestion",
            Stage::AcademicAnalysis => "academic_analysis",
            Stage::EngagementAnalysis => "engagement_analysis",
            Stage::Synthesis => "synthesis",
            Stage::ScriptDrafting => "script_drafting",
            Stage::ScriptRevision => "script_revision",
            Stage::FeedbackTranscription => "feedback_transcription",
            Stage::NarrationSynthesis => "narration_synthesis",
            Stage::AudioNormalization => "audio_normalization",
            Stage::VisualSynthesis => "visual_synthesis",
            Stage::CaptionExtraction => "caption_extraction",
            Stage::DurationProbe => "duration_probe",
            Stage::Rendering => "rendering",
            Stage::Publication => "publication",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Input could not be read at all (corrupt or unsupported document)
    #[error("ingestion error: {0}")]
    Ingestion(String),
    #[error("{0}")]
    Failed(String),
}

impl From<String> for StageError {
    fn from(message: String) -> Self {
        StageError::Failed(message)
    }
}

impl From<&str> for StageError {
    fn from(message: &str) -> Self {
        StageError::Failed(message.to_string())
    }
}

/// Outcome of one stage call after the runner has applied its policy
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Ok(T),
    /// Partial or substitute value; the optional feature is omitted
    Degraded(T, String),
    Failed(String),
}

impl<T> StageOutcome<T> {
    /// Value for `Ok` and `Degraded`, the reason for `Failed`
    pub fn into_result(self) -> Result<T, String> {
        match self {
            StageOutcome::Ok(value) | StageOutcome::Degraded(value, _) => Ok(value),
            StageOutcome::Failed(reason) => Err(reason),
        }
    }

    /// Turn a failure into a degraded outcome carrying `fallback`
    pub fn degrade_with(self, fallback: T) -> StageOutcome<T> {
        match self {
            StageOutcome::Failed(reason) => StageOutcome::Degraded(fallback, reason),
            other => other,
        }
    }
}

/// Executor config
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub stage_timeout: Duration,
    pub render_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(300),
            render_timeout: Duration::from_secs(900),
        }
    }
}

/// Wraps every external call with a timeout and converts its result
#[derive(Debug, Clone, Default)]
pub struct StageRunner {
    config: RunnerConfig,
}

impl StageRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn timeout_for(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Rendering => self.config.render_timeout,
            _ => self.config.stage_timeout,
        }
    }

    /// Run one stage. Errors and timeouts become `Failed`.
    pub async fn run<T, F>(&self, stage: Stage, call: F) -> StageOutcome<T>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        let limit = self.timeout_for(stage);
        let started = Instant::now();
        info!(stage = %stage, "▶️ Stage started");

        match timeout(limit, call).await {
            Ok(Ok(value)) => {
                info!(stage = %stage, elapsed_ms = started.elapsed().as_millis() as u64, "✅ Stage completed");
                StageOutcome::Ok(value)
            }
            Ok(Err(e)) => {
                error!(stage = %stage, "❌ Stage failed: {}", e);
                StageOutcome::Failed(e.to_string())
            }
            Err(_) => {
                error!(stage = %stage, "⏱️ Stage timed out after {}s", limit.as_secs());
                StageOutcome::Failed(format!("{} timed out after {}s", stage, limit.as_secs()))
            }
        }
    }

    /// Run an optional stage; failure degrades to `fallback` instead of aborting
    pub async fn run_degradable<T, F>(&self, stage: Stage, fallback: T, call: F) -> StageOutcome<T>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        let outcome = self.run(stage, call).await.degrade_with(fallback);
        if let StageOutcome::Degraded(_, reason) = &outcome {
            warn!(stage = %stage, "⚠️ Continuing without {}: {}", stage, reason);
        }
        outcome
    }
}
