// Stage collaborators - the external capabilities the orchestrator drives
//
// Each trait is one seam. Concrete adapters live next to their HTTP clients;
// tests plug in fakes.
use async_trait::async_trait;

use crate::timeline::Timeline;
use crate::types::{
    AcademicReport, CaptionWord, ExtractedDocument, KnowledgeBase, PublicationMetadata, SocialReport,
};
use crate::workflow::executor::StageError;

#[async_trait]
pub trait DocumentIngestor: Send + Sync {
    /// `StageError::Ingestion` when the file is unreadable or not a supported document
    async fn extract(&self, path: &str) -> Result<ExtractedDocument, StageError>;
}

#[async_trait]
pub trait AnalysisStage: Send + Sync {
    async fn analyze(&self, document: &ExtractedDocument) -> Result<AcademicReport, StageError>;
}

#[async_trait]
pub trait EngagementStage: Send + Sync {
    async fn analyze(&self, document: &ExtractedDocument) -> Result<SocialReport, StageError>;
}

#[async_trait]
pub trait SynthesisStage: Send + Sync {
    async fn merge(&self, academic: &AcademicReport, social: &SocialReport) -> Result<KnowledgeBase, StageError>;
}

#[async_trait]
pub trait ScriptWriter: Send + Sync {
    async fn draft(&self, brief: &KnowledgeBase) -> Result<String, StageError>;
    async fn revise(&self, script: &str, feedback: &str) -> Result<String, StageError>;
}

#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    /// Writes speech for `text` to `output_path` and returns the written path
    async fn synthesize(&self, text: &str, output_path: &str) -> Result<String, StageError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &str) -> Result<String, StageError>;
    async fn transcribe_with_timestamps(&self, audio_path: &str) -> Result<Vec<CaptionWord>, StageError>;
}

#[async_trait]
pub trait VisualSynthesizer: Send + Sync {
    async fn synthesize(&self, prompt: &str, output_path: &str) -> Result<String, StageError>;
}

#[async_trait]
pub trait PublicationSink: Send + Sync {
    async fn publish(&self, video_path: &str, metadata: &PublicationMetadata) -> Result<(), StageError>;
}

#[async_trait]
pub trait MediaRenderer: Send + Sync {
    async fn probe_duration(&self, audio_path: &str) -> Result<f64, StageError>;
    /// Render the timeline over the narration track into `output_path`
    async fn render(&self, timeline: &Timeline, audio_path: &str, output_path: &str) -> Result<String, StageError>;
    /// Transcode an uploaded recording into `output_path`
    async fn normalize_audio(&self, input_path: &str, output_path: &str) -> Result<String, StageError>;
}
