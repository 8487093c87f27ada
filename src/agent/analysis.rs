// Document analyses and brief synthesis, all in Gemini JSON mode
use async_trait::async_trait;
use std::sync::Arc;

use crate::agent::{truncate_chars, MAX_PROMPT_TEXT_CHARS};
use crate::gemini_client::GeminiClient;
use crate::types::{AcademicReport, ExtractedDocument, KnowledgeBase, SocialReport};
use crate::workflow::executor::StageError;
use crate::workflow::stages::{AnalysisStage, EngagementStage, SynthesisStage};

pub fn academic_prompt(document: &ExtractedDocument, language: &str) -> String {
    format!(
        r#"You are an expert academic researcher. Analyze the following research article and produce a detailed academic report in JSON.

Title: {title}

Input Text:
{text}

The JSON object must have these keys (all text values in {language}):
- "summary": a concise summary of the paper.
- "key_findings": list of the main results or arguments.
- "methodology_details": {{"sample_size": "...", "duration": "...", "groups": "control vs experimental groups", "procedure": "brief step-by-step"}}
- "deeper_interpretation": implications beyond the surface text.
- "limitations_and_debates": weaknesses, missing angles, areas of disagreement.
- "contextual_relevance": how this fits the history and future of the discipline.
- "controversies": inferred controversies or unresolved questions.
- "related_trajectories": where this research might lead next.

Keep the tone objective, scholarly and insightful. Output ONLY valid JSON."#,
        title = document.title,
        text = truncate_chars(&document.full_text, MAX_PROMPT_TEXT_CHARS),
        language = language,
    )
}

pub fn social_prompt(document: &ExtractedDocument, language: &str) -> String {
    format!(
        r#"You are a social media strategist creating short vertical videos (Reels, Shorts, TikTok) for an audience that speaks {language}.
Analyze the following research article and produce a social report in JSON.

Input Text:
{text}

The JSON object must have these keys (all text values in {language}):
- "target_audience_pain_points": frustrations or desires this topic addresses for a general audience.
- "viral_hooks": 3-5 strong opening lines that grab attention immediately.
- "narrative_patterns": suggested storytelling structures.
- "visual_style_suggestions": visual ideas that would work well.
- "engagement_strategies": ways to encourage comments and shares.
- "trending_formats": video formats that match this content.

Focus on edutainment: educational but entertaining and easy to digest. Output ONLY valid JSON."#,
        text = truncate_chars(&document.full_text, MAX_PROMPT_TEXT_CHARS),
        language = language,
    )
}

pub fn synthesis_prompt(academic: &AcademicReport, social: &SocialReport, language: &str) -> Result<String, StageError> {
    let academic_json = serde_json::to_string_pretty(academic)
        .map_err(|e| StageError::Failed(format!("Failed to serialize academic report: {}", e)))?;
    let social_json = serde_json::to_string_pretty(social)
        .map_err(|e| StageError::Failed(format!("Failed to serialize social report: {}", e)))?;

    Ok(format!(
        r#"You are the creative director of an educational media channel.
Merge the two reports below into one creative brief for a short vertical video.

Academic Report:
{academic_json}

Social Report:
{social_json}

Find the point where deep academic insight meets high social engagement.
The JSON object must have these keys (all text values in {language}):
- "core_message": the single most important takeaway, one sentence.
- "hook_strategy": the chosen hook, refined with academic credibility.
- "key_insights_for_script": 3-4 points that MUST appear in the script.
- "tone_guide": adjectives describing the voice.
- "visual_direction": general look and feel.
- "script_outline": scene-by-scene breakdown (hook, problem, insight, solution, call to action).

Output ONLY valid JSON."#,
        academic_json = academic_json,
        social_json = social_json,
        language = language,
    ))
}

pub struct AcademicAgent {
    client: Arc<GeminiClient>,
    language: String,
}

impl AcademicAgent {
    pub fn new(client: Arc<GeminiClient>, language: impl Into<String>) -> Self {
        Self {
            client,
            language: language.into(),
        }
    }
}

#[async_trait]
impl AnalysisStage for AcademicAgent {
    async fn analyze(&self, document: &ExtractedDocument) -> Result<AcademicReport, StageError> {
        tracing::info!("🎓 Academic analysis of '{}'", document.title);
        let report: AcademicReport = self
            .client
            .generate_json(&academic_prompt(document, &self.language))
            .await?;
        if report.summary.trim().is_empty() && report.key_findings.is_empty() {
            return Err(StageError::Failed("academic report came back empty".to_string()));
        }
        tracing::info!("✅ Academic analysis complete ({} findings)", report.key_findings.len());
        Ok(report)
    }
}

pub struct SocialAgent {
    client: Arc<GeminiClient>,
    language: String,
}

impl SocialAgent {
    pub fn new(client: Arc<GeminiClient>, language: impl Into<String>) -> Self {
        Self {
            client,
            language: language.into(),
        }
    }
}

#[async_trait]
impl EngagementStage for SocialAgent {
    async fn analyze(&self, document: &ExtractedDocument) -> Result<SocialReport, StageError> {
        tracing::info!("📣 Engagement analysis of '{}'", document.title);
        let report: SocialReport = self
            .client
            .generate_json(&social_prompt(document, &self.language))
            .await?;
        tracing::info!("✅ Engagement analysis complete ({} hooks)", report.viral_hooks.len());
        Ok(report)
    }
}

pub struct SynthesisAgent {
    client: Arc<GeminiClient>,
    language: String,
}

impl SynthesisAgent {
    pub fn new(client: Arc<GeminiClient>, language: impl Into<String>) -> Self {
        Self {
            client,
            language: language.into(),
        }
    }
}

#[async_trait]
impl SynthesisStage for SynthesisAgent {
    async fn merge(&self, academic: &AcademicReport, social: &SocialReport) -> Result<KnowledgeBase, StageError> {
        tracing::info!("🧠 Synthesizing creative brief");
        let prompt = synthesis_prompt(academic, social, &self.language)?;
        let brief: KnowledgeBase = self.client.generate_json(&prompt).await?;
        if brief.core_message.trim().is_empty() {
            return Err(StageError::Failed("creative brief has no core message".to_string()));
        }
        Ok(brief)
    }
}
