// types.rs - Common data structures shared by the pipeline, the store and the adapters
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::workflow::state::ConversationState;

/// Canonical textual conversation identifier.
///
/// Transports hand us numeric chat ids, UUIDs or plain strings. The persisted
/// record set is keyed by text (JSON object keys are always strings), so every
/// id is normalised to one trimmed textual form before it touches the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Safe single path component for run-scoped output directories
    pub fn path_component(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<i64> for ConversationId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for ConversationId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// STAGE ARTIFACTS
// ============================================================================

/// Output of document ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub title: String,
    pub full_text: String,
    pub page_count: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodologyDetails {
    pub sample_size: String,
    pub duration: String,
    pub groups: String,
    pub procedure: String,
}

/// Scholarly reading of the document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcademicReport {
    pub summary: String,
    pub key_findings: Vec<String>,
    pub methodology_details: MethodologyDetails,
    pub deeper_interpretation: String,
    pub limitations_and_debates: String,
    pub contextual_relevance: String,
    pub controversies: String,
    pub related_trajectories: String,
    /// Keys the model produced that we do not model explicitly
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Audience / engagement reading of the document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialReport {
    pub target_audience_pain_points: String,
    pub viral_hooks: Vec<String>,
    pub narrative_patterns: Vec<String>,
    pub visual_style_suggestions: Vec<String>,
    pub engagement_strategies: Vec<String>,
    pub trending_formats: Vec<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Creative brief merged from the academic and social reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBase {
    pub core_message: String,
    pub hook_strategy: String,
    pub key_insights_for_script: Vec<String>,
    pub tone_guide: String,
    pub visual_direction: String,
    pub script_outline: serde_json::Value,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl KnowledgeBase {
    /// Short human-readable digest shown next to the first draft
    pub fn review_summary(&self) -> String {
        let mut text = String::from("🧠 Synthesis report (basis of the script):\n\n");
        text.push_str(&format!("📌 Core message: {}\n\n", self.core_message));
        text.push_str(&format!("🎣 Hook strategy: {}\n\n", self.hook_strategy));
        if !self.key_insights_for_script.is_empty() {
            text.push_str("💡 Key insights:\n");
            for insight in &self.key_insights_for_script {
                text.push_str(&format!("- {}\n", insight));
            }
            text.push('\n');
        }
        text.push_str(&format!("🎨 Visual direction: {}\n", self.visual_direction));
        text.push_str(&format!("🗣️ Tone: {}\n", self.tone_guide));
        text
    }
}

/// A single transcribed word with its timing in the narration track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl CaptionWord {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

/// Per-conversation accumulator of stage outputs.
///
/// Persisted as a JSON object keyed by stage name; absent stages are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataBag {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_document: Option<ExtractedDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_report: Option<AcademicReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_report: Option<SocialReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<KnowledgeBase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narration_audio: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub visual_list: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub caption_words: Vec<CaptionWord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_composition: Option<String>,
}

impl DataBag {
    /// Drop every intermediate artifact, keeping only the last delivered composition
    pub fn clear_intermediates(&mut self) {
        let final_composition = self.final_composition.take();
        *self = DataBag {
            final_composition,
            ..DataBag::default()
        };
    }

    /// Names of the artifacts currently held, in pipeline order
    pub fn artifact_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.extracted_document.is_some() {
            names.push("extracted_document");
        }
        if self.academic_report.is_some() {
            names.push("academic_report");
        }
        if self.social_report.is_some() {
            names.push("social_report");
        }
        if self.knowledge_base.is_some() {
            names.push("knowledge_base");
        }
        if self.script.is_some() {
            names.push("script");
        }
        if self.narration_audio.is_some() {
            names.push("narration_audio");
        }
        if !self.visual_list.is_empty() {
            names.push("visual_list");
        }
        if !self.caption_words.is_empty() {
            names.push("caption_words");
        }
        if self.final_composition.is_some() {
            names.push("final_composition");
        }
        names
    }
}

/// Durable record for one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub state: ConversationState,
    #[serde(default)]
    pub data: DataBag,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for ConversationRecord {
    fn default() -> Self {
        Self {
            state: ConversationState::default(),
            data: DataBag::default(),
            updated_at: Utc::now(),
        }
    }
}

/// Metadata handed to the publication sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationMetadata {
    pub title: String,
    pub description: String,
    pub hashtags: String,
}

impl PublicationMetadata {
    pub fn from_brief(brief: Option<&KnowledgeBase>) -> Self {
        let pick = |value: Option<&String>, fallback: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            title: pick(brief.map(|kb| &kb.core_message), "AI Research Video"),
            description: pick(brief.map(|kb| &kb.hook_strategy), "Generated by AI"),
            hashtags: "#Research #AI #Education".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_normalisation() {
        assert_eq!(ConversationId::from(42i64), ConversationId::from("42"));
        assert_eq!(ConversationId::from(" 42 ").as_str(), "42");
        assert_eq!(ConversationId::from("chat/7:a").path_component(), "chat_7_a");
    }

    #[test]
    fn test_clear_intermediates_keeps_final_composition() {
        let mut bag = DataBag {
            script: Some("draft".to_string()),
            visual_list: vec!["a.png".to_string()],
            final_composition: Some("out/final_video.mp4".to_string()),
            ..DataBag::default()
        };
        bag.clear_intermediates();
        assert_eq!(bag.artifact_names(), vec!["final_composition"]);
    }

    #[test]
    fn test_reports_tolerate_missing_and_extra_keys() {
        let report: AcademicReport = serde_json::from_str(
            r#"{"summary": "s", "key_findings": ["a"], "novelty": "high"}"#,
        )
        .unwrap();
        assert_eq!(report.summary, "s");
        assert_eq!(report.methodology_details, MethodologyDetails::default());
        assert_eq!(report.extra.get("novelty"), Some(&serde_json::json!("high")));
    }

    #[test]
    fn test_publication_metadata_fallbacks() {
        let metadata = PublicationMetadata::from_brief(None);
        assert_eq!(metadata.title, "AI Research Video");

        let brief = KnowledgeBase {
            core_message: "Feedback beats grading".to_string(),
            ..KnowledgeBase::default()
        };
        let metadata = PublicationMetadata::from_brief(Some(&brief));
        assert_eq!(metadata.title, "Feedback beats grading");
        assert_eq!(metadata.description, "Generated by AI");
    }
}
