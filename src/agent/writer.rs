// Script drafting and revision
use async_trait::async_trait;
use std::sync::Arc;

use crate::gemini_client::GeminiClient;
use crate::types::KnowledgeBase;
use crate::workflow::executor::StageError;
use crate::workflow::stages::ScriptWriter;

pub fn draft_prompt(brief: &KnowledgeBase, language: &str) -> Result<String, StageError> {
    let brief_json = serde_json::to_string_pretty(brief)
        .map_err(|e| StageError::Failed(format!("Failed to serialize brief: {}", e)))?;

    Ok(format!(
        r#"Write a 60-second vertical video script based on this creative brief.

Creative Brief:
{brief_json}

Format requirements:
- LANGUAGE: {language} only.
- Vertical video pacing: fast and engaging.
- Total word count: 130-160 words (about 60 seconds of speech).
- Break the script into segments of roughly 5 seconds each.
- Every segment MUST have a visual cue.
- Ask explicitly for infographic visuals in methodology segments.

Example format:
**Time:** 0-5s
**Visual:** Stressed teacher surrounded by piles of paper
**Text:** Ever felt buried under grading?

**Time:** 5-10s
**Visual:** Simple infographic: a clock icon marking 12 weeks
**Text:** A new 12-week study changed all of that.

The narration must sound clear, conversational and natural to a native speaker.
Use the bold labels exactly as shown. Output ONLY the script text, ready for review."#,
        brief_json = brief_json,
        language = language,
    ))
}

pub fn revision_prompt(script: &str, feedback: &str, language: &str) -> String {
    format!(
        r#"Revise the following script based on the user's feedback.

Current Script:
{script}

User Feedback:
"{feedback}"

Language: {language}.
Keep the same format (time labels, visual cues, narration text).
Output ONLY the revised script."#,
        script = script,
        feedback = feedback.trim(),
        language = language,
    )
}

pub struct ScriptAgent {
    client: Arc<GeminiClient>,
    language: String,
}

impl ScriptAgent {
    pub fn new(client: Arc<GeminiClient>, language: impl Into<String>) -> Self {
        Self {
            client,
            language: language.into(),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, StageError> {
        let script = self.client.generate_text(prompt).await?;
        let script = script.trim();
        if script.is_empty() {
            return Err(StageError::Failed("model returned an empty script".to_string()));
        }
        Ok(script.to_string())
    }
}

#[async_trait]
impl ScriptWriter for ScriptAgent {
    async fn draft(&self, brief: &KnowledgeBase) -> Result<String, StageError> {
        tracing::info!("✍️ Drafting script");
        let script = self.generate(&draft_prompt(brief, &self.language)?).await?;
        tracing::info!("✅ Draft ready ({} words)", script.split_whitespace().count());
        Ok(script)
    }

    async fn revise(&self, script: &str, feedback: &str) -> Result<String, StageError> {
        tracing::info!("✏️ Revising script with {} chars of feedback", feedback.len());
        self.generate(&revision_prompt(script, feedback, &self.language)).await
    }
}
