// Orchestrator - drives conversations through the pipeline one event at a time
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RetentionPolicy;
use crate::progress::{Notifier, ProgressKind, ProgressUpdate};
use crate::script;
use crate::timeline::{ComposeError, TimelineComposer};
use crate::types::{ConversationId, PublicationMetadata};
use crate::workflow::checkpoint::ConversationStore;
use crate::workflow::executor::{RunnerConfig, Stage, StageOutcome, StageRunner};
use crate::workflow::stages::*;
use crate::workflow::state::{transition, ConversationState, StateEvent, Transition};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("could not read the document: {0}")]
    Ingestion(String),
    #[error("{stage} failed: {reason}")]
    Stage { stage: Stage, reason: String },
    #[error("{stage} degraded: {reason}")]
    Degraded { stage: Stage, reason: String },
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("publication failed: {0}")]
    Publication(String),
    #[error("composition failed: {0}")]
    Composition(#[from] ComposeError),
    #[error("nothing to compose: {0}")]
    NothingToCompose(String),
}

/// Button actions offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    ApproveScript,
    EditScript,
    NarrateAi,
    NarrateUser,
    Reset,
}

/// Something that arrived from the user
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Document {
        path: String,
        file_name: String,
        mime_type: Option<String>,
    },
    Text(String),
    Voice {
        path: String,
    },
    Action(UserAction),
    Reset,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Document { .. } => "document",
            InboundEvent::Text(_) => "text",
            InboundEvent::Voice { .. } => "voice",
            InboundEvent::Action(_) => "action",
            InboundEvent::Reset => "reset",
        }
    }
}

/// What one inbound event did to its conversation
#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    pub previous: ConversationState,
    pub current: ConversationState,
    /// Every transition attempted while handling the event, in order
    pub transitions: Vec<Transition>,
    /// The abort that ended this event, if any
    pub failure: Option<PipelineError>,
    /// Non-fatal problems (degraded stages, failed publication)
    pub warnings: Vec<PipelineError>,
}

impl EventReport {
    fn new(previous: ConversationState) -> Self {
        Self {
            previous,
            current: previous,
            transitions: Vec::new(),
            failure: None,
            warnings: Vec::new(),
        }
    }

    pub fn was_ignored(&self) -> bool {
        matches!(self.transitions.as_slice(), [Transition::Ignored { .. }])
    }
}

/// The full set of external capabilities
#[derive(Clone)]
pub struct Collaborators {
    pub ingestor: Arc<dyn DocumentIngestor>,
    pub academic: Arc<dyn AnalysisStage>,
    pub engagement: Arc<dyn EngagementStage>,
    pub synthesis: Arc<dyn SynthesisStage>,
    pub writer: Arc<dyn ScriptWriter>,
    pub narrator: Arc<dyn NarrationSynthesizer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub visuals: Arc<dyn VisualSynthesizer>,
    pub publisher: Arc<dyn PublicationSink>,
    pub renderer: Arc<dyn MediaRenderer>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub output_dir: PathBuf,
    pub retention: RetentionPolicy,
    pub caption_chunk_size: usize,
    pub runner: RunnerConfig,
}

pub struct Orchestrator {
    store: Arc<ConversationStore>,
    stages: Collaborators,
    runner: StageRunner,
    composer: TimelineComposer,
    config: OrchestratorConfig,
    /// One lock per conversation; events for the same id never interleave
    locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

fn is_pdf(file_name: &str, mime_type: Option<&str>) -> bool {
    match mime_type {
        Some(mime) if !mime.is_empty() && mime != "application/octet-stream" => mime == "application/pdf",
        _ => file_name.to_lowercase().ends_with(".pdf"),
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// What the conversation is waiting for, shown when an event does not fit
fn waiting_hint(state: ConversationState) -> &'static str {
    match state {
        ConversationState::AwaitingInput => "📄 Send a research article as a PDF to get started.",
        ConversationState::ProcessingInput => "⏳ Still analysing your document, please wait.",
        ConversationState::ReviewingDraft => {
            "✍️ Approve the script or send feedback (text or voice) to revise it."
        }
        ConversationState::AwaitingNarrationChoice => {
            "🎙️ Choose the narration: AI voice or your own recording."
        }
        ConversationState::AwaitingVoiceUpload => "🎤 Send a voice recording of the script.",
        ConversationState::GeneratingOutput => "🎬 Your video is being produced, please wait.",
    }
}

impl Orchestrator {
    pub fn new(store: Arc<ConversationStore>, stages: Collaborators, config: OrchestratorConfig) -> Self {
        Self {
            store,
            stages,
            runner: StageRunner::new(config.runner.clone()),
            composer: TimelineComposer::new(config.caption_chunk_size),
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Handle one inbound event end to end. Never fails; problems are reported in the result.
    pub async fn handle_event(&self, id: &ConversationId, event: InboundEvent) -> EventReport {
        let lock = self.conversation_lock(id).await;
        let _guard = lock.lock().await;

        let record = self.store.ensure(id).await;
        let state = record.state;
        let mut report = EventReport::new(state);
        info!(conversation_id = %id, state = %state, event = event.kind(), "📨 Handling event");

        match event {
            InboundEvent::Reset | InboundEvent::Action(UserAction::Reset) => {
                self.apply(id, StateEvent::Reset, &mut report).await;
                self.notify(id, ProgressKind::Prompt, "🔄 Starting over. Send me a PDF research article.")
                    .await;
            }
            InboundEvent::Document {
                path,
                file_name,
                mime_type,
            } => {
                self.on_document(id, &path, &file_name, mime_type.as_deref(), &mut report)
                    .await
            }
            InboundEvent::Text(text) => {
                if self.accepts(id, state, StateEvent::DraftRevised, &mut report).await {
                    self.revise_draft(id, &text, &mut report).await;
                }
            }
            InboundEvent::Voice { path } => match state {
                ConversationState::ReviewingDraft => self.on_voice_feedback(id, &path, &mut report).await,
                _ => {
                    if self.accepts(id, state, StateEvent::AudioReceived, &mut report).await {
                        self.on_voice_upload(id, &path, &mut report).await;
                    }
                }
            },
            InboundEvent::Action(UserAction::ApproveScript) => {
                if self.apply(id, StateEvent::DraftApproved, &mut report).await.is_ignored() {
                    self.notify(id, ProgressKind::Prompt, waiting_hint(state)).await;
                } else {
                    self.notify(
                        id,
                        ProgressKind::Prompt,
                        "✅ Script approved! How should it be narrated: AI voice or your own recording?",
                    )
                    .await;
                }
            }
            InboundEvent::Action(UserAction::EditScript) => {
                // Prompt only; the feedback itself arrives as text or voice
                if self.accepts(id, state, StateEvent::DraftRevised, &mut report).await {
                    self.notify(
                        id,
                        ProgressKind::Prompt,
                        "📝 Send your feedback as text or a voice message and I'll revise the script.",
                    )
                    .await;
                }
            }
            InboundEvent::Action(UserAction::NarrateAi) => {
                if self.accepts(id, state, StateEvent::AutomatedNarrationReady, &mut report).await {
                    self.narrate_automatically(id, &mut report).await;
                }
            }
            InboundEvent::Action(UserAction::NarrateUser) => {
                if !self.apply(id, StateEvent::ManualNarrationChosen, &mut report).await.is_ignored() {
                    self.notify(id, ProgressKind::Prompt, "🎤 Record the script and send it as a voice message.")
                        .await;
                } else {
                    self.notify(id, ProgressKind::Prompt, waiting_hint(state)).await;
                }
            }
        }

        report.current = self.store.state(id).await;
        if let Some(failure) = &report.failure {
            warn!(conversation_id = %id, "Event ended with failure: {}", failure);
        }
        info!(conversation_id = %id, from = %report.previous, to = %report.current, "📍 Event handled");
        report
    }

    /// Move conversations that were mid-phase when the process stopped back to the start.
    /// No stage is resumed.
    pub async fn recover_interrupted(&self) -> usize {
        let interrupted: Vec<ConversationId> = self
            .store
            .snapshot()
            .await
            .into_iter()
            .filter(|(_, record)| {
                matches!(
                    record.state,
                    ConversationState::ProcessingInput | ConversationState::GeneratingOutput
                )
            })
            .map(|(id, _)| id)
            .collect();

        for id in &interrupted {
            let lock = self.conversation_lock(id).await;
            let _guard = lock.lock().await;
            let mut report = EventReport::new(self.store.state(id).await);
            self.apply(id, StateEvent::Reset, &mut report).await;
            warn!(conversation_id = %id, "♻️ Reset conversation interrupted in {}", report.previous);
        }
        interrupted.len()
    }

    async fn conversation_lock(&self, id: &ConversationId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    // ========================================================================
    // TRANSITIONS AND NOTIFICATIONS
    // ========================================================================

    /// Feed an event to the state machine and persist the result
    async fn apply(&self, id: &ConversationId, event: StateEvent, report: &mut EventReport) -> Transition {
        let retention = self.config.retention;
        let outcome = self
            .store
            .update(id, |record| {
                let outcome = transition(record.state, event);
                if let Transition::Applied { to, .. } = outcome {
                    record.state = to;
                    if to == ConversationState::AwaitingInput && retention == RetentionPolicy::ClearOnReset {
                        record.data.clear_intermediates();
                    }
                }
                outcome
            })
            .await;

        match outcome {
            Transition::Applied { from, to } => {
                info!(conversation_id = %id, ?event, "🔀 {} -> {}", from, to)
            }
            Transition::Ignored { state, event } => {
                info!(conversation_id = %id, ?event, "Ignored event in state {}", state)
            }
        }
        report.transitions.push(outcome);
        outcome
    }

    /// Check without side effects whether `event` fits the current state.
    /// A mismatch is recorded as ignored and the user is told what is expected.
    async fn accepts(
        &self,
        id: &ConversationId,
        state: ConversationState,
        event: StateEvent,
        report: &mut EventReport,
    ) -> bool {
        let outcome = transition(state, event);
        if outcome.is_ignored() {
            info!(conversation_id = %id, ?event, "Ignored event in state {}", state);
            report.transitions.push(outcome);
            self.notify(id, ProgressKind::Prompt, waiting_hint(state)).await;
            return false;
        }
        true
    }

    async fn notify(&self, id: &ConversationId, kind: ProgressKind, message: impl Into<String>) {
        self.stages
            .notifier
            .notify(ProgressUpdate::new(id.clone(), kind, message))
            .await;
    }

    async fn fail(&self, id: &ConversationId, failure: PipelineError, report: &mut EventReport) {
        self.notify(id, ProgressKind::Failure, format!("❌ {}", failure)).await;
        report.failure = Some(failure);
    }

    fn required<T>(stage: Stage, outcome: StageOutcome<T>) -> Result<T, PipelineError> {
        outcome.into_result().map_err(|reason| match stage {
            Stage::Ingestion => PipelineError::Ingestion(reason),
            _ => PipelineError::Stage { stage, reason },
        })
    }

    async fn run_dir(&self, id: &ConversationId, run_id: &str) -> Result<PathBuf, String> {
        let dir = self.config.output_dir.join(id.path_component()).join(run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| format!("could not create {}: {}", dir.display(), e))?;
        Ok(dir)
    }

    // ========================================================================
    // PROCESSING PHASE
    // ========================================================================

    async fn on_document(
        &self,
        id: &ConversationId,
        path: &str,
        file_name: &str,
        mime_type: Option<&str>,
        report: &mut EventReport,
    ) {
        if !is_pdf(file_name, mime_type) {
            warn!(conversation_id = %id, file_name, ?mime_type, "Rejected non-PDF document");
            self.notify(id, ProgressKind::Failure, "⚠️ Please send a valid PDF document.")
                .await;
            report.failure = Some(PipelineError::Ingestion(format!("{} is not a PDF", file_name)));
            return;
        }

        self.apply(id, StateEvent::DocumentReceived, report).await;
        self.store.update(id, |record| record.data.clear_intermediates()).await;
        self.notify(id, ProgressKind::Info, format!("📥 Received {}. Starting the analysis...", file_name))
            .await;

        match self.run_processing(id, path).await {
            Ok(()) => {
                self.apply(id, StateEvent::AnalysisSucceeded, report).await;
            }
            Err(failure) => {
                self.fail(id, failure, report).await;
                self.apply(id, StateEvent::StageFailed, report).await;
            }
        }
    }

    async fn run_processing(&self, id: &ConversationId, path: &str) -> Result<(), PipelineError> {
        let document = Self::required(
            Stage::Ingestion,
            self.runner.run(Stage::Ingestion, self.stages.ingestor.extract(path)).await,
        )?;
        let summary = format!("📄 Read \"{}\" ({} pages)", document.title, document.page_count);
        self.store
            .update(id, |r| r.data.extracted_document = Some(document.clone()))
            .await;
        self.notify(id, ProgressKind::StageCompleted, summary).await;

        let academic = Self::required(
            Stage::AcademicAnalysis,
            self.runner
                .run(Stage::AcademicAnalysis, self.stages.academic.analyze(&document))
                .await,
        )?;
        self.store
            .update(id, |r| r.data.academic_report = Some(academic.clone()))
            .await;
        self.notify(id, ProgressKind::StageCompleted, "🎓 Academic analysis complete").await;

        let social = Self::required(
            Stage::EngagementAnalysis,
            self.runner
                .run(Stage::EngagementAnalysis, self.stages.engagement.analyze(&document))
                .await,
        )?;
        self.store
            .update(id, |r| r.data.social_report = Some(social.clone()))
            .await;
        self.notify(id, ProgressKind::StageCompleted, "📱 Audience analysis complete").await;

        let brief = Self::required(
            Stage::Synthesis,
            self.runner
                .run(Stage::Synthesis, self.stages.synthesis.merge(&academic, &social))
                .await,
        )?;
        self.store
            .update(id, |r| r.data.knowledge_base = Some(brief.clone()))
            .await;
        self.notify(id, ProgressKind::StageCompleted, "🧠 Creative brief ready").await;

        let draft = Self::required(
            Stage::ScriptDrafting,
            self.runner
                .run(Stage::ScriptDrafting, self.stages.writer.draft(&brief))
                .await,
        )?;
        self.store
            .update(id, |r| r.data.script = Some(draft.clone()))
            .await;

        self.stages
            .notifier
            .notify(
                ProgressUpdate::new(
                    id.clone(),
                    ProgressKind::DraftReady,
                    format!("{}\n📝 Script draft:\n\n{}", brief.review_summary(), draft),
                )
                .with_details(serde_json::json!({ "script": draft })),
            )
            .await;
        Ok(())
    }

    // ========================================================================
    // REVIEW
    // ========================================================================

    async fn revise_draft(&self, id: &ConversationId, feedback: &str, report: &mut EventReport) {
        let Some(current) = self.store.get(id).await.data.script else {
            self.fail(
                id,
                PipelineError::NothingToCompose("there is no draft to revise".to_string()),
                report,
            )
            .await;
            return;
        };

        self.notify(id, ProgressKind::Info, "🔄 Revising the script...").await;
        let outcome = self
            .runner
            .run(Stage::ScriptRevision, self.stages.writer.revise(&current, feedback))
            .await;

        match Self::required(Stage::ScriptRevision, outcome) {
            Ok(revised) => {
                self.store
                    .update(id, |r| r.data.script = Some(revised.clone()))
                    .await;
                self.apply(id, StateEvent::DraftRevised, report).await;
                self.stages
                    .notifier
                    .notify(
                        ProgressUpdate::new(
                            id.clone(),
                            ProgressKind::DraftReady,
                            format!("📝 Revised script:\n\n{}", revised),
                        )
                        .with_details(serde_json::json!({ "script": revised })),
                    )
                    .await;
            }
            // The previous draft stays in place
            Err(failure) => self.fail(id, failure, report).await,
        }
    }

    async fn on_voice_feedback(&self, id: &ConversationId, path: &str, report: &mut EventReport) {
        let outcome = self
            .runner
            .run(Stage::FeedbackTranscription, self.stages.transcriber.transcribe(path))
            .await;
        match Self::required(Stage::FeedbackTranscription, outcome) {
            Ok(feedback) => {
                self.notify(id, ProgressKind::Info, format!("🗣️ Heard: \"{}\"", feedback))
                    .await;
                self.revise_draft(id, &feedback, report).await;
            }
            Err(failure) => self.fail(id, failure, report).await,
        }
    }

    // ========================================================================
    // NARRATION
    // ========================================================================

    async fn narrate_automatically(&self, id: &ConversationId, report: &mut EventReport) {
        let script = self.store.get(id).await.data.script.unwrap_or_default();
        let text = script::narration_text(&script);
        if text.is_empty() {
            self.fail(
                id,
                PipelineError::NothingToCompose("the script has no narration text".to_string()),
                report,
            )
            .await;
            return;
        }

        let run_id = Uuid::new_v4().to_string();
        let run_dir = match self.run_dir(id, &run_id).await {
            Ok(dir) => dir,
            Err(reason) => {
                let stage = Stage::NarrationSynthesis;
                self.fail(id, PipelineError::Stage { stage, reason }, report).await;
                return;
            }
        };

        self.notify(id, ProgressKind::Info, "🎙️ Generating the AI narration...").await;
        let target = path_string(&run_dir.join("narration.mp3"));
        let outcome = self
            .runner
            .run(Stage::NarrationSynthesis, self.stages.narrator.synthesize(&text, &target))
            .await;

        match Self::required(Stage::NarrationSynthesis, outcome) {
            Ok(audio) => {
                self.store
                    .update(id, |r| {
                        r.data.run_id = Some(run_id.clone());
                        r.data.narration_audio = Some(audio.clone());
                    })
                    .await;
                self.notify(id, ProgressKind::StageCompleted, "🎙️ Narration ready").await;
                self.apply(id, StateEvent::AutomatedNarrationReady, report).await;
                self.generate(id, report).await;
            }
            Err(failure) => {
                // Still AwaitingNarrationChoice: the user may pick again
                self.fail(id, failure, report).await;
                self.notify(id, ProgressKind::Prompt, waiting_hint(ConversationState::AwaitingNarrationChoice))
                    .await;
            }
        }
    }

    async fn on_voice_upload(&self, id: &ConversationId, path: &str, report: &mut EventReport) {
        let run_id = Uuid::new_v4().to_string();
        let audio = match self.run_dir(id, &run_id).await {
            Ok(dir) => {
                let target = path_string(&dir.join("narration.mp3"));
                let outcome = self
                    .runner
                    .run(Stage::AudioNormalization, self.stages.renderer.normalize_audio(path, &target))
                    .await;
                match outcome.into_result() {
                    Ok(normalized) => normalized,
                    Err(reason) => {
                        warn!(conversation_id = %id, "Using the uploaded audio as-is: {}", reason);
                        report.warnings.push(PipelineError::Degraded {
                            stage: Stage::AudioNormalization,
                            reason,
                        });
                        path.to_string()
                    }
                }
            }
            Err(reason) => {
                warn!(conversation_id = %id, "Using the uploaded audio as-is: {}", reason);
                path.to_string()
            }
        };

        self.store
            .update(id, |r| {
                r.data.run_id = Some(run_id.clone());
                r.data.narration_audio = Some(audio.clone());
            })
            .await;
        self.notify(id, ProgressKind::StageCompleted, "🎧 Recording received").await;
        self.apply(id, StateEvent::AudioReceived, report).await;
        self.generate(id, report).await;
    }

    // ========================================================================
    // GENERATION PHASE
    // ========================================================================

    /// Always ends in `AwaitingInput`, whatever happens
    async fn generate(&self, id: &ConversationId, report: &mut EventReport) {
        match self.run_generation(id, report).await {
            Ok(video) => info!(conversation_id = %id, "🎬 Delivered {}", video),
            Err(failure) => {
                error!(conversation_id = %id, "Generation aborted: {}", failure);
                self.fail(id, failure, report).await;
            }
        }
        self.apply(id, StateEvent::GenerationFinished, report).await;
    }

    async fn run_generation(&self, id: &ConversationId, report: &mut EventReport) -> Result<String, PipelineError> {
        let data = self.store.get(id).await.data;
        let script = data
            .script
            .ok_or_else(|| PipelineError::NothingToCompose("there is no approved script".to_string()))?;
        let audio = data
            .narration_audio
            .ok_or_else(|| PipelineError::NothingToCompose("there is no narration audio".to_string()))?;
        let run_id = data.run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let run_dir = self.run_dir(id, &run_id).await.map_err(|reason| PipelineError::Stage {
            stage: Stage::Rendering,
            reason,
        })?;

        let cues = script::extract_visual_cues(&script);
        if cues.is_empty() {
            return Err(PipelineError::NothingToCompose(
                "no visual cues were found in the script".to_string(),
            ));
        }
        self.notify(id, ProgressKind::Info, format!("🎨 Generating {} visuals...", cues.len()))
            .await;

        let mut visuals = Vec::with_capacity(cues.len());
        for (i, cue) in cues.iter().enumerate() {
            let target = path_string(&run_dir.join(format!("frame_{}.png", i)));
            let outcome = self
                .runner
                .run(Stage::VisualSynthesis, self.stages.visuals.synthesize(cue, &target))
                .await;
            match outcome.into_result() {
                Ok(path) => visuals.push(path),
                Err(reason) => {
                    warn!(conversation_id = %id, cue = %cue, "Skipping visual {}: {}", i, reason);
                    report.warnings.push(PipelineError::Degraded {
                        stage: Stage::VisualSynthesis,
                        reason,
                    });
                }
            }
        }
        if visuals.is_empty() {
            return Err(PipelineError::NothingToCompose(
                "none of the visuals could be generated".to_string(),
            ));
        }
        self.store
            .update(id, |r| r.data.visual_list = visuals.clone())
            .await;
        self.notify(
            id,
            ProgressKind::StageCompleted,
            format!("🖼️ {}/{} visuals ready", visuals.len(), cues.len()),
        )
        .await;

        let captions = match self
            .runner
            .run_degradable(
                Stage::CaptionExtraction,
                Vec::new(),
                self.stages.transcriber.transcribe_with_timestamps(&audio),
            )
            .await
        {
            StageOutcome::Ok(words) => words,
            StageOutcome::Degraded(words, reason) => {
                self.notify(id, ProgressKind::Info, "⚠️ Captions unavailable, continuing without them")
                    .await;
                report.warnings.push(PipelineError::Degraded {
                    stage: Stage::CaptionExtraction,
                    reason,
                });
                words
            }
            StageOutcome::Failed(_) => Vec::new(),
        };
        self.store
            .update(id, |r| r.data.caption_words = captions.clone())
            .await;

        let duration = Self::required(
            Stage::DurationProbe,
            self.runner
                .run(Stage::DurationProbe, self.stages.renderer.probe_duration(&audio))
                .await,
        )?;

        let words = (!captions.is_empty()).then_some(captions.as_slice());
        let timeline = self.composer.compose(duration, &visuals, words)?;

        self.notify(id, ProgressKind::Info, "🎬 Rendering the video...").await;
        let target = path_string(&run_dir.join("final_video.mp4"));
        let video = Self::required(
            Stage::Rendering,
            self.runner
                .run(Stage::Rendering, self.stages.renderer.render(&timeline, &audio, &target))
                .await,
        )?;

        self.store
            .update(id, |r| r.data.final_composition = Some(video.clone()))
            .await;

        self.stages
            .notifier
            .notify(
                ProgressUpdate::new(id.clone(), ProgressKind::Delivered, "✅ Your video is ready!").with_details(
                    serde_json::json!({
                        "path": video,
                        "duration_seconds": duration,
                        "visuals": timeline.visuals.len(),
                        "caption_groups": timeline.captions.len(),
                    }),
                ),
            )
            .await;

        let brief = self.store.get(id).await.data.knowledge_base;
        let metadata = PublicationMetadata::from_brief(brief.as_ref());
        let outcome = self
            .runner
            .run(Stage::Publication, self.stages.publisher.publish(&video, &metadata))
            .await;
        if let StageOutcome::Failed(reason) = outcome {
            warn!(conversation_id = %id, "Publication failed: {}", reason);
            report.warnings.push(PipelineError::Publication(reason));
        }

        Ok(video)
    }
}

type EventQueues = Arc<Mutex<HashMap<ConversationId, mpsc::UnboundedSender<InboundEvent>>>>;

/// Runs inbound events in the background, one FIFO queue per conversation.
/// Events for one conversation are handled in the order they were submitted;
/// different conversations proceed concurrently.
pub struct EventDispatcher {
    orchestrator: Arc<Orchestrator>,
    queues: EventQueues,
}

impl EventDispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue an event behind any still pending for the same conversation
    pub async fn submit(&self, id: ConversationId, event: InboundEvent) {
        let mut queues = self.queues.lock().await;
        let event = match queues.get(&id) {
            Some(queue) => match queue.send(event) {
                Ok(()) => return,
                // Worker is gone; start a new one with the event
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(event).is_err() {
            error!(conversation_id = %id, "Failed to queue event");
            return;
        }
        queues.insert(id.clone(), tx);
        tokio::spawn(drain_queue(self.orchestrator.clone(), self.queues.clone(), id, rx));
    }

    /// Conversations with events still queued or running
    pub async fn busy(&self) -> usize {
        self.queues.lock().await.len()
    }
}

async fn drain_queue(
    orchestrator: Arc<Orchestrator>,
    queues: EventQueues,
    id: ConversationId,
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
) {
    loop {
        let event = match rx.try_recv() {
            Ok(event) => event,
            Err(_) => {
                // Checked again under the queue lock so no submitted event is dropped
                let mut queues = queues.lock().await;
                match rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => {
                        queues.remove(&id);
                        return;
                    }
                }
            }
        };

        let report = orchestrator.handle_event(&id, event).await;
        tracing::debug!(
            conversation_id = %id,
            previous = %report.previous,
            current = %report.current,
            "Queued event handled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Timeline;
    use crate::types::*;
    use crate::workflow::checkpoint::{JsonFileBackend, StoreBackend};
    use crate::workflow::executor::StageError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const DRAFT: &str = "**Tempo:** 0-5s\n**Visual:** Tired teacher\n**Texto:** Grading takes forever.\n\n**Tempo:** 5-10s\n**Visual:** Clock icon\n**Texto:** A new study says otherwise.\n\n**Tempo:** 10-15s\n**Visual:** Happy classroom\n**Texto:** Here's how.";

    #[derive(Default)]
    struct FakeStudio {
        failing: StdMutex<HashSet<Stage>>,
        failing_cues: StdMutex<HashSet<String>>,
        rendered: StdMutex<Vec<Timeline>>,
        published: StdMutex<Vec<(String, PublicationMetadata)>>,
        updates: StdMutex<Vec<ProgressUpdate>>,
        draft: StdMutex<Option<String>>,
        /// Delay applied inside the writer stages
        writer_delay: StdMutex<Option<Duration>>,
        writers_running: AtomicUsize,
        max_writers_running: AtomicUsize,
    }

    impl FakeStudio {
        fn fail(&self, stage: Stage) {
            self.failing.lock().unwrap().insert(stage);
        }

        fn check(&self, stage: Stage) -> Result<(), StageError> {
            if self.failing.lock().unwrap().contains(&stage) {
                Err(StageError::Failed(format!("{} unavailable", stage)))
            } else {
                Ok(())
            }
        }

        /// Sleep inside a writer call while counting overlapping calls
        async fn slow_write(&self) {
            let running = self.writers_running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_writers_running.fetch_max(running, Ordering::SeqCst);
            let delay = *self.writer_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.writers_running.fetch_sub(1, Ordering::SeqCst);
        }

        fn messages(&self, kind: ProgressKind) -> Vec<String> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.kind == kind)
                .map(|u| u.message.clone())
                .collect()
        }
    }

    #[async_trait]
    impl DocumentIngestor for FakeStudio {
        async fn extract(&self, _path: &str) -> Result<ExtractedDocument, StageError> {
            if self.failing.lock().unwrap().contains(&Stage::Ingestion) {
                return Err(StageError::Ingestion("not a readable PDF".to_string()));
            }
            Ok(ExtractedDocument {
                title: "Feedback in Classrooms".to_string(),
                full_text: "Formative feedback improves outcomes.".to_string(),
                page_count: 12,
                metadata: HashMap::new(),
            })
        }
    }

    #[async_trait]
    impl AnalysisStage for FakeStudio {
        async fn analyze(&self, _document: &ExtractedDocument) -> Result<AcademicReport, StageError> {
            self.check(Stage::AcademicAnalysis)?;
            Ok(AcademicReport {
                summary: "Feedback helps".to_string(),
                ..AcademicReport::default()
            })
        }
    }

    #[async_trait]
    impl EngagementStage for FakeStudio {
        async fn analyze(&self, _document: &ExtractedDocument) -> Result<SocialReport, StageError> {
            self.check(Stage::EngagementAnalysis)?;
            Ok(SocialReport {
                viral_hooks: vec!["Stop grading!".to_string()],
                ..SocialReport::default()
            })
        }
    }

    #[async_trait]
    impl SynthesisStage for FakeStudio {
        async fn merge(&self, _a: &AcademicReport, _s: &SocialReport) -> Result<KnowledgeBase, StageError> {
            self.check(Stage::Synthesis)?;
            Ok(KnowledgeBase {
                core_message: "Feedback beats grades".to_string(),
                hook_strategy: "Provocative question".to_string(),
                ..KnowledgeBase::default()
            })
        }
    }

    #[async_trait]
    impl ScriptWriter for FakeStudio {
        async fn draft(&self, _brief: &KnowledgeBase) -> Result<String, StageError> {
            self.check(Stage::ScriptDrafting)?;
            self.slow_write().await;
            Ok(self.draft.lock().unwrap().clone().unwrap_or_else(|| DRAFT.to_string()))
        }

        async fn revise(&self, script: &str, feedback: &str) -> Result<String, StageError> {
            self.check(Stage::ScriptRevision)?;
            self.slow_write().await;
            Ok(format!("{}\n\n**Visual:** Extra scene\n**Texto:** {}", script, feedback))
        }
    }

    #[async_trait]
    impl NarrationSynthesizer for FakeStudio {
        async fn synthesize(&self, _text: &str, output_path: &str) -> Result<String, StageError> {
            self.check(Stage::NarrationSynthesis)?;
            Ok(output_path.to_string())
        }
    }

    #[async_trait]
    impl Transcriber for FakeStudio {
        async fn transcribe(&self, _audio_path: &str) -> Result<String, StageError> {
            self.check(Stage::FeedbackTranscription)?;
            Ok("make it funnier".to_string())
        }

        async fn transcribe_with_timestamps(&self, _audio_path: &str) -> Result<Vec<CaptionWord>, StageError> {
            self.check(Stage::CaptionExtraction)?;
            Ok((0..8)
                .map(|i| CaptionWord::new(format!("w{}", i), i as f64, i as f64 + 0.8))
                .collect())
        }
    }

    #[async_trait]
    impl VisualSynthesizer for FakeStudio {
        async fn synthesize(&self, prompt: &str, output_path: &str) -> Result<String, StageError> {
            if self.failing_cues.lock().unwrap().contains(prompt) {
                return Err(StageError::from("content policy"));
            }
            Ok(output_path.to_string())
        }
    }

    #[async_trait]
    impl PublicationSink for FakeStudio {
        async fn publish(&self, video_path: &str, metadata: &PublicationMetadata) -> Result<(), StageError> {
            self.check(Stage::Publication)?;
            self.published
                .lock()
                .unwrap()
                .push((video_path.to_string(), metadata.clone()));
            Ok(())
        }
    }

    #[async_trait]
    impl MediaRenderer for FakeStudio {
        async fn probe_duration(&self, _audio_path: &str) -> Result<f64, StageError> {
            self.check(Stage::DurationProbe)?;
            Ok(60.0)
        }

        async fn render(&self, timeline: &Timeline, _audio: &str, output_path: &str) -> Result<String, StageError> {
            self.check(Stage::Rendering)?;
            self.rendered.lock().unwrap().push(timeline.clone());
            Ok(output_path.to_string())
        }

        async fn normalize_audio(&self, _input: &str, output_path: &str) -> Result<String, StageError> {
            self.check(Stage::AudioNormalization)?;
            Ok(output_path.to_string())
        }
    }

    #[async_trait]
    impl Notifier for FakeStudio {
        async fn notify(&self, update: ProgressUpdate) {
            self.updates.lock().unwrap().push(update);
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        studio: Arc<FakeStudio>,
        orchestrator: Arc<Orchestrator>,
        state_file: PathBuf,
        id: ConversationId,
    }

    async fn harness(retention: RetentionPolicy) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        let store = Arc::new(ConversationStore::open(Arc::new(JsonFileBackend::new(state_file.clone()))).await);
        let studio = Arc::new(FakeStudio::default());
        let stages = Collaborators {
            ingestor: studio.clone(),
            academic: studio.clone(),
            engagement: studio.clone(),
            synthesis: studio.clone(),
            writer: studio.clone(),
            narrator: studio.clone(),
            transcriber: studio.clone(),
            visuals: studio.clone(),
            publisher: studio.clone(),
            renderer: studio.clone(),
            notifier: studio.clone(),
        };
        let orchestrator = Arc::new(Orchestrator::new(
            store,
            stages,
            OrchestratorConfig {
                output_dir: dir.path().join("outputs"),
                retention,
                caption_chunk_size: 4,
                runner: RunnerConfig::default(),
            },
        ));
        Harness {
            _dir: dir,
            studio,
            orchestrator,
            state_file,
            id: ConversationId::from(1001i64),
        }
    }

    fn pdf() -> InboundEvent {
        InboundEvent::Document {
            path: "/tmp/paper.pdf".to_string(),
            file_name: "paper.pdf".to_string(),
            mime_type: Some("application/pdf".to_string()),
        }
    }

    impl Harness {
        async fn send(&self, event: InboundEvent) -> EventReport {
            self.orchestrator.handle_event(&self.id, event).await
        }

        async fn data(&self) -> DataBag {
            self.orchestrator.store().get(&self.id).await.data
        }

        async fn to_narration_choice(&self) {
            self.send(pdf()).await;
            self.send(InboundEvent::Action(UserAction::ApproveScript)).await;
            assert_eq!(
                self.orchestrator.store().state(&self.id).await,
                ConversationState::AwaitingNarrationChoice
            );
        }
    }

    #[tokio::test]
    async fn test_document_produces_reviewable_draft() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        let report = h.send(pdf()).await;

        assert_eq!(report.previous, ConversationState::AwaitingInput);
        assert_eq!(report.current, ConversationState::ReviewingDraft);
        assert!(report.failure.is_none());

        let data = h.data().await;
        assert_eq!(
            data.artifact_names(),
            vec!["extracted_document", "academic_report", "social_report", "knowledge_base", "script"]
        );
        assert_eq!(h.studio.messages(ProgressKind::StageCompleted).len(), 4);
        let drafts = h.studio.messages(ProgressKind::DraftReady);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].contains("Feedback beats grades"));
        assert!(drafts[0].contains("Tired teacher"));
    }

    #[tokio::test]
    async fn test_full_automated_run() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.to_narration_choice().await;

        let report = h.send(InboundEvent::Action(UserAction::NarrateAi)).await;
        assert_eq!(report.previous, ConversationState::AwaitingNarrationChoice);
        assert_eq!(report.current, ConversationState::AwaitingInput);
        assert!(report.failure.is_none(), "{:?}", report.failure);
        assert!(report.warnings.is_empty());

        let rendered = h.studio.rendered.lock().unwrap().clone();
        assert_eq!(rendered.len(), 1);
        let timeline = &rendered[0];
        assert_eq!(timeline.visuals.len(), 3);
        assert!((timeline.visuals[0].duration() - 20.0).abs() < 1e-9);
        assert_eq!(timeline.visuals[2].end, 60.0);
        assert_eq!(timeline.captions.len(), 2);

        let data = h.data().await;
        let video = data.final_composition.clone().unwrap();
        assert!(video.ends_with("final_video.mp4"));
        assert!(video.contains("1001"));
        // Intermediates are cleared once the conversation is back at the start
        assert_eq!(data.artifact_names(), vec!["final_composition"]);

        let published = h.studio.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.title, "Feedback beats grades");
        assert_eq!(h.studio.messages(ProgressKind::Delivered).len(), 1);
    }

    #[tokio::test]
    async fn test_stage_failure_aborts_processing() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.studio.fail(Stage::EngagementAnalysis);

        let report = h.send(pdf()).await;
        assert_eq!(report.current, ConversationState::AwaitingInput);
        assert!(matches!(
            report.failure,
            Some(PipelineError::Stage { stage: Stage::EngagementAnalysis, .. })
        ));
        assert_eq!(h.studio.messages(ProgressKind::Failure).len(), 1);
        assert!(h.data().await.artifact_names().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_document_is_an_ingestion_failure() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.studio.fail(Stage::Ingestion);
        let report = h.send(pdf()).await;
        assert!(matches!(report.failure, Some(PipelineError::Ingestion(_))));
        assert_eq!(report.current, ConversationState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_non_pdf_is_rejected_without_transition() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        let report = h
            .send(InboundEvent::Document {
                path: "/tmp/notes.docx".to_string(),
                file_name: "notes.docx".to_string(),
                mime_type: Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string()),
            })
            .await;
        assert_eq!(report.current, ConversationState::AwaitingInput);
        assert!(report.transitions.is_empty());
        assert!(h.studio.messages(ProgressKind::Failure)[0].contains("valid PDF"));
    }

    #[tokio::test]
    async fn test_revision_replaces_script() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.send(pdf()).await;

        let report = h.send(InboundEvent::Text("shorter please".to_string())).await;
        assert_eq!(report.current, ConversationState::ReviewingDraft);
        assert_eq!(
            report.transitions,
            vec![Transition::Applied {
                from: ConversationState::ReviewingDraft,
                to: ConversationState::ReviewingDraft
            }]
        );
        let script = h.data().await.script.unwrap();
        assert!(script.ends_with("shorter please"));
    }

    #[tokio::test]
    async fn test_failed_revision_keeps_previous_draft() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.send(pdf()).await;
        h.studio.fail(Stage::ScriptRevision);

        let report = h.send(InboundEvent::Text("shorter please".to_string())).await;
        assert_eq!(report.current, ConversationState::ReviewingDraft);
        assert!(report.failure.is_some());
        assert_eq!(h.data().await.script.as_deref(), Some(DRAFT));
    }

    #[tokio::test]
    async fn test_voice_feedback_is_transcribed_then_applied() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.send(pdf()).await;

        let report = h
            .send(InboundEvent::Voice {
                path: "/tmp/feedback.ogg".to_string(),
            })
            .await;
        assert_eq!(report.current, ConversationState::ReviewingDraft);
        assert!(h.data().await.script.unwrap().ends_with("make it funnier"));

        h.studio.fail(Stage::FeedbackTranscription);
        let before = h.data().await.script;
        let report = h
            .send(InboundEvent::Voice {
                path: "/tmp/feedback.ogg".to_string(),
            })
            .await;
        assert!(matches!(
            report.failure,
            Some(PipelineError::Stage { stage: Stage::FeedbackTranscription, .. })
        ));
        assert_eq!(h.data().await.script, before);
    }

    #[tokio::test]
    async fn test_narration_failure_keeps_choice_open() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.to_narration_choice().await;
        h.studio.fail(Stage::NarrationSynthesis);

        let report = h.send(InboundEvent::Action(UserAction::NarrateAi)).await;
        assert_eq!(report.current, ConversationState::AwaitingNarrationChoice);
        assert!(report.failure.is_some());
        assert!(h.studio.rendered.lock().unwrap().is_empty());

        // The manual path is still available
        let report = h.send(InboundEvent::Action(UserAction::NarrateUser)).await;
        assert_eq!(report.current, ConversationState::AwaitingVoiceUpload);
    }

    #[tokio::test]
    async fn test_manual_narration_with_failed_normalization() {
        let h = harness(RetentionPolicy::KeepAll).await;
        h.to_narration_choice().await;
        h.send(InboundEvent::Action(UserAction::NarrateUser)).await;
        h.studio.fail(Stage::AudioNormalization);

        let report = h
            .send(InboundEvent::Voice {
                path: "/tmp/my_voice.ogg".to_string(),
            })
            .await;
        assert_eq!(report.current, ConversationState::AwaitingInput);
        assert!(report.failure.is_none());
        assert!(matches!(
            report.warnings.as_slice(),
            [PipelineError::Degraded { stage: Stage::AudioNormalization, .. }]
        ));

        let data = h.data().await;
        assert_eq!(data.narration_audio.as_deref(), Some("/tmp/my_voice.ogg"));
        assert!(data.final_composition.is_some());
        // KeepAll leaves the intermediates in place
        assert_eq!(data.visual_list.len(), 3);
    }

    #[tokio::test]
    async fn test_caption_failure_degrades_to_no_captions() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.to_narration_choice().await;
        h.studio.fail(Stage::CaptionExtraction);

        let report = h.send(InboundEvent::Action(UserAction::NarrateAi)).await;
        assert!(report.failure.is_none());
        assert!(matches!(
            report.warnings.as_slice(),
            [PipelineError::Degraded { stage: Stage::CaptionExtraction, .. }]
        ));
        let rendered = h.studio.rendered.lock().unwrap().clone();
        assert!(rendered[0].captions.is_empty());
        assert_eq!(rendered[0].visuals.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_visuals_are_skipped() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.studio.failing_cues.lock().unwrap().insert("Clock icon".to_string());
        h.to_narration_choice().await;

        let report = h.send(InboundEvent::Action(UserAction::NarrateAi)).await;
        assert!(report.failure.is_none());
        let rendered = h.studio.rendered.lock().unwrap().clone();
        assert_eq!(rendered[0].visuals.len(), 2);
        assert!((rendered[0].visuals[0].duration() - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_script_without_cues_aborts_generation() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        *h.studio.draft.lock().unwrap() = Some("Just words, nothing to see.".to_string());
        h.to_narration_choice().await;

        let report = h.send(InboundEvent::Action(UserAction::NarrateAi)).await;
        assert_eq!(report.current, ConversationState::AwaitingInput);
        assert!(matches!(report.failure, Some(PipelineError::NothingToCompose(_))));
        assert!(h.studio.rendered.lock().unwrap().is_empty());
        assert!(h.data().await.final_composition.is_none());
    }

    #[tokio::test]
    async fn test_render_failure_still_returns_to_start() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.to_narration_choice().await;
        h.studio.fail(Stage::Rendering);

        let report = h.send(InboundEvent::Action(UserAction::NarrateAi)).await;
        assert_eq!(report.current, ConversationState::AwaitingInput);
        assert!(matches!(
            report.failure,
            Some(PipelineError::Stage { stage: Stage::Rendering, .. })
        ));
    }

    #[tokio::test]
    async fn test_publication_failure_is_only_a_warning() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.to_narration_choice().await;
        h.studio.fail(Stage::Publication);

        let report = h.send(InboundEvent::Action(UserAction::NarrateAi)).await;
        assert!(report.failure.is_none());
        assert!(matches!(report.warnings.as_slice(), [PipelineError::Publication(_)]));
        assert!(h.data().await.final_composition.is_some());
    }

    #[tokio::test]
    async fn test_out_of_state_events_are_ignored() {
        let h = harness(RetentionPolicy::ClearOnReset).await;

        let report = h.send(InboundEvent::Action(UserAction::ApproveScript)).await;
        assert!(report.was_ignored());
        assert_eq!(report.current, ConversationState::AwaitingInput);

        let report = h.send(InboundEvent::Text("hello".to_string())).await;
        assert!(report.was_ignored());
        let report = h.send(InboundEvent::Action(UserAction::NarrateAi)).await;
        assert!(report.was_ignored());
        assert!(h.studio.messages(ProgressKind::Prompt)[0].contains("PDF"));
    }

    #[tokio::test]
    async fn test_reset_returns_to_start() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.send(pdf()).await;

        let report = h.send(InboundEvent::Reset).await;
        assert_eq!(report.previous, ConversationState::ReviewingDraft);
        assert_eq!(report.current, ConversationState::AwaitingInput);
        assert!(h.data().await.script.is_none());
    }

    #[tokio::test]
    async fn test_interrupted_conversations_are_recovered() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        let stuck = ConversationId::from("stuck");
        h.orchestrator
            .store()
            .update(&stuck, |r| r.state = ConversationState::GeneratingOutput)
            .await;
        h.send(pdf()).await;

        assert_eq!(h.orchestrator.recover_interrupted().await, 1);
        assert_eq!(
            h.orchestrator.store().state(&stuck).await,
            ConversationState::AwaitingInput
        );
        assert_eq!(
            h.orchestrator.store().state(&h.id).await,
            ConversationState::ReviewingDraft
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_events_for_one_conversation_do_not_interleave() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        h.send(pdf()).await;
        *h.studio.writer_delay.lock().unwrap() = Some(Duration::from_millis(100));

        let (revised, approved) = tokio::join!(
            h.send(InboundEvent::Text("shorter please".to_string())),
            h.send(InboundEvent::Action(UserAction::ApproveScript)),
        );

        // The approval waited for the slow revision to finish
        assert_eq!(
            revised.transitions,
            vec![Transition::Applied {
                from: ConversationState::ReviewingDraft,
                to: ConversationState::ReviewingDraft
            }]
        );
        assert_eq!(approved.previous, ConversationState::ReviewingDraft);
        assert_eq!(
            approved.transitions,
            vec![Transition::Applied {
                from: ConversationState::ReviewingDraft,
                to: ConversationState::AwaitingNarrationChoice
            }]
        );
        assert_eq!(approved.current, ConversationState::AwaitingNarrationChoice);
        assert!(h.data().await.script.unwrap().ends_with("shorter please"));
        assert_eq!(h.studio.max_writers_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_conversations_run_concurrently_without_lost_updates() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        *h.studio.writer_delay.lock().unwrap() = Some(Duration::from_millis(100));
        let first = ConversationId::from(1i64);
        let second = ConversationId::from(2i64);

        let (a, b) = tokio::join!(
            h.orchestrator.handle_event(&first, pdf()),
            h.orchestrator.handle_event(&second, pdf()),
        );
        assert_eq!(a.current, ConversationState::ReviewingDraft);
        assert_eq!(b.current, ConversationState::ReviewingDraft);
        // Both drafts were being written at the same time
        assert_eq!(h.studio.max_writers_running.load(Ordering::SeqCst), 2);

        for id in [&first, &second] {
            let record = h.orchestrator.store().get(id).await;
            assert_eq!(record.state, ConversationState::ReviewingDraft);
            assert_eq!(
                record.data.artifact_names(),
                vec!["extracted_document", "academic_report", "social_report", "knowledge_base", "script"]
            );
        }

        let reloaded = JsonFileBackend::new(h.state_file.clone()).load().await.unwrap();
        assert_eq!(reloaded.len(), 2);
        for id in [&first, &second] {
            let record = &reloaded[id];
            assert_eq!(record.state, ConversationState::ReviewingDraft);
            assert_eq!(record.data.script.as_deref(), Some(DRAFT));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatcher_keeps_submission_order() {
        let h = harness(RetentionPolicy::ClearOnReset).await;
        let dispatcher = EventDispatcher::new(h.orchestrator.clone());
        *h.studio.writer_delay.lock().unwrap() = Some(Duration::from_millis(50));

        dispatcher.submit(h.id.clone(), pdf()).await;
        dispatcher
            .submit(h.id.clone(), InboundEvent::Action(UserAction::ApproveScript))
            .await;
        dispatcher
            .submit(h.id.clone(), InboundEvent::Action(UserAction::NarrateAi))
            .await;

        let drained = async {
            while dispatcher.busy().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), drained).await.unwrap();

        // No event was ignored for arriving before its predecessor finished
        assert_eq!(h.orchestrator.store().state(&h.id).await, ConversationState::AwaitingInput);
        assert!(h.data().await.final_composition.is_some());
        assert_eq!(h.studio.rendered.lock().unwrap().len(), 1);
        assert_eq!(h.studio.messages(ProgressKind::Delivered).len(), 1);

        // A later event starts a fresh queue
        dispatcher.submit(h.id.clone(), InboundEvent::Reset).await;
        let drained = async {
            while dispatcher.busy().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), drained).await.unwrap();
        assert!(h.studio.messages(ProgressKind::Prompt).iter().any(|m| m.contains("Starting over")));
    }

    #[test]
    fn test_pdf_detection() {
        assert!(is_pdf("paper.pdf", Some("application/pdf")));
        assert!(is_pdf("PAPER.PDF", None));
        assert!(is_pdf("paper.pdf", Some("application/octet-stream")));
        assert!(!is_pdf("paper.pdf", Some("image/png")));
        assert!(!is_pdf("notes.txt", None));
    }
}
