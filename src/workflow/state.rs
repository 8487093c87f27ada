// Conversation state machine - legal states and the pure transition function
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a conversation currently stands in the pipeline.
///
/// Serialized by variant name; the persisted record set relies on these names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationState {
    #[default]
    AwaitingInput,
    ProcessingInput,
    ReviewingDraft,
    AwaitingNarrationChoice,
    AwaitingVoiceUpload,
    GeneratingOutput,
}

impl ConversationState {
    pub const ALL: [ConversationState; 6] = [
        ConversationState::AwaitingInput,
        ConversationState::ProcessingInput,
        ConversationState::ReviewingDraft,
        ConversationState::AwaitingNarrationChoice,
        ConversationState::AwaitingVoiceUpload,
        ConversationState::GeneratingOutput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::AwaitingInput => "AwaitingInput",
            ConversationState::ProcessingInput => "ProcessingInput",
            ConversationState::ReviewingDraft => "ReviewingDraft",
            ConversationState::AwaitingNarrationChoice => "AwaitingNarrationChoice",
            ConversationState::AwaitingVoiceUpload => "AwaitingVoiceUpload",
            ConversationState::GeneratingOutput => "GeneratingOutput",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that can move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEvent {
    /// A valid document arrived (restarts the document path from any state)
    DocumentReceived,
    /// Every analysis stage and the first draft succeeded
    AnalysisSucceeded,
    /// A stage of the processing phase failed
    StageFailed,
    /// The user approved the current draft
    DraftApproved,
    /// Revision feedback replaced the draft
    DraftRevised,
    /// Automated narration was chosen and synthesized
    AutomatedNarrationReady,
    /// The user will record the narration
    ManualNarrationChosen,
    /// A narration recording was uploaded
    AudioReceived,
    /// Composition finished, successfully or not
    GenerationFinished,
    /// Start over
    Reset,
}

/// Result of feeding an event to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Transition {
    Applied {
        from: ConversationState,
        to: ConversationState,
    },
    /// Event is not valid in this state; nothing changes
    Ignored {
        state: ConversationState,
        event: StateEvent,
    },
}

impl Transition {
    /// State the conversation is in after this transition
    pub fn resulting_state(&self) -> ConversationState {
        match self {
            Transition::Applied { to, .. } => *to,
            Transition::Ignored { state, .. } => *state,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Transition::Ignored { .. })
    }
}

/// Pure transition function. Deterministic and independent of any data-bag contents.
pub fn transition(state: ConversationState, event: StateEvent) -> Transition {
    use ConversationState::*;
    use StateEvent::*;

    let next = match (state, event) {
        (_, Reset) => Some(AwaitingInput),
        (_, DocumentReceived) => Some(ProcessingInput),
        (ProcessingInput, AnalysisSucceeded) => Some(ReviewingDraft),
        (ProcessingInput, StageFailed) => Some(AwaitingInput),
        (ReviewingDraft, DraftApproved) => Some(AwaitingNarrationChoice),
        (ReviewingDraft, DraftRevised) => Some(ReviewingDraft),
        (AwaitingNarrationChoice, AutomatedNarrationReady) => Some(GeneratingOutput),
        (AwaitingNarrationChoice, ManualNarrationChosen) => Some(AwaitingVoiceUpload),
        (AwaitingVoiceUpload, AudioReceived) => Some(GeneratingOutput),
        (GeneratingOutput, GenerationFinished) => Some(AwaitingInput),
        _ => None,
    };

    match next {
        Some(to) => Transition::Applied { from: state, to },
        None => Transition::Ignored { state, event },
    }
}
