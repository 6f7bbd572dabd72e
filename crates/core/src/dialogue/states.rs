use serde::{Deserialize, Serialize};

use crate::domain::intent::SlotValues;

/// Utterances that abort the running dialogue wherever it stands.
const CANCELLATION_TOKENS: &[&str] = &["annule", "cancel", "stop"];

pub fn is_cancellation(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    CANCELLATION_TOKENS.contains(&normalized.as_str())
}

/// Dialogue states. `Collecting` names the slot currently being asked for;
/// `Done` auto-returns to `Idle` on the next utterance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DialogueState {
    Idle,
    Collecting { slot: String },
    Confirming,
    Committing,
    Done,
}

impl DialogueState {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Done)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueEvent {
    /// An action was selected for this dialogue (fresh start or re-entry).
    ActionSelected,
    /// The user supplied a value that passed the slot's validator.
    SlotFilled { slot: String },
    /// The user's value failed the slot's validator.
    SlotRejected { slot: String },
    Confirmed,
    ConfirmationDeclined,
    CommitSucceeded,
    CommitFailedTransient,
    CommitFailedFatal,
    Cancelled,
}

/// What the transition needs to know about the action being driven: which
/// required slots are still empty and whether a confirmation turn is due.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueContext {
    pub missing_required_slots: Vec<String>,
    pub requires_confirmation: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueAction {
    PromptSlot { slot: String },
    RepromptSlot { slot: String },
    PromptConfirmation,
    InvokeAdapter,
    ScheduleRetry,
    RenderSuccess,
    RenderFailure,
    ClearSlots,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialogueState,
    pub to: DialogueState,
    pub event: DialogueEvent,
    pub actions: Vec<DialogueAction>,
}

/// A running dialogue scoped to one (user, service) pair: the target action,
/// the partial slot map, and the current state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialogue {
    pub service: String,
    pub action: String,
    pub slots: SlotValues,
    pub state: DialogueState,
    pub commit_attempts: u32,
}

impl Dialogue {
    pub fn new(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            slots: SlotValues::new(),
            state: DialogueState::Idle,
            commit_attempts: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = DialogueState::Idle;
        self.slots.clear();
        self.commit_attempts = 0;
    }
}
