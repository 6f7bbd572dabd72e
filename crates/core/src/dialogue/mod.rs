pub mod engine;
pub mod states;

pub use engine::{transition, DialogueTransitionError};
pub use states::{
    is_cancellation, Dialogue, DialogueAction, DialogueContext, DialogueEvent, DialogueState,
    TransitionOutcome,
};
