//! Domain core for majordome, the conversational integration orchestrator.
//!
//! Everything here is deterministic and free of I/O: configuration loading,
//! the error taxonomy shared by adapters and the orchestrator, the retry
//! policy, the dialogue state machine that drives multi-turn slot filling,
//! natural-language due-date parsing, and the table-driven config schemas
//! each service adapter declares.

pub mod config;
pub mod dates;
pub mod dialogue;
pub mod domain;
pub mod errors;
pub mod retry;
pub mod schema;

pub use domain::conversation::{Conversation, ConversationId, Message, MessageId, MessageRole};
pub use domain::integration::{
    Integration, RefreshErrorEntry, TokenSet, UserIntegration, REFRESH_ERROR_TRAIL_LIMIT,
};
pub use domain::intent::{
    ActionDescriptor, Intent, IntegrationIntent, ServiceCandidate, SlotDescriptor, SlotValues,
};
pub use errors::ErrorKind;
pub use retry::{RetryDecision, RetryPolicy};
