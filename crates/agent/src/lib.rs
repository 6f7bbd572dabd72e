//! Agent runtime - the conversational brain of majordome.
//!
//! This crate turns an unstructured user utterance into a concrete action on
//! an external service and drives the multi-turn dialogue when information
//! is missing:
//! 1. **Intent classification** (`classifier`) - rule stage over per-service
//!    keyword tables, then an LLM JSON fallback filtered against the user's
//!    enabled services.
//! 2. **Dialogue driving** (`orchestrator`) - slot filling through the pure
//!    state machine in `majordome-core::dialogue`.
//! 3. **Execution** - adapter calls through the credential store, with the
//!    retry engine deciding what is worth re-attempting.
//! 4. **Reply rendering** (`replies`) - one French sentence per outcome.
//!
//! # Safety principle
//!
//! The LLM is strictly a translator. It never selects a service the user has
//! not enabled, and it never invents parameters that skip slot validation.

pub mod classifier;
pub mod llm;
pub mod orchestrator;
pub mod replies;
pub mod session;
pub mod smalltalk;

pub use classifier::IntentClassifier;
pub use llm::{HttpLlmClient, LlmClient, LlmError};
pub use orchestrator::{ChatReply, ChatRequest, Orchestrator, OrchestratorError};
pub use session::{InMemorySessionCache, Session, SessionCache, SessionStore};
