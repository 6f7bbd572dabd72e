use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use majordome_core::errors::ErrorKind;
use majordome_core::schema::ConfigSchema;
use majordome_core::{ActionDescriptor, SlotValues, TokenSet};

pub type JsonMap = serde_json::Map<String, Value>;

/// A failure classified at the adapter boundary. The message is phrased for
/// the user (French); transport details stay in the log.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn reauthorize(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reauthorize, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Inputs for one refresh attempt against a service's token endpoint.
#[derive(Clone, Copy, Debug)]
pub struct RefreshGrant<'a> {
    pub refresh_token: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

/// One adapter invocation: the action name, the collected slot values, the
/// valid access token, and the user's config and scratch maps.
#[derive(Clone, Copy, Debug)]
pub struct ActionCall<'a> {
    pub action: &'a str,
    pub params: &'a SlotValues,
    pub token: &'a str,
    pub config: &'a JsonMap,
    pub scratch: &'a JsonMap,
}

/// Result of a committed action: the confirmation sentence shown to the user
/// and the raw payload kept for the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    pub reply: String,
    pub data: Value,
}

impl ActionOutcome {
    pub fn new(reply: impl Into<String>, data: Value) -> Self {
        Self { reply: reply.into(), data }
    }
}

/// Common capability surface every service adapter implements. Adapters are
/// stateless between calls and never retry on their own.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> &ConfigSchema;
    fn actions(&self) -> &'static [ActionDescriptor];

    /// Structural check of a user config against the declared schema.
    fn validate_config(&self, config: &JsonMap) -> Result<(), AdapterError> {
        self.schema().validate(config).map_err(|violation| {
            AdapterError::schema(format!(
                "configuration incomplète pour {} : {}",
                self.name(),
                violation.missing.join(", ")
            ))
        })
    }

    fn action(&self, name: &str) -> Option<&'static ActionDescriptor> {
        self.actions().iter().find(|action| action.name == name)
    }

    async fn refresh(&self, grant: RefreshGrant<'_>) -> Result<TokenSet, AdapterError>;
    async fn verify(&self, token: &str) -> Result<(), AdapterError>;
    async fn execute(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError>;
}

/// Fetch a required slot value, failing with the schema kind so the
/// orchestrator can name the missing fields.
pub fn require_slot<'a>(params: &'a SlotValues, name: &str) -> Result<&'a str, AdapterError> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AdapterError::schema(format!("paramètre requis manquant : {name}")))
}

pub fn optional_slot<'a>(params: &'a SlotValues, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str).filter(|value| !value.trim().is_empty())
}
