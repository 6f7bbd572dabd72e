use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common taxonomy for every failure surfaced by adapters, transport, or the
/// orchestrator itself. Adapters classify at the boundary; the retry engine
/// and the reply renderer switch on the kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User input failed slot validation; recovered by re-prompting.
    Validation,
    /// Multiple plausible services; recovered by asking the user to choose.
    Ambiguity,
    /// Network, timeout, 5xx, rate-limit; recovered by the retry engine.
    Transport,
    /// Token expired and refresh failed, or scopes missing. Never retried.
    Reauthorize,
    /// Authenticated but forbidden (e.g. bot not in channel).
    Permission,
    /// Referenced remote entity does not exist.
    NotFound,
    /// Adapter-level precondition violated (missing config/parameter).
    Schema,
    /// Bug or unexpected condition; full detail goes to the log only.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Ambiguity => "ambiguity",
            Self::Transport => "transport",
            Self::Reauthorize => "reauthorize",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::Schema => "schema",
            Self::Internal => "internal",
        }
    }

    /// Only transient transport failures are eligible for automatic retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transport)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that has already been classified into the taxonomy, carrying the
/// message shown to the user (adapters phrase it in the user's language).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassifiedError, ErrorKind};

    #[test]
    fn only_transport_is_retryable() {
        let retryable: Vec<ErrorKind> = [
            ErrorKind::Validation,
            ErrorKind::Ambiguity,
            ErrorKind::Transport,
            ErrorKind::Reauthorize,
            ErrorKind::Permission,
            ErrorKind::NotFound,
            ErrorKind::Schema,
            ErrorKind::Internal,
        ]
        .into_iter()
        .filter(|kind| kind.is_retryable())
        .collect();

        assert_eq!(retryable, vec![ErrorKind::Transport]);
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotFound).expect("serialize");
        assert_eq!(json, "\"not_found\"");
    }

    #[test]
    fn classified_error_displays_kind_and_message() {
        let error = ClassifiedError::new(ErrorKind::Permission, "canal interdit");
        assert_eq!(error.to_string(), "permission: canal interdit");
    }
}
