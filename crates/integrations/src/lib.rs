//! Integration layer: the registry of service adapters, the OAuth credential
//! store, the background token refresher, and one adapter per external
//! service (HubSpot, Slack, Trello, Gmail, Drive, QuickBooks).
//!
//! Adapters are stateless between calls: every operation receives the access
//! token, the per-user config map, and the per-service scratch state, and
//! returns either an [`adapter::ActionOutcome`] or a classified
//! [`adapter::AdapterError`]. Nothing in this crate decides retries; the
//! orchestrator owns the retry loop and switches on the error kind.

pub mod adapter;
pub mod adapters;
pub mod classify;
pub mod credentials;
pub mod http;
pub mod oauth;
pub mod refresher;
pub mod registry;

pub use adapter::{ActionCall, ActionOutcome, AdapterError, JsonMap, RefreshGrant, ServiceAdapter};
pub use credentials::CredentialStore;
pub use refresher::{RefreshSweep, TokenRefresher};
pub use registry::{default_registry, IntegrationRegistry};
