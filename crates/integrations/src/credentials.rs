//! Credential store: issues valid access tokens on demand, refreshing at
//! most once per request, with all reads and writes serialized per
//! (user, service) record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::{info, warn};

use majordome_core::config::OAuthConfig;
use majordome_core::errors::ErrorKind;
use majordome_core::UserIntegration;
use majordome_db::repositories::UserIntegrationRepository;

use crate::adapter::{AdapterError, RefreshGrant};
use crate::registry::IntegrationRegistry;

/// Access tokens expiring within this margin are refreshed before use.
const EXPIRY_MARGIN_MINUTES: i64 = 5;
/// How long a reader waits on a record whose refresh is already in flight.
const LOCK_WAIT: StdDuration = StdDuration::from_secs(5);

pub struct CredentialStore {
    repo: Arc<dyn UserIntegrationRepository>,
    registry: Arc<IntegrationRegistry>,
    oauth: OAuthConfig,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    margin: Duration,
}

impl CredentialStore {
    pub fn new(
        repo: Arc<dyn UserIntegrationRepository>,
        registry: Arc<IntegrationRegistry>,
        oauth: OAuthConfig,
    ) -> Self {
        Self {
            repo,
            registry,
            oauth,
            locks: Mutex::new(HashMap::new()),
            margin: Duration::minutes(EXPIRY_MARGIN_MINUTES),
        }
    }

    pub fn client_configured(&self, service: &str) -> bool {
        self.oauth.client_for(service).is_some_and(|client| client.is_configured())
    }

    async fn record_lock(&self, user_id: &str, service: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((user_id.to_string(), service.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return a token valid for at least the safety margin, refreshing once
    /// synchronously when needed. Callers racing on the same record see a
    /// single refresh: the second caller re-reads the rotated token.
    pub async fn get_valid_token(
        &self,
        user_id: &str,
        service: &str,
    ) -> Result<String, AdapterError> {
        let lock = self.record_lock(user_id, service).await;
        let _guard = tokio::time::timeout(LOCK_WAIT, lock.lock()).await.map_err(|_| {
            AdapterError::reauthorize(format!(
                "l'accès à {service} est en cours de renouvellement, réessayez dans un instant"
            ))
        })?;

        let now = Utc::now();
        let record = self
            .repo
            .find(user_id, service)
            .await
            .map_err(|error| AdapterError::internal(error.to_string()))?
            .ok_or_else(|| {
                AdapterError::reauthorize(format!("l'intégration {service} n'est pas connectée"))
            })?;

        if record.needs_reauthorize {
            return Err(AdapterError::reauthorize(format!(
                "l'intégration {service} doit être reconnectée"
            )));
        }

        if let Some(token) = &record.access_token {
            if !record.token_expires_within(self.margin, now) {
                return Ok(token.clone());
            }
        }

        let tokens = self.attempt_refresh(&record, now).await?;
        Ok(tokens)
    }

    /// Unconditional refresh for one record, used by the background
    /// refresher. Takes the same per-record lock as `get_valid_token`.
    pub async fn refresh_now(&self, user_id: &str, service: &str) -> Result<(), AdapterError> {
        let lock = self.record_lock(user_id, service).await;
        let _guard = lock.lock().await;

        let record = self
            .repo
            .find(user_id, service)
            .await
            .map_err(|error| AdapterError::internal(error.to_string()))?
            .ok_or_else(|| {
                AdapterError::reauthorize(format!("l'intégration {service} n'est pas connectée"))
            })?;

        self.attempt_refresh(&record, Utc::now()).await.map(|_| ())
    }

    /// One refresh attempt with transactional persistence. The caller must
    /// hold the record lock.
    async fn attempt_refresh(
        &self,
        record: &UserIntegration,
        now: DateTime<Utc>,
    ) -> Result<String, AdapterError> {
        let service = record.service.as_str();
        let adapter = self.registry.lookup(service).ok_or_else(|| {
            AdapterError::internal(format!("aucun adaptateur enregistré pour {service}"))
        })?;

        let Some(refresh_token) = record.refresh_token.as_deref().filter(|t| !t.is_empty())
        else {
            return Err(AdapterError::reauthorize(format!(
                "l'intégration {service} doit être reconnectée"
            )));
        };

        let client = self
            .oauth
            .client_for(service)
            .filter(|client| client.is_configured())
            .ok_or_else(|| {
                AdapterError::reauthorize(format!(
                    "le client OAuth de {service} n'est pas configuré sur ce serveur"
                ))
            })?;
        let client_id = client.client_id.as_deref().unwrap_or_default();
        let client_secret = client
            .client_secret
            .as_ref()
            .map(|secret| secret.expose_secret().to_string())
            .unwrap_or_default();

        let grant =
            RefreshGrant { refresh_token, client_id, client_secret: client_secret.as_str() };

        match adapter.refresh(grant).await {
            Ok(tokens) => {
                self.repo
                    .store_tokens(&record.user_id, service, &tokens, now)
                    .await
                    .map_err(|error| AdapterError::internal(error.to_string()))?;
                info!(
                    event_name = "credentials.refresh_succeeded",
                    user_id = %record.user_id,
                    service,
                    "access token refreshed"
                );
                Ok(tokens.access_token)
            }
            Err(error) => {
                let permanent = error.kind == ErrorKind::Reauthorize;
                self.repo
                    .record_refresh_failure(
                        &record.user_id,
                        service,
                        &error.message,
                        permanent,
                        now,
                    )
                    .await
                    .map_err(|persist_error| {
                        AdapterError::internal(persist_error.to_string())
                    })?;
                warn!(
                    event_name = "credentials.refresh_failed",
                    user_id = %record.user_id,
                    service,
                    permanent,
                    error = %error,
                    "access token refresh failed"
                );
                if error.is_retryable() {
                    Err(error)
                } else {
                    Err(AdapterError::reauthorize(format!(
                        "l'accès à {service} a expiré et n'a pas pu être renouvelé"
                    )))
                }
            }
        }
    }
}
