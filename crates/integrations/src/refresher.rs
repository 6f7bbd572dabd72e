//! Background token refresher: a scheduled loop that proactively refreshes
//! credentials approaching expiry, so interactive requests rarely pay the
//! refresh latency.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use majordome_core::config::RefresherConfig;
use majordome_db::repositories::UserIntegrationRepository;

use crate::credentials::CredentialStore;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshSweep {
    pub scanned: usize,
    pub attempted: usize,
    pub refreshed: usize,
    pub transient_failures: usize,
    pub marked_reauthorize: usize,
    pub skipped: usize,
}

pub struct TokenRefresher {
    repo: Arc<dyn UserIntegrationRepository>,
    credentials: Arc<CredentialStore>,
    interval: StdDuration,
    expiry_window: Duration,
}

impl TokenRefresher {
    pub fn new(
        repo: Arc<dyn UserIntegrationRepository>,
        credentials: Arc<CredentialStore>,
        config: &RefresherConfig,
    ) -> Self {
        Self {
            repo,
            credentials,
            interval: StdDuration::from_secs(config.interval_secs.max(1)),
            expiry_window: Duration::seconds(config.expiry_window_secs.max(1) as i64),
        }
    }

    /// One sweep over every enabled record. Eligible records have a missing,
    /// past, or soon-expiring token; force mode refreshes all refreshable
    /// records unconditionally. Records already flagged for reauthorization
    /// are never retried outside force mode.
    pub async fn run_once(&self, force: bool) -> RefreshSweep {
        let mut sweep = RefreshSweep::default();
        let now = Utc::now();

        let records = match self.repo.list_enabled().await {
            Ok(records) => records,
            Err(error) => {
                warn!(
                    event_name = "refresher.scan_failed",
                    error = %error,
                    "could not list enabled integrations"
                );
                return sweep;
            }
        };
        sweep.scanned = records.len();

        for record in records {
            let eligible = force || record.token_expires_within(self.expiry_window, now);
            let retriable = force || !record.needs_reauthorize;
            if !eligible
                || !retriable
                || !record.is_refreshable()
                || !self.credentials.client_configured(&record.service)
            {
                sweep.skipped += 1;
                continue;
            }

            sweep.attempted += 1;
            match self.credentials.refresh_now(&record.user_id, &record.service).await {
                Ok(()) => sweep.refreshed += 1,
                Err(error) if error.kind == majordome_core::ErrorKind::Reauthorize => {
                    sweep.marked_reauthorize += 1;
                }
                Err(_) => sweep.transient_failures += 1,
            }
        }

        info!(
            event_name = "refresher.sweep_completed",
            scanned = sweep.scanned,
            attempted = sweep.attempted,
            refreshed = sweep.refreshed,
            transient_failures = sweep.transient_failures,
            marked_reauthorize = sweep.marked_reauthorize,
            skipped = sweep.skipped,
            force,
            "token refresh sweep completed"
        );
        sweep
    }

    /// Run sweeps on the configured interval until the shutdown signal
    /// flips. The first tick fires immediately so a restart repairs stale
    /// tokens without waiting a full interval.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once(false).await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!(event_name = "refresher.stopped", "token refresher stopping");
                        return;
                    }
                }
            }
        }
    }
}
