use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Catalog entry for a supported external service. Seeded at startup and
/// immutable at runtime; the canonical name is lowercase and unique.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub name: String,
    pub capabilities: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Token trio returned by a successful refresh. Services that do not rotate
/// refresh tokens leave `refresh_token` empty and the previous one is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Most-recent-first refresh failure trail entry. The trail is bounded at
/// [`REFRESH_ERROR_TRAIL_LIMIT`] entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshErrorEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

pub const REFRESH_ERROR_TRAIL_LIMIT: usize = 5;

/// A user's live link to one integration: opaque config, OAuth state, and
/// per-service scratch data (e.g. the active board id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIntegration {
    pub user_id: String,
    pub service: String,
    pub enabled: bool,
    pub config: Map<String, Value>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub needs_reauthorize: bool,
    pub refresh_errors: Vec<RefreshErrorEntry>,
    pub scratch: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl UserIntegration {
    pub fn new(user_id: impl Into<String>, service: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            service: service.into(),
            enabled: false,
            config: Map::new(),
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            needs_reauthorize: false,
            refresh_errors: Vec::new(),
            scratch: Map::new(),
            updated_at: now,
        }
    }

    /// A record is refreshable only when a refresh token is stored; client
    /// id and secret come from the process configuration.
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|token| !token.is_empty())
    }

    /// True when the access token is missing, already expired, or expires
    /// within `margin` of `now`.
    pub fn token_expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        match self.token_expires_at {
            None => true,
            Some(expires_at) => expires_at <= now + margin,
        }
    }

    /// Apply a successful refresh: rotate tokens, clear the error trail and
    /// the reauthorization flag.
    pub fn apply_token_set(&mut self, tokens: &TokenSet, now: DateTime<Utc>) {
        self.access_token = Some(tokens.access_token.clone());
        if let Some(rotated) = &tokens.refresh_token {
            self.refresh_token = Some(rotated.clone());
        }
        self.token_expires_at = tokens.expires_at;
        self.needs_reauthorize = false;
        self.refresh_errors.clear();
        self.updated_at = now;
    }

    /// Record a refresh failure, keeping at most
    /// [`REFRESH_ERROR_TRAIL_LIMIT`] entries, most recent first. The stored
    /// tokens are left untouched.
    pub fn push_refresh_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.refresh_errors.insert(0, RefreshErrorEntry { at: now, message: message.into() });
        self.refresh_errors.truncate(REFRESH_ERROR_TRAIL_LIMIT);
        self.updated_at = now;
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn scratch_str(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{TokenSet, UserIntegration, REFRESH_ERROR_TRAIL_LIMIT};

    fn record() -> UserIntegration {
        let now = Utc.with_ymd_and_hms(2026, 8, 5, 12, 0, 0).unwrap();
        UserIntegration::new("u-1", "hubspot", now)
    }

    #[test]
    fn missing_expiry_counts_as_expiring() {
        let record = record();
        assert!(record.token_expires_within(Duration::minutes(5), Utc::now()));
    }

    #[test]
    fn expiry_margin_is_inclusive_of_the_window() {
        let mut record = record();
        let now = record.updated_at;
        record.token_expires_at = Some(now + Duration::minutes(4));
        assert!(record.token_expires_within(Duration::minutes(5), now));

        record.token_expires_at = Some(now + Duration::minutes(6));
        assert!(!record.token_expires_within(Duration::minutes(5), now));
    }

    #[test]
    fn successful_refresh_clears_trail_and_rotates() {
        let mut record = record();
        let now = record.updated_at;
        record.refresh_token = Some("old-refresh".into());
        record.push_refresh_error("temporary failure", now);
        record.needs_reauthorize = true;

        record.apply_token_set(
            &TokenSet {
                access_token: "new-access".into(),
                refresh_token: Some("new-refresh".into()),
                expires_at: Some(now + Duration::hours(1)),
            },
            now,
        );

        assert_eq!(record.access_token.as_deref(), Some("new-access"));
        assert_eq!(record.refresh_token.as_deref(), Some("new-refresh"));
        assert!(record.refresh_errors.is_empty());
        assert!(!record.needs_reauthorize);
    }

    #[test]
    fn refresh_without_rotation_keeps_previous_refresh_token() {
        let mut record = record();
        let now = record.updated_at;
        record.refresh_token = Some("stable-refresh".into());

        record.apply_token_set(
            &TokenSet { access_token: "new-access".into(), refresh_token: None, expires_at: None },
            now,
        );

        assert_eq!(record.refresh_token.as_deref(), Some("stable-refresh"));
    }

    #[test]
    fn error_trail_is_bounded_most_recent_first() {
        let mut record = record();
        let base = record.updated_at;
        for index in 0..8 {
            record.push_refresh_error(
                format!("failure {index}"),
                base + Duration::seconds(index),
            );
        }

        assert_eq!(record.refresh_errors.len(), REFRESH_ERROR_TRAIL_LIMIT);
        assert_eq!(record.refresh_errors[0].message, "failure 7");
        assert_eq!(record.refresh_errors[4].message, "failure 3");
    }
}
