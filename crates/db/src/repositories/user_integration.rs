use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::Row;

use majordome_core::{RefreshErrorEntry, TokenSet, UserIntegration, REFRESH_ERROR_TRAIL_LIMIT};

use crate::repositories::{RepositoryError, UserIntegrationRepository};
use crate::DbPool;

#[derive(Clone)]
pub struct SqlUserIntegrationRepository {
    pool: DbPool,
}

impl SqlUserIntegrationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_json_map(raw: &str, column: &str) -> Result<Map<String, Value>, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("bad {column} payload: {error}")))
}

fn parse_trail(raw: &str) -> Result<Vec<RefreshErrorEntry>, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("bad refresh_errors payload: {error}")))
}

fn parse_optional_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|error| RepositoryError::Decode(format!("bad timestamp `{value}`: {error}")))
    })
    .transpose()
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<UserIntegration, RepositoryError> {
    let config_raw: String = row.try_get("config")?;
    let scratch_raw: String = row.try_get("scratch")?;
    let trail_raw: String = row.try_get("refresh_errors")?;
    let updated_at_raw: String = row.try_get("updated_at")?;

    Ok(UserIntegration {
        user_id: row.try_get("user_id")?,
        service: row.try_get("service")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        config: parse_json_map(&config_raw, "config")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        token_expires_at: parse_optional_timestamp(row.try_get("token_expires_at")?)?,
        needs_reauthorize: row.try_get::<i64, _>("needs_reauthorize")? != 0,
        refresh_errors: parse_trail(&trail_raw)?,
        scratch: parse_json_map(&scratch_raw, "scratch")?,
        updated_at: parse_optional_timestamp(Some(updated_at_raw))?
            .unwrap_or_else(Utc::now),
    })
}

const SELECT_COLUMNS: &str = "user_id, service, enabled, config, access_token, refresh_token,\n     token_expires_at, needs_reauthorize, refresh_errors, scratch, updated_at";

#[async_trait]
impl UserIntegrationRepository for SqlUserIntegrationRepository {
    async fn find(
        &self,
        user_id: &str,
        service: &str,
    ) -> Result<Option<UserIntegration>, RepositoryError> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM user_integrations WHERE user_id = ? AND service = ?"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(service)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_enabled(&self) -> Result<Vec<UserIntegration>, RepositoryError> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM user_integrations WHERE enabled = 1\n             ORDER BY user_id, service"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn list_enabled_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserIntegration>, RepositoryError> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM user_integrations\n             WHERE user_id = ? AND enabled = 1 ORDER BY service"
        );
        let rows = sqlx::query(&query).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn upsert(&self, record: &UserIntegration) -> Result<(), RepositoryError> {
        let config = serde_json::to_string(&record.config)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let scratch = serde_json::to_string(&record.scratch)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let trail = serde_json::to_string(&record.refresh_errors)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO user_integrations (\n                user_id, service, enabled, config, access_token, refresh_token,\n                token_expires_at, needs_reauthorize, refresh_errors, scratch, updated_at\n             )\n             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)\n             ON CONFLICT(user_id, service) DO UPDATE SET\n                enabled = excluded.enabled,\n                config = excluded.config,\n                access_token = excluded.access_token,\n                refresh_token = excluded.refresh_token,\n                token_expires_at = excluded.token_expires_at,\n                needs_reauthorize = excluded.needs_reauthorize,\n                refresh_errors = excluded.refresh_errors,\n                scratch = excluded.scratch,\n                updated_at = excluded.updated_at",
        )
        .bind(&record.user_id)
        .bind(&record.service)
        .bind(record.enabled as i64)
        .bind(config)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.token_expires_at.map(|ts| ts.to_rfc3339()))
        .bind(record.needs_reauthorize as i64)
        .bind(trail)
        .bind(scratch)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_tokens(
        &self,
        user_id: &str,
        service: &str,
        tokens: &TokenSet,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE user_integrations SET\n                access_token = ?,\n                refresh_token = COALESCE(?, refresh_token),\n                token_expires_at = ?,\n                needs_reauthorize = 0,\n                refresh_errors = '[]',\n                updated_at = ?\n             WHERE user_id = ? AND service = ?",
        )
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(tokens.expires_at.map(|ts| ts.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(user_id)
        .bind(service)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_refresh_failure(
        &self,
        user_id: &str,
        service: &str,
        message: &str,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        // Read-modify-write inside one transaction; callers serialize per
        // record, the transaction guards against partial writes.
        let mut tx = self.pool.begin().await?;
        let trail_raw: Option<String> = sqlx::query_scalar(
            "SELECT refresh_errors FROM user_integrations WHERE user_id = ? AND service = ?",
        )
        .bind(user_id)
        .bind(service)
        .fetch_optional(&mut *tx)
        .await?;

        let mut trail = match trail_raw {
            Some(raw) => parse_trail(&raw)?,
            None => return Ok(()),
        };
        trail.insert(0, RefreshErrorEntry { at: now, message: message.to_string() });
        trail.truncate(REFRESH_ERROR_TRAIL_LIMIT);
        let serialized = serde_json::to_string(&trail)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "UPDATE user_integrations SET\n                refresh_errors = ?,\n                needs_reauthorize = CASE WHEN ? THEN 1 ELSE needs_reauthorize END,\n                updated_at = ?\n             WHERE user_id = ? AND service = ?",
        )
        .bind(serialized)
        .bind(permanent)
        .bind(now.to_rfc3339())
        .bind(user_id)
        .bind(service)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_scratch(
        &self,
        user_id: &str,
        service: &str,
        scratch: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let serialized = serde_json::to_string(scratch)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        sqlx::query(
            "UPDATE user_integrations SET scratch = ?, updated_at = ?\n             WHERE user_id = ? AND service = ?",
        )
        .bind(serialized)
        .bind(now.to_rfc3339())
        .bind(user_id)
        .bind(service)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
