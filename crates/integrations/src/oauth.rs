//! Shared `grant_type=refresh_token` exchange used by every OAuth2 adapter.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use majordome_core::TokenSet;

use crate::adapter::{AdapterError, RefreshGrant};
use crate::classify::{classify_transport, is_permanent_refresh_failure, kind_for_status};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// POST the refresh grant to `token_url` and decode the rotated trio.
///
/// A body naming `invalid_grant` or `unauthorized_client` is a permanent
/// auth failure and classifies as reauthorize regardless of status code.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    service: &str,
    token_url: &str,
    grant: RefreshGrant<'_>,
    now: DateTime<Utc>,
) -> Result<TokenSet, AdapterError> {
    let response = client
        .post(token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", grant.refresh_token),
            ("client_id", grant.client_id),
            ("client_secret", grant.client_secret),
        ])
        .send()
        .await
        .map_err(|error| classify_transport(service, &error))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if is_permanent_refresh_failure(&body) {
            return Err(AdapterError::reauthorize(format!(
                "le jeton de renouvellement {service} n'est plus valide"
            )));
        }
        return Err(AdapterError::new(
            kind_for_status(status),
            format!("le point de jeton {service} a répondu {status}"),
        ));
    }

    let token: TokenResponse = response.json().await.map_err(|error| {
        AdapterError::internal(format!("réponse de jeton {service} illisible : {error}"))
    })?;
    token_set_from_parts(service, token.access_token, token.refresh_token, token.expires_in, now)
}

/// Assemble and sanity-check a token trio decoded from any token endpoint.
pub fn token_set_from_parts(
    service: &str,
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    now: DateTime<Utc>,
) -> Result<TokenSet, AdapterError> {
    if access_token.is_empty() {
        return Err(AdapterError::internal(format!(
            "le point de jeton {service} a renvoyé un jeton vide"
        )));
    }
    Ok(TokenSet {
        access_token,
        refresh_token: refresh_token.filter(|token| !token.is_empty()),
        expires_at: expires_in.map(|seconds| now + Duration::seconds(seconds)),
    })
}
