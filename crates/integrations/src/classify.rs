//! Normalisation of transport and remote-API failures into the common
//! error taxonomy.

use majordome_core::errors::ErrorKind;
use reqwest::StatusCode;

use crate::adapter::AdapterError;

/// Map an HTTP status to a taxonomy kind. 429 and every 5xx are transient;
/// 4xx splits between auth, permission, lookup, and schema problems.
pub fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        401 => ErrorKind::Reauthorize,
        403 => ErrorKind::Permission,
        404 => ErrorKind::NotFound,
        400 | 409 | 422 => ErrorKind::Schema,
        408 | 429 => ErrorKind::Transport,
        code if code >= 500 => ErrorKind::Transport,
        _ => ErrorKind::Internal,
    }
}

/// Classify a reqwest failure: timeouts and connection problems are
/// transient transport errors, anything else is internal.
pub fn classify_transport(service: &str, error: &reqwest::Error) -> AdapterError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        AdapterError::transport(format!("le service {service} ne répond pas ({error})"))
    } else {
        AdapterError::internal(format!("échec inattendu côté {service} : {error}"))
    }
}

/// Token-endpoint error codes that mean the stored refresh token is dead and
/// the user must re-consent; the refresher stops retrying these.
pub fn is_permanent_refresh_failure(error_code: &str) -> bool {
    let normalized = error_code.trim().to_ascii_lowercase();
    normalized.contains("invalid_grant")
        || normalized.contains("unauthorized_client")
        || normalized.contains("bad refresh token")
}

/// Turn a non-success response into a classified error, keeping the remote
/// body as detail.
pub async fn error_from_response(service: &str, response: reqwest::Response) -> AdapterError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = body.trim();
    let kind = kind_for_status(status);
    let message = match kind {
        ErrorKind::Reauthorize => {
            format!("l'accès à {service} a expiré ({status})")
        }
        ErrorKind::Permission => {
            format!("{service} a refusé l'opération ({status}) : {detail}")
        }
        ErrorKind::NotFound => {
            format!("{service} ne connaît pas la ressource demandée ({status})")
        }
        ErrorKind::Transport => {
            format!("{service} est temporairement indisponible ({status})")
        }
        _ => format!("{service} a rejeté la requête ({status}) : {detail}"),
    };
    AdapterError::new(kind, message)
}
