use crate::db::queries;
use crate::models::AlertKind;
use crate::state::AppState;

/// Durable operator alert. Persisted so it survives the request that raised
/// it; logged at error level so it also reaches whatever tails the logs.
pub fn raise(state: &AppState, kind: AlertKind, subject: &str, message: &str) {
    tracing::error!(kind = kind.as_str(), subject = %subject, "operator alert: {message}");

    let result = state
        .conn()
        .map_err(anyhow::Error::from)
        .and_then(|db| queries::insert_alert(&db, kind.as_str(), subject, message));

    if let Err(e) = result {
        tracing::error!(error = %e, kind = kind.as_str(), subject = %subject, "failed to persist operator alert");
    }
}
