use crate::db::queries;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Accepted,
    Duplicate,
}

/// First writer wins. Every side effect of an external event must run after
/// an `Accepted` here; a `Duplicate` means another delivery (possibly a
/// concurrent one) owns the event and the caller must stop.
pub fn record_once(state: &AppState, tx_ref: &str, event_type: &str) -> Result<LedgerOutcome, AppError> {
    let inserted = {
        let db = state.conn()?;
        queries::try_record_webhook(&db, tx_ref, event_type)?
    };

    if inserted {
        Ok(LedgerOutcome::Accepted)
    } else {
        tracing::info!(tx_ref = %tx_ref, event_type = %event_type, "duplicate delivery, already processed");
        Ok(LedgerOutcome::Duplicate)
    }
}

/// Gives back a claim whose side effect never happened, so a later attempt
/// can take it.
pub fn release(state: &AppState, tx_ref: &str) -> Result<(), AppError> {
    let db = state.conn()?;
    queries::release_webhook(&db, tx_ref)?;
    tracing::info!(tx_ref = %tx_ref, "ledger claim released");
    Ok(())
}
