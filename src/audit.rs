use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::AuditLog,
    policy::{Action, Actor},
    state::AppState,
};

pub const AUDIT_PAGE: usize = 100;

/// Appends an audit entry. The workflow that triggered it has already
/// committed, so a failed append is logged and swallowed.
pub async fn record(
    state: &AppState,
    actor: &Actor,
    action: &str,
    target_user: Option<Uuid>,
    target_cohort: Option<Uuid>,
    details: Value,
) {
    let entry = AuditLog {
        id: Uuid::new_v4(),
        actor: actor.id,
        action: action.to_string(),
        target_user,
        target_cohort,
        details,
        timestamp: Utc::now(),
    };
    if let Err(e) = state.store.append_audit(&entry).await {
        tracing::error!(error = %e, action, actor = %actor.id, "failed to append audit log");
    }
}

pub async fn recent(state: &AppState, actor: &Actor) -> Result<Vec<AuditLog>, AppError> {
    actor.require(Action::ViewAuditLog)?;
    Ok(state.store.recent_audit(AUDIT_PAGE).await?)
}
