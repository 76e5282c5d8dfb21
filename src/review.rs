//! Drop recommendations, appeals and grace periods.
//!
//! A recommendation moves `pending -> approved | rejected | appealed`, and
//! `approved -> appealed`. Filing an appeal performs that last transition
//! itself. Every move is a compare-and-set on the current status, so two
//! reviewers racing on the same record get one success and one Conflict.
//!
//! Side effects on the learner run before the status flip and are
//! idempotent. A review that fails half way leaves the record open, and
//! repeating the call finishes the job.

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit,
    catalog::load_cohort,
    error::AppError,
    models::*,
    policy::{Action, Actor},
    state::AppState,
};

fn clean_notes(notes: Option<String>) -> Option<String> {
    notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

/// Only `approved` and `rejected` are decisions.
fn decision(status: RequestStatus) -> Result<RequestStatus, AppError> {
    match status {
        RequestStatus::Pending => Err(AppError::validation("status must be approved or rejected")),
        decided => Ok(decided),
    }
}

async fn taught_cohorts(state: &AppState, actor: &Actor) -> Result<Vec<Uuid>, AppError> {
    Ok(state
        .store
        .list_cohorts()
        .await?
        .into_iter()
        .filter(|c| c.has_instructor(actor.id))
        .map(|c| c.id)
        .collect())
}

/// Marks the learner dropped from `cohort_id`. Every step is idempotent.
async fn enforce_drop(state: &AppState, learner_id: Uuid, cohort_id: Uuid) -> Result<(), AppError> {
    state.store.set_user_status(learner_id, UserStatus::Dropped).await?;
    for row in state.store.list_progress_for_learner(learner_id).await? {
        if row.cohort_id == cohort_id && row.status != ProgressStatus::Dropped {
            state.store.set_progress_status(row.id, ProgressStatus::Dropped).await?;
        }
    }
    if let Some(user) = state.store.get_user(learner_id).await? {
        if user.active_cohort_id == Some(cohort_id) {
            state.store.set_active_cohort(learner_id, None).await?;
        }
    }
    Ok(())
}

/// Restores the learner to `cohort_id`. Live rows in other cohorts are
/// dropped, the same as a join, so only one cohort stays active.
async fn reinstate(state: &AppState, learner_id: Uuid, cohort_id: Uuid) -> Result<(), AppError> {
    state.store.set_user_status(learner_id, UserStatus::Active).await?;
    for row in state.store.list_progress_for_learner(learner_id).await? {
        if row.cohort_id == cohort_id {
            if row.status != ProgressStatus::OnTrack {
                state.store.set_progress_status(row.id, ProgressStatus::OnTrack).await?;
            }
        } else if row.status.is_active() {
            state.store.set_progress_status(row.id, ProgressStatus::Dropped).await?;
        }
    }
    state.store.add_cohort_learner(cohort_id, learner_id).await?;
    state.store.set_active_cohort(learner_id, Some(cohort_id)).await?;
    Ok(())
}

pub async fn recommend_drop(
    state: &AppState,
    actor: &Actor,
    req: CreateDropReq,
) -> Result<DropRecommendation, AppError> {
    actor.require(Action::RecommendDrop)?;
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(AppError::validation("a reason is required"));
    }
    let cohort = load_cohort(state, req.cohort_id).await?;
    actor.require_cohort_scope(&cohort)?;

    let rows = state.store.list_progress_for_learner(req.learner_id).await?;
    if !rows.iter().any(|p| p.cohort_id == cohort.id) {
        return Err(AppError::NotFound("learner in cohort"));
    }

    let rec = DropRecommendation {
        id: Uuid::new_v4(),
        learner_id: req.learner_id,
        cohort_id: cohort.id,
        instructor_id: actor.id,
        reason: reason.to_string(),
        evidence: clean_notes(req.evidence),
        status: DropStatus::Pending,
        reviewed_by: None,
        reviewed_at: None,
        review_notes: None,
        created_at: Utc::now(),
    };
    state.store.insert_drop_recommendation(&rec).await?;
    audit::record(
        state,
        actor,
        "drop.recommend",
        Some(rec.learner_id),
        Some(rec.cohort_id),
        json!({ "recommendation": rec.id }),
    )
    .await;
    Ok(rec)
}

pub async fn review_drop(
    state: &AppState,
    actor: &Actor,
    id: Uuid,
    req: ReviewReq,
) -> Result<DropRecommendation, AppError> {
    actor.require(Action::ReviewDrops)?;
    let status = match decision(req.status)? {
        RequestStatus::Approved => DropStatus::Approved,
        _ => DropStatus::Rejected,
    };
    let rec = state
        .store
        .get_drop_recommendation(id)
        .await?
        .ok_or(AppError::NotFound("drop recommendation"))?;

    let _guard = state.locks.acquire(rec.learner_id).await;
    let rec = state
        .store
        .get_drop_recommendation(id)
        .await?
        .ok_or(AppError::NotFound("drop recommendation"))?;
    if rec.status != DropStatus::Pending {
        return Err(AppError::conflict("drop recommendation already reviewed"));
    }

    if status == DropStatus::Approved {
        enforce_drop(state, rec.learner_id, rec.cohort_id).await.map_err(|e| {
            tracing::error!(
                recommendation = %rec.id, learner = %rec.learner_id, error = %e,
                "drop partially applied; recommendation left pending for retry"
            );
            e
        })?;
    }

    let review = Review {
        status,
        reviewed_by: actor.id,
        reviewed_at: Utc::now(),
        notes: clean_notes(req.review_notes),
    };
    if !state
        .store
        .transition_drop_recommendation(id, &[DropStatus::Pending], &review)
        .await?
    {
        return Err(AppError::conflict("drop recommendation already reviewed"));
    }
    if status == DropStatus::Approved {
        tracing::info!(learner = %rec.learner_id, cohort = %rec.cohort_id, "learner dropped");
    }

    audit::record(
        state,
        actor,
        &format!("drop.{}", status),
        Some(rec.learner_id),
        Some(rec.cohort_id),
        json!({ "recommendation": rec.id }),
    )
    .await;
    Ok(DropRecommendation {
        status: review.status,
        reviewed_by: Some(review.reviewed_by),
        reviewed_at: Some(review.reviewed_at),
        review_notes: review.notes,
        ..rec
    })
}

pub async fn file_appeal(state: &AppState, actor: &Actor, req: CreateAppealReq) -> Result<Appeal, AppError> {
    actor.require(Action::FileAppeal)?;
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(AppError::validation("a reason is required"));
    }
    let rec = state
        .store
        .get_drop_recommendation(req.drop_recommendation_id)
        .await?
        .ok_or(AppError::NotFound("drop recommendation"))?;
    if rec.learner_id != actor.id {
        return Err(AppError::Forbidden);
    }

    let _guard = state.locks.acquire(actor.id).await;
    let rec = state
        .store
        .get_drop_recommendation(rec.id)
        .await?
        .ok_or(AppError::NotFound("drop recommendation"))?;
    let appealable = [DropStatus::Pending, DropStatus::Approved];
    if !appealable.contains(&rec.status) {
        return Err(AppError::conflict("drop recommendation can no longer be appealed"));
    }

    // an earlier attempt may have stored the appeal and failed on the mark
    let earlier = state
        .store
        .list_appeals(Some(actor.id))
        .await?
        .into_iter()
        .find(|a| a.drop_recommendation_id == rec.id && a.status == RequestStatus::Pending);
    let appeal = match earlier {
        Some(appeal) => appeal,
        None => {
            let appeal = Appeal {
                id: Uuid::new_v4(),
                learner_id: actor.id,
                cohort_id: rec.cohort_id,
                drop_recommendation_id: rec.id,
                reason: reason.to_string(),
                status: RequestStatus::Pending,
                reviewed_by: None,
                reviewed_at: None,
                review_notes: None,
                created_at: Utc::now(),
            };
            state.store.insert_appeal(&appeal).await?;
            appeal
        }
    };

    if !state.store.mark_drop_appealed(rec.id, &appealable).await? {
        return Err(AppError::conflict("drop recommendation can no longer be appealed"));
    }
    audit::record(
        state,
        actor,
        "appeal.create",
        Some(actor.id),
        Some(rec.cohort_id),
        json!({ "appeal": appeal.id, "recommendation": rec.id, "was": rec.status }),
    )
    .await;
    Ok(appeal)
}

pub async fn review_appeal(state: &AppState, actor: &Actor, id: Uuid, req: ReviewReq) -> Result<Appeal, AppError> {
    actor.require(Action::ReviewAppeals)?;
    let status = decision(req.status)?;
    let appeal = state
        .store
        .get_appeal(id)
        .await?
        .ok_or(AppError::NotFound("appeal"))?;

    let _guard = state.locks.acquire(appeal.learner_id).await;
    let appeal = state
        .store
        .get_appeal(id)
        .await?
        .ok_or(AppError::NotFound("appeal"))?;
    if appeal.status != RequestStatus::Pending {
        return Err(AppError::conflict("appeal already reviewed"));
    }

    let outcome = match status {
        RequestStatus::Approved => reinstate(state, appeal.learner_id, appeal.cohort_id).await,
        _ => enforce_drop(state, appeal.learner_id, appeal.cohort_id).await,
    };
    outcome.map_err(|e| {
        tracing::error!(
            appeal = %appeal.id, learner = %appeal.learner_id, error = %e,
            "appeal outcome partially applied; appeal left pending for retry"
        );
        e
    })?;

    let review = Review {
        status,
        reviewed_by: actor.id,
        reviewed_at: Utc::now(),
        notes: clean_notes(req.review_notes),
    };
    if !state.store.resolve_appeal(id, &review).await? {
        return Err(AppError::conflict("appeal already reviewed"));
    }
    tracing::info!(appeal = %appeal.id, learner = %appeal.learner_id, %status, "appeal reviewed");

    audit::record(
        state,
        actor,
        &format!("appeal.{status}"),
        Some(appeal.learner_id),
        Some(appeal.cohort_id),
        json!({ "appeal": appeal.id, "recommendation": appeal.drop_recommendation_id }),
    )
    .await;
    Ok(Appeal {
        status: review.status,
        reviewed_by: Some(review.reviewed_by),
        reviewed_at: Some(review.reviewed_at),
        review_notes: review.notes,
        ..appeal
    })
}

pub async fn list_drops(state: &AppState, actor: &Actor) -> Result<Vec<DropRecommendation>, AppError> {
    match actor.role {
        Role::Learner => Ok(state.store.list_drop_recommendations(Some(actor.id)).await?),
        Role::Instructor => {
            let taught = taught_cohorts(state, actor).await?;
            let all = state.store.list_drop_recommendations(None).await?;
            Ok(all.into_iter().filter(|r| taught.contains(&r.cohort_id)).collect())
        }
        Role::Admin | Role::SuperAdmin => Ok(state.store.list_drop_recommendations(None).await?),
    }
}

pub async fn list_appeals(state: &AppState, actor: &Actor) -> Result<Vec<Appeal>, AppError> {
    match actor.role {
        Role::Learner => Ok(state.store.list_appeals(Some(actor.id)).await?),
        Role::Instructor => {
            let taught = taught_cohorts(state, actor).await?;
            let all = state.store.list_appeals(None).await?;
            Ok(all.into_iter().filter(|a| taught.contains(&a.cohort_id)).collect())
        }
        Role::Admin | Role::SuperAdmin => Ok(state.store.list_appeals(None).await?),
    }
}

/// Records a deadline extension. Nothing reads it back yet.
pub async fn grant_grace_period(
    state: &AppState,
    actor: &Actor,
    req: CreateGracePeriodReq,
) -> Result<GracePeriod, AppError> {
    actor.require(Action::GrantGracePeriod)?;
    if req.extension_days <= 0 {
        return Err(AppError::validation("extension days must be positive"));
    }
    let cohort = load_cohort(state, req.cohort_id).await?;
    state
        .store
        .get_user(req.learner_id)
        .await?
        .ok_or(AppError::NotFound("learner"))?;

    let now = Utc::now();
    let expires_at = now + Duration::days(i64::from(req.extension_days));
    let grace = GracePeriod {
        id: Uuid::new_v4(),
        learner_id: req.learner_id,
        cohort_id: cohort.id,
        granted_by: actor.id,
        extension_days: req.extension_days,
        original_deadline: req.original_deadline.unwrap_or(cohort.end_date),
        new_deadline: expires_at,
        expires_at,
        created_at: now,
    };
    state.store.insert_grace_period(&grace).await?;
    audit::record(
        state,
        actor,
        "grace.grant",
        Some(grace.learner_id),
        Some(grace.cohort_id),
        json!({ "grace_period": grace.id, "days": grace.extension_days }),
    )
    .await;
    Ok(grace)
}

pub async fn list_grace_periods(state: &AppState, actor: &Actor) -> Result<Vec<GracePeriod>, AppError> {
    if actor.is_admin() {
        Ok(state.store.list_grace_periods(None).await?)
    } else {
        Ok(state.store.list_grace_periods(Some(actor.id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_not_a_decision() {
        assert!(decision(RequestStatus::Pending).is_err());
        assert_eq!(decision(RequestStatus::Approved).unwrap(), RequestStatus::Approved);
        assert_eq!(decision(RequestStatus::Rejected).unwrap(), RequestStatus::Rejected);
    }

    #[test]
    fn blank_notes_are_dropped() {
        assert_eq!(clean_notes(Some("  ".into())), None);
        assert_eq!(clean_notes(Some(" ok ".into())).as_deref(), Some("ok"));
        assert_eq!(clean_notes(None), None);
    }
}
