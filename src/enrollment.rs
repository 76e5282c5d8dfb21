//! Enrollment workflow: joining cohorts, applying to courses, and the
//! reviewer's decision on an application.
//!
//! Side effects are idempotent and run before a request is flipped to its
//! terminal state, so a failed approval can simply be retried.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit,
    catalog::{load_cohort, load_course},
    error::AppError,
    grading::INITIAL_SCORE,
    models::*,
    policy::{Action, Actor},
    state::AppState,
};

/// Per-(learner, cohort) state derived from the authoritative records.
pub fn derive_state(
    rows: &[LearnerProgress],
    pending: Option<&EnrollmentRequest>,
    cohort_id: Uuid,
) -> EnrollmentState {
    let in_cohort: Vec<&LearnerProgress> = rows.iter().filter(|p| p.cohort_id == cohort_id).collect();
    if in_cohort.iter().any(|p| p.status != ProgressStatus::Dropped) {
        EnrollmentState::Enrolled
    } else if pending.is_some() {
        EnrollmentState::Applied
    } else if !in_cohort.is_empty() {
        EnrollmentState::Dropped
    } else {
        EnrollmentState::Idle
    }
}

pub async fn enrollment_state(
    state: &AppState,
    actor: &Actor,
    cohort_id: Uuid,
) -> Result<EnrollmentStateView, AppError> {
    load_cohort(state, cohort_id).await?;
    let rows = state.store.list_progress_for_learner(actor.id).await?;
    let pending = state.store.find_pending_request(actor.id, cohort_id).await?;
    Ok(EnrollmentStateView {
        cohort_id,
        learner_id: actor.id,
        state: derive_state(&rows, pending.as_ref(), cohort_id),
    })
}

pub async fn join_cohort(state: &AppState, actor: &Actor, cohort_id: Uuid) -> Result<LearnerProgress, AppError> {
    actor.require(Action::JoinCohort)?;
    let cohort = load_cohort(state, cohort_id).await?;
    if !cohort.status.is_joinable() {
        return Err(AppError::invalid_state(format!(
            "cohort is {} and not open for joining",
            cohort.status
        )));
    }

    let _guard = state.locks.acquire(actor.id).await;
    let rows = state.store.list_progress_for_learner(actor.id).await?;

    state.store.add_cohort_learner(cohort_id, actor.id).await?;

    // single active cohort: live rows elsewhere are dropped
    let mut dropped = Vec::new();
    for row in rows.iter().filter(|p| p.cohort_id != cohort_id && p.status.is_active()) {
        state.store.set_progress_status(row.id, ProgressStatus::Dropped).await?;
        dropped.push(row.id);
    }

    let existing = rows
        .iter()
        .find(|p| p.cohort_id == cohort_id && p.course_id.is_none() && p.status != ProgressStatus::Dropped)
        .cloned();
    let progress = match existing {
        Some(row) => row,
        None => {
            let progress = LearnerProgress::new(actor.id, cohort_id, None, INITIAL_SCORE);
            if let Err(e) = state.store.insert_progress(&progress).await {
                tracing::error!(
                    learner = %actor.id, cohort = %cohort_id, dropped = ?dropped,
                    "join left cohort membership without a progress row; retry the join"
                );
                return Err(e.into());
            }
            progress
        }
    };
    state.store.set_active_cohort(actor.id, Some(cohort_id)).await?;

    tracing::info!(learner = %actor.id, cohort = %cohort_id, dropped = dropped.len(), "learner joined cohort");
    audit::record(
        state,
        actor,
        "cohort.join",
        Some(actor.id),
        Some(cohort_id),
        json!({ "dropped_progress": dropped }),
    )
    .await;
    Ok(progress)
}

pub async fn apply_to_course(state: &AppState, actor: &Actor, req: ApplyReq) -> Result<EnrollmentRequest, AppError> {
    actor.require(Action::ApplyToCourse)?;
    let cohort = load_cohort(state, req.cohort_id).await?;
    if !cohort.status.is_joinable() {
        return Err(AppError::invalid_state(format!(
            "cohort is {} and not open for applications",
            cohort.status
        )));
    }
    if !cohort.has_course(req.course_id) {
        return Err(AppError::NotFound("course in cohort"));
    }

    let _guard = state.locks.acquire(actor.id).await;
    let rows = state.store.list_progress_for_learner(actor.id).await?;
    if rows.iter().any(|p| {
        p.cohort_id == req.cohort_id && p.course_id.is_some() && p.status != ProgressStatus::Dropped
    }) {
        return Err(AppError::conflict("already enrolled in a course in this cohort"));
    }
    if state
        .store
        .find_pending_request(actor.id, req.cohort_id)
        .await?
        .is_some()
    {
        return Err(AppError::conflict("pending application exists"));
    }

    let request = EnrollmentRequest {
        id: Uuid::new_v4(),
        learner_id: actor.id,
        course_id: req.course_id,
        cohort_id: req.cohort_id,
        status: RequestStatus::Pending,
        reason: req.reason.trim().to_string(),
        rejection_reason: None,
        reviewed_by: None,
        reviewed_at: None,
        created_at: Utc::now(),
    };
    match state.store.insert_enrollment_request(&request).await {
        Ok(()) => {}
        Err(crate::store::StoreError::Duplicate(_)) => {
            return Err(AppError::conflict("pending application exists"))
        }
        Err(e) => return Err(e.into()),
    }

    audit::record(
        state,
        actor,
        "application.create",
        Some(actor.id),
        Some(req.cohort_id),
        json!({ "request": request.id, "course": req.course_id }),
    )
    .await;
    Ok(request)
}

/// Ensures a live course-level progress row exists and returns it.
async fn ensure_course_progress(
    state: &AppState,
    learner_id: Uuid,
    cohort_id: Uuid,
    course_id: Uuid,
) -> Result<LearnerProgress, AppError> {
    let rows = state.store.list_progress_for_learner(learner_id).await?;
    if let Some(existing) = rows.into_iter().find(|p| {
        p.cohort_id == cohort_id && p.course_id == Some(course_id) && p.status != ProgressStatus::Dropped
    }) {
        return Ok(existing);
    }
    let progress = LearnerProgress::new(learner_id, cohort_id, Some(course_id), INITIAL_SCORE);
    state.store.insert_progress(&progress).await?;
    Ok(progress)
}

async fn approve_side_effects(
    state: &AppState,
    request: &EnrollmentRequest,
) -> Result<LearnerProgress, AppError> {
    let progress = ensure_course_progress(state, request.learner_id, request.cohort_id, request.course_id).await?;
    state.store.add_cohort_learner(request.cohort_id, request.learner_id).await?;
    let learner = state
        .store
        .get_user(request.learner_id)
        .await?
        .ok_or(AppError::NotFound("learner"))?;
    if learner.active_cohort_id.is_none() {
        state.store.set_active_cohort(learner.id, Some(request.cohort_id)).await?;
    }
    state.store.add_course_registrar(request.course_id, request.learner_id).await?;
    Ok(progress)
}

pub async fn handle_application(
    state: &AppState,
    actor: &Actor,
    request_id: Uuid,
    action: ApplicationAction,
    reason: Option<String>,
) -> Result<EnrollmentRequest, AppError> {
    actor.require(Action::ReviewApplications)?;
    let request = state
        .store
        .get_enrollment_request(request_id)
        .await?
        .ok_or(AppError::NotFound("application"))?;
    let cohort = load_cohort(state, request.cohort_id).await?;
    actor.require_cohort_scope(&cohort)?;

    let _guard = state.locks.acquire(request.learner_id).await;
    // re-read under the lock; a concurrent reviewer may have finished first
    let request = state
        .store
        .get_enrollment_request(request_id)
        .await?
        .ok_or(AppError::NotFound("application"))?;
    if request.status != RequestStatus::Pending {
        return Err(AppError::conflict("application already reviewed"));
    }

    let (status, notes) = match action {
        ApplicationAction::Approve => {
            approve_side_effects(state, &request).await.map_err(|e| {
                tracing::error!(
                    request = %request.id, learner = %request.learner_id, cohort = %request.cohort_id,
                    error = %e, "approval partially applied; request left pending for retry"
                );
                e
            })?;
            (RequestStatus::Approved, None)
        }
        ApplicationAction::Reject => (
            RequestStatus::Rejected,
            reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
        ),
    };

    let review = Review {
        status,
        reviewed_by: actor.id,
        reviewed_at: Utc::now(),
        notes,
    };
    if !state.store.resolve_enrollment_request(request.id, &review).await? {
        return Err(AppError::conflict("application already reviewed"));
    }

    tracing::info!(request = %request.id, learner = %request.learner_id, %status, "application reviewed");
    audit::record(
        state,
        actor,
        &format!("application.{action}"),
        Some(request.learner_id),
        Some(request.cohort_id),
        json!({ "request": request.id, "course": request.course_id }),
    )
    .await;

    Ok(EnrollmentRequest {
        status: review.status,
        rejection_reason: review.notes,
        reviewed_by: Some(review.reviewed_by),
        reviewed_at: Some(review.reviewed_at),
        ..request
    })
}

/// Pending applications the reviewer may act on.
pub async fn pending_applications(state: &AppState, actor: &Actor) -> Result<Vec<EnrollmentRequest>, AppError> {
    actor.require(Action::ReviewApplications)?;
    let pending = state.store.list_pending_requests().await?;
    if actor.is_admin() {
        return Ok(pending);
    }
    let taught: Vec<Uuid> = state
        .store
        .list_cohorts()
        .await?
        .into_iter()
        .filter(|c| c.has_instructor(actor.id))
        .map(|c| c.id)
        .collect();
    Ok(pending.into_iter().filter(|r| taught.contains(&r.cohort_id)).collect())
}

pub async fn my_applications(state: &AppState, actor: &Actor) -> Result<Vec<EnrollmentRequest>, AppError> {
    Ok(state.store.list_requests_for_learner(actor.id).await?)
}

pub async fn add_course_to_cohort(
    state: &AppState,
    actor: &Actor,
    cohort_id: Uuid,
    course_id: Uuid,
) -> Result<Cohort, AppError> {
    actor.require(Action::ManageCohorts)?;
    load_cohort(state, cohort_id).await?;
    load_course(state, course_id).await?;
    if !state.store.add_cohort_course(cohort_id, course_id).await? {
        return Err(AppError::conflict("course already in cohort"));
    }
    audit::record(state, actor, "cohort.course.add", None, Some(cohort_id), json!({ "course": course_id })).await;
    load_cohort(state, cohort_id).await
}

pub async fn remove_course_from_cohort(
    state: &AppState,
    actor: &Actor,
    cohort_id: Uuid,
    course_id: Uuid,
) -> Result<Cohort, AppError> {
    actor.require(Action::ManageCohorts)?;
    load_cohort(state, cohort_id).await?;
    if !state.store.remove_cohort_course(cohort_id, course_id).await? {
        return Err(AppError::NotFound("course in cohort"));
    }
    audit::record(state, actor, "cohort.course.remove", None, Some(cohort_id), json!({ "course": course_id })).await;
    load_cohort(state, cohort_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_state_follows_records() {
        let (learner, cohort) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(derive_state(&[], None, cohort), EnrollmentState::Idle);

        let pending = EnrollmentRequest {
            id: Uuid::new_v4(),
            learner_id: learner,
            course_id: Uuid::new_v4(),
            cohort_id: cohort,
            status: RequestStatus::Pending,
            reason: String::new(),
            rejection_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(derive_state(&[], Some(&pending), cohort), EnrollmentState::Applied);

        let mut row = LearnerProgress::new(learner, cohort, None, INITIAL_SCORE);
        assert_eq!(
            derive_state(std::slice::from_ref(&row), Some(&pending), cohort),
            EnrollmentState::Enrolled
        );

        row.status = ProgressStatus::Dropped;
        assert_eq!(derive_state(&[row.clone()], None, cohort), EnrollmentState::Dropped);
        assert_eq!(derive_state(&[row], None, Uuid::new_v4()), EnrollmentState::Idle);
    }
}
