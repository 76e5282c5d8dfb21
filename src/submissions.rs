use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit,
    catalog::load_cohort,
    error::AppError,
    grading,
    models::*,
    policy::{Action, Actor},
    state::AppState,
    store::GradeEntry,
};

pub async fn submit_work(state: &AppState, actor: &Actor, req: SubmitReq) -> Result<Submission, AppError> {
    actor.require(Action::SubmitWork)?;
    let content = req.content.trim();
    if content.is_empty() {
        return Err(AppError::validation("submission content is required"));
    }

    let cohort = load_cohort(state, req.cohort_id).await?;
    let lesson = state
        .store
        .get_lesson(req.lesson_id)
        .await?
        .ok_or(AppError::NotFound("lesson"))?;
    let module = state
        .store
        .get_module(lesson.module_id)
        .await?
        .ok_or(AppError::NotFound("module"))?;
    if !cohort.has_course(module.course_id) {
        return Err(AppError::NotFound("lesson in cohort"));
    }

    let _guard = state.locks.acquire(actor.id).await;
    let rows = state.store.list_progress_for_learner(actor.id).await?;
    if !rows.iter().any(|p| p.cohort_id == cohort.id && p.status.is_active()) {
        return Err(AppError::conflict("not actively enrolled in this cohort"));
    }

    let was_graded = state
        .store
        .list_graded_submissions(actor.id, cohort.id)
        .await?
        .iter()
        .any(|s| s.lesson_id == lesson.id);

    let submission = state
        .store
        .upsert_submission(actor.id, cohort.id, lesson.id, content)
        .await?;

    // resubmitting withdraws the previous grade
    if was_graded {
        grading::recompute_progress(state, actor.id, cohort.id, lesson.id).await?;
    }

    audit::record(
        state,
        actor,
        "submission.create",
        Some(actor.id),
        Some(cohort.id),
        json!({ "submission": submission.id, "lesson": lesson.id }),
    )
    .await;
    Ok(submission)
}

pub async fn grade_submission(state: &AppState, actor: &Actor, req: GradeReq) -> Result<GradeOutcome, AppError> {
    actor.require(Action::GradeSubmissions)?;
    let grade = grading::validate_grade(req.grade)?;
    let submission = state
        .store
        .get_submission(req.submission_id)
        .await?
        .ok_or(AppError::NotFound("submission"))?;
    let cohort = load_cohort(state, submission.cohort_id).await?;
    actor.require_cohort_scope(&cohort)?;

    let _guard = state.locks.acquire(submission.learner_id).await;
    let entry = GradeEntry {
        grade,
        feedback: req.feedback.trim().to_string(),
        graded_by: actor.id,
        graded_at: Utc::now(),
    };
    let submission = state
        .store
        .record_grade(submission.id, &entry)
        .await?
        .ok_or(AppError::NotFound("submission"))?;

    let progress = grading::recompute_progress(
        state,
        submission.learner_id,
        submission.cohort_id,
        submission.lesson_id,
    )
    .await
    .map_err(|e| {
        tracing::error!(
            submission = %submission.id, learner = %submission.learner_id, error = %e,
            "grade stored but progress recompute failed; regrade to repair"
        );
        e
    })?;

    audit::record(
        state,
        actor,
        "submission.grade",
        Some(submission.learner_id),
        Some(submission.cohort_id),
        json!({ "submission": submission.id, "grade": grade }),
    )
    .await;
    Ok(GradeOutcome { submission, progress })
}

pub async fn my_submissions(state: &AppState, actor: &Actor) -> Result<Vec<Submission>, AppError> {
    Ok(state.store.list_submissions_for_learner(actor.id).await?)
}

/// Ungraded work in the cohorts the grader is responsible for.
pub async fn pending_submissions(state: &AppState, actor: &Actor) -> Result<Vec<Submission>, AppError> {
    actor.require(Action::GradeSubmissions)?;
    let pending = state.store.list_pending_submissions().await?;
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
    Ok(pending.into_iter().filter(|s| taught.contains(&s.cohort_id)).collect())
}

pub async fn my_progress(state: &AppState, actor: &Actor) -> Result<Vec<LearnerProgress>, AppError> {
    Ok(state.store.list_progress_for_learner(actor.id).await?)
}
