//! Grade aggregation and progress status transitions.
//!
//! Grades are entered on a 0-10 scale and stored that way on the
//! submission. Everything derived from them (`current_score`, module
//! scores and averages) is on the 0-100 scale, as are all thresholds.
//! Derived values are always recomputed from the full set of graded
//! submissions, never adjusted incrementally, so re-grading converges.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{
    error::AppError,
    models::{LearnerProgress, Module, ModuleProgress, ProgressStatus, Submission},
    state::AppState,
};

pub const MAX_GRADE: f64 = 10.0;
pub const REVIEW_THRESHOLD: f64 = 50.0;
pub const GRADUATION_THRESHOLD: f64 = 70.0;
/// Score of a progress row with no graded work yet.
pub const INITIAL_SCORE: f64 = 100.0;

pub const RECOMPUTE_ATTEMPTS: usize = 3;

pub fn validate_grade(grade: f64) -> Result<f64, AppError> {
    if grade.is_finite() && (0.0..=MAX_GRADE).contains(&grade) {
        Ok(grade)
    } else {
        Err(AppError::validation(format!("grade must be between 0 and {MAX_GRADE}")))
    }
}

pub fn grade_to_percent(grade: f64) -> f64 {
    grade / MAX_GRADE * 100.0
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn percent_scores<'a>(subs: impl Iterator<Item = &'a Submission>) -> Vec<f64> {
    subs.filter_map(|s| s.grade).map(grade_to_percent).collect()
}

/// Grading only toggles `under-review`. Terminal rows are left alone.
pub fn next_status(current: ProgressStatus, score: f64) -> ProgressStatus {
    match current {
        ProgressStatus::OnTrack | ProgressStatus::AtRisk if score < REVIEW_THRESHOLD => {
            ProgressStatus::UnderReview
        }
        ProgressStatus::UnderReview if score >= REVIEW_THRESHOLD => ProgressStatus::OnTrack,
        other => other,
    }
}

pub fn module_progress(module_id: Uuid, scores: Vec<f64>) -> Option<ModuleProgress> {
    let average_score = mean(&scores)?;
    Some(ModuleProgress {
        module_id,
        scores,
        average_score,
        is_graduated: average_score >= GRADUATION_THRESHOLD,
    })
}

/// Recomputes score, status, completed lessons and the progress entry of
/// `module` from `graded`, the learner's graded submissions in the cohort.
pub fn apply(progress: &mut LearnerProgress, graded: &[Submission], module: &Module) {
    let overall = percent_scores(graded.iter());
    progress.current_score = mean(&overall).unwrap_or(INITIAL_SCORE);
    progress.status = next_status(progress.status, progress.current_score);

    progress.completed_lessons = graded
        .iter()
        .map(|s| s.lesson_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let lesson_ids: BTreeSet<Uuid> = module.lessons.iter().map(|l| l.id).collect();
    let in_module = percent_scores(graded.iter().filter(|s| lesson_ids.contains(&s.lesson_id)));
    let entry = module_progress(module.id, in_module);

    let slot = progress
        .module_progress
        .iter()
        .position(|m| m.module_id == module.id);
    match (slot, entry) {
        (Some(i), Some(entry)) => progress.module_progress[i] = entry,
        (None, Some(entry)) => progress.module_progress.push(entry),
        (Some(i), None) => {
            progress.module_progress.remove(i);
        }
        (None, None) => {}
    }
}

/// Picks the row a lesson's grades feed. A live row always wins over a
/// dropped or failed one; among rows of equal liveness the course-level
/// row for the lesson's course wins over the cohort-level row.
pub fn target_row(rows: Vec<LearnerProgress>, cohort_id: Uuid, course_id: Uuid) -> Option<LearnerProgress> {
    rows.into_iter()
        .filter(|p| p.cohort_id == cohort_id)
        .filter_map(|p| {
            let kind = match p.course_id {
                Some(c) if c == course_id => 0,
                None => 1,
                Some(_) => return None,
            };
            Some(((!p.status.is_active(), kind), p))
        })
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, p)| p)
}

/// Re-derives the learner's progress after a submission for `lesson_id`
/// was graded or reset. Caller holds the learner lock.
pub async fn recompute_progress(
    state: &AppState,
    learner_id: Uuid,
    cohort_id: Uuid,
    lesson_id: Uuid,
) -> Result<Option<LearnerProgress>, AppError> {
    let store = &state.store;
    let lesson = store.get_lesson(lesson_id).await?.ok_or(AppError::NotFound("lesson"))?;
    let module = store
        .get_module(lesson.module_id)
        .await?
        .ok_or(AppError::NotFound("module"))?;

    for attempt in 1..=RECOMPUTE_ATTEMPTS {
        let rows = store.list_progress_for_learner(learner_id).await?;
        let Some(mut progress) = target_row(rows, cohort_id, module.course_id) else {
            tracing::warn!(%learner_id, %cohort_id, "graded work has no progress row to update");
            return Ok(None);
        };

        let graded = store.list_graded_submissions(learner_id, cohort_id).await?;
        let before = progress.status;
        apply(&mut progress, &graded, &module);

        if store.update_progress(&progress).await? {
            if before != progress.status {
                tracing::info!(
                    %learner_id, %cohort_id, from = %before, to = %progress.status,
                    score = progress.current_score, "progress status changed by grading"
                );
            }
            progress.version += 1;
            return Ok(Some(progress));
        }
        tracing::debug!(%learner_id, attempt, "progress changed underneath recompute, retrying");
    }

    Err(AppError::conflict("progress was modified concurrently, retry the request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Lesson, SubmissionStatus};
    use chrono::Utc;

    fn lesson(module_id: Uuid) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            module_id,
            title: "L".into(),
            content: String::new(),
            position: 0,
            assignment: None,
        }
    }

    fn module_with(n: usize) -> Module {
        let id = Uuid::new_v4();
        Module {
            id,
            course_id: Uuid::new_v4(),
            title: "M".into(),
            position: 0,
            lessons: (0..n).map(|_| lesson(id)).collect(),
        }
    }

    fn graded(lesson_id: Uuid, grade: f64) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            learner_id: Uuid::nil(),
            cohort_id: Uuid::nil(),
            lesson_id,
            content: "https://example.com/work".into(),
            grade: Some(grade),
            feedback: None,
            status: SubmissionStatus::Graded,
            submitted_at: Utc::now(),
            graded_at: Some(Utc::now()),
            graded_by: None,
        }
    }

    #[test]
    fn grade_bounds() {
        assert!(validate_grade(0.0).is_ok());
        assert!(validate_grade(10.0).is_ok());
        assert!(validate_grade(10.5).is_err());
        assert!(validate_grade(-0.1).is_err());
        assert!(validate_grade(f64::NAN).is_err());
    }

    #[test]
    fn thresholds_compare_on_percent_scale() {
        // 5/10 sits exactly on the review line, 7/10 exactly on graduation
        assert_eq!(grade_to_percent(5.0), REVIEW_THRESHOLD);
        assert_eq!(grade_to_percent(7.0), GRADUATION_THRESHOLD);
        for g in 0..=10 {
            let pct = grade_to_percent(g as f64);
            assert_eq!(pct < REVIEW_THRESHOLD, (g as f64) < 5.0);
            assert_eq!(pct >= GRADUATION_THRESHOLD, (g as f64) >= 7.0);
        }
    }

    #[test]
    fn status_rule() {
        use ProgressStatus::*;
        assert_eq!(next_status(OnTrack, 49.9), UnderReview);
        assert_eq!(next_status(AtRisk, 10.0), UnderReview);
        assert_eq!(next_status(UnderReview, 50.0), OnTrack);
        assert_eq!(next_status(OnTrack, 80.0), OnTrack);
        assert_eq!(next_status(AtRisk, 80.0), AtRisk);
        assert_eq!(next_status(Dropped, 10.0), Dropped);
        assert_eq!(next_status(Failed, 90.0), Failed);
    }

    #[test]
    fn module_graduates_at_seventy() {
        let m = module_with(2);
        let mut p = LearnerProgress::new(Uuid::nil(), Uuid::nil(), None, INITIAL_SCORE);
        let subs = vec![graded(m.lessons[0].id, 6.0), graded(m.lessons[1].id, 8.0)];
        apply(&mut p, &subs, &m);

        let entry = &p.module_progress[0];
        assert_eq!(entry.scores, vec![60.0, 80.0]);
        assert_eq!(entry.average_score, 70.0);
        assert!(entry.is_graduated);
        assert_eq!(p.current_score, 70.0);
        assert_eq!(p.completed_lessons.len(), 2);
    }

    #[test]
    fn graduation_updates_as_lessons_are_graded() {
        let m = module_with(2);
        let mut p = LearnerProgress::new(Uuid::nil(), Uuid::nil(), None, INITIAL_SCORE);
        let mut subs = vec![graded(m.lessons[0].id, 9.0)];
        apply(&mut p, &subs, &m);
        assert!(p.module_progress[0].is_graduated);

        subs.push(graded(m.lessons[1].id, 4.0));
        apply(&mut p, &subs, &m);
        assert_eq!(p.module_progress.len(), 1);
        assert_eq!(p.module_progress[0].average_score, 65.0);
        assert!(!p.module_progress[0].is_graduated);
    }

    #[test]
    fn regrade_recomputes_from_scratch() {
        let m = module_with(1);
        let mut p = LearnerProgress::new(Uuid::nil(), Uuid::nil(), None, INITIAL_SCORE);
        let subs = vec![graded(m.lessons[0].id, 3.0)];
        apply(&mut p, &subs, &m);
        apply(&mut p, &subs, &m);
        assert_eq!(p.current_score, 30.0);
        assert_eq!(p.module_progress[0].scores, vec![30.0]);
        assert_eq!(p.status, ProgressStatus::UnderReview);

        let regraded = vec![graded(m.lessons[0].id, 9.0)];
        apply(&mut p, &regraded, &m);
        assert_eq!(p.current_score, 90.0);
        assert_eq!(p.status, ProgressStatus::OnTrack);
    }

    #[test]
    fn overall_score_spans_modules_but_module_entry_does_not() {
        let m1 = module_with(1);
        let m2 = module_with(1);
        let mut p = LearnerProgress::new(Uuid::nil(), Uuid::nil(), None, INITIAL_SCORE);
        let subs = vec![graded(m1.lessons[0].id, 10.0), graded(m2.lessons[0].id, 2.0)];
        apply(&mut p, &subs, &m2);
        assert_eq!(p.current_score, 60.0);
        assert_eq!(p.module_progress.len(), 1);
        assert_eq!(p.module_progress[0].module_id, m2.id);
        assert_eq!(p.module_progress[0].average_score, 20.0);
    }

    #[test]
    fn no_graded_work_resets_to_initial() {
        let m = module_with(1);
        let mut p = LearnerProgress::new(Uuid::nil(), Uuid::nil(), None, INITIAL_SCORE);
        apply(&mut p, &[graded(m.lessons[0].id, 2.0)], &m);
        assert_eq!(p.status, ProgressStatus::UnderReview);

        apply(&mut p, &[], &m);
        assert_eq!(p.current_score, INITIAL_SCORE);
        assert_eq!(p.status, ProgressStatus::OnTrack);
        assert!(p.module_progress.is_empty());
        assert!(p.completed_lessons.is_empty());
    }

    #[test]
    fn target_row_prefers_course_row_then_cohort_row() {
        let (learner, cohort, course) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let cohort_row = LearnerProgress::new(learner, cohort, None, INITIAL_SCORE);
        let course_row = LearnerProgress::new(learner, cohort, Some(course), INITIAL_SCORE);
        let elsewhere = LearnerProgress::new(learner, Uuid::new_v4(), Some(course), INITIAL_SCORE);

        let picked = target_row(
            vec![elsewhere.clone(), cohort_row.clone(), course_row.clone()],
            cohort,
            course,
        )
        .unwrap();
        assert_eq!(picked.id, course_row.id);

        let picked = target_row(vec![elsewhere.clone(), cohort_row.clone()], cohort, course).unwrap();
        assert_eq!(picked.id, cohort_row.id);

        assert!(target_row(vec![elsewhere], cohort, course).is_none());
    }

    #[test]
    fn target_row_prefers_a_live_cohort_row_over_a_dropped_course_row() {
        let (learner, cohort, course) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let cohort_row = LearnerProgress::new(learner, cohort, None, INITIAL_SCORE);
        let mut course_row = LearnerProgress::new(learner, cohort, Some(course), INITIAL_SCORE);
        course_row.status = ProgressStatus::Dropped;

        let picked = target_row(vec![course_row.clone(), cohort_row.clone()], cohort, course).unwrap();
        assert_eq!(picked.id, cohort_row.id);

        let picked = target_row(vec![course_row.clone()], cohort, course).unwrap();
        assert_eq!(picked.id, course_row.id);
    }
}
