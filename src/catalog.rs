//! Cohort and course authoring.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit,
    error::AppError,
    models::*,
    policy::{Action, Actor},
    state::AppState,
};

pub async fn load_cohort(state: &AppState, id: Uuid) -> Result<Cohort, AppError> {
    state.store.get_cohort(id).await?.ok_or(AppError::NotFound("cohort"))
}

pub async fn load_course(state: &AppState, id: Uuid) -> Result<Course, AppError> {
    state.store.get_course(id).await?.ok_or(AppError::NotFound("course"))
}

fn validate_cohort(req: &CreateCohortReq) -> Result<(), AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::validation("cohort name is required"));
    }
    if req.start_date > req.end_date {
        return Err(AppError::validation("cohort cannot end before it starts"));
    }
    if !(0.0..=100.0).contains(&req.performance_threshold) {
        return Err(AppError::validation("performance threshold is a percentage (0-100)"));
    }
    if req.weekly_target_hours < 0.0 || req.grace_period_days < 0 {
        return Err(AppError::validation("weekly target and grace period cannot be negative"));
    }
    Ok(())
}

pub async fn create_cohort(state: &AppState, actor: &Actor, req: CreateCohortReq) -> Result<Cohort, AppError> {
    actor.require(Action::ManageCohorts)?;
    validate_cohort(&req)?;

    for id in &req.instructor_ids {
        match state.store.get_user(*id).await? {
            Some(u) if u.role == Role::Instructor => {}
            Some(_) => return Err(AppError::validation(format!("user {id} is not an instructor"))),
            None => return Err(AppError::NotFound("instructor")),
        }
    }
    for id in &req.course_ids {
        load_course(state, *id).await?;
    }

    let mut instructor_ids = req.instructor_ids.clone();
    instructor_ids.sort();
    instructor_ids.dedup();
    let mut course_ids = req.course_ids.clone();
    course_ids.sort();
    course_ids.dedup();

    let cohort = Cohort {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        start_date: req.start_date,
        end_date: req.end_date,
        status: req.status.unwrap_or(CohortStatus::Upcoming),
        instructor_ids,
        learner_ids: Vec::new(),
        course_ids,
        performance_threshold: req.performance_threshold,
        weekly_target_hours: req.weekly_target_hours,
        grace_period_days: req.grace_period_days,
        created_at: Utc::now(),
    };
    state.store.insert_cohort(&cohort).await?;
    audit::record(state, actor, "cohort.create", None, Some(cohort.id), json!({ "name": cohort.name })).await;
    tracing::info!(cohort = %cohort.id, "cohort created");
    Ok(cohort)
}

pub async fn list_cohorts(state: &AppState) -> Result<Vec<Cohort>, AppError> {
    Ok(state.store.list_cohorts().await?)
}

pub async fn set_cohort_status(
    state: &AppState,
    actor: &Actor,
    cohort_id: Uuid,
    status: CohortStatus,
) -> Result<Cohort, AppError> {
    actor.require(Action::ManageCohorts)?;
    let mut cohort = load_cohort(state, cohort_id).await?;
    if cohort.status == CohortStatus::Archived && status != CohortStatus::Archived {
        return Err(AppError::invalid_state("archived cohorts cannot be reopened"));
    }
    state.store.set_cohort_status(cohort_id, status).await?;
    audit::record(
        state,
        actor,
        "cohort.status",
        None,
        Some(cohort_id),
        json!({ "from": cohort.status, "to": status }),
    )
    .await;
    cohort.status = status;
    Ok(cohort)
}

/// Progress rows of the cohort joined with their learners.
pub async fn roster(state: &AppState, actor: &Actor, cohort_id: Uuid) -> Result<Vec<RosterEntry>, AppError> {
    actor.require(Action::ViewCohortRoster)?;
    let cohort = load_cohort(state, cohort_id).await?;
    actor.require_cohort_scope(&cohort)?;

    let mut out = Vec::new();
    for progress in state.store.list_progress_for_cohort(cohort_id).await? {
        let Some(learner) = state.store.get_user(progress.learner_id).await? else {
            tracing::warn!(learner = %progress.learner_id, "progress row references a missing user");
            continue;
        };
        out.push(RosterEntry {
            meets_threshold: progress.current_score >= cohort.performance_threshold,
            learner,
            progress,
        });
    }
    Ok(out)
}

pub async fn create_course(state: &AppState, actor: &Actor, req: CreateCourseReq) -> Result<Course, AppError> {
    actor.require(Action::AuthorCourses)?;
    if req.title.trim().is_empty() {
        return Err(AppError::validation("course title is required"));
    }
    let course = Course {
        id: Uuid::new_v4(),
        title: req.title.trim().to_string(),
        description: req.description,
        instructor_id: actor.id,
        registrars: Vec::new(),
        modules: Vec::new(),
        created_at: Utc::now(),
    };
    state.store.insert_course(&course).await?;
    audit::record(state, actor, "course.create", None, None, json!({ "course": course.id })).await;
    Ok(course)
}

pub async fn list_courses(state: &AppState) -> Result<Vec<Course>, AppError> {
    Ok(state.store.list_courses().await?)
}

pub async fn add_module(state: &AppState, actor: &Actor, req: CreateModuleReq) -> Result<Module, AppError> {
    actor.require(Action::AuthorCourses)?;
    let course = load_course(state, req.course_id).await?;
    actor.require_course_owner(&course)?;
    if req.title.trim().is_empty() {
        return Err(AppError::validation("module title is required"));
    }

    let module = Module {
        id: Uuid::new_v4(),
        course_id: course.id,
        title: req.title.trim().to_string(),
        position: req.position.unwrap_or(course.modules.len() as i32),
        lessons: Vec::new(),
    };
    state.store.insert_module(&module).await?;
    Ok(module)
}

pub fn validate_assignment(a: &Assignment) -> Result<(), AppError> {
    if a.title.trim().is_empty() {
        return Err(AppError::validation("assignment title is required"));
    }
    if !(a.max_score > 0.0) {
        return Err(AppError::validation("assignment max score must be positive"));
    }
    if a.kind == AssignmentKind::Quiz && a.questions.is_empty() {
        return Err(AppError::validation("a quiz needs at least one question"));
    }
    for (i, q) in a.questions.iter().enumerate() {
        if q.options.len() < 2 {
            return Err(AppError::validation(format!("question {} needs at least two options", i + 1)));
        }
        if q.correct_option_index >= q.options.len() {
            return Err(AppError::validation(format!(
                "question {} marks a non-existent option as correct",
                i + 1
            )));
        }
    }
    Ok(())
}

pub async fn add_lesson(state: &AppState, actor: &Actor, req: CreateLessonReq) -> Result<Lesson, AppError> {
    actor.require(Action::AuthorCourses)?;
    let module = state
        .store
        .get_module(req.module_id)
        .await?
        .ok_or(AppError::NotFound("module"))?;
    let course = load_course(state, module.course_id).await?;
    actor.require_course_owner(&course)?;
    if req.title.trim().is_empty() {
        return Err(AppError::validation("lesson title is required"));
    }
    if let Some(a) = &req.assignment {
        validate_assignment(a)?;
    }

    let lesson = Lesson {
        id: Uuid::new_v4(),
        module_id: module.id,
        title: req.title.trim().to_string(),
        content: req.content,
        position: req.position.unwrap_or(module.lessons.len() as i32),
        assignment: req.assignment,
    };
    state.store.insert_lesson(&lesson).await?;
    Ok(lesson)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiz(questions: Vec<Question>) -> Assignment {
        Assignment {
            title: "Check-in".into(),
            description: String::new(),
            kind: AssignmentKind::Quiz,
            questions,
            max_score: 10.0,
        }
    }

    #[test]
    fn quiz_needs_questions_with_valid_answers() {
        assert!(validate_assignment(&quiz(vec![])).is_err());

        let bad = Question {
            text: "2+2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_option_index: 2,
        };
        assert!(validate_assignment(&quiz(vec![bad])).is_err());

        let good = Question {
            text: "2+2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_option_index: 1,
        };
        assert!(validate_assignment(&quiz(vec![good])).is_ok());
    }

    #[test]
    fn task_without_questions_is_fine() {
        let task = Assignment {
            kind: AssignmentKind::Task,
            ..quiz(vec![])
        };
        assert!(validate_assignment(&task).is_ok());
        assert!(validate_assignment(&Assignment { max_score: 0.0, ..task }).is_err());
    }
}
