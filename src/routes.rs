use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use uuid::Uuid;

use crate::{
    accounts, audit, catalog, enrollment,
    error::AppError,
    extract::{Json, Path},
    models::*,
    policy::Actor,
    review,
    state::AppState,
    submissions,
};

type AppResult<T> = Result<Json<T>, AppError>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // accounts
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/users", post(create_user))
        // cohorts + enrollment
        .route("/api/cohorts", get(list_cohorts).post(create_cohort))
        .route("/api/cohorts/join", post(join_cohort))
        .route("/api/cohorts/apply", post(apply_to_course))
        .route("/api/cohorts/applications/pending", get(pending_applications))
        .route("/api/cohorts/applications/my", get(my_applications))
        .route("/api/cohorts/applications/:id/action", post(handle_application))
        .route("/api/cohorts/:id", get(get_cohort))
        .route("/api/cohorts/:id/learners", get(cohort_learners))
        .route("/api/cohorts/:id/status", put(set_cohort_status))
        .route("/api/cohorts/:id/enrollment", get(enrollment_state))
        .route(
            "/api/cohorts/:id/courses/:course_id",
            post(add_course_to_cohort).delete(remove_course_from_cohort),
        )
        // catalog
        .route("/api/courses", get(list_courses).post(create_course))
        .route("/api/courses/modules", post(add_module))
        .route("/api/courses/lessons", post(add_lesson))
        .route("/api/courses/:id", get(get_course))
        // grading
        .route("/api/submissions", post(submit_work))
        .route("/api/submissions/my", get(my_submissions))
        .route("/api/submissions/pending", get(pending_submissions))
        .route("/api/submissions/grade", post(grade_submission))
        .route("/api/progress/my", get(my_progress))
        // review workflow
        .route("/api/drop-recommendations", get(list_drops).post(recommend_drop))
        .route("/api/drop-recommendations/:id", put(review_drop))
        .route("/api/appeals", get(list_appeals).post(file_appeal))
        .route("/api/appeals/:id", put(review_appeal))
        .route("/api/grace-periods", get(list_grace_periods).post(grant_grace_period))
        .route("/api/audit-logs", get(audit_logs))
        .with_state(state)
}

fn created<T: serde::Serialize>(body: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(body))
}

// --- accounts ---

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(accounts::register(&state, req).await?))
}

async fn login(State(state): State<Arc<AppState>>, Json(req): Json<LoginReq>) -> AppResult<AuthResponse> {
    Ok(Json(accounts::login(&state, req).await?))
}

async fn me(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<User> {
    Ok(Json(accounts::me(&state, &actor).await?))
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<RegisterReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(accounts::create_user(&state, &actor, req).await?))
}

// --- cohorts ---

async fn list_cohorts(State(state): State<Arc<AppState>>, _actor: Actor) -> AppResult<Vec<Cohort>> {
    Ok(Json(catalog::list_cohorts(&state).await?))
}

async fn create_cohort(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateCohortReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(catalog::create_cohort(&state, &actor, req).await?))
}

async fn get_cohort(State(state): State<Arc<AppState>>, _actor: Actor, Path(id): Path<Uuid>) -> AppResult<Cohort> {
    Ok(Json(catalog::load_cohort(&state, id).await?))
}

async fn cohort_learners(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Vec<RosterEntry>> {
    Ok(Json(catalog::roster(&state, &actor, id).await?))
}

async fn set_cohort_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<CohortStatusReq>,
) -> AppResult<Cohort> {
    Ok(Json(catalog::set_cohort_status(&state, &actor, id, req.status).await?))
}

async fn enrollment_state(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<EnrollmentStateView> {
    Ok(Json(enrollment::enrollment_state(&state, &actor, id).await?))
}

async fn join_cohort(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<JoinCohortReq>,
) -> AppResult<LearnerProgress> {
    Ok(Json(enrollment::join_cohort(&state, &actor, req.cohort_id).await?))
}

async fn apply_to_course(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<ApplyReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(enrollment::apply_to_course(&state, &actor, req).await?))
}

async fn pending_applications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> AppResult<Vec<EnrollmentRequest>> {
    Ok(Json(enrollment::pending_applications(&state, &actor).await?))
}

async fn my_applications(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Vec<EnrollmentRequest>> {
    Ok(Json(enrollment::my_applications(&state, &actor).await?))
}

async fn handle_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplicationActionReq>,
) -> AppResult<EnrollmentRequest> {
    Ok(Json(
        enrollment::handle_application(&state, &actor, id, req.action, req.reason).await?,
    ))
}

async fn add_course_to_cohort(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path((id, course_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Cohort> {
    Ok(Json(enrollment::add_course_to_cohort(&state, &actor, id, course_id).await?))
}

async fn remove_course_from_cohort(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path((id, course_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Cohort> {
    Ok(Json(enrollment::remove_course_from_cohort(&state, &actor, id, course_id).await?))
}

// --- catalog ---

async fn list_courses(State(state): State<Arc<AppState>>, _actor: Actor) -> AppResult<Vec<Course>> {
    Ok(Json(catalog::list_courses(&state).await?))
}

async fn create_course(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateCourseReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(catalog::create_course(&state, &actor, req).await?))
}

async fn get_course(State(state): State<Arc<AppState>>, _actor: Actor, Path(id): Path<Uuid>) -> AppResult<Course> {
    Ok(Json(catalog::load_course(&state, id).await?))
}

async fn add_module(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateModuleReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(catalog::add_module(&state, &actor, req).await?))
}

async fn add_lesson(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateLessonReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(catalog::add_lesson(&state, &actor, req).await?))
}

// --- grading ---

async fn submit_work(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<SubmitReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(submissions::submit_work(&state, &actor, req).await?))
}

async fn my_submissions(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Vec<Submission>> {
    Ok(Json(submissions::my_submissions(&state, &actor).await?))
}

async fn pending_submissions(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Vec<Submission>> {
    Ok(Json(submissions::pending_submissions(&state, &actor).await?))
}

async fn grade_submission(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<GradeReq>,
) -> AppResult<GradeOutcome> {
    Ok(Json(submissions::grade_submission(&state, &actor, req).await?))
}

async fn my_progress(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Vec<LearnerProgress>> {
    Ok(Json(submissions::my_progress(&state, &actor).await?))
}

// --- review workflow ---

async fn list_drops(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Vec<DropRecommendation>> {
    Ok(Json(review::list_drops(&state, &actor).await?))
}

async fn recommend_drop(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateDropReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(review::recommend_drop(&state, &actor, req).await?))
}

async fn review_drop(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewReq>,
) -> AppResult<DropRecommendation> {
    Ok(Json(review::review_drop(&state, &actor, id, req).await?))
}

async fn list_appeals(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Vec<Appeal>> {
    Ok(Json(review::list_appeals(&state, &actor).await?))
}

async fn file_appeal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateAppealReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(review::file_appeal(&state, &actor, req).await?))
}

async fn review_appeal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewReq>,
) -> AppResult<Appeal> {
    Ok(Json(review::review_appeal(&state, &actor, id, req).await?))
}

async fn list_grace_periods(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Vec<GracePeriod>> {
    Ok(Json(review::list_grace_periods(&state, &actor).await?))
}

async fn grant_grace_period(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateGracePeriodReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(review::grant_grace_period(&state, &actor, req).await?))
}

async fn audit_logs(State(state): State<Arc<AppState>>, actor: Actor) -> AppResult<Vec<AuditLog>> {
    Ok(Json(audit::recent(&state, &actor).await?))
}
