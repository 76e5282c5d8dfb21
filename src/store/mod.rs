//! Persistence boundary.
//!
//! Every method is a single read or a single write; workflows compose them.
//! Writes that must not race are expressed as compare-and-set
//! (`resolve_*`, `update_progress`) and report whether they applied.
//! Set-membership writes are idempotent and report whether they changed
//! anything.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate {0}")]
    Duplicate(&'static str),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Grade written onto a submission by a grader.
#[derive(Debug, Clone)]
pub struct GradeEntry {
    pub grade: f64,
    pub feedback: String,
    pub graded_by: Uuid,
    pub graded_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // users
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn set_user_status(&self, id: Uuid, status: UserStatus) -> StoreResult<bool>;
    async fn set_active_cohort(&self, id: Uuid, cohort_id: Option<Uuid>) -> StoreResult<bool>;

    // cohorts
    async fn insert_cohort(&self, cohort: &Cohort) -> StoreResult<()>;
    async fn get_cohort(&self, id: Uuid) -> StoreResult<Option<Cohort>>;
    async fn list_cohorts(&self) -> StoreResult<Vec<Cohort>>;
    async fn set_cohort_status(&self, id: Uuid, status: CohortStatus) -> StoreResult<bool>;
    async fn add_cohort_learner(&self, cohort_id: Uuid, learner_id: Uuid) -> StoreResult<bool>;
    async fn add_cohort_course(&self, cohort_id: Uuid, course_id: Uuid) -> StoreResult<bool>;
    async fn remove_cohort_course(&self, cohort_id: Uuid, course_id: Uuid) -> StoreResult<bool>;

    // catalog
    async fn insert_course(&self, course: &Course) -> StoreResult<()>;
    async fn insert_module(&self, module: &Module) -> StoreResult<()>;
    async fn insert_lesson(&self, lesson: &Lesson) -> StoreResult<()>;
    async fn get_course(&self, id: Uuid) -> StoreResult<Option<Course>>;
    async fn list_courses(&self) -> StoreResult<Vec<Course>>;
    async fn get_module(&self, id: Uuid) -> StoreResult<Option<Module>>;
    async fn get_lesson(&self, id: Uuid) -> StoreResult<Option<Lesson>>;
    async fn add_course_registrar(&self, course_id: Uuid, learner_id: Uuid) -> StoreResult<bool>;

    // enrollment requests
    async fn insert_enrollment_request(&self, req: &EnrollmentRequest) -> StoreResult<()>;
    async fn get_enrollment_request(&self, id: Uuid) -> StoreResult<Option<EnrollmentRequest>>;
    async fn find_pending_request(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
    ) -> StoreResult<Option<EnrollmentRequest>>;
    async fn list_pending_requests(&self) -> StoreResult<Vec<EnrollmentRequest>>;
    async fn list_requests_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<EnrollmentRequest>>;
    async fn resolve_enrollment_request(
        &self,
        id: Uuid,
        review: &Review<RequestStatus>,
    ) -> StoreResult<bool>;

    // progress
    async fn insert_progress(&self, progress: &LearnerProgress) -> StoreResult<()>;
    async fn list_progress_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<LearnerProgress>>;
    async fn list_progress_for_cohort(&self, cohort_id: Uuid) -> StoreResult<Vec<LearnerProgress>>;
    /// Applies only when the stored version equals `progress.version`; the
    /// stored version is then incremented.
    async fn update_progress(&self, progress: &LearnerProgress) -> StoreResult<bool>;
    async fn set_progress_status(&self, id: Uuid, status: ProgressStatus) -> StoreResult<bool>;

    // submissions
    /// Creates the submission for (learner, lesson, cohort) or overwrites its
    /// content and resets it to pending.
    async fn upsert_submission(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
        lesson_id: Uuid,
        content: &str,
    ) -> StoreResult<Submission>;
    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>>;
    async fn list_submissions_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<Submission>>;
    async fn list_pending_submissions(&self) -> StoreResult<Vec<Submission>>;
    async fn list_graded_submissions(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
    ) -> StoreResult<Vec<Submission>>;
    async fn record_grade(&self, id: Uuid, entry: &GradeEntry) -> StoreResult<Option<Submission>>;

    // review workflow
    async fn insert_drop_recommendation(&self, rec: &DropRecommendation) -> StoreResult<()>;
    async fn get_drop_recommendation(&self, id: Uuid) -> StoreResult<Option<DropRecommendation>>;
    async fn list_drop_recommendations(
        &self,
        learner_id: Option<Uuid>,
    ) -> StoreResult<Vec<DropRecommendation>>;
    /// Moves the recommendation to `review.status` if its current status is
    /// one of `from`.
    async fn transition_drop_recommendation(
        &self,
        id: Uuid,
        from: &[DropStatus],
        review: &Review<DropStatus>,
    ) -> StoreResult<bool>;
    async fn mark_drop_appealed(&self, id: Uuid, from: &[DropStatus]) -> StoreResult<bool>;
    async fn insert_appeal(&self, appeal: &Appeal) -> StoreResult<()>;
    async fn get_appeal(&self, id: Uuid) -> StoreResult<Option<Appeal>>;
    async fn list_appeals(&self, learner_id: Option<Uuid>) -> StoreResult<Vec<Appeal>>;
    async fn resolve_appeal(&self, id: Uuid, review: &Review<RequestStatus>) -> StoreResult<bool>;
    async fn insert_grace_period(&self, grace: &GracePeriod) -> StoreResult<()>;
    async fn list_grace_periods(&self, learner_id: Option<Uuid>) -> StoreResult<Vec<GracePeriod>>;

    // audit
    async fn append_audit(&self, entry: &AuditLog) -> StoreResult<()>;
    /// Newest first.
    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditLog>>;
}
