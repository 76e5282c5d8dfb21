//! A `MemoryStore` wrapper that fails selected writes on demand.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dexterhub::{
    models::*,
    store::{GradeEntry, MemoryStore, Store, StoreError, StoreResult},
};
use uuid::Uuid;

/// Each counter is the number of upcoming calls to break.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub progress_status_failures: AtomicUsize,
    pub appeal_mark_failures: AtomicUsize,
    /// `update_progress` calls that lose the race to another writer.
    pub lost_progress_races: AtomicUsize,
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected() -> StoreError {
    StoreError::Corrupt("injected failure".into())
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.inner.insert_user(user).await
    }
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.find_user_by_email(email).await
    }
    async fn set_user_status(&self, id: Uuid, status: UserStatus) -> StoreResult<bool> {
        self.inner.set_user_status(id, status).await
    }
    async fn set_active_cohort(&self, id: Uuid, cohort_id: Option<Uuid>) -> StoreResult<bool> {
        self.inner.set_active_cohort(id, cohort_id).await
    }

    async fn insert_cohort(&self, cohort: &Cohort) -> StoreResult<()> {
        self.inner.insert_cohort(cohort).await
    }
    async fn get_cohort(&self, id: Uuid) -> StoreResult<Option<Cohort>> {
        self.inner.get_cohort(id).await
    }
    async fn list_cohorts(&self) -> StoreResult<Vec<Cohort>> {
        self.inner.list_cohorts().await
    }
    async fn set_cohort_status(&self, id: Uuid, status: CohortStatus) -> StoreResult<bool> {
        self.inner.set_cohort_status(id, status).await
    }
    async fn add_cohort_learner(&self, cohort_id: Uuid, learner_id: Uuid) -> StoreResult<bool> {
        self.inner.add_cohort_learner(cohort_id, learner_id).await
    }
    async fn add_cohort_course(&self, cohort_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        self.inner.add_cohort_course(cohort_id, course_id).await
    }
    async fn remove_cohort_course(&self, cohort_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        self.inner.remove_cohort_course(cohort_id, course_id).await
    }

    async fn insert_course(&self, course: &Course) -> StoreResult<()> {
        self.inner.insert_course(course).await
    }
    async fn insert_module(&self, module: &Module) -> StoreResult<()> {
        self.inner.insert_module(module).await
    }
    async fn insert_lesson(&self, lesson: &Lesson) -> StoreResult<()> {
        self.inner.insert_lesson(lesson).await
    }
    async fn get_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        self.inner.get_course(id).await
    }
    async fn list_courses(&self) -> StoreResult<Vec<Course>> {
        self.inner.list_courses().await
    }
    async fn get_module(&self, id: Uuid) -> StoreResult<Option<Module>> {
        self.inner.get_module(id).await
    }
    async fn get_lesson(&self, id: Uuid) -> StoreResult<Option<Lesson>> {
        self.inner.get_lesson(id).await
    }
    async fn add_course_registrar(&self, course_id: Uuid, learner_id: Uuid) -> StoreResult<bool> {
        self.inner.add_course_registrar(course_id, learner_id).await
    }

    async fn insert_enrollment_request(&self, req: &EnrollmentRequest) -> StoreResult<()> {
        self.inner.insert_enrollment_request(req).await
    }
    async fn get_enrollment_request(&self, id: Uuid) -> StoreResult<Option<EnrollmentRequest>> {
        self.inner.get_enrollment_request(id).await
    }
    async fn find_pending_request(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
    ) -> StoreResult<Option<EnrollmentRequest>> {
        self.inner.find_pending_request(learner_id, cohort_id).await
    }
    async fn list_pending_requests(&self) -> StoreResult<Vec<EnrollmentRequest>> {
        self.inner.list_pending_requests().await
    }
    async fn list_requests_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<EnrollmentRequest>> {
        self.inner.list_requests_for_learner(learner_id).await
    }
    async fn resolve_enrollment_request(
        &self,
        id: Uuid,
        review: &Review<RequestStatus>,
    ) -> StoreResult<bool> {
        self.inner.resolve_enrollment_request(id, review).await
    }

    async fn insert_progress(&self, progress: &LearnerProgress) -> StoreResult<()> {
        self.inner.insert_progress(progress).await
    }
    async fn list_progress_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<LearnerProgress>> {
        self.inner.list_progress_for_learner(learner_id).await
    }
    async fn list_progress_for_cohort(&self, cohort_id: Uuid) -> StoreResult<Vec<LearnerProgress>> {
        self.inner.list_progress_for_cohort(cohort_id).await
    }
    async fn update_progress(&self, progress: &LearnerProgress) -> StoreResult<bool> {
        if take(&self.lost_progress_races) {
            // another writer touches the row first, bumping its version
            let rows = self.inner.list_progress_for_learner(progress.learner_id).await?;
            if let Some(current) = rows.iter().find(|p| p.id == progress.id) {
                self.inner.set_progress_status(current.id, current.status).await?;
            }
        }
        self.inner.update_progress(progress).await
    }
    async fn set_progress_status(&self, id: Uuid, status: ProgressStatus) -> StoreResult<bool> {
        if take(&self.progress_status_failures) {
            return Err(injected());
        }
        self.inner.set_progress_status(id, status).await
    }

    async fn upsert_submission(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
        lesson_id: Uuid,
        content: &str,
    ) -> StoreResult<Submission> {
        self.inner.upsert_submission(learner_id, cohort_id, lesson_id, content).await
    }
    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        self.inner.get_submission(id).await
    }
    async fn list_submissions_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<Submission>> {
        self.inner.list_submissions_for_learner(learner_id).await
    }
    async fn list_pending_submissions(&self) -> StoreResult<Vec<Submission>> {
        self.inner.list_pending_submissions().await
    }
    async fn list_graded_submissions(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
    ) -> StoreResult<Vec<Submission>> {
        self.inner.list_graded_submissions(learner_id, cohort_id).await
    }
    async fn record_grade(&self, id: Uuid, entry: &GradeEntry) -> StoreResult<Option<Submission>> {
        self.inner.record_grade(id, entry).await
    }

    async fn insert_drop_recommendation(&self, rec: &DropRecommendation) -> StoreResult<()> {
        self.inner.insert_drop_recommendation(rec).await
    }
    async fn get_drop_recommendation(&self, id: Uuid) -> StoreResult<Option<DropRecommendation>> {
        self.inner.get_drop_recommendation(id).await
    }
    async fn list_drop_recommendations(
        &self,
        learner_id: Option<Uuid>,
    ) -> StoreResult<Vec<DropRecommendation>> {
        self.inner.list_drop_recommendations(learner_id).await
    }
    async fn transition_drop_recommendation(
        &self,
        id: Uuid,
        from: &[DropStatus],
        review: &Review<DropStatus>,
    ) -> StoreResult<bool> {
        self.inner.transition_drop_recommendation(id, from, review).await
    }
    async fn mark_drop_appealed(&self, id: Uuid, from: &[DropStatus]) -> StoreResult<bool> {
        if take(&self.appeal_mark_failures) {
            return Err(injected());
        }
        self.inner.mark_drop_appealed(id, from).await
    }
    async fn insert_appeal(&self, appeal: &Appeal) -> StoreResult<()> {
        self.inner.insert_appeal(appeal).await
    }
    async fn get_appeal(&self, id: Uuid) -> StoreResult<Option<Appeal>> {
        self.inner.get_appeal(id).await
    }
    async fn list_appeals(&self, learner_id: Option<Uuid>) -> StoreResult<Vec<Appeal>> {
        self.inner.list_appeals(learner_id).await
    }
    async fn resolve_appeal(&self, id: Uuid, review: &Review<RequestStatus>) -> StoreResult<bool> {
        self.inner.resolve_appeal(id, review).await
    }
    async fn insert_grace_period(&self, grace: &GracePeriod) -> StoreResult<()> {
        self.inner.insert_grace_period(grace).await
    }
    async fn list_grace_periods(&self, learner_id: Option<Uuid>) -> StoreResult<Vec<GracePeriod>> {
        self.inner.list_grace_periods(learner_id).await
    }

    async fn append_audit(&self, entry: &AuditLog) -> StoreResult<()> {
        self.inner.append_audit(entry).await
    }
    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditLog>> {
        self.inner.recent_audit(limit).await
    }
}
