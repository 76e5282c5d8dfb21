use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{GradeEntry, Store, StoreError, StoreResult};
use crate::models::*;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    cohorts: HashMap<Uuid, Cohort>,
    courses: HashMap<Uuid, Course>,
    modules: HashMap<Uuid, Module>,
    lessons: HashMap<Uuid, Lesson>,
    requests: Vec<EnrollmentRequest>,
    progress: Vec<LearnerProgress>,
    submissions: Vec<Submission>,
    drops: Vec<DropRecommendation>,
    appeals: Vec<Appeal>,
    grace_periods: Vec<GracePeriod>,
    audit: Vec<AuditLog>,
}

impl Tables {
    /// Rebuilds the module/lesson tree of a course from the flat tables.
    fn assemble_course(&self, course: &Course) -> Course {
        let mut modules: Vec<Module> = self
            .modules
            .values()
            .filter(|m| m.course_id == course.id)
            .map(|m| self.assemble_module(m))
            .collect();
        modules.sort_by_key(|m| m.position);
        Course { modules, ..course.clone() }
    }

    fn assemble_module(&self, module: &Module) -> Module {
        let mut lessons: Vec<Lesson> = self
            .lessons
            .values()
            .filter(|l| l.module_id == module.id)
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.position);
        Module { lessons, ..module.clone() }
    }
}

fn add_member(set: &mut Vec<Uuid>, id: Uuid) -> bool {
    if set.contains(&id) {
        return false;
    }
    set.push(id);
    true
}

/// In-process store with the same contract as [`super::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email"));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn set_user_status(&self, id: Uuid, status: UserStatus) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(t.users.get_mut(&id).map(|u| u.status = status).is_some())
    }

    async fn set_active_cohort(&self, id: Uuid, cohort_id: Option<Uuid>) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(t.users.get_mut(&id).map(|u| u.active_cohort_id = cohort_id).is_some())
    }

    async fn insert_cohort(&self, cohort: &Cohort) -> StoreResult<()> {
        self.tables.write().await.cohorts.insert(cohort.id, cohort.clone());
        Ok(())
    }

    async fn get_cohort(&self, id: Uuid) -> StoreResult<Option<Cohort>> {
        Ok(self.tables.read().await.cohorts.get(&id).cloned())
    }

    async fn list_cohorts(&self) -> StoreResult<Vec<Cohort>> {
        let t = self.tables.read().await;
        let mut out: Vec<Cohort> = t.cohorts.values().cloned().collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn set_cohort_status(&self, id: Uuid, status: CohortStatus) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(t.cohorts.get_mut(&id).map(|c| c.status = status).is_some())
    }

    async fn add_cohort_learner(&self, cohort_id: Uuid, learner_id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(t
            .cohorts
            .get_mut(&cohort_id)
            .map(|c| add_member(&mut c.learner_ids, learner_id))
            .unwrap_or(false))
    }

    async fn add_cohort_course(&self, cohort_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(t
            .cohorts
            .get_mut(&cohort_id)
            .map(|c| add_member(&mut c.course_ids, course_id))
            .unwrap_or(false))
    }

    async fn remove_cohort_course(&self, cohort_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(match t.cohorts.get_mut(&cohort_id) {
            Some(c) => {
                let before = c.course_ids.len();
                c.course_ids.retain(|id| *id != course_id);
                c.course_ids.len() != before
            }
            None => false,
        })
    }

    async fn insert_course(&self, course: &Course) -> StoreResult<()> {
        let stored = Course { modules: Vec::new(), ..course.clone() };
        self.tables.write().await.courses.insert(course.id, stored);
        Ok(())
    }

    async fn insert_module(&self, module: &Module) -> StoreResult<()> {
        let stored = Module { lessons: Vec::new(), ..module.clone() };
        self.tables.write().await.modules.insert(module.id, stored);
        Ok(())
    }

    async fn insert_lesson(&self, lesson: &Lesson) -> StoreResult<()> {
        self.tables.write().await.lessons.insert(lesson.id, lesson.clone());
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        let t = self.tables.read().await;
        Ok(t.courses.get(&id).map(|c| t.assemble_course(c)))
    }

    async fn list_courses(&self) -> StoreResult<Vec<Course>> {
        let t = self.tables.read().await;
        let mut out: Vec<Course> = t.courses.values().map(|c| t.assemble_course(c)).collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn get_module(&self, id: Uuid) -> StoreResult<Option<Module>> {
        let t = self.tables.read().await;
        Ok(t.modules.get(&id).map(|m| t.assemble_module(m)))
    }

    async fn get_lesson(&self, id: Uuid) -> StoreResult<Option<Lesson>> {
        Ok(self.tables.read().await.lessons.get(&id).cloned())
    }

    async fn add_course_registrar(&self, course_id: Uuid, learner_id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(t
            .courses
            .get_mut(&course_id)
            .map(|c| add_member(&mut c.registrars, learner_id))
            .unwrap_or(false))
    }

    async fn insert_enrollment_request(&self, req: &EnrollmentRequest) -> StoreResult<()> {
        self.tables.write().await.requests.push(req.clone());
        Ok(())
    }

    async fn get_enrollment_request(&self, id: Uuid) -> StoreResult<Option<EnrollmentRequest>> {
        let t = self.tables.read().await;
        Ok(t.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn find_pending_request(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
    ) -> StoreResult<Option<EnrollmentRequest>> {
        let t = self.tables.read().await;
        Ok(t
            .requests
            .iter()
            .find(|r| {
                r.learner_id == learner_id
                    && r.cohort_id == cohort_id
                    && r.status == RequestStatus::Pending
            })
            .cloned())
    }

    async fn list_pending_requests(&self) -> StoreResult<Vec<EnrollmentRequest>> {
        let t = self.tables.read().await;
        Ok(t
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_requests_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<EnrollmentRequest>> {
        let t = self.tables.read().await;
        Ok(t.requests.iter().filter(|r| r.learner_id == learner_id).cloned().collect())
    }

    async fn resolve_enrollment_request(
        &self,
        id: Uuid,
        review: &Review<RequestStatus>,
    ) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        let Some(req) = t
            .requests
            .iter_mut()
            .find(|r| r.id == id && r.status == RequestStatus::Pending)
        else {
            return Ok(false);
        };
        req.status = review.status;
        req.rejection_reason = review.notes.clone();
        req.reviewed_by = Some(review.reviewed_by);
        req.reviewed_at = Some(review.reviewed_at);
        Ok(true)
    }

    async fn insert_progress(&self, progress: &LearnerProgress) -> StoreResult<()> {
        self.tables.write().await.progress.push(progress.clone());
        Ok(())
    }

    async fn list_progress_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<LearnerProgress>> {
        let t = self.tables.read().await;
        Ok(t.progress.iter().filter(|p| p.learner_id == learner_id).cloned().collect())
    }

    async fn list_progress_for_cohort(&self, cohort_id: Uuid) -> StoreResult<Vec<LearnerProgress>> {
        let t = self.tables.read().await;
        Ok(t.progress.iter().filter(|p| p.cohort_id == cohort_id).cloned().collect())
    }

    async fn update_progress(&self, progress: &LearnerProgress) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        let Some(row) = t
            .progress
            .iter_mut()
            .find(|p| p.id == progress.id && p.version == progress.version)
        else {
            return Ok(false);
        };
        *row = LearnerProgress {
            version: progress.version + 1,
            updated_at: Utc::now(),
            ..progress.clone()
        };
        Ok(true)
    }

    async fn set_progress_status(&self, id: Uuid, status: ProgressStatus) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(match t.progress.iter_mut().find(|p| p.id == id) {
            Some(row) => {
                row.status = status;
                row.version += 1;
                row.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn upsert_submission(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
        lesson_id: Uuid,
        content: &str,
    ) -> StoreResult<Submission> {
        let mut t = self.tables.write().await;
        let now = Utc::now();
        if let Some(existing) = t.submissions.iter_mut().find(|s| {
            s.learner_id == learner_id && s.lesson_id == lesson_id && s.cohort_id == cohort_id
        }) {
            existing.content = content.to_string();
            existing.status = SubmissionStatus::Pending;
            existing.grade = None;
            existing.feedback = None;
            existing.graded_at = None;
            existing.graded_by = None;
            existing.submitted_at = now;
            return Ok(existing.clone());
        }

        let sub = Submission {
            id: Uuid::new_v4(),
            learner_id,
            cohort_id,
            lesson_id,
            content: content.to_string(),
            grade: None,
            feedback: None,
            status: SubmissionStatus::Pending,
            submitted_at: now,
            graded_at: None,
            graded_by: None,
        };
        t.submissions.push(sub.clone());
        Ok(sub)
    }

    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        let t = self.tables.read().await;
        Ok(t.submissions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_submissions_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<Submission>> {
        let t = self.tables.read().await;
        Ok(t.submissions.iter().filter(|s| s.learner_id == learner_id).cloned().collect())
    }

    async fn list_pending_submissions(&self) -> StoreResult<Vec<Submission>> {
        let t = self.tables.read().await;
        Ok(t
            .submissions
            .iter()
            .filter(|s| s.status == SubmissionStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_graded_submissions(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
    ) -> StoreResult<Vec<Submission>> {
        let t = self.tables.read().await;
        Ok(t
            .submissions
            .iter()
            .filter(|s| {
                s.learner_id == learner_id
                    && s.cohort_id == cohort_id
                    && s.status == SubmissionStatus::Graded
            })
            .cloned()
            .collect())
    }

    async fn record_grade(&self, id: Uuid, entry: &GradeEntry) -> StoreResult<Option<Submission>> {
        let mut t = self.tables.write().await;
        Ok(t.submissions.iter_mut().find(|s| s.id == id).map(|s| {
            s.grade = Some(entry.grade);
            s.feedback = Some(entry.feedback.clone());
            s.status = SubmissionStatus::Graded;
            s.graded_by = Some(entry.graded_by);
            s.graded_at = Some(entry.graded_at);
            s.clone()
        }))
    }

    async fn insert_drop_recommendation(&self, rec: &DropRecommendation) -> StoreResult<()> {
        self.tables.write().await.drops.push(rec.clone());
        Ok(())
    }

    async fn get_drop_recommendation(&self, id: Uuid) -> StoreResult<Option<DropRecommendation>> {
        let t = self.tables.read().await;
        Ok(t.drops.iter().find(|d| d.id == id).cloned())
    }

    async fn list_drop_recommendations(
        &self,
        learner_id: Option<Uuid>,
    ) -> StoreResult<Vec<DropRecommendation>> {
        let t = self.tables.read().await;
        Ok(t
            .drops
            .iter()
            .filter(|d| learner_id.map_or(true, |id| d.learner_id == id))
            .cloned()
            .collect())
    }

    async fn transition_drop_recommendation(
        &self,
        id: Uuid,
        from: &[DropStatus],
        review: &Review<DropStatus>,
    ) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        let Some(rec) = t
            .drops
            .iter_mut()
            .find(|d| d.id == id && from.contains(&d.status))
        else {
            return Ok(false);
        };
        rec.status = review.status;
        rec.reviewed_by = Some(review.reviewed_by);
        rec.reviewed_at = Some(review.reviewed_at);
        rec.review_notes = review.notes.clone();
        Ok(true)
    }

    async fn mark_drop_appealed(&self, id: Uuid, from: &[DropStatus]) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(match t.drops.iter_mut().find(|d| d.id == id && from.contains(&d.status)) {
            Some(rec) => {
                rec.status = DropStatus::Appealed;
                true
            }
            None => false,
        })
    }

    async fn insert_appeal(&self, appeal: &Appeal) -> StoreResult<()> {
        self.tables.write().await.appeals.push(appeal.clone());
        Ok(())
    }

    async fn get_appeal(&self, id: Uuid) -> StoreResult<Option<Appeal>> {
        let t = self.tables.read().await;
        Ok(t.appeals.iter().find(|a| a.id == id).cloned())
    }

    async fn list_appeals(&self, learner_id: Option<Uuid>) -> StoreResult<Vec<Appeal>> {
        let t = self.tables.read().await;
        Ok(t
            .appeals
            .iter()
            .filter(|a| learner_id.map_or(true, |id| a.learner_id == id))
            .cloned()
            .collect())
    }

    async fn resolve_appeal(&self, id: Uuid, review: &Review<RequestStatus>) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        let Some(appeal) = t
            .appeals
            .iter_mut()
            .find(|a| a.id == id && a.status == RequestStatus::Pending)
        else {
            return Ok(false);
        };
        appeal.status = review.status;
        appeal.reviewed_by = Some(review.reviewed_by);
        appeal.reviewed_at = Some(review.reviewed_at);
        appeal.review_notes = review.notes.clone();
        Ok(true)
    }

    async fn insert_grace_period(&self, grace: &GracePeriod) -> StoreResult<()> {
        self.tables.write().await.grace_periods.push(grace.clone());
        Ok(())
    }

    async fn list_grace_periods(&self, learner_id: Option<Uuid>) -> StoreResult<Vec<GracePeriod>> {
        let t = self.tables.read().await;
        Ok(t
            .grace_periods
            .iter()
            .filter(|g| learner_id.map_or(true, |id| g.learner_id == id))
            .cloned()
            .collect())
    }

    async fn append_audit(&self, entry: &AuditLog) -> StoreResult<()> {
        self.tables.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditLog>> {
        let t = self.tables.read().await;
        Ok(t.audit.iter().rev().take(limit).cloned().collect())
    }
}
