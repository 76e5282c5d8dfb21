use std::{collections::HashMap, str::FromStr};

use async_trait::async_trait;
use sqlx::{postgres::PgRow, types::Json, Row};
use uuid::Uuid;

use super::{GradeEntry, Store, StoreError, StoreResult};
use crate::{db::Db, models::*};

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn parse<T: FromStr<Err = String>>(row: &PgRow, column: &str) -> StoreResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(StoreError::Corrupt)
}

fn unique_as_duplicate(what: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Duplicate(what)
        }
        _ => StoreError::Database(e),
    }
}

fn labels<T: Copy>(values: &[T], label: fn(T) -> &'static str) -> Vec<String> {
    values.iter().map(|v| label(*v).to_string()).collect()
}

// --- row mapping ---

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: parse(row, "role")?,
        status: parse(row, "status")?,
        active_cohort_id: row.try_get("active_cohort_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn cohort_from_row(row: &PgRow) -> StoreResult<Cohort> {
    Ok(Cohort {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        status: parse(row, "status")?,
        instructor_ids: row.try_get("instructor_ids")?,
        learner_ids: row.try_get("learner_ids")?,
        course_ids: row.try_get("course_ids")?,
        performance_threshold: row.try_get("performance_threshold")?,
        weekly_target_hours: row.try_get("weekly_target_hours")?,
        grace_period_days: row.try_get("grace_period_days")?,
        created_at: row.try_get("created_at")?,
    })
}

fn course_from_row(row: &PgRow) -> StoreResult<Course> {
    Ok(Course {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        instructor_id: row.try_get("instructor_id")?,
        registrars: row.try_get("registrars")?,
        modules: Vec::new(),
        created_at: row.try_get("created_at")?,
    })
}

fn module_from_row(row: &PgRow) -> StoreResult<Module> {
    Ok(Module {
        id: row.try_get("id")?,
        course_id: row.try_get("course_id")?,
        title: row.try_get("title")?,
        position: row.try_get("position")?,
        lessons: Vec::new(),
    })
}

fn lesson_from_row(row: &PgRow) -> StoreResult<Lesson> {
    let assignment: Option<Json<Assignment>> = row.try_get("assignment")?;
    Ok(Lesson {
        id: row.try_get("id")?,
        module_id: row.try_get("module_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        position: row.try_get("position")?,
        assignment: assignment.map(|a| a.0),
    })
}

fn request_from_row(row: &PgRow) -> StoreResult<EnrollmentRequest> {
    Ok(EnrollmentRequest {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        course_id: row.try_get("course_id")?,
        cohort_id: row.try_get("cohort_id")?,
        status: parse(row, "status")?,
        reason: row.try_get("reason")?,
        rejection_reason: row.try_get("rejection_reason")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn progress_from_row(row: &PgRow) -> StoreResult<LearnerProgress> {
    let modules: Json<Vec<ModuleProgress>> = row.try_get("module_progress")?;
    Ok(LearnerProgress {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        cohort_id: row.try_get("cohort_id")?,
        course_id: row.try_get("course_id")?,
        completed_lessons: row.try_get("completed_lessons")?,
        module_progress: modules.0,
        current_score: row.try_get("current_score")?,
        learning_hours_this_week: row.try_get("learning_hours_this_week")?,
        status: parse(row, "status")?,
        inactivity_days: row.try_get("inactivity_days")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn submission_from_row(row: &PgRow) -> StoreResult<Submission> {
    Ok(Submission {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        cohort_id: row.try_get("cohort_id")?,
        lesson_id: row.try_get("lesson_id")?,
        content: row.try_get("content")?,
        grade: row.try_get("grade")?,
        feedback: row.try_get("feedback")?,
        status: parse(row, "status")?,
        submitted_at: row.try_get("submitted_at")?,
        graded_at: row.try_get("graded_at")?,
        graded_by: row.try_get("graded_by")?,
    })
}

fn drop_from_row(row: &PgRow) -> StoreResult<DropRecommendation> {
    Ok(DropRecommendation {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        cohort_id: row.try_get("cohort_id")?,
        instructor_id: row.try_get("instructor_id")?,
        reason: row.try_get("reason")?,
        evidence: row.try_get("evidence")?,
        status: parse(row, "status")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        review_notes: row.try_get("review_notes")?,
        created_at: row.try_get("created_at")?,
    })
}

fn appeal_from_row(row: &PgRow) -> StoreResult<Appeal> {
    Ok(Appeal {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        cohort_id: row.try_get("cohort_id")?,
        drop_recommendation_id: row.try_get("drop_recommendation_id")?,
        reason: row.try_get("reason")?,
        status: parse(row, "status")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        review_notes: row.try_get("review_notes")?,
        created_at: row.try_get("created_at")?,
    })
}

fn grace_from_row(row: &PgRow) -> StoreResult<GracePeriod> {
    Ok(GracePeriod {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        cohort_id: row.try_get("cohort_id")?,
        granted_by: row.try_get("granted_by")?,
        extension_days: row.try_get("extension_days")?,
        original_deadline: row.try_get("original_deadline")?,
        new_deadline: row.try_get("new_deadline")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> StoreResult<AuditLog> {
    let details: Json<serde_json::Value> = row.try_get("details")?;
    Ok(AuditLog {
        id: row.try_get("id")?,
        actor: row.try_get("actor")?,
        action: row.try_get("action")?,
        target_user: row.try_get("target_user")?,
        target_cohort: row.try_get("target_cohort")?,
        details: details.0,
        timestamp: row.try_get("logged_at")?,
    })
}

fn collect<T>(rows: &[PgRow], map: fn(&PgRow) -> StoreResult<T>) -> StoreResult<Vec<T>> {
    rows.iter().map(map).collect()
}

impl PgStore {
    /// Loads modules and lessons for the given courses and hangs them under
    /// their parents, ordered by position.
    async fn attach_modules(&self, courses: &mut [Course]) -> StoreResult<()> {
        let ids: Vec<Uuid> = courses.iter().map(|c| c.id).collect();
        let module_rows = sqlx::query(
            "SELECT * FROM course_modules WHERE course_id = ANY($1) ORDER BY position, title",
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;
        let mut modules = collect(&module_rows, module_from_row)?;

        let module_ids: Vec<Uuid> = modules.iter().map(|m| m.id).collect();
        let lesson_rows = sqlx::query(
            "SELECT * FROM lessons WHERE module_id = ANY($1) ORDER BY position, title",
        )
        .bind(&module_ids)
        .fetch_all(&self.db)
        .await?;

        let mut lessons_by_module: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
        for lesson in collect(&lesson_rows, lesson_from_row)? {
            lessons_by_module.entry(lesson.module_id).or_default().push(lesson);
        }
        for module in modules.iter_mut() {
            module.lessons = lessons_by_module.remove(&module.id).unwrap_or_default();
        }

        let mut modules_by_course: HashMap<Uuid, Vec<Module>> = HashMap::new();
        for module in modules {
            modules_by_course.entry(module.course_id).or_default().push(module);
        }
        for course in courses.iter_mut() {
            course.modules = modules_by_course.remove(&course.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, status, active_cohort_id, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.active_cohort_id)
        .bind(user.created_at)
        .execute(&self.db)
        .await
        .map_err(unique_as_duplicate("email"))?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email=$1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_user_status(&self, id: Uuid, status: UserStatus) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET status=$2 WHERE id=$1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_active_cohort(&self, id: Uuid, cohort_id: Option<Uuid>) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET active_cohort_id=$2 WHERE id=$1")
            .bind(id)
            .bind(cohort_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_cohort(&self, cohort: &Cohort) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cohorts (id, name, start_date, end_date, status, instructor_ids, learner_ids,
                                 course_ids, performance_threshold, weekly_target_hours,
                                 grace_period_days, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(cohort.id)
        .bind(&cohort.name)
        .bind(cohort.start_date)
        .bind(cohort.end_date)
        .bind(cohort.status.as_str())
        .bind(&cohort.instructor_ids)
        .bind(&cohort.learner_ids)
        .bind(&cohort.course_ids)
        .bind(cohort.performance_threshold)
        .bind(cohort.weekly_target_hours)
        .bind(cohort.grace_period_days)
        .bind(cohort.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_cohort(&self, id: Uuid) -> StoreResult<Option<Cohort>> {
        let row = sqlx::query("SELECT * FROM cohorts WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(cohort_from_row).transpose()
    }

    async fn list_cohorts(&self) -> StoreResult<Vec<Cohort>> {
        let rows = sqlx::query("SELECT * FROM cohorts ORDER BY created_at")
            .fetch_all(&self.db)
            .await?;
        collect(&rows, cohort_from_row)
    }

    async fn set_cohort_status(&self, id: Uuid, status: CohortStatus) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE cohorts SET status=$2 WHERE id=$1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn add_cohort_learner(&self, cohort_id: Uuid, learner_id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE cohorts SET learner_ids = array_append(learner_ids, $2) \
             WHERE id=$1 AND NOT ($2 = ANY(learner_ids))",
        )
        .bind(cohort_id)
        .bind(learner_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn add_cohort_course(&self, cohort_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE cohorts SET course_ids = array_append(course_ids, $2) \
             WHERE id=$1 AND NOT ($2 = ANY(course_ids))",
        )
        .bind(cohort_id)
        .bind(course_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn remove_cohort_course(&self, cohort_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE cohorts SET course_ids = array_remove(course_ids, $2) \
             WHERE id=$1 AND $2 = ANY(course_ids)",
        )
        .bind(cohort_id)
        .bind(course_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_course(&self, course: &Course) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, title, description, instructor_id, registrars, created_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            "#,
        )
        .bind(course.id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.instructor_id)
        .bind(&course.registrars)
        .bind(course.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert_module(&self, module: &Module) -> StoreResult<()> {
        sqlx::query("INSERT INTO course_modules (id, course_id, title, position) VALUES ($1,$2,$3,$4)")
            .bind(module.id)
            .bind(module.course_id)
            .bind(&module.title)
            .bind(module.position)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_lesson(&self, lesson: &Lesson) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lessons (id, module_id, title, content, position, assignment)
            VALUES ($1,$2,$3,$4,$5,$6)
            "#,
        )
        .bind(lesson.id)
        .bind(lesson.module_id)
        .bind(&lesson.title)
        .bind(&lesson.content)
        .bind(lesson.position)
        .bind(lesson.assignment.as_ref().map(Json))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        let row = sqlx::query("SELECT * FROM courses WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut courses = vec![course_from_row(&row)?];
        self.attach_modules(&mut courses).await?;
        Ok(courses.pop())
    }

    async fn list_courses(&self) -> StoreResult<Vec<Course>> {
        let rows = sqlx::query("SELECT * FROM courses ORDER BY created_at")
            .fetch_all(&self.db)
            .await?;
        let mut courses = collect(&rows, course_from_row)?;
        self.attach_modules(&mut courses).await?;
        Ok(courses)
    }

    async fn get_module(&self, id: Uuid) -> StoreResult<Option<Module>> {
        let row = sqlx::query("SELECT * FROM course_modules WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut module = module_from_row(&row)?;
        let lesson_rows = sqlx::query("SELECT * FROM lessons WHERE module_id=$1 ORDER BY position, title")
            .bind(id)
            .fetch_all(&self.db)
            .await?;
        module.lessons = collect(&lesson_rows, lesson_from_row)?;
        Ok(Some(module))
    }

    async fn get_lesson(&self, id: Uuid) -> StoreResult<Option<Lesson>> {
        let row = sqlx::query("SELECT * FROM lessons WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(lesson_from_row).transpose()
    }

    async fn add_course_registrar(&self, course_id: Uuid, learner_id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE courses SET registrars = array_append(registrars, $2) \
             WHERE id=$1 AND NOT ($2 = ANY(registrars))",
        )
        .bind(course_id)
        .bind(learner_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_enrollment_request(&self, req: &EnrollmentRequest) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO enrollment_requests (id, learner_id, course_id, cohort_id, status, reason, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(req.id)
        .bind(req.learner_id)
        .bind(req.course_id)
        .bind(req.cohort_id)
        .bind(req.status.as_str())
        .bind(&req.reason)
        .bind(req.created_at)
        .execute(&self.db)
        .await
        .map_err(unique_as_duplicate("pending application"))?;
        Ok(())
    }

    async fn get_enrollment_request(&self, id: Uuid) -> StoreResult<Option<EnrollmentRequest>> {
        let row = sqlx::query("SELECT * FROM enrollment_requests WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn find_pending_request(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
    ) -> StoreResult<Option<EnrollmentRequest>> {
        let row = sqlx::query(
            "SELECT * FROM enrollment_requests WHERE learner_id=$1 AND cohort_id=$2 AND status='pending'",
        )
        .bind(learner_id)
        .bind(cohort_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn list_pending_requests(&self) -> StoreResult<Vec<EnrollmentRequest>> {
        let rows = sqlx::query("SELECT * FROM enrollment_requests WHERE status='pending' ORDER BY created_at")
            .fetch_all(&self.db)
            .await?;
        collect(&rows, request_from_row)
    }

    async fn list_requests_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<EnrollmentRequest>> {
        let rows = sqlx::query("SELECT * FROM enrollment_requests WHERE learner_id=$1 ORDER BY created_at")
            .bind(learner_id)
            .fetch_all(&self.db)
            .await?;
        collect(&rows, request_from_row)
    }

    async fn resolve_enrollment_request(
        &self,
        id: Uuid,
        review: &Review<RequestStatus>,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE enrollment_requests
            SET status=$2, rejection_reason=$3, reviewed_by=$4, reviewed_at=$5
            WHERE id=$1 AND status='pending'
            "#,
        )
        .bind(id)
        .bind(review.status.as_str())
        .bind(&review.notes)
        .bind(review.reviewed_by)
        .bind(review.reviewed_at)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_progress(&self, progress: &LearnerProgress) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO learner_progress (id, learner_id, cohort_id, course_id, completed_lessons,
                                          module_progress, current_score, learning_hours_this_week,
                                          status, inactivity_days, version, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
        )
        .bind(progress.id)
        .bind(progress.learner_id)
        .bind(progress.cohort_id)
        .bind(progress.course_id)
        .bind(&progress.completed_lessons)
        .bind(Json(&progress.module_progress))
        .bind(progress.current_score)
        .bind(progress.learning_hours_this_week)
        .bind(progress.status.as_str())
        .bind(progress.inactivity_days)
        .bind(progress.version)
        .bind(progress.created_at)
        .bind(progress.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_progress_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<LearnerProgress>> {
        let rows = sqlx::query("SELECT * FROM learner_progress WHERE learner_id=$1 ORDER BY created_at")
            .bind(learner_id)
            .fetch_all(&self.db)
            .await?;
        collect(&rows, progress_from_row)
    }

    async fn list_progress_for_cohort(&self, cohort_id: Uuid) -> StoreResult<Vec<LearnerProgress>> {
        let rows = sqlx::query("SELECT * FROM learner_progress WHERE cohort_id=$1 ORDER BY created_at")
            .bind(cohort_id)
            .fetch_all(&self.db)
            .await?;
        collect(&rows, progress_from_row)
    }

    async fn update_progress(&self, progress: &LearnerProgress) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE learner_progress
            SET completed_lessons=$3, module_progress=$4, current_score=$5,
                learning_hours_this_week=$6, status=$7, inactivity_days=$8,
                version = version + 1, updated_at = now()
            WHERE id=$1 AND version=$2
            "#,
        )
        .bind(progress.id)
        .bind(progress.version)
        .bind(&progress.completed_lessons)
        .bind(Json(&progress.module_progress))
        .bind(progress.current_score)
        .bind(progress.learning_hours_this_week)
        .bind(progress.status.as_str())
        .bind(progress.inactivity_days)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_progress_status(&self, id: Uuid, status: ProgressStatus) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE learner_progress SET status=$2, version = version + 1, updated_at = now() WHERE id=$1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn upsert_submission(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
        lesson_id: Uuid,
        content: &str,
    ) -> StoreResult<Submission> {
        let row = sqlx::query(
            r#"
            INSERT INTO submissions (id, learner_id, cohort_id, lesson_id, content, status, submitted_at)
            VALUES ($1,$2,$3,$4,$5,'pending', now())
            ON CONFLICT (learner_id, lesson_id, cohort_id)
            DO UPDATE SET content=EXCLUDED.content, status='pending', grade=NULL, feedback=NULL,
                          graded_at=NULL, graded_by=NULL, submitted_at=now()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(learner_id)
        .bind(cohort_id)
        .bind(lesson_id)
        .bind(content)
        .fetch_one(&self.db)
        .await?;
        submission_from_row(&row)
    }

    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        let row = sqlx::query("SELECT * FROM submissions WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(submission_from_row).transpose()
    }

    async fn list_submissions_for_learner(&self, learner_id: Uuid) -> StoreResult<Vec<Submission>> {
        let rows = sqlx::query("SELECT * FROM submissions WHERE learner_id=$1 ORDER BY submitted_at DESC")
            .bind(learner_id)
            .fetch_all(&self.db)
            .await?;
        collect(&rows, submission_from_row)
    }

    async fn list_pending_submissions(&self) -> StoreResult<Vec<Submission>> {
        let rows = sqlx::query("SELECT * FROM submissions WHERE status='pending' ORDER BY submitted_at")
            .fetch_all(&self.db)
            .await?;
        collect(&rows, submission_from_row)
    }

    async fn list_graded_submissions(
        &self,
        learner_id: Uuid,
        cohort_id: Uuid,
    ) -> StoreResult<Vec<Submission>> {
        let rows = sqlx::query(
            "SELECT * FROM submissions WHERE learner_id=$1 AND cohort_id=$2 AND status='graded'",
        )
        .bind(learner_id)
        .bind(cohort_id)
        .fetch_all(&self.db)
        .await?;
        collect(&rows, submission_from_row)
    }

    async fn record_grade(&self, id: Uuid, entry: &GradeEntry) -> StoreResult<Option<Submission>> {
        let row = sqlx::query(
            r#"
            UPDATE submissions
            SET grade=$2, feedback=$3, status='graded', graded_by=$4, graded_at=$5
            WHERE id=$1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(entry.grade)
        .bind(&entry.feedback)
        .bind(entry.graded_by)
        .bind(entry.graded_at)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(submission_from_row).transpose()
    }

    async fn insert_drop_recommendation(&self, rec: &DropRecommendation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO drop_recommendations (id, learner_id, cohort_id, instructor_id, reason,
                                              evidence, status, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(rec.id)
        .bind(rec.learner_id)
        .bind(rec.cohort_id)
        .bind(rec.instructor_id)
        .bind(&rec.reason)
        .bind(&rec.evidence)
        .bind(rec.status.as_str())
        .bind(rec.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_drop_recommendation(&self, id: Uuid) -> StoreResult<Option<DropRecommendation>> {
        let row = sqlx::query("SELECT * FROM drop_recommendations WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(drop_from_row).transpose()
    }

    async fn list_drop_recommendations(
        &self,
        learner_id: Option<Uuid>,
    ) -> StoreResult<Vec<DropRecommendation>> {
        let rows = sqlx::query(
            "SELECT * FROM drop_recommendations WHERE ($1::uuid IS NULL OR learner_id=$1) ORDER BY created_at DESC",
        )
        .bind(learner_id)
        .fetch_all(&self.db)
        .await?;
        collect(&rows, drop_from_row)
    }

    async fn transition_drop_recommendation(
        &self,
        id: Uuid,
        from: &[DropStatus],
        review: &Review<DropStatus>,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE drop_recommendations
            SET status=$3, reviewed_by=$4, reviewed_at=$5, review_notes=$6
            WHERE id=$1 AND status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(labels(from, DropStatus::as_str))
        .bind(review.status.as_str())
        .bind(review.reviewed_by)
        .bind(review.reviewed_at)
        .bind(&review.notes)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn mark_drop_appealed(&self, id: Uuid, from: &[DropStatus]) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE drop_recommendations SET status='appealed' WHERE id=$1 AND status = ANY($2)")
            .bind(id)
            .bind(labels(from, DropStatus::as_str))
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_appeal(&self, appeal: &Appeal) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO appeals (id, learner_id, cohort_id, drop_recommendation_id, reason, status, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(appeal.id)
        .bind(appeal.learner_id)
        .bind(appeal.cohort_id)
        .bind(appeal.drop_recommendation_id)
        .bind(&appeal.reason)
        .bind(appeal.status.as_str())
        .bind(appeal.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_appeal(&self, id: Uuid) -> StoreResult<Option<Appeal>> {
        let row = sqlx::query("SELECT * FROM appeals WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(appeal_from_row).transpose()
    }

    async fn list_appeals(&self, learner_id: Option<Uuid>) -> StoreResult<Vec<Appeal>> {
        let rows = sqlx::query(
            "SELECT * FROM appeals WHERE ($1::uuid IS NULL OR learner_id=$1) ORDER BY created_at DESC",
        )
        .bind(learner_id)
        .fetch_all(&self.db)
        .await?;
        collect(&rows, appeal_from_row)
    }

    async fn resolve_appeal(&self, id: Uuid, review: &Review<RequestStatus>) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE appeals
            SET status=$2, reviewed_by=$3, reviewed_at=$4, review_notes=$5
            WHERE id=$1 AND status='pending'
            "#,
        )
        .bind(id)
        .bind(review.status.as_str())
        .bind(review.reviewed_by)
        .bind(review.reviewed_at)
        .bind(&review.notes)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_grace_period(&self, grace: &GracePeriod) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grace_periods (id, learner_id, cohort_id, granted_by, extension_days,
                                       original_deadline, new_deadline, expires_at, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(grace.id)
        .bind(grace.learner_id)
        .bind(grace.cohort_id)
        .bind(grace.granted_by)
        .bind(grace.extension_days)
        .bind(grace.original_deadline)
        .bind(grace.new_deadline)
        .bind(grace.expires_at)
        .bind(grace.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_grace_periods(&self, learner_id: Option<Uuid>) -> StoreResult<Vec<GracePeriod>> {
        let rows = sqlx::query(
            "SELECT * FROM grace_periods WHERE ($1::uuid IS NULL OR learner_id=$1) ORDER BY created_at DESC",
        )
        .bind(learner_id)
        .fetch_all(&self.db)
        .await?;
        collect(&rows, grace_from_row)
    }

    async fn append_audit(&self, entry: &AuditLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, actor, action, target_user, target_cohort, details, logged_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor)
        .bind(&entry.action)
        .bind(entry.target_user)
        .bind(entry.target_cohort)
        .bind(Json(&entry.details))
        .bind(entry.timestamp)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditLog>> {
        let rows = sqlx::query("SELECT * FROM audit_logs ORDER BY logged_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.db)
            .await?;
        collect(&rows, audit_from_row)
    }
}
