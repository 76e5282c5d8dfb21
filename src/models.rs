use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Declares a string-labelled enum whose labels are shared by serde and the
/// text columns of the Postgres schema.
macro_rules! labeled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} `{}`", stringify!($name), other)),
                }
            }
        }
    };
}

labeled_enum!(Role {
    Learner => "learner",
    Instructor => "instructor",
    Admin => "admin",
    SuperAdmin => "super-admin",
});

labeled_enum!(UserStatus {
    Active => "active",
    Inactive => "inactive",
    Dropped => "dropped",
});

labeled_enum!(CohortStatus {
    Upcoming => "upcoming",
    Active => "active",
    Completed => "completed",
    Archived => "archived",
});

labeled_enum!(AssignmentKind {
    Task => "task",
    Quiz => "quiz",
    Video => "video",
});

labeled_enum!(RequestStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

labeled_enum!(ProgressStatus {
    OnTrack => "on-track",
    AtRisk => "at-risk",
    UnderReview => "under-review",
    Dropped => "dropped",
    Failed => "failed",
});

labeled_enum!(SubmissionStatus {
    Pending => "pending",
    Graded => "graded",
});

labeled_enum!(DropStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Appealed => "appealed",
});

labeled_enum!(
    /// Where a learner stands in one cohort, derived from progress rows and
    /// enrollment requests.
    EnrollmentState {
        Idle => "idle",
        Applied => "applied",
        Enrolled => "enrolled",
        Dropped => "dropped",
    }
);

impl ProgressStatus {
    /// Rows in these states count as an active enrollment.
    pub fn is_active(self) -> bool {
        matches!(self, Self::OnTrack | Self::AtRisk | Self::UnderReview)
    }
}

impl CohortStatus {
    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Upcoming | Self::Active)
    }
}

// --- identity ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub active_cohort_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// --- cohorts ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Cohort {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: CohortStatus,
    pub instructor_ids: Vec<Uuid>,
    pub learner_ids: Vec<Uuid>,
    pub course_ids: Vec<Uuid>,
    pub performance_threshold: f64,
    pub weekly_target_hours: f64,
    pub grace_period_days: i32,
    pub created_at: DateTime<Utc>,
}

impl Cohort {
    pub fn has_instructor(&self, user_id: Uuid) -> bool {
        self.instructor_ids.contains(&user_id)
    }

    pub fn has_course(&self, course_id: Uuid) -> bool {
        self.course_ids.contains(&course_id)
    }
}

// --- catalog ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub instructor_id: Uuid,
    pub registrars: Vec<Uuid>,
    pub modules: Vec<Module>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Module {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub position: i32,
    pub lessons: Vec<Lesson>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Lesson {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub content: String,
    pub position: i32,
    pub assignment: Option<Assignment>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Assignment {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: AssignmentKind,
    #[serde(default)]
    pub questions: Vec<Question>,
    pub max_score: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
}

// --- enrollment ---

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnrollmentRequest {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub course_id: Uuid,
    pub cohort_id: Uuid,
    pub status: RequestStatus,
    pub reason: String,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Terminal decision stamped onto a reviewable record.
#[derive(Debug, Clone)]
pub struct Review<S> {
    pub status: S,
    pub reviewed_by: Uuid,
    pub reviewed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

// --- progress ---

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LearnerProgress {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub cohort_id: Uuid,
    pub course_id: Option<Uuid>,
    pub completed_lessons: Vec<Uuid>,
    pub module_progress: Vec<ModuleProgress>,
    /// Always on the 0-100 scale.
    pub current_score: f64,
    pub learning_hours_this_week: f64,
    pub status: ProgressStatus,
    pub inactivity_days: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LearnerProgress {
    pub fn new(learner_id: Uuid, cohort_id: Uuid, course_id: Option<Uuid>, initial_score: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            learner_id,
            cohort_id,
            course_id,
            completed_lessons: Vec::new(),
            module_progress: Vec::new(),
            current_score: initial_score,
            learning_hours_this_week: 0.0,
            status: ProgressStatus::OnTrack,
            inactivity_days: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModuleProgress {
    pub module_id: Uuid,
    /// Percent scores (0-100) of every graded lesson in the module.
    pub scores: Vec<f64>,
    pub average_score: f64,
    pub is_graduated: bool,
}

// --- submissions ---

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub cohort_id: Uuid,
    pub lesson_id: Uuid,
    pub content: String,
    /// Raw grade on the 0-10 entry scale.
    pub grade: Option<f64>,
    pub feedback: Option<String>,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<Uuid>,
}

// --- review workflow ---

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DropRecommendation {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub cohort_id: Uuid,
    pub instructor_id: Uuid,
    pub reason: String,
    pub evidence: Option<String>,
    pub status: DropStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Appeal {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub cohort_id: Uuid,
    pub drop_recommendation_id: Uuid,
    pub reason: String,
    pub status: RequestStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GracePeriod {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub cohort_id: Uuid,
    pub granted_by: Uuid,
    pub extension_days: i32,
    pub original_deadline: NaiveDate,
    pub new_deadline: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor: Uuid,
    pub action: String,
    pub target_user: Option<Uuid>,
    pub target_cohort: Option<Uuid>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

// --- request payloads ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterReq {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateCohortReq {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: Option<CohortStatus>,
    #[serde(default)]
    pub instructor_ids: Vec<Uuid>,
    #[serde(default)]
    pub course_ids: Vec<Uuid>,
    pub performance_threshold: f64,
    pub weekly_target_hours: f64,
    pub grace_period_days: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CohortStatusReq {
    pub status: CohortStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JoinCohortReq {
    pub cohort_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApplyReq {
    pub cohort_id: Uuid,
    pub course_id: Uuid,
    #[serde(default)]
    pub reason: String,
}

labeled_enum!(ApplicationAction {
    Approve => "approve",
    Reject => "reject",
});

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApplicationActionReq {
    pub action: ApplicationAction,
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateCourseReq {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateModuleReq {
    pub course_id: Uuid,
    pub title: String,
    pub position: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateLessonReq {
    pub module_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub position: Option<i32>,
    pub assignment: Option<Assignment>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitReq {
    pub lesson_id: Uuid,
    pub cohort_id: Uuid,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GradeReq {
    pub submission_id: Uuid,
    pub grade: f64,
    #[serde(default)]
    pub feedback: String,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GradeOutcome {
    pub submission: Submission,
    pub progress: Option<LearnerProgress>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateDropReq {
    pub learner_id: Uuid,
    pub cohort_id: Uuid,
    pub reason: String,
    pub evidence: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateAppealReq {
    pub drop_recommendation_id: Uuid,
    pub reason: String,
}

/// Body of the review endpoints; `status` must be a terminal decision.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReviewReq {
    pub status: RequestStatus,
    pub review_notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateGracePeriodReq {
    pub learner_id: Uuid,
    pub cohort_id: Uuid,
    pub extension_days: i32,
    pub original_deadline: Option<NaiveDate>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RosterEntry {
    pub learner: User,
    pub progress: LearnerProgress,
    pub meets_threshold: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnrollmentStateView {
    pub cohort_id: Uuid,
    pub learner_id: Uuid,
    pub state: EnrollmentState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_serde_names() {
        assert_eq!(Role::SuperAdmin.as_str(), "super-admin");
        assert_eq!(
            serde_json::to_value(ProgressStatus::UnderReview).unwrap(),
            serde_json::json!("under-review")
        );
        assert_eq!("on-track".parse::<ProgressStatus>(), Ok(ProgressStatus::OnTrack));
        assert!("onTrack".parse::<ProgressStatus>().is_err());
    }

    #[test]
    fn assignment_kind_serializes_as_type() {
        let a = Assignment {
            title: "Quiz 1".into(),
            description: String::new(),
            kind: AssignmentKind::Quiz,
            questions: vec![],
            max_score: 10.0,
        };
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["type"], "quiz");
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let u = User {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: "secret".into(),
            role: Role::Learner,
            status: UserStatus::Active,
            active_cohort_id: None,
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(&u).unwrap();
        assert!(v.get("password_hash").is_none());
    }
}
