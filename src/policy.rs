//! Role → capability table. Every workflow asks here before touching the
//! store, so the whole authorization surface is this one match.

use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Cohort, Course, Role},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ManageUsers,
    ManageCohorts,
    ViewCohortRoster,
    JoinCohort,
    ApplyToCourse,
    ReviewApplications,
    AuthorCourses,
    SubmitWork,
    GradeSubmissions,
    RecommendDrop,
    ReviewDrops,
    FileAppeal,
    ReviewAppeals,
    GrantGracePeriod,
    ViewAuditLog,
}

pub fn allows(role: Role, action: Action) -> bool {
    use Action::*;
    use Role::*;

    match action {
        ManageUsers => matches!(role, SuperAdmin),
        ManageCohorts | ReviewDrops | ReviewAppeals | GrantGracePeriod | ViewAuditLog => {
            matches!(role, Admin | SuperAdmin)
        }
        ViewCohortRoster | ReviewApplications | AuthorCourses | GradeSubmissions | RecommendDrop => {
            matches!(role, Instructor | Admin | SuperAdmin)
        }
        JoinCohort | ApplyToCourse | SubmitWork | FileAppeal => matches!(role, Learner),
    }
}

/// The authenticated caller of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn require(&self, action: Action) -> Result<(), AppError> {
        if allows(self.role, action) {
            Ok(())
        } else {
            tracing::debug!(actor = %self.id, role = %self.role, ?action, "permission denied");
            Err(AppError::Forbidden)
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::SuperAdmin)
    }

    /// Instructors act only inside cohorts they teach; admins everywhere.
    pub fn require_cohort_scope(&self, cohort: &Cohort) -> Result<(), AppError> {
        if self.is_admin() || cohort.has_instructor(self.id) {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Instructors edit only the courses they created.
    pub fn require_course_owner(&self, course: &Course) -> Result<(), AppError> {
        if self.is_admin() || course.instructor_id == self.id {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learners_only_act_for_themselves() {
        assert!(allows(Role::Learner, Action::JoinCohort));
        assert!(allows(Role::Learner, Action::FileAppeal));
        assert!(!allows(Role::Learner, Action::GradeSubmissions));
        assert!(!allows(Role::Admin, Action::SubmitWork));
    }

    #[test]
    fn reviews_are_admin_only() {
        for action in [Action::ReviewDrops, Action::ReviewAppeals, Action::ViewAuditLog] {
            assert!(!allows(Role::Instructor, action));
            assert!(allows(Role::Admin, action));
            assert!(allows(Role::SuperAdmin, action));
        }
    }

    #[test]
    fn only_super_admin_manages_users() {
        assert!(allows(Role::SuperAdmin, Action::ManageUsers));
        assert!(!allows(Role::Admin, Action::ManageUsers));
    }

    #[test]
    fn require_maps_to_forbidden() {
        let actor = Actor::new(Uuid::new_v4(), Role::Learner);
        assert!(matches!(actor.require(Action::ReviewDrops), Err(AppError::Forbidden)));
    }
}
