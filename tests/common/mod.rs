#![allow(dead_code)]

pub mod flaky;

use std::sync::Arc;

use chrono::NaiveDate;
use dexterhub::{
    accounts, catalog,
    config::{BootstrapAdmin, Config},
    models::*,
    policy::Actor,
    state::AppState,
    store::MemoryStore,
};

pub const SECRET: &str = "integration-secret-integration-secret";

pub fn state() -> Arc<AppState> {
    AppState::new(Arc::new(MemoryStore::new()), Config::for_memory(SECRET))
}

/// State over a [`flaky::FlakyStore`], returned alongside its failure knobs.
pub fn flaky_state() -> (Arc<AppState>, Arc<flaky::FlakyStore>) {
    let store = Arc::new(flaky::FlakyStore::default());
    (AppState::new(store.clone(), Config::for_memory(SECRET)), store)
}

pub fn actor(auth: &AuthResponse) -> Actor {
    Actor::new(auth.user.id, auth.user.role)
}

pub async fn register(state: &AppState, name: &str, role: Role) -> AuthResponse {
    accounts::register(
        state,
        RegisterReq {
            name: name.into(),
            email: format!("{}@dexterhub.test", name.to_lowercase()),
            password: "long-enough-password".into(),
            role: Some(role),
        },
    )
    .await
    .unwrap()
}

pub async fn super_admin(state: &AppState) -> AuthResponse {
    let admin = BootstrapAdmin {
        email: "root@dexterhub.test".into(),
        password: "root-password-123".into(),
    };
    accounts::ensure_bootstrap_admin(state, &admin).await.unwrap();
    accounts::login(
        state,
        LoginReq {
            email: admin.email,
            password: admin.password,
        },
    )
    .await
    .unwrap()
}

/// A course with one module holding `lessons` lessons, owned by `instructor`.
pub async fn course_with_lessons(state: &AppState, instructor: &Actor, lessons: usize) -> (Course, Module, Vec<Lesson>) {
    let course = catalog::create_course(
        state,
        instructor,
        CreateCourseReq {
            title: "Rust Foundations".into(),
            description: "Ownership and borrowing".into(),
        },
    )
    .await
    .unwrap();
    let module = catalog::add_module(
        state,
        instructor,
        CreateModuleReq {
            course_id: course.id,
            title: "M1".into(),
            position: None,
        },
    )
    .await
    .unwrap();
    let mut out = Vec::new();
    for i in 0..lessons {
        let lesson = catalog::add_lesson(
            state,
            instructor,
            CreateLessonReq {
                module_id: module.id,
                title: format!("Lesson {}", i + 1),
                content: String::new(),
                position: None,
                assignment: None,
            },
        )
        .await
        .unwrap();
        out.push(lesson);
    }
    (course, module, out)
}

pub async fn cohort(
    state: &AppState,
    admin: &Actor,
    instructor: &Actor,
    courses: Vec<uuid::Uuid>,
    status: CohortStatus,
) -> Cohort {
    catalog::create_cohort(
        state,
        admin,
        CreateCohortReq {
            name: "Autumn".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 15).unwrap(),
            status: Some(status),
            instructor_ids: vec![instructor.id],
            course_ids: courses,
            performance_threshold: 60.0,
            weekly_target_hours: 8.0,
            grace_period_days: 7,
        },
    )
    .await
    .unwrap()
}
