use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit, auth,
    config::BootstrapAdmin,
    error::AppError,
    models::{AuthResponse, LoginReq, RegisterReq, Role, User, UserStatus},
    policy::{Action, Actor},
    state::AppState,
    store::StoreError,
};

const MIN_PASSWORD_LEN: usize = 8;

fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::validation("a valid email is required")),
    }
}

async fn create_account(state: &AppState, req: &RegisterReq, role: Role) -> Result<User, AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name is required"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let user = User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: normalize_email(&req.email)?,
        password_hash: auth::hash_password(&req.password)?,
        role,
        status: UserStatus::Active,
        active_cohort_id: None,
        created_at: Utc::now(),
    };
    match state.store.insert_user(&user).await {
        Ok(()) => Ok(user),
        Err(StoreError::Duplicate(_)) => Err(AppError::conflict("email already registered")),
        Err(e) => Err(e.into()),
    }
}

fn respond(state: &AppState, user: User) -> Result<AuthResponse, AppError> {
    let token = auth::issue_token(
        &state.config.jwt_secret,
        state.config.token_ttl_days,
        user.id,
        &user.email,
        user.role,
    )?;
    Ok(AuthResponse { user, token })
}

/// Self-service sign-up. Only learners and instructors may register
/// themselves.
pub async fn register(state: &AppState, req: RegisterReq) -> Result<AuthResponse, AppError> {
    let role = req.role.unwrap_or(Role::Learner);
    if !matches!(role, Role::Learner | Role::Instructor) {
        return Err(AppError::Forbidden);
    }
    let user = create_account(state, &req, role).await?;
    tracing::info!(user = %user.id, role = %user.role, "user registered");
    respond(state, user)
}

pub async fn login(state: &AppState, req: LoginReq) -> Result<AuthResponse, AppError> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if !auth::verify_password(&req.password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }
    respond(state, user)
}

pub async fn me(state: &AppState, actor: &Actor) -> Result<User, AppError> {
    state
        .store
        .get_user(actor.id)
        .await?
        .ok_or(AppError::Unauthorized)
}

/// Account creation by a super-admin, any role.
pub async fn create_user(state: &AppState, actor: &Actor, req: RegisterReq) -> Result<User, AppError> {
    actor.require(Action::ManageUsers)?;
    let role = req.role.unwrap_or(Role::Learner);
    let user = create_account(state, &req, role).await?;
    audit::record(
        state,
        actor,
        "user.create",
        Some(user.id),
        None,
        json!({ "role": user.role }),
    )
    .await;
    Ok(user)
}

/// Creates the configured super-admin unless the email is already taken.
pub async fn ensure_bootstrap_admin(state: &AppState, admin: &BootstrapAdmin) -> Result<(), AppError> {
    let email = normalize_email(&admin.email)?;
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Ok(());
    }
    let req = RegisterReq {
        name: "Super Admin".into(),
        email,
        password: admin.password.clone(),
        role: Some(Role::SuperAdmin),
    };
    let user = create_account(state, &req, Role::SuperAdmin).await?;
    tracing::info!(user = %user.id, "bootstrap super-admin created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM ").unwrap(), "ada@example.com");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("ada@localhost").is_err());
    }
}
