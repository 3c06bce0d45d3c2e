use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::registry::User;
use crate::models::user::{CreateUserRequest, DeleteUserRequest, UpdateUserRequest, UserInfo};
use crate::state::AppState;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_users))
        .route("/list", get(list_users))
        .route("/create", post(create_user))
        .route("/update", post(update_user))
        .route("/delete", post(delete_user))
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    user.require_admin()?;
    let users: Vec<UserInfo> = state.registry.data().users.values().map(UserInfo::from).collect();
    Ok(Json(json!({ "users": users })))
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<UserInfo>, AppError> {
    user.require_admin()?;
    let name = body.name.trim().to_string();
    if name.is_empty() || body.password.is_empty() {
        return Err(AppError::BadRequest("User name and password are required".into()));
    }

    let created = state.registry.mutate(|data| {
        if data.users.contains_key(&name) {
            return Err(AppError::Conflict(format!("User already exists: {}", name)));
        }
        let created = User {
            name: name.clone(),
            password: body.password.clone(),
            is_admin: body.is_admin,
        };
        data.users.insert(name.clone(), created.clone());
        Ok(created)
    })?;

    tracing::info!(user = %name, admin = created.is_admin, by = %user.name, "Created user");
    Ok(Json(UserInfo::from(&created)))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<UserInfo>, AppError> {
    user.require_admin()?;
    let updated = state.registry.mutate(|data| {
        let existing = data
            .users
            .get_mut(&body.name)
            .ok_or_else(|| AppError::NotFound(format!("User not found: {}", body.name)))?;
        if let Some(password) = body.password.as_ref().filter(|p| !p.is_empty()) {
            existing.password = password.clone();
        }
        if let Some(is_admin) = body.is_admin {
            existing.is_admin = is_admin;
        }
        Ok(existing.clone())
    })?;
    Ok(Json(UserInfo::from(&updated)))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<DeleteUserRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_admin()?;
    state.registry.mutate(|data| {
        if data.users.remove(&body.name).is_none() {
            return Err(AppError::NotFound(format!("User not found: {}", body.name)));
        }
        for site in data.sites.values_mut() {
            site.users.retain(|u| u != &body.name);
        }
        Ok(())
    })?;

    tracing::info!(user = %body.name, by = %user.name, "Deleted user");
    Ok(Json(json!({ "message": format!("User {} deleted", body.name) })))
}
