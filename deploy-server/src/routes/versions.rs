use crate::auth::{accessible_site, AuthUser};
use crate::error::AppError;
use crate::models::site::{RollbackRequest, SiteQuery};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use deploy_core::versions::{short_id, RestoreOutcome, VersionRecord, VersionStore};
use serde::Serialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/versions", get(list_versions))
        .route("/rollback", post(rollback))
}

fn versions(state: &AppState) -> Result<&VersionStore, AppError> {
    state
        .versions
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("Versioning is disabled on this server".into()))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SiteQuery>,
) -> Result<Json<Vec<VersionRecord>>, AppError> {
    let name = query
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("Site name is required".into()))?;
    accessible_site(&state, &user, &name)?;
    let store = versions(&state)?;
    let site_dir = state.site_dir(&name)?;

    let _guard = state.read_site(&name).await;
    let records = store.list(&site_dir, query.limit).await?;
    Ok(Json(records))
}

#[derive(Debug, Serialize)]
struct RollbackResponse {
    message: String,
    restored: bool,
    version: Option<VersionRecord>,
}

async fn rollback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<RollbackRequest>,
) -> Result<Json<RollbackResponse>, AppError> {
    if body.hash.trim().is_empty() {
        return Err(AppError::BadRequest("Version hash is required".into()));
    }
    accessible_site(&state, &user, &body.name)?;
    let store = versions(&state)?;
    let site_dir = state.site_dir(&body.name)?;

    let _guard = state.write_site(&body.name).await;
    accessible_site(&state, &user, &body.name)?;
    if !site_dir.is_dir() {
        return Err(AppError::NotFound(format!("Site directory missing: {}", body.name)));
    }
    let outcome = store
        .restore(&site_dir, body.hash.trim(), body.message.as_deref(), &user.name)
        .await?;

    let response = match outcome {
        RestoreOutcome::Restored(record) => {
            tracing::info!(site = %body.name, target = %body.hash, version = %record.id, "Rolled back site");
            RollbackResponse {
                message: format!("Rolled back {} to {}", body.name, short_id(body.hash.trim())),
                restored: true,
                version: Some(record),
            }
        }
        RestoreOutcome::Unchanged => RollbackResponse {
            message: format!("{} already matches {}", body.name, short_id(body.hash.trim())),
            restored: false,
            version: None,
        },
    };
    Ok(Json(response))
}
