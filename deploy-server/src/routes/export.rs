use crate::auth::{accessible_site, AuthUser};
use crate::error::AppError;
use crate::models::site::SiteQuery;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use deploy_core::archive::{pack_to_vec, PackSelection};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/export", get(export_site))
}

/// The live tree of a site as tar+gzip, without hidden entries.
async fn export_site(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SiteQuery>,
) -> Result<impl IntoResponse, AppError> {
    let name = query
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("Site name is required".into()))?;
    accessible_site(&state, &user, &name)?;
    let site_dir = state.site_dir(&name)?;

    let _guard = state.read_site(&name).await;
    accessible_site(&state, &user, &name)?;
    let archive = tokio::task::spawn_blocking(move || pack_to_vec(&site_dir, &PackSelection::All))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;

    tracing::info!(site = %name, bytes = archive.len(), "Exported site");
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.tar.gz\"", name),
            ),
        ],
        archive,
    ))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use axum::body::to_bytes;
    use axum::http::{header, StatusCode};
    use deploy_core::archive::unpack_bytes;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_excludes_history() {
        let (_dir, state) = test_state();
        create_site(&state, "blog").await;
        let site = state.config.web_root.join("blog");
        fs::create_dir_all(site.join("css")).unwrap();
        fs::write(site.join("index.html"), "home").unwrap();
        fs::write(site.join("css/site.css"), "body{}").unwrap();

        let response = send(&state, get_request("/api/sites/export?name=blog", &[])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/gzip");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        let out = TempDir::new().unwrap();
        unpack_bytes(&bytes, out.path()).unwrap();
        assert_eq!(fs::read_to_string(out.path().join("css/site.css")).unwrap(), "body{}");
        assert!(!out.path().join(".versions").exists());
    }

    #[tokio::test]
    async fn test_export_requires_name() {
        let (_dir, state) = test_state();
        let response = send(&state, get_request("/api/sites/export", &[])).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
