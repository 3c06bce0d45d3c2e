use crate::auth::{accessible_site, AuthUser};
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use axum::{Extension, Json, Router};
use deploy_core::executor::{DeployReceipt, DeployTransport};
use deploy_core::fs::paths;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OwnedRwLockWriteGuard;

/// Name of the file written by a single-file deploy without a file name.
const DEFAULT_FILE_NAME: &str = "index.html";

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/deploy", post(deploy_file))
        .route("/deploy-full", post(deploy_full))
        .route("/deploy-incremental", post(deploy_incremental))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
}

/// Fields of a deploy upload.
#[derive(Debug, Default)]
struct DeployForm {
    name: String,
    message: Option<String>,
    file_name: Option<String>,
    data: Option<Vec<u8>>,
    deleted: Vec<String>,
}

impl DeployForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = DeployForm::default();
        while let Some(field) = multipart.next_field().await? {
            let field_name = field.name().unwrap_or_default().to_string();
            match field_name.as_str() {
                "name" => form.name = field.text().await?.trim().to_string(),
                "message" => {
                    let message = field.text().await?.trim().to_string();
                    form.message = Some(message).filter(|m| !m.is_empty());
                }
                "file" | "package" => {
                    form.file_name = field.file_name().map(str::to_string);
                    form.data = Some(field.bytes().await?.to_vec());
                }
                "deleted" => {
                    let raw = field.text().await?;
                    form.deleted.extend(parse_deleted(&raw)?);
                }
                other => tracing::debug!(field = %other, "Ignoring unknown multipart field"),
            }
        }

        if form.name.is_empty() {
            return Err(AppError::BadRequest("Site name is required".into()));
        }
        Ok(form)
    }

    fn message_or(&self, default: &str) -> String {
        self.message.clone().unwrap_or_else(|| default.to_string())
    }

    fn take_data(&mut self) -> Result<Vec<u8>, AppError> {
        self.data
            .take()
            .ok_or_else(|| AppError::BadRequest("No file uploaded".into()))
    }
}

/// A `deleted` field holds a JSON array of paths, or one plain path.
fn parse_deleted(raw: &str) -> Result<Vec<String>, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.starts_with('[') {
        return serde_json::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("Invalid deleted list: {}", e)));
    }
    Ok(vec![raw.to_string()])
}

#[derive(Debug, Serialize)]
struct DeployResponse {
    message: String,
    mode: &'static str,
    #[serde(flatten)]
    receipt: DeployReceipt,
}

/// Checks access and existence of the target site.
fn target_site(state: &AppState, user: &AuthUser, name: &str) -> Result<(), AppError> {
    accessible_site(state, user, name)?;
    let site_dir = state.site_dir(name)?;
    if !site_dir.is_dir() {
        return Err(AppError::NotFound(format!("Site directory missing: {}", name)));
    }
    Ok(())
}

/// Write lock of the target site, taken before the site is checked again:
/// a delete queued ahead of this request may have removed it.
async fn lock_target(state: &AppState, user: &AuthUser, name: &str) -> Result<OwnedRwLockWriteGuard<()>, AppError> {
    let guard = state.write_site(name).await;
    target_site(state, user, name)?;
    Ok(guard)
}

async fn deploy_file(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<Json<DeployResponse>, AppError> {
    let mut form = DeployForm::read(multipart).await?;
    target_site(&state, &user, &form.name)?;

    let data = form.take_data()?;
    let file_name = form
        .file_name
        .as_deref()
        .and_then(|n| n.rsplit(['/', '\\']).next())
        .filter(|n| !n.is_empty() && !paths::has_hidden_segment(n))
        .unwrap_or(DEFAULT_FILE_NAME)
        .to_string();
    let message = form.message_or("Deploy");

    let _guard = lock_target(&state, &user, &form.name).await?;
    let receipt = state
        .transport(&user.name)
        .upload_file(&form.name, &message, &file_name, data)
        .await?;

    tracing::info!(site = %form.name, file = %file_name, versioned = receipt.versioned, "Deployed single file");
    Ok(Json(DeployResponse {
        message: format!("Deployed {} to {}", file_name, form.name),
        mode: "file",
        receipt,
    }))
}

async fn deploy_full(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<Json<DeployResponse>, AppError> {
    let mut form = DeployForm::read(multipart).await?;
    target_site(&state, &user, &form.name)?;

    let archive = form.take_data()?;
    let message = form.message_or("Full deploy");

    let _guard = lock_target(&state, &user, &form.name).await?;
    let receipt = state
        .transport(&user.name)
        .upload_full(&form.name, &message, archive)
        .await?;

    tracing::info!(
        site = %form.name,
        files = receipt.files_written,
        versioned = receipt.versioned,
        "Full deploy applied"
    );
    Ok(Json(DeployResponse {
        message: format!("Deployed {} files to {}", receipt.files_written, form.name),
        mode: "full",
        receipt,
    }))
}

async fn deploy_incremental(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<Json<DeployResponse>, AppError> {
    let mut form = DeployForm::read(multipart).await?;
    target_site(&state, &user, &form.name)?;

    let archive = form.take_data()?;
    let message = form.message_or("Incremental deploy");
    let deleted = std::mem::take(&mut form.deleted);

    let _guard = lock_target(&state, &user, &form.name).await?;
    let receipt = state
        .transport(&user.name)
        .upload_incremental(&form.name, &message, archive, deleted)
        .await?;

    tracing::info!(
        site = %form.name,
        written = receipt.files_written,
        deleted = receipt.files_deleted,
        versioned = receipt.versioned,
        "Incremental deploy applied"
    );
    Ok(Json(DeployResponse {
        message: format!(
            "Updated {} and removed {} files in {}",
            receipt.files_written, receipt.files_deleted, form.name
        ),
        mode: "incremental",
        receipt,
    }))
}

#[cfg(test)]
mod tests {
    use super::parse_deleted;
    use crate::routes::test_support::*;
    use axum::http::{Method, StatusCode};
    use deploy_core::archive::{pack_to_vec, PackSelection};
    use serde_json::json;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn package(files: &[(&str, &str)]) -> Vec<u8> {
        let src = TempDir::new().unwrap();
        for (path, content) in files {
            let path = src.path().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        pack_to_vec(src.path(), &PackSelection::All).unwrap()
    }

    #[test]
    fn test_parse_deleted_forms() {
        assert_eq!(parse_deleted(r#"["a.txt","b/c.txt"]"#).unwrap(), vec!["a.txt", "b/c.txt"]);
        assert_eq!(parse_deleted("b/c.txt").unwrap(), vec!["b/c.txt"]);
        assert!(parse_deleted("  ").unwrap().is_empty());
        assert!(parse_deleted("[oops").is_err());
    }

    #[tokio::test]
    async fn test_full_then_incremental_deploy() {
        let (_dir, state) = test_state();
        create_site(&state, "blog").await;
        let site = state.config.web_root.join("blog");

        let archive = package(&[("a.txt", "one"), ("b/c.txt", "two")]);
        let response = send(
            &state,
            multipart_request(
                "/api/sites/deploy-full",
                &[("name", None, b"blog"), ("package", Some("site.tar.gz"), &archive)],
                &[],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["mode"], "full");
        assert_eq!(body["versioned"], true);
        assert_eq!(body["files_written"], 2);
        assert_eq!(fs::read_to_string(site.join("b/c.txt")).unwrap(), "two");

        let archive = package(&[("a.txt", "changed"), ("d.txt", "new")]);
        let response = send(
            &state,
            multipart_request(
                "/api/sites/deploy-incremental",
                &[
                    ("name", None, b"blog"),
                    ("message", None, b"tweak"),
                    ("package", Some("delta.tar.gz"), &archive),
                    ("deleted", None, br#"["b/c.txt"]"#),
                ],
                &[],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["files_deleted"], 1);
        assert_eq!(body["version"]["message"], "tweak");
        assert_eq!(fs::read_to_string(site.join("a.txt")).unwrap(), "changed");
        assert!(site.join("d.txt").is_file());
        assert!(!site.join("b").exists());
    }

    #[tokio::test]
    async fn test_single_file_deploy_defaults_to_index() {
        let (_dir, state) = test_state();
        create_site(&state, "blog").await;
        let site = state.config.web_root.join("blog");
        fs::write(site.join("old.txt"), "stale").unwrap();

        let response = send(
            &state,
            multipart_request("/api/sites/deploy", &[("name", None, b"blog"), ("file", None, b"<h1>hi</h1>")], &[]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fs::read_to_string(site.join("index.html")).unwrap(), "<h1>hi</h1>");
        assert!(!site.join("old.txt").exists());
        assert!(site.join(".versions").is_dir());
    }

    #[tokio::test]
    async fn test_escaping_delete_is_rejected() {
        let (_dir, state) = test_state();
        create_site(&state, "blog").await;

        let archive = package(&[("a.txt", "one")]);
        let response = send(
            &state,
            multipart_request(
                "/api/sites/deploy-incremental",
                &[
                    ("name", None, b"blog"),
                    ("package", Some("delta.tar.gz"), &archive),
                    ("deleted", None, br#"["../../registry.json"]"#),
                ],
                &[],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!state.config.web_root.join("blog/a.txt").exists());
    }

    #[tokio::test]
    async fn test_deploy_to_unknown_site_or_without_package() {
        let (_dir, state) = test_state();
        let response = send(
            &state,
            multipart_request("/api/sites/deploy-full", &[("name", None, b"ghost"), ("package", Some("x"), b"x")], &[]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        create_site(&state, "blog").await;
        let response = send(&state, multipart_request("/api/sites/deploy-full", &[("name", None, b"blog")], &[])).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_deploy_queued_behind_delete_finds_site_gone() {
        let (_dir, state) = test_state();
        create_site(&state, "blog").await;
        let site = state.config.web_root.join("blog");

        let held = state.write_site("blog").await;

        let delete = tokio::spawn({
            let state = state.clone();
            let req = json_request(Method::POST, "/api/sites/delete", json!({ "name": "blog" }), &[]);
            async move { send(&state, req).await.status() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let archive = package(&[("a.txt", "one")]);
        let deploy = tokio::spawn({
            let state = state.clone();
            let req = multipart_request(
                "/api/sites/deploy-full",
                &[("name", None, b"blog"), ("package", Some("site.tar.gz"), &archive)],
                &[],
            );
            async move { send(&state, req).await.status() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert_eq!(delete.await.unwrap(), StatusCode::OK);
        assert_eq!(deploy.await.unwrap(), StatusCode::NOT_FOUND);
        assert!(state.registry.site("blog").is_none());
        assert!(!site.exists());

        // The name is free again.
        create_site(&state, "blog").await;
    }
}
