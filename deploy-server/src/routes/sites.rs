use crate::auth::{accessible_site, AuthUser};
use crate::error::AppError;
use crate::models::registry::Site;
use crate::models::site::{
    AuthorizeRequest, CreateSiteRequest, DeleteSiteRequest, SiteAccessResponse, SiteInfo, UnauthorizeRequest,
    UpdateSiteRequest,
};
use crate::state::AppState;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use deploy_core::fs::paths;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_sites))
        .route("/list", get(list_sites))
        .route("/create", post(create_site))
        .route("/update", post(update_site))
        .route("/delete", post(delete_site))
        .route("/authorize", post(authorize_users))
        .route("/unauthorize", post(unauthorize_user))
}

fn site_info(state: &AppState, site: &Site) -> SiteInfo {
    let (domain, url) = state.config.site_address(&site.name);
    SiteInfo {
        name: site.name.clone(),
        domain,
        url,
        desc: site.desc.clone(),
        owner: site.owner.clone(),
        users: site.users.clone(),
    }
}

fn managed_site(state: &AppState, user: &AuthUser, name: &str) -> Result<Site, AppError> {
    let site = accessible_site(state, user, name)?;
    if !user.can_manage(&site) {
        return Err(AppError::Forbidden(format!("Only the owner of {} can change it", name)));
    }
    Ok(site)
}

async fn list_sites(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<Value> {
    let sites: Vec<SiteInfo> = state
        .registry
        .data()
        .sites
        .values()
        .filter(|site| user.can_access(site))
        .map(|site| site_info(&state, site))
        .collect();
    Json(json!({ "sites": sites }))
}

async fn create_site(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateSiteRequest>,
) -> Result<Json<Value>, AppError> {
    let name = paths::sanitize_site_name(&body.name)
        .ok_or_else(|| AppError::BadRequest("Site name is required".into()))?;
    let site_dir = state.site_dir(&name)?;

    let guard = state.write_site(&name).await;
    if state.registry.site(&name).is_some() {
        return Err(AppError::Conflict(format!("Site already exists: {}", name)));
    }
    if site_dir.exists() {
        return Err(AppError::Conflict(format!("Site directory already exists: {}", name)));
    }
    tokio::fs::create_dir_all(&site_dir)
        .await
        .map_err(|e| anyhow::anyhow!("creating {}: {}", site_dir.display(), e))?;

    if let Some(versions) = &state.versions {
        if let Err(e) = versions.init(&site_dir).await {
            tracing::warn!(site = %name, error = %e, "Site created without version history");
        }
    }

    let site = Site {
        name: name.clone(),
        desc: body.desc.trim().to_string(),
        owner: user.name.clone(),
        users: Vec::new(),
    };
    let registered = state.registry.mutate(|data| {
        if data.sites.contains_key(&site.name) {
            return Err(AppError::Conflict(format!("Site already exists: {}", site.name)));
        }
        data.sites.insert(site.name.clone(), site.clone());
        Ok(())
    });
    if let Err(e) = registered {
        // The directory was created by this call, under the guard.
        if let Err(cleanup) = tokio::fs::remove_dir_all(&site_dir).await {
            tracing::warn!(site = %name, error = %cleanup, "Failed to remove directory of unregistered site");
        }
        return Err(e);
    }
    drop(guard);

    tracing::info!(site = %name, owner = %user.name, "Created site");
    let info = site_info(&state, &site);
    let now = chrono::Utc::now();
    Ok(Json(json!({
        "id": name,
        "name": info.name,
        "domain": info.domain,
        "path": site_dir.display().to_string(),
        "desc": info.desc,
        "url": info.url,
        "created_at": now,
        "updated_at": now,
    })))
}

async fn update_site(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpdateSiteRequest>,
) -> Result<Json<SiteInfo>, AppError> {
    managed_site(&state, &user, &body.name)?;
    let site = state.registry.mutate(|data| {
        let site = data
            .sites
            .get_mut(&body.name)
            .ok_or_else(|| AppError::NotFound(format!("Site not found: {}", body.name)))?;
        site.desc = body.desc.trim().to_string();
        Ok(site.clone())
    })?;
    Ok(Json(site_info(&state, &site)))
}

async fn delete_site(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<DeleteSiteRequest>,
) -> Result<Json<Value>, AppError> {
    managed_site(&state, &user, &body.name)?;
    let site_dir = state.site_dir(&body.name)?;

    let guard = state.write_site(&body.name).await;
    managed_site(&state, &user, &body.name)?;

    tokio::task::spawn_blocking({
        let site_dir = site_dir.clone();
        move || match std::fs::remove_dir_all(&site_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::anyhow!("removing {}: {}", site_dir.display(), e)),
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    state.registry.mutate(|data| {
        data.sites.remove(&body.name);
        Ok(())
    })?;
    drop(guard);
    state.forget_site(&body.name);

    tracing::info!(site = %body.name, user = %user.name, "Deleted site");
    Ok(Json(json!({ "message": format!("Site {} deleted", body.name) })))
}

async fn authorize_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AuthorizeRequest>,
) -> Result<Json<SiteAccessResponse>, AppError> {
    managed_site(&state, &user, &body.site_name)?;
    let requested = body.all_usernames();
    if requested.is_empty() {
        return Err(AppError::BadRequest("No users given".into()));
    }

    let (site, added) = state.registry.mutate(|data| {
        let known: Vec<String> = requested
            .iter()
            .filter(|name| data.users.contains_key(name.as_str()))
            .cloned()
            .collect();
        let site = data
            .sites
            .get_mut(&body.site_name)
            .ok_or_else(|| AppError::NotFound(format!("Site not found: {}", body.site_name)))?;

        let mut added = 0;
        for name in known {
            if name != site.owner && !site.users.contains(&name) {
                site.users.push(name);
                added += 1;
            }
        }
        Ok((site.clone(), added))
    })?;

    Ok(Json(SiteAccessResponse {
        message: format!("Authorized {} user(s) for {}", added, site.name),
        site,
    }))
}

async fn unauthorize_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UnauthorizeRequest>,
) -> Result<Json<SiteAccessResponse>, AppError> {
    managed_site(&state, &user, &body.site_name)?;
    let site = state.registry.mutate(|data| {
        let site = data
            .sites
            .get_mut(&body.site_name)
            .ok_or_else(|| AppError::NotFound(format!("Site not found: {}", body.site_name)))?;
        site.users.retain(|u| u != &body.username);
        Ok(site.clone())
    })?;

    Ok(Json(SiteAccessResponse {
        message: format!("Revoked access of {} to {}", body.username, site.name),
        site,
    }))
}

#[cfg(test)]
mod tests {
    use crate::models::registry::User;
    use crate::routes::test_support::*;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_list_sites() {
        let (_dir, state) = test_state();

        let response = send(
            &state,
            json_request(Method::POST, "/api/sites/create", json!({ "name": "My Blog", "desc": "notes" }), &[]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], "my-blog");
        assert_eq!(body["url"], "http://example.com:8080/my-blog/");
        assert!(state.config.web_root.join("my-blog/.versions").is_dir());

        let response = send(&state, get_request("/api/sites/list", &[])).await;
        let body = body_json(response).await;
        assert_eq!(body["sites"][0]["name"], "my-blog");
        assert_eq!(body["sites"][0]["desc"], "notes");
    }

    #[tokio::test]
    async fn test_create_conflicts_and_empty_name() {
        let (_dir, state) = test_state();
        create_site(&state, "blog").await;

        let again = send(
            &state,
            json_request(Method::POST, "/api/sites/create", json!({ "name": "blog" }), &[]),
        )
        .await;
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let empty = send(
            &state,
            json_request(Method::POST, "/api/sites/create", json!({ "name": "!!" }), &[]),
        )
        .await;
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_removes_directory_and_entry() {
        let (_dir, state) = test_state();
        create_site(&state, "blog").await;

        let response = send(
            &state,
            json_request(Method::POST, "/api/sites/delete", json!({ "name": "blog" }), &[]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.config.web_root.join("blog").exists());
        assert!(state.registry.site("blog").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_register_one_site_with_its_directory() {
        let (_dir, state) = test_state();

        for round in 0..50 {
            let name = format!("blog{}", round);
            let attempts: Vec<_> = (0..2)
                .map(|_| {
                    let state = state.clone();
                    let req = json_request(Method::POST, "/api/sites/create", json!({ "name": name }), &[]);
                    tokio::spawn(async move { send(&state, req).await.status() })
                })
                .collect();

            let mut statuses = Vec::new();
            for attempt in attempts {
                statuses.push(attempt.await.unwrap());
            }
            statuses.sort();
            assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
            assert!(state.registry.site(&name).is_some());
            assert!(state.config.web_root.join(&name).is_dir());
        }
    }

    #[tokio::test]
    async fn test_authorize_grants_access_and_skips_unknown_users() {
        let (_dir, state) = test_state();
        create_site(&state, "blog").await;
        state
            .registry
            .mutate(|data| {
                data.api_key = "k".into();
                for name in ["alice", "bob"] {
                    data.users.insert(
                        name.into(),
                        User { name: name.into(), password: "pw".into(), is_admin: false },
                    );
                }
                Ok(())
            })
            .unwrap();
        let admin = [("x-api-key", "k")];
        let bob = [("x-username", "bob"), ("x-password", "pw")];

        let before = send(&state, get_request("/api/sites/list", &bob)).await;
        assert_eq!(body_json(before).await["sites"], json!([]));

        let response = send(
            &state,
            json_request(
                Method::POST,
                "/api/sites/authorize",
                json!({ "siteName": "blog", "usernames": ["bob", "ghost"] }),
                &admin,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["site"]["users"], json!(["bob"]));

        let after = send(&state, get_request("/api/sites/list", &bob)).await;
        assert_eq!(body_json(after).await["sites"][0]["name"], "blog");

        // bob may deploy but not manage
        let denied = send(
            &state,
            json_request(Method::POST, "/api/sites/delete", json!({ "name": "blog" }), &bob),
        )
        .await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let response = send(
            &state,
            json_request(
                Method::POST,
                "/api/sites/unauthorize",
                json!({ "siteName": "blog", "username": "bob" }),
                &admin,
            ),
        )
        .await;
        assert_eq!(body_json(response).await["site"]["users"], json!([]));
    }

    #[tokio::test]
    async fn test_requests_without_credentials_are_rejected() {
        let (_dir, state) = test_state();
        state
            .registry
            .mutate(|data| {
                data.api_key = "k".into();
                Ok(())
            })
            .unwrap();

        let response = send(&state, get_request("/api/sites/list", &[])).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
