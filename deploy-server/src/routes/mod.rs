pub mod deploy;
pub mod export;
pub mod sites;
pub mod users;
pub mod versions;

use crate::auth::{self, API_KEY_HEADER, PASSWORD_HEADER, USERNAME_HEADER};
use crate::services::static_files;
use crate::state::AppState;
use axum::http::{header, HeaderName, Method};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(USERNAME_HEADER),
            HeaderName::from_static(PASSWORD_HEADER),
            HeaderName::from_static(API_KEY_HEADER),
        ]);

    let site_routes = sites::router(state.clone())
        .merge(deploy::router(state.clone()))
        .merge(versions::router(state.clone()))
        .merge(export::router(state.clone()));

    let api = Router::new()
        .nest("/sites", site_routes)
        .nest("/users", users::router(state.clone()))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        .nest("/api", api)
        .fallback(static_files::serve)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::test_config;
    use crate::services::site_registry::SiteRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub const BOUNDARY: &str = "deploy-test-boundary";

    /// Fresh state over a temporary web root with an open registry.
    pub fn test_state() -> (TempDir, Arc<AppState>) {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path().join("www"), dir.path().join("data/registry.json"));
        std::fs::create_dir_all(&config.web_root).unwrap();
        let registry = SiteRegistry::open(&config.registry_path).unwrap();
        (dir, Arc::new(AppState::new(config, registry)))
    }

    pub async fn send(state: &Arc<AppState>, req: Request<Body>) -> Response {
        create_router(state.clone()).oneshot(req).await.unwrap()
    }

    pub fn json_request(method: Method, uri: &str, body: Value, auth: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        for (k, v) in auth {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    pub fn get_request(uri: &str, auth: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        for (k, v) in auth {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::empty()).unwrap()
    }

    /// A part of a multipart body: name, optional file name, content.
    pub type Part<'a> = (&'a str, Option<&'a str>, &'a [u8]);

    pub fn multipart_request(uri: &str, parts: &[Part<'_>], auth: &[(&str, &str)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY));
        for (k, v) in auth {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::from(body)).unwrap()
    }

    pub async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Create `name` through the API as the anonymous admin.
    pub async fn create_site(state: &Arc<AppState>, name: &str) {
        let response = send(
            state,
            json_request(Method::POST, "/api/sites/create", serde_json::json!({ "name": name }), &[]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
