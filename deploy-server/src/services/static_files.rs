//! Serving deployed sites.
//!
//! Requests outside `/api` land here. The site is picked from the host
//! (subdomain mode) or the first path segment (path mode), and the rest of
//! the path is served from the site directory by `ServeDir`, falling back
//! to the site's `index.html` for client-side routing.

use crate::config::DeployMode;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use deploy_core::fs::paths;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

const LONG_CACHE: &str = "public, max-age=31536000";
const NO_CACHE: &str = "no-cache";

/// Extensions served with a long-lived cache header.
const CACHEABLE_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2", "ttf", "eot",
];

/// Site name and in-site path of a request, or why there is none.
#[derive(Debug, PartialEq, Eq)]
enum Target {
    Site { name: String, path: String },
    /// Path mode, bare `/`
    Index,
    /// Path mode, `/<site>` without the trailing slash
    AddSlash(String),
    NotFound,
}

fn resolve(state: &AppState, host: Option<&str>, path: &str) -> Target {
    match state.config.mode {
        DeployMode::Subdomain => {
            let host = host.unwrap_or_default();
            let host = host.split(':').next().unwrap_or_default().to_ascii_lowercase();
            let suffix = format!(".{}", state.config.base_domain.to_ascii_lowercase());
            match host.strip_suffix(&suffix) {
                Some(label) if !label.is_empty() && !label.contains('.') => Target::Site {
                    name: label.to_string(),
                    path: path.to_string(),
                },
                _ => Target::NotFound,
            }
        }
        DeployMode::Path => {
            let trimmed = path.trim_start_matches('/');
            if trimmed.is_empty() {
                return Target::Index;
            }
            match trimmed.split_once('/') {
                Some((name, rest)) => Target::Site {
                    name: name.to_string(),
                    path: format!("/{}", rest),
                },
                None => Target::AddSlash(trimmed.to_string()),
            }
        }
    }
}

/// True when some segment is hidden, in plain or percent-encoded form.
fn hides_segment(path: &str) -> bool {
    path.split('/').any(|segment| {
        let lower = segment.to_ascii_lowercase();
        (segment.starts_with(paths::HIDDEN_MARKER) && segment != ".") || lower.starts_with("%2e")
    })
}

fn cache_control(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext {
        Some(ext) if CACHEABLE_EXTENSIONS.contains(&ext.as_str()) => LONG_CACHE,
        _ => NO_CACHE,
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, message.to_string()).into_response()
}

/// Fallback handler serving site content.
pub async fn serve(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let (name, path) = match resolve(&state, host.as_deref(), req.uri().path()) {
        Target::Site { name, path } => (name, path),
        Target::Index => return list_sites(&state),
        Target::AddSlash(name) => return Redirect::permanent(&format!("/{}/", name)).into_response(),
        Target::NotFound => return not_found("Website not found"),
    };

    if !paths::is_valid_site_name(&name) || state.registry.site(&name).is_none() {
        return not_found("Website not found");
    }
    if hides_segment(&path) {
        return not_found("File not found");
    }

    let site_dir = state.config.web_root.join(&name);
    if !site_dir.is_dir() {
        return not_found("Website not found");
    }

    let (mut parts, body) = req.into_parts();
    let rewritten = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.clone(),
    };
    parts.uri = match rewritten.parse::<Uri>() {
        Ok(uri) => uri,
        Err(_) => return not_found("File not found"),
    };
    let req = Request::from_parts(parts, body);

    let service = ServeDir::new(&site_dir).fallback(ServeFile::new(site_dir.join("index.html")));
    let result: Result<_, Infallible> = service.oneshot(req).await;
    let mut response = match result {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };

    if response.status().is_success() {
        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/html"))
            .unwrap_or(false);
        let policy = if is_html { NO_CACHE } else { cache_control(&path) };
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static(policy));
    }
    response
}

fn list_sites(state: &AppState) -> Response {
    let sites: Vec<String> = state
        .registry
        .data()
        .sites
        .keys()
        .filter(|name| state.config.web_root.join(name).is_dir())
        .cloned()
        .collect();
    Json(json!({ "sites": sites })).into_response()
}
