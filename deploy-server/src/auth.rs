//! Request authentication and site permissions.
//!
//! Callers authenticate with `X-Username` / `X-Password`, or with the legacy
//! `X-API-Key` which grants admin rights. A registry with neither users nor
//! an API key runs open, and every caller acts as an anonymous admin.

use crate::error::AppError;
use crate::models::registry::{RegistryData, Site};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

pub const USERNAME_HEADER: &str = "x-username";
pub const PASSWORD_HEADER: &str = "x-password";
pub const API_KEY_HEADER: &str = "x-api-key";

/// The caller of an API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub name: String,
    pub is_admin: bool,
}

impl AuthUser {
    fn admin(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_admin: true,
        }
    }

    /// Admin, owner or authorized user.
    pub fn can_access(&self, site: &Site) -> bool {
        self.is_admin || site.is_authorized(&self.name)
    }

    /// Admin or owner.
    pub fn can_manage(&self, site: &Site) -> bool {
        self.is_admin || site.owner == self.name
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin privileges required".into()))
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the caller from request headers.
pub fn authenticate(registry: &RegistryData, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    if let Some(key) = header(headers, API_KEY_HEADER) {
        if !registry.api_key.is_empty() && key == registry.api_key {
            return Ok(AuthUser::admin("admin"));
        }
    }

    if let (Some(name), Some(password)) = (header(headers, USERNAME_HEADER), header(headers, PASSWORD_HEADER)) {
        return match registry.users.get(name) {
            Some(user) if user.password == password => Ok(AuthUser {
                name: user.name.clone(),
                is_admin: user.is_admin,
            }),
            _ => Err(AppError::Unauthorized("Invalid username or password".into())),
        };
    }

    if registry.is_open() {
        return Ok(AuthUser::admin("anonymous"));
    }

    Err(AppError::Unauthorized("Authentication required".into()))
}

/// Middleware for `/api` routes: attaches the [`AuthUser`] to the request.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state.registry.data(), req.headers())?;
    tracing::debug!(user = %user.name, path = %req.uri().path(), "Authenticated request");
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Look up a site the caller may access.
pub fn accessible_site(state: &AppState, user: &AuthUser, name: &str) -> Result<Site, AppError> {
    let site = state
        .registry
        .site(name)
        .ok_or_else(|| AppError::NotFound(format!("Site not found: {}", name)))?;
    if !user.can_access(&site) {
        return Err(AppError::Forbidden(format!("No access to site {}", name)));
    }
    Ok(site)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::registry::User;
    use axum::http::HeaderValue;

    fn registry() -> RegistryData {
        let mut data = RegistryData {
            api_key: "k3y".into(),
            ..RegistryData::default()
        };
        data.users.insert(
            "alice".into(),
            User {
                name: "alice".into(),
                password: "pw".into(),
                is_admin: false,
            },
        );
        data
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_user_credentials() {
        let user = authenticate(&registry(), &headers(&[(USERNAME_HEADER, "alice"), (PASSWORD_HEADER, "pw")])).unwrap();
        assert_eq!(user.name, "alice");
        assert!(!user.is_admin);

        let wrong = authenticate(&registry(), &headers(&[(USERNAME_HEADER, "alice"), (PASSWORD_HEADER, "nope")]));
        assert!(matches!(wrong, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_api_key_is_admin() {
        let user = authenticate(&registry(), &headers(&[(API_KEY_HEADER, "k3y")])).unwrap();
        assert!(user.is_admin);
        assert!(authenticate(&registry(), &headers(&[(API_KEY_HEADER, "bad")])).is_err());
    }

    #[test]
    fn test_open_registry_and_missing_credentials() {
        let open = authenticate(&RegistryData::default(), &HeaderMap::new()).unwrap();
        assert!(open.is_admin);
        assert!(matches!(
            authenticate(&registry(), &HeaderMap::new()),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_site_permissions() {
        let site = Site {
            name: "blog".into(),
            owner: "alice".into(),
            users: vec!["bob".into()],
            ..Site::default()
        };
        let bob = AuthUser { name: "bob".into(), is_admin: false };
        let eve = AuthUser { name: "eve".into(), is_admin: false };
        assert!(bob.can_access(&site));
        assert!(!bob.can_manage(&site));
        assert!(!eve.can_access(&site));
        assert!(AuthUser::admin("root").can_manage(&site));
    }
}
