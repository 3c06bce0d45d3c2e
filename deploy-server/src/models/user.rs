use super::registry::User;
use serde::{Deserialize, Serialize};

/// User as listed by the API (no password).
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub name: String,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            is_admin: user.is_admin,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub password: String,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: String,
    pub password: Option<String>,
    #[serde(rename = "isAdmin")]
    pub is_admin: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    pub name: String,
}
