use super::registry::Site;
use serde::{Deserialize, Serialize};

/// Site as shown to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct SiteInfo {
    pub name: String,
    pub domain: String,
    pub url: String,
    pub desc: String,
    pub owner: String,
    pub users: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub name: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSiteRequest {
    pub name: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteSiteRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub site_name: String,
    pub username: Option<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
}

impl AuthorizeRequest {
    /// Every requested user name, single and batch form combined.
    pub fn all_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .usernames
            .iter()
            .chain(self.username.iter())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnauthorizeRequest {
    pub site_name: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub name: String,
    pub hash: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SiteQuery {
    pub name: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SiteAccessResponse {
    pub message: String,
    pub site: Site,
}
