//! HTTP client for the deploy server API.

use crate::config::ClientConfig;
use async_trait::async_trait;
use deploy_core::executor::{DeployReceipt, DeployTransport};
use deploy_core::versions::VersionRecord;
use deploy_core::DeployError;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const USERNAME_HEADER: &str = "X-Username";
const PASSWORD_HEADER: &str = "X-Password";
const API_KEY_HEADER: &str = "X-API-Key";

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Server { status: StatusCode, message: String },
}

impl From<ApiError> for DeployError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Server { status, message } if status == StatusCode::NOT_FOUND => {
                DeployError::NotFound(message)
            }
            other => DeployError::Transport(other.to_string()),
        }
    }
}

/// A site as listed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSite {
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Deserialize)]
struct SiteList {
    sites: Vec<RemoteSite>,
}

/// Outcome of a rollback request.
#[derive(Debug, Clone, Deserialize)]
pub struct RollbackResult {
    pub message: String,
    pub restored: bool,
    pub version: Option<VersionRecord>,
}

#[derive(Debug, Clone)]
enum Credentials {
    None,
    User { name: String, password: String },
    ApiKey(String),
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Credentials::None,
        }
    }

    /// Client for the configured server; user credentials win over the API key.
    pub fn from_config(config: &ClientConfig) -> Self {
        let client = Self::new(&config.server_url);
        if !config.username.is_empty() {
            client.with_user(&config.username, &config.password)
        } else if !config.api_key.is_empty() {
            client.with_api_key(&config.api_key)
        } else {
            client
        }
    }

    pub fn with_user(mut self, name: &str, password: &str) -> Self {
        self.credentials = Credentials::User {
            name: name.to_string(),
            password: password.to_string(),
        };
        self
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.credentials = Credentials::ApiKey(key.to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::None => request,
            Credentials::User { name, password } => request
                .header(USERNAME_HEADER, name)
                .header(PASSWORD_HEADER, password),
            Credentials::ApiKey(key) => request.header(API_KEY_HEADER, key),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.authorize(request).send().await?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let response = self.send(self.http.get(self.url(path)).query(query)).await?;
        Ok(response.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        let response = self.send(self.http.post(self.url(path)).json(body)).await?;
        Ok(response.json().await?)
    }

    async fn post_multipart(&self, path: &str, form: Form) -> Result<DeployReceipt, ApiError> {
        let response = self.send(self.http.post(self.url(path)).multipart(form)).await?;
        Ok(response.json().await?)
    }

    pub async fn list_sites(&self) -> Result<Vec<RemoteSite>, ApiError> {
        let list: SiteList = self.get_json("sites/list", &[]).await?;
        Ok(list.sites)
    }

    pub async fn create_site(&self, name: &str, desc: &str) -> Result<RemoteSite, ApiError> {
        self.post_json("sites/create", &json!({ "name": name, "desc": desc })).await
    }

    pub async fn delete_site(&self, name: &str) -> Result<(), ApiError> {
        let _: Value = self.post_json("sites/delete", &json!({ "name": name })).await?;
        Ok(())
    }

    pub async fn versions(&self, name: &str, limit: Option<usize>) -> Result<Vec<VersionRecord>, ApiError> {
        let mut query = vec![("name", name.to_string())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.get_json("sites/versions", &query).await
    }

    pub async fn rollback(&self, name: &str, hash: &str, message: Option<&str>) -> Result<RollbackResult, ApiError> {
        self.post_json(
            "sites/rollback",
            &json!({ "name": name, "hash": hash, "message": message }),
        )
        .await
    }

    /// Download the live tree of a site as tar+gzip.
    pub async fn export(&self, name: &str) -> Result<Vec<u8>, ApiError> {
        let request = self.http.get(self.url("sites/export")).query(&[("name", name)]);
        let response = self.send(request).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Replace a site's content with one file.
    pub async fn deploy_file(
        &self,
        name: &str,
        message: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<DeployReceipt, ApiError> {
        let form = Form::new()
            .text("name", name.to_string())
            .text("message", message.to_string())
            .part("file", Part::bytes(data).file_name(file_name.to_string()));
        self.post_multipart("sites/deploy", form).await
    }
}

/// Turns a non-success response into [`ApiError::Server`] with the server's
/// `error` message.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    Err(ApiError::Server { status, message })
}

fn package_form(site: &str, message: &str, archive: Vec<u8>) -> Form {
    Form::new()
        .text("name", site.to_string())
        .text("message", message.to_string())
        .part("package", Part::bytes(archive).file_name(format!("{}.tar.gz", site)))
}

/// Uploads deploy archives to the server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ApiClient,
}

impl HttpTransport {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

#[async_trait]
impl DeployTransport for HttpTransport {
    async fn upload_full(&self, site: &str, message: &str, archive: Vec<u8>) -> deploy_core::Result<DeployReceipt> {
        tracing::debug!(site = %site, bytes = archive.len(), "Uploading full archive");
        let form = package_form(site, message, archive);
        Ok(self.client.post_multipart("sites/deploy-full", form).await?)
    }

    async fn upload_incremental(
        &self,
        site: &str,
        message: &str,
        archive: Vec<u8>,
        deleted: Vec<String>,
    ) -> deploy_core::Result<DeployReceipt> {
        tracing::debug!(
            site = %site,
            bytes = archive.len(),
            deleted = deleted.len(),
            "Uploading incremental archive"
        );
        let deleted = serde_json::to_string(&deleted)?;
        let form = package_form(site, message, archive).text("deleted", deleted);
        Ok(self.client.post_multipart("sites/deploy-incremental", form).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_join_without_double_slashes() {
        let client = ApiClient::new("http://localhost:8080/api/");
        assert_eq!(client.base_url(), "http://localhost:8080/api");
        assert_eq!(client.url("sites/list"), "http://localhost:8080/api/sites/list");
        assert_eq!(client.url("/sites/list"), "http://localhost:8080/api/sites/list");
    }

    #[test]
    fn test_credentials_from_config() {
        let mut config = ClientConfig::default();
        assert!(matches!(ApiClient::from_config(&config).credentials, Credentials::None));

        config.api_key = "k".into();
        assert!(matches!(ApiClient::from_config(&config).credentials, Credentials::ApiKey(_)));

        config.username = "alice".into();
        assert!(matches!(ApiClient::from_config(&config).credentials, Credentials::User { .. }));
    }

    #[test]
    fn test_not_found_maps_to_deploy_not_found() {
        let err: DeployError = ApiError::Server {
            status: StatusCode::NOT_FOUND,
            message: "Site not found: blog".into(),
        }
        .into();
        assert!(matches!(err, DeployError::NotFound(_)));

        let err: DeployError = ApiError::Server {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".into(),
        }
        .into();
        assert!(matches!(err, DeployError::Transport(_)));
    }
}
