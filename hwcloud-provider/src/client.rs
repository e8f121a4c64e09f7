//! HTTP client for Huawei Cloud REST APIs
//!
//! [`HuaweiClient`] owns the shared `reqwest` client and configuration. A
//! [`ServiceClient`] is a view bound to one service endpoint in one region; it
//! resolves `{project_id}` in paths and authenticates every request with either
//! an IAM token or an AK/SK signature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::Value as Json;
use url::Url;

use crate::config::{Config, ConfigError, ServiceCatalog, service_catalog};
use crate::signer::{SignError, Signer};
use crate::utils::{path_str, sanitize_for_log};

const USER_AGENT: &str = concat!("hwcloud-provider/", env!("CARGO_PKG_VERSION"));

/// Error returned by API calls
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid request URL '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{method} {url} failed: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned {status}: [{error_code}] {error_msg}")]
    Status {
        method: Method,
        url: String,
        status: u16,
        error_code: String,
        error_msg: String,
        /// Sanitized, truncated response body
        body: String,
    },

    #[error("failed to decode response of {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to sign request: {0}")]
    Sign(#[from] SignError),

    #[error("no project found for region '{0}'")]
    ProjectNotFound(String),
}

impl ApiError {
    /// HTTP status of a failed response
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Error code reported by the service (e.g. `CCE.01404001`)
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ApiError::Status { error_code, .. } if !error_code.is_empty() => Some(error_code),
            _ => None,
        }
    }
}

/// Extract the service error code and message from an error body
///
/// Services disagree on the field names, so every known layout is tried.
fn error_details(body: &str) -> (String, String) {
    let Ok(json) = serde_json::from_str::<Json>(body) else {
        return (String::new(), String::new());
    };
    for (code, msg) in [
        ("error_code", "error_msg"),
        ("errorCode", "errorMessage"),
        ("error.code", "error.message"),
        ("code", "message"),
    ] {
        let code = path_str(code, &json);
        let msg = path_str(msg, &json);
        if !code.is_empty() || !msg.is_empty() {
            return (code.to_string(), msg.to_string());
        }
    }
    (String::new(), String::new())
}

/// Shared client for every service
pub struct HuaweiClient {
    http: reqwest::Client,
    config: Arc<Config>,
    signer: Option<Signer>,
    projects: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for HuaweiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuaweiClient")
            .field("region", &self.config.region)
            .field("signer", &self.signer)
            .finish()
    }
}

impl HuaweiClient {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(ConfigError::HttpClient)?;
        let signer = config
            .has_access_key()
            .then(|| Signer::new(&config.access_key, &config.secret_key));

        Ok(Self {
            http,
            config: Arc::new(config),
            signer,
            projects: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client bound to a service endpoint in a region
    pub async fn service(&self, service: &str, region: &str) -> Result<ServiceClient<'_>, ApiError> {
        let endpoint = self.config.endpoint(service, region)?;
        self.bind(service, region, endpoint).await
    }

    /// Client bound to the Kubernetes API of a CCE cluster
    pub async fn cluster_service(
        &self,
        cluster_id: &str,
        region: &str,
    ) -> Result<ServiceClient<'_>, ApiError> {
        let endpoint = self
            .config
            .endpoint("cce_cluster_api", region)?
            .replace("{cluster_id}", cluster_id);
        self.bind("cce_cluster_api", region, endpoint).await
    }

    async fn bind(
        &self,
        service: &str,
        region: &str,
        endpoint: String,
    ) -> Result<ServiceClient<'_>, ApiError> {
        let catalog = service_catalog(service)?;
        let base = Url::parse(&endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            service: service.to_string(),
            endpoint: endpoint.clone(),
            source,
        })?;
        let project_id = if catalog.project_scoped {
            Some(self.project_id(region).await?)
        } else {
            None
        };
        Ok(ServiceClient {
            client: self,
            catalog,
            base,
            project_id,
        })
    }

    /// Project ID of a region: configured, cached, or looked up through IAM
    pub async fn project_id(&self, region: &str) -> Result<String, ApiError> {
        if let Some(id) = self.config.known_project_id(region) {
            return Ok(id.to_string());
        }
        if let Some(id) = self.cached_project(region) {
            return Ok(id);
        }

        let iam = Box::pin(self.service("iam", region)).await?;
        let query = format!("v3/projects?name={}", region);
        let body = iam.get(&query).await?;
        let id = body
            .get("projects")
            .and_then(Json::as_array)
            .and_then(|projects| projects.first())
            .map(|p| path_str("id", p))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::ProjectNotFound(region.to_string()))?
            .to_string();

        tracing::debug!(region = %region, project_id = %id, "resolved project ID");
        if let Ok(mut projects) = self.projects.lock() {
            projects.insert(region.to_string(), id.clone());
        }
        Ok(id)
    }

    fn cached_project(&self, region: &str) -> Option<String> {
        self.projects
            .lock()
            .ok()
            .and_then(|projects| projects.get(region).cloned())
    }
}

/// Client bound to one service endpoint
#[derive(Debug, Clone)]
pub struct ServiceClient<'a> {
    client: &'a HuaweiClient,
    catalog: &'static ServiceCatalog,
    base: Url,
    project_id: Option<String>,
}

impl ServiceClient<'_> {
    pub fn project_id(&self) -> &str {
        self.project_id.as_deref().unwrap_or_default()
    }

    /// Absolute URL of a path relative to the endpoint
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let path = path
            .replace("{project_id}", self.project_id())
            .trim_start_matches('/')
            .to_string();
        self.base.join(&path).map_err(|source| ApiError::Url {
            url: format!("{}{}", self.base, path),
            source,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Json, ApiError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Json) -> Result<Json, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Json) -> Result<Json, ApiError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Json, ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Send a request and decode the JSON response
    ///
    /// An empty response body decodes to `Json::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Json>,
    ) -> Result<Json, ApiError> {
        let url = self.url(path)?;
        let url_string = url.to_string();
        tracing::debug!("{} {}", method, url_string);

        let request = self.build_request(method.clone(), url, body)?;
        let response = self
            .client
            .http
            .execute(request)
            .await
            .map_err(|source| ApiError::Transport {
                method: method.clone(),
                url: url_string.clone(),
                source,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| ApiError::Transport {
            method: method.clone(),
            url: url_string.clone(),
            source,
        })?;

        if !status.is_success() {
            let body = sanitize_for_log(&text);
            if status.as_u16() == 404 {
                tracing::debug!("{} {} returned 404", method, url_string);
            } else {
                tracing::error!("API error: {} - {}", status, body);
            }
            let (error_code, error_msg) = error_details(&text);
            return Err(ApiError::Status {
                method,
                url: url_string,
                status: status.as_u16(),
                error_code,
                error_msg,
                body,
            });
        }

        if text.trim().is_empty() {
            return Ok(Json::Null);
        }
        serde_json::from_str(&text).map_err(|source| ApiError::Decode {
            url: url_string,
            source,
        })
    }

    fn build_request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Json>,
    ) -> Result<reqwest::Request, ApiError> {
        let config = &self.client.config;
        let transport = |source| ApiError::Transport {
            method: method.clone(),
            url: url.to_string(),
            source,
        };

        let mut builder = self
            .client
            .http
            .request(method.clone(), url.clone())
            .header(CONTENT_TYPE, "application/json");
        if let Some(project_id) = &self.project_id {
            builder = builder.header("X-Project-Id", project_id);
        }
        if !self.catalog.project_scoped && !config.domain_id.is_empty() {
            builder = builder.header("X-Domain-Id", &config.domain_id);
        }
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|source| ApiError::Decode {
                url: url.to_string(),
                source,
            })?;
            builder = builder.body(bytes);
        }

        let mut request = builder.build().map_err(transport)?;
        if !config.token.is_empty() {
            request.headers_mut().insert(
                "x-auth-token",
                HeaderValue::from_str(&config.token).map_err(SignError::from)?,
            );
        } else if let Some(signer) = &self.client.signer {
            if !config.security_token.is_empty() {
                request.headers_mut().insert(
                    "x-security-token",
                    HeaderValue::from_str(&config.security_token).map_err(SignError::from)?,
                );
            }
            signer.sign(&mut request, chrono::Utc::now())?;
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> HuaweiClient {
        let mut config = Config {
            region: "cn-north-4".to_string(),
            project_id: "p-1".to_string(),
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
            ..Config::default()
        };
        config
            .endpoints
            .insert("cce".to_string(), endpoint.to_string());
        HuaweiClient::new(config).unwrap()
    }

    #[test]
    fn error_details_reads_known_layouts() {
        assert_eq!(
            error_details(r#"{"error_code":"CTS.0001","error_msg":"bad"}"#),
            ("CTS.0001".to_string(), "bad".to_string())
        );
        assert_eq!(
            error_details(r#"{"errorCode":"CCE.01404001","errorMessage":"not found"}"#),
            ("CCE.01404001".to_string(), "not found".to_string())
        );
        assert_eq!(
            error_details(r#"{"error":{"code":"APIGW.0101","message":"no api"}}"#),
            ("APIGW.0101".to_string(), "no api".to_string())
        );
        assert_eq!(error_details("<html>"), (String::new(), String::new()));
    }

    #[tokio::test]
    async fn url_substitutes_project_id() {
        let client = client("http://127.0.0.1:9/");
        let service = client.service("cce", "cn-north-4").await.unwrap();
        let url = service.url("/api/v3/projects/{project_id}/clusters").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9/api/v3/projects/p-1/clusters");
    }

    #[tokio::test]
    async fn cluster_service_puts_cluster_in_host() {
        let client = client("http://127.0.0.1:9/");
        let service = client.cluster_service("c-1", "cn-north-4").await.unwrap();
        assert_eq!(
            service.url("api/v1/namespaces").unwrap().as_str(),
            "https://c-1.cce.cn-north-4.myhuaweicloud.com/api/v1/namespaces"
        );
    }

    #[tokio::test]
    async fn signed_request_carries_project_header() {
        let client = client("http://127.0.0.1:9/");
        let service = client.service("cce", "cn-north-4").await.unwrap();
        let url = service.url("api/v3/addons").unwrap();
        let request = service
            .build_request(Method::POST, url, Some(&serde_json::json!({"kind": "Addon"})))
            .unwrap();
        let headers = request.headers();
        assert_eq!(headers.get("x-project-id").unwrap(), "p-1");
        assert!(headers.get("authorization").is_some());
        assert!(headers.get("x-sdk-date").is_some());
    }

    #[test]
    fn not_found_is_detected_from_status() {
        let err = ApiError::Status {
            method: Method::GET,
            url: "http://x/".to_string(),
            status: 404,
            error_code: String::new(),
            error_msg: String::new(),
            body: String::new(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.error_code(), None);
    }
}
