//! Provider configuration
//!
//! Credentials, region and endpoint settings shared by every resource
//! operation. A `Config` is immutable once the provider is built.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Default cloud domain
pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("region must be set (argument or HW_REGION_NAME)")]
    MissingRegion,

    #[error("either an IAM token or an access key / secret key pair must be set")]
    MissingCredentials,

    #[error("access_key and secret_key must be set together")]
    IncompleteAccessKey,

    #[error(
        "resource-level region '{resource}' must be the same as provider-level region '{provider}' when not using AK/SK authentication"
    )]
    RegionMismatch { resource: String, provider: String },

    #[error("service '{0}' is not supported")]
    UnknownService(String),

    #[error("invalid endpoint '{endpoint}' for service '{service}': {source}")]
    InvalidEndpoint {
        service: String,
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// How a service endpoint is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// `https://{name}.{region}.{cloud}/`
    Regional,
    /// `https://{name}.{cloud}/`
    Global,
}

/// Static description of a cloud service endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCatalog {
    /// Key used in `Config::endpoints` overrides
    pub service: &'static str,
    /// Endpoint host prefix
    pub name: &'static str,
    pub scope: Scope,
    /// Requests carry the project ID (`X-Project-Id`, `{project_id}` in paths)
    pub project_scoped: bool,
}

const CATALOG: &[ServiceCatalog] = &[
    ServiceCatalog {
        service: "cce",
        name: "cce",
        scope: Scope::Regional,
        project_scoped: true,
    },
    ServiceCatalog {
        service: "cce_addon",
        name: "cce",
        scope: Scope::Regional,
        project_scoped: true,
    },
    ServiceCatalog {
        service: "cce_v5",
        name: "cce",
        scope: Scope::Regional,
        project_scoped: true,
    },
    // Kubernetes API of a single cluster; `{cluster_id}` is part of the host
    ServiceCatalog {
        service: "cce_cluster_api",
        name: "{cluster_id}.cce",
        scope: Scope::Regional,
        project_scoped: true,
    },
    ServiceCatalog {
        service: "cts",
        name: "cts",
        scope: Scope::Regional,
        project_scoped: true,
    },
    ServiceCatalog {
        service: "aom",
        name: "aom",
        scope: Scope::Regional,
        project_scoped: true,
    },
    ServiceCatalog {
        service: "apm",
        name: "apm2",
        scope: Scope::Regional,
        project_scoped: true,
    },
    ServiceCatalog {
        service: "iam",
        name: "iam",
        scope: Scope::Global,
        project_scoped: false,
    },
];

/// Look up a service in the static catalogue
pub fn service_catalog(service: &str) -> Result<&'static ServiceCatalog, ConfigError> {
    CATALOG
        .iter()
        .find(|c| c.service == service)
        .ok_or_else(|| ConfigError::UnknownService(service.to_string()))
}

fn default_cloud() -> String {
    DEFAULT_CLOUD.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// Provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub domain_id: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub security_token: String,
    /// IAM token, used instead of AK/SK when set
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    /// Custom endpoints (service -> URL) overriding the catalogue
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    /// Known project IDs of other regions (region -> project ID)
    #[serde(default)]
    pub region_projects: HashMap<String, String>,
    #[serde(default)]
    pub enterprise_project_id: String,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: String::new(),
            project_id: String::new(),
            domain_id: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            security_token: String::new(),
            token: String::new(),
            cloud: default_cloud(),
            endpoints: HashMap::new(),
            region_projects: HashMap::new(),
            enterprise_project_id: String::new(),
            insecure: false,
            request_timeout: default_request_timeout(),
        }
    }
}

impl Config {
    /// Build a configuration from the provider environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).unwrap_or_default();
        let mut config = Self {
            region: get("HW_REGION_NAME"),
            project_id: get("HW_PROJECT_ID"),
            domain_id: get("HW_DOMAIN_ID"),
            access_key: get("HW_ACCESS_KEY"),
            secret_key: get("HW_SECRET_KEY"),
            security_token: get("HW_SECURITY_TOKEN"),
            token: get("HW_AUTH_TOKEN"),
            enterprise_project_id: get("HW_ENTERPRISE_PROJECT_ID"),
            insecure: lookup("HW_INSECURE").is_some_and(|v| v == "true" || v == "1"),
            ..Self::default()
        };
        if let Some(cloud) = lookup("HW_CLOUD").filter(|c| !c.is_empty()) {
            config.cloud = cloud;
        }
        config
    }

    pub fn has_access_key(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::MissingRegion);
        }
        if self.access_key.is_empty() != self.secret_key.is_empty() {
            return Err(ConfigError::IncompleteAccessKey);
        }
        if self.token.is_empty() && !self.has_access_key() {
            return Err(ConfigError::MissingCredentials);
        }
        for (service, endpoint) in &self.endpoints {
            service_catalog(service)?;
            url::Url::parse(endpoint).map_err(|source| ConfigError::InvalidEndpoint {
                service: service.clone(),
                endpoint: endpoint.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Region of a resource: its own `region` attribute or the provider region
    pub fn region_for<'a>(&'a self, resource_region: Option<&'a str>) -> Result<&'a str, ConfigError> {
        match resource_region.filter(|r| !r.is_empty()) {
            Some(region) if region != self.region && !self.has_access_key() => {
                Err(ConfigError::RegionMismatch {
                    resource: region.to_string(),
                    provider: self.region.clone(),
                })
            }
            Some(region) => Ok(region),
            None => Ok(&self.region),
        }
    }

    /// Project ID known without asking IAM
    pub fn known_project_id(&self, region: &str) -> Option<&str> {
        if region == self.region && !self.project_id.is_empty() {
            return Some(&self.project_id);
        }
        self.region_projects
            .get(region)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Enterprise project of a resource: its own attribute or the provider default
    pub fn enterprise_project_id<'a>(&'a self, resource_value: Option<&'a str>) -> Option<&'a str> {
        resource_value
            .filter(|v| !v.is_empty())
            .or(Some(self.enterprise_project_id.as_str()).filter(|v| !v.is_empty()))
    }

    /// Base URL of a service in a region, honouring custom endpoints
    ///
    /// The result always ends with `/`.
    pub fn endpoint(&self, service: &str, region: &str) -> Result<String, ConfigError> {
        let catalog = service_catalog(service)?;
        let mut endpoint = match self.endpoints.get(service) {
            Some(custom) => custom.clone(),
            None => match catalog.scope {
                Scope::Regional => format!("https://{}.{}.{}/", catalog.name, region, self.cloud),
                Scope::Global => format!("https://{}.{}/", catalog.name, self.cloud),
            },
        };
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(endpoint)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aksk_config() -> Config {
        Config {
            region: "cn-north-4".to_string(),
            project_id: "project-1".to_string(),
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn from_lookup_reads_environment_names() {
        let env: HashMap<&str, &str> = [
            ("HW_REGION_NAME", "cn-north-4"),
            ("HW_ACCESS_KEY", "AK"),
            ("HW_SECRET_KEY", "SK"),
            ("HW_CLOUD", "example.com"),
            ("HW_ENTERPRISE_PROJECT_ID", "0"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.region, "cn-north-4");
        assert_eq!(config.cloud, "example.com");
        assert_eq!(config.enterprise_project_id, "0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_requires_credentials_and_region() {
        let config = Config {
            region: "cn-north-4".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredentials)));

        let config = Config {
            token: "token".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingRegion)));

        let config = Config {
            access_key: "AK".to_string(),
            ..aksk_config()
        };
        let config = Config {
            secret_key: String::new(),
            ..config
        };
        assert!(matches!(config.validate(), Err(ConfigError::IncompleteAccessKey)));
    }

    #[test]
    fn resource_region_requires_aksk() {
        let config = Config {
            region: "cn-north-4".to_string(),
            token: "token".to_string(),
            ..Config::default()
        };
        assert_eq!(config.region_for(None).unwrap(), "cn-north-4");
        assert_eq!(config.region_for(Some("cn-north-4")).unwrap(), "cn-north-4");
        assert!(matches!(
            config.region_for(Some("ap-southeast-1")),
            Err(ConfigError::RegionMismatch { .. })
        ));

        assert_eq!(
            aksk_config().region_for(Some("ap-southeast-1")).unwrap(),
            "ap-southeast-1"
        );
    }

    #[test]
    fn endpoint_uses_catalogue_or_override() {
        let mut config = aksk_config();
        assert_eq!(
            config.endpoint("cce", "cn-north-4").unwrap(),
            "https://cce.cn-north-4.myhuaweicloud.com/"
        );
        assert_eq!(
            config.endpoint("apm", "cn-north-4").unwrap(),
            "https://apm2.cn-north-4.myhuaweicloud.com/"
        );
        assert_eq!(
            config.endpoint("iam", "cn-north-4").unwrap(),
            "https://iam.myhuaweicloud.com/"
        );

        config
            .endpoints
            .insert("cts".to_string(), "http://127.0.0.1:8080".to_string());
        assert_eq!(
            config.endpoint("cts", "cn-north-4").unwrap(),
            "http://127.0.0.1:8080/"
        );
        assert!(matches!(
            config.endpoint("ecs", "cn-north-4"),
            Err(ConfigError::UnknownService(_))
        ));
    }

    #[test]
    fn enterprise_project_falls_back_to_provider() {
        let config = Config {
            enterprise_project_id: "eps-default".to_string(),
            ..aksk_config()
        };
        assert_eq!(config.enterprise_project_id(Some("0")), Some("0"));
        assert_eq!(config.enterprise_project_id(Some("")), Some("eps-default"));
        assert_eq!(aksk_config().enterprise_project_id(None), None);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"region": "cn-north-4", "token": "t", "endpoints": {"aom": "http://localhost:1/"}}"#,
        )
        .unwrap();
        assert_eq!(config.cloud, DEFAULT_CLOUD);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }
}
