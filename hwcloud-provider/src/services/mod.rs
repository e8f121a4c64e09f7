//! Resource implementations grouped by cloud service
//!
//! Every resource module exposes the same surface: `TYPE_NAME`,
//! `IMPORT_FORMAT`, `schema()`, `timeouts()` and the async `create`, `read`,
//! `update` and `delete` operations taking a [`Context`].

pub mod aom;
pub mod apm;
pub mod cce;
pub mod cts;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State};
use hwcloud_core::schema::ResourceSchema;
use hwcloud_core::timeouts::Timeouts;
use hwcloud_core::waiter::Observation;
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiError, HuaweiClient, ServiceClient};
use crate::utils::path_str;

/// Per-operation context shared by the resource modules
pub struct Context<'a> {
    pub client: &'a HuaweiClient,
    pub cancel: &'a CancellationToken,
    /// Region the resource lives in
    pub region: String,
    pub timeouts: Timeouts,
    schema: ResourceSchema,
}

impl<'a> Context<'a> {
    /// Resolve the region and timeouts of a resource from its attributes
    pub fn new(
        client: &'a HuaweiClient,
        cancel: &'a CancellationToken,
        attributes: &Attributes,
        schema: ResourceSchema,
        defaults: Timeouts,
    ) -> ProviderResult<Self> {
        let region = client
            .config()
            .region_for(attributes.get_str("region"))
            .map_err(|e| ProviderError::new(e.to_string()).with_cause(e))?
            .to_string();
        let timeouts = defaults
            .with_overrides(attributes)
            .map_err(|e| ProviderError::wrap("invalid timeouts", e))?;
        Ok(Self {
            client,
            cancel,
            region,
            timeouts,
            schema,
        })
    }

    pub async fn service(&self, service: &str) -> ProviderResult<ServiceClient<'a>> {
        self.client
            .service(service, &self.region)
            .await
            .map_err(|e| ProviderError::wrap(format!("error creating {} client", service), e))
    }

    /// Client for the Kubernetes API of a cluster
    pub async fn cluster_service(&self, cluster_id: &str) -> ProviderResult<ServiceClient<'a>> {
        self.client
            .cluster_service(cluster_id, &self.region)
            .await
            .map_err(|e| ProviderError::wrap("error creating CCE cluster API client", e))
    }

    /// Enterprise project of a resource, falling back to the provider default
    pub fn enterprise_project_id<'b>(&'b self, attributes: &'b Attributes) -> Option<&'b str> {
        self.client
            .config()
            .enterprise_project_id(attributes.get_str("enterprise_project_id"))
    }

    /// Observed state carrying the region every resource reports
    ///
    /// Declared inputs the response does not echo (delete switches, secrets,
    /// Kubernetes metadata sent at creation) are kept from `current`.
    pub fn state(&self, current: &State, identifier: impl Into<String>, attributes: Attributes) -> State {
        let mut attributes = attributes;
        self.schema.retain_declared(&current.attributes, &mut attributes);
        State::existing(current.id.clone(), attributes)
            .with_identifier(identifier)
            .with_attribute("region", self.region.clone())
    }
}

/// State of a resource just created or updated, before it is read back
pub fn provisional(resource: &Resource, identifier: impl Into<String>) -> State {
    State::existing(resource.id.clone(), resource.attributes.clone()).with_identifier(identifier)
}

/// Read after create: the resource must exist
pub fn require_exists(state: State, kind: &str) -> ProviderResult<State> {
    if state.exists {
        Ok(state)
    } else {
        Err(ProviderError::new(format!("{} disappeared right after creation", kind)))
    }
}

/// Cloud-side identifier of a known resource
pub fn identifier(state: &State) -> ProviderResult<&str> {
    state
        .identifier
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::new("resource has no identifier"))
}

/// Required string attribute
pub fn required_str<'a>(attributes: &'a Attributes, key: &str) -> ProviderResult<&'a str> {
    attributes
        .get_str(key)
        .ok_or_else(|| ProviderError::new(format!("'{}' is required", key)))
}

/// Classify a GET result for a state-change wait
///
/// 404 becomes `Gone`; any other error aborts the wait.
pub fn observe(
    result: Result<Json, ApiError>,
    status_path: &str,
) -> Result<Observation<Json>, ApiError> {
    match result {
        Ok(body) => {
            let status = path_str(status_path, &body).to_string();
            Ok(Observation::found(body, status))
        }
        Err(e) if e.is_not_found() => Ok(Observation::Gone),
        Err(e) => Err(e),
    }
}

/// Map a read failure: 404 means the resource is gone
pub fn read_result(result: Result<Json, ApiError>, context: &str) -> ProviderResult<Option<Json>> {
    match result {
        Ok(body) => Ok(Some(body)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(ProviderError::wrap(context, e)),
    }
}

/// Map a delete failure: a resource already gone counts as deleted
pub fn delete_result(result: Result<Json, ApiError>, context: &str) -> ProviderResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            tracing::warn!("{}: resource already deleted", context);
            Ok(())
        }
        Err(e) => Err(ProviderError::wrap(context, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use serde_json::json;

    fn status_error(status: u16) -> ApiError {
        ApiError::Status {
            method: Method::GET,
            url: "http://localhost/".to_string(),
            status,
            error_code: String::new(),
            error_msg: String::new(),
            body: String::new(),
        }
    }

    #[test]
    fn observe_maps_404_to_gone() {
        let observation = observe(Err(status_error(404)), "status.phase").unwrap();
        assert_eq!(observation, Observation::Gone);
        assert!(observe(Err(status_error(500)), "status.phase").is_err());
    }

    #[test]
    fn observe_reads_status_path() {
        let observation = observe(Ok(json!({"status": {"phase": "Available"}})), "status.phase").unwrap();
        match observation {
            Observation::Found { status, .. } => assert_eq!(status, "Available"),
            Observation::Gone => panic!("expected found"),
        }
    }

    #[test]
    fn delete_of_missing_resource_succeeds() {
        assert!(delete_result(Err(status_error(404)), "error deleting").is_ok());
        assert!(delete_result(Err(status_error(403)), "error deleting").is_err());
    }
}
