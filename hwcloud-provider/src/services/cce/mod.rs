//! Cloud Container Engine resources

pub mod access_policy;
pub mod addon;
pub mod cluster;
pub mod common;
pub mod image_cache;
pub mod job;
pub mod namespace;
pub mod node;
pub mod node_pool;
pub mod partition;
pub mod pvc;

use std::collections::HashMap;
use std::time::Duration;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::waiter::{NotFound, StateChangeConf};
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;

use crate::client::ServiceClient;
use crate::services::observe;

pub fn clusters_path() -> String {
    "api/v3/projects/{project_id}/clusters".to_string()
}

pub fn cluster_path(cluster_id: &str) -> String {
    format!("api/v3/projects/{{project_id}}/clusters/{}", cluster_id)
}

/// Wait until a cluster reports `Available`
pub async fn wait_for_cluster_available(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    cluster_id: &str,
    delay: Duration,
    timeout: Duration,
) -> ProviderResult<Json> {
    let conf = StateChangeConf::new(&["Available"])
        .pending(&["Creating", "Upgrading", "Resizing", "Unavailable", "Empty"])
        .delay(delay)
        .poll_interval(delay.max(Duration::from_secs(5)))
        .timeout(timeout)
        .not_found(NotFound::Fail);
    wait_for_cluster(service, cancel, cluster_id, conf).await
}

/// Wait on the phase of a cluster
pub async fn wait_for_cluster(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    cluster_id: &str,
    conf: StateChangeConf,
) -> ProviderResult<Json> {
    let path = cluster_path(cluster_id);
    let path = path.as_str();
    let outcome = conf
        .wait(cancel, move || async move { observe(service.get(path).await, "status.phase") })
        .await
        .map_err(|e| {
            ProviderError::wrap(format!("error waiting for CCE cluster ({}) to become ready", cluster_id), e)
        })?;
    Ok(outcome.into_value().unwrap_or(Json::Null))
}

/// Labels or annotations of a Kubernetes object, limited to what the caller manages
///
/// Keys the caller declared are kept. Without declared keys, everything except
/// the `kubernetes.io` system keys is kept.
pub fn kube_metadata_map(returned: Option<&Json>, declared: &HashMap<String, String>) -> Json {
    let Some(map) = returned.and_then(Json::as_object) else {
        return Json::Null;
    };
    let kept: serde_json::Map<String, Json> = map
        .iter()
        .filter(|(k, _)| {
            if declared.is_empty() {
                !k.contains("kubernetes.io/")
            } else {
                declared.contains_key(k.as_str())
            }
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Json::Object(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kube_metadata_drops_system_keys() {
        let returned = json!({
            "kubernetes.io/metadata.name": "dev",
            "team": "core",
            "tier": "backend",
        });
        assert_eq!(
            kube_metadata_map(Some(&returned), &HashMap::new()),
            json!({"team": "core", "tier": "backend"})
        );

        let declared = HashMap::from([("team".to_string(), "core".to_string())]);
        assert_eq!(kube_metadata_map(Some(&returned), &declared), json!({"team": "core"}));
        assert_eq!(kube_metadata_map(None, &declared), Json::Null);
    }
}
