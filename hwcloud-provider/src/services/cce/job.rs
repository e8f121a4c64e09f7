//! CCE asynchronous jobs
//!
//! Creating a cluster or a node returns a job ID instead of the resource ID.
//! The job fans out into typed sub-jobs; the resource ID is read from the
//! sub-job of the expected type once the parent job has succeeded.

use std::time::Duration;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::waiter::{Observation, StateChangeConf};
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiError, ServiceClient};
use crate::services::observe;
use crate::utils::{path_array, path_str};

pub fn job_path(job_id: &str) -> String {
    format!("api/v3/projects/{{project_id}}/jobs/{}", job_id)
}

/// Wait configuration for a CCE job
pub fn job_conf(delay: Duration, timeout: Duration) -> StateChangeConf {
    StateChangeConf::new(&["Success"])
        .pending(&["Initializing", "Running"])
        .invalid(&["Failed", "Error"])
        .delay(delay)
        .poll_interval(Duration::from_secs(20))
        .timeout(timeout)
}

fn observe_job(result: Result<Json, ApiError>) -> Result<Observation<Json>, ApiError> {
    let observation = observe(result, "status.phase")?;
    let reason = match &observation {
        Observation::Found { value, .. } => path_str("status.reason", value).to_string(),
        Observation::Gone => String::new(),
    };
    Ok(observation.with_reason(reason))
}

/// Block until a job succeeds and return its final body
pub async fn wait_for_job(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    job_id: &str,
    conf: StateChangeConf,
) -> ProviderResult<Json> {
    let path = job_path(job_id);
    let path = path.as_str();
    let outcome = conf
        .wait(cancel, move || async move { observe_job(service.get(path).await) })
        .await
        .map_err(|e| {
            ProviderError::wrap(format!("error waiting for job ({}) to become success", job_id), e)
        })?;

    outcome
        .into_value()
        .ok_or_else(|| ProviderError::new(format!("job ({}) disappeared", job_id)))
}

/// First sub-job of a job whose `spec.type` matches
fn find_sub_job<'a>(job: &'a Json, job_type: &str) -> Option<&'a Json> {
    path_array("spec.subJobs", job)
        .iter()
        .find(|s| path_str("spec.type", s) == job_type)
}

/// Resolve the resource ID created by a job
///
/// When the job has a sub-job of type `job_type` its details are fetched
/// first; the ID is then read from the sub-job of type `sub_job_type`.
pub async fn resource_id_from_job(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    job_id: &str,
    job_type: &str,
    sub_job_type: &str,
    conf: StateChangeConf,
) -> ProviderResult<String> {
    let job = wait_for_job(service, cancel, job_id, conf).await?;

    resolve_sub_job(service, &job, job_id, job_type, sub_job_type).await
}

pub(crate) async fn resolve_sub_job(
    service: &ServiceClient<'_>,
    job: &Json,
    job_id: &str,
    job_type: &str,
    sub_job_type: &str,
) -> ProviderResult<String> {
    if path_array("spec.subJobs", job).is_empty() {
        return Err(ProviderError::new(format!(
            "error fetching sub jobs from {}",
            job_id
        )));
    }

    let refreshed;
    let job = match find_sub_job(job, job_type) {
        Some(sub_job) => {
            let sub_job_id = path_str("metadata.uid", sub_job);
            tracing::debug!(job_id = %job_id, sub_job_id = %sub_job_id, "fetching sub-job details");
            refreshed = service
                .get(&job_path(sub_job_id))
                .await
                .map_err(|e| ProviderError::wrap(format!("error fetching sub job {}", sub_job_id), e))?;
            &refreshed
        }
        None => job,
    };

    find_sub_job(job, sub_job_type)
        .map(|s| path_str("spec.resourceID", s))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::new(format!(
                "error fetching the resource ID from the specified job (type: {})",
                sub_job_type
            ))
        })
}

/// Resolve the ID of a cluster created by a job
pub async fn cluster_id_from_job(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    job_id: &str,
    conf: StateChangeConf,
) -> ProviderResult<String> {
    let job = wait_for_job(service, cancel, job_id, conf).await?;

    let cluster_id = path_str("spec.clusterUID", &job);
    if cluster_id.is_empty() {
        return Err(ProviderError::new("error fetching CCE cluster ID"));
    }
    Ok(cluster_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_sub_job_matches_declared_type() {
        let job = json!({
            "spec": {
                "subJobs": [
                    {"metadata": {"uid": "j-2"}, "spec": {"type": "CreateNode"}},
                    {"metadata": {"uid": "j-3"}, "spec": {"type": "InstallNode", "resourceID": "n-1"}}
                ]
            }
        });
        assert_eq!(
            find_sub_job(&job, "InstallNode").map(|s| path_str("spec.resourceID", s)),
            Some("n-1")
        );
        assert!(find_sub_job(&job, "DeleteNode").is_none());
    }

    #[test]
    fn job_path_keeps_project_placeholder() {
        assert_eq!(job_path("j-1"), "api/v3/projects/{project_id}/jobs/j-1");
    }

    fn client_for(server: &wiremock::MockServer) -> crate::client::HuaweiClient {
        let config = crate::config::Config {
            region: "cn-north-4".to_string(),
            project_id: "p-1".to_string(),
            token: "test-token".to_string(),
            endpoints: [("cce".to_string(), server.uri())].into_iter().collect(),
            ..Default::default()
        };
        crate::client::HuaweiClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn resolve_sub_job_follows_typed_sub_job() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/projects/p-1/jobs/j-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spec": {
                    "subJobs": [
                        {"metadata": {"uid": "j-4"}, "spec": {"type": "InstallNode", "resourceID": "n-7"}}
                    ]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let service = client.service("cce", "cn-north-4").await.unwrap();
        let job = json!({
            "spec": {
                "subJobs": [
                    {"metadata": {"uid": "j-2"}, "spec": {"type": "CreateNode"}}
                ]
            }
        });
        let id = resolve_sub_job(&service, &job, "j-1", "CreateNode", "InstallNode")
            .await
            .unwrap();
        assert_eq!(id, "n-7");
    }

    fn quick_conf() -> StateChangeConf {
        job_conf(Duration::ZERO, Duration::from_secs(30)).poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn resource_id_from_job_waits_for_success() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/projects/p-1/jobs/j-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"phase": "Running"}
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/projects/p-1/jobs/j-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spec": {
                    "subJobs": [
                        {"metadata": {"uid": "j-2"}, "spec": {"type": "CreateNode"}}
                    ]
                },
                "status": {"phase": "Success"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/projects/p-1/jobs/j-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spec": {
                    "subJobs": [
                        {"metadata": {"uid": "j-3"}, "spec": {"type": "InstallNode", "resourceID": "n-9"}}
                    ]
                },
                "status": {"phase": "Success"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let service = client.service("cce", "cn-north-4").await.unwrap();
        let id = resource_id_from_job(
            &service,
            &CancellationToken::new(),
            "j-1",
            "CreateNode",
            "InstallNode",
            quick_conf(),
        )
        .await
        .unwrap();
        assert_eq!(id, "n-9");
    }

    #[tokio::test]
    async fn failed_job_reports_its_reason() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/projects/p-1/jobs/j-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"phase": "Failed", "reason": "insufficient ECS quota"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let service = client.service("cce", "cn-north-4").await.unwrap();
        let err = cluster_id_from_job(&service, &CancellationToken::new(), "j-9", quick_conf())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("error waiting for job (j-9)"), "{}", message);
        assert!(message.contains("'Failed'"), "{}", message);
        assert!(message.contains("insufficient ECS quota"), "{}", message);
    }

    #[tokio::test]
    async fn cluster_id_is_read_from_finished_job() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/projects/p-1/jobs/j-5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spec": {"clusterUID": "c-42"},
                "status": {"phase": "Success"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let service = client.service("cce", "cn-north-4").await.unwrap();
        let id = cluster_id_from_job(&service, &CancellationToken::new(), "j-5", quick_conf())
            .await
            .unwrap();
        assert_eq!(id, "c-42");
    }

    #[tokio::test]
    async fn resolve_sub_job_reports_missing_resource_id() {
        let server = wiremock::MockServer::start().await;
        let client = client_for(&server);
        let service = client.service("cce", "cn-north-4").await.unwrap();

        let empty = json!({"spec": {"subJobs": []}});
        let err = resolve_sub_job(&service, &empty, "j-1", "CreateNode", "InstallNode")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("error fetching sub jobs from j-1"), "{}", err);

        let untyped = json!({"spec": {"subJobs": [{"metadata": {"uid": "j-5"}, "spec": {"type": "Other"}}]}});
        let err = resolve_sub_job(&service, &untyped, "j-1", "CreateNode", "InstallNode")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("type: InstallNode"), "{}", err);
    }
}
