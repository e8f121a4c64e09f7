//! cce_pvc - a PersistentVolumeClaim backed by a CCE storage class

use std::time::Duration;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use hwcloud_core::waiter::{NotFound, StateChangeConf};
use serde_json::{Value as Json, json};

use super::kube_metadata_map;
use crate::services::{
    Context, delete_result, identifier, observe, provisional, read_result, require_exists,
    required_str,
};
use crate::utils::{attr_json, path_search, remove_nil, set_json, set_paths};

pub const TYPE_NAME: &str = "cce_pvc";
pub const IMPORT_FORMAT: &[&str] = &["cluster_id", "namespace", "name"];

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(5, 5, 3)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("Persistent volume claim in a CCE cluster")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("cluster_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("namespace", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("storage_class_name", AttributeType::String).required().force_new())
        .attribute(
            AttributeSchema::new(
                "access_modes",
                AttributeType::List(Box::new(AttributeType::one_of(&[
                    "ReadWriteOnce",
                    "ReadOnlyMany",
                    "ReadWriteMany",
                ]))),
            )
            .required()
            .force_new(),
        )
        .attribute(
            AttributeSchema::new("storage", AttributeType::String)
                .required()
                .force_new()
                .with_description("Requested size, such as 10Gi"),
        )
        .attribute(AttributeSchema::new("labels", AttributeType::string_map()).computed().force_new())
        .attribute(AttributeSchema::new("annotations", AttributeType::string_map()).computed().force_new())
        .attribute(AttributeSchema::new("volume_name", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("creation_timestamp", AttributeType::String).read_only())
}

fn claims_path(namespace: &str) -> String {
    format!("api/v1/namespaces/{}/persistentvolumeclaims", namespace)
}

fn claim_path(namespace: &str, name: &str) -> String {
    format!("{}/{}", claims_path(namespace), name)
}

fn build_create_body(attributes: &Attributes) -> Json {
    remove_nil(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": attributes.get_str("name"),
            "namespace": attributes.get_str("namespace"),
            "labels": attr_json(attributes, "labels"),
            "annotations": attr_json(attributes, "annotations"),
        },
        "spec": {
            "accessModes": attr_json(attributes, "access_modes"),
            "storageClassName": attributes.get_str("storage_class_name"),
            "resources": {
                "requests": {"storage": attributes.get_str("storage")}
            }
        }
    }))
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    let cluster_id = required_str(attributes, "cluster_id")?;
    let namespace = required_str(attributes, "namespace")?;
    let name = required_str(attributes, "name")?;
    let service = ctx.cluster_service(cluster_id).await?;

    service
        .post(&claims_path(namespace), &build_create_body(attributes))
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE PVC", e))?;

    let path = claim_path(namespace, name);
    let (service, path) = (&service, path.as_str());
    let conf = StateChangeConf::new(&["Bound"])
        .pending(&["Pending"])
        .invalid(&["Lost"])
        .delay(Duration::from_secs(5))
        .poll_interval(Duration::from_secs(3))
        .timeout(ctx.timeouts.create)
        .not_found(NotFound::Fail);
    conf.wait(ctx.cancel, move || async move { observe(service.get(path).await, "status.phase") })
        .await
        .map_err(|e| ProviderError::wrap(format!("error waiting for CCE PVC ({}) to be bound", name), e))?;

    require_exists(read(ctx, &provisional(resource, name)).await?, "CCE PVC")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let name = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let namespace = required_str(&current.attributes, "namespace")?;
    let service = ctx.cluster_service(cluster_id).await?;

    let Some(claim) = read_result(
        service.get(&claim_path(namespace, name)).await,
        "error retrieving CCE PVC",
    )?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    attributes.insert("cluster_id".to_string(), Value::from(cluster_id));
    set_paths(
        &mut attributes,
        &claim,
        &[
            ("name", "metadata.name"),
            ("namespace", "metadata.namespace"),
            ("creation_timestamp", "metadata.creationTimestamp"),
            ("storage_class_name", "spec.storageClassName"),
            ("access_modes", "spec.accessModes"),
            ("storage", "spec.resources.requests.storage"),
            ("volume_name", "spec.volumeName"),
            ("status", "status.phase"),
        ],
    );
    for key in ["labels", "annotations"] {
        let declared = current.attributes.string_map(key);
        let path = format!("metadata.{}", key);
        let kept = kube_metadata_map(path_search(&path, &claim), &declared);
        set_json(&mut attributes, key, Some(&kept));
    }
    Ok(ctx.state(current, name, attributes))
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let name = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let namespace = required_str(&current.attributes, "namespace")?;
    let service = ctx.cluster_service(cluster_id).await?;
    let path = claim_path(namespace, name);

    delete_result(service.delete(&path).await, "error deleting CCE PVC")?;

    let (service, path) = (&service, path.as_str());
    let conf = StateChangeConf::new(&["Deleted"])
        .pending(&["Bound", "Pending", "Terminating"])
        .delay(Duration::from_secs(5))
        .poll_interval(Duration::from_secs(3))
        .timeout(ctx.timeouts.delete)
        .not_found(NotFound::Success);
    conf.wait(ctx.cancel, move || async move { observe(service.get(path).await, "status.phase") })
        .await
        .map_err(|e| ProviderError::wrap(format!("error waiting for CCE PVC ({}) to be deleted", name), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_requests_storage() {
        let attributes = match Value::from_json(&json!({
            "cluster_id": "c-1",
            "namespace": "default",
            "name": "data",
            "storage_class_name": "csi-disk",
            "access_modes": ["ReadWriteOnce"],
            "storage": "10Gi",
            "annotations": {"everest.io/disk-volume-type": "SSD"},
        })) {
            Some(Value::Map(map)) => map,
            _ => Attributes::new(),
        };
        let body = build_create_body(&attributes);
        assert_eq!(body["kind"], json!("PersistentVolumeClaim"));
        assert_eq!(body["metadata"]["namespace"], json!("default"));
        assert_eq!(body["metadata"]["annotations"]["everest.io/disk-volume-type"], json!("SSD"));
        assert!(body["metadata"].get("labels").is_none());
        assert_eq!(body["spec"]["accessModes"], json!(["ReadWriteOnce"]));
        assert_eq!(body["spec"]["resources"]["requests"]["storage"], json!("10Gi"));
    }
}
