//! cce_namespace - a Kubernetes namespace, managed through the cluster API

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
use crate::utils::{attr_json, path_search, path_str, remove_nil, set_json, set_paths};

pub const TYPE_NAME: &str = "cce_namespace";
pub const IMPORT_FORMAT: &[&str] = &["cluster_id", "name"];

const NAMESPACES_PATH: &str = "api/v1/namespaces";

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(5, 5, 5)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("Kubernetes namespace of a CCE cluster")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("cluster_id", AttributeType::String).required().force_new())
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .computed()
                .force_new()
                .conflicts_with(&["prefix"]),
        )
        .attribute(
            AttributeSchema::new("prefix", AttributeType::String)
                .force_new()
                .with_description("Generate the name from this prefix"),
        )
        .attribute(AttributeSchema::new("labels", AttributeType::string_map()).computed().force_new())
        .attribute(AttributeSchema::new("annotations", AttributeType::string_map()).computed().force_new())
        .attribute(AttributeSchema::new("creation_timestamp", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only())
}

fn namespace_path(name: &str) -> String {
    format!("{}/{}", NAMESPACES_PATH, name)
}

fn build_create_body(attributes: &Attributes) -> Json {
    remove_nil(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": attributes.get_str("name"),
            "generateName": attributes.get_str("prefix"),
            "labels": attr_json(attributes, "labels"),
            "annotations": attr_json(attributes, "annotations"),
        }
    }))
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    let cluster_id = required_str(attributes, "cluster_id")?;
    if attributes.get_str("name").is_none() && attributes.get_str("prefix").is_none() {
        return Err(ProviderError::new("one of 'name' or 'prefix' must be set"));
    }
    let service = ctx.cluster_service(cluster_id).await?;

    let response = service
        .post(NAMESPACES_PATH, &build_create_body(attributes))
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE namespace", e))?;
    let name = path_str("metadata.name", &response);
    if name.is_empty() {
        return Err(ProviderError::new("error creating CCE namespace: name is not found in API response"));
    }

    let path = namespace_path(name);
    let (service, path) = (&service, path.as_str());
    let conf = StateChangeConf::new(&["Active"])
        .delay(Duration::from_secs(1))
        .poll_interval(Duration::from_secs(3))
        .timeout(ctx.timeouts.create)
        .not_found(NotFound::Fail);
    conf.wait(ctx.cancel, move || async move { observe(service.get(path).await, "status.phase") })
        .await
        .map_err(|e| ProviderError::wrap(format!("error waiting for CCE namespace ({}) to become active", name), e))?;

    require_exists(read(ctx, &provisional(resource, name)).await?, "CCE namespace")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let name = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.cluster_service(cluster_id).await?;

    let Some(namespace) = read_result(
        service.get(&namespace_path(name)).await,
        "error retrieving CCE namespace",
    )?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    attributes.insert("cluster_id".to_string(), Value::from(cluster_id));
    if let Some(prefix) = current.attributes.get_str("prefix") {
        attributes.insert("prefix".to_string(), Value::from(prefix));
    }
    set_paths(
        &mut attributes,
        &namespace,
        &[
            ("name", "metadata.name"),
            ("creation_timestamp", "metadata.creationTimestamp"),
            ("status", "status.phase"),
        ],
    );
    for key in ["labels", "annotations"] {
        let declared = current.attributes.string_map(key);
        let path = format!("metadata.{}", key);
        let kept = kube_metadata_map(path_search(&path, &namespace), &declared);
        set_json(&mut attributes, key, Some(&kept));
    }
    Ok(ctx.state(current, name, attributes))
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let name = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.cluster_service(cluster_id).await?;
    let path = namespace_path(name);

    delete_result(service.delete(&path).await, "error deleting CCE namespace")?;

    let (service, path) = (&service, path.as_str());
    let conf = StateChangeConf::new(&["Deleted"])
        .pending(&["Terminating", "Active"])
        .delay(Duration::from_secs(5))
        .poll_interval(Duration::from_secs(5))
        .timeout(ctx.timeouts.delete)
        .not_found(NotFound::Success);
    conf.wait(ctx.cancel, move || async move { observe(service.get(path).await, "status.phase") })
        .await
        .map_err(|e| ProviderError::wrap(format!("error waiting for CCE namespace ({}) to be deleted", name), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_becomes_generate_name() {
        let attributes = Attributes::from([
            ("cluster_id".to_string(), Value::from("c-1")),
            ("prefix".to_string(), Value::from("dev-")),
        ]);
        let body = build_create_body(&attributes);
        assert_eq!(
            body,
            json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"generateName": "dev-"},
            })
        );
    }
}
