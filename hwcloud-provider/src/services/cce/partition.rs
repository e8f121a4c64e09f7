//! cce_partition - an edge or default partition of a CCE Turbo cluster
//!
//! Partitions are addressed by name.

use hwcloud_core::differ::Changes;
use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use serde_json::{Value as Json, json};

use super::cluster_path;
use crate::services::{
    Context, delete_result, identifier, provisional, read_result, require_exists, required_str,
};
use crate::utils::{path_array, remove_nil, set_json, set_paths};

pub const TYPE_NAME: &str = "cce_partition";
pub const IMPORT_FORMAT: &[&str] = &["cluster_id", "name"];

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(5, 5, 5)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("Partition of a CCE cluster")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("cluster_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("category", AttributeType::one_of(&["Default", "IES"])).computed().force_new())
        .attribute(AttributeSchema::new("public_border_group", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("partition_subnet_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("container_subnet_ids", AttributeType::string_list()).required())
        .attribute(AttributeSchema::new("created_at", AttributeType::String).read_only())
}

fn partitions_path(cluster_id: &str) -> String {
    format!("{}/partitions", cluster_path(cluster_id))
}

fn partition_path(cluster_id: &str, name: &str) -> String {
    format!("{}/partitions/{}", cluster_path(cluster_id), name)
}

fn container_network(attributes: &Attributes) -> Json {
    Json::Array(
        attributes
            .string_list("container_subnet_ids")
            .into_iter()
            .map(|id| json!({"subnetID": id}))
            .collect(),
    )
}

fn build_create_body(attributes: &Attributes) -> Json {
    remove_nil(json!({
        "kind": "Partition",
        "apiVersion": "v3",
        "metadata": {"name": attributes.get_str("name")},
        "spec": {
            "category": attributes.get_str("category"),
            "publicBorderGroup": attributes.get_str("public_border_group"),
            "hostNetwork": {"subnetID": attributes.get_str("partition_subnet_id")},
            "containerNetwork": container_network(attributes),
        }
    }))
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    let cluster_id = required_str(attributes, "cluster_id")?;
    let name = required_str(attributes, "name")?;
    let service = ctx.service("cce").await?;

    service
        .post(&partitions_path(cluster_id), &build_create_body(attributes))
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE partition", e))?;

    require_exists(read(ctx, &provisional(resource, name)).await?, "CCE partition")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let name = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.service("cce").await?;

    let Some(partition) = read_result(
        service.get(&partition_path(cluster_id, name)).await,
        "error retrieving CCE partition",
    )?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    attributes.insert("cluster_id".to_string(), Value::from(cluster_id));
    set_paths(
        &mut attributes,
        &partition,
        &[
            ("name", "metadata.name"),
            ("created_at", "metadata.creationTimestamp"),
            ("category", "spec.category"),
            ("public_border_group", "spec.publicBorderGroup"),
            ("partition_subnet_id", "spec.hostNetwork.subnetID"),
        ],
    );
    let subnets: Vec<Json> = path_array("spec.containerNetwork", &partition)
        .iter()
        .filter_map(|n| n.get("subnetID").cloned())
        .collect();
    set_json(&mut attributes, "container_subnet_ids", Some(&Json::Array(subnets)));

    Ok(ctx.state(current, name, attributes))
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    let name = identifier(from)?;
    let cluster_id = required_str(&to.attributes, "cluster_id")?;

    if Changes::new(from, to).has_change("container_subnet_ids") {
        let service = ctx.service("cce").await?;
        let body = json!({
            "metadata": {"name": name},
            "spec": {"containerNetwork": container_network(&to.attributes)},
        });
        service
            .put(&partition_path(cluster_id, name), &body)
            .await
            .map_err(|e| ProviderError::wrap("error updating CCE partition", e))?;
    }

    read(ctx, &provisional(to, name)).await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let name = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.service("cce").await?;
    delete_result(
        service.delete(&partition_path(cluster_id, name)).await,
        "error deleting CCE partition",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_lists_container_subnets() {
        let attributes = match Value::from_json(&json!({
            "cluster_id": "c-1",
            "name": "center",
            "category": "Default",
            "partition_subnet_id": "sub-host",
            "container_subnet_ids": ["sub-a", "sub-b"],
        })) {
            Some(Value::Map(map)) => map,
            _ => Attributes::new(),
        };
        let body = build_create_body(&attributes);
        assert_eq!(body["metadata"]["name"], json!("center"));
        assert_eq!(body["spec"]["hostNetwork"]["subnetID"], json!("sub-host"));
        assert_eq!(
            body["spec"]["containerNetwork"],
            json!([{"subnetID": "sub-a"}, {"subnetID": "sub-b"}])
        );
        assert!(body["spec"].get("publicBorderGroup").is_none());
    }
}
