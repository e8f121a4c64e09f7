//! cce_addon - an add-on installed from a CCE template

use std::time::Duration;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use hwcloud_core::timeouts::Timeouts;
use hwcloud_core::waiter::{NotFound, StateChangeConf};
use serde_json::{Value as Json, json};
use tokio_util::sync::CancellationToken;

use crate::client::ServiceClient;
use crate::services::{
    Context, delete_result, identifier, observe, provisional, read_result, require_exists,
    required_str,
};
use crate::utils::{json_attribute, path_str, remove_nil, set_paths};

pub const TYPE_NAME: &str = "cce_addon";
pub const IMPORT_FORMAT: &[&str] = &["cluster_id", "id"];

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(10, 10, 3)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("Add-on of a CCE cluster")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("cluster_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("template_name", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("version", AttributeType::String).computed())
        .attribute(AttributeSchema::new(
            "values",
            AttributeType::blocks(vec![
                AttributeSchema::new("basic_json", types::json_string()),
                AttributeSchema::new("custom_json", types::json_string()),
                AttributeSchema::new("flavor_json", types::json_string()),
            ]),
        ))
        .attribute(AttributeSchema::new("description", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only())
}

fn addons_path() -> &'static str {
    "api/v3/addons"
}

fn addon_path(addon_id: &str, cluster_id: &str) -> String {
    format!("api/v3/addons/{}?cluster_id={}", addon_id, cluster_id)
}

/// Values decoded from their JSON string attributes
fn build_values(attributes: &Attributes) -> ProviderResult<Json> {
    let Some(raw) = attributes.block("values") else {
        return Ok(Json::Null);
    };
    Ok(remove_nil(json!({
        "basic": json_attribute(raw, "basic_json")?,
        "custom": json_attribute(raw, "custom_json")?,
        "flavor": json_attribute(raw, "flavor_json")?,
    })))
}

fn build_body(attributes: &Attributes, annotation: (&str, &str)) -> ProviderResult<Json> {
    Ok(remove_nil(json!({
        "kind": "Addon",
        "apiVersion": "v3",
        "metadata": {
            "annotations": {annotation.0: annotation.1},
        },
        "spec": {
            "clusterID": attributes.get_str("cluster_id"),
            "version": attributes.get_str("version"),
            "addonTemplateName": attributes.get_str("template_name"),
            "values": build_values(attributes)?,
        }
    })))
}

async fn wait_for_addon(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    path: &str,
    conf: StateChangeConf,
) -> ProviderResult<()> {
    conf.wait(cancel, move || async move { observe(service.get(path).await, "status.status") })
        .await
        .map_err(|e| ProviderError::wrap("error waiting for CCE add-on", e))?;
    Ok(())
}

fn running_conf(timeout: Duration) -> StateChangeConf {
    StateChangeConf::new(&["running", "available"])
        .pending(&["installing", "upgrading", "abnormal"])
        .invalid(&["failed"])
        .delay(Duration::from_secs(10))
        .poll_interval(Duration::from_secs(5))
        .timeout(timeout)
        .not_found(NotFound::Fail)
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    let cluster_id = required_str(attributes, "cluster_id")?;
    let service = ctx.service("cce_addon").await?;

    let body = build_body(attributes, ("addon.install/type", "install"))?;
    let response = service
        .post(addons_path(), &body)
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE add-on", e))?;
    let addon_id = path_str("metadata.uid", &response);
    if addon_id.is_empty() {
        return Err(ProviderError::new("error creating CCE add-on: no ID in response"));
    }
    tracing::info!(addon_id = %addon_id, "waiting for CCE add-on to become running");

    wait_for_addon(
        &service,
        ctx.cancel,
        &addon_path(addon_id, cluster_id),
        running_conf(ctx.timeouts.create),
    )
    .await?;

    require_exists(read(ctx, &provisional(resource, addon_id)).await?, "CCE add-on")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let addon_id = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.service("cce_addon").await?;

    let Some(addon) = read_result(
        service.get(&addon_path(addon_id, cluster_id)).await,
        "error retrieving CCE add-on",
    )?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    attributes.insert("cluster_id".to_string(), Value::from(cluster_id));
    set_paths(
        &mut attributes,
        &addon,
        &[
            ("template_name", "spec.addonTemplateName"),
            ("version", "spec.version"),
            ("description", "spec.description"),
            ("status", "status.status"),
        ],
    );
    Ok(ctx.state(current, addon_id, attributes))
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    let addon_id = identifier(from)?;
    let cluster_id = required_str(&to.attributes, "cluster_id")?;
    let service = ctx.service("cce_addon").await?;

    let mut body = build_body(&to.attributes, ("addon.upgrade/type", "upgrade"))?;
    body["metadata"]["uid"] = json!(addon_id);
    service
        .put(&addon_path(addon_id, cluster_id), &body)
        .await
        .map_err(|e| ProviderError::wrap("error updating CCE add-on", e))?;

    wait_for_addon(
        &service,
        ctx.cancel,
        &addon_path(addon_id, cluster_id),
        running_conf(ctx.timeouts.update),
    )
    .await?;

    read(ctx, &provisional(to, addon_id)).await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let addon_id = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.service("cce_addon").await?;
    let path = addon_path(addon_id, cluster_id);

    delete_result(service.delete(&path).await, "error deleting CCE add-on")?;

    let conf = StateChangeConf::new(&["deleted"])
        .pending(&["deleting"])
        .delay(Duration::from_secs(3))
        .poll_interval(Duration::from_secs(3))
        .timeout(ctx.timeouts.delete)
        .not_found(NotFound::Success);
    wait_for_addon(&service, ctx.cancel, &path, conf).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(value: Json) -> Attributes {
        match Value::from_json(&value) {
            Some(Value::Map(map)) => map,
            _ => Attributes::new(),
        }
    }

    #[test]
    fn values_are_decoded_from_json_strings() {
        let attributes = attrs(json!({
            "cluster_id": "c-1",
            "template_name": "autoscaler",
            "version": "1.19.1",
            "values": [{
                "basic_json": "{\"region\":\"cn-north-4\"}",
                "custom_json": "{\"coresTotal\":16000}"
            }]
        }));
        let body = build_body(&attributes, ("addon.install/type", "install")).unwrap();
        assert_eq!(body["metadata"]["annotations"]["addon.install/type"], json!("install"));
        assert_eq!(body["spec"]["clusterID"], json!("c-1"));
        assert_eq!(body["spec"]["values"]["basic"]["region"], json!("cn-north-4"));
        assert_eq!(body["spec"]["values"]["custom"]["coresTotal"], json!(16000));
        assert!(body["spec"]["values"].get("flavor").is_none());
    }

    #[test]
    fn invalid_values_json_is_rejected() {
        let attributes = attrs(json!({"values": [{"basic_json": "{not json"}]}));
        assert!(build_body(&attributes, ("addon.install/type", "install")).is_err());
    }
}
