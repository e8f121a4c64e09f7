//! cce_image_cache - pre-pulled container images for faster pod startup
//!
//! Every attribute forces a new cache; there is no update.

use std::time::Duration;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use hwcloud_core::waiter::{NotFound, StateChangeConf};
use serde_json::{Value as Json, json};
use tokio_util::sync::CancellationToken;

use crate::client::ServiceClient;
use crate::services::{
    Context, delete_result, identifier, observe, provisional, read_result, require_exists,
    required_str,
};
use crate::utils::{attr_json, path_search, path_str, remove_nil, set_json, set_paths};

pub const TYPE_NAME: &str = "cce_image_cache";
pub const IMPORT_FORMAT: &[&str] = &["id"];

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(30, 30, 10)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("CCE image cache")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("images", AttributeType::string_list()).required().force_new())
        .attribute(AttributeSchema::new("building_config", AttributeType::blocks(vec![
            AttributeSchema::new("cluster", AttributeType::String).required(),
            AttributeSchema::new("image_pull_secrets", AttributeType::string_list()),
        ])).required().force_new())
        .attribute(AttributeSchema::new("image_cache_size", AttributeType::Int).computed().force_new())
        .attribute(AttributeSchema::new("retention_days", AttributeType::Int).computed().force_new())
        .attribute(AttributeSchema::new("created_at", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("message", AttributeType::String).read_only())
}

const IMAGE_CACHES_PATH: &str = "v5/imagecaches";

fn image_cache_path(id: &str) -> String {
    format!("{}/{}", IMAGE_CACHES_PATH, id)
}

fn build_create_body(attributes: &Attributes) -> Json {
    let building_config = attributes.block("building_config").map(|c| {
        json!({
            "cluster": c.get_str("cluster"),
            "image_pull_secrets": attr_json(c, "image_pull_secrets"),
        })
    });
    remove_nil(json!({
        "image_cache": {
            "name": attributes.get_str("name"),
            "images": attr_json(attributes, "images"),
            "building_config": building_config,
            "image_cache_size": attributes.get_int("image_cache_size"),
            "retention_days": attributes.get_int("retention_days"),
        }
    }))
}

async fn wait_for_image_cache(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    id: &str,
    conf: StateChangeConf,
) -> ProviderResult<()> {
    let path = image_cache_path(id);
    let path = path.as_str();
    conf.wait(cancel, move || async move { observe(service.get(path).await, "status") })
        .await
        .map_err(|e| ProviderError::wrap(format!("error waiting for CCE image cache ({})", id), e))?;
    Ok(())
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    required_str(attributes, "name")?;
    let service = ctx.service("cce_v5").await?;

    let response = service
        .post(IMAGE_CACHES_PATH, &build_create_body(attributes))
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE image cache", e))?;
    let id = path_str("id", &response);
    if id.is_empty() {
        return Err(ProviderError::new("error creating CCE image cache: ID is not found in API response"));
    }

    let conf = StateChangeConf::new(&["Created"])
        .pending(&["Creating"])
        .invalid(&["CreateFailed"])
        .delay(Duration::from_secs(10))
        .poll_interval(Duration::from_secs(10))
        .timeout(ctx.timeouts.create)
        .not_found(NotFound::Fail);
    wait_for_image_cache(&service, ctx.cancel, id, conf).await?;

    require_exists(read(ctx, &provisional(resource, id)).await?, "CCE image cache")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let id = identifier(current)?;
    let service = ctx.service("cce_v5").await?;

    let Some(cache) = read_result(service.get(&image_cache_path(id)).await, "error retrieving CCE image cache")?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    set_paths(
        &mut attributes,
        &cache,
        &[
            ("name", "name"),
            ("images", "images"),
            ("image_cache_size", "image_cache_size"),
            ("retention_days", "retention_days"),
            ("created_at", "created_at"),
            ("status", "status"),
            ("message", "message"),
        ],
    );
    if let Some(config) = path_search("building_config", &cache) {
        set_json(
            &mut attributes,
            "building_config",
            Some(&json!([{
                "cluster": config.get("cluster"),
                "image_pull_secrets": config.get("image_pull_secrets"),
            }])),
        );
    }
    Ok(ctx.state(current, id, attributes))
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let id = identifier(current)?;
    let service = ctx.service("cce_v5").await?;

    delete_result(service.delete(&image_cache_path(id)).await, "error deleting CCE image cache")?;

    let conf = StateChangeConf::new(&["Deleted"])
        .pending(&["Deleting"])
        .invalid(&["DeleteFailed"])
        .delay(Duration::from_secs(5))
        .poll_interval(Duration::from_secs(10))
        .timeout(ctx.timeouts.delete)
        .not_found(NotFound::Success);
    wait_for_image_cache(&service, ctx.cancel, id, conf).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcloud_core::resource::Value;

    #[test]
    fn create_body_nests_building_config() {
        let attributes = match Value::from_json(&json!({
            "name": "cache",
            "images": ["nginx:1.25"],
            "building_config": [{"cluster": "c-1", "image_pull_secrets": ["default/secret"]}],
            "retention_days": 7,
        })) {
            Some(Value::Map(map)) => map,
            _ => Attributes::new(),
        };
        let body = build_create_body(&attributes);
        assert_eq!(
            body,
            json!({
                "image_cache": {
                    "name": "cache",
                    "images": ["nginx:1.25"],
                    "building_config": {"cluster": "c-1", "image_pull_secrets": ["default/secret"]},
                    "retention_days": 7,
                }
            })
        );
    }
}
