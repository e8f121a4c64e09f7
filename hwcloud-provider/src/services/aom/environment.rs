//! aom_environment - deployment environment of a CMDB component

use hwcloud_core::provider::ProviderResult;
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use serde_json::{Value as Json, json};

use super::CmdbEntity;
use crate::services::{Context, required_str};
use crate::utils::remove_nil;

pub const TYPE_NAME: &str = "aom_environment";
pub const IMPORT_FORMAT: &[&str] = &["id"];

static ENVIRONMENT: CmdbEntity = CmdbEntity {
    kind: "AOM environment",
    collection: "v1/environments",
    fields: &[
        ("component_id", "component_id"),
        ("name", "env_name"),
        ("type", "env_type"),
        ("os_type", "os_type"),
        ("environment_region", "region"),
        ("description", "description"),
        ("register_type", "register_type"),
        ("creator", "creator"),
        ("modifier", "modifier"),
        ("created_at", "create_time"),
    ],
};

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(5, 5, 5)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("AOM CMDB environment")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("component_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required())
        .attribute(
            AttributeSchema::new("type", AttributeType::one_of(&["DEV", "TEST", "PRE", "ONLINE"])).required(),
        )
        .attribute(AttributeSchema::new("os_type", AttributeType::one_of(&["LINUX", "WINDOWS"])).required())
        .attribute(
            AttributeSchema::new("environment_region", AttributeType::String)
                .computed()
                .with_description("Region the environment is deployed in, when it differs from the resource region"),
        )
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(
            AttributeSchema::new("register_type", AttributeType::one_of(&["API", "CONSOLE", "SERVICE_DISCOVERY"]))
                .computed()
                .force_new(),
        )
        .attribute(AttributeSchema::new("creator", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("modifier", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("created_at", AttributeType::String).read_only())
}

fn build_body(ctx: &Context<'_>, attributes: &Attributes) -> Json {
    let region = attributes
        .get_str("environment_region")
        .unwrap_or(ctx.region.as_str());
    remove_nil(json!({
        "component_id": attributes.get_str("component_id"),
        "env_name": attributes.get_str("name"),
        "env_type": attributes.get_str("type"),
        "os_type": attributes.get_str("os_type"),
        "region": region,
        "description": attributes.get_str("description"),
        "register_type": attributes.get_str("register_type").unwrap_or("API"),
    }))
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    required_str(&resource.attributes, "component_id")?;
    ENVIRONMENT
        .create(ctx, resource, build_body(ctx, &resource.attributes))
        .await
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    ENVIRONMENT.read(ctx, current).await
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    ENVIRONMENT
        .update(ctx, from, to, build_body(ctx, &to.attributes))
        .await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    ENVIRONMENT.delete(ctx, current).await
}
