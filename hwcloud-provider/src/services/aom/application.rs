//! aom_application - top-level CMDB application

use hwcloud_core::provider::ProviderResult;
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use serde_json::{Value as Json, json};

use super::CmdbEntity;
use crate::services::{Context, required_str};
use crate::utils::remove_nil;

pub const TYPE_NAME: &str = "aom_application";
pub const IMPORT_FORMAT: &[&str] = &["id"];

static APPLICATION: CmdbEntity = CmdbEntity {
    kind: "AOM application",
    collection: "v1/applications",
    fields: &[
        ("name", "name"),
        ("display_name", "display_name"),
        ("description", "description"),
        ("enterprise_project_id", "eps_id"),
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
        .with_description("AOM CMDB application")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required())
        .attribute(AttributeSchema::new("display_name", AttributeType::String).computed())
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(AttributeSchema::new("enterprise_project_id", AttributeType::String).computed())
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
    remove_nil(json!({
        "name": attributes.get_str("name"),
        "display_name": attributes.get_str("display_name"),
        "description": attributes.get_str("description"),
        "eps_id": ctx.enterprise_project_id(attributes),
        "register_type": attributes.get_str("register_type").unwrap_or("API"),
    }))
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    required_str(&resource.attributes, "name")?;
    APPLICATION
        .create(ctx, resource, build_body(ctx, &resource.attributes))
        .await
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    APPLICATION.read(ctx, current).await
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    APPLICATION
        .update(ctx, from, to, build_body(ctx, &to.attributes))
        .await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    APPLICATION.delete(ctx, current).await
}
