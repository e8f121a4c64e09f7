//! aom_component - component of a CMDB application

use hwcloud_core::provider::ProviderResult;
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use serde_json::{Value as Json, json};

use super::CmdbEntity;
use crate::services::{Context, required_str};
use crate::utils::remove_nil;

pub const TYPE_NAME: &str = "aom_component";
pub const IMPORT_FORMAT: &[&str] = &["id"];

static COMPONENT: CmdbEntity = CmdbEntity {
    kind: "AOM component",
    collection: "v1/components",
    fields: &[
        ("application_id", "app_id"),
        ("name", "name"),
        ("description", "description"),
        ("sub_application_id", "sub_app_id"),
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
        .with_description("AOM CMDB component")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("application_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required())
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(AttributeSchema::new("sub_application_id", AttributeType::String).computed().force_new())
        .attribute(
            AttributeSchema::new("register_type", AttributeType::one_of(&["API", "CONSOLE", "SERVICE_DISCOVERY"]))
                .computed()
                .force_new(),
        )
        .attribute(AttributeSchema::new("creator", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("modifier", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("created_at", AttributeType::String).read_only())
}

fn build_create_body(attributes: &Attributes) -> Json {
    remove_nil(json!({
        "app_id": attributes.get_str("application_id"),
        "sub_app_id": attributes.get_str("sub_application_id"),
        "name": attributes.get_str("name"),
        "description": attributes.get_str("description"),
        "register_type": attributes.get_str("register_type").unwrap_or("API"),
    }))
}

fn build_update_body(attributes: &Attributes) -> Json {
    remove_nil(json!({
        "name": attributes.get_str("name"),
        "description": attributes.get_str("description").unwrap_or_default(),
    }))
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    required_str(&resource.attributes, "application_id")?;
    COMPONENT
        .create(ctx, resource, build_create_body(&resource.attributes))
        .await
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    COMPONENT.read(ctx, current).await
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    COMPONENT
        .update(ctx, from, to, build_update_body(&to.attributes))
        .await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    COMPONENT.delete(ctx, current).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcloud_core::resource::Value;

    #[test]
    fn update_body_clears_description() {
        let attributes = Attributes::from([
            ("application_id".to_string(), Value::from("app-1")),
            ("name".to_string(), Value::from("frontend")),
        ]);
        assert_eq!(
            build_create_body(&attributes),
            json!({"app_id": "app-1", "name": "frontend", "register_type": "API"})
        );
        assert_eq!(
            build_update_body(&attributes),
            json!({"name": "frontend", "description": ""})
        );
    }
}
