//! cts_tracker - the system tracker of a project
//!
//! A project has exactly one system tracker. Creating it when it already
//! exists adopts the existing tracker and applies the declared settings.

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use serde_json::{Value as Json, json};

use super::with_query;
use crate::services::{Context, delete_result, provisional, read_result, require_exists};
use crate::utils::{path_array, path_str, remove_nil, set_paths};

pub const TYPE_NAME: &str = "cts_tracker";
pub const IMPORT_FORMAT: &[&str] = &["id"];

const SYSTEM_TRACKER: &str = "system";

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(5, 5, 5)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("CTS system tracker")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("bucket_name", AttributeType::String))
        .attribute(AttributeSchema::new("file_prefix", AttributeType::String))
        .attribute(AttributeSchema::new("lts_enabled", AttributeType::Bool).with_default(Value::Bool(false)))
        .attribute(AttributeSchema::new("validate_file", AttributeType::Bool).with_default(Value::Bool(false)))
        .attribute(AttributeSchema::new("kms_id", AttributeType::String))
        .attribute(AttributeSchema::new("enabled", AttributeType::Bool).with_default(Value::Bool(true)))
        .attribute(AttributeSchema::new("name", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("type", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("transfer_enabled", AttributeType::Bool).read_only())
}

fn create_path() -> &'static str {
    "v3/{project_id}/tracker"
}

fn trackers_path() -> String {
    with_query("v3/{project_id}/trackers", &[("tracker_name", SYSTEM_TRACKER)])
}

fn obs_info(attributes: &Attributes) -> Json {
    match attributes.get_str("bucket_name") {
        Some(bucket) => json!({
            "bucket_name": bucket,
            "file_prefix_name": attributes.get_str("file_prefix"),
            "is_obs_created": false,
        }),
        None => Json::Null,
    }
}

fn build_create_body(attributes: &Attributes) -> Json {
    remove_nil(json!({
        "tracker_type": SYSTEM_TRACKER,
        "tracker_name": SYSTEM_TRACKER,
        "obs_info": obs_info(attributes),
        "is_lts_enabled": attributes.flag("lts_enabled"),
        "is_support_validate": attributes.flag("validate_file"),
    }))
}

fn build_update_body(attributes: &Attributes) -> Json {
    let enabled = attributes.get_bool("enabled").unwrap_or(true);
    let kms_id = attributes.get_str("kms_id");
    remove_nil(json!({
        "tracker_type": SYSTEM_TRACKER,
        "tracker_name": SYSTEM_TRACKER,
        "status": if enabled { "enabled" } else { "disabled" },
        "obs_info": obs_info(attributes),
        "is_lts_enabled": attributes.flag("lts_enabled"),
        "is_support_validate": attributes.flag("validate_file"),
        "is_support_trace_files_encryption": kms_id.is_some(),
        "kms_id": kms_id,
    }))
}

async fn apply(ctx: &Context<'_>, attributes: &Attributes) -> ProviderResult<()> {
    let service = ctx.service("cts").await?;
    service
        .put(create_path(), &build_update_body(attributes))
        .await
        .map_err(|e| ProviderError::wrap("error updating CTS tracker", e))?;
    Ok(())
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    let service = ctx.service("cts").await?;

    match service.post(create_path(), &build_create_body(attributes)).await {
        Ok(_) => {
            let needs_update =
                !attributes.get_bool("enabled").unwrap_or(true) || attributes.get_str("kms_id").is_some();
            if needs_update {
                apply(ctx, attributes).await?;
            }
        }
        Err(e) if e.is_conflict() => {
            tracing::info!("CTS system tracker already exists, adopting it");
            apply(ctx, attributes).await?;
        }
        Err(e) => return Err(ProviderError::wrap("error creating CTS tracker", e)),
    }

    require_exists(read(ctx, &provisional(resource, SYSTEM_TRACKER)).await?, "CTS tracker")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let service = ctx.service("cts").await?;
    let Some(body) = read_result(service.get(&trackers_path()).await, "error retrieving CTS tracker")? else {
        return Ok(State::not_found(current.id.clone()));
    };
    let Some(tracker) = path_array("trackers", &body).first() else {
        tracing::warn!("CTS system tracker not found");
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    set_paths(
        &mut attributes,
        tracker,
        &[
            ("name", "tracker_name"),
            ("type", "tracker_type"),
            ("status", "status"),
            ("bucket_name", "obs_info.bucket_name"),
            ("file_prefix", "obs_info.file_prefix_name"),
            ("lts_enabled", "lts.is_lts_enabled"),
            ("validate_file", "is_support_validate"),
            ("kms_id", "kms_id"),
            ("transfer_enabled", "is_transfer_enabled"),
        ],
    );
    attributes.insert(
        "enabled".to_string(),
        Value::from(path_str("status", tracker) == "enabled"),
    );
    Ok(ctx.state(current, SYSTEM_TRACKER, attributes))
}

pub async fn update(ctx: &Context<'_>, _from: &State, to: &Resource) -> ProviderResult<State> {
    apply(ctx, &to.attributes).await?;
    read(ctx, &provisional(to, SYSTEM_TRACKER)).await
}

pub async fn delete(ctx: &Context<'_>, _current: &State) -> ProviderResult<()> {
    let service = ctx.service("cts").await?;
    delete_result(service.delete(&trackers_path()).await, "error deleting CTS tracker")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracker_update_body() {
        let attributes = Attributes::from([
            ("bucket_name".to_string(), Value::from("audit-logs")),
            ("file_prefix".to_string(), Value::from("cts")),
            ("enabled".to_string(), Value::from(false)),
            ("lts_enabled".to_string(), Value::from(true)),
        ]);
        let body = build_update_body(&attributes);
        assert_eq!(body["status"], json!("disabled"));
        assert_eq!(body["obs_info"]["bucket_name"], json!("audit-logs"));
        assert_eq!(body["obs_info"]["file_prefix_name"], json!("cts"));
        assert_eq!(body["is_lts_enabled"], json!(true));
        assert_eq!(body["is_support_trace_files_encryption"], json!(false));
        assert!(body.get("kms_id").is_none());
    }

    #[test]
    fn create_body_without_bucket() {
        let body = build_create_body(&Attributes::new());
        assert_eq!(
            body,
            json!({
                "tracker_type": "system",
                "tracker_name": "system",
                "is_lts_enabled": false,
                "is_support_validate": false,
            })
        );
    }
}
