//! cts_notification - SMN notifications for key operations recorded by CTS
//!
//! Notifications are looked up by name; the service-side ID is kept in
//! `notification_id` for update and delete.

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use serde_json::{Value as Json, json};

use super::with_query;
use crate::services::{
    Context, delete_result, identifier, provisional, read_result, require_exists, required_str,
};
use crate::utils::{attr_json, path_array, path_search, path_str, remove_nil, set_json, set_paths};

pub const TYPE_NAME: &str = "cts_notification";
pub const IMPORT_FORMAT: &[&str] = &["name"];

const NOTIFICATIONS_PATH: &str = "v3/{project_id}/notifications";

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(5, 5, 5)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("CTS key event notification")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
        .attribute(
            AttributeSchema::new("operation_type", AttributeType::one_of(&["complete", "customized"]))
                .required(),
        )
        .attribute(AttributeSchema::new("smn_topic", AttributeType::String))
        .attribute(AttributeSchema::new("enabled", AttributeType::Bool).with_default(Value::Bool(true)))
        .attribute(AttributeSchema::new("operations", AttributeType::blocks(vec![
            AttributeSchema::new("service", AttributeType::String).required(),
            AttributeSchema::new("resource", AttributeType::String).required(),
            AttributeSchema::new("trace_names", AttributeType::string_list()).required(),
        ])))
        .attribute(AttributeSchema::new("operation_users", AttributeType::blocks(vec![
            AttributeSchema::new("group", AttributeType::String).required(),
            AttributeSchema::new("users", AttributeType::string_list()).required(),
        ])))
        .attribute(AttributeSchema::new("filter", AttributeType::blocks(vec![
            AttributeSchema::new("condition", AttributeType::one_of(&["AND", "OR"])).required(),
            AttributeSchema::new("rule", AttributeType::string_list()).required(),
        ])))
        .attribute(AttributeSchema::new("notification_id", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("created_at", AttributeType::String).read_only())
}

fn build_operations(attributes: &Attributes) -> Json {
    Json::Array(
        attributes
            .blocks("operations")
            .into_iter()
            .map(|op| {
                json!({
                    "service_type": op.get_str("service"),
                    "resource_type": op.get_str("resource"),
                    "trace_names": attr_json(op, "trace_names"),
                })
            })
            .collect(),
    )
}

fn build_users(attributes: &Attributes) -> Json {
    Json::Array(
        attributes
            .blocks("operation_users")
            .into_iter()
            .map(|u| json!({"user_group": u.get_str("group"), "user_list": attr_json(u, "users")}))
            .collect(),
    )
}

fn build_filter(attributes: &Attributes) -> Json {
    match attributes.block("filter") {
        Some(f) => json!({
            "is_support_filter": true,
            "condition": f.get_str("condition"),
            "rule": attr_json(f, "rule"),
        }),
        None => json!({"is_support_filter": false}),
    }
}

fn build_body(attributes: &Attributes) -> Json {
    remove_nil(json!({
        "notification_name": attributes.get_str("name"),
        "operation_type": attributes.get_str("operation_type"),
        "operations": build_operations(attributes),
        "notify_user_list": build_users(attributes),
        "topic_id": attributes.get_str("smn_topic"),
        "filter": build_filter(attributes),
    }))
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    let name = required_str(attributes, "name")?;
    let service = ctx.service("cts").await?;

    let response = service
        .post(NOTIFICATIONS_PATH, &build_body(attributes))
        .await
        .map_err(|e| ProviderError::wrap("error creating CTS notification", e))?;
    let notification_id = path_str("notification_id", &response);

    // New notifications start enabled
    if !attributes.get_bool("enabled").unwrap_or(true) {
        let mut body = build_body(attributes);
        body["notification_id"] = json!(notification_id);
        body["status"] = json!("disabled");
        service
            .put(NOTIFICATIONS_PATH, &body)
            .await
            .map_err(|e| ProviderError::wrap("error disabling CTS notification", e))?;
    }

    require_exists(read(ctx, &provisional(resource, name)).await?, "CTS notification")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let name = identifier(current)?;
    let service = ctx.service("cts").await?;

    let path = with_query(&format!("{}/smn", NOTIFICATIONS_PATH), &[("notification_name", name)]);
    let Some(body) = read_result(service.get(&path).await, "error retrieving CTS notification")? else {
        return Ok(State::not_found(current.id.clone()));
    };
    let Some(notification) = path_array("notifications", &body)
        .iter()
        .find(|n| path_str("notification_name", n) == name)
    else {
        tracing::warn!(name = %name, "CTS notification not found");
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    set_paths(
        &mut attributes,
        notification,
        &[
            ("name", "notification_name"),
            ("operation_type", "operation_type"),
            ("smn_topic", "topic_id"),
            ("notification_id", "notification_id"),
            ("status", "status"),
            ("created_at", "create_time"),
        ],
    );
    attributes.insert(
        "enabled".to_string(),
        Value::from(path_str("status", notification) == "enabled"),
    );

    let operations: Vec<Json> = path_array("operations", notification)
        .iter()
        .map(|op| {
            json!({
                "service": op.get("service_type"),
                "resource": op.get("resource_type"),
                "trace_names": op.get("trace_names"),
            })
        })
        .collect();
    if !operations.is_empty() {
        set_json(&mut attributes, "operations", Some(&Json::Array(operations)));
    }
    let users: Vec<Json> = path_array("notify_user_list", notification)
        .iter()
        .map(|u| json!({"group": u.get("user_group"), "users": u.get("user_list")}))
        .collect();
    if !users.is_empty() {
        set_json(&mut attributes, "operation_users", Some(&Json::Array(users)));
    }
    if let Some(filter) = path_search("filter", notification)
        && filter.get("is_support_filter").and_then(Json::as_bool) == Some(true)
    {
        set_json(
            &mut attributes,
            "filter",
            Some(&json!([{"condition": filter.get("condition"), "rule": filter.get("rule")}])),
        );
    }

    Ok(ctx.state(current, name, attributes))
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    let name = identifier(from)?;
    let notification_id = required_str(&from.attributes, "notification_id")?;
    let service = ctx.service("cts").await?;

    let enabled = to.attributes.get_bool("enabled").unwrap_or(true);
    let mut body = build_body(&to.attributes);
    body["notification_id"] = json!(notification_id);
    body["status"] = json!(if enabled { "enabled" } else { "disabled" });
    service
        .put(NOTIFICATIONS_PATH, &body)
        .await
        .map_err(|e| ProviderError::wrap("error updating CTS notification", e))?;

    read(ctx, &provisional(to, name)).await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let notification_id = required_str(&current.attributes, "notification_id")?;
    let service = ctx.service("cts").await?;
    let path = with_query(NOTIFICATIONS_PATH, &[("notification_id", notification_id)]);
    delete_result(service.delete(&path).await, "error deleting CTS notification")
}
