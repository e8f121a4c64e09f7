//! cce_access_policy - namespace-scoped permissions granted to IAM principals
//! across one or more clusters

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use serde_json::{Value as Json, json};

use crate::services::{
    Context, delete_result, identifier, provisional, read_result, require_exists, required_str,
};
use crate::utils::{attr_json, path_search, path_str, remove_nil, set_json, set_paths};

pub const TYPE_NAME: &str = "cce_access_policy";
pub const IMPORT_FORMAT: &[&str] = &["id"];

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(5, 5, 5)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("CCE access policy")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("clusters", AttributeType::string_list()).required())
        .attribute(AttributeSchema::new("access_scope", AttributeType::blocks(vec![
            AttributeSchema::new("namespaces", AttributeType::string_list()).required(),
        ])).required())
        .attribute(AttributeSchema::new("policy_type", AttributeType::String).required())
        .attribute(AttributeSchema::new("principal", AttributeType::blocks(vec![
            AttributeSchema::new("type", AttributeType::one_of(&["user", "group", "agency"])).required(),
            AttributeSchema::new("ids", AttributeType::string_list()).required(),
        ])).required().force_new())
        .attribute(AttributeSchema::new("created_at", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("updated_at", AttributeType::String).read_only())
}

const ACCESS_POLICIES_PATH: &str = "api/v3/access-policies";

fn access_policy_path(id: &str) -> String {
    format!("{}/{}", ACCESS_POLICIES_PATH, id)
}

fn build_body(attributes: &Attributes, with_principal: bool) -> Json {
    let access_scope = attributes
        .block("access_scope")
        .map(|s| json!({"namespaces": attr_json(s, "namespaces")}));
    let principal = attributes
        .block("principal")
        .filter(|_| with_principal)
        .map(|p| json!({"type": p.get_str("type"), "ids": attr_json(p, "ids")}));
    remove_nil(json!({
        "kind": "AccessPolicy",
        "apiVersion": "v3",
        "name": attributes.get_str("name"),
        "clusters": attr_json(attributes, "clusters"),
        "accessScope": access_scope,
        "policyType": attributes.get_str("policy_type"),
        "principal": principal,
    }))
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    required_str(&resource.attributes, "name")?;
    let service = ctx.service("cce").await?;

    let response = service
        .post(ACCESS_POLICIES_PATH, &build_body(&resource.attributes, true))
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE access policy", e))?;
    let id = path_str("policyId", &response);
    if id.is_empty() {
        return Err(ProviderError::new("error creating CCE access policy: ID is not found in API response"));
    }

    require_exists(read(ctx, &provisional(resource, id)).await?, "CCE access policy")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let id = identifier(current)?;
    let service = ctx.service("cce").await?;

    let Some(policy) = read_result(
        service.get(&access_policy_path(id)).await,
        "error retrieving CCE access policy",
    )?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    set_paths(
        &mut attributes,
        &policy,
        &[
            ("name", "name"),
            ("clusters", "clusters"),
            ("policy_type", "policyType"),
            ("created_at", "createTime"),
            ("updated_at", "updateTime"),
        ],
    );
    if let Some(namespaces) = path_search("accessScope.namespaces", &policy) {
        set_json(&mut attributes, "access_scope", Some(&json!([{"namespaces": namespaces}])));
    }
    if let Some(principal) = path_search("principal", &policy) {
        set_json(
            &mut attributes,
            "principal",
            Some(&json!([{"type": principal.get("type"), "ids": principal.get("ids")}])),
        );
    }
    Ok(ctx.state(current, id, attributes))
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    let id = identifier(from)?;
    let service = ctx.service("cce").await?;

    service
        .put(&access_policy_path(id), &build_body(&to.attributes, false))
        .await
        .map_err(|e| ProviderError::wrap("error updating CCE access policy", e))?;

    read(ctx, &provisional(to, id)).await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let id = identifier(current)?;
    let service = ctx.service("cce").await?;
    delete_result(service.delete(&access_policy_path(id)).await, "error deleting CCE access policy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcloud_core::resource::Value;

    #[test]
    fn update_body_omits_principal() {
        let attributes = match Value::from_json(&json!({
            "name": "dev-admins",
            "clusters": ["*"],
            "access_scope": [{"namespaces": ["default", "dev"]}],
            "policy_type": "CCEClusterAdminPolicy",
            "principal": [{"type": "user", "ids": ["u-1"]}],
        })) {
            Some(Value::Map(map)) => map,
            _ => Attributes::new(),
        };

        let create = build_body(&attributes, true);
        assert_eq!(create["kind"], json!("AccessPolicy"));
        assert_eq!(create["accessScope"]["namespaces"], json!(["default", "dev"]));
        assert_eq!(create["principal"], json!({"type": "user", "ids": ["u-1"]}));

        let update = build_body(&attributes, false);
        assert!(update.get("principal").is_none());
        assert_eq!(update["policyType"], json!("CCEClusterAdminPolicy"));
    }
}
