//! cce_node_pool - an autoscaling group of CCE nodes sharing one template

use std::time::Duration;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use hwcloud_core::waiter::{NotFound, StateChangeConf};
use serde_json::{Value as Json, json};
use tokio_util::sync::CancellationToken;

use super::common::{
    build_data_volumes, build_extend_params, build_login, build_root_volume, build_taints,
    charging_schema, data_volumes_schema, extend_params_schema, flatten_data_volumes,
    flatten_extend_params, flatten_root_volume, flatten_taints, is_prepaid, root_volume_schema,
    taints_schema,
};
use super::{cluster_path, wait_for_cluster_available};
use crate::client::ServiceClient;
use crate::services::{
    Context, delete_result, identifier, observe, provisional, read_result, require_exists,
    required_str,
};
use crate::utils::{
    attr_json, expand_tags, flatten_tags, path_array, path_i64, path_search, path_str, remove_nil,
    set_json, set_paths, value_ignore_empty,
};

pub const TYPE_NAME: &str = "cce_node_pool";
pub const IMPORT_FORMAT: &[&str] = &["cluster_id", "id"];

/// Labels the service adds to every node template
const SYSTEM_LABEL_MARKER: &str = "cce.cloud.com";

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(20, 20, 20)
}

pub fn schema() -> ResourceSchema {
    let policy = || AttributeType::one_of(&["ignore", "refresh"]);
    let mut schema = ResourceSchema::new(TYPE_NAME)
        .with_description("Node pool of a CCE cluster")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("cluster_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required())
        .attribute(AttributeSchema::new("initial_node_count", AttributeType::Int).required())
        .attribute(AttributeSchema::new("ignore_initial_node_count", AttributeType::Bool).with_default(Value::Bool(true)))
        .attribute(AttributeSchema::new("flavor_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("type", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("availability_zone", AttributeType::String).with_default(Value::from("random")).force_new())
        .attribute(AttributeSchema::new("os", AttributeType::String).computed())
        .attribute(AttributeSchema::new("key_pair", AttributeType::String).force_new().conflicts_with(&["password"]))
        .attribute(AttributeSchema::new("password", AttributeType::String).sensitive().force_new())
        .attribute(AttributeSchema::new("subnet_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("subnet_list", AttributeType::string_list()).computed())
        .attribute(AttributeSchema::new("ecs_group_id", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("security_groups", AttributeType::string_list()).computed().force_new())
        .attribute(AttributeSchema::new("pod_security_groups", AttributeType::string_list()).force_new())
        .attribute(AttributeSchema::new("scall_enable", AttributeType::Bool).computed())
        .attribute(AttributeSchema::new("min_node_count", AttributeType::Int).computed())
        .attribute(AttributeSchema::new("max_node_count", AttributeType::Int).computed())
        .attribute(AttributeSchema::new("scale_down_cooldown_time", AttributeType::Int).computed())
        .attribute(AttributeSchema::new("priority", AttributeType::Int).computed())
        .attribute(AttributeSchema::new("labels", AttributeType::string_map()).computed())
        .attribute(AttributeSchema::new("tags", AttributeType::string_map()).computed())
        .attribute(taints_schema())
        .attribute(AttributeSchema::new("initialized_conditions", AttributeType::string_list()).computed())
        .attribute(AttributeSchema::new(
            "hostname_config",
            AttributeType::blocks(vec![AttributeSchema::new("type", AttributeType::String).required()]),
        ).computed().force_new())
        .attribute(AttributeSchema::new("enterprise_project_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("runtime", AttributeType::one_of(&["docker", "containerd"])).computed().force_new())
        .attribute(AttributeSchema::new("partition", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("max_pods", AttributeType::Int).force_new())
        .attribute(AttributeSchema::new("preinstall", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("postinstall", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("extend_param", AttributeType::string_map()).force_new())
        .attribute(extend_params_schema())
        .attribute(AttributeSchema::new("label_policy_on_existing_nodes", policy()).computed())
        .attribute(AttributeSchema::new("tag_policy_on_existing_nodes", policy()).computed())
        .attribute(AttributeSchema::new("taint_policy_on_existing_nodes", policy()).computed())
        .attribute(root_volume_schema())
        .attribute(data_volumes_schema())
        .attribute(AttributeSchema::new("billing_mode", AttributeType::Int).read_only())
        .attribute(AttributeSchema::new("current_node_count", AttributeType::Int).read_only())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only());
    for attribute in charging_schema() {
        schema = schema.attribute(attribute);
    }
    schema
}

fn node_pools_path(cluster_id: &str) -> String {
    format!("{}/nodepools", cluster_path(cluster_id))
}

fn node_pool_path(cluster_id: &str, pool_id: &str) -> String {
    format!("{}/nodepools/{}", cluster_path(cluster_id), pool_id)
}

// =============================================================================
// Request bodies
// =============================================================================

fn build_autoscaling(attributes: &Attributes) -> Json {
    json!({
        "enable": attributes.flag("scall_enable"),
        "minNodeCount": attributes.get_int("min_node_count"),
        "maxNodeCount": attributes.get_int("max_node_count"),
        "scaleDownCooldownTime": attributes.get_int("scale_down_cooldown_time"),
        "priority": attributes.get_int("priority"),
    })
}

fn build_nic_spec(attributes: &Attributes) -> Json {
    json!({
        "primaryNic": {
            "subnetId": attributes.get_str("subnet_id"),
            "subnetList": attr_json(attributes, "subnet_list"),
        }
    })
}

fn build_create_body(ctx: &Context<'_>, attributes: &Attributes) -> Json {
    let billing_mode = if is_prepaid(attributes) { 1 } else { 0 };
    let pod_security_groups: Vec<Json> = attributes
        .string_list("pod_security_groups")
        .into_iter()
        .map(|id| json!({"id": id}))
        .collect();

    remove_nil(json!({
        "kind": "NodePool",
        "apiVersion": "v3",
        "metadata": {"name": attributes.get_str("name")},
        "spec": {
            "type": attributes.get_str("type"),
            "nodeTemplate": {
                "flavor": attributes.get_str("flavor_id"),
                "az": attributes.get_str("availability_zone"),
                "os": attributes.get_str("os"),
                "login": build_login(attributes),
                "rootVolume": build_root_volume(attributes),
                "dataVolumes": build_data_volumes(attributes),
                "k8sTags": attr_json(attributes, "labels"),
                "billingMode": billing_mode,
                "count": 1,
                "nodeNicSpec": build_nic_spec(attributes),
                "extendParam": value_ignore_empty(build_extend_params(attributes)),
                "taints": value_ignore_empty(build_taints(attributes)),
                "userTags": value_ignore_empty(expand_tags(&attributes.string_map("tags"))),
                "initializedConditions": attr_json(attributes, "initialized_conditions"),
                "hostnameConfig": attributes.block("hostname_config").map(|c| json!({"type": c.get_str("type")})),
                "serverEnterpriseProjectID": ctx.enterprise_project_id(attributes),
                "runtime": attributes.get_str("runtime").map(|name| json!({"name": name})),
                "partition": attributes.get_str("partition"),
            },
            "autoscaling": build_autoscaling(attributes),
            "initialNodeCount": attributes.get_value("initial_node_count").and_then(Value::as_int).unwrap_or(0),
            "podSecurityGroups": value_ignore_empty(json!(pod_security_groups)),
            "customSecurityGroups": attr_json(attributes, "security_groups"),
            "nodeManagement": {"serverGroupReference": attributes.get_str("ecs_group_id")},
            "labelPolicyOnExistingNodes": attributes.get_str("label_policy_on_existing_nodes"),
            "userTagPolicyOnExistingNodes": attributes.get_str("tag_policy_on_existing_nodes"),
            "taintPolicyOnExistingNodes": attributes.get_str("taint_policy_on_existing_nodes"),
        }
    }))
}

fn build_update_body(ctx: &Context<'_>, attributes: &Attributes) -> Json {
    let ignore_initial_node_count = attributes.flag("ignore_initial_node_count");
    let initial_node_count = if ignore_initial_node_count {
        None
    } else {
        attributes.get_value("initial_node_count").and_then(Value::as_int)
    };

    remove_nil(json!({
        "metadata": {"name": attributes.get_str("name")},
        "spec": {
            "initialNodeCount": initial_node_count,
            "ignoreInitialNodeCount": ignore_initial_node_count,
            "autoscaling": build_autoscaling(attributes),
            "nodeTemplate": {
                "userTags": expand_tags(&attributes.string_map("tags")),
                "k8sTags": attributes.get_value("labels").map(Value::to_json).unwrap_or(json!({})),
                "taints": build_taints(attributes),
                "initializedConditions": attr_json(attributes, "initialized_conditions"),
                "serverEnterpriseProjectID": ctx.enterprise_project_id(attributes),
                "os": attributes.get_str("os"),
                "nodeNicSpecUpdate": build_nic_spec(attributes),
            },
            "labelPolicyOnExistingNodes": attributes.get_str("label_policy_on_existing_nodes"),
            "userTagPolicyOnExistingNodes": attributes.get_str("tag_policy_on_existing_nodes"),
            "taintPolicyOnExistingNodes": attributes.get_str("taint_policy_on_existing_nodes"),
        }
    }))
}

// =============================================================================
// Waits
// =============================================================================

/// Poll a node pool; an empty phase means the pool is settled
async fn wait_for_node_pool(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    cluster_id: &str,
    pool_id: &str,
    conf: StateChangeConf,
) -> ProviderResult<()> {
    let path = node_pool_path(cluster_id, pool_id);
    let path = path.as_str();
    conf.wait(cancel, move || async move { observe(service.get(path).await, "status.phase") })
        .await
        .map_err(|e| ProviderError::wrap(format!("error waiting for CCE node pool ({})", pool_id), e))?;
    Ok(())
}

fn settled_conf(delay: Duration, interval: Duration, timeout: Duration) -> StateChangeConf {
    StateChangeConf::new(&[""])
        .pending(&["Synchronizing", "Synchronized", "SoldOut"])
        .delay(delay)
        .poll_interval(interval)
        .timeout(timeout)
        .not_found(NotFound::Fail)
}

// =============================================================================
// Operations
// =============================================================================

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    let cluster_id = required_str(attributes, "cluster_id")?;
    let service = ctx.service("cce").await?;

    wait_for_cluster_available(
        &service,
        ctx.cancel,
        cluster_id,
        Duration::from_secs(5),
        ctx.timeouts.create,
    )
    .await?;

    let response = service
        .post(&node_pools_path(cluster_id), &build_create_body(ctx, attributes))
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE node pool", e))?;
    let pool_id = path_str("metadata.id", &response);
    if pool_id.is_empty() {
        return Err(ProviderError::new(
            "error fetching resource ID from the API response of CCE node pool",
        ));
    }
    tracing::info!(cluster_id = %cluster_id, pool_id = %pool_id, "CCE node pool created");

    wait_for_node_pool(
        &service,
        ctx.cancel,
        cluster_id,
        pool_id,
        settled_conf(Duration::from_secs(120), Duration::from_secs(20), ctx.timeouts.create),
    )
    .await?;

    require_exists(read(ctx, &provisional(resource, pool_id)).await?, "CCE node pool")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let pool_id = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.service("cce").await?;

    let Some(pool) = read_result(
        service.get(&node_pool_path(cluster_id, pool_id)).await,
        "error retrieving CCE node pool",
    )?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    attributes.insert("cluster_id".to_string(), Value::from(cluster_id));
    set_paths(
        &mut attributes,
        &pool,
        &[
            ("name", "metadata.name"),
            ("flavor_id", "spec.nodeTemplate.flavor"),
            ("availability_zone", "spec.nodeTemplate.az"),
            ("os", "spec.nodeTemplate.os"),
            ("billing_mode", "spec.nodeTemplate.billingMode"),
            ("key_pair", "spec.nodeTemplate.login.sshKey"),
            ("scall_enable", "spec.autoscaling.enable"),
            ("min_node_count", "spec.autoscaling.minNodeCount"),
            ("max_node_count", "spec.autoscaling.maxNodeCount"),
            ("scale_down_cooldown_time", "spec.autoscaling.scaleDownCooldownTime"),
            ("priority", "spec.autoscaling.priority"),
            ("initial_node_count", "spec.initialNodeCount"),
            ("current_node_count", "status.currentNode"),
            ("type", "spec.type"),
            ("ecs_group_id", "spec.nodeManagement.serverGroupReference"),
            ("security_groups", "spec.customSecurityGroups"),
            ("status", "status.phase"),
            ("initialized_conditions", "spec.nodeTemplate.initializedConditions"),
            ("label_policy_on_existing_nodes", "spec.labelPolicyOnExistingNodes"),
            ("tag_policy_on_existing_nodes", "spec.userTagPolicyOnExistingNodes"),
            ("taint_policy_on_existing_nodes", "spec.taintPolicyOnExistingNodes"),
            ("enterprise_project_id", "spec.nodeTemplate.serverEnterpriseProjectID"),
            ("subnet_id", "spec.nodeTemplate.nodeNicSpec.primaryNic.subnetId"),
            ("subnet_list", "spec.nodeTemplate.nodeNicSpec.primaryNic.subnetList"),
            ("runtime", "spec.nodeTemplate.runtime.name"),
        ],
    );

    let declared = &current.attributes;
    let template = path_search("spec.nodeTemplate", &pool).cloned().unwrap_or(Json::Null);
    set_json(
        &mut attributes,
        "root_volume",
        Some(&flatten_root_volume(template.get("rootVolume"), declared)),
    );
    set_json(
        &mut attributes,
        "data_volumes",
        Some(&flatten_data_volumes(path_array("dataVolumes", &template), declared)),
    );
    set_json(
        &mut attributes,
        "extend_params",
        Some(&flatten_extend_params(template.get("extendParam"), declared)),
    );
    set_json(&mut attributes, "taints", Some(&flatten_taints(path_array("taints", &template))));
    attributes.insert(
        "tags".to_string(),
        Value::from(flatten_tags(path_array("userTags", &template))),
    );
    if let Some(hostname_type) = path_search("hostnameConfig.type", &template) {
        set_json(&mut attributes, "hostname_config", Some(&json!([{"type": hostname_type}])));
    }

    let labels: Json = template
        .get("k8sTags")
        .and_then(Json::as_object)
        .map(|tags| {
            tags.iter()
                .filter(|(k, _)| !k.contains(SYSTEM_LABEL_MARKER))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    attributes.insert(
        "labels".to_string(),
        Value::from_json(&labels).unwrap_or(Value::Map(Default::default())),
    );

    if path_i64("billingMode", &template).unwrap_or(0) != 0 {
        attributes.insert("charging_mode".to_string(), Value::from("prePaid"));
        set_paths(
            &mut attributes,
            &template,
            &[
                ("period_unit", "extendParam.periodType"),
                ("period", "extendParam.periodNum"),
                ("auto_renew", "extendParam.isAutoRenew"),
            ],
        );
    }

    Ok(ctx.state(current, pool_id, attributes))
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    let pool_id = identifier(from)?;
    let cluster_id = required_str(&to.attributes, "cluster_id")?;
    let service = ctx.service("cce").await?;

    service
        .put(&node_pool_path(cluster_id, pool_id), &build_update_body(ctx, &to.attributes))
        .await
        .map_err(|e| ProviderError::wrap(format!("error updating CCE node pool ({})", pool_id), e))?;

    wait_for_node_pool(
        &service,
        ctx.cancel,
        cluster_id,
        pool_id,
        settled_conf(Duration::from_secs(60), Duration::from_secs(10), ctx.timeouts.update),
    )
    .await?;

    read(ctx, &provisional(to, pool_id)).await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let pool_id = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.service("cce").await?;

    delete_result(
        service.delete(&node_pool_path(cluster_id, pool_id)).await,
        "error deleting CCE node pool",
    )?;

    let conf = StateChangeConf::new(&["Deleted"])
        .pending(&["Deleting"])
        .delay(Duration::from_secs(60))
        .poll_interval(Duration::from_secs(20))
        .timeout(ctx.timeouts.delete)
        .not_found(NotFound::Success);
    wait_for_node_pool(&service, ctx.cancel, cluster_id, pool_id, conf).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HuaweiClient;
    use crate::config::Config;

    fn attrs(value: Json) -> Attributes {
        match Value::from_json(&value) {
            Some(Value::Map(map)) => map,
            _ => Attributes::new(),
        }
    }

    fn client() -> HuaweiClient {
        HuaweiClient::new(Config {
            region: "cn-north-4".to_string(),
            project_id: "p-1".to_string(),
            token: "test-token".to_string(),
            enterprise_project_id: "eps-default".to_string(),
            ..Config::default()
        })
        .unwrap()
    }

    #[test]
    fn create_body_builds_template_and_autoscaling() {
        let client = client();
        let cancel = CancellationToken::new();
        let attributes = attrs(json!({
            "cluster_id": "c-1",
            "name": "pool",
            "initial_node_count": 2,
            "flavor_id": "c7.large.2",
            "availability_zone": "random",
            "key_pair": "kp-1",
            "scall_enable": true,
            "min_node_count": 1,
            "max_node_count": 5,
            "pod_security_groups": ["sg-1"],
            "labels": {"pool": "web"},
        }));
        let ctx = Context::new(&client, &cancel, &attributes, schema(), timeouts()).unwrap();
        let body = build_create_body(&ctx, &attributes);

        assert_eq!(body["kind"], json!("NodePool"));
        assert_eq!(body["spec"]["initialNodeCount"], json!(2));
        assert_eq!(body["spec"]["podSecurityGroups"], json!([{"id": "sg-1"}]));
        assert_eq!(body["spec"]["autoscaling"]["maxNodeCount"], json!(5));
        let template = &body["spec"]["nodeTemplate"];
        assert_eq!(template["login"], json!({"sshKey": "kp-1"}));
        assert_eq!(template["k8sTags"], json!({"pool": "web"}));
        assert_eq!(template["serverEnterpriseProjectID"], json!("eps-default"));
        assert!(template.get("userTags").is_none());
    }

    #[test]
    fn update_body_honours_ignore_initial_node_count() {
        let client = client();
        let cancel = CancellationToken::new();
        let ignored = attrs(json!({"name": "pool", "initial_node_count": 3, "ignore_initial_node_count": true}));
        let ctx = Context::new(&client, &cancel, &ignored, schema(), timeouts()).unwrap();
        let body = build_update_body(&ctx, &ignored);
        assert!(body["spec"].get("initialNodeCount").is_none());
        assert_eq!(body["spec"]["nodeTemplate"]["k8sTags"], json!({}));

        let applied = attrs(json!({"name": "pool", "initial_node_count": 3, "ignore_initial_node_count": false}));
        let body = build_update_body(&ctx, &applied);
        assert_eq!(body["spec"]["initialNodeCount"], json!(3));
    }
}
