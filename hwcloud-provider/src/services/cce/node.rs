//! cce_node - a worker node of a CCE cluster
//!
//! Creation is asynchronous: the API answers with a job whose `InstallNode`
//! sub-job carries the node ID.

use std::time::Duration;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::differ::Changes;
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
use super::job::{job_conf, resource_id_from_job};
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

pub const TYPE_NAME: &str = "cce_node";
pub const IMPORT_FORMAT: &[&str] = &["cluster_id", "id"];

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(20, 20, 20)
}

pub fn schema() -> ResourceSchema {
    let mut schema = ResourceSchema::new(TYPE_NAME)
        .with_description("Worker node of a CCE cluster")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("cluster_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("flavor_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("availability_zone", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).computed())
        .attribute(AttributeSchema::new("os", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("runtime", AttributeType::one_of(&["docker", "containerd"])).computed().force_new())
        .attribute(AttributeSchema::new("subnet_id", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("enterprise_project_id", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("key_pair", AttributeType::String).force_new().conflicts_with(&["password"]))
        .attribute(AttributeSchema::new("password", AttributeType::String).sensitive().force_new())
        .attribute(AttributeSchema::new("private_key", AttributeType::String).sensitive())
        .attribute(AttributeSchema::new("eip_id", AttributeType::String).force_new().conflicts_with(&["eip_ids"]))
        .attribute(AttributeSchema::new("eip_ids", AttributeType::string_list()).force_new())
        .attribute(AttributeSchema::new("iptype", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("bandwidth_charge_mode", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("sharetype", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("bandwidth_size", AttributeType::Int).force_new())
        .attribute(AttributeSchema::new("ecs_group_id", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("ecs_performance_type", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("product_id", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("max_pods", AttributeType::Int).force_new())
        .attribute(AttributeSchema::new("public_key", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("preinstall", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("postinstall", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("extend_param", AttributeType::string_map()).force_new())
        .attribute(extend_params_schema())
        .attribute(AttributeSchema::new("labels", AttributeType::string_map()).force_new())
        .attribute(AttributeSchema::new("annotations", AttributeType::string_map()).force_new())
        .attribute(AttributeSchema::new("tags", AttributeType::string_map()).computed().force_new())
        .attribute(taints_schema().force_new())
        .attribute(AttributeSchema::new("fixed_ip", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new(
            "extension_nics",
            AttributeType::blocks(vec![AttributeSchema::new("subnet_id", AttributeType::String).required()]),
        ).computed().force_new())
        .attribute(AttributeSchema::new("dedicated_host_id", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("initialized_conditions", AttributeType::string_list()).computed().force_new())
        .attribute(AttributeSchema::new(
            "hostname_config",
            AttributeType::blocks(vec![AttributeSchema::new("type", AttributeType::String).required()]),
        ).computed().force_new())
        .attribute(AttributeSchema::new("partition", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("keep_ecs", AttributeType::Bool))
        .attribute(root_volume_schema())
        .attribute(data_volumes_schema())
        .attribute(AttributeSchema::new("billing_mode", AttributeType::Int).computed().force_new())
        .attribute(AttributeSchema::new("private_ip", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("public_ip", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("server_id", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only());
    for attribute in charging_schema() {
        schema = schema.attribute(attribute);
    }
    schema
}

fn nodes_path(cluster_id: &str) -> String {
    format!("{}/nodes", cluster_path(cluster_id))
}

fn node_path(cluster_id: &str, node_id: &str) -> String {
    format!("{}/nodes/{}", cluster_path(cluster_id), node_id)
}

// =============================================================================
// Request body
// =============================================================================

fn build_public_ip(attributes: &Attributes) -> Json {
    let ids = match attributes.get_str("eip_id") {
        Some(id) => vec![id.to_string()],
        None => attributes.string_list("eip_ids"),
    };
    let mut public_ip = json!({ "ids": value_ignore_empty(json!(ids)) });
    if let Some(size) = attributes.get_int("bandwidth_size") {
        public_ip["count"] = json!(1);
        public_ip["eip"] = json!({
            "iptype": attributes.get_str("iptype"),
            "bandwidth": {
                "chargemode": attributes.get_str("bandwidth_charge_mode"),
                "size": size,
                "sharetype": attributes.get_str("sharetype"),
            }
        });
    }
    value_ignore_empty(remove_nil(public_ip))
}

fn build_nic_spec(attributes: &Attributes) -> Json {
    let ext_nics: Vec<Json> = attributes
        .blocks("extension_nics")
        .into_iter()
        .map(|nic| json!({"subnetId": nic.get_str("subnet_id")}))
        .collect();
    json!({
        "primaryNic": {
            "subnetId": attributes.get_str("subnet_id"),
            "fixedIps": attributes.get_str("fixed_ip").map(|ip| vec![ip]),
        },
        "extNics": value_ignore_empty(json!(ext_nics)),
    })
}

fn build_create_body(attributes: &Attributes) -> Json {
    let billing_mode = if is_prepaid(attributes) { 1 } else { 0 };
    let body = json!({
        "kind": "Node",
        "apiVersion": "v3",
        "metadata": {
            "name": attributes.get_str("name"),
            "annotations": attr_json(attributes, "annotations"),
        },
        "spec": {
            "flavor": attributes.get_str("flavor_id"),
            "az": attributes.get_str("availability_zone"),
            "os": attributes.get_str("os"),
            "login": build_login(attributes),
            "rootVolume": build_root_volume(attributes),
            "dataVolumes": build_data_volumes(attributes),
            "publicIP": build_public_ip(attributes),
            "billingMode": billing_mode,
            "count": 1,
            "nodeNicSpec": build_nic_spec(attributes),
            "ecsGroupId": attributes.get_str("ecs_group_id"),
            "extendParam": value_ignore_empty(build_extend_params(attributes)),
            "taints": value_ignore_empty(build_taints(attributes)),
            "k8sTags": attr_json(attributes, "labels"),
            "userTags": value_ignore_empty(expand_tags(&attributes.string_map("tags"))),
            "dedicatedHostId": attributes.get_str("dedicated_host_id"),
            "initializedConditions": attr_json(attributes, "initialized_conditions"),
            "hostnameConfig": attributes.block("hostname_config").map(|c| json!({"type": c.get_str("type")})),
            "partition": attributes.get_str("partition"),
            "runtime": attributes.get_str("runtime").map(|name| json!({"name": name})),
            "serverEnterpriseProjectID": attributes.get_str("enterprise_project_id"),
        }
    });
    remove_nil(body)
}

// =============================================================================
// Waits
// =============================================================================

async fn wait_for_node(
    service: &ServiceClient<'_>,
    cancel: &CancellationToken,
    cluster_id: &str,
    node_id: &str,
    conf: StateChangeConf,
) -> ProviderResult<()> {
    let path = node_path(cluster_id, node_id);
    let path = path.as_str();
    conf.wait(cancel, move || async move { observe(service.get(path).await, "status.phase") })
        .await
        .map_err(|e| ProviderError::wrap(format!("error waiting for CCE node ({})", node_id), e))?;
    Ok(())
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

    let body = build_create_body(attributes);
    let response = service
        .post(&nodes_path(cluster_id), &body)
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE node", e))?;
    let job_id = path_str("status.jobID", &response);
    if job_id.is_empty() {
        return Err(ProviderError::new("error creating CCE node: no job ID in response"));
    }

    let node_id = resource_id_from_job(
        &service,
        ctx.cancel,
        job_id,
        "CreateNode",
        "InstallNode",
        job_conf(Duration::from_secs(120), ctx.timeouts.create),
    )
    .await?;
    tracing::info!(cluster_id = %cluster_id, node_id = %node_id, "CCE node created, waiting for it to become active");

    let conf = StateChangeConf::new(&["Active"])
        .pending(&["Build", "Installing"])
        .delay(Duration::from_secs(20))
        .poll_interval(Duration::from_secs(20))
        .timeout(ctx.timeouts.create)
        .not_found(NotFound::Fail);
    wait_for_node(&service, ctx.cancel, cluster_id, &node_id, conf).await?;

    require_exists(read(ctx, &provisional(resource, node_id)).await?, "CCE node")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let node_id = identifier(current)?;
    let cluster_id = required_str(&current.attributes, "cluster_id")?;
    let service = ctx.service("cce").await?;

    let Some(node) = read_result(
        service.get(&node_path(cluster_id, node_id)).await,
        "error retrieving CCE node",
    )?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    attributes.insert("cluster_id".to_string(), Value::from(cluster_id));
    set_paths(
        &mut attributes,
        &node,
        &[
            ("name", "metadata.name"),
            ("flavor_id", "spec.flavor"),
            ("availability_zone", "spec.az"),
            ("os", "spec.os"),
            ("key_pair", "spec.login.sshKey"),
            ("subnet_id", "spec.nodeNicSpec.primaryNic.subnetId"),
            ("ecs_group_id", "spec.ecsGroupId"),
            ("server_id", "status.serverId"),
            ("private_ip", "status.privateIP"),
            ("public_ip", "status.publicIP"),
            ("status", "status.phase"),
            ("initialized_conditions", "spec.initializedConditions"),
            ("enterprise_project_id", "spec.serverEnterpriseProjectID"),
            ("runtime", "spec.runtime.name"),
            ("billing_mode", "spec.billingMode"),
        ],
    );

    let declared = &current.attributes;
    set_json(
        &mut attributes,
        "root_volume",
        Some(&flatten_root_volume(path_search("spec.rootVolume", &node), declared)),
    );
    set_json(
        &mut attributes,
        "data_volumes",
        Some(&flatten_data_volumes(path_array("spec.dataVolumes", &node), declared)),
    );
    set_json(
        &mut attributes,
        "extend_params",
        Some(&flatten_extend_params(path_search("spec.extendParam", &node), declared)),
    );
    let taints = path_array("spec.taints", &node);
    if !taints.is_empty() {
        set_json(&mut attributes, "taints", Some(&flatten_taints(taints)));
    }
    attributes.insert(
        "tags".to_string(),
        Value::from(flatten_tags(path_array("spec.userTags", &node))),
    );
    if let Some(hostname_type) = path_search("spec.hostnameConfig.type", &node) {
        set_json(&mut attributes, "hostname_config", Some(&json!([{"type": hostname_type}])));
    }
    let ext_nics: Vec<Json> = path_array("spec.nodeNicSpec.extNics", &node)
        .iter()
        .map(|nic| json!({"subnet_id": nic.get("subnetId")}))
        .collect();
    if !ext_nics.is_empty() {
        set_json(&mut attributes, "extension_nics", Some(&Json::Array(ext_nics)));
    }
    if path_i64("spec.billingMode", &node).unwrap_or(0) != 0 {
        attributes.insert("charging_mode".to_string(), Value::from("prePaid"));
    }

    Ok(ctx.state(current, node_id, attributes))
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    let node_id = identifier(from)?;
    let cluster_id = required_str(&to.attributes, "cluster_id")?;
    let changes = Changes::new(from, to);

    if changes.has_change("name") {
        let service = ctx.service("cce").await?;
        let body = json!({"metadata": {"name": to.attributes.str_or_empty("name")}});
        service
            .put(&node_path(cluster_id, node_id), &body)
            .await
            .map_err(|e| ProviderError::wrap("error updating CCE node", e))?;
    }

    read(ctx, &provisional(to, node_id)).await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let node_id = identifier(current)?;
    let attributes = &current.attributes;
    let cluster_id = required_str(attributes, "cluster_id")?;
    let service = ctx.service("cce").await?;

    if attributes.flag("keep_ecs") {
        let body = json!({
            "spec": {
                "login": build_login(attributes),
                "nodes": [{"uid": node_id}],
            }
        });
        service
            .put(&format!("{}/operation/remove", nodes_path(cluster_id)), &body)
            .await
            .map_err(|e| ProviderError::wrap("error removing CCE node", e))?;
    } else {
        delete_result(
            service.delete(&node_path(cluster_id, node_id)).await,
            "error deleting CCE node",
        )?;
    }

    let conf = StateChangeConf::new(&["Deleted"])
        .pending(&["Deleting"])
        .delay(Duration::from_secs(60))
        .poll_interval(Duration::from_secs(20))
        .timeout(ctx.timeouts.delete)
        .not_found(NotFound::Success);
    wait_for_node(&service, ctx.cancel, cluster_id, node_id, conf).await
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
    fn create_body_maps_spec_fields() {
        let attributes = attrs(json!({
            "cluster_id": "c-1",
            "name": "worker",
            "flavor_id": "s6.large.2",
            "availability_zone": "cn-north-4a",
            "key_pair": "kp-1",
            "subnet_id": "sub-1",
            "fixed_ip": "192.168.0.10",
            "labels": {"role": "web"},
            "tags": {"owner": "ops"},
            "root_volume": [{"size": 40, "volumetype": "SSD"}],
            "data_volumes": [{"size": 100, "volumetype": "SSD"}],
            "taints": [{"key": "k", "value": "v", "effect": "NoSchedule"}],
            "runtime": "containerd",
        }));
        let body = build_create_body(&attributes);
        let spec = &body["spec"];
        assert_eq!(spec["flavor"], json!("s6.large.2"));
        assert_eq!(spec["login"], json!({"sshKey": "kp-1"}));
        assert_eq!(spec["billingMode"], json!(0));
        assert_eq!(spec["count"], json!(1));
        assert_eq!(spec["nodeNicSpec"]["primaryNic"]["fixedIps"], json!(["192.168.0.10"]));
        assert_eq!(spec["k8sTags"], json!({"role": "web"}));
        assert_eq!(spec["userTags"], json!([{"key": "owner", "value": "ops"}]));
        assert_eq!(spec["runtime"], json!({"name": "containerd"}));
        assert_eq!(spec["taints"][0]["effect"], json!("NoSchedule"));
        assert!(spec.get("publicIP").is_none());
        assert!(spec.get("extendParam").is_none());
    }

    #[test]
    fn public_ip_with_bandwidth_requests_one_eip() {
        let attributes = attrs(json!({
            "iptype": "5_bgp",
            "bandwidth_charge_mode": "traffic",
            "sharetype": "PER",
            "bandwidth_size": 100,
        }));
        let public_ip = build_public_ip(&attributes);
        assert_eq!(public_ip["count"], json!(1));
        assert_eq!(public_ip["eip"]["bandwidth"]["size"], json!(100));
        assert!(public_ip.get("ids").is_none());

        let with_id = attrs(json!({"eip_id": "eip-1", "eip_ids": ["eip-2"]}));
        assert_eq!(build_public_ip(&with_id), json!({"ids": ["eip-1"]}));
    }

    #[test]
    fn prepaid_node_sets_billing_mode() {
        let attributes = attrs(json!({"charging_mode": "prePaid", "period_unit": "month", "period": 1}));
        let body = build_create_body(&attributes);
        assert_eq!(body["spec"]["billingMode"], json!(1));
        assert_eq!(body["spec"]["extendParam"]["periodNum"], json!(1));
    }
}
