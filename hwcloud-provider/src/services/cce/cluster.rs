//! cce_cluster - a Kubernetes cluster managed by CCE

use std::time::Duration;

use hwcloud_core::differ::Changes;
use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use hwcloud_core::timeouts::Timeouts;
use hwcloud_core::waiter::{NotFound, StateChangeConf};
use serde_json::{Map, Value as Json, json};

use super::common::{auto_pay, charging_schema, is_prepaid};
use super::job::{cluster_id_from_job, job_conf};
use super::{cluster_path, clusters_path, wait_for_cluster, wait_for_cluster_available};
use crate::client::ServiceClient;
use crate::services::{
    Context, delete_result, identifier, provisional, read_result, require_exists, required_str,
};
use crate::utils::{
    attr_json, expand_tags, flatten_tags, json_attribute, path_array, path_i64, path_search,
    path_str, remove_nil, set_json, set_paths, try_base64_encode, value_ignore_empty,
};

pub const TYPE_NAME: &str = "cce_cluster";
pub const IMPORT_FORMAT: &[&str] = &["id"];

const DELETE_SWITCHES: &[&str] = &["delete_efs", "delete_eni", "delete_evs", "delete_net", "delete_obs", "delete_sfs"];

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(30, 30, 30)
}

pub fn schema() -> ResourceSchema {
    let delete_switch = || AttributeType::one_of(&["true", "try", "false"]);
    let mut schema = ResourceSchema::new(TYPE_NAME)
        .with_description("CCE Kubernetes cluster")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("flavor_id", AttributeType::String).required())
        .attribute(AttributeSchema::new("cluster_version", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("cluster_type", AttributeType::one_of(&["VirtualMachine", "ARM64"]))
            .with_default(Value::from("VirtualMachine"))
            .force_new())
        .attribute(AttributeSchema::new("alias", AttributeType::String).computed())
        .attribute(AttributeSchema::new("timezone", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("description", AttributeType::String).computed())
        .attribute(AttributeSchema::new("labels", AttributeType::string_map()).force_new())
        .attribute(AttributeSchema::new("annotations", AttributeType::string_map()).force_new())
        .attribute(AttributeSchema::new("vpc_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("subnet_id", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("security_group_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("highway_subnet_id", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("container_network_type", AttributeType::String).required().force_new())
        .attribute(AttributeSchema::new("container_network_cidr", AttributeType::String).computed())
        .attribute(AttributeSchema::new("eni_subnet_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("eni_subnet_cidr", AttributeType::String).computed())
        .attribute(AttributeSchema::new("enable_distribute_management", AttributeType::Bool).computed().force_new())
        .attribute(AttributeSchema::new("authentication_mode", AttributeType::String)
            .with_default(Value::from("rbac"))
            .force_new())
        .attribute(AttributeSchema::new("authenticating_proxy_ca", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("authenticating_proxy_cert", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("authenticating_proxy_private_key", AttributeType::String).sensitive().force_new())
        .attribute(AttributeSchema::new("multi_az", AttributeType::Bool).force_new().conflicts_with(&["masters"]))
        .attribute(AttributeSchema::new(
            "masters",
            AttributeType::blocks(vec![AttributeSchema::new("availability_zone", AttributeType::String).computed()]),
        ).computed().force_new())
        .attribute(AttributeSchema::new("eip", AttributeType::String))
        .attribute(AttributeSchema::new("service_network_cidr", types::cidr()).computed().force_new())
        .attribute(AttributeSchema::new("kube_proxy_mode", AttributeType::one_of(&["iptables", "ipvs"])).computed().force_new())
        .attribute(AttributeSchema::new("enterprise_project_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("extend_param", AttributeType::string_map()).force_new())
        .attribute(AttributeSchema::new(
            "extend_params",
            AttributeType::blocks(vec![
                AttributeSchema::new("cluster_az", AttributeType::String),
                AttributeSchema::new("dss_master_volumes", AttributeType::String),
                AttributeSchema::new("fix_pool_mask", AttributeType::String),
                AttributeSchema::new("dec_master_flavor", AttributeType::String),
                AttributeSchema::new("docker_umask_mode", AttributeType::String),
                AttributeSchema::new("cpu_manager_policy", AttributeType::String),
            ]),
        ).force_new().conflicts_with(&["multi_az", "extend_param"]))
        .attribute(AttributeSchema::new("hibernate", AttributeType::Bool))
        .attribute(AttributeSchema::new(
            "component_configurations",
            AttributeType::blocks(vec![
                AttributeSchema::new("name", AttributeType::String).required(),
                AttributeSchema::new("configurations", types::json_string()),
            ]),
        ))
        .attribute(AttributeSchema::new(
            "encryption_config",
            AttributeType::blocks(vec![
                AttributeSchema::new("mode", AttributeType::String).computed(),
                AttributeSchema::new("kms_key_id", AttributeType::String).computed(),
            ]),
        ).computed().force_new())
        .attribute(AttributeSchema::new("custom_san", AttributeType::string_list()).computed())
        .attribute(AttributeSchema::new("ipv6_enable", AttributeType::Bool).computed().force_new())
        .attribute(AttributeSchema::new("support_istio", AttributeType::Bool).computed())
        .attribute(AttributeSchema::new("tags", AttributeType::string_map()))
        .attribute(AttributeSchema::new("delete_all", delete_switch()))
        .attribute(AttributeSchema::new("lts_reclaim_policy", AttributeType::String))
        .attribute(AttributeSchema::new("billing_mode", AttributeType::Int).computed().force_new())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("category", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("kube_config_raw", AttributeType::String).read_only().sensitive())
        .attribute(AttributeSchema::new(
            "certificate_clusters",
            AttributeType::blocks(vec![
                AttributeSchema::new("name", AttributeType::String),
                AttributeSchema::new("server", AttributeType::String),
                AttributeSchema::new("certificate_authority_data", AttributeType::String),
            ]),
        ).read_only())
        .attribute(AttributeSchema::new(
            "certificate_users",
            AttributeType::blocks(vec![
                AttributeSchema::new("name", AttributeType::String),
                AttributeSchema::new("client_certificate_data", AttributeType::String),
                AttributeSchema::new("client_key_data", AttributeType::String),
            ]),
        ).read_only().sensitive());
    for switch in DELETE_SWITCHES {
        schema = schema.attribute(AttributeSchema::new(*switch, delete_switch()));
    }
    for attribute in charging_schema() {
        schema = schema.attribute(attribute);
    }
    schema
}

// =============================================================================
// Request bodies
// =============================================================================

/// API keys of the structured `extend_params` block
const EXTEND_PARAM_KEYS: &[(&str, &str)] = &[
    ("cluster_az", "clusterAZ"),
    ("dss_master_volumes", "dssMasterVolumes"),
    ("fix_pool_mask", "alpha.cce/fixPoolMask"),
    ("dec_master_flavor", "decMasterFlavor"),
    ("docker_umask_mode", "dockerUmaskMode"),
    ("cpu_manager_policy", "kubernetes.io/cpuManagerPolicy"),
];

fn build_extend_params(ctx: &Context<'_>, attributes: &Attributes) -> Json {
    let mut legacy: Map<String, Json> = attributes
        .string_map("extend_param")
        .into_iter()
        .map(|(k, v)| (k, Json::String(v)))
        .collect();
    if attributes.flag("multi_az") {
        legacy.insert("clusterAZ".to_string(), json!("multi_az"));
    }

    let mut params = if legacy.is_empty() {
        attributes
            .block("extend_params")
            .map(|raw| {
                EXTEND_PARAM_KEYS
                    .iter()
                    .filter_map(|(attr, key)| raw.get_str(attr).map(|v| (key.to_string(), json!(v))))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        legacy
    };

    if let Some(eip) = attributes.get_str("eip") {
        params.insert("clusterExternalIP".to_string(), json!(eip));
    }
    if let Some(eps) = ctx.enterprise_project_id(attributes) {
        params.insert("enterpriseProjectId".to_string(), json!(eps));
    }
    if is_prepaid(attributes) {
        params.insert("isAutoRenew".to_string(), json!("false"));
        params.insert("isAutoPay".to_string(), json!(auto_pay(attributes)));
    }
    if let Some(unit) = attributes.get_str("period_unit") {
        params.insert("periodType".to_string(), json!(unit));
    }
    if let Some(period) = attributes.get_int("period") {
        params.insert("periodNum".to_string(), json!(period));
    }
    if let Some(renew) = attributes.get_str("auto_renew") {
        params.insert("isAutoRenew".to_string(), json!(renew));
    }
    Json::Object(params)
}

/// Master AZs; single-master flavors take one AZ and HA flavors three
fn build_masters(attributes: &Attributes) -> ProviderResult<Json> {
    let masters = attributes.blocks("masters");
    if masters.is_empty() {
        return Ok(Json::Null);
    }
    let flavor = attributes.str_or_empty("flavor_id");
    if flavor.contains("s1") && masters.len() != 1 {
        return Err(ProviderError::new(format!(
            "error creating CCE cluster: single-master cluster need 1 az for master node, but got {}",
            masters.len()
        )));
    }
    if flavor.contains("s2") && masters.len() != 3 {
        return Err(ProviderError::new(format!(
            "error creating CCE cluster: high-availability cluster need 3 az for master nodes, but got {}",
            masters.len()
        )));
    }
    Ok(Json::Array(
        masters
            .into_iter()
            .map(|m| json!({"availabilityZone": m.str_or_empty("availability_zone")}))
            .collect(),
    ))
}

fn cidr_specs(cidrs: &str) -> Json {
    if cidrs.is_empty() {
        return Json::Null;
    }
    Json::Array(cidrs.split(',').map(|c| json!({"cidr": c})).collect())
}

fn eni_network(subnet_ids: &str) -> Json {
    if subnet_ids.is_empty() {
        return Json::Null;
    }
    json!({"subnets": subnet_ids.split(',').map(|id| json!({"subnetID": id})).collect::<Vec<_>>()})
}

/// Part of a container CIDR list to add; the old list must be a prefix of the new one
fn container_cidr_increment(old: &str, new: &str) -> ProviderResult<String> {
    if old.is_empty() {
        return Ok(new.to_string());
    }
    if new.len() <= old.len() || !new.starts_with(old) {
        return Err(ProviderError::new(
            "error updating CCE cluster: the container_network_cidr can only be updated incrementally, \
             and the new value must contains the old value as a prefix",
        ));
    }
    Ok(new[old.len()..].trim_start_matches(',').to_string())
}

fn build_component_configurations(attributes: &Attributes) -> ProviderResult<Json> {
    let packages = attributes
        .blocks("component_configurations")
        .into_iter()
        .map(|raw| -> ProviderResult<Json> {
            let name = raw.str_or_empty("name");
            let configurations = json_attribute(raw, "configurations").map_err(|e| {
                ProviderError::new(format!("error unmarshalling configurations of {}", name)).with_cause(e)
            })?;
            Ok(remove_nil(json!({"name": name, "configurations": configurations})))
        })
        .collect::<ProviderResult<Vec<Json>>>()?;
    Ok(value_ignore_empty(Json::Array(packages)))
}

fn build_create_body(ctx: &Context<'_>, attributes: &Attributes) -> ProviderResult<Json> {
    let authenticating_proxy = attributes.get_str("authenticating_proxy_ca").map(|ca| {
        json!({
            "ca": try_base64_encode(ca),
            "cert": try_base64_encode(attributes.str_or_empty("authenticating_proxy_cert")),
            "privateKey": try_base64_encode(attributes.str_or_empty("authenticating_proxy_private_key")),
        })
    });
    let billing_mode = if is_prepaid(attributes) { 1 } else { 0 };

    Ok(remove_nil(json!({
        "kind": "Cluster",
        "apiVersion": "v3",
        "metadata": {
            "name": attributes.get_str("name"),
            "alias": attributes.get_str("alias"),
            "labels": attr_json(attributes, "labels"),
            "annotations": attr_json(attributes, "annotations"),
            "timezone": attributes.get_str("timezone"),
        },
        "spec": {
            "type": attributes.get_str("cluster_type"),
            "flavor": attributes.get_str("flavor_id"),
            "version": attributes.get_str("cluster_version"),
            "description": attributes.get_str("description"),
            "hostNetwork": {
                "vpc": attributes.get_str("vpc_id"),
                "subnet": attributes.get_str("subnet_id"),
                "highwaySubnet": attributes.get_str("highway_subnet_id"),
                "SecurityGroup": attributes.get_str("security_group_id"),
            },
            "containerNetwork": {
                "mode": attributes.get_str("container_network_type"),
                "cidrs": cidr_specs(attributes.str_or_empty("container_network_cidr")),
            },
            "eniNetwork": eni_network(attributes.str_or_empty("eni_subnet_id")),
            "authentication": {
                "mode": attributes.get_str("authentication_mode"),
                "authenticatingProxy": authenticating_proxy,
            },
            "billingMode": billing_mode,
            "extendParam": value_ignore_empty(build_extend_params(ctx, attributes)),
            "clusterTags": value_ignore_empty(expand_tags(&attributes.string_map("tags"))),
            "customSan": attr_json(attributes, "custom_san"),
            "ipv6enable": attributes.get_bool("ipv6_enable"),
            "kubeProxyMode": attributes.get_str("kube_proxy_mode"),
            "encryptionConfig": attributes.block("encryption_config").map(|c| json!({
                "mode": c.get_str("mode"),
                "kmsKeyID": c.get_str("kms_key_id"),
            })),
            "enableDistMgt": attributes.get_bool("enable_distribute_management"),
            "serviceNetwork": attributes.get_str("service_network_cidr").map(|cidr| json!({"IPv4CIDR": cidr})),
            "masters": build_masters(attributes)?,
            "configurationsOverride": build_component_configurations(attributes)?,
        }
    })))
}

/// Body of `PUT .../clusters/{id}`; `None` when nothing it covers changed
fn build_update_body(changes: &Changes<'_>, to: &Attributes) -> ProviderResult<Option<Json>> {
    let mut metadata = Map::new();
    let mut spec = Map::new();

    if changes.has_change("alias") {
        metadata.insert("alias".to_string(), json!(to.str_or_empty("alias")));
    }
    if changes.has_change("description") {
        spec.insert("description".to_string(), json!(to.str_or_empty("description")));
    }
    if changes.has_change("container_network_cidr") {
        let old = changes.old("container_network_cidr").and_then(Value::as_str).unwrap_or("");
        let increment = container_cidr_increment(old, to.str_or_empty("container_network_cidr"))?;
        spec.insert("containerNetwork".to_string(), json!({"cidrs": cidr_specs(&increment)}));
    }
    if changes.has_change("eni_subnet_id") {
        spec.insert("eniNetwork".to_string(), eni_network(to.str_or_empty("eni_subnet_id")));
    }
    if changes.has_change("security_group_id") {
        spec.insert(
            "hostNetwork".to_string(),
            json!({"SecurityGroup": to.str_or_empty("security_group_id")}),
        );
    }
    if changes.has_change("custom_san") {
        spec.insert("customSan".to_string(), json!(to.string_list("custom_san")));
    }

    if metadata.is_empty() && spec.is_empty() {
        return Ok(None);
    }
    let mut body = json!({"spec": spec});
    if !metadata.is_empty() {
        body["metadata"] = Json::Object(metadata);
    }
    Ok(Some(remove_nil(body)))
}

fn delete_query(attributes: &Attributes) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    match attributes.get_str("delete_all").filter(|v| *v != "false") {
        Some(all) => {
            for key in ["delete_efs", "delete_evs", "delete_obs", "delete_sfs", "delete_sfs30"] {
                query.append_pair(key, all);
            }
        }
        None => {
            for key in DELETE_SWITCHES {
                if let Some(v) = attributes.get_str(key) {
                    query.append_pair(key, v);
                }
            }
            // delete_sfs covers SFS 3.0 as well
            if let Some(v) = attributes.get_str("delete_sfs") {
                query.append_pair("delete_sfs30", v);
            }
        }
    }
    if let Some(policy) = attributes.get_str("lts_reclaim_policy") {
        query.append_pair("lts_reclaim_policy", policy);
    }
    query.finish()
}

// =============================================================================
// Lifecycle actions
// =============================================================================

async fn hibernate(service: &ServiceClient<'_>, ctx: &Context<'_>, cluster_id: &str) -> ProviderResult<()> {
    service
        .post(&format!("{}/operation/hibernate", cluster_path(cluster_id)), &json!({}))
        .await
        .map_err(|e| ProviderError::wrap("error hibernating CCE cluster", e))?;
    tracing::info!(cluster_id = %cluster_id, "waiting for CCE cluster to hibernate");

    let conf = StateChangeConf::new(&["Hibernation"])
        .pending(&["Available", "Hibernating"])
        .delay(Duration::from_secs(20))
        .poll_interval(Duration::from_secs(20))
        .timeout(ctx.timeouts.update)
        .not_found(NotFound::Fail);
    wait_for_cluster(service, ctx.cancel, cluster_id, conf).await?;
    Ok(())
}

async fn awake(service: &ServiceClient<'_>, ctx: &Context<'_>, cluster_id: &str) -> ProviderResult<()> {
    service
        .post(&format!("{}/operation/awake", cluster_path(cluster_id)), &json!({}))
        .await
        .map_err(|e| ProviderError::wrap("error awaking CCE cluster", e))?;
    tracing::info!(cluster_id = %cluster_id, "waiting for CCE cluster to wake up");

    let conf = StateChangeConf::new(&["Available"])
        .pending(&["Awaking"])
        .delay(Duration::from_secs(100))
        .poll_interval(Duration::from_secs(20))
        .timeout(ctx.timeouts.update)
        .not_found(NotFound::Fail);
    wait_for_cluster(service, ctx.cancel, cluster_id, conf).await?;
    Ok(())
}

async fn resize(
    service: &ServiceClient<'_>,
    ctx: &Context<'_>,
    cluster_id: &str,
    attributes: &Attributes,
) -> ProviderResult<()> {
    let dec_master_flavor = attributes
        .block("extend_params")
        .and_then(|p| p.get_str("dec_master_flavor"));
    let is_auto_pay = (attributes.get_str("charging_mode") == Some("prePaid")).then(|| auto_pay(attributes));
    let body = remove_nil(json!({
        "flavorResize": attributes.get_str("flavor_id"),
        "extendParam": {
            "decMasterFlavor": dec_master_flavor,
            "isAutoPay": is_auto_pay,
        }
    }));
    service
        .post(&format!("{}/operation/resize", cluster_path(cluster_id)), &body)
        .await
        .map_err(|e| ProviderError::wrap("error resizing CCE cluster", e))?;

    wait_for_cluster_available(
        service,
        ctx.cancel,
        cluster_id,
        Duration::from_secs(20),
        ctx.timeouts.update,
    )
    .await?;
    Ok(())
}

async fn update_tags(service: &ServiceClient<'_>, cluster_id: &str, changes: &Changes<'_>) -> ProviderResult<()> {
    let old = string_map(changes.old("tags"));
    let new = string_map(changes.new_value("tags"));

    if !old.is_empty() {
        service
            .post(
                &format!("{}/tags/delete", cluster_path(cluster_id)),
                &json!({"tags": expand_tags(&old)}),
            )
            .await
            .map_err(|e| ProviderError::wrap(format!("error deleting tags of CCE cluster {}", cluster_id), e))?;
    }
    if !new.is_empty() {
        service
            .post(
                &format!("{}/tags/create", cluster_path(cluster_id)),
                &json!({"tags": expand_tags(&new)}),
            )
            .await
            .map_err(|e| ProviderError::wrap(format!("error setting tags of CCE cluster {}", cluster_id), e))?;
    }
    Ok(())
}

fn string_map(value: Option<&Value>) -> std::collections::HashMap<String, String> {
    value
        .and_then(Value::as_map)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Operations
// =============================================================================

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let attributes = &resource.attributes;
    let name = required_str(attributes, "name")?;
    let service = ctx.service("cce").await?;

    let body = build_create_body(ctx, attributes)?;
    let response = service
        .post(&clusters_path(), &body)
        .await
        .map_err(|e| ProviderError::wrap("error creating CCE cluster", e))?;

    let job_id = path_str("status.jobID", &response);
    if job_id.is_empty() {
        return Err(ProviderError::new(format!(
            "error fetching job ID after creating CCE cluster: {}",
            name
        )));
    }
    let cluster_id = cluster_id_from_job(
        &service,
        ctx.cancel,
        job_id,
        job_conf(Duration::from_secs(150), ctx.timeouts.create),
    )
    .await?;
    tracing::info!(cluster_id = %cluster_id, "waiting for CCE cluster to become available");

    wait_for_cluster_available(
        &service,
        ctx.cancel,
        &cluster_id,
        Duration::from_secs(20),
        ctx.timeouts.create,
    )
    .await?;

    if attributes.flag("hibernate") {
        hibernate(&service, ctx, &cluster_id).await?;
    }

    require_exists(read(ctx, &provisional(resource, cluster_id)).await?, "CCE cluster")
}

/// Kubeconfig and certificates; failures are logged and leave the fields unset
async fn read_certificates(service: &ServiceClient<'_>, cluster_id: &str, attributes: &mut Attributes) {
    let cert = match service
        .post(&format!("{}/clustercert", cluster_path(cluster_id)), &json!({"duration": -1}))
        .await
    {
        Ok(cert) => cert,
        Err(e) => {
            tracing::warn!(cluster_id = %cluster_id, "error retrieving CCE cluster certificate: {}", e);
            return;
        }
    };

    attributes.insert("kube_config_raw".to_string(), Value::from(cert.to_string()));
    let clusters: Vec<Json> = path_array("clusters", &cert)
        .iter()
        .map(|c| {
            json!({
                "name": c.get("name"),
                "server": path_search("cluster.server", c),
                "certificate_authority_data": path_search("cluster.\"certificate-authority-data\"", c),
            })
        })
        .collect();
    let users: Vec<Json> = path_array("users", &cert)
        .iter()
        .map(|u| {
            json!({
                "name": u.get("name"),
                "client_certificate_data": path_search("user.\"client-certificate-data\"", u),
                "client_key_data": path_search("user.\"client-key-data\"", u),
            })
        })
        .collect();
    set_json(attributes, "certificate_clusters", Some(&Json::Array(clusters)));
    set_json(attributes, "certificate_users", Some(&Json::Array(users)));
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let cluster_id = identifier(current)?;
    let service = ctx.service("cce").await?;

    let Some(cluster) = read_result(service.get(&cluster_path(cluster_id)).await, "error retrieving CCE cluster")?
    else {
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    set_paths(
        &mut attributes,
        &cluster,
        &[
            ("name", "metadata.name"),
            ("alias", "metadata.alias"),
            ("timezone", "metadata.timezone"),
            ("status", "status.phase"),
            ("flavor_id", "spec.flavor"),
            ("cluster_version", "spec.version"),
            ("cluster_type", "spec.type"),
            ("description", "spec.description"),
            ("vpc_id", "spec.hostNetwork.vpc"),
            ("subnet_id", "spec.hostNetwork.subnet"),
            ("highway_subnet_id", "spec.hostNetwork.highwaySubnet"),
            ("security_group_id", "spec.hostNetwork.SecurityGroup"),
            ("container_network_type", "spec.containerNetwork.mode"),
            ("eni_subnet_cidr", "spec.eniNetwork.cidr"),
            ("authentication_mode", "spec.authentication.mode"),
            ("enterprise_project_id", "spec.extendParam.enterpriseProjectId"),
            ("service_network_cidr", "spec.serviceNetwork.IPv4CIDR"),
            ("billing_mode", "spec.billingMode"),
            ("ipv6_enable", "spec.ipv6enable"),
            ("enable_distribute_management", "spec.enableDistMgt"),
            ("kube_proxy_mode", "spec.kubeProxyMode"),
            ("support_istio", "spec.supportIstio"),
            ("custom_san", "spec.customSan"),
            ("category", "spec.category"),
        ],
    );

    let cidrs: Vec<&str> = path_array("spec.containerNetwork.cidrs", &cluster)
        .iter()
        .map(|c| path_str("cidr", c))
        .collect();
    let container_cidr = if cidrs.is_empty() {
        path_str("spec.containerNetwork.cidr", &cluster).to_string()
    } else {
        cidrs.join(",")
    };
    attributes.insert("container_network_cidr".to_string(), Value::from(container_cidr));
    attributes.insert(
        "hibernate".to_string(),
        Value::from(path_str("status.phase", &cluster) == "Hibernation"),
    );

    let eni_subnets: Vec<&str> = path_array("spec.eniNetwork.subnets", &cluster)
        .iter()
        .map(|s| path_str("subnetID", s))
        .collect();
    attributes.insert("eni_subnet_id".to_string(), Value::from(eni_subnets.join(",")));

    attributes.insert(
        "tags".to_string(),
        Value::from(flatten_tags(path_array("spec.clusterTags", &cluster))),
    );
    let masters: Vec<Json> = path_array("spec.masters", &cluster)
        .iter()
        .map(|m| json!({"availability_zone": m.get("availabilityZone")}))
        .collect();
    set_json(&mut attributes, "masters", Some(&Json::Array(masters)));
    if let Some(config) = path_search("spec.encryptionConfig", &cluster) {
        set_json(
            &mut attributes,
            "encryption_config",
            Some(&json!([{"mode": config.get("mode"), "kms_key_id": config.get("kmsKeyID")}])),
        );
    }
    if path_i64("spec.billingMode", &cluster).unwrap_or(0) != 0 {
        attributes.insert("charging_mode".to_string(), Value::from("prePaid"));
    }

    read_certificates(&service, cluster_id, &mut attributes).await;

    Ok(ctx.state(current, cluster_id, attributes))
}

pub async fn update(ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
    let cluster_id = identifier(from)?;
    let attributes = &to.attributes;
    let changes = Changes::new(from, to);
    let service = ctx.service("cce").await?;

    if let Some(body) = build_update_body(&changes, attributes)? {
        service
            .put(&cluster_path(cluster_id), &body)
            .await
            .map_err(|e| ProviderError::wrap("error updating CCE cluster", e))?;
    }

    if changes.has_change("flavor_id") {
        resize(&service, ctx, cluster_id, attributes).await?;
    }

    if changes.has_change("hibernate") {
        if attributes.flag("hibernate") {
            hibernate(&service, ctx, cluster_id).await?;
        } else {
            awake(&service, ctx, cluster_id).await?;
        }
    }

    if changes.has_change("tags") {
        update_tags(&service, cluster_id, &changes).await?;
    }

    if changes.has_change("component_configurations") {
        let body = json!({
            "apiVersion": "v3",
            "kind": "Configuration",
            "metadata": {"name": "configuration"},
            "spec": {"packages": build_component_configurations(attributes)?},
        });
        service
            .put(&format!("{}/nodepools/master/configuration", cluster_path(cluster_id)), &body)
            .await
            .map_err(|e| ProviderError::wrap("error updating CCE cluster configurations", e))?;
    }

    read(ctx, &provisional(to, cluster_id)).await
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let cluster_id = identifier(current)?;
    let service = ctx.service("cce").await?;

    let query = delete_query(&current.attributes);
    let path = if query.is_empty() {
        cluster_path(cluster_id)
    } else {
        format!("{}?{}", cluster_path(cluster_id), query)
    };
    delete_result(service.delete(&path).await, "error deleting CCE cluster")?;

    let conf = StateChangeConf::new(&["Deleted"])
        .pending(&["Deleting", "Available", "Unavailable"])
        .delay(Duration::from_secs(60))
        .poll_interval(Duration::from_secs(20))
        .timeout(ctx.timeouts.delete)
        .not_found(NotFound::Success);
    wait_for_cluster(&service, ctx.cancel, cluster_id, conf).await?;
    Ok(())
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
    fn container_cidr_only_grows_by_suffix() {
        assert_eq!(
            container_cidr_increment("172.16.0.0/16", "172.16.0.0/16,172.17.0.0/16").unwrap(),
            "172.17.0.0/16"
        );
        assert_eq!(container_cidr_increment("", "10.0.0.0/16").unwrap(), "10.0.0.0/16");
        assert!(container_cidr_increment("172.16.0.0/16,172.17.0.0/16", "172.16.0.0/16").is_err());
        assert!(container_cidr_increment("172.16.0.0/16", "10.0.0.0/16,172.16.0.0/16").is_err());
    }

    #[test]
    fn masters_must_match_flavor() {
        let single = attrs(json!({
            "flavor_id": "cce.s1.small",
            "masters": [{"availability_zone": "az1"}, {"availability_zone": "az2"}]
        }));
        assert!(build_masters(&single).is_err());

        let ha = attrs(json!({
            "flavor_id": "cce.s2.small",
            "masters": [{"availability_zone": "az1"}, {"availability_zone": "az2"}, {"availability_zone": "az3"}]
        }));
        assert_eq!(build_masters(&ha).unwrap()[2]["availabilityZone"], json!("az3"));
        assert_eq!(build_masters(&attrs(json!({}))).unwrap(), Json::Null);
    }

    #[test]
    fn delete_all_overrides_switches() {
        let attributes = attrs(json!({"delete_all": "true", "delete_evs": "false", "lts_reclaim_policy": "Delete_Log_Group"}));
        let query = delete_query(&attributes);
        assert!(query.contains("delete_evs=true"));
        assert!(query.contains("delete_sfs30=true"));
        assert!(query.contains("lts_reclaim_policy=Delete_Log_Group"));

        let attributes = attrs(json!({"delete_all": "false", "delete_sfs": "try"}));
        assert_eq!(delete_query(&attributes), "delete_sfs=try&delete_sfs30=try");
    }

    #[tokio::test]
    async fn delete_switches_survive_read() {
        use crate::client::HuaweiClient;
        use crate::config::Config;
        use tokio_util::sync::CancellationToken;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/projects/p-1/clusters/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": {"uid": "c-1", "name": "demo"},
                "spec": {"type": "VirtualMachine", "flavor": "cce.s1.small"},
                "status": {"phase": "Hibernation"}
            })))
            .mount(&server)
            .await;

        let client = HuaweiClient::new(Config {
            region: "cn-north-4".to_string(),
            project_id: "p-1".to_string(),
            token: "test-token".to_string(),
            endpoints: [("cce".to_string(), server.uri())].into_iter().collect(),
            ..Config::default()
        })
        .unwrap();
        let cancel = CancellationToken::new();
        let declared = attrs(json!({
            "name": "demo",
            "delete_all": "true",
            "labels": {"team": "core"},
            "authenticating_proxy_private_key": "secret",
        }));
        let ctx = Context::new(&client, &cancel, &declared, schema(), timeouts()).unwrap();
        let current = State::existing(hwcloud_core::resource::ResourceId::new(TYPE_NAME, "c"), declared)
            .with_identifier("c-1");

        let state = read(&ctx, &current).await.unwrap();
        assert_eq!(state.attributes.get_str("delete_all"), Some("true"));
        assert_eq!(state.attributes.string_map("labels").get("team").map(String::as_str), Some("core"));
        assert_eq!(state.attributes.get_str("authenticating_proxy_private_key"), Some("secret"));
        assert_eq!(state.attributes.get_bool("hibernate"), Some(true));

        let query = delete_query(&state.attributes);
        assert!(query.contains("delete_efs=true"), "{}", query);
        assert!(query.contains("delete_sfs30=true"), "{}", query);
    }

    #[test]
    fn update_body_sends_only_cidr_increment() {
        let from = State::existing(
            hwcloud_core::resource::ResourceId::new(TYPE_NAME, "c"),
            attrs(json!({"container_network_cidr": "172.16.0.0/16", "alias": "a"})),
        );
        let mut to = Resource::new(TYPE_NAME, "c");
        to.attributes = attrs(json!({"container_network_cidr": "172.16.0.0/16,172.17.0.0/16", "alias": "a"}));
        let changes = Changes::new(&from, &to);
        let body = build_update_body(&changes, &to.attributes).unwrap().unwrap();
        assert_eq!(body, json!({"spec": {"containerNetwork": {"cidrs": [{"cidr": "172.17.0.0/16"}]}}}));
    }
}
