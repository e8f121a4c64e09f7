//! Building blocks shared by CCE nodes, node pools and clusters
//!
//! Volumes, taints, login, extend params and charging attributes appear on
//! several resources with the same shape.

use std::collections::HashMap;

use hwcloud_core::resource::{AttributeMap, Attributes, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, types};
use serde_json::{Map, Value as Json, json};

use crate::utils::{remove_nil, try_base64_encode, value_ignore_empty};

type Block = HashMap<String, Value>;

// =============================================================================
// Schema fragments
// =============================================================================

fn volume_fields() -> Vec<AttributeSchema> {
    vec![
        AttributeSchema::new("size", types::positive_int()).required(),
        AttributeSchema::new("volumetype", AttributeType::String).required(),
        AttributeSchema::new("extend_params", AttributeType::string_map()).computed(),
        AttributeSchema::new("kms_key_id", AttributeType::String).computed(),
        AttributeSchema::new("dss_pool_id", AttributeType::String).computed(),
        AttributeSchema::new("iops", AttributeType::Int).computed(),
        AttributeSchema::new("throughput", AttributeType::Int).computed(),
        AttributeSchema::new("hw_passthrough", AttributeType::Bool).computed(),
    ]
}

pub fn root_volume_schema() -> AttributeSchema {
    AttributeSchema::new("root_volume", AttributeType::blocks(volume_fields()))
        .required()
        .force_new()
}

pub fn data_volumes_schema() -> AttributeSchema {
    AttributeSchema::new("data_volumes", AttributeType::blocks(volume_fields()))
        .computed()
        .force_new()
}

pub fn taints_schema() -> AttributeSchema {
    AttributeSchema::new(
        "taints",
        AttributeType::blocks(vec![
            AttributeSchema::new("key", AttributeType::String).required(),
            AttributeSchema::new("value", AttributeType::String),
            AttributeSchema::new(
                "effect",
                AttributeType::one_of(&["NoSchedule", "PreferNoSchedule", "NoExecute"]),
            )
            .required(),
        ]),
    )
}

/// Structured `extend_params` block
pub fn extend_params_schema() -> AttributeSchema {
    AttributeSchema::new(
        "extend_params",
        AttributeType::blocks(vec![
            AttributeSchema::new("max_pods", AttributeType::Int),
            AttributeSchema::new("docker_base_size", AttributeType::Int),
            AttributeSchema::new("preinstall", AttributeType::String),
            AttributeSchema::new("postinstall", AttributeType::String),
            AttributeSchema::new("node_image_id", AttributeType::String),
            AttributeSchema::new("node_multi_queue", AttributeType::String),
            AttributeSchema::new("nic_threshold", AttributeType::String),
            AttributeSchema::new("agency_name", AttributeType::String),
            AttributeSchema::new("kube_reserved_mem", AttributeType::Int),
            AttributeSchema::new("system_reserved_mem", AttributeType::Int),
            AttributeSchema::new("security_reinforcement_type", AttributeType::String),
            AttributeSchema::new("market_type", AttributeType::String),
            AttributeSchema::new("spot_price", AttributeType::String),
        ]),
    )
    .conflicts_with(&["extend_param"])
    .force_new()
}

/// Charging attributes of prepaid-capable resources
pub fn charging_schema() -> Vec<AttributeSchema> {
    vec![
        AttributeSchema::new("charging_mode", AttributeType::one_of(&["prePaid", "postPaid"]))
            .computed()
            .force_new(),
        AttributeSchema::new("period_unit", AttributeType::one_of(&["month", "year"])).force_new(),
        AttributeSchema::new("period", AttributeType::Int).force_new(),
        AttributeSchema::new("auto_renew", AttributeType::one_of(&["true", "false"])),
        AttributeSchema::new("auto_pay", AttributeType::one_of(&["true", "false"])),
    ]
}

// =============================================================================
// Request builders
// =============================================================================

fn build_volume(raw: &Block) -> Json {
    let mut volume = json!({
        "size": raw.get_int("size"),
        "volumetype": raw.get_str("volumetype"),
        "hw_passthrough": raw.get_bool("hw_passthrough").filter(|b| *b),
        "extendParam": raw.get_map("extend_params").map(|m| Value::Map(m.clone()).to_json()),
        "iops": raw.get_int("iops"),
        "throughput": raw.get_int("throughput"),
    });
    if let Some(kms) = raw.get_str("kms_key_id") {
        volume["metadata"] = json!({"__system__encrypted": "1", "__system__cmkid": kms});
    }
    if let Some(pool) = raw.get_str("dss_pool_id") {
        volume["cluster_id"] = json!(pool);
        volume["cluster_type"] = json!("dss");
    }
    remove_nil(volume)
}

pub fn build_root_volume(attributes: &Attributes) -> Json {
    attributes
        .block("root_volume")
        .map(build_volume)
        .unwrap_or(Json::Null)
}

pub fn build_data_volumes(attributes: &Attributes) -> Json {
    Json::Array(attributes.blocks("data_volumes").into_iter().map(build_volume).collect())
}

pub fn build_taints(attributes: &Attributes) -> Json {
    Json::Array(
        attributes
            .blocks("taints")
            .into_iter()
            .map(|t| {
                json!({
                    "key": t.str_or_empty("key"),
                    "value": t.str_or_empty("value"),
                    "effect": t.str_or_empty("effect"),
                })
            })
            .collect(),
    )
}

/// Login spec: an SSH key pair when given, otherwise the root password
pub fn build_login(attributes: &Attributes) -> Json {
    match attributes.get_str("key_pair") {
        Some(key_pair) => json!({"sshKey": key_pair}),
        None => json!({
            "userPassword": {
                "username": "root",
                "password": attributes.str_or_empty("password"),
            }
        }),
    }
}

/// Legacy `extend_param` map plus the top-level shortcuts of older schemas
fn build_legacy_extend_param(attributes: &Attributes) -> Map<String, Json> {
    let mut params: Map<String, Json> = attributes
        .string_map("extend_param")
        .into_iter()
        .map(|(k, v)| (k, Json::String(v)))
        .collect();

    if let Some(Json::String(raw)) = params.get("periodNum").cloned() {
        let period = raw.parse::<i64>().unwrap_or_else(|e| {
            tracing::warn!("periodNum {} invalid, type conversion error: {}", raw, e);
            0
        });
        params.insert("periodNum".to_string(), json!(period));
    }

    let shortcuts = [
        ("ecs_performance_type", "ecs:performancetype"),
        ("product_id", "productID"),
        ("public_key", "publicKey"),
    ];
    for (attr, key) in shortcuts {
        if let Some(v) = attributes.get_str(attr) {
            params.insert(key.to_string(), json!(v));
        }
    }
    if let Some(v) = attributes.get_int("max_pods") {
        params.insert("maxPods".to_string(), json!(v));
    }
    if let Some(v) = attributes.get_str("preinstall") {
        params.insert("alpha.cce/preInstall".to_string(), json!(try_base64_encode(v)));
    }
    if let Some(v) = attributes.get_str("postinstall") {
        params.insert("alpha.cce/postInstall".to_string(), json!(try_base64_encode(v)));
    }
    params
}

/// API keys of the structured `extend_params` block
const EXTEND_PARAM_KEYS: &[(&str, &str)] = &[
    ("max_pods", "maxPods"),
    ("docker_base_size", "dockerBaseSize"),
    ("preinstall", "alpha.cce/preInstall"),
    ("postinstall", "alpha.cce/postInstall"),
    ("node_image_id", "alpha.cce/NodeImageID"),
    ("node_multi_queue", "nicMultiqueue"),
    ("nic_threshold", "nicThreshold"),
    ("agency_name", "agency_name"),
    ("kube_reserved_mem", "kubeReservedMem"),
    ("system_reserved_mem", "systemReservedMem"),
    ("security_reinforcement_type", "securityReinforcementType"),
    ("market_type", "marketType"),
    ("spot_price", "spotPrice"),
];

fn build_structured_extend_params(attributes: &Attributes) -> Map<String, Json> {
    let Some(raw) = attributes.block("extend_params") else {
        return Map::new();
    };
    EXTEND_PARAM_KEYS
        .iter()
        .filter_map(|(attr, key)| {
            let value = raw.get(*attr)?.to_json();
            let value = match (*attr, value) {
                ("preinstall" | "postinstall", Json::String(s)) => Json::String(try_base64_encode(&s)),
                (_, v) => v,
            };
            let value = value_ignore_empty(value);
            (!value.is_null()).then(|| (key.to_string(), value))
        })
        .collect()
}

/// `extendParam` of a node or node pool request
///
/// The legacy map wins over the structured block when it is non-empty. Charging
/// settings are merged on top.
pub fn build_extend_params(attributes: &Attributes) -> Json {
    let legacy = build_legacy_extend_param(attributes);
    let mut params = if legacy.is_empty() {
        build_structured_extend_params(attributes)
    } else {
        legacy
    };

    if is_prepaid(attributes) {
        params.insert("chargingMode".to_string(), json!(1));
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

    remove_nil(Json::Object(params))
}

pub fn is_prepaid(attributes: &Attributes) -> bool {
    attributes.get_str("charging_mode") == Some("prePaid") || attributes.get_int("billing_mode") == Some(1)
}

/// `isAutoPay` value: "true" unless explicitly disabled
pub fn auto_pay(attributes: &Attributes) -> &'static str {
    if attributes.get_str("auto_pay") == Some("false") {
        "false"
    } else {
        "true"
    }
}

// =============================================================================
// Response flatteners
// =============================================================================

/// Flatten a volume; `extend_params` keeps only the keys that were declared
fn flatten_volume(volume: &Json, declared: Option<&Block>) -> Json {
    let returned = volume.get("extendParam").and_then(Json::as_object);
    let extend_params: Map<String, Json> = match (returned, declared.and_then(|d| d.get_map("extend_params"))) {
        (Some(returned), Some(declared)) => returned
            .iter()
            .filter(|(k, _)| declared.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        (Some(returned), None) => returned.clone(),
        (None, _) => Map::new(),
    };

    json!({
        "size": volume.get("size"),
        "volumetype": volume.get("volumetype"),
        "hw_passthrough": volume.get("hw_passthrough").cloned().unwrap_or(json!(false)),
        "extend_params": extend_params,
        "kms_key_id": volume.pointer("/metadata/__system__cmkid"),
        "dss_pool_id": volume.get("cluster_id"),
        "iops": volume.get("iops"),
        "throughput": volume.get("throughput"),
    })
}

pub fn flatten_root_volume(volume: Option<&Json>, declared: &Attributes) -> Json {
    match volume {
        Some(v) => json!([flatten_volume(v, declared.block("root_volume"))]),
        None => Json::Null,
    }
}

pub fn flatten_data_volumes(volumes: &[Json], declared: &Attributes) -> Json {
    let declared = declared.blocks("data_volumes");
    let same_shape = declared.len() == volumes.len();
    Json::Array(
        volumes
            .iter()
            .enumerate()
            .map(|(i, v)| flatten_volume(v, if same_shape { declared.get(i).copied() } else { None }))
            .collect(),
    )
}

pub fn flatten_taints(taints: &[Json]) -> Json {
    Json::Array(
        taints
            .iter()
            .map(|t| json!({"key": t.get("key"), "value": t.get("value"), "effect": t.get("effect")}))
            .collect(),
    )
}

/// Flatten `extendParam` into the structured block
///
/// Install scripts come back base64-encoded; a declared plain-text script
/// whose encoding matches is kept as declared.
pub fn flatten_extend_params(params: Option<&Json>, declared: &Attributes) -> Json {
    let Some(params) = params.and_then(Json::as_object).filter(|p| !p.is_empty()) else {
        return Json::Null;
    };
    let declared = declared.block("extend_params");

    let block: Map<String, Json> = EXTEND_PARAM_KEYS
        .iter()
        .filter_map(|(attr, key)| {
            let value = params.get(*key)?.clone();
            let value = match (declared.and_then(|d| d.get_str(attr)), &value) {
                (Some(plain), Json::String(encoded)) if try_base64_encode(plain) == *encoded => json!(plain),
                _ => value,
            };
            Some((attr.to_string(), value))
        })
        .collect();
    json!([block])
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
    fn volume_carries_encryption_and_dss_pool() {
        let attributes = attrs(json!({
            "root_volume": [{"size": 40, "volumetype": "SSD", "kms_key_id": "kms-1", "dss_pool_id": "pool-1"}]
        }));
        let volume = build_root_volume(&attributes);
        assert_eq!(volume["size"], json!(40));
        assert_eq!(volume["metadata"]["__system__encrypted"], json!("1"));
        assert_eq!(volume["metadata"]["__system__cmkid"], json!("kms-1"));
        assert_eq!(volume["cluster_type"], json!("dss"));
        assert!(volume.get("iops").is_none());
    }

    #[test]
    fn login_prefers_key_pair() {
        let with_key = attrs(json!({"key_pair": "kp-1", "password": "secret"}));
        assert_eq!(build_login(&with_key), json!({"sshKey": "kp-1"}));

        let with_password = attrs(json!({"password": "secret"}));
        assert_eq!(
            build_login(&with_password)["userPassword"]["username"],
            json!("root")
        );
    }

    #[test]
    fn legacy_extend_param_wins_over_block() {
        let attributes = attrs(json!({
            "extend_param": {"periodNum": "2", "orderID": ""},
            "extend_params": [{"max_pods": 64}]
        }));
        let params = build_extend_params(&attributes);
        assert_eq!(params["periodNum"], json!(2));
        assert!(params.get("maxPods").is_none());
    }

    #[test]
    fn structured_extend_params_are_renamed_and_encoded() {
        let attributes = attrs(json!({
            "extend_params": [{"max_pods": 64, "preinstall": "echo hello", "node_image_id": "", "docker_base_size": 0}]
        }));
        let params = build_extend_params(&attributes);
        assert_eq!(params["maxPods"], json!(64));
        assert_eq!(params["alpha.cce/preInstall"], json!("ZWNobyBoZWxsbw=="));
        assert!(params.get("alpha.cce/NodeImageID").is_none());
        assert!(params.get("dockerBaseSize").is_none());
    }

    #[test]
    fn prepaid_adds_charging_keys() {
        let attributes = attrs(json!({
            "charging_mode": "prePaid", "period_unit": "month", "period": 3, "auto_renew": "true"
        }));
        let params = build_extend_params(&attributes);
        assert_eq!(params["chargingMode"], json!(1));
        assert_eq!(params["isAutoPay"], json!("true"));
        assert_eq!(params["isAutoRenew"], json!("true"));
        assert_eq!(params["periodType"], json!("month"));
        assert_eq!(params["periodNum"], json!(3));
    }

    #[test]
    fn flatten_keeps_declared_script() {
        let declared = attrs(json!({"extend_params": [{"preinstall": "echo hello"}]}));
        let flattened = flatten_extend_params(
            Some(&json!({"alpha.cce/preInstall": "ZWNobyBoZWxsbw==", "maxPods": 110})),
            &declared,
        );
        assert_eq!(flattened[0]["preinstall"], json!("echo hello"));
        assert_eq!(flattened[0]["max_pods"], json!(110));
    }

    #[test]
    fn flatten_volume_filters_extend_params_to_declared_keys() {
        let declared = attrs(json!({
            "root_volume": [{"size": 40, "volumetype": "SSD", "extend_params": {"resourceSpecCode": "x"}}]
        }));
        let returned = json!({
            "size": 40, "volumetype": "SSD",
            "extendParam": {"resourceSpecCode": "x", "volumeId": "v-1"},
            "metadata": {"__system__cmkid": "kms-1"}
        });
        let flattened = flatten_root_volume(Some(&returned), &declared);
        assert_eq!(flattened[0]["extend_params"], json!({"resourceSpecCode": "x"}));
        assert_eq!(flattened[0]["kms_key_id"], json!("kms-1"));
    }
}
