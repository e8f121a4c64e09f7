//! apm_aksk - access key pair used by APM agents
//!
//! The secret key is only returned by create; read keeps the value already
//! held in state.

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{AttributeMap, Attributes, Resource, State, Value};
use hwcloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use hwcloud_core::timeouts::Timeouts;
use serde_json::{Value as Json, json};

use crate::services::{Context, delete_result, identifier, provisional, read_result, require_exists};
use crate::utils::{path_array, path_str, remove_nil, set_paths};

pub const TYPE_NAME: &str = "apm_aksk";
pub const IMPORT_FORMAT: &[&str] = &["id"];

const ACCESS_KEYS_PATH: &str = "v1/apm2/access-keys";

pub fn timeouts() -> Timeouts {
    Timeouts::minutes(5, 5, 5)
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(TYPE_NAME)
        .with_description("APM access key")
        .attribute(AttributeSchema::new("region", AttributeType::String).computed().force_new())
        .attribute(AttributeSchema::new("description", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("access_key", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("secret_key", AttributeType::String).read_only().sensitive())
        .attribute(AttributeSchema::new("status", AttributeType::String).read_only())
}

fn build_create_body(attributes: &Attributes) -> Json {
    remove_nil(json!({"descp": attributes.get_str("description")}))
}

/// Entry of the access-key listing with the given AK
fn find_key<'a>(listing: &'a Json, ak: &str) -> Option<&'a Json> {
    path_array("access_ak_sk_models", listing)
        .iter()
        .find(|k| path_str("ak", k) == ak)
}

pub async fn create(ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
    let service = ctx.service("apm").await?;
    let response = service
        .post(ACCESS_KEYS_PATH, &build_create_body(&resource.attributes))
        .await
        .map_err(|e| ProviderError::wrap("error creating APM access key", e))?;
    let ak = path_str("ak", &response);
    if ak.is_empty() {
        return Err(ProviderError::new("error creating APM access key: AK is not found in API response"));
    }

    let created = provisional(resource, ak).with_attribute("secret_key", path_str("sk", &response));
    require_exists(read(ctx, &created).await?, "APM access key")
}

pub async fn read(ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
    let ak = identifier(current)?;
    let service = ctx.service("apm").await?;

    let Some(listing) = read_result(service.get(ACCESS_KEYS_PATH).await, "error retrieving APM access keys")?
    else {
        return Ok(State::not_found(current.id.clone()));
    };
    let Some(key) = find_key(&listing, ak) else {
        tracing::warn!(ak = %ak, "APM access key not found");
        return Ok(State::not_found(current.id.clone()));
    };

    let mut attributes = Attributes::new();
    set_paths(
        &mut attributes,
        key,
        &[("access_key", "ak"), ("description", "descp"), ("status", "status")],
    );
    if let Some(sk) = current.attributes.get_str("secret_key") {
        attributes.insert("secret_key".to_string(), Value::from(sk));
    }
    Ok(ctx.state(current, ak, attributes))
}

pub async fn delete(ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
    let ak = identifier(current)?;
    let service = ctx.service("apm").await?;
    delete_result(
        service.delete(&format!("{}/{}", ACCESS_KEYS_PATH, ak)).await,
        "error deleting APM access key",
    )
}
