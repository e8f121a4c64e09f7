//! Huawei Cloud Provider implementation
//!
//! Validates declared attributes against the resource schemas, resolves the
//! per-operation region and timeouts, and dispatches to the service modules.

use std::sync::Arc;

use hwcloud_core::differ::{self, Diff};
use hwcloud_core::provider::{OperationContext, ProviderError, ProviderResult};
use hwcloud_core::resource::{Resource, ResourceId, State};

use crate::client::HuaweiClient;
use crate::config::{Config, ConfigError};
use crate::resources::ResourceKind;
use crate::services::Context;
use crate::utils::parse_import_id;

/// Huawei Cloud Provider
///
/// Cheap to clone; clones share one HTTP client and configuration.
#[derive(Debug, Clone)]
pub struct HuaweiCloudProvider {
    client: Arc<HuaweiClient>,
}

impl HuaweiCloudProvider {
    /// Create a provider from a validated configuration
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Ok(Self {
            client: Arc::new(HuaweiClient::new(config)?),
        })
    }

    /// Create a provider configured from the `HW_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(Config::from_env())
    }

    pub fn client(&self) -> &HuaweiClient {
        &self.client
    }

    fn kind(id: &ResourceId) -> ProviderResult<ResourceKind> {
        ResourceKind::from_type_name(&id.resource_type).ok_or_else(|| {
            ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        })
    }

    fn context<'a>(
        &'a self,
        ctx: &'a OperationContext,
        kind: ResourceKind,
        attributes: &hwcloud_core::resource::Attributes,
    ) -> ProviderResult<Context<'a>> {
        Context::new(
            &self.client,
            &ctx.cancel,
            attributes,
            kind.resource_schema(),
            kind.default_timeouts(),
        )
    }

    /// Declared attributes checked against the schema, with defaults filled in
    fn prepare(kind: ResourceKind, resource: &Resource) -> ProviderResult<Resource> {
        let schema = kind.resource_schema();
        schema.validate(&resource.attributes).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            ProviderError::new(format!("invalid attributes: {}", messages.join("; ")))
        })?;
        let mut prepared = resource.clone();
        schema.apply_defaults(&mut prepared.attributes);
        Ok(prepared)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    pub async fn read_resource(&self, ctx: &OperationContext, current: &State) -> ProviderResult<State> {
        let kind = Self::kind(&current.id)?;
        if current.identifier.is_none() {
            return Ok(State::not_found(current.id.clone()));
        }
        let context = self.context(ctx, kind, &current.attributes)?;
        let state = kind.read(&context, current).await?;
        if !state.exists {
            tracing::warn!(
                resource = %current.id,
                identifier = current.identifier.as_deref().unwrap_or_default(),
                "resource not found, it may have been deleted outside of this provider"
            );
        }
        Ok(state)
    }

    pub async fn create_resource(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<State> {
        let kind = Self::kind(&resource.id)?;
        let resource = Self::prepare(kind, resource)?;
        let context = self.context(ctx, kind, &resource.attributes)?;

        tracing::info!(resource = %resource.id, "creating");
        let state = kind.create(&context, &resource).await?;
        tracing::info!(
            resource = %resource.id,
            identifier = state.identifier.as_deref().unwrap_or_default(),
            "created"
        );
        Ok(state)
    }

    pub async fn update_resource(
        &self,
        ctx: &OperationContext,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let kind = Self::kind(&to.id)?;
        let prepared = Self::prepare(kind, to)?;
        let schema = kind.resource_schema();

        match differ::diff(&prepared, from, &schema) {
            Diff::NoChange(_) => {
                tracing::debug!(resource = %to.id, "no changes to apply");
                return self.read_resource(ctx, from).await;
            }
            Diff::Create(_) => {
                return Err(ProviderError::new("cannot update a resource that does not exist"));
            }
            Diff::Replace { changed_attributes, .. } => {
                let forced = schema.replacement_attributes(&changed_attributes);
                return Err(ProviderError::new(format!(
                    "changing {} requires replacing the resource",
                    forced.join(", ")
                )));
            }
            Diff::Update { changed_attributes, .. } => {
                tracing::info!(resource = %to.id, changed = ?changed_attributes, "updating");
            }
        }

        // Computed attributes the caller left unset keep their observed value
        let mut desired = prepared;
        for (key, value) in &from.attributes {
            if !desired.attributes.contains_key(key) && schema.is_computed(key) {
                desired.attributes.insert(key.clone(), value.clone());
            }
        }

        let context = self.context(ctx, kind, &desired.attributes)?;
        kind.update(&context, from, &desired).await
    }

    pub async fn delete_resource(&self, ctx: &OperationContext, current: &State) -> ProviderResult<()> {
        let kind = Self::kind(&current.id)?;
        let context = self.context(ctx, kind, &current.attributes)?;
        tracing::info!(resource = %current.id, "deleting");
        kind.delete(&context, current).await
    }

    pub async fn import_resource(
        &self,
        ctx: &OperationContext,
        id: &ResourceId,
        import_id: &str,
    ) -> ProviderResult<State> {
        let kind = Self::kind(id)?;
        let (attributes, identifier) = parse_import_id(kind.import_format(), import_id)?;
        let seed = State::existing(id.clone(), attributes).with_identifier(identifier);

        let context = self.context(ctx, kind, &seed.attributes)?;
        let state = kind.read(&context, &seed).await?;
        if !state.exists {
            return Err(ProviderError::new(format!(
                "cannot import non-existent remote object ({})",
                import_id
            )));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcloud_core::resource::Value;

    #[test]
    fn test_prepare_applies_defaults() {
        let resource = Resource::new("cts_tracker", "system");
        let prepared = HuaweiCloudProvider::prepare(ResourceKind::CtsTracker, &resource).unwrap();
        assert_eq!(prepared.attributes.get("enabled"), Some(&Value::Bool(true)));
        assert_eq!(prepared.attributes.get("lts_enabled"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_prepare_rejects_missing_required() {
        let resource = Resource::new("aom_component", "web").with_attribute("name", "web");
        let err = HuaweiCloudProvider::prepare(ResourceKind::AomComponent, &resource).unwrap_err();
        assert!(err.to_string().contains("application_id"), "{}", err);
    }

    #[test]
    fn test_prepare_rejects_read_only() {
        let resource = Resource::new("apm_aksk", "agent").with_attribute("secret_key", "s3cr3t");
        assert!(HuaweiCloudProvider::prepare(ResourceKind::ApmAksk, &resource).is_err());
    }
}
