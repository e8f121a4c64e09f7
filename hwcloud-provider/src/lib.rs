//! hwcloud Huawei Cloud Provider
//!
//! Huawei Cloud resources (CCE, CTS, AOM and APM) over signed REST calls.
//!
//! ## Module Structure
//!
//! - `config` - Provider configuration and the service endpoint catalogue
//! - `signer` - AK/SK request signing
//! - `client` - HTTP client bound to service endpoints
//! - `services` - Resource implementations grouped by cloud service
//! - `resources` - Resource type registry and dispatch
//! - `provider` - HuaweiCloudProvider implementation
//! - `utils` - JSON path search and request-body helpers

pub mod client;
pub mod config;
pub mod provider;
pub mod resources;
pub mod services;
pub mod signer;
pub mod utils;

// Re-export main types
pub use config::Config;
pub use provider::HuaweiCloudProvider;

use hwcloud_core::provider::{BoxFuture, OperationContext, Provider, ProviderResult, ResourceType};
use hwcloud_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for HuaweiCloudProvider {
    fn name(&self) -> &'static str {
        "huaweicloud"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read<'a>(
        &'a self,
        ctx: &'a OperationContext,
        current: &'a State,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            self.read_resource(ctx, current)
                .await
                .map_err(|e| e.for_resource(current.id.clone()))
        })
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            self.create_resource(ctx, resource)
                .await
                .map_err(|e| e.for_resource(resource.id.clone()))
        })
    }

    fn update<'a>(
        &'a self,
        ctx: &'a OperationContext,
        from: &'a State,
        to: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            self.update_resource(ctx, from, to)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))
        })
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a OperationContext,
        current: &'a State,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.delete_resource(ctx, current)
                .await
                .map_err(|e| e.for_resource(current.id.clone()))
        })
    }

    fn import<'a>(
        &'a self,
        ctx: &'a OperationContext,
        id: &'a ResourceId,
        import_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            self.import_resource(ctx, id, import_id)
                .await
                .map_err(|e| e.for_resource(id.clone()))
        })
    }
}
