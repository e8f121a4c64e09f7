//! Provider - Trait abstracting resource operations
//!
//! A Provider maps declared resources onto a cloud's APIs. It is responsible for
//! turning create/read/update/delete requests into actual API calls and for
//! waiting until asynchronous operations settle.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::resource::{Resource, ResourceId, State};
use crate::schema::ResourceSchema;
use crate::timeouts::Timeouts;

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    /// Build an error whose message is `context: cause`
    pub fn wrap(
        context: impl std::fmt::Display,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::new(format!("{}: {}", context, cause)).with_cause(cause)
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-call context handed to every provider operation
///
/// Cancelling the token aborts any wait the operation is blocked in.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    pub cancel: CancellationToken,
}

impl OperationContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "cce_cluster")
    fn name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.name())
    }

    /// Default operation timeouts, overridable through the `timeouts` attribute
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }
}

/// Main Provider trait
///
/// Each cloud provider implements this trait.
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "huaweicloud")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can handle
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Get the current state of a resource
    ///
    /// `current` is the last known state; its identifier and attributes (parent IDs,
    /// region, create-only secrets) locate the resource. Returns `State::not_found()`
    /// if the resource no longer exists.
    fn read<'a>(
        &'a self,
        ctx: &'a OperationContext,
        current: &'a State,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the cloud-side ID
    fn create<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Update a resource in place
    fn update<'a>(
        &'a self,
        ctx: &'a OperationContext,
        from: &'a State,
        to: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Delete a resource
    fn delete<'a>(
        &'a self,
        ctx: &'a OperationContext,
        current: &'a State,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Import an existing resource by its import ID (e.g. `<cluster_id>/<node_id>`)
    fn import<'a>(
        &'a self,
        ctx: &'a OperationContext,
        id: &'a ResourceId,
        import_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<State>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        (**self).resource_types()
    }

    fn read<'a>(
        &'a self,
        ctx: &'a OperationContext,
        current: &'a State,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        (**self).read(ctx, current)
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        (**self).create(ctx, resource)
    }

    fn update<'a>(
        &'a self,
        ctx: &'a OperationContext,
        from: &'a State,
        to: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        (**self).update(ctx, from, to)
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a OperationContext,
        current: &'a State,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        (**self).delete(ctx, current)
    }

    fn import<'a>(
        &'a self,
        ctx: &'a OperationContext,
        id: &'a ResourceId,
        import_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        (**self).import(ctx, id, import_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mock Provider for testing
    struct MockProvider;

    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            vec![]
        }

        fn read<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            current: &'a State,
        ) -> BoxFuture<'a, ProviderResult<State>> {
            Box::pin(async move { Ok(State::not_found(current.id.clone())) })
        }

        fn create<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            resource: &'a Resource,
        ) -> BoxFuture<'a, ProviderResult<State>> {
            Box::pin(async move {
                Ok(State::existing(resource.id.clone(), resource.attributes.clone())
                    .with_identifier("mock-id-123"))
            })
        }

        fn update<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            from: &'a State,
            to: &'a Resource,
        ) -> BoxFuture<'a, ProviderResult<State>> {
            Box::pin(async move { Ok(State::existing(from.id.clone(), to.attributes.clone())) })
        }

        fn delete<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            _current: &'a State,
        ) -> BoxFuture<'a, ProviderResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn import<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            id: &'a ResourceId,
            import_id: &'a str,
        ) -> BoxFuture<'a, ProviderResult<State>> {
            Box::pin(async move {
                Ok(State::existing(id.clone(), Default::default()).with_identifier(import_id))
            })
        }
    }

    #[tokio::test]
    async fn mock_provider_read_returns_not_found() {
        let provider: Box<dyn Provider> = Box::new(MockProvider);
        let ctx = OperationContext::default();
        let current = State::not_found(ResourceId::new("test", "example"));
        let state = provider.read(&ctx, &current).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn mock_provider_create_returns_existing() {
        let provider = MockProvider;
        let ctx = OperationContext::default();
        let resource = Resource::new("test", "example");
        let state = provider.create(&ctx, &resource).await.unwrap();
        assert!(state.exists);
        assert_eq!(state.identifier, Some("mock-id-123".to_string()));
    }

    #[test]
    fn error_display_includes_resource() {
        let err = ProviderError::new("boom").for_resource(ResourceId::new("cce_node", "worker"));
        assert_eq!(err.to_string(), "[cce_node.worker] boom");
    }

    #[test]
    fn wrap_keeps_cause_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = ProviderError::wrap("error reading", io);
        assert_eq!(err.message, "error reading: disk");
        let source = std::error::Error::source(&err).expect("cause");
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }
}
