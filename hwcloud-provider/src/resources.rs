//! Resource type registry
//!
//! Maps resource type names onto the service modules implementing them and
//! dispatches lifecycle operations to the right module.

use hwcloud_core::provider::{ProviderError, ProviderResult, ResourceType};
use hwcloud_core::resource::{Resource, State};
use hwcloud_core::schema::ResourceSchema;
use hwcloud_core::timeouts::Timeouts;

use crate::services::{self, Context};

// =============================================================================
// Resource Type Definitions
// =============================================================================

/// Declare the supported resource kinds
///
/// A trailing `[update]` marks modules that implement in-place update; every
/// other kind only changes through replacement.
macro_rules! define_resource_kinds {
    ($( $kind:ident => $svc:ident::$res:ident $([$update:ident])? ),* $(,)?) => {
        /// A supported resource type
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResourceKind {
            $( $kind, )*
        }

        impl ResourceKind {
            pub const ALL: &'static [ResourceKind] = &[$( ResourceKind::$kind, )*];

            pub fn from_type_name(name: &str) -> Option<Self> {
                match name {
                    $( services::$svc::$res::TYPE_NAME => Some(ResourceKind::$kind), )*
                    _ => None,
                }
            }

            pub fn type_name(self) -> &'static str {
                match self {
                    $( ResourceKind::$kind => services::$svc::$res::TYPE_NAME, )*
                }
            }

            pub fn resource_schema(self) -> ResourceSchema {
                match self {
                    $( ResourceKind::$kind => services::$svc::$res::schema(), )*
                }
            }

            pub fn default_timeouts(self) -> Timeouts {
                match self {
                    $( ResourceKind::$kind => services::$svc::$res::timeouts(), )*
                }
            }

            /// Labels of the `/`-separated parts of an import ID
            pub fn import_format(self) -> &'static [&'static str] {
                match self {
                    $( ResourceKind::$kind => services::$svc::$res::IMPORT_FORMAT, )*
                }
            }

            pub async fn create(self, ctx: &Context<'_>, resource: &Resource) -> ProviderResult<State> {
                match self {
                    $( ResourceKind::$kind => services::$svc::$res::create(ctx, resource).await, )*
                }
            }

            pub async fn read(self, ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
                match self {
                    $( ResourceKind::$kind => services::$svc::$res::read(ctx, current).await, )*
                }
            }

            pub async fn update(self, ctx: &Context<'_>, from: &State, to: &Resource) -> ProviderResult<State> {
                match self {
                    $($( ResourceKind::$kind => services::$svc::$res::$update(ctx, from, to).await, )?)*
                    #[allow(unreachable_patterns)]
                    _ => Err(ProviderError::new(format!(
                        "{} does not support in-place update",
                        self.type_name()
                    ))),
                }
            }

            pub async fn delete(self, ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
                match self {
                    $( ResourceKind::$kind => services::$svc::$res::delete(ctx, current).await, )*
                }
            }
        }
    };
}

define_resource_kinds! {
    CceCluster => cce::cluster [update],
    CceNode => cce::node [update],
    CceNodePool => cce::node_pool [update],
    CceAddon => cce::addon [update],
    CceImageCache => cce::image_cache,
    CceAccessPolicy => cce::access_policy [update],
    CcePartition => cce::partition [update],
    CceNamespace => cce::namespace,
    CcePvc => cce::pvc,
    CtsTracker => cts::tracker [update],
    CtsNotification => cts::notification [update],
    AomApplication => aom::application [update],
    AomComponent => aom::component [update],
    AomEnvironment => aom::environment [update],
    ApmAksk => apm::aksk,
}

impl ResourceType for ResourceKind {
    fn name(&self) -> &'static str {
        self.type_name()
    }

    fn schema(&self) -> ResourceSchema {
        self.resource_schema()
    }

    fn timeouts(&self) -> Timeouts {
        self.default_timeouts()
    }
}

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    ResourceKind::ALL
        .iter()
        .map(|kind| Box::new(*kind) as Box<dyn ResourceType>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_type_name() {
        assert_eq!(ResourceKind::from_type_name("cce_node"), Some(ResourceKind::CceNode));
        assert_eq!(ResourceKind::from_type_name("apm_aksk"), Some(ResourceKind::ApmAksk));
        assert_eq!(ResourceKind::from_type_name("vpc"), None);
    }

    #[test]
    fn test_type_names_are_unique_and_match_schemas() {
        let mut names: Vec<&str> = ResourceKind::ALL.iter().map(|k| k.type_name()).collect();
        for kind in ResourceKind::ALL {
            assert_eq!(kind.resource_schema().resource_type, kind.type_name());
            assert!(!kind.import_format().is_empty());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ResourceKind::ALL.len());
        assert_eq!(resource_types().len(), 15);
    }

    #[test]
    fn test_every_schema_carries_region() {
        for kind in ResourceKind::ALL {
            assert!(
                kind.resource_schema().attributes.contains_key("region"),
                "{} has no region attribute",
                kind.type_name()
            );
        }
    }
}
