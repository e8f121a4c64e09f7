//! AOM application-model (CMDB) resources
//!
//! Applications, components and environments share one synchronous REST
//! shape: `POST {collection}` returns the new ID, and `GET`, `PUT` and
//! `DELETE` address `{collection}/{id}`.

pub mod application;
pub mod component;
pub mod environment;

use hwcloud_core::provider::{ProviderError, ProviderResult};
use hwcloud_core::resource::{Attributes, Resource, State};
use serde_json::Value as Json;

use crate::services::{
    Context, delete_result, identifier, provisional, read_result, require_exists,
};
use crate::utils::{path_str, set_paths};

/// A CMDB entity type
pub(crate) struct CmdbEntity {
    /// Name used in error messages
    pub kind: &'static str,
    pub collection: &'static str,
    /// `(attribute, API field)` pairs flattened on read
    pub fields: &'static [(&'static str, &'static str)],
}

impl CmdbEntity {
    fn path(&self, id: &str) -> String {
        format!("{}/{}", self.collection, id)
    }

    pub async fn create(&self, ctx: &Context<'_>, resource: &Resource, body: Json) -> ProviderResult<State> {
        let service = ctx.service("aom").await?;
        let response = service
            .post(self.collection, &body)
            .await
            .map_err(|e| ProviderError::wrap(format!("error creating {}", self.kind), e))?;
        let id = path_str("id", &response);
        if id.is_empty() {
            return Err(ProviderError::new(format!(
                "error creating {}: ID is not found in API response",
                self.kind
            )));
        }
        tracing::info!(id = %id, "created {}", self.kind);

        require_exists(self.read(ctx, &provisional(resource, id)).await?, self.kind)
    }

    pub async fn read(&self, ctx: &Context<'_>, current: &State) -> ProviderResult<State> {
        let id = identifier(current)?;
        let service = ctx.service("aom").await?;
        let Some(entity) = read_result(
            service.get(&self.path(id)).await,
            &format!("error retrieving {}", self.kind),
        )?
        else {
            return Ok(State::not_found(current.id.clone()));
        };

        let mut attributes = Attributes::new();
        set_paths(&mut attributes, &entity, self.fields);
        Ok(ctx.state(current, id, attributes))
    }

    pub async fn update(&self, ctx: &Context<'_>, from: &State, to: &Resource, body: Json) -> ProviderResult<State> {
        let id = identifier(from)?;
        let service = ctx.service("aom").await?;
        service
            .put(&self.path(id), &body)
            .await
            .map_err(|e| ProviderError::wrap(format!("error updating {}", self.kind), e))?;
        self.read(ctx, &provisional(to, id)).await
    }

    pub async fn delete(&self, ctx: &Context<'_>, current: &State) -> ProviderResult<()> {
        let id = identifier(current)?;
        let service = ctx.service("aom").await?;
        delete_result(
            service.delete(&self.path(id)).await,
            &format!("error deleting {}", self.kind),
        )
    }
}
