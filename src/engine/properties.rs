use std::time::Instant;

use tracing::info;

use crate::auth::{AuthContext, require_role};
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, Entity};

impl Engine {
    pub async fn create_property(&self, ctx: &AuthContext, new: NewProperty) -> Result<Property, EngineError> {
        let started = Instant::now();
        let result = self.create_property_inner(ctx, new).await;
        observability::record("create_property", started, &result);
        result
    }

    async fn create_property_inner(&self, ctx: &AuthContext, new: NewProperty) -> Result<Property, EngineError> {
        let caller = require_role(ctx, Role::Owner)?;
        new.validate()?;
        let property = self.properties.create(caller.user_id, new).await?;
        info!(property_id = property.id, owner_id = caller.user_id, "property created");
        Ok(property)
    }

    /// Apply `patch` to a property the caller owns.
    pub async fn update_property(
        &self,
        ctx: &AuthContext,
        property_id: Id,
        patch: PropertyPatch,
    ) -> Result<Property, EngineError> {
        let started = Instant::now();
        let result = self.update_property_inner(ctx, property_id, patch).await;
        observability::record("update_property", started, &result);
        result
    }

    async fn update_property_inner(
        &self,
        ctx: &AuthContext,
        property_id: Id,
        patch: PropertyPatch,
    ) -> Result<Property, EngineError> {
        let caller = require_role(ctx, Role::Owner)?;
        patch.validate()?;
        let (_guard, current) = self.lock_existing_property(property_id).await?;
        Self::require_owner(&caller, &current)?;
        let updated = self.properties.update(patch.apply(&current)).await?;
        info!(property_id, "property updated");
        Ok(updated)
    }

    /// Delete a property the caller owns, along with its bookings and blocked dates.
    pub async fn delete_property(&self, ctx: &AuthContext, property_id: Id) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.delete_property_inner(ctx, property_id).await;
        observability::record("delete_property", started, &result);
        result
    }

    async fn delete_property_inner(&self, ctx: &AuthContext, property_id: Id) -> Result<(), EngineError> {
        let caller = require_role(ctx, Role::Owner)?;
        let (guard, current) = self.lock_existing_property(property_id).await?;
        Self::require_owner(&caller, &current)?;
        if !self.properties.delete(property_id).await? {
            return Err(EngineError::not_found(Entity::Property, property_id));
        }
        drop(guard);
        self.forget_lock(property_id);
        info!(property_id, "property deleted");
        Ok(())
    }

    /// The caller's own properties, ordered by id.
    pub async fn my_properties(
        &self,
        ctx: &AuthContext,
        pagination: Pagination,
    ) -> Result<Vec<Property>, EngineError> {
        let caller = require_role(ctx, Role::Owner)?;
        Ok(self
            .properties
            .find_by_owner_paged(caller.user_id, pagination)
            .await?)
    }

    /// Public lookup; a missing property is `None`, not an error.
    pub async fn get_property_by_id(&self, property_id: Id) -> Result<Option<Property>, EngineError> {
        Ok(self.properties.find_by_id(property_id).await?)
    }
}
