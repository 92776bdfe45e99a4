//! Meal stock and time slot administration.
//!
//! Admin-only. Every change locks the row it touches, so a quantity set by
//! an admin and a concurrent issuance decrement never interleave.

use super::AppContext;
use crate::error::{Result, ValidationErrors, VoucherError};
use crate::roles::{Actor, Capability};
use crate::types::{Meal, MealId, TimeSlot, TimeSlotId};
use chrono::NaiveTime;

/// Fields of a new meal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMeal {
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Initial portions
    pub quantity: u32,
}

/// Fields of a new time slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTimeSlot {
    /// Display name
    pub name: String,
    /// Window start
    pub start_time: NaiveTime,
    /// Window end, after the start
    pub end_time: NaiveTime,
}

/// Admin management of meals and time slots
#[derive(Clone)]
pub struct CatalogService {
    ctx: AppContext,
}

impl CatalogService {
    /// Creates a new catalog service
    #[must_use]
    pub const fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Add a meal to the managed stock.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] unless `actor` may manage stock
    /// - [`VoucherError::Validation`] for an empty name
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, actor, meal), fields(name = %meal.name, quantity = meal.quantity))]
    pub async fn create_meal(&self, actor: Actor, meal: NewMeal) -> Result<Meal> {
        actor.require(Capability::ManageStock)?;
        let name = meal.name.trim().to_string();
        if name.is_empty() {
            return Err(VoucherError::Validation(ValidationErrors::single("name", "is required")));
        }

        let meal = Meal {
            id: MealId::new(),
            name,
            description: meal.description.trim().to_string(),
            quantity_available: meal.quantity,
            is_active: true,
            owner_id: actor.user_id,
            created_at: self.ctx.clock.now(),
        };
        let mut tx = self.ctx.repository.begin().await?;
        tx.insert_meal(&meal).await?;
        tx.commit().await?;

        tracing::info!(meal_id = %meal.id, "Meal created");
        Ok(meal)
    }

    /// Set a meal's remaining portions.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] unless `actor` may manage stock
    /// - [`VoucherError::NotFound`] for an unknown meal
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, actor))]
    pub async fn set_meal_quantity(&self, actor: Actor, meal_id: MealId, quantity: u32) -> Result<Meal> {
        self.update_meal(actor, meal_id, |meal| meal.quantity_available = quantity)
            .await
    }

    /// Offer or withdraw a meal.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] unless `actor` may manage stock
    /// - [`VoucherError::NotFound`] for an unknown meal
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, actor))]
    pub async fn set_meal_active(&self, actor: Actor, meal_id: MealId, active: bool) -> Result<Meal> {
        self.update_meal(actor, meal_id, |meal| meal.is_active = active)
            .await
    }

    /// Add a distribution time slot.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] unless `actor` may manage stock
    /// - [`VoucherError::Validation`] for an empty name or a window that
    ///   does not end after it starts
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, actor, slot), fields(name = %slot.name))]
    pub async fn create_time_slot(&self, actor: Actor, slot: NewTimeSlot) -> Result<TimeSlot> {
        actor.require(Capability::ManageStock)?;
        let mut errors = ValidationErrors::new();
        let name = slot.name.trim().to_string();
        if name.is_empty() {
            errors.add("name", "is required");
        }
        if slot.end_time <= slot.start_time {
            errors.add("end_time", "must be after the start time");
        }
        errors.into_result()?;

        let slot = TimeSlot {
            id: TimeSlotId::new(),
            name,
            start_time: slot.start_time,
            end_time: slot.end_time,
            is_active: true,
        };
        let mut tx = self.ctx.repository.begin().await?;
        tx.insert_time_slot(&slot).await?;
        tx.commit().await?;

        tracing::info!(time_slot_id = %slot.id, "Time slot created");
        Ok(slot)
    }

    /// Open or close a time slot for new requests.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] unless `actor` may manage stock
    /// - [`VoucherError::NotFound`] for an unknown slot
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, actor))]
    pub async fn set_time_slot_active(
        &self,
        actor: Actor,
        slot_id: TimeSlotId,
        active: bool,
    ) -> Result<TimeSlot> {
        actor.require(Capability::ManageStock)?;
        let mut tx = self.ctx.repository.begin().await?;
        let mut slot = tx
            .lock_time_slot(slot_id)
            .await?
            .ok_or_else(|| VoucherError::not_found("time slot", slot_id))?;
        slot.is_active = active;
        tx.save_time_slot(&slot).await?;
        tx.commit().await?;
        Ok(slot)
    }

    async fn update_meal<F>(&self, actor: Actor, meal_id: MealId, change: F) -> Result<Meal>
    where
        F: FnOnce(&mut Meal) + Send,
    {
        actor.require(Capability::ManageStock)?;
        let mut tx = self.ctx.repository.begin().await?;
        let mut meal = tx
            .lock_meal(meal_id)
            .await?
            .ok_or_else(|| VoucherError::not_found("meal", meal_id))?;
        change(&mut meal);
        tx.save_meal(&meal).await?;
        tx.commit().await?;

        tracing::info!(
            quantity_available = meal.quantity_available,
            is_active = meal.is_active,
            "Meal updated"
        );
        Ok(meal)
    }
}
