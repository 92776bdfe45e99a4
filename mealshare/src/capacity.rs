//! Capacity sources behind one reservation interface.
//!
//! Meal capacity comes from two places:
//!
//! - **Pooled counter**: admin-managed [`Meal`](crate::types::Meal) rows whose
//!   `quantity_available` is decremented by one per voucher.
//! - **Unit pool**: [`FundedUnit`](crate::types::FundedUnit) rows minted by
//!   completed donations, one row per meal.
//!
//! The issuance engine asks for one unit through [`reserve_one`] and gets back
//! a [`CapacityHandle`] naming what was consumed. It never special-cases the
//! source. All functions here run inside the caller's transaction, so a
//! reservation is undone by dropping that transaction.

use crate::error::{Result, VoucherError};
use crate::store::Transaction;
use crate::types::{MealId, UnitId, UnitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a unit of meal capacity can come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacitySource {
    /// Oldest active meal with stock left
    PooledCounter,
    /// Oldest available funded unit
    UnitPool,
}

/// What the requester asked to be served.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MealSelection {
    /// Whatever the capacity policy finds first
    Any,
    /// This meal's counter only, no fallback
    Meal(MealId),
}

/// The unit of capacity a voucher consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityHandle {
    /// One portion of a managed meal
    Meal(MealId),
    /// One funded unit, now `reserved`
    Unit(UnitId),
}

impl CapacityHandle {
    /// Meal consumed, if any
    #[must_use]
    pub const fn meal_id(&self) -> Option<MealId> {
        match self {
            Self::Meal(id) => Some(*id),
            Self::Unit(_) => None,
        }
    }

    /// Unit consumed, if any
    #[must_use]
    pub const fn unit_id(&self) -> Option<UnitId> {
        match self {
            Self::Unit(id) => Some(*id),
            Self::Meal(_) => None,
        }
    }

    /// Which source this came from
    #[must_use]
    pub const fn source(&self) -> CapacitySource {
        match self {
            Self::Meal(_) => CapacitySource::PooledCounter,
            Self::Unit(_) => CapacitySource::UnitPool,
        }
    }
}

impl CapacitySource {
    /// Managed stock first, then donation-funded units.
    #[must_use]
    pub fn default_policy() -> Vec<Self> {
        vec![Self::PooledCounter, Self::UnitPool]
    }

    /// Configuration form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PooledCounter => "pooled_counter",
            Self::UnitPool => "unit_pool",
        }
    }

    /// Parse the configuration form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "pooled_counter" | "meals" => Some(Self::PooledCounter),
            "unit_pool" | "units" => Some(Self::UnitPool),
            _ => None,
        }
    }

    /// Parse a comma-separated policy such as `unit_pool,pooled_counter`.
    ///
    /// Returns `None` for an empty list, an unknown source or a repeated source.
    #[must_use]
    pub fn parse_policy(value: &str) -> Option<Vec<Self>> {
        let mut policy = Vec::new();
        for part in value.split(',') {
            let source = Self::parse(part)?;
            if policy.contains(&source) {
                return None;
            }
            policy.push(source);
        }
        Some(policy)
    }

    /// Take one unit from this source, or `None` when it is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::Persistence`] on storage failure.
    pub async fn reserve_one(
        &self,
        tx: &mut dyn Transaction,
        now: DateTime<Utc>,
    ) -> Result<Option<CapacityHandle>> {
        match self {
            Self::PooledCounter => {
                let Some(mut meal) = tx.lock_stocked_meal().await? else {
                    return Ok(None);
                };
                meal.quantity_available -= 1;
                tx.save_meal(&meal).await?;
                Ok(Some(CapacityHandle::Meal(meal.id)))
            }
            Self::UnitPool => {
                let Some(unit) = tx.lock_available_unit(now).await? else {
                    return Ok(None);
                };
                tx.set_unit_status(unit.id, UnitStatus::Reserved).await?;
                Ok(Some(CapacityHandle::Unit(unit.id)))
            }
        }
    }
}

/// Reserve exactly one unit of capacity for `selection`.
///
/// # Errors
///
/// - [`VoucherError::OutOfCapacity`] if no eligible source has capacity
/// - [`VoucherError::NotFound`] if a selected meal does not exist
/// - [`VoucherError::Persistence`] on storage failure
pub async fn reserve_one(
    tx: &mut dyn Transaction,
    policy: &[CapacitySource],
    selection: MealSelection,
    now: DateTime<Utc>,
) -> Result<CapacityHandle> {
    match selection {
        MealSelection::Meal(id) => {
            let mut meal = tx
                .lock_meal(id)
                .await?
                .ok_or_else(|| VoucherError::not_found("meal", id))?;
            if !meal.has_stock() {
                return Err(VoucherError::OutOfCapacity);
            }
            meal.quantity_available -= 1;
            tx.save_meal(&meal).await?;
            Ok(CapacityHandle::Meal(meal.id))
        }
        MealSelection::Any => {
            for source in policy {
                if let Some(handle) = source.reserve_one(tx, now).await? {
                    return Ok(handle);
                }
            }
            Err(VoucherError::OutOfCapacity)
        }
    }
}

/// Move the unit behind `handle` to `status` if that keeps its lifecycle monotonic.
///
/// Meal-backed handles have nothing to settle.
///
/// # Errors
///
/// Returns [`VoucherError::Persistence`] on storage failure.
pub async fn settle(
    tx: &mut dyn Transaction,
    handle: CapacityHandle,
    status: UnitStatus,
) -> Result<()> {
    let CapacityHandle::Unit(id) = handle else {
        return Ok(());
    };
    match tx.lock_unit(id).await? {
        Some(unit) if unit.status.can_become(status) => tx.set_unit_status(id, status).await,
        Some(unit) => {
            tracing::warn!(
                unit_id = %id,
                from = unit.status.as_str(),
                to = status.as_str(),
                "Skipping non-monotonic unit transition"
            );
            Ok(())
        }
        None => Err(VoucherError::not_found("funded unit", id)),
    }
}

/// Put the capacity behind `handle` back into its source.
///
/// # Errors
///
/// Returns [`VoucherError::Persistence`] on storage failure.
pub async fn release(tx: &mut dyn Transaction, handle: CapacityHandle) -> Result<()> {
    match handle {
        CapacityHandle::Meal(id) => {
            let mut meal = tx
                .lock_meal(id)
                .await?
                .ok_or_else(|| VoucherError::not_found("meal", id))?;
            meal.quantity_available = meal.quantity_available.saturating_add(1);
            tx.save_meal(&meal).await
        }
        CapacityHandle::Unit(_) => settle(tx, handle, UnitStatus::Available).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryRepository;
    use crate::store::Repository;
    use crate::types::{DonationId, FundedUnit, Meal, UserId};

    fn meal(quantity: u32) -> Meal {
        Meal {
            id: MealId::new(),
            name: "Pancit".to_string(),
            description: String::new(),
            quantity_available: quantity,
            is_active: true,
            owner_id: UserId::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn policy_parsing() {
        assert_eq!(
            CapacitySource::parse_policy("unit_pool, pooled_counter"),
            Some(vec![CapacitySource::UnitPool, CapacitySource::PooledCounter])
        );
        assert_eq!(CapacitySource::parse_policy("unit_pool,unit_pool"), None);
        assert_eq!(CapacitySource::parse_policy(""), None);
        assert_eq!(CapacitySource::parse_policy("vending_machine"), None);
    }

    #[tokio::test]
    async fn policy_order_decides_source() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let stocked = meal(1);
        let unit = FundedUnit::mint(DonationId::new(), None, now);

        let mut tx = repo.begin().await.unwrap();
        tx.insert_meal(&stocked).await.unwrap();
        tx.insert_units(std::slice::from_ref(&unit)).await.unwrap();

        let units_first = [CapacitySource::UnitPool, CapacitySource::PooledCounter];
        let handle = reserve_one(tx.as_mut(), &units_first, MealSelection::Any, now).await.unwrap();
        assert_eq!(handle, CapacityHandle::Unit(unit.id));

        let handle = reserve_one(tx.as_mut(), &units_first, MealSelection::Any, now).await.unwrap();
        assert_eq!(handle, CapacityHandle::Meal(stocked.id));

        let exhausted = reserve_one(tx.as_mut(), &units_first, MealSelection::Any, now).await;
        assert_eq!(exhausted, Err(VoucherError::OutOfCapacity));
    }

    #[tokio::test]
    async fn selected_meal_has_no_fallback() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let empty = meal(0);

        let mut tx = repo.begin().await.unwrap();
        tx.insert_meal(&empty).await.unwrap();
        tx.insert_units(&[FundedUnit::mint(DonationId::new(), None, now)]).await.unwrap();

        let policy = CapacitySource::default_policy();
        let result = reserve_one(tx.as_mut(), &policy, MealSelection::Meal(empty.id), now).await;
        assert_eq!(result, Err(VoucherError::OutOfCapacity));

        let missing = reserve_one(tx.as_mut(), &policy, MealSelection::Meal(MealId::new()), now).await;
        assert!(matches!(missing, Err(VoucherError::NotFound { .. })));
    }

    #[tokio::test]
    async fn expired_units_are_not_reserved() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let lapsed = FundedUnit::mint(DonationId::new(), Some(now - chrono::Duration::hours(1)), now);

        let mut tx = repo.begin().await.unwrap();
        tx.insert_units(&[lapsed]).await.unwrap();
        let result =
            reserve_one(tx.as_mut(), &[CapacitySource::UnitPool], MealSelection::Any, now).await;
        assert_eq!(result, Err(VoucherError::OutOfCapacity));
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let stocked = meal(1);
        let unit = FundedUnit::mint(DonationId::new(), None, now);

        let mut tx = repo.begin().await.unwrap();
        tx.insert_meal(&stocked).await.unwrap();
        tx.insert_units(std::slice::from_ref(&unit)).await.unwrap();

        release(tx.as_mut(), CapacityHandle::Meal(stocked.id)).await.unwrap();
        assert_eq!(tx.lock_meal(stocked.id).await.unwrap().unwrap().quantity_available, 2);

        tx.set_unit_status(unit.id, UnitStatus::Reserved).await.unwrap();
        release(tx.as_mut(), CapacityHandle::Unit(unit.id)).await.unwrap();
        assert_eq!(tx.lock_unit(unit.id).await.unwrap().unwrap().status, UnitStatus::Available);
    }

    #[tokio::test]
    async fn settle_never_leaves_claimed() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let unit = FundedUnit::mint(DonationId::new(), None, now);

        let mut tx = repo.begin().await.unwrap();
        tx.insert_units(std::slice::from_ref(&unit)).await.unwrap();
        settle(tx.as_mut(), CapacityHandle::Unit(unit.id), UnitStatus::Claimed).await.unwrap();
        settle(tx.as_mut(), CapacityHandle::Unit(unit.id), UnitStatus::Expired).await.unwrap();
        assert_eq!(tx.lock_unit(unit.id).await.unwrap().unwrap().status, UnitStatus::Claimed);
    }
}
