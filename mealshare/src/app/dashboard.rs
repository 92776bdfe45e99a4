//! Public dashboard counters.
//!
//! Nothing is cached: every read recomputes the snapshot from donations,
//! funded units and meal stock, so it is never stale after a rollback.

use super::AppContext;
use crate::error::Result;
use crate::metrics;
use crate::types::MetricsSnapshot;

/// Read-side view over donations and capacity
#[derive(Clone)]
pub struct DashboardService {
    ctx: AppContext,
}

impl DashboardService {
    /// Creates a new dashboard service
    #[must_use]
    pub const fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Current totals.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    #[tracing::instrument(skip(self))]
    pub async fn metrics_snapshot(&self) -> Result<MetricsSnapshot> {
        self.ctx.repository.metrics_snapshot(self.ctx.clock.now()).await
    }

    /// Recompute the totals and export them as gauges.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    #[tracing::instrument(skip(self))]
    pub async fn publish(&self) -> Result<MetricsSnapshot> {
        let snapshot = self.metrics_snapshot().await?;
        metrics::publish_snapshot(&snapshot);
        Ok(snapshot)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::payment_gateway::MockPaymentGateway;
    use crate::store::memory::InMemoryRepository;
    use crate::store::Repository;
    use crate::types::{Donation, FundedUnit, Meal, MealId, Money, PaymentMethod, UnitStatus, UserId};
    use mealshare_core::environment::Clock;
    use mealshare_testing::test_clock;
    use std::sync::Arc;

    fn completed(donor: UserId, major: i64, meals: u32) -> Donation {
        let mut donation = Donation::pending(
            donor,
            "d@example.com".to_string(),
            Money::from_major(major),
            meals,
            PaymentMethod::Card,
            test_clock().now(),
        );
        donation.payment_status = crate::types::PaymentStatus::Completed;
        donation
    }

    #[tokio::test]
    async fn snapshot_counts_completed_donations_and_live_capacity() {
        let repo = InMemoryRepository::new();
        let donor = UserId::new();
        let first = completed(donor, 650, 10);
        let second = completed(donor, 130, 2);
        let pending = Donation::pending(
            UserId::new(),
            "p@example.com".to_string(),
            Money::from_major(65),
            1,
            PaymentMethod::Card,
            test_clock().now(),
        );

        let mut units: Vec<FundedUnit> =
            (0..3).map(|_| FundedUnit::mint(first.id, None, test_clock().now())).collect();
        units[0].status = UnitStatus::Claimed;

        let mut tx = repo.begin().await.unwrap();
        for donation in [&first, &second, &pending] {
            tx.insert_donation(donation).await.unwrap();
        }
        tx.insert_units(&units).await.unwrap();
        tx.insert_meal(&Meal {
            id: MealId::new(),
            name: "Chicken Adobo".to_string(),
            description: String::new(),
            quantity_available: 5,
            is_active: true,
            owner_id: UserId::new(),
            created_at: test_clock().now(),
        })
        .await
        .unwrap();
        tx.insert_meal(&Meal {
            id: MealId::new(),
            name: "Withdrawn".to_string(),
            description: String::new(),
            quantity_available: 7,
            is_active: false,
            owner_id: UserId::new(),
            created_at: test_clock().now(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let dashboard = DashboardService::new(AppContext::new(
            Arc::new(repo),
            Arc::new(MockPaymentGateway::new()),
            Config::default(),
        ));
        let snapshot = dashboard.publish().await.unwrap();

        assert_eq!(snapshot.total_donations, Money::from_major(780));
        assert_eq!(snapshot.total_meals_donated, 12);
        assert_eq!(snapshot.total_donors, 1);
        assert_eq!(snapshot.meals_available, 2 + 5);
    }
}
