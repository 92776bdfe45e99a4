//! Voucher redemption: claim, expire, cancel, and the overdue sweep.
//!
//! Every transition locks the voucher row, runs [`VoucherReducer`] and
//! settles the backing capacity in the same transaction. Two staff members
//! scanning the same voucher serialise on the row lock; the second one sees
//! [`VoucherError::InvalidTransition`].

use super::AppContext;
use crate::aggregates::{VoucherCommand, VoucherEnvironment, VoucherEvent, VoucherReducer};
use crate::capacity::{self, CapacityHandle};
use crate::error::{Result, VoucherError};
use crate::metrics;
use crate::reference;
use crate::roles::Actor;
use crate::store::Transaction;
use crate::types::{UnitStatus, Voucher, VoucherId};
use chrono::NaiveDate;
use mealshare_core::reducer::Reducer;
use std::fmt;

/// How a caller identifies a voucher
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoucherLookup {
    /// By ID
    Id(VoucherId),
    /// By reference number as typed or scanned; case and surrounding
    /// whitespace are ignored
    Reference(String),
}

impl From<VoucherId> for VoucherLookup {
    fn from(id: VoucherId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for VoucherLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Reference(reference) => f.write_str(reference),
        }
    }
}

/// Transition applied to every voucher of a bulk request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkAction {
    /// Claim each voucher
    Claim,
    /// Expire each voucher
    Expire,
    /// Cancel each voucher
    Cancel,
}

/// Result for one voucher of a bulk request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Voucher the result belongs to
    pub voucher_id: VoucherId,
    /// Updated voucher or why it was refused
    pub result: Result<Voucher>,
}

/// What an expiry sweep did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Vouchers moved to expired
    pub vouchers_expired: u64,
    /// Overdue candidates that changed state before they could be expired
    pub vouchers_skipped: u64,
    /// Candidates that failed with a storage error
    pub vouchers_failed: u64,
    /// Available funded units past their `expires_at`
    pub units_expired: u64,
}

/// Capacity a voucher consumed when it was issued
const fn backing_capacity(voucher: &Voucher) -> Option<CapacityHandle> {
    match (voucher.unit_id, voucher.meal_id) {
        (Some(unit), _) => Some(CapacityHandle::Unit(unit)),
        (None, Some(meal)) => Some(CapacityHandle::Meal(meal)),
        (None, None) => None,
    }
}

/// Moves vouchers through their lifecycle
#[derive(Clone)]
pub struct RedemptionService {
    ctx: AppContext,
    reducer: VoucherReducer,
    env: VoucherEnvironment,
}

impl RedemptionService {
    /// Creates a new redemption service
    #[must_use]
    pub fn new(ctx: AppContext) -> Self {
        let env = VoucherEnvironment::new(
            ctx.clock.clone(),
            ctx.config.vouchers.claim_window,
            ctx.config.vouchers.local_offset(),
        );
        Self {
            ctx,
            reducer: VoucherReducer::new(),
            env,
        }
    }

    /// Redeem a voucher at distribution.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] unless `staff` may claim
    /// - [`VoucherError::NotFound`] for an unknown voucher
    /// - [`VoucherError::InvalidTransition`] if the voucher is not active
    /// - [`VoucherError::Validation`] outside the claim window
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, staff), fields(voucher = %lookup, staff_id = %staff.user_id))]
    pub async fn claim(&self, lookup: VoucherLookup, staff: Actor) -> Result<Voucher> {
        let voucher = self.transition(&lookup, VoucherCommand::Claim { staff }).await?;
        metrics::record_voucher_claimed();
        tracing::info!(reference = %voucher.reference_number, "Voucher claimed");
        Ok(voucher)
    }

    /// Expire a voucher by hand.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] unless `actor` may expire vouchers
    /// - [`VoucherError::NotFound`] for an unknown voucher
    /// - [`VoucherError::InvalidTransition`] if the voucher is not active
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn expire(&self, voucher_id: VoucherId, actor: Actor) -> Result<Voucher> {
        let command = VoucherCommand::Expire { actor: Some(actor) };
        let voucher = self.transition(&VoucherLookup::Id(voucher_id), command).await?;
        metrics::record_vouchers_expired(1);
        tracing::info!(reference = %voucher.reference_number, "Voucher expired");
        Ok(voucher)
    }

    /// Void a voucher.
    ///
    /// Consumed capacity is returned to its source only when
    /// `restore_capacity_on_cancel` is set.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] unless `actor` is staff/admin or the requester
    /// - [`VoucherError::NotFound`] for an unknown voucher
    /// - [`VoucherError::InvalidTransition`] if the voucher is not active
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn cancel(&self, voucher_id: VoucherId, actor: Actor) -> Result<Voucher> {
        let command = VoucherCommand::Cancel { actor };
        let voucher = self.transition(&VoucherLookup::Id(voucher_id), command).await?;
        metrics::record_voucher_cancelled();
        tracing::info!(reference = %voucher.reference_number, "Voucher cancelled");
        Ok(voucher)
    }

    /// Claim several vouchers, each in its own transaction.
    pub async fn bulk_claim(&self, voucher_ids: &[VoucherId], staff: Actor) -> Vec<BulkOutcome> {
        self.bulk_action(voucher_ids, BulkAction::Claim, staff).await
    }

    /// Apply `action` to several vouchers, each in its own transaction.
    ///
    /// One failure does not stop or undo the others.
    #[tracing::instrument(skip(self, voucher_ids, actor), fields(count = voucher_ids.len()))]
    pub async fn bulk_action(
        &self,
        voucher_ids: &[VoucherId],
        action: BulkAction,
        actor: Actor,
    ) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(voucher_ids.len());
        for &voucher_id in voucher_ids {
            let result = match action {
                BulkAction::Claim => self.claim(VoucherLookup::Id(voucher_id), actor).await,
                BulkAction::Expire => self.expire(voucher_id, actor).await,
                BulkAction::Cancel => self.cancel(voucher_id, actor).await,
            };
            outcomes.push(BulkOutcome { voucher_id, result });
        }
        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        tracing::info!(?action, succeeded, failed = outcomes.len() - succeeded, "Bulk action done");
        outcomes
    }

    /// Expire active vouchers scheduled before `today`, and lapse funded
    /// units past their expiry.
    ///
    /// Candidates are re-checked under lock, so a voucher claimed while the
    /// sweep runs is skipped rather than expired.
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::Persistence`] if the candidate list or the
    /// unit sweep cannot be read or written. Per-voucher failures are
    /// counted in the report instead.
    #[tracing::instrument(skip(self))]
    pub async fn expire_overdue(&self, today: NaiveDate) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for voucher_id in self.ctx.repository.overdue_voucher_ids(today).await? {
            let command = VoucherCommand::Expire { actor: None };
            match self.transition(&VoucherLookup::Id(voucher_id), command).await {
                Ok(_) => report.vouchers_expired += 1,
                Err(VoucherError::InvalidTransition { .. } | VoucherError::Validation(_)) => {
                    report.vouchers_skipped += 1;
                }
                Err(error) => {
                    tracing::warn!(%voucher_id, %error, "Failed to expire voucher");
                    report.vouchers_failed += 1;
                }
            }
        }

        let mut tx = self.ctx.repository.begin().await?;
        report.units_expired = tx.expire_lapsed_units(self.ctx.clock.now()).await?;
        tx.commit().await?;

        metrics::record_vouchers_expired(report.vouchers_expired);
        tracing::info!(
            vouchers_expired = report.vouchers_expired,
            vouchers_skipped = report.vouchers_skipped,
            vouchers_failed = report.vouchers_failed,
            units_expired = report.units_expired,
            "Expiry sweep finished"
        );
        Ok(report)
    }

    async fn transition(&self, lookup: &VoucherLookup, command: VoucherCommand) -> Result<Voucher> {
        let mut tx = self.ctx.repository.begin().await?;

        let mut voucher = match lookup {
            VoucherLookup::Id(id) => tx
                .lock_voucher(*id)
                .await?
                .ok_or_else(|| VoucherError::not_found("voucher", id))?,
            VoucherLookup::Reference(raw) => {
                let reference = reference::normalize(raw);
                tx.lock_voucher_by_reference(&reference)
                    .await?
                    .ok_or_else(|| VoucherError::not_found("voucher", reference))?
            }
        };

        let events = self.reducer.reduce(&mut voucher, command, &self.env)?;
        for event in &events {
            self.settle_capacity(tx.as_mut(), &voucher, event).await?;
        }
        if !events.is_empty() {
            tx.save_voucher(&voucher).await?;
        }

        tx.commit().await?;
        Ok(voucher)
    }

    async fn settle_capacity(
        &self,
        tx: &mut dyn Transaction,
        voucher: &Voucher,
        event: &VoucherEvent,
    ) -> Result<()> {
        let Some(handle) = backing_capacity(voucher) else {
            return Ok(());
        };
        match event {
            VoucherEvent::Claimed { .. } => capacity::settle(tx, handle, UnitStatus::Claimed).await,
            VoucherEvent::Expired { .. } => capacity::settle(tx, handle, UnitStatus::Expired).await,
            VoucherEvent::Cancelled { .. } if self.ctx.config.vouchers.restore_capacity_on_cancel => {
                capacity::release(tx, handle).await
            }
            VoucherEvent::Cancelled { .. } => Ok(()),
        }
    }
}
