//! Persistence for the voucher core.
//!
//! Every write goes through a [`Transaction`] obtained from a [`Repository`].
//! A transaction holds row locks for everything it has read through a
//! `lock_*` method until it is committed or dropped. Dropping a transaction
//! without calling [`Transaction::commit`] rolls it back.
//!
//! Two backends are provided:
//!
//! - [`memory::InMemoryRepository`] for tests and demos
//! - [`postgres::PostgresRepository`] for production
//!
//! Note: the traits use `async_trait` so they stay dyn-compatible.

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::types::{
    Donation, DonationId, FundedUnit, Meal, MealId, MetricsSnapshot, RequesterProfile, Student,
    StudentDocument, StudentId, TimeSlot, TimeSlotId, UnitId, UnitStatus, Voucher, VoucherId,
    WebhookReceipt,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Entry point to storage.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Start an atomic unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] if storage is unreachable.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Read a donation without locking it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    async fn donation(&self, id: DonationId) -> Result<Option<Donation>>;

    /// Funded units minted for a donation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    async fn units_for_donation(&self, id: DonationId) -> Result<Vec<FundedUnit>>;

    /// Read a voucher without locking it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    async fn voucher(&self, id: VoucherId) -> Result<Option<Voucher>>;

    /// Read a meal without locking it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    async fn meal(&self, id: MealId) -> Result<Option<Meal>>;

    /// Look up a requester profile by email.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    async fn student_by_email(&self, email: &str) -> Result<Option<Student>>;

    /// Documents on file for a student, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    async fn documents_for_student(&self, id: StudentId) -> Result<Vec<StudentDocument>>;

    /// Active vouchers scheduled strictly before `date`.
    ///
    /// Unlocked; callers re-check each voucher under lock.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    async fn overdue_voucher_ids(&self, date: NaiveDate) -> Result<Vec<VoucherId>>;

    /// Recompute dashboard counters from source rows.
    ///
    /// Funded units count as available only while issuance could still
    /// reserve them at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoucherError::Persistence`] on storage failure.
    async fn metrics_snapshot(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot>;
}

/// An open atomic unit of work.
///
/// # Errors
///
/// Every method returns [`crate::error::VoucherError::Persistence`] on storage
/// failure; the transaction should then be dropped.
#[async_trait]
#[allow(clippy::missing_errors_doc)]
pub trait Transaction: Send {
    // ═══════════════════════════════════════════════════════════
    // Time slots
    // ═══════════════════════════════════════════════════════════

    /// Read and lock a time slot.
    async fn lock_time_slot(&mut self, id: TimeSlotId) -> Result<Option<TimeSlot>>;

    /// Insert a time slot.
    async fn insert_time_slot(&mut self, slot: &TimeSlot) -> Result<()>;

    /// Overwrite a locked time slot.
    async fn save_time_slot(&mut self, slot: &TimeSlot) -> Result<()>;

    // ═══════════════════════════════════════════════════════════
    // Meals (pooled counter)
    // ═══════════════════════════════════════════════════════════

    /// Read and lock a meal.
    async fn lock_meal(&mut self, id: MealId) -> Result<Option<Meal>>;

    /// Lock the oldest active meal with stock left, if any.
    async fn lock_stocked_meal(&mut self) -> Result<Option<Meal>>;

    /// Insert a meal.
    async fn insert_meal(&mut self, meal: &Meal) -> Result<()>;

    /// Overwrite a locked meal.
    async fn save_meal(&mut self, meal: &Meal) -> Result<()>;

    // ═══════════════════════════════════════════════════════════
    // Funded units (unit pool)
    // ═══════════════════════════════════════════════════════════

    /// Lock the oldest reservable unit, skipping units locked elsewhere.
    async fn lock_available_unit(&mut self, now: DateTime<Utc>) -> Result<Option<FundedUnit>>;

    /// Read and lock a unit.
    async fn lock_unit(&mut self, id: UnitId) -> Result<Option<FundedUnit>>;

    /// Set a locked unit's status.
    async fn set_unit_status(&mut self, id: UnitId, status: UnitStatus) -> Result<()>;

    /// Insert freshly minted units.
    async fn insert_units(&mut self, units: &[FundedUnit]) -> Result<()>;

    /// Expire every still-available unit of a donation. Returns how many.
    async fn expire_available_units_of(&mut self, id: DonationId) -> Result<u64>;

    /// Expire available units whose `expires_at` is at or before `now`. Returns how many.
    async fn expire_lapsed_units(&mut self, now: DateTime<Utc>) -> Result<u64>;

    // ═══════════════════════════════════════════════════════════
    // Donations
    // ═══════════════════════════════════════════════════════════

    /// Read and lock a donation.
    async fn lock_donation(&mut self, id: DonationId) -> Result<Option<Donation>>;

    /// Read and lock the donation attached to a checkout session.
    async fn lock_donation_by_session(&mut self, session_id: &str) -> Result<Option<Donation>>;

    /// Insert a donation.
    async fn insert_donation(&mut self, donation: &Donation) -> Result<()>;

    /// Overwrite a locked donation.
    async fn save_donation(&mut self, donation: &Donation) -> Result<()>;

    // ═══════════════════════════════════════════════════════════
    // Requesters and documents
    // ═══════════════════════════════════════════════════════════

    /// Insert or update the profile keyed by `profile.email`.
    async fn upsert_student(
        &mut self,
        profile: &RequesterProfile,
        now: DateTime<Utc>,
    ) -> Result<Student>;

    /// Most recently uploaded document of a student.
    async fn latest_document(&mut self, id: StudentId) -> Result<Option<StudentDocument>>;

    /// Insert a document.
    async fn insert_document(&mut self, document: &StudentDocument) -> Result<()>;

    // ═══════════════════════════════════════════════════════════
    // Vouchers
    // ═══════════════════════════════════════════════════════════

    /// Whether a voucher already uses `reference`.
    async fn reference_exists(&mut self, reference: &str) -> Result<bool>;

    /// Insert a voucher.
    ///
    /// Returns `false`, leaving the transaction usable, when another voucher
    /// already holds the same reference number. A concurrent transaction
    /// inserting the same reference is waited on before deciding.
    async fn insert_voucher(&mut self, voucher: &Voucher) -> Result<bool>;

    /// Read and lock a voucher.
    async fn lock_voucher(&mut self, id: VoucherId) -> Result<Option<Voucher>>;

    /// Read and lock a voucher by reference number.
    async fn lock_voucher_by_reference(&mut self, reference: &str) -> Result<Option<Voucher>>;

    /// Overwrite a locked voucher.
    async fn save_voucher(&mut self, voucher: &Voucher) -> Result<()>;

    // ═══════════════════════════════════════════════════════════
    // Webhooks
    // ═══════════════════════════════════════════════════════════

    /// Record a webhook event. Returns `false` if the event ID was already recorded.
    async fn record_webhook_event(&mut self, receipt: &WebhookReceipt) -> Result<bool>;

    /// Make every change visible and release locks.
    async fn commit(self: Box<Self>) -> Result<()>;
}
