//! In-memory repository for tests and demos.
//!
//! Transactions are serialised through one owned async mutex over all tables.
//! Each transaction works on a draft copy; `commit` swaps the draft in, and
//! dropping the transaction discards it. This gives the same all-or-nothing
//! and mutual-exclusion guarantees the Postgres backend gets from row locks,
//! at table granularity.

use super::{Repository, Transaction};
use crate::error::{Result, VoucherError};
use crate::types::{
    Donation, DonationId, FundedUnit, Meal, MealId, MetricsSnapshot, Money, PaymentStatus,
    RequesterProfile, Student, StudentDocument, StudentId, TimeSlot, TimeSlotId, UnitId,
    UnitStatus, Voucher, VoucherId, VoucherStatus, WebhookReceipt,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    donations: HashMap<DonationId, Donation>,
    // Insertion order doubles as "oldest first".
    units: Vec<FundedUnit>,
    meals: Vec<Meal>,
    documents: Vec<StudentDocument>,
    time_slots: HashMap<TimeSlotId, TimeSlot>,
    students: HashMap<StudentId, Student>,
    vouchers: HashMap<VoucherId, Voucher>,
    webhook_events: HashMap<String, WebhookReceipt>,
}

impl Tables {
    fn unit_mut(&mut self, id: UnitId) -> Option<&mut FundedUnit> {
        self.units.iter_mut().find(|u| u.id == id)
    }

    fn meal_mut(&mut self, id: MealId) -> Option<&mut Meal> {
        self.meals.iter_mut().find(|m| m.id == id)
    }
}

/// Repository backed by process memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemoryRepository {
    /// Creates an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail with a persistence error.
    ///
    /// Used to exercise rollback paths.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of vouchers stored
    pub async fn voucher_count(&self) -> usize {
        self.tables.lock().await.vouchers.len()
    }

    /// All vouchers, in no particular order
    pub async fn vouchers(&self) -> Vec<Voucher> {
        self.tables.lock().await.vouchers.values().cloned().collect()
    }

    /// Number of recorded webhook events
    pub async fn webhook_event_count(&self) -> usize {
        self.tables.lock().await.webhook_events.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let draft = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            draft,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        }))
    }

    async fn donation(&self, id: DonationId) -> Result<Option<Donation>> {
        Ok(self.tables.lock().await.donations.get(&id).cloned())
    }

    async fn units_for_donation(&self, id: DonationId) -> Result<Vec<FundedUnit>> {
        let tables = self.tables.lock().await;
        Ok(tables.units.iter().filter(|u| u.donation_id == id).cloned().collect())
    }

    async fn voucher(&self, id: VoucherId) -> Result<Option<Voucher>> {
        Ok(self.tables.lock().await.vouchers.get(&id).cloned())
    }

    async fn meal(&self, id: MealId) -> Result<Option<Meal>> {
        let tables = self.tables.lock().await;
        Ok(tables.meals.iter().find(|m| m.id == id).cloned())
    }

    async fn student_by_email(&self, email: &str) -> Result<Option<Student>> {
        let tables = self.tables.lock().await;
        Ok(tables.students.values().find(|s| s.email == email).cloned())
    }

    async fn documents_for_student(&self, id: StudentId) -> Result<Vec<StudentDocument>> {
        let tables = self.tables.lock().await;
        let mut documents: Vec<_> =
            tables.documents.iter().filter(|d| d.student_id == id).cloned().collect();
        documents.reverse();
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(documents)
    }

    async fn overdue_voucher_ids(&self, date: NaiveDate) -> Result<Vec<VoucherId>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .vouchers
            .values()
            .filter(|v| v.status == VoucherStatus::Active && v.scheduled_date < date)
            .map(|v| v.id)
            .collect())
    }

    async fn metrics_snapshot(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot> {
        let tables = self.tables.lock().await;
        let completed: Vec<&Donation> = tables
            .donations
            .values()
            .filter(|d| d.payment_status == PaymentStatus::Completed)
            .collect();

        let total_donations: Money = completed.iter().map(|d| d.amount).sum();
        let total_meals_donated = completed.iter().map(|d| u64::from(d.meal_count)).sum();
        let total_donors = completed.iter().map(|d| d.donor_id).collect::<HashSet<_>>().len() as u64;

        let available_units = tables.units.iter().filter(|u| u.is_reservable(now)).count() as u64;
        let meal_stock: u64 = tables
            .meals
            .iter()
            .filter(|m| m.is_active)
            .map(|m| u64::from(m.quantity_available))
            .sum();

        Ok(MetricsSnapshot {
            total_donations,
            total_meals_donated,
            total_donors,
            meals_available: available_units + meal_stock,
        })
    }
}

/// Draft-and-swap transaction over [`InMemoryRepository`].
struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    draft: Tables,
    fail_commit: bool,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn lock_time_slot(&mut self, id: TimeSlotId) -> Result<Option<TimeSlot>> {
        Ok(self.draft.time_slots.get(&id).cloned())
    }

    async fn insert_time_slot(&mut self, slot: &TimeSlot) -> Result<()> {
        self.draft.time_slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn save_time_slot(&mut self, slot: &TimeSlot) -> Result<()> {
        match self.draft.time_slots.get_mut(&slot.id) {
            Some(row) => {
                *row = slot.clone();
                Ok(())
            }
            None => Err(VoucherError::not_found("time slot", slot.id)),
        }
    }

    async fn lock_meal(&mut self, id: MealId) -> Result<Option<Meal>> {
        Ok(self.draft.meals.iter().find(|m| m.id == id).cloned())
    }

    async fn lock_stocked_meal(&mut self) -> Result<Option<Meal>> {
        Ok(self.draft.meals.iter().find(|m| m.has_stock()).cloned())
    }

    async fn insert_meal(&mut self, meal: &Meal) -> Result<()> {
        self.draft.meals.push(meal.clone());
        Ok(())
    }

    async fn save_meal(&mut self, meal: &Meal) -> Result<()> {
        match self.draft.meal_mut(meal.id) {
            Some(row) => {
                *row = meal.clone();
                Ok(())
            }
            None => Err(VoucherError::not_found("meal", meal.id)),
        }
    }

    async fn lock_available_unit(&mut self, now: DateTime<Utc>) -> Result<Option<FundedUnit>> {
        Ok(self.draft.units.iter().find(|u| u.is_reservable(now)).cloned())
    }

    async fn lock_unit(&mut self, id: UnitId) -> Result<Option<FundedUnit>> {
        Ok(self.draft.units.iter().find(|u| u.id == id).cloned())
    }

    async fn set_unit_status(&mut self, id: UnitId, status: UnitStatus) -> Result<()> {
        match self.draft.unit_mut(id) {
            Some(unit) => {
                unit.status = status;
                Ok(())
            }
            None => Err(VoucherError::not_found("funded unit", id)),
        }
    }

    async fn insert_units(&mut self, units: &[FundedUnit]) -> Result<()> {
        self.draft.units.extend_from_slice(units);
        Ok(())
    }

    async fn expire_available_units_of(&mut self, id: DonationId) -> Result<u64> {
        let mut expired = 0;
        for unit in &mut self.draft.units {
            if unit.donation_id == id && unit.status == UnitStatus::Available {
                unit.status = UnitStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn expire_lapsed_units(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let mut expired = 0;
        for unit in &mut self.draft.units {
            if unit.status == UnitStatus::Available && unit.expires_at.is_some_and(|at| at <= now) {
                unit.status = UnitStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn lock_donation(&mut self, id: DonationId) -> Result<Option<Donation>> {
        Ok(self.draft.donations.get(&id).cloned())
    }

    async fn lock_donation_by_session(&mut self, session_id: &str) -> Result<Option<Donation>> {
        Ok(self
            .draft
            .donations
            .values()
            .find(|d| d.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn insert_donation(&mut self, donation: &Donation) -> Result<()> {
        self.draft.donations.insert(donation.id, donation.clone());
        Ok(())
    }

    async fn save_donation(&mut self, donation: &Donation) -> Result<()> {
        match self.draft.donations.get_mut(&donation.id) {
            Some(row) => {
                *row = donation.clone();
                Ok(())
            }
            None => Err(VoucherError::not_found("donation", donation.id)),
        }
    }

    async fn upsert_student(
        &mut self,
        profile: &RequesterProfile,
        now: DateTime<Utc>,
    ) -> Result<Student> {
        let existing = self.draft.students.values_mut().find(|s| s.email == profile.email);
        let student = match existing {
            Some(student) => {
                student.full_name.clone_from(&profile.full_name);
                student.course.clone_from(&profile.course);
                student.year_level = profile.year_level;
                student.phone.clone_from(&profile.phone);
                student.updated_at = now;
                student.clone()
            }
            None => {
                let student = Student {
                    id: StudentId::new(),
                    email: profile.email.clone(),
                    full_name: profile.full_name.clone(),
                    course: profile.course.clone(),
                    year_level: profile.year_level,
                    phone: profile.phone.clone(),
                    updated_at: now,
                };
                self.draft.students.insert(student.id, student.clone());
                student
            }
        };
        Ok(student)
    }

    async fn latest_document(&mut self, id: StudentId) -> Result<Option<StudentDocument>> {
        // Later insertions win ties on `uploaded_at`.
        Ok(self
            .draft
            .documents
            .iter()
            .filter(|d| d.student_id == id)
            .fold(None::<&StudentDocument>, |best, d| match best {
                Some(b) if b.uploaded_at > d.uploaded_at => Some(b),
                _ => Some(d),
            })
            .cloned())
    }

    async fn insert_document(&mut self, document: &StudentDocument) -> Result<()> {
        self.draft.documents.push(document.clone());
        Ok(())
    }

    async fn reference_exists(&mut self, reference: &str) -> Result<bool> {
        Ok(self.draft.vouchers.values().any(|v| v.reference_number == reference))
    }

    async fn insert_voucher(&mut self, voucher: &Voucher) -> Result<bool> {
        if self.draft.vouchers.values().any(|v| v.reference_number == voucher.reference_number) {
            return Ok(false);
        }
        self.draft.vouchers.insert(voucher.id, voucher.clone());
        Ok(true)
    }

    async fn lock_voucher(&mut self, id: VoucherId) -> Result<Option<Voucher>> {
        Ok(self.draft.vouchers.get(&id).cloned())
    }

    async fn lock_voucher_by_reference(&mut self, reference: &str) -> Result<Option<Voucher>> {
        Ok(self.draft.vouchers.values().find(|v| v.reference_number == reference).cloned())
    }

    async fn save_voucher(&mut self, voucher: &Voucher) -> Result<()> {
        match self.draft.vouchers.get_mut(&voucher.id) {
            Some(row) => {
                *row = voucher.clone();
                Ok(())
            }
            None => Err(VoucherError::not_found("voucher", voucher.id)),
        }
    }

    async fn record_webhook_event(&mut self, receipt: &WebhookReceipt) -> Result<bool> {
        if self.draft.webhook_events.contains_key(&receipt.event_id) {
            return Ok(false);
        }
        self.draft.webhook_events.insert(receipt.event_id.clone(), receipt.clone());
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            mut guard,
            draft,
            fail_commit,
        } = *self;
        if fail_commit {
            return Err(VoucherError::Persistence("commit failed".to_string()));
        }
        *guard = draft;
        Ok(())
    }
}
