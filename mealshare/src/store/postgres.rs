//! `PostgreSQL` repository implementation.
//!
//! Row locking follows one rule: anything a transaction intends to change is
//! read with `SELECT ... FOR UPDATE` first. Funded units are interchangeable,
//! so the unit pool uses `FOR UPDATE SKIP LOCKED` and concurrent issuers take
//! different units instead of queueing on the same one.
//!
//! # Example
//!
//! ```no_run
//! use mealshare::config::DatabaseConfig;
//! use mealshare::store::postgres::PostgresRepository;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = PostgresRepository::connect(&DatabaseConfig::default()).await?;
//! repo.migrate().await?;
//! # Ok(())
//! # }
//! ```

use super::{Repository, Transaction};
use crate::config::DatabaseConfig;
use crate::error::{Result, VoucherError};
use crate::types::{
    Donation, DonationId, FundedUnit, Meal, MealId, MetricsSnapshot, Money, PaymentMethod,
    PaymentStatus, RequesterProfile, RequesterSnapshot, Student, StudentDocument, StudentId,
    TimeSlot, TimeSlotId, UnitId, UnitStatus, UserId, Voucher, VoucherId, VoucherStatus,
    WebhookReceipt,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use std::time::Duration;
use uuid::Uuid;

const DONATION_COLUMNS: &str = "id, donor_id, donor_email, amount, meal_count, payment_method, \
     payment_status, checkout_session_id, payment_intent_id, created_at, completed_at";

const UNIT_COLUMNS: &str = "id, donation_id, status, expires_at, created_at";

const MEAL_COLUMNS: &str =
    "id, name, description, quantity_available, is_active, owner_id, created_at";

const VOUCHER_COLUMNS: &str = "id, reference_number, student_id, requested_by, unit_id, meal_id, \
     time_slot_id, scheduled_date, status, claimed_at, claimed_by, cancelled_at, cancelled_by, \
     requester_full_name, requester_course, requester_year_level, requester_phone, created_at";

const DOCUMENT_COLUMNS: &str =
    "id, student_id, url, file_name, content_type, size_bytes, voucher_id, uploaded_at";

/// `PostgreSQL` repository.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool using `config`.
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::Persistence`] if the database is unreachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::Persistence`] if migrations fail.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn donation(&self, id: DonationId) -> Result<Option<Donation>> {
        let row = sqlx::query(&format!("SELECT {DONATION_COLUMNS} FROM donations WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(donation_from_row).transpose()
    }

    async fn units_for_donation(&self, id: DonationId) -> Result<Vec<FundedUnit>> {
        let rows = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM funded_units WHERE donation_id = $1 ORDER BY created_at, id"
        ))
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(unit_from_row).collect()
    }

    async fn voucher(&self, id: VoucherId) -> Result<Option<Voucher>> {
        let row = sqlx::query(&format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(voucher_from_row).transpose()
    }

    async fn meal(&self, id: MealId) -> Result<Option<Meal>> {
        let row = sqlx::query(&format!("SELECT {MEAL_COLUMNS} FROM meals WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(meal_from_row).transpose()
    }

    async fn student_by_email(&self, email: &str) -> Result<Option<Student>> {
        let row = sqlx::query(
            r"
            SELECT id, email, full_name, course, year_level, phone, updated_at
            FROM students
            WHERE email = $1
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(student_from_row).transpose()
    }

    async fn documents_for_student(&self, id: StudentId) -> Result<Vec<StudentDocument>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM student_documents \
             WHERE student_id = $1 ORDER BY uploaded_at DESC, id"
        ))
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn overdue_voucher_ids(&self, date: NaiveDate) -> Result<Vec<VoucherId>> {
        let rows = sqlx::query(
            r"
            SELECT id FROM vouchers
            WHERE status = 'active' AND scheduled_date < $1
            ORDER BY scheduled_date, id
            ",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(VoucherId::from_uuid(row.try_get("id")?)))
            .collect()
    }

    async fn metrics_snapshot(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot> {
        let row = sqlx::query(
            r"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE payment_status = 'completed'), 0)
                    AS total_donations,
                COALESCE(SUM(meal_count) FILTER (WHERE payment_status = 'completed'), 0)::BIGINT
                    AS total_meals_donated,
                COUNT(DISTINCT donor_id) FILTER (WHERE payment_status = 'completed')
                    AS total_donors,
                (
                    (SELECT COUNT(*) FROM funded_units
                     WHERE status = 'available' AND (expires_at IS NULL OR expires_at > $1))
                    + (SELECT COALESCE(SUM(quantity_available), 0) FROM meals WHERE is_active)
                )::BIGINT AS meals_available
            FROM donations
            ",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(MetricsSnapshot {
            total_donations: Money::new(row.try_get::<Decimal, _>("total_donations")?),
            total_meals_donated: non_negative(row.try_get("total_meals_donated")?),
            total_donors: non_negative(row.try_get("total_donors")?),
            meals_available: non_negative(row.try_get("meals_available")?),
        })
    }
}

/// Open `PostgreSQL` transaction.
///
/// Dropping it without `commit` rolls back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn lock_time_slot(&mut self, id: TimeSlotId) -> Result<Option<TimeSlot>> {
        let row = sqlx::query(
            r"
            SELECT id, name, start_time, end_time, is_active
            FROM time_slots
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(time_slot_from_row).transpose()
    }

    async fn insert_time_slot(&mut self, slot: &TimeSlot) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO time_slots (id, name, start_time, end_time, is_active)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(slot.id.as_uuid())
        .bind(&slot.name)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(slot.is_active)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_time_slot(&mut self, slot: &TimeSlot) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE time_slots
            SET name = $2, start_time = $3, end_time = $4, is_active = $5
            WHERE id = $1
            ",
        )
        .bind(slot.id.as_uuid())
        .bind(&slot.name)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(slot.is_active)
        .execute(&mut *self.tx)
        .await?;
        expect_one_row(result.rows_affected(), "time slot", slot.id)
    }

    async fn lock_meal(&mut self, id: MealId) -> Result<Option<Meal>> {
        let row = sqlx::query(&format!("SELECT {MEAL_COLUMNS} FROM meals WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(meal_from_row).transpose()
    }

    async fn lock_stocked_meal(&mut self) -> Result<Option<Meal>> {
        let sql = format!(
            "SELECT {MEAL_COLUMNS} FROM meals \
             WHERE is_active AND quantity_available > 0 \
             ORDER BY created_at, id LIMIT 1 FOR UPDATE"
        );
        // A row that stops matching while we wait on its lock is dropped from
        // the result rather than replaced. Each empty answer therefore means a
        // competitor committed a decrement; retry while any stock is left.
        loop {
            let row = sqlx::query(&sql).fetch_optional(&mut *self.tx).await?;
            if let Some(row) = row {
                return meal_from_row(&row).map(Some);
            }
            let stocked: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM meals WHERE is_active AND quantity_available > 0)",
            )
            .fetch_one(&mut *self.tx)
            .await?;
            if !stocked {
                return Ok(None);
            }
            tracing::debug!("Stocked meal drained while waiting on its lock, retrying");
        }
    }

    async fn insert_meal(&mut self, meal: &Meal) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO meals
                (id, name, description, quantity_available, is_active, owner_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(meal.id.as_uuid())
        .bind(&meal.name)
        .bind(&meal.description)
        .bind(to_i32(meal.quantity_available)?)
        .bind(meal.is_active)
        .bind(meal.owner_id.as_uuid())
        .bind(meal.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_meal(&mut self, meal: &Meal) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE meals
            SET name = $2, description = $3, quantity_available = $4, is_active = $5
            WHERE id = $1
            ",
        )
        .bind(meal.id.as_uuid())
        .bind(&meal.name)
        .bind(&meal.description)
        .bind(to_i32(meal.quantity_available)?)
        .bind(meal.is_active)
        .execute(&mut *self.tx)
        .await?;
        expect_one_row(result.rows_affected(), "meal", meal.id)
    }

    async fn lock_available_unit(&mut self, now: DateTime<Utc>) -> Result<Option<FundedUnit>> {
        let row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM funded_units \
             WHERE status = 'available' AND (expires_at IS NULL OR expires_at > $1) \
             ORDER BY created_at, id LIMIT 1 FOR UPDATE SKIP LOCKED"
        ))
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    async fn lock_unit(&mut self, id: UnitId) -> Result<Option<FundedUnit>> {
        let row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM funded_units WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    async fn set_unit_status(&mut self, id: UnitId, status: UnitStatus) -> Result<()> {
        let result = sqlx::query("UPDATE funded_units SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;
        expect_one_row(result.rows_affected(), "funded unit", id)
    }

    async fn insert_units(&mut self, units: &[FundedUnit]) -> Result<()> {
        for unit in units {
            sqlx::query(
                r"
                INSERT INTO funded_units (id, donation_id, status, expires_at, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(unit.id.as_uuid())
            .bind(unit.donation_id.as_uuid())
            .bind(unit.status.as_str())
            .bind(unit.expires_at)
            .bind(unit.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn expire_available_units_of(&mut self, id: DonationId) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE funded_units SET status = 'expired'
            WHERE donation_id = $1 AND status = 'available'
            ",
        )
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_lapsed_units(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE funded_units SET status = 'expired'
            WHERE status = 'available' AND expires_at IS NOT NULL AND expires_at <= $1
            ",
        )
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn lock_donation(&mut self, id: DonationId) -> Result<Option<Donation>> {
        let row = sqlx::query(&format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(donation_from_row).transpose()
    }

    async fn lock_donation_by_session(&mut self, session_id: &str) -> Result<Option<Donation>> {
        let row = sqlx::query(&format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE checkout_session_id = $1 FOR UPDATE"
        ))
        .bind(session_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(donation_from_row).transpose()
    }

    async fn insert_donation(&mut self, donation: &Donation) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO donations ({DONATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(donation.id.as_uuid())
        .bind(donation.donor_id.as_uuid())
        .bind(&donation.donor_email)
        .bind(donation.amount.amount())
        .bind(to_i32(donation.meal_count)?)
        .bind(donation.payment_method.as_str())
        .bind(donation.payment_status.as_str())
        .bind(&donation.checkout_session_id)
        .bind(&donation.payment_intent_id)
        .bind(donation.created_at)
        .bind(donation.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_donation(&mut self, donation: &Donation) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE donations
            SET payment_status = $2,
                checkout_session_id = $3,
                payment_intent_id = $4,
                completed_at = $5
            WHERE id = $1
            ",
        )
        .bind(donation.id.as_uuid())
        .bind(donation.payment_status.as_str())
        .bind(&donation.checkout_session_id)
        .bind(&donation.payment_intent_id)
        .bind(donation.completed_at)
        .execute(&mut *self.tx)
        .await?;
        expect_one_row(result.rows_affected(), "donation", donation.id)
    }

    async fn upsert_student(
        &mut self,
        profile: &RequesterProfile,
        now: DateTime<Utc>,
    ) -> Result<Student> {
        let row = sqlx::query(
            r"
            INSERT INTO students (id, email, full_name, course, year_level, phone, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                course = EXCLUDED.course,
                year_level = EXCLUDED.year_level,
                phone = EXCLUDED.phone,
                updated_at = EXCLUDED.updated_at
            RETURNING id, email, full_name, course, year_level, phone, updated_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(&profile.email)
        .bind(&profile.full_name)
        .bind(&profile.course)
        .bind(i16::from(profile.year_level))
        .bind(&profile.phone)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;
        student_from_row(&row)
    }

    async fn latest_document(&mut self, id: StudentId) -> Result<Option<StudentDocument>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM student_documents \
             WHERE student_id = $1 ORDER BY uploaded_at DESC LIMIT 1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn insert_document(&mut self, document: &StudentDocument) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO student_documents ({DOCUMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(document.id.as_uuid())
        .bind(document.student_id.as_uuid())
        .bind(&document.url)
        .bind(&document.file_name)
        .bind(&document.content_type)
        .bind(i64::try_from(document.size_bytes).map_err(|_| {
            VoucherError::Persistence(format!("document too large: {} bytes", document.size_bytes))
        })?)
        .bind(document.voucher_id.map(|id| *id.as_uuid()))
        .bind(document.uploaded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn reference_exists(&mut self, reference: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM vouchers WHERE reference_number = $1) AS taken",
        )
        .bind(reference)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("taken")?)
    }

    async fn insert_voucher(&mut self, voucher: &Voucher) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO vouchers ({VOUCHER_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (reference_number) DO NOTHING"
        ))
        .bind(voucher.id.as_uuid())
        .bind(&voucher.reference_number)
        .bind(voucher.student_id.as_uuid())
        .bind(voucher.requested_by.as_uuid())
        .bind(voucher.unit_id.map(|id| *id.as_uuid()))
        .bind(voucher.meal_id.map(|id| *id.as_uuid()))
        .bind(voucher.time_slot_id.as_uuid())
        .bind(voucher.scheduled_date)
        .bind(voucher.status.as_str())
        .bind(voucher.claimed_at)
        .bind(voucher.claimed_by.map(|id| *id.as_uuid()))
        .bind(voucher.cancelled_at)
        .bind(voucher.cancelled_by.map(|id| *id.as_uuid()))
        .bind(&voucher.requester.full_name)
        .bind(&voucher.requester.course)
        .bind(i16::from(voucher.requester.year_level))
        .bind(&voucher.requester.phone)
        .bind(voucher.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_voucher(&mut self, id: VoucherId) -> Result<Option<Voucher>> {
        let row = sqlx::query(&format!(
            "SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(voucher_from_row).transpose()
    }

    async fn lock_voucher_by_reference(&mut self, reference: &str) -> Result<Option<Voucher>> {
        let row = sqlx::query(&format!(
            "SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE reference_number = $1 FOR UPDATE"
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(voucher_from_row).transpose()
    }

    async fn save_voucher(&mut self, voucher: &Voucher) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE vouchers
            SET status = $2,
                claimed_at = $3,
                claimed_by = $4,
                cancelled_at = $5,
                cancelled_by = $6
            WHERE id = $1
            ",
        )
        .bind(voucher.id.as_uuid())
        .bind(voucher.status.as_str())
        .bind(voucher.claimed_at)
        .bind(voucher.claimed_by.map(|id| *id.as_uuid()))
        .bind(voucher.cancelled_at)
        .bind(voucher.cancelled_by.map(|id| *id.as_uuid()))
        .execute(&mut *self.tx)
        .await?;
        expect_one_row(result.rows_affected(), "voucher", voucher.id)
    }

    async fn record_webhook_event(&mut self, receipt: &WebhookReceipt) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO webhook_events (event_id, event_type, received_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(&receipt.event_id)
        .bind(&receipt.event_type)
        .bind(receipt.received_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| VoucherError::Persistence(format!("value {value} exceeds i32::MAX")))
}

fn to_u32(value: i32) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| VoucherError::Persistence(format!("negative count {value} in storage")))
}

fn to_u8(value: i16) -> Result<u8> {
    u8::try_from(value)
        .map_err(|_| VoucherError::Persistence(format!("year level {value} out of range")))
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn expect_one_row(affected: u64, entity: &'static str, id: impl std::fmt::Display) -> Result<()> {
    if affected == 0 {
        return Err(VoucherError::not_found(entity, id));
    }
    Ok(())
}

fn unknown(kind: &str, value: &str) -> VoucherError {
    VoucherError::Persistence(format!("unknown {kind} '{value}' in storage"))
}

fn donation_from_row(row: &PgRow) -> Result<Donation> {
    let method: String = row.try_get("payment_method")?;
    let status: String = row.try_get("payment_status")?;
    Ok(Donation {
        id: DonationId::from_uuid(row.try_get("id")?),
        donor_id: UserId::from_uuid(row.try_get("donor_id")?),
        donor_email: row.try_get("donor_email")?,
        amount: Money::new(row.try_get("amount")?),
        meal_count: to_u32(row.try_get("meal_count")?)?,
        payment_method: PaymentMethod::parse(&method).ok_or_else(|| unknown("payment method", &method))?,
        payment_status: PaymentStatus::parse(&status).ok_or_else(|| unknown("payment status", &status))?,
        checkout_session_id: row.try_get("checkout_session_id")?,
        payment_intent_id: row.try_get("payment_intent_id")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn unit_from_row(row: &PgRow) -> Result<FundedUnit> {
    let status: String = row.try_get("status")?;
    Ok(FundedUnit {
        id: UnitId::from_uuid(row.try_get("id")?),
        donation_id: DonationId::from_uuid(row.try_get("donation_id")?),
        status: UnitStatus::parse(&status).ok_or_else(|| unknown("unit status", &status))?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn meal_from_row(row: &PgRow) -> Result<Meal> {
    Ok(Meal {
        id: MealId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        quantity_available: to_u32(row.try_get("quantity_available")?)?,
        is_active: row.try_get("is_active")?,
        owner_id: UserId::from_uuid(row.try_get("owner_id")?),
        created_at: row.try_get("created_at")?,
    })
}

fn time_slot_from_row(row: &PgRow) -> Result<TimeSlot> {
    Ok(TimeSlot {
        id: TimeSlotId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        is_active: row.try_get("is_active")?,
    })
}

fn student_from_row(row: &PgRow) -> Result<Student> {
    Ok(Student {
        id: StudentId::from_uuid(row.try_get("id")?),
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        course: row.try_get("course")?,
        year_level: to_u8(row.try_get("year_level")?)?,
        phone: row.try_get("phone")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn document_from_row(row: &PgRow) -> Result<StudentDocument> {
    let size: i64 = row.try_get("size_bytes")?;
    Ok(StudentDocument {
        id: crate::types::DocumentId::from_uuid(row.try_get("id")?),
        student_id: StudentId::from_uuid(row.try_get("student_id")?),
        url: row.try_get("url")?,
        file_name: row.try_get("file_name")?,
        content_type: row.try_get("content_type")?,
        size_bytes: non_negative(size),
        voucher_id: row.try_get::<Option<Uuid>, _>("voucher_id")?.map(VoucherId::from_uuid),
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn voucher_from_row(row: &PgRow) -> Result<Voucher> {
    let status: String = row.try_get("status")?;
    Ok(Voucher {
        id: VoucherId::from_uuid(row.try_get("id")?),
        reference_number: row.try_get("reference_number")?,
        student_id: StudentId::from_uuid(row.try_get("student_id")?),
        requested_by: UserId::from_uuid(row.try_get("requested_by")?),
        unit_id: row.try_get::<Option<Uuid>, _>("unit_id")?.map(UnitId::from_uuid),
        meal_id: row.try_get::<Option<Uuid>, _>("meal_id")?.map(MealId::from_uuid),
        time_slot_id: TimeSlotId::from_uuid(row.try_get("time_slot_id")?),
        scheduled_date: row.try_get("scheduled_date")?,
        status: VoucherStatus::parse(&status).ok_or_else(|| unknown("voucher status", &status))?,
        claimed_at: row.try_get("claimed_at")?,
        claimed_by: row.try_get::<Option<Uuid>, _>("claimed_by")?.map(UserId::from_uuid),
        cancelled_at: row.try_get("cancelled_at")?,
        cancelled_by: row.try_get::<Option<Uuid>, _>("cancelled_by")?.map(UserId::from_uuid),
        requester: RequesterSnapshot {
            full_name: row.try_get("requester_full_name")?,
            course: row.try_get("requester_course")?,
            year_level: to_u8(row.try_get("requester_year_level")?)?,
            phone: row.try_get("requester_phone")?,
        },
        created_at: row.try_get("created_at")?,
    })
}
