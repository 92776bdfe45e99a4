//! Voucher issuance engine.
//!
//! One request becomes one voucher backed by exactly one unit of capacity.
//! Everything happens inside a single storage transaction: if any step fails
//! the transaction is dropped and no capacity, profile, document or voucher
//! change survives.

use super::AppContext;
use crate::capacity::{self, CapacityHandle, MealSelection};
use crate::error::{Result, ValidationErrors, VoucherError};
use crate::metrics;
use crate::roles::{Actor, Capability};
use crate::store::Transaction;
use crate::types::{
    DocumentId, RequesterProfile, StoredDocument, StudentDocument, TimeSlotId, Voucher, VoucherId,
    VoucherStatus,
};
use chrono::NaiveDate;

/// Everything a requester submits to get a voucher
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoucherRequest {
    /// Authenticated requester
    pub actor: Actor,
    /// Profile fields; upserted by email
    pub requester: RequesterProfile,
    /// Which meal to draw from
    pub selection: MealSelection,
    /// Distribution slot
    pub time_slot_id: TimeSlotId,
    /// Distribution day, strictly after today
    pub scheduled_date: NaiveDate,
    /// Freshly uploaded enrollment document, if any
    pub document: Option<StoredDocument>,
}

/// Issues vouchers
#[derive(Clone)]
pub struct IssuanceService {
    ctx: AppContext,
}

impl IssuanceService {
    /// Creates a new issuance service
    #[must_use]
    pub const fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Issue one voucher.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] if the actor may not request vouchers
    /// - [`VoucherError::Validation`] for malformed fields, a date that is not
    ///   in the future, an inactive slot, or no document on file
    /// - [`VoucherError::NotFound`] for an unknown slot or meal
    /// - [`VoucherError::OutOfCapacity`] if no capacity is left
    /// - [`VoucherError::DuplicateReference`] if no free reference was found
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(
        skip(self, request),
        fields(
            requester = %request.requester.email,
            time_slot_id = %request.time_slot_id,
            scheduled_date = %request.scheduled_date,
        )
    )]
    pub async fn issue_voucher(&self, request: VoucherRequest) -> Result<Voucher> {
        match self.issue(request).await {
            Ok((voucher, handle)) => {
                metrics::record_voucher_issued(handle.source().as_str());
                tracing::info!(
                    voucher_id = %voucher.id,
                    reference = %voucher.reference_number,
                    source = handle.source().as_str(),
                    "Voucher issued"
                );
                Ok(voucher)
            }
            Err(error) => {
                metrics::record_voucher_rejected(rejection_label(&error));
                tracing::warn!(%error, "Voucher request refused");
                Err(error)
            }
        }
    }

    /// Store an enrollment document ahead of a voucher request.
    ///
    /// The returned [`StoredDocument`] goes into [`VoucherRequest::document`];
    /// it is linked to the requester only once a voucher is issued.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] if the actor may not request vouchers
    /// - [`VoucherError::Validation`] for an empty, oversized or unaccepted file
    /// - [`VoucherError::Persistence`] if the file cannot be written
    #[tracing::instrument(skip(self, actor, bytes), fields(user_id = %actor.user_id, size = bytes.len()))]
    pub async fn upload_document(
        &self,
        actor: Actor,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredDocument> {
        actor.require(Capability::RequestVoucher)?;
        self.ctx.storage.store(file_name, content_type, bytes).await
    }

    async fn issue(&self, request: VoucherRequest) -> Result<(Voucher, CapacityHandle)> {
        request.actor.require(Capability::RequestVoucher)?;

        let now = self.ctx.clock.now();
        let today = self.ctx.today();
        let requester = normalize_profile(request.requester);
        validate(&requester, request.scheduled_date, today)?;

        let mut tx = self.ctx.repository.begin().await?;

        let slot = tx
            .lock_time_slot(request.time_slot_id)
            .await?
            .ok_or_else(|| VoucherError::not_found("time slot", request.time_slot_id))?;
        if !slot.is_active {
            return Err(VoucherError::Validation(ValidationErrors::single(
                "time_slot_id",
                "is not open for requests",
            )));
        }

        let policy = &self.ctx.config.vouchers.capacity_policy;
        let handle = capacity::reserve_one(tx.as_mut(), policy, request.selection, now).await?;

        let student = tx.upsert_student(&requester, now).await?;

        let mut voucher = Voucher {
            id: VoucherId::new(),
            reference_number: String::new(),
            student_id: student.id,
            requested_by: request.actor.user_id,
            unit_id: handle.unit_id(),
            meal_id: handle.meal_id(),
            time_slot_id: slot.id,
            scheduled_date: request.scheduled_date,
            status: VoucherStatus::Active,
            claimed_at: None,
            claimed_by: None,
            cancelled_at: None,
            cancelled_by: None,
            requester: (&requester).into(),
            created_at: now,
        };
        self.insert_with_unused_reference(tx.as_mut(), &mut voucher, today).await?;

        match request.document {
            Some(document) => {
                tx.insert_document(&StudentDocument {
                    id: DocumentId::new(),
                    student_id: student.id,
                    url: document.url,
                    file_name: document.file_name,
                    content_type: document.content_type,
                    size_bytes: document.size_bytes,
                    voucher_id: Some(voucher.id),
                    uploaded_at: now,
                })
                .await?;
            }
            None => {
                if tx.latest_document(student.id).await?.is_none() {
                    return Err(VoucherError::Validation(ValidationErrors::single(
                        "document",
                        "proof of enrollment is required",
                    )));
                }
            }
        }

        tx.commit().await?;
        Ok((voucher, handle))
    }

    /// Assign a fresh reference and insert the voucher.
    ///
    /// A candidate can pass the existence check and still lose the insert to
    /// a concurrent request that committed it first; both cases draw again
    /// from the same attempt budget.
    async fn insert_with_unused_reference(
        &self,
        tx: &mut dyn Transaction,
        voucher: &mut Voucher,
        today: NaiveDate,
    ) -> Result<()> {
        let attempts = self.ctx.config.vouchers.reference_attempts.max(1);
        for attempt in 1..=attempts {
            let candidate = self.ctx.references.generate(today);
            if tx.reference_exists(&candidate).await? {
                tracing::debug!(attempt, candidate = %candidate, "Reference collision");
                continue;
            }
            voucher.reference_number = candidate;
            if tx.insert_voucher(voucher).await? {
                return Ok(());
            }
            tracing::debug!(
                attempt,
                candidate = %voucher.reference_number,
                "Reference taken by a concurrent request"
            );
        }
        Err(VoucherError::DuplicateReference { attempts })
    }
}

const fn rejection_label(error: &VoucherError) -> &'static str {
    match error {
        VoucherError::Validation(_) => "validation",
        VoucherError::Forbidden { .. } => "forbidden",
        VoucherError::NotFound { .. } => "not_found",
        VoucherError::OutOfCapacity => "out_of_capacity",
        VoucherError::DuplicateReference { .. } => "duplicate_reference",
        VoucherError::InvalidTransition { .. }
        | VoucherError::PaymentVerification { .. }
        | VoucherError::Persistence(_) => "error",
    }
}

fn normalize_profile(profile: RequesterProfile) -> RequesterProfile {
    RequesterProfile {
        email: profile.email.trim().to_ascii_lowercase(),
        full_name: profile.full_name.trim().to_string(),
        course: profile.course.trim().to_string(),
        year_level: profile.year_level,
        phone: profile.phone.trim().to_string(),
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.chars().any(char::is_whitespace)
}

fn is_plausible_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Field-level checks that need no storage.
fn validate(profile: &RequesterProfile, scheduled_date: NaiveDate, today: NaiveDate) -> Result<()> {
    let mut errors = ValidationErrors::new();

    if profile.email.is_empty() {
        errors.add("email", "is required");
    } else if !is_plausible_email(&profile.email) {
        errors.add("email", "is not a valid email address");
    }
    if profile.full_name.is_empty() {
        errors.add("full_name", "is required");
    } else if profile.full_name.chars().count() > 100 {
        errors.add("full_name", "must be at most 100 characters");
    }
    if profile.course.is_empty() {
        errors.add("course", "is required");
    }
    if !(1..=6).contains(&profile.year_level) {
        errors.add("year_level", "must be between 1 and 6");
    }
    if !is_plausible_phone(&profile.phone) {
        errors.add("phone", "must be 7 to 15 digits");
    }
    if scheduled_date <= today {
        errors.add("scheduled_date", "must be after today");
    }

    errors.into_result()
}
