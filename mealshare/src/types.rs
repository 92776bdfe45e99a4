//! Domain types for the meal voucher system.
//!
//! This module contains the identifiers, value objects and entity rows shared by
//! the reducers, the capacity layer and the stores.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a donation
    DonationId
);
uuid_id!(
    /// Unique identifier for a funded capacity unit
    UnitId
);
uuid_id!(
    /// Unique identifier for a managed meal
    MealId
);
uuid_id!(
    /// Unique identifier for a voucher
    VoucherId
);
uuid_id!(
    /// Unique identifier for a distribution time slot
    TimeSlotId
);
uuid_id!(
    /// Unique identifier for a requester profile
    StudentId
);
uuid_id!(
    /// Unique identifier for an uploaded proof-of-enrollment document
    DocumentId
);
uuid_id!(
    /// Unique identifier for an authenticated user (donor, student, staff, admin)
    UserId
);

// ============================================================================
// Money
// ============================================================================

/// Monetary amount as a fixed-point decimal.
///
/// Amounts are kept at two decimal places; currency is a deployment setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Money(Decimal);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Creates a `Money` value from a decimal amount
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Creates a `Money` value from whole currency units
    #[must_use]
    pub fn from_major(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Creates a `Money` value from minor units (cents)
    #[must_use]
    pub fn from_minor(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// Amount in minor units (cents), rounded to the nearest cent.
    ///
    /// `None` if it does not fit in an `i64`.
    #[must_use]
    pub fn to_minor(&self) -> Option<i64> {
        (self.0 * Decimal::ONE_HUNDRED).round().to_i64()
    }

    /// Returns the decimal amount
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Checks if the amount is strictly positive
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Number of whole meals this amount pays for at `price` per meal.
    ///
    /// Rounds down. Returns 0 for a non-positive price or amount.
    #[must_use]
    pub fn meals_at(&self, price: Self) -> u32 {
        if !price.is_positive() || !self.is_positive() {
            return 0;
        }
        (self.0 / price.0).floor().to_u32().unwrap_or(u32::MAX)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ============================================================================
// Enumerations
// ============================================================================

/// How the donor chose to pay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Credit or debit card
    Card,
    /// E-wallet checkout
    EWallet,
    /// Online bank transfer
    BankTransfer,
}

impl PaymentMethod {
    /// Persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::EWallet => "e_wallet",
            Self::BankTransfer => "bank_transfer",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "card" => Some(Self::Card),
            "e_wallet" => Some(Self::EWallet),
            "bank_transfer" => Some(Self::BankTransfer),
            _ => None,
        }
    }
}

/// Payment status of a donation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Submitted, waiting on the gateway
    Pending,
    /// Payment cleared; units have been minted
    Completed,
    /// Payment failed or was abandoned
    Failed,
    /// Payment was refunded after completion
    Refunded,
}

impl PaymentStatus {
    /// Persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// Status of a funded capacity unit.
///
/// Advances monotonically: available → reserved → claimed, or to expired from
/// available/reserved. Never leaves claimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Can back a new voucher
    Available,
    /// Backing an active voucher
    Reserved,
    /// Its voucher was redeemed
    Claimed,
    /// Lapsed unused
    Expired,
}

impl UnitStatus {
    /// Persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Claimed => "claimed",
            Self::Expired => "expired",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(Self::Available),
            "reserved" => Some(Self::Reserved),
            "claimed" => Some(Self::Claimed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether moving to `next` keeps the lifecycle monotonic.
    #[must_use]
    pub const fn can_become(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Available, Self::Reserved | Self::Claimed | Self::Expired)
                | (Self::Reserved, Self::Claimed | Self::Expired | Self::Available)
        )
    }
}

/// Lifecycle status of a voucher
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    /// Issued, waiting to be redeemed
    Active,
    /// Redeemed by staff
    Claimed,
    /// Scheduled date passed unclaimed
    Expired,
    /// Voided by staff, admin or the requester
    Cancelled,
}

impl VoucherStatus {
    /// Persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Claimed => "claimed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "claimed" => Some(Self::Claimed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// No transition leaves a terminal status
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A donation and its payment state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    /// Donation ID
    pub id: DonationId,
    /// Donating user
    pub donor_id: UserId,
    /// Donor email (receipts)
    pub donor_email: String,
    /// Amount pledged
    pub amount: Money,
    /// Meals this donation funds once completed
    pub meal_count: u32,
    /// Chosen payment method
    pub payment_method: PaymentMethod,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Gateway checkout session
    pub checkout_session_id: Option<String>,
    /// Gateway payment intent
    pub payment_intent_id: Option<String>,
    /// When submitted
    pub created_at: DateTime<Utc>,
    /// When the payment was confirmed
    pub completed_at: Option<DateTime<Utc>>,
}

impl Donation {
    /// A freshly submitted donation awaiting payment
    #[must_use]
    pub fn pending(
        donor_id: UserId,
        donor_email: String,
        amount: Money,
        meal_count: u32,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DonationId::new(),
            donor_id,
            donor_email,
            amount,
            meal_count,
            payment_method,
            payment_status: PaymentStatus::Pending,
            checkout_session_id: None,
            payment_intent_id: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Whether the payment has cleared
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }
}

/// One meal's worth of capacity funded by a completed donation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundedUnit {
    /// Unit ID
    pub id: UnitId,
    /// Owning donation
    pub donation_id: DonationId,
    /// Unit status
    pub status: UnitStatus,
    /// Unused units lapse after this instant
    pub expires_at: Option<DateTime<Utc>>,
    /// When minted
    pub created_at: DateTime<Utc>,
}

impl FundedUnit {
    /// Mint an available unit for `donation_id`
    #[must_use]
    pub fn mint(
        donation_id: DonationId,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UnitId::new(),
            donation_id,
            status: UnitStatus::Available,
            expires_at,
            created_at: now,
        }
    }

    /// Available and not past its expiry
    #[must_use]
    pub fn is_reservable(&self, now: DateTime<Utc>) -> bool {
        self.status == UnitStatus::Available && self.expires_at.is_none_or(|at| at > now)
    }
}

/// Admin-managed meal stock with a directly settable counter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meal {
    /// Meal ID
    pub id: MealId,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Portions left
    pub quantity_available: u32,
    /// Offered to requesters
    pub is_active: bool,
    /// Admin who manages the meal
    pub owner_id: UserId,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl Meal {
    /// Active with at least one portion left
    #[must_use]
    pub const fn has_stock(&self) -> bool {
        self.is_active && self.quantity_available > 0
    }
}

/// Distribution window during which vouchers are redeemed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Slot ID
    pub id: TimeSlotId,
    /// Display name ("Lunch", "Dinner")
    pub name: String,
    /// Window start
    pub start_time: NaiveTime,
    /// Window end
    pub end_time: NaiveTime,
    /// Bookable
    pub is_active: bool,
}

/// Identity fields a requester submits with each voucher request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterProfile {
    /// Upsert key
    pub email: String,
    /// Full name
    pub full_name: String,
    /// Degree program
    pub course: String,
    /// Year level (1-6)
    pub year_level: u8,
    /// Contact number
    pub phone: String,
}

/// Requester fields frozen onto a voucher at issuance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterSnapshot {
    /// Full name
    pub full_name: String,
    /// Degree program
    pub course: String,
    /// Year level
    pub year_level: u8,
    /// Contact number
    pub phone: String,
}

impl From<&RequesterProfile> for RequesterSnapshot {
    fn from(profile: &RequesterProfile) -> Self {
        Self {
            full_name: profile.full_name.clone(),
            course: profile.course.clone(),
            year_level: profile.year_level,
            phone: profile.phone.clone(),
        }
    }
}

/// Stored requester profile
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Student ID
    pub id: StudentId,
    /// Email (unique)
    pub email: String,
    /// Full name
    pub full_name: String,
    /// Degree program
    pub course: String,
    /// Year level
    pub year_level: u8,
    /// Contact number
    pub phone: String,
    /// Last upsert
    pub updated_at: DateTime<Utc>,
}

/// Metadata returned by file storage for an uploaded document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Where the file can be fetched
    pub url: String,
    /// Original file name
    pub file_name: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Proof-of-enrollment document on file for a student
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentDocument {
    /// Document ID
    pub id: DocumentId,
    /// Owner
    pub student_id: StudentId,
    /// Where the file can be fetched
    pub url: String,
    /// Original file name
    pub file_name: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Voucher the document was submitted with
    pub voucher_id: Option<VoucherId>,
    /// When uploaded
    pub uploaded_at: DateTime<Utc>,
}

/// A redeemable claim on one meal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Voucher ID
    pub id: VoucherId,
    /// Human-enterable reference (`BB-240115-AB12`)
    pub reference_number: String,
    /// Requester profile
    pub student_id: StudentId,
    /// Authenticated user who requested it
    pub requested_by: UserId,
    /// Funded unit backing the voucher, if drawn from the unit pool
    pub unit_id: Option<UnitId>,
    /// Meal backing the voucher, if drawn from managed stock
    pub meal_id: Option<MealId>,
    /// Distribution slot
    pub time_slot_id: TimeSlotId,
    /// Distribution day
    pub scheduled_date: NaiveDate,
    /// Lifecycle status
    pub status: VoucherStatus,
    /// When redeemed
    pub claimed_at: Option<DateTime<Utc>>,
    /// Staff who redeemed it
    pub claimed_by: Option<UserId>,
    /// When voided
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Who voided it
    pub cancelled_by: Option<UserId>,
    /// Requester identity at issuance
    pub requester: RequesterSnapshot,
    /// When issued
    pub created_at: DateTime<Utc>,
}

/// Record of a processed gateway webhook event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReceipt {
    /// Gateway event ID (unique)
    pub event_id: String,
    /// Gateway event type
    pub event_type: String,
    /// When first processed
    pub received_at: DateTime<Utc>,
}

/// Public dashboard counters, recomputed on every read
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sum of completed donation amounts
    pub total_donations: Money,
    /// Sum of completed donation meal counts
    pub total_meals_donated: u64,
    /// Distinct donors with a completed donation
    pub total_donors: u64,
    /// Available funded units plus stock of active meals
    pub meals_available: u64,
}
