//! Roles, capabilities and the authenticated actor.
//!
//! Authentication happens upstream; the core only receives an [`Actor`] and
//! checks its role against an explicit capability table.

use crate::error::{Result, VoucherError};
use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of an authenticated user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Requests vouchers
    Student,
    /// Funds meals
    Donor,
    /// Redeems vouchers at distribution
    Staff,
    /// Manages stock, slots and users
    Admin,
}

/// Something an actor may be allowed to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Request a voucher for oneself
    RequestVoucher,
    /// Submit a donation
    Donate,
    /// Mark a voucher as claimed
    ClaimVoucher,
    /// Cancel any voucher
    CancelAnyVoucher,
    /// Cancel a voucher one requested
    CancelOwnVoucher,
    /// Expire vouchers by hand
    ExpireVoucher,
    /// Manage meals and time slots
    ManageStock,
}

impl Role {
    /// Capability table.
    #[must_use]
    pub const fn can(&self, capability: Capability) -> bool {
        use Capability::{
            CancelAnyVoucher, CancelOwnVoucher, ClaimVoucher, Donate, ExpireVoucher,
            ManageStock, RequestVoucher,
        };
        match self {
            Self::Student => matches!(capability, RequestVoucher | CancelOwnVoucher | Donate),
            Self::Donor => matches!(capability, Donate),
            Self::Staff => matches!(capability, ClaimVoucher | CancelAnyVoucher | Donate),
            Self::Admin => matches!(
                capability,
                ClaimVoucher | CancelAnyVoucher | ExpireVoucher | ManageStock | Donate
            ),
        }
    }

    /// Persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Donor => "donor",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User ID
    pub user_id: UserId,
    /// Role
    pub role: Role,
}

impl Actor {
    /// Creates an actor
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// New random student
    #[must_use]
    pub fn student() -> Self {
        Self::new(UserId::new(), Role::Student)
    }

    /// New random donor
    #[must_use]
    pub fn donor() -> Self {
        Self::new(UserId::new(), Role::Donor)
    }

    /// New random staff member
    #[must_use]
    pub fn staff() -> Self {
        Self::new(UserId::new(), Role::Staff)
    }

    /// New random admin
    #[must_use]
    pub fn admin() -> Self {
        Self::new(UserId::new(), Role::Admin)
    }

    /// Fail with [`VoucherError::Forbidden`] unless the role grants `capability`.
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::Forbidden`] when the capability is missing.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.role.can(capability) {
            Ok(())
        } else {
            Err(VoucherError::forbidden(format!("{} cannot {capability:?}", self.role)))
        }
    }
}
