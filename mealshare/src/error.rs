//! Error types for voucher, capacity and payment operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for mealshare operations.
pub type Result<T> = std::result::Result<T, VoucherError>;

/// A problem with one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name as submitted
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

/// Field-level validation failures, reported together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// No errors yet
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// A single field error
    #[must_use]
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record a problem with `field`
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Recorded field errors in submission order
    #[must_use]
    pub fn fields(&self) -> &[FieldError] {
        &self.errors
    }

    /// Whether `field` has at least one error
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when empty, otherwise a [`VoucherError::Validation`]
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::Validation`] carrying every recorded field error.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(VoucherError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
            first = false;
        }
        Ok(())
    }
}

/// Error taxonomy for the voucher core.
///
/// Every variant that can surface from a transactional operation implies the
/// transaction was rolled back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoucherError {
    // ═══════════════════════════════════════════════════════════
    // Caller errors
    // ═══════════════════════════════════════════════════════════

    /// Malformed input, with field-level detail.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Actor lacks the capability for this operation.
    #[error("Forbidden: {action}")]
    Forbidden {
        /// What was attempted
        action: String,
    },

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Business rule errors
    // ═══════════════════════════════════════════════════════════

    /// No meal capacity left in any eligible source.
    #[error("No meal capacity available")]
    OutOfCapacity,

    /// State machine violation (stale UI or lost race).
    #[error("Invalid transition: cannot {action} when {from}")]
    InvalidTransition {
        /// Attempted action
        action: &'static str,
        /// Current status
        from: String,
    },

    /// Could not generate an unused reference number.
    #[error("Could not generate a unique reference after {attempts} attempts")]
    DuplicateReference {
        /// Attempts made
        attempts: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure errors
    // ═══════════════════════════════════════════════════════════

    /// Untrusted or forged payment signal.
    #[error("Payment verification failed: {reason}")]
    PaymentVerification {
        /// Why it was rejected
        reason: String,
    },

    /// Storage or transaction failure.
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl VoucherError {
    /// Shorthand for [`VoucherError::NotFound`]
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`VoucherError::Forbidden`]
    #[must_use]
    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
        }
    }

    /// Message safe to show to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(errors) => format!("Please correct the following: {errors}"),
            Self::Forbidden { .. } => "You are not allowed to do that.".to_string(),
            Self::NotFound { entity, .. } => format!("That {entity} could not be found."),
            Self::OutOfCapacity => {
                "Sorry, no meals are available right now. Please try again later.".to_string()
            }
            Self::InvalidTransition { .. } => "This voucher has already been processed.".to_string(),
            Self::PaymentVerification { .. } => {
                "Your payment is still processing. We will update your donation once it clears."
                    .to_string()
            }
            Self::DuplicateReference { .. } | Self::Persistence(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OutOfCapacity | Self::Persistence(_) | Self::DuplicateReference { .. }
        )
    }
}

impl From<sqlx::Error> for VoucherError {
    fn from(error: sqlx::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for VoucherError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::Persistence(format!("Migration failed: {error}"))
    }
}
