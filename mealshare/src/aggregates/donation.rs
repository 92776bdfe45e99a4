//! Donation aggregate.
//!
//! The only writer of a donation's payment status. Completion is idempotent:
//! confirming a donation that is already completed yields no events, so the
//! caller mints funded units only when it sees [`DonationEvent::PaymentCompleted`].

use crate::error::VoucherError;
use crate::types::{Donation, PaymentStatus};
use chrono::{DateTime, Utc};
use mealshare_core::environment::Clock;
use mealshare_core::reducer::{Events, Reducer};
use mealshare_core::smallvec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Requests against a donation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DonationCommand {
    /// Remember the gateway checkout session opened for this donation
    AttachCheckoutSession {
        /// Gateway session ID
        session_id: String,
    },
    /// The gateway confirmed the payment cleared
    ConfirmPayment {
        /// Gateway payment intent, when known
        payment_intent_id: Option<String>,
    },
    /// The payment failed or the donor abandoned checkout
    MarkFailed,
    /// The gateway refunded the payment
    MarkRefunded,
}

/// Facts recorded against a donation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationEvent {
    /// Checkout session opened
    CheckoutSessionAttached {
        /// Gateway session ID
        session_id: String,
    },
    /// Payment cleared; `meal_count` units are to be minted
    PaymentCompleted {
        /// Gateway payment intent
        payment_intent_id: Option<String>,
        /// Units to mint
        meal_count: u32,
        /// When
        completed_at: DateTime<Utc>,
    },
    /// Payment failed
    PaymentFailed {
        /// When
        failed_at: DateTime<Utc>,
    },
    /// Payment refunded
    Refunded {
        /// When
        refunded_at: DateTime<Utc>,
    },
}

/// Dependencies of [`DonationReducer`]
#[derive(Clone)]
pub struct DonationEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl DonationEnvironment {
    /// Creates a new environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Reducer for donation payment status
#[derive(Clone, Copy, Debug, Default)]
pub struct DonationReducer;

impl DonationReducer {
    /// Creates a new `DonationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn refuse(action: &'static str, donation: &Donation) -> VoucherError {
    VoucherError::InvalidTransition {
        action,
        from: donation.payment_status.as_str().to_string(),
    }
}

impl Reducer for DonationReducer {
    type State = Donation;
    type Command = DonationCommand;
    type Event = DonationEvent;
    type Error = VoucherError;
    type Environment = DonationEnvironment;

    fn handle(
        &self,
        donation: &Donation,
        command: DonationCommand,
        env: &DonationEnvironment,
    ) -> Result<Events<DonationEvent>, VoucherError> {
        let now = env.clock.now();
        match (command, donation.payment_status) {
            (DonationCommand::AttachCheckoutSession { session_id }, PaymentStatus::Pending) => {
                if donation.checkout_session_id.as_deref() == Some(session_id.as_str()) {
                    return Ok(Events::new());
                }
                Ok(smallvec![DonationEvent::CheckoutSessionAttached { session_id }])
            }
            (DonationCommand::AttachCheckoutSession { .. }, _) => {
                Err(refuse("start checkout", donation))
            }

            (DonationCommand::ConfirmPayment { .. }, PaymentStatus::Completed) => Ok(Events::new()),
            (DonationCommand::ConfirmPayment { payment_intent_id }, PaymentStatus::Pending) => {
                Ok(smallvec![DonationEvent::PaymentCompleted {
                    payment_intent_id,
                    meal_count: donation.meal_count,
                    completed_at: now,
                }])
            }
            (DonationCommand::ConfirmPayment { .. }, _) => Err(refuse("complete", donation)),

            (DonationCommand::MarkFailed, PaymentStatus::Pending) => {
                Ok(smallvec![DonationEvent::PaymentFailed { failed_at: now }])
            }
            (DonationCommand::MarkFailed, _) => Ok(Events::new()),

            (DonationCommand::MarkRefunded, PaymentStatus::Completed) => {
                Ok(smallvec![DonationEvent::Refunded { refunded_at: now }])
            }
            (DonationCommand::MarkRefunded, PaymentStatus::Refunded) => Ok(Events::new()),
            (DonationCommand::MarkRefunded, _) => Err(refuse("refund", donation)),
        }
    }

    fn apply(&self, donation: &mut Donation, event: &DonationEvent) {
        match event {
            DonationEvent::CheckoutSessionAttached { session_id } => {
                donation.checkout_session_id = Some(session_id.clone());
            }
            DonationEvent::PaymentCompleted {
                payment_intent_id,
                completed_at,
                ..
            } => {
                donation.payment_status = PaymentStatus::Completed;
                donation.completed_at = Some(*completed_at);
                if payment_intent_id.is_some() {
                    donation.payment_intent_id.clone_from(payment_intent_id);
                }
            }
            DonationEvent::PaymentFailed { .. } => {
                donation.payment_status = PaymentStatus::Failed;
            }
            DonationEvent::Refunded { .. } => {
                donation.payment_status = PaymentStatus::Refunded;
            }
        }
    }
}
