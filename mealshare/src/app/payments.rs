//! Payment completion adapter.
//!
//! Turns gateway payment signals into funded meal capacity. Two paths lead
//! to completion and both are idempotent:
//!
//! - **Reconciliation**: the donor returns from checkout and
//!   [`PaymentService::process_payment_completion`] asks the gateway for the
//!   authoritative session status.
//! - **Webhook**: the gateway pushes a signed event to
//!   [`PaymentService::process_webhook`]. The event ID is recorded in the same
//!   transaction as its effects, so a replayed delivery is a no-op.
//!
//! The status change and the minting of funded units always commit together.

use super::AppContext;
use crate::aggregates::{DonationCommand, DonationEnvironment, DonationEvent, DonationReducer};
use crate::error::{Result, ValidationErrors, VoucherError};
use crate::metrics;
use crate::payment_gateway::{
    CheckoutRequest, CheckoutSession, SessionPaymentStatus, WebhookEvent, WebhookKind,
    WebhookVerifier,
};
use crate::roles::{Actor, Capability};
use crate::store::Transaction;
use crate::types::{Donation, DonationId, FundedUnit, Money, PaymentMethod, WebhookReceipt};
use chrono::{DateTime, Duration, Utc};
use mealshare_core::reducer::{Events, Reducer};

/// How a webhook delivery was handled, and what to answer the gateway
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookAck {
    /// Effects applied
    Processed,
    /// Event ID seen before; nothing done
    Duplicate,
    /// Authentic, but nothing to do (unknown type or donation)
    Ignored,
    /// Signature or payload not trusted
    Rejected(String),
    /// Could not be applied now; the gateway should redeliver
    RetryLater(String),
}

impl WebhookAck {
    /// HTTP status to return to the gateway
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Processed | Self::Duplicate | Self::Ignored => 200,
            Self::Rejected(_) => 400,
            Self::RetryLater(_) => 500,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::Rejected(_) => "rejected",
            Self::RetryLater(_) => "retry_later",
        }
    }
}

/// Donations, checkout and payment confirmation
#[derive(Clone)]
pub struct PaymentService {
    ctx: AppContext,
    reducer: DonationReducer,
    env: DonationEnvironment,
    verifier: WebhookVerifier,
}

impl PaymentService {
    /// Creates a new payment service
    #[must_use]
    pub fn new(ctx: AppContext) -> Self {
        let payments = &ctx.config.payments;
        let verifier = WebhookVerifier::new(&payments.webhook_secret, payments.webhook_tolerance_secs);
        let env = DonationEnvironment::new(ctx.clock.clone());
        Self {
            ctx,
            reducer: DonationReducer::new(),
            env,
            verifier,
        }
    }

    /// Record a pledge awaiting payment.
    ///
    /// The donation funds `floor(amount / meal_price)` meals.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Forbidden`] if the actor may not donate
    /// - [`VoucherError::Validation`] if the email is missing or the amount
    ///   does not cover one meal
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self, actor), fields(donor_id = %actor.user_id))]
    pub async fn submit_donation(
        &self,
        actor: Actor,
        donor_email: &str,
        amount: Money,
        payment_method: PaymentMethod,
    ) -> Result<Donation> {
        actor.require(Capability::Donate)?;

        let donor_email = donor_email.trim().to_ascii_lowercase();
        let meal_price = self.ctx.config.payments.meal_price;
        let meal_count = amount.meals_at(meal_price);
        let mut errors = ValidationErrors::new();
        if donor_email.is_empty() {
            errors.add("email", "is required");
        } else if !donor_email.contains('@') {
            errors.add("email", "is not a valid email address");
        }
        if meal_count < 1 {
            errors.add("amount", format!("must be at least {meal_price} (one meal)"));
        }
        errors.into_result()?;

        let donation = Donation::pending(
            actor.user_id,
            donor_email,
            amount,
            meal_count,
            payment_method,
            self.ctx.clock.now(),
        );
        let mut tx = self.ctx.repository.begin().await?;
        tx.insert_donation(&donation).await?;
        tx.commit().await?;

        metrics::record_donation("submitted");
        tracing::info!(donation_id = %donation.id, meal_count, "Donation submitted");
        Ok(donation)
    }

    /// Open a hosted checkout session for a pending donation.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::NotFound`] for an unknown donation
    /// - [`VoucherError::InvalidTransition`] if the donation is not pending
    /// - [`VoucherError::Persistence`] if the gateway or storage fails
    #[tracing::instrument(skip(self))]
    pub async fn create_checkout_session(&self, donation_id: DonationId) -> Result<CheckoutSession> {
        let donation = self
            .ctx
            .repository
            .donation(donation_id)
            .await?
            .ok_or_else(|| VoucherError::not_found("donation", donation_id))?;
        // Fail fast before calling out; the reducer re-checks under lock.
        self.reducer.handle(
            &donation,
            DonationCommand::AttachCheckoutSession {
                session_id: String::new(),
            },
            &self.env,
        )?;

        let payments = &self.ctx.config.payments;
        let session = self
            .ctx
            .gateway
            .create_checkout_session(CheckoutRequest {
                donation_id,
                amount: donation.amount,
                currency: payments.currency.clone(),
                description: format!("{} meal(s)", donation.meal_count),
                customer_email: donation.donor_email.clone(),
                success_url: payments.success_url.clone(),
                cancel_url: payments.cancel_url.clone(),
            })
            .await
            .map_err(|e| VoucherError::Persistence(format!("payment gateway: {e}")))?;

        let mut tx = self.ctx.repository.begin().await?;
        let donation = lock_donation(tx.as_mut(), donation_id).await?;
        let command = DonationCommand::AttachCheckoutSession {
            session_id: session.session_id.clone(),
        };
        self.execute(tx.as_mut(), donation, command).await?;
        tx.commit().await?;

        tracing::info!(session_id = %session.session_id, "Checkout session opened");
        Ok(session)
    }

    /// Reconcile a donation with the gateway after the donor returns.
    ///
    /// Returns `true` once the donation is completed and its units exist,
    /// `false` while the payment is still processing. A gateway timeout is
    /// an unknown outcome and reports `false` without changing anything.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::NotFound`] for an unknown donation
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self))]
    pub async fn process_payment_completion(&self, donation_id: DonationId) -> Result<bool> {
        let donation = self
            .ctx
            .repository
            .donation(donation_id)
            .await?
            .ok_or_else(|| VoucherError::not_found("donation", donation_id))?;
        if donation.is_completed() {
            return Ok(true);
        }
        let Some(session_id) = donation.checkout_session_id else {
            tracing::debug!("No checkout session yet");
            return Ok(false);
        };

        let status = match self.ctx.gateway.retrieve_session(&session_id).await {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(%error, "Gateway unavailable; payment outcome unknown");
                return Ok(false);
            }
        };
        if status.status != SessionPaymentStatus::Paid {
            tracing::debug!(status = ?status.status, "Payment not settled yet");
            return Ok(false);
        }

        let mut tx = self.ctx.repository.begin().await?;
        let donation = lock_donation(tx.as_mut(), donation_id).await?;
        let command = DonationCommand::ConfirmPayment {
            payment_intent_id: status.payment_intent_id,
        };
        match self.execute(tx.as_mut(), donation, command).await {
            Ok(_) => {}
            Err(VoucherError::InvalidTransition { from, .. }) => {
                tracing::warn!(%from, "Gateway reports paid but donation cannot complete");
                return Ok(false);
            }
            Err(error) => return Err(error),
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Handle a signed webhook delivery.
    ///
    /// Never fails: every outcome, including storage trouble, is expressed
    /// as a [`WebhookAck`] whose status code tells the gateway whether to
    /// redeliver.
    #[tracing::instrument(skip(self, payload, signature), fields(size = payload.len()))]
    pub async fn process_webhook(&self, payload: &[u8], signature: &str) -> WebhookAck {
        let ack = self.handle_webhook(payload, signature).await;
        metrics::record_webhook(ack.label());
        match &ack {
            WebhookAck::Rejected(reason) => tracing::warn!(%reason, "Webhook rejected"),
            WebhookAck::RetryLater(reason) => tracing::error!(%reason, "Webhook deferred"),
            other => tracing::info!(outcome = other.label(), "Webhook handled"),
        }
        ack
    }

    /// The donor abandoned checkout.
    ///
    /// Pending donations become failed; any other state is left alone.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::NotFound`] for an unknown donation
    /// - [`VoucherError::Persistence`] on storage failure
    #[tracing::instrument(skip(self))]
    pub async fn mark_payment_cancelled(&self, donation_id: DonationId) -> Result<Donation> {
        let mut tx = self.ctx.repository.begin().await?;
        let donation = lock_donation(tx.as_mut(), donation_id).await?;
        let donation = self
            .execute(tx.as_mut(), donation, DonationCommand::MarkFailed)
            .await?;
        tx.commit().await?;
        Ok(donation)
    }

    async fn handle_webhook(&self, payload: &[u8], signature: &str) -> WebhookAck {
        let now = self.ctx.clock.now();
        if let Err(error) = self.verifier.verify(payload, signature, now) {
            return WebhookAck::Rejected(error.to_string());
        }
        let event = match WebhookEvent::parse(payload) {
            Ok(event) => event,
            Err(error) => return WebhookAck::Rejected(error.to_string()),
        };
        match self.apply_webhook(&event, now).await {
            Ok(ack) => ack,
            Err(error) => WebhookAck::RetryLater(error.to_string()),
        }
    }

    async fn apply_webhook(&self, event: &WebhookEvent, now: DateTime<Utc>) -> Result<WebhookAck> {
        let mut tx = self.ctx.repository.begin().await?;

        let receipt = WebhookReceipt {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            received_at: now,
        };
        if !tx.record_webhook_event(&receipt).await? {
            return Ok(WebhookAck::Duplicate);
        }

        let command = match event.kind() {
            WebhookKind::CheckoutCompleted | WebhookKind::PaymentSucceeded
                if event.reports_payment() =>
            {
                Some(DonationCommand::ConfirmPayment {
                    payment_intent_id: event.payment_intent_id(),
                })
            }
            // Funds not captured yet; a later event or reconciliation confirms.
            WebhookKind::CheckoutCompleted | WebhookKind::PaymentSucceeded => None,
            WebhookKind::PaymentFailed => Some(DonationCommand::MarkFailed),
            WebhookKind::ChargeRefunded => Some(DonationCommand::MarkRefunded),
            WebhookKind::Other => None,
        };
        let Some(command) = command else {
            tracing::debug!(event_type = %event.event_type, "Event does not change a donation");
            tx.commit().await?;
            return Ok(WebhookAck::Ignored);
        };

        let donation = match (event.donation_id(), event.session_id()) {
            (Some(id), _) => tx.lock_donation(id).await?,
            (None, Some(session_id)) => tx.lock_donation_by_session(session_id).await?,
            (None, None) => None,
        };
        let Some(donation) = donation else {
            tracing::warn!(event_id = %event.id, "Webhook for unknown donation");
            tx.commit().await?;
            return Ok(WebhookAck::Ignored);
        };

        match self.execute(tx.as_mut(), donation, command).await {
            Ok(_) => {}
            Err(VoucherError::InvalidTransition { action, from }) => {
                tracing::warn!(action, %from, "Webhook does not apply to donation state");
                tx.commit().await?;
                return Ok(WebhookAck::Ignored);
            }
            Err(error) => return Err(error),
        }
        tx.commit().await?;
        Ok(WebhookAck::Processed)
    }

    /// Run a command against a locked donation and persist its effects.
    async fn execute(
        &self,
        tx: &mut dyn Transaction,
        mut donation: Donation,
        command: DonationCommand,
    ) -> Result<Donation> {
        let events: Events<DonationEvent> = self.reducer.reduce(&mut donation, command, &self.env)?;
        for event in &events {
            match event {
                DonationEvent::PaymentCompleted {
                    meal_count,
                    completed_at,
                    ..
                } => {
                    self.mint_units(tx, &donation, *meal_count, *completed_at).await?;
                    metrics::record_donation("completed");
                }
                DonationEvent::PaymentFailed { .. } => metrics::record_donation("failed"),
                DonationEvent::Refunded { .. } => {
                    let expired = tx.expire_available_units_of(donation.id).await?;
                    metrics::record_donation("refunded");
                    tracing::info!(donation_id = %donation.id, expired, "Refund voided unused units");
                }
                DonationEvent::CheckoutSessionAttached { .. } => {}
            }
        }
        if !events.is_empty() {
            tx.save_donation(&donation).await?;
        }
        Ok(donation)
    }

    async fn mint_units(
        &self,
        tx: &mut dyn Transaction,
        donation: &Donation,
        meal_count: u32,
        minted_at: DateTime<Utc>,
    ) -> Result<()> {
        let expires_at = self
            .ctx
            .config
            .payments
            .unit_expiry_days
            .map(|days| minted_at + Duration::days(i64::from(days)));
        let units: Vec<FundedUnit> = (0..meal_count)
            .map(|_| FundedUnit::mint(donation.id, expires_at, minted_at))
            .collect();
        tx.insert_units(&units).await?;
        metrics::record_units_minted(meal_count);
        tracing::info!(donation_id = %donation.id, meal_count, "Funded units minted");
        Ok(())
    }
}

async fn lock_donation(tx: &mut dyn Transaction, id: DonationId) -> Result<Donation> {
    tx.lock_donation(id)
        .await?
        .ok_or_else(|| VoucherError::not_found("donation", id))
}
