//! Payment gateway integration.
//!
//! Three pieces live here:
//!
//! - [`PaymentGateway`]: outbound calls (open a checkout session, ask the
//!   gateway what happened to one). [`HttpPaymentGateway`] talks to a
//!   Stripe-compatible REST API; [`MockPaymentGateway`] stands in for tests.
//! - [`WebhookVerifier`]: HMAC-SHA256 signature check for inbound webhooks.
//! - [`WebhookEvent`]: the subset of the gateway's event JSON the core reads.
//!
//! The signature header has the form `t=<unix seconds>,v1=<base64 mac>`; the
//! MAC covers `"{t}.{raw payload}"`. Several `v1` entries may be present while
//! a secret is being rotated; any match is accepted.

use crate::config::PaymentsConfig;
use crate::error::VoucherError;
use crate::types::{DonationId, Money};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Boxed future returned by [`PaymentGateway`] methods
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send + 'a>>;

/// Payment gateway error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    /// Gateway did not answer in time; the outcome is unknown
    Timeout,
    /// Gateway rejected the request
    InvalidRequest {
        /// Rejection reason
        reason: String,
    },
    /// Gateway has no such session
    SessionNotFound {
        /// Session that was looked up
        session_id: String,
    },
    /// Other error
    Other {
        /// Error message
        message: String,
    },
}

impl std::fmt::Display for PaymentGatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Gateway timeout"),
            Self::InvalidRequest { reason } => write!(f, "Invalid request: {reason}"),
            Self::SessionNotFound { session_id } => write!(f, "Unknown session: {session_id}"),
            Self::Other { message } => write!(f, "Payment error: {message}"),
        }
    }
}

impl std::error::Error for PaymentGatewayError {}

/// What to charge for in a checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Donation being paid; echoed back as the client reference
    pub donation_id: DonationId,
    /// Amount to charge
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Line item description
    pub description: String,
    /// Donor email for the receipt
    pub customer_email: String,
    /// Redirect after payment
    pub success_url: String,
    /// Redirect after abandoning checkout
    pub cancel_url: String,
}

/// A hosted checkout page opened at the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// Gateway session ID
    pub session_id: String,
    /// Where to send the donor
    pub url: String,
}

/// Payment state of a session according to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPaymentStatus {
    /// Funds captured
    Paid,
    /// Not paid (yet)
    Unpaid,
    /// Session closed without payment
    Expired,
}

/// Gateway's authoritative view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Gateway session ID
    pub session_id: String,
    /// Payment state
    pub status: SessionPaymentStatus,
    /// Payment intent behind the session, once one exists
    pub payment_intent_id: Option<String>,
}

/// Payment gateway trait
///
/// Abstraction over hosted-checkout processors such as Stripe or `PayMongo`.
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout session
    ///
    /// # Errors
    ///
    /// Returns error if the gateway rejects the request or times out
    fn create_checkout_session(&self, request: CheckoutRequest) -> GatewayFuture<'_, CheckoutSession>;

    /// Ask the gateway what happened to a session
    ///
    /// # Errors
    ///
    /// Returns error if the session is unknown or the gateway times out
    fn retrieve_session(&self, session_id: &str) -> GatewayFuture<'_, SessionStatus>;
}

#[derive(Debug, Clone)]
struct MockSession {
    status: SessionPaymentStatus,
    payment_intent_id: Option<String>,
}

/// In-process payment gateway for development and tests
///
/// Sessions start unpaid. Tests settle them with [`MockPaymentGateway::mark_paid`]
/// and can simulate an unreachable gateway with [`MockPaymentGateway::set_timeout`].
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    sessions: Arc<Mutex<HashMap<String, MockSession>>>,
    timeout: Arc<Mutex<bool>>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle a session as paid
    pub fn mark_paid(&self, session_id: &str) {
        self.set_status(session_id, SessionPaymentStatus::Paid);
    }

    /// Close a session without payment
    pub fn mark_expired(&self, session_id: &str) {
        self.set_status(session_id, SessionPaymentStatus::Expired);
    }

    /// Make every call fail with [`PaymentGatewayError::Timeout`]
    pub fn set_timeout(&self, timeout: bool) {
        if let Ok(mut flag) = self.timeout.lock() {
            *flag = timeout;
        }
    }

    fn set_status(&self, session_id: &str, status: SessionPaymentStatus) {
        if let Ok(mut sessions) = self.sessions.lock() {
            let session = sessions.entry(session_id.to_string()).or_insert(MockSession {
                status,
                payment_intent_id: None,
            });
            session.status = status;
            if status == SessionPaymentStatus::Paid && session.payment_intent_id.is_none() {
                session.payment_intent_id = Some(format!("pi_mock_{}", Uuid::new_v4().simple()));
            }
        }
    }

    fn timed_out(&self) -> bool {
        self.timeout.lock().map(|flag| *flag).unwrap_or(false)
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_checkout_session(&self, request: CheckoutRequest) -> GatewayFuture<'_, CheckoutSession> {
        Box::pin(async move {
            if self.timed_out() {
                return Err(PaymentGatewayError::Timeout);
            }
            if !request.amount.is_positive() {
                return Err(PaymentGatewayError::InvalidRequest {
                    reason: "amount must be positive".to_string(),
                });
            }

            let session_id = format!("cs_mock_{}", Uuid::new_v4().simple());
            if let Ok(mut sessions) = self.sessions.lock() {
                sessions.insert(
                    session_id.clone(),
                    MockSession {
                        status: SessionPaymentStatus::Unpaid,
                        payment_intent_id: None,
                    },
                );
            }

            tracing::info!(
                donation_id = %request.donation_id,
                amount = %request.amount,
                session_id = %session_id,
                "Mock checkout session created"
            );

            Ok(CheckoutSession {
                url: format!("https://checkout.mock/pay/{session_id}"),
                session_id,
            })
        })
    }

    fn retrieve_session(&self, session_id: &str) -> GatewayFuture<'_, SessionStatus> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            if self.timed_out() {
                return Err(PaymentGatewayError::Timeout);
            }
            let session = self
                .sessions
                .lock()
                .ok()
                .and_then(|sessions| sessions.get(&session_id).cloned())
                .ok_or_else(|| PaymentGatewayError::SessionNotFound {
                    session_id: session_id.clone(),
                })?;
            Ok(SessionStatus {
                session_id,
                status: session.status,
                payment_intent_id: session.payment_intent_id,
            })
        })
    }
}

// ============================================================================
// Hosted checkout over HTTP
// ============================================================================

/// Stripe-compatible hosted checkout client.
///
/// Opens sessions with `POST {api_url}/checkout/sessions` and reads them back
/// with `GET {api_url}/checkout/sessions/{id}`. Every call is bounded by the
/// configured timeout, which surfaces as [`PaymentGatewayError::Timeout`].
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl HttpPaymentGateway {
    /// Create a client for `api_url` authenticating with `api_key`
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError::Other`] if the HTTP client cannot be built
    pub fn new(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentGatewayError::Other {
                message: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create the client from payment settings
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError::InvalidRequest`] when no API key is configured
    pub fn from_config(config: &PaymentsConfig) -> GatewayResult<Self> {
        let api_key = config
            .gateway_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PaymentGatewayError::InvalidRequest {
                reason: "PAYMENT_GATEWAY_API_KEY is not set".to_string(),
            })?;
        Self::new(
            api_key,
            config.gateway_api_url.clone(),
            Duration::from_secs(config.gateway_timeout_secs.max(1)),
        )
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        session_id: Option<&str>,
    ) -> GatewayResult<ApiSession> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => {
                response.json::<ApiSession>().await.map_err(|e| PaymentGatewayError::Other {
                    message: format!("unreadable gateway response: {e}"),
                })
            }
            StatusCode::NOT_FOUND if session_id.is_some() => {
                Err(PaymentGatewayError::SessionNotFound {
                    session_id: session_id.unwrap_or_default().to_string(),
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::PAYMENT_REQUIRED => {
                let body = response.text().await.unwrap_or_default();
                Err(PaymentGatewayError::InvalidRequest { reason: body })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(PaymentGatewayError::Other {
                    message: format!("gateway returned {}: {body}", status.as_u16()),
                })
            }
        }
    }
}

impl PaymentGateway for HttpPaymentGateway {
    fn create_checkout_session(&self, request: CheckoutRequest) -> GatewayFuture<'_, CheckoutSession> {
        Box::pin(async move {
            let form = checkout_form(&request)?;
            let session = self
                .send(
                    self.client
                        .post(format!("{}/checkout/sessions", self.api_url))
                        .form(&form),
                    None,
                )
                .await?;
            let url = session.url.ok_or_else(|| PaymentGatewayError::Other {
                message: format!("session {} has no checkout URL", session.id),
            })?;

            tracing::info!(
                donation_id = %request.donation_id,
                amount = %request.amount,
                session_id = %session.id,
                "Checkout session created"
            );
            Ok(CheckoutSession {
                session_id: session.id,
                url,
            })
        })
    }

    fn retrieve_session(&self, session_id: &str) -> GatewayFuture<'_, SessionStatus> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let session = self
                .send(
                    self.client
                        .get(format!("{}/checkout/sessions/{session_id}", self.api_url)),
                    Some(&session_id),
                )
                .await?;
            Ok(SessionStatus {
                status: session.payment_state(),
                payment_intent_id: session.payment_intent,
                session_id: session.id,
            })
        })
    }
}

/// Checkout session as the gateway's REST API returns it
#[derive(Debug, Deserialize)]
struct ApiSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
}

impl ApiSession {
    fn payment_state(&self) -> SessionPaymentStatus {
        match (self.payment_status.as_deref(), self.status.as_deref()) {
            (Some("paid"), _) => SessionPaymentStatus::Paid,
            (_, Some("expired")) => SessionPaymentStatus::Expired,
            _ => SessionPaymentStatus::Unpaid,
        }
    }
}

fn transport_error(error: reqwest::Error) -> PaymentGatewayError {
    if error.is_timeout() {
        PaymentGatewayError::Timeout
    } else {
        PaymentGatewayError::Other {
            message: error.to_string(),
        }
    }
}

/// Form fields for a one-line-item payment session.
///
/// The donation ID travels as the client reference and as metadata on both
/// the session and its payment intent, so every webhook can be matched.
fn checkout_form(request: &CheckoutRequest) -> GatewayResult<Vec<(&'static str, String)>> {
    let unit_amount = request
        .amount
        .to_minor()
        .filter(|minor| *minor > 0)
        .ok_or_else(|| PaymentGatewayError::InvalidRequest {
            reason: format!("amount {} cannot be charged", request.amount),
        })?;
    let donation_id = request.donation_id.to_string();
    Ok(vec![
        ("mode", "payment".to_string()),
        ("client_reference_id", donation_id.clone()),
        ("customer_email", request.customer_email.clone()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        ("line_items[0][price_data][currency]", request.currency.to_ascii_lowercase()),
        ("line_items[0][price_data][unit_amount]", unit_amount.to_string()),
        ("line_items[0][price_data][product_data][name]", request.description.clone()),
        ("metadata[donation_id]", donation_id.clone()),
        ("payment_intent_data[metadata][donation_id]", donation_id),
    ])
}

// ============================================================================
// Webhook verification
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Checks webhook signatures against a shared secret
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    /// Creates a verifier for `secret`, accepting timestamps within `tolerance_secs` of now
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance_secs,
        }
    }

    fn mac(&self, payload: &[u8], timestamp: i64) -> Result<Vec<u8>, VoucherError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| {
            VoucherError::PaymentVerification {
                reason: format!("unusable webhook secret: {e}"),
            }
        })?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Build the signature header the gateway would send for `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::PaymentVerification`] if the secret is unusable.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, VoucherError> {
        let mac = self.mac(payload, timestamp)?;
        Ok(format!("t={timestamp},v1={}", STANDARD.encode(mac)))
    }

    /// Verify `header` against `payload` at time `now`.
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::PaymentVerification`] when the header is
    /// malformed, the timestamp is outside the tolerance window, or no
    /// signature matches.
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<(), VoucherError> {
        let reject = |reason: &str| VoucherError::PaymentVerification {
            reason: reason.to_string(),
        };

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| reject("missing timestamp"))?;
        if signatures.is_empty() {
            return Err(reject("missing signature"));
        }
        if (now.timestamp() - timestamp).abs() > self.tolerance_secs {
            return Err(reject("timestamp outside tolerance"));
        }

        let expected = self.mac(payload, timestamp)?;
        let matched = signatures
            .iter()
            .filter_map(|s| STANDARD.decode(s).ok())
            .any(|candidate| constant_time_eq::constant_time_eq(&candidate, &expected));
        if matched {
            Ok(())
        } else {
            Err(reject("signature mismatch"))
        }
    }
}

// ============================================================================
// Webhook events
// ============================================================================

/// Event kinds the core acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    /// `checkout.session.completed`
    CheckoutCompleted,
    /// `payment_intent.succeeded`
    PaymentSucceeded,
    /// `payment_intent.payment_failed`
    PaymentFailed,
    /// `charge.refunded`
    ChargeRefunded,
    /// Anything else
    Other,
}

/// Gateway webhook event
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID, unique per delivery attempt group
    pub id: String,
    /// Event type
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload
    pub data: WebhookData,
}

/// Payload wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    /// Object the event is about
    pub object: WebhookObject,
}

/// The session, payment intent or charge the event is about
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObject {
    /// Object ID (`cs_...`, `pi_...`, `ch_...`)
    #[serde(default)]
    pub id: Option<String>,
    /// Related payment intent
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Session payment state (`paid`, `unpaid`, `no_payment_required`)
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Our donation ID, set on checkout sessions
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Free-form metadata; carries `donation_id`
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl WebhookEvent {
    /// Parse a raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns [`VoucherError::PaymentVerification`] if the body is not a webhook event.
    pub fn parse(payload: &[u8]) -> Result<Self, VoucherError> {
        serde_json::from_slice(payload).map_err(|e| VoucherError::PaymentVerification {
            reason: format!("malformed webhook payload: {e}"),
        })
    }

    /// Classify the event type
    #[must_use]
    pub fn kind(&self) -> WebhookKind {
        match self.event_type.as_str() {
            "checkout.session.completed" => WebhookKind::CheckoutCompleted,
            "payment_intent.succeeded" => WebhookKind::PaymentSucceeded,
            "payment_intent.payment_failed" => WebhookKind::PaymentFailed,
            "charge.refunded" => WebhookKind::ChargeRefunded,
            _ => WebhookKind::Other,
        }
    }

    /// Donation the event refers to, from client reference or metadata
    #[must_use]
    pub fn donation_id(&self) -> Option<DonationId> {
        let object = &self.data.object;
        object
            .client_reference_id
            .as_deref()
            .or_else(|| object.metadata.get("donation_id").map(String::as_str))
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .map(DonationId::from_uuid)
    }

    /// Whether the event reports captured funds.
    ///
    /// Delayed payment methods complete a checkout session while it is still
    /// `unpaid`; only a `paid` session counts. Payment intents report success
    /// through their event type.
    #[must_use]
    pub fn reports_payment(&self) -> bool {
        match self.kind() {
            WebhookKind::CheckoutCompleted => {
                self.data.object.payment_status.as_deref() == Some("paid")
            }
            WebhookKind::PaymentSucceeded => true,
            _ => false,
        }
    }

    /// Checkout session the event refers to
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self.kind() {
            WebhookKind::CheckoutCompleted => self.data.object.id.as_deref(),
            _ => self.data.object.metadata.get("checkout_session_id").map(String::as_str),
        }
    }

    /// Payment intent the event refers to
    #[must_use]
    pub fn payment_intent_id(&self) -> Option<String> {
        match self.kind() {
            WebhookKind::PaymentSucceeded | WebhookKind::PaymentFailed => self.data.object.id.clone(),
            _ => self.data.object.payment_intent.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
    }

    #[test]
    fn signed_payload_verifies() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let payload = br#"{"id":"evt_1"}"#;
        let header = verifier.sign(payload, now().timestamp()).unwrap();
        assert!(verifier.verify(payload, &header, now()).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let header = verifier.sign(br#"{"amount":1}"#, now().timestamp()).unwrap();
        let result = verifier.verify(br#"{"amount":1000}"#, &header, now());
        assert!(matches!(result, Err(VoucherError::PaymentVerification { .. })));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signer = WebhookVerifier::new("whsec_attacker", 300);
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let header = signer.sign(b"{}", now().timestamp()).unwrap();
        assert!(verifier.verify(b"{}", &header, now()).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let header = verifier.sign(b"{}", now().timestamp() - 301).unwrap();
        assert!(verifier.verify(b"{}", &header, now()).is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        assert!(verifier.verify(b"{}", "", now()).is_err());
        assert!(verifier.verify(b"{}", "v1=abc", now()).is_err());
        assert!(verifier.verify(b"{}", &format!("t={}", now().timestamp()), now()).is_err());
        assert!(verifier
            .verify(b"{}", &format!("t={},v1=not-base64!", now().timestamp()), now())
            .is_err());
    }

    #[test]
    fn any_rotated_signature_may_match() {
        let old = WebhookVerifier::new("whsec_old", 300);
        let new = WebhookVerifier::new("whsec_new", 300);
        let t = now().timestamp();
        let old_sig = old.sign(b"{}", t).unwrap();
        let new_sig = new.sign(b"{}", t).unwrap();
        let v1_new = new_sig.split_once(",v1=").unwrap().1;
        let header = format!("{old_sig},v1={v1_new}");
        assert!(new.verify(b"{}", &header, now()).is_ok());
    }

    #[test]
    fn checkout_event_fields() {
        let donation_id = DonationId::new();
        let payload = format!(
            r#"{{"id":"evt_1","type":"checkout.session.completed",
                "data":{{"object":{{"id":"cs_1","payment_intent":"pi_1","payment_status":"paid",
                "client_reference_id":"{donation_id}"}}}}}}"#
        );
        let event = WebhookEvent::parse(payload.as_bytes()).unwrap();
        assert_eq!(event.kind(), WebhookKind::CheckoutCompleted);
        assert!(event.reports_payment());
        assert_eq!(event.donation_id(), Some(donation_id));
        assert_eq!(event.session_id(), Some("cs_1"));
        assert_eq!(event.payment_intent_id().as_deref(), Some("pi_1"));
    }

    #[test]
    fn unpaid_checkout_does_not_report_payment() {
        let payload = r#"{"id":"evt_3","type":"checkout.session.completed",
            "data":{"object":{"id":"cs_2","payment_status":"unpaid"}}}"#;
        let event = WebhookEvent::parse(payload.as_bytes()).unwrap();
        assert_eq!(event.kind(), WebhookKind::CheckoutCompleted);
        assert!(!event.reports_payment());

        let bare = r#"{"id":"evt_4","type":"checkout.session.completed","data":{"object":{"id":"cs_3"}}}"#;
        assert!(!WebhookEvent::parse(bare.as_bytes()).unwrap().reports_payment());
    }

    #[test]
    fn payment_intent_event_reads_metadata() {
        let donation_id = DonationId::new();
        let payload = format!(
            r#"{{"id":"evt_2","type":"payment_intent.payment_failed",
                "data":{{"object":{{"id":"pi_9","metadata":{{"donation_id":"{donation_id}"}}}}}}}}"#
        );
        let event = WebhookEvent::parse(payload.as_bytes()).unwrap();
        assert_eq!(event.kind(), WebhookKind::PaymentFailed);
        assert_eq!(event.donation_id(), Some(donation_id));
        assert_eq!(event.payment_intent_id().as_deref(), Some("pi_9"));
    }

    #[test]
    fn http_gateway_requires_an_api_key() {
        let mut config = PaymentsConfig::default();
        assert!(matches!(
            HttpPaymentGateway::from_config(&config),
            Err(PaymentGatewayError::InvalidRequest { .. })
        ));

        config.gateway_api_key = Some("   ".to_string());
        assert!(HttpPaymentGateway::from_config(&config).is_err());

        config.gateway_api_key = Some("sk_test_123".to_string());
        config.gateway_api_url = "https://gateway.example/v1/".to_string();
        let gateway = HttpPaymentGateway::from_config(&config).unwrap();
        assert_eq!(gateway.api_url, "https://gateway.example/v1");
        assert!(!format!("{gateway:?}").contains("sk_test_123"));
    }

    #[test]
    fn checkout_form_carries_the_donation() {
        let donation_id = DonationId::new();
        let form = checkout_form(&CheckoutRequest {
            donation_id,
            amount: Money::from_minor(19_550),
            currency: "PHP".to_string(),
            description: "3 meal(s)".to_string(),
            customer_email: "donor@example.com".to_string(),
            success_url: "https://example.com/ok".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
        })
        .unwrap();
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.as_str())
        };
        assert_eq!(field("mode"), Some("payment"));
        assert_eq!(field("line_items[0][price_data][unit_amount]"), Some("19550"));
        assert_eq!(field("line_items[0][price_data][currency]"), Some("php"));
        assert_eq!(field("client_reference_id"), Some(donation_id.to_string().as_str()));
        assert_eq!(
            field("payment_intent_data[metadata][donation_id]"),
            Some(donation_id.to_string().as_str())
        );
    }

    #[test]
    fn checkout_form_refuses_nothing_to_charge() {
        let result = checkout_form(&CheckoutRequest {
            donation_id: DonationId::new(),
            amount: Money::ZERO,
            currency: "PHP".to_string(),
            description: String::new(),
            customer_email: String::new(),
            success_url: String::new(),
            cancel_url: String::new(),
        });
        assert!(matches!(result, Err(PaymentGatewayError::InvalidRequest { .. })));
    }

    #[test]
    fn api_session_payment_states() {
        let session = |status: &str, payment_status: &str| ApiSession {
            id: "cs_1".to_string(),
            url: None,
            status: Some(status.to_string()),
            payment_status: Some(payment_status.to_string()),
            payment_intent: None,
        };
        assert_eq!(session("complete", "paid").payment_state(), SessionPaymentStatus::Paid);
        assert_eq!(session("complete", "unpaid").payment_state(), SessionPaymentStatus::Unpaid);
        assert_eq!(session("open", "unpaid").payment_state(), SessionPaymentStatus::Unpaid);
        assert_eq!(session("expired", "unpaid").payment_state(), SessionPaymentStatus::Expired);
    }

    #[test]
    fn garbage_payload_is_a_verification_failure() {
        assert!(matches!(
            WebhookEvent::parse(b"not json"),
            Err(VoucherError::PaymentVerification { .. })
        ));
    }

    #[tokio::test]
    async fn mock_sessions_start_unpaid() {
        let gateway = MockPaymentGateway::new();
        let session = gateway
            .create_checkout_session(CheckoutRequest {
                donation_id: DonationId::new(),
                amount: Money::from_major(650),
                currency: "PHP".to_string(),
                description: "10 meals".to_string(),
                customer_email: "donor@example.com".to_string(),
                success_url: "http://localhost/success".to_string(),
                cancel_url: "http://localhost/cancel".to_string(),
            })
            .await
            .unwrap();
        assert!(session.session_id.starts_with("cs_mock_"));

        let status = gateway.retrieve_session(&session.session_id).await.unwrap();
        assert_eq!(status.status, SessionPaymentStatus::Unpaid);

        gateway.mark_paid(&session.session_id);
        let status = gateway.retrieve_session(&session.session_id).await.unwrap();
        assert_eq!(status.status, SessionPaymentStatus::Paid);
        assert!(status.payment_intent_id.is_some());

        gateway.set_timeout(true);
        assert_eq!(
            gateway.retrieve_session(&session.session_id).await,
            Err(PaymentGatewayError::Timeout)
        );
    }
}
