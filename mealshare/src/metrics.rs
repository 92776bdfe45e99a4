//! Business metrics for the voucher core.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `mealshare_vouchers_total{status}` - Voucher transitions (issued, claimed, expired, cancelled)
//! - `mealshare_voucher_rejections_total{reason}` - Issuance attempts refused
//! - `mealshare_donations_total{status}` - Donation payment transitions
//! - `mealshare_units_minted_total` - Funded units created by completed donations
//! - `mealshare_webhooks_total{outcome}` - Webhook deliveries by outcome
//!
//! ## Gauges
//! - `mealshare_total_donations` - Sum of completed donations (currency units)
//! - `mealshare_total_meals_donated` - Meals funded by completed donations
//! - `mealshare_total_donors` - Distinct donors with a completed donation
//! - `mealshare_meals_available` - Capacity left across both sources

use crate::types::MetricsSnapshot;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::prelude::ToPrimitive;
use std::net::{IpAddr, SocketAddr};

/// Initialize and register all business metrics descriptions.
///
/// Call once at startup, before anything is recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "mealshare_vouchers_total",
        "Voucher transitions by status (issued, claimed, expired, cancelled)"
    );
    describe_counter!(
        "mealshare_voucher_rejections_total",
        "Voucher requests refused, by reason"
    );
    describe_counter!(
        "mealshare_donations_total",
        "Donation payment transitions by status (submitted, completed, failed, refunded)"
    );
    describe_counter!(
        "mealshare_units_minted_total",
        "Funded meal units created by completed donations"
    );
    describe_counter!(
        "mealshare_webhooks_total",
        "Payment webhook deliveries by outcome"
    );

    describe_gauge!("mealshare_total_donations", "Sum of completed donation amounts");
    describe_gauge!("mealshare_total_meals_donated", "Meals funded by completed donations");
    describe_gauge!("mealshare_total_donors", "Distinct donors with a completed donation");
    describe_gauge!("mealshare_meals_available", "Meal capacity left across all sources");

    tracing::info!("Business metrics registered");
}

/// Start the Prometheus scrape endpoint on `host:port`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the host is not an IP address or the exporter
/// cannot be installed (for example, a recorder is already set).
pub fn install_exporter(host: &str, port: u16) -> anyhow::Result<()> {
    let ip: IpAddr = host.parse()?;
    let addr = SocketAddr::new(ip, port);
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a voucher issued.
///
/// # Arguments
///
/// * `source` - Capacity source the voucher drew from
pub fn record_voucher_issued(source: &'static str) {
    metrics::counter!("mealshare_vouchers_total", "status" => "issued", "source" => source)
        .increment(1);
    tracing::debug!(source, "Recorded voucher_issued metric");
}

/// Record a voucher request refused.
///
/// # Arguments
///
/// * `reason` - Short reason label (e.g. `out_of_capacity`, `validation`)
pub fn record_voucher_rejected(reason: &'static str) {
    metrics::counter!("mealshare_voucher_rejections_total", "reason" => reason).increment(1);
    tracing::debug!(reason, "Recorded voucher_rejected metric");
}

/// Record a voucher claimed.
pub fn record_voucher_claimed() {
    metrics::counter!("mealshare_vouchers_total", "status" => "claimed").increment(1);
    tracing::debug!("Recorded voucher_claimed metric");
}

/// Record vouchers expired, by hand or by the sweep.
pub fn record_vouchers_expired(count: u64) {
    metrics::counter!("mealshare_vouchers_total", "status" => "expired").increment(count);
    tracing::debug!(count, "Recorded vouchers_expired metric");
}

/// Record a voucher cancelled.
pub fn record_voucher_cancelled() {
    metrics::counter!("mealshare_vouchers_total", "status" => "cancelled").increment(1);
    tracing::debug!("Recorded voucher_cancelled metric");
}

/// Record a donation status change.
///
/// # Arguments
///
/// * `status` - `submitted`, `completed`, `failed` or `refunded`
pub fn record_donation(status: &'static str) {
    metrics::counter!("mealshare_donations_total", "status" => status).increment(1);
    tracing::debug!(status, "Recorded donation metric");
}

/// Record funded units minted for a completed donation.
pub fn record_units_minted(count: u32) {
    metrics::counter!("mealshare_units_minted_total").increment(u64::from(count));
    tracing::debug!(count, "Recorded units_minted metric");
}

/// Record a webhook delivery outcome.
pub fn record_webhook(outcome: &'static str) {
    metrics::counter!("mealshare_webhooks_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded webhook metric");
}

/// Publish a dashboard snapshot as gauges.
#[allow(clippy::cast_precision_loss)]
pub fn publish_snapshot(snapshot: &MetricsSnapshot) {
    let total_donations = snapshot.total_donations.amount().to_f64().unwrap_or_default();
    metrics::gauge!("mealshare_total_donations").set(total_donations);
    metrics::gauge!("mealshare_total_meals_donated").set(snapshot.total_meals_donated as f64);
    metrics::gauge!("mealshare_total_donors").set(snapshot.total_donors as f64);
    metrics::gauge!("mealshare_meals_available").set(snapshot.meals_available as f64);
    tracing::debug!(
        total_donations = %snapshot.total_donations,
        total_meals_donated = snapshot.total_meals_donated,
        total_donors = snapshot.total_donors,
        meals_available = snapshot.meals_available,
        "Published dashboard gauges"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder every call is a no-op; these only check
    // that recording never panics.
    #[test]
    fn recording_without_recorder_is_harmless() {
        register_business_metrics();
        record_voucher_issued("unit_pool");
        record_voucher_rejected("out_of_capacity");
        record_voucher_claimed();
        record_vouchers_expired(3);
        record_voucher_cancelled();
        record_donation("completed");
        record_units_minted(10);
        record_webhook("processed");
        publish_snapshot(&MetricsSnapshot::default());
    }

    #[test]
    fn exporter_rejects_bad_host() {
        assert!(install_exporter("not-an-ip", 9090).is_err());
    }
}
