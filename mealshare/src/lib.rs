//! Mealshare - donation-funded meal vouchers
//!
//! Donors fund meals; students request vouchers redeemable at timed
//! distribution slots; staff claim vouchers at distribution; admins manage
//! meal stock and slots. This crate is the voucher lifecycle and
//! meal-availability accounting core behind those flows.
//!
//! # Architecture
//!
//! ```text
//!   gateway ──► PaymentService ──► donation completed ──► funded units
//!                                                            │
//!   admin ────► CatalogService ──► managed meal stock        │
//!                                        │                   │
//!                                        ▼                   ▼
//!   student ──► IssuanceService ──► capacity::reserve_one (one unit)
//!                      │
//!                      ▼
//!   staff ────► RedemptionService ──► active → claimed | expired | cancelled
//!
//!   DashboardService ──► totals recomputed from the rows above
//! ```
//!
//! # Guarantees
//!
//! - **No overselling**: every issuance consumes exactly one unit of capacity
//!   inside the same transaction that inserts the voucher.
//! - **No double claims**: the voucher row is locked while it transitions;
//!   the loser of a race sees [`VoucherError::InvalidTransition`].
//! - **Exactly-once completion**: a donation's status change and its funded
//!   units commit together, and completing twice mints nothing.
//!
//! Transitions are decided by pure reducers in [`aggregates`] and tested
//! with `mealshare_testing::ReducerTest`; services in [`app`] wrap them in
//! storage transactions from [`store`].

pub mod aggregates;
pub mod app;
pub mod capacity;
pub mod config;
pub mod error;
pub mod metrics;
pub mod payment_gateway;
pub mod reference;
pub mod roles;
pub mod storage;
pub mod store;
pub mod types;

pub use app::{AppContext, MealshareApp};
pub use config::Config;
pub use error::{Result, VoucherError};
