//! Pure reducers for the voucher core.
//!
//! Each aggregate decides transitions for a single row that the caller has
//! already locked inside a storage transaction:
//!
//! - **Voucher**: active → claimed | expired | cancelled
//! - **Donation**: pending → completed | failed, completed → refunded
//!
//! Reducers never touch storage. The services in [`crate::app`] load the row,
//! run the reducer, persist the resulting state and commit.

pub mod donation;
pub mod voucher;

pub use donation::{DonationCommand, DonationEnvironment, DonationEvent, DonationReducer};
pub use voucher::{ClaimWindow, VoucherCommand, VoucherEnvironment, VoucherEvent, VoucherReducer};
