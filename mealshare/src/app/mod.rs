//! Application services - the operations callers invoke.
//!
//! Each service coordinates storage, reducers and collaborators for one area:
//!
//! - [`IssuanceService`]: turn a request into a voucher against one unit of capacity
//! - [`RedemptionService`]: claim, expire and cancel vouchers
//! - [`PaymentService`]: donations, checkout and payment confirmation
//! - [`CatalogService`]: admin management of meals and time slots
//! - [`DashboardService`]: public counters
//!
//! Services share an [`AppContext`] and are assembled by [`MealshareApp`].

mod catalog;
mod dashboard;
mod issuance;
mod payments;
mod redemption;

pub use catalog::{CatalogService, NewMeal, NewTimeSlot};
pub use dashboard::DashboardService;
pub use issuance::{IssuanceService, VoucherRequest};
pub use payments::{PaymentService, WebhookAck};
pub use redemption::{BulkAction, BulkOutcome, RedemptionService, SweepReport, VoucherLookup};

use crate::config::Config;
use crate::payment_gateway::PaymentGateway;
use crate::reference::{RandomReferenceGenerator, ReferenceGenerator};
use crate::storage::{FileStorage, LocalFileStorage};
use crate::store::Repository;
use chrono::NaiveDate;
use mealshare_core::environment::{Clock, SystemClock};
use std::sync::Arc;

/// Dependencies shared by every service.
#[derive(Clone)]
pub struct AppContext {
    /// Storage
    pub repository: Arc<dyn Repository>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Policy and payment settings
    pub config: Arc<Config>,
    /// Payment processor
    pub gateway: Arc<dyn PaymentGateway>,
    /// Voucher reference source
    pub references: Arc<dyn ReferenceGenerator>,
    /// Enrollment document uploads
    pub storage: Arc<dyn FileStorage>,
}

impl AppContext {
    /// Context with the system clock, random references and local document storage.
    #[must_use]
    pub fn new(
        repository: Arc<dyn Repository>,
        gateway: Arc<dyn PaymentGateway>,
        config: Config,
    ) -> Self {
        let references = Arc::new(RandomReferenceGenerator::new(
            config.vouchers.reference_prefix.clone(),
        ));
        let storage = Arc::new(LocalFileStorage::from_config(&config.documents));
        Self {
            repository,
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            gateway,
            references,
            storage,
        }
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the payment gateway
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replace the reference generator
    #[must_use]
    pub fn with_references(mut self, references: Arc<dyn ReferenceGenerator>) -> Self {
        self.references = references;
        self
    }

    /// Replace the document storage
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn FileStorage>) -> Self {
        self.storage = storage;
        self
    }

    /// Today's date in the configured local offset
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock
            .now()
            .with_timezone(&self.config.vouchers.local_offset())
            .date_naive()
    }
}

/// All services over one shared context.
#[derive(Clone)]
pub struct MealshareApp {
    /// Voucher issuance
    pub issuance: IssuanceService,
    /// Voucher redemption and expiry
    pub redemption: RedemptionService,
    /// Donations and payment confirmation
    pub payments: PaymentService,
    /// Meal and time slot administration
    pub catalog: CatalogService,
    /// Dashboard counters
    pub dashboard: DashboardService,
}

impl MealshareApp {
    /// Build every service from `context`
    #[must_use]
    pub fn new(context: AppContext) -> Self {
        Self {
            issuance: IssuanceService::new(context.clone()),
            redemption: RedemptionService::new(context.clone()),
            payments: PaymentService::new(context.clone()),
            catalog: CatalogService::new(context.clone()),
            dashboard: DashboardService::new(context),
        }
    }
}
