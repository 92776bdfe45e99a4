//! Shared fixtures for integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use chrono::{NaiveDate, NaiveTime};
use mealshare::app::{NewMeal, NewTimeSlot, VoucherRequest};
use mealshare::capacity::MealSelection;
use mealshare::payment_gateway::{MockPaymentGateway, WebhookVerifier};
use mealshare::reference::ReferenceGenerator;
use mealshare::roles::Actor;
use mealshare::storage::LocalFileStorage;
use mealshare::store::memory::InMemoryRepository;
use mealshare::types::{Meal, RequesterProfile, StoredDocument, TimeSlot};
use mealshare::{AppContext, Config, MealshareApp};
use mealshare_core::environment::Clock;
use mealshare_testing::{init_test_tracing, test_clock};
use std::sync::Arc;

/// Everything a test needs, over an in-memory repository.
pub struct Harness {
    pub repo: InMemoryRepository,
    pub gateway: MockPaymentGateway,
    pub app: MealshareApp,
    pub context: AppContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, None)
    }

    pub fn with_references(references: Arc<dyn ReferenceGenerator>) -> Self {
        Self::build(Config::default(), Some(references))
    }

    fn build(config: Config, references: Option<Arc<dyn ReferenceGenerator>>) -> Self {
        init_test_tracing();
        let repo = InMemoryRepository::new();
        let gateway = MockPaymentGateway::new();
        let uploads = std::env::temp_dir().join(format!("mealshare-test-uploads-{}", uuid::Uuid::new_v4()));
        let mut context = AppContext::new(Arc::new(repo.clone()), Arc::new(gateway.clone()), config)
            .with_clock(Arc::new(test_clock()))
            .with_storage(Arc::new(LocalFileStorage::new(uploads, "http://localhost:8080/uploads")));
        if let Some(references) = references {
            context = context.with_references(references);
        }
        Self {
            repo,
            gateway,
            app: MealshareApp::new(context.clone()),
            context,
        }
    }

    pub async fn lunch_slot(&self) -> TimeSlot {
        self.app
            .catalog
            .create_time_slot(
                Actor::admin(),
                NewTimeSlot {
                    name: "Lunch".to_string(),
                    start_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn meal(&self, name: &str, quantity: u32) -> Meal {
        self.app
            .catalog
            .create_meal(
                Actor::admin(),
                NewMeal {
                    name: name.to_string(),
                    description: String::new(),
                    quantity,
                },
            )
            .await
            .unwrap()
    }

    /// Sign a webhook body the way the gateway would.
    pub fn sign(&self, payload: &str) -> String {
        let payments = &self.context.config.payments;
        WebhookVerifier::new(&payments.webhook_secret, payments.webhook_tolerance_secs)
            .sign(payload.as_bytes(), test_clock().now().timestamp())
            .unwrap()
    }
}

/// 2024-01-16, the day after the test clock's today.
pub fn tomorrow() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
}

pub fn profile(n: usize) -> RequesterProfile {
    RequesterProfile {
        email: format!("student{n}@example.edu"),
        full_name: format!("Student {n}"),
        course: "BS Biology".to_string(),
        year_level: 1,
        phone: "09170000000".to_string(),
    }
}

pub fn document(name: &str) -> StoredDocument {
    StoredDocument {
        url: format!("http://localhost/uploads/{name}"),
        file_name: name.to_string(),
        content_type: "application/pdf".to_string(),
        size_bytes: 2048,
    }
}

pub fn request(slot: &TimeSlot, requester: RequesterProfile, selection: MealSelection) -> VoucherRequest {
    VoucherRequest {
        actor: Actor::student(),
        requester,
        selection,
        time_slot_id: slot.id,
        scheduled_date: tomorrow(),
        document: Some(document("cor.pdf")),
    }
}

pub fn checkout_completed(event_id: &str, session_id: &str, donation_id: impl std::fmt::Display) -> String {
    format!(
        r#"{{"id":"{event_id}","type":"checkout.session.completed","data":{{"object":{{"id":"{session_id}","payment_intent":"pi_{event_id}","payment_status":"paid","client_reference_id":"{donation_id}"}}}}}}"#
    )
}
