//! Shared fixtures for the integration suites: in-memory stores, mock
//! gateway adapters and a counting receipt emitter.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use skillpath_backend::config::CheckoutConfig;
use skillpath_backend::gateways::adapter::GatewayAdapter;
use skillpath_backend::gateways::error::GatewayResult;
use skillpath_backend::gateways::factory::{GatewayFactory, GatewayFactoryConfig};
use skillpath_backend::gateways::types::{
    GatewayHandle, GatewayName, InitiateResponse, PaymentEvent, PaymentRequest, ReceivedVia,
    ReportedStatus,
};
use skillpath_backend::services::catalog::{CoursePrice, StaticCourseCatalog};
use skillpath_backend::services::checkout::CheckoutService;
use skillpath_backend::services::enrollment::EnrollmentStateMachine;
use skillpath_backend::services::receipt::ReceiptEmitter;
use skillpath_backend::services::reconciliation::ReconciliationService;
use skillpath_backend::store::enrollment::Enrollment;
use skillpath_backend::store::memory::{InMemoryEnrollmentStore, InMemoryPaymentStore};
use skillpath_backend::store::payment::Payment;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Gateway adapter test double. `verify_status` controls what the
/// server-side verification call reports, independently of what any
/// callback claimed.
pub struct MockGatewayAdapter {
    name: GatewayName,
    requires_verification: bool,
    pub verify_status: Mutex<ReportedStatus>,
}

impl MockGatewayAdapter {
    pub fn new(name: GatewayName, requires_verification: bool) -> Self {
        Self {
            name,
            requires_verification,
            verify_status: Mutex::new(ReportedStatus::Succeeded),
        }
    }

    pub fn set_verify_status(&self, status: ReportedStatus) {
        *self.verify_status.lock().unwrap() = status;
    }
}

#[async_trait]
impl GatewayAdapter for MockGatewayAdapter {
    async fn initiate(&self, request: PaymentRequest) -> GatewayResult<InitiateResponse> {
        let reference = format!("txn_{}", request.reference);
        let handle = match self.name {
            GatewayName::Stripe => GatewayHandle::ClientSecret {
                client_secret: format!("{}_secret", reference),
            },
            GatewayName::Paystack => GatewayHandle::RedirectUrl {
                gateway_url: format!("https://checkout.example.com/{}", reference),
            },
        };
        Ok(InitiateResponse {
            handle,
            gateway_transaction_id: Some(reference),
        })
    }

    fn parse_callback(
        &self,
        payload: &[u8],
        _signature: Option<&str>,
    ) -> GatewayResult<PaymentEvent> {
        let parsed: serde_json::Value = serde_json::from_slice(payload).unwrap();
        Ok(PaymentEvent {
            gateway: self.name,
            gateway_transaction_id: parsed
                .get("reference")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            enrollment_id: None,
            reported_status: ReportedStatus::Succeeded,
            received_via: ReceivedVia::RedirectCallback,
            raw_payload: parsed,
            received_at: chrono::Utc::now(),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> GatewayResult<PaymentEvent> {
        let status = *self.verify_status.lock().unwrap();
        Ok(PaymentEvent {
            gateway: self.name,
            gateway_transaction_id: Some(reference.to_string()),
            enrollment_id: None,
            reported_status: status,
            received_via: ReceivedVia::System,
            raw_payload: serde_json::json!({"verified": status}),
            received_at: chrono::Utc::now(),
        })
    }

    fn name(&self) -> GatewayName {
        self.name
    }

    fn requires_callback_verification(&self) -> bool {
        self.requires_verification
    }
}

/// Records every activation so tests can assert at-most-once delivery.
#[derive(Default)]
pub struct CountingReceiptEmitter {
    pub fired: Mutex<Vec<(Uuid, Uuid)>>,
}

impl CountingReceiptEmitter {
    pub fn count(&self) -> usize {
        self.fired.lock().unwrap().len()
    }
}

#[async_trait]
impl ReceiptEmitter for CountingReceiptEmitter {
    async fn on_enrollment_activated(&self, enrollment: &Enrollment, payment: &Payment) {
        self.fired.lock().unwrap().push((enrollment.id, payment.id));
    }
}

pub struct TestWorld {
    pub enrollments: Arc<InMemoryEnrollmentStore>,
    pub payments: Arc<InMemoryPaymentStore>,
    pub machine: Arc<EnrollmentStateMachine>,
    pub checkout: Arc<CheckoutService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub emitter: Arc<CountingReceiptEmitter>,
    pub stripe: Arc<MockGatewayAdapter>,
    pub paystack: Arc<MockGatewayAdapter>,
    pub paid_course: Uuid,
    pub free_course: Uuid,
}

pub fn build_world() -> TestWorld {
    build_world_with_config(CheckoutConfig {
        intent_timeout_secs: 5,
        verify_timeout_secs: 5,
        stale_payment_ttl_secs: None,
    })
}

pub fn build_world_with_config(config: CheckoutConfig) -> TestWorld {
    let enrollments = Arc::new(InMemoryEnrollmentStore::new());
    let payments = Arc::new(InMemoryPaymentStore::new());

    let paid_course = Uuid::new_v4();
    let free_course = Uuid::new_v4();
    let mut prices = HashMap::new();
    prices.insert(
        paid_course,
        CoursePrice {
            amount: BigDecimal::from(50),
            currency: "USD".to_string(),
        },
    );
    prices.insert(
        free_course,
        CoursePrice {
            amount: BigDecimal::from(0),
            currency: "USD".to_string(),
        },
    );
    let catalog = Arc::new(StaticCourseCatalog::new(prices));

    let stripe = Arc::new(MockGatewayAdapter::new(GatewayName::Stripe, false));
    let paystack = Arc::new(MockGatewayAdapter::new(GatewayName::Paystack, true));
    let adapters: Vec<Arc<dyn GatewayAdapter>> = vec![stripe.clone(), paystack.clone()];
    let gateways = Arc::new(GatewayFactory::with_adapters(
        GatewayFactoryConfig {
            default_gateway: GatewayName::Stripe,
            enabled_gateways: vec![GatewayName::Stripe, GatewayName::Paystack],
        },
        adapters,
    ));

    let machine = Arc::new(EnrollmentStateMachine::new(
        enrollments.clone(),
        payments.clone(),
        catalog,
    ));
    let checkout = Arc::new(CheckoutService::new(
        payments.clone(),
        machine.clone(),
        gateways.clone(),
        config.clone(),
    ));
    let emitter = Arc::new(CountingReceiptEmitter::default());
    let reconciliation = Arc::new(ReconciliationService::new(
        payments.clone(),
        machine.clone(),
        gateways,
        emitter.clone(),
        config,
    ));

    TestWorld {
        enrollments,
        payments,
        machine,
        checkout,
        reconciliation,
        emitter,
        stripe,
        paystack,
        paid_course,
        free_course,
    }
}

/// A gateway event as the reconciliation service receives it.
pub fn event(
    gateway: GatewayName,
    reference: &str,
    status: ReportedStatus,
    via: ReceivedVia,
) -> PaymentEvent {
    PaymentEvent {
        gateway,
        gateway_transaction_id: Some(reference.to_string()),
        enrollment_id: None,
        reported_status: status,
        received_via: via,
        raw_payload: serde_json::json!({"reference": reference, "status": status}),
        received_at: chrono::Utc::now(),
    }
}
