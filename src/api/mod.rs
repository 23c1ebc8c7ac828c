pub mod mpesa;
pub mod payments;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::MpesaConfig;
use crate::database::repository::PaymentStore;
use crate::health::{self, HealthChecker};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::provider::StkPushProvider;
use crate::services::{
    CallbackReconciler, PaymentAdminService, PaymentInitiationService, StatusQueryService,
};

/// Shared state for the payment routes
#[derive(Clone)]
pub struct PaymentsState {
    pub initiation: Arc<PaymentInitiationService>,
    pub reconciler: Arc<CallbackReconciler>,
    pub status: Arc<StatusQueryService>,
    pub admin: Arc<PaymentAdminService>,
}

impl PaymentsState {
    pub fn new(
        provider: Arc<dyn StkPushProvider>,
        store: Arc<dyn PaymentStore>,
        config: Arc<MpesaConfig>,
    ) -> Self {
        Self {
            initiation: Arc::new(PaymentInitiationService::new(
                provider,
                store.clone(),
                config,
            )),
            reconciler: Arc::new(CallbackReconciler::new(store.clone())),
            status: Arc::new(StatusQueryService::new(store.clone())),
            admin: Arc::new(PaymentAdminService::new(store)),
        }
    }
}

pub fn payment_routes(state: PaymentsState) -> Router {
    Router::new()
        .route("/mpesa/stkpush", post(mpesa::stk_push))
        .route("/callback", post(mpesa::callback))
        .route("/mpesa/callback", post(mpesa::callback))
        .route(
            "/mpesa/payment-status/{checkout_request_id}",
            get(mpesa::payment_status),
        )
        .route(
            "/mpesa/payments",
            get(payments::list_payments).post(payments::create_payment),
        )
        .route(
            "/mpesa/payments/{id}",
            get(payments::get_payment)
                .put(payments::update_payment)
                .delete(payments::delete_payment),
        )
        .with_state(state)
}

pub fn health_routes(checker: HealthChecker) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .with_state(checker)
}

/// Full application router with request-id and logging layers.
pub fn app_router(
    provider: Arc<dyn StkPushProvider>,
    store: Arc<dyn PaymentStore>,
    config: Arc<MpesaConfig>,
) -> Router {
    let checker = HealthChecker::new(store.clone());

    Router::new()
        .merge(payment_routes(PaymentsState::new(provider, store, config)))
        .merge(health_routes(checker))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
