//! Business logic for the STK push payment flow

pub mod callback_reconciler;
pub mod payment_admin;
pub mod payment_initiation;
pub mod payment_status;

pub use callback_reconciler::{CallbackReconciler, ReconciliationOutcome, RejectionReason};
pub use payment_admin::PaymentAdminService;
pub use payment_initiation::{InitiationRequest, InitiationResult, PaymentInitiationService};
pub use payment_status::{PaymentStatusView, StatusQueryService};
