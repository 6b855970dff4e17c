//! Services module for business logic

pub mod catalog;
pub mod checkout;
pub mod enrollment;
pub mod receipt;
pub mod reconciliation;

pub use catalog::{CourseCatalog, CoursePrice, StaticCourseCatalog};
pub use checkout::CheckoutService;
pub use enrollment::EnrollmentStateMachine;
pub use receipt::{LoggingReceiptEmitter, ReceiptEmitter};
pub use reconciliation::{ReconcileOutcome, ReconciliationService};
