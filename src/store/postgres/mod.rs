pub mod enrollment_repository;
pub mod payment_repository;

pub use enrollment_repository::PgEnrollmentStore;
pub use payment_repository::PgPaymentStore;
