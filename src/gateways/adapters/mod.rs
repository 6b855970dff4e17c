pub mod paystack;
pub mod stripe;

pub use paystack::PaystackAdapter;
pub use stripe::StripeAdapter;
