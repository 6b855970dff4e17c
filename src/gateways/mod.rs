pub mod adapter;
pub mod adapters;
pub mod error;
pub mod factory;
pub mod types;
pub mod utils;

pub use adapter::GatewayAdapter;
pub use error::{GatewayError, GatewayResult};
pub use factory::GatewayFactory;
