use crate::gateways::error::GatewayResult;
use crate::gateways::types::{GatewayName, InitiateResponse, PaymentEvent, PaymentRequest};
use async_trait::async_trait;

/// Uniform surface over heterogeneous payment gateways.
///
/// One implementation per gateway, selected through the factory; no
/// gateway-name branching is allowed anywhere else in the crate.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Start a payment attempt with the gateway. Returns the handle the
    /// client needs to finish checkout (client secret or redirect URL).
    async fn initiate(&self, request: PaymentRequest) -> GatewayResult<InitiateResponse>;

    /// Validate and normalize an inbound callback payload. Adapters own
    /// authenticity here: a failed signature or structure check is a
    /// `MalformedCallback`, never a partially-parsed event.
    fn parse_callback(&self, payload: &[u8], signature: Option<&str>)
        -> GatewayResult<PaymentEvent>;

    /// Ask the gateway for the authoritative state of a transaction.
    async fn verify_transaction(&self, reference: &str) -> GatewayResult<PaymentEvent>;

    fn name(&self) -> GatewayName;

    /// Whether callback-reported success must be re-validated through
    /// `verify_transaction` before it is accepted. True for gateways whose
    /// callback channel carries no verifiable signature.
    fn requires_callback_verification(&self) -> bool;
}
