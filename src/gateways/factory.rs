use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::adapters::{PaystackAdapter, StripeAdapter};
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::GatewayName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GatewayFactoryConfig {
    pub default_gateway: GatewayName,
    pub enabled_gateways: Vec<GatewayName>,
}

impl GatewayFactoryConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let default_gateway =
            std::env::var("DEFAULT_PAYMENT_GATEWAY").unwrap_or_else(|_| "stripe".to_string());
        let default_gateway = GatewayName::from_str(&default_gateway)?;

        let enabled_raw = std::env::var("ENABLED_PAYMENT_GATEWAYS")
            .unwrap_or_else(|_| "stripe,paystack".to_string());
        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            enabled_gateways.push(GatewayName::from_str(value)?);
        }

        if !enabled_gateways.contains(&default_gateway) {
            return Err(GatewayError::Rejected {
                message: "default gateway must be enabled".to_string(),
                field: Some("DEFAULT_PAYMENT_GATEWAY".to_string()),
            });
        }

        Ok(Self {
            default_gateway,
            enabled_gateways,
        })
    }
}

/// Holds one adapter instance per configured gateway. The single place in
/// the crate where a gateway name is turned into an implementation.
pub struct GatewayFactory {
    config: GatewayFactoryConfig,
    adapters: HashMap<GatewayName, Arc<dyn GatewayAdapter>>,
}

impl GatewayFactory {
    /// Build every enabled adapter from environment configuration.
    pub fn from_env() -> GatewayResult<Self> {
        let config = GatewayFactoryConfig::from_env()?;
        let mut adapters: HashMap<GatewayName, Arc<dyn GatewayAdapter>> = HashMap::new();
        for gateway in &config.enabled_gateways {
            let adapter: Arc<dyn GatewayAdapter> = match gateway {
                GatewayName::Stripe => Arc::new(StripeAdapter::from_env()?),
                GatewayName::Paystack => Arc::new(PaystackAdapter::from_env()?),
            };
            adapters.insert(*gateway, adapter);
        }
        Ok(Self { config, adapters })
    }

    /// Assemble a factory from pre-built adapters (tests, custom wiring).
    pub fn with_adapters(
        config: GatewayFactoryConfig,
        adapters: Vec<Arc<dyn GatewayAdapter>>,
    ) -> Self {
        Self {
            config,
            adapters: adapters.into_iter().map(|a| (a.name(), a)).collect(),
        }
    }

    pub fn default_gateway(&self) -> GatewayName {
        self.config.default_gateway
    }

    pub fn adapter(&self, gateway: GatewayName) -> GatewayResult<Arc<dyn GatewayAdapter>> {
        self.adapters
            .get(&gateway)
            .cloned()
            .ok_or(GatewayError::Rejected {
                message: format!("gateway {} is not enabled", gateway),
                field: Some("gateway".to_string()),
            })
    }
}
