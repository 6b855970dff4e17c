//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub checkout: CheckoutConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Checkout and reconciliation policy configuration
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Deadline for a gateway intent-creation call
    pub intent_timeout_secs: u64,
    /// Deadline for a gateway server-side verification call
    pub verify_timeout_secs: u64,
    /// Age after which a payment still awaiting confirmation is marked
    /// failed by the operator-driven expiry pass. `None` disables expiry.
    pub stale_payment_ttl_secs: Option<u64>,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            intent_timeout_secs: 30,
            verify_timeout_secs: 15,
            stale_payment_ttl_secs: None,
        }
    }
}

impl AppConfig {
    /// Load the full application configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env(),
            checkout: CheckoutConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                field: "PORT".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Invalid {
                field: "DATABASE_MAX_CONNECTIONS".to_string(),
                message: "max_connections must be >= min_connections".to_string(),
            });
        }
        if self.checkout.intent_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "GATEWAY_INTENT_TIMEOUT_SECS".to_string(),
                message: "intent timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(8080),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim().to_string())
                .collect(),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing {
            field: "DATABASE_URL".to_string(),
        })?;

        Ok(Self {
            url,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            connection_timeout: env::var("DATABASE_CONNECTION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            idle_timeout: env::var("DATABASE_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
        })
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "plain".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Plain,
        };
        Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format,
        }
    }
}

impl CheckoutConfig {
    pub fn from_env() -> Self {
        Self {
            intent_timeout_secs: env::var("GATEWAY_INTENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            verify_timeout_secs: env::var("GATEWAY_VERIFY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            stale_payment_ttl_secs: env::var("STALE_PAYMENT_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration: {field}")]
    Missing { field: String },
    #[error("Invalid configuration: {field}: {message}")]
    Invalid { field: String, message: String },
}
