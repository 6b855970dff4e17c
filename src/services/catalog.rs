//! Course catalog collaborator interface.
//!
//! The catalog itself (browsing, search, content) lives in another service;
//! this core only needs the price of a course at enrollment time.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoursePrice {
    pub amount: BigDecimal,
    pub currency: String,
}

impl CoursePrice {
    pub fn is_free(&self) -> bool {
        self.amount == BigDecimal::from(0)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Course not found: {course_id}")]
    CourseNotFound { course_id: Uuid },
    #[error("Catalog unavailable: {message}")]
    Unavailable { message: String },
}

impl From<CatalogError> for crate::error::AppError {
    fn from(err: CatalogError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError, ValidationError};

        match err {
            CatalogError::CourseNotFound { course_id } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "course_id".to_string(),
                    reason: format!("course {} does not exist", course_id),
                }))
            }
            CatalogError::Unavailable { message } => AppError::new(AppErrorKind::Infrastructure(
                InfrastructureError::Database {
                    message,
                    is_retryable: true,
                },
            )),
        }
    }
}

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn get_price(&self, course_id: Uuid) -> Result<CoursePrice, CatalogError>;
}

/// Fixed price table, loaded from configuration.
///
/// Entry format: `<course_uuid>=<amount>:<currency>`, comma separated.
#[derive(Default, Clone)]
pub struct StaticCourseCatalog {
    prices: HashMap<Uuid, CoursePrice>,
}

impl StaticCourseCatalog {
    pub fn new(prices: HashMap<Uuid, CoursePrice>) -> Self {
        Self { prices }
    }

    pub fn from_env() -> Result<Self, CatalogError> {
        let raw = std::env::var("COURSE_CATALOG").unwrap_or_default();
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let mut prices = HashMap::new();
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (course, price) = entry.split_once('=').ok_or(CatalogError::Unavailable {
                message: format!("malformed catalog entry: {}", entry),
            })?;
            let (amount, currency) = price.split_once(':').ok_or(CatalogError::Unavailable {
                message: format!("malformed catalog price: {}", price),
            })?;
            let course_id = Uuid::parse_str(course.trim()).map_err(|_| {
                CatalogError::Unavailable {
                    message: format!("malformed catalog course id: {}", course),
                }
            })?;
            let amount = BigDecimal::from_str(amount.trim()).map_err(|_| {
                CatalogError::Unavailable {
                    message: format!("malformed catalog amount: {}", amount),
                }
            })?;
            prices.insert(
                course_id,
                CoursePrice {
                    amount,
                    currency: currency.trim().to_uppercase(),
                },
            );
        }
        Ok(Self { prices })
    }
}

#[async_trait]
impl CourseCatalog for StaticCourseCatalog {
    async fn get_price(&self, course_id: Uuid) -> Result<CoursePrice, CatalogError> {
        self.prices
            .get(&course_id)
            .cloned()
            .ok_or(CatalogError::CourseNotFound { course_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_catalog_parses_and_serves_prices() {
        let id = Uuid::new_v4();
        let catalog =
            StaticCourseCatalog::parse(&format!("{}=49.99:usd", id)).expect("should parse");
        let price = catalog.get_price(id).await.expect("price should exist");
        assert_eq!(price.currency, "USD");
        assert!(!price.is_free());

        let missing = catalog.get_price(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(CatalogError::CourseNotFound { .. })));
    }

    #[test]
    fn zero_amount_is_free() {
        let price = CoursePrice {
            amount: BigDecimal::from(0),
            currency: "USD".to_string(),
        };
        assert!(price.is_free());
    }
}
