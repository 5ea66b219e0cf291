use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::ports::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PricingLine {
    pub item_id: String,
    pub product_id: String,
    pub quantity: f64,
    pub price: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PricingRequest {
    pub total_amount: f64,
    pub department_id: String,
    pub branch_id: String,
    pub pipeline_id: String,
    pub products: Vec<PricingLine>,
}

/// Discount computed for one line: per-unit value plus any bonus product
/// ids the matched rule awards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceMatch {
    pub value: f64,
    pub bonus_products: Vec<String>,
}

pub trait PricingGateway: Send + Sync {
    /// Returns matches keyed by line id; lines without a match are absent.
    fn check_pricing(
        &self,
        request: &PricingRequest,
    ) -> BoxFuture<'_, DomainResult<HashMap<String, PriceMatch>>>;
}
