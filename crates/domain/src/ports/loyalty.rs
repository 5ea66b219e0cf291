use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::ports::BoxFuture;

pub const SCORE_OWNER_CUSTOMER: &str = "customer";
pub const LOYALTY_TARGET_SALES: &str = "sales";

/// Message the loyalty ledger raises when the redeemable balance cannot
/// cover a subtraction; matched verbatim to rewrite it with the payment
/// type title.
pub const NOT_ENOUGH_SCORE: &str = "There has no enough score to subtract";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CardBasedRule {
    pub stage_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScoreCampaign {
    pub campaign_id: String,
    pub card_based_rules: Vec<CardBasedRule>,
}

impl ScoreCampaign {
    pub fn applies_to_stage(&self, stage_id: &str) -> bool {
        self.card_based_rules
            .iter()
            .flat_map(|rule| rule.stage_ids.iter())
            .any(|id| id == stage_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetPayment {
    #[serde(rename = "type")]
    pub payment_type: String,
    pub amount: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Monetary snapshot the loyalty ledger scores against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreTarget {
    pub payments_data: Vec<TargetPayment>,
    pub total_amount: f64,
    pub exclude_amount: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreSubtractRequest {
    pub owner_type: String,
    pub owner_id: String,
    pub campaign_id: String,
    pub target: ScoreTarget,
    pub target_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoyaltyConfirmRequest {
    pub owner_type: String,
    pub owner_id: Option<String>,
    pub target_type: String,
    pub target_id: String,
}

pub trait LoyaltyGateway: Send + Sync {
    fn find_score_campaign(
        &self,
        campaign_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ScoreCampaign>>>;

    /// Errors with a `Precondition` containing [`NOT_ENOUGH_SCORE`] when the
    /// balance cannot cover the subtraction.
    fn check_score_available(
        &self,
        request: &ScoreSubtractRequest,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn subtract_score(&self, request: &ScoreSubtractRequest) -> BoxFuture<'_, DomainResult<()>>;

    fn confirm(&self, request: &LoyaltyConfirmRequest) -> BoxFuture<'_, DomainResult<()>>;
}
