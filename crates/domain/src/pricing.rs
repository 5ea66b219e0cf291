use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::error;

use crate::DomainResult;
use crate::error::DomainError;
use crate::items::{BoardItem, ProductLine};
use crate::ports::boards::BoardHierarchy;
use crate::ports::directory::CoreDirectory;
use crate::ports::loyalty::{
    LOYALTY_TARGET_SALES, LoyaltyConfirmRequest, LoyaltyGateway, NOT_ENOUGH_SCORE,
    SCORE_OWNER_CUSTOMER, ScoreSubtractRequest, ScoreTarget, TargetPayment,
};
use crate::ports::pricing::{PricingGateway, PricingLine, PricingRequest};
use crate::rpc::{self, RpcTimeouts};
use crate::util::fix_num;

/// Synchronous side effects against the pricing and loyalty services of
/// record. Owns no durable state; every call is request/response.
#[derive(Clone)]
pub struct PricingOrchestrator {
    boards: Arc<dyn BoardHierarchy>,
    directory: Arc<dyn CoreDirectory>,
    pricing: Arc<dyn PricingGateway>,
    loyalty: Arc<dyn LoyaltyGateway>,
    timeouts: RpcTimeouts,
}

impl PricingOrchestrator {
    pub fn new(
        boards: Arc<dyn BoardHierarchy>,
        directory: Arc<dyn CoreDirectory>,
        pricing: Arc<dyn PricingGateway>,
        loyalty: Arc<dyn LoyaltyGateway>,
        timeouts: RpcTimeouts,
    ) -> Self {
        Self {
            boards,
            directory,
            pricing,
            loyalty,
            timeouts,
        }
    }

    /// Reprices the item's candidate lines against the pricing service and
    /// synthesizes bonus lines for awarded bonus products.
    ///
    /// Candidates are ticked lines that are not already bonus stock. With no
    /// candidates, or when the advisory pricing call yields nothing, the
    /// input lines come back unmodified without further calls.
    pub async fn check_pricing(&self, item: &BoardItem) -> DomainResult<Vec<ProductLine>> {
        let candidates: Vec<&ProductLine> = item
            .products_data
            .iter()
            .filter(|line| line.tick_used && !line.is_bonus())
            .collect();
        if candidates.is_empty() {
            return Ok(item.products_data.clone());
        }

        let stage = self.boards.get_stage(&item.stage_id).await?;
        let request = PricingRequest {
            total_amount: candidates.iter().map(|line| line.amount).sum(),
            department_id: item.department_ids.first().cloned().unwrap_or_default(),
            branch_id: item.branch_ids.first().cloned().unwrap_or_default(),
            pipeline_id: stage.pipeline_id,
            products: candidates
                .iter()
                .map(|line| PricingLine {
                    item_id: line.line_id.clone(),
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    price: line.unit_price,
                })
                .collect(),
        };
        let matches = rpc::advisory(
            "pricing.checkPricing",
            self.timeouts.advisory,
            HashMap::new(),
            self.pricing.check_pricing(&request),
        )
        .await;
        if matches.is_empty() {
            return Ok(item.products_data.clone());
        }

        let mut priced: HashMap<String, ProductLine> = HashMap::new();
        let mut bonus_counts: Vec<(String, u32)> = Vec::new();
        for line in candidates {
            let Some(price_match) = matches.get(&line.line_id) else {
                continue;
            };
            for bonus_product in &price_match.bonus_products {
                match bonus_counts
                    .iter_mut()
                    .find(|(product_id, _)| product_id == bonus_product)
                {
                    Some((_, count)) => *count += 1,
                    None => bonus_counts.push((bonus_product.clone(), 1)),
                }
            }

            let mut updated = line.clone();
            updated.discount_percent = fix_num(price_match.value * 100.0 / line.unit_price, 8);
            updated.discount = fix_num(price_match.value * line.quantity, 2);
            updated.amount = fix_num((line.unit_price - price_match.value) * line.quantity, 2);
            priced.insert(line.line_id.clone(), updated);
        }

        let mut next: Vec<ProductLine> = item
            .products_data
            .iter()
            .filter(|line| !line.is_bonus())
            .map(|line| priced.get(&line.line_id).cloned().unwrap_or_else(|| line.clone()))
            .collect();
        for (product_id, count) in bonus_counts {
            next.push(ProductLine::bonus(product_id, count));
        }
        Ok(next)
    }

    /// Consumes loyalty score for score-eligible payment types when the item
    /// sits in a campaign-configured stage.
    ///
    /// The availability check is a hard precondition: an insufficient
    /// balance aborts the whole operation before any subtraction, naming the
    /// payment type. Subtraction failures are logged and re-thrown.
    pub async fn do_score_campaign(&self, item: &BoardItem) -> DomainResult<()> {
        if item.payments_data.is_empty() {
            return Ok(());
        }

        let stage = self.boards.get_stage(&item.stage_id).await?;
        let pipeline = self.boards.get_pipeline(&stage.pipeline_id).await?;
        let eligible: Vec<_> = pipeline.score_payment_types().collect();
        if !eligible
            .iter()
            .any(|config| item.payments_data.contains_key(&config.payment_type))
        {
            return Ok(());
        }

        let customer_ids = rpc::mandatory(
            "core.customerIds",
            self.timeouts.mandatory,
            self.directory.customer_ids(item.kind, &item.item_id),
        )
        .await?;
        let Some(customer_id) = customer_ids.first() else {
            return Ok(());
        };

        let eligible_types: HashSet<&str> = eligible
            .iter()
            .map(|config| config.payment_type.as_str())
            .collect();
        let target = ScoreTarget {
            payments_data: item
                .payments_data
                .iter()
                .map(|(payment_type, entry)| TargetPayment {
                    payment_type: payment_type.clone(),
                    amount: entry.amount,
                    extra: entry.extra.clone(),
                })
                .collect(),
            total_amount: item.total_amount(),
            exclude_amount: item
                .payments_data
                .iter()
                .filter(|(payment_type, _)| !eligible_types.contains(payment_type.as_str()))
                .map(|(_, entry)| entry.amount)
                .sum(),
        };

        for payment_type in item.payments_data.keys() {
            let Some(config) = eligible
                .iter()
                .find(|config| config.payment_type == *payment_type)
            else {
                continue;
            };
            let Some(campaign_id) = config.score_campaign_id.as_deref() else {
                continue;
            };

            let campaign = rpc::advisory(
                "loyalties.scoreCampaign.findOne",
                self.timeouts.advisory,
                None,
                self.loyalty.find_score_campaign(campaign_id),
            )
            .await;
            let Some(campaign) = campaign else {
                continue;
            };
            if !campaign.applies_to_stage(&item.stage_id) {
                continue;
            }

            let request = ScoreSubtractRequest {
                owner_type: SCORE_OWNER_CUSTOMER.to_string(),
                owner_id: customer_id.clone(),
                campaign_id: campaign_id.to_string(),
                target: target.clone(),
                target_id: item.item_id.clone(),
            };

            rpc::mandatory(
                "loyalties.checkScoreAviableSubtract",
                self.timeouts.mandatory,
                self.loyalty.check_score_available(&request),
            )
            .await
            .map_err(|err| match err {
                DomainError::Precondition(message) if message.contains(NOT_ENOUGH_SCORE) => {
                    DomainError::Precondition(format!("{NOT_ENOUGH_SCORE} using {}", config.title))
                }
                other => other,
            })?;

            if let Err(err) = rpc::mandatory(
                "loyalties.doScoreCampaign",
                self.timeouts.mandatory,
                self.loyalty.subtract_score(&request),
            )
            .await
            {
                error!(campaign_id, error = %err, "score subtraction failed");
                return Err(err);
            }
        }

        Ok(())
    }

    /// Best-effort confirmation of previously reserved loyalty effects; all
    /// failures are swallowed.
    pub async fn confirm_loyalties(&self, item: &BoardItem) {
        if item.products_data.is_empty() {
            return;
        }
        let customer_ids = rpc::advisory(
            "core.customerIds",
            self.timeouts.advisory,
            Vec::new(),
            self.directory.customer_ids(item.kind, &item.item_id),
        )
        .await;
        let request = LoyaltyConfirmRequest {
            owner_type: SCORE_OWNER_CUSTOMER.to_string(),
            owner_id: customer_ids.first().cloned(),
            target_type: LOYALTY_TARGET_SALES.to_string(),
            target_id: item.item_id.clone(),
        };
        rpc::advisory(
            "loyalties.confirmLoyalties",
            self.timeouts.advisory,
            (),
            self.loyalty.confirm(&request),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{ItemStatus, PaymentEntry};
    use crate::ports::loyalty::{CardBasedRule, ScoreCampaign};
    use crate::ports::pricing::PriceMatch;
    use crate::test_support::{
        MockHierarchy, StubDirectory, StubLoyaltyGateway, StubPricingGateway, payment_config,
        sample_item, sample_pipeline, sample_stage,
    };

    fn orchestrator(
        hierarchy: MockHierarchy,
        directory: StubDirectory,
        pricing: StubPricingGateway,
        loyalty: StubLoyaltyGateway,
    ) -> PricingOrchestrator {
        PricingOrchestrator::new(
            Arc::new(hierarchy),
            Arc::new(directory),
            Arc::new(pricing),
            Arc::new(loyalty),
            RpcTimeouts::default(),
        )
    }

    fn ticked_line(line_id: &str, unit_price: f64, quantity: f64) -> ProductLine {
        ProductLine {
            line_id: line_id.to_string(),
            product_id: format!("product-{line_id}"),
            quantity,
            unit_price,
            discount: 0.0,
            discount_percent: 0.0,
            amount: unit_price * quantity,
            tick_used: true,
            bonus_count: 0,
            assign_user_id: None,
        }
    }

    #[tokio::test]
    async fn pricing_short_circuits_without_candidate_lines() {
        let pricing = StubPricingGateway::default();
        let orchestrator = orchestrator(
            MockHierarchy::default(),
            StubDirectory::default(),
            pricing.clone(),
            StubLoyaltyGateway::default(),
        );

        let mut item = sample_item("item-1", "stage-1", 5.0, ItemStatus::Active);
        let mut untouched = ticked_line("l1", 100.0, 1.0);
        untouched.tick_used = false;
        let mut bonus = ticked_line("l2", 0.0, 2.0);
        bonus.bonus_count = 2;
        item.products_data = vec![untouched, bonus];

        let result = orchestrator.check_pricing(&item).await.expect("pricing");
        assert_eq!(result, item.products_data);
        assert_eq!(pricing.calls(), 0);
    }

    #[tokio::test]
    async fn pricing_applies_discounts_and_synthesizes_bonus_lines() {
        let hierarchy = MockHierarchy::default();
        hierarchy.seed_stage(sample_stage("stage-1", "pipe-1"));
        let pricing = StubPricingGateway::default();
        pricing.set_match(
            "l1",
            PriceMatch {
                value: 20.0,
                bonus_products: vec!["freebie".to_string()],
            },
        );
        pricing.set_match(
            "l2",
            PriceMatch {
                value: 0.0,
                bonus_products: vec!["freebie".to_string()],
            },
        );
        let orchestrator = orchestrator(
            hierarchy,
            StubDirectory::default(),
            pricing.clone(),
            StubLoyaltyGateway::default(),
        );

        let mut item = sample_item("item-1", "stage-1", 5.0, ItemStatus::Active);
        item.products_data = vec![ticked_line("l1", 100.0, 2.0), ticked_line("l2", 50.0, 1.0)];

        let result = orchestrator.check_pricing(&item).await.expect("pricing");
        assert_eq!(result.len(), 3);

        let first = &result[0];
        assert_eq!(first.discount_percent, 20.0);
        assert_eq!(first.discount, 40.0);
        assert_eq!(first.amount, 160.0);

        let bonus = result.last().expect("bonus line");
        assert!(bonus.is_bonus());
        assert_eq!(bonus.bonus_count, 2);
        assert_eq!(bonus.quantity, 2.0);
        assert_eq!(bonus.unit_price, 0.0);
        assert_eq!(bonus.amount, 0.0);
        assert!(bonus.tick_used);
        assert_eq!(pricing.calls(), 1);
    }

    #[tokio::test]
    async fn pricing_failure_returns_lines_unmodified() {
        let hierarchy = MockHierarchy::default();
        hierarchy.seed_stage(sample_stage("stage-1", "pipe-1"));
        let pricing = StubPricingGateway::default();
        pricing.fail_next();
        let orchestrator = orchestrator(
            hierarchy,
            StubDirectory::default(),
            pricing,
            StubLoyaltyGateway::default(),
        );

        let mut item = sample_item("item-1", "stage-1", 5.0, ItemStatus::Active);
        item.products_data = vec![ticked_line("l1", 100.0, 2.0)];

        let result = orchestrator.check_pricing(&item).await.expect("pricing");
        assert_eq!(result, item.products_data);
    }

    fn scoring_fixture() -> (MockHierarchy, StubDirectory, StubLoyaltyGateway, BoardItem) {
        let hierarchy = MockHierarchy::default();
        hierarchy.seed_stage(sample_stage("stage-1", "pipe-1"));
        let mut pipeline = sample_pipeline("pipe-1", "board-1");
        pipeline.payment_types = vec![
            payment_config("golomt", "Golomt card", Some("camp-1")),
            payment_config("cash", "Cash", None),
        ];
        hierarchy.seed_pipeline(pipeline);

        let directory = StubDirectory::default();
        directory.set_customer_ids(vec!["customer-1".to_string()]);

        let loyalty = StubLoyaltyGateway::default();
        loyalty.set_campaign(ScoreCampaign {
            campaign_id: "camp-1".to_string(),
            card_based_rules: vec![CardBasedRule {
                stage_ids: vec!["stage-1".to_string()],
            }],
        });

        let mut item = sample_item("item-1", "stage-1", 5.0, ItemStatus::Active);
        item.payments_data.insert(
            "golomt".to_string(),
            PaymentEntry {
                amount: 500.0,
                extra: serde_json::Map::new(),
            },
        );
        item.payments_data.insert(
            "cash".to_string(),
            PaymentEntry {
                amount: 120.0,
                extra: serde_json::Map::new(),
            },
        );

        (hierarchy, directory, loyalty, item)
    }

    #[tokio::test]
    async fn score_campaign_subtracts_for_eligible_payment() {
        let (hierarchy, directory, loyalty, item) = scoring_fixture();
        let orchestrator = orchestrator(
            hierarchy,
            directory,
            StubPricingGateway::default(),
            loyalty.clone(),
        );

        orchestrator.do_score_campaign(&item).await.expect("score");
        assert_eq!(loyalty.subtract_calls(), 1);

        let request = loyalty.last_subtract().expect("subtract request");
        assert_eq!(request.owner_id, "customer-1");
        assert_eq!(request.campaign_id, "camp-1");
        assert_eq!(request.target.exclude_amount, 120.0);
    }

    #[tokio::test]
    async fn insufficient_score_aborts_with_payment_title() {
        let (hierarchy, directory, loyalty, item) = scoring_fixture();
        loyalty.reject_subtraction();
        let orchestrator = orchestrator(
            hierarchy,
            directory,
            StubPricingGateway::default(),
            loyalty.clone(),
        );

        let err = orchestrator
            .do_score_campaign(&item)
            .await
            .expect_err("must abort");
        assert!(err.to_string().contains("Golomt card"), "got: {err}");
        assert_eq!(loyalty.subtract_calls(), 0);
    }

    #[tokio::test]
    async fn score_campaign_skips_unconfigured_stage() {
        let (hierarchy, directory, loyalty, mut item) = scoring_fixture();
        hierarchy.seed_stage(sample_stage("stage-9", "pipe-1"));
        item.stage_id = "stage-9".to_string();
        let orchestrator = orchestrator(
            hierarchy,
            directory,
            StubPricingGateway::default(),
            loyalty.clone(),
        );

        orchestrator.do_score_campaign(&item).await.expect("score");
        assert_eq!(loyalty.subtract_calls(), 0);
    }

    #[tokio::test]
    async fn score_campaign_is_noop_without_payments() {
        let (hierarchy, directory, loyalty, mut item) = scoring_fixture();
        item.payments_data.clear();
        let orchestrator = orchestrator(
            hierarchy,
            directory,
            StubPricingGateway::default(),
            loyalty.clone(),
        );

        orchestrator.do_score_campaign(&item).await.expect("score");
        assert_eq!(loyalty.subtract_calls(), 0);
    }

    #[tokio::test]
    async fn score_campaign_is_noop_without_customer() {
        let (hierarchy, directory, loyalty, item) = scoring_fixture();
        directory.set_customer_ids(vec![]);
        let orchestrator = orchestrator(
            hierarchy,
            directory,
            StubPricingGateway::default(),
            loyalty.clone(),
        );

        orchestrator.do_score_campaign(&item).await.expect("score");
        assert_eq!(loyalty.subtract_calls(), 0);
    }

    #[tokio::test]
    async fn confirm_loyalties_swallows_failures() {
        let (hierarchy, directory, loyalty, mut item) = scoring_fixture();
        loyalty.fail_confirm();
        item.products_data = vec![ticked_line("l1", 10.0, 1.0)];
        let orchestrator = orchestrator(
            hierarchy,
            directory,
            StubPricingGateway::default(),
            loyalty.clone(),
        );

        orchestrator.confirm_loyalties(&item).await;
        assert_eq!(loyalty.confirm_calls(), 1);
    }
}
