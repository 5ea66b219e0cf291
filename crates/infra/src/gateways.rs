use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use pipeboard_domain::DomainResult;
use pipeboard_domain::error::DomainError;
use pipeboard_domain::items::ItemKind;
use pipeboard_domain::ports::BoxFuture;
use pipeboard_domain::ports::directory::CoreDirectory;
use pipeboard_domain::ports::loyalty::{
    CardBasedRule, LoyaltyConfirmRequest, LoyaltyGateway, NOT_ENOUGH_SCORE, ScoreCampaign,
    ScoreSubtractRequest,
};
use pipeboard_domain::ports::notify::{BoardNotification, MobilePush, NotificationGateway};
use pipeboard_domain::ports::pricing::{PriceMatch, PricingGateway, PricingRequest};

use crate::broker::{BrokerError, PluginRpcClient};

const SERVICE_CORE: &str = "core";
const SERVICE_PRICING: &str = "pricing";
const SERVICE_LOYALTIES: &str = "loyalties";
const SERVICE_NOTIFICATIONS: &str = "notifications";

/// Core directory and relation operations over the plugin bus.
#[derive(Clone)]
pub struct RpcCoreDirectory {
    client: PluginRpcClient,
}

impl RpcCoreDirectory {
    pub fn new(client: PluginRpcClient) -> Self {
        Self { client }
    }

    async fn related_ids(
        client: PluginRpcClient,
        kind: ItemKind,
        item_id: String,
        rel_type: &'static str,
    ) -> DomainResult<Vec<String>> {
        let data = client
            .request(
                SERVICE_CORE,
                "conformities.savedConformity",
                json!({
                    "mainType": kind.as_str(),
                    "mainTypeId": item_id,
                    "relTypes": [rel_type],
                }),
            )
            .await?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }
}

impl CoreDirectory for RpcCoreDirectory {
    fn prepare_custom_fields(&self, data: &Value) -> BoxFuture<'_, DomainResult<Value>> {
        let client = self.client.clone();
        let data = data.clone();
        Box::pin(async move {
            let cleaned = client
                .request(SERVICE_CORE, "fields.prepareCustomFieldsData", data)
                .await?;
            Ok(cleaned)
        })
    }

    fn customer_ids(
        &self,
        kind: ItemKind,
        item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let client = self.client.clone();
        let item_id = item_id.to_string();
        Box::pin(Self::related_ids(client, kind, item_id, "customer"))
    }

    fn company_ids(
        &self,
        kind: ItemKind,
        item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let client = self.client.clone();
        let item_id = item_id.to_string();
        Box::pin(Self::related_ids(client, kind, item_id, "company"))
    }

    fn create_relations(
        &self,
        kind: ItemKind,
        item_id: &str,
        customer_ids: &[String],
        company_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let payload = json!({
            "mainType": kind.as_str(),
            "mainTypeId": item_id,
            "customerIds": customer_ids,
            "companyIds": company_ids,
        });
        Box::pin(async move {
            client
                .request(SERVICE_CORE, "conformities.addConformities", payload)
                .await?;
            Ok(())
        })
    }

    fn clone_relations(
        &self,
        kind: ItemKind,
        source_item_id: &str,
        target_item_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let payload = json!({
            "contentType": kind.as_str(),
            "contentTypeId": source_item_id,
            "targetContentId": target_item_id,
        });
        Box::pin(async move {
            client
                .request(SERVICE_CORE, "relations.clone", payload)
                .await?;
            Ok(())
        })
    }

    fn destroy_relations(&self, kind: ItemKind, item_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let payload = json!({
            "mainType": kind.as_str(),
            "mainTypeId": item_id,
        });
        Box::pin(async move {
            client
                .request(SERVICE_CORE, "conformities.removeConformities", payload)
                .await?;
            Ok(())
        })
    }

    fn can(&self, capability: &str, user_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let client = self.client.clone();
        let payload = json!({
            "action": capability,
            "userId": user_id,
        });
        Box::pin(async move {
            let data = client
                .request(SERVICE_CORE, "permissions.can", payload)
                .await?;
            Ok(data.as_bool().unwrap_or(false))
        })
    }
}

#[derive(Debug, Deserialize)]
struct WirePriceMatch {
    value: f64,
    #[serde(default, rename = "bonusProducts")]
    bonus_products: Vec<String>,
}

#[derive(Clone)]
pub struct RpcPricingGateway {
    client: PluginRpcClient,
}

impl RpcPricingGateway {
    pub fn new(client: PluginRpcClient) -> Self {
        Self { client }
    }
}

impl PricingGateway for RpcPricingGateway {
    fn check_pricing(
        &self,
        request: &PricingRequest,
    ) -> BoxFuture<'_, DomainResult<HashMap<String, PriceMatch>>> {
        let client = self.client.clone();
        let payload = json!({
            "prioritizeRule": "exclude",
            "totalAmount": request.total_amount,
            "departmentId": request.department_id,
            "branchId": request.branch_id,
            "pipelineId": request.pipeline_id,
            "products": request.products.iter().map(|line| json!({
                "itemId": line.item_id,
                "productId": line.product_id,
                "quantity": line.quantity,
                "price": line.price,
            })).collect::<Vec<_>>(),
        });
        Box::pin(async move {
            let data = client
                .request(SERVICE_PRICING, "checkPricing", payload)
                .await?;
            let wire: HashMap<String, WirePriceMatch> = serde_json::from_value(data)
                .map_err(|err| DomainError::Upstream(format!("bad pricing response: {err}")))?;
            Ok(wire
                .into_iter()
                .map(|(line_id, price_match)| {
                    (
                        line_id,
                        PriceMatch {
                            value: price_match.value,
                            bonus_products: price_match.bonus_products,
                        },
                    )
                })
                .collect())
        })
    }
}

#[derive(Clone)]
pub struct RpcLoyaltyGateway {
    client: PluginRpcClient,
}

impl RpcLoyaltyGateway {
    pub fn new(client: PluginRpcClient) -> Self {
        Self { client }
    }
}

fn subtract_payload(request: &ScoreSubtractRequest) -> Value {
    json!({
        "ownerType": request.owner_type,
        "ownerId": request.owner_id,
        "campaignId": request.campaign_id,
        "target": {
            "paymentsData": request.target.payments_data,
            "totalAmount": request.target.total_amount,
            "excludeAmount": request.target.exclude_amount,
        },
        "targetId": request.target_id,
    })
}

fn parse_campaign(data: Value) -> Option<ScoreCampaign> {
    let campaign_id = data.get("_id")?.as_str()?.to_string();
    let card_based_rules = data
        .get("additionalConfig")
        .and_then(|config| config.get("cardBasedRule"))
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .map(|rule| CardBasedRule {
                    stage_ids: rule
                        .get("stageIds")
                        .and_then(Value::as_array)
                        .map(|ids| {
                            ids.iter()
                                .filter_map(Value::as_str)
                                .map(ToString::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(ScoreCampaign {
        campaign_id,
        card_based_rules,
    })
}

impl LoyaltyGateway for RpcLoyaltyGateway {
    fn find_score_campaign(
        &self,
        campaign_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ScoreCampaign>>> {
        let client = self.client.clone();
        let payload = json!({ "_id": campaign_id });
        Box::pin(async move {
            let data = client
                .request(SERVICE_LOYALTIES, "scoreCampaign.findOne", payload)
                .await?;
            Ok(parse_campaign(data))
        })
    }

    fn check_score_available(
        &self,
        request: &ScoreSubtractRequest,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let payload = subtract_payload(request);
        Box::pin(async move {
            match client
                .request(SERVICE_LOYALTIES, "checkScoreAviableSubtract", payload)
                .await
            {
                Ok(_) => Ok(()),
                Err(BrokerError::Upstream(message)) if message.contains(NOT_ENOUGH_SCORE) => {
                    Err(DomainError::Precondition(message))
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    fn subtract_score(&self, request: &ScoreSubtractRequest) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let mut payload = subtract_payload(request);
        payload["actionMethod"] = json!("subtract");
        payload["serviceName"] = json!("sales");
        Box::pin(async move {
            client
                .request(SERVICE_LOYALTIES, "doScoreCampaign", payload)
                .await?;
            Ok(())
        })
    }

    fn confirm(&self, request: &LoyaltyConfirmRequest) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let payload = json!({
            "checkInfo": {},
            "extraInfo": {
                "ownerType": request.owner_type,
                "ownerId": request.owner_id,
                "targetType": request.target_type,
                "targetId": request.target_id,
            },
        });
        Box::pin(async move {
            client
                .request(SERVICE_LOYALTIES, "confirmLoyalties", payload)
                .await?;
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct RpcNotificationGateway {
    client: PluginRpcClient,
}

impl RpcNotificationGateway {
    pub fn new(client: PluginRpcClient) -> Self {
        Self { client }
    }
}

impl NotificationGateway for RpcNotificationGateway {
    fn send_notification(
        &self,
        notification: &BoardNotification,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let payload = serde_json::to_value(notification).unwrap_or_default();
        Box::pin(async move {
            client
                .request(SERVICE_NOTIFICATIONS, "send", payload)
                .await?;
            Ok(())
        })
    }

    fn send_mobile_push(&self, push: &MobilePush) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let payload = json!({
            "title": push.title,
            "body": push.body,
            "receivers": push.receiver_ids,
            "data": push.data,
        });
        Box::pin(async move {
            client
                .request(SERVICE_CORE, "sendMobileNotification", payload)
                .await?;
            Ok(())
        })
    }

    fn batch_update_links(
        &self,
        content_type: ItemKind,
        content_type_id: &str,
        link: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let payload = json!({
            "selector": {
                "contentType": content_type.as_str(),
                "contentTypeId": content_type_id,
            },
            "modifier": { "$set": { "link": link } },
        });
        Box::pin(async move {
            client
                .request(SERVICE_NOTIFICATIONS, "batchUpdate", payload)
                .await?;
            Ok(())
        })
    }
}

/// Stand-ins for the memory backend: no sibling services to talk to, so
/// directory lookups come back empty and capability checks allow.
#[derive(Clone, Default)]
pub struct LoopbackDirectory;

impl CoreDirectory for LoopbackDirectory {
    fn prepare_custom_fields(&self, data: &Value) -> BoxFuture<'_, DomainResult<Value>> {
        let data = data.clone();
        Box::pin(async move { Ok(data) })
    }

    fn customer_ids(
        &self,
        _kind: ItemKind,
        _item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn company_ids(
        &self,
        _kind: ItemKind,
        _item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn create_relations(
        &self,
        _kind: ItemKind,
        _item_id: &str,
        _customer_ids: &[String],
        _company_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn clone_relations(
        &self,
        _kind: ItemKind,
        _source_item_id: &str,
        _target_item_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn destroy_relations(&self, _kind: ItemKind, _item_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn can(&self, _capability: &str, _user_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        Box::pin(async { Ok(true) })
    }
}

#[derive(Clone, Default)]
pub struct NullPricingGateway;

impl PricingGateway for NullPricingGateway {
    fn check_pricing(
        &self,
        _request: &PricingRequest,
    ) -> BoxFuture<'_, DomainResult<HashMap<String, PriceMatch>>> {
        Box::pin(async { Ok(HashMap::new()) })
    }
}

#[derive(Clone, Default)]
pub struct NullLoyaltyGateway;

impl LoyaltyGateway for NullLoyaltyGateway {
    fn find_score_campaign(
        &self,
        _campaign_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ScoreCampaign>>> {
        Box::pin(async { Ok(None) })
    }

    fn check_score_available(
        &self,
        _request: &ScoreSubtractRequest,
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn subtract_score(&self, _request: &ScoreSubtractRequest) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn confirm(&self, _request: &LoyaltyConfirmRequest) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Logs deliveries instead of sending them; keeps the memory backend
/// observable without a notifications service.
#[derive(Clone, Default)]
pub struct LogNotificationGateway;

impl NotificationGateway for LogNotificationGateway {
    fn send_notification(
        &self,
        notification: &BoardNotification,
    ) -> BoxFuture<'_, DomainResult<()>> {
        info!(
            notification_type = %notification.notification_type,
            item_id = %notification.item_id,
            recipients = notification.recipient_ids.len(),
            "notification delivered to log sink"
        );
        metrics::counter!("pipeboard_notifications_sent_total").increment(1);
        Box::pin(async { Ok(()) })
    }

    fn send_mobile_push(&self, push: &MobilePush) -> BoxFuture<'_, DomainResult<()>> {
        info!(
            title = %push.title,
            receivers = push.receiver_ids.len(),
            "mobile push delivered to log sink"
        );
        metrics::counter!("pipeboard_mobile_pushes_sent_total").increment(1);
        Box::pin(async { Ok(()) })
    }

    fn batch_update_links(
        &self,
        content_type: ItemKind,
        content_type_id: &str,
        link: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        info!(
            content_type = content_type.as_str(),
            content_type_id, link, "notification relink delivered to log sink"
        );
        Box::pin(async { Ok(()) })
    }
}
