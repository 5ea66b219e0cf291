use std::sync::Arc;

use anyhow::bail;
use metrics_exporter_prometheus::PrometheusHandle;

use pipeboard_domain::items::ItemKind;
use pipeboard_domain::lifecycle::ItemLifecycleEngine;
use pipeboard_domain::notifications::NotificationDispatcher;
use pipeboard_domain::ports::boards::BoardHierarchy;
use pipeboard_domain::ports::directory::CoreDirectory;
use pipeboard_domain::ports::events::PipelineEventPublisher;
use pipeboard_domain::ports::items::{ItemRegistration, ItemRegistry};
use pipeboard_domain::ports::loyalty::LoyaltyGateway;
use pipeboard_domain::ports::notify::NotificationGateway;
use pipeboard_domain::ports::pricing::PricingGateway;
use pipeboard_domain::pricing::PricingOrchestrator;
use pipeboard_domain::rpc::RpcTimeouts;
use pipeboard_infra::broker::PluginRpcClient;
use pipeboard_infra::config::AppConfig;
use pipeboard_infra::gateways::{
    LogNotificationGateway, LoopbackDirectory, NullLoyaltyGateway, NullPricingGateway,
    RpcCoreDirectory, RpcLoyaltyGateway, RpcNotificationGateway, RpcPricingGateway,
};
use pipeboard_infra::publisher::{InMemoryEventPublisher, RedisEventPublisher};
use pipeboard_infra::repositories::{
    InMemoryActivityLogStore, InMemoryBoardHierarchy, InMemoryItemRepository,
};

use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub engine: ItemLifecycleEngine,
    pub hierarchy: InMemoryBoardHierarchy,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let metrics = observability::install_metrics_recorder().ok();
        Self::with_metrics(config, metrics)
    }

    pub fn with_metrics(
        config: AppConfig,
        metrics: Option<PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        if config.data_backend != "memory" {
            bail!("unsupported data backend: {}", config.data_backend);
        }

        let timeouts = RpcTimeouts::from_millis(
            config.rpc_timeout_advisory_ms,
            config.rpc_timeout_mandatory_ms,
        );

        let hierarchy = InMemoryBoardHierarchy::new();
        let boards: Arc<dyn BoardHierarchy> = Arc::new(hierarchy.clone());

        let registry = ItemRegistry::new()
            .register(
                ItemKind::Deal,
                ItemRegistration {
                    repository: Arc::new(InMemoryItemRepository::new()),
                    archive_capability: "dealsArchive".to_string(),
                },
            )
            .register(
                ItemKind::Task,
                ItemRegistration {
                    repository: Arc::new(InMemoryItemRepository::new()),
                    archive_capability: "tasksArchive".to_string(),
                },
            )
            .register(
                ItemKind::Ticket,
                ItemRegistration {
                    repository: Arc::new(InMemoryItemRepository::new()),
                    archive_capability: "ticketsArchive".to_string(),
                },
            );

        let (directory, pricing_gateway, loyalty, notify_gateway): (
            Arc<dyn CoreDirectory>,
            Arc<dyn PricingGateway>,
            Arc<dyn LoyaltyGateway>,
            Arc<dyn NotificationGateway>,
        ) = if config.broker_enabled {
            let client = PluginRpcClient::from_config(&config);
            (
                Arc::new(RpcCoreDirectory::new(client.clone())),
                Arc::new(RpcPricingGateway::new(client.clone())),
                Arc::new(RpcLoyaltyGateway::new(client.clone())),
                Arc::new(RpcNotificationGateway::new(client)),
            )
        } else {
            (
                Arc::new(LoopbackDirectory),
                Arc::new(NullPricingGateway),
                Arc::new(NullLoyaltyGateway),
                Arc::new(LogNotificationGateway),
            )
        };

        let publisher: Arc<dyn PipelineEventPublisher> = match config.event_backend.as_str() {
            "redis" => Arc::new(RedisEventPublisher::connect(&config.redis_url)?),
            "memory" => Arc::new(InMemoryEventPublisher::new()),
            other => bail!("unsupported event backend: {other}"),
        };

        let pricing = PricingOrchestrator::new(
            boards.clone(),
            directory.clone(),
            pricing_gateway,
            loyalty,
            timeouts,
        );
        let engine = ItemLifecycleEngine::new(
            registry,
            boards,
            directory,
            Arc::new(InMemoryActivityLogStore::new()),
            NotificationDispatcher::new(notify_gateway, timeouts),
            publisher,
            pricing,
            timeouts,
        );

        Ok(Self {
            config,
            engine,
            hierarchy,
            metrics,
        })
    }
}
