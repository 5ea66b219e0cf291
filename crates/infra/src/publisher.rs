use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;

use pipeboard_domain::DomainResult;
use pipeboard_domain::error::DomainError;
use pipeboard_domain::events::PipelineChangeEvent;
use pipeboard_domain::ports::BoxFuture;
use pipeboard_domain::ports::events::PipelineEventPublisher;

/// Publishes pipeline change events on redis pub/sub; real-time board UIs
/// subscribe to the per-pipeline topic.
#[derive(Clone)]
pub struct RedisEventPublisher {
    client: redis::Client,
}

impl RedisEventPublisher {
    pub fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

impl PipelineEventPublisher for RedisEventPublisher {
    fn publish(&self, event: &PipelineChangeEvent) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        let topic = event.topic();
        let payload = serde_json::to_string(event);
        Box::pin(async move {
            let payload = payload
                .map_err(|err| DomainError::Upstream(format!("event serialization: {err}")))?;
            let mut connection = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|err| DomainError::Upstream(format!("redis connect: {err}")))?;
            let _: () = redis::cmd("PUBLISH")
                .arg(&topic)
                .arg(payload)
                .query_async(&mut connection)
                .await
                .map_err(|err| DomainError::Upstream(format!("redis publish: {err}")))?;
            counter!("pipeboard_pipeline_events_published_total").increment(1);
            Ok(())
        })
    }
}

/// Keeps published events in memory; the dev backend and tests read them
/// back instead of subscribing anywhere.
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<Mutex<Vec<PipelineChangeEvent>>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<PipelineChangeEvent> {
        self.events.lock().await.clone()
    }
}

impl PipelineEventPublisher for InMemoryEventPublisher {
    fn publish(&self, event: &PipelineChangeEvent) -> BoxFuture<'_, DomainResult<()>> {
        let events = self.events.clone();
        let event = event.clone();
        Box::pin(async move {
            events.lock().await.push(event);
            counter!("pipeboard_pipeline_events_published_total").increment(1);
            Ok(())
        })
    }
}
