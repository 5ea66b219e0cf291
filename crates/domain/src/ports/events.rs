use crate::DomainResult;
use crate::events::PipelineChangeEvent;
use crate::ports::BoxFuture;

/// Injected capability for real-time board updates; callers treat delivery
/// as advisory and never fail a mutation on publish errors.
pub trait PipelineEventPublisher: Send + Sync {
    fn publish(&self, event: &PipelineChangeEvent) -> BoxFuture<'_, DomainResult<()>>;
}
