use crate::DomainResult;
use crate::activity::ActivityEvent;
use crate::ports::BoxFuture;

pub trait ActivityLogStore: Send + Sync {
    fn append(&self, event: &ActivityEvent) -> BoxFuture<'_, DomainResult<()>>;

    fn list_by_item(&self, item_id: &str) -> BoxFuture<'_, DomainResult<Vec<ActivityEvent>>>;
}
