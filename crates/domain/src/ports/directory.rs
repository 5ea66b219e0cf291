use crate::DomainResult;
use crate::items::ItemKind;
use crate::ports::BoxFuture;

/// Core directory and cross-entity relation operations served by the core
/// plugin over the message bus.
pub trait CoreDirectory: Send + Sync {
    /// Cleans raw custom field values into their persisted shape.
    fn prepare_custom_fields(
        &self,
        data: &serde_json::Value,
    ) -> BoxFuture<'_, DomainResult<serde_json::Value>>;

    fn customer_ids(&self, kind: ItemKind, item_id: &str)
    -> BoxFuture<'_, DomainResult<Vec<String>>>;

    fn company_ids(&self, kind: ItemKind, item_id: &str)
    -> BoxFuture<'_, DomainResult<Vec<String>>>;

    fn create_relations(
        &self,
        kind: ItemKind,
        item_id: &str,
        customer_ids: &[String],
        company_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<()>>;

    /// Regenerates checklists and conformities from a source item onto a
    /// freshly copied one.
    fn clone_relations(
        &self,
        kind: ItemKind,
        source_item_id: &str,
        target_item_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn destroy_relations(&self, kind: ItemKind, item_id: &str) -> BoxFuture<'_, DomainResult<()>>;

    fn can(&self, capability: &str, user_id: &str) -> BoxFuture<'_, DomainResult<bool>>;
}
