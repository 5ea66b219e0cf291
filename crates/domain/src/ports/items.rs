use std::collections::HashMap;
use std::sync::Arc;

use crate::DomainResult;
use crate::error::DomainError;
use crate::items::{BoardItem, ItemKind, ItemPatch};
use crate::ports::BoxFuture;

pub trait ItemRepository: Send + Sync {
    fn insert(&self, item: &BoardItem) -> BoxFuture<'_, DomainResult<BoardItem>>;

    fn get(&self, item_id: &str) -> BoxFuture<'_, DomainResult<Option<BoardItem>>>;

    /// Applies the patch as one atomic update and returns the updated item.
    fn apply_patch(
        &self,
        item_id: &str,
        patch: &ItemPatch,
    ) -> BoxFuture<'_, DomainResult<BoardItem>>;

    fn set_order(&self, item_id: &str, order: f64) -> BoxFuture<'_, DomainResult<BoardItem>>;

    fn delete(&self, item_id: &str) -> BoxFuture<'_, DomainResult<()>>;

    fn find_in_stage(&self, stage_id: &str) -> BoxFuture<'_, DomainResult<Vec<BoardItem>>>;

    /// Smallest order strictly greater than `floor` within the stage, over
    /// every status.
    fn min_order_above(
        &self,
        stage_id: &str,
        floor: f64,
    ) -> BoxFuture<'_, DomainResult<Option<f64>>>;

    /// Active item with the largest order strictly smaller than `order`.
    fn nearest_active_above(
        &self,
        stage_id: &str,
        order: f64,
    ) -> BoxFuture<'_, DomainResult<Option<BoardItem>>>;

    /// Flips every non-archived item in the stage to archived in a single
    /// persistence call; returns the items as they were before the flip.
    fn archive_stage(&self, stage_id: &str) -> BoxFuture<'_, DomainResult<Vec<BoardItem>>>;
}

/// Per-kind wiring: the backing repository plus the capability gating the
/// archive flow for that kind.
#[derive(Clone)]
pub struct ItemRegistration {
    pub repository: Arc<dyn ItemRepository>,
    pub archive_capability: String,
}

/// Maps the runtime type tag of a board item to its registration.
#[derive(Clone, Default)]
pub struct ItemRegistry {
    entries: HashMap<ItemKind, ItemRegistration>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: ItemKind, registration: ItemRegistration) -> Self {
        self.entries.insert(kind, registration);
        self
    }

    pub fn get(&self, kind: ItemKind) -> DomainResult<&ItemRegistration> {
        self.entries
            .get(&kind)
            .ok_or_else(|| DomainError::NotFound(format!("{} registration", kind.as_str())))
    }

    pub fn repository(&self, kind: ItemKind) -> DomainResult<Arc<dyn ItemRepository>> {
        Ok(self.get(kind)?.repository.clone())
    }
}
