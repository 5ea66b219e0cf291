use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::RwLock;

use pipeboard_domain::DomainResult;
use pipeboard_domain::activity::ActivityEvent;
use pipeboard_domain::boards::{Board, Pipeline, Stage};
use pipeboard_domain::error::DomainError;
use pipeboard_domain::items::{BoardItem, ItemPatch, ItemStatus};
use pipeboard_domain::ports::BoxFuture;
use pipeboard_domain::ports::activity::ActivityLogStore;
use pipeboard_domain::ports::boards::BoardHierarchy;
use pipeboard_domain::ports::items::ItemRepository;

/// Dev/test item store. One map per item kind; the registry wires a
/// separate instance for each registered kind.
#[derive(Clone, Default)]
pub struct InMemoryItemRepository {
    items: Arc<RwLock<HashMap<String, BoardItem>>>,
}

impl InMemoryItemRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemRepository for InMemoryItemRepository {
    fn insert(&self, item: &BoardItem) -> BoxFuture<'_, DomainResult<BoardItem>> {
        let item = item.clone();
        let items = self.items.clone();
        Box::pin(async move {
            let mut items = items.write().await;
            if items.contains_key(&item.item_id) {
                return Err(DomainError::Conflict);
            }
            items.insert(item.item_id.clone(), item.clone());
            counter!("pipeboard_items_inserted_total").increment(1);
            Ok(item)
        })
    }

    fn get(&self, item_id: &str) -> BoxFuture<'_, DomainResult<Option<BoardItem>>> {
        let item_id = item_id.to_string();
        let items = self.items.clone();
        Box::pin(async move { Ok(items.read().await.get(&item_id).cloned()) })
    }

    fn apply_patch(
        &self,
        item_id: &str,
        patch: &ItemPatch,
    ) -> BoxFuture<'_, DomainResult<BoardItem>> {
        let item_id = item_id.to_string();
        let patch = patch.clone();
        let items = self.items.clone();
        Box::pin(async move {
            let mut items = items.write().await;
            let item = items
                .get_mut(&item_id)
                .ok_or_else(|| DomainError::NotFound(format!("item {item_id}")))?;
            patch.apply_to(item);
            Ok(item.clone())
        })
    }

    fn set_order(&self, item_id: &str, order: f64) -> BoxFuture<'_, DomainResult<BoardItem>> {
        let item_id = item_id.to_string();
        let items = self.items.clone();
        Box::pin(async move {
            let mut items = items.write().await;
            let item = items
                .get_mut(&item_id)
                .ok_or_else(|| DomainError::NotFound(format!("item {item_id}")))?;
            item.order = order;
            Ok(item.clone())
        })
    }

    fn delete(&self, item_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let item_id = item_id.to_string();
        let items = self.items.clone();
        Box::pin(async move {
            items
                .write()
                .await
                .remove(&item_id)
                .map(|_| ())
                .ok_or_else(|| DomainError::NotFound(format!("item {item_id}")))
        })
    }

    fn find_in_stage(&self, stage_id: &str) -> BoxFuture<'_, DomainResult<Vec<BoardItem>>> {
        let stage_id = stage_id.to_string();
        let items = self.items.clone();
        Box::pin(async move {
            let mut rows: Vec<_> = items
                .read()
                .await
                .values()
                .filter(|item| item.stage_id == stage_id)
                .cloned()
                .collect();
            rows.sort_by(|left, right| left.order.total_cmp(&right.order));
            Ok(rows)
        })
    }

    fn min_order_above(
        &self,
        stage_id: &str,
        floor: f64,
    ) -> BoxFuture<'_, DomainResult<Option<f64>>> {
        let stage_id = stage_id.to_string();
        let items = self.items.clone();
        Box::pin(async move {
            Ok(items
                .read()
                .await
                .values()
                .filter(|item| item.stage_id == stage_id && item.order > floor)
                .map(|item| item.order)
                .min_by(f64::total_cmp))
        })
    }

    fn nearest_active_above(
        &self,
        stage_id: &str,
        order: f64,
    ) -> BoxFuture<'_, DomainResult<Option<BoardItem>>> {
        let stage_id = stage_id.to_string();
        let items = self.items.clone();
        Box::pin(async move {
            Ok(items
                .read()
                .await
                .values()
                .filter(|item| {
                    item.stage_id == stage_id
                        && item.status == ItemStatus::Active
                        && item.order < order
                })
                .max_by(|left, right| left.order.total_cmp(&right.order))
                .cloned())
        })
    }

    fn archive_stage(&self, stage_id: &str) -> BoxFuture<'_, DomainResult<Vec<BoardItem>>> {
        let stage_id = stage_id.to_string();
        let items = self.items.clone();
        Box::pin(async move {
            let mut items = items.write().await;
            let mut flipped = Vec::new();
            for item in items.values_mut() {
                if item.stage_id == stage_id && item.status != ItemStatus::Archived {
                    flipped.push(item.clone());
                    item.status = ItemStatus::Archived;
                }
            }
            flipped.sort_by(|left, right| left.order.total_cmp(&right.order));
            counter!("pipeboard_stage_archives_total").increment(1);
            Ok(flipped)
        })
    }
}

/// Seedable read model of the board containment hierarchy.
#[derive(Clone, Default)]
pub struct InMemoryBoardHierarchy {
    stages: Arc<std::sync::RwLock<HashMap<String, Stage>>>,
    pipelines: Arc<std::sync::RwLock<HashMap<String, Pipeline>>>,
    boards: Arc<std::sync::RwLock<HashMap<String, Board>>>,
}

impl InMemoryBoardHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_board(&self, board: Board) {
        self.boards
            .write()
            .expect("board map")
            .insert(board.board_id.clone(), board);
    }

    pub fn upsert_pipeline(&self, pipeline: Pipeline) {
        self.pipelines
            .write()
            .expect("pipeline map")
            .insert(pipeline.pipeline_id.clone(), pipeline);
    }

    pub fn upsert_stage(&self, stage: Stage) {
        self.stages
            .write()
            .expect("stage map")
            .insert(stage.stage_id.clone(), stage);
    }
}

impl BoardHierarchy for InMemoryBoardHierarchy {
    fn get_stage(&self, stage_id: &str) -> BoxFuture<'_, DomainResult<Stage>> {
        let found = self.stages.read().expect("stage map").get(stage_id).cloned();
        let stage_id = stage_id.to_string();
        Box::pin(async move {
            found.ok_or_else(|| DomainError::NotFound(format!("stage {stage_id}")))
        })
    }

    fn get_pipeline(&self, pipeline_id: &str) -> BoxFuture<'_, DomainResult<Pipeline>> {
        let found = self
            .pipelines
            .read()
            .expect("pipeline map")
            .get(pipeline_id)
            .cloned();
        let pipeline_id = pipeline_id.to_string();
        Box::pin(async move {
            found.ok_or_else(|| DomainError::NotFound(format!("pipeline {pipeline_id}")))
        })
    }

    fn get_board(&self, board_id: &str) -> BoxFuture<'_, DomainResult<Board>> {
        let found = self.boards.read().expect("board map").get(board_id).cloned();
        let board_id = board_id.to_string();
        Box::pin(async move {
            found.ok_or_else(|| DomainError::NotFound(format!("board {board_id}")))
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryActivityLogStore {
    entries: Arc<RwLock<Vec<ActivityEvent>>>,
}

impl InMemoryActivityLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityLogStore for InMemoryActivityLogStore {
    fn append(&self, event: &ActivityEvent) -> BoxFuture<'_, DomainResult<()>> {
        let event = event.clone();
        let entries = self.entries.clone();
        Box::pin(async move {
            entries.write().await.push(event);
            Ok(())
        })
    }

    fn list_by_item(&self, item_id: &str) -> BoxFuture<'_, DomainResult<Vec<ActivityEvent>>> {
        let item_id = item_id.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            Ok(entries
                .read()
                .await
                .iter()
                .filter(|event| event.item_id == item_id)
                .cloned()
                .collect())
        })
    }
}
