use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::DomainResult;
use crate::activity::{ActivityAction, ActivityEvent};
use crate::boards::Stage;
use crate::error::DomainError;
use crate::events::PipelineChangeEvent;
use crate::identity::ActorIdentity;
use crate::items::{
    BoardItem, ItemCreate, ItemDragInput, ItemKind, ItemPatch, ItemStatus,
    assigned_users_from_lines, diff_user_ids, scrub_ids,
};
use crate::notifications::{BoardNotificationParams, NotificationDispatcher};
use crate::ordering;
use crate::ports::activity::ActivityLogStore;
use crate::ports::boards::BoardHierarchy;
use crate::ports::directory::CoreDirectory;
use crate::ports::events::PipelineEventPublisher;
use crate::ports::items::ItemRegistry;
use crate::ports::notify::NotificationEventKind;
use crate::pricing::PricingOrchestrator;
use crate::rpc::{self, RpcTimeouts};
use crate::util::{now_ms, uuid_v7_without_dashes};

/// Orchestrates the item state machine: every lifecycle entry point reads
/// the item and its stage context, applies the persistence mutation, then
/// fans out side effects (activity log, notifications, score/pricing) and
/// publishes change events on the owning pipeline topics.
///
/// Side effects downstream of the committed mutation are advisory; the
/// caller still sees success when one of them fails. Permission checks and
/// the score-campaign precondition run before (or abort) the mutation.
#[derive(Clone)]
pub struct ItemLifecycleEngine {
    registry: ItemRegistry,
    boards: Arc<dyn BoardHierarchy>,
    directory: Arc<dyn CoreDirectory>,
    activity: Arc<dyn ActivityLogStore>,
    notifications: NotificationDispatcher,
    publisher: Arc<dyn PipelineEventPublisher>,
    pricing: PricingOrchestrator,
    timeouts: RpcTimeouts,
}

impl ItemLifecycleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: ItemRegistry,
        boards: Arc<dyn BoardHierarchy>,
        directory: Arc<dyn CoreDirectory>,
        activity: Arc<dyn ActivityLogStore>,
        notifications: NotificationDispatcher,
        publisher: Arc<dyn PipelineEventPublisher>,
        pricing: PricingOrchestrator,
        timeouts: RpcTimeouts,
    ) -> Self {
        Self {
            registry,
            boards,
            directory,
            activity,
            notifications,
            publisher,
            pricing,
            timeouts,
        }
    }

    pub fn pricing(&self) -> &PricingOrchestrator {
        &self.pricing
    }

    pub async fn get_item(&self, kind: ItemKind, item_id: &str) -> DomainResult<BoardItem> {
        let repository = self.registry.repository(kind)?;
        repository
            .get(item_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("{} {item_id}", kind.as_str())))
    }

    pub async fn list_stage_items(
        &self,
        kind: ItemKind,
        stage_id: &str,
    ) -> DomainResult<Vec<BoardItem>> {
        self.registry
            .repository(kind)?
            .find_in_stage(stage_id)
            .await
    }

    pub async fn list_item_activity(
        &self,
        item_id: &str,
    ) -> DomainResult<Vec<ActivityEvent>> {
        self.activity.list_by_item(item_id).await
    }

    pub async fn add(
        &self,
        actor: &ActorIdentity,
        kind: ItemKind,
        input: ItemCreate,
        process_id: &str,
    ) -> DomainResult<BoardItem> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::Validation("name is required".into()));
        }

        let repository = self.registry.repository(kind)?;
        let stage = self.boards.get_stage(&input.stage_id).await?;
        let order = ordering::compute_order(
            repository.as_ref(),
            &input.stage_id,
            input.above_item_id.as_deref(),
        )
        .await?;

        let custom_fields_data = match &input.custom_fields_data {
            Some(data) => Some(
                rpc::advisory(
                    "core.prepareCustomFieldsData",
                    self.timeouts.advisory,
                    serde_json::Value::Array(vec![]),
                    self.directory.prepare_custom_fields(data),
                )
                .await,
            ),
            None => None,
        };

        let now = now_ms();
        let item = BoardItem {
            item_id: uuid_v7_without_dashes(),
            kind,
            name,
            stage_id: input.stage_id.clone(),
            initial_stage_id: input.stage_id.clone(),
            order,
            status: ItemStatus::Active,
            created_by: actor.user_id.clone(),
            modified_by: None,
            assigned_user_ids: scrub_ids(&input.assigned_user_ids),
            watched_user_ids: vec![actor.user_id.clone()],
            label_ids: scrub_ids(&input.label_ids),
            tag_ids: scrub_ids(&input.tag_ids),
            branch_ids: input.branch_ids.clone(),
            department_ids: input.department_ids.clone(),
            source_conversation_ids: vec![],
            custom_fields_data,
            products_data: input.products_data.clone(),
            payments_data: input.payments_data.clone(),
            start_date_ms: input.start_date_ms,
            close_date_ms: input.close_date_ms,
            stage_changed_at_ms: None,
            created_at_ms: now,
            modified_at_ms: now,
        };
        let item = repository.insert(&item).await?;

        if !input.customer_ids.is_empty() || !input.company_ids.is_empty() {
            rpc::mandatory(
                "core.addConformities",
                self.timeouts.mandatory,
                self.directory.create_relations(
                    kind,
                    &item.item_id,
                    &input.customer_ids,
                    &input.company_ids,
                ),
            )
            .await?;
        }

        let pipeline = self.boards.get_pipeline(&stage.pipeline_id).await?;
        self.notifications
            .notify(BoardNotificationParams {
                item: item.clone(),
                actor: actor.clone(),
                kind: NotificationEventKind::Add,
                action: format!("invited you to the {}", pipeline.name),
                content: format!("'{}'.", item.name),
                invited_user_ids: vec![],
                removed_user_ids: vec![],
            })
            .await;
        self.log(ActivityEvent::new(
            kind,
            &item.item_id,
            ActivityAction::Create,
            &actor.user_id,
            json!({ "name": item.name, "stageId": item.stage_id }),
        ))
        .await;
        self.publish(PipelineChangeEvent::item_add(
            &stage.pipeline_id,
            process_id,
            &item,
            input.above_item_id.as_deref(),
            &stage.stage_id,
        ))
        .await;

        Ok(item)
    }

    pub async fn edit(
        &self,
        actor: &ActorIdentity,
        kind: ItemKind,
        item_id: &str,
        patch: ItemPatch,
        process_id: &str,
    ) -> DomainResult<BoardItem> {
        let registration = self.registry.get(kind)?;
        let repository = registration.repository.clone();
        let old = repository
            .get(item_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("{} {item_id}", kind.as_str())))?;
        let stage = self.boards.get_stage(&old.stage_id).await?;

        if !patch.is_status_only() && !stage.allows_edit(&actor.user_id) {
            return Err(DomainError::PermissionDenied);
        }
        if patch.status == Some(ItemStatus::Archived) && old.status == ItemStatus::Active {
            let allowed = rpc::mandatory(
                "core.permissions.can",
                self.timeouts.mandatory,
                self.directory
                    .can(&registration.archive_capability, &actor.user_id),
            )
            .await?;
            if !allowed {
                return Err(DomainError::PermissionDenied);
            }
        }

        let mut patch = patch;
        if let Some(data) = patch.custom_fields_data.take() {
            patch.custom_fields_data = Some(
                rpc::mandatory(
                    "core.prepareCustomFieldsData",
                    self.timeouts.mandatory,
                    self.directory.prepare_custom_fields(&data),
                )
                .await?,
            );
        }
        if patch.assigned_user_ids.is_none() {
            if let Some(products) = &patch.products_data {
                let line_assignees: Vec<String> = products
                    .iter()
                    .filter_map(|line| line.assign_user_id.clone())
                    .collect();
                let (next, diff) = assigned_users_from_lines(
                    &old.assigned_user_ids,
                    &line_assignees,
                    &old.products_data,
                );
                if !diff.is_empty() {
                    patch.assigned_user_ids = Some(next);
                }
            }
        }
        patch.modified_by = Some(actor.user_id.clone());

        let updated = repository.apply_patch(item_id, &patch).await?;

        if let Some(new_status) = patch.status {
            if new_status != old.status {
                let label = match new_status {
                    ItemStatus::Active => "activated",
                    ItemStatus::Archived => "archived",
                };
                self.log(ActivityEvent::new(
                    kind,
                    item_id,
                    ActivityAction::Archive,
                    &actor.user_id,
                    json!(label),
                ))
                .await;
                self.change_status(kind, &updated, new_status, process_id, &stage)
                    .await?;
            }
        }

        let mut invited = Vec::new();
        let mut removed = Vec::new();
        if let Some(new_assigned) = &patch.assigned_user_ids {
            let diff = diff_user_ids(&old.assigned_user_ids, new_assigned);
            if !diff.is_empty() {
                self.log(ActivityEvent::new(
                    kind,
                    item_id,
                    ActivityAction::Assignee,
                    &actor.user_id,
                    json!({
                        "addedUserIds": diff.added,
                        "removedUserIds": diff.removed,
                    }),
                ))
                .await;
                invited = diff.added;
                removed = diff.removed;
            }
        }

        let had_assignment_delta = !invited.is_empty() || !removed.is_empty();
        self.notifications
            .notify(BoardNotificationParams {
                item: updated.clone(),
                actor: actor.clone(),
                kind: NotificationEventKind::Edit,
                action: String::new(),
                content: String::new(),
                invited_user_ids: invited,
                removed_user_ids: removed,
            })
            .await;
        if !had_assignment_delta {
            self.notifications
                .push_to_assignees(
                    &updated,
                    &updated.name,
                    &format!("{} has updated", actor.username),
                )
                .await;
        }

        self.log(ActivityEvent::new(
            kind,
            item_id,
            ActivityAction::Update,
            &actor.user_id,
            serde_json::to_value(&patch).unwrap_or_default(),
        ))
        .await;

        let new_stage = self.boards.get_stage(&updated.stage_id).await?;
        if new_stage.pipeline_id != stage.pipeline_id {
            // Board UIs on each pipeline need their own view of the change.
            self.publish(PipelineChangeEvent::item_remove(
                &stage.pipeline_id,
                process_id,
                &old,
                &stage.stage_id,
            ))
            .await;
            self.publish(PipelineChangeEvent::item_add(
                &new_stage.pipeline_id,
                process_id,
                &updated,
                None,
                &new_stage.stage_id,
            ))
            .await;
        } else {
            self.publish(PipelineChangeEvent::item_update(
                &stage.pipeline_id,
                process_id,
                &updated,
            ))
            .await;
        }

        self.pricing.do_score_campaign(&updated).await?;

        if old.stage_id != updated.stage_id {
            let (action, content) = self.move_item(actor, kind, &old, &updated.stage_id).await?;
            self.notifications
                .notify(BoardNotificationParams {
                    item: updated.clone(),
                    actor: actor.clone(),
                    kind: NotificationEventKind::Change,
                    action,
                    content,
                    invited_user_ids: vec![],
                    removed_user_ids: vec![],
                })
                .await;
        }

        Ok(updated)
    }

    /// Drag move: stage and order change together in one update. Crossing
    /// stages re-checks move permission on both ends and consumes loyalty
    /// score against the projected item before anything is committed.
    pub async fn change(
        &self,
        actor: &ActorIdentity,
        kind: ItemKind,
        input: ItemDragInput,
    ) -> DomainResult<BoardItem> {
        let repository = self.registry.repository(kind)?;
        let item = repository
            .get(&input.item_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("{} {}", kind.as_str(), input.item_id)))?;
        let stage = self.boards.get_stage(&item.stage_id).await?;
        let order = ordering::compute_order(
            repository.as_ref(),
            &input.destination_stage_id,
            input.above_item_id.as_deref(),
        )
        .await?;

        let mut patch = ItemPatch {
            stage_id: Some(input.destination_stage_id.clone()),
            order: Some(order),
            modified_by: Some(actor.user_id.clone()),
            ..ItemPatch::default()
        };

        let crossing_stages = item.stage_id != input.destination_stage_id;
        if crossing_stages {
            if !stage.allows_move(&actor.user_id) {
                return Err(DomainError::PermissionDenied);
            }
            let destination_stage = self.boards.get_stage(&input.destination_stage_id).await?;
            if !destination_stage.allows_move(&actor.user_id) {
                return Err(DomainError::PermissionDenied);
            }

            let mut projected = item.clone();
            projected.stage_id = input.destination_stage_id.clone();
            self.pricing.do_score_campaign(&projected).await?;

            patch.stage_changed_at_ms = Some(now_ms());
        }

        let updated = repository.apply_patch(&input.item_id, &patch).await?;

        let (action, content) = self
            .move_item(actor, kind, &item, &input.destination_stage_id)
            .await?;
        self.notifications
            .notify(BoardNotificationParams {
                item: updated.clone(),
                actor: actor.clone(),
                kind: NotificationEventKind::Change,
                action: action.clone(),
                content: content.clone(),
                invited_user_ids: vec![],
                removed_user_ids: vec![],
            })
            .await;
        if !item.assigned_user_ids.is_empty() {
            self.notifications
                .push_to_assignees(
                    &item,
                    &item.name,
                    &format!("{} {action}{content}", actor.username),
                )
                .await;
        }

        self.log(ActivityEvent::new(
            kind,
            &input.item_id,
            ActivityAction::Update,
            &actor.user_id,
            json!({
                "stageId": input.destination_stage_id,
                "order": order,
            }),
        ))
        .await;

        self.publish(PipelineChangeEvent::order_updated(
            &stage.pipeline_id,
            &input.process_id,
            &updated,
            input.above_item_id.as_deref(),
            &input.destination_stage_id,
            &input.source_stage_id,
        ))
        .await;

        if crossing_stages {
            self.pricing.confirm_loyalties(&updated).await;
        }

        Ok(updated)
    }

    pub async fn remove(
        &self,
        actor: &ActorIdentity,
        kind: ItemKind,
        item_id: &str,
    ) -> DomainResult<BoardItem> {
        let repository = self.registry.repository(kind)?;
        let item = repository
            .get(item_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("{} {item_id}", kind.as_str())))?;

        self.notifications
            .notify(BoardNotificationParams {
                item: item.clone(),
                actor: actor.clone(),
                kind: NotificationEventKind::Delete,
                action: format!("deleted {}:", kind.as_str()),
                content: format!("'{}'", item.name),
                invited_user_ids: vec![],
                removed_user_ids: vec![],
            })
            .await;
        if !item.assigned_user_ids.is_empty() {
            self.notifications
                .push_to_assignees(
                    &item,
                    &item.name,
                    &format!("{} deleted the {}", actor.username, kind.as_str()),
                )
                .await;
        }

        rpc::mandatory(
            "core.removeConformities",
            self.timeouts.mandatory,
            self.directory.destroy_relations(kind, &item.item_id),
        )
        .await?;
        repository.delete(&item.item_id).await?;

        self.log(ActivityEvent::new(
            kind,
            item_id,
            ActivityAction::Delete,
            &actor.user_id,
            json!({ "name": item.name }),
        ))
        .await;

        Ok(item)
    }

    /// Clones an item directly under its source, regenerating relations
    /// against the new id. Conversation linkage is never copied.
    pub async fn copy(
        &self,
        actor: &ActorIdentity,
        kind: ItemKind,
        item_id: &str,
        process_id: &str,
    ) -> DomainResult<BoardItem> {
        let repository = self.registry.repository(kind)?;
        let item = repository
            .get(item_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("{} {item_id}", kind.as_str())))?;
        let order =
            ordering::compute_order(repository.as_ref(), &item.stage_id, Some(item_id)).await?;

        let now = now_ms();
        let mut clone = item.clone();
        clone.item_id = uuid_v7_without_dashes();
        clone.name = format!("{}-copied", item.name);
        clone.initial_stage_id = item.stage_id.clone();
        clone.order = order;
        clone.status = ItemStatus::Active;
        clone.created_by = actor.user_id.clone();
        clone.modified_by = None;
        clone.watched_user_ids = vec![actor.user_id.clone()];
        clone.source_conversation_ids = Vec::new();
        clone.stage_changed_at_ms = None;
        clone.created_at_ms = now;
        clone.modified_at_ms = now;
        let clone = repository.insert(&clone).await?;

        let (customer_ids, company_ids) = tokio::join!(
            rpc::mandatory(
                "core.customerIds",
                self.timeouts.mandatory,
                self.directory.customer_ids(kind, item_id),
            ),
            rpc::mandatory(
                "core.companyIds",
                self.timeouts.mandatory,
                self.directory.company_ids(kind, item_id),
            ),
        );
        rpc::mandatory(
            "core.addConformities",
            self.timeouts.mandatory,
            self.directory
                .create_relations(kind, &clone.item_id, &customer_ids?, &company_ids?),
        )
        .await?;
        rpc::mandatory(
            "core.copyChecklists",
            self.timeouts.mandatory,
            self.directory.clone_relations(kind, item_id, &clone.item_id),
        )
        .await?;

        let stage = self.boards.get_stage(&clone.stage_id).await?;
        self.publish(PipelineChangeEvent::item_add(
            &stage.pipeline_id,
            process_id,
            &clone,
            Some(item_id),
            &stage.stage_id,
        ))
        .await;
        self.publish(PipelineChangeEvent::conformities_update(
            &stage.pipeline_id,
            &clone,
        ))
        .await;

        Ok(clone)
    }

    /// Flips every non-archived item in the stage in one persistence call,
    /// then fans out one activity log and one event per item.
    pub async fn archive_stage(
        &self,
        actor: &ActorIdentity,
        kind: ItemKind,
        stage_id: &str,
        process_id: &str,
    ) -> DomainResult<usize> {
        let repository = self.registry.repository(kind)?;
        let stage = self.boards.get_stage(stage_id).await?;
        let items = repository.archive_stage(stage_id).await?;

        for item in &items {
            self.log(ActivityEvent::new(
                kind,
                &item.item_id,
                ActivityAction::Archive,
                &actor.user_id,
                json!("archived"),
            ))
            .await;
            self.publish(PipelineChangeEvent::items_remove(
                &stage.pipeline_id,
                process_id,
                item,
                &stage.stage_id,
            ))
            .await;
        }

        Ok(items.len())
    }

    /// Archiving leaves the order untouched; reactivating slots the item
    /// back in under the nearest remaining active sibling.
    async fn change_status(
        &self,
        kind: ItemKind,
        item: &BoardItem,
        status: ItemStatus,
        process_id: &str,
        stage: &Stage,
    ) -> DomainResult<()> {
        match status {
            ItemStatus::Archived => {
                self.publish(PipelineChangeEvent::item_remove(
                    &stage.pipeline_id,
                    process_id,
                    item,
                    &item.stage_id,
                ))
                .await;
            }
            ItemStatus::Active => {
                let repository = self.registry.repository(kind)?;
                let above = repository
                    .nearest_active_above(&item.stage_id, item.order)
                    .await?;
                let above_item_id = above.map(|above| above.item_id);
                let order = ordering::compute_order(
                    repository.as_ref(),
                    &item.stage_id,
                    above_item_id.as_deref(),
                )
                .await?;
                let item = repository.set_order(&item.item_id, order).await?;
                self.publish(PipelineChangeEvent::item_add(
                    &stage.pipeline_id,
                    process_id,
                    &item,
                    above_item_id.as_deref(),
                    &item.stage_id,
                ))
                .await;
            }
        }
        Ok(())
    }

    async fn move_item(
        &self,
        actor: &ActorIdentity,
        kind: ItemKind,
        item: &BoardItem,
        destination_stage_id: &str,
    ) -> DomainResult<(String, String)> {
        let old_stage_id = item.stage_id.clone();
        let mut action = format!("changed order of your {}:", kind.as_str());
        let mut content = format!("'{}'", item.name);

        if old_stage_id != destination_stage_id {
            let (stage, old_stage) = tokio::join!(
                self.boards.get_stage(destination_stage_id),
                self.boards.get_stage(&old_stage_id),
            );
            let (stage, old_stage) = (stage?, old_stage?);
            let (pipeline, old_pipeline) = tokio::join!(
                self.boards.get_pipeline(&stage.pipeline_id),
                self.boards.get_pipeline(&old_stage.pipeline_id),
            );
            let (pipeline, old_pipeline) = (pipeline?, old_pipeline?);
            let (board, old_board) = tokio::join!(
                self.boards.get_board(&pipeline.board_id),
                self.boards.get_board(&old_pipeline.board_id),
            );
            let (board, old_board) = (board?, old_board?);

            action = format!(
                "moved '{}' from {}-{}-{} to ",
                item.name, old_board.name, old_pipeline.name, old_stage.name
            );
            content = format!("{}-{}-{}", board.name, pipeline.name, stage.name);

            let link = format!(
                "/{}/board?id={}&pipelineId={}&itemId={}",
                kind.as_str(),
                board.board_id,
                pipeline.pipeline_id,
                item.item_id
            );
            self.log(ActivityEvent::new(
                kind,
                &item.item_id,
                ActivityAction::Moved,
                &actor.user_id,
                json!({
                    "oldStageId": old_stage_id,
                    "destinationStageId": destination_stage_id,
                    "text": format!("{} to {}", old_stage.name, stage.name),
                    "link": link,
                }),
            ))
            .await;
            self.notifications.relink(kind, &item.item_id, &link).await;
        }

        Ok((action, content))
    }

    async fn publish(&self, event: PipelineChangeEvent) {
        if let Err(err) = self.publisher.publish(&event).await {
            warn!(
                action = event.action.as_str(),
                pipeline_id = %event.pipeline_id,
                error = %err,
                "pipeline event publish failed"
            );
        }
    }

    async fn log(&self, event: ActivityEvent) {
        if let Err(err) = self.activity.append(&event).await {
            warn!(
                action = event.action.as_str(),
                item_id = %event.item_id,
                error = %err,
                "activity log write failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PipelineEventAction;
    use crate::items::PaymentEntry;
    use crate::ports::items::ItemRegistration;
    use crate::ports::loyalty::{CardBasedRule, ScoreCampaign};
    use crate::test_support::{
        MockHierarchy, MockItemRepository, RecordingActivityStore, RecordingNotificationGateway,
        RecordingPublisher, StubDirectory, StubLoyaltyGateway, StubPricingGateway, payment_config,
        sample_board, sample_item, sample_pipeline, sample_stage,
    };

    struct Harness {
        engine: ItemLifecycleEngine,
        repo: MockItemRepository,
        hierarchy: MockHierarchy,
        publisher: RecordingPublisher,
        activity: RecordingActivityStore,
        gateway: RecordingNotificationGateway,
        directory: StubDirectory,
        loyalty: StubLoyaltyGateway,
    }

    fn harness() -> Harness {
        let repo = MockItemRepository::default();
        let hierarchy = MockHierarchy::default();
        let publisher = RecordingPublisher::default();
        let activity = RecordingActivityStore::default();
        let gateway = RecordingNotificationGateway::default();
        let directory = StubDirectory::default();
        let loyalty = StubLoyaltyGateway::default();
        let timeouts = RpcTimeouts::default();

        hierarchy.seed_board(sample_board("board-1"));
        hierarchy.seed_pipeline(sample_pipeline("pipe-1", "board-1"));
        hierarchy.seed_pipeline(sample_pipeline("pipe-2", "board-1"));
        hierarchy.seed_stage(sample_stage("s1", "pipe-1"));
        hierarchy.seed_stage(sample_stage("s2", "pipe-1"));
        hierarchy.seed_stage(sample_stage("s3", "pipe-2"));

        let registry = ItemRegistry::new().register(
            ItemKind::Deal,
            ItemRegistration {
                repository: Arc::new(repo.clone()),
                archive_capability: "dealsArchive".to_string(),
            },
        );
        let boards: Arc<dyn BoardHierarchy> = Arc::new(hierarchy.clone());
        let directory_arc: Arc<dyn CoreDirectory> = Arc::new(directory.clone());
        let pricing = PricingOrchestrator::new(
            boards.clone(),
            directory_arc.clone(),
            Arc::new(StubPricingGateway::default()),
            Arc::new(loyalty.clone()),
            timeouts,
        );
        let engine = ItemLifecycleEngine::new(
            registry,
            boards,
            directory_arc,
            Arc::new(activity.clone()),
            NotificationDispatcher::new(Arc::new(gateway.clone()), timeouts),
            Arc::new(publisher.clone()),
            pricing,
            timeouts,
        );

        Harness {
            engine,
            repo,
            hierarchy,
            publisher,
            activity,
            gateway,
            directory,
            loyalty,
        }
    }

    fn actor() -> ActorIdentity {
        ActorIdentity {
            user_id: "actor-1".to_string(),
            username: "alice".to_string(),
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn actions(publisher: &RecordingPublisher) -> Vec<PipelineEventAction> {
        publisher
            .events()
            .iter()
            .map(|event| event.action)
            .collect()
    }

    #[tokio::test]
    async fn add_creates_active_item_watched_by_creator() {
        let harness = harness();
        let item = harness
            .engine
            .add(
                &actor(),
                ItemKind::Deal,
                ItemCreate {
                    name: "Big deal".to_string(),
                    stage_id: "s1".to_string(),
                    label_ids: ids(&["l1", ""]),
                    ..ItemCreate::default()
                },
                "proc-1",
            )
            .await
            .expect("add");

        assert_eq!(item.status, ItemStatus::Active);
        assert_eq!(item.initial_stage_id, "s1");
        assert_eq!(item.watched_user_ids, ids(&["actor-1"]));
        assert_eq!(item.label_ids, ids(&["l1"]));
        assert!(item.order > 0.0);

        let events = harness.publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, PipelineEventAction::ItemAdd);
        assert_eq!(events[0].pipeline_id, "pipe-1");
        assert_eq!(events[0].process_id, "proc-1");

        let entries = harness.activity.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, ActivityAction::Create);
    }

    #[tokio::test]
    async fn add_rejects_blank_name() {
        let harness = harness();
        let err = harness
            .engine
            .add(
                &actor(),
                ItemKind::Deal,
                ItemCreate {
                    name: "   ".to_string(),
                    stage_id: "s1".to_string(),
                    ..ItemCreate::default()
                },
                "proc-1",
            )
            .await
            .expect_err("blank name");
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn edit_rejects_non_member_when_stage_restricts_editors() {
        let harness = harness();
        let mut restricted = sample_stage("s1", "pipe-1");
        restricted.can_edit_member_ids = ids(&["someone-else"]);
        harness.hierarchy.seed_stage(restricted);
        harness
            .repo
            .seed(sample_item("item-1", "s1", 10.0, ItemStatus::Active));

        let err = harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "item-1",
                ItemPatch {
                    name: Some("renamed".to_string()),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect_err("restricted");
        assert!(matches!(err, DomainError::PermissionDenied));
    }

    #[tokio::test]
    async fn archive_only_edit_skips_editor_check_but_needs_capability() {
        let harness = harness();
        let mut restricted = sample_stage("s1", "pipe-1");
        restricted.can_edit_member_ids = ids(&["someone-else"]);
        harness.hierarchy.seed_stage(restricted);
        harness
            .repo
            .seed(sample_item("item-1", "s1", 10.0, ItemStatus::Active));

        let archived = harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "item-1",
                ItemPatch {
                    status: Some(ItemStatus::Archived),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect("archive allowed");
        assert_eq!(archived.status, ItemStatus::Archived);

        harness.directory.deny_capability();
        harness
            .repo
            .seed(sample_item("item-2", "s1", 20.0, ItemStatus::Active));
        let err = harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "item-2",
                ItemPatch {
                    status: Some(ItemStatus::Archived),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect_err("capability denied");
        assert!(matches!(err, DomainError::PermissionDenied));
    }

    #[tokio::test]
    async fn assignment_diff_writes_exactly_one_assignee_log() {
        let harness = harness();
        let mut item = sample_item("item-1", "s1", 10.0, ItemStatus::Active);
        item.assigned_user_ids = ids(&["a", "b"]);
        harness.repo.seed(item);

        harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "item-1",
                ItemPatch {
                    assigned_user_ids: Some(ids(&["b", "c"])),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect("edit");

        let assignee_logs: Vec<_> = harness
            .activity
            .entries()
            .into_iter()
            .filter(|entry| entry.action == ActivityAction::Assignee)
            .collect();
        assert_eq!(assignee_logs.len(), 1);
        assert_eq!(assignee_logs[0].content["addedUserIds"], json!(["c"]));
        assert_eq!(assignee_logs[0].content["removedUserIds"], json!(["a"]));

        let notifications = harness.gateway.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].invited_user_ids, ids(&["c"]));
        assert_eq!(notifications[0].removed_user_ids, ids(&["a"]));
    }

    #[tokio::test]
    async fn unchanged_assignment_writes_no_assignee_log_and_pushes_instead() {
        let harness = harness();
        let mut item = sample_item("item-1", "s1", 10.0, ItemStatus::Active);
        item.assigned_user_ids = ids(&["a", "b"]);
        harness.repo.seed(item);

        harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "item-1",
                ItemPatch {
                    assigned_user_ids: Some(ids(&["b", "a"])),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect("edit");

        assert!(
            harness
                .activity
                .entries()
                .iter()
                .all(|entry| entry.action != ActivityAction::Assignee)
        );
        let pushes = harness.gateway.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].receiver_ids, ids(&["b", "a"]));
        assert!(pushes[0].body.contains("alice has updated"));
    }

    #[tokio::test]
    async fn cross_pipeline_edit_publishes_remove_and_add_pair() {
        let harness = harness();
        harness
            .repo
            .seed(sample_item("item-1", "s1", 10.0, ItemStatus::Active));

        harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "item-1",
                ItemPatch {
                    stage_id: Some("s3".to_string()),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect("edit");

        let events = harness.publisher.events();
        let removes: Vec<_> = events
            .iter()
            .filter(|event| event.action == PipelineEventAction::ItemRemove)
            .collect();
        let adds: Vec<_> = events
            .iter()
            .filter(|event| event.action == PipelineEventAction::ItemAdd)
            .collect();
        assert_eq!(removes.len(), 1);
        assert_eq!(removes[0].pipeline_id, "pipe-1");
        assert_eq!(adds.len(), 1);
        assert_eq!(adds[0].pipeline_id, "pipe-2");
        assert!(!actions(&harness.publisher).contains(&PipelineEventAction::ItemUpdate));

        let relinks = harness.gateway.relinks();
        assert_eq!(relinks.len(), 1);
        assert!(relinks[0].2.contains("pipelineId=pipe-2"));
    }

    #[tokio::test]
    async fn same_stage_edit_publishes_item_update() {
        let harness = harness();
        harness
            .repo
            .seed(sample_item("item-1", "s1", 10.0, ItemStatus::Active));

        harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "item-1",
                ItemPatch {
                    name: Some("renamed".to_string()),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect("edit");

        assert_eq!(
            actions(&harness.publisher),
            vec![PipelineEventAction::ItemUpdate]
        );
    }

    #[tokio::test]
    async fn change_publishes_single_order_updated_with_both_stage_ids() {
        let harness = harness();
        harness
            .repo
            .seed(sample_item("item-1", "s1", 10.0, ItemStatus::Active));

        let updated = harness
            .engine
            .change(
                &actor(),
                ItemKind::Deal,
                ItemDragInput {
                    item_id: "item-1".to_string(),
                    source_stage_id: "s1".to_string(),
                    destination_stage_id: "s2".to_string(),
                    above_item_id: None,
                    process_id: "proc-1".to_string(),
                },
            )
            .await
            .expect("change");

        assert_eq!(updated.stage_id, "s2");
        assert!(updated.stage_changed_at_ms.is_some());

        let events = harness.publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, PipelineEventAction::OrderUpdated);
        assert_eq!(events[0].data["oldStageId"], json!("s1"));
        assert_eq!(events[0].data["destinationStageId"], json!("s2"));
    }

    #[tokio::test]
    async fn change_rechecks_move_permission_on_destination_stage() {
        let harness = harness();
        let mut restricted = sample_stage("s2", "pipe-1");
        restricted.can_move_member_ids = ids(&["someone-else"]);
        harness.hierarchy.seed_stage(restricted);
        harness
            .repo
            .seed(sample_item("item-1", "s1", 10.0, ItemStatus::Active));

        let err = harness
            .engine
            .change(
                &actor(),
                ItemKind::Deal,
                ItemDragInput {
                    item_id: "item-1".to_string(),
                    source_stage_id: "s1".to_string(),
                    destination_stage_id: "s2".to_string(),
                    above_item_id: None,
                    process_id: "proc-1".to_string(),
                },
            )
            .await
            .expect_err("restricted move");
        assert!(matches!(err, DomainError::PermissionDenied));
    }

    #[tokio::test]
    async fn score_rejection_aborts_move_before_commit() {
        let harness = harness();
        let mut pipeline = sample_pipeline("pipe-1", "board-1");
        pipeline.payment_types = vec![payment_config("golomt", "Golomt card", Some("camp-1"))];
        harness.hierarchy.seed_pipeline(pipeline);
        harness.loyalty.set_campaign(ScoreCampaign {
            campaign_id: "camp-1".to_string(),
            card_based_rules: vec![CardBasedRule {
                stage_ids: vec!["s2".to_string()],
            }],
        });
        harness.loyalty.reject_subtraction();
        harness.directory.set_customer_ids(ids(&["customer-1"]));

        let mut item = sample_item("item-1", "s1", 10.0, ItemStatus::Active);
        item.payments_data.insert(
            "golomt".to_string(),
            PaymentEntry {
                amount: 100.0,
                extra: serde_json::Map::new(),
            },
        );
        harness.repo.seed(item);

        let err = harness
            .engine
            .change(
                &actor(),
                ItemKind::Deal,
                ItemDragInput {
                    item_id: "item-1".to_string(),
                    source_stage_id: "s1".to_string(),
                    destination_stage_id: "s2".to_string(),
                    above_item_id: None,
                    process_id: "proc-1".to_string(),
                },
            )
            .await
            .expect_err("score precondition");
        assert!(err.to_string().contains("Golomt card"));

        let stored = harness
            .engine
            .get_item(ItemKind::Deal, "item-1")
            .await
            .expect("item");
        assert_eq!(stored.stage_id, "s1", "move must not commit");
        assert!(harness.publisher.events().is_empty());
    }

    #[tokio::test]
    async fn archive_then_reactivate_restores_relative_position() {
        let harness = harness();
        harness
            .repo
            .seed(sample_item("a", "s1", 10.0, ItemStatus::Active));
        harness
            .repo
            .seed(sample_item("b", "s1", 20.0, ItemStatus::Active));
        harness
            .repo
            .seed(sample_item("c", "s1", 30.0, ItemStatus::Active));

        harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "b",
                ItemPatch {
                    status: Some(ItemStatus::Archived),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect("archive");
        let archived = harness
            .engine
            .get_item(ItemKind::Deal, "b")
            .await
            .expect("item");
        assert_eq!(archived.order, 20.0, "archiving leaves order untouched");

        harness
            .engine
            .edit(
                &actor(),
                ItemKind::Deal,
                "b",
                ItemPatch {
                    status: Some(ItemStatus::Active),
                    ..ItemPatch::default()
                },
                "proc-1",
            )
            .await
            .expect("reactivate");

        let restored = harness
            .engine
            .get_item(ItemKind::Deal, "b")
            .await
            .expect("item");
        assert!(restored.order > 10.0, "sorts after item a");
        assert!(restored.order < 30.0, "sorts before item c");
        assert!(
            restored.order < 20.0,
            "strictly smaller than the old next position"
        );

        let archive_events = actions(&harness.publisher);
        assert!(archive_events.contains(&PipelineEventAction::ItemRemove));
        assert!(archive_events.contains(&PipelineEventAction::ItemAdd));
    }

    #[tokio::test]
    async fn bulk_archive_fans_out_per_item_with_one_persistence_call() {
        let harness = harness();
        for index in 0..4 {
            harness.repo.seed(sample_item(
                &format!("item-{index}"),
                "s1",
                f64::from(index) * 10.0 + 10.0,
                ItemStatus::Active,
            ));
        }
        harness
            .repo
            .seed(sample_item("old", "s1", 90.0, ItemStatus::Archived));

        let archived = harness
            .engine
            .archive_stage(&actor(), ItemKind::Deal, "s1", "proc-1")
            .await
            .expect("archive stage");

        assert_eq!(archived, 4);
        assert_eq!(harness.repo.archive_calls(), 1);

        let events = harness.publisher.events();
        assert_eq!(events.len(), 4);
        assert!(
            events
                .iter()
                .all(|event| event.action == PipelineEventAction::ItemsRemove)
        );

        let archive_logs: Vec<_> = harness
            .activity
            .entries()
            .into_iter()
            .filter(|entry| entry.action == ActivityAction::Archive)
            .collect();
        assert_eq!(archive_logs.len(), 4);

        for index in 0..4 {
            let item = harness
                .engine
                .get_item(ItemKind::Deal, &format!("item-{index}"))
                .await
                .expect("item");
            assert_eq!(item.status, ItemStatus::Archived);
        }
    }

    #[tokio::test]
    async fn remove_destroys_relations_and_hard_deletes() {
        let harness = harness();
        let mut item = sample_item("item-1", "s1", 10.0, ItemStatus::Active);
        item.assigned_user_ids = ids(&["u1"]);
        harness.repo.seed(item);

        let removed = harness
            .engine
            .remove(&actor(), ItemKind::Deal, "item-1")
            .await
            .expect("remove");
        assert_eq!(removed.item_id, "item-1");
        assert_eq!(harness.directory.destroyed_relations(), 1);

        let err = harness
            .engine
            .get_item(ItemKind::Deal, "item-1")
            .await
            .expect_err("gone");
        assert!(matches!(err, DomainError::NotFound(_)));

        let notifications = harness.gateway.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].notification_type, "dealDelete");
        assert_eq!(harness.gateway.pushes().len(), 1);
        assert!(
            harness
                .activity
                .entries()
                .iter()
                .any(|entry| entry.action == ActivityAction::Delete)
        );
    }

    #[tokio::test]
    async fn copy_clones_under_source_without_conversation_linkage() {
        let harness = harness();
        let mut item = sample_item("item-1", "s1", 10.0, ItemStatus::Active);
        item.source_conversation_ids = ids(&["conv-1"]);
        item.watched_user_ids = ids(&["watcher-1"]);
        harness.repo.seed(item);

        let clone = harness
            .engine
            .copy(&actor(), ItemKind::Deal, "item-1", "proc-1")
            .await
            .expect("copy");

        assert_eq!(clone.name, "item-1 name-copied");
        assert!(clone.order > 10.0, "lands directly under the source");
        assert_eq!(clone.watched_user_ids, ids(&["actor-1"]));
        assert!(clone.source_conversation_ids.is_empty());
        assert_eq!(harness.directory.created_relations(), 1);
        assert_eq!(harness.directory.cloned_relations(), 1);

        let events = harness.publisher.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, PipelineEventAction::ItemAdd);
        assert_eq!(events[0].data["aboveItemId"], json!("item-1"));
        assert_eq!(
            events[1].action,
            PipelineEventAction::ItemOfConformitiesUpdate
        );
    }

    #[tokio::test]
    async fn unknown_item_kind_is_a_not_found_error() {
        let harness = harness();
        let err = harness
            .engine
            .get_item(ItemKind::Ticket, "item-1")
            .await
            .expect_err("unregistered kind");
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
