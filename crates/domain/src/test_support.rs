//! Shared in-memory fakes for unit tests across the domain crate.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::DomainResult;
use crate::activity::ActivityEvent;
use crate::boards::{Board, PaymentTypeConfig, Pipeline, Stage};
use crate::error::DomainError;
use crate::events::PipelineChangeEvent;
use crate::items::{BoardItem, ItemKind, ItemPatch, ItemStatus};
use crate::ports::BoxFuture;
use crate::ports::activity::ActivityLogStore;
use crate::ports::boards::BoardHierarchy;
use crate::ports::directory::CoreDirectory;
use crate::ports::events::PipelineEventPublisher;
use crate::ports::items::ItemRepository;
use crate::ports::loyalty::{
    LoyaltyConfirmRequest, LoyaltyGateway, NOT_ENOUGH_SCORE, ScoreCampaign, ScoreSubtractRequest,
};
use crate::ports::notify::{BoardNotification, MobilePush, NotificationGateway};
use crate::ports::pricing::{PriceMatch, PricingGateway, PricingRequest};

pub fn sample_item(item_id: &str, stage_id: &str, order: f64, status: ItemStatus) -> BoardItem {
    BoardItem {
        item_id: item_id.to_string(),
        kind: ItemKind::Deal,
        name: format!("{item_id} name"),
        stage_id: stage_id.to_string(),
        initial_stage_id: stage_id.to_string(),
        order,
        status,
        created_by: "creator".to_string(),
        modified_by: None,
        assigned_user_ids: vec![],
        watched_user_ids: vec![],
        label_ids: vec![],
        tag_ids: vec![],
        branch_ids: vec![],
        department_ids: vec![],
        source_conversation_ids: vec![],
        custom_fields_data: None,
        products_data: vec![],
        payments_data: BTreeMap::new(),
        start_date_ms: None,
        close_date_ms: None,
        stage_changed_at_ms: None,
        created_at_ms: 0,
        modified_at_ms: 0,
    }
}

pub fn sample_stage(stage_id: &str, pipeline_id: &str) -> Stage {
    Stage {
        stage_id: stage_id.to_string(),
        pipeline_id: pipeline_id.to_string(),
        name: format!("{stage_id} stage"),
        can_edit_member_ids: vec![],
        can_move_member_ids: vec![],
    }
}

pub fn sample_pipeline(pipeline_id: &str, board_id: &str) -> Pipeline {
    Pipeline {
        pipeline_id: pipeline_id.to_string(),
        board_id: board_id.to_string(),
        name: format!("{pipeline_id} pipeline"),
        payment_types: vec![],
    }
}

pub fn sample_board(board_id: &str) -> Board {
    Board {
        board_id: board_id.to_string(),
        name: format!("{board_id} board"),
    }
}

pub fn payment_config(
    payment_type: &str,
    title: &str,
    score_campaign_id: Option<&str>,
) -> PaymentTypeConfig {
    PaymentTypeConfig {
        payment_type: payment_type.to_string(),
        title: title.to_string(),
        score_campaign_id: score_campaign_id.map(ToString::to_string),
    }
}

#[derive(Clone, Default)]
pub struct MockItemRepository {
    items: Arc<RwLock<HashMap<String, BoardItem>>>,
    archive_calls: Arc<AtomicUsize>,
}

impl MockItemRepository {
    pub fn seed(&self, item: BoardItem) {
        self.items
            .try_write()
            .expect("seed outside of async contention")
            .insert(item.item_id.clone(), item);
    }

    pub fn archive_calls(&self) -> usize {
        self.archive_calls.load(Ordering::SeqCst)
    }
}

impl ItemRepository for MockItemRepository {
    fn insert(&self, item: &BoardItem) -> BoxFuture<'_, DomainResult<BoardItem>> {
        let item = item.clone();
        let items = self.items.clone();
        Box::pin(async move {
            let mut items = items.write().await;
            if items.contains_key(&item.item_id) {
                return Err(DomainError::Conflict);
            }
            items.insert(item.item_id.clone(), item.clone());
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
        let archive_calls = self.archive_calls.clone();
        Box::pin(async move {
            archive_calls.fetch_add(1, Ordering::SeqCst);
            let mut items = items.write().await;
            let mut flipped = Vec::new();
            for item in items.values_mut() {
                if item.stage_id == stage_id && item.status != ItemStatus::Archived {
                    flipped.push(item.clone());
                    item.status = ItemStatus::Archived;
                }
            }
            flipped.sort_by(|left, right| left.order.total_cmp(&right.order));
            Ok(flipped)
        })
    }
}

#[derive(Clone, Default)]
pub struct MockHierarchy {
    stages: Arc<std::sync::Mutex<HashMap<String, Stage>>>,
    pipelines: Arc<std::sync::Mutex<HashMap<String, Pipeline>>>,
    boards: Arc<std::sync::Mutex<HashMap<String, Board>>>,
}

impl MockHierarchy {
    pub fn seed_stage(&self, stage: Stage) {
        self.stages
            .lock()
            .expect("stage seed")
            .insert(stage.stage_id.clone(), stage);
    }

    pub fn seed_pipeline(&self, pipeline: Pipeline) {
        self.pipelines
            .lock()
            .expect("pipeline seed")
            .insert(pipeline.pipeline_id.clone(), pipeline);
    }

    pub fn seed_board(&self, board: Board) {
        self.boards
            .lock()
            .expect("board seed")
            .insert(board.board_id.clone(), board);
    }
}

impl BoardHierarchy for MockHierarchy {
    fn get_stage(&self, stage_id: &str) -> BoxFuture<'_, DomainResult<Stage>> {
        let found = self.stages.lock().expect("stages").get(stage_id).cloned();
        let stage_id = stage_id.to_string();
        Box::pin(async move { found.ok_or_else(|| DomainError::NotFound(format!("stage {stage_id}"))) })
    }

    fn get_pipeline(&self, pipeline_id: &str) -> BoxFuture<'_, DomainResult<Pipeline>> {
        let found = self
            .pipelines
            .lock()
            .expect("pipelines")
            .get(pipeline_id)
            .cloned();
        let pipeline_id = pipeline_id.to_string();
        Box::pin(async move {
            found.ok_or_else(|| DomainError::NotFound(format!("pipeline {pipeline_id}")))
        })
    }

    fn get_board(&self, board_id: &str) -> BoxFuture<'_, DomainResult<Board>> {
        let found = self.boards.lock().expect("boards").get(board_id).cloned();
        let board_id = board_id.to_string();
        Box::pin(async move { found.ok_or_else(|| DomainError::NotFound(format!("board {board_id}"))) })
    }
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<std::sync::Mutex<Vec<PipelineChangeEvent>>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<PipelineChangeEvent> {
        self.events.lock().expect("events").clone()
    }
}

impl PipelineEventPublisher for RecordingPublisher {
    fn publish(&self, event: &PipelineChangeEvent) -> BoxFuture<'_, DomainResult<()>> {
        self.events.lock().expect("events").push(event.clone());
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone, Default)]
pub struct RecordingActivityStore {
    entries: Arc<std::sync::Mutex<Vec<ActivityEvent>>>,
}

impl RecordingActivityStore {
    pub fn entries(&self) -> Vec<ActivityEvent> {
        self.entries.lock().expect("entries").clone()
    }
}

impl ActivityLogStore for RecordingActivityStore {
    fn append(&self, event: &ActivityEvent) -> BoxFuture<'_, DomainResult<()>> {
        self.entries.lock().expect("entries").push(event.clone());
        Box::pin(async { Ok(()) })
    }

    fn list_by_item(&self, item_id: &str) -> BoxFuture<'_, DomainResult<Vec<ActivityEvent>>> {
        let rows: Vec<_> = self
            .entries
            .lock()
            .expect("entries")
            .iter()
            .filter(|event| event.item_id == item_id)
            .cloned()
            .collect();
        Box::pin(async move { Ok(rows) })
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotificationGateway {
    notifications: Arc<std::sync::Mutex<Vec<BoardNotification>>>,
    pushes: Arc<std::sync::Mutex<Vec<MobilePush>>>,
    relinks: Arc<std::sync::Mutex<Vec<(ItemKind, String, String)>>>,
}

impl RecordingNotificationGateway {
    pub fn notifications(&self) -> Vec<BoardNotification> {
        self.notifications.lock().expect("notifications").clone()
    }

    pub fn pushes(&self) -> Vec<MobilePush> {
        self.pushes.lock().expect("pushes").clone()
    }

    pub fn relinks(&self) -> Vec<(ItemKind, String, String)> {
        self.relinks.lock().expect("relinks").clone()
    }
}

impl NotificationGateway for RecordingNotificationGateway {
    fn send_notification(
        &self,
        notification: &BoardNotification,
    ) -> BoxFuture<'_, DomainResult<()>> {
        self.notifications
            .lock()
            .expect("notifications")
            .push(notification.clone());
        Box::pin(async { Ok(()) })
    }

    fn send_mobile_push(&self, push: &MobilePush) -> BoxFuture<'_, DomainResult<()>> {
        self.pushes.lock().expect("pushes").push(push.clone());
        Box::pin(async { Ok(()) })
    }

    fn batch_update_links(
        &self,
        content_type: ItemKind,
        content_type_id: &str,
        link: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        self.relinks.lock().expect("relinks").push((
            content_type,
            content_type_id.to_string(),
            link.to_string(),
        ));
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone, Default)]
pub struct StubDirectory {
    customer_ids: Arc<std::sync::Mutex<Vec<String>>>,
    company_ids: Arc<std::sync::Mutex<Vec<String>>>,
    deny_capability: Arc<AtomicBool>,
    destroyed: Arc<AtomicUsize>,
    cloned: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
}

impl StubDirectory {
    pub fn set_customer_ids(&self, ids: Vec<String>) {
        *self.customer_ids.lock().expect("customer ids") = ids;
    }

    pub fn set_company_ids(&self, ids: Vec<String>) {
        *self.company_ids.lock().expect("company ids") = ids;
    }

    pub fn deny_capability(&self) {
        self.deny_capability.store(true, Ordering::SeqCst);
    }

    pub fn destroyed_relations(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn cloned_relations(&self) -> usize {
        self.cloned.load(Ordering::SeqCst)
    }

    pub fn created_relations(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl CoreDirectory for StubDirectory {
    fn prepare_custom_fields(
        &self,
        data: &serde_json::Value,
    ) -> BoxFuture<'_, DomainResult<serde_json::Value>> {
        let data = data.clone();
        Box::pin(async move { Ok(data) })
    }

    fn customer_ids(
        &self,
        _kind: ItemKind,
        _item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let ids = self.customer_ids.lock().expect("customer ids").clone();
        Box::pin(async move { Ok(ids) })
    }

    fn company_ids(
        &self,
        _kind: ItemKind,
        _item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let ids = self.company_ids.lock().expect("company ids").clone();
        Box::pin(async move { Ok(ids) })
    }

    fn create_relations(
        &self,
        _kind: ItemKind,
        _item_id: &str,
        _customer_ids: &[String],
        _company_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<()>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn clone_relations(
        &self,
        _kind: ItemKind,
        _source_item_id: &str,
        _target_item_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        self.cloned.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn destroy_relations(&self, _kind: ItemKind, _item_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn can(&self, _capability: &str, _user_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let allowed = !self.deny_capability.load(Ordering::SeqCst);
        Box::pin(async move { Ok(allowed) })
    }
}

#[derive(Clone, Default)]
pub struct StubPricingGateway {
    matches: Arc<std::sync::Mutex<HashMap<String, PriceMatch>>>,
    fail_next: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl StubPricingGateway {
    pub fn set_match(&self, line_id: &str, price_match: PriceMatch) {
        self.matches
            .lock()
            .expect("matches")
            .insert(line_id.to_string(), price_match);
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PricingGateway for StubPricingGateway {
    fn check_pricing(
        &self,
        _request: &PricingRequest,
    ) -> BoxFuture<'_, DomainResult<HashMap<String, PriceMatch>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_next.swap(false, Ordering::SeqCst);
        let matches = self.matches.lock().expect("matches").clone();
        Box::pin(async move {
            if fail {
                return Err(DomainError::Upstream("pricing unavailable".to_string()));
            }
            Ok(matches)
        })
    }
}

#[derive(Clone, Default)]
pub struct StubLoyaltyGateway {
    campaign: Arc<std::sync::Mutex<Option<ScoreCampaign>>>,
    reject_subtraction: Arc<AtomicBool>,
    fail_confirm: Arc<AtomicBool>,
    subtract_calls: Arc<AtomicUsize>,
    confirm_calls: Arc<AtomicUsize>,
    last_subtract: Arc<std::sync::Mutex<Option<ScoreSubtractRequest>>>,
}

impl StubLoyaltyGateway {
    pub fn set_campaign(&self, campaign: ScoreCampaign) {
        *self.campaign.lock().expect("campaign") = Some(campaign);
    }

    pub fn reject_subtraction(&self) {
        self.reject_subtraction.store(true, Ordering::SeqCst);
    }

    pub fn fail_confirm(&self) {
        self.fail_confirm.store(true, Ordering::SeqCst);
    }

    pub fn subtract_calls(&self) -> usize {
        self.subtract_calls.load(Ordering::SeqCst)
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    pub fn last_subtract(&self) -> Option<ScoreSubtractRequest> {
        self.last_subtract.lock().expect("last subtract").clone()
    }
}

impl LoyaltyGateway for StubLoyaltyGateway {
    fn find_score_campaign(
        &self,
        campaign_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ScoreCampaign>>> {
        let campaign = self
            .campaign
            .lock()
            .expect("campaign")
            .clone()
            .filter(|campaign| campaign.campaign_id == campaign_id);
        Box::pin(async move { Ok(campaign) })
    }

    fn check_score_available(
        &self,
        _request: &ScoreSubtractRequest,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let reject = self.reject_subtraction.load(Ordering::SeqCst);
        Box::pin(async move {
            if reject {
                return Err(DomainError::Precondition(NOT_ENOUGH_SCORE.to_string()));
            }
            Ok(())
        })
    }

    fn subtract_score(&self, request: &ScoreSubtractRequest) -> BoxFuture<'_, DomainResult<()>> {
        self.subtract_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_subtract.lock().expect("last subtract") = Some(request.clone());
        Box::pin(async { Ok(()) })
    }

    fn confirm(&self, _request: &LoyaltyConfirmRequest) -> BoxFuture<'_, DomainResult<()>> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_confirm.swap(false, Ordering::SeqCst);
        Box::pin(async move {
            if fail {
                return Err(DomainError::Upstream("loyalty unavailable".to_string()));
            }
            Ok(())
        })
    }
}
