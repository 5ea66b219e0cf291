use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Deal,
    Task,
    Ticket,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deal => "deal",
            Self::Task => "task",
            Self::Ticket => "ticket",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for ItemKind {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "deal" => Ok(Self::Deal),
            "task" => Ok(Self::Task),
            "ticket" => Ok(Self::Ticket),
            _ => Err("unknown item kind"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    Archived,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            _ => Err("unknown item status"),
        }
    }
}

/// A single product line on a deal-like item. `bonus_count > 0` marks a
/// system-synthesized bonus line; bonus lines are never user-entered and are
/// excluded from repricing. Lines with `tick_used` are excluded from the
/// item total.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProductLine {
    pub line_id: String,
    pub product_id: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub discount: f64,
    pub discount_percent: f64,
    pub amount: f64,
    pub tick_used: bool,
    #[serde(default)]
    pub bonus_count: u32,
    pub assign_user_id: Option<String>,
}

impl ProductLine {
    pub fn is_bonus(&self) -> bool {
        self.bonus_count > 0
    }

    /// Zero-price line awarded by a pricing rule.
    pub fn bonus(product_id: impl Into<String>, count: u32) -> Self {
        Self {
            line_id: uuid_v7_without_dashes(),
            product_id: product_id.into(),
            quantity: f64::from(count),
            unit_price: 0.0,
            discount: 0.0,
            discount_percent: 0.0,
            amount: 0.0,
            tick_used: true,
            bonus_count: count,
            assign_user_id: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentEntry {
    pub amount: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoardItem {
    pub item_id: String,
    pub kind: ItemKind,
    pub name: String,
    pub stage_id: String,
    pub initial_stage_id: String,
    pub order: f64,
    pub status: ItemStatus,
    pub created_by: String,
    pub modified_by: Option<String>,
    pub assigned_user_ids: Vec<String>,
    pub watched_user_ids: Vec<String>,
    pub label_ids: Vec<String>,
    pub tag_ids: Vec<String>,
    pub branch_ids: Vec<String>,
    pub department_ids: Vec<String>,
    pub source_conversation_ids: Vec<String>,
    pub custom_fields_data: Option<serde_json::Value>,
    pub products_data: Vec<ProductLine>,
    pub payments_data: BTreeMap<String, PaymentEntry>,
    pub start_date_ms: Option<i64>,
    pub close_date_ms: Option<i64>,
    pub stage_changed_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub modified_at_ms: i64,
}

impl BoardItem {
    /// Total over user-entered lines; ticked lines do not count.
    pub fn total_amount(&self) -> f64 {
        self.products_data
            .iter()
            .filter(|line| !line.tick_used)
            .map(|line| line.amount)
            .sum()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ItemCreate {
    pub name: String,
    pub stage_id: String,
    pub above_item_id: Option<String>,
    pub assigned_user_ids: Vec<String>,
    pub label_ids: Vec<String>,
    pub tag_ids: Vec<String>,
    pub branch_ids: Vec<String>,
    pub department_ids: Vec<String>,
    pub custom_fields_data: Option<serde_json::Value>,
    pub products_data: Vec<ProductLine>,
    pub payments_data: BTreeMap<String, PaymentEntry>,
    pub customer_ids: Vec<String>,
    pub company_ids: Vec<String>,
    pub start_date_ms: Option<i64>,
    pub close_date_ms: Option<i64>,
}

/// Explicit field-level patch; item mutation never merges raw persisted
/// documents. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub stage_id: Option<String>,
    pub order: Option<f64>,
    pub status: Option<ItemStatus>,
    pub assigned_user_ids: Option<Vec<String>>,
    pub label_ids: Option<Vec<String>>,
    pub tag_ids: Option<Vec<String>>,
    pub custom_fields_data: Option<serde_json::Value>,
    pub products_data: Option<Vec<ProductLine>>,
    pub payments_data: Option<BTreeMap<String, PaymentEntry>>,
    pub start_date_ms: Option<i64>,
    pub close_date_ms: Option<i64>,
    pub stage_changed_at_ms: Option<i64>,
    #[serde(skip)]
    pub modified_by: Option<String>,
}

impl ItemPatch {
    /// True when the patch flips status and touches nothing else. Archiving
    /// has its own capability check instead of the stage editor restriction.
    pub fn is_status_only(&self) -> bool {
        self.status.is_some()
            && self.name.is_none()
            && self.stage_id.is_none()
            && self.order.is_none()
            && self.assigned_user_ids.is_none()
            && self.label_ids.is_none()
            && self.tag_ids.is_none()
            && self.custom_fields_data.is_none()
            && self.products_data.is_none()
            && self.payments_data.is_none()
            && self.start_date_ms.is_none()
            && self.close_date_ms.is_none()
    }

    /// Applies the patch in place. Shared by repository implementations so
    /// every backend interprets a patch the same way.
    pub fn apply_to(&self, item: &mut BoardItem) {
        if let Some(name) = &self.name {
            item.name = name.clone();
        }
        if let Some(stage_id) = &self.stage_id {
            item.stage_id = stage_id.clone();
        }
        if let Some(order) = self.order {
            item.order = order;
        }
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(assigned) = &self.assigned_user_ids {
            item.assigned_user_ids = scrub_ids(assigned);
        }
        if let Some(labels) = &self.label_ids {
            item.label_ids = scrub_ids(labels);
        }
        if let Some(tags) = &self.tag_ids {
            item.tag_ids = scrub_ids(tags);
        }
        if let Some(custom_fields) = &self.custom_fields_data {
            item.custom_fields_data = Some(custom_fields.clone());
        }
        if let Some(products) = &self.products_data {
            item.products_data = products.clone();
        }
        if let Some(payments) = &self.payments_data {
            item.payments_data = payments.clone();
        }
        if let Some(start) = self.start_date_ms {
            item.start_date_ms = Some(start);
        }
        if let Some(close) = self.close_date_ms {
            item.close_date_ms = Some(close);
        }
        if let Some(changed_at) = self.stage_changed_at_ms {
            item.stage_changed_at_ms = Some(changed_at);
        }
        if let Some(modified_by) = &self.modified_by {
            item.modified_by = Some(modified_by.clone());
        }
        item.modified_at_ms = now_ms();
    }
}

/// Drag input for a board move: destination stage plus the item the moved
/// card should land under.
#[derive(Clone, Debug)]
pub struct ItemDragInput {
    pub item_id: String,
    pub source_stage_id: String,
    pub destination_stage_id: String,
    pub above_item_id: Option<String>,
    pub process_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserIdsDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl UserIdsDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn diff_user_ids(old: &[String], new: &[String]) -> UserIdsDiff {
    let old_set: HashSet<&str> = old.iter().map(String::as_str).collect();
    let new_set: HashSet<&str> = new.iter().map(String::as_str).collect();
    UserIdsDiff {
        added: new
            .iter()
            .filter(|id| !old_set.contains(id.as_str()))
            .cloned()
            .collect(),
        removed: old
            .iter()
            .filter(|id| !new_set.contains(id.as_str()))
            .cloned()
            .collect(),
    }
}

/// Drops empty entries from persisted id lists.
pub fn scrub_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(ToOwned::to_owned)
        .collect()
}

/// Reconciles an item's assignee list against per-line `assign_user_id`
/// changes: newly assigned line owners are added, dropped ones removed.
pub fn assigned_users_from_lines(
    current: &[String],
    new_line_assignees: &[String],
    old_lines: &[ProductLine],
) -> (Vec<String>, UserIdsDiff) {
    let old_assignees: Vec<String> = old_lines
        .iter()
        .filter_map(|line| line.assign_user_id.clone())
        .collect();
    let diff = diff_user_ids(&old_assignees, new_line_assignees);
    if diff.is_empty() {
        return (current.to_vec(), diff);
    }

    let mut next: Vec<String> = current.to_vec();
    for added in &diff.added {
        if !next.contains(added) {
            next.push(added.clone());
        }
    }
    next.retain(|id| !diff.removed.contains(id));
    (next, diff)
}
