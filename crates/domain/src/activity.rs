use serde::{Deserialize, Serialize};

use crate::items::ItemKind;
use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Create,
    Update,
    Delete,
    Archive,
    Assignee,
    Moved,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Archive => "archive",
            Self::Assignee => "assignee",
            Self::Moved => "moved",
        }
    }
}

/// One audit record of a lifecycle mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub activity_id: String,
    pub item_id: String,
    pub item_kind: ItemKind,
    pub action: ActivityAction,
    pub actor_id: String,
    pub content: serde_json::Value,
    pub created_at_ms: i64,
}

impl ActivityEvent {
    pub fn new(
        item_kind: ItemKind,
        item_id: impl Into<String>,
        action: ActivityAction,
        actor_id: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            activity_id: uuid_v7_without_dashes(),
            item_id: item_id.into(),
            item_kind,
            action,
            actor_id: actor_id.into(),
            content,
            created_at_ms: now_ms(),
        }
    }
}
