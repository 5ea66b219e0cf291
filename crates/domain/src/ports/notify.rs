use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::identity::ActorIdentity;
use crate::items::ItemKind;
use crate::ports::BoxFuture;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEventKind {
    Add,
    Edit,
    Change,
    Delete,
}

impl NotificationEventKind {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Edit => "Edit",
            Self::Change => "Change",
            Self::Delete => "Delete",
        }
    }

    /// Wire notification type, e.g. `dealAdd`, `ticketChange`.
    pub fn notification_type(&self, kind: ItemKind) -> String {
        format!("{}{}", kind.as_str(), self.suffix())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardNotification {
    pub notification_type: String,
    pub content_type: ItemKind,
    pub item_id: String,
    pub item_name: String,
    pub actor: ActorIdentity,
    pub action: String,
    pub content: String,
    pub recipient_ids: Vec<String>,
    pub invited_user_ids: Vec<String>,
    pub removed_user_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MobilePush {
    pub title: String,
    pub body: String,
    pub receiver_ids: Vec<String>,
    pub data: serde_json::Value,
}

pub trait NotificationGateway: Send + Sync {
    fn send_notification(
        &self,
        notification: &BoardNotification,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn send_mobile_push(&self, push: &MobilePush) -> BoxFuture<'_, DomainResult<()>>;

    /// Rewrites the stored link on existing notification records after an
    /// item moves to a different board location.
    fn batch_update_links(
        &self,
        content_type: ItemKind,
        content_type_id: &str,
        link: &str,
    ) -> BoxFuture<'_, DomainResult<()>>;
}
