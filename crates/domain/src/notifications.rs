use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use crate::identity::ActorIdentity;
use crate::items::{BoardItem, ItemKind, scrub_ids};
use crate::ports::notify::{
    BoardNotification, MobilePush, NotificationEventKind, NotificationGateway,
};
use crate::rpc::{self, RpcTimeouts};

/// Everything needed to fan one lifecycle event out to interested users.
#[derive(Clone, Debug)]
pub struct BoardNotificationParams {
    pub item: BoardItem,
    pub actor: ActorIdentity,
    pub kind: NotificationEventKind,
    pub action: String,
    pub content: String,
    pub invited_user_ids: Vec<String>,
    pub removed_user_ids: Vec<String>,
}

/// Users who should hear about a change: assignees and watchers plus newly
/// invited users, minus removed users and the acting user.
pub fn notifiable_user_ids(
    item: &BoardItem,
    actor_id: &str,
    invited: &[String],
    removed: &[String],
) -> Vec<String> {
    let removed: HashSet<&str> = removed.iter().map(String::as_str).collect();
    let mut combined = item.assigned_user_ids.clone();
    combined.extend(item.watched_user_ids.iter().cloned());
    combined.extend(invited.iter().cloned());
    scrub_ids(&combined)
        .into_iter()
        .filter(|id| id != actor_id && !removed.contains(id.as_str()))
        .collect()
}

/// Stateless fan-out over the notification gateway. Every send is advisory;
/// delivery failures never fail the primary mutation.
#[derive(Clone)]
pub struct NotificationDispatcher {
    gateway: Arc<dyn NotificationGateway>,
    timeouts: RpcTimeouts,
}

impl NotificationDispatcher {
    pub fn new(gateway: Arc<dyn NotificationGateway>, timeouts: RpcTimeouts) -> Self {
        Self { gateway, timeouts }
    }

    pub async fn notify(&self, params: BoardNotificationParams) {
        let recipients = notifiable_user_ids(
            &params.item,
            &params.actor.user_id,
            &params.invited_user_ids,
            &params.removed_user_ids,
        );
        if recipients.is_empty()
            && params.invited_user_ids.is_empty()
            && params.removed_user_ids.is_empty()
        {
            return;
        }

        let notification = BoardNotification {
            notification_type: params.kind.notification_type(params.item.kind),
            content_type: params.item.kind,
            item_id: params.item.item_id.clone(),
            item_name: params.item.name.clone(),
            actor: params.actor.clone(),
            action: params.action,
            content: params.content,
            recipient_ids: recipients,
            invited_user_ids: params.invited_user_ids,
            removed_user_ids: params.removed_user_ids,
        };
        rpc::advisory(
            "notifications.send",
            self.timeouts.advisory,
            (),
            self.gateway.send_notification(&notification),
        )
        .await;
    }

    pub async fn push_to_assignees(&self, item: &BoardItem, title: &str, body: &str) {
        if item.assigned_user_ids.is_empty() {
            return;
        }
        let push = MobilePush {
            title: title.to_string(),
            body: body.to_string(),
            receiver_ids: item.assigned_user_ids.clone(),
            data: json!({
                "type": item.kind.as_str(),
                "id": item.item_id,
            }),
        };
        rpc::advisory(
            "core.sendMobileNotification",
            self.timeouts.advisory,
            (),
            self.gateway.send_mobile_push(&push),
        )
        .await;
    }

    /// Points previously delivered notifications at an item's new board
    /// location.
    pub async fn relink(&self, kind: ItemKind, item_id: &str, link: &str) {
        rpc::advisory(
            "notifications.batchUpdate",
            self.timeouts.advisory,
            (),
            self.gateway.batch_update_links(kind, item_id, link),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::ItemStatus;
    use crate::test_support::sample_item;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn recipients_combine_assigned_watched_and_invited() {
        let mut item = sample_item("item-1", "stage-1", 5.0, ItemStatus::Active);
        item.assigned_user_ids = ids(&["a", "b"]);
        item.watched_user_ids = ids(&["b", "c"]);

        let recipients = notifiable_user_ids(&item, "actor", &ids(&["d"]), &[]);
        assert_eq!(recipients, ids(&["a", "b", "c", "d"]));
    }

    #[test]
    fn recipients_exclude_actor_and_removed() {
        let mut item = sample_item("item-1", "stage-1", 5.0, ItemStatus::Active);
        item.assigned_user_ids = ids(&["a", "b", "actor"]);
        item.watched_user_ids = ids(&["c"]);

        let recipients = notifiable_user_ids(&item, "actor", &[], &ids(&["b"]));
        assert_eq!(recipients, ids(&["a", "c"]));
    }

    #[test]
    fn notification_type_combines_kind_and_suffix() {
        assert_eq!(
            NotificationEventKind::Add.notification_type(ItemKind::Deal),
            "dealAdd"
        );
        assert_eq!(
            NotificationEventKind::Change.notification_type(ItemKind::Ticket),
            "ticketChange"
        );
    }
}
