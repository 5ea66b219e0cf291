use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::items::BoardItem;
use crate::util::uuid_v7_without_dashes;

/// Topic a pipeline's real-time board subscribers listen on.
pub fn pipeline_topic(pipeline_id: &str) -> String {
    format!("salesPipelinesChanged:{pipeline_id}")
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PipelineEventAction {
    ItemAdd,
    ItemUpdate,
    ItemRemove,
    ItemsRemove,
    OrderUpdated,
    ItemOfConformitiesUpdate,
}

impl PipelineEventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ItemAdd => "itemAdd",
            Self::ItemUpdate => "itemUpdate",
            Self::ItemRemove => "itemRemove",
            Self::ItemsRemove => "itemsRemove",
            Self::OrderUpdated => "orderUpdated",
            Self::ItemOfConformitiesUpdate => "itemOfConformitiesUpdate",
        }
    }
}

/// Structured change event addressed to one pipeline's topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineChangeEvent {
    #[serde(rename = "_id")]
    pub pipeline_id: String,
    #[serde(rename = "proccessId")]
    pub process_id: String,
    pub action: PipelineEventAction,
    pub data: serde_json::Value,
}

impl PipelineChangeEvent {
    pub fn topic(&self) -> String {
        pipeline_topic(&self.pipeline_id)
    }

    pub fn item_add(
        pipeline_id: &str,
        process_id: &str,
        item: &BoardItem,
        above_item_id: Option<&str>,
        destination_stage_id: &str,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            process_id: process_id.to_string(),
            action: PipelineEventAction::ItemAdd,
            data: json!({
                "item": item,
                "aboveItemId": above_item_id.unwrap_or_default(),
                "destinationStageId": destination_stage_id,
            }),
        }
    }

    pub fn item_update(pipeline_id: &str, process_id: &str, item: &BoardItem) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            process_id: process_id.to_string(),
            action: PipelineEventAction::ItemUpdate,
            data: json!({ "item": item }),
        }
    }

    pub fn item_remove(
        pipeline_id: &str,
        process_id: &str,
        item: &BoardItem,
        old_stage_id: &str,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            process_id: process_id.to_string(),
            action: PipelineEventAction::ItemRemove,
            data: json!({
                "item": item,
                "oldStageId": old_stage_id,
            }),
        }
    }

    /// Per-item event of the bulk stage archive; intentionally one event per
    /// item because board UIs key off per-item topics.
    pub fn items_remove(
        pipeline_id: &str,
        process_id: &str,
        item: &BoardItem,
        destination_stage_id: &str,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            process_id: process_id.to_string(),
            action: PipelineEventAction::ItemsRemove,
            data: json!({
                "item": item,
                "destinationStageId": destination_stage_id,
            }),
        }
    }

    pub fn order_updated(
        pipeline_id: &str,
        process_id: &str,
        item: &BoardItem,
        above_item_id: Option<&str>,
        destination_stage_id: &str,
        old_stage_id: &str,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            process_id: process_id.to_string(),
            action: PipelineEventAction::OrderUpdated,
            data: json!({
                "item": item,
                "aboveItemId": above_item_id.unwrap_or_default(),
                "destinationStageId": destination_stage_id,
                "oldStageId": old_stage_id,
            }),
        }
    }

    pub fn conformities_update(pipeline_id: &str, item: &BoardItem) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            process_id: uuid_v7_without_dashes(),
            action: PipelineEventAction::ItemOfConformitiesUpdate,
            data: json!({ "item": item }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_keyed_by_pipeline_id() {
        assert_eq!(
            pipeline_topic("pipe-1"),
            "salesPipelinesChanged:pipe-1".to_string()
        );
    }

    #[test]
    fn action_wire_names_are_camel_case() {
        assert_eq!(PipelineEventAction::ItemAdd.as_str(), "itemAdd");
        assert_eq!(PipelineEventAction::OrderUpdated.as_str(), "orderUpdated");
        assert_eq!(
            PipelineEventAction::ItemOfConformitiesUpdate.as_str(),
            "itemOfConformitiesUpdate"
        );
    }
}
