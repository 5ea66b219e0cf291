use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub stage_id: String,
    pub pipeline_id: String,
    pub name: String,
    pub can_edit_member_ids: Vec<String>,
    pub can_move_member_ids: Vec<String>,
}

impl Stage {
    /// Empty member lists mean the stage is unrestricted.
    pub fn allows_edit(&self, user_id: &str) -> bool {
        self.can_edit_member_ids.is_empty()
            || self.can_edit_member_ids.iter().any(|id| id == user_id)
    }

    pub fn allows_move(&self, user_id: &str) -> bool {
        self.can_move_member_ids.is_empty()
            || self.can_move_member_ids.iter().any(|id| id == user_id)
    }
}

/// Payment type declared on a pipeline; a configured `score_campaign_id`
/// ties payments of this type to a loyalty campaign.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PaymentTypeConfig {
    pub payment_type: String,
    pub title: String,
    pub score_campaign_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub pipeline_id: String,
    pub board_id: String,
    pub name: String,
    pub payment_types: Vec<PaymentTypeConfig>,
}

impl Pipeline {
    pub fn score_payment_types(&self) -> impl Iterator<Item = &PaymentTypeConfig> {
        self.payment_types
            .iter()
            .filter(|config| config.score_campaign_id.is_some())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub board_id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_member_list_is_unrestricted() {
        let stage = Stage {
            stage_id: "s1".to_string(),
            pipeline_id: "p1".to_string(),
            name: "New".to_string(),
            can_edit_member_ids: vec![],
            can_move_member_ids: vec!["u1".to_string()],
        };
        assert!(stage.allows_edit("anyone"));
        assert!(stage.allows_move("u1"));
        assert!(!stage.allows_move("u2"));
    }

    #[test]
    fn score_payment_types_requires_campaign() {
        let pipeline = Pipeline {
            pipeline_id: "p1".to_string(),
            board_id: "b1".to_string(),
            name: "Sales".to_string(),
            payment_types: vec![
                PaymentTypeConfig {
                    payment_type: "cash".to_string(),
                    title: "Cash".to_string(),
                    score_campaign_id: None,
                },
                PaymentTypeConfig {
                    payment_type: "golomt".to_string(),
                    title: "Golomt card".to_string(),
                    score_campaign_id: Some("camp-1".to_string()),
                },
            ],
        };
        let eligible: Vec<_> = pipeline.score_payment_types().collect();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].payment_type, "golomt");
    }
}
