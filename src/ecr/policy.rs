// ECR lifecycle (retention) policy document

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Number of images kept in a repository; older ones are expired by ECR.
pub const RETAINED_IMAGE_COUNT: u32 = 10;

/// Root of an ECR lifecycle policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub rules: Vec<LifecycleRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    pub rule_priority: u32,
    pub description: String,
    pub selection: RuleSelection,
    pub action: RuleAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSelection {
    pub tag_status: TagStatus,
    pub count_type: CountType,
    pub count_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagStatus {
    Any,
    Tagged,
    Untagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CountType {
    ImageCountMoreThan,
    SinceImagePushed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: String,
}

impl LifecyclePolicy {
    /// A single rule expiring every image beyond the `count` most recent ones,
    /// tagged or not.
    pub fn keep_last(count: u32) -> Self {
        Self {
            rules: vec![LifecycleRule {
                rule_priority: 1,
                description: format!("Keep only the last {} images", count),
                selection: RuleSelection {
                    tag_status: TagStatus::Any,
                    count_type: CountType::ImageCountMoreThan,
                    count_number: count,
                },
                action: RuleAction {
                    kind: "expire".to_string(),
                },
            }],
        }
    }

    /// Render the policy text as ECR expects it in `PutLifecyclePolicy`
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize lifecycle policy")
    }
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::keep_last(RETAINED_IMAGE_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_keeps_last_ten_of_any_status() {
        let policy = LifecyclePolicy::default();
        assert_eq!(policy.rules.len(), 1);
        let rule = &policy.rules[0];
        assert_eq!(rule.selection.count_number, 10);
        assert_eq!(rule.selection.tag_status, TagStatus::Any);
        assert_eq!(rule.selection.count_type, CountType::ImageCountMoreThan);
        assert_eq!(rule.action.kind, "expire");
    }

    #[test]
    fn test_policy_json_matches_ecr_document_shape() {
        let json = LifecyclePolicy::default().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "rules": [{
                    "rulePriority": 1,
                    "description": "Keep only the last 10 images",
                    "selection": {
                        "tagStatus": "any",
                        "countType": "imageCountMoreThan",
                        "countNumber": 10
                    },
                    "action": { "type": "expire" }
                }]
            })
        );
    }
}
