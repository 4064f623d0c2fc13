use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{fmt, str::FromStr};

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub length: Option<f64>,
}

/// An item read from the source catalog. Never mutated by the engine.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub description: String,
}

/// Creation payload handed to the destination marketplace.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDestinationItem {
    pub title: String,
    pub price: f64,
    pub description: String,
    pub category_id: String,
    pub picture_ids: Vec<String>,
    pub weight: Option<f64>,
    pub dimensions: Option<Dimensions>,
    pub source_id: String,
}

impl NewDestinationItem {
    pub fn from_source(item: &SourceItem, category_id: String, picture_ids: Vec<String>) -> Self {
        Self {
            title: item.name.trim().to_string(),
            price: item.price,
            description: item.description.clone(),
            category_id,
            picture_ids,
            weight: item.weight,
            dimensions: item.dimensions.clone(),
            source_id: item.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Error => "error",
        }
    }
}

impl FromStr for ResultStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "success" => Ok(ResultStatus::Success),
            "error" => Ok(ResultStatus::Error),
            other => Err(format!("unknown result status {other:?}")),
        }
    }
}

/// One settled migration attempt as kept in the results ledger.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: String,
    pub name: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub retry_count: u32,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    BatchStart,
    ItemStart,
    ItemRetry,
    ItemSuccess,
    ItemFailed,
    BatchComplete,
    ScheduleSet,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BatchStart => "BATCH_START",
            AuditAction::ItemStart => "ITEM_START",
            AuditAction::ItemRetry => "ITEM_RETRY",
            AuditAction::ItemSuccess => "ITEM_SUCCESS",
            AuditAction::ItemFailed => "ITEM_FAILED",
            AuditAction::BatchComplete => "BATCH_COMPLETE",
            AuditAction::ScheduleSet => "SCHEDULE_SET",
        }
    }

    pub fn is_item_terminal(&self) -> bool {
        matches!(self, AuditAction::ItemSuccess | AuditAction::ItemFailed)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub details: String,
    pub session_id: String,
}

impl AuditLogEntry {
    pub fn new(action: AuditAction, details: impl Into<String>, session_id: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            details: details.into(),
            session_id: session_id.to_string(),
        }
    }
}

/// A source item whose last migration attempt failed after exhausting retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    #[serde(flatten)]
    pub item: SourceItem,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedItem {
    pub fn new(item: SourceItem, error: impl Into<String>) -> Self {
        Self {
            item,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_item_defaults_missing_fields() {
        let item: SourceItem = serde_json::from_value(json!({ "id": "7" })).expect("parse");
        assert_eq!(item.name, "");
        assert!(item.images.is_empty());
        assert!(item.dimensions.is_none());
    }

    #[test]
    fn failed_item_flattens_source_fields() {
        let failed = FailedItem::new(
            SourceItem {
                id: "42".into(),
                name: "Lamp".into(),
                price: 10.0,
                description: "desk lamp".into(),
                weight: None,
                dimensions: None,
                images: vec![],
            },
            "no category detected",
        );
        let value = serde_json::to_value(&failed).expect("serialize");
        assert_eq!(value["id"], json!("42"));
        assert_eq!(value["error"], json!("no category detected"));
        assert!(value.get("weight").is_none());
        let back: FailedItem = serde_json::from_value(value).expect("parse");
        assert_eq!(back, failed);
    }

    #[test]
    fn audit_action_wire_names() {
        let value = serde_json::to_value(AuditAction::BatchComplete).unwrap();
        assert_eq!(value, json!("BATCH_COMPLETE"));
        assert_eq!(AuditAction::ScheduleSet.to_string(), "SCHEDULE_SET");
        assert!(AuditAction::ItemFailed.is_item_terminal());
        assert!(!AuditAction::ItemRetry.is_item_terminal());
    }

    #[test]
    fn result_status_parses_wire_names() {
        assert_eq!(" success".parse::<ResultStatus>(), Ok(ResultStatus::Success));
        assert_eq!("error".parse::<ResultStatus>(), Ok(ResultStatus::Error));
        assert!("pending".parse::<ResultStatus>().is_err());
    }
}
