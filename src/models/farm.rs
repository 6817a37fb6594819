use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Outcome of processing one (farm, date).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateStatus {
    Filled,
    AlreadyFilled,
    NoIrrigation,
    Error,
    Skipped,
}

impl DateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateStatus::Filled => "filled",
            DateStatus::AlreadyFilled => "already_filled",
            DateStatus::NoIrrigation => "no_irrigation",
            DateStatus::Error => "error",
            DateStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateResult {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_time: Option<String>,
    pub status: DateStatus,
    #[serde(default)]
    pub points_analyzed: usize,
    #[serde(default)]
    pub y_range: f64,
    /// Free-form detail: error text, skip reason, planned-only note.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

impl DateResult {
    pub fn bare(date: NaiveDate, status: DateStatus) -> Self {
        Self {
            date,
            first_time: None,
            last_time: None,
            status,
            points_analyzed: 0,
            y_range: 0.0,
            note: String::new(),
        }
    }
}

/// Per-farm record. Created and mutated only by the orchestrator and
/// persisted when the farm's date loop finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmRecord {
    pub farm_id: String,
    pub section_id: String,
    pub display_name: String,
    pub manager: String,
    pub dates: Vec<DateResult>,
}

/// A farm anchor extracted from the list page, before any processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmLink {
    pub farm_id: String,
    pub section_id: String,
    pub display_name: String,
    pub href: String,
}

/// Shape of `data/all-farms-data-<timestamp>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub extracted_at: String,
    pub manager: String,
    pub date_range: DateRangeInfo,
    pub total_farms: usize,
    pub farms_with_data: usize,
    pub total_dates_processed: usize,
    pub total_dates_with_data: usize,
    pub farms: Vec<FarmRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeInfo {
    pub description: String,
    pub total_days: usize,
}
