use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A page-space coordinate (CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickPoint {
    pub x: f64,
    pub y: f64,
}

/// Coordinates for the first/last irrigation-time slots. A single-event
/// date carries the same point in both slots.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<ClickPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<ClickPoint>,
}

/// One training-mode observation, appended to
/// `training/training-data.json`. `offsets = user − algorithm`, present
/// only when the operator actually corrected a click.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSample {
    pub timestamp: String,
    pub farm: String,
    pub date: NaiveDate,
    pub algorithm_detection: SlotPair,
    #[serde(default)]
    pub user_corrections: Option<SlotPair>,
    #[serde(default)]
    pub offsets: Option<SlotPair>,
    #[serde(default)]
    pub feedback: String,
}

/// Mean correction offsets over all user-corrected samples.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AveragedOffsets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<ClickPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<ClickPoint>,
    #[serde(default)]
    pub samples: usize,
}

impl LearningSample {
    /// Derive the offset pair from algorithm vs user coordinates. None when
    /// the operator never clicked.
    pub fn compute_offsets(algorithm: &SlotPair, user: &SlotPair) -> Option<SlotPair> {
        let first = match (algorithm.first, user.first) {
            (Some(a), Some(u)) => Some(ClickPoint {
                x: u.x - a.x,
                y: u.y - a.y,
            }),
            _ => None,
        };
        let last = match (algorithm.last, user.last) {
            (Some(a), Some(u)) => Some(ClickPoint {
                x: u.x - a.x,
                y: u.y - a.y,
            }),
            _ => None,
        };
        if first.is_none() && last.is_none() {
            None
        } else {
            Some(SlotPair { first, last })
        }
    }
}
