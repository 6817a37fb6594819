use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Minimum number of samples a series must carry before analysis.
pub const MIN_POINTS: usize = 10;

/// One sensor sample. `t` is site-local wall time at (roughly) minute
/// resolution; `y` is the selected moisture/weight reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub t: NaiveDateTime,
    pub y: f64,
}

/// Normalized single-node sensor series for one (farm, date).
/// `t` is non-decreasing across `points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSeries {
    pub farm_id: String,
    pub date: NaiveDate,
    pub points: Vec<Point>,
}

impl SensorSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn y_min(&self) -> f64 {
        self.points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min)
    }

    pub fn y_max(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.y)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Full vertical extent of the series. 0.0 for an empty series.
    pub fn y_range(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.y_max() - self.y_min()
    }
}

/// A detected irrigation event: the valley the surge started from and the
/// crest it reached. Invariants: `valley_index <= peak_index < len` and
/// `rise > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrrigationEvent {
    pub valley_index: usize,
    pub peak_index: usize,
    pub rise: f64,
    pub valley_time: NaiveDateTime,
    pub peak_time: NaiveDateTime,
}
