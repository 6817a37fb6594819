//! HSSP (Highest Slope Start Point) irrigation-event detection.
//!
//! A rolling window walks the series looking for a sustained moisture
//! rise; each surge is traced back to the valley it started from, gated
//! by daytime and rise floors, debounced, extended to the crest of the
//! rise, and finally de-duplicated by index separation. An empty result
//! is a valid no-irrigation signal, not an error.

use chrono::Timelike;

use crate::models::{IrrigationEvent, SensorSeries, MIN_POINTS};

/// Minutes between the compared samples of the rolling window.
pub const SURGE_WINDOW: usize = 10;
/// Fraction of the series' y-range that counts as a sustained rise.
pub const SURGE_THRESHOLD_PCT: f64 = 0.05;
/// Absolute lower bound for the surge threshold.
pub const SURGE_THRESHOLD_MIN: f64 = 0.10;
/// Floor on the valley-to-surge rise.
pub const MIN_RISE_ABSOLUTE: f64 = 0.05;
/// Minutes scanned backwards from a surge for its valley.
pub const LOOKBACK_WINDOW: usize = 30;
/// Minimum gap between accepted events.
pub const DEBOUNCE_MINUTES: usize = 60;
/// Secondary floor under the rise, kept from tuning.
pub const MIN_VALLEY_DEPTH: f64 = 0.03;
/// Valid local hours for an event's valley.
pub const DAYTIME_START: u32 = 7;
pub const DAYTIME_END: u32 = 17;
/// Events closer than this fraction of the series length are duplicates.
pub const MIN_SEPARATION_PCT: f64 = 0.05;

/// Samples skipped past an accepted valley before rescanning.
const REDETECT_GUARD: usize = 15;

/// Ordered set of accepted events for one series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub events: Vec<IrrigationEvent>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Earliest event by valley index.
    pub fn first(&self) -> Option<&IrrigationEvent> {
        self.events.first()
    }

    /// Latest event by valley index; equals `first()` for a single event.
    pub fn last(&self) -> Option<&IrrigationEvent> {
        self.events.last()
    }
}

/// Run the full HSSP pass over a normalized series.
pub fn detect_events(series: &SensorSeries) -> Detection {
    let n = series.len();
    if n < MIN_POINTS {
        return Detection::default();
    }

    let ys: Vec<f64> = series.points.iter().map(|p| p.y).collect();
    let y_range = series.y_range();
    let threshold = SURGE_THRESHOLD_MIN.max(y_range * SURGE_THRESHOLD_PCT);

    let mut candidates: Vec<IrrigationEvent> = Vec::new();
    let mut last_accepted: isize = -(DEBOUNCE_MINUTES as isize);

    let mut i = SURGE_WINDOW;
    while i + 5 < n {
        let surged = ys[i] - ys[i - SURGE_WINDOW] > threshold
            && i as isize > last_accepted + DEBOUNCE_MINUTES as isize;
        if surged {
            let window_start = i.saturating_sub(LOOKBACK_WINDOW);
            let mut valley = window_start;
            for j in window_start..=i {
                if ys[j] < ys[valley] {
                    valley = j;
                }
            }

            let rise_to_surge = ys[i] - ys[valley];
            let hour = series.points[valley].t.hour();
            if rise_to_surge >= MIN_VALLEY_DEPTH
                && rise_to_surge >= MIN_RISE_ABSOLUTE
                && (DAYTIME_START..=DAYTIME_END).contains(&hour)
            {
                let peak = extend_to_crest(&ys, i);
                candidates.push(IrrigationEvent {
                    valley_index: valley,
                    peak_index: peak,
                    rise: ys[peak] - ys[valley],
                    valley_time: series.points[valley].t,
                    peak_time: series.points[peak].t,
                });
                last_accepted = valley as isize;
                i = i.max(valley + REDETECT_GUARD);
            }
        }
        i += 1;
    }

    Detection {
        events: dedup_by_separation(candidates, n),
    }
}

/// Carry the surge sample forward to the top of the rise. Plateaus keep
/// extending; the first downtick stops it.
fn extend_to_crest(ys: &[f64], surge: usize) -> usize {
    let mut p = surge;
    while p + 1 < ys.len() && ys[p + 1] >= ys[p] {
        p += 1;
    }
    p
}

/// Candidates whose valleys sit within `len * MIN_SEPARATION_PCT` indices
/// of an accepted event are duplicates; the larger rise survives.
fn dedup_by_separation(candidates: Vec<IrrigationEvent>, len: usize) -> Vec<IrrigationEvent> {
    let min_separation = (len as f64 * MIN_SEPARATION_PCT) as usize;
    let mut accepted: Vec<IrrigationEvent> = Vec::new();
    for cand in candidates {
        match accepted
            .iter_mut()
            .find(|e| e.valley_index.abs_diff(cand.valley_index) < min_separation)
        {
            Some(existing) => {
                if cand.rise > existing.rise {
                    *existing = cand;
                }
            }
            None => accepted.push(cand),
        }
    }
    accepted.sort_by_key(|e| e.valley_index);
    accepted
}
