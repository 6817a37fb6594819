//! Right-hand panel reading: the two irrigation-time cells, the
//! fill/skip decision matrix, and the report-sending precondition check.

use serde_json::Value;

use crate::browser::Browser;
use crate::config::TableLabels;
use crate::error::AutomationError;

/// Normalize one cell's text. The site renders empty slots a few
/// different ways; anything that is not a plausible `HH:MM` time counts
/// as empty.
pub fn normalize_cell(raw: &str) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() || text == "-" || text == "—" || text == "--:--" {
        return None;
    }
    if text.contains("클릭") {
        return None;
    }
    is_hhmm(text).then(|| text.to_string())
}

fn is_hhmm(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return false;
    }
    let (Ok(h), Ok(m)) = (h.parse::<u32>(), m.parse::<u32>()) else {
        return false;
    };
    h < 24 && m < 60
}

/// The two time cells, already normalized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeCells {
    pub first_time: Option<String>,
    pub last_time: Option<String>,
}

impl TimeCells {
    pub fn needs_first_click(&self) -> bool {
        self.first_time.is_none()
    }

    pub fn needs_last_click(&self) -> bool {
        self.last_time.is_none()
    }

    pub fn is_fully_filled(&self) -> bool {
        self.first_time.is_some() && self.last_time.is_some()
    }
}

/// What to do with one date, per the decision matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateAction {
    AlreadyFilled,
    NoIrrigation,
    Click { first: bool, last: bool },
}

pub fn decide(cells: &TimeCells, events_found: usize) -> DateAction {
    if cells.is_fully_filled() {
        return DateAction::AlreadyFilled;
    }
    if events_found == 0 {
        return DateAction::NoIrrigation;
    }
    DateAction::Click {
        first: cells.needs_first_click(),
        last: cells.needs_last_click(),
    }
}

/// Raw cells of the report-sending validation table.
#[derive(Debug, Clone, Default)]
pub struct ReportRow {
    pub night_deviation: String,
    pub last_feed: String,
    pub first_feed: String,
    pub sunrise: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReportCheck {
    pub reasons: Vec<String>,
}

impl ReportCheck {
    pub fn ok(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn reason(&self) -> String {
        self.reasons.join("; ")
    }
}

/// All four equalities must hold before "리포트 생성" may be pressed.
pub fn validate_report_row(row: &ReportRow, labels: &TableLabels) -> ReportCheck {
    let mut reasons = Vec::new();
    if row.night_deviation.trim() != "-" {
        reasons.push(format!("{} must be \"-\"", labels.night_deviation));
    }
    if row.last_feed.trim() != "-" {
        reasons.push(format!("{} must be \"-\"", labels.last_feed));
    }
    let first = row.first_feed.trim();
    if first.is_empty() || first == "-" {
        reasons.push(format!("{} must be filled", labels.first_feed));
    }
    let sunrise = row.sunrise.trim();
    if sunrise.is_empty() || sunrise == "-" {
        reasons.push(format!("{} must be filled", labels.sunrise));
    }
    ReportCheck { reasons }
}

/// Reads labeled cells out of the live page.
pub struct TableInspector {
    pub labels: TableLabels,
}

impl TableInspector {
    pub fn new(labels: TableLabels) -> Self {
        Self { labels }
    }

    pub async fn read_time_cells(
        &self,
        browser: &dyn Browser,
    ) -> Result<TimeCells, AutomationError> {
        let script = cell_read_script(&[
            ("first", &self.labels.first_cell),
            ("last", &self.labels.last_cell),
        ]);
        let value = browser.eval(&script).await?;
        Ok(TimeCells {
            first_time: field(&value, "first").as_deref().and_then(normalize_cell),
            last_time: field(&value, "last").as_deref().and_then(normalize_cell),
        })
    }

    pub async fn read_report_row(
        &self,
        browser: &dyn Browser,
    ) -> Result<ReportRow, AutomationError> {
        let script = cell_read_script(&[
            ("night_deviation", &self.labels.night_deviation),
            ("last_feed", &self.labels.last_feed),
            ("first_feed", &self.labels.first_feed),
            ("sunrise", &self.labels.sunrise),
        ]);
        let value = browser.eval(&script).await?;
        Ok(ReportRow {
            night_deviation: field(&value, "night_deviation").unwrap_or_default(),
            last_feed: field(&value, "last_feed").unwrap_or_default(),
            first_feed: field(&value, "first_feed").unwrap_or_default(),
            sunrise: field(&value, "sunrise").unwrap_or_default(),
        })
    }
}

fn field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// One page script reading several label→value cells at once. A label
/// matches a leaf element with exactly that trimmed text; the value is
/// its next sibling, falling back to the row's last cell.
fn cell_read_script(fields: &[(&str, &String)]) -> String {
    let reads: Vec<String> = fields
        .iter()
        .map(|(key, label)| {
            format!(
                "{key}: read({label})",
                label = serde_json::to_string(label).unwrap_or_default()
            )
        })
        .collect();
    format!(
        r#"
(() => {{
  const read = (label) => {{
    const leaves = Array.from(document.querySelectorAll('td, th, div, span, dt, label'))
      .filter((el) => el.children.length === 0);
    const hit = leaves.find((el) => el.textContent.trim() === label);
    if (!hit) return null;
    let node = hit;
    while (node && !node.nextElementSibling) node = node.parentElement;
    if (node && node.nextElementSibling) return node.nextElementSibling.textContent.trim();
    const row = hit.closest('tr');
    if (row && row.lastElementChild) return row.lastElementChild.textContent.trim();
    return null;
  }};
  return {{ {reads} }};
}})()
"#,
        reads = reads.join(", ")
    )
}
