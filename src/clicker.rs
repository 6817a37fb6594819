//! Chart-click coordination: translate detected sample indices into page
//! coordinates and drive the focus/click/settle sequence. The hosting
//! chart snaps a click to the nearest data point on the x-axis, so a
//! linear mapping into the chart rectangle is sufficient.

use std::time::Duration;

use serde_json::Value;

use crate::browser::{Browser, Rect};
use crate::error::AutomationError;
use crate::models::{AveragedOffsets, ClickPoint, Mode};

/// Vertical lift applied so the click lands inside the chart library's
/// clickable band instead of on the axis line.
pub const CHART_CLICK_LIFT_PX: f64 = 15.0;

const LEARNING_POLL_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedClick {
    pub index: usize,
    pub x: f64,
    pub y: f64,
}

/// Linear index→coordinate mapping, mid-height minus the lift, plus any
/// learned offset.
pub fn plan_click(
    chart: &Rect,
    index: usize,
    len: usize,
    offset: Option<ClickPoint>,
) -> PlannedClick {
    let fraction = if len == 0 {
        0.0
    } else {
        index as f64 / len as f64
    };
    let mut x = chart.x + fraction * chart.width;
    let mut y = chart.y + chart.height / 2.0 - CHART_CLICK_LIFT_PX;
    if let Some(o) = offset {
        x += o.x;
        y += o.y;
    }
    PlannedClick { index, x, y }
}

/// What the operator did during a learning-mode window.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningDecision {
    pub confirmed: bool,
    pub user_first: Option<ClickPoint>,
    pub user_last: Option<ClickPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// Clicks dispatched to the page.
    Performed {
        first: PlannedClick,
        last: PlannedClick,
    },
    /// Watch mode: coordinates logged, nothing touched.
    PlannedOnly {
        first: PlannedClick,
        last: PlannedClick,
    },
    /// Learning mode: operator verdict plus any correction clicks.
    Learning {
        first: PlannedClick,
        last: PlannedClick,
        decision: LearningDecision,
    },
}

pub struct ChartClicker {
    pub mode: Mode,
    pub offsets: AveragedOffsets,
    pub time_inputs: String,
    pub settle: Duration,
    pub learning_wait: Duration,
}

impl ChartClicker {
    /// Place the first/last clicks for one date. `need_first`/`need_last`
    /// come from the table inspector; a slot that is already filled is
    /// left alone.
    pub async fn place(
        &self,
        browser: &dyn Browser,
        chart: &Rect,
        series_len: usize,
        first_index: usize,
        last_index: usize,
        need_first: bool,
        need_last: bool,
    ) -> Result<ClickOutcome, AutomationError> {
        let first = plan_click(chart, first_index, series_len, self.offsets.first);
        let last = plan_click(chart, last_index, series_len, self.offsets.last);

        match self.mode {
            Mode::Watch => {
                tracing::info!(
                    "clicker: watch mode — planned first=({:.0},{:.0}) last=({:.0},{:.0})",
                    first.x,
                    first.y,
                    last.x,
                    last.y
                );
                Ok(ClickOutcome::PlannedOnly { first, last })
            }
            Mode::Learning => {
                let decision = self
                    .learning_window(browser, &first, &last)
                    .await?;
                if decision.confirmed {
                    self.perform(browser, &first, &last, need_first, need_last)
                        .await?;
                }
                Ok(ClickOutcome::Learning {
                    first,
                    last,
                    decision,
                })
            }
            Mode::Normal | Mode::ReportSending => {
                self.perform(browser, &first, &last, need_first, need_last)
                    .await?;
                Ok(ClickOutcome::Performed { first, last })
            }
        }
    }

    /// Focus first input, click first coordinate, settle; then the same
    /// for the last slot.
    async fn perform(
        &self,
        browser: &dyn Browser,
        first: &PlannedClick,
        last: &PlannedClick,
        need_first: bool,
        need_last: bool,
    ) -> Result<(), AutomationError> {
        if need_first {
            self.focus_time_input(browser, 0).await?;
            browser.click_at(first.x, first.y).await?;
            tokio::time::sleep(self.settle).await;
        }
        if need_last {
            self.focus_time_input(browser, 1).await?;
            browser.click_at(last.x, last.y).await?;
            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }

    async fn focus_time_input(
        &self,
        browser: &dyn Browser,
        slot: usize,
    ) -> Result<(), AutomationError> {
        let script = format!(
            "(() => {{ const inputs = document.querySelectorAll({sel}); \
             if (inputs[{slot}]) {{ inputs[{slot}].focus(); return true; }} return false; }})()",
            sel = serde_json::to_string(&self.time_inputs).unwrap_or_default(),
        );
        let focused = browser.eval(&script).await?;
        if focused.as_bool() != Some(true) {
            return Err(AutomationError::DomContract {
                what: format!("time input {slot}"),
                selector: self.time_inputs.clone(),
            });
        }
        Ok(())
    }

    /// Draw the RED/BLUE markers, arm the key/click listener, then wait
    /// for the operator or the deadline. Timeout defaults to confirm.
    async fn learning_window(
        &self,
        browser: &dyn Browser,
        first: &PlannedClick,
        last: &PlannedClick,
    ) -> Result<LearningDecision, AutomationError> {
        browser.eval(&overlay_script(first, last)).await?;

        let deadline = tokio::time::Instant::now() + self.learning_wait;
        let verdict = loop {
            let state = browser.eval(LEARNING_READ_SCRIPT).await?;
            match state.get("decision").and_then(Value::as_str) {
                Some("confirm") => break Some((true, state)),
                Some("skip") => break Some((false, state)),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(Duration::from_millis(LEARNING_POLL_MS)).await;
        };

        let (confirmed, state) = match verdict {
            Some((confirmed, state)) => (confirmed, state),
            None => {
                tracing::info!("clicker: learning window timed out, defaulting to confirm");
                let state = browser.eval(LEARNING_READ_SCRIPT).await?;
                (true, state)
            }
        };
        browser.eval(OVERLAY_CLEANUP_SCRIPT).await?;

        let clicks: Vec<ClickPoint> = state
            .get("clicks")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| {
                        Some(ClickPoint {
                            x: c.get("x")?.as_f64()?,
                            y: c.get("y")?.as_f64()?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(LearningDecision {
            confirmed,
            user_first: clicks.first().copied(),
            user_last: clicks.get(1).copied(),
        })
    }
}

const LEARNING_READ_SCRIPT: &str =
    "(() => window.__irrigoLearn || { decision: null, clicks: [] })()";

const OVERLAY_CLEANUP_SCRIPT: &str = r#"
(() => {
  document.querySelectorAll('.irrigo-marker').forEach((el) => el.remove());
  if (window.__irrigoLearnTeardown) { window.__irrigoLearnTeardown(); }
  return true;
})()
"#;

fn overlay_script(first: &PlannedClick, last: &PlannedClick) -> String {
    format!(
        r#"
(() => {{
  window.__irrigoLearn = {{ decision: null, clicks: [] }};
  const marker = (x, y, color) => {{
    const el = document.createElement('div');
    el.className = 'irrigo-marker';
    el.style.cssText = 'position:fixed;width:14px;height:14px;border-radius:50%;' +
      'z-index:99999;pointer-events:none;border:2px solid #fff;background:' + color +
      ';left:' + (x - 7) + 'px;top:' + (y - 7) + 'px;';
    document.body.appendChild(el);
  }};
  marker({fx}, {fy}, 'red');
  marker({lx}, {ly}, 'blue');
  const onKey = (e) => {{
    if (e.key === 'Enter') window.__irrigoLearn.decision = 'confirm';
    if (e.key === 'Escape') window.__irrigoLearn.decision = 'skip';
  }};
  const onClick = (e) => {{
    if (window.__irrigoLearn.clicks.length < 2)
      window.__irrigoLearn.clicks.push({{ x: e.clientX, y: e.clientY }});
  }};
  document.addEventListener('keydown', onKey, true);
  document.addEventListener('click', onClick, true);
  window.__irrigoLearnTeardown = () => {{
    document.removeEventListener('keydown', onKey, true);
    document.removeEventListener('click', onClick, true);
  }};
  return true;
}})()
"#,
        fx = first.x,
        fy = first.y,
        lx = last.x,
        ly = last.y,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeBrowser, FakeClick};
    use serde_json::json;

    fn chart() -> Rect {
        Rect {
            x: 100.0,
            y: 200.0,
            width: 1440.0,
            height: 330.0,
        }
    }

    fn clicker(mode: Mode) -> ChartClicker {
        ChartClicker {
            mode,
            offsets: AveragedOffsets::default(),
            time_inputs: "input[type=\"time\"]".to_string(),
            settle: Duration::from_millis(0),
            learning_wait: Duration::from_millis(0),
        }
    }

    #[test]
    fn plan_maps_index_linearly_with_lift() {
        let click = plan_click(&chart(), 720, 1440, None);
        assert!((click.x - (100.0 + 720.0)).abs() < 1e-9);
        assert!((click.y - (200.0 + 165.0 - CHART_CLICK_LIFT_PX)).abs() < 1e-9);
    }

    #[test]
    fn plan_applies_learning_offsets() {
        let offset = ClickPoint { x: 4.0, y: -2.0 };
        let click = plan_click(&chart(), 0, 1440, Some(offset));
        assert!((click.x - 104.0).abs() < 1e-9);
        assert!((click.y - (200.0 + 165.0 - CHART_CLICK_LIFT_PX - 2.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn normal_mode_focuses_then_clicks_both_slots() {
        let browser = FakeBrowser::new();
        browser.stub_eval("inputs[0]", json!(true));
        browser.stub_eval("inputs[1]", json!(true));

        let outcome = clicker(Mode::Normal)
            .place(&browser, &chart(), 1440, 600, 900, true, true)
            .await
            .unwrap();

        assert!(matches!(outcome, ClickOutcome::Performed { .. }));
        let clicks = browser.coordinate_clicks();
        assert_eq!(clicks.len(), 2);
        assert!(clicks[0].0 < clicks[1].0, "first slot clicked before last");
    }

    #[tokio::test]
    async fn watch_mode_touches_nothing() {
        let browser = FakeBrowser::new();
        let outcome = clicker(Mode::Watch)
            .place(&browser, &chart(), 1440, 600, 900, true, true)
            .await
            .unwrap();
        assert!(matches!(outcome, ClickOutcome::PlannedOnly { .. }));
        assert!(browser.state.lock().unwrap().clicks.is_empty());
        assert!(browser.state.lock().unwrap().fills.is_empty());
    }

    #[tokio::test]
    async fn only_the_needed_slot_is_clicked() {
        let browser = FakeBrowser::new();
        browser.stub_eval("inputs[1]", json!(true));
        clicker(Mode::Normal)
            .place(&browser, &chart(), 1440, 600, 900, false, true)
            .await
            .unwrap();
        let clicks = browser.coordinate_clicks();
        assert_eq!(clicks.len(), 1);
    }

    #[tokio::test]
    async fn learning_skip_prevents_clicks() {
        let browser = FakeBrowser::new();
        browser.stub_eval(
            "__irrigoLearn ||",
            json!({ "decision": "skip", "clicks": [] }),
        );
        let outcome = clicker(Mode::Learning)
            .place(&browser, &chart(), 1440, 600, 900, true, true)
            .await
            .unwrap();
        match outcome {
            ClickOutcome::Learning { decision, .. } => {
                assert!(!decision.confirmed);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(browser.coordinate_clicks().is_empty());
    }

    #[tokio::test]
    async fn learning_timeout_defaults_to_confirm_and_captures_clicks() {
        let browser = FakeBrowser::new();
        browser.stub_eval(
            "__irrigoLearn ||",
            json!({ "decision": null, "clicks": [ { "x": 710.0, "y": 340.0 } ] }),
        );
        browser.stub_eval("inputs[0]", json!(true));
        browser.stub_eval("inputs[1]", json!(true));

        let outcome = clicker(Mode::Learning)
            .place(&browser, &chart(), 1440, 600, 900, true, true)
            .await
            .unwrap();
        match outcome {
            ClickOutcome::Learning { decision, .. } => {
                assert!(decision.confirmed);
                let user = decision.user_first.unwrap();
                assert!((user.x - 710.0).abs() < 1e-9);
                assert!(decision.user_last.is_none());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // confirmed → the algorithm clicks went through
        assert_eq!(browser.coordinate_clicks().len(), 2);
    }

    #[tokio::test]
    async fn missing_time_input_is_a_dom_contract_error() {
        let browser = FakeBrowser::new();
        // no stub: focus eval returns Null
        let err = clicker(Mode::Normal)
            .place(&browser, &chart(), 1440, 600, 900, true, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::DomContract { .. }));
        assert!(browser
            .state
            .lock()
            .unwrap()
            .clicks
            .iter()
            .all(|c| !matches!(c, FakeClick::At(_, _))));
    }
}
