//! Scripted in-memory driver for tests. Records every action and answers
//! `eval` from substring-keyed stubs.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Browser, Rect, TappedResponse};
use crate::error::AutomationError;

#[derive(Debug, Clone, PartialEq)]
pub enum FakeClick {
    Selector(String),
    At(f64, f64),
}

#[derive(Default)]
pub struct FakeState {
    pub visited: Vec<String>,
    pub clicks: Vec<FakeClick>,
    pub fills: Vec<(String, String)>,
    pub eval_log: Vec<String>,
    /// `(script substring, canned result)`; first match wins, else Null.
    pub eval_stubs: Vec<(String, Value)>,
    /// Like `eval_stubs`, but answers shift forward per call; the final
    /// value sticks.
    pub eval_stub_seqs: Vec<(String, Vec<Value>)>,
    /// Selectors `wait_for_selector` should report as missing.
    pub missing_selectors: Vec<String>,
    pub rects: Vec<(String, Rect)>,
    /// Returned (and cleared) by the next `drain_response_tap`.
    pub tap_responses: Vec<TappedResponse>,
    pub tap_installs: usize,
    pub fail_goto: bool,
}

#[derive(Default)]
pub struct FakeBrowser {
    pub state: Mutex<FakeState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub_eval(&self, script_fragment: &str, result: Value) {
        self.state
            .lock()
            .unwrap()
            .eval_stubs
            .push((script_fragment.to_string(), result));
    }

    pub fn stub_eval_seq(&self, script_fragment: &str, results: Vec<Value>) {
        self.state
            .lock()
            .unwrap()
            .eval_stub_seqs
            .push((script_fragment.to_string(), results));
    }

    pub fn push_tap_response(&self, response: TappedResponse) {
        self.state.lock().unwrap().tap_responses.push(response);
    }

    pub fn coordinate_clicks(&self) -> Vec<(f64, f64)> {
        self.state
            .lock()
            .unwrap()
            .clicks
            .iter()
            .filter_map(|c| match c {
                FakeClick::At(x, y) => Some((*x, *y)),
                FakeClick::Selector(_) => None,
            })
            .collect()
    }

    pub fn visited(&self) -> Vec<String> {
        self.state.lock().unwrap().visited.clone()
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_goto {
            return Err(AutomationError::Network("navigation refused".to_string()));
        }
        state.visited.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .visited
            .last()
            .cloned()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn wait_for_selector(
        &self,
        css: &str,
        _timeout: Duration,
    ) -> Result<(), AutomationError> {
        let state = self.state.lock().unwrap();
        if state.missing_selectors.iter().any(|s| s == css) {
            return Err(AutomationError::DomContract {
                what: "element".to_string(),
                selector: css.to_string(),
            });
        }
        Ok(())
    }

    async fn eval(&self, script: &str) -> Result<Value, AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.eval_log.push(script.to_string());
        for (fragment, results) in &mut state.eval_stub_seqs {
            if script.contains(fragment.as_str()) && !results.is_empty() {
                if results.len() > 1 {
                    return Ok(results.remove(0));
                }
                return Ok(results[0].clone());
            }
        }
        for (fragment, result) in &state.eval_stubs {
            if script.contains(fragment.as_str()) {
                return Ok(result.clone());
            }
        }
        Ok(Value::Null)
    }

    async fn click(&self, css: &str) -> Result<(), AutomationError> {
        self.state
            .lock()
            .unwrap()
            .clicks
            .push(FakeClick::Selector(css.to_string()));
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        self.state.lock().unwrap().clicks.push(FakeClick::At(x, y));
        Ok(())
    }

    async fn fill(&self, css: &str, text: &str) -> Result<(), AutomationError> {
        self.state
            .lock()
            .unwrap()
            .fills
            .push((css.to_string(), text.to_string()));
        Ok(())
    }

    async fn bounding_rect(&self, css: &str) -> Result<Rect, AutomationError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rects
            .iter()
            .find(|(sel, _)| sel == css)
            .map(|(_, r)| *r)
            .unwrap_or(Rect {
                x: 0.0,
                y: 0.0,
                width: 1440.0,
                height: 300.0,
            }))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn page_source(&self) -> Result<String, AutomationError> {
        Ok("<html></html>".to_string())
    }

    async fn install_response_tap(&self) -> Result<(), AutomationError> {
        self.state.lock().unwrap().tap_installs += 1;
        Ok(())
    }

    async fn drain_response_tap(&self) -> Result<Vec<TappedResponse>, AutomationError> {
        Ok(std::mem::take(
            &mut self.state.lock().unwrap().tap_responses,
        ))
    }

    async fn close(&self) -> Result<(), AutomationError> {
        Ok(())
    }
}
