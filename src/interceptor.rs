//! Sensor-payload capture over the browser's response tap.
//!
//! Per (farm, date) navigation the interceptor holds a single-slot
//! buffer: the first fetch/XHR response that is HTTP 200, JSON, and
//! carries a top-level `node.*` key is kept; later matches are ignored.
//! Arm before navigating — the slot is cleared then, and a response that
//! lands before the tap is re-installed in the fresh page is missed and
//! surfaces as a capture timeout.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;

use crate::browser::{Browser, TappedResponse};
use crate::error::AutomationError;

const CAPTURE_POLL_MS: u64 = 250;

/// The payload kept for one navigation.
#[derive(Debug, Clone)]
pub struct CapturedPayload {
    pub body: Value,
    pub url: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct NetworkInterceptor {
    slot: Mutex<Option<CapturedPayload>>,
}

impl NetworkInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the slot for the upcoming navigation.
    pub fn arm(&self) {
        *self.slot.lock().unwrap() = None;
    }

    /// Poll the tap until a sensor payload shows up or the deadline
    /// passes. Re-installs the tap each round so a fresh page picks it up.
    pub async fn wait_for_capture(
        &self,
        browser: &dyn Browser,
        timeout: Duration,
    ) -> Result<CapturedPayload, AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            browser.install_response_tap().await?;
            for response in browser.drain_response_tap().await? {
                self.offer(&response);
            }
            if let Some(payload) = self.slot.lock().unwrap().clone() {
                return Ok(payload);
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::CaptureTimeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(CAPTURE_POLL_MS)).await;
        }
    }

    /// Store the response if it matches and the slot is still free.
    fn offer(&self, response: &TappedResponse) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            return;
        }
        if let Some(body) = Self::matches(response) {
            tracing::debug!("capture: sensor payload from {}", response.url);
            *slot = Some(CapturedPayload {
                body,
                url: response.url.clone(),
                captured_at: Utc::now(),
            });
        }
    }

    /// Filter chain: fetch/xhr, status 200, JSON content type, body
    /// parses once, top-level object with a `node.*` key.
    fn matches(response: &TappedResponse) -> Option<Value> {
        if response.kind != "fetch" && response.kind != "xhr" {
            return None;
        }
        if response.status != 200 {
            return None;
        }
        if !response.content_type.to_ascii_lowercase().contains("json") {
            return None;
        }
        let body: Value = serde_json::from_str(&response.body).ok()?;
        let has_node_key = body
            .as_object()
            .is_some_and(|obj| obj.keys().any(|k| k.starts_with("node.")));
        has_node_key.then_some(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use serde_json::json;

    fn sensor_response(url: &str, y: f64) -> TappedResponse {
        TappedResponse {
            kind: "fetch".to_string(),
            url: url.to_string(),
            status: 200,
            content_type: "application/json; charset=utf-8".to_string(),
            body: json!({ "node.a1": [{ "slabwgt_1": y }] }).to_string(),
        }
    }

    #[tokio::test]
    async fn first_matching_response_wins() {
        let browser = FakeBrowser::new();
        browser.push_tap_response(sensor_response("https://x/api/one", 12.5));
        browser.push_tap_response(sensor_response("https://x/api/two", 99.0));

        let interceptor = NetworkInterceptor::new();
        interceptor.arm();
        let payload = interceptor
            .wait_for_capture(&browser, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(payload.url, "https://x/api/one");
    }

    #[tokio::test]
    async fn non_matching_responses_are_ignored() {
        let browser = FakeBrowser::new();
        // wrong status
        let mut r = sensor_response("https://x/500", 1.0);
        r.status = 500;
        browser.push_tap_response(r);
        // not json
        let mut r = sensor_response("https://x/html", 1.0);
        r.content_type = "text/html".to_string();
        browser.push_tap_response(r);
        // json without a node.* key
        let mut r = sensor_response("https://x/other", 1.0);
        r.body = json!({ "data": [1, 2, 3] }).to_string();
        browser.push_tap_response(r);
        // unknown kind
        let mut r = sensor_response("https://x/ws", 1.0);
        r.kind = "websocket".to_string();
        browser.push_tap_response(r);

        let interceptor = NetworkInterceptor::new();
        interceptor.arm();
        let err = interceptor
            .wait_for_capture(&browser, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::CaptureTimeout(_)));
    }

    #[tokio::test]
    async fn arm_clears_the_previous_capture() {
        let browser = FakeBrowser::new();
        browser.push_tap_response(sensor_response("https://x/day1", 12.5));

        let interceptor = NetworkInterceptor::new();
        interceptor.arm();
        interceptor
            .wait_for_capture(&browser, Duration::from_secs(1))
            .await
            .unwrap();

        interceptor.arm();
        browser.push_tap_response(sensor_response("https://x/day2", 13.5));
        let payload = interceptor
            .wait_for_capture(&browser, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(payload.url, "https://x/day2");
    }

    #[tokio::test]
    async fn tap_is_reinstalled_every_poll() {
        let browser = FakeBrowser::new();
        browser.push_tap_response(sensor_response("https://x/api", 12.5));
        let interceptor = NetworkInterceptor::new();
        interceptor.arm();
        interceptor
            .wait_for_capture(&browser, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(browser.state.lock().unwrap().tap_installs >= 1);
    }
}
