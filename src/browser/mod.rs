//! Browser adapter boundary. The automation core consumes this
//! capability trait only; the WebDriver implementation and the test fake
//! both live behind it.

pub mod webdriver;

#[cfg(test)]
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AutomationError;

pub use webdriver::WebDriverBrowser;

/// Axis-aligned element rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One response recorded by the in-page fetch/XHR tap.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TappedResponse {
    /// "fetch" or "xhr"; nothing else is recorded.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default, rename = "contentType")]
    pub content_type: String,
    #[serde(default)]
    pub body: String,
}

/// Capability set the automation core needs from a browser. Everything is
/// page-scoped; one page per driver instance.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), AutomationError>;

    async fn current_url(&self) -> Result<String, AutomationError>;

    async fn wait_for_selector(
        &self,
        css: &str,
        timeout: Duration,
    ) -> Result<(), AutomationError>;

    /// Run a script in page context and return its JSON result.
    async fn eval(&self, script: &str) -> Result<Value, AutomationError>;

    async fn click(&self, css: &str) -> Result<(), AutomationError>;

    /// Dispatch a trusted click at viewport coordinates.
    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError>;

    /// Clear an input and type into it.
    async fn fill(&self, css: &str, text: &str) -> Result<(), AutomationError>;

    async fn bounding_rect(&self, css: &str) -> Result<Rect, AutomationError>;

    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError>;

    async fn page_source(&self) -> Result<String, AutomationError>;

    /// Install the fetch/XHR tap in the current page. Idempotent; must be
    /// re-issued after every navigation because a page load wipes it.
    async fn install_response_tap(&self) -> Result<(), AutomationError>;

    /// Take and clear everything the tap recorded since the last drain.
    async fn drain_response_tap(&self) -> Result<Vec<TappedResponse>, AutomationError>;

    async fn close(&self) -> Result<(), AutomationError>;
}

/// Page script backing `install_response_tap`. Wraps `fetch` and
/// `XMLHttpRequest` so completed responses land in `window.__irrigoTap`;
/// capped so a chatty page cannot grow the buffer unbounded.
pub const TAP_INSTALL_SCRIPT: &str = r#"
(() => {
  if (window.__irrigoTapInstalled) { window.__irrigoTap = window.__irrigoTap || []; return true; }
  window.__irrigoTapInstalled = true;
  window.__irrigoTap = [];
  const push = (entry) => { if (window.__irrigoTap.length < 200) window.__irrigoTap.push(entry); };
  const origFetch = window.fetch;
  window.fetch = async function (...args) {
    const resp = await origFetch.apply(this, args);
    try {
      const body = await resp.clone().text();
      push({ kind: 'fetch', url: resp.url, status: resp.status,
             contentType: resp.headers.get('content-type') || '', body });
    } catch (e) {}
    return resp;
  };
  const origOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function (...args) {
    this.addEventListener('load', function () {
      try {
        push({ kind: 'xhr', url: this.responseURL, status: this.status,
               contentType: this.getResponseHeader('content-type') || '', body: this.responseText });
      } catch (e) {}
    });
    return origOpen.apply(this, args);
  };
  return true;
})()
"#;

/// Page script backing `drain_response_tap`.
pub const TAP_DRAIN_SCRIPT: &str =
    "(() => { const t = window.__irrigoTap || []; window.__irrigoTap = []; return t; })()";
