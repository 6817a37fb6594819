//! WebDriver-backed implementation of the `Browser` capability trait.

use std::time::Duration;

use async_trait::async_trait;
use fantoccini::actions::{InputSource, MouseActions, PointerAction, MOUSE_BUTTON_LEFT};
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::Value;

use super::{Browser, Rect, TappedResponse, TAP_DRAIN_SCRIPT, TAP_INSTALL_SCRIPT};
use crate::error::AutomationError;

pub struct WebDriverBrowser {
    client: Client,
}

impl WebDriverBrowser {
    /// Attach to a running WebDriver endpoint (chromedriver/geckodriver).
    pub async fn connect(webdriver_url: &str, headless: bool) -> anyhow::Result<Self> {
        let mut chrome_args = vec![
            "--window-size=1680,1050".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--lang=ko-KR".to_string(),
        ];
        if headless {
            chrome_args.push("--headless=new".to_string());
        }
        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            serde_json::json!({ "args": chrome_args }),
        );

        let client = ClientBuilder::rustls()?
            .capabilities(caps)
            .connect(webdriver_url)
            .await?;
        tracing::info!("browser: connected to {webdriver_url} (headless={headless})");
        Ok(Self { client })
    }
}

fn net_err(e: fantoccini::error::CmdError) -> AutomationError {
    AutomationError::Network(e.to_string())
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        self.client.clone().goto(url).await.map_err(net_err)
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        self.client
            .clone()
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(net_err)
    }

    async fn wait_for_selector(
        &self,
        css: &str,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        self.client
            .clone()
            .wait()
            .at_most(timeout)
            .every(Duration::from_millis(100))
            .for_element(Locator::Css(css))
            .await
            .map(|_| ())
            .map_err(|_| AutomationError::DomContract {
                what: "element".to_string(),
                selector: css.to_string(),
            })
    }

    async fn eval(&self, script: &str) -> Result<Value, AutomationError> {
        self.client
            .clone()
            .execute(script, vec![])
            .await
            .map_err(net_err)
    }

    async fn click(&self, css: &str) -> Result<(), AutomationError> {
        let element = self
            .client
            .clone()
            .find(Locator::Css(css))
            .await
            .map_err(|_| AutomationError::DomContract {
                what: "clickable element".to_string(),
                selector: css.to_string(),
            })?;
        element.click().await.map_err(net_err)
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        let mouse = MouseActions::new("mouse".to_string())
            .then(PointerAction::MoveTo {
                duration: Some(Duration::from_millis(50)),
                x,
                y,
            })
            .then(PointerAction::Down {
                button: MOUSE_BUTTON_LEFT,
            })
            .then(PointerAction::Up {
                button: MOUSE_BUTTON_LEFT,
            });
        self.client
            .clone()
            .perform_actions(mouse)
            .await
            .map_err(net_err)
    }

    async fn fill(&self, css: &str, text: &str) -> Result<(), AutomationError> {
        let element = self
            .client
            .clone()
            .find(Locator::Css(css))
            .await
            .map_err(|_| AutomationError::DomContract {
                what: "input".to_string(),
                selector: css.to_string(),
            })?;
        let _ = element.clear().await;
        element.send_keys(text).await.map_err(net_err)
    }

    async fn bounding_rect(&self, css: &str) -> Result<Rect, AutomationError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return {{ x: r.x, y: r.y, width: r.width, height: r.height }}; }})()",
            sel = serde_json::to_string(css).unwrap_or_default(),
        );
        let value = self.eval(&script).await?;
        if value.is_null() {
            return Err(AutomationError::DomContract {
                what: "bounding rect".to_string(),
                selector: css.to_string(),
            });
        }
        let get = |k: &str| value.get(k).and_then(Value::as_f64).unwrap_or(0.0);
        Ok(Rect {
            x: get("x"),
            y: get("y"),
            width: get("width"),
            height: get("height"),
        })
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError> {
        self.client.clone().screenshot().await.map_err(net_err)
    }

    async fn page_source(&self) -> Result<String, AutomationError> {
        self.client.clone().source().await.map_err(net_err)
    }

    async fn install_response_tap(&self) -> Result<(), AutomationError> {
        self.eval(TAP_INSTALL_SCRIPT).await.map(|_| ())
    }

    async fn drain_response_tap(&self) -> Result<Vec<TappedResponse>, AutomationError> {
        let value = self.eval(TAP_DRAIN_SCRIPT).await?;
        let responses = serde_json::from_value(value).unwrap_or_default();
        Ok(responses)
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.client.clone().close().await.map_err(net_err)
    }
}
