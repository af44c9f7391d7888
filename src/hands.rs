use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use tracing::{debug, info};

use crate::error::ActionError;
use crate::types::{Query, xpath_literal};

/// Poll interval for element waits and settle checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The capability surface the loop and dispatcher drive. One implementation
/// talks to a real Chrome; tests supply a scripted double. The handle is
/// exclusively owned by one run and released exactly once via `close`.
pub trait BrowserHandle {
    /// Load `url`, then wait best-effort (bounded by `timeout`) for the
    /// document to become ready. The settling timeout is not a failure.
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ActionError>;

    /// Raw markup of the current document.
    fn current_markup(&mut self) -> Result<String, ActionError>;

    /// PNG screenshot of the current viewport.
    fn screenshot(&mut self) -> Result<Vec<u8>, ActionError>;

    /// Number of elements the query currently matches.
    fn count(&mut self, query: &Query) -> Result<usize, ActionError>;

    /// Click the first matching element (first *visible* match for text
    /// queries). Ambiguity policy lives in the dispatcher, not here.
    fn click(&mut self, query: &Query) -> Result<(), ActionError>;

    /// Click whatever element sits at the given viewport coordinates.
    fn click_at(&mut self, x: f64, y: f64) -> Result<(), ActionError>;

    /// Clear and fill the first matching input element.
    fn fill(&mut self, query: &Query, value: &str) -> Result<(), ActionError>;

    /// Whether any matching element is visible.
    fn is_visible(&mut self, query: &Query) -> Result<bool, ActionError>;

    /// Block until the query matches something, bounded by `timeout`.
    fn wait_for(&mut self, query: &Query, timeout: Duration) -> Result<(), ActionError>;

    /// Best-effort wait for asynchronous UI updates to finish rendering.
    /// Never fails; running out the clock just means we observe whatever
    /// state the page is in.
    fn settle(&mut self, max_wait: Duration);

    /// Unconditional pause, used by handlers to let transitions render.
    fn pause(&mut self, duration: Duration);

    /// Release the browser session. Idempotent.
    fn close(&mut self);
}

/// A live Chrome session. Created once per run, closed on every exit path.
pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeSession {
    pub fn launch(headless: bool) -> Result<Self> {
        let options = LaunchOptions {
            headless,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
            ],
            // The browser sits idle while the planner thinks; don't let the
            // watchdog reap it mid-run.
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };

        info!(headless, "starting Chrome");
        let browser = Browser::new(options)
            .map_err(|e| anyhow::anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            browser: Some(browser),
            tab: Some(tab),
        })
    }

    fn tab(&self) -> Result<&Arc<Tab>, ActionError> {
        self.tab
            .as_ref()
            .ok_or_else(|| ActionError::Browser("session is closed".into()))
    }

    /// Lower a query to element handles. Library lookup failures are treated
    /// as "no matches" so callers get uniform not-found semantics.
    fn find_all(&self, query: &Query) -> Result<Vec<Element<'_>>, ActionError> {
        let tab = self.tab()?;
        let found = match query {
            Query::Css(selector) => tab.find_elements(selector),
            Query::XPath(expr) => tab.find_elements_by_xpath(expr),
            Query::Text(text) => tab.find_elements_by_xpath(&text_xpath(text)),
        };
        Ok(found.unwrap_or_default())
    }

    fn element_visible(el: &Element<'_>) -> bool {
        el.call_js_fn(
            "function() { return this.offsetParent !== null; }",
            vec![],
            false,
        )
        .ok()
        .and_then(|obj| obj.value)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    }
}

/// Elements whose own text node contains the needle. Matching on direct text
/// keeps ancestors like `<body>` out of the result set.
fn text_xpath(text: &str) -> String {
    format!(
        "//*[text()[contains(normalize-space(.), {})]]",
        xpath_literal(text)
    )
}

impl BrowserHandle for ChromeSession {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ActionError> {
        let tab = self.tab()?;
        tab.navigate_to(url)
            .map_err(|e| ActionError::Browser(format!("navigation to '{url}' failed: {e}")))?;
        // Best-effort settling: a slow page is observed as-is, not an error.
        let _ = tab.wait_for_element_with_custom_timeout("body", timeout);
        self.settle(timeout);
        Ok(())
    }

    fn current_markup(&mut self) -> Result<String, ActionError> {
        self.tab()?
            .get_content()
            .map_err(|e| ActionError::Browser(format!("could not read page content: {e}")))
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, ActionError> {
        self.tab()?
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| ActionError::Browser(format!("screenshot failed: {e}")))
    }

    fn count(&mut self, query: &Query) -> Result<usize, ActionError> {
        Ok(self.find_all(query)?.len())
    }

    fn click(&mut self, query: &Query) -> Result<(), ActionError> {
        let elements = self.find_all(query)?;
        if elements.is_empty() {
            return Err(ActionError::ElementNotFound(query.to_string()));
        }
        let target = match query {
            Query::Text(_) => elements
                .iter()
                .find(|el| Self::element_visible(el))
                .ok_or_else(|| {
                    ActionError::ElementNotFound(format!("{query} found but not visible"))
                })?,
            _ => &elements[0],
        };
        target
            .click()
            .map_err(|e| ActionError::Browser(format!("click on {query} failed: {e}")))?;
        Ok(())
    }

    fn click_at(&mut self, x: f64, y: f64) -> Result<(), ActionError> {
        let hit = self
            .tab()?
            .evaluate(
                &format!(
                    "(() => {{ const el = document.elementFromPoint({x}, {y}); \
                     if (el) el.click(); return !!el; }})()"
                ),
                false,
            )
            .map_err(|e| ActionError::Browser(format!("click at ({x}, {y}) failed: {e}")))?
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if hit {
            Ok(())
        } else {
            Err(ActionError::ElementNotFound(format!(
                "no element at coordinates ({x}, {y})"
            )))
        }
    }

    fn fill(&mut self, query: &Query, value: &str) -> Result<(), ActionError> {
        let elements = self.find_all(query)?;
        let Some(el) = elements.first() else {
            return Err(ActionError::ElementNotFound(query.to_string()));
        };
        el.click()
            .map_err(|e| ActionError::Browser(format!("focus on {query} failed: {e}")))?;
        el.call_js_fn("function() { this.value = ''; }", vec![], false)
            .map_err(|e| ActionError::Browser(format!("clearing {query} failed: {e}")))?;
        self.tab()?
            .type_str(value)
            .map_err(|e| ActionError::Browser(format!("typing into {query} failed: {e}")))?;
        Ok(())
    }

    fn is_visible(&mut self, query: &Query) -> Result<bool, ActionError> {
        Ok(self
            .find_all(query)?
            .iter()
            .any(|el| Self::element_visible(el)))
    }

    fn wait_for(&mut self, query: &Query, timeout: Duration) -> Result<(), ActionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count(query)? > 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ActionError::ElementNotFound(format!(
                    "{query} did not appear within {timeout:?}"
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn settle(&mut self, max_wait: Duration) {
        let Ok(tab) = self.tab() else { return };
        let deadline = Instant::now() + max_wait;
        while Instant::now() < deadline {
            let ready = tab
                .evaluate("document.readyState", false)
                .ok()
                .and_then(|obj| obj.value)
                .and_then(|v| v.as_str().map(|s| s == "complete"))
                .unwrap_or(true);
            if ready {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        debug!("settle wait ran out, observing current state");
    }

    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn close(&mut self) {
        if self.tab.take().is_some() {
            info!("closing browser session");
        }
        // Dropping the Browser shuts down the Chrome process.
        self.browser.take();
    }
}
