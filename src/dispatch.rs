//! Action dispatch: a tag→handler registry over the browser capability
//! surface. Extension means registering another handler, not editing a
//! conditional chain. Handlers hold no state; all side effects land on the
//! `BrowserHandle`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::error::ActionError;
use crate::hands::BrowserHandle;
use crate::types::{Action, Locator, Query, xpath_literal};

/// Upper bound on post-navigation settling.
pub const NAVIGATE_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on `wait_for` element resolution.
pub const WAIT_FOR_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause after a click so modals and menus get a chance to render.
const CLICK_PAUSE: Duration = Duration::from_millis(500);
/// Pause after typing for reactive UI (validation, autocomplete).
const TYPE_PAUSE: Duration = Duration::from_millis(300);

/// One executable action kind.
pub trait ActionHandler<B: BrowserHandle> {
    fn run(&self, browser: &mut B, action: &Action) -> Result<(), ActionError>;
}

/// Maps action tags to handlers. Pre-populated with the four built-ins and
/// open for extension via `register`.
pub struct ActionDispatcher<B: BrowserHandle> {
    handlers: HashMap<&'static str, Box<dyn ActionHandler<B>>>,
}

impl<B: BrowserHandle> Default for ActionDispatcher<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: BrowserHandle> ActionDispatcher<B> {
    pub fn new() -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
        };
        dispatcher.register("navigate", Box::new(NavigateHandler));
        dispatcher.register("click", Box::new(ClickHandler));
        dispatcher.register("type", Box::new(TypeHandler));
        dispatcher.register("wait_for", Box::new(WaitForHandler));
        dispatcher
    }

    /// Bind (or replace) the handler for an action tag.
    pub fn register(&mut self, kind: &'static str, handler: Box<dyn ActionHandler<B>>) {
        self.handlers.insert(kind, handler);
    }

    pub fn dispatch(&self, browser: &mut B, action: &Action) -> Result<(), ActionError> {
        let handler = self
            .handlers
            .get(action.kind())
            .ok_or_else(|| ActionError::UnknownAction(action.kind().to_string()))?;
        handler.run(browser, action)
    }
}

struct NavigateHandler;

impl<B: BrowserHandle> ActionHandler<B> for NavigateHandler {
    fn run(&self, browser: &mut B, action: &Action) -> Result<(), ActionError> {
        let Action::Navigate { url } = action else {
            return Err(wrong_kind("navigate", action));
        };
        browser.navigate(url, NAVIGATE_TIMEOUT)
    }
}

struct ClickHandler;

impl<B: BrowserHandle> ActionHandler<B> for ClickHandler {
    fn run(&self, browser: &mut B, action: &Action) -> Result<(), ActionError> {
        let Action::Click { locator } = action else {
            return Err(wrong_kind("click", action));
        };

        match locator {
            Locator::Text(text) => {
                let query = Query::Text(text.clone());
                if browser.count(&query)? == 0 {
                    // The proposed text does not exist on the page, which
                    // usually means the planner hallucinated it.
                    return Err(ActionError::ElementNotFound(format!(
                        "text '{text}' not found on the page; the planner may have \
                         suggested text that does not exist"
                    )));
                }
                if !browser.is_visible(&query)? {
                    return Err(ActionError::ElementNotFound(format!(
                        "text '{text}' found but the element is not visible"
                    )));
                }
                browser.click(&query)?;
            }
            Locator::Selector(selector) => {
                click_unique(browser, Query::Css(selector.clone()))?;
            }
            Locator::XPath(xpath) => {
                click_unique(browser, Query::XPath(xpath.clone()))?;
            }
            Locator::Coordinates { x, y } => {
                browser.click_at(*x, *y)?;
            }
        }

        browser.pause(CLICK_PAUSE);
        Ok(())
    }
}

/// Selector and xpath clicks require a unique match.
fn click_unique<B: BrowserHandle>(browser: &mut B, query: Query) -> Result<(), ActionError> {
    match browser.count(&query)? {
        0 => Err(ActionError::ElementNotFound(query.to_string())),
        1 => browser.click(&query),
        count => Err(ActionError::AmbiguousElement {
            locator: query.to_string(),
            count,
        }),
    }
}

struct TypeHandler;

impl<B: BrowserHandle> ActionHandler<B> for TypeHandler {
    fn run(&self, browser: &mut B, action: &Action) -> Result<(), ActionError> {
        let Action::Type { locator, value } = action else {
            return Err(wrong_kind("type", action));
        };

        match locator {
            Locator::Text(label) => {
                let mut filled = false;
                for query in label_queries(label) {
                    match browser.fill(&query, value) {
                        Ok(()) => {
                            filled = true;
                            break;
                        }
                        Err(e) => debug!(%query, error = %e, "fill strategy failed, trying next"),
                    }
                }
                if !filled {
                    return Err(ActionError::ElementNotFound(format!(
                        "no input field matching label '{label}'"
                    )));
                }
            }
            Locator::Selector(selector) => {
                fill_unique(browser, Query::Css(selector.clone()), value)?;
            }
            Locator::XPath(xpath) => {
                fill_unique(browser, Query::XPath(xpath.clone()), value)?;
            }
            // Rejected at construction; kept so a hand-built action fails
            // loudly rather than silently.
            Locator::Coordinates { .. } => {
                return Err(ActionError::Malformed(
                    "'type' cannot target coordinates".into(),
                ));
            }
        }

        browser.pause(TYPE_PAUSE);
        Ok(())
    }
}

fn fill_unique<B: BrowserHandle>(
    browser: &mut B,
    query: Query,
    value: &str,
) -> Result<(), ActionError> {
    match browser.count(&query)? {
        0 => Err(ActionError::ElementNotFound(query.to_string())),
        1 => browser.fill(&query, value),
        count => Err(ActionError::AmbiguousElement {
            locator: query.to_string(),
            count,
        }),
    }
}

/// Ordered fallback chain for finding an input by its visible label. First
/// success wins; every miss falls through to the next strategy.
fn label_queries(label: &str) -> Vec<Query> {
    let lit = xpath_literal(label);
    let css = css_escape(label);
    vec![
        // (a) proper <label for=...> association
        Query::XPath(format!(
            "//input[@id = //label[contains(normalize-space(.), {lit})]/@for]"
        )),
        // (b) aria-label or placeholder substring
        Query::Css(format!(
            "input[aria-label*=\"{css}\"], textarea[aria-label*=\"{css}\"], \
             input[placeholder*=\"{css}\"]"
        )),
        // (c) nearest input following the label text
        Query::XPath(format!(
            "//*[text()[contains(normalize-space(.), {lit})]]/following::input[1]"
        )),
        // (d) accessible textbox role
        Query::XPath(format!(
            "//*[@role='textbox' and (contains(@aria-label, {lit}) or \
             contains(@name, {lit}) or contains(@placeholder, {lit}))]"
        )),
        // (e) bare placeholder substring, last resort
        Query::Css(format!("input[placeholder*=\"{css}\"]")),
    ]
}

/// Escape a string for embedding inside a double-quoted CSS attribute value.
fn css_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

struct WaitForHandler;

impl<B: BrowserHandle> ActionHandler<B> for WaitForHandler {
    fn run(&self, browser: &mut B, action: &Action) -> Result<(), ActionError> {
        let Action::WaitFor { locator } = action else {
            return Err(wrong_kind("wait_for", action));
        };
        let query = match locator {
            Locator::Text(text) => Query::Text(text.clone()),
            Locator::Selector(selector) => Query::Css(selector.clone()),
            Locator::XPath(xpath) => Query::XPath(xpath.clone()),
            Locator::Coordinates { .. } => {
                return Err(ActionError::Malformed(
                    "'wait_for' cannot target coordinates".into(),
                ));
            }
        };
        // Single direct attempt, no fallback chain.
        browser.wait_for(&query, WAIT_FOR_TIMEOUT)
    }
}

fn wrong_kind(expected: &str, action: &Action) -> ActionError {
    ActionError::Malformed(format!(
        "handler for '{expected}' received a '{}' action",
        action.kind()
    ))
}
