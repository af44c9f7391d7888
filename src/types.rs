use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ActionError;

/// How the planner describes where a UI element is.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    /// Visible text content (substring match).
    Text(String),
    /// CSS selector.
    Selector(String),
    /// XPath expression.
    XPath(String),
    /// Viewport coordinates, last resort when no selector exists.
    Coordinates { x: f64, y: f64 },
}

impl Locator {
    pub fn describe(&self) -> String {
        match self {
            Locator::Text(t) => format!("text '{t}'"),
            Locator::Selector(s) => format!("selector '{s}'"),
            Locator::XPath(x) => format!("xpath '{x}'"),
            Locator::Coordinates { x, y } => format!("coordinates ({x}, {y})"),
        }
    }
}

/// A single atomic action the LLM asks the agent to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate { url: String },
    Click { locator: Locator },
    Type { locator: Locator, value: String },
    WaitFor { locator: Locator },
    Done,
}

impl Action {
    /// The registry tag this action dispatches under.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::WaitFor { .. } => "wait_for",
            Action::Done => "done",
        }
    }
}

/// A concrete element lookup a browser can execute. Locators are lowered to
/// queries by the dispatcher's resolution strategies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Css(String),
    XPath(String),
    Text(String),
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Query::Css(s) => write!(f, "selector '{s}'"),
            Query::XPath(x) => write!(f, "xpath '{x}'"),
            Query::Text(t) => write!(f, "text '{t}'"),
        }
    }
}

/// What happened when a step was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
}

/// An attempted action plus its outcome. Immutable once appended to history.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub action: Action,
    pub outcome: StepOutcome,
}

pub const DEFAULT_MAX_STEPS: usize = 20;
/// Normalized-DOM budget handed to the planner per step.
pub const STATE_PREVIEW_MAX_CHARS: usize = 2000;
/// How far back the repetition guard looks in history.
pub const REPEAT_WINDOW: usize = 3;
/// Consecutive repeated proposals tolerated before aborting.
pub const REPEAT_LIMIT: u32 = 2;

/// Raw step as it appears on the wire: a single-key map from action name to
/// parameters, e.g. `{"click": {"selector": "button.cta"}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep(pub BTreeMap<String, RawParams>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParams {
    pub url: Option<String>,
    pub text: Option<String>,
    pub selector: Option<String>,
    pub xpath: Option<String>,
    pub coordinates: Option<Point>,
    pub value: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl RawParams {
    /// Exactly one locator field must be populated.
    fn locator(&self, action: &str, allow_coordinates: bool) -> Result<Locator, ActionError> {
        let mut found: Vec<Locator> = Vec::new();
        if let Some(t) = &self.text {
            found.push(Locator::Text(t.clone()));
        }
        if let Some(s) = &self.selector {
            found.push(Locator::Selector(s.clone()));
        }
        if let Some(x) = &self.xpath {
            found.push(Locator::XPath(x.clone()));
        }
        if let Some(p) = &self.coordinates {
            if !allow_coordinates {
                return Err(ActionError::Malformed(format!(
                    "'{action}' cannot target coordinates"
                )));
            }
            found.push(Locator::Coordinates { x: p.x, y: p.y });
        }
        match found.len() {
            0 => Err(ActionError::Malformed(format!(
                "'{action}' is missing a locator (text, selector, xpath or coordinates)"
            ))),
            1 => Ok(found.into_iter().next().unwrap()),
            n => Err(ActionError::Malformed(format!(
                "'{action}' supplied {n} conflicting locators, exactly one is required"
            ))),
        }
    }
}

impl TryFrom<RawStep> for Action {
    type Error = ActionError;

    fn try_from(raw: RawStep) -> Result<Self, ActionError> {
        if raw.0.len() != 1 {
            return Err(ActionError::Malformed(format!(
                "a step must contain exactly one action, got {}",
                raw.0.len()
            )));
        }
        let (name, params) = raw.0.into_iter().next().unwrap();

        match name.as_str() {
            "navigate" => {
                let url = params
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| {
                        ActionError::Malformed("'navigate' is missing 'url'".into())
                    })?;
                Ok(Action::Navigate { url })
            }
            "click" => Ok(Action::Click {
                locator: params.locator("click", true)?,
            }),
            "type" => {
                let locator = params.locator("type", false)?;
                let value = params
                    .value
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        ActionError::Malformed("'type' requires a non-empty 'value'".into())
                    })?;
                Ok(Action::Type { locator, value })
            }
            "wait_for" => Ok(Action::WaitFor {
                locator: params.locator("wait_for", false)?,
            }),
            "done" => Ok(Action::Done),
            other => Err(ActionError::Malformed(format!(
                "unknown action '{other}'"
            ))),
        }
    }
}

/// Quote a string for embedding in an XPath expression. XPath 1.0 has no
/// escape sequence, so strings containing both quote kinds need concat().
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s
            .split('\'')
            .map(|p| format!("'{p}'"))
            .collect();
        format!("concat({})", parts.join(r#", "'", "#))
    }
}
