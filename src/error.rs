use thiserror::Error;

/// Errors surfaced by action construction and dispatch. Dispatch failures are
/// local to one step: the loop records them and presses on so the trace shows
/// the failure state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    /// The step is structurally invalid. Rejected before dispatch.
    #[error("malformed action: {0}")]
    Malformed(String),

    /// The locator did not resolve to an interactable element.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The locator matched several elements where one was required.
    #[error("{locator} matched {count} elements where one was required")]
    AmbiguousElement { locator: String, count: usize },

    /// No handler registered under this action tag.
    #[error("no handler registered for action '{0}'")]
    UnknownAction(String),

    /// Underlying browser failure (CDP transport, navigation, screenshot).
    #[error("browser error: {0}")]
    Browser(String),
}

/// Errors from the external planner collaborator. Both variants are fatal to
/// the run: the planner must fail closed rather than guess.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlannerError {
    /// The model produced output that does not validate into an action.
    #[error("planner returned malformed output: {0}")]
    Malformed(String),

    /// Retries exhausted, quota hit, or transport down. The message carries
    /// remediation guidance for the operator.
    #[error("planner unavailable: {0}")]
    Unavailable(String),
}
