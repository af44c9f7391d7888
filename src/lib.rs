//! LLM-driven reactive browser automation with UI state capture.
//!
//! The agent accomplishes a natural-language task by repeatedly asking a
//! language model for the next UI action, executing it against a browser,
//! and capturing a screenshot of each resulting UI state — including states
//! such as modals and dropdowns that have no distinct URL.

pub mod agent;
pub mod brain;
pub mod capture;
pub mod dispatch;
pub mod dom;
pub mod error;
pub mod hands;
pub mod types;

pub use agent::{AbortReason, ReactiveRunner, RunLimits, RunOutcome};
pub use brain::{OpenAiPlanner, Planner, PlannerConfig};
pub use capture::{CaptureSink, task_slug};
pub use dispatch::{ActionDispatcher, ActionHandler};
pub use error::{ActionError, PlannerError};
pub use hands::{BrowserHandle, ChromeSession};
pub use types::{Action, Locator, Query, RawStep, StepOutcome, StepRecord};
