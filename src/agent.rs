//! The reactive step loop: observe DOM → ask the planner for one action →
//! execute it → detect the state change → capture → repeat.
//!
//! One logical thread of control per run. The browser session is exclusively
//! owned by the runner and released exactly once, on every exit path.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::brain::Planner;
use crate::capture::CaptureSink;
use crate::dispatch::ActionDispatcher;
use crate::dom;
use crate::error::{ActionError, PlannerError};
use crate::hands::BrowserHandle;
use crate::types::{
    Action, DEFAULT_MAX_STEPS, REPEAT_LIMIT, REPEAT_WINDOW, STATE_PREVIEW_MAX_CHARS, StepOutcome,
    StepRecord,
};

/// Best-effort wait after dispatch for async updates (API calls, rerenders).
const POST_DISPATCH_SETTLE: Duration = Duration::from_secs(2);

/// Loop-termination knobs. The repetition window and limit default to the
/// values the guard was tuned with but are deliberately configurable.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub max_steps: usize,
    pub repeat_window: usize,
    pub repeat_limit: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            repeat_window: REPEAT_WINDOW,
            repeat_limit: REPEAT_LIMIT,
        }
    }
}

/// Why a run ended without completing the task.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// The planner kept proposing steps it already tried.
    RepetitionLimit,
    /// The planner produced output that does not validate into an action.
    MalformedPlan(String),
    /// The planner collaborator is out of retries or quota.
    PlannerUnavailable(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::RepetitionLimit => write!(f, "stuck in a loop, repetition limit reached"),
            AbortReason::MalformedPlan(msg) => write!(f, "malformed plan: {msg}"),
            AbortReason::PlannerUnavailable(msg) => write!(f, "planner unavailable: {msg}"),
        }
    }
}

/// Terminal state of one task run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    MaxStepsReached,
    Aborted(AbortReason),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::MaxStepsReached => write!(f, "maximum step budget exhausted"),
            RunOutcome::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Drives one task run against one browser session.
pub struct ReactiveRunner<B: BrowserHandle, P> {
    browser: B,
    planner: P,
    dispatcher: ActionDispatcher<B>,
    sink: CaptureSink,
    limits: RunLimits,
    change_threshold: f64,
}

impl<B: BrowserHandle, P: Planner> ReactiveRunner<B, P> {
    pub fn new(browser: B, planner: P, sink: CaptureSink) -> Self {
        Self {
            browser,
            planner,
            dispatcher: ActionDispatcher::new(),
            sink,
            limits: RunLimits::default(),
            change_threshold: dom::DEFAULT_CHANGE_THRESHOLD,
        }
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Extension point: register additional action handlers before running.
    pub fn dispatcher_mut(&mut self) -> &mut ActionDispatcher<B> {
        &mut self.dispatcher
    }

    /// Execute a task with reactive planning: one action at a time, chosen
    /// from the current UI state. The browser is closed on every exit path.
    pub async fn run(mut self, task: &str) -> Result<RunOutcome> {
        info!(task, max_steps = self.limits.max_steps, "starting reactive run");
        let outcome = self.drive(task).await;
        self.browser.close();
        if let Ok(outcome) = &outcome {
            info!(%outcome, "run finished");
        }
        outcome
    }

    async fn drive(&mut self, task: &str) -> Result<RunOutcome> {
        // Baseline capture, always at index 0: the pre-task reference frame.
        self.capture(0)?;

        let mut history: Vec<StepRecord> = Vec::new();
        let mut step_index: usize = 1;
        let mut repeated: u32 = 0;

        while step_index <= self.limits.max_steps {
            let markup = self.browser.current_markup().unwrap_or_default();
            let preview = state_preview(&markup);

            let action = match self.planner.plan_next(task, &preview, &history).await {
                Ok(action) => action,
                Err(PlannerError::Malformed(msg)) => {
                    warn!(%msg, "planner output did not validate, aborting");
                    return Ok(RunOutcome::Aborted(AbortReason::MalformedPlan(msg)));
                }
                Err(PlannerError::Unavailable(msg)) => {
                    warn!(%msg, "planner unavailable, aborting");
                    return Ok(RunOutcome::Aborted(AbortReason::PlannerUnavailable(msg)));
                }
            };

            if action == Action::Done {
                info!(steps = step_index - 1, "planner signaled completion");
                return Ok(RunOutcome::Completed);
            }

            // Repetition guard: a proposal we already tried recently is
            // discarded (not recorded, no step index consumed) and replanned.
            let window_start = history.len().saturating_sub(self.limits.repeat_window);
            if history[window_start..].iter().any(|r| r.action == action) {
                repeated += 1;
                warn!(?action, repeated, "planner repeated a recent step");
                if repeated >= self.limits.repeat_limit {
                    return Ok(RunOutcome::Aborted(AbortReason::RepetitionLimit));
                }
                continue;
            }
            repeated = 0;

            let before = markup;
            let result = self.dispatcher.dispatch(&mut self.browser, &action);
            if let Err(ActionError::UnknownAction(name)) = &result {
                // Nothing was attempted, so there is no failure state worth
                // capturing; the plan itself is unusable.
                return Ok(RunOutcome::Aborted(AbortReason::MalformedPlan(format!(
                    "no handler registered for action '{name}'"
                ))));
            }
            self.browser.settle(POST_DISPATCH_SETTLE);

            // Diagnostic capture policy: always capture after an attempted
            // action, even when the change heuristic under-detects.
            let after = self.browser.current_markup().unwrap_or_default();
            let state_changed = dom::changed(&before, &after, self.change_threshold);
            if let Err(e) = self.capture(step_index) {
                warn!(step = step_index, error = %format!("{e:#}"), "capture failed");
            }

            let outcome = match &result {
                Ok(()) => StepOutcome::Succeeded,
                Err(e) => {
                    warn!(step = step_index, error = %e, "step failed");
                    StepOutcome::Failed(e.to_string())
                }
            };
            info!(
                step = step_index,
                action = ?action,
                ok = result.is_ok(),
                state_changed,
                "step executed"
            );

            history.push(StepRecord { action, outcome });
            step_index += 1;
        }

        Ok(RunOutcome::MaxStepsReached)
    }

    /// Execute a pre-scripted step list. Unlike the reactive loop, captures
    /// here are comparator-gated: a step that leaves the UI state unchanged
    /// produces no redundant screenshot.
    pub fn run_batch(mut self, steps: &[Action]) -> Result<()> {
        info!(steps = steps.len(), "starting batch run");
        let result = self.drive_batch(steps);
        self.browser.close();
        result
    }

    fn drive_batch(&mut self, steps: &[Action]) -> Result<()> {
        self.capture(0)?;

        for (i, action) in steps.iter().enumerate() {
            if *action == Action::Done {
                break;
            }
            let step_index = i + 1;
            let before = self.browser.current_markup().unwrap_or_default();

            let result = self.dispatcher.dispatch(&mut self.browser, action);
            self.browser.settle(POST_DISPATCH_SETTLE);
            if let Err(e) = &result {
                warn!(step = step_index, error = %e, "step failed");
            }

            let after = self.browser.current_markup().unwrap_or_default();
            if dom::changed(&before, &after, self.change_threshold) {
                if let Err(e) = self.capture(step_index) {
                    warn!(step = step_index, error = %format!("{e:#}"), "capture failed");
                }
            } else {
                debug!(step = step_index, "UI state unchanged, skipping capture");
            }
            info!(step = step_index, action = ?action, ok = result.is_ok(), "step executed");
        }

        Ok(())
    }

    fn capture(&mut self, step_index: usize) -> Result<PathBuf> {
        let png = self
            .browser
            .screenshot()
            .map_err(|e| anyhow::anyhow!("screenshot for step {step_index}: {e}"))?;
        self.sink.store(step_index, &png)
    }
}

/// Normalize the page and truncate to the planner's state budget.
fn state_preview(markup: &str) -> String {
    let normalized = dom::normalize(markup);
    if normalized.len() <= STATE_PREVIEW_MAX_CHARS {
        normalized
    } else {
        normalized.chars().take(STATE_PREVIEW_MAX_CHARS).collect()
    }
}
