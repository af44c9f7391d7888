//! Scripted doubles for the browser and planner collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use browser_pilot::error::{ActionError, PlannerError};
use browser_pilot::hands::BrowserHandle;
use browser_pilot::types::{Action, Query, StepRecord};
use browser_pilot::Planner;

#[derive(Default)]
pub struct BrowserState {
    /// Markup returned by successive `current_markup` calls; the last entry
    /// repeats once the script runs out.
    pub markups: Vec<String>,
    cursor: usize,
    /// How many elements each query resolves to.
    pub matches: HashMap<Query, usize>,
    /// Queries whose first match is visible.
    pub visible: HashSet<Query>,
    /// When set, `fill` succeeds only for queries whose description contains
    /// this substring (used to pick a winning fallback strategy).
    pub fill_ok_substring: Option<String>,

    pub navigations: Vec<String>,
    pub clicks: Vec<Query>,
    pub clicks_at: Vec<(f64, f64)>,
    pub fills: Vec<(Query, String)>,
    pub fill_attempts: Vec<Query>,
    pub waits: Vec<Query>,
    pub pauses: Vec<Duration>,
    pub settles: usize,
    pub screenshots: usize,
    pub close_count: usize,
}

/// Test browser backed by shared state so assertions survive the runner
/// consuming the handle.
#[derive(Clone)]
pub struct MockBrowser(pub Arc<Mutex<BrowserState>>);

impl MockBrowser {
    pub fn new() -> Self {
        let state = BrowserState {
            markups: vec![String::new()],
            ..Default::default()
        };
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn with_markups(markups: Vec<&str>) -> Self {
        let browser = Self::new();
        browser.state().markups = markups.into_iter().map(String::from).collect();
        browser
    }

    pub fn state(&self) -> MutexGuard<'_, BrowserState> {
        self.0.lock().unwrap()
    }

    /// Register a visible element reachable by text query.
    pub fn add_visible_text(&self, text: &str) {
        let query = Query::Text(text.to_string());
        let mut state = self.state();
        state.matches.insert(query.clone(), 1);
        state.visible.insert(query);
    }

    pub fn add_matches(&self, query: Query, count: usize) {
        self.state().matches.insert(query, count);
    }
}

impl BrowserHandle for MockBrowser {
    fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), ActionError> {
        self.state().navigations.push(url.to_string());
        Ok(())
    }

    fn current_markup(&mut self) -> Result<String, ActionError> {
        let mut state = self.state();
        let idx = state.cursor.min(state.markups.len().saturating_sub(1));
        state.cursor += 1;
        Ok(state.markups[idx].clone())
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, ActionError> {
        let mut state = self.state();
        state.screenshots += 1;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    fn count(&mut self, query: &Query) -> Result<usize, ActionError> {
        Ok(self.state().matches.get(query).copied().unwrap_or(0))
    }

    fn click(&mut self, query: &Query) -> Result<(), ActionError> {
        let mut state = self.state();
        if state.matches.get(query).copied().unwrap_or(0) == 0 {
            return Err(ActionError::ElementNotFound(query.to_string()));
        }
        if matches!(query, Query::Text(_)) && !state.visible.contains(query) {
            return Err(ActionError::ElementNotFound(format!(
                "{query} found but not visible"
            )));
        }
        state.clicks.push(query.clone());
        Ok(())
    }

    fn click_at(&mut self, x: f64, y: f64) -> Result<(), ActionError> {
        self.state().clicks_at.push((x, y));
        Ok(())
    }

    fn fill(&mut self, query: &Query, value: &str) -> Result<(), ActionError> {
        let mut state = self.state();
        state.fill_attempts.push(query.clone());
        let ok = match &state.fill_ok_substring {
            Some(marker) => query.to_string().contains(marker.as_str()),
            None => state.matches.get(query).copied().unwrap_or(0) > 0,
        };
        if ok {
            state.fills.push((query.clone(), value.to_string()));
            Ok(())
        } else {
            Err(ActionError::ElementNotFound(query.to_string()))
        }
    }

    fn is_visible(&mut self, query: &Query) -> Result<bool, ActionError> {
        Ok(self.state().visible.contains(query))
    }

    fn wait_for(&mut self, query: &Query, _timeout: Duration) -> Result<(), ActionError> {
        let mut state = self.state();
        state.waits.push(query.clone());
        if state.matches.get(query).copied().unwrap_or(0) > 0 {
            Ok(())
        } else {
            Err(ActionError::ElementNotFound(query.to_string()))
        }
    }

    fn settle(&mut self, _max_wait: Duration) {
        self.state().settles += 1;
    }

    fn pause(&mut self, duration: Duration) {
        self.state().pauses.push(duration);
    }

    fn close(&mut self) {
        self.state().close_count += 1;
    }
}

#[derive(Default)]
pub struct PlannerState {
    pub script: VecDeque<Result<Action, PlannerError>>,
    /// What to do once the script runs out.
    pub exhausted_navigates: bool,
    pub calls: usize,
    /// History snapshot received with each call.
    pub seen_history: Vec<Vec<StepRecord>>,
    pub seen_previews: Vec<String>,
}

/// Scripted planner. Once the script runs out it either signals completion
/// or keeps proposing unique navigations (a planner that never finishes).
#[derive(Clone)]
pub struct MockPlanner(pub Arc<Mutex<PlannerState>>);

impl MockPlanner {
    pub fn with_script(script: Vec<Result<Action, PlannerError>>) -> Self {
        Self(Arc::new(Mutex::new(PlannerState {
            script: script.into(),
            ..Default::default()
        })))
    }

    pub fn never_completing() -> Self {
        let planner = Self::with_script(vec![]);
        planner.state().exhausted_navigates = true;
        planner
    }

    pub fn state(&self) -> MutexGuard<'_, PlannerState> {
        self.0.lock().unwrap()
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn plan_next(
        &mut self,
        _task: &str,
        state_preview: &str,
        history: &[StepRecord],
    ) -> Result<Action, PlannerError> {
        let mut state = self.state();
        state.calls += 1;
        state.seen_history.push(history.to_vec());
        state.seen_previews.push(state_preview.to_string());
        if let Some(next) = state.script.pop_front() {
            return next;
        }
        if state.exhausted_navigates {
            Ok(Action::Navigate {
                url: format!("https://step-{}.example", state.calls),
            })
        } else {
            Ok(Action::Done)
        }
    }
}

pub fn navigate(url: &str) -> Action {
    Action::Navigate {
        url: url.to_string(),
    }
}
