//! The external planner: given the task, a preview of the current UI state
//! and recent history, produce the single next action. Retry/backoff on
//! throttling lives here, not in the loop.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::PlannerError;
use crate::types::{Action, RawStep, StepOutcome, StepRecord};

const MAX_RETRIES: u32 = 3;
/// History entries included in the prompt.
const HISTORY_CONTEXT: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are a UI step planner for a browser automation agent.

You work step-by-step: you see the current page state and plan the NEXT single action.

Output ONLY a JSON object of the form {"step": {<action>: {<params>}}} with exactly one action:
- navigate: {"url": "https://..."}
- click: {"selector": "..."} or {"xpath": "..."} or {"text": "..."} or {"coordinates": {"x": 100, "y": 200}}
- type: {"selector": "..."} or {"xpath": "..."}, plus "value": "..." (value must be non-empty)
- wait_for: {"selector": "..."} or {"xpath": "..."} or {"text": "..."}
- done: {} - the task is complete, no more steps needed

Rules:
1. Prefer PRECISE CSS selectors or XPath derived from the page state, e.g. "button.contact-btn", "a[href='/contact']", "//button[contains(text(), 'Contact')]". Use coordinates only as a last resort.
2. Make selectors specific enough to match exactly one element.
3. Only take actions that move you toward the task goal. Do not click unrelated navigation.
4. When you see a form, fill its fields with the type action using reasonable test values, then click the submit control.
5. Never repeat an action from the step history. If a previous step failed, try a different element or path.
6. When the task is accomplished, output {"step": {"done": {}}}."#;

/// Planner collaborator consumed by the reactive loop. `Action::Done` signals
/// completion; both error variants abort the run (fail closed, never guess).
#[async_trait]
pub trait Planner {
    async fn plan_next(
        &mut self,
        task: &str,
        state_preview: &str,
        history: &[StepRecord],
    ) -> Result<Action, PlannerError>;
}

/// Planner credentials and model choice. Validated once at process start,
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub api_key: String,
    pub model: String,
}

impl PlannerConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is not set; add it to your environment or .env file"))?;
        let model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self { api_key, model })
    }
}

pub struct OpenAiPlanner {
    client: Client,
    config: PlannerConfig,
}

impl OpenAiPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn build_prompt(task: &str, state_preview: &str, history: &[StepRecord]) -> String {
        let mut prompt = format!("Task goal: {task}\n\nCurrent page state (normalized DOM):\n{state_preview}\n");

        if !history.is_empty() {
            prompt.push_str("\nSteps taken so far:\n");
            let start = history.len().saturating_sub(HISTORY_CONTEXT);
            for (i, record) in history[start..].iter().enumerate() {
                let outcome = match &record.outcome {
                    StepOutcome::Succeeded => "ok".to_string(),
                    StepOutcome::Failed(reason) => format!("FAILED: {reason}"),
                };
                prompt.push_str(&format!("{}. {:?} -> {}\n", start + i + 1, record.action, outcome));
            }
            prompt.push_str("\nDo NOT repeat any of the steps above. If one failed, try a different approach.\n");
        }

        prompt.push_str("\nWhat is the NEXT single action? Output only the JSON object.");
        prompt
    }

    fn parse_step(content: &str) -> Result<Action, PlannerError> {
        // The model occasionally wraps its JSON in markdown fences.
        let cleaned = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let parsed: serde_json::Value = serde_json::from_str(cleaned)
            .map_err(|e| PlannerError::Malformed(format!("{e}: {cleaned}")))?;
        let step_value = parsed
            .get("step")
            .cloned()
            .ok_or_else(|| PlannerError::Malformed(format!("missing 'step' key: {cleaned}")))?;
        let raw: RawStep = serde_json::from_value(step_value)
            .map_err(|e| PlannerError::Malformed(format!("invalid step shape: {e}")))?;
        Action::try_from(raw).map_err(|e| PlannerError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Planner for OpenAiPlanner {
    async fn plan_next(
        &mut self,
        task: &str,
        state_preview: &str,
        history: &[StepRecord],
    ) -> Result<Action, PlannerError> {
        let prompt = Self::build_prompt(task, state_preview, history);

        for attempt in 0..MAX_RETRIES {
            let response = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .json(&json!({
                    "model": self.config.model,
                    "messages": [
                        {"role": "system", "content": SYSTEM_PROMPT},
                        {"role": "user", "content": prompt},
                    ],
                    "temperature": 0.2,
                    "response_format": {"type": "json_object"},
                }))
                .send()
                .await
                .map_err(|e| PlannerError::Unavailable(format!("request failed: {e}")))?;

            let status = response.status();
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| PlannerError::Unavailable(format!("bad response body: {e}")))?;

            if status.as_u16() == 429 {
                let message = body["error"]["message"].as_str().unwrap_or("rate limited");
                if message.to_lowercase().contains("quota") {
                    return Err(PlannerError::Unavailable(format!(
                        "API quota exceeded: {message}. Check your billing, add credits, \
                         or switch OPENAI_MODEL to a cheaper model"
                    )));
                }
                if attempt + 1 < MAX_RETRIES {
                    let wait = 10 * 2u64.pow(attempt);
                    warn!(attempt, wait_secs = wait, "rate limited, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                    continue;
                }
                return Err(PlannerError::Unavailable(format!(
                    "rate limit still hit after {MAX_RETRIES} attempts: {message}. \
                     Wait a minute, upgrade your plan, or reduce max steps"
                )));
            }

            if !status.is_success() {
                let message = body["error"]["message"].as_str().unwrap_or("unknown API error");
                return Err(PlannerError::Unavailable(format!(
                    "OpenAI API error ({status}): {message}"
                )));
            }

            let content = body["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| {
                    PlannerError::Malformed(format!("no content in response: {body}"))
                })?;
            debug!(content, "planner replied");
            return Self::parse_step(content);
        }

        Err(PlannerError::Unavailable("retries exhausted".into()))
    }
}
