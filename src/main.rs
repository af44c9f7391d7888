use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;

use browser_pilot::{
    Action, CaptureSink, ChromeSession, OpenAiPlanner, PlannerConfig, RawStep, ReactiveRunner,
    RunLimits, task_slug,
    types::DEFAULT_MAX_STEPS,
};

/// Drive a browser through a natural-language task, capturing a screenshot
/// of every UI state along the way.
#[derive(Parser, Debug)]
#[command(name = "browser-pilot", version)]
struct Cli {
    /// Natural-language description of the task to accomplish
    task: Option<String>,

    /// Maximum number of steps before the run is cut off
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: usize,

    /// Run Chrome without a visible window
    #[arg(long)]
    headless: bool,

    /// Directory screenshots are written under
    #[arg(long, default_value = "dataset")]
    dataset_dir: PathBuf,

    /// Capture folder name (defaults to a slug of the task)
    #[arg(long)]
    name: Option<String>,

    /// Execute a pre-scripted JSON step file instead of reactive planning
    #[arg(long, conflicts_with = "task")]
    batch: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(path) = cli.batch {
        return run_batch(path, cli.headless, cli.dataset_dir, cli.name).await;
    }

    let Some(task) = cli.task else {
        bail!("a task description is required (or use --batch <steps.json>)");
    };

    let config = PlannerConfig::from_env()?;
    let planner = OpenAiPlanner::new(config);

    let headless = cli.headless;
    let session = tokio::task::spawn_blocking(move || ChromeSession::launch(headless))
        .await
        .context("browser launch task panicked")??;

    let name = cli.name.unwrap_or_else(|| task_slug(&task));
    let sink = CaptureSink::new(cli.dataset_dir, &name);
    info!(captures = %sink.dir().display(), "captures will be written here");

    let runner = ReactiveRunner::new(session, planner, sink).with_limits(RunLimits {
        max_steps: cli.max_steps,
        ..RunLimits::default()
    });

    let outcome = runner.run(&task).await?;
    if !outcome.is_success() {
        bail!("run did not complete: {outcome}");
    }
    Ok(())
}

async fn run_batch(
    path: PathBuf,
    headless: bool,
    dataset_dir: PathBuf,
    name: Option<String>,
) -> Result<()> {
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading step file {}", path.display()))?;
    let raw_steps: Vec<RawStep> =
        serde_json::from_str(&text).context("step file must be a JSON array of steps")?;

    // Validate the whole script before the browser launches: a malformed
    // step fails the run up front.
    let steps: Vec<Action> = raw_steps
        .into_iter()
        .enumerate()
        .map(|(i, raw)| Action::try_from(raw).with_context(|| format!("step {}", i + 1)))
        .collect::<Result<_>>()?;

    let name = name.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(task_slug)
            .unwrap_or_else(|| "batch".to_string())
    });

    let session = tokio::task::spawn_blocking(move || ChromeSession::launch(headless))
        .await
        .context("browser launch task panicked")??;

    let planner = NoPlanner;
    let sink = CaptureSink::new(dataset_dir, &name);
    ReactiveRunner::new(session, planner, sink).run_batch(&steps)
}

/// Batch runs never consult a planner; this placeholder satisfies the runner
/// type and fails loudly if it is ever reached.
struct NoPlanner;

#[async_trait::async_trait]
impl browser_pilot::Planner for NoPlanner {
    async fn plan_next(
        &mut self,
        _task: &str,
        _state_preview: &str,
        _history: &[browser_pilot::StepRecord],
    ) -> std::result::Result<Action, browser_pilot::PlannerError> {
        Err(browser_pilot::PlannerError::Unavailable(
            "batch runs do not plan".into(),
        ))
    }
}
