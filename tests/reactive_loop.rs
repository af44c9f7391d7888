mod common;

use browser_pilot::error::PlannerError;
use browser_pilot::types::{Action, Locator, StepOutcome};
use browser_pilot::{AbortReason, CaptureSink, ReactiveRunner, RunLimits, RunOutcome};

use common::{MockBrowser, MockPlanner, navigate};

fn capture_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn runner(
    browser: &MockBrowser,
    planner: &MockPlanner,
    root: &std::path::Path,
) -> ReactiveRunner<MockBrowser, MockPlanner> {
    ReactiveRunner::new(
        browser.clone(),
        planner.clone(),
        CaptureSink::new(root, "t"),
    )
}

#[tokio::test]
async fn completion_closes_the_browser_and_keeps_the_baseline() {
    let tmp = tempfile::tempdir().unwrap();
    let browser = MockBrowser::new();
    let planner = MockPlanner::with_script(vec![
        Ok(navigate("https://linear.app")),
        Ok(Action::Done),
    ]);

    let outcome = runner(&browser, &planner, tmp.path())
        .run("contact sales")
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    let state = browser.state();
    assert_eq!(state.navigations, vec!["https://linear.app"]);
    assert_eq!(state.close_count, 1);
    // Baseline plus one step capture.
    assert_eq!(capture_names(&tmp.path().join("t")), vec!["00.png", "01.png"]);
}

#[tokio::test]
async fn max_steps_produces_a_gap_free_capture_sequence() {
    let tmp = tempfile::tempdir().unwrap();
    let browser = MockBrowser::new();
    let planner = MockPlanner::never_completing();

    let outcome = runner(&browser, &planner, tmp.path())
        .with_limits(RunLimits {
            max_steps: 3,
            ..RunLimits::default()
        })
        .run("never finishes")
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::MaxStepsReached);
    // Exactly 3 dispatch+capture cycles: captures at 0, 1, 2, 3.
    assert_eq!(
        capture_names(&tmp.path().join("t")),
        vec!["00.png", "01.png", "02.png", "03.png"]
    );
    let state = browser.state();
    assert_eq!(state.navigations.len(), 3);
    assert_eq!(state.close_count, 1);
}

#[tokio::test]
async fn repetition_guard_aborts_after_the_second_repeat() {
    let tmp = tempfile::tempdir().unwrap();
    let browser = MockBrowser::new();
    // The planner proposes the same navigation three times in a row.
    let planner = MockPlanner::with_script(vec![
        Ok(navigate("https://a")),
        Ok(navigate("https://a")),
        Ok(navigate("https://a")),
    ]);

    let outcome = runner(&browser, &planner, tmp.path())
        .run("loops")
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Aborted(AbortReason::RepetitionLimit));
    let state = browser.state();
    // The action was dispatched once; the repeats were discarded.
    assert_eq!(state.navigations, vec!["https://a"]);
    assert_eq!(state.close_count, 1);
    // Baseline plus the single executed step.
    assert_eq!(capture_names(&tmp.path().join("t")), vec!["00.png", "01.png"]);
    // All three proposals required a planner call.
    assert_eq!(planner.state().calls, 3);
}

#[tokio::test]
async fn repeat_counter_resets_on_a_fresh_action() {
    let tmp = tempfile::tempdir().unwrap();
    let browser = MockBrowser::new();
    let planner = MockPlanner::with_script(vec![
        Ok(navigate("https://a")),
        Ok(navigate("https://a")), // repeat 1, discarded
        Ok(navigate("https://b")), // fresh, counter resets
        Ok(navigate("https://c")),
        Ok(navigate("https://a")), // still within the last-3 window: repeat 1
        Ok(navigate("https://d")),
        Ok(Action::Done),
    ]);

    let outcome = runner(&browser, &planner, tmp.path())
        .run("wanders")
        .await
        .unwrap();

    // Two separate single repeats never reach the limit.
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(
        browser.state().navigations,
        vec!["https://a", "https://b", "https://c", "https://d"]
    );
}

#[tokio::test]
async fn malformed_planner_output_aborts_and_closes() {
    let tmp = tempfile::tempdir().unwrap();
    let browser = MockBrowser::new();
    let planner = MockPlanner::with_script(vec![Err(PlannerError::Malformed(
        "missing 'step' key".into(),
    ))]);

    let outcome = runner(&browser, &planner, tmp.path())
        .run("task")
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        RunOutcome::Aborted(AbortReason::MalformedPlan(_))
    ));
    let state = browser.state();
    assert_eq!(state.close_count, 1);
    // Only the baseline was captured; nothing was dispatched.
    assert_eq!(state.navigations.len(), 0);
    assert_eq!(capture_names(&tmp.path().join("t")), vec!["00.png"]);
}

#[tokio::test]
async fn planner_unavailability_aborts_with_the_remediation_message() {
    let tmp = tempfile::tempdir().unwrap();
    let browser = MockBrowser::new();
    let planner = MockPlanner::with_script(vec![Err(PlannerError::Unavailable(
        "API quota exceeded: add credits".into(),
    ))]);

    let outcome = runner(&browser, &planner, tmp.path())
        .run("task")
        .await
        .unwrap();

    match outcome {
        RunOutcome::Aborted(AbortReason::PlannerUnavailable(msg)) => {
            assert!(msg.contains("quota"));
        }
        other => panic!("expected planner-unavailable abort, got {other:?}"),
    }
    assert_eq!(browser.state().close_count, 1);
}

#[tokio::test]
async fn failed_dispatch_is_captured_recorded_and_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let browser = MockBrowser::new();
    // No element with this text exists, so the click fails.
    let planner = MockPlanner::with_script(vec![
        Ok(Action::Click {
            locator: Locator::Text("Contact Sales".into()),
        }),
        Ok(Action::Done),
    ]);

    let outcome = runner(&browser, &planner, tmp.path())
        .run("contact sales")
        .await
        .unwrap();

    // The loop pressed on and let the planner finish the run.
    assert_eq!(outcome, RunOutcome::Completed);
    // The failure state was still captured for the trace.
    assert_eq!(capture_names(&tmp.path().join("t")), vec!["00.png", "01.png"]);

    // The planner saw the failed step in history on its second call.
    let planner_state = planner.state();
    assert_eq!(planner_state.seen_history.len(), 2);
    let record = &planner_state.seen_history[1][0];
    match &record.outcome {
        StepOutcome::Failed(reason) => assert!(reason.contains("Contact Sales")),
        other => panic!("expected a failed record, got {other:?}"),
    }
}

#[tokio::test]
async fn planner_preview_is_normalized_and_bounded() {
    let tmp = tempfile::tempdir().unwrap();
    let big_page = format!(
        "<body><script>noise()</script>{}</body>",
        "<div class=\"row\"><p>cell</p></div>".repeat(500)
    );
    let browser = MockBrowser::with_markups(vec![&big_page]);
    let planner = MockPlanner::with_script(vec![Ok(Action::Done)]);

    runner(&browser, &planner, tmp.path())
        .run("task")
        .await
        .unwrap();

    let state = planner.state();
    let preview = &state.seen_previews[0];
    assert!(preview.chars().count() <= 2000);
    // Normalization already stripped non-visual elements.
    assert!(!preview.contains("script"));
    assert!(preview.contains("class=\"row\""));
}

#[tokio::test]
async fn batch_run_gates_captures_on_detected_change() {
    let tmp = tempfile::tempdir().unwrap();
    // Step 1 changes the page; step 2 leaves it alone.
    let browser = MockBrowser::with_markups(vec![
        "<div><p>start</p></div>",
        "<div><p>start</p><div class=\"modal\" role=\"dialog\"><p>talk to us</p></div></div>",
    ]);
    browser.add_matches(browser_pilot::Query::Css("body".into()), 1);
    let planner = MockPlanner::with_script(vec![]);

    let steps = vec![
        navigate("https://a"),
        Action::WaitFor {
            locator: Locator::Selector("body".into()),
        },
    ];

    runner(&browser, &planner, tmp.path())
        .run_batch(&steps)
        .unwrap();

    // Baseline, then only the step that actually changed the UI state.
    assert_eq!(capture_names(&tmp.path().join("t")), vec!["00.png", "01.png"]);
    assert_eq!(browser.state().close_count, 1);
}
