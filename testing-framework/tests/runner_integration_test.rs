// Integration test for the test runner
// Scripted tests are run through the whole supervisor: limits, phase guard,
// budget accounting, reports and the debug hook.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Duration;

use tos_test_supervisor::debug::{PostMortem, PostMortemSession};
use tos_test_supervisor::orchestrator::{Clock, ManualClock, SupervisionEnv};
use tos_test_supervisor::runner::TestRunnerBuilder;
use tos_test_supervisor::prelude::{
    ConfigurationError, HarnessConfig, Phase, SupervisedTest, TestStatus, TimeoutCause,
    TimeoutMarker,
};
use tos_test_supervisor::timeout::InterruptCall;

#[derive(Clone, Copy)]
enum Step {
    Sleep(u64),
    Fail,
    Panic,
    Hang,
}

type Journal = Arc<Mutex<Vec<String>>>;

struct ScriptedTest {
    name: &'static str,
    clock: Arc<dyn Clock>,
    steps: [Step; 3],
    marker: Option<TimeoutMarker>,
    flaky: bool,
    journal: Journal,
}

impl ScriptedTest {
    fn new(name: &'static str, clock: Arc<dyn Clock>, steps: [Step; 3], journal: &Journal) -> Self {
        Self {
            name,
            clock,
            steps,
            marker: None,
            flaky: false,
            journal: journal.clone(),
        }
    }

    fn with_marker(mut self, marker: TimeoutMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    fn flaky(mut self) -> Self {
        self.flaky = true;
        self
    }

    fn boxed(self) -> Box<dyn SupervisedTest> {
        Box::new(self)
    }

    async fn perform(&self, phase: Phase, step: Step) -> Result<()> {
        self.journal.lock().push(format!("{}:{}", self.name, phase));
        match step {
            Step::Sleep(secs) => {
                self.clock.sleep(Duration::from_secs(secs)).await;
                Ok(())
            }
            Step::Fail => Err(anyhow!("{} failed on purpose", phase)),
            Step::Panic => panic!("{} exploded", phase),
            Step::Hang => {
                futures::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SupervisedTest for ScriptedTest {
    fn name(&self) -> &str {
        self.name
    }

    fn timeout_marker(&self) -> Option<TimeoutMarker> {
        self.marker.clone()
    }

    fn is_flaky(&self) -> bool {
        self.flaky
    }

    async fn setup(&mut self) -> Result<()> {
        self.perform(Phase::Setup, self.steps[0]).await
    }

    async fn call(&mut self) -> Result<()> {
        self.perform(Phase::Call, self.steps[1]).await
    }

    async fn teardown(&mut self) -> Result<()> {
        self.perform(Phase::Teardown, self.steps[2]).await
    }
}

fn config() -> HarnessConfig {
    HarnessConfig {
        timeout_limit_for_setup_and_call: Some(10.0),
        timeout_limit_teardown: Some(5.0),
        ..Default::default()
    }
}

fn journal() -> Journal {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test]
async fn test_passing_test_reports_remaining_budget() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let test = ScriptedTest::new(
        "test_transfer",
        env.clock.clone(),
        [Step::Sleep(2), Step::Sleep(3), Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run(vec![test.boxed()]).await?;

    assert!(suite.is_success());
    let report = suite.test("test_transfer").unwrap();
    assert_eq!(report.status, TestStatus::Passed);
    assert_eq!(report.remaining_budget_secs, 5.0);
    assert_eq!(report.duration_ms, 6_000);
    assert_eq!(
        *journal.lock(),
        vec![
            "test_transfer:setup",
            "test_transfer:call",
            "test_transfer:teardown"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_manual_clock_alone_does_not_drain_the_budget() -> Result<()> {
    let journal = journal();
    let clock = Arc::new(ManualClock::new());
    let runner = TestRunnerBuilder::from_config(config())
        .with_clock(clock.clone())
        .build()?;

    let test = ScriptedTest::new(
        "test_manual",
        clock.clone(),
        [Step::Sleep(1), Step::Sleep(1), Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run(vec![test.boxed()]).await?;

    let report = suite.test("test_manual").unwrap();
    assert!(report.passed(), "{}", report);
    assert_eq!(report.remaining_budget_secs, 8.0);
    assert_eq!(report.duration_ms, 3_000);
    Ok(())
}

#[tokio::test]
async fn test_setup_overrun_skips_call_but_not_teardown() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let test = ScriptedTest::new(
        "test_slow_fixture",
        env.clock.clone(),
        [Step::Sleep(12), Step::Sleep(1), Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run(vec![test.boxed()]).await?;

    let report = suite.test("test_slow_fixture").unwrap();
    assert_eq!(report.failed_phase(), Some(Phase::Call));
    assert_eq!(
        report.failures[0].timeout.as_ref().map(|t| t.cause),
        Some(TimeoutCause::BudgetExhausted)
    );
    assert_eq!(report.exceeded_limit(), Some(10.0));
    assert_eq!(
        *journal.lock(),
        vec!["test_slow_fixture:setup", "test_slow_fixture:teardown"]
    );

    // Teardown is armed with its own full budget
    let starts: Vec<_> = env
        .source
        .calls()
        .into_iter()
        .filter(|call| matches!(call, InterruptCall::StartTimer(_)))
        .collect();
    assert_eq!(
        starts,
        vec![
            InterruptCall::StartTimer(Duration::from_secs(10)),
            InterruptCall::StartTimer(Duration::from_secs(5)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_call_overrun_fails_the_test_overall() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let test = ScriptedTest::new(
        "test_overrun",
        env.clock.clone(),
        [Step::Sleep(6), Step::Sleep(5), Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run(vec![test.boxed()]).await?;

    let report = suite.test("test_overrun").unwrap();
    assert!(!report.passed());
    assert_eq!(report.failed_phase(), Some(Phase::Call));
    assert_eq!(report.remaining_budget_secs, -1.0);
    assert_eq!(journal.lock().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_alarm_interrupts_hanging_call() -> Result<()> {
    let env = SupervisionEnv::paused();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let hanging = ScriptedTest::new(
        "test_hangs",
        env.clock.clone(),
        [Step::Sleep(4), Step::Hang, Step::Sleep(1)],
        &journal,
    );
    let next = ScriptedTest::new(
        "test_next",
        env.clock.clone(),
        [Step::Sleep(1), Step::Sleep(1), Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run(vec![hanging.boxed(), next.boxed()]).await?;

    let report = suite.test("test_hangs").unwrap();
    let failure = &report.failures[0];
    assert_eq!(failure.phase, Phase::Call);
    assert_eq!(
        failure.timeout.as_ref().map(|t| (t.cause, t.limit_secs, t.severe)),
        Some((TimeoutCause::AlarmFired, 10.0, false))
    );
    assert!(failure.message.starts_with("Setup and Call timeout >10s in call"));
    assert!(journal.lock().contains(&"test_hangs:teardown".to_string()));

    // The next test is not disturbed by the alarm of the previous one
    assert!(suite.test("test_next").unwrap().passed());
    assert_eq!(env.source.stray_notifications(), 0);
    Ok(())
}

#[tokio::test]
async fn test_hanging_teardown_is_severe() -> Result<()> {
    let env = SupervisionEnv::paused();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let test = ScriptedTest::new(
        "test_leaks",
        env.clock.clone(),
        [Step::Sleep(1), Step::Sleep(1), Step::Hang],
        &journal,
    );
    let suite = runner.run(vec![test.boxed()]).await?;

    let report = suite.test("test_leaks").unwrap();
    let failure = &report.failures[0];
    assert_eq!(failure.phase, Phase::Teardown);
    assert_eq!(failure.timeout.as_ref().map(|t| t.severe), Some(true));
    assert!(failure.message.contains("finalizers"));
    Ok(())
}

#[tokio::test]
async fn test_setup_error_skips_call() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let test = ScriptedTest::new(
        "test_broken_fixture",
        env.clock.clone(),
        [Step::Fail, Step::Sleep(1), Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run(vec![test.boxed()]).await?;

    let report = suite.test("test_broken_fixture").unwrap();
    assert_eq!(report.failed_phase(), Some(Phase::Setup));
    assert_eq!(report.failures[0].timeout, None);
    assert_eq!(
        report.failures[0].message,
        "setup failed: setup failed on purpose"
    );
    assert_eq!(
        *journal.lock(),
        vec!["test_broken_fixture:setup", "test_broken_fixture:teardown"]
    );
    // The alarm was disarmed although setup failed
    assert_eq!(env.source.armed_for(), None);
    assert!(!env.source.has_handler());
    Ok(())
}

#[tokio::test]
async fn test_panicking_call_is_a_test_failure() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let test = ScriptedTest::new(
        "test_panics",
        env.clock.clone(),
        [Step::Sleep(1), Step::Panic, Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run(vec![test.boxed()]).await?;

    let report = suite.test("test_panics").unwrap();
    assert_eq!(report.failed_phase(), Some(Phase::Call));
    assert!(report.failures[0].message.contains("panicked: call exploded"));
    assert!(journal.lock().contains(&"test_panics:teardown".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_invalid_marker_aborts_before_any_test_runs() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let valid = ScriptedTest::new(
        "test_valid",
        env.clock.clone(),
        [Step::Sleep(1), Step::Sleep(1), Step::Sleep(1)],
        &journal,
    );
    let invalid = ScriptedTest::new(
        "test_too_long",
        env.clock.clone(),
        [Step::Sleep(1), Step::Sleep(1), Step::Sleep(1)],
        &journal,
    )
    .with_marker(TimeoutMarker::positional(11.0));

    let err = runner
        .run(vec![valid.boxed(), invalid.boxed()])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::OverrideExceedsCeiling {
            timeout: 11.0,
            limit: 10.0
        }
    );
    assert!(journal.lock().is_empty());
    assert!(env.source.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_marker_lowers_the_shared_budget() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let test = ScriptedTest::new(
        "test_quick",
        env.clock.clone(),
        [Step::Sleep(2), Step::Sleep(2), Step::Sleep(1)],
        &journal,
    )
    .with_marker(TimeoutMarker::named(3.0));
    let suite = runner.run(vec![test.boxed()]).await?;

    let report = suite.test("test_quick").unwrap();
    assert_eq!(report.failed_phase(), Some(Phase::Call));
    assert_eq!(report.exceeded_limit(), Some(3.0));
    Ok(())
}

#[tokio::test]
async fn test_flaky_feedback() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();

    let scripted = |name| {
        ScriptedTest::new(
            name,
            env.clock.clone(),
            [Step::Sleep(1), Step::Fail, Step::Sleep(1)],
            &journal,
        )
    };

    let runner = env.runner(config()).with_flaky_feedback(true).build()?;
    let suite = runner
        .run(vec![
            scripted("test_flaky").flaky().boxed(),
            scripted("test_broken").boxed(),
        ])
        .await?;
    assert!(suite.test("test_flaky").unwrap().flaky);
    assert!(!suite.test("test_broken").unwrap().flaky);
    assert_eq!(suite.flaky, 1);
    assert!(suite.summary().contains("(1 flaky)"));

    let runner = env.runner(config()).with_flaky_feedback(false).build()?;
    let suite = runner
        .run(vec![scripted("test_flaky").flaky().boxed()])
        .await?;
    assert!(!suite.test("test_flaky").unwrap().flaky);
    Ok(())
}

#[derive(Default)]
struct RecordingPostMortem {
    sessions: Mutex<Vec<String>>,
}

impl PostMortem for RecordingPostMortem {
    fn open(&self, session: &PostMortemSession) {
        self.sessions.lock().push(session.name.clone());
    }
}

#[tokio::test]
async fn test_post_mortem_on_phase_failure() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let post_mortem = Arc::new(RecordingPostMortem::default());
    let mut config = config();
    config.post_mortem = true;

    let runner = env
        .runner(config)
        .with_post_mortem(post_mortem.clone())
        .build()?;
    assert!(runner.debug_hook().is_some());
    assert!(env.runtime.has_fault_sink());

    let passing = ScriptedTest::new(
        "test_ok",
        env.clock.clone(),
        [Step::Sleep(1), Step::Sleep(1), Step::Sleep(1)],
        &journal,
    );
    let failing = ScriptedTest::new(
        "test_ko",
        env.clock.clone(),
        [Step::Sleep(1), Step::Fail, Step::Sleep(1)],
        &journal,
    );
    runner.run(vec![passing.boxed(), failing.boxed()]).await?;

    assert_eq!(*post_mortem.sessions.lock(), vec!["test_ko::call".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_failed_suite_report_is_saved() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let dir = tempfile::tempdir()?;
    let mut config = config();
    config.report_dir = Some(dir.path().to_path_buf());
    let runner = env.runner(config).build()?;

    let test = ScriptedTest::new(
        "test_ko",
        env.clock.clone(),
        [Step::Sleep(1), Step::Fail, Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run(vec![test.boxed()]).await?;

    let saved: Vec<_> = std::fs::read_dir(dir.path())?.collect::<Result<_, _>>()?;
    assert_eq!(saved.len(), 1);
    let loaded = tos_test_supervisor::runner::SuiteReport::load(saved[0].path()).await?;
    assert_eq!(loaded, suite);
    Ok(())
}

#[test]
fn test_run_blocking_builds_its_own_runtime() -> Result<()> {
    let env = SupervisionEnv::manual();
    let journal = journal();
    let runner = env.runner(config()).build()?;

    let test = ScriptedTest::new(
        "test_blocking",
        env.clock.clone(),
        [Step::Sleep(1), Step::Sleep(1), Step::Sleep(1)],
        &journal,
    );
    let suite = runner.run_blocking(vec![test.boxed()])?;
    assert!(suite.is_success());
    Ok(())
}
