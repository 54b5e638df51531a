// tests/task_lifecycle.rs

use std::error::Error;
use std::time::Duration;

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use kindle::config::Timeouts;
use kindle::errors::KindleError;
use kindle::task::{Task, probes};
use kindle::types::{RunOutcome, TaskState};
use kindle_test_utils::hooks::{
    CountingHook, FailingHook, RecordingHook, SleepingHook, event_log, events,
};
use kindle_test_utils::{init_tracing, sh_task, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Exits 0 on SIGINT once its trap is installed.
const GRACEFUL: &str = "trap 'exit 0' INT; echo armed >&2; while true; do sleep 0.05; done";

/// Script that ignores SIGINT, so only a kill brings it down.
const STUBBORN: &str = "trap '' INT; echo armed >&2; while true; do sleep 0.05; done";

#[tokio::test]
async fn clean_exit_sets_ended_but_not_failed() -> TestResult {
    init_tracing();
    let task = sh_task("hello", "echo hello; echo world >&2").build()?;
    let mut out = task.stdout().subscribe();
    let mut err = task.stderr().subscribe();

    let outcome = with_timeout(task.run(CancellationToken::new())).await?;

    assert_eq!(outcome, RunOutcome::Exited { code: Some(0) });
    assert!(task.ended().is_set());
    assert!(!task.failed().is_set());
    assert!(task.ready().is_set());
    assert_eq!(task.state(), TaskState::Ended);
    assert_eq!(task.pid(), None);
    assert!(!task.is_running());

    assert_eq!(out.try_recv().as_deref(), Some("hello"));
    assert_eq!(err.try_recv().as_deref(), Some("world"));
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_sets_failed() -> TestResult {
    init_tracing();
    let task = sh_task("broken", "exit 3").build()?;

    let outcome = with_timeout(task.run(CancellationToken::new())).await?;

    assert_eq!(outcome, RunOutcome::Exited { code: Some(3) });
    assert!(!outcome.success());
    assert!(!outcome.stop_requested());
    assert!(task.failed().is_set());
    assert!(task.ended().is_set());
    Ok(())
}

#[tokio::test]
async fn hooks_run_around_the_process() -> TestResult {
    init_tracing();
    let log = event_log();
    let task = sh_task("hooked", "true")
        .pre_hook(RecordingHook::new("pre", &log))
        .post_hook(RecordingHook::new("post", &log))
        .build()?;

    with_timeout(task.run(CancellationToken::new())).await?;

    assert_eq!(events(&log), vec!["pre:hooked", "post:hooked"]);
    Ok(())
}

#[tokio::test]
async fn pre_hook_failure_prevents_spawn() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let marker = dir.path().join("spawned");
    let post = CountingHook::new();

    let task = sh_task("guarded", &format!("touch '{}'", marker.display()))
        .pre_hook(FailingHook::new("database unreachable"))
        .post_hook(post.clone())
        .build()?;

    let result = with_timeout(task.run(CancellationToken::new())).await;

    match result {
        Err(KindleError::PreHookFailed { task: name, source }) => {
            assert_eq!(name, "guarded");
            assert!(source.to_string().contains("database unreachable"));
        }
        other => panic!("expected PreHookFailed, got {other:?}"),
    }
    assert!(!marker.exists());
    assert!(task.ended().is_set());
    assert!(!task.failed().is_set());
    assert_eq!(post.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn slow_pre_hook_times_out() -> TestResult {
    init_tracing();
    let task = sh_task("slow-pre", "true")
        .pre_hook(SleepingHook(Duration::from_secs(30)))
        .timeouts(Timeouts::default().with_pre_hook(Duration::from_millis(100)))
        .build()?;

    let result = with_timeout(task.run(CancellationToken::new())).await;

    match result {
        Err(KindleError::PreHookTimeout { task: name, timeout }) => {
            assert_eq!(name, "slow-pre");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected PreHookTimeout, got {other:?}"),
    }
    assert!(task.ended().is_set());
    Ok(())
}

#[tokio::test]
async fn post_hook_failure_is_reported_after_clean_run() -> TestResult {
    init_tracing();
    let task = sh_task("post-fails", "true")
        .post_hook(FailingHook::new("cleanup failed"))
        .build()?;

    let result = with_timeout(task.run(CancellationToken::new())).await;

    assert!(matches!(result, Err(KindleError::PostHookFailed { .. })));
    assert!(task.ended().is_set());
    assert!(!task.failed().is_set());
    Ok(())
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() -> TestResult {
    init_tracing();
    let post = CountingHook::new();
    let task = Task::builder("ghost", ["/definitely/not/a/real/binary"])
        .post_hook(post.clone())
        .build()?;

    let result = with_timeout(task.run(CancellationToken::new())).await;

    match result {
        Err(KindleError::Spawn { task: name, .. }) => assert_eq!(name, "ghost"),
        other => panic!("expected Spawn error, got {other:?}"),
    }
    assert!(task.ended().is_set());
    assert!(task.failed().is_set());
    assert_eq!(post.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn stop_before_spawn_aborts_the_run() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let marker = dir.path().join("spawned");
    let pre = CountingHook::new();
    let post = CountingHook::new();

    let task = sh_task("never", &format!("touch '{}'", marker.display()))
        .pre_hook(pre.clone())
        .post_hook(post.clone())
        .build()?;

    let stop = CancellationToken::new();
    stop.cancel();
    let outcome = with_timeout(task.run(stop)).await?;

    assert_eq!(outcome, RunOutcome::Aborted);
    assert!(outcome.stop_requested());
    assert!(!marker.exists());
    assert_eq!(pre.calls(), 0);
    assert_eq!(post.calls(), 1);
    assert!(task.ended().is_set());
    Ok(())
}

#[tokio::test]
async fn graceful_stop_lets_process_exit_cleanly() -> TestResult {
    init_tracing();
    let kill = CountingHook::new();
    let task = sh_task("graceful", GRACEFUL)
        .ready_hook(probes::wait_for_pattern("armed")?)
        .kill_hook(kill.clone())
        .build()?;
    let stop = CancellationToken::new();

    let (outcome, ()) = with_timeout(async {
        tokio::join!(task.run(stop.clone()), async {
            task.ready().wait().await;
            assert!(task.pid().is_some());
            assert_eq!(task.state(), TaskState::Running);
            stop.cancel();
        })
    })
    .await;

    assert_eq!(outcome?, RunOutcome::Stopped { code: Some(0) });
    assert!(!task.failed().is_set());
    assert_eq!(kill.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn interrupt_that_terminates_process_counts_as_failure() -> TestResult {
    init_tracing();
    let task = sh_task("sleeper", "echo armed >&2; exec sleep 30")
        .ready_hook(probes::wait_for_pattern("armed")?)
        .build()?;
    let stop = CancellationToken::new();

    let (outcome, ()) = with_timeout(async {
        tokio::join!(task.run(stop.clone()), async {
            task.ready().wait().await;
            stop.cancel();
        })
    })
    .await;

    // Killed by the signal itself, so there is no exit code.
    assert_eq!(outcome?, RunOutcome::Stopped { code: None });
    assert!(task.failed().is_set());
    Ok(())
}

#[tokio::test]
async fn stubborn_process_is_killed_after_grace_period() -> TestResult {
    init_tracing();
    let kill = CountingHook::new();
    let task = sh_task("stubborn", STUBBORN)
        .ready_hook(probes::wait_for_pattern("armed")?)
        .kill_hook(kill.clone())
        .stop_grace(Duration::from_millis(300))
        .build()?;
    let stop = CancellationToken::new();

    let (outcome, ()) = with_timeout(async {
        tokio::join!(task.run(stop.clone()), async {
            task.ready().wait().await;
            stop.cancel();
        })
    })
    .await;

    assert_eq!(outcome?, RunOutcome::Killed);
    assert!(task.failed().is_set());
    assert!(task.ended().is_set());
    assert_eq!(kill.calls(), 1);
    Ok(())
}

/// Runs `task` until it is ready, then cancels it.
async fn stop_once_ready(task: &Task) -> kindle::errors::Result<RunOutcome> {
    let stop = CancellationToken::new();
    let (outcome, ()) = tokio::join!(task.run(stop.clone()), async {
        task.ready().wait().await;
        stop.cancel();
    });
    outcome
}

#[tokio::test]
async fn stubborn_process_kill_hook_timeout_does_not_block_shutdown() -> TestResult {
    init_tracing();
    let post = CountingHook::new();
    let task = sh_task("stubborn-slow-kill", STUBBORN)
        .ready_hook(probes::wait_for_pattern("armed")?)
        .kill_hook(SleepingHook(Duration::from_secs(30)))
        .post_hook(post.clone())
        .timeouts(
            Timeouts::default()
                .with_stop_grace(Duration::from_millis(300))
                .with_kill_hook(Duration::from_millis(100)),
        )
        .build()?;

    let outcome = with_timeout(stop_once_ready(&task)).await?;

    assert_eq!(outcome, RunOutcome::Killed);
    assert!(task.ended().is_set());
    assert_eq!(task.pid(), None);
    assert_eq!(post.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn stubborn_process_kill_hook_failure_is_logged_only() -> TestResult {
    init_tracing();
    let task = sh_task("stubborn-bad-kill", STUBBORN)
        .ready_hook(probes::wait_for_pattern("armed")?)
        .kill_hook(FailingHook::new("kill hook exploded"))
        .stop_grace(Duration::from_millis(300))
        .build()?;

    let outcome = with_timeout(stop_once_ready(&task)).await?;

    assert_eq!(outcome, RunOutcome::Killed);
    assert!(task.failed().is_set());
    assert!(task.ended().is_set());
    Ok(())
}

#[tokio::test]
async fn slow_post_hook_times_out_but_ended_is_set() -> TestResult {
    init_tracing();
    let task = sh_task("slow-post", "true")
        .post_hook(SleepingHook(Duration::from_secs(30)))
        .timeouts(Timeouts::default().with_post_hook(Duration::from_millis(100)))
        .build()?;

    let result = with_timeout(task.run(CancellationToken::new())).await;

    match result {
        Err(KindleError::PostHookTimeout { task: name, timeout }) => {
            assert_eq!(name, "slow-post");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected PostHookTimeout, got {other:?}"),
    }
    assert!(task.ended().is_set());
    assert!(!task.failed().is_set());
    Ok(())
}

#[tokio::test]
async fn output_lines_are_trimmed_of_surrounding_whitespace() -> TestResult {
    init_tracing();
    let task = sh_task(
        "padded",
        r"printf '  padded line \t \n'; printf '\tindented\r\n' >&2",
    )
    .build()?;
    let mut out = task.stdout().subscribe();
    let mut err = task.stderr().subscribe();

    with_timeout(task.run(CancellationToken::new())).await?;

    assert_eq!(out.try_recv().as_deref(), Some("padded line"));
    assert_eq!(err.try_recv().as_deref(), Some("indented"));
    Ok(())
}

#[tokio::test]
async fn concurrent_run_of_same_task_is_rejected() -> TestResult {
    init_tracing();
    let task = sh_task("single", GRACEFUL)
        .ready_hook(probes::wait_for_pattern("armed")?)
        .build()?;
    let stop = CancellationToken::new();

    let (first, second) = with_timeout(async {
        tokio::join!(task.run(stop.clone()), async {
            task.ready().wait().await;
            let second = task.run(CancellationToken::new()).await;
            stop.cancel();
            second
        })
    })
    .await;

    match second {
        Err(KindleError::AlreadyRunning(name)) => assert_eq!(name, "single"),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert_eq!(first?, RunOutcome::Stopped { code: Some(0) });
    Ok(())
}

#[tokio::test]
async fn signals_are_reset_on_every_run() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let marker = dir.path().join("second-run");
    let script = format!(
        "if [ -f '{m}' ]; then exit 0; else touch '{m}'; exit 1; fi",
        m = marker.display()
    );
    let task = sh_task("flaky", &script).build()?;

    let first = with_timeout(task.run(CancellationToken::new())).await?;
    assert_eq!(first, RunOutcome::Exited { code: Some(1) });
    assert!(task.failed().is_set());

    let second = with_timeout(task.run(CancellationToken::new())).await?;
    assert_eq!(second, RunOutcome::Exited { code: Some(0) });
    assert!(!task.failed().is_set());
    assert!(task.ended().is_set());
    Ok(())
}

#[test]
fn builder_rejects_empty_command_and_name() {
    let empty: [&str; 0] = [];
    match Task::builder("nothing", empty).build() {
        Err(KindleError::ConfigError(msg)) => assert!(msg.contains("empty command")),
        other => panic!("expected ConfigError, got {other:?}"),
    }

    assert!(matches!(
        Task::builder("  ", ["true"]).build(),
        Err(KindleError::ConfigError(_))
    ));
}

#[test]
fn fresh_task_is_idle() -> TestResult {
    let task = sh_task("idle", "true").build()?;
    assert_eq!(task.state(), TaskState::Idle);
    assert!(!task.ready().is_set());
    assert!(!task.failed().is_set());
    assert!(!task.ended().is_set());
    assert_eq!(task.pid(), None);
    assert_eq!(task.command(), ["sh", "-c", "true"]);
    Ok(())
}
