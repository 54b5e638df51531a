// tests/readiness.rs

use std::error::Error;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use kindle::errors::KindleError;
use kindle::task::probes::{wait_for_delay, wait_for_pattern, wait_for_seconds};
use kindle::types::RunOutcome;
use kindle_test_utils::{init_tracing, sh_task, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn pattern_probe_fires_on_matching_stderr_line() -> TestResult {
    init_tracing();
    let task = sh_task(
        "server",
        "echo booting >&2; sleep 0.2; echo 'listening on 1'; sleep 0.3; \
         echo 'listening on 8080' >&2; exec sleep 30",
    )
    .ready_hook(wait_for_pattern(r"listening on [0-9]+$")?)
    .build()?;
    let stop = CancellationToken::new();

    let (outcome, ()) = with_timeout(async {
        tokio::join!(task.run(stop.clone()), async {
            let mut out = task.stdout().subscribe();
            let mut err = task.stderr().subscribe();

            // A matching line on stdout does not make the task ready.
            assert_eq!(out.recv().await.as_deref(), Some("listening on 1"));
            assert!(!task.ready().is_set());

            task.ready().wait().await;
            stop.cancel();

            let mut seen = Vec::new();
            while let Some(line) = err.try_recv() {
                seen.push(line);
            }
            assert!(seen.iter().any(|l| l == "listening on 8080"), "{seen:?}");
        })
    })
    .await;

    assert!(outcome?.stop_requested());
    Ok(())
}

#[tokio::test]
async fn pattern_probe_is_cancelled_when_process_exits() -> TestResult {
    init_tracing();
    let task = sh_task("quiet", "echo 'nothing to see' >&2")
        .ready_hook(wait_for_pattern("ready")?)
        .build()?;

    let outcome = with_timeout(task.run(CancellationToken::new())).await?;

    assert_eq!(outcome, RunOutcome::Exited { code: Some(0) });
    assert!(!task.ready().is_set());
    assert_eq!(task.stderr().subscriber_count(), 0);
    Ok(())
}

#[test]
fn invalid_pattern_is_a_config_error() {
    match wait_for_pattern("([unclosed") {
        Err(KindleError::ConfigError(msg)) => assert!(msg.contains("readiness pattern")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[tokio::test]
async fn delay_probe_fires_after_delay() -> TestResult {
    init_tracing();
    let task = sh_task("warmup", "exec sleep 30")
        .ready_hook(wait_for_delay(Duration::from_millis(200)))
        .build()?;
    let stop = CancellationToken::new();

    let (outcome, elapsed) = with_timeout(async {
        tokio::join!(task.run(stop.clone()), async {
            let started = Instant::now();
            task.ready().wait().await;
            let elapsed = started.elapsed();
            stop.cancel();
            elapsed
        })
    })
    .await;

    outcome?;
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    Ok(())
}

#[tokio::test]
async fn delay_probe_is_cancelled_when_process_exits() -> TestResult {
    init_tracing();
    let task = sh_task("short", "true")
        .ready_hook(wait_for_delay(Duration::from_secs(30)))
        .build()?;

    let outcome = with_timeout(task.run(CancellationToken::new())).await?;

    assert!(outcome.success());
    assert!(!task.ready().is_set());
    Ok(())
}

#[test]
fn fractional_seconds_are_accepted() -> TestResult {
    let probe = wait_for_seconds(0.25)?;
    assert_eq!(probe.delay(), Duration::from_millis(250));
    Ok(())
}

#[test]
fn negative_or_nan_delay_is_a_config_error() {
    assert!(matches!(wait_for_seconds(-1.0), Err(KindleError::ConfigError(_))));
    assert!(matches!(wait_for_seconds(f64::NAN), Err(KindleError::ConfigError(_))));
}
