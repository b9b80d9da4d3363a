//! End-to-end engine tests: records in, children spawned, cache
//! populated, counters balanced.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use volley_engine::{
    Cache, CommandTemplate, DirCache, Engine, EngineError, EngineOpts, EngineResult, InputFormat,
    Stats, Template,
};

struct RunOutcome {
    result: EngineResult<()>,
    stats: Arc<Stats>,
}

async fn run_engine(
    opts: EngineOpts,
    cache_dir: &Path,
    template: &[&str],
    stdin_template: Option<&str>,
    format: InputFormat,
    input: &'static str,
) -> RunOutcome {
    let cache: Arc<dyn Cache> = Arc::new(DirCache::open(cache_dir).await.unwrap());
    let engine = Engine::new(opts, cache).unwrap();
    let template =
        CommandTemplate::parse(&template.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .unwrap();
    let stdin_template = stdin_template.map(|t| Template::parse(t).unwrap());
    let records = volley_engine::spawn_reader(
        format,
        Box::new(input.as_bytes()),
        engine.shutdown_handle(),
    );
    // interrupts never fire in these tests
    let (_interrupt_tx, interrupt_rx) = mpsc::channel(2);
    let stats = engine.stats();
    let result = engine
        .run(template, stdin_template, records, interrupt_rx)
        .await;
    RunOutcome { result, stats }
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

// ============================================================================
// Basic dispatch
// ============================================================================

#[tokio::test]
async fn three_echoes_succeed_and_are_cached() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_engine(
        EngineOpts::default(),
        dir.path(),
        &["echo", "{{.value}}"],
        None,
        InputFormat::Lines,
        "one\ntwo\nthree\n",
    )
    .await;
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.stats.succeeded(), 3);
    assert_eq!(outcome.stats.total(), 3);
    assert_eq!(outcome.stats.queued(), 0);
    assert_eq!(outcome.stats.in_progress(), 0);
    assert_eq!(count_entries(&dir.path().join("success")), 3);
}

#[tokio::test]
async fn rerun_with_skip_successes_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let first = run_engine(
        EngineOpts::default(),
        dir.path(),
        &["echo", "{{.value}}"],
        None,
        InputFormat::Lines,
        "one\ntwo\nthree\n",
    )
    .await;
    assert_eq!(first.stats.succeeded(), 3);

    let second = run_engine(
        EngineOpts {
            skip_successes: true,
            ..EngineOpts::default()
        },
        dir.path(),
        &["echo", "{{.value}}"],
        None,
        InputFormat::Lines,
        "one\ntwo\nthree\n",
    )
    .await;
    assert!(second.result.is_ok());
    assert_eq!(second.stats.skipped(), 3);
    assert_eq!(second.stats.succeeded(), 0);
    assert_eq!(second.stats.total(), 3);
    assert_eq!(count_entries(&dir.path().join("success")), 3, "no new entries");
}

#[tokio::test]
async fn debounce_makes_old_successes_eligible_again() {
    let dir = tempfile::tempdir().unwrap();
    run_engine(
        EngineOpts::default(),
        dir.path(),
        &["echo", "{{.value}}"],
        None,
        InputFormat::Lines,
        "one\ntwo\nthree\n",
    )
    .await;

    // age the cache entries past the debounce period
    tokio::time::sleep(Duration::from_millis(50)).await;
    let rerun = run_engine(
        EngineOpts {
            skip_successes: true,
            debounce_successes: Some(Duration::from_millis(1)),
            ..EngineOpts::default()
        },
        dir.path(),
        &["echo", "{{.value}}"],
        None,
        InputFormat::Lines,
        "one\ntwo\nthree\n",
    )
    .await;
    assert_eq!(rerun.stats.succeeded(), 3, "all reran");
    assert_eq!(rerun.stats.skipped(), 0);
}

#[tokio::test]
async fn cached_content_is_the_combined_output() {
    let dir = tempfile::tempdir().unwrap();
    run_engine(
        EngineOpts::default(),
        dir.path(),
        &["echo", "{{.value}}"],
        None,
        InputFormat::Lines,
        "hello\n",
    )
    .await;
    let marker = volley_engine::RenderedCommand::new(vec![
        "echo".to_string(),
        "hello".to_string(),
    ])
    .marker();
    let cached = std::fs::read(dir.path().join("success").join(marker)).unwrap();
    assert_eq!(cached, b"hello\n");
}

// ============================================================================
// Prioritization
// ============================================================================

#[tokio::test]
async fn defer_reruns_dispatches_fresh_records_first() {
    let dir = tempfile::tempdir().unwrap();
    let order_file = dir.path().join("order");
    let script = format!("echo {{{{.value}}}} >> {}", order_file.display());

    // first run primes the cache for records 1..=5, sequentially so
    // their cache mtimes are ordered the same as their indexes
    run_engine(
        EngineOpts {
            concurrency: 1,
            ..EngineOpts::default()
        },
        dir.path(),
        &["sh", "-c", &script],
        None,
        InputFormat::Lines,
        "1\n2\n3\n4\n5\n",
    )
    .await;
    std::fs::write(&order_file, b"").unwrap();

    // second run sees 1..=10; 6..=10 have never run and go first.
    // Single worker so the file records the dispatch order.
    let second = run_engine(
        EngineOpts {
            defer_reruns: true,
            concurrency: 1,
            ..EngineOpts::default()
        },
        dir.path(),
        &["sh", "-c", &script],
        None,
        InputFormat::Lines,
        "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n",
    )
    .await;
    assert_eq!(second.stats.succeeded(), 10);

    let order = std::fs::read_to_string(&order_file).unwrap();
    let values: Vec<&str> = order.lines().collect();
    assert_eq!(
        &values[..5],
        &["6", "7", "8", "9", "10"],
        "never-run records start before previously-run ones: {values:?}"
    );
    assert_eq!(&values[5..], &["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn without_defer_insertion_order_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let order_file = dir.path().join("order");
    let script = format!("echo {{{{.value}}}} >> {}", order_file.display());
    run_engine(
        EngineOpts {
            concurrency: 1,
            ..EngineOpts::default()
        },
        dir.path(),
        &["sh", "-c", &script],
        None,
        InputFormat::Lines,
        "c\na\nb\n",
    )
    .await;
    let order = std::fs::read_to_string(&order_file).unwrap();
    assert_eq!(order.lines().collect::<Vec<_>>(), ["c", "a", "b"]);
}

// ============================================================================
// Timeouts and failures
// ============================================================================

#[tokio::test]
async fn timeouts_fail_while_quick_jobs_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_engine(
        EngineOpts {
            concurrency: 6,
            timeout: Some(Duration::from_secs(1)),
            ..EngineOpts::default()
        },
        dir.path(),
        &["sh", "-c", "sleep {{.value}}"],
        None,
        InputFormat::Lines,
        "0.1\n0.2\n0.3\n5\n6\n7\n",
    )
    .await;
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.stats.succeeded(), 3);
    assert_eq!(outcome.stats.failed(), 3, "a timeout is a real failure");
    assert_eq!(outcome.stats.aborted(), 0);
    assert_eq!(count_entries(&dir.path().join("failure")), 3);
}

#[tokio::test]
async fn abort_on_error_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_engine(
        EngineOpts {
            concurrency: 1,
            abort_on_error: true,
            ..EngineOpts::default()
        },
        dir.path(),
        &["sh", "-c", "exit {{.value}}"],
        None,
        InputFormat::Lines,
        "0\n1\n0\n0\n0\n",
    )
    .await;
    assert!(matches!(outcome.result, Err(EngineError::AbortOnError)));
    assert!(
        outcome.stats.succeeded() < 4,
        "the failure cut the run short: {}",
        outcome.stats.render()
    );
}

#[tokio::test]
async fn render_failures_count_as_failed_without_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_engine(
        EngineOpts::default(),
        dir.path(),
        &["echo", "{{.missing}}"],
        None,
        InputFormat::Lines,
        "one\ntwo\n",
    )
    .await;
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.stats.failed(), 2);
    assert_eq!(outcome.stats.total(), 2);
    assert_eq!(outcome.stats.succeeded(), 0);
    assert_eq!(count_entries(&dir.path().join("failure")), 0, "not cached");
}

#[tokio::test]
async fn malformed_csv_rows_fail_but_do_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_engine(
        EngineOpts::default(),
        dir.path(),
        &["echo", "{{.foo}}-{{.bar}}"],
        None,
        InputFormat::Csv,
        "foo,bar\n1,a\nonly-one-cell\n2,b\n",
    )
    .await;
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.stats.succeeded(), 2);
    assert_eq!(outcome.stats.failed(), 1);
    assert_eq!(outcome.stats.total(), 3);
}

#[tokio::test]
async fn malformed_json_line_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_engine(
        EngineOpts::default(),
        dir.path(),
        &["echo", "{{.v}}"],
        None,
        InputFormat::JsonLines,
        "{\"v\": \"1\"}\nnot json\n{\"v\": \"2\"}\n",
    )
    .await;
    assert!(matches!(outcome.result, Err(EngineError::InputFatal(_))));
}

// ============================================================================
// Dry run, stdin, rate limiting
// ============================================================================

#[tokio::test]
async fn dry_run_reports_success_without_touching_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_engine(
        EngineOpts {
            dry_run: true,
            ..EngineOpts::default()
        },
        dir.path(),
        &["sh", "-c", "exit 1"],
        None,
        InputFormat::Lines,
        "one\ntwo\n",
    )
    .await;
    assert_eq!(outcome.stats.succeeded(), 2);
    assert_eq!(count_entries(&dir.path().join("success")), 0);
    assert_eq!(count_entries(&dir.path().join("failure")), 0);
}

#[tokio::test]
async fn stdin_template_feeds_each_child() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_engine(
        EngineOpts::default(),
        dir.path(),
        &["head", "-n", "1"],
        Some("fed-{{.value}}"),
        InputFormat::Lines,
        "x\n",
    )
    .await;
    assert_eq!(outcome.stats.succeeded(), 1);
    let marker = {
        let mut cmd = volley_engine::RenderedCommand::new(vec![
            "head".to_string(),
            "-n".to_string(),
            "1".to_string(),
        ]);
        cmd.stdin = Some("fed-x".to_string());
        cmd.marker()
    };
    let cached = std::fs::read(dir.path().join("success").join(marker)).unwrap();
    assert_eq!(cached, b"fed-x\n");
}

#[tokio::test]
async fn rate_limit_spaces_job_starts() {
    let dir = tempfile::tempdir().unwrap();
    let started = std::time::Instant::now();
    let outcome = run_engine(
        EngineOpts {
            rate_limit: Some(Duration::from_millis(200)),
            ..EngineOpts::default()
        },
        dir.path(),
        &["true"],
        None,
        InputFormat::Lines,
        "1\n2\n3\n",
    )
    .await;
    assert_eq!(outcome.stats.succeeded(), 3);
    assert!(
        started.elapsed() >= Duration::from_millis(400),
        "three jobs through a 200ms limiter take at least 400ms"
    );
}

#[tokio::test]
async fn sub_millisecond_rate_limit_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn Cache> = Arc::new(DirCache::open(dir.path()).await.unwrap());
    let result = Engine::new(
        EngineOpts {
            rate_limit: Some(Duration::from_micros(10)),
            ..EngineOpts::default()
        },
        cache,
    );
    assert!(matches!(result, Err(EngineError::RateLimitTooSmall)));
}
