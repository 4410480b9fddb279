mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{FakeRuntime, UnitScript, entry_file, failure_stdout, success_stdout, unit};
use crawlmux::{
    BatchReport, CrawlStatus, DispatchError, DispatchObserver, Dispatcher, Outcome,
    OutcomeRecorder,
};
use tokio_util::sync::CancellationToken;

fn dispatcher(runtime: &Arc<FakeRuntime>, limit: usize, time_limit: Duration) -> Dispatcher {
    Dispatcher::builder(runtime.clone())
        .concurrency_limit(limit)
        .time_limit(time_limit)
        .poll_interval(Duration::from_millis(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_every_unit_gets_exactly_one_outcome() {
    let runtime = Arc::new(FakeRuntime::new());
    let ids = ["a", "b", "c", "d"];
    for id in ids {
        runtime.script(
            entry_file(id),
            UnitScript::new(Duration::from_millis(10), success_stdout()),
        );
    }

    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());
    let units = ids.iter().map(|id| unit(id)).collect();

    let report = dispatcher(&runtime, 1, Duration::from_secs(5))
        .run(units, &recorder)
        .await
        .unwrap();

    assert_eq!(report.len(), 4);
    let mut recorded: Vec<&str> = report.outcomes.iter().map(|r| r.unit_id.as_str()).collect();
    recorded.sort_unstable();
    assert_eq!(recorded, ids);

    // One result directory per unit, named after its identifier.
    let mut dirs: Vec<String> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    dirs.sort_unstable();
    assert_eq!(dirs, ids);
}

#[tokio::test]
async fn test_concurrency_bound_is_respected() {
    let runtime = Arc::new(FakeRuntime::new());
    let ids = ["a", "b", "c", "d", "e", "f"];
    for id in ids {
        runtime.script(
            entry_file(id),
            UnitScript::new(Duration::from_millis(30), success_stdout()),
        );
    }

    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());
    let units = ids.iter().map(|id| unit(id)).collect();

    let report = dispatcher(&runtime, 2, Duration::from_secs(5))
        .run(units, &recorder)
        .await
        .unwrap();

    assert_eq!(report.len(), 6);
    let max = runtime.max_running.load(std::sync::atomic::Ordering::SeqCst);
    assert!(max <= 2, "at most 2 concurrent units, saw {max}");
    assert!(max >= 1);
}

#[tokio::test]
async fn test_units_start_in_fifo_order() {
    let runtime = Arc::new(FakeRuntime::new());
    let ids = ["zulu", "alpha", "mike", "echo"];
    for id in ids {
        runtime.script(
            entry_file(id),
            UnitScript::new(Duration::from_millis(5), success_stdout()),
        );
    }

    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());
    let units = ids.iter().map(|id| unit(id)).collect();

    dispatcher(&runtime, 1, Duration::from_secs(5))
        .run(units, &recorder)
        .await
        .unwrap();

    let order = runtime.launch_order.lock().unwrap().clone();
    let expected: Vec<String> = ids.iter().map(|id| entry_file(id)).collect();
    assert_eq!(order, expected, "submission order, not alphabetical");
}

#[tokio::test]
async fn test_overdue_unit_is_killed_and_recorded_as_ran_too_long() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.script(
        entry_file("runaway"),
        UnitScript::new(Duration::from_secs(600), success_stdout()),
    );

    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());

    let report = dispatcher(&runtime, 1, Duration::from_millis(60))
        .run(vec![unit("runaway")], &recorder)
        .await
        .unwrap();

    assert_eq!(report.len(), 1);
    assert_eq!(report.outcomes[0].outcome.status, CrawlStatus::RanTooLong);
    assert!(report.outcomes[0].outcome.duration >= Duration::from_millis(60));
    assert_eq!(runtime.kills.lock().unwrap().len(), 1);
    assert!(
        root.path().join("runaway").join("crawl-output.json").is_file(),
        "killed unit still gets a recorded outcome"
    );
}

#[tokio::test]
async fn test_unit_finishing_within_budget_is_never_killed() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.script(
        entry_file("prompt"),
        UnitScript::new(Duration::from_millis(20), success_stdout()),
    );

    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());

    let report = dispatcher(&runtime, 1, Duration::from_millis(500))
        .run(vec![unit("prompt")], &recorder)
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].outcome.status, CrawlStatus::Success);
    assert!(runtime.kills.lock().unwrap().is_empty());
}

/// End-to-end mix: one success, one relayed failure, one runaway.
#[tokio::test]
async fn test_mixed_batch_sequential() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.script(
        entry_file("a"),
        UnitScript::new(Duration::from_millis(30), success_stdout()),
    );
    runtime.script(
        entry_file("b"),
        UnitScript::new(
            Duration::from_millis(10),
            failure_stdout(410, "crawl threw exception"),
        ),
    );
    runtime.script(
        entry_file("c"),
        UnitScript::new(Duration::from_secs(600), success_stdout()),
    );

    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());
    let units = vec![unit("a"), unit("b"), unit("c")];

    let report = dispatcher(&runtime, 1, Duration::from_millis(80))
        .run(units, &recorder)
        .await
        .unwrap();

    assert_eq!(report.len(), 3);
    // limit=1 makes completion order the submission order.
    let ids: Vec<&str> = report.outcomes.iter().map(|r| r.unit_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(report.outcomes[0].outcome.status, CrawlStatus::Success);
    assert_eq!(report.outcomes[1].outcome.status, CrawlStatus::CrawlException);
    assert_eq!(report.outcomes[2].outcome.status, CrawlStatus::RanTooLong);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.timed_out(), 1);
}

#[tokio::test]
async fn test_environment_creation_failure_aborts_batch() {
    let runtime = Arc::new(FakeRuntime::new());
    // No script registered: every launch fails.
    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());

    let err = dispatcher(&runtime, 1, Duration::from_secs(5))
        .run(vec![unit("ghost")], &recorder)
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Start(_)));
    assert_eq!(
        std::fs::read_dir(root.path()).unwrap().count(),
        0,
        "aborted units get no outcome"
    );
}

#[tokio::test]
async fn test_cancellation_records_in_flight_unit() {
    let runtime = Arc::new(FakeRuntime::new());
    for id in ["a", "b", "c"] {
        runtime.script(
            entry_file(id),
            UnitScript::new(Duration::from_secs(600), success_stdout()),
        );
    }

    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());
    let units = vec![unit("a"), unit("b"), unit("c")];

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let report = dispatcher(&runtime, 1, Duration::from_secs(600))
        .run_with_cancellation(units, &recorder, cancel)
        .await
        .unwrap();

    assert_eq!(report.len(), 1, "only the in-flight unit is recorded");
    assert_eq!(report.outcomes[0].unit_id, "a");
    assert_eq!(report.outcomes[0].outcome.status, CrawlStatus::RanTooLong);
    assert_eq!(runtime.launches(), 1, "no further unit starts after cancel");
}

struct RecordingObserver {
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<(String, CrawlStatus)>>,
    timed_out: Mutex<Vec<String>>,
    batches: Mutex<usize>,
}

impl RecordingObserver {
    fn new() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            timed_out: Mutex::new(Vec::new()),
            batches: Mutex::new(0),
        }
    }
}

#[async_trait::async_trait]
impl DispatchObserver for RecordingObserver {
    async fn on_unit_started(&self, unit_id: &str) {
        self.started.lock().unwrap().push(unit_id.to_string());
    }

    async fn on_unit_finished(&self, unit_id: &str, outcome: &Outcome) {
        self.finished
            .lock()
            .unwrap()
            .push((unit_id.to_string(), outcome.status));
    }

    async fn on_unit_timed_out(&self, unit_id: &str, _elapsed: Duration) {
        self.timed_out.lock().unwrap().push(unit_id.to_string());
    }

    async fn on_batch_complete(&self, _report: &BatchReport) {
        *self.batches.lock().unwrap() += 1;
    }
}

#[tokio::test]
async fn test_observers_receive_dispatch_events() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.script(
        entry_file("quick"),
        UnitScript::new(Duration::from_millis(10), success_stdout()),
    );
    runtime.script(
        entry_file("runaway"),
        UnitScript::new(Duration::from_secs(600), success_stdout()),
    );

    let observer = Arc::new(RecordingObserver::new());
    let dispatcher = Dispatcher::builder(runtime.clone())
        .concurrency_limit(1)
        .time_limit(Duration::from_millis(60))
        .poll_interval(Duration::from_millis(5))
        .observe_with(observer.clone())
        .build()
        .unwrap();

    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());
    dispatcher
        .run(vec![unit("quick"), unit("runaway")], &recorder)
        .await
        .unwrap();

    assert_eq!(*observer.started.lock().unwrap(), vec!["quick", "runaway"]);
    assert_eq!(
        *observer.finished.lock().unwrap(),
        vec![
            ("quick".to_string(), CrawlStatus::Success),
            ("runaway".to_string(), CrawlStatus::RanTooLong),
        ]
    );
    assert_eq!(*observer.timed_out.lock().unwrap(), vec!["runaway"]);
    assert_eq!(*observer.batches.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_stats_reflect_batch_results() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.script(
        entry_file("good"),
        UnitScript::new(Duration::from_millis(10), success_stdout()),
    );
    runtime.script(
        entry_file("bad"),
        UnitScript::new(Duration::from_millis(10), failure_stdout(404, "spider not found")),
    );

    let dispatcher = dispatcher(&runtime, 1, Duration::from_secs(5));
    let root = tempfile::tempdir().unwrap();
    let recorder = OutcomeRecorder::new(root.path());

    dispatcher
        .run(vec![unit("good"), unit("bad")], &recorder)
        .await
        .unwrap();

    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.units_started, 2);
    assert_eq!(stats.units_succeeded, 1);
    assert_eq!(stats.units_failed, 1);
    assert_eq!(stats.units_timed_out, 0);
    assert_eq!(stats.units_recorded(), 2);
}
