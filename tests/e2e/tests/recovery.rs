use std::sync::Arc;
use std::time::Duration;

use pfasync_e2e::harness::{self, activities, activity_rules, ENDPOINT, SCOPE};
use pfasync_engine::source::MemorySource;
use pfasync_engine::IngestService;
use pfasync_state::{BeginRun, NewRun, RunStore, SqliteStateBackend};
use pfasync_types::batch::SyncType;
use pfasync_types::ids::{BatchId, EndpointId, Page};
use pfasync_types::run::RunStatus;

#[tokio::test]
async fn run_left_in_progress_by_dead_process_is_recovered() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");

    let orphan_run = {
        let backend = SqliteStateBackend::open(&context.state_path).expect("store must open");
        let started = backend
            .begin_run(&NewRun {
                endpoint_id: EndpointId::new(ENDPOINT),
                batch_id: BatchId::new("crashed-batch"),
                scope: SCOPE.into(),
                sync_type: SyncType::Full,
                retry_of: None,
                owner: "pfasync-crashed".into(),
            })
            .expect("run must begin");
        match started {
            BeginRun::Started { run_id } => run_id,
            BeginRun::Busy(holder) => panic!("fresh store must not be busy: {holder}"),
        }
    };

    let service = context.service().expect("service must open");
    assert!(
        service
            .recover_interrupted()
            .await
            .expect("recovery must succeed")
            .is_empty(),
        "a run inside its lease is not recovered"
    );

    // Outlive the 300ms lease without heartbeating, as a dead process would.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let recovered = service
        .recover_interrupted()
        .await
        .expect("recovery must succeed");
    assert_eq!(recovered, vec![orphan_run]);

    let progress = service
        .get_progress(&BatchId::new("crashed-batch"))
        .await
        .expect("progress must load");
    assert_eq!(progress.status, RunStatus::Error);
    assert!(!progress.sealed);
    assert!(progress.errors.iter().any(|e| e.contains("interrupted")));

    service
        .save_mappings_json(&EndpointId::new(ENDPOINT), &activity_rules())
        .await
        .expect("rules must save");
    context.write_export(&activities(1..=3)).expect("export must write");
    let handle = service
        .retry_run(&BatchId::new("crashed-batch"))
        .await
        .expect("retry must start");
    let run = service
        .wait_for_run(handle.run_id)
        .await
        .expect("retry must finish");
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.retry_of, Some(orphan_run));
    assert_eq!(run.counters.records_inserted, 3);
}

#[tokio::test]
async fn cancelled_run_is_visible_to_a_second_service_instance() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let config = context.service().expect("service must open").config().clone();

    let source = Arc::new(MemorySource::new(activities(1..=1000)));
    source.set_delay(Duration::from_millis(50));
    let runner = IngestService::builder(config)
        .with_source(ENDPOINT, source)
        .build()
        .expect("runner must open");
    runner
        .save_mappings_json(&EndpointId::new(ENDPOINT), &activity_rules())
        .await
        .expect("rules must save");

    let handle = runner
        .start_ingestion(&EndpointId::new(ENDPOINT), SyncType::Full)
        .await
        .expect("sync must start");

    // A separate instance, as a second CLI invocation would open.
    let observer = context.service().expect("observer must open");
    let busy = observer
        .start_ingestion(&EndpointId::new(ENDPOINT), SyncType::Full)
        .await
        .expect_err("second start must be rejected");
    assert!(matches!(busy, pfasync_engine::IngestError::ConcurrentRun { .. }), "{busy}");

    // The runner heartbeats well inside the lease, so the observer leaves it alone.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(observer
        .recover_interrupted()
        .await
        .expect("recovery must succeed")
        .is_empty());

    observer
        .cancel_run(&handle.batch_id)
        .await
        .expect("cancel must be accepted");
    let run = runner
        .wait_for_run(handle.run_id)
        .await
        .expect("run must finish");
    assert_eq!(run.status, RunStatus::Cancelled);

    let progress = observer
        .get_progress(&handle.batch_id)
        .await
        .expect("progress must load");
    assert!(!progress.sealed);
    assert!(observer
        .list_orphans(SCOPE, Page::default())
        .await
        .expect("orphans must list")
        .is_empty());
}
