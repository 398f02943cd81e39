use pfasync_e2e::harness::{self, activities, activity_rules, ENDPOINT, SCOPE};
use pfasync_state::SilverStore;
use pfasync_types::batch::{HistoryFilter, SyncType};
use pfasync_types::ids::{EndpointId, Page};
use pfasync_types::record::{FieldValue, NaturalKey};
use pfasync_types::run::RunStatus;
use rstest::rstest;

#[tokio::test]
async fn full_sync_then_shrunk_export_discontinues_missing_records() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let service = context.service().expect("service must open");
    let endpoint = EndpointId::new(ENDPOINT);
    service
        .save_mappings_json(&endpoint, &activity_rules())
        .await
        .expect("rules must save");

    context
        .write_export(&activities(1..=120))
        .expect("export must write");
    let first = context
        .run_sync(&service, SyncType::Full)
        .await
        .expect("first sync must run");
    assert_eq!(first.status, RunStatus::Success, "{:?}", first.error_message);
    assert_eq!(first.counters.records_processed, 120);
    assert_eq!(first.counters.records_inserted, 120);
    assert_eq!(first.counters.records_deleted, 0);

    let first_batch = service
        .get_progress(&first.batch_id)
        .await
        .expect("progress must load");
    assert!(first_batch.sealed);
    assert!(first_batch.errors.is_empty());

    context
        .write_export(&activities(1..=100))
        .expect("export must write");
    let second = context
        .run_sync(&service, SyncType::Full)
        .await
        .expect("second sync must run");
    assert_eq!(second.status, RunStatus::Success, "{:?}", second.error_message);
    assert_eq!(second.counters.records_unchanged, 100);
    assert_eq!(second.counters.records_deleted, 20);

    let orphans = service
        .list_orphans(SCOPE, Page::new(100, 0))
        .await
        .expect("orphan listing must succeed");
    assert_eq!(orphans.len(), 20);
    let mut keys: Vec<_> = orphans
        .iter()
        .map(|r| r.natural_key.external_id.clone())
        .collect();
    keys.sort();
    assert!(keys.iter().all(|k| {
        let n: u32 = k.trim_start_matches("PFA-").parse().unwrap();
        (101..=120).contains(&n)
    }));

    let restored = service
        .restore_orphans(orphans.iter().take(5).map(|r| r.id).collect())
        .await
        .expect("restore must succeed");
    assert_eq!(restored, 5);
    let remaining = service
        .list_orphans(SCOPE, Page::new(100, 0))
        .await
        .expect("orphan listing must succeed");
    assert_eq!(remaining.len(), 15);

    let history = service
        .get_history(
            HistoryFilter {
                endpoint_id: Some(endpoint),
                sync_type: Some(SyncType::Full),
                sealed_only: true,
            },
            Page::default(),
        )
        .await
        .expect("history must load");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second.batch_id);
    assert_eq!(history[0].record_count, 100);
}

#[rstest]
#[case::full(SyncType::Full, 20)]
#[case::delta(SyncType::Delta, 0)]
#[tokio::test]
async fn only_full_syncs_discontinue(#[case] second_sync: SyncType, #[case] expected_orphans: usize) {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let service = context.service().expect("service must open");
    service
        .save_mappings_json(&EndpointId::new(ENDPOINT), &activity_rules())
        .await
        .expect("rules must save");

    context.write_export(&activities(1..=40)).expect("export must write");
    context
        .run_sync(&service, SyncType::Full)
        .await
        .expect("first sync must run");

    context.write_export(&activities(1..=20)).expect("export must write");
    let run = context
        .run_sync(&service, second_sync)
        .await
        .expect("second sync must run");
    assert_eq!(run.status, RunStatus::Success);

    let orphans = service
        .list_orphans(SCOPE, Page::new(100, 0))
        .await
        .expect("orphan listing must succeed");
    assert_eq!(orphans.len(), expected_orphans);
}

#[tokio::test]
async fn silver_values_are_typed_and_traceable_after_reopen() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let run = {
        let service = context.service().expect("service must open");
        service
            .save_mappings_json(&EndpointId::new(ENDPOINT), &activity_rules())
            .await
            .expect("rules must save");
        context.write_export(&activities(1..=10)).expect("export must write");
        context
            .run_sync(&service, SyncType::Full)
            .await
            .expect("sync must run")
    };

    let service = context.service().expect("service must reopen");
    let record = service
        .backend()
        .get_normalized_by_key(&EndpointId::new(ENDPOINT), &NaturalKey::new(SCOPE, "PFA-4"))
        .expect("lookup must succeed")
        .expect("PFA-4 must exist");

    assert_eq!(record.fields["code"], FieldValue::Text("A0004".into()));
    assert_eq!(record.fields["title"], FieldValue::Text("Activity 4".into()));
    assert_eq!(
        record.fields["start_date"],
        FieldValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
    );
    assert_eq!(record.fields["budget_amount"], FieldValue::Float(4000.5));
    assert_eq!(record.fields["is_active"], FieldValue::Boolean(true));

    let lineage = service.get_lineage(record.id).await.expect("lineage must resolve");
    assert_eq!(lineage.batch.id, run.batch_id);
    assert_eq!(lineage.bronze.external_id, "PFA-4");
    assert_eq!(lineage.mapping_version.rules.len(), 5);
    assert!(lineage.transformed_by.contains(&format!("run {}", run.id)));
}

#[tokio::test]
async fn malformed_records_land_in_dead_letters_without_failing_the_run() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let service = context.service().expect("service must open");
    service
        .save_mappings_json(&EndpointId::new(ENDPOINT), &activity_rules())
        .await
        .expect("rules must save");

    let mut export = activities(1..=4);
    export.push(serde_json::json!({ "Code": "NOID", "Activity Title": "No key" }));
    export[2]["StartDate"] = serde_json::json!("sometime in spring");
    context.write_export(&export).expect("export must write");

    let run = context
        .run_sync(&service, SyncType::Full)
        .await
        .expect("sync must run");
    assert_eq!(run.status, RunStatus::Success, "{:?}", run.error_message);
    assert_eq!(run.counters.records_inserted, 4);

    let progress = service
        .get_progress(&run.batch_id)
        .await
        .expect("progress must load");
    assert_eq!(progress.warnings.len(), 1);

    let letters = service
        .list_dead_letters(&run.batch_id, Page::default())
        .await
        .expect("dead letters must list");
    assert_eq!(letters.len(), 2);
    assert!(letters.iter().any(|l| l.error_message.contains("start_date")));
}
