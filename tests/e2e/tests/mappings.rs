use pfasync_e2e::harness::{self, activities, activity_rules, ENDPOINT, SCOPE};
use pfasync_engine::IngestError;
use pfasync_state::SilverStore;
use pfasync_types::batch::SyncType;
use pfasync_types::ids::EndpointId;
use pfasync_types::record::{FieldValue, NaturalKey};
use serde_json::json;

#[tokio::test]
async fn restored_version_reproduces_rules_and_recommit_reverts_values() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let service = context.service().expect("service must open");
    let endpoint = EndpointId::new(ENDPOINT);

    service
        .save_mappings_json(&endpoint, &activity_rules())
        .await
        .expect("rules must save");
    let original = service.list_mappings(&endpoint).await.expect("rules must list");
    let version = service
        .save_mapping_version(&endpoint)
        .await
        .expect("snapshot must save");

    context.write_export(&activities(1..=5)).expect("export must write");
    let run = context
        .run_sync(&service, SyncType::Full)
        .await
        .expect("sync must run");

    // Title now comes through upper-cased.
    let mut changed = activity_rules();
    changed[1]["transform_params"] = json!({ "function": "uppercase" });
    service
        .save_mappings_json(&endpoint, &changed)
        .await
        .expect("changed rules must save");
    let stats = service
        .recommit_batch(&run.batch_id)
        .await
        .expect("recommit must succeed");
    assert_eq!(stats.updated, 5);
    assert_ne!(stats.mapping_version_id, version.id);

    let key = NaturalKey::new(SCOPE, "PFA-2");
    let record = service
        .backend()
        .get_normalized_by_key(&endpoint, &key)
        .expect("lookup must succeed")
        .expect("PFA-2 must exist");
    assert_eq!(record.fields["title"], FieldValue::Text("ACTIVITY 2".into()));

    let outcome = service
        .restore_mapping_version(&endpoint, version.id)
        .await
        .expect("restore must succeed");
    assert_eq!(outcome.restored, 5);
    let restored = service.list_mappings(&endpoint).await.expect("rules must list");
    let rules = |set: &[pfasync_types::mapping::ActiveRule]| {
        set.iter().map(|r| r.rule.clone()).collect::<Vec<_>>()
    };
    assert_eq!(rules(&restored), rules(&original));

    let stats = service
        .recommit_batch(&run.batch_id)
        .await
        .expect("recommit must succeed");
    assert_eq!(stats.updated, 5);
    let committed = service
        .get_mapping_version(stats.mapping_version_id)
        .await
        .expect("committed version must exist");
    assert_eq!(committed.rules_hash, version.rules_hash);

    let history = service
        .get_lineage_history(record.id)
        .await
        .expect("history must load");
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn invalid_rule_file_is_rejected_with_every_error() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let service = context.service().expect("service must open");
    let endpoint = EndpointId::new(ENDPOINT);

    let invalid = json!([
        { "source_field": "Code", "destination_field": "code", "data_type": "string", "transform_type": "soundex" },
        { "source_field": "Budget", "destination_field": "budget_amount", "data_type": "money", "transform_type": "numeric" }
    ]);
    let err = service
        .save_mappings_json(&endpoint, &invalid)
        .await
        .expect_err("invalid rules must be rejected");
    match err {
        IngestError::MappingConfig { errors, .. } => assert_eq!(errors.len(), 2, "{errors:?}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(service
        .list_mappings(&endpoint)
        .await
        .expect("rules must list")
        .is_empty());
    assert!(service
        .list_mapping_versions(&endpoint)
        .await
        .expect("versions must list")
        .is_empty());
}

#[tokio::test]
async fn preview_uses_latest_sealed_batch_without_writing() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let service = context.service().expect("service must open");
    let endpoint = EndpointId::new(ENDPOINT);
    service
        .save_mappings_json(&endpoint, &activity_rules())
        .await
        .expect("rules must save");
    context.write_export(&activities(1..=3)).expect("export must write");
    context
        .run_sync(&service, SyncType::Full)
        .await
        .expect("sync must run");

    let rules = pfasync_engine::mapping::parse_rules(&json!([
        { "source_field": "Budget", "destination_field": "budget_amount", "data_type": "integer", "transform_type": "numeric" }
    ]))
    .expect("rules must parse");
    let rows = service
        .preview_mapping(&endpoint, rules)
        .await
        .expect("preview must run");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.warnings.is_empty()));
    assert!(rows.iter().all(|row| row.mapped.contains_key("budget_amount")));

    let active = service.list_mappings(&endpoint).await.expect("rules must list");
    assert_eq!(active.len(), 5);
}
