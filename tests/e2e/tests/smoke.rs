use pfasync_e2e::harness::{self, ENDPOINT};
use pfasync_types::batch::HistoryFilter;
use pfasync_types::ids::Page;

#[tokio::test]
async fn harness_bootstrap_opens_file_backed_store() {
    let context = harness::bootstrap().expect("bootstrap must create scratch dir");
    let service = context.service().expect("service must open");

    assert_eq!(service.config().endpoints[0].id, ENDPOINT);
    let batches = service
        .get_history(HistoryFilter::default(), Page::default())
        .await
        .expect("history query must succeed");
    assert!(batches.is_empty());
    assert!(context.state_path.exists());
    assert!(context.root().join("activities.json").exists());
}
