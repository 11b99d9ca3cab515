//! Files replicated on several storage nodes
//!
//! A file stays pending until every node it was decided for has confirmed or
//! refused it, however the uploads interleave.

use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use vstore::storage::FileOrdering;
use vstore::testing::{config_reply, located_context, node_entry, pinned_rule, wait_for_event, TEST_LOCATION};
use vstore::{VStore, VStoreConfig, VStoreEvent, VStoreFile};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(10);

struct Replicated {
    dir: TempDir,
    master: MockServer,
    node_a: MockServer,
    node_b: MockServer,
    store: VStore,
}

async fn setup() -> Replicated {
    let master = MockServer::start().await;
    let node_a = MockServer::start().await;
    let node_b = MockServer::start().await;

    let reply = config_reply(
        vec![
            node_entry("node-a", &node_a.uri(), "CLOUD", TEST_LOCATION),
            node_entry("node-b", &node_b.uri(), "CLOUD", TEST_LOCATION),
        ],
        vec![pinned_rule("both", &["application/txt"], &["node-a", "node-b"])],
        "RULES_NEXT_ON_NO_MATCH",
    );
    Mock::given(method("POST"))
        .and(path("/v1/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply))
        .mount(&master)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = VStoreConfig::new(dir.path(), master.uri());
    config.upload.max_attempts = 1;
    config.upload.retry_delay_secs = 0;
    let store = VStore::initialize(config).await.unwrap();
    store.provide_context(located_context());
    store.config_manager().download(true).await.unwrap().unwrap();

    Replicated {
        dir,
        master,
        node_a,
        node_b,
        store,
    }
}

async fn node_replies(node: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/file/data"))
        .respond_with(response)
        .mount(node)
        .await;
}

fn accepted() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"error": 0}))
}

async fn store_and_wait(setup: &Replicated) -> (VStoreFile, usize) {
    let mut events = setup.store.subscribe();
    let source = setup.dir.path().join("report.txt");
    std::fs::write(&source, b"replicate me").unwrap();
    let file = setup.store.store(&source, false).await.unwrap();
    assert_eq!(file.stored_node_ids, vec!["node-a".to_string(), "node-b".to_string()]);

    let mut done = 0;
    loop {
        match wait_for_event(&mut events, WAIT, |e| {
            matches!(e, VStoreEvent::SingleUploadDone { .. } | VStoreEvent::AllUploadsDone)
        })
        .await
        {
            Some(VStoreEvent::SingleUploadDone { .. }) => done += 1,
            Some(VStoreEvent::AllUploadsDone) => break,
            other => panic!("uploads did not finish: {other:?}"),
        }
    }
    (file, done)
}

fn record(store: &VStore, uuid: &str) -> VStoreFile {
    store
        .get_files_uploaded_by_this_device(FileOrdering::NewestFirst, false, false)
        .unwrap()
        .into_iter()
        .find(|f| f.uuid == uuid)
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_successes_clear_pending() {
    let setup = setup().await;
    node_replies(&setup.node_a, accepted()).await;
    node_replies(&setup.node_b, accepted()).await;
    // both uploads finish while the other one is still announcing its mapping
    Mock::given(method("POST"))
        .and(path("/v1/file_node_mapping"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(300)))
        .expect(2)
        .mount(&setup.master)
        .await;

    let (file, done) = store_and_wait(&setup).await;

    assert_eq!(done, 2);
    let stored = record(&setup.store, &file.uuid);
    assert!(!stored.upload_pending);
    assert!(!stored.upload_failed);
}

#[tokio::test]
async fn test_partial_success_stays_pending() {
    let setup = setup().await;
    node_replies(&setup.node_a, accepted()).await;
    node_replies(&setup.node_b, ResponseTemplate::new(503)).await;
    Mock::given(method("POST"))
        .and(path("/v1/file_node_mapping"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&setup.master)
        .await;

    let (file, done) = store_and_wait(&setup).await;

    assert_eq!(done, 1);
    let stored = record(&setup.store, &file.uuid);
    assert!(stored.upload_pending);
    assert!(!stored.upload_failed);
    let pending = setup
        .store
        .get_files_uploaded_by_this_device(FileOrdering::NewestFirst, true, false)
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_refusing_node_settles_the_file_as_failed() {
    let setup = setup().await;
    node_replies(&setup.node_a, accepted()).await;
    node_replies(
        &setup.node_b,
        ResponseTemplate::new(200).set_body_json(json!({"error": 1, "error_msg": "quota"})),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/file_node_mapping"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&setup.master)
        .await;

    let (file, done) = store_and_wait(&setup).await;

    assert_eq!(done, 1);
    let stored = record(&setup.store, &file.uuid);
    assert!(!stored.upload_pending);
    assert!(stored.upload_failed);
}
