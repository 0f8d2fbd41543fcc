//! Feeder integration tests: poll cycles against the in-memory store.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use common::{test_config, FlakyStore, WordEmbedder, POISON};
use rag_relay::feeder::Feeder;
use rag_relay::store::{InMemoryStore, VectorStore};

fn feeder_for(tmp: &TempDir) -> (Feeder, Arc<InMemoryStore>, Arc<WordEmbedder>) {
    let config = test_config(tmp.path());
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(WordEmbedder::new());
    let feeder = Feeder::new(&config, embedder.clone(), store.clone()).unwrap();
    (feeder, store, embedder)
}

fn touch_later(path: &std::path::Path, secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

#[tokio::test]
async fn poll_ingests_new_files() {
    let tmp = TempDir::new().unwrap();
    let (mut feeder, store, _) = feeder_for(&tmp);
    let input = tmp.path().join("input");
    fs::write(input.join("fruit.md"), "apple banana cherry").unwrap();
    fs::create_dir_all(input.join("ops")).unwrap();
    fs::write(input.join("ops/deploy.txt"), "docker and kubernetes").unwrap();
    fs::write(input.join("image.png"), [0u8, 1, 2]).unwrap();

    feeder.prepare().await.unwrap();
    let report = feeder.poll_once().await.unwrap();

    assert_eq!(report.scanned, 2, "png is not in the include globs");
    assert_eq!(report.ingested, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.chunks_written, 2);
    assert_eq!(store.count_source("documents", "fruit.md").await.unwrap(), 1);
    assert_eq!(
        store.count_source("documents", "ops/deploy.txt").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn unchanged_files_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let (mut feeder, store, embedder) = feeder_for(&tmp);
    fs::write(tmp.path().join("input/fruit.md"), "apple banana").unwrap();

    feeder.prepare().await.unwrap();
    feeder.poll_once().await.unwrap();
    let calls = embedder.calls();

    let second = feeder.poll_once().await.unwrap();
    assert_eq!(second.ingested, 0);
    assert_eq!(second.skipped_unchanged, 1);
    assert_eq!(embedder.calls(), calls);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn modified_file_replaces_its_chunks() {
    let tmp = TempDir::new().unwrap();
    let (mut feeder, store, _) = feeder_for(&tmp);
    let path = tmp.path().join("input/long.md");

    let long: String = (0..12)
        .map(|i| format!("Paragraph {} about the garden and apple trees.", i))
        .collect::<Vec<_>>()
        .join("\n\n");
    fs::write(&path, &long).unwrap();

    feeder.prepare().await.unwrap();
    feeder.poll_once().await.unwrap();
    let before = store.count_source("documents", "long.md").await.unwrap();
    assert!(before > 1, "expected several chunks, got {}", before);

    fs::write(&path, "Only the garden now.").unwrap();
    touch_later(&path, 60);
    let report = feeder.poll_once().await.unwrap();

    assert_eq!(report.ingested, 1);
    assert_eq!(store.count_source("documents", "long.md").await.unwrap(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn reingesting_same_content_does_not_duplicate() {
    let tmp = TempDir::new().unwrap();
    let (mut feeder, store, _) = feeder_for(&tmp);
    let path = tmp.path().join("input/fruit.md");
    fs::write(&path, "apple banana cherry").unwrap();

    feeder.prepare().await.unwrap();
    feeder.poll_once().await.unwrap();
    touch_later(&path, 60);
    let report = feeder.poll_once().await.unwrap();

    assert_eq!(report.ingested, 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn failed_file_is_retried_next_poll() {
    let tmp = TempDir::new().unwrap();
    let (mut feeder, store, _) = feeder_for(&tmp);
    let input = tmp.path().join("input");
    fs::write(input.join("good.md"), "rust and python").unwrap();
    fs::write(input.join("bad.md"), format!("this one is {}", POISON)).unwrap();

    feeder.prepare().await.unwrap();
    let first = feeder.poll_once().await.unwrap();
    assert_eq!(first.ingested, 1);
    assert_eq!(first.failed, 1);
    assert_eq!(store.count_source("documents", "bad.md").await.unwrap(), 0);

    // Still failing: retried, not skipped.
    let second = feeder.poll_once().await.unwrap();
    assert_eq!(second.failed, 1);
    assert_eq!(second.skipped_unchanged, 1);

    // Fixed without a newer mtime: it was never marked seen, so it is picked up.
    fs::write(input.join("bad.md"), "now about docker").unwrap();
    let third = feeder.poll_once().await.unwrap();
    assert_eq!(third.failed, 0);
    assert_eq!(third.ingested, 1);
    assert_eq!(store.count_source("documents", "bad.md").await.unwrap(), 1);
}

#[tokio::test]
async fn failed_write_keeps_previous_version_searchable() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let store = Arc::new(FlakyStore::new());
    let mut feeder = Feeder::new(&config, Arc::new(WordEmbedder::new()), store.clone()).unwrap();
    let path = tmp.path().join("input/fruit.md");
    fs::write(&path, "apple banana").unwrap();

    feeder.prepare().await.unwrap();
    assert_eq!(feeder.poll_once().await.unwrap().ingested, 1);

    fs::write(&path, "cherry garden").unwrap();
    touch_later(&path, 60);
    store.set_failing(true);
    let report = feeder.poll_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(store.count_source("documents", "fruit.md").await.unwrap(), 1);
    let hits = store
        .search("documents", &WordEmbedder::vector("apple"), 3)
        .await
        .unwrap();
    assert_eq!(hits[0].text, "apple banana");

    store.set_failing(false);
    let report = feeder.poll_once().await.unwrap();
    assert_eq!(report.ingested, 1);
    let hits = store
        .search("documents", &WordEmbedder::vector("cherry"), 3)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "cherry garden");
}

#[tokio::test]
async fn missing_input_dir_fails_the_cycle_only() {
    let tmp = TempDir::new().unwrap();
    let (mut feeder, _, _) = feeder_for(&tmp);
    fs::remove_dir_all(tmp.path().join("input")).unwrap();

    feeder.prepare().await.unwrap();
    let err = feeder.poll_once().await.unwrap_err();
    assert!(err.to_string().contains("Input directory does not exist"));

    fs::create_dir_all(tmp.path().join("input")).unwrap();
    fs::write(tmp.path().join("input/back.md"), "apple").unwrap();
    let report = feeder.poll_once().await.unwrap();
    assert_eq!(report.ingested, 1);
}

#[tokio::test]
async fn empty_file_writes_no_chunks() {
    let tmp = TempDir::new().unwrap();
    let (mut feeder, store, _) = feeder_for(&tmp);
    fs::write(tmp.path().join("input/empty.txt"), "  \n\n ").unwrap();

    feeder.prepare().await.unwrap();
    let report = feeder.poll_once().await.unwrap();
    assert_eq!(report.ingested, 1);
    assert_eq!(report.chunks_written, 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn oversized_file_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.feeder.max_file_bytes = 10;
    let store = Arc::new(InMemoryStore::new());
    let mut feeder = Feeder::new(&config, Arc::new(WordEmbedder::new()), store.clone()).unwrap();
    fs::write(tmp.path().join("input/big.md"), "apple ".repeat(10)).unwrap();

    feeder.prepare().await.unwrap();
    let report = feeder.poll_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(store.is_empty());
}
