//! Download Sandbox Integration Tests
//!
//! Tests for working directory isolation, failure handling and atomic
//! publishing into the shared output directory.

mod common;

use std::time::Duration;

use common::{create_sandbox, create_sandbox_with_timeout, file_names, Behavior, FakeDownloader};
use mash::domain::{DownloadOutcome, VideoUrl};
use tempfile::TempDir;

fn url(raw: &str) -> VideoUrl {
    VideoUrl::parse(raw).unwrap()
}

#[tokio::test]
async fn test_failing_download_publishes_nothing() {
    let temp = TempDir::new().unwrap();
    let downloader = FakeDownloader::new();
    downloader.script("https://youtu.be/gone", Behavior::Fail(1));
    let sandbox = create_sandbox(downloader.clone(), &temp, 1);

    let output = temp.path().join("audio");
    std::fs::write(output.join("Existing-abc.mp3"), "keep me").unwrap();

    let result = sandbox.download(&url("https://youtu.be/gone")).await;

    assert!(!result.is_success());
    assert!(result.published().is_empty());
    assert!(result.diagnostics.contains("Video unavailable"));
    match &result.outcome {
        DownloadOutcome::Failure { reason } => assert!(reason.contains("exited with 1")),
        other => panic!("expected failure, got {:?}", other),
    }

    // Output directory unchanged
    assert_eq!(file_names(&output), vec!["Existing-abc.mp3"]);
    assert_eq!(
        std::fs::read_to_string(output.join("Existing-abc.mp3")).unwrap(),
        "keep me"
    );
}

#[tokio::test]
async fn test_failed_attempt_keeps_artifacts_until_next_call() {
    let temp = TempDir::new().unwrap();
    let downloader = FakeDownloader::new();
    downloader.script("https://youtu.be/gone", Behavior::Fail(2));
    let sandbox = create_sandbox(downloader.clone(), &temp, 1);

    sandbox.download(&url("https://youtu.be/gone")).await;

    let slot = temp.path().join("sandbox").join("slot-0");
    assert_eq!(file_names(&slot), vec!["partial.m4a", "partial.m4a.part"]);

    // The next invocation starts from a clean directory
    let result = sandbox.download(&url("https://youtu.be/next")).await;
    assert!(result.is_success());

    let calls = downloader.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].leftovers.is_empty());
    assert_eq!(file_names(&temp.path().join("audio")), vec!["next.mp3"]);
}

#[tokio::test]
async fn test_success_publishes_exactly_the_produced_files() {
    let temp = TempDir::new().unwrap();
    let downloader = FakeDownloader::new();
    downloader.script(
        "https://www.youtube.com/watch?v=EzKImzjwGyM",
        Behavior::Produce(vec![
            ("Talk-EzKImzjwGyM.mp3".to_string(), "one".to_string()),
            ("Talk-EzKImzjwGyM.m4a".to_string(), "two".to_string()),
            ("Talk-EzKImzjwGyM.info.json".to_string(), "{}".to_string()),
        ]),
    );
    let sandbox = create_sandbox(downloader.clone(), &temp, 1);

    let result = sandbox
        .download(&url("https://www.youtube.com/watch?v=EzKImzjwGyM"))
        .await;

    assert!(result.is_success());
    let output = temp.path().join("audio");
    assert_eq!(
        result.published(),
        &[
            output.join("Talk-EzKImzjwGyM.m4a"),
            output.join("Talk-EzKImzjwGyM.mp3")
        ]
    );
    assert_eq!(
        file_names(&output),
        vec!["Talk-EzKImzjwGyM.m4a", "Talk-EzKImzjwGyM.mp3"]
    );

    // Working directory cleared after publishing
    assert!(file_names(&temp.path().join("sandbox").join("slot-0")).is_empty());
}

#[tokio::test]
async fn test_repeat_download_overwrites() {
    let temp = TempDir::new().unwrap();
    let downloader = FakeDownloader::new();
    let link = "https://youtu.be/EzKImzjwGyM";
    downloader.script(
        link,
        Behavior::Produce(vec![("Song-EzKImzjwGyM.mp3".to_string(), "v1".to_string())]),
    );
    let sandbox = create_sandbox(downloader.clone(), &temp, 1);

    assert!(sandbox.download(&url(link)).await.is_success());

    downloader.script(
        link,
        Behavior::Produce(vec![("Song-EzKImzjwGyM.mp3".to_string(), "v2".to_string())]),
    );
    assert!(sandbox.download(&url(link)).await.is_success());

    let output = temp.path().join("audio");
    assert_eq!(file_names(&output), vec!["Song-EzKImzjwGyM.mp3"]);
    assert_eq!(
        std::fs::read_to_string(output.join("Song-EzKImzjwGyM.mp3")).unwrap(),
        "v2"
    );
}

#[tokio::test]
async fn test_stale_working_directory_is_cleared() {
    let temp = TempDir::new().unwrap();
    let downloader = FakeDownloader::new();
    let sandbox = create_sandbox(downloader.clone(), &temp, 1);

    // Leftovers from a crashed earlier process
    let slot = temp.path().join("sandbox").join("slot-0");
    std::fs::create_dir_all(&slot).unwrap();
    std::fs::write(slot.join("Old-zzz.mp3"), "stale").unwrap();

    let result = sandbox.download(&url("https://youtu.be/fresh")).await;

    assert!(result.is_success());
    assert!(downloader.calls()[0].leftovers.is_empty());
    assert_eq!(file_names(&temp.path().join("audio")), vec!["fresh.mp3"]);
}

#[tokio::test]
async fn test_timeout_is_a_failure_outcome() {
    let temp = TempDir::new().unwrap();
    let downloader = FakeDownloader::new();
    downloader.script("https://youtu.be/slow", Behavior::Hang);
    let sandbox =
        create_sandbox_with_timeout(downloader.clone(), &temp, 1, Duration::from_millis(50));

    let result = sandbox.download(&url("https://youtu.be/slow")).await;

    match &result.outcome {
        DownloadOutcome::Failure { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(file_names(&temp.path().join("audio")).is_empty());
}

#[tokio::test]
async fn test_concurrent_downloads_use_distinct_directories() {
    let temp = TempDir::new().unwrap();
    let downloader = FakeDownloader::new();
    downloader.set_delay(Duration::from_millis(100));
    let sandbox = create_sandbox(downloader.clone(), &temp, 2);

    let a = url("https://youtu.be/aaa");
    let b = url("https://youtu.be/bbb");
    let (ra, rb) = tokio::join!(sandbox.download(&a), sandbox.download(&b));

    assert!(ra.is_success());
    assert!(rb.is_success());

    let calls = downloader.calls();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].workdir, calls[1].workdir);
    assert_eq!(downloader.shared_dir_seen(), 0);
    assert_eq!(downloader.max_active(), 2);
    assert_eq!(
        file_names(&temp.path().join("audio")),
        vec!["aaa.mp3", "bbb.mp3"]
    );
}

#[tokio::test]
async fn test_single_slot_serialises_downloads() {
    let temp = TempDir::new().unwrap();
    let downloader = FakeDownloader::new();
    downloader.set_delay(Duration::from_millis(50));
    let sandbox = create_sandbox(downloader.clone(), &temp, 1);

    let a = url("https://youtu.be/aaa");
    let b = url("https://youtu.be/bbb");
    let c = url("https://youtu.be/ccc");
    tokio::join!(
        sandbox.download(&a),
        sandbox.download(&b),
        sandbox.download(&c)
    );

    assert_eq!(downloader.call_count(), 3);
    assert_eq!(downloader.max_active(), 1);
    assert_eq!(downloader.shared_dir_seen(), 0);
}
