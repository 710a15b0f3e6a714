// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use tokio::sync::mpsc;

use super::*;
use crate::{RuntimeAdapter, WriteOutcome};

async fn write(fake: &FakeRuntime, digest: &str, payload: &[u8]) -> WriteOutcome {
    let (tx, rx) = mpsc::channel(4);
    tx.send(payload.to_vec()).await.unwrap();
    drop(tx);
    fake.write_content(digest, rx).await.unwrap()
}

#[tokio::test]
async fn content_writes_dedup_by_digest() {
    let fake = FakeRuntime::new();
    let first = write(&fake, "sha256:aa", b"hello").await;
    assert_eq!(first, WriteOutcome::Committed { size: 5 });

    let second = write(&fake, "sha256:aa", b"hello").await;
    assert_eq!(second, WriteOutcome::AlreadyExists);

    assert_eq!(fake.bytes_written(), 5);
    assert_eq!(fake.write_content_calls(), 2);
    assert_eq!(fake.content_digests(), vec!["sha256:aa"]);
}

#[tokio::test]
async fn concurrent_writers_for_same_digest_converge() {
    let fake = FakeRuntime::new();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let fake = fake.clone();
        handles.push(tokio::spawn(async move { write(&fake, "sha256:cc", b"data").await }));
    }
    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            WriteOutcome::Committed { .. } => committed += 1,
            WriteOutcome::AlreadyExists => {}
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(fake.content_digests().len(), 1);
}

#[tokio::test]
async fn snapshot_chain_prepare_commit() {
    let fake = FakeRuntime::new();
    fake.prepare_snapshot("tmp-1", None).await.unwrap();
    fake.commit_snapshot("tmp-1", "app-sha256:l1").await.unwrap();

    // Parent must be committed before a child can be prepared on it.
    fake.prepare_snapshot("tmp-2", Some("app-sha256:l1")).await.unwrap();
    fake.commit_snapshot("tmp-2", "app-sha256:l2").await.unwrap();

    // Committing an existing name again is idempotent.
    fake.prepare_snapshot("tmp-3", None).await.unwrap();
    fake.commit_snapshot("tmp-3", "app-sha256:l1").await.unwrap();

    assert_eq!(
        fake.committed_snapshot_names(),
        vec!["app-sha256:l1", "app-sha256:l2"]
    );
}

#[tokio::test]
async fn upload_json_is_deterministic() {
    let fake = FakeRuntime::new();
    let value = serde_json::json!({"b": 1, "a": 2});
    let (digest_one, size_one) = fake.upload_json(&value).await.unwrap();
    let (digest_two, size_two) = fake.upload_json(&value).await.unwrap();
    assert_eq!(digest_one, digest_two);
    assert_eq!(size_one, size_two);
    assert!(digest_one.starts_with("sha256:"));
}

#[tokio::test]
async fn exit_events_reach_subscribers() {
    let fake = FakeRuntime::new();
    let mut rx = fake.subscribe_task_exits().await.unwrap();
    fake.emit_exit("demo", 1, 42).await;
    let event = rx.recv().await.unwrap();
    assert_eq!(event, TaskExit { app_name: "demo".into(), code: 1, at_ms: 42 });
}
