// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use wendy_core::ErrorKind;
use wendy_runtime::FakeRuntime;
use wendy_wire::{write_message, ClientFrame, StreamCommand};

use super::*;

const DIGEST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";

async fn send_frames(frames: Vec<ClientFrame>) -> tokio::io::DuplexStream {
    let (client, server) = tokio::io::duplex(1 << 20);
    let mut client = client;
    for frame in &frames {
        write_message(&mut client, frame, None).await.unwrap();
    }
    client.shutdown().await.unwrap();
    server
}

fn chunk(data: &[u8]) -> ClientFrame {
    ClientFrame::Chunk { data: data.to_vec() }
}

#[tokio::test]
async fn upload_appears_in_layer_listing() {
    let fake = FakeRuntime::new();
    let ingest = Ingest::new(Arc::new(fake.clone()));

    let mut server =
        send_frames(vec![chunk(b"he"), chunk(b"llo"), ClientFrame::Commit]).await;
    ingest.write_layer(DIGEST, &mut server).await.unwrap();

    let headers = ingest.list_layer_headers().await.unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].digest, DIGEST);
    assert_eq!(headers[0].size, 5);
    assert_eq!(fake.bytes_written(), 5);
}

#[tokio::test]
async fn empty_chunk_is_invalid_argument() {
    let fake = FakeRuntime::new();
    let ingest = Ingest::new(Arc::new(fake.clone()));

    let mut server = send_frames(vec![chunk(b"")]).await;
    let err = ingest.write_layer(DIGEST, &mut server).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(matches!(err, IngestError::EmptyChunk));
    assert!(fake.content_digests().is_empty());
}

#[tokio::test]
async fn missing_commit_marker_is_rejected() {
    let fake = FakeRuntime::new();
    let ingest = Ingest::new(Arc::new(fake.clone()));

    let mut server = send_frames(vec![chunk(b"data")]).await;
    let err = ingest.write_layer(DIGEST, &mut server).await.unwrap_err();
    assert!(matches!(err, IngestError::MissingCommit));
    assert!(fake.content_digests().is_empty());
}

#[tokio::test]
async fn bad_digest_is_rejected_before_reading() {
    let ingest = Ingest::new(Arc::new(FakeRuntime::new()));
    let mut server = send_frames(vec![]).await;
    let err = ingest.write_layer("not-a-digest", &mut server).await.unwrap_err();
    assert!(matches!(err, IngestError::InvalidDigest(_)));
}

#[tokio::test]
async fn control_frame_in_layer_stream_is_rejected() {
    let ingest = Ingest::new(Arc::new(FakeRuntime::new()));
    let mut server = send_frames(vec![ClientFrame::Control {
        command: StreamCommand::Stop,
    }])
    .await;
    let err = ingest.write_layer(DIGEST, &mut server).await.unwrap_err();
    assert!(matches!(err, IngestError::UnexpectedFrame("control")));
}

#[tokio::test]
async fn repeated_upload_converges_without_new_bytes() {
    let fake = FakeRuntime::new();
    let ingest = Ingest::new(Arc::new(fake.clone()));

    for _ in 0..2 {
        let mut server = send_frames(vec![chunk(b"hello"), ClientFrame::Commit]).await;
        ingest.write_layer(DIGEST, &mut server).await.unwrap();
    }

    assert_eq!(ingest.list_layer_headers().await.unwrap().len(), 1);
    assert_eq!(fake.write_content_calls(), 2);
    assert_eq!(fake.bytes_written(), 5);
}

#[tokio::test]
async fn concurrent_uploads_of_same_digest_all_succeed() {
    let fake = FakeRuntime::new();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let ingest = Ingest::new(Arc::new(fake.clone()));
        handles.push(tokio::spawn(async move {
            let mut server =
                send_frames(vec![chunk(b"shared"), ClientFrame::Commit]).await;
            ingest.write_layer(DIGEST, &mut server).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(fake.content_digests(), vec![DIGEST]);
    assert_eq!(fake.bytes_written(), 6);
}
