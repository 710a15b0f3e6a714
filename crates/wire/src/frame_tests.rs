// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use std::time::Duration;

use proptest::prelude::*;

use super::*;
use crate::{ClientFrame, Request, Response};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(1));

async fn round_trip<T>(message: &T) -> T
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let (client, server) = tokio::io::duplex(MAX_FRAME_BYTES);
    let (_, mut client_tx) = tokio::io::split(client);
    let (mut server_rx, _) = tokio::io::split(server);
    write_message(&mut client_tx, message, TIMEOUT).await.unwrap();
    read_message(&mut server_rx, TIMEOUT).await.unwrap()
}

#[tokio::test]
async fn request_round_trips() {
    let sent = Request::WriteLayer { digest: "sha256:abc".into() };
    assert_eq!(round_trip(&sent).await, sent);
}

#[tokio::test]
async fn response_round_trips() {
    let sent = Response::Started { debug_port: 4242 };
    assert_eq!(round_trip(&sent).await, sent);
}

#[tokio::test]
async fn chunk_frame_preserves_binary_payload() {
    let data: Vec<u8> = (0..=255).collect();
    let sent = ClientFrame::Chunk { data };
    assert_eq!(round_trip(&sent).await, sent);
}

#[tokio::test]
async fn eof_reads_as_connection_closed() {
    let (client, server) = tokio::io::duplex(64);
    drop(client);
    let (mut server_rx, _) = tokio::io::split(server);
    let result: Result<Request, _> = read_message(&mut server_rx, TIMEOUT).await;
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected() {
    let (client, server) = tokio::io::duplex(64);
    let (_, mut client_tx) = tokio::io::split(client);
    let (mut server_rx, _) = tokio::io::split(server);
    use tokio::io::AsyncWriteExt;
    client_tx.write_all(&(u32::MAX).to_be_bytes()).await.unwrap();
    let result: Result<Request, _> = read_message(&mut server_rx, TIMEOUT).await;
    assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_))));
}

#[tokio::test]
async fn missing_frame_times_out() {
    let (_client, server) = tokio::io::duplex(64);
    let (mut server_rx, _) = tokio::io::split(server);
    let result: Result<Request, _> =
        read_message(&mut server_rx, Some(Duration::from_millis(20))).await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}

proptest! {
    #[test]
    fn arbitrary_chunks_survive_framing(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let frame = ClientFrame::Chunk { data };
        let received = rt.block_on(round_trip(&frame));
        prop_assert_eq!(received, frame);
    }
}
