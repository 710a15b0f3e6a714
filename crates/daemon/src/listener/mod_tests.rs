// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use wendy_core::{FakeClock, RestartPolicy};
use wendy_runtime::FakeRuntime;
use wendy_wire::{ClientFrame, StreamCommand};

use super::*;
use crate::config_store::ConfigStore;
use crate::ingest::Ingest;
use crate::lifecycle::ManagerConfig;
use crate::provisioning::Provisioning;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

struct Fixture {
    fake: FakeRuntime,
    ctx: Arc<ListenCtx<FakeRuntime, FakeClock>>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

fn fixture() -> Fixture {
    let fake = FakeRuntime::new();
    let run_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(fake.clone());
    let manager = Arc::new(crate::lifecycle::ContainerManager::new(
        Arc::clone(&runtime),
        FakeClock::new(),
        ManagerConfig {
            cgroup_slice: "system.slice:wendy-agent".to_string(),
            debug_server: "/usr/lib/wendy-agent/ds2".into(),
            run_dir: run_dir.path().to_path_buf(),
            task_start_timeout: Duration::from_secs(5),
        },
    ));
    let store = ConfigStore::open(state_dir.path()).unwrap();
    let identity = store.load().unwrap();
    let ctx = Arc::new(ListenCtx {
        manager,
        ingest: Ingest::new(runtime),
        provisioning: Arc::new(Provisioning::new(store, identity)),
        shutdown: CancellationToken::new(),
    });
    Fixture { fake, ctx, _dirs: (run_dir, state_dir) }
}

/// Drive one connection: send `frames` (request first), collect `n`
/// responses.
async fn exchange(
    ctx: &ListenCtx<FakeRuntime, FakeClock>,
    request: Request,
    frames: Vec<ClientFrame>,
    responses: usize,
) -> Vec<Response> {
    let (client, server) = tokio::io::duplex(1 << 22);
    let (server_reader, server_writer) = tokio::io::split(server);
    let (mut client_reader, mut client_writer) = tokio::io::split(client);

    let client_side = async move {
        write_message(&mut client_writer, &request, TIMEOUT).await.unwrap();
        for frame in &frames {
            write_message(&mut client_writer, frame, None).await.unwrap();
        }
        let mut received = Vec::with_capacity(responses);
        for _ in 0..responses {
            received.push(read_message::<_, Response>(&mut client_reader, TIMEOUT).await.unwrap());
        }
        received
    };

    let (received, ()) = tokio::join!(
        client_side,
        drive_connection(server_reader, server_writer, ctx)
    );
    received
}

async fn drive_connection<S, W>(reader: S, writer: W, ctx: &ListenCtx<FakeRuntime, FakeClock>)
where
    S: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    handle_connection(reader, writer, ctx).await;
}

async fn call(ctx: &ListenCtx<FakeRuntime, FakeClock>, request: Request) -> Response {
    exchange(ctx, request, vec![], 1).await.remove(0)
}

fn digest_of(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

#[tokio::test]
async fn ping_pong() {
    let fx = fixture();
    assert_eq!(call(&fx.ctx, Request::Ping).await, Response::Pong);
}

#[tokio::test]
async fn hello_reports_protocol_version() {
    let fx = fixture();
    assert_eq!(
        call(&fx.ctx, Request::Hello { version: "9".into() }).await,
        Response::Hello { version: PROTOCOL_VERSION.to_string() }
    );
}

#[tokio::test]
async fn agent_version_is_reported() {
    let fx = fixture();
    let response = call(&fx.ctx, Request::GetAgentVersion).await;
    assert_eq!(response, Response::AgentVersion { version: AGENT_VERSION.to_string() });
}

#[tokio::test]
async fn fresh_agent_is_not_provisioned() {
    let fx = fixture();
    assert_eq!(call(&fx.ctx, Request::IsProvisioned).await, Response::NotProvisioned);
}

#[tokio::test]
async fn write_layer_upgrade_streams_chunks() {
    let fx = fixture();
    let payload = b"layer-bytes".to_vec();
    let digest = digest_of(&payload);

    let responses = exchange(
        &fx.ctx,
        Request::WriteLayer { digest: digest.clone() },
        vec![ClientFrame::Chunk { data: payload }, ClientFrame::Commit],
        1,
    )
    .await;
    assert_eq!(responses, vec![Response::Ok]);

    match call(&fx.ctx, Request::ListLayers).await {
        Response::Layers { layers } => {
            assert_eq!(layers.len(), 1);
            assert_eq!(layers[0].digest, digest);
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn write_layer_rejects_empty_chunk() {
    let fx = fixture();
    let digest = digest_of(b"whatever");
    let responses = exchange(
        &fx.ctx,
        Request::WriteLayer { digest },
        vec![ClientFrame::Chunk { data: vec![] }],
        1,
    )
    .await;
    match &responses[0] {
        Response::Error { kind, .. } => {
            assert_eq!(*kind, wendy_core::ErrorKind::InvalidArgument)
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn run_container_detached_reports_started() {
    let fx = fixture();
    let payload = b"rootfs-layer".to_vec();
    let digest = digest_of(&payload);
    exchange(
        &fx.ctx,
        Request::WriteLayer { digest: digest.clone() },
        vec![ClientFrame::Chunk { data: payload }, ClientFrame::Commit],
        1,
    )
    .await;

    let spec = wendy_wire::RunSpec {
        image_name: "demo".into(),
        app_name: "demo".into(),
        cmd: vec![],
        env: vec![],
        working_dir: None,
        layers: vec![wendy_core::LayerDescriptor {
            digest: digest.clone(),
            diff_id: digest,
            size: 12,
            gzip: false,
        }],
        app_config: br#"{"appId":"com.ex.d","version":"0.1.0","entitlements":[{"network":{"mode":"host"}}]}"#.to_vec(),
        debug: false,
        restart_policy: RestartPolicy::Default,
        detach: true,
    };
    let response = call(&fx.ctx, Request::RunContainer { spec }).await;
    assert_eq!(response, Response::Started { debug_port: 0 });

    match call(&fx.ctx, Request::ListContainers).await {
        Response::Containers { containers } => {
            assert_eq!(containers.len(), 1);
            assert_eq!(containers[0].app_name, "demo");
            assert_eq!(containers[0].app_version, "0.1.0");
            assert_eq!(containers[0].running_state, "running");
            assert_eq!(containers[0].failure_count, 0);
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn attached_run_receives_stopped_event() {
    let fx = fixture();
    let payload = b"l".to_vec();
    let digest = digest_of(&payload);
    exchange(
        &fx.ctx,
        Request::WriteLayer { digest: digest.clone() },
        vec![ClientFrame::Chunk { data: payload }, ClientFrame::Commit],
        1,
    )
    .await;

    let spec = wendy_wire::RunSpec {
        image_name: "demo".into(),
        app_name: "demo".into(),
        cmd: vec![],
        env: vec![],
        working_dir: None,
        layers: vec![wendy_core::LayerDescriptor {
            digest: digest.clone(),
            diff_id: digest,
            size: 1,
            gzip: false,
        }],
        app_config: br#"{"appId":"com.ex.d","version":"0.1.0"}"#.to_vec(),
        debug: false,
        restart_policy: RestartPolicy::No,
        detach: false,
    };

    let (client, server) = tokio::io::duplex(1 << 20);
    let (server_reader, server_writer) = tokio::io::split(server);
    let (mut client_reader, mut client_writer) = tokio::io::split(client);
    let fake = fx.fake.clone();
    let manager = Arc::clone(&fx.ctx.manager);

    let client_side = async move {
        write_message(&mut client_writer, &Request::RunContainer { spec }, TIMEOUT)
            .await
            .unwrap();
        let started: Response = read_message(&mut client_reader, TIMEOUT).await.unwrap();
        assert_eq!(started, Response::Started { debug_port: 0 });

        // The task dies with a no-restart policy: the stream ends with
        // Stopped.
        fake.emit_exit("demo", 1, 1_000).await;
        manager
            .handle_exit(wendy_runtime::TaskExit {
                app_name: "demo".into(),
                code: 1,
                at_ms: 1_000,
            })
            .await;
        let stopped: Response = read_message(&mut client_reader, TIMEOUT).await.unwrap();
        assert_eq!(stopped, Response::Stopped);
    };

    tokio::join!(client_side, drive_connection(server_reader, server_writer, &fx.ctx));
}

#[tokio::test]
async fn stop_unknown_app_reports_not_found() {
    let fx = fixture();
    match call(&fx.ctx, Request::StopContainer { app_name: "ghost".into(), signal: None }).await {
        Response::Error { kind, .. } => assert_eq!(kind, wendy_core::ErrorKind::NotFound),
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn delete_unknown_app_is_ok() {
    let fx = fixture();
    assert_eq!(
        call(&fx.ctx, Request::DeleteContainer { app_name: "ghost".into() }).await,
        Response::Ok
    );
}

#[tokio::test]
async fn shutdown_request_fires_the_token() {
    let fx = fixture();
    assert_eq!(call(&fx.ctx, Request::Shutdown).await, Response::ShuttingDown);
    assert!(fx.ctx.shutdown.is_cancelled());
}

// --- docker-save compatibility path ---

/// Build an OCI image archive with one layer.
fn build_oci_archive(layer_bytes: &[u8]) -> (Vec<u8>, String) {
    let layer_digest = digest_of(layer_bytes);

    let config = serde_json::json!({
        "rootfs": { "type": "layers", "diff_ids": [layer_digest] }
    });
    let config_bytes = serde_json::to_vec(&config).unwrap();
    let config_digest = digest_of(&config_bytes);

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config_digest,
            "size": config_bytes.len(),
        },
        "layers": [{
            "mediaType": "application/vnd.oci.image.layer.v1.tar",
            "digest": layer_digest,
            "size": layer_bytes.len(),
        }],
    });
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
    let manifest_digest = digest_of(&manifest_bytes);

    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": manifest_digest,
            "size": manifest_bytes.len(),
        }],
    });
    let index_bytes = serde_json::to_vec(&index).unwrap();

    let mut builder = tar::Builder::new(Vec::new());
    let mut add = |path: String, bytes: &[u8]| {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, bytes).unwrap();
    };
    add("index.json".to_string(), &index_bytes);
    for (digest, bytes) in [
        (&layer_digest, layer_bytes),
        (&config_digest, config_bytes.as_slice()),
        (&manifest_digest, manifest_bytes.as_slice()),
    ] {
        let hex = digest.strip_prefix("sha256:").unwrap();
        add(format!("blobs/sha256/{hex}"), bytes);
    }
    (builder.into_inner().unwrap(), layer_digest)
}

#[tokio::test]
async fn run_stream_extracts_archive_and_starts() {
    let fx = fixture();
    let (archive, layer_digest) = build_oci_archive(b"layer-tar-bytes");

    let mut frames = vec![ClientFrame::Header {
        image_name: "demo".into(),
        app_config: br#"{"appId":"com.ex.d","version":"0.1.0"}"#.to_vec(),
    }];
    for chunk in archive.chunks(1024) {
        frames.push(ClientFrame::Chunk { data: chunk.to_vec() });
    }
    frames.push(ClientFrame::Control {
        command: StreamCommand::Run { debug: false, restart_policy: RestartPolicy::Default },
    });

    let responses = exchange(&fx.ctx, Request::RunContainerStream, frames, 1).await;
    assert_eq!(responses, vec![Response::Started { debug_port: 0 }]);

    // The archive's layer landed in the content store.
    assert!(fx.fake.content_digests().contains(&layer_digest));
    assert!(fx.fake.container("demo").is_some());
}

#[tokio::test]
async fn run_stream_control_before_header_is_failed_precondition() {
    let fx = fixture();
    let frames = vec![ClientFrame::Control {
        command: StreamCommand::Run { debug: false, restart_policy: RestartPolicy::Default },
    }];
    let responses = exchange(&fx.ctx, Request::RunContainerStream, frames, 1).await;
    match &responses[0] {
        Response::Error { kind, .. } => {
            assert_eq!(*kind, wendy_core::ErrorKind::FailedPrecondition)
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn run_stream_empty_image_name_is_invalid() {
    let fx = fixture();
    let frames = vec![ClientFrame::Header { image_name: String::new(), app_config: vec![] }];
    let responses = exchange(&fx.ctx, Request::RunContainerStream, frames, 1).await;
    match &responses[0] {
        Response::Error { kind, .. } => {
            assert_eq!(*kind, wendy_core::ErrorKind::InvalidArgument)
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn run_stream_duplicate_header_is_invalid() {
    let fx = fixture();
    let header = ClientFrame::Header { image_name: "demo".into(), app_config: b"{}".to_vec() };
    let frames = vec![header.clone(), header];
    let responses = exchange(&fx.ctx, Request::RunContainerStream, frames, 1).await;
    match &responses[0] {
        Response::Error { kind, .. } => {
            assert_eq!(*kind, wendy_core::ErrorKind::InvalidArgument)
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn run_stream_empty_chunk_is_invalid() {
    let fx = fixture();
    let frames = vec![
        ClientFrame::Header { image_name: "demo".into(), app_config: b"{}".to_vec() },
        ClientFrame::Chunk { data: vec![] },
    ];
    let responses = exchange(&fx.ctx, Request::RunContainerStream, frames, 1).await;
    match &responses[0] {
        Response::Error { kind, .. } => {
            assert_eq!(*kind, wendy_core::ErrorKind::InvalidArgument)
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn run_stream_garbage_archive_is_invalid() {
    let fx = fixture();
    let frames = vec![
        ClientFrame::Header {
            image_name: "demo".into(),
            app_config: br#"{"appId":"a","version":"1"}"#.to_vec(),
        },
        ClientFrame::Chunk { data: b"not a tar archive".to_vec() },
        ClientFrame::Control {
            command: StreamCommand::Run { debug: false, restart_policy: RestartPolicy::Default },
        },
    ];
    let responses = exchange(&fx.ctx, Request::RunContainerStream, frames, 1).await;
    match &responses[0] {
        Response::Error { kind, .. } => {
            assert_eq!(*kind, wendy_core::ErrorKind::InvalidArgument)
        }
        other => panic!("unexpected response {other:?}"),
    }
}
