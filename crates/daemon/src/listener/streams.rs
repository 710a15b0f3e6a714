// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Connection-upgrading streaming handlers.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use wendy_core::{Clock, ErrorKind};
use wendy_runtime::RuntimeAdapter;
use wendy_wire::{
    read_message, write_message, ClientFrame, Response, RunSpec, StreamCommand,
};

use super::{archive, ListenCtx};
use crate::lifecycle::{AppEvent, RunRequest};

/// `WriteLayer` upgrade: `Chunk* Commit` frames, one response.
pub(super) async fn handle_write_layer<S, W, R, C>(
    digest: &str,
    reader: &mut S,
    writer: &mut W,
    ctx: &ListenCtx<R, C>,
) where
    S: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    R: RuntimeAdapter,
    C: Clock,
{
    let response = match ctx.ingest.write_layer(digest, reader).await {
        Ok(()) => Response::Ok,
        Err(e) => Response::error(e.kind(), e.to_string()),
    };
    send(writer, &response).await;
}

/// Unary `RunContainer`: execute the lifecycle run and report events.
///
/// `Started` is flushed before the handler returns; a non-detached client
/// keeps the connection and receives `Stopped` when the supervisor gives
/// up on the app.
pub(super) async fn handle_run<S, W, R, C>(
    spec: RunSpec,
    reader: &mut S,
    writer: &mut W,
    ctx: &ListenCtx<R, C>,
) where
    S: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    R: RuntimeAdapter,
    C: Clock,
{
    // Subscribe before starting so no event can slip between the start
    // and the subscription.
    let events = ctx.manager.subscribe();
    let app_name = spec.app_name.clone();
    let detach = spec.detach;

    let request = RunRequest {
        image_name: spec.image_name,
        app_name: spec.app_name,
        cmd: spec.cmd,
        env: spec.env,
        working_dir: spec.working_dir,
        layers: spec.layers,
        app_config: spec.app_config,
        debug: spec.debug,
        restart_policy: spec.restart_policy,
    };

    let started = match ctx.manager.run(request).await {
        Ok(started) => started,
        Err(e) => {
            send(writer, &Response::error(e.kind(), e.to_string())).await;
            return;
        }
    };
    send(writer, &Response::Started { debug_port: started.debug_port }).await;
    if detach {
        return;
    }

    forward_events_until_stopped(events, &app_name, reader, writer).await;
}

/// Docker-save compatibility shim: `Header Chunk* Control`.
///
/// Chunks are spooled to a temp file, the OCI image archive is extracted,
/// its blobs re-enter the content-addressed path, and the run converges
/// on the same lifecycle operation as the unary request.
pub(super) async fn handle_run_stream<S, W, R, C>(
    reader: &mut S,
    writer: &mut W,
    ctx: &ListenCtx<R, C>,
) where
    S: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    R: RuntimeAdapter,
    C: Clock,
{
    let timeout = Some(crate::env::ipc_timeout());

    // The header must come first.
    let (image_name, app_config) = match read_message::<_, ClientFrame>(reader, timeout).await {
        Ok(ClientFrame::Header { image_name, app_config }) => {
            if image_name.is_empty() {
                send(
                    writer,
                    &Response::error(ErrorKind::InvalidArgument, "empty image name"),
                )
                .await;
                return;
            }
            (image_name, app_config)
        }
        Ok(ClientFrame::Control { .. }) => {
            send(
                writer,
                &Response::error(ErrorKind::FailedPrecondition, "control frame before header"),
            )
            .await;
            return;
        }
        Ok(_) => {
            send(writer, &Response::error(ErrorKind::InvalidArgument, "missing header frame"))
                .await;
            return;
        }
        Err(e) => {
            send(
                writer,
                &Response::error(ErrorKind::InvalidArgument, format!("bad frame: {e}")),
            )
            .await;
            return;
        }
    };

    // Spool the archive; chunk frames carry no deadline.
    let spool = archive::Spool::new();
    let mut spool_file = match tokio::fs::File::create(spool.path()).await {
        Ok(file) => file,
        Err(e) => {
            send(writer, &Response::error(ErrorKind::Internal, format!("spool: {e}"))).await;
            return;
        }
    };

    let command = loop {
        match read_message::<_, ClientFrame>(reader, None).await {
            Ok(ClientFrame::Chunk { data }) => {
                if data.is_empty() {
                    send(writer, &Response::error(ErrorKind::InvalidArgument, "empty chunk"))
                        .await;
                    return;
                }
                if let Err(e) = spool_file.write_all(&data).await {
                    send(
                        writer,
                        &Response::error(ErrorKind::Internal, format!("spool write: {e}")),
                    )
                    .await;
                    return;
                }
            }
            Ok(ClientFrame::Control { command }) => break command,
            Ok(ClientFrame::Header { .. }) => {
                send(
                    writer,
                    &Response::error(ErrorKind::InvalidArgument, "duplicate header frame"),
                )
                .await;
                return;
            }
            Ok(ClientFrame::Commit) => {
                send(
                    writer,
                    &Response::error(
                        ErrorKind::InvalidArgument,
                        "commit frame outside a layer stream",
                    ),
                )
                .await;
                return;
            }
            Err(e) => {
                send(
                    writer,
                    &Response::error(ErrorKind::InvalidArgument, format!("bad frame: {e}")),
                )
                .await;
                return;
            }
        }
    };
    if let Err(e) = spool_file.sync_all().await {
        debug!("spool sync failed: {e}");
    }
    drop(spool_file);

    let (debug, restart_policy) = match command {
        StreamCommand::Run { debug, restart_policy } => (debug, restart_policy),
        StreamCommand::Stop => {
            // Stop control on this stream addresses the app by image name.
            let response = match ctx.manager.stop(&image_name, 9).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::error(e.kind(), e.to_string()),
            };
            send(writer, &response).await;
            return;
        }
    };

    // Extract the archive and push its blobs through the
    // content-addressed path.
    let layers = match archive::ingest_archive(spool.path(), &ctx.ingest).await {
        Ok(layers) => layers,
        Err(e) => {
            send(writer, &Response::error(e.kind(), e.to_string())).await;
            return;
        }
    };

    let events = ctx.manager.subscribe();
    let request = RunRequest {
        app_name: image_name.clone(),
        image_name,
        cmd: vec![],
        env: vec![],
        working_dir: None,
        layers,
        app_config,
        debug,
        restart_policy,
    };
    let app_name = request.app_name.clone();
    let started = match ctx.manager.run(request).await {
        Ok(started) => started,
        Err(e) => {
            send(writer, &Response::error(e.kind(), e.to_string())).await;
            return;
        }
    };
    send(writer, &Response::Started { debug_port: started.debug_port }).await;

    forward_events_until_stopped(events, &app_name, reader, writer).await;
}

/// Forward lifecycle events for one app until `Stopped` or the client
/// goes away.
async fn forward_events_until_stopped<S, W>(
    mut events: tokio::sync::broadcast::Receiver<AppEvent>,
    app_name: &str,
    reader: &mut S,
    writer: &mut W,
) where
    S: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(AppEvent::Stopped { app_name: app }) if app == app_name => {
                    send(writer, &Response::Stopped).await;
                    return;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(app = app_name, missed, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            },
            _ = super::detect_client_disconnect(reader) => {
                debug!(app = app_name, "client detached from event stream");
                return;
            }
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) {
    if let Err(e) =
        write_message(writer, response, Some(crate::env::ipc_timeout())).await
    {
        debug!("could not write response: {e}");
    }
}
