// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Listener task for the CLI-facing RPC surface.
//!
//! Accepts connections on the Unix socket and, when configured, TCP.
//! Each connection carries one request; streaming requests upgrade the
//! connection and keep exchanging frames.

mod archive;
mod streams;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use wendy_core::Clock;
use wendy_runtime::RuntimeAdapter;
use wendy_wire::{
    read_message, write_message, ProtocolError, Request, Response, PROTOCOL_VERSION,
};

use crate::ingest::Ingest;
use crate::lifecycle::ContainerManager;
use crate::provisioning::Provisioning;
use crate::AGENT_VERSION;

/// Shared daemon context for all request handlers.
pub struct ListenCtx<R, C> {
    pub manager: Arc<ContainerManager<R, C>>,
    pub ingest: Ingest<R>,
    pub provisioning: Arc<Provisioning>,
    /// Fired on a Shutdown request; the main loop exits gracefully.
    pub shutdown: CancellationToken,
}

/// Listener task accepting socket connections.
pub struct Listener<R, C> {
    unix: UnixListener,
    tcp: Option<TcpListener>,
    ctx: Arc<ListenCtx<R, C>>,
}

impl<R: RuntimeAdapter, C: Clock> Listener<R, C> {
    pub fn new(unix: UnixListener, tcp: Option<TcpListener>, ctx: Arc<ListenCtx<R, C>>) -> Self {
        Self { unix, tcp, ctx }
    }

    /// Accept until shutdown, spawning a task per connection.
    pub async fn run(self) {
        info!("listener running");
        match self.tcp {
            Some(tcp) => Self::run_dual(self.unix, tcp, self.ctx).await,
            None => Self::run_unix_only(self.unix, self.ctx).await,
        }
    }

    async fn run_unix_only(unix: UnixListener, ctx: Arc<ListenCtx<R, C>>) {
        loop {
            match unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        handle_connection(reader, writer, &ctx).await;
                    });
                }
                Err(e) => error!("unix accept error: {e}"),
            }
        }
    }

    async fn run_dual(unix: UnixListener, tcp: TcpListener, ctx: Arc<ListenCtx<R, C>>) {
        loop {
            tokio::select! {
                result = unix.accept() => match result {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(reader, writer, &ctx).await;
                        });
                    }
                    Err(e) => error!("unix accept error: {e}"),
                },
                result = tcp.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!("tcp connection from {addr}");
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(reader, writer, &ctx).await;
                        });
                    }
                    Err(e) => error!("tcp accept error: {e}"),
                },
            }
        }
    }
}

/// Handle one connection: read the request, dispatch, answer.
///
/// Generic over reader/writer so tests can drive it with in-memory
/// duplex streams.
pub async fn handle_connection<S, W, R, C>(
    mut reader: S,
    mut writer: W,
    ctx: &ListenCtx<R, C>,
) where
    S: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    R: RuntimeAdapter,
    C: Clock,
{
    let request: Request =
        match read_message(&mut reader, Some(crate::env::ipc_timeout())).await {
            Ok(request) => request,
            Err(ProtocolError::ConnectionClosed) => {
                debug!("client disconnected before sending a request");
                return;
            }
            Err(e) => {
                let response = Response::error(
                    wendy_core::ErrorKind::InvalidArgument,
                    format!("bad request frame: {e}"),
                );
                let _ =
                    write_message(&mut writer, &response, Some(crate::env::ipc_timeout())).await;
                return;
            }
        };

    debug!(request = ?request_name(&request), "received request");

    // Streaming requests own the connection from here on.
    let request = match request {
        Request::WriteLayer { digest } => {
            streams::handle_write_layer(&digest, &mut reader, &mut writer, ctx).await;
            return;
        }
        Request::RunContainer { spec } => {
            streams::handle_run(spec, &mut reader, &mut writer, ctx).await;
            return;
        }
        Request::RunContainerStream => {
            streams::handle_run_stream(&mut reader, &mut writer, ctx).await;
            return;
        }
        other => other,
    };

    let response = tokio::select! {
        response = handle_request(request, ctx) => response,
        _ = detect_client_disconnect(&mut reader) => {
            debug!("client disconnected, dropping handler");
            return;
        }
    };

    if let Err(e) = write_message(&mut writer, &response, Some(crate::env::ipc_timeout())).await {
        debug!("could not write response: {e}");
    }
}

/// Handle a unary request.
async fn handle_request<R: RuntimeAdapter, C: Clock>(
    request: Request,
    ctx: &ListenCtx<R, C>,
) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version: _ } => {
            Response::Hello { version: PROTOCOL_VERSION.to_string() }
        }

        Request::GetAgentVersion => {
            Response::AgentVersion { version: AGENT_VERSION.to_string() }
        }

        Request::IsProvisioned => match ctx.provisioning.enrolled().await {
            Some(enrolled) => Response::Provisioned {
                cloud_host: enrolled.cloud_host,
                organization_id: enrolled.organization_id,
                asset_id: enrolled.asset_id,
            },
            None => Response::NotProvisioned,
        },

        Request::StartProvisioning {
            cloud_host,
            organization_id,
            asset_id,
            enrollment_token,
        } => {
            let result = ctx
                .provisioning
                .start_provisioning(
                    &cloud_host,
                    organization_id,
                    asset_id,
                    &enrollment_token,
                    crate::env::provisioning_timeout(),
                )
                .await;
            match result {
                Ok(()) => Response::Ok,
                Err(e) => Response::error(e.kind(), e.to_string()),
            }
        }

        Request::ListLayers => match ctx.ingest.list_layer_headers().await {
            Ok(layers) => Response::Layers { layers },
            Err(e) => Response::error(e.kind(), e.to_string()),
        },

        Request::ListContainers => match ctx.manager.list().await {
            Ok(statuses) => Response::Containers {
                containers: statuses
                    .into_iter()
                    .map(|s| wendy_wire::ContainerInfo {
                        app_name: s.app_name,
                        app_version: s.app_version,
                        running_state: s.running_state.to_string(),
                        failure_count: s.failure_count,
                    })
                    .collect(),
            },
            Err(e) => Response::error(e.kind(), e.to_string()),
        },

        Request::StopContainer { app_name, signal } => {
            match ctx.manager.stop(&app_name, signal.unwrap_or(9)).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::error(e.kind(), e.to_string()),
            }
        }

        Request::DeleteContainer { app_name } => match ctx.manager.delete(&app_name).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::error(e.kind(), e.to_string()),
        },

        Request::Shutdown => {
            ctx.shutdown.cancel();
            Response::ShuttingDown
        }

        // Streaming requests are dispatched before handle_request.
        Request::WriteLayer { .. }
        | Request::RunContainer { .. }
        | Request::RunContainerStream => Response::error(
            wendy_core::ErrorKind::Internal,
            "streaming request reached the unary handler",
        ),
    }
}

/// In the request-response protocol the client sends one request then
/// waits; a read returning EOF means it went away.
async fn detect_client_disconnect<S: AsyncRead + Unpin>(reader: &mut S) {
    let mut buf = [0u8; 1];
    let _ = reader.read(&mut buf).await;
}

fn request_name(request: &Request) -> &'static str {
    match request {
        Request::Ping => "ping",
        Request::Hello { .. } => "hello",
        Request::GetAgentVersion => "get_agent_version",
        Request::IsProvisioned => "is_provisioned",
        Request::StartProvisioning { .. } => "start_provisioning",
        Request::ListLayers => "list_layers",
        Request::WriteLayer { .. } => "write_layer",
        Request::ListContainers => "list_containers",
        Request::StopContainer { .. } => "stop_container",
        Request::DeleteContainer { .. } => "delete_container",
        Request::RunContainer { .. } => "run_container",
        Request::RunContainerStream => "run_container_stream",
        Request::Shutdown => "shutdown",
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
