// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! wendy-agentd entry point.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wendy_daemon::{startup, supervisor};

#[tokio::main]
async fn main() -> ExitCode {
    let config = startup::Config::load();

    // LOG_LEVEL drives verbosity; the daemon log file lives in the state
    // directory next to the identity.
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = match config.log_path.parent() {
        Some(dir) if dir.exists() => Some(tracing_appender::rolling::never(
            dir,
            config.log_path.file_name().unwrap_or_default(),
        )),
        _ => None,
    };
    match file_appender {
        Some(appender) => {
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(appender).init()
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    if let Some(backend) = wendy_daemon::env::network_manager() {
        info!(backend, "network manager backend selected");
    }

    let daemon = match startup::startup(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("agent failed to start: {e}");
            eprintln!("wendy-agentd: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(version = wendy_daemon::AGENT_VERSION, "wendy-agentd started");

    let supervisor_manager = Arc::clone(&daemon.manager);
    let supervisor_shutdown = daemon.shutdown.clone();
    let supervisor_task = tokio::spawn(async move {
        if let Err(e) = supervisor::run(supervisor_manager, supervisor_shutdown).await {
            warn!("supervisor stopped: {e}");
        }
    });

    let listener = daemon.listener;
    tokio::spawn(listener.run());

    // Run until a Shutdown request or SIGINT. Tasks keep running; they
    // outlive the agent.
    tokio::select! {
        _ = daemon.shutdown.cancelled() => info!("shutdown requested"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            daemon.shutdown.cancel();
        }
    }

    let _ = supervisor_task.await;
    startup::cleanup(&daemon.config);
    info!("wendy-agentd stopped");
    ExitCode::SUCCESS
}
