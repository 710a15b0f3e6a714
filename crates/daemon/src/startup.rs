// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Daemon startup: single-instance lock, identity, runtime connection,
//! listener sockets.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::info;
use wendy_core::SystemClock;
use wendy_runtime::{ContainerdRuntime, RuntimeError};

use crate::config_store::{ConfigStore, StoreError};
use crate::ingest::Ingest;
use crate::lifecycle::{ContainerManager, ManagerConfig};
use crate::listener::{ListenCtx, Listener};
use crate::provisioning::Provisioning;

/// Daemon configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub run_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub listen_addr: String,
    pub containerd_sock: PathBuf,
    pub containerd_namespace: String,
}

impl Config {
    pub fn load() -> Self {
        let state_dir = crate::env::state_dir();
        let run_dir = crate::env::run_dir();
        Self {
            socket_path: run_dir.join("agentd.sock"),
            lock_path: state_dir.join("agentd.pid"),
            log_path: state_dir.join("agentd.log"),
            listen_addr: crate::env::listen_addr(),
            containerd_sock: crate::env::containerd_sock(),
            containerd_namespace: crate::env::containerd_namespace(),
            state_dir,
            run_dir,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to acquire lock: agent already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("failed to bind tcp {0}: {1}")]
    TcpBindFailed(String, std::io::Error),

    #[error("container runtime unreachable: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Running daemon state handed back to `main`.
pub struct Daemon {
    pub config: Config,
    // NOTE(lifetime): held to maintain the exclusive lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub manager: Arc<ContainerManager<ContainerdRuntime, SystemClock>>,
    pub listener: Listener<ContainerdRuntime, SystemClock>,
    pub shutdown: CancellationToken,
}

/// Bring the daemon up: lock, identity, runtime, listeners.
pub async fn startup(config: Config) -> Result<Daemon, StartupError> {
    let store = ConfigStore::open(&config.state_dir)?;
    std::fs::create_dir_all(&config.run_dir)?;

    let lock_file = File::create(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(StartupError::LockFailed)?;
    std::fs::write(&config.lock_path, std::process::id().to_string())?;

    let identity = store.load()?;
    let provisioning = Arc::new(Provisioning::new(store, identity));

    let runtime = Arc::new(
        ContainerdRuntime::connect(&config.containerd_sock, config.containerd_namespace.clone())
            .await?,
    );
    info!(socket = %config.containerd_sock.display(), namespace = %config.containerd_namespace, "connected to containerd");

    let manager = Arc::new(ContainerManager::new(
        Arc::clone(&runtime),
        SystemClock,
        ManagerConfig {
            cgroup_slice: crate::env::cgroup_slice(),
            debug_server: crate::env::debug_server(),
            run_dir: config.run_dir.clone(),
            task_start_timeout: crate::env::task_start_timeout(),
        },
    ));

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let unix = UnixListener::bind(&config.socket_path)
        .map_err(|e| StartupError::BindFailed(config.socket_path.clone(), e))?;
    let tcp = match TcpListener::bind(&config.listen_addr).await {
        Ok(tcp) => Some(tcp),
        Err(e) => return Err(StartupError::TcpBindFailed(config.listen_addr.clone(), e)),
    };
    info!(socket = %config.socket_path.display(), tcp = %config.listen_addr, "listening");

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(ListenCtx {
        manager: Arc::clone(&manager),
        ingest: Ingest::new(runtime),
        provisioning,
        shutdown: shutdown.clone(),
    });
    let listener = Listener::new(unix, tcp, ctx);

    Ok(Daemon { config, lock_file, manager, listener, shutdown })
}

/// Remove runtime files on graceful shutdown. Running tasks are left
/// alive; containerd keeps them.
pub fn cleanup(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}
