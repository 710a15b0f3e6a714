// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Environment-variable configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Durable agent state (identity file, lock file, daemon log).
pub fn state_dir() -> PathBuf {
    path_var("WENDY_STATE_DIR", "/var/lib/wendy-agent")
}

/// Runtime scratch space (listener socket, attach FIFOs).
pub fn run_dir() -> PathBuf {
    path_var("WENDY_RUN_DIR", "/run/wendy-agent")
}

/// containerd socket the runtime capability connects to.
pub fn containerd_sock() -> PathBuf {
    path_var("WENDY_CONTAINERD_SOCK", "/run/containerd/containerd.sock")
}

/// containerd namespace all runtime requests carry.
pub fn containerd_namespace() -> String {
    std::env::var("WENDY_CONTAINERD_NAMESPACE").unwrap_or_else(|_| "wendy".to_string())
}

/// TCP listen address for the CLI-facing RPC surface.
pub fn listen_addr() -> String {
    std::env::var("WENDY_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:50055".to_string())
}

/// Cgroup slice prefix for container placement.
pub fn cgroup_slice() -> String {
    std::env::var("WENDY_CGROUP_SLICE")
        .unwrap_or_else(|_| "system.slice:wendy-agent".to_string())
}

/// Host path of the debug server bind-mounted into debug containers.
pub fn debug_server() -> PathBuf {
    path_var("WENDY_DEBUG_SERVER", "/usr/lib/wendy-agent/ds2")
}

/// Network backend selection, surfaced to out-of-core collaborators.
pub fn network_manager() -> Option<String> {
    std::env::var("WENDY_NETWORK_MANAGER").ok()
}

/// Per-message IPC timeout for control frames. Chunk streams carry no
/// deadline; they are bounded only by the client.
pub fn ipc_timeout() -> Duration {
    millis_var("WENDY_IPC_TIMEOUT_MS", 30_000)
}

/// Provisioning deadline for the cloud round-trip.
pub fn provisioning_timeout() -> Duration {
    millis_var("WENDY_PROVISIONING_TIMEOUT_MS", 60_000)
}

/// Deadline for a task start.
pub fn task_start_timeout() -> Duration {
    millis_var("WENDY_TASK_START_TIMEOUT_MS", 30_000)
}

fn path_var(name: &str, default: &str) -> PathBuf {
    std::env::var_os(name).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(default))
}

fn millis_var(name: &str, default: u64) -> Duration {
    let ms = std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}
