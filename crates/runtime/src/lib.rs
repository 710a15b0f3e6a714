// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wendy-runtime: the narrow capability interface the agent core holds on
//! the underlying container runtime, plus the containerd-backed
//! implementation.
//!
//! The core never touches the runtime's on-disk layout; everything flows
//! through [`RuntimeAdapter`]. `alreadyExists` outcomes are surfaced so
//! callers can classify them as success where the operation is
//! content-addressed.

mod containerd;

pub use containerd::ContainerdRuntime;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeRuntime, RuntimeCall};

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use wendy_core::{ContainerRecord, ErrorKind, TaskState};

/// Errors from runtime adapter operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("runtime rpc failed: {0}")]
    Rpc(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::NotFound(_) => ErrorKind::NotFound,
            RuntimeError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            // AlreadyExists that reaches a client was not swallowable and
            // means a real conflict.
            RuntimeError::AlreadyExists(_) => ErrorKind::FailedPrecondition,
            RuntimeError::Rpc(_) | RuntimeError::Unavailable(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error is the benign already-exists outcome.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RuntimeError::AlreadyExists(_))
    }
}

/// Outcome of a content write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed { size: u64 },
    /// Content with this digest was already present; not an error.
    AlreadyExists,
}

/// Digest-only view of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    pub digest: String,
    pub size: u64,
}

/// A mount returned by the snapshotter, handed back on task create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMount {
    pub mount_type: String,
    pub source: String,
    pub options: Vec<String>,
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    pub app_name: String,
    pub image_name: String,
    pub snapshot_key: String,
    pub labels: HashMap<String, String>,
}

/// A task and its observable state.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub app_name: String,
    pub state: TaskState,
}

/// A task exit observed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub app_name: String,
    pub code: u32,
    pub at_ms: u64,
}

/// The operations the agent core needs from a container runtime.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync + 'static {
    /// Stream chunks into the content store under `ref = digest` and
    /// commit. Commit is atomic; a concurrent or previous writer of the
    /// same digest yields `WriteOutcome::AlreadyExists`.
    async fn write_content(
        &self,
        digest: &str,
        chunks: mpsc::Receiver<Vec<u8>>,
    ) -> Result<WriteOutcome, RuntimeError>;

    async fn list_content(&self) -> Result<Vec<ContentInfo>, RuntimeError>;

    /// Serialize `value` as canonical JSON (object keys sorted), store it,
    /// and return `(digest, size)`.
    async fn upload_json(&self, value: &serde_json::Value)
        -> Result<(String, u64), RuntimeError>;

    async fn prepare_snapshot(
        &self,
        key: &str,
        parent: Option<&str>,
    ) -> Result<Vec<SnapshotMount>, RuntimeError>;

    /// Mounts of an existing (active) snapshot.
    async fn snapshot_mounts(&self, key: &str) -> Result<Vec<SnapshotMount>, RuntimeError>;

    async fn apply_diff(
        &self,
        digest: &str,
        size: u64,
        media_type: &str,
        mounts: &[SnapshotMount],
    ) -> Result<(), RuntimeError>;

    /// Commit a prepared snapshot under its final name. Already-committed
    /// names are treated as success.
    async fn commit_snapshot(&self, tmp_key: &str, name: &str) -> Result<(), RuntimeError>;

    /// Remove a snapshot; missing keys are treated as success.
    async fn remove_snapshot(&self, key: &str) -> Result<(), RuntimeError>;

    /// Keys of all snapshots known to the snapshotter.
    async fn list_snapshots(&self) -> Result<Vec<String>, RuntimeError>;

    async fn create_image(
        &self,
        name: &str,
        manifest_digest: &str,
        manifest_size: u64,
    ) -> Result<(), RuntimeError>;

    async fn update_image(
        &self,
        name: &str,
        manifest_digest: &str,
        manifest_size: u64,
    ) -> Result<(), RuntimeError>;

    async fn delete_image(&self, name: &str) -> Result<(), RuntimeError>;

    async fn create_container(&self, record: &ContainerRecord) -> Result<(), RuntimeError>;

    async fn update_container(&self, record: &ContainerRecord) -> Result<(), RuntimeError>;

    async fn delete_container(&self, app_name: &str) -> Result<(), RuntimeError>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn create_task(
        &self,
        container_id: &str,
        mounts: &[SnapshotMount],
        stdout: Option<&Path>,
        stderr: Option<&Path>,
    ) -> Result<(), RuntimeError>;

    async fn start_task(&self, container_id: &str) -> Result<(), RuntimeError>;

    async fn kill_task(&self, container_id: &str, signal: u32) -> Result<(), RuntimeError>;

    async fn delete_task(&self, container_id: &str) -> Result<(), RuntimeError>;

    async fn list_tasks(&self) -> Result<Vec<TaskInfo>, RuntimeError>;

    /// Subscribe to task exit events. Each call opens an independent
    /// subscription.
    async fn subscribe_task_exits(&self) -> Result<mpsc::Receiver<TaskExit>, RuntimeError>;
}
