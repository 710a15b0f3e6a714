// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! In-memory [`RuntimeAdapter`] for tests.
//!
//! Models just enough of the content store, snapshotter, image index, and
//! task table to exercise the lifecycle paths, records every mutating
//! call, and lets tests inject task exit events.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest as _, Sha256};
use tokio::sync::mpsc;
use wendy_core::{ContainerRecord, TaskState};

use crate::{
    ContainerSummary, ContentInfo, RuntimeAdapter, RuntimeError, SnapshotMount, TaskExit,
    TaskInfo, WriteOutcome,
};

/// A recorded mutating call, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    WriteContent { digest: String },
    UploadJson { digest: String },
    PrepareSnapshot { key: String },
    ApplyDiff { digest: String },
    CommitSnapshot { name: String },
    RemoveSnapshot { key: String },
    CreateImage { name: String },
    UpdateImage { name: String },
    DeleteImage { name: String },
    CreateContainer { app_name: String },
    UpdateContainer { app_name: String },
    DeleteContainer { app_name: String },
    CreateTask { app_name: String },
    StartTask { app_name: String },
    KillTask { app_name: String, signal: u32 },
    DeleteTask { app_name: String },
}

#[derive(Default)]
struct State {
    content: HashMap<String, u64>,
    bytes_written: u64,
    active_snapshots: HashMap<String, String>,
    committed_snapshots: HashMap<String, String>,
    images: HashMap<String, (String, u64)>,
    containers: HashMap<String, ContainerRecord>,
    tasks: HashMap<String, TaskState>,
    calls: Vec<RuntimeCall>,
    exit_subscribers: Vec<mpsc::Sender<TaskExit>>,
}

#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<State>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// All mutating calls in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    /// Number of `write_content` calls so far (the dedup test hook).
    pub fn write_content_calls(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::WriteContent { .. }))
            .count()
    }

    /// Total bytes committed through `write_content`.
    pub fn bytes_written(&self) -> u64 {
        self.state.lock().bytes_written
    }

    pub fn content_digests(&self) -> Vec<String> {
        let mut digests: Vec<String> = self.state.lock().content.keys().cloned().collect();
        digests.sort();
        digests
    }

    pub fn committed_snapshot_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.state.lock().committed_snapshots.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn container(&self, app_name: &str) -> Option<ContainerRecord> {
        self.state.lock().containers.get(app_name).cloned()
    }

    pub fn image(&self, name: &str) -> Option<(String, u64)> {
        self.state.lock().images.get(name).cloned()
    }

    pub fn task_state(&self, app_name: &str) -> TaskState {
        self.state.lock().tasks.get(app_name).copied().unwrap_or(TaskState::Absent)
    }

    /// Simulate a task exit: flips the task state and notifies all
    /// subscribers, like containerd's `/tasks/exit` topic would.
    pub async fn emit_exit(&self, app_name: &str, code: u32, at_ms: u64) {
        let subscribers = {
            let mut state = self.state.lock();
            state.tasks.insert(app_name.to_string(), TaskState::Exited { code, at_ms });
            state.exit_subscribers.clone()
        };
        let event = TaskExit { app_name: app_name.to_string(), code, at_ms };
        for tx in subscribers {
            let _ = tx.send(event.clone()).await;
        }
    }

    fn record(&self, call: RuntimeCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    async fn write_content(
        &self,
        digest: &str,
        mut chunks: mpsc::Receiver<Vec<u8>>,
    ) -> Result<WriteOutcome, RuntimeError> {
        self.record(RuntimeCall::WriteContent { digest: digest.to_string() });
        let mut total = 0u64;
        while let Some(chunk) = chunks.recv().await {
            total += chunk.len() as u64;
        }
        let mut state = self.state.lock();
        if state.content.contains_key(digest) {
            return Ok(WriteOutcome::AlreadyExists);
        }
        state.content.insert(digest.to_string(), total);
        state.bytes_written += total;
        Ok(WriteOutcome::Committed { size: total })
    }

    async fn list_content(&self) -> Result<Vec<ContentInfo>, RuntimeError> {
        let state = self.state.lock();
        let mut infos: Vec<ContentInfo> = state
            .content
            .iter()
            .map(|(digest, size)| ContentInfo { digest: digest.clone(), size: *size })
            .collect();
        infos.sort_by(|a, b| a.digest.cmp(&b.digest));
        Ok(infos)
    }

    async fn upload_json(
        &self,
        value: &serde_json::Value,
    ) -> Result<(String, u64), RuntimeError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| RuntimeError::InvalidArgument(e.to_string()))?;
        let digest = format!("sha256:{:x}", Sha256::digest(&payload));
        let size = payload.len() as u64;
        self.record(RuntimeCall::UploadJson { digest: digest.clone() });
        self.state.lock().content.insert(digest.clone(), size);
        Ok((digest, size))
    }

    async fn prepare_snapshot(
        &self,
        key: &str,
        parent: Option<&str>,
    ) -> Result<Vec<SnapshotMount>, RuntimeError> {
        self.record(RuntimeCall::PrepareSnapshot { key: key.to_string() });
        let mut state = self.state.lock();
        if state.active_snapshots.contains_key(key) || state.committed_snapshots.contains_key(key)
        {
            return Err(RuntimeError::AlreadyExists(key.to_string()));
        }
        if let Some(parent) = parent {
            if !state.committed_snapshots.contains_key(parent) {
                return Err(RuntimeError::NotFound(format!("parent snapshot {parent}")));
            }
        }
        state
            .active_snapshots
            .insert(key.to_string(), parent.unwrap_or_default().to_string());
        Ok(vec![SnapshotMount {
            mount_type: "overlay".to_string(),
            source: key.to_string(),
            options: vec![],
        }])
    }

    async fn snapshot_mounts(&self, key: &str) -> Result<Vec<SnapshotMount>, RuntimeError> {
        let state = self.state.lock();
        if !state.active_snapshots.contains_key(key) {
            return Err(RuntimeError::NotFound(key.to_string()));
        }
        Ok(vec![SnapshotMount {
            mount_type: "overlay".to_string(),
            source: key.to_string(),
            options: vec![],
        }])
    }

    async fn apply_diff(
        &self,
        digest: &str,
        _size: u64,
        _media_type: &str,
        _mounts: &[SnapshotMount],
    ) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::ApplyDiff { digest: digest.to_string() });
        if !self.state.lock().content.contains_key(digest) {
            return Err(RuntimeError::NotFound(format!("content {digest}")));
        }
        Ok(())
    }

    async fn commit_snapshot(&self, tmp_key: &str, name: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::CommitSnapshot { name: name.to_string() });
        let mut state = self.state.lock();
        if state.committed_snapshots.contains_key(name) {
            state.active_snapshots.remove(tmp_key);
            return Ok(());
        }
        let parent = state
            .active_snapshots
            .remove(tmp_key)
            .ok_or_else(|| RuntimeError::NotFound(format!("snapshot {tmp_key}")))?;
        state.committed_snapshots.insert(name.to_string(), parent);
        Ok(())
    }

    async fn remove_snapshot(&self, key: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveSnapshot { key: key.to_string() });
        let mut state = self.state.lock();
        state.active_snapshots.remove(key);
        state.committed_snapshots.remove(key);
        Ok(())
    }

    async fn list_snapshots(&self) -> Result<Vec<String>, RuntimeError> {
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .active_snapshots
            .keys()
            .chain(state.committed_snapshots.keys())
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn create_image(
        &self,
        name: &str,
        manifest_digest: &str,
        manifest_size: u64,
    ) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::CreateImage { name: name.to_string() });
        let mut state = self.state.lock();
        if state.images.contains_key(name) {
            return Err(RuntimeError::AlreadyExists(name.to_string()));
        }
        state.images.insert(name.to_string(), (manifest_digest.to_string(), manifest_size));
        Ok(())
    }

    async fn update_image(
        &self,
        name: &str,
        manifest_digest: &str,
        manifest_size: u64,
    ) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::UpdateImage { name: name.to_string() });
        let mut state = self.state.lock();
        if !state.images.contains_key(name) {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        state.images.insert(name.to_string(), (manifest_digest.to_string(), manifest_size));
        Ok(())
    }

    async fn delete_image(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::DeleteImage { name: name.to_string() });
        self.state
            .lock()
            .images
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn create_container(&self, record: &ContainerRecord) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::CreateContainer { app_name: record.app_name.clone() });
        let mut state = self.state.lock();
        if state.containers.contains_key(&record.app_name) {
            return Err(RuntimeError::AlreadyExists(record.app_name.clone()));
        }
        state.containers.insert(record.app_name.clone(), record.clone());
        Ok(())
    }

    async fn update_container(&self, record: &ContainerRecord) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::UpdateContainer { app_name: record.app_name.clone() });
        let mut state = self.state.lock();
        if !state.containers.contains_key(&record.app_name) {
            return Err(RuntimeError::NotFound(record.app_name.clone()));
        }
        state.containers.insert(record.app_name.clone(), record.clone());
        Ok(())
    }

    async fn delete_container(&self, app_name: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::DeleteContainer { app_name: app_name.to_string() });
        self.state
            .lock()
            .containers
            .remove(app_name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(app_name.to_string()))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let state = self.state.lock();
        let mut out: Vec<ContainerSummary> = state
            .containers
            .values()
            .map(|r| ContainerSummary {
                app_name: r.app_name.clone(),
                image_name: r.image_name.clone(),
                snapshot_key: r.snapshot_key.clone(),
                labels: r.labels.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.app_name.cmp(&b.app_name));
        Ok(out)
    }

    async fn create_task(
        &self,
        container_id: &str,
        _mounts: &[SnapshotMount],
        _stdout: Option<&Path>,
        _stderr: Option<&Path>,
    ) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::CreateTask { app_name: container_id.to_string() });
        let mut state = self.state.lock();
        if !state.containers.contains_key(container_id) {
            return Err(RuntimeError::NotFound(format!("container {container_id}")));
        }
        match state.tasks.get(container_id) {
            Some(TaskState::Created) | Some(TaskState::Running) => {
                return Err(RuntimeError::AlreadyExists(format!("task {container_id}")));
            }
            _ => {}
        }
        state.tasks.insert(container_id.to_string(), TaskState::Created);
        Ok(())
    }

    async fn start_task(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::StartTask { app_name: container_id.to_string() });
        let mut state = self.state.lock();
        match state.tasks.get(container_id) {
            Some(TaskState::Created) => {
                state.tasks.insert(container_id.to_string(), TaskState::Running);
                Ok(())
            }
            Some(other) => Err(RuntimeError::Rpc(format!("task is {other:?}, not created"))),
            None => Err(RuntimeError::NotFound(format!("task {container_id}"))),
        }
    }

    async fn kill_task(&self, container_id: &str, signal: u32) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::KillTask {
            app_name: container_id.to_string(),
            signal,
        });
        let mut state = self.state.lock();
        match state.tasks.get(container_id) {
            Some(TaskState::Running) | Some(TaskState::Created) => {
                state
                    .tasks
                    .insert(container_id.to_string(), TaskState::Exited { code: 137, at_ms: 0 });
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(format!("task {container_id}"))),
        }
    }

    async fn delete_task(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::DeleteTask { app_name: container_id.to_string() });
        let mut state = self.state.lock();
        match state.tasks.get(container_id) {
            Some(TaskState::Running) => {
                Err(RuntimeError::Rpc(format!("task {container_id} still running")))
            }
            Some(_) => {
                state.tasks.remove(container_id);
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!("task {container_id}"))),
        }
    }

    async fn list_tasks(&self) -> Result<Vec<TaskInfo>, RuntimeError> {
        let state = self.state.lock();
        let mut out: Vec<TaskInfo> = state
            .tasks
            .iter()
            .map(|(app, task_state)| TaskInfo { app_name: app.clone(), state: *task_state })
            .collect();
        out.sort_by(|a, b| a.app_name.cmp(&b.app_name));
        Ok(out)
    }

    async fn subscribe_task_exits(&self) -> Result<mpsc::Receiver<TaskExit>, RuntimeError> {
        let (tx, rx) = mpsc::channel(64);
        self.state.lock().exit_subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
