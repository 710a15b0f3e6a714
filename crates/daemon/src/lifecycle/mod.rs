// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Container lifecycle management: snapshot chains, image records,
//! container/task creation, stop/delete, restart bookkeeping.
//!
//! One manager owns all per-app state. A lock keyed by app name
//! serializes `run`, `stop`, `delete`, and supervisor restarts for that
//! app; there is no global lock.

mod run;

pub use run::{RunRequest, Started};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use wendy_core::app_config::AppConfigError;
use wendy_core::{Clock, ContainerRecord, ErrorKind, RestartDecision, RestartPolicy, TaskState};
use wendy_oci::CompileError;
use wendy_runtime::{RuntimeAdapter, RuntimeError, TaskExit};

use crate::attach::AttachScope;

/// Debug server port reported when a container runs with `debug`.
pub const DEBUG_PORT: u16 = 4242;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("image name must not be empty")]
    EmptyImageName,

    #[error("app name must not be empty")]
    EmptyAppName,

    #[error("app config does not parse: {0}")]
    BadConfig(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidConfig(#[from] AppConfigError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("a task for {0} is still running")]
    TaskRunning(String),

    #[error("no container named {0}")]
    UnknownApp(String),

    #[error("task start timed out")]
    StartTimeout,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::EmptyImageName
            | LifecycleError::EmptyAppName
            | LifecycleError::BadConfig(_) => ErrorKind::InvalidArgument,
            LifecycleError::InvalidConfig(e) => e.kind(),
            LifecycleError::Compile(e) => e.kind(),
            LifecycleError::TaskRunning(_) => ErrorKind::FailedPrecondition,
            LifecycleError::UnknownApp(_) => ErrorKind::NotFound,
            LifecycleError::StartTimeout => ErrorKind::Internal,
            LifecycleError::Runtime(e) => e.kind(),
        }
    }
}

/// Lifecycle events published to attached protocol streams. Delivery is
/// causally ordered per app name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Started { app_name: String, debug_port: u16 },
    Stopped { app_name: String },
}

/// One row of `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStatus {
    pub app_name: String,
    pub app_version: String,
    pub running_state: &'static str,
    pub failure_count: u32,
}

/// Manager configuration, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub cgroup_slice: String,
    pub debug_server: PathBuf,
    pub run_dir: PathBuf,
    pub task_start_timeout: Duration,
}

/// Per-app supervision state.
struct AppState {
    policy: RestartPolicy,
    snapshot_key: String,
    failure_count: u32,
    /// Set by a manual stop; cleared by the next `run`.
    suppressed: bool,
    last_exit_ms: u64,
    attach: Option<AttachScope>,
}

pub struct ContainerManager<R, C> {
    runtime: Arc<R>,
    clock: C,
    config: ManagerConfig,
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    apps: parking_lot::Mutex<HashMap<String, AppState>>,
    events: broadcast::Sender<AppEvent>,
}

impl<R: RuntimeAdapter, C: Clock> ContainerManager<R, C> {
    pub fn new(runtime: Arc<R>, clock: C, config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            runtime,
            clock,
            config,
            locks: parking_lot::Mutex::new(HashMap::new()),
            apps: parking_lot::Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: AppEvent) {
        // A send only fails when nobody is attached, which is fine.
        let _ = self.events.send(event);
    }

    /// The lock serializing operations for one app.
    fn app_lock(&self, app_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(app_name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Kill the task of a running app. Container and snapshots stay; a
    /// subsequent `run` reuses them. Clears the failure counter and
    /// suppresses restarts until the next `run`.
    pub async fn stop(&self, app_name: &str, signal: u32) -> Result<(), LifecycleError> {
        let lock = self.app_lock(app_name);
        let _guard = lock.lock().await;

        let known = {
            let apps = self.apps.lock();
            apps.contains_key(app_name)
        };
        if !known {
            let containers = self.runtime.list_containers().await?;
            if !containers.iter().any(|c| c.app_name == app_name) {
                return Err(LifecycleError::UnknownApp(app_name.to_string()));
            }
        }

        // Suppress before the kill so the exit event cannot race a restart.
        {
            let mut apps = self.apps.lock();
            if let Some(state) = apps.get_mut(app_name) {
                state.suppressed = true;
                state.failure_count = 0;
            }
        }

        match self.runtime.kill_task(app_name, signal).await {
            Ok(()) => info!(app = app_name, signal, "task stopped"),
            Err(e) if matches!(e, RuntimeError::NotFound(_)) => {
                debug!(app = app_name, "stop with no task; nothing to kill");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Remove an app entirely: task, container, image record, and every
    /// snapshot rooted at `<app>-`. Idempotent; safe to retry after
    /// cancellation.
    pub async fn delete(&self, app_name: &str) -> Result<(), LifecycleError> {
        let lock = self.app_lock(app_name);
        let _guard = lock.lock().await;

        // Suppress restarts for the teardown window.
        {
            let mut apps = self.apps.lock();
            if let Some(state) = apps.get_mut(app_name) {
                state.suppressed = true;
            }
        }

        let tasks = self.runtime.list_tasks().await?;
        if tasks
            .iter()
            .any(|t| t.app_name == app_name && t.state.is_running())
        {
            if let Err(e) = self.runtime.kill_task(app_name, 9).await {
                warn!(app = app_name, error = %e, "kill during delete failed");
            }
        }
        if let Err(e) = self.runtime.delete_task(app_name).await {
            if !matches!(e, RuntimeError::NotFound(_)) {
                warn!(app = app_name, error = %e, "task delete failed, continuing");
            }
        }

        let image_name = {
            let containers = self.runtime.list_containers().await?;
            containers
                .iter()
                .find(|c| c.app_name == app_name)
                .map(|c| c.image_name.clone())
        };
        if let Err(e) = self.runtime.delete_container(app_name).await {
            if !matches!(e, RuntimeError::NotFound(_)) {
                return Err(e.into());
            }
        }
        if let Some(image_name) = image_name {
            if let Err(e) = self.runtime.delete_image(&image_name).await {
                if !matches!(e, RuntimeError::NotFound(_)) {
                    return Err(e.into());
                }
            }
        }

        let prefix = format!("{app_name}-");
        for key in self.runtime.list_snapshots().await? {
            let owned = key
                .strip_prefix(&prefix)
                .is_some_and(|rest| {
                    rest == "rw" || rest.starts_with("sha256:") || rest.starts_with("tmp-")
                });
            if owned {
                self.runtime.remove_snapshot(&key).await?;
            }
        }

        // Dropping the state unlinks any attach FIFOs.
        self.apps.lock().remove(app_name);
        info!(app = app_name, "app deleted");
        Ok(())
    }

    /// Containers with their observable running state.
    pub async fn list(&self) -> Result<Vec<AppStatus>, LifecycleError> {
        let containers = self.runtime.list_containers().await?;
        let tasks = self.runtime.list_tasks().await?;
        let task_states: HashMap<&str, TaskState> =
            tasks.iter().map(|t| (t.app_name.as_str(), t.state)).collect();

        let apps = self.apps.lock();
        Ok(containers
            .into_iter()
            .map(|c| {
                let state = task_states.get(c.app_name.as_str()).copied().unwrap_or(TaskState::Absent);
                AppStatus {
                    app_version: c
                        .labels
                        .get(wendy_core::container::labels::APP_VERSION)
                        .cloned()
                        .unwrap_or_default(),
                    failure_count: apps.get(&c.app_name).map(|s| s.failure_count).unwrap_or(0),
                    running_state: state.running_state(),
                    app_name: c.app_name,
                }
            })
            .collect())
    }

    /// Rebuild the supervision table from the runtime after a daemon
    /// restart. Restart policies come back from container labels.
    pub async fn rehydrate(&self) -> Result<(), LifecycleError> {
        let containers = self.runtime.list_containers().await?;
        let mut apps = self.apps.lock();
        for summary in containers {
            if apps.contains_key(&summary.app_name) {
                continue;
            }
            let policy =
                ContainerRecord::policy_from_labels(&summary.labels).unwrap_or_default();
            debug!(app = %summary.app_name, %policy, "rehydrated supervision state");
            apps.insert(
                summary.app_name.clone(),
                AppState {
                    policy,
                    snapshot_key: summary.snapshot_key,
                    failure_count: 0,
                    suppressed: false,
                    last_exit_ms: 0,
                    attach: None,
                },
            );
        }
        Ok(())
    }

    /// Apply the restart policy to an observed task exit.
    pub async fn handle_exit(&self, exit: TaskExit) {
        let lock = self.app_lock(&exit.app_name);
        let _guard = lock.lock().await;

        let at_ms = if exit.at_ms != 0 { exit.at_ms } else { self.clock.epoch_ms() };
        let (decision, since_last_ms) = {
            let mut apps = self.apps.lock();
            let Some(state) = apps.get_mut(&exit.app_name) else {
                debug!(app = %exit.app_name, "exit for unmanaged app, ignoring");
                return;
            };
            let since_last_ms = at_ms.saturating_sub(state.last_exit_ms);
            state.last_exit_ms = at_ms;
            if state.suppressed {
                debug!(app = %exit.app_name, "exit after manual stop, not restarting");
                return;
            }
            let decision = state.policy.decide(exit.code, state.failure_count);
            if decision == RestartDecision::Restart && exit.code != 0 {
                state.failure_count += 1;
            }
            (decision, since_last_ms)
        };

        match decision {
            RestartDecision::GiveUp => {
                info!(app = %exit.app_name, code = exit.code, since_last_ms, "task exited, policy gives up");
                self.publish(AppEvent::Stopped { app_name: exit.app_name.clone() });
            }
            RestartDecision::Restart => {
                info!(app = %exit.app_name, code = exit.code, since_last_ms, "task exited, restarting");
                if let Err(e) = self.restart_task(&exit.app_name).await {
                    warn!(app = %exit.app_name, error = %e, "restart failed");
                    self.publish(AppEvent::Stopped { app_name: exit.app_name.clone() });
                }
            }
        }
    }

    /// Re-create and start the task for an app whose snapshot and
    /// container already exist. Caller holds the app lock.
    async fn restart_task(&self, app_name: &str) -> Result<(), LifecycleError> {
        let snapshot_key = {
            let apps = self.apps.lock();
            apps.get(app_name)
                .map(|s| s.snapshot_key.clone())
                .ok_or_else(|| LifecycleError::UnknownApp(app_name.to_string()))?
        };

        if let Err(e) = self.runtime.delete_task(app_name).await {
            if !matches!(e, RuntimeError::NotFound(_)) {
                return Err(e.into());
            }
        }

        let mounts = self.runtime.snapshot_mounts(&snapshot_key).await?;
        let mut attach = match AttachScope::create(&self.config.run_dir, app_name) {
            Ok(scope) => Some(scope),
            Err(e) => {
                warn!(app = app_name, error = %e, "attach fifos unavailable, task runs detached");
                None
            }
        };
        if let Some(scope) = attach.as_mut() {
            scope.ready().await;
        }
        let (stdout, stderr) = match attach.as_ref() {
            Some(scope) => (Some(scope.stdout()), Some(scope.stderr())),
            None => (None, None),
        };
        self.runtime.create_task(app_name, &mounts, stdout, stderr).await?;
        tokio::time::timeout(self.config.task_start_timeout, self.runtime.start_task(app_name))
            .await
            .map_err(|_| LifecycleError::StartTimeout)??;

        let mut apps = self.apps.lock();
        if let Some(state) = apps.get_mut(app_name) {
            state.attach = attach;
        }
        Ok(())
    }

    #[cfg(test)]
    fn failure_count(&self, app_name: &str) -> u32 {
        self.apps.lock().get(app_name).map(|s| s.failure_count).unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
