// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! The `run` operation: snapshot chain, image record, container, task.

use wendy_core::{AppConfig, Clock, ContainerRecord, ImageRecord, LayerDescriptor, RestartPolicy};
use wendy_oci::{CgroupPolicy, CompileInput};
use wendy_runtime::{RuntimeAdapter, RuntimeError};

use tracing::{debug, info, warn};

use super::{AppEvent, AppState, ContainerManager, LifecycleError, DEBUG_PORT};
use crate::attach::AttachScope;

/// Everything `run` needs, already parsed off the wire.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub image_name: String,
    pub app_name: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub layers: Vec<LayerDescriptor>,
    pub app_config: Vec<u8>,
    pub debug: bool,
    pub restart_policy: RestartPolicy,
}

/// Successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    pub debug_port: u16,
}

impl<R: RuntimeAdapter, C: Clock> ContainerManager<R, C> {
    /// Run a container from content-addressed layers.
    ///
    /// Re-running an existing app reuses committed snapshots (commit
    /// tolerates already-exists) and updates the image and container
    /// records in place. A still-running task aborts the operation.
    pub async fn run(&self, request: RunRequest) -> Result<Started, LifecycleError> {
        if request.image_name.is_empty() {
            return Err(LifecycleError::EmptyImageName);
        }
        if request.app_name.is_empty() {
            return Err(LifecycleError::EmptyAppName);
        }
        let config = AppConfig::from_bytes(&request.app_config)?;
        config.validate()?;

        let lock = self.app_lock(&request.app_name);
        let _guard = lock.lock().await;

        // 1. Commit one snapshot per layer, parented on the previous one.
        let app = &request.app_name;
        let mut parent: Option<String> = None;
        for layer in &request.layers {
            let name = layer.snapshot_key(app);
            let tmp = format!("{app}-tmp-{}", uuid::Uuid::new_v4());
            let mounts = self.runtime.prepare_snapshot(&tmp, parent.as_deref()).await?;
            self.runtime
                .apply_diff(&layer.digest, layer.size, layer.media_type(), &mounts)
                .await?;
            self.runtime.commit_snapshot(&tmp, &name).await?;
            debug!(app, layer = %layer.digest, snapshot = %name, "layer snapshot committed");
            parent = Some(name);
        }

        // 2. Ephemeral read-write snapshot on top of the chain.
        let rw_key = format!("{app}-rw");
        let mounts = match self.runtime.prepare_snapshot(&rw_key, parent.as_deref()).await {
            Ok(mounts) => mounts,
            Err(e) if e.is_already_exists() => self.runtime.snapshot_mounts(&rw_key).await?,
            Err(e) => return Err(e.into()),
        };

        // 3. Canonical manifest into the content store.
        let manifest = ImageRecord::manifest_json(&request.layers);
        let (manifest_digest, manifest_size) = self.runtime.upload_json(&manifest).await?;

        // 4. Image record pointing at the manifest.
        match self
            .runtime
            .create_image(&request.image_name, &manifest_digest, manifest_size)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                self.runtime
                    .update_image(&request.image_name, &manifest_digest, manifest_size)
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        // 5. Compile the entitlements into an OCI spec.
        let args = if request.cmd.is_empty() {
            vec![format!("/bin/{}", request.image_name)]
        } else {
            request.cmd.clone()
        };
        let spec = wendy_oci::compile(
            &config,
            CompileInput {
                app_name: app,
                args,
                env: request.env.clone(),
                working_dir: request.working_dir.clone(),
                cgroup: CgroupPolicy { slice: self.config.cgroup_slice.clone() },
                debug_server: request.debug.then(|| self.config.debug_server.clone()),
            },
        )?;
        let oci_spec = serde_json::to_value(&spec)?;

        // 6. Container record (create, or update on re-run).
        let record = ContainerRecord {
            app_name: app.clone(),
            image_name: request.image_name.clone(),
            snapshot_key: rw_key.clone(),
            oci_spec,
            labels: ContainerRecord::standard_labels(
                &config.app_id,
                &config.version,
                &request.restart_policy,
            ),
            restart_policy: request.restart_policy,
            debug: request.debug,
        };
        match self.runtime.create_container(&record).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => self.runtime.update_container(&record).await?,
            Err(e) => return Err(e.into()),
        }

        // 7. A running task blocks the run; an exited one is replaced.
        let tasks = self.runtime.list_tasks().await?;
        if let Some(task) = tasks.iter().find(|t| t.app_name == *app) {
            if task.state.is_running() {
                return Err(LifecycleError::TaskRunning(app.clone()));
            }
            if let Err(e) = self.runtime.delete_task(app).await {
                if !matches!(e, RuntimeError::NotFound(_)) {
                    return Err(e.into());
                }
            }
        }

        // 8. Task with attach FIFOs, then start.
        let mut attach = match AttachScope::create(&self.config.run_dir, app) {
            Ok(scope) => Some(scope),
            Err(e) => {
                warn!(app, error = %e, "attach fifos unavailable, task runs detached");
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
        self.runtime.create_task(app, &mounts, stdout, stderr).await?;
        tokio::time::timeout(self.config.task_start_timeout, self.runtime.start_task(app))
            .await
            .map_err(|_| LifecycleError::StartTimeout)??;

        // 9. Fresh supervision state; a successful run resets failures.
        {
            let mut apps = self.apps.lock();
            apps.insert(
                app.clone(),
                AppState {
                    policy: request.restart_policy,
                    snapshot_key: rw_key,
                    failure_count: 0,
                    suppressed: false,
                    last_exit_ms: 0,
                    attach,
                },
            );
        }

        let debug_port = if request.debug { DEBUG_PORT } else { 0 };
        info!(app, image = %request.image_name, debug_port, "container started");
        self.publish(AppEvent::Started { app_name: app.clone(), debug_port });
        Ok(Started { debug_port })
    }
}
