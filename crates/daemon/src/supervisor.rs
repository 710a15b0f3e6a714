// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Background reconciler: observes task exits and applies restart policy.
//!
//! One supervisor task runs per process. On startup it rehydrates the
//! supervision table from the runtime (policies come back from container
//! labels), then consumes the exit event subscription. Restarts happen
//! under the same per-app lock as `run`/`stop`/`delete`, so the sequence
//! `run start → exit → restart` is strictly ordered within one app.
//!
//! Graceful shutdown leaves running tasks alive; they outlive the agent.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wendy_core::Clock;
use wendy_runtime::{RuntimeAdapter, RuntimeError};

use crate::lifecycle::{ContainerManager, LifecycleError};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Run the supervisor until `shutdown` fires.
pub async fn run<R: RuntimeAdapter, C: Clock>(
    manager: Arc<ContainerManager<R, C>>,
    shutdown: CancellationToken,
) -> Result<(), SupervisorError> {
    manager.rehydrate().await?;
    let mut exits = manager.runtime().subscribe_task_exits().await?;
    info!("supervisor running");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("supervisor shutting down; tasks stay running");
                return Ok(());
            }
            event = exits.recv() => match event {
                Some(exit) => manager.handle_exit(exit).await,
                None => {
                    warn!("task exit subscription ended");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
