// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Container records and observable task state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::restart::RestartPolicy;

/// Label keys the agent writes on every container it creates.
pub mod labels {
    /// Reverse-DNS app id from the `AppConfig`.
    pub const APP_ID: &str = "sh.wendy.app-id";
    /// App version from the `AppConfig`.
    pub const APP_VERSION: &str = "sh.wendy.app-version";
    /// JSON-encoded [`RestartPolicy`](crate::RestartPolicy), read back by the
    /// supervisor when it rehydrates after a restart.
    pub const RESTART_POLICY: &str = "sh.wendy.restart-policy";
}

/// Everything the runtime needs to create (or update) a container.
///
/// `app_name` is unique per node and is the stable supervision identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub app_name: String,
    pub image_name: String,
    pub snapshot_key: String,
    /// Compiled OCI runtime spec document
    pub oci_spec: serde_json::Value,
    pub labels: HashMap<String, String>,
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub debug: bool,
}

impl ContainerRecord {
    /// Standard labels for a container: app identity plus the restart policy.
    pub fn standard_labels(
        app_id: &str,
        version: &str,
        policy: &RestartPolicy,
    ) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(labels::APP_ID.to_string(), app_id.to_string());
        map.insert(labels::APP_VERSION.to_string(), version.to_string());
        if let Ok(encoded) = serde_json::to_string(policy) {
            map.insert(labels::RESTART_POLICY.to_string(), encoded);
        }
        map
    }

    /// Recover the restart policy from container labels, if present.
    pub fn policy_from_labels(labels_map: &HashMap<String, String>) -> Option<RestartPolicy> {
        labels_map.get(labels::RESTART_POLICY).and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Observable lifecycle state of the task backing a container.
///
/// Transitions: `Absent → Created → Running → Exited`, and back to
/// `Created` when the supervisor re-creates a task under a restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum TaskState {
    Absent,
    Created,
    Running,
    Exited { code: u32, at_ms: u64 },
}

impl TaskState {
    /// Whether a `run` for this app must be refused.
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }

    /// Client-facing running state; `stopped` covers both absent and exited.
    pub fn running_state(&self) -> &'static str {
        match self {
            TaskState::Running | TaskState::Created => "running",
            TaskState::Absent | TaskState::Exited { .. } => "stopped",
        }
    }
}

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
