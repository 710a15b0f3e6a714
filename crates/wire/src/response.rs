// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use serde::{Deserialize, Serialize};
use wendy_core::ErrorKind;

/// Response (or streamed event) from the agent daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    Pong,

    Hello { version: String },

    Ok,

    AgentVersion { version: String },

    Provisioned { cloud_host: String, organization_id: u64, asset_id: u64 },

    NotProvisioned,

    Layers { layers: Vec<LayerHeader> },

    Containers { containers: Vec<ContainerInfo> },

    /// The task was created and started
    Started { debug_port: u16 },

    /// The supervised task exited and the restart policy declined to
    /// restart it
    Stopped,

    ShuttingDown,

    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error { kind, message: message.into() }
    }
}

/// Digest-only view of one stored layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerHeader {
    pub digest: String,
    pub size: u64,
}

/// One row of `ListContainers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerInfo {
    pub app_name: String,
    pub app_version: String,
    /// `running` or `stopped` (stopped covers absent and exited)
    pub running_state: String,
    pub failure_count: u32,
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
