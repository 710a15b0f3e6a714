// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use serde::{Deserialize, Serialize};
use wendy_core::{LayerDescriptor, RestartPolicy};

/// Request from the CLI to the agent daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Version handshake
    Hello { version: String },

    /// Agent build version
    GetAgentVersion,

    /// Report the enrollment record, if any
    IsProvisioned,

    /// Enroll this device with a cloud control plane
    StartProvisioning {
        cloud_host: String,
        organization_id: u64,
        asset_id: u64,
        enrollment_token: String,
    },

    /// Layer headers currently present in the content store
    ListLayers,

    /// Upload one content-addressed layer.
    ///
    /// Upgrades the connection: the client follows with `Chunk` frames and
    /// a final `Commit` frame, then reads a single response.
    WriteLayer { digest: String },

    /// Containers known to the agent with their running state
    ListContainers,

    /// Kill the task of a running app; container and snapshots survive
    StopContainer {
        app_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<u32>,
    },

    /// Remove an app entirely: task, container, image record, snapshots
    DeleteContainer { app_name: String },

    /// Run a container from layers already present in the content store.
    ///
    /// When `detach` is false the connection stays open and the server
    /// streams `Started`/`Stopped` events until the supervisor gives up.
    RunContainer { spec: RunSpec },

    /// Run a container from a docker-save tar streamed over this
    /// connection (compatibility path).
    ///
    /// Upgrades the connection: `Header` frame, `Chunk` frames, then a
    /// `Control` frame.
    RunContainerStream,

    /// Request daemon shutdown; running tasks are left alive
    Shutdown,
}

/// Everything the unary run path needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSpec {
    pub image_name: String,
    pub app_name: String,
    /// Command; empty means `/bin/<imageName>`
    #[serde(default)]
    pub cmd: Vec<String>,
    /// KEY=VALUE pairs
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Layers in OCI manifest order, base first
    pub layers: Vec<LayerDescriptor>,
    /// Raw `AppConfig` JSON
    #[serde(with = "crate::b64")]
    pub app_config: Vec<u8>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Return after `Started` instead of streaming events
    #[serde(default)]
    pub detach: bool,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
