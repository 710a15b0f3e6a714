// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use serde::{Deserialize, Serialize};
use wendy_core::RestartPolicy;

/// Frames the client sends after a connection-upgrading request.
///
/// `WriteLayer` streams are `Chunk* Commit`; `RunContainerStream` is
/// `Header Chunk* Control`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// First frame of the docker-save path
    Header {
        image_name: String,
        #[serde(with = "crate::b64")]
        app_config: Vec<u8>,
    },

    /// Payload bytes; must be non-empty
    Chunk {
        #[serde(with = "crate::b64")]
        data: Vec<u8>,
    },

    /// Commit marker ending a `WriteLayer` stream
    Commit,

    /// Last frame of the docker-save path
    Control { command: StreamCommand },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum StreamCommand {
    Run {
        #[serde(default)]
        debug: bool,
        #[serde(default)]
        restart_policy: RestartPolicy,
    },
    Stop,
}
