// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Wire protocol between the CLI, the agent daemon, and the cloud.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload. A
//! connection carries one request and its response; streaming requests
//! (`WriteLayer`, `RunContainerStream`, attached `RunContainer`) upgrade
//! the connection and continue exchanging frames in the same format.

pub mod b64;
mod cloud;
mod frame;
mod request;
mod response;
mod stream;

pub use cloud::{CloudRequest, CloudResponse};
pub use frame::{read_message, write_message, ProtocolError, MAX_FRAME_BYTES};
pub use request::{Request, RunSpec};
pub use response::{ContainerInfo, LayerHeader, Response};
pub use stream::{ClientFrame, StreamCommand};

/// Protocol version exchanged in the Hello handshake.
pub const PROTOCOL_VERSION: &str = "1";

/// Default port of the cloud certificate service.
pub const CLOUD_PORT: u16 = 50051;
