// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wendy-core: domain types shared by the wendy agent crates.

pub mod macros;

pub mod app_config;
pub mod clock;
pub mod container;
pub mod error;
pub mod identity;
pub mod image;
pub mod layer;
pub mod restart;

pub use app_config::{AppConfig, BluetoothMode, Entitlement, NetworkMode};
#[cfg(any(test, feature = "test-support"))]
pub use clock::FakeClock;
pub use clock::{Clock, SystemClock};
pub use container::{labels, ContainerRecord, TaskState};
pub use error::ErrorKind;
pub use identity::{AgentIdentity, Enrolled};
pub use image::ImageRecord;
pub use layer::LayerDescriptor;
pub use restart::{RestartDecision, RestartPolicy};
