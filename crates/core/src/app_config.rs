// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Application manifest supplied by the CLI alongside an image.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

/// The application-supplied manifest.
///
/// Entitlements are an ordered set: application order is preserved and at
/// most one instance of each variant tag may be declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Reverse-DNS application identifier (e.g. `sh.wendy.camera-demo`)
    pub app_id: String,
    /// Application version (semver-ish)
    pub version: String,
    /// Declarative permission grants, compiled into the OCI spec
    #[serde(default)]
    pub entitlements: Vec<Entitlement>,
}

/// A declarative grant the compiler translates into OCI permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entitlement {
    Network { mode: NetworkMode },
    Bluetooth { mode: BluetoothMode },
    Video,
    Audio,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Host,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BluetoothMode {
    /// Raw HCI access via in-kernel sockets
    Kernel,
    /// BlueZ D-Bus access (reserved, currently a no-op)
    Bluez,
}

impl Entitlement {
    /// The variant tag, used for duplicate detection.
    fn tag(&self) -> &'static str {
        match self {
            Entitlement::Network { .. } => "network",
            Entitlement::Bluetooth { .. } => "bluetooth",
            Entitlement::Video => "video",
            Entitlement::Audio => "audio",
            Entitlement::Gpu => "gpu",
        }
    }
}

/// Validation failures for an [`AppConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppConfigError {
    #[error("appId must not be empty")]
    EmptyAppId,

    #[error("duplicate entitlement: {0}")]
    DuplicateEntitlement(&'static str),

    #[error("bluetooth kernel mode requires network access; network mode is none")]
    BluetoothWithoutNetwork,
}

impl AppConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

impl AppConfig {
    /// Parse an `AppConfig` from the raw bytes carried on the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Check the declared entitlement set against the manifest invariants.
    ///
    /// At most one instance per variant tag, and `bluetooth { kernel }` is
    /// rejected in the presence of `network { none }` because kernel HCI
    /// sockets live in the host network namespace.
    pub fn validate(&self) -> Result<(), AppConfigError> {
        if self.app_id.is_empty() {
            return Err(AppConfigError::EmptyAppId);
        }

        let mut seen: Vec<&'static str> = Vec::new();
        for ent in &self.entitlements {
            let tag = ent.tag();
            if seen.contains(&tag) {
                return Err(AppConfigError::DuplicateEntitlement(tag));
            }
            seen.push(tag);
        }

        let network_none = self
            .entitlements
            .iter()
            .any(|e| matches!(e, Entitlement::Network { mode: NetworkMode::None }));
        let bluetooth_kernel = self
            .entitlements
            .iter()
            .any(|e| matches!(e, Entitlement::Bluetooth { mode: BluetoothMode::Kernel }));
        if network_none && bluetooth_kernel {
            return Err(AppConfigError::BluetoothWithoutNetwork);
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "app_config_tests.rs"]
mod tests;
