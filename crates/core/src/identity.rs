// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Durable agent identity.

use serde::{Deserialize, Serialize};

/// Process-wide agent identity.
///
/// Created on first start, persisted as a single JSON file. The private
/// key never changes after the first write; `enrolled` is set exactly once
/// by the provisioning state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    /// PEM-encoded signing key
    pub private_key_pem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled: Option<Enrolled>,
}

/// Evidence of enrollment with a cloud control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrolled {
    pub cloud_host: String,
    pub organization_id: u64,
    pub asset_id: u64,
    /// Leaf certificate first, then intermediates
    pub certificate_chain_pem: Vec<String>,
}

impl AgentIdentity {
    pub fn new(private_key_pem: String) -> Self {
        Self { private_key_pem, enrolled: None }
    }

    pub fn is_enrolled(&self) -> bool {
        self.enrolled.is_some()
    }
}
