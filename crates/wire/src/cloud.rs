// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Wire contract of the cloud certificate service the agent consumes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CloudRequest {
    IssueCertificate { pem_csr: String, enrollment_token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CloudResponse {
    Certificate {
        pem_certificate: String,
        /// Intermediates up to the organization root
        pem_certificate_chain: Vec<String>,
    },
    Error {
        message: String,
    },
}
