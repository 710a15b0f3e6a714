// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Client-visible error classification.

use serde::{Deserialize, Serialize};

/// The error taxonomy observed by RPC clients.
///
/// Every daemon-side error maps onto one of these kinds before it crosses
/// the wire; the paired human message carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed frame, empty digest/chunk, bad app config
    InvalidArgument,
    /// Operation valid but not in this state (e.g. run while task running)
    FailedPrecondition,
    /// Re-provisioning attempt on an enrolled agent
    PermissionDenied,
    /// Unknown app name for stop/delete
    NotFound,
    /// Cloud-side certificate issuance failure
    Aborted,
    /// Runtime RPC failure or other agent-side fault
    Internal,
}

crate::simple_display! {
    ErrorKind {
        InvalidArgument => "invalid_argument",
        FailedPrecondition => "failed_precondition",
        PermissionDenied => "permission_denied",
        NotFound => "not_found",
        Aborted => "aborted",
        Internal => "internal",
    }
}
