// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Restart policies and the supervisor's restart decision table.

use serde::{Deserialize, Serialize};

/// Restart policy attached to a container at create time.
///
/// The policy is immutable for the lifetime of one `run`; the supervisor
/// only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "policy")]
pub enum RestartPolicy {
    Default,
    No,
    UnlessStopped,
    OnFailure { max_retries: u32 },
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Default
    }
}

crate::simple_display! {
    RestartPolicy {
        Default => "default",
        No => "no",
        UnlessStopped => "unless-stopped",
        OnFailure { .. } => "on-failure",
    }
}

/// What the supervisor does after observing a task exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    /// Leave the task stopped and report `Stopped` to any attached client.
    GiveUp,
}

impl RestartPolicy {
    /// Decide whether a task that exited with `code` restarts.
    ///
    /// `failures` is the cumulative count of failure restarts already
    /// performed since the last successful `run`, i.e. the count *before*
    /// the exit being decided. The caller increments it when a non-zero
    /// exit leads to a restart, which caps the count at `max_retries`.
    pub fn decide(&self, code: u32, failures: u32) -> RestartDecision {
        match self {
            RestartPolicy::Default | RestartPolicy::UnlessStopped => RestartDecision::Restart,
            RestartPolicy::No => RestartDecision::GiveUp,
            RestartPolicy::OnFailure { max_retries } => {
                if code == 0 || failures >= *max_retries {
                    RestartDecision::GiveUp
                } else {
                    RestartDecision::Restart
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod tests;
