// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wendy-oci: OCI runtime spec document model and the entitlement
//! compiler that turns an [`AppConfig`](wendy_core::AppConfig) into a
//! complete runtime spec.

mod compile;
mod seccomp;
mod spec;

pub use compile::{compile, CgroupPolicy, CompileError, CompileInput};
pub use seccomp::{allow_all_seccomp, bluetooth_kernel_seccomp};
pub use spec::{
    Capabilities, Device, DeviceCgroup, Linux, Mount, Namespace, Process, Resources, Root,
    Seccomp, Spec, Syscall, SyscallArg, User, OCI_VERSION,
};
