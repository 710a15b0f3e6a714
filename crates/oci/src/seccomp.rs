// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Seccomp filter construction.

use crate::spec::{Seccomp, Syscall, SyscallArg};

/// AF_BLUETOOTH socket domain.
const AF_BLUETOOTH: u64 = 31;
/// AF_NETLINK socket domain (HCI device enumeration).
const AF_NETLINK: u64 = 16;

/// The permissive default filter: allow everything.
pub fn allow_all_seccomp() -> Seccomp {
    Seccomp {
        default_action: "SCMP_ACT_ALLOW".to_string(),
        architectures: vec!["SCMP_ARCH_AARCH64".to_string()],
        syscalls: vec![],
    }
}

/// The restrictive filter installed for `bluetooth { kernel }`.
///
/// Default-denies with `SCMP_ACT_ERRNO` and allow-lists the socket,
/// polling, and core-runtime syscalls a BlueZ-free HCI stack needs.
/// `socket` is only permitted for the bluetooth and netlink domains.
pub fn bluetooth_kernel_seccomp() -> Seccomp {
    let allow = |names: &[&str]| Syscall {
        names: names.iter().map(|n| n.to_string()).collect(),
        action: "SCMP_ACT_ALLOW".to_string(),
        args: vec![],
    };

    let socket_domain = |value: u64| Syscall {
        names: vec!["socket".to_string()],
        action: "SCMP_ACT_ALLOW".to_string(),
        args: vec![SyscallArg { index: 0, value, op: "SCMP_CMP_EQ".to_string() }],
    };

    Seccomp {
        default_action: "SCMP_ACT_ERRNO".to_string(),
        architectures: vec![
            "SCMP_ARCH_X86_64".to_string(),
            "SCMP_ARCH_AARCH64".to_string(),
            "SCMP_ARCH_X86".to_string(),
            "SCMP_ARCH_ARM".to_string(),
        ],
        syscalls: vec![
            socket_domain(AF_BLUETOOTH),
            socket_domain(AF_NETLINK),
            allow(&[
                "bind",
                "connect",
                "getsockopt",
                "setsockopt",
                "ioctl",
                "sendmsg",
                "recvmsg",
                "sendto",
                "recvfrom",
            ]),
            allow(&["poll", "ppoll", "epoll_create1", "epoll_ctl", "epoll_wait"]),
            allow(&[
                "read",
                "write",
                "close",
                "futex",
                "nanosleep",
                "clock_gettime",
                "getrandom",
                "eventfd2",
                "timerfd_create",
                "timerfd_settime",
                "signalfd4",
                "mmap",
                "mprotect",
                "munmap",
            ]),
        ],
    }
}

#[cfg(test)]
#[path = "seccomp_tests.rs"]
mod tests;
