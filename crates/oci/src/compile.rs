// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! The entitlement compiler: `AppConfig` → OCI runtime spec.

use std::path::PathBuf;

use thiserror::Error;
use wendy_core::app_config::AppConfigError;
use wendy_core::{AppConfig, BluetoothMode, Entitlement, ErrorKind, NetworkMode};

use crate::seccomp::{allow_all_seccomp, bluetooth_kernel_seccomp};
use crate::spec::{
    Capabilities, Device, DeviceCgroup, Linux, Mount, Namespace, Process, Resources, Root, Spec,
    User, OCI_VERSION,
};

const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Capabilities granted when an entitlement needs host device access.
const DEVICE_BUNDLE_CAPS: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FSETID",
    "CAP_FOWNER",
    "CAP_MKNOD",
    "CAP_NET_RAW",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETFCAP",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_SYS_CHROOT",
    "CAP_KILL",
    "CAP_AUDIT_WRITE",
    "CAP_SYS_PTRACE",
];

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid app config: {0}")]
    InvalidConfig(#[from] AppConfigError),
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

/// Cgroup placement policy.
///
/// The emitted path is `<slice>:<appName with '-' mapped to '_'>`; the
/// slice is host policy, not a hard requirement of the runtime.
#[derive(Debug, Clone)]
pub struct CgroupPolicy {
    pub slice: String,
}

impl Default for CgroupPolicy {
    fn default() -> Self {
        Self { slice: "system.slice:wendy-agent".to_string() }
    }
}

impl CgroupPolicy {
    fn path_for(&self, app_name: &str) -> String {
        format!("{}:{}", self.slice, app_name.replace('-', "_"))
    }
}

/// Everything the compiler needs besides the `AppConfig` itself.
#[derive(Debug, Clone)]
pub struct CompileInput<'a> {
    pub app_name: &'a str,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub cgroup: CgroupPolicy,
    /// Host path of the debug server bind-mounted at `/bin/ds2`
    pub debug_server: Option<PathBuf>,
}

/// Compile an application config into a complete OCI runtime spec.
///
/// Entitlements are applied in declaration order over the base spec; the
/// device capability bundle is applied at most once, before the first
/// per-device cgroup rule.
pub fn compile(config: &AppConfig, input: CompileInput<'_>) -> Result<Spec, CompileError> {
    config.validate()?;

    let mut env = input.env.clone();
    if !env.iter().any(|e| e.starts_with("PATH=")) {
        env.push(DEFAULT_PATH.to_string());
    }

    let mut spec = Spec {
        oci_version: OCI_VERSION.to_string(),
        process: Process {
            user: User { uid: 0, gid: 0 },
            args: input.args.clone(),
            env,
            cwd: input.working_dir.clone().unwrap_or_else(|| "/".to_string()),
            capabilities: Capabilities::uniform(&["CAP_SYS_PTRACE"]),
        },
        root: Root { path: "rootfs".to_string(), readonly: false },
        mounts: vec![
            Mount::new("/proc", "proc", "proc", &[]),
            Mount::new(
                "/dev/pts",
                "devpts",
                "devpts",
                &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"],
            ),
            Mount::new(
                "/dev/shm",
                "tmpfs",
                "shm",
                &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
            ),
            Mount::new("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        ],
        linux: Linux {
            namespaces: vec![
                Namespace::new("pid"),
                Namespace::new("ipc"),
                Namespace::new("uts"),
                Namespace::new("mount"),
            ],
            devices: vec![],
            resources: None,
            seccomp: Some(allow_all_seccomp()),
            cgroups_path: None,
        },
    };

    let mut device_bundle_applied = false;

    for entitlement in &config.entitlements {
        match entitlement {
            Entitlement::Network { mode: NetworkMode::Host } => {
                // Host networking is the base state; nothing to add.
            }
            Entitlement::Network { mode: NetworkMode::None } => {
                spec.linux.namespaces.push(Namespace::new("network"));
            }
            Entitlement::Bluetooth { mode: BluetoothMode::Bluez } => {
                // Reserved; BlueZ routing is not wired up yet.
            }
            Entitlement::Bluetooth { mode: BluetoothMode::Kernel } => {
                spec.process.capabilities.add("CAP_NET_ADMIN");
                spec.process.capabilities.add("CAP_NET_RAW");
                spec.linux.seccomp = Some(bluetooth_kernel_seccomp());
            }
            Entitlement::Video => {
                apply_device_bundle(&mut spec, &input, &mut device_bundle_applied);
                spec.linux.devices.push(Device {
                    path: "/dev/video0".to_string(),
                    device_type: "c".to_string(),
                    major: 81,
                    minor: 17,
                    file_mode: 0o666,
                    uid: 0,
                    gid: 0,
                });
                spec.mounts.push(Mount::new(
                    "/dev/video0",
                    "bind",
                    "/dev/video0",
                    &["rbind", "nosuid", "noexec"],
                ));
                push_device_rule(&mut spec, DeviceCgroup::allow_char(81, Some(17), "rw"));
            }
            Entitlement::Audio => {
                apply_device_bundle(&mut spec, &input, &mut device_bundle_applied);
                spec.mounts.push(Mount::new(
                    "/dev/snd",
                    "bind",
                    "/dev/snd",
                    &["rbind", "nosuid", "noexec"],
                ));
                push_device_rule(&mut spec, DeviceCgroup::allow_char(116, None, "rw"));
            }
            Entitlement::Gpu => {
                // Reserved.
            }
        }
    }

    if let Some(debug_server) = input.debug_server {
        spec.mounts.push(Mount::new(
            "/bin/ds2",
            "bind",
            &debug_server.to_string_lossy(),
            &["rbind", "ro", "nosuid", "nodev"],
        ));
    }

    Ok(spec)
}

/// Grant the device capability bundle once: extra capabilities, a
/// read-only cgroup mount, the cgroup namespace, the cgroup path, and a
/// seed `allow rwm` rule so the device controller exists before
/// per-device rules.
fn apply_device_bundle(spec: &mut Spec, input: &CompileInput<'_>, applied: &mut bool) {
    if *applied {
        return;
    }
    *applied = true;

    for cap in DEVICE_BUNDLE_CAPS {
        spec.process.capabilities.add(cap);
    }
    spec.mounts.push(Mount::new(
        "/sys/fs/cgroup",
        "cgroup",
        "cgroup",
        &["ro", "nosuid", "noexec", "nodev"],
    ));
    spec.linux.namespaces.push(Namespace::new("cgroup"));
    spec.linux.cgroups_path = Some(input.cgroup.path_for(input.app_name));
    push_device_rule(
        spec,
        DeviceCgroup {
            allow: true,
            device_type: Some("a".to_string()),
            major: None,
            minor: None,
            access: "rwm".to_string(),
        },
    );
}

fn push_device_rule(spec: &mut Spec, rule: DeviceCgroup) {
    spec.linux.resources.get_or_insert_with(|| Resources { devices: vec![] }).devices.push(rule);
}

#[cfg(test)]
#[path = "compile_tests.rs"]
mod tests;
