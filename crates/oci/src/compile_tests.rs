// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use wendy_core::{AppConfig, BluetoothMode, Entitlement, NetworkMode};

use super::*;

fn config(entitlements: Vec<Entitlement>) -> AppConfig {
    AppConfig {
        app_id: "sh.wendy.demo".to_string(),
        version: "0.1.0".to_string(),
        entitlements,
    }
}

fn input(app_name: &'static str) -> CompileInput<'static> {
    CompileInput {
        app_name,
        args: vec!["/bin/demo".to_string()],
        env: vec![],
        working_dir: None,
        cgroup: CgroupPolicy::default(),
        debug_server: None,
    }
}

#[test]
fn base_spec_defaults() {
    let spec = compile(&config(vec![]), input("demo")).unwrap();

    assert_eq!(spec.oci_version, "1.0.3");
    assert_eq!(spec.root.path, "rootfs");
    assert_eq!(spec.process.user.uid, 0);
    assert_eq!(spec.process.cwd, "/");
    assert!(spec.process.env.iter().any(|e| e.starts_with("PATH=")));

    let destinations: Vec<&str> =
        spec.mounts.iter().map(|m| m.destination.as_str()).collect();
    assert_eq!(destinations, vec!["/proc", "/dev/pts", "/dev/shm", "/dev/mqueue"]);

    let namespaces: Vec<&str> =
        spec.linux.namespaces.iter().map(|n| n.ns_type.as_str()).collect();
    assert_eq!(namespaces, vec!["pid", "ipc", "uts", "mount"]);

    assert_eq!(spec.process.capabilities.bounding, vec!["CAP_SYS_PTRACE"]);
    assert_eq!(spec.process.capabilities.effective, vec!["CAP_SYS_PTRACE"]);

    let seccomp = spec.linux.seccomp.unwrap();
    assert_eq!(seccomp.default_action, "SCMP_ACT_ALLOW");
    assert!(spec.linux.cgroups_path.is_none());
    assert!(spec.linux.resources.is_none());
}

#[test]
fn explicit_path_is_not_overridden() {
    let mut inp = input("demo");
    inp.env = vec!["PATH=/opt/bin".to_string()];
    let spec = compile(&config(vec![]), inp).unwrap();
    let paths: Vec<&String> =
        spec.process.env.iter().filter(|e| e.starts_with("PATH=")).collect();
    assert_eq!(paths, vec!["PATH=/opt/bin"]);
}

#[test]
fn network_none_adds_network_namespace() {
    let spec = compile(
        &config(vec![Entitlement::Network { mode: NetworkMode::None }]),
        input("demo"),
    )
    .unwrap();
    assert!(spec.linux.namespaces.iter().any(|n| n.ns_type == "network"));
}

#[test]
fn network_host_leaves_namespaces_untouched() {
    let spec = compile(
        &config(vec![Entitlement::Network { mode: NetworkMode::Host }]),
        input("demo"),
    )
    .unwrap();
    assert!(!spec.linux.namespaces.iter().any(|n| n.ns_type == "network"));
}

#[test]
fn bluetooth_kernel_grants_net_caps_and_swaps_seccomp() {
    let spec = compile(
        &config(vec![Entitlement::Bluetooth { mode: BluetoothMode::Kernel }]),
        input("demo"),
    )
    .unwrap();
    for set in [
        &spec.process.capabilities.bounding,
        &spec.process.capabilities.effective,
        &spec.process.capabilities.inheritable,
        &spec.process.capabilities.permitted,
    ] {
        assert!(set.iter().any(|c| c == "CAP_NET_ADMIN"));
        assert!(set.iter().any(|c| c == "CAP_NET_RAW"));
    }
    let seccomp = spec.linux.seccomp.unwrap();
    assert_eq!(seccomp.default_action, "SCMP_ACT_ERRNO");
}

#[test]
fn bluetooth_kernel_with_network_none_is_rejected() {
    let err = compile(
        &config(vec![
            Entitlement::Network { mode: NetworkMode::None },
            Entitlement::Bluetooth { mode: BluetoothMode::Kernel },
        ]),
        input("demo"),
    )
    .unwrap_err();
    assert_eq!(err.kind(), wendy_core::ErrorKind::InvalidArgument);
}

#[test]
fn video_adds_device_node_mount_and_cgroup_rule() {
    let spec = compile(&config(vec![Entitlement::Video]), input("demo")).unwrap();

    assert_eq!(spec.linux.devices.len(), 1);
    let device = &spec.linux.devices[0];
    assert_eq!(device.path, "/dev/video0");
    assert_eq!((device.major, device.minor), (81, 17));
    assert_eq!(device.file_mode, 0o666);

    assert!(spec
        .mounts
        .iter()
        .any(|m| m.destination == "/dev/video0" && m.mount_type == "bind"));

    let rules = &spec.linux.resources.as_ref().unwrap().devices;
    // Seed rule first so the controller exists before per-device rules.
    assert_eq!(rules[0].access, "rwm");
    assert!(rules[0].major.is_none());
    let video_rule = &rules[1];
    assert_eq!(video_rule.major, Some(81));
    assert_eq!(video_rule.minor, Some(17));
    assert_eq!(video_rule.access, "rw");
}

#[test]
fn audio_allows_all_snd_minors() {
    let spec = compile(&config(vec![Entitlement::Audio]), input("demo")).unwrap();
    assert!(spec.mounts.iter().any(|m| m.destination == "/dev/snd"));
    let rules = &spec.linux.resources.as_ref().unwrap().devices;
    let snd_rule = &rules[1];
    assert_eq!(snd_rule.major, Some(116));
    assert_eq!(snd_rule.minor, None);
}

#[test]
fn device_bundle_applied_once_for_video_and_audio() {
    let spec = compile(
        &config(vec![Entitlement::Video, Entitlement::Audio]),
        input("cam-mic"),
    )
    .unwrap();

    let cgroup_mounts =
        spec.mounts.iter().filter(|m| m.destination == "/sys/fs/cgroup").count();
    assert_eq!(cgroup_mounts, 1);

    let cgroup_namespaces =
        spec.linux.namespaces.iter().filter(|n| n.ns_type == "cgroup").count();
    assert_eq!(cgroup_namespaces, 1);

    // Hyphens in the app name map to underscores in the cgroup path.
    assert_eq!(
        spec.linux.cgroups_path.as_deref(),
        Some("system.slice:wendy-agent:cam_mic")
    );

    let rules = &spec.linux.resources.as_ref().unwrap().devices;
    let seeds = rules.iter().filter(|r| r.access == "rwm").count();
    assert_eq!(seeds, 1);
    assert_eq!(rules.len(), 3); // seed + video + audio

    // CAP_SYS_PTRACE from the base set is not duplicated by the bundle.
    let ptrace_count = spec
        .process
        .capabilities
        .bounding
        .iter()
        .filter(|c| *c == "CAP_SYS_PTRACE")
        .count();
    assert_eq!(ptrace_count, 1);
    assert!(spec.process.capabilities.bounding.iter().any(|c| c == "CAP_MKNOD"));
}

#[test]
fn gpu_and_bluez_are_reserved_no_ops() {
    let plain = compile(&config(vec![]), input("demo")).unwrap();
    let with_reserved = compile(
        &config(vec![
            Entitlement::Gpu,
            Entitlement::Bluetooth { mode: BluetoothMode::Bluez },
        ]),
        input("demo"),
    )
    .unwrap();
    assert_eq!(plain, with_reserved);
}

#[test]
fn debug_server_is_bind_mounted_at_bin_ds2() {
    let mut inp = input("demo");
    inp.debug_server = Some("/usr/lib/wendy-agent/ds2".into());
    let spec = compile(&config(vec![]), inp).unwrap();
    let mount = spec.mounts.iter().find(|m| m.destination == "/bin/ds2").unwrap();
    assert_eq!(mount.source, "/usr/lib/wendy-agent/ds2");
    assert!(mount.options.iter().any(|o| o == "ro"));
}

#[test]
fn spec_serializes_with_camel_case_keys() {
    let spec = compile(&config(vec![Entitlement::Video]), input("demo")).unwrap();
    let json = serde_json::to_value(&spec).unwrap();
    assert_eq!(json["ociVersion"], "1.0.3");
    assert!(json["linux"]["cgroupsPath"].is_string());
    assert_eq!(json["linux"]["seccomp"]["defaultAction"], "SCMP_ACT_ALLOW");
    assert_eq!(json["mounts"][0]["type"], "proc");
    assert_eq!(json["linux"]["devices"][0]["fileMode"], 438); // 0o666
}
