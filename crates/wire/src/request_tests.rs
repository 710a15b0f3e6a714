// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use wendy_core::RestartPolicy;

use super::*;

#[test]
fn requests_are_tagged_by_type() {
    let json = serde_json::to_value(Request::Ping).unwrap();
    assert_eq!(json["type"], "Ping");

    let json = serde_json::to_value(Request::StopContainer {
        app_name: "demo".into(),
        signal: None,
    })
    .unwrap();
    assert_eq!(json["type"], "StopContainer");
    assert_eq!(json["app_name"], "demo");
    assert!(json.get("signal").is_none());
}

#[test]
fn run_spec_defaults() {
    let spec: RunSpec = serde_json::from_value(serde_json::json!({
        "image_name": "demo",
        "app_name": "demo",
        "layers": [],
        "app_config": "e30=",
    }))
    .unwrap();
    assert!(spec.cmd.is_empty());
    assert!(spec.env.is_empty());
    assert_eq!(spec.working_dir, None);
    assert_eq!(spec.app_config, b"{}");
    assert!(!spec.debug);
    assert!(!spec.detach);
    assert_eq!(spec.restart_policy, RestartPolicy::Default);
}

#[test]
fn run_spec_round_trips() {
    let spec = RunSpec {
        image_name: "demo".into(),
        app_name: "demo".into(),
        cmd: vec!["/bin/demo".into(), "--verbose".into()],
        env: vec!["FOO=bar".into()],
        working_dir: Some("/srv".into()),
        layers: vec![],
        app_config: br#"{"appId":"a","version":"1"}"#.to_vec(),
        debug: true,
        restart_policy: RestartPolicy::OnFailure { max_retries: 2 },
        detach: true,
    };
    let request = Request::RunContainer { spec: spec.clone() };
    let bytes = serde_json::to_vec(&request).unwrap();
    let decoded: Request = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded, Request::RunContainer { spec });
}
