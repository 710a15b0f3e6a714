// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use wendy_core::ErrorKind;

use super::*;

#[test]
fn error_kinds_serialize_snake_case() {
    let response = Response::error(ErrorKind::FailedPrecondition, "task is running");
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["kind"], "failed_precondition");
    assert_eq!(json["message"], "task is running");
}

#[test]
fn container_info_round_trips() {
    let info = ContainerInfo {
        app_name: "demo".into(),
        app_version: "0.1.0".into(),
        running_state: "running".into(),
        failure_count: 0,
    };
    let response = Response::Containers { containers: vec![info.clone()] };
    let bytes = serde_json::to_vec(&response).unwrap();
    let decoded: Response = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded, Response::Containers { containers: vec![info] });
}

#[test]
fn started_event_carries_debug_port() {
    let json = serde_json::to_value(Response::Started { debug_port: 0 }).unwrap();
    assert_eq!(json["debug_port"], 0);
}
