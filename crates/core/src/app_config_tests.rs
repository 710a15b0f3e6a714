// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

use super::*;

fn config(entitlements: Vec<Entitlement>) -> AppConfig {
    AppConfig {
        app_id: "sh.wendy.demo".to_string(),
        version: "0.1.0".to_string(),
        entitlements,
    }
}

#[test]
fn decode_encode_is_identity() {
    let json = r#"{"appId":"com.ex.d","version":"0.1.0","entitlements":[{"network":{"mode":"host"}},{"bluetooth":{"mode":"kernel"}},"video","audio"]}"#;
    let parsed = AppConfig::from_bytes(json.as_bytes()).unwrap();
    assert_eq!(parsed.app_id, "com.ex.d");
    assert_eq!(parsed.entitlements.len(), 4);

    let encoded = serde_json::to_string(&parsed).unwrap();
    let reparsed = AppConfig::from_bytes(encoded.as_bytes()).unwrap();
    assert_eq!(parsed, reparsed);
}

#[test]
fn entitlements_default_to_empty() {
    let parsed = AppConfig::from_bytes(br#"{"appId":"com.ex.d","version":"1.0.0"}"#).unwrap();
    assert!(parsed.entitlements.is_empty());
    parsed.validate().unwrap();
}

#[test]
fn empty_app_id_rejected() {
    let cfg = AppConfig { app_id: String::new(), version: "1".into(), entitlements: vec![] };
    assert_eq!(cfg.validate(), Err(AppConfigError::EmptyAppId));
}

#[test]
fn duplicate_variant_tag_rejected() {
    let cfg = config(vec![
        Entitlement::Network { mode: NetworkMode::Host },
        Entitlement::Network { mode: NetworkMode::None },
    ]);
    assert_eq!(cfg.validate(), Err(AppConfigError::DuplicateEntitlement("network")));
}

#[test]
fn bluetooth_kernel_with_network_none_rejected() {
    let cfg = config(vec![
        Entitlement::Network { mode: NetworkMode::None },
        Entitlement::Bluetooth { mode: BluetoothMode::Kernel },
    ]);
    let err = cfg.validate().unwrap_err();
    assert_eq!(err, AppConfigError::BluetoothWithoutNetwork);
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn bluetooth_bluez_with_network_none_allowed() {
    let cfg = config(vec![
        Entitlement::Network { mode: NetworkMode::None },
        Entitlement::Bluetooth { mode: BluetoothMode::Bluez },
    ]);
    cfg.validate().unwrap();
}

#[test]
fn order_of_entitlements_is_preserved() {
    let cfg = config(vec![Entitlement::Audio, Entitlement::Video]);
    let bytes = serde_json::to_vec(&cfg).unwrap();
    let parsed = AppConfig::from_bytes(&bytes).unwrap();
    assert_eq!(parsed.entitlements, vec![Entitlement::Audio, Entitlement::Video]);
}
