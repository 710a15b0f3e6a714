// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Image records binding a name to a manifest in the content store.

use serde::{Deserialize, Serialize};

use crate::layer::LayerDescriptor;

/// OCI media type of an image manifest.
pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// An image known to the agent.
///
/// The manifest blob is uploaded to the content store before the record is
/// written; `layers` follows OCI manifest order (base first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub image_name: String,
    pub manifest_digest: String,
    pub manifest_size: u64,
    pub layers: Vec<LayerDescriptor>,
}

impl ImageRecord {
    /// Build the canonical OCI manifest JSON for this image's layers.
    ///
    /// Object keys end up sorted because `serde_json::Value` objects are
    /// backed by a `BTreeMap`, which is what makes the digest stable.
    pub fn manifest_json(layers: &[LayerDescriptor]) -> serde_json::Value {
        serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_MANIFEST,
            "layers": layers
                .iter()
                .map(|l| {
                    serde_json::json!({
                        "mediaType": l.media_type(),
                        "digest": l.digest,
                        "size": l.size,
                    })
                })
                .collect::<Vec<_>>(),
        })
    }
}
