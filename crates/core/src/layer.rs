// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Content-addressed layer descriptors.

use serde::{Deserialize, Serialize};

/// OCI media type of an uncompressed layer tar.
pub const MEDIA_TYPE_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
/// OCI media type of a gzip-compressed layer tar.
pub const MEDIA_TYPE_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Immutable description of one image layer.
///
/// `digest` is the content hash of the blob as stored (`sha256:<hex>`);
/// `diff_id` is the hash of the uncompressed tar and keys the snapshot
/// derived from this layer. Two descriptors with equal digests denote
/// byte-identical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub digest: String,
    pub diff_id: String,
    pub size: u64,
    #[serde(default)]
    pub gzip: bool,
}

impl LayerDescriptor {
    /// Media type for the diff application, derived from the compression flag.
    pub fn media_type(&self) -> &'static str {
        if self.gzip {
            MEDIA_TYPE_LAYER_TAR_GZIP
        } else {
            MEDIA_TYPE_LAYER_TAR
        }
    }

    /// Committed snapshot key for this layer under the given app name.
    pub fn snapshot_key(&self, app_name: &str) -> String {
        format!("{}-{}", app_name, self.diff_id)
    }
}

/// Check that a digest is well-formed (`sha256:<hex>`).
pub fn is_valid_digest(digest: &str) -> bool {
    match digest.strip_prefix("sha256:") {
        Some(hex) => hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
#[path = "layer_tests.rs"]
mod tests;
