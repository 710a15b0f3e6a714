// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! OCI image archive extraction for the docker-save compatibility path.
//!
//! The archive is an OCI layout tar: `index.json` plus `blobs/sha256/*`.
//! Blobs re-enter the content-addressed path through [`Ingest`], so both
//! ingestion paths converge on the same lifecycle operation.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use wendy_core::{ErrorKind, LayerDescriptor};
use wendy_runtime::RuntimeAdapter;

use crate::ingest::{Ingest, IngestError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("could not unpack image archive: {0}")]
    Unpack(String),

    #[error("not an OCI image archive: {0}")]
    Layout(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Unpack(_) | ArchiveError::Layout(_) => ErrorKind::InvalidArgument,
            ArchiveError::Ingest(e) => e.kind(),
        }
    }
}

/// A self-cleaning temp path for the spooled archive.
pub(super) struct Spool {
    path: PathBuf,
}

impl Spool {
    pub(super) fn new() -> Self {
        let path =
            std::env::temp_dir().join(format!("wendy-archive-{}.tar", uuid::Uuid::new_v4()));
        Self { path }
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Extract the archive at `tar_path`, push every layer blob into the
/// content store, and return the layer descriptors in manifest order.
pub(super) async fn ingest_archive<R: RuntimeAdapter>(
    tar_path: &Path,
    ingest: &Ingest<R>,
) -> Result<Vec<LayerDescriptor>, ArchiveError> {
    let scratch =
        std::env::temp_dir().join(format!("wendy-unpack-{}", uuid::Uuid::new_v4()));

    let unpack_tar = tar_path.to_path_buf();
    let unpack_dir = scratch.clone();
    let parsed = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&unpack_tar)
            .map_err(|e| ArchiveError::Unpack(e.to_string()))?;
        tar::Archive::new(file)
            .unpack(&unpack_dir)
            .map_err(|e| ArchiveError::Unpack(e.to_string()))?;
        parse_layout(&unpack_dir)
    })
    .await
    .map_err(|_| ArchiveError::Unpack("unpack task failed".to_string()))?;

    let result = match parsed {
        Ok(layers) => {
            let mut ingested = Vec::with_capacity(layers.len());
            for layer in layers {
                let blob = blob_path(&scratch, &layer.digest)?;
                ingest.write_layer_file(&layer.digest, &blob).await?;
                debug!(digest = %layer.digest, "archive layer ingested");
                ingested.push(layer);
            }
            Ok(ingested)
        }
        Err(e) => Err(e),
    };
    let _ = std::fs::remove_dir_all(&scratch);
    result
}

/// Walk index → manifest → config and zip layers with their diff IDs.
fn parse_layout(scratch: &Path) -> Result<Vec<LayerDescriptor>, ArchiveError> {
    let index = read_json(&scratch.join("index.json"))
        .map_err(|e| ArchiveError::Layout(format!("index.json: {e}")))?;
    let manifest_digest = index["manifests"][0]["digest"]
        .as_str()
        .ok_or_else(|| ArchiveError::Layout("index has no manifest".to_string()))?;

    let manifest = read_json(&blob_path(scratch, manifest_digest)?)
        .map_err(|e| ArchiveError::Layout(format!("manifest: {e}")))?;
    let config_digest = manifest["config"]["digest"]
        .as_str()
        .ok_or_else(|| ArchiveError::Layout("manifest has no config".to_string()))?;
    let config = read_json(&blob_path(scratch, config_digest)?)
        .map_err(|e| ArchiveError::Layout(format!("image config: {e}")))?;

    let layer_entries = manifest["layers"]
        .as_array()
        .ok_or_else(|| ArchiveError::Layout("manifest has no layers".to_string()))?;
    let diff_ids = config["rootfs"]["diff_ids"]
        .as_array()
        .ok_or_else(|| ArchiveError::Layout("config has no diff ids".to_string()))?;
    if layer_entries.len() != diff_ids.len() {
        return Err(ArchiveError::Layout(format!(
            "{} layers but {} diff ids",
            layer_entries.len(),
            diff_ids.len()
        )));
    }

    layer_entries
        .iter()
        .zip(diff_ids)
        .map(|(entry, diff_id)| {
            let digest = entry["digest"]
                .as_str()
                .ok_or_else(|| ArchiveError::Layout("layer has no digest".to_string()))?;
            let diff_id = diff_id
                .as_str()
                .ok_or_else(|| ArchiveError::Layout("diff id is not a string".to_string()))?;
            let media_type = entry["mediaType"].as_str().unwrap_or_default();
            Ok(LayerDescriptor {
                digest: digest.to_string(),
                diff_id: diff_id.to_string(),
                size: entry["size"].as_u64().unwrap_or_default(),
                gzip: media_type.ends_with("+gzip"),
            })
        })
        .collect()
}

fn blob_path(scratch: &Path, digest: &str) -> Result<PathBuf, ArchiveError> {
    let hex = digest
        .strip_prefix("sha256:")
        .ok_or_else(|| ArchiveError::Layout(format!("unsupported digest {digest}")))?;
    Ok(scratch.join("blobs").join("sha256").join(hex))
}

fn read_json(path: &Path) -> Result<serde_json::Value, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
