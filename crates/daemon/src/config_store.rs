// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Durable agent identity: a single JSON file, written atomically.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use wendy_core::{AgentIdentity, Enrolled, ErrorKind};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not create state directory {0}: {1}")]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("could not generate key pair: {0}")]
    KeyGen(String),

    #[error("could not persist identity: {0}")]
    Write(#[from] std::io::Error),

    #[error("could not encode identity: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Store for the process-wide [`AgentIdentity`].
///
/// Writes go through a temp file and rename so readers observe either the
/// pre- or post-state, never a partial file. The private key is generated
/// once and never rewritten with a different value.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Open the store, creating the directory if needed. Fails when the
    /// directory cannot be created — that is a fatal init error.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::CreateDir(dir.clone(), e))?;
        Ok(Self { dir })
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Load the identity, generating and persisting a fresh key pair when
    /// the file is absent or unreadable.
    pub fn load(&self) -> Result<AgentIdentity, StoreError> {
        let path = self.config_path();
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<AgentIdentity>(&bytes) {
                Ok(identity) => return Ok(identity),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable identity file, regenerating");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "identity file not readable, regenerating");
            }
        }

        let key = rcgen::KeyPair::generate().map_err(|e| StoreError::KeyGen(e.to_string()))?;
        let identity = AgentIdentity::new(key.serialize_pem());
        self.save(&identity)?;
        info!(path = %path.display(), "generated fresh agent identity");
        Ok(identity)
    }

    /// Persist an enrollment record. The next `load` returns it.
    pub fn save_enrolled(
        &self,
        identity: &AgentIdentity,
        enrolled: &Enrolled,
    ) -> Result<AgentIdentity, StoreError> {
        let updated = AgentIdentity {
            private_key_pem: identity.private_key_pem.clone(),
            enrolled: Some(enrolled.clone()),
        };
        self.save(&updated)?;
        Ok(updated)
    }

    fn save(&self, identity: &AgentIdentity) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(identity)?;
        write_atomic(&self.config_path(), &bytes)?;
        Ok(())
    }
}

/// Temp-file-and-rename write, mode 0600.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
#[path = "config_store_tests.rs"]
mod tests;
