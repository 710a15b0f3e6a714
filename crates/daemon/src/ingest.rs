// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Streamed upload of content-addressed layers.
//!
//! Frames come off the connection one at a time and are forwarded into
//! the content store without ever buffering a whole layer. The declared
//! digest is trusted; the runtime verifies it at commit.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::debug;
use wendy_core::layer::is_valid_digest;
use wendy_core::ErrorKind;
use wendy_runtime::{RuntimeAdapter, RuntimeError, WriteOutcome};
use wendy_wire::{read_message, ClientFrame, LayerHeader, ProtocolError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid digest {0:?}")]
    InvalidDigest(String),

    #[error("empty chunk")]
    EmptyChunk,

    #[error("stream ended without a commit marker")]
    MissingCommit,

    #[error("unexpected {0} frame in layer stream")]
    UnexpectedFrame(&'static str),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("upload task failed")]
    UploadTask,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidDigest(_)
            | IngestError::EmptyChunk
            | IngestError::MissingCommit
            | IngestError::UnexpectedFrame(_)
            | IngestError::Malformed(_) => ErrorKind::InvalidArgument,
            IngestError::UploadTask => ErrorKind::Internal,
            IngestError::Runtime(e) => e.kind(),
        }
    }
}

/// Layer ingestion over a runtime adapter handle.
pub struct Ingest<R> {
    runtime: Arc<R>,
}

impl<R> Clone for Ingest<R> {
    fn clone(&self) -> Self {
        Self { runtime: Arc::clone(&self.runtime) }
    }
}

impl<R: RuntimeAdapter> Ingest<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    /// Stream `Chunk` frames from `reader` into the content store under
    /// `ref = digest` until the `Commit` marker.
    ///
    /// Two concurrent writers for the same digest converge: the first
    /// commit wins and the loser observes already-exists, which is
    /// success. Chunk streams carry no read deadline.
    pub async fn write_layer<S>(&self, digest: &str, reader: &mut S) -> Result<(), IngestError>
    where
        S: AsyncRead + Unpin,
    {
        if !is_valid_digest(digest) {
            return Err(IngestError::InvalidDigest(digest.to_string()));
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>(8);
        let runtime = Arc::clone(&self.runtime);
        let owned_digest = digest.to_string();
        let writer =
            tokio::spawn(async move { runtime.write_content(&owned_digest, rx).await });

        let feed = async {
            loop {
                let frame: ClientFrame = read_message(reader, None).await.map_err(
                    |e| match e {
                        ProtocolError::ConnectionClosed => IngestError::MissingCommit,
                        ProtocolError::Malformed(e) => IngestError::Malformed(e.to_string()),
                        other => IngestError::Malformed(other.to_string()),
                    },
                )?;
                match frame {
                    ClientFrame::Chunk { data } => {
                        if data.is_empty() {
                            return Err(IngestError::EmptyChunk);
                        }
                        if tx.send(data).await.is_err() {
                            // Writer bailed; surface its error below.
                            return Ok(());
                        }
                    }
                    ClientFrame::Commit => return Ok(()),
                    ClientFrame::Header { .. } => {
                        return Err(IngestError::UnexpectedFrame("header"))
                    }
                    ClientFrame::Control { .. } => {
                        return Err(IngestError::UnexpectedFrame("control"))
                    }
                }
            }
        };

        let fed = feed.await;
        // Close the channel; an open sender would stall the writer's
        // commit forever.
        drop(tx);
        match fed {
            Ok(()) => {
                let outcome = writer.await.map_err(|_| IngestError::UploadTask)??;
                if outcome == WriteOutcome::AlreadyExists {
                    debug!(digest, "layer already present");
                }
                Ok(())
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }

    /// Stream a blob from the local filesystem into the content store
    /// (used by the image archive compatibility shim).
    pub async fn write_layer_file(
        &self,
        digest: &str,
        path: &std::path::Path,
    ) -> Result<(), IngestError> {
        use tokio::io::AsyncReadExt;

        if !is_valid_digest(digest) {
            return Err(IngestError::InvalidDigest(digest.to_string()));
        }
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| IngestError::Malformed(format!("blob {digest}: {e}")))?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(8);
        let runtime = Arc::clone(&self.runtime);
        let owned_digest = digest.to_string();
        let writer =
            tokio::spawn(async move { runtime.write_content(&owned_digest, rx).await });

        let mut buf = vec![0u8; 1 << 20];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    writer.abort();
                    return Err(IngestError::Malformed(format!("blob read: {e}")));
                }
            }
        }
        drop(tx);
        writer.await.map_err(|_| IngestError::UploadTask)??;
        Ok(())
    }

    /// Digest-only view of the layers present in the content store.
    pub async fn list_layer_headers(&self) -> Result<Vec<LayerHeader>, IngestError> {
        let infos = self.runtime.list_content().await?;
        Ok(infos
            .into_iter()
            .map(|i| LayerHeader { digest: i.digest, size: i.size })
            .collect())
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
