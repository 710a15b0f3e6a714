// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Length-prefixed JSON framing with per-message timeouts.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Chunk frames dominate; layers are split
/// client-side well below this.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out waiting for frame")]
    Timeout,

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write one framed message. `timeout` of `None` means no deadline
/// (used on chunk streams, which are bounded only by the client).
pub async fn write_message<W, T>(
    writer: &mut W,
    message: &T,
    timeout: Option<Duration>,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let write = async {
        writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        writer.write_all(&payload).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, write)
            .await
            .map_err(|_| ProtocolError::Timeout)??,
        None => write.await?,
    }
    Ok(())
}

/// Read one framed message.
pub async fn read_message<R, T>(
    reader: &mut R,
    timeout: Option<Duration>,
) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let read = async {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        Ok::<_, ProtocolError>(payload)
    };
    let payload = match timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| ProtocolError::Timeout)?,
        None => read.await,
    }
    .map_err(|e| match e {
        ProtocolError::Io(io)
            if io.kind() == std::io::ErrorKind::UnexpectedEof
                || io.kind() == std::io::ErrorKind::BrokenPipe =>
        {
            ProtocolError::ConnectionClosed
        }
        other => other,
    })?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
