// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! Host FIFOs handed to the runtime as task stdout/stderr.
//!
//! A scope owns one FIFO pair under the run directory. Readers are opened
//! before task create and their output is pumped into the log; the FIFOs
//! are unlinked when the scope drops.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("could not create run directory {0}: {1}")]
    RunDir(PathBuf, #[source] std::io::Error),

    #[error("could not create fifo {0}: {1}")]
    Mkfifo(PathBuf, String),

    #[error("could not open fifo {0}: {1}")]
    Open(PathBuf, #[source] std::io::Error),
}

/// A stdout/stderr FIFO pair for one task.
pub struct AttachScope {
    stdout: PathBuf,
    stderr: PathBuf,
    ready: Option<(oneshot::Receiver<()>, oneshot::Receiver<()>)>,
    pumps: Vec<JoinHandle<()>>,
}

impl AttachScope {
    /// Create the FIFO pair (mode 0644) and start the reader pumps.
    pub fn create(run_dir: &Path, app_name: &str) -> Result<Self, AttachError> {
        std::fs::create_dir_all(run_dir)
            .map_err(|e| AttachError::RunDir(run_dir.to_path_buf(), e))?;

        let id = uuid::Uuid::new_v4();
        let stdout = run_dir.join(format!("attach-{id}-stdout.sock"));
        let stderr = run_dir.join(format!("attach-{id}-stderr.sock"));

        let mut pumps = Vec::with_capacity(2);
        let mut ready = Vec::with_capacity(2);
        for (path, stream) in [(&stdout, "stdout"), (&stderr, "stderr")] {
            nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o644))
                .map_err(|e| AttachError::Mkfifo(path.clone(), e.to_string()))?;
            let receiver = pipe::OpenOptions::new()
                .open_receiver(path)
                .map_err(|e| AttachError::Open(path.clone(), e))?;
            let (ready_tx, ready_rx) = oneshot::channel();
            ready.push(ready_rx);
            pumps.push(tokio::spawn(pump(receiver, app_name.to_string(), stream, ready_tx)));
        }

        let mut ready = ready.into_iter();
        let ready = ready.next().zip(ready.next());
        Ok(Self { stdout, stderr, ready, pumps })
    }

    /// Wait until both FIFOs are open on the read side, so the paths can
    /// be handed to task create.
    pub async fn ready(&mut self) {
        if let Some((stdout, stderr)) = self.ready.take() {
            let _ = stdout.await;
            let _ = stderr.await;
        }
    }

    pub fn stdout(&self) -> &Path {
        &self.stdout
    }

    pub fn stderr(&self) -> &Path {
        &self.stderr
    }
}

impl Drop for AttachScope {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
        let _ = std::fs::remove_file(&self.stdout);
        let _ = std::fs::remove_file(&self.stderr);
    }
}

/// Forward task output into the structured log.
async fn pump(
    mut receiver: pipe::Receiver,
    app_name: String,
    stream: &'static str,
    ready: oneshot::Sender<()>,
) {
    let _ = ready.send(());
    let mut buf = vec![0u8; 8192];
    loop {
        match receiver.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                for line in text.lines() {
                    debug!(app = %app_name, stream, "{line}");
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
#[path = "attach_tests.rs"]
mod tests;
