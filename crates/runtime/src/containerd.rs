// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Wendy Labs Inc.

//! containerd-backed implementation of [`RuntimeAdapter`].
//!
//! Talks to containerd's gRPC services over the local socket with every
//! request carrying the agent namespace. Content writes stream
//! Stat→Write→Commit actions; a commit that races another writer comes
//! back `AlreadyExists` and is surfaced as [`WriteOutcome::AlreadyExists`].

use std::path::Path;

use async_trait::async_trait;
use containerd_client::services::v1::container::Runtime as ContainerRuntime;
use containerd_client::services::v1::containers_client::ContainersClient;
use containerd_client::services::v1::content_client::ContentClient;
use containerd_client::services::v1::diff_client::DiffClient;
use containerd_client::services::v1::events_client::EventsClient;
use containerd_client::services::v1::images_client::ImagesClient;
use containerd_client::services::v1::snapshots::snapshots_client::SnapshotsClient;
use containerd_client::services::v1::snapshots::{
    CommitSnapshotRequest, ListSnapshotsRequest, MountsRequest, PrepareSnapshotRequest,
    RemoveSnapshotRequest,
};
use containerd_client::services::v1::tasks_client::TasksClient;
use containerd_client::services::v1::{
    ApplyRequest, Container, CreateContainerRequest, CreateImageRequest, CreateTaskRequest,
    DeleteContainerRequest, DeleteImageRequest, DeleteTaskRequest, Image, KillRequest,
    ListContainersRequest, ListContentRequest, ListTasksRequest, StartRequest, SubscribeRequest,
    UpdateContainerRequest, UpdateImageRequest, WriteAction, WriteContentRequest,
};
use containerd_client::types::{Descriptor, Mount};
use containerd_client::{tonic, with_namespace};
use prost::Message;
use sha2::{Digest as _, Sha256};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::transport::Channel;
use tonic::{Code, Request};
use tracing::{debug, warn};
use wendy_core::image::MEDIA_TYPE_MANIFEST;
use wendy_core::ContainerRecord;

use crate::{
    ContainerSummary, ContentInfo, RuntimeAdapter, RuntimeError, SnapshotMount, TaskExit,
    TaskInfo, WriteOutcome,
};

const SNAPSHOTTER: &str = "overlayfs";
const RUNC_V2: &str = "io.containerd.runc.v2";
const SPEC_TYPE_URL: &str = "types.containerd.io/opencontainers/runtime-spec/1/Spec";
const NAMESPACE_HEADER: &str = "containerd-namespace";

/// Handle on a containerd instance, scoped to one namespace.
#[derive(Clone)]
pub struct ContainerdRuntime {
    channel: Channel,
    namespace: String,
}

impl ContainerdRuntime {
    /// Connect to the containerd socket. Fails fast so a missing runtime
    /// surfaces as a fatal init error.
    pub async fn connect(
        socket: impl AsRef<Path>,
        namespace: impl Into<String>,
    ) -> Result<Self, RuntimeError> {
        let channel = containerd_client::connect(socket.as_ref())
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { channel, namespace: namespace.into() })
    }

    fn status_to_error(status: tonic::Status) -> RuntimeError {
        match status.code() {
            Code::NotFound => RuntimeError::NotFound(status.message().to_string()),
            Code::AlreadyExists => RuntimeError::AlreadyExists(status.message().to_string()),
            Code::InvalidArgument => RuntimeError::InvalidArgument(status.message().to_string()),
            Code::Unavailable => RuntimeError::Unavailable(status.message().to_string()),
            _ => RuntimeError::Rpc(status.message().to_string()),
        }
    }

    /// Attach the namespace header to a streaming request, which
    /// `with_namespace!` only does for unary payloads.
    fn namespaced<T>(&self, payload: T) -> Result<Request<T>, RuntimeError> {
        let mut request = Request::new(payload);
        let value = self
            .namespace
            .parse()
            .map_err(|_| RuntimeError::InvalidArgument("bad namespace".to_string()))?;
        request.metadata_mut().insert(NAMESPACE_HEADER, value);
        Ok(request)
    }

    async fn write_blob(&self, digest: &str, data: &[u8]) -> Result<WriteOutcome, RuntimeError> {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(1);
        // A bounded(1) channel would deadlock a same-task feed; buffer the
        // whole blob up front (manifests are small).
        let _ = tx.try_send(data.to_vec());
        drop(tx);
        self.write_content(digest, rx).await
    }
}

#[async_trait]
impl RuntimeAdapter for ContainerdRuntime {
    async fn write_content(
        &self,
        digest: &str,
        mut chunks: mpsc::Receiver<Vec<u8>>,
    ) -> Result<WriteOutcome, RuntimeError> {
        let mut client = ContentClient::new(self.channel.clone());
        let reference = digest.to_string();

        let (req_tx, req_rx) = mpsc::channel::<WriteContentRequest>(8);
        let request = self.namespaced(ReceiverStream::new(req_rx))?;

        // Drive the request stream from a separate task so we can react to
        // responses (and an early AlreadyExists) while feeding chunks.
        let expected = digest.to_string();
        let feeder = tokio::spawn(async move {
            let mut offset: i64 = 0;
            while let Some(chunk) = chunks.recv().await {
                let len = chunk.len() as i64;
                let write = WriteContentRequest {
                    action: WriteAction::Write as i32,
                    r#ref: reference.clone(),
                    offset,
                    data: chunk,
                    ..Default::default()
                };
                if req_tx.send(write).await.is_err() {
                    return;
                }
                offset += len;
            }
            let commit = WriteContentRequest {
                action: WriteAction::Commit as i32,
                r#ref: reference.clone(),
                offset,
                total: offset,
                expected,
                ..Default::default()
            };
            let _ = req_tx.send(commit).await;
        });

        let response = client.write(request).await;
        let mut stream = match response {
            Ok(r) => r.into_inner(),
            Err(status) => {
                feeder.abort();
                let err = Self::status_to_error(status);
                if err.is_already_exists() {
                    return Ok(WriteOutcome::AlreadyExists);
                }
                return Err(err);
            }
        };

        let mut committed_size = 0u64;
        loop {
            match stream.next().await {
                Some(Ok(msg)) => {
                    if msg.action == WriteAction::Commit as i32 {
                        committed_size = msg.offset as u64;
                    }
                }
                Some(Err(status)) => {
                    feeder.abort();
                    let err = Self::status_to_error(status);
                    if err.is_already_exists() {
                        debug!(digest, "content already present, write converged");
                        return Ok(WriteOutcome::AlreadyExists);
                    }
                    return Err(err);
                }
                None => break,
            }
        }
        let _ = feeder.await;
        Ok(WriteOutcome::Committed { size: committed_size })
    }

    async fn list_content(&self) -> Result<Vec<ContentInfo>, RuntimeError> {
        let mut client = ContentClient::new(self.channel.clone());
        let req = ListContentRequest { filters: vec![] };
        let req = with_namespace!(req, self.namespace);
        let mut stream =
            client.list(req).await.map_err(Self::status_to_error)?.into_inner();

        let mut out = Vec::new();
        while let Some(msg) = stream.next().await {
            let msg = msg.map_err(Self::status_to_error)?;
            for info in msg.info {
                out.push(ContentInfo { digest: info.digest, size: info.size as u64 });
            }
        }
        Ok(out)
    }

    async fn upload_json(
        &self,
        value: &serde_json::Value,
    ) -> Result<(String, u64), RuntimeError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| RuntimeError::InvalidArgument(e.to_string()))?;
        let digest = format!("sha256:{:x}", Sha256::digest(&payload));
        let size = payload.len() as u64;
        match self.write_blob(&digest, &payload).await? {
            WriteOutcome::Committed { .. } | WriteOutcome::AlreadyExists => Ok((digest, size)),
        }
    }

    async fn prepare_snapshot(
        &self,
        key: &str,
        parent: Option<&str>,
    ) -> Result<Vec<SnapshotMount>, RuntimeError> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let req = PrepareSnapshotRequest {
            snapshotter: SNAPSHOTTER.to_string(),
            key: key.to_string(),
            parent: parent.unwrap_or_default().to_string(),
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        let response = client.prepare(req).await.map_err(Self::status_to_error)?;
        Ok(response.into_inner().mounts.into_iter().map(from_runtime_mount).collect())
    }

    async fn snapshot_mounts(&self, key: &str) -> Result<Vec<SnapshotMount>, RuntimeError> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let req = MountsRequest {
            snapshotter: SNAPSHOTTER.to_string(),
            key: key.to_string(),
        };
        let req = with_namespace!(req, self.namespace);
        let response = client.mounts(req).await.map_err(Self::status_to_error)?;
        Ok(response.into_inner().mounts.into_iter().map(from_runtime_mount).collect())
    }

    async fn apply_diff(
        &self,
        digest: &str,
        size: u64,
        media_type: &str,
        mounts: &[SnapshotMount],
    ) -> Result<(), RuntimeError> {
        let mut client = DiffClient::new(self.channel.clone());
        let req = ApplyRequest {
            diff: Some(Descriptor {
                media_type: media_type.to_string(),
                digest: digest.to_string(),
                size: size as i64,
                ..Default::default()
            }),
            mounts: mounts.iter().map(to_runtime_mount).collect(),
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        client.apply(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn commit_snapshot(&self, tmp_key: &str, name: &str) -> Result<(), RuntimeError> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let req = CommitSnapshotRequest {
            snapshotter: SNAPSHOTTER.to_string(),
            name: name.to_string(),
            key: tmp_key.to_string(),
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        match client.commit(req).await {
            Ok(_) => Ok(()),
            Err(status) if status.code() == Code::AlreadyExists => {
                debug!(name, "snapshot already committed");
                // The prepared key stays active when the commit loses the
                // race; drop it so re-runs don't leak snapshots.
                self.remove_snapshot(tmp_key).await?;
                Ok(())
            }
            Err(status) => Err(Self::status_to_error(status)),
        }
    }

    async fn remove_snapshot(&self, key: &str) -> Result<(), RuntimeError> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let req = RemoveSnapshotRequest {
            snapshotter: SNAPSHOTTER.to_string(),
            key: key.to_string(),
        };
        let req = with_namespace!(req, self.namespace);
        match client.remove(req).await {
            Ok(_) => Ok(()),
            Err(status) if status.code() == Code::NotFound => Ok(()),
            Err(status) => Err(Self::status_to_error(status)),
        }
    }

    async fn list_snapshots(&self) -> Result<Vec<String>, RuntimeError> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let req = ListSnapshotsRequest {
            snapshotter: SNAPSHOTTER.to_string(),
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        let mut stream =
            client.list(req).await.map_err(Self::status_to_error)?.into_inner();
        let mut keys = Vec::new();
        while let Some(msg) = stream.next().await {
            let msg = msg.map_err(Self::status_to_error)?;
            keys.extend(msg.info.into_iter().map(|i| i.name));
        }
        Ok(keys)
    }

    async fn create_image(
        &self,
        name: &str,
        manifest_digest: &str,
        manifest_size: u64,
    ) -> Result<(), RuntimeError> {
        let mut client = ImagesClient::new(self.channel.clone());
        let req = CreateImageRequest {
            image: Some(image(name, manifest_digest, manifest_size)),
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        client.create(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn update_image(
        &self,
        name: &str,
        manifest_digest: &str,
        manifest_size: u64,
    ) -> Result<(), RuntimeError> {
        let mut client = ImagesClient::new(self.channel.clone());
        let req = UpdateImageRequest {
            image: Some(image(name, manifest_digest, manifest_size)),
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        client.update(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn delete_image(&self, name: &str) -> Result<(), RuntimeError> {
        let mut client = ImagesClient::new(self.channel.clone());
        let req = DeleteImageRequest { name: name.to_string(), ..Default::default() };
        let req = with_namespace!(req, self.namespace);
        client.delete(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn create_container(&self, record: &ContainerRecord) -> Result<(), RuntimeError> {
        let mut client = ContainersClient::new(self.channel.clone());
        let req = CreateContainerRequest { container: Some(container(record)?) };
        let req = with_namespace!(req, self.namespace);
        client.create(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn update_container(&self, record: &ContainerRecord) -> Result<(), RuntimeError> {
        let mut client = ContainersClient::new(self.channel.clone());
        let req = UpdateContainerRequest {
            container: Some(container(record)?),
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        client.update(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn delete_container(&self, app_name: &str) -> Result<(), RuntimeError> {
        let mut client = ContainersClient::new(self.channel.clone());
        let req = DeleteContainerRequest { id: app_name.to_string() };
        let req = with_namespace!(req, self.namespace);
        client.delete(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut client = ContainersClient::new(self.channel.clone());
        let req = ListContainersRequest { ..Default::default() };
        let req = with_namespace!(req, self.namespace);
        let response = client.list(req).await.map_err(Self::status_to_error)?;
        Ok(response
            .into_inner()
            .containers
            .into_iter()
            .map(|c| ContainerSummary {
                app_name: c.id,
                image_name: c.image,
                snapshot_key: c.snapshot_key,
                labels: c.labels,
            })
            .collect())
    }

    async fn create_task(
        &self,
        container_id: &str,
        mounts: &[SnapshotMount],
        stdout: Option<&Path>,
        stderr: Option<&Path>,
    ) -> Result<(), RuntimeError> {
        let mut client = TasksClient::new(self.channel.clone());
        let req = CreateTaskRequest {
            container_id: container_id.to_string(),
            rootfs: mounts.iter().map(to_runtime_mount).collect(),
            stdout: stdout.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
            stderr: stderr.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
            terminal: false,
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        client.create(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn start_task(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut client = TasksClient::new(self.channel.clone());
        let req = StartRequest { container_id: container_id.to_string(), ..Default::default() };
        let req = with_namespace!(req, self.namespace);
        client.start(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn kill_task(&self, container_id: &str, signal: u32) -> Result<(), RuntimeError> {
        let mut client = TasksClient::new(self.channel.clone());
        let req = KillRequest {
            container_id: container_id.to_string(),
            signal,
            all: true,
            ..Default::default()
        };
        let req = with_namespace!(req, self.namespace);
        client.kill(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn delete_task(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut client = TasksClient::new(self.channel.clone());
        let req =
            DeleteTaskRequest { container_id: container_id.to_string(), ..Default::default() };
        let req = with_namespace!(req, self.namespace);
        client.delete(req).await.map_err(Self::status_to_error)?;
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<TaskInfo>, RuntimeError> {
        let mut client = TasksClient::new(self.channel.clone());
        let req = ListTasksRequest { ..Default::default() };
        let req = with_namespace!(req, self.namespace);
        let response = client.list(req).await.map_err(Self::status_to_error)?;
        Ok(response
            .into_inner()
            .tasks
            .into_iter()
            .map(|p| {
                use containerd_client::types::v1::Status;
                let state = match Status::try_from(p.status) {
                    Ok(Status::Created) => wendy_core::TaskState::Created,
                    Ok(Status::Running) | Ok(Status::Paused) | Ok(Status::Pausing) => {
                        wendy_core::TaskState::Running
                    }
                    Ok(Status::Stopped) => wendy_core::TaskState::Exited {
                        code: p.exit_status,
                        at_ms: p.exited_at.map(timestamp_ms).unwrap_or_default(),
                    },
                    _ => wendy_core::TaskState::Absent,
                };
                TaskInfo { app_name: p.container_id, state }
            })
            .collect())
    }

    async fn subscribe_task_exits(&self) -> Result<mpsc::Receiver<TaskExit>, RuntimeError> {
        let mut client = EventsClient::new(self.channel.clone());
        let req = SubscribeRequest { filters: vec!["topic==\"/tasks/exit\"".to_string()] };
        let req = with_namespace!(req, self.namespace);
        let mut stream =
            client.subscribe(req).await.map_err(Self::status_to_error)?.into_inner();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(envelope) = stream.next().await {
                let envelope = match envelope {
                    Ok(e) => e,
                    Err(status) => {
                        warn!(error = %status, "task exit subscription broke");
                        break;
                    }
                };
                let Some(any) = envelope.event else { continue };
                match containerd_client::events::TaskExit::decode(any.value.as_slice()) {
                    Ok(exit) => {
                        let event = TaskExit {
                            app_name: exit.container_id,
                            code: exit.exit_status,
                            at_ms: exit.exited_at.map(timestamp_ms).unwrap_or_default(),
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable task exit event"),
                }
            }
        });
        Ok(rx)
    }
}

fn image(name: &str, manifest_digest: &str, manifest_size: u64) -> Image {
    Image {
        name: name.to_string(),
        target: Some(Descriptor {
            media_type: MEDIA_TYPE_MANIFEST.to_string(),
            digest: manifest_digest.to_string(),
            size: manifest_size as i64,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container(record: &ContainerRecord) -> Result<Container, RuntimeError> {
    let spec = serde_json::to_vec(&record.oci_spec)
        .map_err(|e| RuntimeError::InvalidArgument(e.to_string()))?;
    Ok(Container {
        id: record.app_name.clone(),
        image: record.image_name.clone(),
        runtime: Some(ContainerRuntime { name: RUNC_V2.to_string(), options: None }),
        spec: Some(prost_types::Any { type_url: SPEC_TYPE_URL.to_string(), value: spec }),
        snapshotter: SNAPSHOTTER.to_string(),
        snapshot_key: record.snapshot_key.clone(),
        labels: record.labels.clone(),
        ..Default::default()
    })
}

fn from_runtime_mount(mount: Mount) -> SnapshotMount {
    SnapshotMount { mount_type: mount.r#type, source: mount.source, options: mount.options }
}

fn to_runtime_mount(mount: &SnapshotMount) -> Mount {
    Mount {
        r#type: mount.mount_type.clone(),
        source: mount.source.clone(),
        options: mount.options.clone(),
        ..Default::default()
    }
}

fn timestamp_ms(ts: prost_types::Timestamp) -> u64 {
    (ts.seconds.max(0) as u64) * 1000 + (ts.nanos.max(0) as u64) / 1_000_000
}
