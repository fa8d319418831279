// SPDX-License-Identifier: MIT
//! Decompression worker
//!
//! Keeps the expensive decompress + parse step off the caller's execution
//! context. One worker owns one artifact: the decompressed buffer and header
//! live on the worker thread and are immutable once built. Column and
//! category responses carry freshly copied buffers whose ownership moves to
//! the requester.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn};

use crate::codec::TypedArray;
use crate::format::ContainerHeader;
use crate::reader::{ContainerReader, ReadError};

/// Default depth of the request queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Requests understood by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerRequest {
    SetPayload { payload: String },
    LoadHeader,
    LoadColumn { column_name: String, category_key: String },
    LoadCategory { category_key: String },
}

impl WorkerRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::SetPayload { .. } => "setPayload",
            WorkerRequest::LoadHeader => "loadHeader",
            WorkerRequest::LoadColumn { .. } => "loadColumn",
            WorkerRequest::LoadCategory { .. } => "loadCategory",
        }
    }
}

/// Responses sent back by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResponse {
    /// `header: None` acknowledges `SetPayload`
    Header { header: Option<Arc<ContainerHeader>> },
    ColumnData {
        column_name: String,
        category_key: String,
        data: TypedArray,
    },
    CategoryData {
        category_key: String,
        data: BTreeMap<String, TypedArray>,
    },
    Error {
        column_name: Option<String>,
        category_key: Option<String>,
        error: String,
    },
}

impl WorkerResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerResponse::Header { .. } => "header",
            WorkerResponse::ColumnData { .. } => "columnData",
            WorkerResponse::CategoryData { .. } => "categoryData",
            WorkerResponse::Error { .. } => "error",
        }
    }
}

/// Transport failures between the caller and the worker thread
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("Failed to start worker thread: {0}")]
    Spawn(String),

    #[error("Worker has shut down")]
    Disconnected,
}

/// Port through which the loader talks to a worker
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkerPort: Send + Sync {
    /// Send one request and wait for its response
    async fn send(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError>;

    /// Stop accepting requests; the worker exits once its queue drains
    fn shutdown(&self);
}

enum WorkerState {
    Uninitialized,
    PayloadSet { payload: String },
    HeaderReady {
        reader: ContainerReader,
        header: Arc<ContainerHeader>,
    },
    Failed { error: ReadError },
}

/// Request handler owning the decompressed artifact.
///
/// Runs synchronously; `WorkerHandle` puts it on its own thread.
pub struct DecompressionWorker {
    state: WorkerState,
}

impl DecompressionWorker {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Uninitialized,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            WorkerState::Uninitialized => "uninitialized",
            WorkerState::PayloadSet { .. } => "payload_set",
            WorkerState::HeaderReady { .. } => "header_ready",
            WorkerState::Failed { .. } => "failed",
        }
    }

    pub fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::SetPayload { payload } => {
                debug!(bytes = payload.len(), "Payload set");
                self.state = WorkerState::PayloadSet { payload };
                WorkerResponse::Header { header: None }
            }
            WorkerRequest::LoadHeader => match self.ready() {
                Ok((_, header)) => WorkerResponse::Header {
                    header: Some(Arc::clone(header)),
                },
                Err(e) => error_response(None, None, e),
            },
            WorkerRequest::LoadColumn {
                column_name,
                category_key,
            } => match self
                .ready()
                .and_then(|(reader, _)| reader.column(&column_name, &category_key))
            {
                Ok(data) => WorkerResponse::ColumnData {
                    column_name,
                    category_key,
                    data,
                },
                Err(e) => error_response(Some(column_name), Some(category_key), e),
            },
            WorkerRequest::LoadCategory { category_key } => {
                match self.ready().and_then(|(reader, _)| reader.category(&category_key)) {
                    Ok(data) => WorkerResponse::CategoryData { category_key, data },
                    Err(e) => error_response(None, Some(category_key), e),
                }
            }
        }
    }

    /// Decompress and parse on first use; memoized afterwards
    fn ready(&mut self) -> Result<(&ContainerReader, &Arc<ContainerHeader>), ReadError> {
        if let WorkerState::PayloadSet { payload } = &self.state {
            self.state = match ContainerReader::from_payload(payload) {
                Ok(reader) => {
                    let header = Arc::new(reader.header().clone());
                    WorkerState::HeaderReady { reader, header }
                }
                Err(error) => {
                    error!(%error, "Payload could not be decoded");
                    WorkerState::Failed { error }
                }
            };
        }

        match &self.state {
            WorkerState::HeaderReady { reader, header } => Ok((reader, header)),
            WorkerState::Failed { error } => Err(error.clone()),
            WorkerState::Uninitialized | WorkerState::PayloadSet { .. } => Err(
                ReadError::InvalidFormat("No payload has been set".to_string()),
            ),
        }
    }
}

impl Default for DecompressionWorker {
    fn default() -> Self {
        Self::new()
    }
}

fn error_response(
    column_name: Option<String>,
    category_key: Option<String>,
    error: ReadError,
) -> WorkerResponse {
    warn!(?column_name, ?category_key, %error, "Worker request failed");
    WorkerResponse::Error {
        column_name,
        category_key,
        error: error.to_string(),
    }
}

struct Envelope {
    request: WorkerRequest,
    reply: oneshot::Sender<WorkerResponse>,
}

/// Handle to a worker running on a dedicated thread
pub struct WorkerHandle {
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
}

impl WorkerHandle {
    /// Start the worker thread with the default queue depth
    pub fn spawn() -> Result<Self, WorkerError> {
        Self::spawn_with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(capacity: usize) -> Result<Self, WorkerError> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        thread::Builder::new()
            .name("colpack-worker".to_string())
            .spawn(move || run(receiver))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;
        info!(capacity, "Decompression worker started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
        })
    }
}

#[async_trait]
impl WorkerPort for WorkerHandle {
    async fn send(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(WorkerError::Disconnected)?;
        let (reply, response) = oneshot::channel();
        sender
            .send(Envelope { request, reply })
            .await
            .map_err(|_| WorkerError::Disconnected)?;
        response.await.map_err(|_| WorkerError::Disconnected)
    }

    fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            info!("Decompression worker shutting down");
        }
    }
}

/// Worker thread main loop
fn run(mut receiver: mpsc::Receiver<Envelope>) {
    let _span = info_span!("worker").entered();
    let mut worker = DecompressionWorker::new();

    while let Some(Envelope { request, reply }) = receiver.blocking_recv() {
        let kind = request.kind();
        let response = worker.handle(request);
        debug!(request = kind, response = response.kind(), state = worker.state_name(), "Handled request");
        if reply.send(response).is_err() {
            debug!(request = kind, "Requester went away before the response");
        }
    }

    debug!("Request channel closed, worker exiting");
}
