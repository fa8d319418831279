// SPDX-License-Identifier: MIT
//! Progressive loader
//!
//! The single entry point the rendering side talks to. It owns the worker,
//! coalesces concurrent requests for the same key into one worker round-trip
//! and caches results for the lifetime of the loader. Cached entries are
//! handed out by `Arc`, so repeated requests return the very same buffer.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError, ColumnValues, TypedArray};
use crate::embed::{PayloadSource, SourceError};
use crate::format::{ColumnDescriptor, ContainerHeader, LogicalType, StorageType};
use crate::worker::{WorkerError, WorkerHandle, WorkerPort, WorkerRequest, WorkerResponse};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoaderError {
    #[error("Payload unavailable: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Request failed for {}: {message}", describe_key(.category_key, .column_name))]
    Request {
        column_name: Option<String>,
        category_key: Option<String>,
        message: String,
    },

    #[error("Unexpected '{received}' response to '{request}'")]
    UnexpectedResponse {
        request: &'static str,
        received: &'static str,
    },

    #[error("Column {category_key}:{column_name} missing from header")]
    MissingDescriptor {
        column_name: String,
        category_key: String,
    },
}

fn describe_key(category_key: &Option<String>, column_name: &Option<String>) -> String {
    match (category_key, column_name) {
        (Some(category), Some(column)) => format!("{}:{}", category, column),
        (Some(category), None) => category.clone(),
        (None, Some(column)) => column.clone(),
        (None, None) => "header".to_string(),
    }
}

/// Settings for the loader
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// `(category, column)` pairs warmed by `preload_common_columns`
    pub common_columns: Vec<ColumnRequest>,

    /// Request queue depth of the worker created by `init`
    pub worker_queue_capacity: Option<usize>,
}

/// One `(category, column)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRequest {
    pub category_key: String,
    pub column_name: String,
}

impl ColumnRequest {
    pub fn new(category_key: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            category_key: category_key.into(),
            column_name: column_name.into(),
        }
    }

    /// Parse `category:column`
    pub fn parse(entry: &str) -> Option<Self> {
        let (category, column) = entry.split_once(':')?;
        let (category, column) = (category.trim(), column.trim());
        (!category.is_empty() && !column.is_empty()).then(|| Self::new(category, column))
    }

    fn cache_key(&self) -> String {
        column_key(&self.category_key, &self.column_name)
    }
}

fn column_key(category_key: &str, column_name: &str) -> String {
    format!("{}:{}", category_key, column_name)
}

/// A column as handed to the rendering side
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedColumn {
    pub name: String,
    pub category_key: String,
    pub dtype: StorageType,
    pub logical_type: LogicalType,
    pub data: TypedArray,
    pub categories: Option<Vec<String>>,
}

impl LoadedColumn {
    fn from_descriptor(descriptor: &ColumnDescriptor, data: TypedArray) -> Result<Self, LoaderError> {
        let unsupported = || LoaderError::Request {
            column_name: Some(descriptor.name.clone()),
            category_key: Some(descriptor.category_key.clone()),
            message: format!("unsupported dtype '{}'", descriptor.dtype),
        };
        Ok(Self {
            name: descriptor.name.clone(),
            category_key: descriptor.category_key.clone(),
            dtype: descriptor.storage_type().ok_or_else(unsupported)?,
            logical_type: descriptor.logical().ok_or_else(unsupported)?,
            data,
            categories: descriptor.categories.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Resolve into logical values (labels for categorical columns)
    pub fn decode(&self) -> Result<ColumnValues, CodecError> {
        codec::decode(&self.data, self.logical_type, self.categories.as_deref())
    }
}

/// Every column of one category
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCategory {
    pub key: String,
    pub columns: BTreeMap<String, Arc<LoadedColumn>>,
}

impl LoadedCategory {
    pub fn column(&self, name: &str) -> Option<&Arc<LoadedColumn>> {
        self.columns.get(name)
    }
}

/// Counters describing cache behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub cached_columns: usize,
    pub cached_categories: usize,
    pub cache_hits: u64,
    pub coalesced_requests: u64,
    pub worker_round_trips: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    coalesced_requests: AtomicU64,
    worker_round_trips: AtomicU64,
}

type PendingLoad<T> = Shared<BoxFuture<'static, Result<Arc<T>, LoaderError>>>;

/// Builds the worker on first `init`
pub type WorkerFactory =
    Box<dyn Fn(&LoaderConfig) -> Result<Arc<dyn WorkerPort>, WorkerError> + Send + Sync>;

pub struct ProgressiveLoader {
    source: Arc<dyn PayloadSource>,
    config: LoaderConfig,
    factory: WorkerFactory,
    worker: OnceCell<Arc<dyn WorkerPort>>,
    header: OnceCell<Arc<ContainerHeader>>,
    columns: Mutex<HashMap<String, Arc<LoadedColumn>>>,
    categories: Mutex<HashMap<String, Arc<LoadedCategory>>>,
    pending_columns: Mutex<HashMap<String, PendingLoad<LoadedColumn>>>,
    pending_categories: Mutex<HashMap<String, PendingLoad<LoadedCategory>>>,
    counters: Arc<Counters>,
}

impl ProgressiveLoader {
    /// Create a loader that starts its own worker thread on `init`
    pub fn new(source: Arc<dyn PayloadSource>, config: LoaderConfig) -> Self {
        Self::with_factory(
            source,
            config,
            Box::new(|config: &LoaderConfig| {
                let capacity = config
                    .worker_queue_capacity
                    .unwrap_or(crate::worker::DEFAULT_QUEUE_CAPACITY);
                let handle = WorkerHandle::spawn_with_capacity(capacity)?;
                Ok(Arc::new(handle) as Arc<dyn WorkerPort>)
            }),
        )
    }

    /// Create a loader around an existing worker
    pub fn with_worker(
        source: Arc<dyn PayloadSource>,
        config: LoaderConfig,
        worker: Arc<dyn WorkerPort>,
    ) -> Self {
        Self::with_factory(
            source,
            config,
            Box::new(move |_: &LoaderConfig| Ok(Arc::clone(&worker))),
        )
    }

    pub fn with_factory(
        source: Arc<dyn PayloadSource>,
        config: LoaderConfig,
        factory: WorkerFactory,
    ) -> Self {
        Self {
            source,
            config,
            factory,
            worker: OnceCell::new(),
            header: OnceCell::new(),
            columns: Mutex::new(HashMap::new()),
            categories: Mutex::new(HashMap::new()),
            pending_columns: Mutex::new(HashMap::new()),
            pending_categories: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start the worker, hand it the payload and wait for the header.
    ///
    /// Idempotent and safe to call concurrently; only the first call does work.
    pub async fn init(&self) -> Result<Arc<ContainerHeader>, LoaderError> {
        self.header
            .get_or_try_init(|| self.handshake())
            .await
            .cloned()
    }

    async fn handshake(&self) -> Result<Arc<ContainerHeader>, LoaderError> {
        let worker = self.worker().await?;
        let payload = self.source.read_payload()?;
        info!(payload_bytes = payload.len(), "Initializing progressive loader");

        self.counters.worker_round_trips.fetch_add(1, Ordering::Relaxed);
        match worker.send(WorkerRequest::SetPayload { payload }).await? {
            WorkerResponse::Header { .. } => {}
            other => return Err(response_error("setPayload", other)),
        }

        self.counters.worker_round_trips.fetch_add(1, Ordering::Relaxed);
        match worker.send(WorkerRequest::LoadHeader).await? {
            WorkerResponse::Header {
                header: Some(header),
            } => {
                info!(
                    categories = header.categories.len(),
                    columns = header.columns.len(),
                    "Header loaded"
                );
                Ok(header)
            }
            other => Err(response_error("loadHeader", other)),
        }
    }

    /// Header, if `init` has completed
    pub fn header(&self) -> Option<Arc<ContainerHeader>> {
        self.header.get().cloned()
    }

    async fn worker(&self) -> Result<Arc<dyn WorkerPort>, LoaderError> {
        let worker = self
            .worker
            .get_or_try_init(|| async { (self.factory)(&self.config) })
            .await?;
        Ok(Arc::clone(worker))
    }

    /// Load one column; concurrent calls for the same key share one round-trip
    pub async fn load_column(
        &self,
        column_name: &str,
        category_key: &str,
    ) -> Result<Arc<LoadedColumn>, LoaderError> {
        let key = column_key(category_key, column_name);
        if let Some(hit) = self.cached_column(&key) {
            return Ok(hit);
        }

        let header = self.init().await?;
        let worker = self.worker().await?;

        let pending = {
            let mut pending = self.pending_columns.lock();
            // A request may have completed between the first check and taking the lock
            if let Some(hit) = self.cached_column(&key) {
                return Ok(hit);
            }
            match pending.get(&key) {
                Some(in_flight) => {
                    self.counters.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, "Joining in-flight column request");
                    in_flight.clone()
                }
                None => {
                    let load = fetch_column(
                        worker,
                        header,
                        Arc::clone(&self.counters),
                        column_name.to_string(),
                        category_key.to_string(),
                    )
                    .boxed()
                    .shared();
                    pending.insert(key.clone(), load.clone());
                    load
                }
            }
        };

        let result = pending.clone().await;
        let outcome =
            result.map(|column| Arc::clone(self.columns.lock().entry(key.clone()).or_insert(column)));
        remove_pending(&self.pending_columns, &key, &pending);
        outcome
    }

    /// Load every column of a category
    pub async fn load_category(&self, category_key: &str) -> Result<Arc<LoadedCategory>, LoaderError> {
        if let Some(hit) = self.cached_category(category_key) {
            return Ok(hit);
        }

        let header = self.init().await?;
        let worker = self.worker().await?;

        let pending = {
            let mut pending = self.pending_categories.lock();
            if let Some(hit) = self.cached_category(category_key) {
                return Ok(hit);
            }
            match pending.get(category_key) {
                Some(in_flight) => {
                    self.counters.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                    debug!(category = %category_key, "Joining in-flight category request");
                    in_flight.clone()
                }
                None => {
                    let load = fetch_category(
                        worker,
                        header,
                        Arc::clone(&self.counters),
                        category_key.to_string(),
                    )
                    .boxed()
                    .shared();
                    pending.insert(category_key.to_string(), load.clone());
                    load
                }
            }
        };

        let result = pending.clone().await;
        let outcome = result.map(|category| {
            // Columns loaded with their category also serve later column requests
            let mut columns = self.columns.lock();
            for (name, column) in &category.columns {
                columns
                    .entry(column_key(category_key, name))
                    .or_insert_with(|| Arc::clone(column));
            }
            drop(columns);
            Arc::clone(
                self.categories
                    .lock()
                    .entry(category_key.to_string())
                    .or_insert(category),
            )
        });
        remove_pending(&self.pending_categories, category_key, &pending);
        outcome
    }

    /// Load several columns concurrently.
    ///
    /// Every request runs to completion; the first failure is returned.
    pub async fn load_columns(
        &self,
        requests: &[ColumnRequest],
    ) -> Result<Vec<Arc<LoadedColumn>>, LoaderError> {
        join_all(
            requests
                .iter()
                .map(|r| self.load_column(&r.column_name, &r.category_key)),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Warm the configured common columns; failures are logged, not returned
    pub async fn preload_common_columns(&self) -> usize {
        let requests = self.config.common_columns.clone();
        self.preload(&requests, "common").await
    }

    /// Warm the columns named in each category's default filters
    pub async fn preload_critical_data(&self) -> usize {
        let header = match self.init().await {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "Preload skipped, loader failed to initialize");
                return 0;
            }
        };

        let requests: Vec<ColumnRequest> = header
            .categories
            .iter()
            .flat_map(|(key, meta)| {
                meta.filter_columns()
                    .into_iter()
                    .filter(|name| header.find_column(key, name).is_some())
                    .map(|name| ColumnRequest::new(key.as_str(), name))
                    .collect::<Vec<_>>()
            })
            .collect();
        self.preload(&requests, "critical").await
    }

    async fn preload(&self, requests: &[ColumnRequest], label: &str) -> usize {
        let results = join_all(
            requests
                .iter()
                .map(|r| self.load_column(&r.column_name, &r.category_key)),
        )
        .await;

        let mut loaded = 0;
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(_) => loaded += 1,
                Err(e) => warn!(
                    preload = label,
                    key = %request.cache_key(),
                    error = %e,
                    "Preload failed"
                ),
            }
        }
        debug!(preload = label, loaded, requested = requests.len(), "Preload finished");
        loaded
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            cached_columns: self.columns.lock().len(),
            cached_categories: self.categories.lock().len(),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            coalesced_requests: self.counters.coalesced_requests.load(Ordering::Relaxed),
            worker_round_trips: self.counters.worker_round_trips.load(Ordering::Relaxed),
        }
    }

    /// Shut the worker down and release every cached buffer
    pub fn destroy(self) {
        if let Some(worker) = self.worker.get() {
            worker.shutdown();
        }
        let stats = self.stats();
        info!(
            cached_columns = stats.cached_columns,
            cached_categories = stats.cached_categories,
            "Progressive loader destroyed"
        );
    }

    fn cached_column(&self, key: &str) -> Option<Arc<LoadedColumn>> {
        let hit = self.columns.lock().get(key).cloned();
        if hit.is_some() {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    fn cached_category(&self, key: &str) -> Option<Arc<LoadedCategory>> {
        let hit = self.categories.lock().get(key).cloned();
        if hit.is_some() {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }
}

/// Drop the in-flight entry, unless a newer request has replaced it
fn remove_pending<T>(
    pending: &Mutex<HashMap<String, PendingLoad<T>>>,
    key: &str,
    finished: &PendingLoad<T>,
) {
    let mut pending = pending.lock();
    if pending.get(key).is_some_and(|current| current.ptr_eq(finished)) {
        pending.remove(key);
    }
}

fn response_error(request: &'static str, response: WorkerResponse) -> LoaderError {
    match response {
        WorkerResponse::Error {
            column_name,
            category_key,
            error,
        } => LoaderError::Request {
            column_name,
            category_key,
            message: error,
        },
        other => LoaderError::UnexpectedResponse {
            request,
            received: other.kind(),
        },
    }
}

async fn fetch_column(
    worker: Arc<dyn WorkerPort>,
    header: Arc<ContainerHeader>,
    counters: Arc<Counters>,
    column_name: String,
    category_key: String,
) -> Result<Arc<LoadedColumn>, LoaderError> {
    counters.worker_round_trips.fetch_add(1, Ordering::Relaxed);
    let request = WorkerRequest::LoadColumn {
        column_name,
        category_key,
    };
    match worker.send(request).await? {
        WorkerResponse::ColumnData {
            column_name,
            category_key,
            data,
        } => {
            let descriptor = header.find_column(&category_key, &column_name).ok_or(
                LoaderError::MissingDescriptor {
                    column_name: column_name.clone(),
                    category_key: category_key.clone(),
                },
            )?;
            debug!(category = %category_key, column = %column_name, rows = data.len(), "Column loaded");
            Ok(Arc::new(LoadedColumn::from_descriptor(descriptor, data)?))
        }
        other => Err(response_error("loadColumn", other)),
    }
}

async fn fetch_category(
    worker: Arc<dyn WorkerPort>,
    header: Arc<ContainerHeader>,
    counters: Arc<Counters>,
    category_key: String,
) -> Result<Arc<LoadedCategory>, LoaderError> {
    counters.worker_round_trips.fetch_add(1, Ordering::Relaxed);
    let request = WorkerRequest::LoadCategory { category_key };
    match worker.send(request).await? {
        WorkerResponse::CategoryData { category_key, data } => {
            let mut columns = BTreeMap::new();
            for (name, buffer) in data {
                let descriptor = header.find_column(&category_key, &name).ok_or(
                    LoaderError::MissingDescriptor {
                        column_name: name.clone(),
                        category_key: category_key.clone(),
                    },
                )?;
                let column = LoadedColumn::from_descriptor(descriptor, buffer)?;
                columns.insert(name, Arc::new(column));
            }
            debug!(category = %category_key, columns = columns.len(), "Category loaded");
            Ok(Arc::new(LoadedCategory {
                key: category_key,
                columns,
            }))
        }
        other => Err(response_error("loadCategory", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::StaticPayload;
    use crate::worker::MockWorkerPort;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_header() -> Arc<ContainerHeader> {
        let mut header = ContainerHeader::new();
        header.columns.push(ColumnDescriptor {
            name: "x".into(),
            category_key: "cells".into(),
            dtype: "float32".into(),
            offset: 0,
            length: 2,
            logical_type: Some(LogicalType::Numeric),
            categories: None,
        });
        header.columns.push(ColumnDescriptor {
            name: "type".into(),
            category_key: "cells".into(),
            dtype: "categorical".into(),
            offset: 8,
            length: 2,
            logical_type: Some(LogicalType::Categorical),
            categories: Some(vec!["T".into(), "B".into()]),
        });
        Arc::new(header)
    }

    /// Worker that answers from fixed data after a short delay, counting requests
    struct SlowWorker {
        header: Arc<ContainerHeader>,
        column_requests: AtomicUsize,
        category_requests: AtomicUsize,
    }

    impl SlowWorker {
        fn new() -> Self {
            Self {
                header: test_header(),
                column_requests: AtomicUsize::new(0),
                category_requests: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkerPort for SlowWorker {
        async fn send(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(match request {
                WorkerRequest::SetPayload { .. } => WorkerResponse::Header { header: None },
                WorkerRequest::LoadHeader => WorkerResponse::Header {
                    header: Some(Arc::clone(&self.header)),
                },
                WorkerRequest::LoadColumn {
                    column_name,
                    category_key,
                } => {
                    self.column_requests.fetch_add(1, Ordering::SeqCst);
                    let data = match column_name.as_str() {
                        "x" => TypedArray::Float32(vec![1.0, 2.0]),
                        "type" => TypedArray::Int32(vec![1, 0]),
                        _ => {
                            return Ok(WorkerResponse::Error {
                                column_name: Some(column_name),
                                category_key: Some(category_key),
                                error: "Column not found".into(),
                            })
                        }
                    };
                    WorkerResponse::ColumnData {
                        column_name,
                        category_key,
                        data,
                    }
                }
                WorkerRequest::LoadCategory { category_key } => {
                    self.category_requests.fetch_add(1, Ordering::SeqCst);
                    let mut data = BTreeMap::new();
                    data.insert("x".to_string(), TypedArray::Float32(vec![1.0, 2.0]));
                    data.insert("type".to_string(), TypedArray::Int32(vec![1, 0]));
                    WorkerResponse::CategoryData { category_key, data }
                }
            })
        }

        fn shutdown(&self) {}
    }

    fn loader_with(worker: Arc<dyn WorkerPort>) -> ProgressiveLoader {
        ProgressiveLoader::with_worker(
            Arc::new(StaticPayload("unused".into())),
            LoaderConfig::default(),
            worker,
        )
    }

    /// Mock that accepts the init handshake
    fn mock_with_init() -> MockWorkerPort {
        let mut mock = MockWorkerPort::new();
        let header = test_header();
        mock.expect_send()
            .withf(|r| matches!(r, WorkerRequest::SetPayload { .. }))
            .times(1)
            .returning(|_| Ok(WorkerResponse::Header { header: None }));
        mock.expect_send()
            .withf(|r| matches!(r, WorkerRequest::LoadHeader))
            .times(1)
            .returning(move |_| {
                Ok(WorkerResponse::Header {
                    header: Some(Arc::clone(&header)),
                })
            });
        mock
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let loader = loader_with(Arc::new(mock_with_init()));
        let (a, b) = tokio::join!(loader.init(), loader.init());
        let c = loader.init().await.unwrap();
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(c.columns.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_column_requests_coalesce() {
        let worker = Arc::new(SlowWorker::new());
        let loader = loader_with(worker.clone());
        loader.init().await.unwrap();

        let (a, b) = tokio::join!(
            loader.load_column("x", "cells"),
            loader.load_column("x", "cells")
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(worker.column_requests.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.data, TypedArray::Float32(vec![1.0, 2.0]));
        assert_eq!(loader.stats().coalesced_requests, 1);
    }

    #[tokio::test]
    async fn test_cached_column_skips_worker() {
        let mut mock = mock_with_init();
        mock.expect_send()
            .withf(|r| matches!(r, WorkerRequest::LoadColumn { .. }))
            .times(1)
            .returning(|_| {
                Ok(WorkerResponse::ColumnData {
                    column_name: "type".into(),
                    category_key: "cells".into(),
                    data: TypedArray::Int32(vec![0, 1]),
                })
            });
        let loader = loader_with(Arc::new(mock));

        let first = loader.load_column("type", "cells").await.unwrap();
        let second = loader.load_column("type", "cells").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.dtype, StorageType::Categorical);
        assert_eq!(
            first.decode().unwrap(),
            ColumnValues::Categorical(vec![Some("T".into()), Some("B".into())])
        );

        let stats = loader.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cached_columns, 1);
    }

    #[tokio::test]
    async fn test_error_rejects_and_does_not_poison_cache() {
        let worker = Arc::new(SlowWorker::new());
        let loader = loader_with(worker.clone());

        let err = loader.load_column("missing", "cells").await.unwrap_err();
        assert_eq!(
            err,
            LoaderError::Request {
                column_name: Some("missing".into()),
                category_key: Some("cells".into()),
                message: "Column not found".into(),
            }
        );
        assert!(err.to_string().contains("cells:missing"));

        // A failed key is retried, other keys are unaffected
        assert!(loader.load_column("missing", "cells").await.is_err());
        assert_eq!(worker.column_requests.load(Ordering::SeqCst), 2);
        assert!(loader.load_column("x", "cells").await.is_ok());
        assert_eq!(loader.stats().cached_columns, 1);
    }

    #[tokio::test]
    async fn test_category_seeds_column_cache() {
        let worker = Arc::new(SlowWorker::new());
        let loader = loader_with(worker.clone());

        let (a, b) = tokio::join!(loader.load_category("cells"), loader.load_category("cells"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(worker.category_requests.load(Ordering::SeqCst), 1);
        assert_eq!(a.columns.len(), 2);

        let x = loader.load_column("x", "cells").await.unwrap();
        assert!(Arc::ptr_eq(&x, a.column("x").unwrap()));
        assert_eq!(worker.column_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_columns_returns_first_error() {
        let worker = Arc::new(SlowWorker::new());
        let loader = loader_with(worker.clone());
        loader.init().await.unwrap();

        let columns = loader
            .load_columns(&[
                ColumnRequest::new("cells", "x"),
                ColumnRequest::new("cells", "type"),
            ])
            .await
            .unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].name, "type");
        assert_eq!(worker.column_requests.load(Ordering::SeqCst), 2);

        let err = loader
            .load_columns(&[
                ColumnRequest::new("cells", "x"),
                ColumnRequest::new("cells", "nope"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Request { .. }));
    }

    #[tokio::test]
    async fn test_preload_swallows_failures() {
        let worker = Arc::new(SlowWorker::new());
        let config = LoaderConfig {
            common_columns: vec![
                ColumnRequest::new("cells", "x"),
                ColumnRequest::new("cells", "nope"),
            ],
            worker_queue_capacity: None,
        };
        let loader = ProgressiveLoader::with_worker(
            Arc::new(StaticPayload("unused".into())),
            config,
            worker,
        );

        assert_eq!(loader.preload_common_columns().await, 1);
        assert!(loader.load_column("x", "cells").await.is_ok());
    }

    #[tokio::test]
    async fn test_init_failure_propagates() {
        let mut mock = MockWorkerPort::new();
        mock.expect_send()
            .withf(|r| matches!(r, WorkerRequest::SetPayload { .. }))
            .returning(|_| Ok(WorkerResponse::Header { header: None }));
        mock.expect_send()
            .withf(|r| matches!(r, WorkerRequest::LoadHeader))
            .returning(|_| {
                Ok(WorkerResponse::Error {
                    column_name: None,
                    category_key: None,
                    error: "Invalid header".into(),
                })
            });
        let loader = loader_with(Arc::new(mock));

        assert!(matches!(
            loader.load_column("x", "cells").await,
            Err(LoaderError::Request { .. })
        ));
        assert_eq!(loader.preload_critical_data().await, 0);
        assert!(loader.header().is_none());
    }

    #[test]
    fn test_column_request_parse() {
        assert_eq!(
            ColumnRequest::parse("cells: leiden"),
            Some(ColumnRequest::new("cells", "leiden"))
        );
        assert_eq!(ColumnRequest::parse("cells"), None);
        assert_eq!(ColumnRequest::parse(":x"), None);
    }
}
