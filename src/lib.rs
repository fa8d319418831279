// SPDX-License-Identifier: MIT
//! # colpack
//!
//! Progressive columnar payloads for self-contained documents.
//!
//! A producer packs a multi-category tabular dataset into one compressed,
//! text-safe payload that is embedded in a document. A consumer then decodes
//! only the columns a view needs, on demand, off the caller's thread.
//!
//! ## Pipeline
//!
//! ```text
//! dataset JSON ──codec──▶ typed buffers ──writer──▶ container bytes
//!     ──gzip+base64──▶ payload ──embed──▶ <script id="data-payload">
//!
//! <script> ──PayloadSource──▶ ProgressiveLoader ──mpsc──▶ worker thread
//!     (decompress once, parse header) ──▶ owned column buffers
//! ```
//!
//! ## Container layout
//!
//! ```text
//! [u32 LE header length N][N bytes JSON header][0-3 zero bytes][column data]
//! ```
//!
//! Every column is four bytes per element (`int32`, `float32` or
//! `categorical` indices), so the data region start is aligned to four bytes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use colpack::{HtmlDocument, LoaderConfig, ProgressiveLoader};
//!
//! # async fn run(html: String) -> Result<(), colpack::LoaderError> {
//! let loader = ProgressiveLoader::new(
//!     Arc::new(HtmlDocument::new(html)),
//!     LoaderConfig::default(),
//! );
//! let header = loader.init().await?;
//! let umap = loader.load_column("umap_1", "cells").await?;
//! println!("{} categories, {} rows", header.categories.len(), umap.len());
//! loader.destroy();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod container;
pub mod embed;
pub mod format;
pub mod input;
pub mod loader;
pub mod payload;
pub mod reader;
pub mod worker;
pub mod writer;

pub use codec::{ColumnValues, TypedArray};
pub use config::{Config, ConfigError};
pub use container::Container;
pub use embed::{HtmlDocument, PayloadFile, PayloadSource, SourceError, StaticPayload};
pub use format::{CategoryMeta, ColumnDescriptor, ContainerHeader, LogicalType, StorageType};
pub use input::{DatasetInput, StructureDocument};
pub use loader::{
    ColumnRequest, LoadedCategory, LoadedColumn, LoaderConfig, LoaderError, LoaderStats,
    ProgressiveLoader,
};
pub use reader::{ContainerReader, ReadError};
pub use worker::{DecompressionWorker, WorkerHandle, WorkerPort, WorkerRequest, WorkerResponse};
pub use writer::{ContainerWriter, PackReport, PackedContainer, WriteError};
