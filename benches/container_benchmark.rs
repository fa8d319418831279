// SPDX-License-Identifier: MIT
//! Benchmarks for packing, decompression and progressive column access

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

use colpack::input::{CategoryInput, ColumnInput, DatasetInput};
use colpack::reader::{decompress, extract_category, extract_column};
use colpack::{ContainerReader, ContainerWriter, LoaderConfig, ProgressiveLoader, StaticPayload};

const LABELS: &[&str] = &["T", "B", "NK", "Mono", "DC", "pDC", "Platelet"];

/// A cell table and a gene table, sized like a mid-sized single-cell report
fn create_test_data(cells: usize, genes: usize) -> DatasetInput {
    let numeric = |n: usize, scale: f64| -> Value {
        Value::Array((0..n).map(|i| json!((i as f64 * scale).sin() * 10.0)).collect())
    };

    let mut dataset = DatasetInput::new();
    dataset.insert(
        "cells".to_string(),
        CategoryInput {
            columns: vec![
                ColumnInput::new("umap_1", Some("numeric"), numeric(cells, 0.37)),
                ColumnInput::new("umap_2", Some("numeric"), numeric(cells, 0.53)),
                ColumnInput::new(
                    "n_genes",
                    Some("integer"),
                    Value::Array((0..cells).map(|i| json!(200 + (i * 7919) % 5000)).collect()),
                ),
                ColumnInput::new(
                    "cell_type",
                    Some("categorical"),
                    Value::Array(
                        (0..cells)
                            .map(|i| json!(LABELS[(i * 31) % LABELS.len()]))
                            .collect(),
                    ),
                ),
                ColumnInput::new(
                    "is_doublet",
                    Some("boolean"),
                    Value::Array((0..cells).map(|i| json!(i % 97 == 0)).collect()),
                ),
            ],
        },
    );
    dataset.insert(
        "genes".to_string(),
        CategoryInput {
            columns: vec![
                ColumnInput::new("mean", Some("numeric"), numeric(genes, 0.11)),
                ColumnInput::new("dispersion", Some("numeric"), numeric(genes, 0.29)),
            ],
        },
    );
    dataset
}

fn benchmark_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack");
    for cells in [10_000usize, 100_000] {
        let dataset = create_test_data(cells, 2_000);
        group.throughput(Throughput::Elements(cells as u64));
        group.bench_with_input(BenchmarkId::new("container", cells), &dataset, |b, dataset| {
            b.iter(|| ContainerWriter::new().pack(black_box(dataset)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("payload", cells), &dataset, |b, dataset| {
            b.iter(|| ContainerWriter::new().write_payload(black_box(dataset)).unwrap())
        });
    }
    group.finish();
}

fn benchmark_decompress(c: &mut Criterion) {
    let (payload, _) = ContainerWriter::new()
        .write_payload(&create_test_data(100_000, 2_000))
        .unwrap();

    c.bench_function("decompress_payload", |b| {
        b.iter(|| decompress(black_box(&payload)).unwrap())
    });
    c.bench_function("decompress_and_parse_header", |b| {
        b.iter(|| ContainerReader::from_payload(black_box(&payload)).unwrap())
    });
}

fn benchmark_extract(c: &mut Criterion) {
    let packed = ContainerWriter::new()
        .pack(&create_test_data(100_000, 2_000))
        .unwrap();

    c.bench_function("extract_single_column", |b| {
        b.iter(|| extract_column(black_box(&packed.bytes), &packed.header, "umap_1", "cells").unwrap())
    });
    c.bench_function("extract_whole_category", |b| {
        b.iter(|| extract_category(black_box(&packed.bytes), &packed.header, "cells").unwrap())
    });

    let reader = ContainerReader::from_vec(packed.bytes.clone()).unwrap();
    c.bench_function("decode_categorical_column", |b| {
        b.iter(|| reader.decode_column(black_box("cell_type"), "cells").unwrap())
    });
}

fn benchmark_loader_cache(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (payload, _) = ContainerWriter::new()
        .write_payload(&create_test_data(10_000, 500))
        .unwrap();
    let loader = ProgressiveLoader::new(Arc::new(StaticPayload(payload)), LoaderConfig::default());
    runtime.block_on(loader.load_column("umap_1", "cells")).unwrap();

    c.bench_function("loader_cached_column", |b| {
        b.to_async(&runtime)
            .iter(|| async { loader.load_column(black_box("umap_1"), "cells").await.unwrap() })
    });

    c.bench_function("loader_cold_init", |b| {
        let (payload, _) = ContainerWriter::new()
            .write_payload(&create_test_data(10_000, 500))
            .unwrap();
        b.to_async(&runtime).iter(|| {
            let payload = payload.clone();
            async move {
                let loader =
                    ProgressiveLoader::new(Arc::new(StaticPayload(payload)), LoaderConfig::default());
                let header = loader.init().await.unwrap();
                loader.destroy();
                header
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_pack,
    benchmark_decompress,
    benchmark_extract,
    benchmark_loader_cache
);
criterion_main!(benches);
