// SPDX-License-Identifier: MIT
//! colpack command line
//!
//! `pack` turns a dataset document into an embeddable payload, optionally
//! injecting it into an HTML document. `inspect` loads a payload through the
//! progressive loader and prints what it holds.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use colpack::embed::embed_payload;
use colpack::input::{read_dataset, StructureDocument};
use colpack::{ColumnRequest, Config, ContainerReader, PayloadSource, ProgressiveLoader};

#[derive(Parser)]
#[command(name = "colpack")]
#[command(about = "Pack columnar datasets into embeddable payloads", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a dataset document into a payload
    Pack {
        /// Dataset JSON: {categoryKey: {columns: [...]}}
        #[arg(short, long)]
        data: PathBuf,
        /// Structure JSON fixing category order and display metadata
        #[arg(short, long)]
        structure: Option<PathBuf>,
        /// Where to write the payload or the HTML document
        #[arg(short, long)]
        output: PathBuf,
        /// HTML template to embed the payload into
        #[arg(long)]
        html: Option<PathBuf>,
        /// Gzip level 0-9 (overrides COLPACK_GZIP_LEVEL)
        #[arg(short, long)]
        level: Option<u32>,
        /// Payload element id (overrides COLPACK_PAYLOAD_ELEMENT_ID)
        #[arg(long)]
        element_id: Option<String>,
    },
    /// Load a payload and describe its contents
    Inspect {
        /// Bare payload file or HTML document carrying one
        input: PathBuf,
        /// Columns to decode, as category:column
        #[arg(short, long)]
        column: Vec<String>,
        /// Check every column range before loading
        #[arg(long)]
        validate: bool,
        /// Payload element id (overrides COLPACK_PAYLOAD_ELEMENT_ID)
        #[arg(long)]
        element_id: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = Config::from_env();

    match cli.command {
        Commands::Pack {
            data,
            structure,
            output,
            html,
            level,
            element_id,
        } => {
            if let Some(level) = level {
                config.gzip_level = level;
            }
            if let Some(element_id) = element_id {
                config.payload_element_id = element_id;
            }
            config.validate()?;
            pack(&config, &data, structure.as_deref(), &output, html.as_deref())
        }
        Commands::Inspect {
            input,
            column,
            validate,
            element_id,
        } => {
            if let Some(element_id) = element_id {
                config.payload_element_id = element_id;
            }
            config.validate()?;
            if validate {
                validate_container(&config, &input)?;
            }
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(inspect(&config, &input, &column))
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn pack(
    config: &Config,
    data: &Path,
    structure: Option<&Path>,
    output: &Path,
    html: Option<&Path>,
) -> Result<()> {
    let dataset = read_dataset(data).with_context(|| format!("Failed to read dataset {:?}", data))?;

    let mut writer = config.packer();
    if let Some(path) = structure {
        let structure = StructureDocument::from_json_file(path)
            .with_context(|| format!("Failed to read structure {:?}", path))?;
        writer = writer.with_structure(structure);
    }

    let (payload, report) = writer.write_payload(&dataset)?;
    if !report.is_clean() {
        info!(
            skipped_columns = report.skipped_columns.len(),
            skipped_categories = report.skipped_categories.len(),
            "Packed with skipped entries"
        );
    }

    let contents = match html {
        Some(template) => {
            let document = fs::read_to_string(template)
                .with_context(|| format!("Failed to read HTML template {:?}", template))?;
            embed_payload(&document, &config.payload_element_id, &payload)
        }
        None => payload,
    };
    fs::write(output, &contents).with_context(|| format!("Failed to write {:?}", output))?;

    info!(output = %output.display(), bytes = contents.len(), "Payload written");
    Ok(())
}

fn validate_container(config: &Config, input: &Path) -> Result<()> {
    let payload = config.payload_file(input).read_payload()?;
    let reader = ContainerReader::from_payload(&payload)?;
    reader
        .container()
        .validate()
        .with_context(|| format!("Container in {:?} is malformed", input))?;
    info!(
        columns = reader.header().columns.len(),
        bytes = reader.container().size(),
        "Container layout valid"
    );
    Ok(())
}

async fn inspect(config: &Config, input: &Path, columns: &[String]) -> Result<()> {
    let requests = columns
        .iter()
        .map(|entry| {
            ColumnRequest::parse(entry)
                .with_context(|| format!("Column '{}' is not of the form category:column", entry))
        })
        .collect::<Result<Vec<_>>>()?;

    let loader = ProgressiveLoader::new(Arc::new(config.payload_file(input)), config.loader());
    let header = loader.init().await?;

    println!("format version {}", header.version);
    for (key, meta) in &header.categories {
        let descriptors: Vec<_> = header.columns_in(key).collect();
        println!(
            "{} ({}): {} columns, {} rows",
            key,
            meta.name,
            descriptors.len(),
            header.num_rows(key).unwrap_or(0)
        );
        for descriptor in descriptors {
            let logical = descriptor
                .logical()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "unsupported".to_string());
            println!("  {:<24} {:<12} {}", descriptor.name, descriptor.dtype, logical);
        }
    }

    let preloaded = loader.preload_common_columns().await + loader.preload_critical_data().await;
    if preloaded > 0 {
        info!(preloaded, "Preloaded columns");
    }

    for column in loader.load_columns(&requests).await? {
        let values = column.decode()?;
        println!("{}:{} = {}", column.category_key, column.name, values.preview(8));
    }

    let stats = loader.stats();
    info!(
        cached_columns = stats.cached_columns,
        worker_round_trips = stats.worker_round_trips,
        "Inspection finished"
    );
    loader.destroy();
    Ok(())
}
