//! Features API
//!
//! Query pages of features, or single features, of the configured collections.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use features_api::config::load_config;
use features_api::output::{feature_document, features_document};
use features_api::query::{parse_crs, FeaturesArgs};
use features_common::FeaturesError;
use features_datasource::{AxisOrderCache, FeaturesService};

/// Features API
#[derive(Parser, Debug)]
#[command(name = "features-api")]
#[command(about = "OGC API Features queries against GeoPackage and PostGIS datasources")]
struct Args {
    /// Path to the features YAML config
    #[arg(short, long, default_value = "config/features.yaml", env = "FEATURES_CONFIG")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Number of worker threads
    #[arg(long, env = "FEATURES_WORKER_THREADS")]
    worker_threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List collections with their coordinate systems and property filters
    Collections,
    /// Print a page of features as GeoJSON
    Features(FeaturesArgs),
    /// Print a single feature as GeoJSON
    Feature {
        collection: String,
        /// Feature id, numeric or UUID
        id: String,
        #[arg(long)]
        crs: Option<String>,
        #[arg(long, default_value = "rel-as-key")]
        profile: String,
    },
}

fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    }
    let runtime = match runtime_builder.build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(async move { run(args).await });
    std::process::exit(code);
}

async fn run(args: Args) -> i32 {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    info!("Starting features API");

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return 1;
        }
    };
    // datasources fail fast on missing indexes or broken metadata
    let service = match FeaturesService::new(&config, AxisOrderCache::default()).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to initialize datasources: {}", e);
            return 1;
        }
    };

    let result = execute(&service, &config.collection_ids(), args.command).await;
    service.close().await;
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

async fn execute(service: &FeaturesService, collection_ids: &[String], command: Command) -> Result<()> {
    match command {
        Command::Collections => {
            let mut collections = Vec::new();
            for id in collection_ids {
                let filters = service.get_property_filters(id)?;
                collections.push(serde_json::json!({
                    "id": id,
                    "crs": service
                        .supported_srids(id)
                        .into_iter()
                        .map(|srid| srid.to_crs_uri())
                        .collect::<Vec<_>>(),
                    "propertyFilters": filters
                        .values()
                        .map(|pf| serde_json::json!({ "name": pf.filter.name, "allowedValues": pf.allowed_values }))
                        .collect::<Vec<_>>(),
                }));
            }
            print_json(&serde_json::Value::Array(collections))
        }
        Command::Features(features_args) => {
            let request = features_args.to_request()?;
            let (fc, cursors) = service
                .get_features(&features_args.collection, &request)
                .await
                .map_err(|e| {
                    log_query_error(&e, "features query failed");
                    anyhow::anyhow!(e.features_client_message(&features_args.collection))
                })?;
            print_json(&features_document(&fc, &cursors)?)
        }
        Command::Feature {
            collection,
            id,
            crs,
            profile,
        } => {
            let feature = service
                .get_feature(&collection, &id, parse_crs(crs.as_deref())?, profile.parse()?)
                .await
                .map_err(|e| {
                    log_query_error(&e, "feature query failed");
                    anyhow::anyhow!(e.feature_client_message(&collection, &id))
                })?;
            match feature {
                Some(feature) => print_json(&feature_document(&feature)?),
                None => Err(anyhow::anyhow!("feature {} doesn't exist in collection {}", id, collection)),
            }
        }
    }
}

fn log_query_error(e: &FeaturesError, message: &str) {
    if e.is_timeout() {
        warn!(error = %e, "{}", message);
    } else {
        error!(error = %e, "{}", message);
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
