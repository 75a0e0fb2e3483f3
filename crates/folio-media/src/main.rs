#![warn(missing_docs)]

//! folio-media: serves repository assets behind opaque identifiers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use folio_media::sync::collect_source_files;
use folio_media::{api, sync_assets, AssetDelivery, AssetRegistry, MediaConfig, VariantPipeline};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Folio asset server.
#[derive(Debug, Parser)]
#[command(name = "folio-media", version, about)]
struct Cli {
    /// Path to a TOML or JSON configuration file.
    #[arg(short, long, env = "FOLIO_CONFIG", default_value = "folio.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = if config_found {
        MediaConfig::from_file(&cli.config)?
    } else {
        MediaConfig::default()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if !config_found {
        warn!("Config file not found, using defaults: {}", cli.config.display());
    }
    config.apply_env()?;
    config.validate()?;

    let store = config.build_store()?;
    info!(backend = store.backend_name(), "folio-media starting");

    if config.sync_on_start {
        sync_assets(store.as_ref(), &config.sources_dir).await?;
    }

    let registry = Arc::new(AssetRegistry::new(store.clone(), config.namespace()?));
    match collect_source_files(&config.sources_dir).await {
        Ok(files) => {
            for file in files {
                let id = registry.obfuscate(&file.key)?;
                debug!(path = %file.key, %id, "asset published");
            }
            info!(assets = registry.len(), "asset registry ready");
        }
        Err(e) => warn!(dir = %config.sources_dir.display(), error = %e, "no source assets registered"),
    }

    let root = CancellationToken::new();
    let pipeline = Arc::new(VariantPipeline::start(&config.pipeline, store.clone(), &root));
    let delivery = Arc::new(AssetDelivery::new(
        registry,
        pipeline.clone(),
        store,
        config.pipeline.job_timeout(),
    ));

    let signal_token = root.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        signal_token.cancel();
    });

    let served = api::serve(config.bind_addr, api::router(delivery), root.clone()).await;
    root.cancel();
    pipeline.shutdown().await;
    served
}
