use anyhow::Context;
use callscribe::config::AppConfig;
use callscribe::logging::init_logging;
use callscribe::notification::{FanoutNotificationSink, LogNotificationSink, WebhookNotificationSink};
use callscribe::pipeline::{
    AssetDescriptor, JobStatus, MediaType, QueueManager, estimate_processing_minutes,
};
use callscribe::services::{
    AssetSource, AssetStore, HttpAssetStore, HttpMediaFetcher, HttpSummarizationService,
    HttpTranscriptionService, InMemoryAssetRegistry, InMemoryAssetStore, PipelineServices,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "CALLSCRIBE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe and summarize every asset listed in a JSON manifest
    Run {
        /// Manifest file: a JSON array of assets with their media location
        manifest: PathBuf,

        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Estimate processing time for a file
    Estimate {
        /// File size in bytes
        file_size_bytes: u64,

        /// Treat the file as video
        #[arg(long)]
        video: bool,
    },
}

/// One manifest entry.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(flatten)]
    asset: AssetDescriptor,
    /// Where the media can be downloaded from.
    location: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    match args.command {
        Command::Estimate {
            file_size_bytes,
            video,
        } => {
            let media_type = if video {
                MediaType::Video
            } else {
                MediaType::Audio
            };
            println!(
                "{} minutes",
                estimate_processing_minutes(file_size_bytes, media_type)
            );
            Ok(())
        }
        Command::Run { manifest, json } => {
            let config = AppConfig::load(args.config.as_deref()).context("Failed to load config")?;
            run(config, &manifest, json).await
        }
    }
}

fn load_manifest(path: &Path) -> anyhow::Result<Vec<ManifestEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse manifest {}", path.display()))
}

fn build_services(config: &AppConfig, registry: Arc<InMemoryAssetRegistry>) -> PipelineServices {
    let asset_store: Arc<dyn AssetStore> = match &config.asset_store {
        Some(store) => Arc::new(HttpAssetStore::new(store.clone())),
        None => {
            warn!("No asset store configured, keeping results in memory");
            Arc::new(InMemoryAssetStore::new())
        }
    };

    PipelineServices {
        resolver: registry,
        fetcher: Arc::new(HttpMediaFetcher::new(config.fetch_timeout_secs)),
        transcriber: Arc::new(HttpTranscriptionService::new(config.transcription.clone())),
        summarizer: Arc::new(HttpSummarizationService::new(config.summarization.clone())),
        asset_store,
    }
}

async fn run(config: AppConfig, manifest: &Path, json: bool) -> anyhow::Result<()> {
    let (logging, _guard) = init_logging(&config.logging).context("Failed to initialize logging")?;
    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let entries = load_manifest(manifest)?;
    info!(assets = entries.len(), manifest = %manifest.display(), "Loaded manifest");

    let registry = Arc::new(InMemoryAssetRegistry::new());
    for entry in &entries {
        let media_type = entry.asset.resolved_media_type();
        let mut source = AssetSource::new(entry.location.clone(), media_type);
        if !entry.asset.file_name.is_empty() {
            source = source.with_file_name(entry.asset.file_name.clone());
        }
        registry.register(entry.asset.asset_id.clone(), source);
    }

    let mut notifier = FanoutNotificationSink::new().with_sink(Arc::new(LogNotificationSink));
    if let Some(webhook) = &config.webhook {
        notifier = notifier.with_sink(Arc::new(WebhookNotificationSink::new(webhook.clone())));
    }

    let manager = QueueManager::new(
        config.pipeline.clone(),
        build_services(&config, registry),
        Arc::new(notifier),
    );
    manager.start();

    for entry in &entries {
        if let Err(e) = manager.enqueue(&entry.asset) {
            warn!(asset_id = %entry.asset.asset_id, error = %e, "Skipping asset");
        }
    }

    tokio::select! {
        _ = manager.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling remaining jobs"),
    }

    manager.stop().await;
    shutdown.cancel();

    let snapshot = manager.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    for job in snapshot.jobs.iter() {
        match job.status {
            JobStatus::Failed => println!(
                "{:<10} {} ({})",
                job.status,
                job.file_name,
                job.error.as_deref().unwrap_or("unknown error")
            ),
            _ => println!("{:<10} {}", job.status, job.file_name),
        }
    }
    let stats = &snapshot.processing;
    println!(
        "\n{} processed, {:.1}% succeeded, {:.1} min average",
        stats.total_processed, stats.success_rate, stats.avg_processing_time_minutes
    );
    for (category, count) in &stats.error_breakdown {
        println!("  {}: {}", category, count);
    }

    Ok(())
}
