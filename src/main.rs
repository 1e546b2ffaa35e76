//! Cardlens scanner server.

use cardlens::api::{ApiState, router};
use cardlens::catalog::{
    CatalogConfig, CatalogStore, Ingestor, Reconciler, ReconcilerConfig, UpstreamClient,
    UpstreamConfig,
};
use cardlens::embedding::{HashEmbedder, ImageEmbedder, OnnxEmbedder};
use cardlens::ocr::{TitleOcr, TitleReader};
use cardlens::scan::{Fuser, FuserConfig, PipelineConfig, ScanPipeline};
use cardlens::vision::Detector;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cardlens scanner server: identify MTG printings from camera photos
#[derive(Parser)]
#[command(name = "cardlens")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short, long, env = "CARDLENS_ADDRESS", default_value = "0.0.0.0:8080")]
    address: String,

    /// Path to catalog storage
    #[arg(short, long, env = "CARDLENS_STORAGE", default_value = "./cardlens.db")]
    storage: String,

    /// Path to the 512-dim ONNX embedding model. Without it, a hash
    /// embedder stands in (development only).
    #[arg(short, long, env = "CARDLENS_MODEL")]
    model: Option<String>,

    /// Directory containing Tesseract language data
    #[arg(long, env = "CARDLENS_OCR_DATA")]
    ocr_data: Option<String>,

    /// Base URL of the upstream card catalog
    #[arg(long, env = "CARDLENS_UPSTREAM", default_value = "https://api.scryfall.com")]
    upstream: String,

    /// User agent for upstream requests, including a contact address
    #[arg(long, env = "CARDLENS_USER_AGENT")]
    user_agent: Option<String>,

    /// OCR confidence required before a by-name lookup is attempted
    #[arg(long, default_value_t = 0.70)]
    ocr_inject_threshold: f32,

    /// Distance below which the vector alone confirms with high confidence
    #[arg(long, default_value_t = 0.30)]
    dist_high: f32,

    /// Distance below which the vector alone confirms with medium confidence
    #[arg(long, default_value_t = 0.42)]
    dist_med: f32,

    /// Distance at which vector-only claims are rejected
    #[arg(long, default_value_t = 0.52)]
    dist_cutoff: f32,

    /// OCR confidence required to veto a passing vector hit
    #[arg(long, default_value_t = 0.90)]
    ocr_block: f32,

    /// Attempts after which verdicts become terminal
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Seconds before the reconciler's first cycle
    #[arg(long, default_value_t = 10)]
    reconciler_initial_delay: u64,

    /// Seconds between reconciliation cycles
    #[arg(long, default_value_t = 86_400)]
    reconciler_interval: u64,

    /// Disable the background reconciler
    #[arg(long)]
    no_reconciler: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cardlens v{}", env!("CARGO_PKG_VERSION"));

    // Catalog store
    let store = Arc::new(
        CatalogStore::open(CatalogConfig::default().with_path(args.storage.clone())).await?,
    );

    // Embedding model: shared, read-only, created once.
    let embedder: Arc<dyn ImageEmbedder> = match &args.model {
        Some(path) => Arc::new(OnnxEmbedder::load(path)?),
        None => {
            warn!("No embedding model configured, falling back to hash embeddings");
            Arc::new(HashEmbedder::new())
        }
    };

    // OCR engine: optional at build and at runtime. Without it,
    // identification leans on the embedding alone.
    let ocr = build_ocr(args.ocr_data.as_deref());

    let detector = Arc::new(Detector::new());
    let title_reader = Arc::new(TitleReader::new(ocr));

    let fuser = Fuser::with_config(
        FuserConfig::default()
            .with_distances(args.dist_high, args.dist_med, args.dist_cutoff)
            .with_ocr_block(args.ocr_block)
            .with_max_attempts(args.max_attempts),
    );
    let pipeline = Arc::new(ScanPipeline::with_config(
        Arc::clone(&detector),
        Arc::clone(&embedder),
        title_reader,
        Arc::clone(&store),
        fuser,
        PipelineConfig {
            ocr_inject_threshold: args.ocr_inject_threshold,
            ..PipelineConfig::default()
        },
    ));

    // Upstream + ingestion
    let mut upstream_config = UpstreamConfig::default().with_base_url(args.upstream.clone());
    if let Some(agent) = &args.user_agent {
        upstream_config = upstream_config.with_user_agent(agent);
    }
    let upstream = Arc::new(UpstreamClient::new(upstream_config)?);
    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&upstream),
        Arc::clone(&store),
        Arc::clone(&detector),
        Arc::clone(&embedder),
    ));

    // Background reconciler
    let shutdown = CancellationToken::new();
    if args.no_reconciler {
        info!("Reconciler disabled");
    } else {
        let reconciler = Reconciler::new(
            upstream,
            Arc::clone(&store),
            Arc::clone(&ingestor),
            ReconcilerConfig {
                initial_delay: Duration::from_secs(args.reconciler_initial_delay),
                cycle_interval: Duration::from_secs(args.reconciler_interval),
                ..ReconcilerConfig::default()
            },
            shutdown.clone(),
        );
        tokio::spawn(reconciler.run());
    }

    // HTTP surface
    let app = router(Arc::new(ApiState { pipeline, ingestor }));
    let listener = tokio::net::TcpListener::bind(&args.address).await?;

    info!("Listening on {}", args.address);
    info!("Storage: {}", args.storage);
    info!(
        "Catalog: {} printings ({} embedded)",
        store.stats().printing_count,
        store.stats().embedding_count
    );

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    Ok(())
}

#[cfg(feature = "ocr")]
fn build_ocr(data_path: Option<&str>) -> Arc<dyn TitleOcr> {
    use cardlens::ocr::{TesseractOcrConfig, TesseractTitleOcr};

    let mut config = TesseractOcrConfig::default();
    if let Some(path) = data_path {
        config = config.with_data_path(path);
    }

    match TesseractTitleOcr::with_config(config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            warn!("Tesseract unavailable, title reading disabled: {e}");
            Arc::new(cardlens::ocr::FixtureTitleOcr::failing())
        }
    }
}

#[cfg(not(feature = "ocr"))]
fn build_ocr(_data_path: Option<&str>) -> Arc<dyn TitleOcr> {
    warn!("Built without the 'ocr' feature, title reading disabled");
    Arc::new(cardlens::ocr::FixtureTitleOcr::failing())
}
