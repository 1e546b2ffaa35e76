//! Background reconciliation of newly published sets.

use crate::catalog::ingest::Ingestor;
use crate::catalog::store::CatalogStore;
use crate::catalog::upstream::UpstreamClient;
use crate::error::Result;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the reconciler loop.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Grace period before the first cycle, letting the process settle.
    pub initial_delay: Duration,

    /// Delay between full reconciliation cycles.
    pub cycle_interval: Duration,

    /// Delay between consecutive set seedings within a cycle.
    pub set_delay: Duration,

    /// Upstream set types that never contain playable game cards.
    pub ignored_set_types: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            cycle_interval: Duration::from_secs(60 * 60 * 24),
            set_delay: Duration::from_secs(2),
            ignored_set_types: ["memorabilia", "token", "minigame", "funny"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Long-lived background task that seeds sets the catalog does not have yet.
///
/// Sets are seeded strictly sequentially to respect the upstream rate limit,
/// and a failure on one set never aborts the rest of the cycle. The shutdown
/// token is honored at every await point.
pub struct Reconciler {
    upstream: Arc<UpstreamClient>,
    store: Arc<CatalogStore>,
    ingestor: Arc<Ingestor>,
    config: ReconcilerConfig,
    shutdown: CancellationToken,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        upstream: Arc<UpstreamClient>,
        store: Arc<CatalogStore>,
        ingestor: Arc<Ingestor>,
        config: ReconcilerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            upstream,
            store,
            ingestor,
            config,
            shutdown,
        }
    }

    /// Run until the shutdown token fires.
    pub async fn run(self) {
        if self.pause(self.config.initial_delay).await {
            return;
        }

        loop {
            if let Err(e) = self.run_cycle().await {
                error!("Reconciliation cycle failed: {e}");
            }

            if self.pause(self.config.cycle_interval).await {
                return;
            }
        }
    }

    /// One pass: find sets present upstream but absent locally, seed each.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<()> {
        let sets = self.upstream.list_sets().await?;

        let mut missing = Vec::new();
        for set in sets {
            if self.config.ignored_set_types.contains(&set.set_type) {
                continue;
            }
            let code = set.code.to_lowercase();
            if !self.store.set_exists(&code).await {
                missing.push(code);
            }
        }

        if missing.is_empty() {
            debug!("Catalog is complete, nothing to reconcile");
            return Ok(());
        }
        info!("Reconciling {} missing sets", missing.len());

        for (position, code) in missing.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, stopping reconciliation");
                return Ok(());
            }
            if position > 0 && self.pause(self.config.set_delay).await {
                return Ok(());
            }

            match self.ingestor.seed_set(code).await {
                Ok(report) => debug!(
                    "Seeded '{}': {} printings, {} embeddings",
                    code, report.cards_processed, report.embeddings_generated
                ),
                Err(e) => warn!("Seeding set '{code}' failed, continuing: {e}"),
            }
        }

        Ok(())
    }

    /// Sleep, or return true when shutdown fired first.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}
