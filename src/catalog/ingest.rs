//! Set ingestion: upstream printings in, embeddings out.

use crate::catalog::store::CatalogStore;
use crate::catalog::upstream::{PageFetch, UpstreamClient};
use crate::embedding::ImageEmbedder;
use crate::error::{Error, Result};
use crate::vision::Detector;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Pacing for upstream requests. The upstream is rate-limited; fixed sleeps
/// keep a whole seeding run under its ceiling.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Delay between search result pages.
    pub page_delay: Duration,

    /// Delay between card image downloads.
    pub image_delay: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(100),
            image_delay: Duration::from_millis(150),
        }
    }
}

/// Counters reported by one seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SeedReport {
    /// Printings upserted from upstream pages.
    pub cards_processed: usize,

    /// Embeddings generated for printings that lacked one.
    pub embeddings_generated: usize,
}

/// Seeds the catalog from the upstream API, one set at a time.
pub struct Ingestor {
    upstream: Arc<UpstreamClient>,
    store: Arc<CatalogStore>,
    detector: Arc<Detector>,
    embedder: Arc<dyn ImageEmbedder>,
    config: IngestorConfig,
}

impl Ingestor {
    /// Create an ingestor with default pacing.
    pub fn new(
        upstream: Arc<UpstreamClient>,
        store: Arc<CatalogStore>,
        detector: Arc<Detector>,
        embedder: Arc<dyn ImageEmbedder>,
    ) -> Self {
        Self::with_config(upstream, store, detector, embedder, IngestorConfig::default())
    }

    /// Create an ingestor with custom pacing.
    pub fn with_config(
        upstream: Arc<UpstreamClient>,
        store: Arc<CatalogStore>,
        detector: Arc<Detector>,
        embedder: Arc<dyn ImageEmbedder>,
        config: IngestorConfig,
    ) -> Self {
        Self {
            upstream,
            store,
            detector,
            embedder,
            config,
        }
    }

    /// Seed every printing of a set, then backfill missing embeddings.
    ///
    /// Idempotent: a second run upserts the same rows without changes and
    /// only embeds printings that still lack a vector. A set unknown to the
    /// upstream is a successful no-op. Failures on a single image are
    /// isolated; failures at the page level abort the run.
    #[instrument(skip(self), fields(set = %set_code))]
    pub async fn seed_set(&self, set_code: &str) -> Result<SeedReport> {
        let code = set_code.trim().to_lowercase();
        if code.is_empty() {
            return Err(Error::invalid_input("set code must not be empty"));
        }

        let mut report = SeedReport::default();
        let mut url = self.upstream.search_url(&code);

        loop {
            match self.upstream.fetch_printings_page(&url).await? {
                PageFetch::MissingSet => {
                    info!("Set '{code}' does not exist upstream, nothing to seed");
                    return Ok(report);
                }
                PageFetch::Page { records, next_page } => {
                    report.cards_processed += records.len();
                    self.store.upsert_batch(&records).await?;

                    match next_page {
                        Some(next) => {
                            url = next;
                            tokio::time::sleep(self.config.page_delay).await;
                        }
                        None => break,
                    }
                }
            }
        }

        report.embeddings_generated = self.backfill_embeddings(&code).await?;

        info!(
            "Seeded set '{}': {} printings, {} embeddings",
            code, report.cards_processed, report.embeddings_generated
        );
        Ok(report)
    }

    /// Generate embeddings for every printing of a set that has an image but
    /// no vector yet, most useful printings first.
    async fn backfill_embeddings(&self, set_code: &str) -> Result<usize> {
        let pending = self.store.printings_without_embedding(Some(set_code)).await;
        let mut generated = 0;

        for (position, (printing_id, image_url)) in pending.into_iter().enumerate() {
            if position > 0 {
                tokio::time::sleep(self.config.image_delay).await;
            }

            let bytes = match self.upstream.fetch_image(&image_url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping printing {printing_id}: image fetch failed: {e}");
                    continue;
                }
            };

            let canonical = self.detector.detect_and_crop(&bytes);
            let embedder = Arc::clone(&self.embedder);
            let embedding =
                tokio::task::spawn_blocking(move || embedder.embed(&canonical)).await;

            match embedding {
                Ok(Some(vector)) => {
                    if let Err(e) = self.store.save_embedding(printing_id, vector).await {
                        warn!("Skipping printing {printing_id}: embedding write failed: {e}");
                        continue;
                    }
                    generated += 1;
                }
                Ok(None) => {
                    warn!("Skipping printing {printing_id}: image produced no embedding");
                }
                Err(e) => {
                    warn!("Skipping printing {printing_id}: embedding task failed: {e}");
                }
            }
        }

        Ok(generated)
    }
}
