//! The identification pipeline.
//!
//! One call of [`ScanPipeline::identify`] runs the full flow: detect and
//! rectify the card, fan the canonical image out to the embedder and the
//! title reader on blocking worker threads, query the catalog, and fuse the
//! signals into a verdict.

use super::fuser::Fuser;
use super::verdict::ScanVerdict;
use crate::catalog::{CatalogStore, VectorSearchResult};
use crate::embedding::ImageEmbedder;
use crate::error::Result;
use crate::ocr::{TitleReader, TitleReadout};
use crate::vision::Detector;

use std::sync::Arc;
use tracing::{debug, instrument};

/// Configuration for the identification pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum OCR confidence before a by-name lookup is attempted.
    ///
    /// Lower than the fuser's veto threshold on purpose: a merely plausible
    /// read is enough to try the name index, but only a near-certain read may
    /// override a good vector hit.
    pub ocr_inject_threshold: f32,

    /// How many vector hits to retrieve per attempt.
    pub top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_inject_threshold: 0.70,
            top_k: 10,
        }
    }
}

/// Orchestrates detector, extractors, catalog, and fuser.
pub struct ScanPipeline {
    detector: Arc<Detector>,
    embedder: Arc<dyn ImageEmbedder>,
    title_reader: Arc<TitleReader>,
    store: Arc<CatalogStore>,
    fuser: Fuser,
    config: PipelineConfig,
}

impl ScanPipeline {
    /// Create a pipeline with default fuser and configuration.
    pub fn new(
        detector: Arc<Detector>,
        embedder: Arc<dyn ImageEmbedder>,
        title_reader: Arc<TitleReader>,
        store: Arc<CatalogStore>,
    ) -> Self {
        Self::with_config(
            detector,
            embedder,
            title_reader,
            store,
            Fuser::new(),
            PipelineConfig::default(),
        )
    }

    /// Create a pipeline with custom fuser and configuration.
    pub fn with_config(
        detector: Arc<Detector>,
        embedder: Arc<dyn ImageEmbedder>,
        title_reader: Arc<TitleReader>,
        store: Arc<CatalogStore>,
        fuser: Fuser,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector,
            embedder,
            title_reader,
            store,
            fuser,
            config,
        }
    }

    /// Identify the card in a photo.
    ///
    /// `previous_attempt` is the client's rescan counter; the verdict echoes
    /// `previous_attempt + 1`. Extractor failures degrade to missing signals;
    /// only catalog errors propagate.
    #[instrument(skip_all, fields(attempt = previous_attempt + 1, bytes = raw.len()))]
    pub async fn identify(&self, raw: &[u8], previous_attempt: u32) -> Result<ScanVerdict> {
        let attempt = previous_attempt + 1;

        let canonical = self.detector.detect_and_crop(raw);

        // Both extractors are CPU-bound; run them on worker threads and join.
        let (embedding, readout) = {
            let embedder = Arc::clone(&self.embedder);
            let embed_input = canonical.clone();
            let embed_task = tokio::task::spawn_blocking(move || embedder.embed(&embed_input));

            let reader = Arc::clone(&self.title_reader);
            let ocr_input = canonical;
            let ocr_task = tokio::task::spawn_blocking(move || reader.read_title(&ocr_input));

            let (embedding, readout) = tokio::join!(embed_task, ocr_task);
            (
                embedding.ok().flatten(),
                readout.unwrap_or_else(|_| TitleReadout {
                    title: None,
                    score: 0.0,
                }),
            )
        };

        let mut hits: Vec<VectorSearchResult> = match &embedding {
            Some(vector) => self.store.find_closest(vector, self.config.top_k).await?,
            None => Vec::new(),
        };

        // A plausible title read earns a by-name lookup; a match is injected
        // ahead of the vector hits at distance zero.
        if let Some(title) = &readout.title
            && readout.score >= self.config.ocr_inject_threshold
            && let Some(by_name) = self.store.find_by_name(title).await
        {
            debug!(title = %title, "Injecting by-name hit");
            hits.insert(0, by_name);
        }

        Ok(self
            .fuser
            .decide(&hits, readout.title.as_deref(), readout.score, attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PrintingRecord;
    use crate::embedding::EMBEDDING_DIM;
    use crate::ocr::FixtureTitleOcr;
    use crate::scan::verdict::{ConfidenceBand, DetectionMethod, ScanStatus};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    /// Embedder returning a fixed vector, regardless of input.
    struct StubEmbedder(Option<Vec<f32>>);

    impl ImageEmbedder for StubEmbedder {
        fn embed(&self, _canonical: &[u8]) -> Option<Vec<f32>> {
            self.0.clone()
        }
    }

    /// A unit vector interpolating between two axes: `cos` along `axis_a`,
    /// the rest along `axis_b`.
    fn blend(axis_a: usize, axis_b: usize, cos: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[axis_a] = cos;
        v[axis_b] = (1.0 - cos * cos).sqrt();
        v
    }

    fn axis(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[axis] = 1.0;
        v
    }

    struct Seeded {
        store: Arc<CatalogStore>,
        bolt_printing: Uuid,
    }

    /// Two cards: Lightning Bolt on axis 0 and Shock nearby
    /// (cosine similarity 0.65 to the bolt art).
    async fn seed_catalog() -> Seeded {
        let store = Arc::new(CatalogStore::in_memory());
        let bolt_oracle = Uuid::new_v4();
        let shock_oracle = Uuid::new_v4();
        let bolt_printing = Uuid::new_v4();
        let shock_printing = Uuid::new_v4();

        store
            .upsert_batch(&[
                PrintingRecord::new(bolt_printing, bolt_oracle, "Lightning Bolt")
                    .with_set("M11", "149")
                    .with_released_at(Utc.with_ymd_and_hms(2010, 7, 16, 0, 0, 0).unwrap())
                    .with_set_type("core"),
                PrintingRecord::new(shock_printing, shock_oracle, "Shock")
                    .with_set("M20", "160")
                    .with_released_at(Utc.with_ymd_and_hms(2019, 7, 12, 0, 0, 0).unwrap())
                    .with_set_type("core"),
            ])
            .await
            .unwrap();

        store.save_embedding(bolt_printing, axis(0)).await.unwrap();
        store
            .save_embedding(shock_printing, blend(0, 1, 0.65))
            .await
            .unwrap();

        Seeded {
            store,
            bolt_printing,
        }
    }

    fn pipeline(
        store: Arc<CatalogStore>,
        embedding: Option<Vec<f32>>,
        ocr: FixtureTitleOcr,
    ) -> ScanPipeline {
        ScanPipeline::new(
            Arc::new(Detector::new()),
            Arc::new(StubEmbedder(embedding)),
            Arc::new(TitleReader::new(Arc::new(ocr))),
            store,
        )
    }

    fn photo() -> Vec<u8> {
        use image::{Rgb, RgbImage};
        let img = RgbImage::from_pixel(200, 280, Rgb([120, 90, 60]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn clean_confirm_via_vector() {
        let seeded = seed_catalog().await;

        // Query 0.05 away from the bolt art, OCR unavailable.
        let pipeline = pipeline(
            Arc::clone(&seeded.store),
            Some(blend(0, 2, 0.95)),
            FixtureTitleOcr::failing(),
        );

        let verdict = pipeline.identify(&photo(), 0).await.unwrap();
        assert_eq!(verdict.status, ScanStatus::Confirmed);
        assert_eq!(verdict.confidence, ConfidenceBand::High);
        assert_eq!(verdict.detection_method, DetectionMethod::Vector);
        assert_eq!(verdict.attempt, 1);

        let card = verdict.card.unwrap();
        assert_eq!(card.set_code, "M11");
        assert_eq!(card.collector_number, "149");
        assert!(verdict.alternatives.is_empty());
        assert!((verdict.confidence_score - 0.95).abs() < 0.01);
    }

    #[tokio::test]
    async fn ocr_rescues_a_weak_vector() {
        let seeded = seed_catalog().await;

        // The query sits close to Shock (~0.25) and far from Lightning Bolt
        // (0.46), but a confident title read finds the bolt by name.
        let mut query = vec![0.0f32; EMBEDDING_DIM];
        query[0] = 0.54;
        query[1] = 0.525;
        query[5] = 0.658;
        let pipeline = pipeline(
            Arc::clone(&seeded.store),
            Some(query),
            FixtureTitleOcr::reading("Lightning Bolt", 0.88),
        );

        let verdict = pipeline.identify(&photo(), 0).await.unwrap();
        assert_eq!(verdict.status, ScanStatus::Confirmed);
        assert_eq!(verdict.confidence, ConfidenceBand::High);
        assert_eq!(verdict.detection_method, DetectionMethod::OcrVector);
        assert_eq!(verdict.card.unwrap().name, "Lightning Bolt");
        assert_eq!(verdict.confidence_score, 1.0);

        let latest = seeded.store.printing(seeded.bolt_printing).unwrap();
        assert!(latest.is_latest_printing);
    }

    #[tokio::test]
    async fn divergent_signals_veto_then_settle() {
        let store = Arc::new(CatalogStore::in_memory());
        let oracle = Uuid::new_v4();
        let printing = Uuid::new_v4();
        store
            .upsert_batch(&[PrintingRecord::new(printing, oracle, "Llanowar Elves")
                .with_set("M19", "314")
                .with_released_at(Utc.with_ymd_and_hms(2018, 7, 13, 0, 0, 0).unwrap())])
            .await
            .unwrap();
        store.save_embedding(printing, axis(3)).await.unwrap();

        // 0.36 from the stored art, and the OCR confidently reads a
        // different card that the catalog does not contain.
        let query = blend(3, 4, 0.64);
        let make = |store| {
            pipeline(
                store,
                Some(query.clone()),
                FixtureTitleOcr::reading("Forest", 0.95),
            )
        };

        let verdict = make(Arc::clone(&store)).identify(&photo(), 0).await.unwrap();
        assert_eq!(verdict.status, ScanStatus::RescanRequired);
        assert_eq!(verdict.attempt, 1);

        let verdict = make(store).identify(&photo(), 2).await.unwrap();
        assert_eq!(verdict.status, ScanStatus::Ambiguous);
        assert_eq!(verdict.attempt, 3);
        assert_eq!(verdict.card.unwrap().name, "Llanowar Elves");
    }

    #[tokio::test]
    async fn both_signals_absent_is_not_found() {
        let store = Arc::new(CatalogStore::in_memory());
        let pipeline = pipeline(store, None, FixtureTitleOcr::failing());

        for previous in [0, 1, 2, 5] {
            let verdict = pipeline.identify(&photo(), previous).await.unwrap();
            assert_eq!(verdict.status, ScanStatus::NotFound);
            assert_eq!(verdict.confidence, ConfidenceBand::Low);
            assert_eq!(verdict.detection_method, DetectionMethod::None);
            assert!(verdict.card.is_none());
            assert_eq!(verdict.attempt, previous + 1);
        }
    }

    #[tokio::test]
    async fn plausible_ocr_is_injected_but_cannot_veto() {
        let seeded = seed_catalog().await;

        // Mid-confidence read: enough to inject, not enough to veto.
        let pipeline = pipeline(
            Arc::clone(&seeded.store),
            Some(blend(0, 2, 0.95)),
            FixtureTitleOcr::reading("Shock", 0.75),
        );

        let verdict = pipeline.identify(&photo(), 0).await.unwrap();
        // The by-name injection sits at distance zero and wins outright.
        assert_eq!(verdict.status, ScanStatus::Confirmed);
        assert_eq!(verdict.detection_method, DetectionMethod::OcrVector);
        assert_eq!(verdict.card.unwrap().name, "Shock");
    }

    #[tokio::test]
    async fn low_score_ocr_is_not_injected() {
        let seeded = seed_catalog().await;

        let pipeline = pipeline(
            Arc::clone(&seeded.store),
            Some(blend(0, 2, 0.95)),
            FixtureTitleOcr::reading("Shock", 0.5),
        );

        let verdict = pipeline.identify(&photo(), 0).await.unwrap();
        assert_eq!(verdict.card.unwrap().name, "Lightning Bolt");
    }
}
