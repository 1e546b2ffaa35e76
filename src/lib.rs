//! # Cardlens
//!
//! Identify a physical Magic: The Gathering card (the exact printing, set
//! code and collector number) from a single camera photo.
//!
//! ## Features
//!
//! - **Detection**: perspective rectification of a card in a cluttered scene
//!   onto a canonical 488×680 frame
//! - **Dual extraction**: a 512-dim art embedding and an OCR title read,
//!   computed concurrently
//! - **Vector retrieval**: cosine top-K over an HNSW index of printing
//!   embeddings
//! - **Decision fusion**: calibrated thresholds combine both signals into a
//!   confirmed match or an honest retry verdict
//! - **Catalog ingestion**: idempotent seeding from the upstream card
//!   catalog, with a background reconciler for newly published sets
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cardlens::catalog::CatalogStore;
//! use cardlens::embedding::HashEmbedder;
//! use cardlens::ocr::{FixtureTitleOcr, TitleReader};
//! use cardlens::scan::ScanPipeline;
//! use cardlens::vision::Detector;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(CatalogStore::in_memory());
//!     let pipeline = ScanPipeline::new(
//!         Arc::new(Detector::new()),
//!         Arc::new(HashEmbedder::new()),
//!         Arc::new(TitleReader::new(Arc::new(FixtureTitleOcr::failing()))),
//!         store,
//!     );
//!
//!     let photo = std::fs::read("card.jpg")?;
//!     let verdict = pipeline.identify(&photo, 0).await?;
//!     println!("{:?}", verdict.status);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        HTTP surface                          │
//! │     POST /scanner/identify      GET /scanner/seed/{set}      │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │                              │
//!        ┌────────┴────────┐            ┌────────┴────────┐
//!        │  ScanPipeline   │            │    Ingestor     │◄── Reconciler
//!        │                 │            │                 │
//!        │ Detector        │            │ upstream pages  │
//!        │  ├─ Embedder ─┐ │            │ image downloads │
//!        │  └─ TitleOCR ─┤ │            └────────┬────────┘
//!        │     Fuser    ◄┘ │                     │
//!        └────────┬────────┘                     │
//!                 │                              │
//!        ┌────────┴──────────────────────────────┴────────┐
//!        │                 CatalogStore                   │
//!        │   oracle cards · printings · HNSW · name index │
//!        └────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod catalog;
pub mod embedding;
pub mod error;
pub mod ocr;
pub mod scan;
pub mod vision;

// Re-exports
pub use crate::catalog::{
    CatalogConfig, CatalogStore, Ingestor, OracleCard, Printing, PrintingRecord, Reconciler,
    SeedReport, UpstreamClient, VectorSearchResult,
};
pub use crate::embedding::{EMBEDDING_DIM, HashEmbedder, ImageEmbedder, OnnxEmbedder};
pub use crate::error::{Error, Result};
pub use crate::ocr::{TitleReader, TitleReadout};
pub use crate::scan::{Fuser, ScanPipeline, ScanStatus, ScanVerdict};
pub use crate::vision::Detector;
