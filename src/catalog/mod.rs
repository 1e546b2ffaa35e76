//! The card catalog: entities, storage, retrieval, and ingestion.
//!
//! The catalog holds one [`OracleCard`] per abstract card and one
//! [`Printing`] per published version. Printings carry art embeddings once
//! generated; retrieval runs over an HNSW cosine index and a name index.
//! The [`Ingestor`] pulls printings from the upstream catalog API and the
//! [`Reconciler`] keeps the catalog complete in the background.

mod card;
mod index;
mod ingest;
mod reconciler;
mod storage;
mod store;
mod upstream;

pub use card::{OracleCard, Printing, PrintingRecord, VectorSearchResult};
pub use index::{HnswConfig, HnswIndex, cosine_distance};
pub use ingest::{Ingestor, IngestorConfig, SeedReport};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use storage::{CatalogSnapshot, CatalogStorage};
pub use store::{CatalogConfig, CatalogStats, CatalogStore};
pub use upstream::{PageFetch, SetSummary, UpstreamClient, UpstreamConfig};
