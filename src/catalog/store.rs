//! The catalog store: printings, oracle cards, and the embedding index.
//!
//! An embedded store. All reads and writes go through one in-memory state
//! guarded by a single lock, so the latest-printing recomputation is atomic
//! per batch: readers never observe an oracle with zero or two printings
//! flagged latest. Snapshots are persisted to disk after every mutation and
//! the vector index is rebuilt from stored embeddings on open.

use crate::catalog::card::{OracleCard, Printing, PrintingRecord, VectorSearchResult};
use crate::catalog::index::{HnswConfig, HnswIndex};
use crate::catalog::storage::{CatalogSnapshot, CatalogStorage};
use crate::embedding::EMBEDDING_DIM;
use crate::error::{Error, Result};

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Minimum name length before by-name lookup falls back to prefix matching.
const PREFIX_FALLBACK_MIN_LEN: usize = 4;

/// Configuration for the catalog store.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Embedding dimension size.
    pub dimensions: usize,

    /// Path to storage file. `None` keeps the store in memory only.
    pub storage_path: Option<String>,

    /// Vector index parameters.
    pub hnsw: HnswConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dimensions: EMBEDDING_DIM,
            storage_path: None,
            hnsw: HnswConfig::default(),
        }
    }
}

impl CatalogConfig {
    /// Create config with a storage path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = Some(path.into());
        self
    }
}

struct CatalogState {
    oracles: HashMap<Uuid, OracleCard>,
    printings: HashMap<Uuid, Printing>,
    /// Printing ids grouped by oracle.
    by_oracle: HashMap<Uuid, Vec<Uuid>>,
    /// Lower-cased oracle name index; B-tree so prefix lookups are range scans.
    names: BTreeMap<String, Uuid>,
    /// Upper-cased set codes present in the catalog.
    sets: HashSet<String>,
    /// Cosine index over printings that have an embedding.
    index: HnswIndex,
}

impl CatalogState {
    fn new(hnsw: HnswConfig) -> Self {
        Self {
            oracles: HashMap::new(),
            printings: HashMap::new(),
            by_oracle: HashMap::new(),
            names: BTreeMap::new(),
            sets: HashSet::new(),
            index: HnswIndex::new(hnsw),
        }
    }

    /// Recompute the latest-printing flag for one oracle: true exactly on the
    /// printing with the greatest release date, ties broken by id.
    fn recompute_latest(&mut self, oracle_id: Uuid) {
        let Some(ids) = self.by_oracle.get(&oracle_id).cloned() else {
            return;
        };

        let latest = ids
            .iter()
            .filter_map(|id| self.printings.get(id))
            .max_by(|a, b| {
                a.released_at
                    .cmp(&b.released_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|p| p.id);

        for id in ids {
            if let Some(printing) = self.printings.get_mut(&id) {
                let flag = Some(printing.id) == latest;
                if printing.is_latest_printing != flag {
                    printing.is_latest_printing = flag;
                    printing.updated_at = Utc::now();
                }
            }
        }
    }

    /// The latest printing of an oracle, when it has any printings.
    fn latest_printing(&self, oracle_id: Uuid) -> Option<&Printing> {
        self.by_oracle
            .get(&oracle_id)?
            .iter()
            .filter_map(|id| self.printings.get(id))
            .find(|p| p.is_latest_printing)
    }

    fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            oracles: self.oracles.values().cloned().collect(),
            printings: self.printings.values().cloned().collect(),
            version: 1,
        }
    }
}

/// Statistics about the catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CatalogStats {
    /// Number of oracle cards.
    pub oracle_count: usize,
    /// Number of printings.
    pub printing_count: usize,
    /// Number of printings with an embedding.
    pub embedding_count: usize,
    /// Number of distinct set codes.
    pub set_count: usize,
}

/// The catalog of oracle cards and printings, with cosine top-K retrieval.
pub struct CatalogStore {
    config: CatalogConfig,
    state: RwLock<CatalogState>,
    storage: Option<CatalogStorage>,
}

impl CatalogStore {
    /// Create an in-memory store with default configuration.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(CatalogState::new(HnswConfig::default())),
            storage: None,
            config: CatalogConfig::default(),
        }
    }

    /// Open a store with the given configuration, loading any persisted state.
    #[instrument(skip_all, fields(path = config.storage_path.as_deref().unwrap_or("<memory>")))]
    pub async fn open(config: CatalogConfig) -> Result<Self> {
        let storage = match &config.storage_path {
            Some(path) => Some(CatalogStorage::open(path).await?),
            None => None,
        };

        let mut state = CatalogState::new(config.hnsw.clone());

        if let Some(storage) = &storage {
            let snapshot = storage.load().await?;
            for oracle in snapshot.oracles {
                state.names.insert(oracle.name.to_lowercase(), oracle.id);
                state.oracles.insert(oracle.id, oracle);
            }
            for printing in snapshot.printings {
                state
                    .by_oracle
                    .entry(printing.oracle_id)
                    .or_default()
                    .push(printing.id);
                state.sets.insert(printing.set_code.clone());
                if let Some(embedding) = &printing.embedding {
                    state.index.insert(printing.id, embedding.clone());
                }
                state.printings.insert(printing.id, printing);
            }
        }

        info!(
            "Catalog opened with {} printings ({} embedded)",
            state.printings.len(),
            state.index.len()
        );

        Ok(Self {
            config,
            state: RwLock::new(state),
            storage,
        })
    }

    /// Embedding dimension this store accepts.
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Return up to `top_k` embedded printings ordered by ascending cosine
    /// distance to `query`.
    pub async fn find_closest(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorSearchResult>> {
        if query.len() != self.config.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimensions,
                actual: query.len(),
            });
        }

        let state = self.state.read();
        let hits = state.index.search(query, top_k);

        let results = hits
            .into_iter()
            .filter_map(|(printing_id, distance)| {
                let printing = state.printings.get(&printing_id)?.clone();
                let oracle = state.oracles.get(&printing.oracle_id)?.clone();
                Some(VectorSearchResult {
                    oracle,
                    printing,
                    distance,
                })
            })
            .collect();

        Ok(results)
    }

    /// Case-insensitive lookup of an oracle card by name, paired with its
    /// latest printing at distance 0.0.
    ///
    /// Falls back to a prefix match when no exact match exists and the query
    /// is at least four characters, tolerating truncated OCR reads.
    pub async fn find_by_name(&self, name: &str) -> Option<VectorSearchResult> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        let state = self.state.read();

        let oracle_id = match state.names.get(&needle) {
            Some(id) => Some(*id),
            None if needle.len() >= PREFIX_FALLBACK_MIN_LEN => state
                .names
                .range(needle.clone()..)
                .take_while(|(stored, _)| stored.starts_with(&needle))
                .map(|(_, id)| *id)
                .next(),
            None => None,
        }?;

        let oracle = state.oracles.get(&oracle_id)?.clone();
        let printing = state.latest_printing(oracle_id)?.clone();

        Some(VectorSearchResult {
            oracle,
            printing,
            distance: 0.0,
        })
    }

    /// Whether at least one printing of the given set exists.
    pub async fn set_exists(&self, set_code: &str) -> bool {
        let code = set_code.trim().to_uppercase();
        self.state.read().sets.contains(&code)
    }

    /// Insert or refresh a batch of printings.
    ///
    /// Oracle cards are created at first mention and renamed on reingestion.
    /// Existing printings keep their id and embedding; metadata is refreshed
    /// only when it actually changed, so replaying a batch is a no-op. The
    /// latest-printing flag is recomputed for every touched oracle before the
    /// lock is released.
    #[instrument(skip_all, fields(count = records.len()))]
    pub async fn upsert_batch(&self, records: &[PrintingRecord]) -> Result<()> {
        {
            let mut state = self.state.write();

            for record in records {
                upsert_oracle(&mut state, record);
                upsert_printing(&mut state, record);
                state.recompute_latest(record.oracle_id);
            }
        }

        self.persist().await?;
        debug!("Upserted {} printing records", records.len());
        Ok(())
    }

    /// Write an embedding for a printing and stamp its update time.
    pub async fn save_embedding(&self, printing_id: Uuid, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimensions,
                actual: vector.len(),
            });
        }

        {
            let mut state = self.state.write();
            let printing = state
                .printings
                .get_mut(&printing_id)
                .ok_or_else(|| Error::catalog(format!("unknown printing {printing_id}")))?;

            printing.embedding = Some(vector.clone());
            printing.embedding_updated_at = Some(Utc::now());
            printing.updated_at = Utc::now();

            state.index.insert(printing_id, vector);
        }

        self.persist().await
    }

    /// Printings that still need an embedding and have an image to compute it
    /// from, most useful first: latest printings, then newest releases.
    pub async fn printings_without_embedding(
        &self,
        set_code: Option<&str>,
    ) -> Vec<(Uuid, String)> {
        let filter = set_code.map(|s| s.trim().to_uppercase());
        let state = self.state.read();

        let mut pending: Vec<&Printing> = state
            .printings
            .values()
            .filter(|p| p.embedding.is_none())
            .filter(|p| p.image_url.is_some())
            .filter(|p| filter.as_deref().is_none_or(|set| p.set_code == set))
            .collect();

        pending.sort_by(|a, b| {
            b.is_latest_printing
                .cmp(&a.is_latest_printing)
                .then_with(|| b.released_at.cmp(&a.released_at))
        });

        pending
            .into_iter()
            .filter_map(|p| Some((p.id, p.image_url.clone()?)))
            .collect()
    }

    /// Fetch a printing by id.
    pub fn printing(&self, id: Uuid) -> Option<Printing> {
        self.state.read().printings.get(&id).cloned()
    }

    /// Get statistics about the catalog.
    pub fn stats(&self) -> CatalogStats {
        let state = self.state.read();
        CatalogStats {
            oracle_count: state.oracles.len(),
            printing_count: state.printings.len(),
            embedding_count: state.index.len(),
            set_count: state.sets.len(),
        }
    }

    async fn persist(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let snapshot = self.state.read().snapshot();
        storage.save(&snapshot).await
    }
}

fn upsert_oracle(state: &mut CatalogState, record: &PrintingRecord) {
    match state.oracles.get_mut(&record.oracle_id) {
        Some(oracle) => {
            if oracle.name != record.name {
                state.names.remove(&oracle.name.to_lowercase());
                state
                    .names
                    .insert(record.name.to_lowercase(), record.oracle_id);
                oracle.name = record.name.clone();
                oracle.updated_at = Utc::now();
            }
        }
        None => {
            let oracle = OracleCard::new(record.oracle_id, record.name.clone());
            state.names.insert(record.name.to_lowercase(), oracle.id);
            state.oracles.insert(oracle.id, oracle);
        }
    }
}

fn upsert_printing(state: &mut CatalogState, record: &PrintingRecord) {
    let set_code = record.set_code.to_uppercase();
    state.sets.insert(set_code.clone());

    match state.printings.get_mut(&record.printing_id) {
        Some(printing) => {
            let changed = printing.set_code != set_code
                || printing.collector_number != record.collector_number
                || printing.image_url != record.image_url
                || printing.released_at != record.released_at
                || printing.set_type != record.set_type;

            if changed {
                printing.set_code = set_code;
                printing.collector_number = record.collector_number.clone();
                printing.image_url = record.image_url.clone();
                printing.released_at = record.released_at;
                printing.set_type = record.set_type.clone();
                printing.updated_at = Utc::now();
            }
        }
        None => {
            let printing = Printing::from_record(record);
            state
                .by_oracle
                .entry(printing.oracle_id)
                .or_default()
                .push(printing.id);
            state.printings.insert(printing.id, printing);
        }
    }
}
