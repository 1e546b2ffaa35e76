//! Snapshot persistence for the catalog store.

use crate::catalog::card::{OracleCard, Printing};
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// On-disk snapshot of the catalog. Embeddings travel inline with their
/// printings; the vector index is rebuilt from them on open.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// All oracle cards.
    pub oracles: Vec<OracleCard>,

    /// All printings, embeddings included.
    pub printings: Vec<Printing>,

    /// Snapshot format version.
    pub version: u32,
}

/// File-backed persistence for catalog snapshots.
pub struct CatalogStorage {
    path: PathBuf,
}

impl CatalogStorage {
    /// Open or create storage at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Ok(Self { path })
    }

    fn oracles_path(&self) -> PathBuf {
        self.path.with_extension("oracles")
    }

    fn printings_path(&self) -> PathBuf {
        self.path.with_extension("printings")
    }

    /// Load the stored snapshot, or an empty one when nothing exists yet.
    pub async fn load(&self) -> Result<CatalogSnapshot> {
        let oracles_path = self.oracles_path();
        if !oracles_path.exists() {
            return Ok(CatalogSnapshot::default());
        }

        let oracles: Vec<OracleCard> = read_bincode(&oracles_path).await?;
        let printings: Vec<Printing> = read_bincode(&self.printings_path()).await?;

        Ok(CatalogSnapshot {
            oracles,
            printings,
            version: 1,
        })
    }

    /// Persist the snapshot, replacing any previous state.
    pub async fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        write_bincode(&self.oracles_path(), &snapshot.oracles).await?;
        write_bincode(&self.printings_path(), &snapshot.printings).await?;
        Ok(())
    }
}

async fn read_bincode<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let mut file = fs::File::open(path).await?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).await?;

    bincode::deserialize(&data).map_err(|e| Error::catalog(e.to_string()))
}

async fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = bincode::serialize(value).map_err(|e| Error::catalog(e.to_string()))?;
    let mut file = fs::File::create(path).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[tokio::test]
    async fn load_missing_snapshot_is_empty() {
        let dir = tempdir().unwrap();
        let storage = CatalogStorage::open(dir.path().join("catalog.db"))
            .await
            .unwrap();

        let snapshot = storage.load().await.unwrap();
        assert!(snapshot.oracles.is_empty());
        assert!(snapshot.printings.is_empty());
    }

    #[tokio::test]
    async fn save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        let storage = CatalogStorage::open(&path).await.unwrap();
        let snapshot = CatalogSnapshot {
            oracles: vec![OracleCard::new(Uuid::new_v4(), "Lightning Bolt")],
            printings: Vec::new(),
            version: 1,
        };
        storage.save(&snapshot).await.unwrap();

        let reopened = CatalogStorage::open(&path).await.unwrap();
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.oracles.len(), 1);
        assert_eq!(loaded.oracles[0].name, "Lightning Bolt");
    }
}
