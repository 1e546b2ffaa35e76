//! Catalog entity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The abstract identity of a card, shared across all of its printings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleCard {
    /// Upstream oracle identifier.
    pub id: Uuid,

    /// Canonical English card name.
    pub name: String,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl OracleCard {
    /// Create a new oracle card.
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One published version of an oracle card in a specific set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Printing {
    /// Upstream printing identifier.
    pub id: Uuid,

    /// The oracle card this printing belongs to.
    pub oracle_id: Uuid,

    /// Set code, stored upper-case.
    pub set_code: String,

    /// Collector number within the set. May be non-numeric.
    pub collector_number: String,

    /// URL of the face image, when the upstream provides one.
    pub image_url: Option<String>,

    /// First release date of this printing.
    pub released_at: DateTime<Utc>,

    /// Upstream set classification (e.g. `expansion`, `token`).
    pub set_type: String,

    /// Whether this is the most recent printing of its oracle card.
    pub is_latest_printing: bool,

    /// Art embedding, present once the image has been processed.
    pub embedding: Option<Vec<f32>>,

    /// When the embedding was last written. Set iff `embedding` is set.
    pub embedding_updated_at: Option<DateTime<Utc>>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Printing {
    /// Create a printing from an ingestion record, without embedding and not
    /// yet flagged as latest.
    pub fn from_record(record: &PrintingRecord) -> Self {
        let now = Utc::now();
        Self {
            id: record.printing_id,
            oracle_id: record.oracle_id,
            set_code: record.set_code.to_uppercase(),
            collector_number: record.collector_number.clone(),
            image_url: record.image_url.clone(),
            released_at: record.released_at,
            set_type: record.set_type.clone(),
            is_latest_printing: false,
            embedding: None,
            embedding_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an embedding has been generated for this printing.
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// A single printing as extracted from an upstream catalog page.
///
/// Identifiers are already parsed; rows the upstream serves with unparseable
/// ids or no usable image never make it into a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintingRecord {
    /// Upstream printing identifier.
    pub printing_id: Uuid,

    /// Upstream oracle identifier.
    pub oracle_id: Uuid,

    /// Canonical card name.
    pub name: String,

    /// Set code as served by the upstream (any case).
    pub set_code: String,

    /// Collector number.
    pub collector_number: String,

    /// Face image URL.
    pub image_url: Option<String>,

    /// Release date, defaulting to the epoch when unparseable.
    pub released_at: DateTime<Utc>,

    /// Upstream set classification.
    pub set_type: String,
}

impl PrintingRecord {
    /// Create a record with the given identifiers and name.
    pub fn new(printing_id: Uuid, oracle_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            printing_id,
            oracle_id,
            name: name.into(),
            set_code: String::new(),
            collector_number: String::new(),
            image_url: None,
            released_at: DateTime::<Utc>::MIN_UTC,
            set_type: String::new(),
        }
    }

    /// Set the set code and collector number.
    pub fn with_set(mut self, set_code: impl Into<String>, number: impl Into<String>) -> Self {
        self.set_code = set_code.into();
        self.collector_number = number.into();
        self
    }

    /// Set the image URL.
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Set the release date.
    pub fn with_released_at(mut self, released_at: DateTime<Utc>) -> Self {
        self.released_at = released_at;
        self
    }

    /// Set the upstream set type.
    pub fn with_set_type(mut self, set_type: impl Into<String>) -> Self {
        self.set_type = set_type.into();
        self
    }
}

/// A single hit from a vector or by-name catalog lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchResult {
    /// The oracle card of the matched printing.
    pub oracle: OracleCard,

    /// The matched printing.
    pub printing: Printing,

    /// Cosine distance to the query, in `[0, 2]`. A by-name lookup reports
    /// distance 0.0.
    pub distance: f32,
}
