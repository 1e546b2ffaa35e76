//! Scan verdict types.

use crate::catalog::VectorSearchResult;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal or transient outcome of one identification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// A card was identified with sufficient confidence.
    Confirmed,
    /// The signals were inconclusive; the client should submit another photo.
    RescanRequired,
    /// Attempts are exhausted and the signals still disagree.
    Ambiguous,
    /// Nothing resembling a known card was found.
    NotFound,
}

impl ScanStatus {
    /// Whether this status ends the scan loop.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::RescanRequired)
    }
}

/// Coarse confidence band reported alongside the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    /// The chosen card is almost certainly correct.
    High,
    /// The chosen card is probably correct.
    Medium,
    /// Weak or absent signals.
    Low,
}

/// Which signals produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
    /// Vector retrieval corroborated by the title read.
    #[serde(rename = "ocr+vector")]
    OcrVector,
    /// Vector retrieval alone.
    #[serde(rename = "vector")]
    Vector,
    /// Title read alone.
    #[serde(rename = "ocr")]
    Ocr,
    /// Vector and title read point at different cards.
    #[serde(rename = "divergent")]
    Divergent,
    /// Neither signal produced anything.
    #[serde(rename = "none")]
    None,
}

/// A card candidate as reported to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCard {
    /// Oracle identity of the card.
    pub oracle_id: Uuid,

    /// Card name.
    pub name: String,

    /// Set code of the matched printing.
    pub set_code: String,

    /// Collector number of the matched printing.
    pub collector_number: String,

    /// Face image of the matched printing.
    pub image_url: Option<String>,

    /// Release date of the matched printing.
    pub released_at: DateTime<Utc>,
}

impl From<&VectorSearchResult> for CandidateCard {
    fn from(hit: &VectorSearchResult) -> Self {
        Self {
            oracle_id: hit.oracle.id,
            name: hit.oracle.name.clone(),
            set_code: hit.printing.set_code.clone(),
            collector_number: hit.printing.collector_number.clone(),
            image_url: hit.printing.image_url.clone(),
            released_at: hit.printing.released_at,
        }
    }
}

/// The decision produced for one identification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanVerdict {
    /// Outcome of the attempt.
    pub status: ScanStatus,

    /// Confidence band.
    pub confidence: ConfidenceBand,

    /// `max(0, 1 − distance)` of the chosen hit, rounded to four decimals.
    /// Zero when no card was chosen.
    pub confidence_score: f32,

    /// Which signals produced this verdict.
    pub detection_method: DetectionMethod,

    /// The attempt counter, echoing the caller.
    pub attempt: u32,

    /// The chosen card, when one was chosen.
    pub card: Option<CandidateCard>,

    /// Plausible runner-up candidates.
    pub alternatives: Vec<CandidateCard>,
}

/// Convert a cosine distance into the reported confidence score.
pub fn confidence_score(distance: f32) -> f32 {
    let score = (1.0 - distance).max(0.0);
    (score * 10_000.0).round() / 10_000.0
}
