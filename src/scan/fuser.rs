//! Decision fusion for identification attempts.
//!
//! The fuser turns a ranked list of vector hits plus the title readout into
//! a single verdict. The embedding is authoritative whenever it is
//! confident; the title read can only veto a hit inside the band where the
//! vector might plausibly be wrong, and only when the read itself is nearly
//! certain. That keeps single-letter OCR errors from discarding accurate
//! vector matches.

use super::verdict::{
    CandidateCard, ConfidenceBand, DetectionMethod, ScanStatus, ScanVerdict, confidence_score,
};
use crate::catalog::VectorSearchResult;

use unicode_normalization::UnicodeNormalization;

/// Fraction of name words that must appear in the OCR text for the two
/// signals to count as agreeing.
const NAME_OVERLAP_RATIO: f32 = 0.55;

/// Distance margin under which runner-up hits count as near-ties.
const NEAR_TIE_MARGIN: f32 = 0.05;

/// Decision thresholds. The defaults are the calibrated values.
#[derive(Debug, Clone)]
pub struct FuserConfig {
    /// Below this distance the vector alone is trustworthy.
    pub dist_high: f32,

    /// Below this distance the vector alone is acceptable.
    pub dist_med: f32,

    /// At or above this distance a vector-only claim is rejected.
    pub dist_cutoff: f32,

    /// Minimum OCR confidence allowed to veto a passing vector hit.
    pub ocr_block: f32,

    /// Attempts after which every verdict is terminal.
    pub max_attempts: u32,
}

impl Default for FuserConfig {
    fn default() -> Self {
        Self {
            dist_high: 0.30,
            dist_med: 0.42,
            dist_cutoff: 0.52,
            ocr_block: 0.90,
            max_attempts: 3,
        }
    }
}

impl FuserConfig {
    /// Override the distance thresholds.
    pub fn with_distances(mut self, high: f32, med: f32, cutoff: f32) -> Self {
        self.dist_high = high;
        self.dist_med = med;
        self.dist_cutoff = cutoff;
        self
    }

    /// Override the OCR veto threshold.
    pub fn with_ocr_block(mut self, threshold: f32) -> Self {
        self.ocr_block = threshold;
        self
    }

    /// Override the attempt limit.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// The decision engine. A pure function of its inputs: no catalog access,
/// no clock, no randomness.
#[derive(Debug, Clone, Default)]
pub struct Fuser {
    config: FuserConfig,
}

impl Fuser {
    /// Create a fuser with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fuser with custom thresholds.
    pub fn with_config(config: FuserConfig) -> Self {
        Self { config }
    }

    /// Decide the verdict for one attempt.
    ///
    /// `hits` is ordered by ascending distance; a by-name hit injected by the
    /// pipeline sits at index 0 with distance 0.0. The chosen card is always
    /// one of `hits`.
    pub fn decide(
        &self,
        hits: &[VectorSearchResult],
        ocr_title: Option<&str>,
        ocr_score: f32,
        attempt: u32,
    ) -> ScanVerdict {
        let retryable = attempt < self.config.max_attempts;

        let Some(top) = hits.first() else {
            return match ocr_title {
                // Only OCR produced anything; a better photo may fix the
                // vector side.
                Some(_) if retryable => self.rescan(DetectionMethod::Ocr, attempt),
                Some(_) => self.undecided(ScanStatus::Ambiguous, DetectionMethod::Ocr, attempt),
                None => self.undecided(ScanStatus::NotFound, DetectionMethod::None, attempt),
            };
        };

        let method = if ocr_title.is_some() {
            DetectionMethod::OcrVector
        } else {
            DetectionMethod::Vector
        };

        // A distance of exactly zero only occurs for by-name injections.
        if top.distance == 0.0 {
            return self.confirmed(hits, ConfidenceBand::High, DetectionMethod::OcrVector, attempt);
        }

        if top.distance < self.config.dist_high {
            return self.confirmed(hits, ConfidenceBand::High, method, attempt);
        }

        if top.distance < self.config.dist_med {
            let vetoed = ocr_title.is_some_and(|title| {
                ocr_score >= self.config.ocr_block && !names_overlap(&top.oracle.name, title)
            });

            if vetoed {
                return if retryable {
                    self.rescan(DetectionMethod::Divergent, attempt)
                } else {
                    self.best_guess(hits, DetectionMethod::Vector, attempt)
                };
            }

            return self.confirmed(hits, ConfidenceBand::Medium, method, attempt);
        }

        if top.distance >= self.config.dist_cutoff {
            return if retryable {
                self.rescan(DetectionMethod::Vector, attempt)
            } else {
                self.undecided(ScanStatus::NotFound, DetectionMethod::Vector, attempt)
            };
        }

        // Suspect band: the hit is neither good enough to confirm nor bad
        // enough to reject outright.
        if retryable {
            self.rescan(DetectionMethod::Vector, attempt)
        } else {
            self.best_guess(hits, DetectionMethod::Vector, attempt)
        }
    }

    fn confirmed(
        &self,
        hits: &[VectorSearchResult],
        confidence: ConfidenceBand,
        method: DetectionMethod,
        attempt: u32,
    ) -> ScanVerdict {
        let top = &hits[0];
        ScanVerdict {
            status: ScanStatus::Confirmed,
            confidence,
            confidence_score: confidence_score(top.distance),
            detection_method: method,
            attempt,
            card: Some(CandidateCard::from(top)),
            alternatives: self.plausible_alternatives(hits),
        }
    }

    /// Terminal ambiguity that still names the best vector hit.
    fn best_guess(
        &self,
        hits: &[VectorSearchResult],
        method: DetectionMethod,
        attempt: u32,
    ) -> ScanVerdict {
        let top = &hits[0];
        ScanVerdict {
            status: ScanStatus::Ambiguous,
            confidence: ConfidenceBand::Low,
            confidence_score: confidence_score(top.distance),
            detection_method: method,
            attempt,
            card: Some(CandidateCard::from(top)),
            alternatives: near_ties(hits),
        }
    }

    fn rescan(&self, method: DetectionMethod, attempt: u32) -> ScanVerdict {
        ScanVerdict {
            status: ScanStatus::RescanRequired,
            confidence: ConfidenceBand::Low,
            confidence_score: 0.0,
            detection_method: method,
            attempt,
            card: None,
            alternatives: Vec::new(),
        }
    }

    fn undecided(&self, status: ScanStatus, method: DetectionMethod, attempt: u32) -> ScanVerdict {
        ScanVerdict {
            status,
            confidence: ConfidenceBand::Low,
            confidence_score: 0.0,
            detection_method: method,
            attempt,
            card: None,
            alternatives: Vec::new(),
        }
    }

    /// Runner-up hits close enough to matter. A confirmed verdict does not
    /// advertise distant lookalikes.
    fn plausible_alternatives(&self, hits: &[VectorSearchResult]) -> Vec<CandidateCard> {
        hits.iter()
            .skip(1)
            .filter(|hit| hit.distance < self.config.dist_high)
            .map(CandidateCard::from)
            .collect()
    }
}

/// Runner-up hits within the near-tie margin of the top hit.
fn near_ties(hits: &[VectorSearchResult]) -> Vec<CandidateCard> {
    let top = hits[0].distance;
    hits.iter()
        .skip(1)
        .filter(|hit| hit.distance - top <= NEAR_TIE_MARGIN)
        .map(CandidateCard::from)
        .collect()
}

/// Whether a catalog name and an OCR read plausibly refer to the same card.
///
/// Both strings are lower-cased, NFKD-decomposed, and reduced to ASCII
/// letters, digits, and spaces. The catalog name is split into words of at
/// least three characters; the signals agree when 55% of those words appear
/// as substrings of the OCR text. Deliberately tolerant: ornate card fonts
/// produce predictable single-letter errors.
pub fn names_overlap(catalog_name: &str, ocr_text: &str) -> bool {
    let name = normalize_for_overlap(catalog_name);
    let text = normalize_for_overlap(ocr_text);

    let words: Vec<&str> = name.split_whitespace().filter(|w| w.len() >= 3).collect();
    if words.is_empty() {
        // Nothing to compare against; do not manufacture a disagreement.
        return true;
    }

    let matched = words.iter().filter(|w| text.contains(**w)).count();
    (matched as f32) / (words.len() as f32) >= NAME_OVERLAP_RATIO
}

fn normalize_for_overlap(s: &str) -> String {
    s.nfkd()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{OracleCard, Printing, PrintingRecord, VectorSearchResult};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn hit(name: &str, set: &str, number: &str, distance: f32) -> VectorSearchResult {
        let oracle_id = Uuid::new_v4();
        let record = PrintingRecord::new(Uuid::new_v4(), oracle_id, name)
            .with_set(set, number)
            .with_released_at(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());

        VectorSearchResult {
            oracle: OracleCard::new(oracle_id, name),
            printing: Printing::from_record(&record),
            distance,
        }
    }

    #[test]
    fn no_signals_is_not_found_at_any_attempt() {
        let fuser = Fuser::new();
        for attempt in [1, 2, 3, 7] {
            let verdict = fuser.decide(&[], None, 0.0, attempt);
            assert_eq!(verdict.status, ScanStatus::NotFound);
            assert_eq!(verdict.confidence, ConfidenceBand::Low);
            assert_eq!(verdict.detection_method, DetectionMethod::None);
            assert_eq!(verdict.confidence_score, 0.0);
            assert!(verdict.card.is_none());
        }
    }

    #[test]
    fn ocr_only_asks_for_rescan_then_gives_up() {
        let fuser = Fuser::new();

        let verdict = fuser.decide(&[], Some("Lightning Bolt"), 0.8, 1);
        assert_eq!(verdict.status, ScanStatus::RescanRequired);
        assert_eq!(verdict.detection_method, DetectionMethod::Ocr);

        let verdict = fuser.decide(&[], Some("Lightning Bolt"), 0.8, 3);
        assert_eq!(verdict.status, ScanStatus::Ambiguous);
        assert_eq!(verdict.detection_method, DetectionMethod::Ocr);
        assert!(verdict.card.is_none());
    }

    #[test]
    fn name_injection_confirms_high() {
        let fuser = Fuser::new();
        let hits = vec![
            hit("Lightning Bolt", "M11", "149", 0.0),
            hit("Shock", "M20", "160", 0.25),
        ];

        let verdict = fuser.decide(&hits, Some("Lightning Bolt"), 0.88, 1);
        assert_eq!(verdict.status, ScanStatus::Confirmed);
        assert_eq!(verdict.confidence, ConfidenceBand::High);
        assert_eq!(verdict.detection_method, DetectionMethod::OcrVector);
        assert_eq!(verdict.card.as_ref().unwrap().name, "Lightning Bolt");
        assert_eq!(verdict.confidence_score, 1.0);
        assert_eq!(verdict.alternatives.len(), 1);
    }

    #[test]
    fn confident_vector_confirms_high_on_both_sides_of_the_boundary() {
        let fuser = Fuser::new();

        let verdict = fuser.decide(&[hit("Ponder", "M12", "67", 0.299)], None, 0.0, 1);
        assert_eq!(verdict.status, ScanStatus::Confirmed);
        assert_eq!(verdict.confidence, ConfidenceBand::High);
        assert_eq!(verdict.detection_method, DetectionMethod::Vector);

        let verdict = fuser.decide(&[hit("Ponder", "M12", "67", 0.301)], None, 0.0, 1);
        assert_eq!(verdict.status, ScanStatus::Confirmed);
        assert_eq!(verdict.confidence, ConfidenceBand::Medium);
    }

    #[test]
    fn corroborating_ocr_upgrades_the_method() {
        let fuser = Fuser::new();
        let hits = vec![hit("Llanowar Elves", "M19", "314", 0.2)];

        let verdict = fuser.decide(&hits, Some("Llanowar Elves"), 0.95, 1);
        assert_eq!(verdict.detection_method, DetectionMethod::OcrVector);
        assert_eq!(verdict.confidence, ConfidenceBand::High);
    }

    #[test]
    fn confident_ocr_vetoes_a_good_vector_hit() {
        let fuser = Fuser::new();
        let hits = vec![hit("Llanowar Elves", "M19", "314", 0.36)];

        // Attempt 1: divergent signals ask for another photo.
        let verdict = fuser.decide(&hits, Some("Forest"), 0.95, 1);
        assert_eq!(verdict.status, ScanStatus::RescanRequired);
        assert_eq!(verdict.detection_method, DetectionMethod::Divergent);
        assert!(verdict.card.is_none());

        // Attempt 3: terminal, the vector's best guess is reported.
        let verdict = fuser.decide(&hits, Some("Forest"), 0.95, 3);
        assert_eq!(verdict.status, ScanStatus::Ambiguous);
        assert_eq!(verdict.detection_method, DetectionMethod::Vector);
        assert_eq!(verdict.card.as_ref().unwrap().name, "Llanowar Elves");
    }

    #[test]
    fn weak_ocr_cannot_veto() {
        let fuser = Fuser::new();
        let hits = vec![hit("Llanowar Elves", "M19", "314", 0.36)];

        let verdict = fuser.decide(&hits, Some("Forest"), 0.85, 1);
        assert_eq!(verdict.status, ScanStatus::Confirmed);
        assert_eq!(verdict.confidence, ConfidenceBand::Medium);
    }

    #[test]
    fn veto_boundary_at_dist_med() {
        let fuser = Fuser::new();

        // Just below the medium bound with a non-overlapping confident OCR.
        let verdict = fuser.decide(&[hit("Opt", "DOM", "60", 0.419)], Some("Duress"), 0.91, 1);
        assert_eq!(verdict.status, ScanStatus::RescanRequired);

        let verdict = fuser.decide(&[hit("Opt", "DOM", "60", 0.419)], Some("Duress"), 0.91, 3);
        assert_eq!(verdict.status, ScanStatus::Ambiguous);
        assert_eq!(verdict.card.as_ref().unwrap().name, "Opt");
    }

    #[test]
    fn hard_reject_band() {
        let fuser = Fuser::new();
        let hits = vec![hit("Opt", "DOM", "60", 0.60)];

        let verdict = fuser.decide(&hits, None, 0.0, 1);
        assert_eq!(verdict.status, ScanStatus::RescanRequired);

        let verdict = fuser.decide(&hits, None, 0.0, 3);
        assert_eq!(verdict.status, ScanStatus::NotFound);
        assert!(verdict.card.is_none());
    }

    #[test]
    fn suspect_band_ends_in_best_guess() {
        let fuser = Fuser::new();
        let hits = vec![
            hit("Opt", "DOM", "60", 0.45),
            hit("Ponder", "M12", "67", 0.48),
            hit("Preordain", "M11", "70", 0.52),
        ];

        let verdict = fuser.decide(&hits, None, 0.0, 1);
        assert_eq!(verdict.status, ScanStatus::RescanRequired);

        let verdict = fuser.decide(&hits, None, 0.0, 3);
        assert_eq!(verdict.status, ScanStatus::Ambiguous);
        assert_eq!(verdict.detection_method, DetectionMethod::Vector);
        assert_eq!(verdict.card.as_ref().unwrap().name, "Opt");
        // Near-ties only: Ponder at +0.03 qualifies, Preordain at +0.07 not.
        assert_eq!(verdict.alternatives.len(), 1);
        assert_eq!(verdict.alternatives[0].name, "Ponder");
    }

    #[test]
    fn attempts_at_the_limit_are_always_terminal() {
        let fuser = Fuser::new();
        let inputs: Vec<(Vec<VectorSearchResult>, Option<&str>, f32)> = vec![
            (vec![], None, 0.0),
            (vec![], Some("Opt"), 0.8),
            (vec![hit("Opt", "DOM", "60", 0.36)], Some("Duress"), 0.95),
            (vec![hit("Opt", "DOM", "60", 0.45)], None, 0.0),
            (vec![hit("Opt", "DOM", "60", 0.60)], None, 0.0),
        ];

        for (hits, title, score) in inputs {
            let verdict = fuser.decide(&hits, title, score, 3);
            assert!(
                verdict.status.is_terminal(),
                "expected terminal verdict, got {:?}",
                verdict.status
            );
        }
    }

    #[test]
    fn decisions_are_deterministic() {
        let fuser = Fuser::new();
        let hits = vec![hit("Opt", "DOM", "60", 0.36)];

        let a = fuser.decide(&hits, Some("Forest"), 0.95, 2);
        let b = fuser.decide(&hits, Some("Forest"), 0.95, 2);
        assert_eq!(a.status, b.status);
        assert_eq!(a.detection_method, b.detection_method);
        assert_eq!(a.confidence_score, b.confidence_score);
    }

    #[test]
    fn chosen_card_is_always_one_of_the_hits() {
        let fuser = Fuser::new();
        let hits = vec![
            hit("Opt", "DOM", "60", 0.25),
            hit("Ponder", "M12", "67", 0.28),
        ];

        for attempt in 1..=3 {
            for (title, score) in [(None, 0.0), (Some("Opt"), 0.95), (Some("Duress"), 0.99)] {
                let verdict = fuser.decide(&hits, title, score, attempt);
                if let Some(card) = &verdict.card {
                    assert!(hits.iter().any(|h| h.oracle.id == card.oracle_id));
                }
            }
        }
    }

    #[test]
    fn confirmed_alternatives_exclude_distant_lookalikes() {
        let fuser = Fuser::new();
        let hits = vec![
            hit("Lightning Bolt", "M11", "149", 0.05),
            hit("Shock", "M20", "160", 0.38),
        ];

        let verdict = fuser.decide(&hits, None, 0.0, 1);
        assert_eq!(verdict.status, ScanStatus::Confirmed);
        assert!(verdict.alternatives.is_empty());
    }

    #[test]
    fn name_overlap_tolerates_ocr_noise() {
        assert!(names_overlap("Lightning Bolt", "lightning bolt"));
        assert!(names_overlap("Felidar Guardian", "felidar guardian something"));
        // One of two words is below the 55% bar.
        assert!(!names_overlap("Lightning Bolt", "lightnmg bolt extra"));
        assert!(names_overlap("Bolt", "bolt"));
        assert!(!names_overlap("Llanowar Elves", "Forest"));
        // Diacritics decompose before comparison.
        assert!(names_overlap("Lim-Dûl's Vault", "Lim-Dul's Vault"));
        // Short words are not compared at all.
        assert!(names_overlap("Ob Nixilis", "nixilis reignited"));
    }
}
