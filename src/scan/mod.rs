//! Identification: pipeline orchestration and decision fusion.

mod fuser;
mod pipeline;
mod verdict;

pub use fuser::{Fuser, FuserConfig, names_overlap};
pub use pipeline::{PipelineConfig, ScanPipeline};
pub use verdict::{
    CandidateCard, ConfidenceBand, DetectionMethod, ScanStatus, ScanVerdict, confidence_score,
};
