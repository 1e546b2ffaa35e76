//! Art embeddings for canonical card images.
//!
//! Supports multiple embedding backends:
//! - Hash-based (deterministic, for tests and model-less development)
//! - ONNX model (production)
//!
//! Embeddings cover the art region only. The title band and footer are
//! near-identical across printings that share a frame style, so whole-card
//! embeddings collapse unrelated cards onto each other; cropping to the
//! illustration keeps the vector a similarity metric on the art itself.

mod onnx;

pub use onnx::OnnxEmbedder;

use image::{DynamicImage, RgbImage, imageops};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Embedding dimension produced by every backend.
pub const EMBEDDING_DIM: usize = 512;

/// Art region bounds as fractions of the canonical frame. Everything outside
/// (title, type line, rules text, footer) is cropped away.
const ART_LEFT: f32 = 0.030;
const ART_RIGHT: f32 = 0.970;
const ART_TOP: f32 = 0.081;
const ART_BOTTOM: f32 = 0.845;

/// Embedding backend for canonical card images.
pub trait ImageEmbedder: Send + Sync {
    /// Generate an L2-normalized art embedding for a canonical card image.
    ///
    /// Returns `None` when the image cannot be decoded or the backend fails;
    /// the pipeline then falls back to whatever the OCR path produced.
    fn embed(&self, canonical: &[u8]) -> Option<Vec<f32>>;

    /// Get embedding dimensions.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Crop a canonical card image to its art region.
pub(crate) fn crop_art_region(img: &DynamicImage) -> RgbImage {
    let (width, height) = (img.width().max(1), img.height().max(1));

    let x0 = (ART_LEFT * width as f32) as u32;
    let x1 = ((ART_RIGHT * width as f32) as u32).min(width);
    let y0 = (ART_TOP * height as f32) as u32;
    let y1 = ((ART_BOTTOM * height as f32) as u32).min(height);

    img.crop_imm(x0, y0, (x1 - x0).max(1), (y1 - y0).max(1))
        .to_rgb8()
}

/// Scale a vector to unit length. Zero vectors are left unchanged.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Hash-based embedding for tests and development.
///
/// Deterministic: the same art pixels always map to the same unit vector,
/// and small pixel changes move the vector only slightly.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Create a hash embedder with the standard dimension.
    pub fn new() -> Self {
        Self {
            dimensions: EMBEDDING_DIM,
        }
    }

    /// Create a hash embedder with custom dimensions.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_position(&self, position: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        position.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageEmbedder for HashEmbedder {
    fn embed(&self, canonical: &[u8]) -> Option<Vec<f32>> {
        let img = image::load_from_memory(canonical).ok()?;
        let art = crop_art_region(&img);

        // A coarse thumbnail keeps the vector stable under jpeg noise.
        let thumb = imageops::resize(&art, 16, 16, imageops::FilterType::Triangle);

        let mut embedding = vec![0.0f32; self.dimensions];
        for (i, value) in thumb.as_raw().iter().enumerate() {
            let bucket = self.hash_position(i);
            embedding[bucket] += (f32::from(*value) / 255.0) - 0.5;
        }

        l2_normalize(&mut embedding);
        Some(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
