//! ONNX embedding backend.
//!
//! Runs a 512-output image embedding model over the art region of the
//! canonical card frame.

use super::{EMBEDDING_DIM, ImageEmbedder, crop_art_region, l2_normalize};
use crate::error::{Error, Result};

use image::imageops;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// Model input edge length.
const MODEL_INPUT: u32 = 224;

/// ImageNet per-channel normalization statistics.
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// ONNX-backed art embedder.
///
/// The session is created once at startup and shared for the lifetime of the
/// process; inference calls serialize on it.
#[derive(Debug)]
pub struct OnnxEmbedder {
    session: Mutex<Session>,
}

impl OnnxEmbedder {
    /// Load the embedding model from an ONNX file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let session = Session::builder()
            .map_err(|e| Error::embedding(format!("failed to create session builder: {e}")))?
            .commit_from_file(path)
            .map_err(|e| {
                Error::embedding(format!("failed to load model {}: {e}", path.display()))
            })?;

        info!("Loaded embedding model from {}", path.display());
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Preprocess a canonical card image into the model's input tensor:
    /// art crop, 224×224 resize, ImageNet normalization, NCHW layout.
    fn preprocess(&self, canonical: &[u8]) -> Result<Array4<f32>> {
        let img = image::load_from_memory(canonical)
            .map_err(|e| Error::embedding(format!("failed to decode image: {e}")))?;

        let art = crop_art_region(&img);
        let resized = imageops::resize(
            &art,
            MODEL_INPUT,
            MODEL_INPUT,
            imageops::FilterType::Triangle,
        );

        let mut tensor = Array4::<f32>::zeros((1, 3, MODEL_INPUT as usize, MODEL_INPUT as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) / 255.0;
                tensor[[0, channel, y as usize, x as usize]] =
                    (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            }
        }

        Ok(tensor)
    }

    fn run(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::embedding("embedding session poisoned"))?;

        let input_slice = input
            .as_slice()
            .ok_or_else(|| Error::embedding("input tensor not contiguous"))?;
        let input_tensor = TensorRef::from_array_view((input.shape(), input_slice))
            .map_err(|e| Error::embedding(format!("failed to create tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| Error::embedding(format!("inference failed: {e}")))?;

        let (_, output_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::embedding(format!("failed to extract output tensor: {e}")))?;

        if output_data.len() != EMBEDDING_DIM {
            return Err(Error::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: output_data.len(),
            });
        }

        let mut embedding = output_data.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl ImageEmbedder for OnnxEmbedder {
    fn embed(&self, canonical: &[u8]) -> Option<Vec<f32>> {
        let tensor = match self.preprocess(canonical) {
            Ok(tensor) => tensor,
            Err(e) => {
                warn!("Embedding preprocessing failed: {e}");
                return None;
            }
        };

        match self.run(&tensor) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("Embedding inference failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_a_missing_model_fails() {
        let err = OnnxEmbedder::load("/nonexistent/model.onnx").unwrap_err();
        assert!(err.to_string().contains("model"));
    }

    #[test]
    fn imagenet_constants_are_paired() {
        assert_eq!(IMAGENET_MEAN.len(), IMAGENET_STD.len());
        assert!(IMAGENET_STD.iter().all(|s| *s > 0.0));
    }
}
