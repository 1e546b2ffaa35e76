//! Title OCR for canonical card images.
//!
//! The title reader crops the name band out of the canonical frame, enhances
//! it for text recognition, and hands the losslessly encoded band to a
//! [`TitleOcr`] backend (Tesseract in production, fixtures in tests). Raw
//! OCR output is filtered down to something that can plausibly be a card
//! name before anyone downstream sees it.

#[cfg(feature = "ocr")]
mod tesseract;

#[cfg(feature = "ocr")]
pub use tesseract::{TesseractOcrConfig, TesseractTitleOcr};

use crate::error::Result;

use image::{DynamicImage, GrayImage, imageops};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Title band bounds as fractions of the canonical frame.
const BAND_LEFT: f32 = 0.035;
const BAND_RIGHT: f32 = 0.685;
const BAND_TOP: f32 = 0.035;
const BAND_BOTTOM: f32 = 0.095;

/// Upscale factor applied to the band before recognition.
const BAND_UPSCALE: u32 = 4;

/// The outcome of reading the title band. Never an error: an unreadable
/// title is simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleReadout {
    /// The cleaned title, when the read was confident enough to keep.
    pub title: Option<String>,

    /// Mean OCR confidence in `[0, 1]`.
    pub score: f32,
}

impl TitleReadout {
    fn empty() -> Self {
        Self {
            title: None,
            score: 0.0,
        }
    }
}

/// OCR backend contract used by the title reader.
///
/// Backends receive the preprocessed band as a lossless PNG and return the
/// raw single-line text with a mean confidence in `[0, 1]`.
pub trait TitleOcr: Send + Sync {
    /// Recognize one line of text in the given PNG image.
    fn recognize_line(&self, png: &[u8]) -> Result<(String, f32)>;
}

/// Configuration for title reading.
#[derive(Debug, Clone)]
pub struct TitleReaderConfig {
    /// Reads below this mean confidence are discarded.
    pub min_score: f32,

    /// Cleaned titles shorter than this are discarded.
    pub min_length: usize,

    /// Contrast factor applied to the band.
    pub contrast: f32,

    /// Brightness factor applied to the band.
    pub brightness: f32,
}

impl Default for TitleReaderConfig {
    fn default() -> Self {
        Self {
            min_score: 0.35,
            min_length: 2,
            contrast: 2.2,
            brightness: 1.10,
        }
    }
}

/// Reads the card name out of a canonical card image.
pub struct TitleReader {
    backend: Arc<dyn TitleOcr>,
    config: TitleReaderConfig,
}

impl TitleReader {
    /// Create a title reader with default configuration.
    pub fn new(backend: Arc<dyn TitleOcr>) -> Self {
        Self {
            backend,
            config: TitleReaderConfig::default(),
        }
    }

    /// Create a title reader with custom configuration.
    pub fn with_config(backend: Arc<dyn TitleOcr>, config: TitleReaderConfig) -> Self {
        Self { backend, config }
    }

    /// Read the title from a canonical card image.
    ///
    /// Total: decoding failures, OCR failures, and low-confidence reads all
    /// collapse into a readout without a title.
    pub fn read_title(&self, canonical: &[u8]) -> TitleReadout {
        let Ok(img) = image::load_from_memory(canonical) else {
            return TitleReadout::empty();
        };

        let band = self.preprocess_band(&img);
        let Some(png) = encode_png(&band) else {
            return TitleReadout::empty();
        };

        let (raw, score) = match self.backend.recognize_line(&png) {
            Ok(read) => read,
            Err(e) => {
                debug!("Title OCR failed: {e}");
                return TitleReadout::empty();
            }
        };

        let cleaned = clean_title(&raw);
        if score < self.config.min_score || cleaned.chars().count() < self.config.min_length {
            return TitleReadout { title: None, score };
        }

        TitleReadout {
            title: Some(cleaned),
            score,
        }
    }

    /// Crop the title band and enhance it for recognition: 4× upscale,
    /// grayscale, contrast and brightness boost, mild sharpen.
    fn preprocess_band(&self, img: &DynamicImage) -> GrayImage {
        let (width, height) = (img.width().max(1), img.height().max(1));

        let x0 = (BAND_LEFT * width as f32) as u32;
        let x1 = ((BAND_RIGHT * width as f32) as u32).min(width);
        let y0 = (BAND_TOP * height as f32) as u32;
        let y1 = ((BAND_BOTTOM * height as f32) as u32).min(height);

        let band = img.crop_imm(x0, y0, (x1 - x0).max(1), (y1 - y0).max(1));

        let upscaled = imageops::resize(
            &band.to_rgb8(),
            band.width() * BAND_UPSCALE,
            band.height() * BAND_UPSCALE,
            imageops::FilterType::Lanczos3,
        );

        let mut gray = DynamicImage::ImageRgb8(upscaled).to_luma8();
        for pixel in gray.pixels_mut() {
            let contrasted = (f32::from(pixel[0]) - 128.0) * self.config.contrast + 128.0;
            pixel[0] = (contrasted * self.config.brightness).clamp(0.0, 255.0) as u8;
        }

        imageops::unsharpen(&gray, 0.7, 1)
    }
}

fn encode_png(img: &GrayImage) -> Option<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut out, image::ImageFormat::Png)
        .ok()?;
    Some(out.into_inner())
}

/// Whether a character may appear in a cleaned title.
fn is_title_char(c: char) -> bool {
    c.is_ascii_alphabetic()
        || matches!(c, '\u{00C0}'..='\u{00FF}' if c != '\u{00D7}' && c != '\u{00F7}')
        || matches!(c, ' ' | '\'' | '-')
}

/// Normalize a raw OCR line: drop bracketed runs (mana symbols), strip
/// everything outside the title alphabet, collapse whitespace.
fn clean_title(raw: &str) -> String {
    let mut depth = 0usize;
    let mut kept = String::with_capacity(raw.len());

    for c in raw.chars() {
        match c {
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                if is_title_char(c) {
                    kept.push(c);
                } else if c.is_whitespace() {
                    kept.push(' ');
                }
            }
            _ => {}
        }
    }

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fixture OCR backend for tests and pipeline development.
///
/// Returns a pre-registered reading regardless of input, or an error when
/// constructed as failing.
#[derive(Debug, Clone)]
pub struct FixtureTitleOcr {
    reading: Option<(String, f32)>,
}

impl FixtureTitleOcr {
    /// A backend that always produces the given raw line and confidence.
    pub fn reading(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            reading: Some((text.into(), confidence)),
        }
    }

    /// A backend that always fails, as an unavailable OCR runtime would.
    pub fn failing() -> Self {
        Self { reading: None }
    }
}

impl TitleOcr for FixtureTitleOcr {
    fn recognize_line(&self, _png: &[u8]) -> Result<(String, f32)> {
        match &self.reading {
            Some((text, confidence)) => Ok((text.clone(), *confidence)),
            None => Err(crate::error::Error::ocr("fixture backend set to fail")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn canonical_png() -> Vec<u8> {
        let img = RgbImage::from_pixel(488, 680, Rgb([200, 200, 200]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn clean_title_strips_symbols_and_collapses_whitespace() {
        assert_eq!(clean_title("Lightning  Bolt {R}"), "Lightning Bolt");
        assert_eq!(clean_title("Fire // Ice"), "Fire Ice");
        assert_eq!(clean_title("  Æther Vial!!"), "Æther Vial");
        assert_eq!(clean_title("[3] Llanowar Elves"), "Llanowar Elves");
        assert_eq!(clean_title("Lim-Dûl's Vault"), "Lim-Dûl's Vault");
        assert_eq!(clean_title("12345 #%&"), "");
    }

    #[test]
    fn confident_read_is_kept() {
        let reader = TitleReader::new(Arc::new(FixtureTitleOcr::reading(
            "Lightning Bolt {R}",
            0.88,
        )));
        let readout = reader.read_title(&canonical_png());
        assert_eq!(readout.title.as_deref(), Some("Lightning Bolt"));
        assert!((readout.score - 0.88).abs() < f32::EPSILON);
    }

    #[test]
    fn low_confidence_read_is_dropped_but_scored() {
        let reader = TitleReader::new(Arc::new(FixtureTitleOcr::reading("Lightning Bolt", 0.2)));
        let readout = reader.read_title(&canonical_png());
        assert_eq!(readout.title, None);
        assert!((readout.score - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn too_short_read_is_dropped() {
        let reader = TitleReader::new(Arc::new(FixtureTitleOcr::reading("X", 0.9)));
        let readout = reader.read_title(&canonical_png());
        assert_eq!(readout.title, None);
    }

    #[test]
    fn backend_failure_yields_empty_readout() {
        let reader = TitleReader::new(Arc::new(FixtureTitleOcr::failing()));
        let readout = reader.read_title(&canonical_png());
        assert_eq!(readout, TitleReadout::empty());
    }

    #[test]
    fn undecodable_image_yields_empty_readout() {
        let reader = TitleReader::new(Arc::new(FixtureTitleOcr::reading("Bolt", 0.9)));
        assert_eq!(reader.read_title(b"garbage"), TitleReadout::empty());
    }

    #[test]
    fn band_crop_covers_the_name_line() {
        let reader = TitleReader::new(Arc::new(FixtureTitleOcr::reading("x", 0.0)));
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(488, 680, Rgb([0, 0, 0])));
        let band = reader.preprocess_band(&img);

        // 65% of the width and 6% of the height, upscaled 4×.
        assert_eq!(band.width(), (334 - 17) * 4);
        assert_eq!(band.height(), (64 - 23) * 4);
    }
}
