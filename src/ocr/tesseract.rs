//! Tesseract OCR backend.

use super::TitleOcr;
use crate::error::{Error, Result};

use leptess::{LepTess, Variable};

/// Characters Tesseract is allowed to emit for a card title: basic Latin
/// letters, Latin-1 accented letters, space, apostrophe, hyphen.
const TITLE_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz\
ÀÁÂÃÄÅÆÇÈÉÊËÌÍÎÏÐÑÒÓÔÕÖØÙÚÛÜÝÞßàáâãäåæçèéêëìíîïðñòóôõöøùúûüýþÿ '-";

/// Configuration for the Tesseract backend.
#[derive(Debug, Clone)]
pub struct TesseractOcrConfig {
    /// Directory containing Tesseract language data (`None` for the system
    /// default).
    pub data_path: Option<String>,

    /// Recognition language.
    pub language: String,

    /// Page segmentation mode. 7 treats the image as a single text line.
    pub psm: i32,

    /// OCR engine mode. 1 is LSTM only.
    pub oem: i32,
}

impl Default for TesseractOcrConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            language: "eng".to_string(),
            psm: 7,
            oem: 1,
        }
    }
}

impl TesseractOcrConfig {
    /// Set the language data directory.
    pub fn with_data_path(mut self, path: impl Into<String>) -> Self {
        self.data_path = Some(path.into());
        self
    }
}

/// Tesseract-backed title recognition.
///
/// The Tesseract handle is not thread safe, so each recognition initializes
/// a fresh engine from the stored configuration. Initialization is verified
/// once at construction so a missing runtime surfaces at startup.
pub struct TesseractTitleOcr {
    config: TesseractOcrConfig,
}

impl TesseractTitleOcr {
    /// Initialize the backend with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(TesseractOcrConfig::default())
    }

    /// Initialize the backend with the given configuration.
    pub fn with_config(config: TesseractOcrConfig) -> Result<Self> {
        let backend = Self { config };
        backend.init_engine()?;
        Ok(backend)
    }

    fn init_engine(&self) -> Result<LepTess> {
        let mut engine = LepTess::new(self.config.data_path.as_deref(), &self.config.language)
            .map_err(|e| Error::ocr(format!("tesseract initialization failed: {e}")))?;

        engine
            .set_variable(Variable::TesseditPagesegMode, &self.config.psm.to_string())
            .map_err(|e| Error::ocr(format!("failed to set page segmentation mode: {e:?}")))?;
        engine
            .set_variable(Variable::TesseditOcrEngineMode, &self.config.oem.to_string())
            .map_err(|e| Error::ocr(format!("failed to set engine mode: {e:?}")))?;
        engine
            .set_variable(Variable::TesseditCharWhitelist, TITLE_WHITELIST)
            .map_err(|e| Error::ocr(format!("failed to set character whitelist: {e:?}")))?;

        Ok(engine)
    }
}

impl TitleOcr for TesseractTitleOcr {
    fn recognize_line(&self, png: &[u8]) -> Result<(String, f32)> {
        let mut engine = self.init_engine()?;

        engine
            .set_image_from_mem(png)
            .map_err(|e| Error::ocr(format!("failed to set image: {e}")))?;
        engine.set_source_resolution(300);

        let text = engine
            .get_utf8_text()
            .map_err(|e| Error::ocr(format!("recognition failed: {e}")))?;
        let confidence = engine.mean_text_conf();

        Ok((text, confidence as f32 / 100.0))
    }
}
