//! Card detection and perspective rectification.

use super::{CARD_HEIGHT, CARD_WIDTH};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, Rgb, RgbImage, imageops};
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::dilate;
use imageproc::point::Point;
use tracing::debug;

/// Configuration for card detection.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Canny hysteresis low threshold.
    pub canny_low: f32,

    /// Canny hysteresis high threshold.
    pub canny_high: f32,

    /// Minimum contour area as a fraction of the image area.
    pub min_area_ratio: f64,

    /// Polygon approximation epsilon as a fraction of contour perimeter.
    pub approx_epsilon_ratio: f64,

    /// JPEG quality for the canonical output.
    pub jpeg_quality: u8,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            min_area_ratio: 0.05,
            approx_epsilon_ratio: 0.02,
            jpeg_quality: 92,
        }
    }
}

/// Finds a card in a photo and warps it to the canonical 488×680 frame.
pub struct Detector {
    config: DetectorConfig,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    /// Create a detector with default configuration.
    pub fn new() -> Self {
        Self {
            config: DetectorConfig::default(),
        }
    }

    /// Create a detector with custom configuration.
    pub fn with_config(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Crop a card photo to the canonical frame.
    ///
    /// Total: any decodable input produces a 488×680 JPEG, via perspective
    /// rectification when a card-like quadrilateral is found and a centered
    /// crop otherwise. Undecodable input is returned unchanged.
    pub fn detect_and_crop(&self, raw: &[u8]) -> Vec<u8> {
        let Ok(img) = image::load_from_memory(raw) else {
            debug!("Input image could not be decoded, passing through");
            return raw.to_vec();
        };

        let canonical = match self.rectify(&img) {
            Some(rectified) => rectified,
            None => self.fallback_crop(&img),
        };

        match self.encode_jpeg(&canonical) {
            Some(bytes) => bytes,
            None => raw.to_vec(),
        }
    }

    /// Perspective rectification: find the largest convex quadrilateral and
    /// warp it onto the canonical frame.
    fn rectify(&self, img: &DynamicImage) -> Option<RgbImage> {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width < 4 || height < 4 {
            return None;
        }

        let gray: GrayImage = img.to_luma8();
        let blurred = gaussian_blur_f32(&gray, 1.1);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);
        let closed = dilate(&edges, Norm::LInf, 1);

        let min_area = self.config.min_area_ratio * f64::from(width) * f64::from(height);

        let mut best: Option<(f64, [Point<i32>; 4])> = None;
        for contour in find_contours::<i32>(&closed) {
            if contour.border_type != BorderType::Outer || contour.points.len() < 4 {
                continue;
            }

            let perimeter = arc_length(&contour.points, true);
            let epsilon = self.config.approx_epsilon_ratio * perimeter;
            let polygon = approximate_polygon_dp(&contour.points, epsilon, true);

            if polygon.len() != 4 || !is_convex(&polygon) {
                continue;
            }

            let area = polygon_area(&polygon);
            if area < min_area {
                continue;
            }

            if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
                best = Some((area, [polygon[0], polygon[1], polygon[2], polygon[3]]));
            }
        }

        let (_, quad) = best?;
        let corners = order_corners(&quad);
        debug!(?corners, "Rectifying detected card quadrilateral");

        let projection = Projection::from_control_points(
            corners,
            [
                (0.0, 0.0),
                (CARD_WIDTH as f32, 0.0),
                (CARD_WIDTH as f32, CARD_HEIGHT as f32),
                (0.0, CARD_HEIGHT as f32),
            ],
        )?;

        let mut out = RgbImage::new(CARD_WIDTH, CARD_HEIGHT);
        warp_into(
            &rgb,
            &projection,
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
            &mut out,
        );
        Some(out)
    }

    /// Centered aspect-preserving crop with mild enhancement, for photos
    /// where no card outline can be isolated.
    fn fallback_crop(&self, img: &DynamicImage) -> RgbImage {
        let (width, height) = (img.width().max(1), img.height().max(1));

        // Maximal sub-rectangle with the card's aspect ratio, centered.
        let target_ratio = f64::from(CARD_WIDTH) / f64::from(CARD_HEIGHT);
        let input_ratio = f64::from(width) / f64::from(height);

        let (crop_w, crop_h) = if input_ratio > target_ratio {
            ((f64::from(height) * target_ratio) as u32, height)
        } else {
            (width, (f64::from(width) / target_ratio) as u32)
        };
        let crop_w = crop_w.clamp(1, width);
        let crop_h = crop_h.clamp(1, height);
        let x = (width - crop_w) / 2;
        let y = (height - crop_h) / 2;

        let cropped = img.crop_imm(x, y, crop_w, crop_h).to_rgb8();

        let mut enhanced = cropped;
        scale_channels(&mut enhanced, 1.15, 1.05);
        let sharpened = imageops::unsharpen(&enhanced, 0.8, 2);

        imageops::resize(
            &sharpened,
            CARD_WIDTH,
            CARD_HEIGHT,
            imageops::FilterType::Lanczos3,
        )
    }

    fn encode_jpeg(&self, img: &RgbImage) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.config.jpeg_quality);
        encoder
            .encode(
                img.as_raw(),
                img.width(),
                img.height(),
                image::ExtendedColorType::Rgb8,
            )
            .ok()?;
        Some(out)
    }
}

/// Multiply every pixel by a contrast factor around the midpoint and a
/// brightness factor, clamped to the valid range.
fn scale_channels(img: &mut RgbImage, contrast: f32, brightness: f32) {
    for pixel in img.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            let contrasted = (f32::from(*channel) - 128.0) * contrast + 128.0;
            *channel = (contrasted * brightness).clamp(0.0, 255.0) as u8;
        }
    }
}

/// Whether a quadrilateral is convex: all cross products share a sign.
fn is_convex(polygon: &[Point<i32>]) -> bool {
    let n = polygon.len();
    if n < 4 {
        return false;
    }

    let mut sign = 0i64;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let c = polygon[(i + 2) % n];

        let cross = i64::from(b.x - a.x) * i64::from(c.y - b.y)
            - i64::from(b.y - a.y) * i64::from(c.x - b.x);
        if cross == 0 {
            continue;
        }
        if sign == 0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    sign != 0
}

/// Shoelace area of a closed polygon.
fn polygon_area(polygon: &[Point<i32>]) -> f64 {
    let n = polygon.len();
    let mut doubled = 0i64;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        doubled += i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y);
    }
    (doubled.abs() as f64) / 2.0
}

/// Order four corners clockwise from top-left. The top-left corner minimizes
/// x+y, bottom-right maximizes it; top-right minimizes y−x, bottom-left
/// maximizes it.
fn order_corners(quad: &[Point<i32>; 4]) -> [(f32, f32); 4] {
    let tl = quad.iter().min_by_key(|p| p.x + p.y).unwrap();
    let br = quad.iter().max_by_key(|p| p.x + p.y).unwrap();
    let tr = quad.iter().min_by_key(|p| p.y - p.x).unwrap();
    let bl = quad.iter().max_by_key(|p| p.y - p.x).unwrap();

    [
        (tl.x as f32, tl.y as f32),
        (tr.x as f32, tr.y as f32),
        (br.x as f32, br.y as f32),
        (bl.x as f32, bl.y as f32),
    ]
}
