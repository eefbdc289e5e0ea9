//! Bounding-box math and the resize/encode step shared by the image and
//! document render paths.

use crate::models::thumbnail::EncodedImage;
use image::{DynamicImage, GenericImageView, imageops::FilterType};
use std::io;
use thiserror::Error;
use tracing::trace;
use webp::Encoder;

/// Longest allowed edge of a thumbnail, applied to each axis independently.
pub const DEFAULT_MAX_DIMENSION: u32 = 1440;

/// Longest edge a WebP bitstream can carry.
pub const MAX_WEBP_DIMENSION: u32 = 16383;

/// WebP quality, 0–100.
pub const DEFAULT_QUALITY: f32 = 80.0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to encode webp: {0}")]
    Encode(String),
    #[error("failed to open document: {0}")]
    DocumentOpen(String),
    #[error("document has no pages")]
    PageNotFound,
    #[error("failed to rasterize page: {0}")]
    Rasterize(String),
    #[error("scratch file error: {0}")]
    Scratch(#[from] io::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingPolicy {
    pub max_dimension: u32,
    pub quality: f32,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl SizingPolicy {
    pub fn new(max_dimension: u32, quality: f32) -> Self {
        Self {
            max_dimension,
            quality,
        }
    }

    /// `(min(B, w₀), min(B, h₀))` for origin dimensions `(w₀, h₀)`.
    pub fn target_box(&self, (width, height): (u32, u32)) -> (u32, u32) {
        (
            width.min(self.max_dimension),
            height.min(self.max_dimension),
        )
    }

    /// Output size for a bitmap of size `actual` whose source measured
    /// `origin`. The two differ for documents, where the page is rendered
    /// at a higher density than its point size.
    pub fn thumbnail_size(&self, origin: (u32, u32), actual: (u32, u32)) -> (u32, u32) {
        fit_within(actual, self.target_box(origin))
    }

    /// Resize `img` under this policy and encode it as WebP.
    pub fn resize_and_encode(
        &self,
        img: DynamicImage,
        origin: (u32, u32),
    ) -> RenderResult<EncodedImage> {
        let actual = img.dimensions();
        let (width, height) = self.thumbnail_size(origin, actual);

        let img = if (width, height) == actual {
            img
        } else {
            trace!(
                "resizing {}x{} -> {}x{}",
                actual.0, actual.1, width, height
            );
            img.resize_exact(width, height, FilterType::Lanczos3)
        };

        let data = encode_webp(&img, self.quality)?;
        Ok(EncodedImage {
            data,
            width,
            height,
        })
    }
}

/// Largest size with the aspect ratio of `actual` that fits inside `bounds`.
/// Sizes already inside the box are returned unchanged.
pub fn fit_within((width, height): (u32, u32), (max_w, max_h): (u32, u32)) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }

    let scale = f64::min(
        f64::from(max_w) / f64::from(width),
        f64::from(max_h) / f64::from(height),
    );
    let scaled = |side: u32, max: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max.max(1));

    (scaled(width, max_w), scaled(height, max_h))
}

/// The WebP encoder only accepts 8-bit RGB and RGBA buffers.
fn encode_webp(img: &DynamicImage, quality: f32) -> RenderResult<Vec<u8>> {
    let normalized;
    let img = match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => {
            normalized = DynamicImage::ImageRgba8(other.to_rgba8());
            &normalized
        }
        other => {
            normalized = DynamicImage::ImageRgb8(other.to_rgb8());
            &normalized
        }
    };

    let encoder = Encoder::from_image(img).map_err(|reason| RenderError::Encode(reason.to_string()))?;
    Ok(encoder.encode(quality).to_vec())
}
