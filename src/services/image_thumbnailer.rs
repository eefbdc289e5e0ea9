//! Raster image path: decode, make upright, fit, encode.

use crate::{
    models::thumbnail::EncodedImage,
    services::raster::{RenderResult, SizingPolicy},
};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// EXIF orientation, named after the transform that makes the image upright.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Normal,
    MirroredHorizontal,
    CW180,
    MirroredVertical,
    MirroredHorizontalAnd270CW,
    CW90,
    MirroredHorizontalAnd90CW,
    CW270,
}

impl Orientation {
    /// Read the orientation tag from an image container. Anything without a
    /// readable tag is treated as upright.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        exif::Reader::new()
            .read_from_container(&mut Cursor::new(bytes))
            .ok()
            .and_then(|reader| {
                reader
                    .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                    .and_then(|field| field.value.get_uint(0))
            })
            .map(Self::from)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn correct(self, img: DynamicImage) -> DynamicImage {
        match self {
            Self::Normal => img,
            Self::MirroredHorizontal => img.fliph(),
            Self::CW180 => img.rotate180(),
            Self::MirroredVertical => img.flipv(),
            Self::MirroredHorizontalAnd270CW => img.fliph().rotate270(),
            Self::CW90 => img.rotate90(),
            Self::MirroredHorizontalAnd90CW => img.fliph().rotate90(),
            Self::CW270 => img.rotate270(),
        }
    }
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        match value {
            2 => Self::MirroredHorizontal,
            3 => Self::CW180,
            4 => Self::MirroredVertical,
            5 => Self::MirroredHorizontalAnd270CW,
            6 => Self::CW90,
            7 => Self::MirroredHorizontalAnd90CW,
            8 => Self::CW270,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageThumbnailer {
    policy: SizingPolicy,
}

impl ImageThumbnailer {
    pub fn new(policy: SizingPolicy) -> Self {
        Self { policy }
    }

    /// Render `bytes`, already classified as `format`, into a WebP thumbnail.
    pub fn render(&self, bytes: &[u8], format: ImageFormat) -> RenderResult<EncodedImage> {
        let img = image::load_from_memory_with_format(bytes, format)?;

        let orientation = Orientation::from_bytes(bytes);
        let img = orientation.correct(img);
        let origin = img.dimensions();
        debug!(?format, ?orientation, "decoded {}x{} image", origin.0, origin.1);

        self.policy.resize_and_encode(img, origin)
    }
}
