//! Source objects and the previews generated from them.

use bytes::Bytes;

/// MIME type of every thumbnail written to the destination bucket.
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/webp";

/// An object fetched from the source bucket, not yet classified.
#[derive(Debug, Clone)]
pub struct SourceObject {
    pub key: String,
    pub content: Bytes,
}

impl SourceObject {
    pub fn new(key: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
        }
    }
}

/// Encoded output of one of the render paths, before it is bound to a key.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A generated preview, addressed by the same key as its source object.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub key: String,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

impl Thumbnail {
    pub fn from_encoded(key: impl Into<String>, encoded: EncodedImage) -> Self {
        Self {
            key: key.into(),
            data: Bytes::from(encoded.data),
            width: encoded.width,
            height: encoded.height,
        }
    }

    pub fn content_type(&self) -> &'static str {
        THUMBNAIL_CONTENT_TYPE
    }
}
