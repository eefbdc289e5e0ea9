//! Sniff → render → thumbnail.

use crate::{
    models::thumbnail::{SourceObject, Thumbnail},
    services::{
        document_rasterizer::DocumentRasterizer,
        image_thumbnailer::ImageThumbnailer,
        raster::RenderError,
        sniffer::{self, ContentKind, DocumentFormat},
    },
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum RenderFailure {
    #[error("image `{key}`: {source}")]
    Image { key: String, source: RenderError },
    #[error("document `{key}`: {source}")]
    Document { key: String, source: RenderError },
    #[error("render task for `{key}` panicked or was cancelled: {reason}")]
    Task { key: String, reason: String },
}

#[derive(Clone)]
pub struct ThumbnailPipeline {
    image: ImageThumbnailer,
    document: DocumentRasterizer,
}

impl ThumbnailPipeline {
    pub fn new(image: ImageThumbnailer, document: DocumentRasterizer) -> Self {
        Self { image, document }
    }

    /// `Ok(None)` means the content is neither an image nor a document.
    #[instrument(skip_all, fields(key = %source.key, size = source.content.len()))]
    pub fn process(&self, source: &SourceObject) -> Result<Option<Thumbnail>, RenderFailure> {
        let encoded = match sniffer::sniff(&source.content) {
            ContentKind::Image(format) => {
                debug!(?format, "rendering image");
                self.image
                    .render(&source.content, format)
                    .map_err(|source_err| RenderFailure::Image {
                        key: source.key.clone(),
                        source: source_err,
                    })?
            }
            ContentKind::Document(DocumentFormat::Pdf) => {
                debug!("rendering pdf");
                self.document
                    .render(&source.content)
                    .map_err(|source_err| RenderFailure::Document {
                        key: source.key.clone(),
                        source: source_err,
                    })?
            }
            ContentKind::Unrecognized => {
                debug!("unrecognized content, no thumbnail");
                return Ok(None);
            }
        };

        Ok(Some(Thumbnail::from_encoded(source.key.clone(), encoded)))
    }

    /// Run [`Self::process`] on the blocking pool; decoding and encoding are
    /// CPU bound.
    pub async fn process_blocking(
        self: Arc<Self>,
        source: SourceObject,
    ) -> Result<Option<Thumbnail>, RenderFailure> {
        let key = source.key.clone();
        tokio::task::spawn_blocking(move || self.process(&source))
            .await
            .map_err(|err| RenderFailure::Task {
                key,
                reason: err.to_string(),
            })?
    }
}
