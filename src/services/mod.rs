//! Thumbnail rendering and the storage collaborators it runs against.

pub mod dispatcher;
pub mod document_rasterizer;
pub mod image_thumbnailer;
pub mod pipeline;
pub mod raster;
pub mod sniffer;
pub mod storage;
