//! Document path: measure page 1, rasterize it at a fixed density through a
//! scratch file, then hand the bitmap to the shared resize/encode step.

use crate::{
    models::thumbnail::EncodedImage,
    services::raster::{RenderError, RenderResult, SizingPolicy},
};
use image::{ImageFormat, RgbaImage};
use lopdf::{Dictionary, Document, Object};
use pdfium_render::prelude::{PdfRenderConfig, Pdfium};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Rasterization density in dots per inch.
pub const DEFAULT_DENSITY: u32 = 200;

const POINTS_PER_INCH: f64 = 72.0;

/// Longest side of the intermediate bitmap; oversized pages are rendered at
/// a lower density so a poster-sized PDF cannot exhaust memory.
const MAX_RASTER_SIDE: u32 = 10_000;

/// Page-tree depth we follow when resolving inherited attributes.
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// Renders page 1 of a document to an image file.
pub trait PageRasterizer: Send + Sync {
    /// Write page 1 of `document` as a PNG of `width` x `height` pixels to
    /// `destination`.
    fn rasterize_first_page(
        &self,
        document: &[u8],
        size: (u32, u32),
        destination: &Path,
    ) -> RenderResult<()>;
}

/// PDFium-backed rasterizer. The library is bound once at start-up.
pub struct PdfiumRasterizer {
    pdfium: Pdfium,
}

impl PdfiumRasterizer {
    /// Bind to the PDFium shared library in `library_dir`, or to the system
    /// library when no directory is given.
    pub fn bind(library_dir: Option<&Path>) -> RenderResult<Self> {
        let bindings = match library_dir {
            Some(dir) => Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path(
                &dir.to_string_lossy().into_owned(),
            )),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|err| RenderError::Rasterize(format!("binding pdfium: {err}")))?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize_first_page(
        &self,
        document: &[u8],
        (width, height): (u32, u32),
        destination: &Path,
    ) -> RenderResult<()> {
        let pdf = self
            .pdfium
            .load_pdf_from_byte_slice(document, None)
            .map_err(|err| RenderError::DocumentOpen(err.to_string()))?;
        let page = pdf
            .pages()
            .first()
            .map_err(|_| RenderError::PageNotFound)?;

        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_maximum_height(height as i32);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|err| RenderError::Rasterize(err.to_string()))?;

        let rendered = (bitmap.width() as u32, bitmap.height() as u32);
        let pixels = RgbaImage::from_raw(rendered.0, rendered.1, bitmap.as_rgba_bytes())
            .ok_or_else(|| RenderError::Rasterize("bitmap buffer size mismatch".into()))?;
        pixels
            .save_with_format(destination, ImageFormat::Png)
            .map_err(|err| RenderError::Rasterize(err.to_string()))?;

        trace!("rasterized page 1 at {}x{}", rendered.0, rendered.1);
        Ok(())
    }
}

/// Stand-in used when PDFium could not be bound; images keep working and
/// documents fail with a render error.
pub struct UnavailableRasterizer {
    reason: String,
}

impl UnavailableRasterizer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PageRasterizer for UnavailableRasterizer {
    fn rasterize_first_page(&self, _: &[u8], _: (u32, u32), _: &Path) -> RenderResult<()> {
        Err(RenderError::Rasterize(format!(
            "no page rasterizer available: {}",
            self.reason
        )))
    }
}

/// Uniquely named file in the scratch directory, removed when dropped.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn new_in(dir: &Path) -> Self {
        Self {
            path: dir.join(format!(".raster-{}.png", Uuid::new_v4())),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => trace!("removed scratch file {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "failed to remove scratch file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

/// Intrinsic size of a page in points, after applying `/Rotate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
}

impl PageGeometry {
    /// Point size rounded to whole units, used as the origin dimensions for
    /// the bounding box.
    pub fn origin(&self) -> (u32, u32) {
        (
            (self.width.round() as u32).max(1),
            (self.height.round() as u32).max(1),
        )
    }

    /// Pixel size of the page rendered at `density` DPI.
    pub fn raster_size(&self, density: u32) -> (u32, u32) {
        let to_pixels = |points: f64| points * f64::from(density) / POINTS_PER_INCH;
        let (mut width, mut height) = (to_pixels(self.width), to_pixels(self.height));

        let longest = width.max(height);
        let cap = f64::from(MAX_RASTER_SIDE);
        if longest > cap {
            width = width * cap / longest;
            height = height * cap / longest;
        }

        // Tolerate float noise so exact sizes do not round up a pixel.
        let side = |pixels: f64| ((pixels - 1e-6).ceil() as u32).clamp(1, MAX_RASTER_SIDE);
        (side(width), side(height))
    }
}

/// Measure page 1 of a PDF without rendering it.
pub fn measure_first_page(bytes: &[u8]) -> RenderResult<PageGeometry> {
    let doc = Document::load_mem(bytes).map_err(|err| RenderError::DocumentOpen(err.to_string()))?;
    let pages = doc.get_pages();
    let (_, &page_id) = pages.iter().next().ok_or(RenderError::PageNotFound)?;
    let page = doc
        .get_dictionary(page_id)
        .map_err(|err| RenderError::DocumentOpen(format!("page 1: {err}")))?;

    let page_box = inherited_attribute(&doc, page, b"CropBox")
        .or_else(|| inherited_attribute(&doc, page, b"MediaBox"))
        .ok_or_else(|| RenderError::DocumentOpen("page 1 has no MediaBox".into()))?;
    let (width, height) = rectangle_size(&doc, page_box)?;

    let rotation = inherited_attribute(&doc, page, b"Rotate")
        .and_then(|value| value.as_i64().ok())
        .unwrap_or(0)
        .rem_euclid(360);

    Ok(if rotation == 90 || rotation == 270 {
        PageGeometry {
            width: height,
            height: width,
        }
    } else {
        PageGeometry { width, height }
    })
}

/// Look `key` up on the page, then on its ancestors in the page tree.
fn inherited_attribute<'a>(
    doc: &'a Document,
    page: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    let mut node = page;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return doc.dereference(value).ok().map(|(_, object)| object);
        }
        let parent = node.get(b"Parent").ok()?;
        node = doc.dereference(parent).ok()?.1.as_dict().ok()?;
    }
    None
}

fn rectangle_size(doc: &Document, rect: &Object) -> RenderResult<(f64, f64)> {
    let invalid = || RenderError::DocumentOpen("page 1 has an invalid page box".into());

    let corners = rect
        .as_array()
        .map_err(|_| invalid())?
        .iter()
        .map(|value| {
            doc.dereference(value)
                .ok()
                .and_then(|(_, object)| object.as_float().ok())
                .map(f64::from)
        })
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(invalid)?;

    let &[x0, y0, x1, y1] = corners.as_slice() else {
        return Err(invalid());
    };
    let (width, height) = ((x1 - x0).abs(), (y1 - y0).abs());
    if !(width.is_finite() && height.is_finite()) || width < 1.0 || height < 1.0 {
        return Err(invalid());
    }
    Ok((width, height))
}

#[derive(Clone)]
pub struct DocumentRasterizer {
    policy: SizingPolicy,
    density: u32,
    scratch_dir: PathBuf,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl DocumentRasterizer {
    pub fn new(
        policy: SizingPolicy,
        density: u32,
        scratch_dir: impl Into<PathBuf>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self {
            policy,
            density,
            scratch_dir: scratch_dir.into(),
            rasterizer,
        }
    }

    /// Render page 1 of a PDF into a WebP thumbnail. Later pages are never
    /// touched.
    pub fn render(&self, bytes: &[u8]) -> RenderResult<EncodedImage> {
        let geometry = measure_first_page(bytes)?;
        let origin = geometry.origin();
        let raster_size = geometry.raster_size(self.density);
        debug!(
            "page 1 is {:.1}x{:.1} pt, rasterizing at {}x{} px",
            geometry.width, geometry.height, raster_size.0, raster_size.1
        );

        let bitmap = {
            let scratch = ScratchFile::new_in(&self.scratch_dir);
            self.rasterizer
                .rasterize_first_page(bytes, raster_size, scratch.path())?;
            image::open(scratch.path())?
        };

        self.policy.resize_and_encode(bitmap, origin)
    }
}
