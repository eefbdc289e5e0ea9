//! Content classification by byte signature.
//!
//! File names and declared content types are never consulted: an object
//! called `report.pdf` holding a PNG is treated as a PNG.

use image::ImageFormat;

/// Must open the buffer; the document parser rejects anything in front of it.
const PDF_SIGNATURE: &[u8] = b"%PDF-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Image(ImageFormat),
    Document(DocumentFormat),
    Unrecognized,
}

/// Raster formats the image path decodes.
pub const fn is_thumbnailable_image(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::Gif
            | ImageFormat::WebP
            | ImageFormat::Bmp
            | ImageFormat::Tiff
            | ImageFormat::Ico
    )
}

pub fn sniff(bytes: &[u8]) -> ContentKind {
    if bytes.is_empty() {
        return ContentKind::Unrecognized;
    }

    if let Ok(format) = image::guess_format(bytes) {
        return if is_thumbnailable_image(format) {
            ContentKind::Image(format)
        } else {
            ContentKind::Unrecognized
        };
    }

    if bytes.starts_with(PDF_SIGNATURE) {
        return ContentKind::Document(DocumentFormat::Pdf);
    }

    ContentKind::Unrecognized
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn encode(format: ImageFormat) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 3, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    #[test]
    fn recognizes_raster_images_by_signature() {
        assert_eq!(
            sniff(&encode(ImageFormat::Png)),
            ContentKind::Image(ImageFormat::Png)
        );
        assert_eq!(
            sniff(&encode(ImageFormat::Jpeg)),
            ContentKind::Image(ImageFormat::Jpeg)
        );
        assert_eq!(
            sniff(&encode(ImageFormat::Bmp)),
            ContentKind::Image(ImageFormat::Bmp)
        );
    }

    #[test]
    fn recognizes_pdf_header() {
        assert_eq!(
            sniff(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj"),
            ContentKind::Document(DocumentFormat::Pdf)
        );
    }

    #[test]
    fn pdf_header_must_open_the_buffer() {
        let mut padded = vec![b' '; 200];
        padded.extend_from_slice(b"%PDF-1.4\n");
        assert_eq!(sniff(&padded), ContentKind::Unrecognized);

        assert_eq!(
            sniff(b"Every PDF begins with the %PDF-1.7 header line.\n"),
            ContentKind::Unrecognized
        );
    }

    #[test]
    fn heif_family_containers_are_not_decoded() {
        assert_eq!(
            sniff(b"\0\0\0\x1cftypavif\0\0\0\0avifmif1miaf"),
            ContentKind::Unrecognized
        );
        assert_eq!(
            sniff(b"\0\0\0\x18ftypheic\0\0\0\0mif1heic"),
            ContentKind::Unrecognized
        );
    }

    #[test]
    fn text_and_empty_buffers_are_unrecognized() {
        assert_eq!(sniff(b""), ContentKind::Unrecognized);
        assert_eq!(
            sniff(b"just some notes about the quarterly report\n"),
            ContentKind::Unrecognized
        );
        assert_eq!(sniff(b"\x89PN"), ContentKind::Unrecognized);
    }
}
