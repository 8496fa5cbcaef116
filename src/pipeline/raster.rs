//! Raster-image adapter.
//!
//! JPEG streams are embedded untouched. Everything else is normalised to
//! 8-bit RGB (+ alpha) first:
//!
//! | Input              | Path                                        |
//! |--------------------|---------------------------------------------|
//! | JPEG               | pass-through (`DCTDecode`)                  |
//! | PNG                | decode                                      |
//! | SVG                | rasterise with `resvg` at its intrinsic size|
//! | GIF / TIFF / WebP  | decode first frame                          |
//! | anything else      | best-effort decode                          |
//!
//! Decoding is CPU-bound and runs inside `spawn_blocking`.

use crate::error::CapabilityError;
use crate::pipeline::classify::RasterKind;
use crate::pipeline::page::{ImageEncoding, ImagePage};
use image::ImageFormat;
use tracing::debug;

/// Refuse images whose decoded RGBA buffer would exceed ~400 MB.
const MAX_PIXELS: u64 = 100_000_000;

/// Convert image bytes into one page-sized image.
pub async fn rasterize(bytes: Vec<u8>, kind: RasterKind) -> Result<ImagePage, CapabilityError> {
    tokio::task::spawn_blocking(move || rasterize_blocking(&bytes, kind))
        .await
        .map_err(|e| CapabilityError::Invalid(format!("image task panicked: {e}")))?
}

fn rasterize_blocking(bytes: &[u8], kind: RasterKind) -> Result<ImagePage, CapabilityError> {
    if bytes.is_empty() {
        return Err(CapabilityError::Invalid("image is empty".into()));
    }

    let sniffed = image::guess_format(bytes).ok();
    if sniffed == Some(ImageFormat::Jpeg) {
        if let Some(header) = jpeg_header(bytes) {
            check_size(header.width, header.height)?;
            debug!(
                "JPEG pass-through {}x{} ({} components)",
                header.width, header.height, header.components
            );
            return Ok(ImagePage {
                width: header.width,
                height: header.height,
                encoding: ImageEncoding::Jpeg {
                    data: bytes.to_vec(),
                    components: header.components,
                },
            });
        }
    }

    if kind == RasterKind::Svg || (sniffed.is_none() && looks_like_svg(bytes)) {
        return render_svg(bytes);
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| CapabilityError::Invalid(format!("cannot decode image: {e}")))?;
    check_size(img.width(), img.height())?;
    debug!(
        "Decoded {:?} image {}x{}",
        sniffed.unwrap_or(ImageFormat::Png),
        img.width(),
        img.height()
    );
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(from_rgba(width, height, rgba.as_raw()))
}

fn check_size(width: u32, height: u32) -> Result<(), CapabilityError> {
    if width == 0 || height == 0 {
        return Err(CapabilityError::Invalid(format!(
            "image has zero size ({width}x{height})"
        )));
    }
    if width as u64 * height as u64 > MAX_PIXELS {
        return Err(CapabilityError::Invalid(format!(
            "image too large ({width}x{height})"
        )));
    }
    Ok(())
}

/// Split interleaved RGBA into RGB plus an alpha plane (dropped when opaque).
fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> ImagePage {
    let pixels = rgba.len() / 4;
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
        alpha.push(px[3]);
    }
    let alpha = if alpha.iter().all(|&a| a == u8::MAX) {
        None
    } else {
        Some(alpha)
    };
    ImagePage {
        width,
        height,
        encoding: ImageEncoding::Pixels { rgb, alpha },
    }
}

// ── SVG ──────────────────────────────────────────────────────────────────

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    String::from_utf8_lossy(head).contains("<svg")
}

fn render_svg(bytes: &[u8]) -> Result<ImagePage, CapabilityError> {
    use resvg::{tiny_skia, usvg};

    let mut opt = usvg::Options::default();
    opt.fontdb_mut().load_system_fonts();
    let tree = usvg::Tree::from_data(bytes, &opt)
        .map_err(|e| CapabilityError::Invalid(format!("cannot parse SVG: {e}")))?;

    let size = tree.size().to_int_size();
    check_size(size.width(), size.height())?;
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| CapabilityError::Invalid("cannot allocate SVG canvas".into()))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    let mut rgba = Vec::with_capacity(pixmap.pixels().len() * 4);
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    debug!("Rasterised SVG {}x{}", size.width(), size.height());
    Ok(from_rgba(size.width(), size.height(), &rgba))
}

// ── JPEG header ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
struct JpegHeader {
    width: u32,
    height: u32,
    components: u8,
}

/// Read dimensions and component count from the first SOF marker.
fn jpeg_header(bytes: &[u8]) -> Option<JpegHeader> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        match marker {
            // Fill bytes.
            0xFF => {
                i += 1;
                continue;
            }
            // Markers without a length field.
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let seg = bytes.get(i + 4..i + 4 + 6)?;
            let height = u16::from_be_bytes([seg[1], seg[2]]) as u32;
            let width = u16::from_be_bytes([seg[3], seg[4]]) as u32;
            let components = seg[5];
            if width == 0 || height == 0 || !matches!(components, 1 | 3 | 4) {
                return None;
            }
            return Some(JpegHeader {
                width,
                height,
                components,
            });
        }
        i += 2 + len;
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb, Rgba};
    use std::io::Cursor;

    pub(crate) fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    pub(crate) fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(w, h, Rgb([10u8, 20, 30]));
        encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
    }

    pub(crate) fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(w, h, Rgb([200u8, 100, 50]));
        encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
    }

    #[tokio::test]
    async fn jpeg_is_passed_through() {
        let bytes = jpeg_bytes(33, 17);
        let page = rasterize(bytes.clone(), RasterKind::Jpeg).await.unwrap();
        assert_eq!((page.width, page.height), (33, 17));
        match page.encoding {
            ImageEncoding::Jpeg { data, components } => {
                assert_eq!(data, bytes);
                assert_eq!(components, 3);
            }
            other => panic!("expected JPEG pass-through, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn png_is_decoded_at_native_size() {
        let page = rasterize(png_bytes(12, 8), RasterKind::Png).await.unwrap();
        assert_eq!((page.width, page.height), (12, 8));
        match page.encoding {
            ImageEncoding::Pixels { rgb, alpha } => {
                assert_eq!(rgb.len(), 12 * 8 * 3);
                assert_eq!(&rgb[..3], &[10, 20, 30]);
                assert!(alpha.is_none());
            }
            other => panic!("expected pixels, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transparency_is_kept_as_alpha() {
        let img = ImageBuffer::from_pixel(4, 4, Rgba([0u8, 0, 0, 128]));
        let bytes = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);
        let page = rasterize(bytes, RasterKind::Png).await.unwrap();
        match page.encoding {
            ImageEncoding::Pixels { alpha: Some(a), .. } => assert_eq!(a, vec![128; 16]),
            other => panic!("expected alpha plane, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn gif_first_frame_is_used() {
        let img = ImageBuffer::from_pixel(6, 5, Rgba([255u8, 0, 0, 255]));
        let bytes = encode(DynamicImage::ImageRgba8(img), ImageFormat::Gif);
        let page = rasterize(bytes, RasterKind::Gif).await.unwrap();
        assert_eq!((page.width, page.height), (6, 5));
    }

    #[tokio::test]
    async fn tiff_is_transcoded() {
        let img = ImageBuffer::from_pixel(9, 3, Rgb([1u8, 2, 3]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Tiff);
        let page = rasterize(bytes, RasterKind::Tiff).await.unwrap();
        assert_eq!((page.width, page.height), (9, 3));
        assert!(matches!(page.encoding, ImageEncoding::Pixels { .. }));
    }

    #[tokio::test]
    async fn svg_is_rasterised_at_intrinsic_size() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20">
            <rect width="40" height="20" fill="blue"/></svg>"#;
        let page = rasterize(svg.to_vec(), RasterKind::Svg).await.unwrap();
        assert_eq!((page.width, page.height), (40, 20));
        match page.encoding {
            ImageEncoding::Pixels { rgb, alpha } => {
                assert_eq!(&rgb[..3], &[0, 0, 255]);
                assert!(alpha.is_none());
            }
            other => panic!("expected pixels, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_is_an_error() {
        let err = rasterize(b"not an image".to_vec(), RasterKind::Other).await;
        assert!(err.is_err());
        assert!(rasterize(Vec::new(), RasterKind::Png).await.is_err());
    }

    #[test]
    fn jpeg_header_reads_sof() {
        let header = jpeg_header(&jpeg_bytes(64, 48)).unwrap();
        assert_eq!(
            header,
            JpegHeader {
                width: 64,
                height: 48,
                components: 3
            }
        );
        assert!(jpeg_header(b"\xFF\xD8\xFF").is_none());
        assert!(jpeg_header(b"PNG").is_none());
    }
}
