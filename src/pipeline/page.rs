//! The normalised page representation every strategy adapter produces.
//!
//! Adapters never touch the output document directly. They hand a
//! [`Pages`] value to the [`crate::pipeline::assemble::PageAssembler`],
//! which takes ownership of it.

use crate::error::CapabilityError;
use crate::pipeline::text::TextLayout;
use serde::{Deserialize, Serialize};

/// Width and height of a page in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Pixel data of an image page.
#[derive(Debug, Clone)]
pub enum ImageEncoding {
    /// A baseline JPEG stream embedded as-is (`DCTDecode`).
    Jpeg { data: Vec<u8>, components: u8 },
    /// Decoded 8-bit RGB samples, plus an optional 8-bit alpha plane.
    Pixels { rgb: Vec<u8>, alpha: Option<Vec<u8>> },
}

/// One image drawn at 1:1 scale on a page of the same size.
#[derive(Debug, Clone)]
pub struct ImagePage {
    pub width: u32,
    pub height: u32,
    pub encoding: ImageEncoding,
}

/// Lines of already-sanitised text drawn on one fixed-size page.
#[derive(Debug, Clone)]
pub struct TextPage {
    pub lines: Vec<String>,
    pub layout: TextLayout,
}

#[derive(Debug, Clone)]
pub enum Page {
    Image(ImagePage),
    Text(TextPage),
}

impl Page {
    pub fn size(&self) -> PageSize {
        match self {
            Page::Image(img) => PageSize::new(img.width as f32, img.height as f32),
            Page::Text(text) => PageSize::new(text.layout.page_width, text.layout.page_height),
        }
    }
}

/// A finished PDF produced by an external renderer, ready to be imported.
#[derive(Debug)]
pub struct ImportedPdf {
    pub document: lopdf::Document,
}

impl ImportedPdf {
    /// Parse a complete PDF byte stream.
    pub fn load(bytes: &[u8]) -> Result<Self, lopdf::Error> {
        let document = lopdf::Document::load_mem(bytes)?;
        Ok(Self { document })
    }

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }
}

/// Load the finished PDF an external renderer produced.
///
/// A stream that parses but holds no pages counts as a failed conversion.
pub fn import_rendered(bytes: &[u8]) -> Result<Pages, CapabilityError> {
    let pdf = ImportedPdf::load(bytes)
        .map_err(|e| CapabilityError::Invalid(format!("renderer output is not a valid PDF: {e}")))?;
    if pdf.page_count() == 0 {
        return Err(CapabilityError::Invalid("renderer output has no pages".into()));
    }
    Ok(Pages::Imported(pdf))
}

/// Everything one adapter call contributes to the artifact.
#[derive(Debug)]
pub enum Pages {
    Single(Page),
    Imported(ImportedPdf),
}

impl Pages {
    pub fn len(&self) -> usize {
        match self {
            Pages::Single(_) => 1,
            Pages::Imported(pdf) => pdf.page_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
