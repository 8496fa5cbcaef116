//! Page Assembler: owns the single output document of one batch.
//!
//! Pages are appended strictly in call order. The assembler is consumed by
//! [`PageAssembler::finalize`], so it cannot be reused across batches.
//!
//! ## Object layout
//!
//! ```text
//! Catalog ─▶ Pages ─┬─▶ Page (image)  ─▶ XObject /Im0 [─▶ SMask]
//!                   ├─▶ Page (text)   ─▶ Font /F1 (shared Helvetica)
//!                   └─▶ Page (import) ─▶ objects copied from the source PDF
//! ```
//!
//! Every `append` validates and prepares its objects before touching the
//! document, so a failed append leaves the artifact unchanged.

use crate::pipeline::page::{ImageEncoding, ImagePage, ImportedPdf, Page, PageSize, Pages, TextPage};
use crate::pipeline::text::encode_win_ansi;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use thiserror::Error;
use tracing::debug;

/// US Letter, used when an imported page carries no MediaBox anywhere.
const FALLBACK_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Page attributes that may be inherited from ancestor `Pages` nodes.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("cannot finalize a document with no pages")]
    Empty,

    #[error("imported document contains no pages")]
    NoPages,

    #[error("invalid page content: {0}")]
    InvalidPage(String),

    #[error("PDF structure error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("compression failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The growing output artifact.
pub struct PageAssembler {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
    font_id: Option<ObjectId>,
}

impl Default for PageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAssembler {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            font_id: None,
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Append `pages` after everything already in the artifact.
    ///
    /// Returns the size of each page added, in order.
    pub fn append(&mut self, pages: Pages) -> Result<Vec<PageSize>, AssembleError> {
        if pages.is_empty() {
            return Err(AssembleError::NoPages);
        }
        match pages {
            Pages::Single(page) => {
                let size = page.size();
                match page {
                    Page::Image(img) => self.append_image(img)?,
                    Page::Text(text) => self.append_text(text)?,
                }
                Ok(vec![size])
            }
            Pages::Imported(pdf) => self.append_imported(pdf),
        }
    }

    /// Serialise the document. Fails when no page was ever appended.
    pub fn finalize(mut self) -> Result<Vec<u8>, AssembleError> {
        if self.kids.is_empty() {
            return Err(AssembleError::Empty);
        }

        let kids: Vec<Object> = self.kids.iter().map(|&id| Object::Reference(id)).collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        self.doc.save_to(&mut buf)?;
        debug!("Finalized PDF: {} pages, {} bytes", count, buf.len());
        Ok(buf)
    }

    // ── Image pages ──────────────────────────────────────────────────────

    fn append_image(&mut self, img: ImagePage) -> Result<(), AssembleError> {
        if img.width == 0 || img.height == 0 {
            return Err(AssembleError::InvalidPage(format!(
                "image has zero size ({}x{})",
                img.width, img.height
            )));
        }
        let (w, h) = (img.width as i64, img.height as i64);

        let (image_stream, smask_stream) = match img.encoding {
            ImageEncoding::Jpeg { data, components } => {
                let mut dict = image_dict(w, h);
                match components {
                    1 => dict.set("ColorSpace", "DeviceGray"),
                    3 => dict.set("ColorSpace", "DeviceRGB"),
                    4 => {
                        dict.set("ColorSpace", "DeviceCMYK");
                        dict.set("Decode", vec![1.into(), 0.into(), 1.into(), 0.into(), 1.into(), 0.into(), 1.into(), 0.into()]);
                    }
                    n => {
                        return Err(AssembleError::InvalidPage(format!(
                            "unsupported JPEG component count {n}"
                        )))
                    }
                }
                dict.set("Filter", "DCTDecode");
                (Stream::new(dict, data), None)
            }
            ImageEncoding::Pixels { rgb, alpha } => {
                let expected = img.width as usize * img.height as usize;
                if rgb.len() != expected * 3 {
                    return Err(AssembleError::InvalidPage(format!(
                        "expected {} RGB bytes, got {}",
                        expected * 3,
                        rgb.len()
                    )));
                }
                let mut dict = image_dict(w, h);
                dict.set("ColorSpace", "DeviceRGB");
                dict.set("Filter", "FlateDecode");
                let image = Stream::new(dict, deflate(&rgb)?);

                let smask = match alpha {
                    Some(a) if a.len() == expected => {
                        let mut sdict = image_dict(w, h);
                        sdict.set("ColorSpace", "DeviceGray");
                        sdict.set("Filter", "FlateDecode");
                        Some(Stream::new(sdict, deflate(&a)?))
                    }
                    Some(a) => {
                        return Err(AssembleError::InvalidPage(format!(
                            "expected {expected} alpha bytes, got {}",
                            a.len()
                        )))
                    }
                    None => None,
                };
                (image, smask)
            }
        };

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", vec![w.into(), 0.into(), 0.into(), h.into(), 0.into(), 0.into()]),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        }
        .encode()?;

        // Everything fallible is done; now mutate the document.
        let mut image_stream = image_stream;
        if let Some(smask) = smask_stream {
            let smask_id = self.doc.add_object(smask);
            image_stream.dict.set("SMask", smask_id);
        }
        let image_id = self.doc.add_object(image_stream);
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        self.kids.push(page_id);
        Ok(())
    }

    // ── Text pages ───────────────────────────────────────────────────────

    fn append_text(&mut self, text: TextPage) -> Result<(), AssembleError> {
        let layout = &text.layout;
        let mut ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Real(layout.font_size)]),
            Operation::new("TL", vec![Object::Real(layout.leading)]),
            Operation::new(
                "Td",
                vec![
                    Object::Real(layout.margin_left),
                    Object::Real(layout.page_height - layout.first_baseline),
                ],
            ),
        ];
        for (i, line) in text.lines.iter().enumerate() {
            if i > 0 {
                ops.push(Operation::new("T*", vec![]));
            }
            ops.push(Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(line), StringFormat::Literal)],
            ));
        }
        ops.push(Operation::new("ET", vec![]));
        let content = Content { operations: ops }.encode()?;

        let font_id = self.helvetica();
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(layout.page_width),
                Object::Real(layout.page_height),
            ],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
            "Contents" => content_id,
        });
        self.kids.push(page_id);
        Ok(())
    }

    fn helvetica(&mut self) -> ObjectId {
        if let Some(id) = self.font_id {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        self.font_id = Some(id);
        id
    }

    // ── Imported pages ───────────────────────────────────────────────────

    fn append_imported(&mut self, pdf: ImportedPdf) -> Result<Vec<PageSize>, AssembleError> {
        let mut source = pdf.document;
        source.renumber_objects_with(self.doc.max_id + 1);

        let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();

        // Resolve inherited attributes while the source tree is intact.
        let mut prepared = Vec::with_capacity(page_ids.len());
        for &id in &page_ids {
            let mut dict = source.get_dictionary(id)?.clone();
            for key in INHERITABLE {
                if !dict.has(key) {
                    if let Some(value) = inherited(&source, &dict, key) {
                        dict.set(key.to_vec(), value);
                    }
                }
            }
            let size = media_size(&source, &dict);
            dict.set("Parent", self.pages_id);
            prepared.push((id, dict, size));
        }

        for (id, object) in std::mem::take(&mut source.objects) {
            if is_structural(&object) {
                continue;
            }
            self.doc.objects.insert(id, object);
        }
        let mut sizes = Vec::with_capacity(prepared.len());
        for (id, dict, size) in prepared {
            self.doc.objects.insert(id, Object::Dictionary(dict));
            self.kids.push(id);
            sizes.push(size);
        }
        self.doc.max_id = self.doc.max_id.max(source.max_id);

        debug!("Imported {} pages", sizes.len());
        Ok(sizes)
    }
}

fn image_dict(width: i64, height: i64) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
        "BitsPerComponent" => 8,
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Objects that describe the source document's structure rather than page
/// content. They are replaced by our own catalog and page tree.
fn is_structural(object: &Object) -> bool {
    let dict = match object {
        Object::Dictionary(d) => d,
        Object::Stream(s) => &s.dict,
        _ => return false,
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" | b"ObjStm" | b"XRef")
    )
}

/// Walk the `Parent` chain looking for an inheritable attribute.
fn inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded walk; malformed files may contain parent cycles.
    for _ in 0..64 {
        let node = doc.get_dictionary(parent?).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn media_size(doc: &Document, page: &Dictionary) -> PageSize {
    let rect = page
        .get(b"MediaBox")
        .ok()
        .and_then(|obj| match obj {
            Object::Reference(id) => doc.get_object(*id).ok(),
            other => Some(other),
        })
        .and_then(|obj| obj.as_array().ok())
        .map(|arr| arr.iter().filter_map(|o| o.as_float().ok()).collect::<Vec<f32>>())
        .filter(|v| v.len() == 4)
        .unwrap_or_else(|| FALLBACK_MEDIA_BOX.to_vec());
    PageSize::new((rect[2] - rect[0]).abs(), (rect[3] - rect[1]).abs())
}
