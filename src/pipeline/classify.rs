//! Format Classifier: pick a conversion strategy for one file.
//!
//! [`classify`] is a pure function of `(declared media type, extension,
//! tool)` evaluated as an ordered policy where the first match wins:
//!
//! | # | Tool                 | Matches                                   | Strategy      |
//! |---|----------------------|-------------------------------------------|---------------|
//! | 1 | any `*-to-pdf`       | `image/*` except Photoshop                | raster        |
//! | 2 | any `*-to-pdf`       | office / text media types, source-code and `.eml` extensions | office |
//! | 3 | `html-to-pdf`        | `text/html`, `.html`, `.htm`              | markup        |
//! | 4 | `ps-` / `eps-to-pdf` | `application/postscript`, `.ps`, `.eps`   | postscript    |
//! | 5 | `msg-to-pdf`         | `application/vnd.ms-outlook`, `.msg`      | mail container|
//! | 6 | `zip-to-pdf`         | `application/zip`, `.zip`                 | archive       |
//!
//! Anything else is [`Classification::Unsupported`]. Archive members have no
//! declared type and go through [`classify_entry`] instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Tool intent ──────────────────────────────────────────────────────────

/// The conversion tool chosen once for a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ToolIntent {
    Html,
    PostScript,
    EncapsulatedPostScript,
    OutlookMessage,
    Archive,
    /// Any other `<format>-to-pdf` identifier, e.g. `jpg-to-pdf`.
    Generic(String),
}

const TOOL_SUFFIX: &str = "-to-pdf";

impl ToolIntent {
    pub fn id(&self) -> &str {
        match self {
            ToolIntent::Html => "html-to-pdf",
            ToolIntent::PostScript => "ps-to-pdf",
            ToolIntent::EncapsulatedPostScript => "eps-to-pdf",
            ToolIntent::OutlookMessage => "msg-to-pdf",
            ToolIntent::Archive => "zip-to-pdf",
            ToolIntent::Generic(id) => id,
        }
    }
}

impl FromStr for ToolIntent {
    type Err = crate::error::MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_ascii_lowercase();
        let valid = id
            .strip_suffix(TOOL_SUFFIX)
            .is_some_and(|prefix| !prefix.is_empty() && !prefix.contains(char::is_whitespace));
        if !valid {
            return Err(crate::error::MergeError::InvalidToolIntent { tool: s.to_string() });
        }
        Ok(match id.as_str() {
            "html-to-pdf" => ToolIntent::Html,
            "ps-to-pdf" => ToolIntent::PostScript,
            "eps-to-pdf" => ToolIntent::EncapsulatedPostScript,
            "msg-to-pdf" => ToolIntent::OutlookMessage,
            "zip-to-pdf" => ToolIntent::Archive,
            _ => ToolIntent::Generic(id),
        })
    }
}

impl TryFrom<String> for ToolIntent {
    type Error = crate::error::MergeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ToolIntent> for String {
    fn from(tool: ToolIntent) -> Self {
        tool.id().to_string()
    }
}

impl fmt::Display for ToolIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// One entry of the tool catalogue shown to users.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToolInfo {
    pub id: &'static str,
    pub label: &'static str,
    pub extensions: &'static [&'static str],
}

/// Every tool offered to end users, in menu order.
pub const KNOWN_TOOLS: &[ToolInfo] = &[
    ToolInfo { id: "jpg-to-pdf", label: "JPG to PDF", extensions: &[".jpg", ".jpeg"] },
    ToolInfo { id: "png-to-pdf", label: "PNG to PDF", extensions: &[".png"] },
    ToolInfo { id: "gif-to-pdf", label: "GIF to PDF", extensions: &[".gif"] },
    ToolInfo { id: "svg-to-pdf", label: "SVG to PDF", extensions: &[".svg"] },
    ToolInfo { id: "tiff-to-pdf", label: "TIFF to PDF", extensions: &[".tiff", ".tif"] },
    ToolInfo { id: "doc-to-pdf", label: "Word to PDF", extensions: &[".doc", ".docx"] },
    ToolInfo { id: "odt-to-pdf", label: "ODT to PDF", extensions: &[".odt"] },
    ToolInfo { id: "rtf-to-pdf", label: "RTF to PDF", extensions: &[".rtf"] },
    ToolInfo { id: "txt-to-pdf", label: "Text to PDF", extensions: &[".txt"] },
    ToolInfo { id: "ppt-to-pdf", label: "PowerPoint to PDF", extensions: &[".ppt", ".pptx"] },
    ToolInfo { id: "odp-to-pdf", label: "ODP to PDF", extensions: &[".odp"] },
    ToolInfo { id: "xls-to-pdf", label: "Excel to PDF", extensions: &[".xls", ".xlsx"] },
    ToolInfo { id: "ods-to-pdf", label: "ODS to PDF", extensions: &[".ods"] },
    ToolInfo { id: "csv-to-pdf", label: "CSV to PDF", extensions: &[".csv"] },
    ToolInfo { id: "cpp-to-pdf", label: "C++ to PDF", extensions: &[".cpp", ".cxx", ".cc", ".h", ".hpp"] },
    ToolInfo { id: "py-to-pdf", label: "Python to PDF", extensions: &[".py"] },
    ToolInfo { id: "css-to-pdf", label: "CSS to PDF", extensions: &[".css"] },
    ToolInfo { id: "eml-to-pdf", label: "EML to PDF", extensions: &[".eml"] },
    ToolInfo { id: "html-to-pdf", label: "HTML to PDF", extensions: &[".html", ".htm"] },
    ToolInfo { id: "ps-to-pdf", label: "PS to PDF", extensions: &[".ps"] },
    ToolInfo { id: "eps-to-pdf", label: "EPS to PDF", extensions: &[".eps"] },
    ToolInfo { id: "msg-to-pdf", label: "MSG to PDF", extensions: &[".msg"] },
    ToolInfo { id: "zip-to-pdf", label: "ZIP to PDF", extensions: &[".zip"] },
];

// ── Strategies ───────────────────────────────────────────────────────────

/// Raster subtype, deciding between pass-through and transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterKind {
    Jpeg,
    Png,
    Svg,
    Gif,
    Tiff,
    Webp,
    Other,
}

impl RasterKind {
    /// Natively embeddable formats need no transcode step.
    pub fn is_passthrough(self) -> bool {
        matches!(self, RasterKind::Jpeg | RasterKind::Png)
    }

    fn from_media_type(media: &str) -> Self {
        match media {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => RasterKind::Jpeg,
            "image/png" => RasterKind::Png,
            "image/svg+xml" => RasterKind::Svg,
            "image/gif" => RasterKind::Gif,
            "image/tiff" | "image/tif" => RasterKind::Tiff,
            "image/webp" => RasterKind::Webp,
            _ => RasterKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "kind", rename_all = "snake_case")]
pub enum StrategyTag {
    Raster(RasterKind),
    Office,
    Markup,
    PostScript,
    MailContainer,
    Archive,
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyTag::Raster(kind) => write!(f, "raster ({kind:?})"),
            StrategyTag::Office => f.write_str("office document"),
            StrategyTag::Markup => f.write_str("HTML"),
            StrategyTag::PostScript => f.write_str("PostScript"),
            StrategyTag::MailContainer => f.write_str("Outlook message"),
            StrategyTag::Archive => f.write_str("ZIP archive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Strategy(StrategyTag),
    Unsupported,
}

// ── Lookup tables ────────────────────────────────────────────────────────

const OFFICE_MEDIA_TYPES: &[&str] = &[
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.oasis.opendocument.text",
    "text/plain",
    "application/rtf",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.spreadsheet",
    "text/csv",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.presentation",
    "message/rfc822",
];

/// Extensions accepted by the office branch regardless of declared type.
const OFFICE_EXTENSIONS: &[&str] = &[
    ".c", ".h", ".cpp", ".cxx", ".cc", ".hpp", ".py", ".css", ".java", ".js", ".eml",
];

const ARCHIVE_IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".tiff", ".tif", ".svg",
];

const ARCHIVE_DOCUMENT_EXTENSIONS: &[&str] = &[
    ".doc", ".docx", ".odt", ".txt", ".rtf", ".xls", ".xlsx", ".ods", ".csv", ".ppt", ".pptx",
    ".odp", ".c", ".h", ".cpp", ".py", ".css", ".java", ".js", ".eml",
];

const ARCHIVE_MARKUP_EXTENSIONS: &[&str] = &[".html", ".htm"];

/// Best-guess media type for a lower-case, dot-prefixed extension.
pub fn media_type_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".svg" => "image/svg+xml",
        ".tif" | ".tiff" => "image/tiff",
        ".webp" => "image/webp",
        ".bmp" => "image/bmp",
        ".doc" => "application/msword",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".odt" => "application/vnd.oasis.opendocument.text",
        ".rtf" => "application/rtf",
        ".txt" => "text/plain",
        ".xls" => "application/vnd.ms-excel",
        ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".ods" => "application/vnd.oasis.opendocument.spreadsheet",
        ".csv" => "text/csv",
        ".ppt" => "application/vnd.ms-powerpoint",
        ".pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".odp" => "application/vnd.oasis.opendocument.presentation",
        ".eml" => "message/rfc822",
        ".html" | ".htm" => "text/html",
        ".ps" | ".eps" => "application/postscript",
        ".msg" => "application/vnd.ms-outlook",
        ".zip" => "application/zip",
        ".c" | ".h" => "text/x-c",
        ".cpp" | ".cxx" | ".cc" | ".hpp" => "text/x-c++src",
        ".py" => "text/x-python",
        ".css" => "text/css",
        ".java" => "text/x-java",
        ".js" => "text/javascript",
        _ => return None,
    })
}

/// The media type used for classification.
///
/// A specific declared type wins. A missing, empty or generic
/// (`application/octet-stream`) declaration falls back to the extension.
pub fn effective_media_type(declared: Option<&str>, ext: &str) -> Option<String> {
    let declared = declared
        .map(|m| m.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty() && m != "application/octet-stream");
    declared.or_else(|| media_type_for_extension(ext).map(str::to_string))
}

/// Lower-case, dot-prefixed extension of a file name (`""` when absent).
pub fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

// ── Classification ───────────────────────────────────────────────────────

/// Choose a strategy for an uploaded file.
pub fn classify(declared_media_type: Option<&str>, ext: &str, tool: &ToolIntent) -> Classification {
    let media = effective_media_type(declared_media_type, ext).unwrap_or_default();
    let media = media.as_str();

    if media.starts_with("image/") && !media.contains("vnd.adobe.photoshop") {
        return Classification::Strategy(StrategyTag::Raster(RasterKind::from_media_type(media)));
    }
    if OFFICE_MEDIA_TYPES.contains(&media) || OFFICE_EXTENSIONS.contains(&ext) {
        return Classification::Strategy(StrategyTag::Office);
    }

    let tag = match tool {
        ToolIntent::Html if media == "text/html" || matches!(ext, ".html" | ".htm") => {
            StrategyTag::Markup
        }
        ToolIntent::PostScript | ToolIntent::EncapsulatedPostScript
            if media == "application/postscript" || matches!(ext, ".ps" | ".eps") =>
        {
            StrategyTag::PostScript
        }
        ToolIntent::OutlookMessage if media == "application/vnd.ms-outlook" || ext == ".msg" => {
            StrategyTag::MailContainer
        }
        ToolIntent::Archive
            if matches!(media, "application/zip" | "application/x-zip-compressed")
                || ext == ".zip" =>
        {
            StrategyTag::Archive
        }
        _ => return Classification::Unsupported,
    };
    Classification::Strategy(tag)
}

/// Choose a strategy for an archive member from its extension alone.
///
/// Nested archives are never expanded.
pub fn classify_entry(ext: &str) -> Classification {
    if ARCHIVE_IMAGE_EXTENSIONS.contains(&ext) {
        let media = media_type_for_extension(ext).unwrap_or_default();
        return Classification::Strategy(StrategyTag::Raster(RasterKind::from_media_type(media)));
    }
    if ARCHIVE_DOCUMENT_EXTENSIONS.contains(&ext) {
        return Classification::Strategy(StrategyTag::Office);
    }
    if ARCHIVE_MARKUP_EXTENSIONS.contains(&ext) {
        return Classification::Strategy(StrategyTag::Markup);
    }
    Classification::Unsupported
}
