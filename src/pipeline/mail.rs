//! Email-container adapter.
//!
//! The container is parsed into its textual parts, and the best available
//! one is drawn as plain text on a single page. Extractors run in a fixed
//! order and the first one that yields non-blank text wins:
//!
//! 1. plain-text body
//! 2. rich-text body with RTF control words stripped
//! 3. HTML body with tags stripped
//! 4. a placeholder naming the subject
//!
//! If none applies, a fixed notice is drawn instead.

use crate::error::CapabilityError;
use crate::pipeline::page::{Page, Pages};
use crate::pipeline::text::{layout_text, CharsetPolicy, TextLayout};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// Text drawn when nothing could be extracted.
pub const FALLBACK_TEXT: &str = "MSG content could not be fully extracted.";

/// The parts of a message the adapter can render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailParts {
    pub plain_body: Option<String>,
    pub rtf_body: Option<String>,
    pub html_body: Option<String>,
    pub subject: Option<String>,
}

/// Parses a mail container. Called from a blocking thread.
pub trait MailParser: Send + Sync {
    fn name(&self) -> &str;

    fn parse(&self, bytes: &[u8]) -> Result<MailParts, CapabilityError>;
}

type Extractor = fn(&MailParts) -> Option<String>;

/// Extraction attempts in priority order.
const EXTRACTORS: &[(&str, Extractor)] = &[
    ("plain-text body", |p| p.plain_body.clone()),
    ("rich-text body", |p| p.rtf_body.as_deref().map(strip_rtf)),
    ("HTML body", |p| p.html_body.as_deref().map(strip_html)),
    ("subject", |p| {
        p.subject
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| format!("Subject: {s}\n\n(Body not extractable in plain text)"))
    }),
];

/// Pick the best textual rendering of a message.
pub fn extract_text(parts: &MailParts) -> String {
    for (label, extract) in EXTRACTORS {
        if let Some(text) = extract(parts).filter(|t| !t.trim().is_empty()) {
            debug!("Using {} ({} chars)", label, text.len());
            return text;
        }
    }
    FALLBACK_TEXT.to_string()
}

static RTF_PARAGRAPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\pard[^\\}]*\}").unwrap());
static RTF_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\\[^}]+\}").unwrap());
static RTF_CONTROL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[a-zA-Z0-9]+ ?").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static HTML_HIDDEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)>").unwrap());

/// Crude RTF-to-text: drop paragraph resets, groups and control words.
pub fn strip_rtf(rtf: &str) -> String {
    let text = RTF_PARAGRAPH.replace_all(rtf, "");
    let text = RTF_GROUP.replace_all(&text, "");
    let text = RTF_CONTROL.replace_all(&text, "");
    text.replace(['{', '}'], "")
}

/// Tag-stripped HTML with the common entities decoded.
pub fn strip_html(html: &str) -> String {
    let text = HTML_HIDDEN.replace_all(html, "");
    let text = HTML_TAG.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Render a mail container as one text page.
pub async fn convert(
    parser: Arc<dyn MailParser>,
    bytes: Vec<u8>,
    policy: &CharsetPolicy,
    layout: &TextLayout,
) -> Result<Pages, CapabilityError> {
    let parts = tokio::task::spawn_blocking(move || parser.parse(&bytes))
        .await
        .map_err(|e| CapabilityError::Invalid(format!("mail parser panicked: {e}")))??;
    let text = extract_text(&parts);
    Ok(Pages::Single(Page::Text(layout_text(&text, policy, layout))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::msg::tests::msg_with_body;
    use crate::pipeline::msg::OutlookMsgParser;

    fn parts() -> MailParts {
        MailParts::default()
    }

    #[test]
    fn plain_body_wins() {
        let p = MailParts {
            plain_body: Some("plain".into()),
            rtf_body: Some("{\\rtf1 rich}".into()),
            html_body: Some("<b>html</b>".into()),
            subject: Some("subj".into()),
        };
        assert_eq!(extract_text(&p), "plain");
    }

    #[test]
    fn blank_plain_body_falls_through_to_rtf() {
        let p = MailParts {
            plain_body: Some("   ".into()),
            rtf_body: Some("{\\rtf1\\ansi Hello \\b world\\b0}".into()),
            ..parts()
        };
        assert_eq!(extract_text(&p).trim(), "Hello world");
    }

    #[test]
    fn html_is_tag_stripped() {
        let p = MailParts {
            html_body: Some("<html><head><style>p{}</style></head><p>Tom &amp; Jerry</p></html>".into()),
            ..parts()
        };
        assert_eq!(extract_text(&p), "Tom & Jerry");
    }

    #[test]
    fn subject_placeholder() {
        let p = MailParts {
            subject: Some("Quarterly".into()),
            ..parts()
        };
        assert_eq!(
            extract_text(&p),
            "Subject: Quarterly\n\n(Body not extractable in plain text)"
        );
    }

    #[test]
    fn nothing_extractable() {
        assert_eq!(extract_text(&parts()), FALLBACK_TEXT);
    }

    #[test]
    fn rtf_font_table_is_removed() {
        let rtf = "{\\rtf1{\\fonttbl{\\f0 Arial;}}\\pard Text here\\par}";
        let text = strip_rtf(rtf);
        assert!(text.contains("Text here"), "got {text:?}");
        assert!(!text.contains("Arial"), "got {text:?}");
    }

    #[tokio::test]
    async fn msg_body_is_sanitised_onto_one_page() {
        let bytes = msg_with_body("\u{2022} first\n\u{4E2D} second");
        let pages = convert(
            Arc::new(OutlookMsgParser),
            bytes,
            &CharsetPolicy::default(),
            &TextLayout::default(),
        )
        .await
        .unwrap();
        match pages {
            Pages::Single(Page::Text(t)) => assert_eq!(t.lines, vec!["- first", "? second"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparsable_container_fails() {
        let err = convert(
            Arc::new(OutlookMsgParser),
            b"garbage".to_vec(),
            &CharsetPolicy::default(),
            &TextLayout::default(),
        )
        .await;
        assert!(err.is_err());
    }
}
