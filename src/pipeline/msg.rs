//! Outlook `.msg` reader.
//!
//! A `.msg` file is an OLE compound document. Message properties live in
//! root-level streams named `__substg1.0_<tag><type>`, where the type is
//! `001F` (UTF-16LE), `001E` (8-bit) or `0102` (binary). The rich-text body
//! is stored LZFu-compressed.

use crate::error::CapabilityError;
use crate::pipeline::mail::{MailParser, MailParts};
use std::io::{Cursor, Read, Seek};

const BODY: &str = "1000";
const RTF_COMPRESSED: &str = "10090102";
const HTML: &str = "1013";
const SUBJECT: &str = "0037";

/// Reads the body and subject properties of an Outlook message.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlookMsgParser;

impl MailParser for OutlookMsgParser {
    fn name(&self) -> &str {
        "Outlook message reader"
    }

    fn parse(&self, bytes: &[u8]) -> Result<MailParts, CapabilityError> {
        let mut file = cfb::CompoundFile::open(Cursor::new(bytes))
            .map_err(|e| CapabilityError::Invalid(format!("not an Outlook message: {e}")))?;

        let rtf_body = read_stream(&mut file, &format!("__substg1.0_{RTF_COMPRESSED}"))
            .and_then(|raw| decompress_rtf(&raw).ok())
            .map(|rtf| String::from_utf8_lossy(&rtf).into_owned());

        let html_body = read_string_property(&mut file, HTML).or_else(|| {
            read_stream(&mut file, &format!("__substg1.0_{HTML}0102"))
                .map(|raw| String::from_utf8_lossy(&raw).trim_end_matches('\0').to_string())
        });

        Ok(MailParts {
            plain_body: read_string_property(&mut file, BODY),
            rtf_body,
            html_body,
            subject: read_string_property(&mut file, SUBJECT),
        })
    }
}

fn read_stream<F: Read + Seek>(file: &mut cfb::CompoundFile<F>, name: &str) -> Option<Vec<u8>> {
    let path = format!("/{name}");
    if !file.is_stream(&path) {
        return None;
    }
    let mut stream = file.open_stream(&path).ok()?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).ok()?;
    Some(buf)
}

/// A string property, preferring the Unicode variant.
fn read_string_property<F: Read + Seek>(file: &mut cfb::CompoundFile<F>, tag: &str) -> Option<String> {
    if let Some(raw) = read_stream(file, &format!("__substg1.0_{tag}001F")) {
        return Some(decode_utf16le(&raw));
    }
    read_stream(file, &format!("__substg1.0_{tag}001E")).map(|raw| decode_ansi(&raw))
}

fn decode_utf16le(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units).trim_end_matches('\0').to_string()
}

/// 8-bit strings are decoded as Latin-1.
fn decode_ansi(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end_matches('\0')
        .to_string()
}

// ── Compressed RTF (LZFu) ────────────────────────────────────────────────

const MAGIC_COMPRESSED: u32 = 0x7546_5A4C; // "LZFu"
const MAGIC_UNCOMPRESSED: u32 = 0x414C_454D; // "MELA"

/// Dictionary preload shared by every LZFu stream.
const PREBUF: &[u8] = b"{\\rtf1\\ansi\\mac\\deff0\\deftab720{\\fonttbl;}{\\f0\\fnil \\froman \\fswiss \\fmodern \\fscript \\fdecor MS Sans SerifSymbolArialTimes New RomanCourier{\\colortbl\\red0\\green0\\blue0\r\n\\par \\pard\\plain\\f0\\fs20\\b\\i\\u\\tab\\tx";

const DICT_SIZE: usize = 4096;

/// Decompress an LZFu (or uncompressed `MELA`) RTF property.
pub fn decompress_rtf(data: &[u8]) -> Result<Vec<u8>, CapabilityError> {
    let invalid = |msg: &str| CapabilityError::Invalid(format!("compressed RTF: {msg}"));
    if data.len() < 16 {
        return Err(invalid("header truncated"));
    }
    let word = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
    let comp_size = word(0) as usize;
    let raw_size = word(4) as usize;
    let magic = word(8);

    // comp_size counts everything after its own field.
    let end = comp_size.saturating_add(4).min(data.len());
    let body = &data[16..end.max(16)];

    match magic {
        MAGIC_UNCOMPRESSED => Ok(body[..raw_size.min(body.len())].to_vec()),
        MAGIC_COMPRESSED => Ok(lzfu(body, raw_size)),
        _ => Err(invalid("unknown magic")),
    }
}

fn lzfu(body: &[u8], raw_size: usize) -> Vec<u8> {
    let mut dict = [0u8; DICT_SIZE];
    dict[..PREBUF.len()].copy_from_slice(PREBUF);
    let mut write = PREBUF.len();
    // raw_size comes from the file; a control byte plus eight references
    // (17 bytes) expands to at most 136.
    let mut out = Vec::with_capacity(raw_size.min(body.len().saturating_mul(9)));
    let mut pos = 0;

    'outer: while pos < body.len() {
        let control = body[pos];
        pos += 1;
        for bit in 0..8 {
            if pos >= body.len() || out.len() >= raw_size {
                break 'outer;
            }
            if control & (1 << bit) == 0 {
                let c = body[pos];
                pos += 1;
                out.push(c);
                dict[write] = c;
                write = (write + 1) % DICT_SIZE;
                continue;
            }
            if pos + 1 >= body.len() {
                break 'outer;
            }
            let reference = u16::from_be_bytes([body[pos], body[pos + 1]]) as usize;
            pos += 2;
            let offset = reference >> 4;
            let length = (reference & 0x0F) + 2;
            if offset == write {
                break 'outer;
            }
            for k in 0..length {
                let c = dict[(offset + k) % DICT_SIZE];
                out.push(c);
                dict[write] = c;
                write = (write + 1) % DICT_SIZE;
            }
        }
    }
    out.truncate(raw_size);
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    /// Build an in-memory `.msg` with the given root-level streams.
    pub(crate) fn build_msg(streams: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut file = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        for (name, data) in streams {
            let mut s = file.create_stream(format!("/{name}")).unwrap();
            s.write_all(data).unwrap();
        }
        file.flush().unwrap();
        file.into_inner().into_inner()
    }

    pub(crate) fn msg_with_body(body: &str) -> Vec<u8> {
        build_msg(&[("__substg1.0_1000001F", utf16(body))])
    }

    fn header(comp_size: u32, raw_size: u32, magic: u32) -> Vec<u8> {
        let mut h = Vec::new();
        for v in [comp_size, raw_size, magic, 0] {
            h.extend_from_slice(&v.to_le_bytes());
        }
        h
    }

    #[test]
    fn prebuf_has_expected_length() {
        assert_eq!(PREBUF.len(), 207);
    }

    #[test]
    fn lzfu_dictionary_reference_and_literal() {
        // ref(0, 6) → "{\rtf1", literal 'X', then end-of-stream at 214.
        let mut data = header(18, 7, MAGIC_COMPRESSED);
        data.extend_from_slice(&[0x05, 0x00, 0x04, b'X', 0x0D, 0x60]);
        assert_eq!(decompress_rtf(&data).unwrap(), b"{\\rtf1X");
    }

    #[test]
    fn declared_size_does_not_drive_allocation() {
        let out = lzfu(&[0x00, b'A'], usize::MAX);
        assert_eq!(out, b"A");
        assert!(out.capacity() <= 18);

        let mut data = header(14, 0xFFFF_FFF0, MAGIC_COMPRESSED);
        data.extend_from_slice(&[0x00, b'B']);
        assert_eq!(decompress_rtf(&data).unwrap(), b"B");
    }

    #[test]
    fn uncompressed_rtf_is_copied() {
        let mut data = header(12 + 5, 5, MAGIC_UNCOMPRESSED);
        data.extend_from_slice(b"{\\rtf}");
        assert_eq!(decompress_rtf(&data).unwrap(), b"{\\rtf");
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(decompress_rtf(&header(12, 0, 0xDEAD_BEEF)).is_err());
        assert!(decompress_rtf(b"short").is_err());
    }

    #[test]
    fn parses_unicode_body_and_subject() {
        let msg = build_msg(&[
            ("__substg1.0_1000001F", utf16("Hello \u{2022} world\0")),
            ("__substg1.0_0037001F", utf16("Status")),
        ]);
        let parts = OutlookMsgParser.parse(&msg).unwrap();
        assert_eq!(parts.plain_body.as_deref(), Some("Hello \u{2022} world"));
        assert_eq!(parts.subject.as_deref(), Some("Status"));
        assert!(parts.rtf_body.is_none());
        assert!(parts.html_body.is_none());
    }

    #[test]
    fn parses_ansi_subject_and_binary_html() {
        let msg = build_msg(&[
            ("__substg1.0_0037001E", b"Caf\xe9".to_vec()),
            ("__substg1.0_10130102", b"<p>hi</p>".to_vec()),
        ]);
        let parts = OutlookMsgParser.parse(&msg).unwrap();
        assert_eq!(parts.subject.as_deref(), Some("Café"));
        assert_eq!(parts.html_body.as_deref(), Some("<p>hi</p>"));
    }

    #[test]
    fn non_msg_bytes_are_rejected() {
        assert!(OutlookMsgParser.parse(b"plain text").is_err());
    }
}
