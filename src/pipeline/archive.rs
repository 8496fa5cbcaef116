//! Archive Expander (ZIP).
//!
//! The archive is opened once; its central directory is read a single time
//! and the same reader serves every extraction.
//!
//! Member entries are visited in the archive's own order. Directories are
//! ignored; every other entry is classified from its extension alone and,
//! when a strategy applies, extracted into its own scratch directory and
//! converted like an uploaded file. The scratch directory goes away as soon
//! as the entry is done.
//!
//! A failing entry never stops its siblings. The archive counts as converted
//! when at least one entry converted, otherwise it is skipped. Only an
//! archive that cannot be opened at all fails.

use crate::error::{CapabilityError, ItemError, SkipReason};
use crate::output::{ItemReport, Outcome};
use crate::pipeline::assemble::PageAssembler;
use crate::pipeline::classify::{classify_entry, extension_of, Classification, StrategyTag};
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::page::PageSize;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Largest member the expander will extract.
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// One member of an archive, as listed in its central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// False when the name would escape the extraction directory.
    pub safe_path: bool,
}

/// An opened in-memory archive, shared with the blocking extraction tasks.
type SharedArchive = Arc<Mutex<ZipArchive<Cursor<Vec<u8>>>>>;

/// Read the central directory of an archive.
pub fn open<R: Read + Seek>(reader: R) -> Result<ZipArchive<R>, CapabilityError> {
    ZipArchive::new(reader).map_err(|e| CapabilityError::Invalid(format!("not a readable ZIP archive: {e}")))
}

/// List every entry, directories included, in archive order.
pub fn list_entries<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<ArchiveEntry>, CapabilityError> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive
            .by_index(index)
            .map_err(|e| CapabilityError::Invalid(format!("entry {index}: {e}")))?;
        entries.push(ArchiveEntry {
            index,
            name: file.name().to_string(),
            is_dir: file.is_dir(),
            size: file.size(),
            safe_path: file.enclosed_name().is_some(),
        });
    }
    Ok(entries)
}

/// Decompress entry `index` into `dest`.
pub fn extract_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    dest: &Path,
) -> Result<u64, CapabilityError> {
    let file = archive
        .by_index(index)
        .map_err(|e| CapabilityError::Invalid(format!("cannot read entry: {e}")))?;
    if file.size() > MAX_ENTRY_BYTES {
        return Err(CapabilityError::Invalid(format!(
            "entry is {} bytes, limit is {}",
            file.size(),
            MAX_ENTRY_BYTES
        )));
    }

    let mut out = std::fs::File::create(dest)?;
    let mut limited = file.take(MAX_ENTRY_BYTES + 1);
    let written = std::io::copy(&mut limited, &mut out)?;
    if written > MAX_ENTRY_BYTES {
        return Err(CapabilityError::Invalid("entry exceeds the size limit once decompressed".into()));
    }
    Ok(written)
}

/// Expand an archive item, appending the pages of every convertible entry.
pub(crate) async fn expand(
    dispatcher: &Dispatcher<'_>,
    archive_name: &str,
    bytes: Vec<u8>,
    assembler: &mut PageAssembler,
) -> ItemReport {
    let listing = tokio::task::spawn_blocking(move || {
        let mut archive = open(Cursor::new(bytes))?;
        let entries = list_entries(&mut archive)?;
        Ok::<_, CapabilityError>((Arc::new(Mutex::new(archive)), entries))
    })
    .await
    .unwrap_or_else(|e| Err(CapabilityError::Invalid(format!("archive reader panicked: {e}"))));
    let (archive, entries) = match listing {
        Ok(opened) => opened,
        Err(e) => {
            let error = ItemError::Archive {
                file: archive_name.to_string(),
                diagnostic: e.to_string(),
            };
            warn!("{}", error);
            return ItemReport::failed(archive_name, Some(StrategyTag::Archive), error);
        }
    };

    let files: Vec<&ArchiveEntry> = entries.iter().filter(|e| !e.is_dir).collect();
    info!("{}: {} entries ({} files)", archive_name, entries.len(), files.len());

    let mut reports = Vec::with_capacity(files.len());
    let mut pages = Vec::new();
    for entry in files {
        let report = expand_entry(dispatcher, archive_name, &archive, entry, assembler).await;
        if let Outcome::Converted { pages: added } = &report.outcome {
            pages.extend_from_slice(added);
        }
        reports.push(report);
    }

    let report = if reports.iter().any(ItemReport::is_converted) {
        ItemReport::converted(archive_name, StrategyTag::Archive, pages)
    } else {
        warn!("{}: no convertible files found in archive", archive_name);
        ItemReport::skipped(archive_name, Some(StrategyTag::Archive), SkipReason::NoConvertibleEntries)
    };
    report.with_entries(reports)
}

async fn expand_entry(
    dispatcher: &Dispatcher<'_>,
    archive_name: &str,
    archive: &SharedArchive,
    entry: &ArchiveEntry,
    assembler: &mut PageAssembler,
) -> ItemReport {
    let ext = extension_of(&entry.name);
    let tag = match classify_entry(&ext) {
        Classification::Strategy(tag) => tag,
        Classification::Unsupported => {
            debug!("{} → {}: unsupported entry", archive_name, entry.name);
            return ItemReport::skipped(
                &entry.name,
                None,
                SkipReason::Unsupported {
                    media_type: None,
                    extension: ext,
                    tool: dispatcher.tool().to_string(),
                },
            );
        }
    };

    match convert_entry(dispatcher, archive, entry, tag, &ext, assembler).await {
        Ok(pages) => ItemReport::converted(&entry.name, tag, pages),
        Err(source) => {
            let error = ItemError::ArchiveMember {
                archive: archive_name.to_string(),
                entry: entry.name.clone(),
                source: Box::new(source),
            };
            warn!("{}", error);
            ItemReport::failed(&entry.name, Some(tag), error)
        }
    }
}

async fn convert_entry(
    dispatcher: &Dispatcher<'_>,
    archive: &SharedArchive,
    entry: &ArchiveEntry,
    tag: StrategyTag,
    ext: &str,
    assembler: &mut PageAssembler,
) -> Result<Vec<PageSize>, ItemError> {
    let reader_error = |diag: String| ItemError::conversion(&entry.name, "archive reader", diag);
    if !entry.safe_path {
        return Err(reader_error("entry path escapes the archive root".into()));
    }

    let workspace = dispatcher.workspace();
    let scratch = workspace
        .scratch_dir(&entry.name)
        .map_err(|e| reader_error(workspace.redact(&e.to_string())))?;
    let dest = scratch.join(&format!("entry{ext}"));

    let extracted = {
        let archive = Arc::clone(archive);
        let dest = dest.clone();
        let index = entry.index;
        tokio::task::spawn_blocking(move || {
            let mut archive = archive
                .lock()
                .map_err(|_| CapabilityError::Invalid("archive reader poisoned".into()))?;
            extract_entry(&mut *archive, index, &dest)
        })
        .await
            .unwrap_or_else(|e| Err(CapabilityError::Invalid(format!("archive reader panicked: {e}"))))
    };
    let data = match extracted {
        Ok(size) => {
            debug!("Extracted {} ({} bytes)", entry.name, size);
            tokio::fs::read(&dest).await.map_err(CapabilityError::from)
        }
        Err(e) => Err(e),
    };

    let result = match data {
        Ok(data) => dispatcher.convert_and_append(&entry.name, tag, data, ext, assembler).await,
        Err(e) => Err(reader_error(workspace.redact(&e.to_string()))),
    };
    scratch.release();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;
    use crate::pipeline::classify::ToolIntent;
    use crate::pipeline::raster::tests::png_bytes;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    enum Member<'a> {
        Dir(&'a str),
        File(&'a str, Vec<u8>),
    }

    fn build_zip(members: Vec<Member<'_>>) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for member in members {
            match member {
                Member::Dir(name) => writer.add_directory(name, options).unwrap(),
                Member::File(name, data) => {
                    writer.start_file(name, options).unwrap();
                    writer.write_all(&data).unwrap();
                }
            }
        }
        writer.finish().unwrap().into_inner()
    }

    async fn run(zip: Vec<u8>, scratch: &Path) -> (ItemReport, usize) {
        let config = ConversionConfig::builder().scratch_root(scratch).build().unwrap();
        let tool: ToolIntent = "zip-to-pdf".parse().unwrap();
        let dispatcher = Dispatcher::new(&config, &tool);
        let mut assembler = PageAssembler::new();
        let report = expand(&dispatcher, "bundle.zip", zip, &mut assembler).await;
        (report, assembler.page_count())
    }

    #[test]
    fn lists_entries_in_order() {
        let zip = build_zip(vec![
            Member::Dir("imgs/"),
            Member::File("imgs/a.png", vec![1]),
            Member::File("notes.txt", b"hi".to_vec()),
        ]);
        let mut archive = open(Cursor::new(zip)).unwrap();
        let entries = list_entries(&mut archive).unwrap();
        let names: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.is_dir)).collect();
        assert_eq!(names, [("imgs/", true), ("imgs/a.png", false), ("notes.txt", false)]);
        assert!(entries.iter().all(|e| e.safe_path));
    }

    #[test]
    fn one_open_archive_serves_every_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let zip = build_zip(vec![
            Member::File("a.txt", b"alpha".to_vec()),
            Member::File("b.txt", b"bravo!".to_vec()),
        ]);
        let mut archive = open(Cursor::new(zip)).unwrap();
        let entries = list_entries(&mut archive).unwrap();
        // Out of order and repeated, all through the same reader.
        for entry in entries.iter().rev().chain(entries.iter()) {
            let dest = dir.path().join(&entry.name);
            let written = extract_entry(&mut archive, entry.index, &dest).unwrap();
            assert_eq!(written, entry.size);
        }
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"bravo!");
    }

    #[tokio::test]
    async fn image_and_unsupported_entry_yield_one_page() {
        let scratch = tempfile::tempdir().unwrap();
        let zip = build_zip(vec![
            Member::Dir("photos/"),
            Member::File("photos/cat.png", png_bytes(4, 3)),
            Member::File("setup.exe", vec![0x4D, 0x5A]),
        ]);
        let (report, pages) = run(zip, scratch.path()).await;
        assert!(report.is_converted());
        assert_eq!(pages, 1);
        assert_eq!(report.entries.len(), 2);
        assert!(report.entries[0].is_converted());
        assert!(matches!(report.entries[1].outcome, Outcome::Skipped { .. }));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failing_entry_does_not_stop_siblings() {
        let scratch = tempfile::tempdir().unwrap();
        let zip = build_zip(vec![
            Member::File("broken.png", b"not an image".to_vec()),
            Member::File("ok.png", png_bytes(2, 2)),
        ]);
        let (report, pages) = run(zip, scratch.path()).await;
        assert!(report.is_converted());
        assert_eq!(pages, 1);
        match &report.entries[0].outcome {
            Outcome::Failed { error: ItemError::ArchiveMember { archive, entry, .. } } => {
                assert_eq!(archive, "bundle.zip");
                assert_eq!(entry, "broken.png");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn nested_archives_are_skipped() {
        let scratch = tempfile::tempdir().unwrap();
        let inner = build_zip(vec![Member::File("a.png", png_bytes(1, 1))]);
        let zip = build_zip(vec![Member::File("inner.zip", inner)]);
        let (report, pages) = run(zip, scratch.path()).await;
        assert_eq!(pages, 0);
        assert_eq!(
            report.outcome,
            Outcome::Skipped { reason: SkipReason::NoConvertibleEntries }
        );
    }

    #[tokio::test]
    async fn unreadable_archive_fails() {
        let scratch = tempfile::tempdir().unwrap();
        let (report, pages) = run(b"PK but not really".to_vec(), scratch.path()).await;
        assert_eq!(pages, 0);
        assert!(matches!(
            report.outcome,
            Outcome::Failed { error: ItemError::Archive { .. } }
        ));
    }
}
