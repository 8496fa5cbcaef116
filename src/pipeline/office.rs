//! Office-document adapter (word processing, spreadsheets, presentations,
//! plain text, source code, EML).
//!
//! The whole file is converted by a [`DocumentRenderer`] in one atomic step,
//! then every page of the result is imported in order. There is no partial
//! recovery: if the renderer fails, the item fails.

use crate::error::CapabilityError;
use crate::pipeline::external;
use crate::pipeline::page::{import_rendered, Pages};
use async_trait::async_trait;
use renderer_locate::Renderer;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whole-document conversion to PDF.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Convert `bytes` (a file with extension `ext`) to a complete PDF.
    ///
    /// `workdir` is an empty scratch directory owned by the caller and
    /// removed after the call.
    async fn render_pdf(&self, bytes: &[u8], ext: &str, workdir: &Path) -> Result<Vec<u8>, CapabilityError>;
}

/// Headless LibreOffice (`soffice --convert-to pdf`).
#[derive(Debug, Clone, Default)]
pub struct LibreOffice {
    program: Option<PathBuf>,
}

impl LibreOffice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `soffice` executable instead of discovering one.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }
}

#[async_trait]
impl DocumentRenderer for LibreOffice {
    fn name(&self) -> &str {
        "LibreOffice"
    }

    async fn render_pdf(&self, bytes: &[u8], ext: &str, workdir: &Path) -> Result<Vec<u8>, CapabilityError> {
        let program = external::resolve_program(self.program.as_deref(), Renderer::LibreOffice)?;

        let input = workdir.join(format!("input{ext}"));
        let outdir = workdir.join("out");
        tokio::fs::write(&input, bytes).await?;
        tokio::fs::create_dir_all(&outdir).await?;

        // A private profile lets concurrent conversions run side by side.
        let profile = format!("-env:UserInstallation={}", file_url(&workdir.join("profile")));
        let args = [
            OsStr::new("--headless"),
            OsStr::new("--norestore"),
            OsStr::new("--nolockcheck"),
            OsStr::new(&profile),
            OsStr::new("--convert-to"),
            OsStr::new("pdf"),
            OsStr::new("--outdir"),
            outdir.as_os_str(),
            input.as_os_str(),
        ];
        let run = external::run(&program, args, Some(workdir)).await?;

        let produced = outdir.join("input.pdf");
        debug!("LibreOffice wrote {}", produced.display());
        external::read_output(&program, &produced, &run.console).await
    }
}

/// `file://` URL for a local path, as LibreOffice expects for `-env:` options.
fn file_url(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        format!("file://{s}")
    } else {
        format!("file:///{s}")
    }
}

/// Convert an office document into imported pages.
pub async fn convert(
    renderer: &dyn DocumentRenderer,
    bytes: &[u8],
    ext: &str,
    workdir: &Path,
) -> Result<Pages, CapabilityError> {
    let pdf = renderer.render_pdf(bytes, ext, workdir).await?;
    import_rendered(&pdf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assemble::tests::sample_pdf;

    struct Fixed(Vec<u8>);

    #[async_trait]
    impl DocumentRenderer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn render_pdf(&self, _: &[u8], _: &str, _: &Path) -> Result<Vec<u8>, CapabilityError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn file_urls() {
        assert_eq!(file_url(Path::new("/tmp/x/profile")), "file:///tmp/x/profile");
        assert_eq!(file_url(Path::new("C:\\tmp\\profile")), "file:///C:/tmp/profile");
    }

    #[tokio::test]
    async fn rendered_pages_are_imported() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Fixed(sample_pdf(&[(100, 200), (300, 400), (500, 600)]));
        let pages = convert(&renderer, b"doc", ".docx", dir.path()).await.unwrap();
        assert_eq!(pages.len(), 3);
    }

    #[tokio::test]
    async fn invalid_renderer_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Fixed(b"not a pdf".to_vec());
        let err = convert(&renderer, b"doc", ".docx", dir.path()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Invalid(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_soffice_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let lo = LibreOffice::with_program("false");
        let err = lo.render_pdf(b"x", ".txt", dir.path()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Exit { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_soffice_without_output_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let lo = LibreOffice::with_program("true");
        let err = lo.render_pdf(b"x", ".txt", dir.path()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::NoOutput { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn soffice_console_is_kept_when_no_pdf_appears() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("soffice");
        std::fs::write(&script, "#!/bin/sh\necho 'Error: source file could not be loaded' >&2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();

        let lo = LibreOffice::with_program(&script);
        let err = lo.render_pdf(b"x", ".txt", &work).await.unwrap_err();
        match err {
            CapabilityError::NoOutput { diagnostic, .. } => {
                assert_eq!(diagnostic, "Error: source file could not be loaded");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
