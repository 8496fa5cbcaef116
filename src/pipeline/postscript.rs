//! PostScript / EPS adapter.
//!
//! An interpreter transcodes the input to a temporary PDF, whose pages are
//! then imported. The temporary output is deleted whatever happens.

use crate::error::CapabilityError;
use crate::pipeline::external;
use crate::pipeline::page::{import_rendered, Pages};
use async_trait::async_trait;
use renderer_locate::Renderer;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[async_trait]
pub trait PostscriptInterpreter: Send + Sync {
    fn name(&self) -> &str;

    /// Transcode the PostScript file at `input` into a PDF at `output`.
    /// Returns whatever the interpreter printed on its console.
    async fn to_pdf(&self, input: &Path, output: &Path) -> Result<String, CapabilityError>;

    /// Program used in diagnostics when no output appears.
    fn program(&self) -> PathBuf {
        PathBuf::from(self.name())
    }
}

/// Ghostscript's `pdfwrite` device (`gs`, or `gswin64c` on Windows).
#[derive(Debug, Clone, Default)]
pub struct Ghostscript {
    program: Option<PathBuf>,
}

impl Ghostscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }
}

/// `gs -sDEVICE=pdfwrite -o <output> -dNOPAUSE -dBATCH -dSAFER -f <input>`
pub fn ghostscript_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-sDEVICE=pdfwrite".into(), "-o".into()];
    args.push(output.as_os_str().to_owned());
    args.extend(["-dNOPAUSE", "-dBATCH", "-dSAFER", "-f"].map(OsString::from));
    args.push(input.as_os_str().to_owned());
    args
}

#[async_trait]
impl PostscriptInterpreter for Ghostscript {
    fn name(&self) -> &str {
        "Ghostscript"
    }

    async fn to_pdf(&self, input: &Path, output: &Path) -> Result<String, CapabilityError> {
        let program = external::resolve_program(self.program.as_deref(), Renderer::Ghostscript)?;
        let run = external::run(&program, ghostscript_args(input, output), None).await?;
        Ok(run.console)
    }

    fn program(&self) -> PathBuf {
        self.program
            .clone()
            .unwrap_or_else(|| renderer_locate::locate_or_fallback(Renderer::Ghostscript))
    }
}

/// Convert PostScript bytes into imported pages.
pub async fn convert(
    interpreter: &dyn PostscriptInterpreter,
    bytes: &[u8],
    stem: &str,
    ext: &str,
    workdir: &Path,
) -> Result<Pages, CapabilityError> {
    let input = workdir.join(format!("input{ext}"));
    let output = workdir.join(format!("{stem}_gsconverted.pdf"));
    tokio::fs::write(&input, bytes).await?;

    let result = async {
        let console = interpreter.to_pdf(&input, &output).await?;
        let pdf = external::read_output(&interpreter.program(), &output, &console).await?;
        debug!("{} produced {} bytes", interpreter.name(), pdf.len());
        import_rendered(&pdf)
    }
    .await;

    for path in [&output, &input] {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assemble::tests::sample_pdf;

    /// Writes a fixed PDF, or nothing at all.
    struct Fake(Option<Vec<u8>>);

    #[async_trait]
    impl PostscriptInterpreter for Fake {
        fn name(&self) -> &str {
            "fake-gs"
        }
        async fn to_pdf(&self, input: &Path, output: &Path) -> Result<String, CapabilityError> {
            assert!(input.exists());
            match &self.0 {
                Some(pdf) => {
                    tokio::fs::write(output, pdf).await?;
                    Ok(String::new())
                }
                None => Ok("Unrecoverable error, exit code 1".to_string()),
            }
        }
    }

    #[test]
    fn argv_matches_pdfwrite_invocation() {
        let args = ghostscript_args(Path::new("/s/in.ps"), Path::new("/s/out.pdf"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-sDEVICE=pdfwrite", "-o", "/s/out.pdf", "-dNOPAUSE", "-dBATCH", "-dSAFER", "-f", "/s/in.ps"]
        );
    }

    #[tokio::test]
    async fn output_is_imported_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let gs = Fake(Some(sample_pdf(&[(612, 792), (612, 792)])));
        let pages = convert(&gs, b"%!PS", "figure", ".eps", dir.path()).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert!(!dir.path().join("figure_gsconverted.pdf").exists());
        assert!(!dir.path().join("input.eps").exists());
    }

    #[tokio::test]
    async fn missing_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = convert(&Fake(None), b"%!PS", "x", ".ps", dir.path()).await.unwrap_err();
        match &err {
            CapabilityError::NoOutput { program, diagnostic } => {
                assert_eq!(program, "fake-gs");
                assert_eq!(diagnostic, "Unrecoverable error, exit code 1");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(err.to_string().ends_with(": Unrecoverable error, exit code 1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let gs = Ghostscript::with_program("false");
        let err = convert(&gs, b"%!PS", "x", ".ps", dir.path()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Exit { .. }));
    }
}
