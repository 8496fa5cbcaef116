//! Subprocess plumbing shared by the renderer adapters.
//!
//! Children are spawned with a null stdin and captured stdout/stderr, and
//! with `kill_on_drop` set. Dropping the future (for example when the
//! per-item timeout fires) therefore kills the process.

use crate::error::CapabilityError;
use renderer_locate::Renderer;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Longest diagnostic kept from a child's stderr, in characters.
const MAX_DIAGNOSTIC_CHARS: usize = 1500;

/// What a successful child left behind.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    /// Trimmed and truncated stderr + stdout, kept for later diagnostics.
    pub console: String,
}

/// Run `program` to completion and fail unless it exits successfully.
pub async fn run<I, S>(program: &Path, args: I, cwd: Option<&Path>) -> Result<RunOutput, CapabilityError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!("Spawning {:?}", cmd.as_std());

    let name = program.display().to_string();
    let output = cmd.output().await.map_err(|source| CapabilityError::Spawn {
        program: name.clone(),
        source,
    })?;

    // Some tools (Ghostscript) report errors on stdout.
    let console = console_text(&output.stderr, &output.stdout);
    if !output.status.success() {
        return Err(CapabilityError::Exit {
            program: name,
            status: output.status.to_string(),
            stderr: console,
        });
    }
    Ok(RunOutput {
        stdout: output.stdout,
        console,
    })
}

fn console_text(stderr: &[u8], stdout: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stdout = String::from_utf8_lossy(stdout);
    let joined = [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    truncate_diagnostic(&joined)
}

/// The executable to run for `renderer`: an explicit path if configured,
/// otherwise whatever discovery finds.
pub fn resolve_program(explicit: Option<&Path>, renderer: Renderer) -> Result<PathBuf, CapabilityError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    renderer_locate::locate(renderer).map_err(|e| CapabilityError::Spawn {
        program: renderer.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
    })
}

/// Trim whitespace and keep only the tail of an overly long diagnostic.
pub fn truncate_diagnostic(text: &str) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= MAX_DIAGNOSTIC_CHARS {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - MAX_DIAGNOSTIC_CHARS).collect();
    format!("...{tail}")
}

/// Read a file the child was expected to produce.
///
/// `console` is what the child printed; it becomes the diagnostic when the
/// file is missing or empty.
pub async fn read_output(program: &Path, path: &Path, console: &str) -> Result<Vec<u8>, CapabilityError> {
    let missing = || CapabilityError::NoOutput {
        program: program.display().to_string(),
        diagnostic: truncate_diagnostic(console),
    };
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(missing()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(missing()),
        Err(e) => Err(CapabilityError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_program_skips_discovery() {
        let p = resolve_program(Some(Path::new("/opt/soffice")), Renderer::LibreOffice).unwrap();
        assert_eq!(p, PathBuf::from("/opt/soffice"));
    }

    #[test]
    fn short_diagnostics_are_trimmed_only() {
        assert_eq!(truncate_diagnostic("  oops \n"), "oops");
    }

    #[test]
    fn long_diagnostics_keep_the_tail() {
        let long = format!("{}END", "x".repeat(5000));
        let out = truncate_diagnostic(&long);
        assert!(out.starts_with("..."));
        assert!(out.ends_with("END"));
        assert_eq!(out.chars().count(), MAX_DIAGNOSTIC_CHARS + 3);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run(Path::new("/nonexistent/merge2pdf-no-such-tool"), ["x"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_captures_stderr() {
        let err = run(Path::new("sh"), ["-c", "echo broken >&2; exit 3"], None)
            .await
            .unwrap_err();
        match err {
            CapabilityError::Exit { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_returns_stdout() {
        let out = run(Path::new("sh"), ["-c", "printf ok; echo warn >&2"], None).await.unwrap();
        assert_eq!(out.stdout, b"ok");
        assert_eq!(out.console, "warn\nok");
    }

    #[tokio::test]
    async fn empty_output_file_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, b"").unwrap();
        let err = read_output(Path::new("gs"), &path, "").await.unwrap_err();
        assert!(matches!(err, CapabilityError::NoOutput { .. }));
        assert_eq!(err.to_string(), "'gs' produced no output");

        let err = read_output(Path::new("gs"), &dir.path().join("none.pdf"), "Error: /undefined in foo\n")
            .await
            .unwrap_err();
        match &err {
            CapabilityError::NoOutput { diagnostic, .. } => assert_eq!(diagnostic, "Error: /undefined in foo"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(err.to_string().ends_with("produced no output: Error: /undefined in foo"));
    }
}
