//! # renderer-locate
//!
//! Find the external renderers `merge2pdf` drives as subprocesses:
//! [LibreOffice](https://www.libreoffice.org/) (`soffice`),
//! [Ghostscript](https://www.ghostscript.com/) (`gs` / `gswin64c`) and a
//! Chromium-family browser, without the user having to configure paths.
//!
//! ## How it works
//!
//! On the first call to [`locate`] for a given [`Renderer`]:
//!
//! 1. If the renderer's environment variable (e.g. `MERGE2PDF_SOFFICE`) is
//!    set, that path is used as-is and must exist.
//! 2. Otherwise each platform program name is searched on `PATH`.
//! 3. Otherwise the platform's well-known install locations are probed,
//!    system-wide first, then relative to the user's home directory.
//!
//! The resolved path is cached for the lifetime of the process.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use renderer_locate::{locate, locate_or_fallback, Renderer};
//!
//! // Fails with a list of every searched location when nothing is installed.
//! let soffice = locate(Renderer::LibreOffice).expect("LibreOffice not installed");
//!
//! // Never fails: falls back to the bare program name so that spawning
//! // reports the missing binary at the call site instead.
//! let gs = locate_or_fallback(Renderer::Ghostscript);
//! ```
//!
//! ## Environment variable overrides
//!
//! | Renderer    | Variable               |
//! |-------------|------------------------|
//! | LibreOffice | `MERGE2PDF_SOFFICE`    |
//! | Ghostscript | `MERGE2PDF_GHOSTSCRIPT`|
//! | Chromium    | `MERGE2PDF_CHROMIUM`   |

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by renderer discovery.
#[derive(Error, Debug)]
pub enum LocateError {
    /// The override variable names a path that does not exist.
    #[error("{var} points to '{}', which does not exist", .path.display())]
    OverrideMissing { var: &'static str, path: PathBuf },

    /// Nothing was found on `PATH` or in any well-known location.
    #[error("{renderer} not found (searched PATH for {programs:?} and {} install locations)\nSet {var} to the executable path.", .searched.len())]
    NotFound {
        renderer: Renderer,
        var: &'static str,
        programs: Vec<&'static str>,
        searched: Vec<PathBuf>,
    },
}

// ── Renderers ────────────────────────────────────────────────────────────────

/// An external program the conversion engine can delegate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Renderer {
    /// Office document → PDF (`soffice --convert-to pdf`).
    LibreOffice,
    /// PostScript / EPS → PDF (`gs -sDEVICE=pdfwrite`).
    Ghostscript,
    /// HTML → PDF (`--headless --print-to-pdf`).
    Chromium,
}

impl Renderer {
    pub const ALL: [Renderer; 3] = [Renderer::LibreOffice, Renderer::Ghostscript, Renderer::Chromium];

    /// Environment variable that overrides discovery for this renderer.
    pub fn env_var(self) -> &'static str {
        match self {
            Renderer::LibreOffice => "MERGE2PDF_SOFFICE",
            Renderer::Ghostscript => "MERGE2PDF_GHOSTSCRIPT",
            Renderer::Chromium => "MERGE2PDF_CHROMIUM",
        }
    }

    fn slot(self) -> usize {
        match self {
            Renderer::LibreOffice => 0,
            Renderer::Ghostscript => 1,
            Renderer::Chromium => 2,
        }
    }
}

impl fmt::Display for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Renderer::LibreOffice => "LibreOffice",
            Renderer::Ghostscript => "Ghostscript",
            Renderer::Chromium => "Chromium",
        })
    }
}

// ── Internal: platform metadata ──────────────────────────────────────────────

struct PlatformInfo {
    /// Program names looked up on `PATH`, in preference order.
    programs: &'static [&'static str],
    /// Absolute install locations.
    install_paths: &'static [&'static str],
    /// Install locations relative to the user's home directory.
    home_paths: &'static [&'static str],
}

fn platform_info(renderer: Renderer, os: &str) -> PlatformInfo {
    match (renderer, os) {
        (Renderer::LibreOffice, "macos") => PlatformInfo {
            programs: &["soffice"],
            install_paths: &["/Applications/LibreOffice.app/Contents/MacOS/soffice"],
            home_paths: &["Applications/LibreOffice.app/Contents/MacOS/soffice"],
        },
        (Renderer::LibreOffice, "windows") => PlatformInfo {
            programs: &["soffice.exe", "soffice.com"],
            install_paths: &[
                r"C:\Program Files\LibreOffice\program\soffice.exe",
                r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
            ],
            home_paths: &[],
        },
        (Renderer::LibreOffice, _) => PlatformInfo {
            programs: &["soffice", "libreoffice"],
            install_paths: &[
                "/usr/lib/libreoffice/program/soffice",
                "/opt/libreoffice/program/soffice",
                "/snap/bin/libreoffice",
            ],
            home_paths: &[".local/bin/soffice"],
        },
        (Renderer::Ghostscript, "windows") => PlatformInfo {
            programs: &["gswin64c.exe", "gswin32c.exe"],
            install_paths: &[],
            home_paths: &[],
        },
        (Renderer::Ghostscript, _) => PlatformInfo {
            programs: &["gs"],
            install_paths: &["/usr/bin/gs", "/usr/local/bin/gs", "/opt/homebrew/bin/gs"],
            home_paths: &[],
        },
        (Renderer::Chromium, "macos") => PlatformInfo {
            programs: &["chromium", "google-chrome"],
            install_paths: &[
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
            ],
            home_paths: &[
                "Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "Applications/Chromium.app/Contents/MacOS/Chromium",
            ],
        },
        (Renderer::Chromium, "windows") => PlatformInfo {
            programs: &["chrome.exe", "msedge.exe"],
            install_paths: &[
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            ],
            home_paths: &[],
        },
        (Renderer::Chromium, _) => PlatformInfo {
            programs: &[
                "chromium",
                "chromium-browser",
                "google-chrome",
                "google-chrome-stable",
            ],
            install_paths: &["/usr/bin/chromium", "/snap/bin/chromium"],
            home_paths: &[],
        },
    }
}

// ── Search context ───────────────────────────────────────────────────────────

/// Inputs to a discovery run. [`SearchContext::from_env`] captures the live
/// process environment; tests build isolated contexts instead.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    /// Value of the renderer's override variable, if set.
    pub override_path: Option<OsString>,
    /// Value of `PATH`.
    pub path_var: Option<OsString>,
    /// Home directory used for per-user install locations.
    pub home: Option<PathBuf>,
    /// Probe the platform's absolute install locations.
    pub probe_install_paths: bool,
}

impl SearchContext {
    pub fn from_env(renderer: Renderer) -> Self {
        Self {
            override_path: std::env::var_os(renderer.env_var()).filter(|v| !v.is_empty()),
            path_var: std::env::var_os("PATH"),
            home: dirs::home_dir(),
            probe_install_paths: true,
        }
    }
}

// ── Thread-safe path cache ───────────────────────────────────────────────────

static RESOLVED: [OnceLock<PathBuf>; 3] = [OnceLock::new(), OnceLock::new(), OnceLock::new()];

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve `renderer` against the live environment, caching the result.
pub fn locate(renderer: Renderer) -> Result<PathBuf, LocateError> {
    let slot = &RESOLVED[renderer.slot()];
    if let Some(path) = slot.get() {
        return Ok(path.clone());
    }

    let path = find_with(renderer, &SearchContext::from_env(renderer))?;
    let _ = slot.set(path.clone());
    Ok(path)
}

/// Like [`locate`], but falls back to the first platform program name so the
/// caller can still attempt a spawn (and surface a precise spawn error).
pub fn locate_or_fallback(renderer: Renderer) -> PathBuf {
    locate(renderer).unwrap_or_else(|_| {
        let info = platform_info(renderer, std::env::consts::OS);
        PathBuf::from(info.programs.first().copied().unwrap_or("soffice"))
    })
}

/// Run discovery for `renderer` against an explicit [`SearchContext`].
pub fn find_with(renderer: Renderer, ctx: &SearchContext) -> Result<PathBuf, LocateError> {
    if let Some(ref raw) = ctx.override_path {
        let path = PathBuf::from(raw);
        if path.is_file() {
            return Ok(path);
        }
        return Err(LocateError::OverrideMissing {
            var: renderer.env_var(),
            path,
        });
    }

    let info = platform_info(renderer, std::env::consts::OS);

    if let Some(ref path_var) = ctx.path_var {
        for dir in std::env::split_paths(path_var) {
            for program in info.programs {
                let candidate = dir.join(program);
                if is_executable(&candidate) {
                    return Ok(candidate);
                }
            }
        }
    }

    let mut searched = Vec::new();
    if ctx.probe_install_paths {
        searched.extend(info.install_paths.iter().map(PathBuf::from));
    }
    if let Some(ref home) = ctx.home {
        searched.extend(info.home_paths.iter().map(|rel| home.join(rel)));
    }

    if let Some(found) = searched.iter().find(|p| is_executable(p)) {
        return Ok(found.clone());
    }

    Err(LocateError::NotFound {
        renderer,
        var: renderer.env_var(),
        programs: info.programs.to_vec(),
        searched,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated(path_var: Option<OsString>) -> SearchContext {
        SearchContext {
            override_path: None,
            path_var,
            home: None,
            probe_install_paths: false,
        }
    }

    #[test]
    fn every_renderer_has_program_names() {
        for os in ["linux", "macos", "windows"] {
            for renderer in Renderer::ALL {
                assert!(
                    !platform_info(renderer, os).programs.is_empty(),
                    "{renderer} on {os}"
                );
            }
        }
    }

    #[test]
    fn windows_ghostscript_uses_console_binary() {
        let info = platform_info(Renderer::Ghostscript, "windows");
        assert_eq!(info.programs[0], "gswin64c.exe");
    }

    #[test]
    fn override_wins_when_file_exists() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let ctx = SearchContext {
            override_path: Some(file.path().as_os_str().to_owned()),
            ..isolated(None)
        };
        assert_eq!(find_with(Renderer::Ghostscript, &ctx).unwrap(), file.path());
    }

    #[test]
    fn override_pointing_nowhere_is_an_error() {
        let ctx = SearchContext {
            override_path: Some("/definitely/not/here/soffice".into()),
            ..isolated(None)
        };
        let err = find_with(Renderer::LibreOffice, &ctx).unwrap_err();
        assert!(matches!(err, LocateError::OverrideMissing { var: "MERGE2PDF_SOFFICE", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn finds_executable_on_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let gs = dir.path().join("gs");
        std::fs::write(&gs, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&gs, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = isolated(Some(dir.path().as_os_str().to_owned()));
        assert_eq!(find_with(Renderer::Ghostscript, &ctx).unwrap(), gs);
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gs"), "not a program").unwrap();

        let ctx = isolated(Some(dir.path().as_os_str().to_owned()));
        assert!(find_with(Renderer::Ghostscript, &ctx).is_err());
    }

    #[test]
    fn not_found_names_the_override_variable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = isolated(Some(dir.path().as_os_str().to_owned()));
        let err = find_with(Renderer::Chromium, &ctx).unwrap_err();
        assert!(err.to_string().contains("MERGE2PDF_CHROMIUM"), "got: {err}");
    }
}
