//! Scoped temporary storage for one conversion attempt.
//!
//! Every item, archive entry and subprocess gets its own [`ScratchDir`]
//! under the configured scratch root. Names combine a millisecond timestamp
//! with a random suffix (from `tempfile`), so concurrent batches sharing the
//! same root never collide.
//!
//! A `ScratchDir` removes itself on drop. Removal failures are logged and
//! swallowed: cleanup must never abort a batch.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Placeholder substituted for the scratch root in user-visible diagnostics.
pub const REDACTED: &str = "<scratch>";

/// Root directory under which all scratch directories are created.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, uniquely named directory for one unit of work.
    pub fn scratch_dir(&self, label: &str) -> io::Result<ScratchDir> {
        std::fs::create_dir_all(&self.root)?;
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let prefix = format!("{}_{}_", safe_label(label), stamp);
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&self.root)?;
        debug!("Created scratch dir {}", dir.path().display());
        Ok(ScratchDir { dir: Some(dir) })
    }

    /// Replace every occurrence of the scratch root in `text` with
    /// [`REDACTED`].
    pub fn redact(&self, text: &str) -> String {
        let root = self.root.to_string_lossy();
        if root.is_empty() {
            return text.to_string();
        }
        text.replace(root.as_ref(), REDACTED)
    }
}

/// Keep labels short and filesystem-safe.
fn safe_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .take(24)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "item".to_string()
    } else {
        cleaned
    }
}

/// A temporary directory deleted on every exit path.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(d) => d.path(),
            None => Path::new(""),
        }
    }

    /// Path of a file inside this directory.
    pub fn join(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    /// Remove the directory now, reporting (not propagating) failures.
    pub fn release(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove scratch dir {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let path = {
            let dir = ws.scratch_dir("photo.jpg").unwrap();
            std::fs::write(dir.join("x.bin"), b"data").unwrap();
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn scratch_dirs_never_collide() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let a = ws.scratch_dir("same").unwrap();
        let b = ws.scratch_dir("same").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(ws.root(), root.path());
        assert!(a.path().starts_with(ws.root()));
    }

    #[test]
    fn release_removes_immediately() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let dir = ws.scratch_dir("entry").unwrap();
        let path = dir.path().to_path_buf();
        dir.release();
        assert!(!path.exists());
    }

    #[test]
    fn redact_hides_scratch_root() {
        let ws = Workspace::new("/var/tmp/merge2pdf");
        let msg = ws.redact("cannot open /var/tmp/merge2pdf/x_1/in.docx");
        assert_eq!(msg, "cannot open <scratch>/x_1/in.docx");
    }

    #[test]
    fn labels_are_sanitised() {
        assert_eq!(safe_label("a b/c.pdf"), "a_b_c_pdf");
        assert_eq!(safe_label(""), "item");
    }
}
