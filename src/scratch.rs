//! Optional on-disk staging of uploads.
//!
//! Each request gets its own file, named with a fresh uuid so concurrent
//! uploads sharing a filename never overwrite each other. The file lives
//! exactly as long as its [`ScratchFile`] guard.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `bytes` to a new request-scoped file, creating the directory
    /// if it does not exist yet.
    pub fn stage(&self, original_name: Option<&str>, bytes: &[u8]) -> io::Result<ScratchFile> {
        fs::create_dir_all(&self.root)?;

        let name = format!(
            "{}-{}",
            uuid::Uuid::new_v4(),
            sanitize_file_name(original_name.unwrap_or_default())
        );
        let path = self.root.join(name);

        // Hand out the guard before writing so a partial write is cleaned up too.
        let file = ScratchFile { path };
        fs::write(&file.path, bytes)?;
        tracing::debug!("Staged {} bytes at {}", bytes.len(), file.path.display());
        Ok(file)
    }
}

/// Removes its file on drop.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed scratch file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Keeps only the final path component and a conservative character set.
fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("scratch-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn stage_creates_directory_and_drop_removes_file() {
        let root = temp_root();
        let scratch = ScratchDir::new(&root);
        assert!(!root.exists());

        let file = scratch.stage(Some("scan.png"), b"bytes").unwrap();
        let path = file.path().to_path_buf();
        assert!(root.is_dir());
        assert_eq!(fs::read(&path).unwrap(), b"bytes");
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("-scan.png"));

        drop(file);
        assert!(!path.exists());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn same_filename_gets_distinct_paths() {
        let root = temp_root();
        let scratch = ScratchDir::new(&root);
        let a = scratch.stage(Some("same.jpg"), b"a").unwrap();
        let b = scratch.stage(Some("same.jpg"), b"b").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(fs::read(a.path()).unwrap(), b"a");
        assert_eq!(fs::read(b.path()).unwrap(), b"b");
        drop((a, b));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn already_removed_file_is_not_an_error() {
        let root = temp_root();
        let file = ScratchDir::new(&root).stage(None, b"x").unwrap();
        fs::remove_file(file.path()).unwrap();
        drop(file);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn file_names_cannot_escape_the_directory() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("brain scan (1).png"), "brain_scan__1_.png");
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(&"a".repeat(500)).len(), MAX_NAME_LEN);
    }
}
