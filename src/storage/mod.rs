//! File storage adapter for uploaded documents.
//!
//! Files are written under the configured upload directory with a generated
//! name; the user-supplied original filename is recorded in the database but
//! never used on disk. The database cascade does not touch the filesystem,
//! so file removal is always an explicit, best-effort compensating action.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::StorageConfig;

/// MIME types accepted for upload: PDF, Word, Excel, plain text and the
/// common image formats.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
];

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

/// File extension preserved on disk for a sanctioned MIME type. Derived
/// from the MIME type, not the untrusted original filename.
fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "text/plain" => "txt",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Handles disk placement of uploaded files
#[derive(Debug, Clone)]
pub struct FileStore {
    upload_dir: PathBuf,
    max_upload_bytes: u64,
}

impl FileStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Ensure the upload directory exists
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create upload directory: {}",
                    self.upload_dir.display()
                )
            })?;
        Ok(())
    }

    /// Generate a collision-resistant stored filename for the given MIME
    /// type. Never derived from the original filename.
    pub fn generate_stored_filename(&self, mime: &str) -> String {
        format!("{}.{}", Uuid::new_v4(), extension_for_mime(mime))
    }

    /// Resolve a relative path from the documents table to its on-disk
    /// location
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        self.upload_dir.join(relative)
    }

    /// Write upload bytes to disk under the stored filename, returning the
    /// relative path recorded in the documents table.
    pub async fn write(&self, stored_filename: &str, data: &[u8]) -> Result<String> {
        let path = self.upload_dir.join(stored_filename);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write upload: {}", path.display()))?;
        Ok(stored_filename.to_string())
    }

    pub async fn exists(&self, relative: &str) -> bool {
        tokio::fs::try_exists(self.absolute_path(relative))
            .await
            .unwrap_or(false)
    }

    /// Remove a stored file. Idempotent: a file that is already gone is
    /// logged and ignored.
    pub async fn remove(&self, relative: &str) {
        let path = self.absolute_path(relative);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Stored file already missing on delete");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete stored file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> FileStore {
        FileStore::new(&StorageConfig {
            upload_dir: dir.to_path_buf(),
            max_upload_bytes: 1024,
        })
    }

    #[test]
    fn test_mime_allow_list() {
        assert!(is_allowed_mime("application/pdf"));
        assert!(is_allowed_mime("image/png"));
        assert!(is_allowed_mime("text/plain"));
        assert!(!is_allowed_mime("application/zip"));
        assert!(!is_allowed_mime("application/x-msdownload"));
        assert!(!is_allowed_mime("text/html"));
    }

    #[test]
    fn test_stored_filename_ignores_original_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let a = store.generate_stored_filename("application/pdf");
        let b = store.generate_stored_filename("application/pdf");
        assert_ne!(a, b);
        assert!(a.ends_with(".pdf"));
        assert!(b.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn test_write_exists_remove_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.init().await.unwrap();

        let name = store.generate_stored_filename("text/plain");
        let relative = store.write(&name, b"deposition transcript").await.unwrap();
        assert!(store.exists(&relative).await);

        store.remove(&relative).await;
        assert!(!store.exists(&relative).await);

        // Removing again is not an error
        store.remove(&relative).await;
    }
}
