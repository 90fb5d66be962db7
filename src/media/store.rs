use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::AppError;

/// The narrow seam to wherever uploaded files actually live.
///
/// `store` hands back a URL; `delete` takes the same URL. Everything else
/// (message rows, profile columns) treats those URLs as opaque.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<String, AppError>;
    async fn delete(&self, url: &str) -> Result<(), AppError>;
}

pub struct FsUploadStore {
    root: PathBuf,
}

pub const URL_PREFIX: &str = "/uploads/";

fn sanitize_filename(filename: &str) -> String {
    regex!(r#"[/?*:|<>\\]"#).replace_all(filename, "_").to_string()
}

impl FsUploadStore {
    pub fn new<P: AsRef<Path>>(root: P) -> FsUploadStore {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).expect("Failed to create the uploads directory");
        FsUploadStore { root }
    }

    /// Maps a store URL back to a path under the root. Anything that is not
    /// a plain filename under the prefix is rejected.
    pub fn path_for(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(URL_PREFIX)?;
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        Some(self.root.join(name))
    }
}

#[async_trait]
impl UploadStore for FsUploadStore {
    /// Files are stored under their content hash, so re-uploading the same
    /// bytes lands on the same name.
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<String, AppError> {
        let filename = sanitize_filename(filename);
        let ext = Path::new(&filename)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("bin");
        let hash = blake3::hash(bytes).to_hex().to_string();
        let stored_name = format!("{}.{}", hash, ext);
        let path = self.root.join(&stored_name);
        if !path.exists() {
            tokio::fs::write(&path, bytes).await?;
        }
        Ok(format!("{}{}", URL_PREFIX, stored_name))
    }

    async fn delete(&self, url: &str) -> Result<(), AppError> {
        let path = self
            .path_for(url)
            .ok_or_else(|| AppError::BadRequest(format!("Not a stored file URL: {}", url)))?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsUploadStore::new(dir.path());
        let url = store.store("photo.png", b"not really a png").await.unwrap();
        assert!(url.starts_with(URL_PREFIX));
        assert!(url.ends_with(".png"));
        let path = store.path_for(&url).unwrap();
        assert!(path.exists());

        // Same bytes, same URL.
        let again = store.store("other name.png", b"not really a png").await.unwrap();
        assert_eq!(url, again);

        store.delete(&url).await.unwrap();
        assert!(!path.exists());
        // Deleting a missing file surfaces an error the caller may tolerate.
        assert!(store.delete(&url).await.is_err());
    }

    #[test]
    fn path_for_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsUploadStore::new(dir.path());
        assert!(store.path_for("/uploads/../etc/passwd").is_none());
        assert!(store.path_for("/uploads/a/b").is_none());
        assert!(store.path_for("/elsewhere/x.png").is_none());
        assert!(store.path_for("/uploads/x.png").is_some());
    }
}
