pub mod handlers;
mod store;

pub use store::{FsUploadStore, UploadStore};

use once_cell::sync::OnceCell;

static STORE: OnceCell<FsUploadStore> = OnceCell::new();

pub fn init() {
    let store = FsUploadStore::new(crate::context::uploads_dir());
    STORE.set(store).ok();
}

pub fn store() -> &'static FsUploadStore {
    STORE.get().expect("The upload store is not initialized")
}

/// Deletes a batch of stored files, tolerating the ones already gone.
pub async fn discard_stored(store: &dyn UploadStore, urls: &[String]) {
    for url in urls {
        if let Err(e) = store.delete(url).await {
            log::warn!("Failed to delete the stored file {}: {}", url, e);
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::UploadStore;
    use crate::error::AppError;
    use std::sync::Mutex;

    /// Test double recording every delete it is asked for.
    #[derive(Default)]
    pub struct RecordingStore {
        deleted: Mutex<Vec<String>>,
    }

    impl RecordingStore {
        pub fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl UploadStore for RecordingStore {
        async fn store(&self, filename: &str, _bytes: &[u8]) -> Result<String, AppError> {
            Ok(format!("/uploads/{}", filename))
        }

        async fn delete(&self, url: &str) -> Result<(), AppError> {
            self.deleted.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }
}
