use std::future::Future;

use bytes::Bytes;
use serde::Serialize;

use crate::contracts::error::StorageError;

/// Information about the object storage backend.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectStoreInfo {
    /// Storage type identifier (e.g., "s3", "none")
    pub storage_type: String,
    pub bucket: String,
    /// Prefix used to build public object URLs
    pub public_url_base: String,
}

/// Blob storage for purchase images.
pub trait ObjectStore: Send + Sync {
    /// Stores `body` under `key`.
    /// Returns the public URL of the stored object.
    fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> impl Future<Output = Result<String, StorageError>> + Send;

    /// Returns information about the storage backend.
    fn storage_info(&self) -> ObjectStoreInfo;
}

/// Builds an object key from a fresh id and the uploaded file name.
/// Path separators in the file name are dropped.
pub fn image_object_key(id: &str, file_name: &str) -> String {
    let base = file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("{}_{}", id, base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_key_prefixes_id() {
        assert_eq!(image_object_key("abc", "dije.png"), "abc_dije.png");
    }

    #[test]
    fn image_key_strips_directories() {
        assert_eq!(image_object_key("abc", "../../etc/passwd"), "abc_passwd");
        assert_eq!(image_object_key("abc", "C:\\fotos\\dije.jpg"), "abc_dije.jpg");
        assert_eq!(image_object_key("abc", "fotos/"), "abc_image");
    }
}
