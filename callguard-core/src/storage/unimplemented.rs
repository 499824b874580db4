use async_trait::async_trait;
use bytes::Bytes;

use super::{StorageBackend, StoredFile, UploadOptions, UrlOptions};
use crate::config::StorageProviderKind;
use crate::error::{CallGuardError, CoreResult};

/// Placeholder for providers that are selectable but not built yet.
/// Every operation fails with `NotImplemented`.
#[derive(Debug, Clone, Copy)]
pub struct UnimplementedStorage {
    provider: StorageProviderKind,
}

impl UnimplementedStorage {
    pub fn new(provider: StorageProviderKind) -> Self {
        Self { provider }
    }

    fn fail<T>(&self, operation: &str) -> CoreResult<T> {
        Err(CallGuardError::NotImplemented {
            provider: self.provider.as_str().to_string(),
            operation: operation.to_string(),
        })
    }
}

#[async_trait]
impl StorageBackend for UnimplementedStorage {
    fn provider(&self) -> StorageProviderKind {
        self.provider
    }

    async fn upload_file(
        &self,
        _bytes: Bytes,
        _name: &str,
        _folder: &str,
        _options: &UploadOptions,
    ) -> CoreResult<StoredFile> {
        self.fail("uploadFile")
    }

    async fn delete_file(&self, _path: &str) -> CoreResult<()> {
        self.fail("deleteFile")
    }

    async fn get_file_url(&self, _path: &str, _options: &UrlOptions) -> CoreResult<String> {
        self.fail("getFileUrl")
    }

    async fn get_file_content(&self, _path: &str) -> CoreResult<Bytes> {
        self.fail("getFileContent")
    }
}
