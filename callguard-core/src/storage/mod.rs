//! Storage adapter: one file-storage interface over interchangeable
//! backends, with every operation reported through the call envelope.

pub mod local;
pub mod mime;
pub mod s3;
pub mod unimplemented;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

pub use local::LocalStorage;
pub use s3::S3Storage;
pub use unimplemented::UnimplementedStorage;

use crate::config::{Config, StorageProviderKind};
use crate::envelope::{CallEnvelope, CallSpec, ReportsUsage};
use crate::error::{CallGuardError, CoreResult};

pub const ENDPOINT_UPLOAD: &str = "upload";
pub const ENDPOINT_DELETE: &str = "delete";
pub const ENDPOINT_URL: &str = "getFileUrl";
pub const ENDPOINT_CONTENT: &str = "getFileContent";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Publicly readable object with a permanent URL, instead of a signed one.
    pub public: bool,
    /// Overrides the extension-based guess.
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Lifetime of the signed URL for private uploads.
    pub expires_in: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrlOptions {
    pub public: bool,
    pub expires_in: Option<Duration>,
}

/// Outcome of an upload. `path` is the backend-relative reference used by
/// the other operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub url: String,
    pub path: String,
    pub size: u64,
    pub provider: StorageProviderKind,
}

impl ReportsUsage for StoredFile {}

/// One storage provider.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn provider(&self) -> StorageProviderKind;

    async fn upload_file(
        &self,
        bytes: Bytes,
        name: &str,
        folder: &str,
        options: &UploadOptions,
    ) -> CoreResult<StoredFile>;

    async fn delete_file(&self, path: &str) -> CoreResult<()>;

    async fn get_file_url(&self, path: &str, options: &UrlOptions) -> CoreResult<String>;

    async fn get_file_content(&self, path: &str) -> CoreResult<Bytes>;
}

/// Builds the backend for the configured provider. Construction never
/// touches the network or validates credentials.
pub fn backend_for(cfg: &Config) -> Arc<dyn StorageBackend> {
    match cfg.storage.provider {
        StorageProviderKind::Local => Arc::new(LocalStorage::new(&cfg.storage.local)),
        StorageProviderKind::AwsS3 => Arc::new(S3Storage::new(cfg.storage.s3.clone())),
        kind @ (StorageProviderKind::GoogleCloud | StorageProviderKind::Azure) => {
            Arc::new(UnimplementedStorage::new(kind))
        }
    }
}

/// `folder/name` with both parts NFC-normalised and checked.
///
/// `folder` may nest (`a/b`); `name` must be a single component. Neither may
/// contain `..`, backslashes or NUL.
pub fn object_key(folder: &str, name: &str) -> CoreResult<String> {
    let name: String = name.trim().nfc().collect();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(CallGuardError::Validation(format!("invalid file name '{name}'")));
    }
    let folder = relative_path(folder)?;
    if folder.is_empty() {
        Ok(name)
    } else {
        Ok(format!("{folder}/{name}"))
    }
}

/// Normalises a backend-relative path: NFC, no leading or trailing slashes,
/// no empty, `.` or `..` components.
pub fn relative_path(path: &str) -> CoreResult<String> {
    let path: String = path.trim().nfc().collect();
    if path.contains(['\\', '\0']) {
        return Err(CallGuardError::Validation(format!("invalid path '{path}'")));
    }
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(CallGuardError::Validation(format!(
                    "path '{path}' escapes the storage root"
                )));
            }
            p => parts.push(p),
        }
    }
    Ok(parts.join("/"))
}

/// Routes storage operations to the configured backend through the envelope.
/// The monitoring service name is the provider name, e.g. `aws-s3`.
#[derive(Clone)]
pub struct StorageAdapter {
    backend: Arc<dyn StorageBackend>,
    envelope: Arc<CallEnvelope>,
}

impl StorageAdapter {
    pub fn new(backend: Arc<dyn StorageBackend>, envelope: Arc<CallEnvelope>) -> Self {
        Self { backend, envelope }
    }

    pub fn from_config(cfg: &Config, envelope: Arc<CallEnvelope>) -> Self {
        let backend = backend_for(cfg);
        tracing::info!(provider = %backend.provider(), "storage adapter ready");
        Self::new(backend, envelope)
    }

    pub fn provider(&self) -> StorageProviderKind {
        self.backend.provider()
    }

    fn spec<'a, T>(&self, endpoint: &str, method: &str) -> CallSpec<'a, T, CallGuardError> {
        CallSpec::new(self.provider().as_str())
            .endpoint(endpoint)
            .method(method)
    }

    pub async fn upload_file(
        &self,
        bytes: impl Into<Bytes>,
        name: &str,
        folder: &str,
        options: &UploadOptions,
    ) -> CoreResult<StoredFile> {
        let bytes = bytes.into();
        self.envelope
            .execute(self.spec(ENDPOINT_UPLOAD, "PUT"), || {
                self.backend.upload_file(bytes, name, folder, options)
            })
            .await
    }

    /// `true` when the file is gone. Failures are logged, never raised.
    pub async fn delete_file(&self, path: &str) -> bool {
        let outcome = self
            .envelope
            .execute(self.spec(ENDPOINT_DELETE, "DELETE"), || {
                self.backend.delete_file(path)
            })
            .await;
        match outcome {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider(),
                    path,
                    error = %e,
                    "file deletion failed"
                );
                false
            }
        }
    }

    pub async fn get_file_url(&self, path: &str, options: &UrlOptions) -> CoreResult<String> {
        self.envelope
            .execute(self.spec(ENDPOINT_URL, "GET"), || {
                self.backend.get_file_url(path, options)
            })
            .await
    }

    pub async fn get_file_content(&self, path: &str) -> CoreResult<Bytes> {
        self.envelope
            .execute(self.spec(ENDPOINT_CONTENT, "GET"), || {
                self.backend.get_file_content(path)
            })
            .await
    }
}
