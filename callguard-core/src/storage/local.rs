use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use super::{object_key, relative_path, StorageBackend, StoredFile, UploadOptions, UrlOptions};
use crate::config::{LocalCfg, StorageProviderKind};
use crate::error::{CallGuardError, CoreResult};

/// Files under a root directory, addressed by relative URLs.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    url_prefix: String,
}

impl LocalStorage {
    pub fn new(cfg: &LocalCfg) -> Self {
        Self {
            root: PathBuf::from(&cfg.root_dir),
            url_prefix: cfg.url_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Accepts either the stored path or the URL handed out at upload.
    fn resolve(&self, path_or_url: &str) -> CoreResult<PathBuf> {
        let stripped = if self.url_prefix.is_empty() {
            path_or_url
        } else {
            path_or_url
                .strip_prefix(self.url_prefix.as_str())
                .filter(|rest| rest.starts_with('/'))
                .unwrap_or(path_or_url)
        };
        let rel = relative_path(stripped)?;
        if rel.is_empty() {
            return Err(CallGuardError::Validation(format!(
                "'{path_or_url}' does not name a file"
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn provider(&self) -> StorageProviderKind {
        StorageProviderKind::Local
    }

    async fn upload_file(
        &self,
        bytes: Bytes,
        name: &str,
        folder: &str,
        _options: &UploadOptions,
    ) -> CoreResult<StoredFile> {
        let key = object_key(folder, name)?;
        let dest = self.root.join(&key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, &bytes).await?;
        tracing::debug!(path = %dest.display(), size = bytes.len(), "stored file locally");
        Ok(StoredFile {
            url: format!("{}/{key}", self.url_prefix),
            path: key,
            size: bytes.len() as u64,
            provider: StorageProviderKind::Local,
        })
    }

    async fn delete_file(&self, path: &str) -> CoreResult<()> {
        let target = self.resolve(path)?;
        tokio::fs::remove_file(&target).await?;
        Ok(())
    }

    /// Local paths are served as-is.
    async fn get_file_url(&self, path: &str, _options: &UrlOptions) -> CoreResult<String> {
        Ok(path.to_string())
    }

    async fn get_file_content(&self, _path: &str) -> CoreResult<Bytes> {
        Err(CallGuardError::Unsupported {
            provider: StorageProviderKind::Local.as_str().to_string(),
            operation: "getFileContent".into(),
            hint: "use direct filesystem read".into(),
        })
    }
}
