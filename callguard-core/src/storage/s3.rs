use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use bytes::Bytes;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;

use super::{mime, object_key, relative_path, StorageBackend, StoredFile, UploadOptions, UrlOptions};
use crate::classify::{CODE_REFUSED, CODE_TIMEOUT};
use crate::config::{S3Cfg, StorageProviderKind};
use crate::error::{CallGuardError, CoreResult, UpstreamError};

/// Where the access key pair comes from.
#[derive(Debug)]
enum CredentialSource {
    /// The env vars named in `S3Cfg`, else the default AWS provider chain.
    Env,
    Static {
        access_key_id: String,
        secret_access_key: SecretString,
    },
}

/// Amazon S3 and S3-compatible stores.
///
/// The SDK client is built on first use, so a missing bucket or bad
/// credentials fail the call rather than startup.
#[derive(Debug)]
pub struct S3Storage {
    cfg: S3Cfg,
    credentials: CredentialSource,
    client: OnceCell<Client>,
}

impl S3Storage {
    pub fn new(cfg: S3Cfg) -> Self {
        Self {
            cfg,
            credentials: CredentialSource::Env,
            client: OnceCell::new(),
        }
    }

    pub fn with_credentials(
        cfg: S3Cfg,
        access_key_id: impl Into<String>,
        secret_access_key: SecretString,
    ) -> Self {
        Self {
            cfg,
            credentials: CredentialSource::Static {
                access_key_id: access_key_id.into(),
                secret_access_key,
            },
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> CoreResult<&Client> {
        self.client.get_or_try_init(|| self.build_client()).await
    }

    async fn build_client(&self) -> CoreResult<Client> {
        let region = Region::new(self.cfg.region.clone());
        let explicit = match &self.credentials {
            CredentialSource::Static {
                access_key_id,
                secret_access_key,
            } => Some((
                access_key_id.clone(),
                secret_access_key.expose_secret().to_string(),
            )),
            CredentialSource::Env => {
                let access = std::env::var(&self.cfg.access_key_env).ok().filter(|v| !v.is_empty());
                let secret = std::env::var(&self.cfg.secret_key_env).ok().filter(|v| !v.is_empty());
                access.zip(secret)
            }
        };

        let mut builder = match explicit {
            Some((access, secret)) => aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(Credentials::new(
                    access,
                    secret,
                    None,
                    None,
                    "callguard",
                )),
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };
        if let Some(endpoint) = &self.cfg.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        // the envelope never retries, and neither does the SDK underneath it
        let conf = builder
            .force_path_style(self.cfg.force_path_style)
            .retry_config(RetryConfig::disabled())
            .build();
        tracing::debug!(region = %self.cfg.region, endpoint = ?self.cfg.endpoint, "s3 client built");
        Ok(Client::from_conf(conf))
    }

    /// A missing bucket is a request the provider would reject, so it
    /// carries a 400 and classifies as `API_ERROR`.
    fn bucket(&self) -> CoreResult<&str> {
        self.cfg
            .bucket
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| UpstreamError::with_status(400, "S3 bucket is not configured").into())
    }

    /// Permanent URL of a public object.
    fn public_url(&self, bucket: &str, key: &str) -> CoreResult<String> {
        let (base, with_bucket_segment) = match &self.cfg.endpoint {
            Some(endpoint) => (endpoint.clone(), true),
            None if self.cfg.force_path_style => (
                format!("https://s3.{}.amazonaws.com", self.cfg.region),
                true,
            ),
            None => (
                format!("https://{bucket}.s3.{}.amazonaws.com", self.cfg.region),
                false,
            ),
        };
        let mut url = Url::parse(&base)
            .map_err(|e| CallGuardError::Validation(format!("invalid S3 endpoint '{base}': {e}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                CallGuardError::Validation(format!("S3 endpoint '{base}' cannot carry a path"))
            })?;
            segments.pop_if_empty();
            if with_bucket_segment {
                segments.push(bucket);
            }
            segments.extend(key.split('/'));
        }
        Ok(url.to_string())
    }

    async fn presigned_get(&self, bucket: &str, key: &str, expires_in: Option<Duration>) -> CoreResult<String> {
        let expires = expires_in.unwrap_or(Duration::from_secs(self.cfg.signed_url_expiry_secs));
        let presign = PresigningConfig::expires_in(expires)
            .map_err(|e| CallGuardError::Validation(format!("invalid signed URL lifetime: {e}")))?;
        let request = self
            .client()
            .await?
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign)
            .await
            .map_err(sdk_error)?;
        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn provider(&self) -> StorageProviderKind {
        StorageProviderKind::AwsS3
    }

    async fn upload_file(
        &self,
        bytes: Bytes,
        name: &str,
        folder: &str,
        options: &UploadOptions,
    ) -> CoreResult<StoredFile> {
        let bucket = self.bucket()?;
        let key = object_key(folder, name)?;
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| mime::content_type_for(&key).to_string());
        let size = bytes.len() as u64;

        let mut request = self
            .client()
            .await?
            .put_object()
            .bucket(bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes));
        if !options.metadata.is_empty() {
            request = request.set_metadata(Some(options.metadata.clone()));
        }
        if options.public {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }
        request.send().await.map_err(sdk_error)?;

        let url = if options.public {
            self.public_url(bucket, &key)?
        } else {
            self.presigned_get(bucket, &key, options.expires_in).await?
        };
        Ok(StoredFile {
            url,
            path: key,
            size,
            provider: StorageProviderKind::AwsS3,
        })
    }

    async fn delete_file(&self, path: &str) -> CoreResult<()> {
        let bucket = self.bucket()?;
        let key = relative_path(path)?;
        self.client()
            .await?
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn get_file_url(&self, path: &str, options: &UrlOptions) -> CoreResult<String> {
        let bucket = self.bucket()?;
        let key = relative_path(path)?;
        if options.public {
            self.public_url(bucket, &key)
        } else {
            self.presigned_get(bucket, &key, options.expires_in).await
        }
    }

    async fn get_file_content(&self, path: &str) -> CoreResult<Bytes> {
        let bucket = self.bucket()?;
        let key = relative_path(path)?;
        let output = self
            .client()
            .await?
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| UpstreamError::new(format!("failed to read S3 object body: {e}")))?;
        Ok(data.into_bytes())
    }
}

/// Maps SDK failures onto the shapes the classifier understands: service
/// responses keep their status nested, transport failures get a native code.
fn sdk_error<E>(err: SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> CallGuardError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    let upstream = match &err {
        SdkError::TimeoutError(_) => UpstreamError::with_code(CODE_TIMEOUT, message),
        SdkError::DispatchFailure(f) if f.is_timeout() => UpstreamError::with_code(CODE_TIMEOUT, message),
        SdkError::DispatchFailure(f) if f.is_io() => UpstreamError::with_code(CODE_REFUSED, message),
        SdkError::ServiceError(se) => {
            let mut u = UpstreamError::with_response(
                se.raw().status().as_u16(),
                err.message().map(str::to_string),
                message,
            );
            u.code = err.code().map(str::to_string);
            u
        }
        SdkError::ResponseError(re) => {
            UpstreamError::with_response(re.raw().status().as_u16(), None, message)
        }
        _ => UpstreamError::new(message),
    };
    upstream.into()
}
