use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{CallGuardError, CoreResult};

/// Deployment environment. Only `Production` changes behaviour: error
/// details drop their stack rendering.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> CoreResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(CallGuardError::Validation(format!(
                "unknown environment '{other}'"
            ))),
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Storage backend selection, read once when the storage adapter is built.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageProviderKind {
    #[default]
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "aws-s3")]
    AwsS3,
    #[serde(rename = "google-cloud")]
    GoogleCloud,
    #[serde(rename = "azure")]
    Azure,
}

impl StorageProviderKind {
    /// Unset or empty resolves to `Local`; unknown names are rejected.
    pub fn parse(value: Option<&str>) -> CoreResult<Self> {
        let Some(raw) = value else {
            return Ok(Self::Local);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Self::Local),
            "aws-s3" | "s3" => Ok(Self::AwsS3),
            "google-cloud" | "gcs" => Ok(Self::GoogleCloud),
            "azure" => Ok(Self::Azure),
            other => Err(CallGuardError::Validation(format!(
                "unknown storage provider '{other}' (expected local, aws-s3, google-cloud or azure)"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::AwsS3 => "aws-s3",
            Self::GoogleCloud => "google-cloud",
            Self::Azure => "azure",
        }
    }
}

impl std::fmt::Display for StorageProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_root_dir() -> String {
    "uploads".into()
}
fn default_url_prefix() -> String {
    "/uploads".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LocalCfg {
    /// Directory files are written under.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    /// Prefix of the relative URLs handed back to callers.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

impl Default for LocalCfg {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            url_prefix: default_url_prefix(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".into()
}
fn default_access_key_env() -> String {
    "AWS_ACCESS_KEY_ID".into()
}
fn default_secret_key_env() -> String {
    "AWS_SECRET_ACCESS_KEY".into()
}
fn default_signed_url_expiry_secs() -> u64 {
    3_600
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct S3Cfg {
    /// Checked on first use, not at load time.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, localstack).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    /// Name of the environment variable that contains the access key id.
    #[serde(default = "default_access_key_env")]
    pub access_key_env: String,
    /// Name of the environment variable that contains the secret key.
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
    #[serde(default = "default_signed_url_expiry_secs")]
    pub signed_url_expiry_secs: u64,
}

impl Default for S3Cfg {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_region(),
            endpoint: None,
            force_path_style: false,
            access_key_env: default_access_key_env(),
            secret_key_env: default_secret_key_env(),
            signed_url_expiry_secs: default_signed_url_expiry_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StorageCfg {
    #[serde(default)]
    pub provider: StorageProviderKind,
    #[serde(default)]
    pub local: LocalCfg,
    #[serde(default)]
    pub s3: S3Cfg,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelPriceCfg {
    pub model: String,
    pub input_per_million: f64,
    pub output_per_million: f64,
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TextGenCfg {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model whose pricing applies when a model is unknown or missing.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Extra or overriding per-model prices (USD per million tokens).
    #[serde(default)]
    pub pricing: Vec<ModelPriceCfg>,
}

impl Default for TextGenCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            pricing: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub storage: StorageCfg,
    #[serde(default)]
    pub textgen: TextGenCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(CallGuardError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| CallGuardError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| CallGuardError::Other(e.into()))?
            }
            Some("toml") => {
                toml::from_str::<Self>(s).map_err(|e| CallGuardError::Other(e.into()))?
            }
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| CallGuardError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s).map_err(|e| CallGuardError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// File (if any) plus process environment overrides.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let cfg = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        cfg.apply_env_with(|k| std::env::var(k).ok())
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Recognised: `CALLGUARD_ENV`, `STORAGE_PROVIDER`, `S3_BUCKET`,
    /// `AWS_REGION`, `S3_ENDPOINT`, `OPENAI_BASE`.
    pub fn apply_env_with<F>(mut self, lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CALLGUARD_ENV") {
            self.environment = Environment::parse(&v)?;
        }
        if let Some(v) = lookup("STORAGE_PROVIDER") {
            self.storage.provider = StorageProviderKind::parse(Some(&v))?;
        }
        if let Some(v) = lookup("S3_BUCKET").filter(|v| !v.is_empty()) {
            self.storage.s3.bucket = Some(v);
        }
        if let Some(v) = lookup("AWS_REGION").filter(|v| !v.is_empty()) {
            self.storage.s3.region = v;
        }
        if let Some(v) = lookup("S3_ENDPOINT").filter(|v| !v.is_empty()) {
            self.storage.s3.endpoint = Some(v);
        }
        if let Some(v) = lookup("OPENAI_BASE").filter(|v| !v.is_empty()) {
            self.textgen.base_url = v;
        }
        Ok(self)
    }
}
