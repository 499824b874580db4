use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{Config, TextGenCfg};
use crate::error::{CoreResult, UpstreamError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{ChatCompletion, ChatRequest};

/// Anything that can answer a chat-completions request.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider name, used as the monitoring service name.
    fn name(&self) -> &str;
    async fn create_chat_completion(&self, request: &ChatRequest) -> CoreResult<ChatCompletion>;
}

/// OpenAI-compatible `/v1/chat/completions` client.
#[derive(Debug)]
pub struct OpenAiClient {
    http: HttpClient,
    base: String,
    org: Option<String>,
    name: String,
    api_key: Option<SecretString>,
    api_key_env: String,
}

impl OpenAiClient {
    pub fn new(http: HttpClient, api_key: Option<SecretString>, base: String, org: Option<String>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            org,
            name: "openai".into(),
            api_key,
            api_key_env: TextGenCfg::default().api_key_env,
        }
    }

    /// Reads the key from `textgen.api_key_env`. A missing key is not an
    /// error here; it surfaces on the first call.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::new(&cfg.http)?;
        let api_key = std::env::var(&cfg.textgen.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        let mut client = Self::new(http, api_key, cfg.textgen.base_url.clone(), None);
        client.api_key_env = cfg.textgen.api_key_env.clone();
        Ok(client)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OpenAiClient::new(
            HttpClient::new_default().unwrap(),
            Some(SecretString::from("test-key")),
            server_base.to_string(),
            None,
        )
    }

    fn headers(&self, api_key: &SecretString) -> Vec<(String, String)> {
        let mut h = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(org) = &self.org {
            h.push(("OpenAI-Organization".into(), org.clone()));
        }
        h
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_chat_completion(&self, request: &ChatRequest) -> CoreResult<ChatCompletion> {
        let Some(api_key) = &self.api_key else {
            return Err(UpstreamError::with_status(
                401,
                format!("{} is not set", self.api_key_env),
            )
            .into());
        };
        let owned_headers = self.headers(api_key);
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}/v1/chat/completions", self.base);
        let (completion, provider_id, latency_ms) = self
            .http
            .post_json::<_, ChatCompletion>(&url, request, &hdrs, &RequestCtx::default())
            .await?;
        tracing::debug!(
            provider = %self.name,
            model = %completion.model,
            provider_request_id = provider_id.as_deref().unwrap_or(""),
            latency_ms,
            "chat completion received"
        );
        Ok(completion)
    }
}
