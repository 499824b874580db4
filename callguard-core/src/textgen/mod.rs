//! Text-generation adapter: runs chat completions through the call envelope
//! with token extraction and per-model cost.

pub mod client;
pub mod pricing;

use std::future::Future;
use std::sync::Arc;

pub use client::{CompletionClient, OpenAiClient};
pub use pricing::{ModelPrice, ModelPricing, PricingTable, DEFAULT_MODEL};

use crate::classify::ErrorShape;
use crate::config::Config;
use crate::envelope::{CallEnvelope, CallSpec};
use crate::error::CoreResult;
use crate::model::{ChatCompletion, ChatRequest};

pub const ENDPOINT_CHAT: &str = "chat.completions.create";

#[derive(Clone)]
pub struct TextGenAdapter {
    envelope: Arc<CallEnvelope>,
    pricing: Arc<ModelPricing>,
}

impl TextGenAdapter {
    pub fn new(envelope: Arc<CallEnvelope>, table: PricingTable) -> Self {
        Self {
            envelope,
            pricing: Arc::new(ModelPricing::new(table)),
        }
    }

    pub fn from_config(cfg: &Config, envelope: Arc<CallEnvelope>) -> Self {
        Self::new(envelope, PricingTable::from_config(&cfg.textgen))
    }

    pub fn pricing(&self) -> &PricingTable {
        self.pricing.table()
    }

    /// A call spec preloaded with this adapter's cost strategy. Callers add
    /// user id, fallback or hook before handing it to [`Self::call`].
    pub fn spec<'a, E>(&self, service_name: &str, endpoint: &str) -> CallSpec<'a, ChatCompletion, E> {
        CallSpec::new(service_name)
            .endpoint(endpoint)
            .cost_calculator(self.pricing.clone())
    }

    /// Runs any completion-producing operation through the envelope.
    pub async fn call<E, F, Fut>(
        &self,
        spec: CallSpec<'_, ChatCompletion, E>,
        operation: F,
    ) -> Result<ChatCompletion, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ChatCompletion, E>>,
        E: ErrorShape,
    {
        self.envelope.execute(spec, operation).await
    }

    pub async fn complete(
        &self,
        client: &dyn CompletionClient,
        request: &ChatRequest,
        user_id: Option<&str>,
    ) -> CoreResult<ChatCompletion> {
        let spec = self.spec(client.name(), ENDPOINT_CHAT).user_id_opt(user_id);
        self.call(spec, || client.create_chat_completion(request)).await
    }

    /// Like [`Self::complete`], but a failure on `primary` is answered by
    /// `secondary`. The caller only sees an error when both fail, and then it
    /// is the secondary's.
    pub async fn complete_with_fallback(
        &self,
        primary: &dyn CompletionClient,
        secondary: &dyn CompletionClient,
        request: &ChatRequest,
        user_id: Option<&str>,
    ) -> CoreResult<ChatCompletion> {
        let spec = self
            .spec(primary.name(), ENDPOINT_CHAT)
            .user_id_opt(user_id)
            .fallback(move |err| async move {
                tracing::info!(
                    primary = %primary.name(),
                    secondary = %secondary.name(),
                    error = %err,
                    "primary completion failed, using secondary"
                );
                secondary.create_chat_completion(request).await
            });
        self.call(spec, || primary.create_chat_completion(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorCode;
    use crate::error::{CallGuardError, UpstreamError};
    use crate::model::{ChatMessage, Usage};
    use crate::test_util::recording_envelope;
    use async_trait::async_trait;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    struct Scripted {
        name: &'static str,
        reply: Result<ChatCompletion, UpstreamError>,
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn create_chat_completion(&self, _request: &ChatRequest) -> CoreResult<ChatCompletion> {
            self.reply.clone().map_err(CallGuardError::from)
        }
    }

    fn completion(model: &str, prompt: u64, completion: u64) -> ChatCompletion {
        ChatCompletion {
            id: "chatcmpl-1".into(),
            model: model.into(),
            choices: vec![],
            usage: Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("gpt-4o", vec![ChatMessage::user("hello")])
    }

    #[tokio::test]
    async fn success_records_tokens_and_cost() {
        let (envelope, sink) = recording_envelope();
        let adapter = TextGenAdapter::new(envelope, PricingTable::builtin());
        let client = Scripted {
            name: "openai",
            reply: Ok(completion("gpt-4o", 1_000, 500)),
        };

        let out = adapter.complete(&client, &request(), Some("u-42")).await.unwrap();
        assert_eq!(out.model, "gpt-4o");

        let usage = sink.usage();
        assert_eq!(usage.len(), 1);
        let rec = &usage[0];
        assert_eq!(rec.service_name, "openai");
        assert_eq!(rec.endpoint, ENDPOINT_CHAT);
        assert_eq!(rec.user_id.as_deref(), Some("u-42"));
        assert!(rec.success);
        assert_eq!(rec.response_status, Some(200));
        assert_eq!(rec.tokens_used, Some(1_500));
        assert!((rec.cost_usd.unwrap() - 0.0075).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_usage_is_zero_cost() {
        let (envelope, sink) = recording_envelope();
        let adapter = TextGenAdapter::new(envelope, PricingTable::builtin());
        let mut reply = completion("gpt-4o", 0, 0);
        reply.usage = None;
        let client = Scripted {
            name: "openai",
            reply: Ok(reply),
        };
        adapter.complete(&client, &request(), None).await.unwrap();
        let rec = &sink.usage()[0];
        assert_eq!(rec.tokens_used, None);
        assert_eq!(rec.cost_usd, Some(0.0));
    }

    #[tokio::test]
    async fn rate_limit_is_reported_and_rethrown() {
        let (envelope, sink) = recording_envelope();
        let adapter = TextGenAdapter::new(envelope, PricingTable::builtin());
        let client = Scripted {
            name: "openai",
            reply: Err(UpstreamError::with_response(
                429,
                Some("Rate limit reached".into()),
                "openai returned 429",
            )),
        };

        let err = adapter.complete(&client, &request(), None).await.unwrap_err();
        assert!(matches!(err, CallGuardError::Upstream(_)));

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, Some(ErrorCode::RateLimit));
        assert_eq!(errors[0].response_status, Some(429));
        assert_eq!(errors[0].error_message.as_deref(), Some("Rate limit reached"));
        let usage = sink.usage();
        assert_eq!(usage.len(), 1);
        assert!(!usage[0].success);
        assert_eq!(usage[0].cost_usd, None);
    }

    #[tokio::test]
    async fn secondary_answers_when_primary_fails() {
        let (envelope, sink) = recording_envelope();
        let adapter = TextGenAdapter::new(envelope, PricingTable::builtin());
        let primary = Scripted {
            name: "openai",
            reply: Err(UpstreamError::with_response(503, None, "openai returned 503")),
        };
        let secondary = Scripted {
            name: "backup",
            reply: Ok(completion("gpt-4o-mini", 10, 10)),
        };

        let out = adapter
            .complete_with_fallback(&primary, &secondary, &request(), Some("u-1"))
            .await
            .unwrap();
        assert_eq!(out.model, "gpt-4o-mini");

        let usage = sink.usage();
        assert_eq!(usage.len(), 2);
        assert!(!usage[0].success);
        assert_eq!(usage[1].service_name, "openai_fallback");
        assert!(usage[1].success);
        assert_eq!(sink.errors()[0].error_code, Some(ErrorCode::ServerError));
    }

    #[tokio::test]
    async fn both_failing_surfaces_secondary_error() {
        let (envelope, _sink) = recording_envelope();
        let adapter = TextGenAdapter::new(envelope, PricingTable::builtin());
        let primary = Scripted {
            name: "openai",
            reply: Err(UpstreamError::with_response(500, None, "primary down")),
        };
        let secondary = Scripted {
            name: "backup",
            reply: Err(UpstreamError::with_status(401, "backup key rejected")),
        };
        let err = adapter
            .complete_with_fallback(&primary, &secondary, &request(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "backup key rejected");
    }

    #[tokio::test]
    async fn end_to_end_against_mock_provider() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "id": "chatcmpl-2",
                "model": "gpt-4o-2024-08-06",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}],
                "usage": {"prompt_tokens": 1000, "completion_tokens": 500, "total_tokens": 1500}
            }));
        });

        let (envelope, sink) = recording_envelope();
        let adapter = TextGenAdapter::new(envelope, PricingTable::builtin());
        let client = OpenAiClient::new_for_tests(&server.base_url());
        let out = adapter.complete(&client, &request(), None).await.unwrap();
        assert_eq!(out.text(), Some("hi"));
        let rec = &sink.usage()[0];
        assert_eq!(rec.tokens_used, Some(1_500));
        assert!((rec.cost_usd.unwrap() - 0.0075).abs() < 1e-9);
    }

    #[tokio::test]
    async fn call_accepts_custom_operations() {
        let (envelope, sink) = recording_envelope();
        let adapter = TextGenAdapter::new(envelope, PricingTable::builtin());
        let spec = adapter
            .spec::<UpstreamError>("azure-openai", "chat.custom")
            .user_id("u-9");
        let out = adapter
            .call(spec, || async { Ok(completion("gpt-4o-mini", 1_000_000, 0)) })
            .await
            .unwrap();
        assert_eq!(out.model, "gpt-4o-mini");
        let rec = &sink.usage()[0];
        assert_eq!(rec.service_name, "azure-openai");
        assert!((rec.cost_usd.unwrap() - 0.15).abs() < 1e-9);
    }
}
