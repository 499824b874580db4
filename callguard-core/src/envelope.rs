//! The call envelope: a uniform wrapper around one external call.
//!
//! Contract:
//! - The operation runs exactly once. Nothing is retried here.
//! - Success emits one usage record (status 200) and returns the result untouched.
//! - Failure emits an error record, then a failed usage record, runs the
//!   `on_error` hook, then either the fallback or re-raises the original error.
//! - A successful fallback emits its own usage record under
//!   `<service>_fallback`, timed from the original start.
//! - Sink and hook failures are logged and never change the outcome.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::classify::{classify, redact, ErrorCode, ErrorShape};
use crate::config::{Config, Environment};
use crate::telemetry::{CallRecord, ErrorDetails, MonitoringSink};

pub const DEFAULT_ENDPOINT: &str = "unknown";
/// Method recorded on failed usage records when the caller gave none.
pub const DEFAULT_FAILURE_METHOD: &str = "POST";
pub const FALLBACK_SUFFIX: &str = "_fallback";

const SUCCESS_STATUS: u16 = 200;

/// Default token extraction for call results.
///
/// The default method reports nothing, so any result type can opt in with an
/// empty `impl`. Types with a `usage.total_tokens`-shaped field override it.
pub trait ReportsUsage {
    fn total_tokens(&self) -> Option<u64> {
        None
    }
}

impl ReportsUsage for serde_json::Value {
    fn total_tokens(&self) -> Option<u64> {
        self.get("usage")?.get("total_tokens")?.as_u64()
    }
}

impl ReportsUsage for () {}
impl ReportsUsage for bool {}
impl ReportsUsage for String {}
impl ReportsUsage for Vec<u8> {}
impl ReportsUsage for bytes::Bytes {}

/// Dollar cost of one successful call.
pub trait CostCalculator<T>: Send + Sync {
    fn cost(&self, result: &T, tokens_used: Option<u64>) -> f64;
}

impl<T, F> CostCalculator<T> for F
where
    F: Fn(&T, Option<u64>) -> f64 + Send + Sync,
{
    fn cost(&self, result: &T, tokens_used: Option<u64>) -> f64 {
        self(result, tokens_used)
    }
}

/// What an `on_error` hook gets to see besides the error itself.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub service_name: &'a str,
    pub endpoint: &'a str,
    pub user_id: Option<&'a str>,
    pub error_code: ErrorCode,
    pub response_status: Option<u16>,
    pub response_time_ms: u64,
}

type FallbackFn<'a, T, E> = Box<dyn FnOnce(E) -> BoxFuture<'a, Result<T, E>> + Send + 'a>;
type ErrorHookFn<'a, E> =
    Box<dyn Fn(&E, &CallContext<'_>) -> anyhow::Result<()> + Send + Sync + 'a>;
type TokenFn<'a, T> = Box<dyn Fn(&T) -> Option<u64> + Send + Sync + 'a>;

/// Metadata and strategies for one call.
pub struct CallSpec<'a, T, E> {
    service_name: String,
    endpoint: String,
    user_id: Option<String>,
    method: Option<String>,
    fallback: Option<FallbackFn<'a, T, E>>,
    on_error: Option<ErrorHookFn<'a, E>>,
    cost_calculator: Option<Arc<dyn CostCalculator<T> + 'a>>,
    token_calculator: Option<TokenFn<'a, T>>,
}

impl<'a, T, E> CallSpec<'a, T, E> {
    pub fn new(service_name: impl Into<String>) -> Self {
        let mut service_name = service_name.into();
        if service_name.trim().is_empty() {
            tracing::warn!("external call spec created without a service name");
            service_name = DEFAULT_ENDPOINT.to_string();
        }
        Self {
            service_name,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_id: None,
            method: None,
            fallback: None,
            on_error: None,
            cost_calculator: None,
            token_calculator: None,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn user_id_opt(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(|s| s.to_string());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Replacement strategy run with the triggering error.
    pub fn fallback<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(E) -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        self.fallback = Some(Box::new(move |err| Box::pin(f(err))));
        self
    }

    /// Observational hook. Its errors and panics are logged and dropped.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E, &CallContext<'_>) -> anyhow::Result<()> + Send + Sync + 'a,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn cost_calculator(mut self, calculator: Arc<dyn CostCalculator<T> + 'a>) -> Self {
        self.cost_calculator = Some(calculator);
        self
    }

    /// Overrides the result's own usage report.
    pub fn token_calculator<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> Option<u64> + Send + Sync + 'a,
    {
        self.token_calculator = Some(Box::new(f));
        self
    }
}

/// Executes external calls and reports them to a monitoring sink.
/// Holds no per-call state; share it behind an `Arc`.
#[derive(Clone)]
pub struct CallEnvelope {
    sink: Arc<dyn MonitoringSink>,
    environment: Environment,
}

impl CallEnvelope {
    pub fn new(sink: Arc<dyn MonitoringSink>) -> Self {
        Self {
            sink,
            environment: Environment::default(),
        }
    }

    pub fn from_config(cfg: &Config, sink: Arc<dyn MonitoringSink>) -> Self {
        Self::new(sink).with_environment(cfg.environment)
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub async fn execute<T, E, F, Fut>(&self, spec: CallSpec<'_, T, E>, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: ReportsUsage,
        E: ErrorShape,
    {
        let CallSpec {
            service_name,
            endpoint,
            user_id,
            method,
            fallback,
            on_error,
            cost_calculator,
            token_calculator,
        } = spec;

        let span = tracing::info_span!(
            "external_call",
            call.service = %service_name,
            call.endpoint = %endpoint,
            call.user_id = user_id.as_deref(),
            latency.ms = Empty,
            call.status = Empty,
            error.code = Empty,
        );

        let started_at_ms = now_ms();
        let started = Instant::now();
        let outcome = operation().instrument(span.clone()).await;
        let response_time_ms = started.elapsed().as_millis() as u64;
        span.record("latency.ms", response_time_ms);

        let base = CallRecord::new(service_name.as_str(), endpoint.as_str())
            .user_id_opt(user_id.as_deref())
            .timing(started_at_ms, response_time_ms);

        let err = match outcome {
            Ok(result) => {
                let tokens = match &token_calculator {
                    Some(count) => count(&result),
                    None => result.total_tokens(),
                };
                let cost = cost_calculator.as_ref().map(|c| c.cost(&result, tokens));
                span.record("call.status", SUCCESS_STATUS);

                let record = base
                    .method_opt(method.as_deref())
                    .succeeded(SUCCESS_STATUS)
                    .usage(tokens, cost);
                self.emit_usage(&record).instrument(span.clone()).await;
                return Ok(result);
            }
            Err(err) => err,
        };

        let class = classify(&err);
        span.record("error.code", class.code.as_str());
        if let Some(status) = class.response_status {
            span.record("call.status", status);
        }

        let message = redact(&class.message);
        let details = ErrorDetails {
            status: class.response_status,
            code: err.native_code(),
            message: message.clone(),
            stack: (!self.environment.is_production()).then(|| redact(&format!("{err:?}"))),
        };

        let error_record = base
            .clone()
            .method_opt(method.as_deref())
            .failed(class.response_status)
            .error(class.code, message.clone(), details);
        self.emit_error(&error_record).instrument(span.clone()).await;

        let mut usage_record = base
            .method_opt(Some(method.as_deref().unwrap_or(DEFAULT_FAILURE_METHOD)))
            .failed(class.response_status);
        usage_record.error_code = Some(class.code);
        usage_record.error_message = Some(message);
        self.emit_usage(&usage_record).instrument(span.clone()).await;

        if let Some(hook) = &on_error {
            let ctx = CallContext {
                service_name: &service_name,
                endpoint: &endpoint,
                user_id: user_id.as_deref(),
                error_code: class.code,
                response_status: class.response_status,
                response_time_ms,
            };
            match std::panic::catch_unwind(AssertUnwindSafe(|| hook(&err, &ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    call.service = %service_name,
                    error = %e,
                    "on_error hook failed"
                ),
                Err(_) => tracing::warn!(call.service = %service_name, "on_error hook panicked"),
            }
        }

        let Some(fallback) = fallback else {
            return Err(err);
        };

        match fallback(err).instrument(span.clone()).await {
            Ok(result) => {
                let record = CallRecord::new(format!("{service_name}{FALLBACK_SUFFIX}"), endpoint)
                    .user_id_opt(user_id.as_deref())
                    .method_opt(method.as_deref())
                    .timing(started_at_ms, started.elapsed().as_millis() as u64)
                    .succeeded(SUCCESS_STATUS);
                self.emit_usage(&record).instrument(span).await;
                Ok(result)
            }
            Err(fallback_err) => {
                tracing::debug!(
                    parent: &span,
                    call.service = %service_name,
                    error = %fallback_err,
                    "fallback failed"
                );
                Err(fallback_err)
            }
        }
    }

    async fn emit_usage(&self, record: &CallRecord) {
        let outcome = AssertUnwindSafe(self.sink.log_usage(record))
            .catch_unwind()
            .await;
        report_sink_outcome("usage", record, outcome);
    }

    async fn emit_error(&self, record: &CallRecord) {
        let outcome = AssertUnwindSafe(self.sink.log_error(record))
            .catch_unwind()
            .await;
        report_sink_outcome("error", record, outcome);
    }
}

/// Sink errors and panics end here; neither reaches the caller.
fn report_sink_outcome(
    channel: &str,
    record: &CallRecord,
    outcome: std::thread::Result<anyhow::Result<()>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(
            call.service = %record.service_name,
            channel,
            error = %e,
            "monitoring sink rejected record"
        ),
        Err(_) => tracing::warn!(
            call.service = %record.service_name,
            channel,
            "monitoring sink panicked"
        ),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
