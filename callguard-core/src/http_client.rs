use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::classify::{CODE_REFUSED, CODE_TIMEOUT};
use crate::config::HttpCfg;
use crate::error::{CallGuardError, CoreResult, UpstreamError};

/// Request context carries tracing IDs and idempotency key.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
/// Failures come back as `UpstreamError` so the envelope can classify them.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| CallGuardError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "callguard/0.1".to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// POST a JSON body and decode a JSON response.
    /// Returns the decoded body, the provider's request id (if any) and latency.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u64)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);

        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(ik) = ctx.idempotency_key {
            req = req.header("Idempotency-Key", ik);
        }

        let resp = req.send().await.map_err(|e| transport_error(url, &e))?;

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        let provider_request_id = extract_request_id(resp.headers());

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, &text).into());
        }

        let parsed = resp.json::<R>().await.map_err(|e| {
            UpstreamError::with_response(
                status.as_u16(),
                Some(format!("json decode error: {e}")),
                format!("invalid response body from {url}"),
            )
        })?;
        Ok((parsed, provider_request_id, latency))
    }
}

/// Failures that never produced a response.
fn transport_error(url: &str, e: &reqwest::Error) -> UpstreamError {
    let message = format!("request to {url} failed: {e}");
    if e.is_timeout() {
        UpstreamError::with_code(CODE_TIMEOUT, message)
    } else if e.is_connect() {
        UpstreamError::with_code(CODE_REFUSED, message)
    } else {
        UpstreamError::new(message)
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 4] = ["x-request-id", "request-id", "x-amzn-requestid", "x-amz-request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

/// Non-2xx: keep the status nested, HTTP-client style, with the provider's
/// own message when the body carries one.
fn map_http_error(url: &str, status: StatusCode, body: &str) -> UpstreamError {
    let body_message = provider_message(body).map(|m| truncate(&m, 300));
    UpstreamError::with_response(
        status.as_u16(),
        body_message,
        format!("{url} returned {}", status.as_u16()),
    )
}

/// Pulls `error.message`, `message` or a string `error` out of a JSON body.
fn provider_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.pointer("/error/message")
        .or_else(|| v.get("message"))
        .or_else(|| v.get("error"))
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(|m| m.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut t = s[..idx].to_string();
            t.push_str("...");
            t
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, ErrorCode};
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn upstream(err: CallGuardError) -> UpstreamError {
        match err {
            CallGuardError::Upstream(u) => u,
            other => panic!("expected Upstream, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_json_success() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/chat")
                .header("X-Request-Id", "rid")
                .header("Idempotency-Key", "ik");
            then.status(200)
                .header("x-request-id", "abc123")
                .json_body(json!({"ok": true}));
        });

        #[derive(serde::Deserialize)]
        struct Resp {
            ok: bool,
        }

        let client = HttpClient::new_default().unwrap();
        let ctx = RequestCtx {
            request_id: Some("rid"),
            idempotency_key: Some("ik"),
        };
        let (resp, provider_id, _latency) = client
            .post_json::<_, Resp>(&format!("{}/chat", server.base_url()), &json!({"msg":"hi"}), &[], &ctx)
            .await
            .unwrap();

        assert!(resp.ok);
        assert_eq!(provider_id, Some("abc123".into()));
        m.assert();
    }

    #[tokio::test]
    async fn non_success_nests_status_and_provider_message() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(429)
                .json_body(json!({"error": {"message": "Rate limit reached for gpt-4o"}}));
        });
        let client = HttpClient::new_default().unwrap();
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({}),
                &[],
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();

        let u = upstream(err);
        assert_eq!(u.status, None);
        let resp = u.response.clone().unwrap();
        assert_eq!(resp.status, 429);
        assert_eq!(resp.message.as_deref(), Some("Rate limit reached for gpt-4o"));
        let c = classify(&u);
        assert_eq!(c.code, ErrorCode::RateLimit);
        assert_eq!(c.message, "Rate limit reached for gpt-4o");
    }

    #[tokio::test]
    async fn non_json_error_body_uses_generic_message() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(503).body("<html>down</html>");
        });
        let client = HttpClient::new_default().unwrap();
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({}),
                &[],
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        let c = classify(&upstream(err));
        assert_eq!(c.code, ErrorCode::ServerError);
        assert_eq!(c.response_status, Some(503));
        assert_eq!(c.message, ErrorCode::ServerError.generic_message());
    }

    #[tokio::test]
    async fn bad_json_is_api_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(200).body("not-json");
        });
        let client = HttpClient::new_default().unwrap();
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({}),
                &[],
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        let c = classify(&upstream(err));
        assert_eq!(c.code, ErrorCode::ApiError);
        assert!(c.message.starts_with("json decode error"));
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let client = HttpClient::new_default().unwrap();
        // port 9 (discard) is typically closed
        let err = client
            .post_json::<_, serde_json::Value>(
                "http://127.0.0.1:9/chat",
                &json!({}),
                &[],
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        let u = upstream(err);
        assert_eq!(u.code.as_deref(), Some(CODE_REFUSED));
        assert_eq!(classify(&u).code, ErrorCode::NetworkError);
    }

    #[test]
    fn truncate_is_char_safe() {
        let s = "é".repeat(400);
        let t = truncate(&s, 300);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), 303);
        assert_eq!(truncate("short", 300), "short");
    }
}
