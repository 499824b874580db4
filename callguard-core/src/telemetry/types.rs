use serde::{Deserialize, Serialize};

use crate::classify::ErrorCode;

/// Canonical, provider-agnostic record of one external call attempt.
/// Built by the envelope and handed to a `MonitoringSink`; never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CallRecord {
    /// External capability, e.g. "openai", "aws-s3".
    pub service_name: String,

    /// Logical operation, e.g. "chat.completions.create", "upload".
    pub endpoint: String,

    /// Request method metadata; best-effort only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Unix epoch milliseconds at which the attempt started.
    pub started_at_ms: u64,
    pub response_time_ms: u64,

    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,

    /// Usage metrics for metered services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

/// Redacted failure payload attached to error records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Native error code, e.g. "ECONNREFUSED".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    /// Debug rendering of the error and its causes. Omitted in production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl CallRecord {
    pub fn new(service_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn user_id_opt(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(|s| s.to_string());
        self
    }

    pub fn method_opt(mut self, method: Option<&str>) -> Self {
        self.method = method.map(|s| s.to_string());
        self
    }

    pub fn timing(mut self, started_at_ms: u64, response_time_ms: u64) -> Self {
        self.started_at_ms = started_at_ms;
        self.response_time_ms = response_time_ms;
        self
    }

    pub fn succeeded(mut self, status: u16) -> Self {
        self.success = true;
        self.response_status = Some(status);
        self
    }

    pub fn failed(mut self, status: Option<u16>) -> Self {
        self.success = false;
        self.response_status = status;
        self
    }

    pub fn usage(mut self, tokens: Option<u64>, cost_usd: Option<f64>) -> Self {
        self.tokens_used = tokens;
        self.cost_usd = cost_usd;
        self
    }

    pub fn error(mut self, code: ErrorCode, message: impl Into<String>, details: ErrorDetails) -> Self {
        self.error_code = Some(code);
        self.error_message = Some(message.into());
        self.error_details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_record_serializes_without_error_fields() {
        let rec = CallRecord::new("openai", "chat.completions.create")
            .user_id_opt(Some("u-1"))
            .timing(1_700_000_000_000, 42)
            .succeeded(200)
            .usage(Some(1500), Some(0.0075));

        let as_json = serde_json::to_value(&rec).unwrap();
        assert_eq!(as_json["service_name"], json!("openai"));
        assert_eq!(as_json["response_status"], json!(200));
        assert_eq!(as_json["tokens_used"], json!(1500));
        assert_eq!(as_json["user_id"], json!("u-1"));
        assert!(as_json.get("error_code").is_none());
        assert!(as_json.get("method").is_none());
    }

    #[test]
    fn failure_record_carries_code_and_details() {
        let rec = CallRecord::new("aws-s3", "upload")
            .failed(Some(0))
            .error(
                ErrorCode::NetworkError,
                "connection refused",
                ErrorDetails {
                    status: Some(0),
                    code: Some("ECONNREFUSED".into()),
                    message: "connection refused".into(),
                    stack: None,
                },
            );
        let as_json = serde_json::to_value(&rec).unwrap();
        assert_eq!(as_json["success"], json!(false));
        assert_eq!(as_json["error_code"], json!("NETWORK_ERROR"));
        assert_eq!(as_json["error_details"]["code"], json!("ECONNREFUSED"));
        assert!(as_json["error_details"].get("stack").is_none());
    }
}
