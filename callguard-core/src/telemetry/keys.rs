/// Span/Log attribute keys for external calls.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_SERVICE: &str = "call.service";
pub const KEY_ENDPOINT: &str = "call.endpoint";
pub const KEY_USER_ID: &str = "call.user_id";

pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_STATUS: &str = "call.status";
pub const KEY_SUCCESS: &str = "call.success";
pub const KEY_TOKENS_TOTAL: &str = "tokens.total";
pub const KEY_COST_USD: &str = "cost.usd";

/// Error-related (if applicable)
pub const KEY_ERROR_CODE: &str = "error.code";
pub const KEY_ERROR_MESSAGE: &str = "error.message";

/// Event targets used by `TracingSink`.
pub const TARGET_USAGE: &str = "callguard::usage";
pub const TARGET_ERROR: &str = "callguard::error";
